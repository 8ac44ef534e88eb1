use std::fmt::Write as _;
use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use fdr_split::{
    plan_splits, split_recording_to_segments, ChannelStore, Recording, SegmentRecord,
    SegmentationPlan, SlowIntervalOutcome, SplitDecision, SplitParams,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Flight data recording segmentation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a recording into one sub-recording per flight and tabulate the segments
    Split(SplitArgs),
    /// Report how a recording would be split without writing any segments
    Plan(PlanArgs),
}

#[derive(Parser, Debug)]
struct SplitArgs {
    /// Recording JSON to split
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Directory for the segment files (defaults to the input's directory)
    #[arg(long, value_hint = ValueHint::DirPath)]
    dest_dir: Option<PathBuf>,

    /// Threshold overrides as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// RFC 3339 datetime close to the end of the data, for date fields not recorded
    #[arg(long)]
    fallback_dt: Option<String>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "segments.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Report stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Recording JSON to inspect
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Threshold overrides as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Report path (`-` for stdout)
    #[arg(short, long, default_value = "plan.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Split(args) => args.verbose,
        Command::Plan(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Split(args) => handle_split(args),
        Command::Plan(args) => handle_plan(args),
    }
}

fn handle_split(args: SplitArgs) -> Result<()> {
    let params = match args.params.as_deref() {
        Some(path) => load_params(path)?,
        None => SplitParams::default(),
    };
    let fallback = args
        .fallback_dt
        .as_deref()
        .map(parse_fallback)
        .transpose()?;

    let t_split = Instant::now();
    let records = split_recording_to_segments(
        &args.input,
        args.dest_dir.as_deref(),
        fallback,
        Utc::now(),
        &params,
    )
    .with_context(|| format!("failed to split {}", args.input.display()))?;
    if args.profile || args.verbose {
        info!(
            "Split stage: {:.1} ms ({} segments)",
            t_split.elapsed().as_secs_f64() * 1000.0,
            records.len()
        );
    }

    if args.output.as_os_str() == "-" {
        write_segments_stdout(&records)?;
    } else {
        write_segments_csv(&records, &args.output)?;
        info!("Wrote segment table: {}", args.output.display());
    }
    Ok(())
}

fn handle_plan(args: PlanArgs) -> Result<()> {
    let params = match args.params.as_deref() {
        Some(path) => load_params(path)?,
        None => SplitParams::default(),
    };
    let recording = Recording::load(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let plan = plan_splits(&recording, &params)
        .with_context(|| format!("failed to segment {}", args.input.display()))?;

    let report = plan_report(&args.input, &recording, &plan);
    if args.output.as_os_str() == "-" {
        io::stdout()
            .lock()
            .write_all(report.as_bytes())
            .context("failed to write plan to stdout")?;
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Plan report written: {}", args.output.display());
    }
    Ok(())
}

fn load_params(path: &Path) -> Result<SplitParams> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read split parameters {}", path.display()))?;
    let params: SplitParams = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid split parameters JSON", path.display()))?;
    params
        .validate()
        .with_context(|| format!("invalid split parameters in {}", path.display()))?;
    Ok(params)
}

fn parse_fallback(input: &str) -> Result<DateTime<Utc>> {
    let dt = DateTime::parse_from_rfc3339(input)
        .with_context(|| format!("fallback datetime '{input}' is not RFC 3339"))?;
    Ok(dt.with_timezone(&Utc))
}

fn format_dt(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn describe_decision(decision: &SplitDecision) -> String {
    match decision {
        SplitDecision::FrameCounter(at) => format!("split at {at} s on frame counter jump"),
        SplitDecision::EnginePower(at) => format!("split at {at} s on engine power minimum"),
        SplitDecision::RateOfTurn(at) => format!("split at {at} s where turning stopped"),
        SplitDecision::NoSplit => "no split found".to_string(),
    }
}

fn describe_outcome(outcome: &SlowIntervalOutcome) -> String {
    match outcome {
        SlowIntervalOutcome::Leading(interval) => format!("{interval}: start of data"),
        SlowIntervalOutcome::Trailing(interval) => format!("{interval}: end of data"),
        SlowIntervalOutcome::TooShort(interval) => format!("{interval}: too short to split"),
        SlowIntervalOutcome::Decided { interval, decision } => {
            format!("{interval}: {}", describe_decision(decision))
        }
    }
}

fn plan_report(path: &Path, recording: &Recording, plan: &SegmentationPlan) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "FILE: {}", path.display());
    let _ = writeln!(report, "  duration_s: {:.1}", recording.duration_secs());
    let _ = writeln!(
        report,
        "  reliable_frame_counter: {}",
        recording.reliable_frame_counter()
    );
    let _ = writeln!(
        report,
        "  superframe_present: {}",
        recording.superframe_present()
    );

    let _ = writeln!(report, "  channels:");
    for name in recording.channel_names() {
        let Some(series) = recording.get(&name) else {
            continue;
        };
        let _ = writeln!(
            report,
            "    - {}: count={}, valid={}, rate_hz={}, min={}, max={}",
            name,
            series.len(),
            series.valid_count(),
            series.sample_rate,
            series.min_valid().map_or("n/a".into(), |v| format!("{:.3}", v)),
            series.max_valid().map_or("n/a".into(), |v| format!("{:.3}", v))
        );
    }

    if !plan.outcomes.is_empty() {
        let _ = writeln!(report, "  slow_intervals:");
        for outcome in &plan.outcomes {
            let _ = writeln!(report, "    - {}", describe_outcome(outcome));
        }
    }

    let _ = writeln!(report, "  segments:");
    for (i, segment) in plan.segments.iter().enumerate() {
        let _ = writeln!(
            report,
            "    {}. {} {}",
            i + 1,
            segment.segment_type,
            segment.interval
        );
    }
    report
}

fn write_segments_stdout(records: &[SegmentRecord]) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_segment_rows(records, &mut writer)
}

fn write_segments_csv(records: &[SegmentRecord], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_segment_rows(records, &mut writer)
}

fn write_segment_rows<W: Write>(
    records: &[SegmentRecord],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "part",
        "segment_type",
        "start_s",
        "stop_s",
        "path",
        "hash",
        "start_dt",
        "go_fast_dt",
        "stop_dt",
    ])?;
    for record in records {
        writer.write_record([
            record.part.to_string(),
            record.segment_type.to_string(),
            format!("{:.1}", record.interval.start),
            format!("{:.1}", record.interval.stop),
            record.path.display().to_string(),
            record.hash.clone(),
            format_dt(&record.start_dt),
            record.go_fast_dt.as_ref().map(format_dt).unwrap_or_default(),
            format_dt(&record.stop_dt),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdr_split::{Interval, MaskedSeries, SegmentDescriptor, SegmentType};

    #[test]
    fn fallback_accepts_offsets() {
        let dt = parse_fallback("2020-06-01T11:00:00+02:00").unwrap();
        assert_eq!(format_dt(&dt), "2020-06-01T09:00:00Z");
        assert!(parse_fallback("yesterday").is_err());
    }

    #[test]
    fn csv_rows_follow_header() {
        let start = parse_fallback("2020-06-01T08:00:00Z").unwrap();
        let records = vec![SegmentRecord {
            interval: Interval::new(0.0, 1520.0),
            segment_type: SegmentType::StartAndStop,
            part: 1,
            path: PathBuf::from("flights.001.json"),
            hash: "ab".into(),
            start_dt: start,
            go_fast_dt: None,
            stop_dt: start,
        }];
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_segment_rows(&records, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("part,segment_type,start_s,stop_s,path,hash,start_dt,go_fast_dt,stop_dt")
        );
        assert_eq!(
            lines.next(),
            Some("1,START_AND_STOP,0.0,1520.0,flights.001.json,ab,2020-06-01T08:00:00Z,,2020-06-01T08:00:00Z")
        );
    }

    #[test]
    fn plan_report_lists_channels_and_segments() {
        let recording = Recording::new(4.0).with_channel(
            "Airspeed",
            MaskedSeries::from_options(vec![Some(1.0), None, Some(3.0), Some(2.0)], 1.0, 0.0),
        );
        let plan = SegmentationPlan {
            duration_secs: 4.0,
            outcomes: vec![SlowIntervalOutcome::Decided {
                interval: Interval::new(1.0, 3.0),
                decision: SplitDecision::NoSplit,
            }],
            segments: vec![SegmentDescriptor {
                segment_type: SegmentType::GroundOnly,
                interval: Interval::new(0.0, 4.0),
            }],
        };
        let report = plan_report(Path::new("rec.json"), &recording, &plan);
        assert!(report.contains("Airspeed: count=4, valid=3, rate_hz=1, min=1.000, max=3.000"));
        assert!(report.contains("[1, 3): no split found"));
        assert!(report.contains("1. GROUND_ONLY [0, 4)"));
    }

    #[test]
    fn params_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        fs::write(&path, r#"{"airspeed_threshold_kt": 60.0}"#).unwrap();
        let params = load_params(&path).unwrap();
        assert_eq!(params.airspeed_threshold_kt, 60.0);
        assert_eq!(params.minimum_split_duration_s, 100.0);

        fs::write(&path, r#"{"airspeed_threshold_kt": -1.0}"#).unwrap();
        assert!(load_params(&path).is_err());
    }
}
