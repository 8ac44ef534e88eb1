//! Writing segments out as their own sub-recordings, with hash and timestamps.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::classify::{Interval, SegmentDescriptor, SegmentType};
use crate::segmentation::{split_segments, AIRSPEED};
use crate::series::{runs_of_ones, MaskedSeries};
use crate::store::{ChannelStore, Recording};
use crate::timebase::calculate_start_datetime;
use crate::{SplitError, SplitParams, TimebaseError};

/// One materialized segment and its provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// Position in the source recording, before superframe widening.
    pub interval: Interval,
    pub segment_type: SegmentType,
    /// 1-based position in the source recording.
    pub part: usize,
    pub path: PathBuf,
    pub hash: String,
    pub start_dt: DateTime<Utc>,
    pub go_fast_dt: Option<DateTime<Utc>>,
    pub stop_dt: DateTime<Utc>,
}

fn to_hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn sha256_hex(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

/// `dt` moved by `seconds`, or an error when the result is not a representable datetime.
fn shift(dt: DateTime<Utc>, seconds: f64) -> Result<DateTime<Utc>, TimebaseError> {
    let millis = (seconds * 1000.0).round();
    (millis.is_finite() && millis.abs() < i64::MAX as f64)
        .then(|| Duration::try_milliseconds(millis as i64))
        .flatten()
        .and_then(|delta| dt.checked_add_signed(delta))
        .ok_or_else(|| {
            TimebaseError::InvalidTimestamp(format!(
                "{} shifted by {} s is out of range",
                dt, seconds
            ))
        })
}

/// Hash of the raw airspeed samples in every fast run of at least `min_samples` samples.
///
/// Ground padding before and after the flight never changes the hash, so the same flight cut
/// from differently trimmed recordings hashes the same.
pub fn airspeed_hash(airspeed: &MaskedSeries, threshold: f64, min_samples: usize) -> String {
    let fast: Vec<bool> = airspeed.data.iter().map(|v| *v > threshold).collect();
    let mut hasher = Sha256::new();
    for run in runs_of_ones(&fast) {
        if run.len() < min_samples {
            continue;
        }
        for v in airspeed.data.slice(ndarray::s![run]) {
            hasher.update(v.to_le_bytes());
        }
    }
    to_hex(&hasher.finalize())
}

/// Describe the sub-recording already written to `path`.
pub fn append_segment_info(
    path: &Path,
    descriptor: &SegmentDescriptor,
    part: usize,
    fallback: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    params: &SplitParams,
) -> Result<SegmentRecord, SplitError> {
    let recording = Recording::load(path)?;
    let airspeed = recording.require(AIRSPEED)?;
    let start_dt = calculate_start_datetime(&recording, fallback, now, params)?;
    let stop_dt = shift(start_dt, recording.duration_secs)?;

    let threshold = params.airspeed_threshold_kt;
    let (go_fast_dt, hash) = if descriptor.segment_type.went_fast() {
        let go_fast = (0..airspeed.len())
            .find(|&i| airspeed.get(i).is_some_and(|v| v > threshold))
            .map(|i| shift(start_dt, i as f64 / airspeed.sample_rate))
            .transpose()?;
        let hash = airspeed_hash(airspeed, threshold, params.airspeed_hash_min_samples);
        (go_fast, hash)
    } else {
        let bytes = fs::read(path)?;
        (None, sha256_hex(&bytes))
    };

    Ok(SegmentRecord {
        interval: descriptor.interval,
        segment_type: descriptor.segment_type,
        part,
        path: path.to_path_buf(),
        hash,
        start_dt,
        go_fast_dt,
        stop_dt,
    })
}

struct SegmentJob {
    part: usize,
    descriptor: SegmentDescriptor,
    recording: Recording,
    fallback: Option<DateTime<Utc>>,
}

/// Segment the recording at `source_path` and write each segment next to it (or into
/// `dest_dir`) as `<stem>.<part:03>.json`.
///
/// `fallback` should be as close to the end of the data as possible; it is moved to the start
/// of each segment before use.
///
/// Segments are staged under hidden temporary names and only renamed into place once every
/// segment has been written and described, so a failure leaves no segment files behind.
pub fn split_recording_to_segments(
    source_path: &Path,
    dest_dir: Option<&Path>,
    fallback: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    params: &SplitParams,
) -> Result<Vec<SegmentRecord>, SplitError> {
    info!("Processing file: {}", source_path.display());
    let recording = Recording::load(source_path)?;
    let dest_dir = match dest_dir {
        Some(dir) => dir.to_path_buf(),
        None => source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    if !dest_dir.as_os_str().is_empty() {
        fs::create_dir_all(&dest_dir)?;
    }
    let stem = source_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recording");

    let segments = split_segments(&recording, params)?;

    let mut fallback = match fallback {
        Some(dt) => {
            let rebased = shift(dt, -recording.duration_secs)?;
            info!("Reduced fallback datetime by {} s to {}", recording.duration_secs, rebased);
            Some(rebased)
        }
        None => None,
    };
    let superframe = recording
        .superframe_present
        .then_some(params.superframe_duration_s);

    let mut jobs = Vec::with_capacity(segments.len());
    for (i, descriptor) in segments.into_iter().enumerate() {
        let Interval { start, stop } = descriptor.interval;
        let sub = recording.slice_secs(start, stop, superframe);
        let written_secs = sub.duration_secs;
        jobs.push(SegmentJob {
            part: i + 1,
            descriptor,
            recording: sub,
            fallback,
        });
        fallback = fallback.map(|dt| shift(dt, written_secs)).transpose()?;
    }

    let staged_path = |part: usize| dest_dir.join(format!(".{}.{:03}.json.tmp", stem, part));
    let parts: Vec<usize> = jobs.iter().map(|job| job.part).collect();
    let staged = jobs
        .into_par_iter()
        .map(|job| -> Result<SegmentRecord, SplitError> {
            let tmp_path = staged_path(job.part);
            debug!("Writing segment {}: {}", job.part, tmp_path.display());
            job.recording.save(&tmp_path)?;
            let mut record =
                append_segment_info(&tmp_path, &job.descriptor, job.part, job.fallback, now, params)?;
            record.path = dest_dir.join(format!("{}.{:03}.json", stem, job.part));
            Ok(record)
        })
        .collect::<Result<Vec<_>, _>>();
    let mut records = match staged {
        Ok(records) => records,
        Err(err) => {
            for part in parts {
                let _ = fs::remove_file(staged_path(part));
            }
            return Err(err);
        }
    };
    records.sort_by_key(|r| r.part);
    for record in &records {
        fs::rename(staged_path(record.part), &record.path)?;
    }

    for pair in records.windows(2) {
        if pair[1].start_dt < pair[0].stop_dt {
            warn!(
                "Segment {} start {} comes before the previous segment ended {}",
                pair[1].part, pair[1].start_dt, pair[0].stop_dt
            );
        }
    }
    Ok(records)
}
