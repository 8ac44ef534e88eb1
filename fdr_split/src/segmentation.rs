//! Segmentation of a whole recording into ordered flight segments.
//!
//! Cutting and classifying are separate passes: every slow interval is first given a split
//! decision, then each resulting piece is classified once all cut points are known.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::{classify, Interval, SegmentDescriptor, SegmentType};
use crate::series::{runs_of_ones, MaskedSeries};
use crate::signal::{repair_mask, RepairError};
use crate::split_points::{
    normalised_engine_power, rate_of_turn, split_on_engine_power, split_on_frame_counter,
    split_on_rate_of_turn, FrameCounterDiff,
};
use crate::store::ChannelStore;
use crate::{SplitError, SplitParams};

pub const AIRSPEED: &str = "Airspeed";
pub const HEADING: &str = "Heading";
pub const HEADING_TRUE: &str = "Heading True";
pub const FRAME_COUNTER: &str = "Frame Counter";

/// Outcome of the split finders for one slow interval, in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum SplitDecision {
    FrameCounter(f64),
    EnginePower(f64),
    RateOfTurn(f64),
    NoSplit,
}

impl SplitDecision {
    pub fn index(&self) -> Option<f64> {
        match self {
            SplitDecision::FrameCounter(idx)
            | SplitDecision::EnginePower(idx)
            | SplitDecision::RateOfTurn(idx) => Some(*idx),
            SplitDecision::NoSplit => None,
        }
    }
}

/// What happened to each slow interval while scanning the recording.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum SlowIntervalOutcome {
    /// Touches the start of the data; never a split point.
    Leading(Interval),
    /// Touches the end of the data; absorbed into the final segment.
    Trailing(Interval),
    TooShort(Interval),
    Decided {
        interval: Interval,
        decision: SplitDecision,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SegmentationPlan {
    pub duration_secs: f64,
    pub outcomes: Vec<SlowIntervalOutcome>,
    pub segments: Vec<SegmentDescriptor>,
}

/// Derived signals the split finders work from.
#[derive(Clone, Debug)]
pub struct SplitSignals {
    pub engine_power: Option<MaskedSeries>,
    pub frame_counter: Option<FrameCounterDiff>,
    pub rate_of_turn: MaskedSeries,
}

impl SplitSignals {
    pub fn from_store<S: ChannelStore + ?Sized>(
        store: &S,
        heading: &MaskedSeries,
        params: &SplitParams,
    ) -> Self {
        let frame_counter = if store.reliable_frame_counter() {
            match store.get(FRAME_COUNTER) {
                Some(counter) => Some(FrameCounterDiff::new(counter)),
                None => {
                    info!("'{}' is marked reliable but is not recorded", FRAME_COUNTER);
                    None
                }
            }
        } else {
            info!(
                "'{}' will not be used for splitting since it is not reliable",
                FRAME_COUNTER
            );
            None
        };
        Self {
            engine_power: normalised_engine_power(store),
            frame_counter,
            rate_of_turn: rate_of_turn(heading, params),
        }
    }
}

/// Pick the split point for one slow interval `[start_secs, stop_secs)`.
///
/// Frame counter jumps win, then an engine power minimum below
/// `minimum_split_param_value`, then the stopped-turning midpoint.
pub fn decide_split(
    start_secs: f64,
    stop_secs: f64,
    signals: &SplitSignals,
    params: &SplitParams,
) -> SplitDecision {
    let interval = Interval::new(start_secs, stop_secs);
    let engine = signals
        .engine_power
        .as_ref()
        .and_then(|power| split_on_engine_power(start_secs, stop_secs, power));

    if let Some(counter) = signals.frame_counter.as_ref() {
        match split_on_frame_counter(start_secs, stop_secs, counter, engine.map(|e| e.index)) {
            Some(index) => {
                info!("'{}' jumped within {} at {}", FRAME_COUNTER, interval, index);
                return SplitDecision::FrameCounter(index);
            }
            None => info!("'{}' did not jump within {}", FRAME_COUNTER, interval),
        }
    }

    match engine {
        Some(split) if split.value < params.minimum_split_param_value => {
            info!(
                "Minimum of normalised engine power ({:.2}) below {} within {} at {}",
                split.value, params.minimum_split_param_value, interval, split.index
            );
            return SplitDecision::EnginePower(split.index);
        }
        Some(split) => info!(
            "Minimum of normalised engine power ({:.2}) not below {} within {}",
            split.value, params.minimum_split_param_value, interval
        ),
        None => debug!("No engine power available within {}", interval),
    }

    match split_on_rate_of_turn(start_secs, stop_secs, &signals.rate_of_turn) {
        Some(index) => {
            info!(
                "Splitting at {} where rate of turn was below {}",
                index, params.rate_of_turn_splitting_threshold_deg_s
            );
            SplitDecision::RateOfTurn(index)
        }
        None => {
            warn!(
                "Aircraft did not stop turning within {}; splitting methods failed",
                interval
            );
            SplitDecision::NoSplit
        }
    }
}

fn single_segment(duration_secs: f64, segment: SegmentDescriptor) -> SegmentationPlan {
    SegmentationPlan {
        duration_secs,
        outcomes: Vec::new(),
        segments: vec![segment],
    }
}

/// Scan the recording and return every split decision along with the final segments.
pub fn plan_splits<S: ChannelStore + ?Sized>(
    store: &S,
    params: &SplitParams,
) -> Result<SegmentationPlan, SplitError> {
    params.validate()?;
    let duration = store.duration_secs();
    if !(duration.is_finite() && duration > 0.0) {
        return Err(SplitError::InvalidRecording(format!(
            "duration must be positive, got {duration}"
        )));
    }
    let threshold = params.airspeed_threshold_kt;
    let raw_airspeed = store.require(AIRSPEED)?;

    let airspeed = match repair_mask(raw_airspeed, None, Some(threshold)) {
        Ok(repaired) => repaired,
        Err(RepairError::EntirelyMasked) => {
            // TODO: report NO_MOVEMENT here once that segment type is supported downstream.
            warn!("Airspeed is entirely masked; the whole recording is a single GROUND_ONLY segment");
            return Ok(single_segment(
                duration,
                SegmentDescriptor {
                    segment_type: SegmentType::GroundOnly,
                    interval: Interval::new(0.0, duration),
                },
            ));
        }
    };

    let heading = store
        .get(HEADING)
        .or_else(|| store.get(HEADING_TRUE))
        .ok_or_else(|| SplitError::MissingChannel(format!("{HEADING} or {HEADING_TRUE}")))?;

    let slow: Vec<bool> = (0..airspeed.len())
        .map(|i| airspeed.get(i).map_or(true, |v| v <= threshold))
        .collect();
    let fast: Vec<bool> = slow.iter().map(|s| !s).collect();
    let fast_runs = runs_of_ones(&fast);
    if fast_runs.len() <= 1 {
        info!(
            "{} section(s) of airspeed above {}; at most one flight, creating a single segment",
            fast_runs.len(),
            threshold
        );
        return Ok(single_segment(
            duration,
            classify(&airspeed, heading, 0.0, duration, params),
        ));
    }

    let signals = SplitSignals::from_store(store, heading, params);
    let rate = airspeed.sample_rate;
    let mut outcomes = Vec::new();
    let mut cuts = Vec::new();
    let mut previous = 0.0;

    for run in runs_of_ones(&slow) {
        let interval = Interval::new(run.start as f64 / rate, run.end as f64 / rate);
        if run.start == 0 {
            outcomes.push(SlowIntervalOutcome::Leading(interval));
            continue;
        }
        if run.end == airspeed.len() {
            outcomes.push(SlowIntervalOutcome::Trailing(interval));
            break;
        }
        if interval.duration() < params.minimum_split_duration_s {
            info!(
                "Disregarding {} below {} kt: {} s is shorter than the minimum split duration ({} s)",
                interval,
                threshold,
                interval.duration(),
                params.minimum_split_duration_s
            );
            outcomes.push(SlowIntervalOutcome::TooShort(interval));
            continue;
        }

        let decision = decide_split(interval.start, interval.stop, &signals, params);
        outcomes.push(SlowIntervalOutcome::Decided { interval, decision });
        if let Some(index) = decision.index() {
            if index > previous && index < duration {
                cuts.push(index);
                previous = index;
            } else {
                debug!(
                    "Discarding split at {} outside ({}, {})",
                    index, previous, duration
                );
            }
        }
    }

    let mut bounds = Vec::with_capacity(cuts.len() + 2);
    bounds.push(0.0);
    bounds.extend(cuts);
    bounds.push(duration);
    let segments = bounds
        .windows(2)
        .map(|w| classify(&airspeed, heading, w[0], w[1], params))
        .collect();

    Ok(SegmentationPlan {
        duration_secs: duration,
        outcomes,
        segments,
    })
}

/// Ordered segments covering `[0, duration)` with no gaps or overlaps.
pub fn split_segments<S: ChannelStore + ?Sized>(
    store: &S,
    params: &SplitParams,
) -> Result<Vec<SegmentDescriptor>, SplitError> {
    Ok(plan_splits(store, params)?.segments)
}
