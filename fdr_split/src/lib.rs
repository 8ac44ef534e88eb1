//! Flight data recording segmentation.
//!
//! Splits a continuous multi-flight recording into ordered flight segments using airspeed,
//! heading, engine speed and frame counter channels, then materializes each segment as its own
//! sub-recording with provenance (content hash, start/stop timestamps).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod classify;
pub mod materialize;
pub mod segmentation;
pub mod series;
pub mod signal;
pub mod split_points;
pub mod store;
pub mod timebase;

pub use classify::{classify, Interval, SegmentDescriptor, SegmentType};
pub use materialize::{append_segment_info, split_recording_to_segments, SegmentRecord};
pub use segmentation::{
    decide_split, plan_splits, split_segments, SegmentationPlan, SlowIntervalOutcome,
    SplitDecision,
};
pub use series::MaskedSeries;
pub use store::{ChannelStore, Recording};
pub use timebase::calculate_start_datetime;

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("required channel '{0}' not available")]
    MissingChannel(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid recording: {0}")]
    InvalidRecording(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed recording JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Timebase(#[from] TimebaseError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimebaseError {
    #[error("required parameter '{0}' not available")]
    MissingParameter(String),
    #[error("error with timestamp values: {0}")]
    InvalidTimestamp(String),
    #[error("fallback datetime {fallback} is later than the current time {now}")]
    FallbackInFuture {
        fallback: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    #[error("timebase {0} is in the future")]
    InFuture(DateTime<Utc>),
    #[error("timebase {timebase} older than the allowed {max_age_days} days")]
    TooOld {
        timebase: DateTime<Utc>,
        max_age_days: u32,
    },
}

/// Thresholds driving segmentation and segment provenance.
///
/// Immutable for the duration of a call; recordings with different thresholds can be
/// processed side by side.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SplitParams {
    /// Airspeed (kt) at or below which the aircraft is considered slow.
    pub airspeed_threshold_kt: f64,
    /// Seconds above the airspeed threshold needed to count as having really gone fast.
    pub airspeed_threshold_time_s: f64,
    /// Cumulative heading change (deg) needed to count as having moved.
    pub heading_change_taxi_threshold_deg: f64,
    /// Slow intervals shorter than this are never split.
    pub minimum_split_duration_s: f64,
    /// Normalised engine speed (0-100) below which the engines are considered off.
    pub minimum_split_param_value: f64,
    /// Rate of turn (deg/s) above which the aircraft is still turning.
    pub rate_of_turn_splitting_threshold_deg_s: f64,
    /// Longest heading gap repaired before computing rate of turn.
    pub heading_repair_duration_s: f64,
    /// Fast airspeed runs shorter than this are left out of the segment hash.
    pub airspeed_hash_min_samples: usize,
    pub max_timebase_age_days: Option<u32>,
    pub superframe_duration_s: f64,
}

impl Default for SplitParams {
    fn default() -> Self {
        Self {
            airspeed_threshold_kt: 80.0,
            airspeed_threshold_time_s: 180.0,
            heading_change_taxi_threshold_deg: 60.0,
            minimum_split_duration_s: 100.0,
            minimum_split_param_value: 17.5,
            rate_of_turn_splitting_threshold_deg_s: 0.1,
            heading_repair_duration_s: 10.0,
            airspeed_hash_min_samples: 64,
            max_timebase_age_days: Some(3650),
            superframe_duration_s: 64.0,
        }
    }
}

impl SplitParams {
    pub fn validate(&self) -> Result<(), SplitError> {
        let positive = [
            ("airspeed_threshold_kt", self.airspeed_threshold_kt),
            ("superframe_duration_s", self.superframe_duration_s),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SplitError::InvalidParameter(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        let non_negative = [
            ("airspeed_threshold_time_s", self.airspeed_threshold_time_s),
            (
                "heading_change_taxi_threshold_deg",
                self.heading_change_taxi_threshold_deg,
            ),
            ("minimum_split_duration_s", self.minimum_split_duration_s),
            ("minimum_split_param_value", self.minimum_split_param_value),
            (
                "rate_of_turn_splitting_threshold_deg_s",
                self.rate_of_turn_splitting_threshold_deg_s,
            ),
            ("heading_repair_duration_s", self.heading_repair_duration_s),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SplitError::InvalidParameter(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_validate() {
        assert!(SplitParams::default().validate().is_ok());
    }

    #[test]
    fn negative_threshold_rejected() {
        let params = SplitParams {
            minimum_split_duration_s: -1.0,
            ..SplitParams::default()
        };
        let err = params.validate().unwrap_err();
        assert!(matches!(err, SplitError::InvalidParameter(_)));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let params: SplitParams =
            serde_json::from_str(r#"{"airspeed_threshold_kt": 60.0}"#).unwrap();
        assert_eq!(params.airspeed_threshold_kt, 60.0);
        assert_eq!(params.minimum_split_duration_s, 100.0);
        assert_eq!(params.max_timebase_age_days, Some(3650));
    }
}
