//! Segment type classification from airspeed and heading.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::series::MaskedSeries;
use crate::SplitParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentType {
    /// Never went fast for long enough, or never moved at all.
    GroundOnly,
    /// Slow at both ends: a complete flight.
    StartAndStop,
    /// Started slow, ended fast.
    StartOnly,
    /// Started fast, ended slow.
    StopOnly,
    /// Fast at both ends.
    MidFlight,
    /// Reserved for hangar tests; not produced yet.
    NoMovement,
}

impl SegmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentType::GroundOnly => "GROUND_ONLY",
            SegmentType::StartAndStop => "START_AND_STOP",
            SegmentType::StartOnly => "START_ONLY",
            SegmentType::StopOnly => "STOP_ONLY",
            SegmentType::MidFlight => "MID_FLIGHT",
            SegmentType::NoMovement => "NO_MOVEMENT",
        }
    }

    /// Whether a segment of this type spent real time above the airspeed threshold.
    pub fn went_fast(&self) -> bool {
        matches!(
            self,
            SegmentType::StartAndStop
                | SegmentType::StartOnly
                | SegmentType::StopOnly
                | SegmentType::MidFlight
        )
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open `[start, stop)` in seconds from the start of the recording.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub stop: f64,
}

impl Interval {
    pub fn new(start: f64, stop: f64) -> Self {
        Self { start, stop }
    }

    pub fn duration(&self) -> f64 {
        self.stop - self.start
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub segment_type: SegmentType,
    pub interval: Interval,
}

/// Total absolute heading change over valid consecutive samples in `[start, stop)`.
fn total_heading_change(heading: &MaskedSeries, start: f64, stop: f64) -> f64 {
    let range = heading.index_range(start, stop);
    let diffs = heading.slice(range).diff();
    diffs
        .data
        .iter()
        .zip(diffs.mask.iter())
        .filter(|(_, masked)| !**masked)
        .map(|(d, _)| d.abs())
        .sum()
}

/// Decide what kind of segment `[start, stop)` is.
///
/// Heading tells whether the aircraft moved at all, airspeed whether it flew and whether
/// the data starts and ends on the ground.
pub fn classify(
    airspeed: &MaskedSeries,
    heading: &MaskedSeries,
    start: f64,
    stop: f64,
    params: &SplitParams,
) -> SegmentDescriptor {
    let interval = Interval::new(start, stop);
    let range = airspeed.index_range(start, stop);
    let threshold = params.airspeed_threshold_kt;

    let (Some(first), Some(last)) = (
        airspeed.first_valid(range.clone()),
        airspeed.last_valid(range.clone()),
    ) else {
        debug!(
            "Airspeed data was entirely masked. Assuming GROUND_ONLY over {}",
            interval
        );
        return SegmentDescriptor {
            segment_type: SegmentType::GroundOnly,
            interval,
        };
    };

    let slow_start = airspeed.data[first] < threshold;
    let slow_stop = airspeed.data[last] < threshold;

    let fast_samples = range
        .filter(|&i| airspeed.get(i).is_some_and(|v| v > threshold))
        .count();
    let exceedance_duration = fast_samples as f64 / airspeed.sample_rate;
    let heading_change = total_heading_change(heading, start, stop);

    let segment_type = if heading_change <= params.heading_change_taxi_threshold_deg {
        debug!(heading_change, "Heading did not change, aircraft did not move");
        SegmentType::GroundOnly
    } else if exceedance_duration <= params.airspeed_threshold_time_s {
        debug!(
            exceedance_duration,
            "Airspeed was not above threshold for long enough"
        );
        SegmentType::GroundOnly
    } else if slow_start && slow_stop {
        debug!("Airspeed started below threshold, rose above and stopped below");
        SegmentType::StartAndStop
    } else if slow_start {
        debug!("Airspeed started below threshold and stopped above");
        SegmentType::StartOnly
    } else if slow_stop {
        debug!("Airspeed started above threshold and stopped below");
        SegmentType::StopOnly
    } else {
        debug!("Airspeed started and stopped above threshold");
        SegmentType::MidFlight
    };
    info!("Segment type is '{}' over {}", segment_type, interval);
    SegmentDescriptor {
        segment_type,
        interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn airspeed(values: Vec<f64>) -> MaskedSeries {
        MaskedSeries::new(values, 1.0, 0.0)
    }

    fn flight_airspeed() -> MaskedSeries {
        let mut values = vec![0.0; 60];
        values.extend(vec![150.0; 200]);
        values.extend(vec![0.0; 60]);
        airspeed(values)
    }

    /// Heading sweeping back and forth so its total variation is `total`.
    fn heading_with_variation(len: usize, total: f64) -> MaskedSeries {
        let mut values = vec![0.0; len];
        let step = total / (len - 1) as f64;
        for (i, v) in values.iter_mut().enumerate() {
            *v = if i % 2 == 0 { 0.0 } else { step };
        }
        MaskedSeries::new(values, 1.0, 0.0)
    }

    #[test]
    fn still_heading_is_ground_only_even_when_fast() {
        let spd = flight_airspeed();
        let hdg = MaskedSeries::new(vec![90.0; 320], 1.0, 0.0);
        let seg = classify(&spd, &hdg, 0.0, 320.0, &SplitParams::default());
        assert_eq!(seg.segment_type, SegmentType::GroundOnly);
        assert_eq!(seg.interval, Interval::new(0.0, 320.0));
    }

    #[test]
    fn complete_flight_is_start_and_stop() {
        let spd = flight_airspeed();
        let hdg = heading_with_variation(320, 500.0);
        let seg = classify(&spd, &hdg, 0.0, 320.0, &SplitParams::default());
        assert_eq!(seg.segment_type, SegmentType::StartAndStop);
    }

    #[test]
    fn short_exceedance_is_ground_only() {
        let mut values = vec![0.0; 100];
        values.extend(vec![120.0; 60]);
        values.extend(vec![0.0; 100]);
        let spd = airspeed(values);
        let hdg = heading_with_variation(260, 400.0);
        let seg = classify(&spd, &hdg, 0.0, 260.0, &SplitParams::default());
        assert_eq!(seg.segment_type, SegmentType::GroundOnly);
    }

    #[test]
    fn partial_flights_follow_the_edges() {
        let params = SplitParams::default();
        let hdg = heading_with_variation(400, 600.0);

        let mut start_only = vec![0.0; 100];
        start_only.extend(vec![200.0; 300]);
        let seg = classify(&airspeed(start_only), &hdg, 0.0, 400.0, &params);
        assert_eq!(seg.segment_type, SegmentType::StartOnly);

        let mut stop_only = vec![200.0; 300];
        stop_only.extend(vec![0.0; 100]);
        let seg = classify(&airspeed(stop_only), &hdg, 0.0, 400.0, &params);
        assert_eq!(seg.segment_type, SegmentType::StopOnly);

        let seg = classify(&airspeed(vec![200.0; 400]), &hdg, 0.0, 400.0, &params);
        assert_eq!(seg.segment_type, SegmentType::MidFlight);
    }

    #[test]
    fn masked_edges_use_first_and_last_valid_samples() {
        let mut values: Vec<Option<f64>> = vec![None; 10];
        values.extend(vec![Some(0.0); 50]);
        values.extend(vec![Some(150.0); 250]);
        values.extend(vec![Some(0.0); 50]);
        values.extend(vec![None; 10]);
        let spd = MaskedSeries::from_options(values, 1.0, 0.0);
        let hdg = heading_with_variation(370, 500.0);
        let seg = classify(&spd, &hdg, 0.0, 370.0, &SplitParams::default());
        assert_eq!(seg.segment_type, SegmentType::StartAndStop);
    }

    #[test]
    fn entirely_masked_airspeed_is_ground_only() {
        let spd = MaskedSeries::masked(100, 1.0, 0.0);
        let hdg = heading_with_variation(100, 500.0);
        let seg = classify(&spd, &hdg, 0.0, 100.0, &SplitParams::default());
        assert_eq!(seg.segment_type, SegmentType::GroundOnly);
    }

    #[test]
    fn classification_respects_sample_rates() {
        // 2 Hz airspeed: 300 fast samples are only 150 s above threshold
        let mut values = vec![0.0; 100];
        values.extend(vec![150.0; 300]);
        values.extend(vec![0.0; 100]);
        let spd = MaskedSeries::new(values, 2.0, 0.0);
        let hdg = heading_with_variation(250, 500.0);
        let seg = classify(&spd, &hdg, 0.0, 250.0, &SplitParams::default());
        assert_eq!(seg.segment_type, SegmentType::GroundOnly);
    }

    #[test]
    fn labels_match_wire_names() {
        assert_eq!(SegmentType::StartAndStop.to_string(), "START_AND_STOP");
        assert_eq!(
            serde_json::to_string(&SegmentType::MidFlight).unwrap(),
            "\"MID_FLIGHT\""
        );
        assert!(SegmentType::MidFlight.went_fast());
        assert!(!SegmentType::GroundOnly.went_fast());
    }
}
