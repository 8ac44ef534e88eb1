//! Candidate split points inside a slow interval.
//!
//! Three independent finders, each returning an index in seconds from the start of the
//! recording: the frame counter jump, the engine speed minimum and the stopped-turning
//! midpoint.

use ndarray::Array1;
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::series::MaskedSeries;
use crate::signal::{align, normalise_to_max, rate_of_change, repair_mask, straighten_headings};
use crate::store::ChannelStore;
use crate::SplitParams;

/// Engine speed channels in order of preference; the first one found sets the timebase.
pub const ENGINE_SPLIT_PARAMETERS: [&str; 12] = [
    "Eng (1) N1",
    "Eng (2) N1",
    "Eng (3) N1",
    "Eng (4) N1",
    "Eng (1) N2",
    "Eng (2) N2",
    "Eng (3) N2",
    "Eng (4) N2",
    "Eng (1) Np",
    "Eng (2) Np",
    "Eng (3) Np",
    "Eng (4) Np",
];

/// Normal frame to frame increment.
pub const FRAME_COUNTER_INCREMENT: f64 = 1.0;
/// Expected rollover from 4095 back to 0.
// Some recorders may have wrapped at 4094 in the past; unconfirmed, so only 4095 is ignored.
pub const FRAME_COUNTER_WRAP: f64 = -4095.0;

pub const ENGINE_SCALE_MAX: f64 = 100.0;

const RATE_OF_TURN_WIDTH_S: f64 = 2.0;

/// Minimum across all available engine speed channels, each scaled to 0-100.
///
/// Returns `None` when the recording carries no engine speed channel. The result is
/// sampled at the rate and offset of the first channel found.
pub fn normalised_engine_power<S: ChannelStore + ?Sized>(store: &S) -> Option<MaskedSeries> {
    let mut found = ENGINE_SPLIT_PARAMETERS
        .iter()
        .filter_map(|name| store.get(name).map(|series| (*name, series)));
    let (first_name, first) = found.next()?;
    let (rate, offset) = (first.sample_rate, first.offset);

    let mut normalised = vec![normalise_to_max(first, ENGINE_SCALE_MAX)];
    let mut names = vec![first_name];
    for (name, series) in found {
        let aligned = align(series, rate, offset, true);
        normalised.push(normalise_to_max(&aligned, ENGINE_SCALE_MAX));
        names.push(name);
    }
    debug!(?names, "Engine split parameters");

    let len = normalised.iter().map(MaskedSeries::len).min().unwrap_or(0);
    let mut data = Array1::zeros(len);
    let mut mask = Array1::from_elem(len, true);
    for i in 0..len {
        let min = normalised
            .iter()
            .filter_map(|s| s.get(i))
            .min_by_key(|v| OrderedFloat(*v));
        if let Some(v) = min {
            data[i] = v;
            mask[i] = false;
        }
    }
    Some(MaskedSeries {
        data,
        mask,
        sample_rate: rate,
        offset,
    })
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineSplit {
    /// Seconds from the start of the recording, rounded to whole seconds.
    pub index: f64,
    /// Normalised engine power at the split.
    pub value: f64,
}

/// Split at the lowest normalised engine power inside `[start_secs, stop_secs)`.
pub fn split_on_engine_power(
    start_secs: f64,
    stop_secs: f64,
    power: &MaskedSeries,
) -> Option<EngineSplit> {
    let range = power.index_range(start_secs, stop_secs);
    let (idx, value) = power.min_value(range)?;
    Some(EngineSplit {
        index: (idx as f64 / power.sample_rate).round(),
        value,
    })
}

/// Frame counter first difference with normal increments and rollovers masked out, so only
/// real discontinuities remain valid.
#[derive(Clone, Debug)]
pub struct FrameCounterDiff {
    pub diff: MaskedSeries,
    /// Half the counter sample period, centring a jump between its two samples.
    pub half_period: f64,
}

impl FrameCounterDiff {
    pub fn new(counter: &MaskedSeries) -> Self {
        let mut diff = counter.diff();
        for (value, masked) in diff.data.iter().zip(diff.mask.iter_mut()) {
            if *value == FRAME_COUNTER_INCREMENT || *value == FRAME_COUNTER_WRAP {
                *masked = true;
            }
        }
        Self {
            diff,
            half_period: 1.0 / counter.sample_rate / 2.0,
        }
    }
}

/// Split at a frame counter discontinuity inside `[start_secs, stop_secs)`.
///
/// With an engine split available the jump nearest to it is used, otherwise the first jump.
pub fn split_on_frame_counter(
    start_secs: f64,
    stop_secs: f64,
    counter: &FrameCounterDiff,
    engine_split_index: Option<f64>,
) -> Option<f64> {
    let diff = &counter.diff;
    let range = diff.index_range(start_secs, stop_secs);
    let slice_start = range.start;
    let jumps: Vec<f64> = diff
        .valid_indices(range)
        .into_iter()
        .map(|i| (i - slice_start) as f64 / diff.sample_rate)
        .collect();

    let jump_secs = match engine_split_index {
        Some(engine_index) => {
            let target = engine_index - start_secs;
            jumps
                .iter()
                .copied()
                .min_by_key(|j| OrderedFloat((target - j).abs()))?
        }
        None => *jumps.first()?,
    };
    let index = (jump_secs + start_secs + counter.half_period).round();
    Some(index.clamp(start_secs, stop_secs))
}

/// Absolute rate of turn where the aircraft has stopped turning; everything else is masked.
///
/// Only short heading gaps are repaired so corrupt superframes never look like a stop.
pub fn rate_of_turn(heading: &MaskedSeries, params: &SplitParams) -> MaskedSeries {
    let straight = straighten_headings(heading);
    let repaired = match repair_mask(&straight, Some(params.heading_repair_duration_s), None) {
        Ok(repaired) => repaired,
        Err(_) => {
            return MaskedSeries::masked(heading.len(), heading.sample_rate, heading.offset)
        }
    };
    let roc = rate_of_change(&repaired, RATE_OF_TURN_WIDTH_S);
    let data = roc.data.mapv(f64::abs);
    let mut mask = roc.mask.clone();
    for (value, masked) in data.iter().zip(mask.iter_mut()) {
        if *value > params.rate_of_turn_splitting_threshold_deg_s {
            *masked = true;
        }
    }
    roc.with_samples(data, mask)
}

/// Split halfway through the stopped run whose midpoint is nearest the interval's midpoint.
pub fn split_on_rate_of_turn(
    start_secs: f64,
    stop_secs: f64,
    rate_of_turn: &MaskedSeries,
) -> Option<f64> {
    let range = rate_of_turn.index_range(start_secs, stop_secs);
    let midpoint = (range.start + range.end) as f64 / 2.0;
    let stopped = rate_of_turn.clump_valid(range);
    let nearest = stopped
        .iter()
        .min_by_key(|run| OrderedFloat(((run.start + run.end) as f64 / 2.0 - midpoint).abs()))?;
    let split = nearest.start as f64 + nearest.len() as f64 / 2.0;
    Some((split / rate_of_turn.sample_rate).round())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Recording;

    #[test]
    fn engine_power_absent_without_engine_channels() {
        let rec = Recording::new(10.0)
            .with_channel("Airspeed", MaskedSeries::new(vec![0.0; 10], 1.0, 0.0));
        assert!(normalised_engine_power(&rec).is_none());
    }

    #[test]
    fn engine_power_takes_minimum_of_normalised_channels() {
        let rec = Recording::new(4.0)
            .with_channel(
                "Eng (1) N1",
                MaskedSeries::new(vec![100.0, 50.0, 100.0, 100.0], 1.0, 0.0),
            )
            .with_channel(
                "Eng (2) N1",
                MaskedSeries::from_options(
                    vec![Some(40.0), Some(40.0), Some(10.0), None],
                    1.0,
                    0.0,
                ),
            );
        let power = normalised_engine_power(&rec).unwrap();
        assert_eq!(
            power.to_options(),
            vec![Some(100.0), Some(50.0), Some(25.0), Some(100.0)]
        );
    }

    #[test]
    fn engine_power_aligns_to_first_found_channel() {
        let rec = Recording::new(4.0)
            .with_channel("Eng (1) N2", MaskedSeries::new(vec![80.0; 8], 2.0, 0.0))
            .with_channel(
                "Eng (2) N1",
                MaskedSeries::new(vec![90.0, 0.0, 90.0, 90.0], 1.0, 0.0),
            );
        let power = normalised_engine_power(&rec).unwrap();
        // N1 is preferred, so the 1 Hz channel sets the rate
        assert_eq!(power.sample_rate, 1.0);
        assert_eq!(power.len(), 4);
        assert_eq!(power.get(1), Some(0.0));
    }

    #[test]
    fn engine_split_converts_to_seconds() {
        let mut values = vec![90.0; 400];
        values[250] = 3.0;
        let power = MaskedSeries::new(values, 2.0, 0.0);
        let split = split_on_engine_power(100.0, 180.0, &power).unwrap();
        assert_eq!(split.index, 125.0);
        assert_eq!(split.value, 3.0);
        let dead = MaskedSeries::masked(400, 2.0, 0.0);
        assert!(split_on_engine_power(100.0, 180.0, &dead).is_none());
    }

    fn counter_with_jumps(len: usize, jumps: &[usize]) -> MaskedSeries {
        let mut value = 100.0;
        let mut values = Vec::with_capacity(len);
        for i in 0..len {
            if jumps.contains(&i) {
                value += 1000.0;
            } else if i > 0 {
                value += 1.0;
            }
            if value > 4095.0 {
                value -= 4096.0;
            }
            values.push(value);
        }
        MaskedSeries::new(values, 1.0, 0.0)
    }

    #[test]
    fn frame_counter_ignores_increments_and_rollover() {
        let counter =
            MaskedSeries::new(vec![4093.0, 4094.0, 4095.0, 0.0, 1.0, 2.0], 1.0, 0.0);
        let diff = FrameCounterDiff::new(&counter);
        assert_eq!(diff.diff.valid_count(), 0);
        assert_eq!(diff.half_period, 0.5);
        assert!(split_on_frame_counter(0.0, 6.0, &diff, None).is_none());
    }

    #[test]
    fn frame_counter_splits_on_first_jump() {
        let counter = counter_with_jumps(300, &[150, 200]);
        let diff = FrameCounterDiff::new(&counter);
        // diff index 149 holds the jump between samples 149 and 150
        assert_eq!(split_on_frame_counter(100.0, 250.0, &diff, None), Some(150.0));
    }

    #[test]
    fn frame_counter_prefers_jump_nearest_engine_split() {
        let counter = counter_with_jumps(300, &[150, 200]);
        let diff = FrameCounterDiff::new(&counter);
        assert_eq!(
            split_on_frame_counter(100.0, 250.0, &diff, Some(190.0)),
            Some(200.0)
        );
    }

    #[test]
    fn frame_counter_split_clamped_into_interval() {
        let counter = MaskedSeries::new(vec![10.0, 11.0, 12.0, 500.0, 501.0], 0.25, 0.0);
        let diff = FrameCounterDiff::new(&counter);
        // the interval starts mid-sample, so the centred jump lands at 13.9 s
        assert_eq!(split_on_frame_counter(3.9, 12.0, &diff, None), Some(12.0));
    }

    #[test]
    fn rate_of_turn_masks_turning() {
        let mut values = vec![0.0; 20];
        for (i, v) in values.iter_mut().enumerate().skip(10) {
            *v = (i - 9) as f64 * 5.0;
        }
        let heading = MaskedSeries::new(values, 1.0, 0.0);
        let rot = rate_of_turn(&heading, &SplitParams::default());
        assert!(rot.is_valid(2));
        assert!(!rot.is_valid(15));
    }

    #[test]
    fn rate_of_turn_keeps_long_gaps_masked() {
        let mut values: Vec<Option<f64>> = vec![Some(90.0); 60];
        for v in values.iter_mut().skip(20).take(20) {
            *v = None;
        }
        let heading = MaskedSeries::from_options(values, 1.0, 0.0);
        let rot = rate_of_turn(&heading, &SplitParams::default());
        assert!(!rot.is_valid(30));
        assert!(rot.is_valid(5));
        assert!(rot.is_valid(50));
    }

    #[test]
    fn rate_of_turn_split_uses_stopped_run_midpoint() {
        let mut values = vec![Some(1.0); 300];
        for v in values.iter_mut().take(140).skip(100) {
            *v = Some(0.0);
        }
        let mut rot = MaskedSeries::from_options(values, 1.0, 0.0);
        for i in 0..300 {
            if rot.data[i] > 0.1 {
                rot.mask[i] = true;
            }
        }
        assert_eq!(split_on_rate_of_turn(50.0, 200.0, &rot), Some(120.0));
        assert_eq!(split_on_rate_of_turn(150.0, 250.0, &rot), None);
    }

    #[test]
    fn rate_of_turn_split_picks_run_nearest_midpoint() {
        let mut rot = MaskedSeries::masked(400, 1.0, 0.0);
        for i in (110..120).chain(190..230) {
            rot.mask[i] = false;
        }
        // interval midpoint 200 sits inside the second run
        assert_eq!(split_on_rate_of_turn(100.0, 300.0, &rot), Some(210.0));
    }
}
