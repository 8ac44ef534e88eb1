//! Signal repair and resampling over masked series.

use ndarray::Array1;
use thiserror::Error;

use crate::series::MaskedSeries;

/// Positions this close to a sample are read from that sample alone.
const ALIGN_EPS: f64 = 1e-6;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairError {
    #[error("series is entirely masked")]
    EntirelyMasked,
}

/// Linearly interpolate across interior masked runs.
///
/// Leading and trailing masked runs are left alone. Runs longer than `repair_duration_s`
/// stay masked, and with `repair_above` a run is only repaired when the valid samples on
/// both sides exceed that value.
pub fn repair_mask(
    series: &MaskedSeries,
    repair_duration_s: Option<f64>,
    repair_above: Option<f64>,
) -> Result<MaskedSeries, RepairError> {
    if series.valid_count() == 0 {
        return Err(RepairError::EntirelyMasked);
    }
    let max_gap = repair_duration_s.map(|d| (d * series.sample_rate).round().max(0.0) as usize);
    let len = series.len();
    let mut data = series.data.clone();
    let mut mask = series.mask.clone();

    for gap in series.clump_masked(0..len) {
        if gap.start == 0 || gap.end == len {
            continue;
        }
        if max_gap.is_some_and(|max| gap.len() > max) {
            continue;
        }
        let before = series.data[gap.start - 1];
        let after = series.data[gap.end];
        if repair_above.is_some_and(|floor| before <= floor || after <= floor) {
            continue;
        }
        let anchor = gap.start - 1;
        let span = (gap.end - anchor) as f64;
        for i in gap {
            let frac = (i - anchor) as f64 / span;
            data[i] = before + (after - before) * frac;
            mask[i] = false;
        }
    }
    Ok(series.with_samples(data, mask))
}

/// Remove 360 degree wraparound so heading becomes a continuous signal.
pub fn straighten_headings(series: &MaskedSeries) -> MaskedSeries {
    let mut data = series.data.clone();
    let mut unwrap = 0.0;
    let mut previous: Option<f64> = None;
    for i in 0..series.len() {
        let Some(raw) = series.get(i) else {
            continue;
        };
        if let Some(prev) = previous {
            let step = raw - prev;
            if step > 180.0 {
                unwrap -= 360.0;
            } else if step < -180.0 {
                unwrap += 360.0;
            }
        }
        previous = Some(raw);
        data[i] = raw + unwrap;
    }
    series.with_samples(data, series.mask.clone())
}

/// Slope per second over a centred window of `width_s` seconds, one-sided at the ends.
pub fn rate_of_change(series: &MaskedSeries, width_s: f64) -> MaskedSeries {
    let len = series.len();
    let half_width = ((width_s * series.sample_rate / 2.0).round() as usize).max(1);
    let mut data = Array1::zeros(len);
    let mut mask = Array1::from_elem(len, true);
    if len < 2 {
        return series.with_samples(data, mask);
    }
    for i in 0..len {
        let lo = i.saturating_sub(half_width);
        let hi = (i + half_width).min(len - 1);
        if let (Some(a), Some(b)) = (series.get(lo), series.get(hi)) {
            let dt = (hi - lo) as f64 / series.sample_rate;
            data[i] = (b - a) / dt;
            mask[i] = false;
        }
    }
    series.with_samples(data, mask)
}

/// Resample `slave` onto `master_rate` / `master_offset`.
///
/// With `interpolate` the value is linear between the bracketing samples (masked if either
/// is masked); without it the preceding sample is repeated. Positions beyond the recorded
/// range take the edge sample.
pub fn align(
    slave: &MaskedSeries,
    master_rate: f64,
    master_offset: f64,
    interpolate: bool,
) -> MaskedSeries {
    let out_len = (slave.len() as f64 * master_rate / slave.sample_rate).round() as usize;
    let mut data = Array1::zeros(out_len);
    let mut mask = Array1::from_elem(out_len, true);
    if slave.is_empty() {
        return MaskedSeries {
            data,
            mask,
            sample_rate: master_rate,
            offset: master_offset,
        };
    }
    let last = (slave.len() - 1) as f64;

    for j in 0..out_len {
        let t = master_offset + j as f64 / master_rate;
        let pos = ((t - slave.offset) * slave.sample_rate).clamp(0.0, last);
        let below = (pos + ALIGN_EPS).floor() as usize;
        let frac = pos - below as f64;
        let value = if !interpolate || frac <= ALIGN_EPS {
            slave.get(below)
        } else {
            match (slave.get(below), slave.get(below + 1)) {
                (Some(a), Some(b)) => Some(a + (b - a) * frac),
                _ => None,
            }
        };
        if let Some(v) = value {
            data[j] = v;
            mask[j] = false;
        }
    }
    MaskedSeries {
        data,
        mask,
        sample_rate: master_rate,
        offset: master_offset,
    }
}

/// Scale a series onto `0..scale_max` against its own observed maximum.
pub fn normalise_to_max(series: &MaskedSeries, scale_max: f64) -> MaskedSeries {
    match series.max_valid() {
        Some(max) if max > 0.0 => {
            let data = series.data.mapv(|v| v / max * scale_max);
            series.with_samples(data, series.mask.clone())
        }
        _ => MaskedSeries::masked(series.len(), series.sample_rate, series.offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(values: &[Option<f64>]) -> MaskedSeries {
        MaskedSeries::from_options(values.to_vec(), 1.0, 0.0)
    }

    #[test]
    fn repair_interpolates_interior_gaps_only() {
        let s = opts(&[None, Some(0.0), None, None, Some(3.0), None]);
        let repaired = repair_mask(&s, None, None).unwrap();
        assert_eq!(
            repaired.to_options(),
            vec![None, Some(0.0), Some(1.0), Some(2.0), Some(3.0), None]
        );
    }

    #[test]
    fn repair_respects_duration_limit() {
        let s = opts(&[Some(0.0), None, Some(2.0), None, None, None, Some(6.0)]);
        let repaired = repair_mask(&s, Some(2.0), None).unwrap();
        assert_eq!(repaired.get(1), Some(1.0));
        assert_eq!(repaired.get(4), None);
    }

    #[test]
    fn repair_above_skips_slow_gaps() {
        let s = opts(&[
            Some(100.0),
            None,
            Some(100.0),
            Some(50.0),
            None,
            Some(100.0),
        ]);
        let repaired = repair_mask(&s, None, Some(80.0)).unwrap();
        assert_eq!(repaired.get(1), Some(100.0));
        assert_eq!(repaired.get(4), None);
    }

    #[test]
    fn repair_fails_on_fully_masked_series() {
        let s = MaskedSeries::masked(5, 1.0, 0.0);
        assert_eq!(repair_mask(&s, None, None), Err(RepairError::EntirelyMasked));
    }

    #[test]
    fn straighten_unwraps_through_north() {
        let s = opts(&[Some(350.0), Some(355.0), None, Some(5.0), Some(10.0)]);
        let straight = straighten_headings(&s);
        assert_eq!(
            straight.to_options(),
            vec![Some(350.0), Some(355.0), None, Some(365.0), Some(370.0)]
        );
    }

    #[test]
    fn straighten_unwraps_anticlockwise() {
        let s = opts(&[Some(10.0), Some(2.0), Some(354.0)]);
        let straight = straighten_headings(&s);
        assert_eq!(straight.get(2), Some(-6.0));
    }

    #[test]
    fn rate_of_change_is_per_second() {
        let s = MaskedSeries::new((0..10).map(|i| i as f64 * 3.0).collect(), 2.0, 0.0);
        let roc = rate_of_change(&s, 2.0);
        for i in 0..10 {
            assert!((roc.get(i).unwrap() - 6.0).abs() < 1e-9);
        }
    }

    #[test]
    fn rate_of_change_masks_around_gaps() {
        let s = opts(&[Some(0.0), Some(1.0), None, Some(3.0), Some(4.0)]);
        let roc = rate_of_change(&s, 2.0);
        assert_eq!(roc.get(1), None);
        assert_eq!(roc.get(3), None);
        assert_eq!(roc.get(4), Some(1.0));
    }

    #[test]
    fn align_upsamples_linearly() {
        let s = MaskedSeries::new(vec![0.0, 10.0, 20.0], 1.0, 0.0);
        let up = align(&s, 2.0, 0.0, true);
        assert_eq!(up.len(), 6);
        assert_eq!(
            up.to_options(),
            vec![
                Some(0.0),
                Some(5.0),
                Some(10.0),
                Some(15.0),
                Some(20.0),
                Some(20.0)
            ]
        );
    }

    #[test]
    fn align_without_interpolation_repeats_previous_sample() {
        let s = MaskedSeries::new(vec![7.0, 8.0], 0.5, 0.0);
        let up = align(&s, 1.0, 0.0, false);
        assert_eq!(
            up.to_options(),
            vec![Some(7.0), Some(7.0), Some(8.0), Some(8.0)]
        );
    }

    #[test]
    fn align_accounts_for_offsets() {
        let s = MaskedSeries::new(vec![0.0, 4.0, 8.0], 1.0, 0.5);
        let aligned = align(&s, 1.0, 0.0, true);
        // t = 1.0 sits halfway between the first two samples
        assert_eq!(aligned.get(1), Some(2.0));
    }

    #[test]
    fn normalise_scales_against_own_max() {
        let s = opts(&[Some(0.0), Some(45.0), None, Some(90.0)]);
        let n = normalise_to_max(&s, 100.0);
        assert_eq!(n.get(1), Some(50.0));
        assert_eq!(n.get(2), None);
        assert_eq!(n.get(3), Some(100.0));
    }

    #[test]
    fn normalise_masks_dead_channel() {
        let s = opts(&[Some(0.0), Some(0.0)]);
        assert_eq!(normalise_to_max(&s, 100.0).valid_count(), 0);
    }
}
