//! Masked time series: fixed-rate samples where any sample may be flagged invalid.

use std::ops::Range;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Guards index conversion against `99.99999` style products of seconds and rate.
const INDEX_EPS: f64 = 1e-9;

/// A channel sampled at `sample_rate` Hz, first sample `offset` seconds into the recording.
///
/// `mask[i] == true` marks sample `i` as invalid regardless of `data[i]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesRepr", into = "SeriesRepr")]
pub struct MaskedSeries {
    pub data: Array1<f64>,
    pub mask: Array1<bool>,
    pub sample_rate: f64,
    pub offset: f64,
}

/// On-disk form: `null` marks a masked sample.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SeriesRepr {
    sample_rate: f64,
    #[serde(default)]
    offset: f64,
    values: Vec<Option<f64>>,
}

impl TryFrom<SeriesRepr> for MaskedSeries {
    type Error = String;

    fn try_from(repr: SeriesRepr) -> Result<Self, Self::Error> {
        if !(repr.sample_rate.is_finite() && repr.sample_rate > 0.0) {
            return Err(format!("sample_rate must be positive, got {}", repr.sample_rate));
        }
        if !(repr.offset >= 0.0 && repr.offset < 1.0 / repr.sample_rate) {
            return Err(format!(
                "offset {} outside the first sample period of a {} Hz channel",
                repr.offset, repr.sample_rate
            ));
        }
        Ok(MaskedSeries::from_options(
            repr.values,
            repr.sample_rate,
            repr.offset,
        ))
    }
}

impl From<MaskedSeries> for SeriesRepr {
    fn from(series: MaskedSeries) -> Self {
        SeriesRepr {
            sample_rate: series.sample_rate,
            offset: series.offset,
            values: series.to_options(),
        }
    }
}

/// Convert seconds into a sample index at `rate`, truncating towards zero.
pub fn secs_to_index(secs: f64, rate: f64) -> usize {
    let idx = secs * rate + INDEX_EPS;
    if idx <= 0.0 {
        0
    } else {
        idx.floor() as usize
    }
}

impl MaskedSeries {
    /// Non-finite values come in masked.
    pub fn new(values: Vec<f64>, sample_rate: f64, offset: f64) -> Self {
        let mask = values.iter().map(|v| !v.is_finite()).collect::<Array1<bool>>();
        Self {
            data: Array1::from_vec(values),
            mask,
            sample_rate,
            offset,
        }
    }

    pub fn from_options(values: Vec<Option<f64>>, sample_rate: f64, offset: f64) -> Self {
        let mut data = Vec::with_capacity(values.len());
        let mut mask = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Some(v) if v.is_finite() => {
                    data.push(v);
                    mask.push(false);
                }
                _ => {
                    data.push(0.0);
                    mask.push(true);
                }
            }
        }
        Self {
            data: Array1::from_vec(data),
            mask: Array1::from_vec(mask),
            sample_rate,
            offset,
        }
    }

    pub fn masked(len: usize, sample_rate: f64, offset: f64) -> Self {
        Self {
            data: Array1::zeros(len),
            mask: Array1::from_elem(len, true),
            sample_rate,
            offset,
        }
    }

    /// Same rate and offset, new samples.
    pub fn with_samples(&self, data: Array1<f64>, mask: Array1<bool>) -> Self {
        debug_assert_eq!(data.len(), mask.len());
        Self {
            data,
            mask,
            sample_rate: self.sample_rate,
            offset: self.offset,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }

    pub fn is_valid(&self, idx: usize) -> bool {
        idx < self.len() && !self.mask[idx]
    }

    pub fn get(&self, idx: usize) -> Option<f64> {
        if self.is_valid(idx) {
            Some(self.data[idx])
        } else {
            None
        }
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|m| !**m).count()
    }

    pub fn to_options(&self) -> Vec<Option<f64>> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    /// Sample range covering `[start_secs, stop_secs)`, clamped to the series.
    pub fn index_range(&self, start_secs: f64, stop_secs: f64) -> Range<usize> {
        let start = secs_to_index(start_secs, self.sample_rate).min(self.len());
        let stop = secs_to_index(stop_secs, self.sample_rate).min(self.len());
        start..stop.max(start)
    }

    fn clamp(&self, range: Range<usize>) -> Range<usize> {
        let stop = range.end.min(self.len());
        range.start.min(stop)..stop
    }

    pub fn first_valid(&self, range: Range<usize>) -> Option<usize> {
        self.clamp(range).find(|&i| !self.mask[i])
    }

    pub fn last_valid(&self, range: Range<usize>) -> Option<usize> {
        self.clamp(range).rev().find(|&i| !self.mask[i])
    }

    /// Every valid sample index within `range`.
    pub fn valid_indices(&self, range: Range<usize>) -> Vec<usize> {
        self.clamp(range).filter(|&i| !self.mask[i]).collect()
    }

    /// Maximal runs of valid samples within `range`, as absolute index ranges.
    pub fn clump_valid(&self, range: Range<usize>) -> Vec<Range<usize>> {
        let range = self.clamp(range);
        let start = range.start;
        let flags: Vec<bool> = range.map(|i| !self.mask[i]).collect();
        shift_runs(runs_of_ones(&flags), start)
    }

    /// Maximal runs of masked samples within `range`, as absolute index ranges.
    pub fn clump_masked(&self, range: Range<usize>) -> Vec<Range<usize>> {
        let range = self.clamp(range);
        let start = range.start;
        let flags: Vec<bool> = range.map(|i| self.mask[i]).collect();
        shift_runs(runs_of_ones(&flags), start)
    }

    /// Index and value of the smallest valid sample in `range`; the first one wins ties.
    pub fn min_value(&self, range: Range<usize>) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for i in self.clamp(range) {
            if self.mask[i] {
                continue;
            }
            let v = self.data[i];
            match best {
                Some((_, b)) if v >= b => {}
                _ => best = Some((i, v)),
            }
        }
        best
    }

    pub fn max_valid(&self) -> Option<f64> {
        self.data
            .iter()
            .zip(self.mask.iter())
            .filter(|(_, m)| !**m)
            .map(|(v, _)| *v)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
    }

    pub fn min_valid(&self) -> Option<f64> {
        self.data
            .iter()
            .zip(self.mask.iter())
            .filter(|(_, m)| !**m)
            .map(|(v, _)| *v)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
    }

    /// Copy of `range`; rate and offset are kept.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let range = self.clamp(range);
        let data = self.data.slice(ndarray::s![range.clone()]).to_owned();
        let mask = self.mask.slice(ndarray::s![range]).to_owned();
        self.with_samples(data, mask)
    }

    /// Valid first differences; a difference is masked when either sample is.
    pub fn diff(&self) -> Self {
        if self.len() < 2 {
            return self.with_samples(Array1::zeros(0), Array1::from_elem(0, true));
        }
        let n = self.len() - 1;
        let mut data = Array1::zeros(n);
        let mut mask = Array1::from_elem(n, true);
        for i in 0..n {
            if let (Some(a), Some(b)) = (self.get(i), self.get(i + 1)) {
                data[i] = b - a;
                mask[i] = false;
            }
        }
        self.with_samples(data, mask)
    }
}

/// Half-open ranges where `flags` is true.
pub fn runs_of_ones(flags: &[bool]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut run_start: Option<usize> = None;
    for (i, &flag) in flags.iter().enumerate() {
        match (flag, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                runs.push(start..i);
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        runs.push(start..flags.len());
    }
    runs
}

fn shift_runs(runs: Vec<Range<usize>>, by: usize) -> Vec<Range<usize>> {
    runs.into_iter().map(|r| r.start + by..r.end + by).collect()
}
