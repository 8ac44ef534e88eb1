//! Channel store interface and the JSON recording container.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::series::{secs_to_index, MaskedSeries};
use crate::SplitError;

/// Read access to the named channels of one recording.
///
/// A missing channel is an expected outcome (`None`); callers that cannot proceed without a
/// channel go through [`ChannelStore::require`].
pub trait ChannelStore {
    fn get(&self, name: &str) -> Option<&MaskedSeries>;

    /// Recording length in seconds.
    fn duration_secs(&self) -> f64;

    /// Whether the `Frame Counter` channel can be trusted for splitting.
    fn reliable_frame_counter(&self) -> bool;

    fn superframe_present(&self) -> bool;

    fn channel_names(&self) -> Vec<String>;

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn require(&self, name: &str) -> Result<&MaskedSeries, SplitError> {
        self.get(name)
            .ok_or_else(|| SplitError::MissingChannel(name.to_string()))
    }
}

/// An in-memory recording, stored on disk as JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub duration_secs: f64,
    #[serde(default)]
    pub reliable_frame_counter: bool,
    #[serde(default)]
    pub superframe_present: bool,
    pub channels: BTreeMap<String, MaskedSeries>,
}

impl ChannelStore for Recording {
    fn get(&self, name: &str) -> Option<&MaskedSeries> {
        self.channels.get(name)
    }

    fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    fn reliable_frame_counter(&self) -> bool {
        self.reliable_frame_counter
    }

    fn superframe_present(&self) -> bool {
        self.superframe_present
    }

    fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }
}

impl Recording {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            reliable_frame_counter: false,
            superframe_present: false,
            channels: BTreeMap::new(),
        }
    }

    pub fn with_channel(mut self, name: &str, series: MaskedSeries) -> Self {
        self.channels.insert(name.to_string(), series);
        self
    }

    pub fn from_bytes(input: &[u8]) -> Result<Self, SplitError> {
        let recording: Recording = serde_json::from_slice(input)?;
        recording.validate()?;
        Ok(recording)
    }

    pub fn load(path: &Path) -> Result<Self, SplitError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<(), SplitError> {
        let bytes = serde_json::to_vec(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SplitError> {
        if !(self.duration_secs.is_finite() && self.duration_secs > 0.0) {
            return Err(SplitError::InvalidRecording(format!(
                "duration must be positive, got {}",
                self.duration_secs
            )));
        }
        for (name, series) in &self.channels {
            if !(series.sample_rate.is_finite() && series.sample_rate > 0.0) {
                return Err(SplitError::InvalidRecording(format!(
                    "channel '{name}' has sample rate {}",
                    series.sample_rate
                )));
            }
            if series.offset < 0.0 || series.offset >= 1.0 / series.sample_rate {
                return Err(SplitError::InvalidRecording(format!(
                    "channel '{name}' offset {} is outside its first sample period",
                    series.offset
                )));
            }
        }
        Ok(())
    }

    /// Sub-recording covering `[start_secs, stop_secs)`.
    ///
    /// With `superframe_secs` the window widens outward to whole superframes, clamped to the
    /// recording.
    pub fn slice_secs(&self, start_secs: f64, stop_secs: f64, superframe_secs: Option<f64>) -> Self {
        let (start, stop) = match superframe_secs {
            Some(sf) if sf > 0.0 => (
                (start_secs / sf).floor() * sf,
                ((stop_secs / sf).ceil() * sf).min(self.duration_secs),
            ),
            _ => (start_secs, stop_secs.min(self.duration_secs)),
        };
        let start = start.max(0.0);
        let channels = self
            .channels
            .iter()
            .map(|(name, series)| {
                let lo = secs_to_index(start, series.sample_rate).min(series.len());
                let hi = secs_to_index(stop, series.sample_rate).min(series.len());
                (name.clone(), series.slice(lo..hi.max(lo)))
            })
            .collect();
        Self {
            duration_secs: stop - start,
            reliable_frame_counter: self.reliable_frame_counter,
            superframe_present: self.superframe_present,
            channels,
        }
    }
}
