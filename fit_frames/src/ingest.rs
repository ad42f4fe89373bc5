use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::derived::{GradientWindow, DEFAULT_MIN_DISTANCE_DELTA};
use crate::fields::Channel;
use crate::sample::Sample;
use crate::sequence::FrameSequence;
use crate::{FrameError, Params};

/// Longest gap, in seconds, that is filled with held samples.
pub const MAX_GAP_FILL_S: i64 = 7 * 24 * 3600;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Anchored,
    Appended { filled: usize },
    Duplicate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub accepted: usize,
    pub filled: usize,
    pub duplicates: usize,
    pub laps: usize,
    pub gear_changes: usize,
}

#[derive(Debug)]
pub struct Ingestor {
    samples: Vec<Sample>,
    gradient: Option<GradientWindow>,
    min_distance_delta: f64,
    stats: IngestStats,
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new()
    }
}

impl Ingestor {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            gradient: Some(GradientWindow::new()),
            min_distance_delta: DEFAULT_MIN_DISTANCE_DELTA,
            stats: IngestStats::default(),
        }
    }

    pub fn without_gradient() -> Self {
        Self {
            gradient: None,
            ..Self::new()
        }
    }

    pub fn from_params(params: &Params) -> Self {
        let mut ingestor = if params.derive_gradient() {
            Self::new()
        } else {
            Self::without_gradient()
        };
        ingestor.min_distance_delta = params.gradient_min_distance;
        ingestor
    }

    pub fn add(&mut self, sample: Sample) -> Result<AddOutcome, FrameError> {
        let last = match self.samples.last() {
            Some(last) => last,
            None => {
                self.push(sample);
                self.stats.accepted += 1;
                return Ok(AddOutcome::Anchored);
            }
        };

        let previous = last.timestamp;
        let dt = sample.timestamp.checked_sub(previous).ok_or_else(|| {
            FrameError::InvalidParameter(format!(
                "timestamp step from {} to {} overflows",
                previous, sample.timestamp
            ))
        })?;
        if dt == 0 {
            debug!(timestamp = sample.timestamp, "dropping duplicate-second sample");
            self.stats.duplicates += 1;
            return Ok(AddOutcome::Duplicate);
        }
        if dt < 0 {
            debug!(previous, found = sample.timestamp, "timestamp went backwards");
            return Err(FrameError::NonMonotonicTimestamp {
                previous,
                found: sample.timestamp,
            });
        }

        if dt > MAX_GAP_FILL_S {
            debug!(from = previous, to = sample.timestamp, "gap too long to fill");
            return Err(FrameError::InvalidParameter(format!(
                "{} s gap after {} exceeds the {} s fill limit",
                dt, previous, MAX_GAP_FILL_S
            )));
        }

        let filled = (dt - 1) as usize;
        if filled > 0 {
            debug!(from = previous, to = sample.timestamp, filled, "filling gap");
            let template = last.clone();
            for t in previous + 1..sample.timestamp {
                self.push(template.filler(t));
            }
            self.stats.filled += filled;
        }
        self.push(sample);
        self.stats.accepted += 1;
        Ok(AddOutcome::Appended { filled })
    }

    fn push(&mut self, mut sample: Sample) {
        if let Some(window) = self.gradient.take() {
            let (next, gradient) = window.advance(
                sample.channels.get(Channel::Altitude),
                sample.channels.get(Channel::Distance),
                self.min_distance_delta,
            );
            sample.gradient = gradient;
            self.gradient = Some(next);
        }
        self.samples.push(sample);
    }

    pub fn mark_lap(&mut self) -> bool {
        match self.samples.last_mut() {
            Some(last) => {
                last.lap = true;
                self.stats.laps += 1;
                true
            }
            None => false,
        }
    }

    pub fn set_gears(&mut self, gears: impl Into<String>) -> bool {
        match self.samples.last_mut() {
            Some(last) => {
                last.gears = Some(gears.into());
                self.stats.gear_changes += 1;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn finish(self) -> RawSeries {
        RawSeries {
            samples: self.samples,
            stats: self.stats,
        }
    }

    pub fn ingest_all<I>(mut self, samples: I) -> Ingested
    where
        I: IntoIterator<Item = Sample>,
    {
        for sample in samples {
            if let Err(err) = self.add(sample) {
                return Ingested {
                    series: self.finish(),
                    stop: Some(err),
                };
            }
        }
        Ingested {
            series: self.finish(),
            stop: None,
        }
    }
}

/// Finished raw series: strictly increasing timestamps one second apart.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawSeries {
    samples: Vec<Sample>,
    stats: IngestStats,
}

impl RawSeries {
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    pub fn into_sequence(self, frames_per_second: u32) -> Result<FrameSequence, FrameError> {
        FrameSequence::new(self, frames_per_second)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ingested {
    pub series: RawSeries,
    pub stop: Option<FrameError>,
}

impl Ingested {
    pub fn truncated(&self) -> bool {
        self.stop.is_some()
    }
}
