//! Expansion of a one-second raw series into fixed-rate frames.
//!
//! Each pair of neighbouring raw samples `(s0, s1)` produces `s0` itself
//! followed by `fps - 1` synthetic frames. The last raw sample is emitted on
//! its own with nothing after it, so `n` samples yield `fps * (n - 1) + 1`
//! frames.

use std::iter::FusedIterator;

use crate::fields::Channel;
use crate::sample::{held_extras, Channels, Frame, Sample};
use crate::FrameError;

pub const DEFAULT_FRAMES_PER_SECOND: u32 = 10;

/// Linear blend at integer `step` of `fps`.
pub fn interpolate(v0: f64, v1: f64, step: u32, fps: u32) -> f64 {
    ((fps - step) as f64 * v0 + step as f64 * v1) / fps as f64
}

pub fn frame_count(samples: usize, fps: u32) -> usize {
    match samples {
        0 => 0,
        n => (n - 1) * fps as usize + 1,
    }
}

/// `fps * samples`: an upper bound for progress reporting.
pub fn nominal_frame_count(samples: usize, fps: u32) -> usize {
    samples * fps as usize
}

pub(crate) fn check_fps(fps: u32) -> Result<(), FrameError> {
    if fps == 0 {
        return Err(FrameError::InvalidParameter(
            "frames_per_second must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Synthetic frame `step` of the interval starting at `s0`. Only channels
/// present in both endpoints are blended; events and the derived gradient
/// are left off.
pub(crate) fn synthetic_frame(s0: &Sample, s1: &Sample, step: u32, fps: u32, index: usize) -> Frame {
    let mut channels = Channels::default();
    for channel in Channel::ALL {
        if let (Some(v0), Some(v1)) = (s0.channels.get(channel), s1.channels.get(channel)) {
            channels.set(channel, interpolate(v0, v1, step, fps));
        }
    }
    Frame {
        index,
        second: s0.timestamp,
        step,
        time_s: s0.timestamp as f64 + step as f64 / fps as f64,
        timestamp: None,
        channels,
        gradient: None,
        lap: false,
        gears: None,
        extra: held_extras(&s0.extra),
        interpolated: true,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Cursor {
    sample: usize,
    step: u32,
    index: usize,
}

impl Cursor {
    pub(crate) fn next_frame(&mut self, samples: &[Sample], fps: u32) -> Option<Frame> {
        let n = samples.len();
        if self.sample >= n {
            return None;
        }
        let index = self.index;
        self.index += 1;

        if self.sample + 1 == n {
            self.sample = n;
            return Some(Frame::real(&samples[n - 1], index));
        }

        let s0 = &samples[self.sample];
        let frame = if self.step == 0 {
            Frame::real(s0, index)
        } else {
            synthetic_frame(s0, &samples[self.sample + 1], self.step, fps, index)
        };
        self.step += 1;
        if self.step >= fps {
            self.step = 0;
            self.sample += 1;
        }
        Some(frame)
    }

    pub(crate) fn remaining(&self, samples: usize, fps: u32) -> usize {
        if self.sample >= samples {
            return 0;
        }
        (samples - 1 - self.sample) * fps as usize - self.step as usize + 1
    }
}

#[derive(Clone, Debug)]
pub struct Expand<'a> {
    samples: &'a [Sample],
    fps: u32,
    cursor: Cursor,
}

/// Expand `samples` at `fps` frames per second.
pub fn expand(samples: &[Sample], fps: u32) -> Result<Expand<'_>, FrameError> {
    check_fps(fps)?;
    Ok(Expand {
        samples,
        fps,
        cursor: Cursor::default(),
    })
}

impl Iterator for Expand<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.cursor.next_frame(self.samples, self.fps)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.cursor.remaining(self.samples.len(), self.fps);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Expand<'_> {}
impl FusedIterator for Expand<'_> {}
