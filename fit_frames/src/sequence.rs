use std::iter::FusedIterator;

use tracing::debug;

use crate::fields::FieldSet;
use crate::ingest::{IngestStats, RawSeries};
use crate::interpolate::{check_fps, frame_count, nominal_frame_count, Cursor};
use crate::sample::{Frame, Sample};
use crate::track::TrackProfile;
use crate::FrameError;

#[derive(Clone, Debug)]
pub struct FrameSequence {
    samples: Vec<Sample>,
    stats: IngestStats,
    fps: u32,
}

impl FrameSequence {
    pub fn new(series: RawSeries, frames_per_second: u32) -> Result<Self, FrameError> {
        check_fps(frames_per_second)?;
        let stats = series.stats();
        Ok(Self {
            samples: series.into_samples(),
            stats,
            fps: frames_per_second,
        })
    }

    pub fn frames_per_second(&self) -> u32 {
        self.fps
    }

    pub fn frame_count(&self) -> usize {
        frame_count(self.samples.len(), self.fps)
    }

    pub fn nominal_frame_count(&self) -> usize {
        nominal_frame_count(self.samples.len(), self.fps)
    }

    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / self.fps as f64
    }

    pub fn raw_samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn track(&self) -> TrackProfile {
        TrackProfile::from_samples(&self.samples)
    }
}

impl IntoIterator for FrameSequence {
    type Item = Frame;
    type IntoIter = Frames;

    fn into_iter(self) -> Frames {
        Frames {
            samples: self.samples,
            fps: self.fps,
            cursor: Cursor::default(),
        }
    }
}

#[derive(Debug)]
pub struct Frames {
    samples: Vec<Sample>,
    fps: u32,
    cursor: Cursor,
}

impl Frames {
    pub fn frames_per_second(&self) -> u32 {
        self.fps
    }
}

impl Iterator for Frames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.cursor.next_frame(&self.samples, self.fps)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.cursor.remaining(self.samples.len(), self.fps);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Frames {}
impl FusedIterator for Frames {}

/// A frame consumer.
///
/// `update` is called once per frame in stream order. Implementations must
/// skip fields absent from a frame and should leave lap, gear and timestamp
/// displays untouched on frames with `interpolated == true`.
pub trait Renderer {
    fn required_fields(&self) -> FieldSet;

    fn update(&mut self, frame: &Frame);
}

pub fn plan_fields(renderers: &[&dyn Renderer]) -> FieldSet {
    let mut fields = FieldSet::new();
    for renderer in renderers {
        fields.extend(&renderer.required_fields());
    }
    fields
}

pub fn drive<I>(frames: I, renderers: &mut [&mut dyn Renderer], limit: Option<usize>) -> usize
where
    I: IntoIterator<Item = Frame>,
{
    let limit = limit.unwrap_or(usize::MAX);
    let mut driven = 0usize;
    for frame in frames.into_iter().take(limit) {
        for renderer in renderers.iter_mut() {
            renderer.update(&frame);
        }
        driven += 1;
    }
    debug!(driven, "frame loop finished");
    driven
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Channel, Field};
    use crate::ingest::Ingestor;

    #[derive(Default)]
    struct LapCounter {
        laps: usize,
        last_speed: Option<f64>,
        frames: usize,
    }

    impl Renderer for LapCounter {
        fn required_fields(&self) -> FieldSet {
            [Field::Lap, Field::Channel(Channel::Speed)].into_iter().collect()
        }

        fn update(&mut self, frame: &Frame) {
            self.frames += 1;
            if let Some(speed) = frame.channels.get(Channel::Speed) {
                self.last_speed = Some(speed);
            }
            if frame.interpolated {
                return;
            }
            if frame.lap {
                self.laps += 1;
            }
        }
    }

    struct Elevation;

    impl Renderer for Elevation {
        fn required_fields(&self) -> FieldSet {
            [Field::Gradient, Field::Channel(Channel::Distance)]
                .into_iter()
                .collect()
        }

        fn update(&mut self, _frame: &Frame) {}
    }

    fn sequence(n: i64, fps: u32) -> FrameSequence {
        let mut ing = Ingestor::new();
        for t in 0..n {
            ing.add(Sample::new(t).with(Channel::Speed, t as f64)).unwrap();
            if t == 1 {
                ing.mark_lap();
            }
        }
        ing.finish().into_sequence(fps).unwrap()
    }

    #[test]
    fn counts_and_rate() {
        let seq = sequence(3, 10);
        assert_eq!(seq.frames_per_second(), 10);
        assert_eq!(seq.frame_count(), 21);
        assert_eq!(seq.nominal_frame_count(), 30);
        assert_eq!(seq.frame_interval_ms(), 100.0);
        let frames = seq.into_iter();
        assert_eq!(frames.len(), 21);
        assert_eq!(frames.filter(|f| f.interpolated).count(), 18);
    }

    #[test]
    fn truncated_series_counts_only_what_was_kept() {
        let ingested = Ingestor::new().ingest_all(vec![Sample::new(10), Sample::new(5)]);
        assert!(ingested.truncated());
        let seq = ingested.series.into_sequence(10).unwrap();
        assert_eq!(seq.frame_count(), 1);
        assert_eq!(seq.nominal_frame_count(), 10);
        assert_eq!(seq.into_iter().count(), 1);
    }

    #[test]
    fn drive_feeds_every_renderer_in_order() {
        let seq = sequence(3, 5);
        let mut counter = LapCounter::default();
        let mut elevation = Elevation;
        let driven = drive(seq, &mut [&mut counter, &mut elevation], None);
        assert_eq!(driven, 11);
        assert_eq!(counter.frames, 11);
        assert_eq!(counter.laps, 1);
        assert_eq!(counter.last_speed, Some(2.0));
    }

    #[test]
    fn drive_honours_limit() {
        let seq = sequence(4, 10);
        let mut counter = LapCounter::default();
        let driven = drive(seq, &mut [&mut counter], Some(7));
        assert_eq!(driven, 7);
        assert_eq!(counter.frames, 7);
    }

    #[test]
    fn planned_fields_union_and_expand() {
        let counter = LapCounter::default();
        let elevation = Elevation;
        let plan = plan_fields(&[&counter, &elevation]);
        assert!(plan.contains(Field::Lap));
        assert!(plan.contains(Field::Gradient));
        let decode = plan.decoder_fields();
        assert!(decode.contains(Field::Channel(Channel::Altitude)));
        assert!(decode.contains(Field::Channel(Channel::Speed)));
    }

    #[test]
    fn zero_rate_is_rejected() {
        let series = Ingestor::new().finish();
        assert!(FrameSequence::new(series, 0).is_err());
    }
}
