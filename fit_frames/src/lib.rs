pub mod decode;
pub mod derived;
pub mod fields;
pub mod ingest;
pub mod interpolate;
pub mod sample;
pub mod sequence;
pub mod track;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use decode::{ingest_messages, parse_messages, DecodedMessage, MessageKind};
pub use derived::{GradientWindow, DEFAULT_MIN_DISTANCE_DELTA};
pub use fields::{classify, is_continuous, Channel, Field, FieldClass, FieldSet};
pub use ingest::{AddOutcome, IngestStats, Ingested, Ingestor, RawSeries, MAX_GAP_FILL_S};
pub use interpolate::{expand, DEFAULT_FRAMES_PER_SECOND};
pub use sample::{Channels, Frame, Sample};
pub use sequence::{drive, plan_fields, FrameSequence, Frames, Renderer};
pub use track::{Bounds, TrackProfile};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("timestamp went backwards: {found} after {previous}")]
    NonMonotonicTimestamp { previous: i64, found: i64 },
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse FIT file: {0}")]
    FitParse(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("unknown field: {0}")]
    UnknownField(String),
}

/// Bound on `time_offset_s`, one year either way.
pub const MAX_TIME_OFFSET_S: i64 = 366 * 24 * 3600;

const DEFAULT_FIELDS: &[&str] = &[
    "timestamp",
    "temperature",
    "heart_rate",
    "lap",
    "gears",
    "altitude",
    "gradient",
    "distance",
    "power",
    "speed",
    "cadence",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub frames_per_second: u32,
    pub time_offset_s: i64,
    pub gradient_min_distance: f64,
    pub fields: Vec<String>,
    pub max_frames: Option<usize>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
            time_offset_s: 0,
            gradient_min_distance: DEFAULT_MIN_DISTANCE_DELTA,
            fields: DEFAULT_FIELDS.iter().map(|s| s.to_string()).collect(),
            max_frames: None,
        }
    }
}

impl Params {
    pub fn from_json_str(text: &str) -> Result<Self, FrameError> {
        let params: Params =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidParameter(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn field_set(&self) -> Result<FieldSet, FrameError> {
        FieldSet::parse(&self.fields)
    }

    /// Same parameters, carrying the fields a set of renderers asked for.
    pub fn with_fields(&self, fields: &FieldSet) -> Params {
        Params {
            fields: fields.iter().map(|f| f.name().to_string()).collect(),
            ..self.clone()
        }
    }

    pub fn derive_gradient(&self) -> bool {
        self.fields
            .iter()
            .any(|name| Field::lookup(name) == Some(Field::Gradient))
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        if self.frames_per_second == 0 {
            return Err(FrameError::InvalidParameter(
                "frames_per_second must be at least 1".into(),
            ));
        }
        if !self.gradient_min_distance.is_finite() || self.gradient_min_distance < 0.0 {
            return Err(FrameError::InvalidParameter(format!(
                "gradient_min_distance must be a non-negative number, got {}",
                self.gradient_min_distance
            )));
        }
        if !(-MAX_TIME_OFFSET_S..=MAX_TIME_OFFSET_S).contains(&self.time_offset_s) {
            return Err(FrameError::InvalidParameter(format!(
                "time_offset_s must be within {} s, got {}",
                MAX_TIME_OFFSET_S, self.time_offset_s
            )));
        }
        self.field_set()?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct Prepared {
    pub sequence: FrameSequence,
    pub track: TrackProfile,
    /// Set when ingestion ended early; the sequence holds what came before.
    pub stop: Option<FrameError>,
}

impl Prepared {
    pub fn truncated(&self) -> bool {
        self.stop.is_some()
    }
}

/// Decode, ingest and sequence one file.
pub fn prepare(input: &[u8], format: &str, params: &Params) -> Result<Prepared, FrameError> {
    params.validate()?;
    let fields = params.field_set()?;
    let messages = parse_messages(input, format, &fields, params.time_offset_s)?;
    let Ingested { series, stop } = ingest_messages(messages, params);
    let sequence = series.into_sequence(params.frames_per_second)?;
    let track = sequence.track();
    info!(
        samples = sequence.raw_samples().len(),
        frames = sequence.frame_count(),
        fps = sequence.frames_per_second(),
        "prepared frame sequence"
    );
    Ok(Prepared {
        sequence,
        track,
        stop,
    })
}
