use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use fitparser::profile::MesgNum;
use fitparser::{FitDataRecord, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fields::{Channel, FieldSet};
use crate::ingest::{Ingested, Ingestor};
use crate::sample::Sample;
use crate::{FrameError, Params};

/// `2^32 / 360`: FIT position units per degree.
pub const SEMICIRCLES_PER_DEGREE: f64 = 11930464.7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Record,
    Lap,
    Event,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedMessage {
    pub kind: MessageKind,
    pub timestamp: Option<i64>,
    pub values: BTreeMap<String, f64>,
    /// `"{front}-{rear}"` for gear-change events.
    pub gears: Option<String>,
}

impl DecodedMessage {
    pub fn record(timestamp: i64) -> Self {
        Self {
            kind: MessageKind::Record,
            timestamp: Some(timestamp),
            values: BTreeMap::new(),
            gears: None,
        }
    }

    pub fn lap() -> Self {
        Self {
            kind: MessageKind::Lap,
            timestamp: None,
            values: BTreeMap::new(),
            gears: None,
        }
    }

    pub fn gear_change(front: f64, rear: f64) -> Self {
        Self {
            kind: MessageKind::Event,
            timestamp: None,
            values: BTreeMap::new(),
            gears: Some(format!("{:.0}-{:.0}", front, rear)),
        }
    }

    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn to_sample(&self) -> Option<Sample> {
        if self.kind != MessageKind::Record {
            return None;
        }
        let mut sample = Sample::new(self.timestamp?);
        for (name, value) in &self.values {
            sample.set_named(name, *value);
        }
        Some(sample)
    }
}

/// Neutral value for a requested field: missing becomes `0.0` and positions
/// are converted to degrees.
pub fn normalize_value(channel: Channel, raw: Option<f64>) -> f64 {
    match raw {
        None => 0.0,
        Some(v) => match channel {
            Channel::PositionLat | Channel::PositionLong => v / SEMICIRCLES_PER_DEGREE,
            _ => v,
        },
    }
}

pub fn parse_messages(
    input: &[u8],
    format: &str,
    fields: &FieldSet,
    time_offset_s: i64,
) -> Result<Vec<DecodedMessage>, FrameError> {
    let format_lc = format.to_ascii_lowercase();
    if format_lc.ends_with(".fit") || format_lc == "fit" {
        parse_fit_messages(input, fields, time_offset_s)
    } else {
        Err(FrameError::UnsupportedFormat(format.to_string()))
    }
}

fn parse_fit_messages(
    input: &[u8],
    fields: &FieldSet,
    time_offset_s: i64,
) -> Result<Vec<DecodedMessage>, FrameError> {
    let records =
        fitparser::de::from_bytes(input).map_err(|e| FrameError::FitParse(e.to_string()))?;
    Ok(messages_from_records(&records, fields, time_offset_s))
}

fn messages_from_records(
    records: &[FitDataRecord],
    fields: &FieldSet,
    time_offset_s: i64,
) -> Vec<DecodedMessage> {
    let wanted: Vec<Channel> = fields.decoder_fields().channels().collect();

    let mut out = Vec::new();
    let mut skipped = 0usize;
    for record in records {
        let message = match record.kind() {
            MesgNum::Record => record_message(record, &wanted, time_offset_s),
            MesgNum::Lap => Some(DecodedMessage::lap()),
            MesgNum::Event => gear_message(record),
            _ => continue,
        };
        match message {
            Some(message) => out.push(message),
            None => skipped += 1,
        }
    }
    debug!(
        messages = out.len(),
        skipped,
        total = records.len(),
        "decoded FIT messages"
    );
    out
}

fn record_message(
    record: &FitDataRecord,
    wanted: &[Channel],
    time_offset_s: i64,
) -> Option<DecodedMessage> {
    let mut timestamp = None;
    let mut raw: HashMap<&str, f64> = HashMap::new();
    for field in record.fields() {
        match field.value() {
            Value::Timestamp(ts) if field.name() == "timestamp" => {
                timestamp = ts.with_timezone(&Utc).timestamp().checked_add(time_offset_s);
            }
            value => {
                if let Some(v) = fit_value_to_f64(value) {
                    raw.insert(field.name(), v);
                }
            }
        }
    }

    let mut message = DecodedMessage::record(timestamp?);
    for &channel in wanted {
        let value = match channel {
            Channel::Altitude => raw
                .get("enhanced_altitude")
                .or_else(|| raw.get("altitude"))
                .copied(),
            Channel::Speed => raw
                .get("enhanced_speed")
                .or_else(|| raw.get("speed"))
                .copied(),
            other => raw.get(other.name()).copied(),
        };
        message
            .values
            .insert(channel.name().to_string(), normalize_value(channel, value));
    }
    Some(message)
}

fn gear_message(record: &FitDataRecord) -> Option<DecodedMessage> {
    let mut front = None;
    let mut rear = None;
    let mut packed = None;
    for field in record.fields() {
        match field.name() {
            "front_gear" => front = fit_value_to_f64(field.value()),
            "rear_gear" => rear = fit_value_to_f64(field.value()),
            "gear_change_data" => packed = fit_value_to_f64(field.value()),
            _ => {}
        }
    }
    let packed = packed? as u32;
    // rear_gear_num, rear_gear, front_gear_num, front_gear; one byte each, low first
    let front = front.unwrap_or(((packed >> 24) & 0xff) as f64);
    let rear = rear.unwrap_or(((packed >> 8) & 0xff) as f64);
    Some(DecodedMessage::gear_change(front, rear))
}

/// Numeric view of a decoded FIT value. Arrays yield their first numeric
/// element; numeric strings are parsed.
pub fn fit_value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float32(v) => Some(*v as f64),
        Value::Float64(v) => Some(*v),
        Value::SInt8(v) => Some(*v as f64),
        Value::SInt16(v) => Some(*v as f64),
        Value::SInt32(v) => Some(*v as f64),
        Value::SInt64(v) => Some(*v as f64),
        Value::UInt8(v) | Value::UInt8z(v) | Value::Byte(v) => Some(*v as f64),
        Value::UInt16(v) | Value::UInt16z(v) => Some(*v as f64),
        Value::UInt32(v) | Value::UInt32z(v) => Some(*v as f64),
        Value::UInt64(v) | Value::UInt64z(v) => Some(*v as f64),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}

pub fn ingest_messages<I>(messages: I, params: &Params) -> Ingested
where
    I: IntoIterator<Item = DecodedMessage>,
{
    let mut ingestor = Ingestor::from_params(params);
    for message in messages {
        match message.kind {
            MessageKind::Record => {
                let sample = match message.to_sample() {
                    Some(sample) => sample,
                    None => {
                        debug!("record without timestamp skipped");
                        continue;
                    }
                };
                if let Err(err) = ingestor.add(sample) {
                    return Ingested {
                        series: ingestor.finish(),
                        stop: Some(err),
                    };
                }
            }
            MessageKind::Lap => {
                ingestor.mark_lap();
            }
            MessageKind::Event => {
                if let Some(gears) = message.gears {
                    ingestor.set_gears(gears);
                }
            }
        }
    }
    Ingested {
        series: ingestor.finish(),
        stop: None,
    }
}
