use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fields::{classify, Channel, Field, FieldClass};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Channels([Option<f64>; Channel::COUNT]);

impl Channels {
    pub fn get(&self, channel: Channel) -> Option<f64> {
        self.0[channel.index()]
    }

    pub fn set(&mut self, channel: Channel, value: f64) {
        self.0[channel.index()] = Some(value);
    }

    pub fn clear(&mut self, channel: Channel) {
        self.0[channel.index()] = None;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, f64)> + '_ {
        Channel::ALL
            .iter()
            .filter_map(move |&channel| self.get(channel).map(|v| (channel, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: i64,
    pub channels: Channels,
    pub gradient: Option<f64>,
    pub lap: bool,
    pub gears: Option<String>,
    pub extra: BTreeMap<String, f64>,
}

impl Sample {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            channels: Channels::default(),
            gradient: None,
            lap: false,
            gears: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with(mut self, channel: Channel, value: f64) -> Self {
        self.channels.set(channel, value);
        self
    }

    /// Store a numeric value under its field name. Table channels and gradient
    /// land in their typed slots, the lap flag is set by any non-zero value and
    /// names outside the table go to `extra`. Returns `false` for names that
    /// cannot hold a number (`timestamp`, `gears`, `interpolated`).
    pub fn set_named(&mut self, name: &str, value: f64) -> bool {
        match Field::lookup(name) {
            Some(Field::Channel(channel)) => self.channels.set(channel, value),
            Some(Field::Gradient) => self.gradient = Some(value),
            Some(Field::Lap) => self.lap = value != 0.0,
            Some(Field::Timestamp) | Some(Field::Gears) | Some(Field::Interpolated) => {
                return false
            }
            None => {
                self.extra.insert(name.to_string(), value);
            }
        }
        true
    }

    pub fn value(&self, field: Field) -> Option<f64> {
        match field {
            Field::Timestamp => Some(self.timestamp as f64),
            Field::Channel(channel) => self.channels.get(channel),
            Field::Gradient => self.gradient,
            Field::Lap => self.lap.then_some(1.0),
            Field::Gears | Field::Interpolated => None,
        }
    }

    pub fn filler(&self, timestamp: i64) -> Sample {
        let mut out = Sample::new(timestamp);
        out.channels = self.channels;
        out.extra = held_extras(&self.extra);
        out
    }
}

pub(crate) fn held_extras(extra: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    extra
        .iter()
        .filter(|(name, _)| classify(name) == FieldClass::Held)
        .map(|(name, value)| (name.clone(), *value))
        .collect()
}

/// One output unit of the frame stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub index: usize,
    pub second: i64,
    pub step: u32,
    pub time_s: f64,
    /// Only real frames carry the timestamp.
    pub timestamp: Option<i64>,
    pub channels: Channels,
    pub gradient: Option<f64>,
    pub lap: bool,
    pub gears: Option<String>,
    pub extra: BTreeMap<String, f64>,
    pub interpolated: bool,
}

impl Frame {
    pub(crate) fn real(sample: &Sample, index: usize) -> Self {
        Self {
            index,
            second: sample.timestamp,
            step: 0,
            time_s: sample.timestamp as f64,
            timestamp: Some(sample.timestamp),
            channels: sample.channels,
            gradient: sample.gradient,
            lap: sample.lap,
            gears: sample.gears.clone(),
            extra: sample.extra.clone(),
            interpolated: false,
        }
    }

    pub fn value(&self, field: Field) -> Option<f64> {
        match field {
            Field::Timestamp => self.timestamp.map(|t| t as f64),
            Field::Channel(channel) => self.channels.get(channel),
            Field::Gradient => self.gradient,
            Field::Lap => self.lap.then_some(1.0),
            Field::Interpolated => Some(if self.interpolated { 1.0 } else { 0.0 }),
            Field::Gears => None,
        }
    }

    pub fn is_real(&self) -> bool {
        !self.interpolated
    }
}
