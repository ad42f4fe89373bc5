use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::FrameError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Power,
    Speed,
    Cadence,
    HeartRate,
    Altitude,
    Distance,
    Temperature,
    PositionLat,
    PositionLong,
}

impl Channel {
    pub const COUNT: usize = 9;

    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::Power,
        Channel::Speed,
        Channel::Cadence,
        Channel::HeartRate,
        Channel::Altitude,
        Channel::Distance,
        Channel::Temperature,
        Channel::PositionLat,
        Channel::PositionLong,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Power => "power",
            Channel::Speed => "speed",
            Channel::Cadence => "cadence",
            Channel::HeartRate => "heart_rate",
            Channel::Altitude => "altitude",
            Channel::Distance => "distance",
            Channel::Temperature => "temperature",
            Channel::PositionLat => "position_lat",
            Channel::PositionLong => "position_long",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Timestamp,
    Channel(Channel),
    Gradient,
    Lap,
    Gears,
    Interpolated,
}

/// How a field moves through gap-fill and interpolation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    /// Held across gap-fills, linearly blended on synthetic frames.
    Continuous,
    /// Anchored to the raw sample it arrived on. Never filled, never blended.
    Event,
    /// Computed during ingest. Anchored like an event.
    Derived,
    /// Not in the table. Carried forward from the earlier sample, never blended.
    Held,
}

const FIELD_TABLE: &[(&str, Field, FieldClass)] = &[
    ("timestamp", Field::Timestamp, FieldClass::Event),
    ("power", Field::Channel(Channel::Power), FieldClass::Continuous),
    ("speed", Field::Channel(Channel::Speed), FieldClass::Continuous),
    ("cadence", Field::Channel(Channel::Cadence), FieldClass::Continuous),
    ("heart_rate", Field::Channel(Channel::HeartRate), FieldClass::Continuous),
    ("altitude", Field::Channel(Channel::Altitude), FieldClass::Continuous),
    ("distance", Field::Channel(Channel::Distance), FieldClass::Continuous),
    ("temperature", Field::Channel(Channel::Temperature), FieldClass::Continuous),
    ("position_lat", Field::Channel(Channel::PositionLat), FieldClass::Continuous),
    ("position_long", Field::Channel(Channel::PositionLong), FieldClass::Continuous),
    ("gradient", Field::Gradient, FieldClass::Derived),
    ("lap", Field::Lap, FieldClass::Event),
    ("gears", Field::Gears, FieldClass::Event),
    ("interpolated", Field::Interpolated, FieldClass::Event),
];

// Alternate spellings accepted on input, mostly FIT "enhanced_*" variants.
const FIELD_ALIASES: &[(&str, Field)] = &[
    ("grad", Field::Gradient),
    ("enhanced_altitude", Field::Channel(Channel::Altitude)),
    ("enhanced_speed", Field::Channel(Channel::Speed)),
    ("hr", Field::Channel(Channel::HeartRate)),
];

impl Field {
    pub fn lookup(name: &str) -> Option<Field> {
        let name = name.trim();
        FIELD_TABLE
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, field, _)| *field)
            .or_else(|| {
                FIELD_ALIASES
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, field)| *field)
            })
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Timestamp => "timestamp",
            Field::Channel(channel) => channel.name(),
            Field::Gradient => "gradient",
            Field::Lap => "lap",
            Field::Gears => "gears",
            Field::Interpolated => "interpolated",
        }
    }

    pub fn class(self) -> FieldClass {
        FIELD_TABLE
            .iter()
            .find(|(_, field, _)| *field == self)
            .map(|(_, _, class)| *class)
            .unwrap_or(FieldClass::Held)
    }

    pub fn channel(self) -> Option<Channel> {
        match self {
            Field::Channel(channel) => Some(channel),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::lookup(s).ok_or_else(|| FrameError::UnknownField(s.trim().to_string()))
    }
}

pub fn classify(name: &str) -> FieldClass {
    Field::lookup(name)
        .map(Field::class)
        .unwrap_or(FieldClass::Held)
}

pub fn is_continuous(name: &str) -> bool {
    classify(name) == FieldClass::Continuous
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSet(BTreeSet<Field>);

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<I, S>(names: I) -> Result<Self, FrameError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = FieldSet::new();
        for name in names {
            let name = name.as_ref();
            if name.trim().is_empty() {
                continue;
            }
            set.insert(name.parse()?);
        }
        Ok(set)
    }

    pub fn insert(&mut self, field: Field) -> bool {
        self.0.insert(field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains(&field)
    }

    pub fn extend(&mut self, other: &FieldSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        self.0.iter().copied()
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.0.iter().filter_map(|f| f.channel())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fields the decoder has to produce for this set. The derived gradient is
    /// not decoded; its altitude and distance sources are requested instead.
    pub fn decoder_fields(&self) -> FieldSet {
        let mut out = FieldSet::new();
        for field in self.iter() {
            match field {
                Field::Gradient => {
                    out.insert(Field::Channel(Channel::Altitude));
                    out.insert(Field::Channel(Channel::Distance));
                }
                Field::Interpolated => {}
                other => {
                    out.insert(other);
                }
            }
        }
        out
    }
}

impl FromIterator<Field> for FieldSet {
    fn from_iter<T: IntoIterator<Item = Field>>(iter: T) -> Self {
        FieldSet(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuous_split_matches_table() {
        for channel in Channel::ALL {
            assert!(is_continuous(channel.name()), "{}", channel.name());
        }
        for name in ["lap", "gears", "timestamp", "interpolated", "gradient"] {
            assert!(!is_continuous(name), "{name}");
        }
    }

    #[test]
    fn unknown_names_are_held() {
        assert_eq!(classify("left_right_balance"), FieldClass::Held);
        assert!(!is_continuous("left_right_balance"));
        assert_eq!(classify("gradient"), FieldClass::Derived);
        assert_eq!(classify("lap"), FieldClass::Event);
    }

    #[test]
    fn channel_index_follows_all_order() {
        for (i, channel) in Channel::ALL.iter().enumerate() {
            assert_eq!(channel.index(), i);
        }
    }

    #[test]
    fn aliases_resolve() {
        assert_eq!(Field::lookup("grad"), Some(Field::Gradient));
        assert_eq!(
            Field::lookup("enhanced_altitude"),
            Some(Field::Channel(Channel::Altitude))
        );
        assert!("bogus".parse::<Field>().is_err());
    }

    #[test]
    fn gradient_expands_to_sources() {
        let set = FieldSet::parse(["power", "gradient", "interpolated"]).unwrap();
        let decoded = set.decoder_fields();
        assert!(decoded.contains(Field::Channel(Channel::Power)));
        assert!(decoded.contains(Field::Channel(Channel::Altitude)));
        assert!(decoded.contains(Field::Channel(Channel::Distance)));
        assert!(!decoded.contains(Field::Gradient));
        assert!(!decoded.contains(Field::Interpolated));
    }

    #[test]
    fn parse_rejects_unknown_field() {
        let err = FieldSet::parse(["power", "watts"]).unwrap_err();
        assert_eq!(err, FrameError::UnknownField("watts".into()));
    }
}
