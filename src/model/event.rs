use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_TEMPO: u32 = 30;
pub const MAX_TEMPO: u32 = 209;
pub const MAX_DURATION: u32 = 64;
pub const VELOCITY_BUCKETS: u8 = 32;

/// One REMI symbol. Events carry no timestamp, their timing is implied by the
/// preceding `Bar` and `Position` markers in the stream.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Bar,
    Position(u32),
    Tempo(u32),
    NoteOn(u8),
    NoteVelocity(u8),
    NoteDuration(u32),
    EndOfSequence,
}

impl Event {
    pub fn velocity_bucket(velocity: u8) -> u8 {
        velocity.min(127) / (128 / VELOCITY_BUCKETS)
    }

    pub fn is_bar(&self) -> bool {
        matches!(self, Event::Bar)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Bar => write!(f, "bar"),
            Event::EndOfSequence => write!(f, "eos"),
            Event::Position(p) => write!(f, "position_{}", p),
            Event::Tempo(q) => write!(f, "tempo_{}", q),
            Event::NoteOn(pitch) => write!(f, "note_on_{}", pitch),
            Event::NoteVelocity(bucket) => write!(f, "note_velocity_{}", bucket),
            Event::NoteDuration(steps) => write!(f, "note_duration_{}", steps),
        }
    }
}

/// A pre-tokenized event in name/value form, as stored by the named-event piece format.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NamedEvent {
    pub name: String,
    pub value: EventValue,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum EventValue {
    Int(i64),
    Text(String),
    None,
}

impl NamedEvent {
    pub fn new(name: &str, value: EventValue) -> Self {
        Self {
            name: name.to_owned(),
            value,
        }
    }

    /// Vocabulary key, `"{name}_{value}"`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.name, self.value)
    }
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventValue::Int(v) => write!(f, "{}", v),
            EventValue::Text(v) => write!(f, "{}", v),
            EventValue::None => write!(f, "None"),
        }
    }
}

impl FromStr for Event {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bar" => return Ok(Event::Bar),
            "eos" => return Ok(Event::EndOfSequence),
            _ => {}
        }

        let (prefix, value) = s
            .rsplit_once('_')
            .ok_or_else(|| anyhow!("Malformed event id '{}'..!", s))?;
        let value: u32 = value
            .parse()
            .map_err(|e| anyhow!("Malformed value in event id '{}': {}", s, e))?;
        let narrow = |v: u32| -> Result<u8> {
            u8::try_from(v).map_err(|_| anyhow!("Value out of range in event id '{}'..!", s))
        };

        match prefix {
            "position" => Ok(Event::Position(value)),
            "tempo" => Ok(Event::Tempo(value)),
            "note_on" => Ok(Event::NoteOn(narrow(value)?)),
            "note_velocity" => Ok(Event::NoteVelocity(narrow(value)?)),
            "note_duration" => Ok(Event::NoteDuration(value)),
            _ => Err(anyhow!("Unknown event kind in '{}'..!", s)),
        }
    }
}
