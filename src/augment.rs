use crate::model::event::{Event, EventValue, NamedEvent};
use crate::vocab::{VocabKeys, Vocabulary};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Chord roots in the order used for pitch-class rotation.
pub const PITCH_CLASSES: [&str; 12] = [
    "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
];
pub const NO_CHORD: &str = "N_N";

const NOTE_PITCH: &str = "Note_Pitch";
const CHORD: &str = "Chord";
const BAR: &str = "Bar";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AugmentError {
    #[error(
        "unsatisfiable pitch range: no shift in {shifts:?} keeps pitches {low}..={high} within {min_pitch}..={max_pitch}"
    )]
    Unsatisfiable {
        low: i32,
        high: i32,
        min_pitch: i32,
        max_pitch: i32,
        shifts: RangeInclusive<i32>,
    },
    #[error("unknown chord root in '{0}'")]
    UnknownChordRoot(String),
    #[error("pitch {0} has no token")]
    Unencodable(i32),
}

/// How the pipeline reads one stored event format.
pub trait EventAdapter: Send + Sync {
    type Event: Clone + Send + Sync;

    fn vocab_keys(&self) -> VocabKeys;

    fn is_bar(&self, event: &Self::Event) -> bool;

    /// Pitch of a pitch-bearing event.
    fn pitch(&self, event: &Self::Event) -> Option<i32>;

    /// Shifts pitches and chord roots by `semitones`, everything else is cloned.
    fn transpose(&self, event: &Self::Event, semitones: i32) -> Result<Self::Event, AugmentError>;

    fn to_id(&self, event: &Self::Event, vocab: &Vocabulary) -> anyhow::Result<u32>;
}

/// Events stored as `{name, value}` records with named vocabulary keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedEventAdapter;

impl EventAdapter for NamedEventAdapter {
    type Event = NamedEvent;

    fn vocab_keys(&self) -> VocabKeys {
        VocabKeys::NAMED
    }

    fn is_bar(&self, event: &NamedEvent) -> bool {
        event.name == BAR
    }

    fn pitch(&self, event: &NamedEvent) -> Option<i32> {
        match (&event.name[..], &event.value) {
            (NOTE_PITCH, EventValue::Int(pitch)) => i32::try_from(*pitch).ok(),
            _ => None,
        }
    }

    fn transpose(&self, event: &NamedEvent, semitones: i32) -> Result<NamedEvent, AugmentError> {
        match (&event.name[..], &event.value) {
            (NOTE_PITCH, EventValue::Int(pitch)) => Ok(NamedEvent::new(
                NOTE_PITCH,
                EventValue::Int(pitch + semitones as i64),
            )),
            (CHORD, EventValue::Text(chord)) => Ok(NamedEvent::new(
                CHORD,
                EventValue::Text(transpose_chord(chord, semitones)?),
            )),
            _ => Ok(event.clone()),
        }
    }

    fn to_id(&self, event: &NamedEvent, vocab: &Vocabulary) -> anyhow::Result<u32> {
        vocab.require(&event.key())
    }
}

/// Events already encoded as REMI vocabulary ids.
#[derive(Debug, Clone)]
pub struct TokenAdapter {
    bar: u32,
    pitch_of: HashMap<u32, u8>,
    id_of: Vec<Option<u32>>,
}

impl TokenAdapter {
    pub fn new(vocab: &Vocabulary) -> anyhow::Result<Self> {
        let bar = vocab.require(VocabKeys::REMI.bar)?;
        let mut pitch_of = HashMap::new();
        let mut id_of = vec![None; 128];

        for pitch in 0..=127u8 {
            if let Some(id) = vocab.id(&Event::NoteOn(pitch).to_string()) {
                pitch_of.insert(id, pitch);
                id_of[pitch as usize] = Some(id);
            }
        }

        Ok(Self {
            bar,
            pitch_of,
            id_of,
        })
    }
}

impl EventAdapter for TokenAdapter {
    type Event = u32;

    fn vocab_keys(&self) -> VocabKeys {
        VocabKeys::REMI
    }

    fn is_bar(&self, event: &u32) -> bool {
        *event == self.bar
    }

    fn pitch(&self, event: &u32) -> Option<i32> {
        self.pitch_of.get(event).map(|&p| p as i32)
    }

    fn transpose(&self, event: &u32, semitones: i32) -> Result<u32, AugmentError> {
        match self.pitch(event) {
            Some(pitch) => {
                let shifted = pitch + semitones;
                usize::try_from(shifted)
                    .ok()
                    .and_then(|p| self.id_of.get(p).copied().flatten())
                    .ok_or(AugmentError::Unencodable(shifted))
            }
            None => Ok(*event),
        }
    }

    fn to_id(&self, event: &u32, vocab: &Vocabulary) -> anyhow::Result<u32> {
        if (*event as usize) < vocab.len() {
            Ok(*event)
        } else {
            Err(anyhow::anyhow!("Token {} is outside the vocabulary..!", event))
        }
    }
}

/// Rotates the root of a `ROOT_QUALITY` chord value by `semitones`.
pub fn transpose_chord(chord: &str, semitones: i32) -> Result<String, AugmentError> {
    if chord == NO_CHORD {
        return Ok(chord.to_owned());
    }

    let root = chord.split('_').next().unwrap_or_default();
    let idx = PITCH_CLASSES
        .iter()
        .position(|&pc| pc == root)
        .ok_or_else(|| AugmentError::UnknownChordRoot(chord.to_owned()))?;
    let rotated = (idx as i32 + semitones).rem_euclid(12) as usize;

    Ok(format!("{}{}", PITCH_CLASSES[rotated], &chord[root.len()..]))
}

/// Random transposition that keeps every pitch inside `[min_pitch, max_pitch]`.
#[derive(Debug, Clone)]
pub struct PitchAugmenter {
    pub shifts: RangeInclusive<i32>,
    pub min_pitch: i32,
    pub max_pitch: i32,
}

impl PitchAugmenter {
    pub fn new(shifts: RangeInclusive<i32>, min_pitch: i32, max_pitch: i32) -> Self {
        Self {
            shifts,
            min_pitch,
            max_pitch,
        }
    }

    pub fn extreme_pitches<A: EventAdapter>(adapter: &A, events: &[A::Event]) -> Option<(i32, i32)> {
        events
            .iter()
            .filter_map(|ev| adapter.pitch(ev))
            .fold(None, |acc, p| match acc {
                None => Some((p, p)),
                Some((low, high)) => Some((low.min(p), high.max(p))),
            })
    }

    /// Shifts from the configured range that keep `extremes` in band. A window
    /// with no pitches accepts every shift.
    pub fn feasible_shifts(&self, extremes: Option<(i32, i32)>) -> Result<Vec<i32>, AugmentError> {
        let feasible = self
            .shifts
            .clone()
            .filter(|&s| match extremes {
                Some((low, high)) => low + s >= self.min_pitch && high + s <= self.max_pitch,
                None => true,
            })
            .collect::<Vec<_>>();

        if feasible.is_empty() {
            let (low, high) = extremes.unwrap_or((self.min_pitch, self.max_pitch));
            return Err(AugmentError::Unsatisfiable {
                low,
                high,
                min_pitch: self.min_pitch,
                max_pitch: self.max_pitch,
                shifts: self.shifts.clone(),
            });
        }

        Ok(feasible)
    }

    /// Draws one feasible shift uniformly and applies it to the whole window.
    pub fn augment<A: EventAdapter, R: Rng + ?Sized>(
        &self,
        adapter: &A,
        events: &[A::Event],
        rng: &mut R,
    ) -> Result<(i32, Vec<A::Event>), AugmentError> {
        let feasible = self.feasible_shifts(Self::extreme_pitches(adapter, events))?;
        let shift = *feasible.choose(rng).unwrap_or(&0);

        Ok((shift, transpose_events(adapter, events, shift)?))
    }
}

pub fn transpose_events<A: EventAdapter>(
    adapter: &A,
    events: &[A::Event],
    semitones: i32,
) -> Result<Vec<A::Event>, AugmentError> {
    events
        .iter()
        .map(|ev| adapter.transpose(ev, semitones))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn pitch(p: i64) -> NamedEvent {
        NamedEvent::new(NOTE_PITCH, EventValue::Int(p))
    }

    fn chord(value: &str) -> NamedEvent {
        NamedEvent::new(CHORD, EventValue::Text(value.to_owned()))
    }

    fn window() -> Vec<NamedEvent> {
        vec![
            NamedEvent::new(BAR, EventValue::None),
            chord("C_M"),
            pitch(40),
            NamedEvent::new("Note_Velocity", EventValue::Int(20)),
            pitch(100),
            chord(NO_CHORD),
        ]
    }

    #[test]
    fn chord_roots_rotate_by_pitch_class() {
        assert_eq!(transpose_chord("C_M", 2).unwrap(), "D_M");
        assert_eq!(transpose_chord("G#_m7", 1).unwrap(), "A_m7");
        assert_eq!(transpose_chord("A_m", -1).unwrap(), "G#_m");
        assert_eq!(transpose_chord(NO_CHORD, 5).unwrap(), NO_CHORD);
        assert!(transpose_chord("H_M", 1).is_err());
    }

    #[test]
    fn augmented_pitches_stay_in_band() {
        let augmenter = PitchAugmenter::new(-6..=6, 22, 107);
        let mut rng = StdRng::seed_from_u64(7);
        let events = window();

        for _ in 0..200 {
            let (shift, out) = augmenter.augment(&NamedEventAdapter, &events, &mut rng).unwrap();
            assert_eq!(out.len(), events.len());
            assert!((-6..=6).contains(&shift));
            for ev in out.iter() {
                if let Some(p) = NamedEventAdapter.pitch(ev) {
                    assert!((22..=107).contains(&p));
                }
            }
            assert_eq!(out[5], chord(NO_CHORD));
            assert_eq!(out[3], events[3]);
        }
    }

    #[test]
    fn feasible_shifts_are_clipped_to_band() {
        let augmenter = PitchAugmenter::new(-6..=6, 22, 107);
        let shifts = augmenter.feasible_shifts(Some((24, 104))).unwrap();
        assert_eq!(shifts, vec![-2, -1, 0, 1, 2, 3]);

        assert_eq!(augmenter.feasible_shifts(None).unwrap().len(), 13);
    }

    #[test]
    fn infeasible_band_is_an_error() {
        let augmenter = PitchAugmenter::new(-6..=6, 22, 107);
        let events = vec![pitch(10), pitch(120)];
        let mut rng = StdRng::seed_from_u64(1);

        let err = augmenter
            .augment(&NamedEventAdapter, &events, &mut rng)
            .unwrap_err();
        assert!(matches!(err, AugmentError::Unsatisfiable { low: 10, high: 120, .. }));
    }

    #[test]
    fn token_adapter_shifts_note_on_ids() {
        let vocab = Vocabulary::remi(24).unwrap();
        let adapter = TokenAdapter::new(&vocab).unwrap();
        let on_60 = vocab.id("note_on_60").unwrap();
        let on_63 = vocab.id("note_on_63").unwrap();
        let pos_0 = vocab.id("position_0").unwrap();

        assert_eq!(adapter.pitch(&on_60), Some(60));
        assert_eq!(adapter.pitch(&pos_0), None);
        assert_eq!(adapter.transpose(&on_60, 3).unwrap(), on_63);
        assert_eq!(adapter.transpose(&pos_0, 3).unwrap(), pos_0);
        assert!(adapter.is_bar(&0));
        assert!(adapter.transpose(&on_60, 100).is_err());
    }
}
