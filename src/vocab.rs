use crate::model::event::{Event, MAX_DURATION, MAX_TEMPO, MIN_TEMPO, VELOCITY_BUCKETS};
use anyhow::{Result, anyhow, bail};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

pub const MAX_RESOLUTION: u32 = MAX_DURATION / 2;

/// Names of the structural entries a pipeline looks up in its vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VocabKeys {
    pub bar: &'static str,
    pub eos: &'static str,
}

impl VocabKeys {
    pub const REMI: VocabKeys = VocabKeys {
        bar: "bar",
        eos: "eos",
    };

    pub const NAMED: VocabKeys = VocabKeys {
        bar: "Bar_None",
        eos: "EOS_None",
    };
}

/// Bijection between event-id strings and dense ids `[0, len)`.
///
/// The pad code is not part of the bijection: consumers use `pad_id() == len()`.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    event_to_id: HashMap<String, u32>,
    id_to_event: Vec<String>,
    resolution: Option<u32>,
}

impl Vocabulary {
    /// Enumerates the REMI event ids in their fixed order.
    pub fn remi(resolution: u32) -> Result<Self> {
        if resolution == 0 || resolution > MAX_RESOLUTION {
            bail!(
                "Resolution {} is outside the supported range [1..={}]..!",
                resolution,
                MAX_RESOLUTION
            );
        }

        let mut names: Vec<String> = vec![Event::Bar.to_string(), Event::EndOfSequence.to_string()];
        names.extend((0..=127u8).map(|p| Event::NoteOn(p).to_string()));
        names.extend((1..=MAX_DURATION).map(|d| Event::NoteDuration(d).to_string()));
        names.extend((0..VELOCITY_BUCKETS).map(|v| Event::NoteVelocity(v).to_string()));
        names.extend((0..resolution).map(|p| Event::Position(p).to_string()));
        names.extend((MIN_TEMPO..=MAX_TEMPO).map(|q| Event::Tempo(q).to_string()));

        Self::from_names(names)
    }

    /// Expected size of `Vocabulary::remi(resolution)`.
    pub fn remi_len(resolution: u32) -> usize {
        2 + 128
            + MAX_DURATION as usize
            + VELOCITY_BUCKETS as usize
            + resolution as usize
            + (MAX_TEMPO - MIN_TEMPO + 1) as usize
    }

    fn from_names(names: Vec<String>) -> Result<Self> {
        let mut event_to_id = HashMap::with_capacity(names.len());
        for (id, name) in names.iter().enumerate() {
            if event_to_id.insert(name.clone(), id as u32).is_some() {
                bail!("Duplicate event id '{}' in vocabulary..!", name);
            }
        }

        let positions = names
            .iter()
            .filter(|name| matches!(name.parse::<Event>(), Ok(Event::Position(_))))
            .count() as u32;
        let resolution = (positions > 0
            && (0..positions).all(|p| event_to_id.contains_key(&Event::Position(p).to_string())))
        .then_some(positions);

        Ok(Self {
            event_to_id,
            id_to_event: names,
            resolution,
        })
    }

    /// Builds a vocabulary from an externally supplied mapping, which must be dense.
    pub fn from_map(map: BTreeMap<String, u32>) -> Result<Self> {
        let mut names: Vec<Option<String>> = vec![None; map.len()];
        for (name, id) in map.into_iter() {
            let slot = names
                .get_mut(id as usize)
                .ok_or_else(|| anyhow!("Vocabulary id {} for '{}' is not dense..!", id, name))?;
            if let Some(other) = slot.as_ref() {
                bail!("Vocabulary id {} is shared by '{}' and '{}'..!", id, other, name);
            }
            *slot = Some(name);
        }

        let names = names.into_iter().collect::<Option<Vec<_>>>();
        match names {
            Some(names) => Self::from_names(names),
            None => Err(anyhow!("Vocabulary ids do not cover a dense range..!")),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path.as_ref()).map_err(|e| {
            anyhow!(
                "Failed to read vocabulary file {}: {}",
                path.as_ref().display(),
                e
            )
        })?;
        let map: BTreeMap<String, u32> = serde_json::from_slice(&bytes)?;
        let vocab = Self::from_map(map)?;
        debug!(
            "Loaded vocabulary of {} entries from {}",
            vocab.len(),
            path.as_ref().display()
        );

        Ok(vocab)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let map: BTreeMap<&str, u32> = self
            .id_to_event
            .iter()
            .enumerate()
            .map(|(id, name)| (name.as_str(), id as u32))
            .collect();
        fs::write(path.as_ref(), serde_json::to_vec_pretty(&map)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.id_to_event.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_event.is_empty()
    }

    /// Subdivisions per bar, when the position ids form a contiguous `0..resolution` run.
    pub fn resolution(&self) -> Option<u32> {
        self.resolution
    }

    /// Fails unless this vocabulary encodes exactly `resolution` positions per bar.
    pub fn ensure_resolution(&self, resolution: u32) -> Result<()> {
        match self.resolution {
            Some(r) if r == resolution => Ok(()),
            Some(r) => bail!(
                "Vocabulary holds {} positions per bar but events use resolution {}..!",
                r,
                resolution
            ),
            None => bail!(
                "Vocabulary has no position ids to check resolution {} against..!",
                resolution
            ),
        }
    }

    pub fn pad_id(&self) -> u32 {
        self.len() as u32
    }

    pub fn id(&self, event: &str) -> Option<u32> {
        self.event_to_id.get(event).copied()
    }

    pub fn require(&self, event: &str) -> Result<u32> {
        self.id(event)
            .ok_or_else(|| anyhow!("Event '{}' is not in the vocabulary..!", event))
    }

    pub fn event(&self, id: u32) -> Option<&str> {
        self.id_to_event.get(id as usize).map(String::as_str)
    }

    pub fn encode(&self, events: &[Event]) -> Result<Vec<u32>> {
        events
            .iter()
            .map(|ev| self.require(&ev.to_string()))
            .collect()
    }

    pub fn decode(&self, ids: &[u32]) -> Result<Vec<Event>> {
        ids.iter()
            .map(|&id| {
                self.event(id)
                    .ok_or_else(|| anyhow!("Id {} is outside the vocabulary..!", id))?
                    .parse()
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn remi_vocab_is_bijective() {
        let vocab = Vocabulary::remi(24).unwrap();
        assert_eq!(vocab.len(), Vocabulary::remi_len(24));
        assert_eq!(vocab.len(), 2 + 128 + 64 + 32 + 24 + 180);

        for id in 0..vocab.len() as u32 {
            let name = vocab.event(id).unwrap();
            assert_eq!(vocab.id(name), Some(id));
        }
        assert_eq!(vocab.event(vocab.pad_id()), None);
    }

    #[test]
    fn remi_vocab_order() {
        let vocab = Vocabulary::remi(24).unwrap();
        assert_eq!(vocab.id("bar"), Some(0));
        assert_eq!(vocab.id("eos"), Some(1));
        assert_eq!(vocab.id("note_on_0"), Some(2));
        assert_eq!(vocab.id("note_duration_1"), Some(130));
        assert_eq!(vocab.id("note_velocity_0"), Some(194));
        assert_eq!(vocab.id("position_0"), Some(226));
        assert_eq!(vocab.id("tempo_30"), Some(250));
        assert_eq!(vocab.id("tempo_209"), Some(429));
        assert_eq!(vocab.id("position_24"), None);
    }

    #[test]
    fn rejects_unsupported_resolution() {
        assert!(Vocabulary::remi(0).is_err());
        assert!(Vocabulary::remi(MAX_RESOLUTION + 1).is_err());
    }

    #[test]
    fn from_map_requires_dense_ids() {
        let mut map = BTreeMap::new();
        map.insert("bar".to_owned(), 0);
        map.insert("eos".to_owned(), 2);
        assert!(Vocabulary::from_map(map.clone()).is_err());

        map.insert("eos".to_owned(), 1);
        let vocab = Vocabulary::from_map(map).unwrap();
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.pad_id(), 2);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");

        let vocab = Vocabulary::remi(16).unwrap();
        vocab.save(&path).unwrap();
        let loaded = Vocabulary::load(&path).unwrap();

        assert_eq!(loaded.len(), vocab.len());
        assert_eq!(loaded.id("position_15"), vocab.id("position_15"));
        assert_eq!(loaded.resolution(), Some(16));
    }

    #[test]
    fn resolution_mismatch_is_rejected() {
        let vocab = Vocabulary::remi(24).unwrap();
        assert!(vocab.ensure_resolution(24).is_ok());
        assert!(vocab.ensure_resolution(16).is_err());

        let mut map = BTreeMap::new();
        map.insert("bar".to_owned(), 0);
        map.insert("position_0".to_owned(), 1);
        map.insert("position_2".to_owned(), 2);
        let gapped = Vocabulary::from_map(map).unwrap();
        assert_eq!(gapped.resolution(), None);
        assert!(gapped.ensure_resolution(2).is_err());
    }
}
