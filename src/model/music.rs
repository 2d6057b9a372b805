use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    /// Onset in ticks.
    pub time: u64,
    /// Length in ticks, notes with a zero duration are never encoded.
    pub duration: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    pub time: u64,
    /// Quarter notes per minute.
    pub qpm: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Metadata {
    pub title: Option<String>,
}

/// A symbolic music timeline. All times are ticks at `resolution` ticks per quarter note.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Music {
    pub metadata: Metadata,
    pub resolution: u32,
    pub notes: Vec<Note>,
    pub tempos: Vec<Tempo>,
    pub barlines: Vec<u64>,
}

impl Music {
    pub fn new(resolution: u32) -> Self {
        Self {
            metadata: Metadata::default(),
            resolution,
            notes: Vec::new(),
            tempos: Vec::new(),
            barlines: Vec::new(),
        }
    }

    /// Copy of this timeline with every tick rescaled to `resolution` ticks per quarter note.
    /// Onsets and durations round to the nearest tick independently.
    pub fn adjust_resolution(&self, resolution: u32) -> Music {
        let (src, dst) = (self.resolution.max(1) as u64, resolution as u64);
        let rescale = |tick: u64| (tick * dst + src / 2) / src;

        Music {
            metadata: self.metadata.clone(),
            resolution,
            notes: self
                .notes
                .iter()
                .map(|note| Note {
                    time: rescale(note.time),
                    duration: rescale(note.duration),
                    ..*note
                })
                .collect(),
            tempos: self
                .tempos
                .iter()
                .map(|tempo| Tempo {
                    time: rescale(tempo.time),
                    qpm: tempo.qpm,
                })
                .collect(),
            barlines: self.barlines.iter().map(|&tick| rescale(tick)).collect(),
        }
    }

    /// Notes that actually sound, in insertion order.
    pub fn sounding_notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|note| note.duration > 0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn adjust_resolution_rescales_every_timeline() {
        let mut music = Music::new(480);
        music.barlines = vec![0, 1920, 3840];
        music.notes.push(Note {
            pitch: 60,
            velocity: 100,
            time: 2160,
            duration: 490,
        });
        music.tempos.push(Tempo {
            time: 1920,
            qpm: 90.0,
        });

        let adjusted = music.adjust_resolution(24);
        assert_eq!(adjusted.resolution, 24);
        assert_eq!(adjusted.barlines, vec![0, 96, 192]);
        assert_eq!((adjusted.notes[0].time, adjusted.notes[0].duration), (108, 25));
        assert_eq!(adjusted.notes[0].pitch, 60);
        assert_eq!(adjusted.tempos[0].time, 96);
    }
}
