use crate::model::event::{Event, MAX_TEMPO, MIN_TEMPO};
use crate::model::music::Music;
use crate::vocab::MAX_RESOLUTION;
use anyhow::{Result, bail};
use log::debug;

/// Maps a tick onto a `(measure index, position)` pair within a table of bar starts.
#[derive(Debug, Clone)]
pub struct TimeQuantizer {
    boundaries: Vec<u64>,
    resolution: u32,
}

impl TimeQuantizer {
    pub fn new(barlines: &[u64], resolution: u32) -> Result<Self> {
        if resolution == 0 {
            bail!("Quantizer resolution must be positive..!");
        }

        let mut boundaries = barlines.to_vec();
        if boundaries.first() != Some(&0) {
            boundaries.insert(0, 0);
        }
        boundaries.sort_unstable();
        boundaries.dedup();

        if boundaries.len() < 2 {
            bail!("At least two distinct bar lines are needed to measure a bar..!");
        }

        Ok(Self {
            boundaries,
            resolution,
        })
    }

    pub fn boundaries(&self) -> &[u64] {
        &self.boundaries
    }

    /// Ticks spanned by a measure. The last measure has no closing bar line,
    /// so it borrows the length of the one before it. That is an estimate
    /// and can be wrong for a final bar in a different meter.
    pub fn measure_length(&self, measure_idx: usize) -> u64 {
        let last = self.boundaries.len() - 1;
        if measure_idx < last {
            self.boundaries[measure_idx + 1] - self.boundaries[measure_idx]
        } else {
            self.boundaries[last] - self.boundaries[last - 1]
        }
    }

    /// Position is rounded up to the next subdivision and then wrapped, so a
    /// time just before the next bar line lands on position 0 of its own bar.
    pub fn quantize(&self, time: u64) -> (usize, u32) {
        let measure_idx = self.boundaries.partition_point(|&b| b <= time) - 1;
        let offset = time - self.boundaries[measure_idx];
        let length = self.measure_length(measure_idx);
        let res = self.resolution as u64;

        let position = (res * offset).div_ceil(length);
        (measure_idx, (position % res) as u32)
    }
}

/// Converts a music timeline into an ordered REMI event stream.
///
/// A timeline at another tick rate is first rescaled to `resolution` ticks per quarter note.
pub fn encode_remi(music: &Music, resolution: u32) -> Result<Vec<Event>> {
    if resolution > MAX_RESOLUTION {
        bail!(
            "Resolution {} cannot be encoded, durations up to {} steps would be clamped out of range..!",
            resolution,
            2 * resolution
        );
    }

    if music.resolution == 0 {
        bail!("Music declares zero ticks per quarter note..!");
    }
    let adjusted;
    let music = if music.resolution != resolution {
        debug!(
            "Rescaling music from {} to {} ticks per quarter note",
            music.resolution, resolution
        );
        adjusted = music.adjust_resolution(resolution);
        &adjusted
    } else {
        music
    };

    let notes = music.sounding_notes().collect::<Vec<_>>();
    if notes.is_empty() {
        bail!("No notes found..!");
    }

    let quantizer = TimeQuantizer::new(&music.barlines, resolution)?;
    let max_duration = 2 * resolution as u64;

    let mut groups: Vec<((usize, u32), Vec<Event>)> = Vec::new();
    for &bar_time in quantizer.boundaries() {
        groups.push((quantizer.quantize(bar_time), vec![Event::Bar]));
    }

    for tempo in music.tempos.iter() {
        let qpm = (tempo.qpm.round() as i64).clamp(MIN_TEMPO as i64, MAX_TEMPO as i64) as u32;
        groups.push((quantizer.quantize(tempo.time), vec![Event::Tempo(qpm)]));
    }

    for note in notes.into_iter() {
        groups.push((
            quantizer.quantize(note.time),
            vec![
                Event::NoteOn(note.pitch.min(127)),
                Event::NoteVelocity(Event::velocity_bucket(note.velocity)),
                Event::NoteDuration(note.duration.clamp(1, max_duration) as u32),
            ],
        ));
    }

    // stable, so bars stay ahead of tempos which stay ahead of notes
    groups.sort_by_key(|(key, _)| *key);

    let mut events = Vec::with_capacity(groups.len() * 4 + 1);
    for ((_, position), group) in groups.into_iter() {
        if !group[0].is_bar() {
            events.push(Event::Position(position));
        }
        events.extend(group);
    }
    events.push(Event::EndOfSequence);

    debug!(
        "Encoded {} bars into {} events",
        quantizer.boundaries().len(),
        events.len()
    );

    Ok(events)
}
