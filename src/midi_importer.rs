use crate::model::music::*;
use anyhow::{Result, anyhow, bail};
use log::{debug, warn};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const DEFAULT_MPQN: u32 = 500_000;
const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;
/// Sixty-fourth notes are the shortest beat a time signature may name.
const MAX_DENOMINATOR_POW: u8 = 6;

struct NoteInterval {
    pub midi: u8,
    pub start_tick: u64,
    pub end_tick: u64,
    pub velocity: u8,
}

#[derive(Debug, Clone, Copy)]
struct Meter {
    tick: u64,
    numerator: u64,
    denominator_pow: u32,
}

pub fn import_midi_file<P: AsRef<Path>>(path: P, resolution: u32) -> Result<Music> {
    let bytes = fs::read(path.as_ref()).map_err(|e| {
        anyhow!(
            "Failed to read MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;

    let mut music = midi_bytes_to_music(&bytes, resolution)?;
    music.metadata.title = path
        .as_ref()
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string());

    Ok(music)
}

/// Parses a standard MIDI file into a `Music` timeline with `resolution` ticks per quarter note.
/// All tracks are merged, bar lines come from the time signature metas (4/4 until one appears).
pub fn midi_bytes_to_music(bytes: &[u8], resolution: u32) -> Result<Music> {
    if resolution == 0 {
        return Err(anyhow!("Target resolution must be positive..!"));
    }

    let smf = Smf::parse(bytes).map_err(|e| anyhow!("Failed to parse MIDI: {:?}", e))?;

    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(t) => t.as_int() as u64,
        Timing::Timecode(_fps, _subframe) => {
            return Err(anyhow!(
                "SMPTE timecode midi timing is not currently supported..!"
            ));
        }
    };

    if ticks_per_quarter == 0 {
        return Err(anyhow!("MIDI header declares zero ticks per quarter note..!"));
    }

    debug!("Ticks per quarter note: {}", ticks_per_quarter);
    debug!(
        "MIDI format: {:?}, tracks: {}",
        smf.header.format,
        smf.tracks.len()
    );

    let mut tempo_changes: Vec<(u64, u32)> = Vec::new();
    let mut meters: Vec<Meter> = Vec::new();
    let mut intervals: Vec<NoteInterval> = Vec::new();
    let mut open_notes: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();

    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut abs_tick: u64 = 0;
        for event in track.iter() {
            abs_tick = abs_tick.saturating_add(event.delta.as_int() as u64);

            match &event.kind {
                TrackEventKind::Meta(meta) => match meta {
                    MetaMessage::Tempo(micro) => {
                        let mpqn: u32 = micro.as_int();
                        tempo_changes.push((abs_tick, mpqn));
                        debug!(
                            "Tempo change at tick {} -> {} us/qn (track {})",
                            abs_tick, mpqn, track_idx
                        );
                    }
                    MetaMessage::TimeSignature(numerator, denominator_pow, _, _) => {
                        if *denominator_pow > MAX_DENOMINATOR_POW {
                            bail!(
                                "Time signature {}/2^{} at tick {} is not a playable meter..!",
                                numerator,
                                denominator_pow,
                                abs_tick
                            );
                        }
                        meters.push(Meter {
                            tick: abs_tick,
                            numerator: (*numerator).max(1) as u64,
                            denominator_pow: *denominator_pow as u32,
                        });
                    }
                    _ => {}
                },
                TrackEventKind::Midi { channel, message } => {
                    let ch: u8 = channel.as_int();

                    match message {
                        MidiMessage::NoteOn { key, vel } => {
                            let velocity: u8 = vel.as_int();

                            if velocity == 0 {
                                close_note(
                                    &mut open_notes,
                                    &mut intervals,
                                    ch,
                                    key.as_int(),
                                    abs_tick,
                                );
                            } else {
                                open_notes
                                    .entry((ch, key.as_int()))
                                    .or_default()
                                    .push((abs_tick, velocity));
                            }
                        }
                        MidiMessage::NoteOff { key, vel: _ } => {
                            close_note(&mut open_notes, &mut intervals, ch, key.as_int(), abs_tick);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    let last_tick_estimate = intervals
        .iter()
        .map(|interval| interval.end_tick)
        .max()
        .unwrap_or(0)
        .max(
            tempo_changes
                .iter()
                .map(|(tick, _)| *tick)
                .max()
                .unwrap_or(0),
        );

    for ((ch, key), stack) in open_notes.into_iter() {
        for (start_tick, start_vel) in stack {
            let end_tick = if last_tick_estimate > start_tick {
                last_tick_estimate
            } else {
                start_tick + ticks_per_quarter
            };

            intervals.push(NoteInterval {
                midi: key,
                start_tick,
                end_tick,
                velocity: start_vel,
            });

            warn!(
                "Unclosed NoteOn for {}, channel: {} at tick: {} auto-closing at: {}..!",
                key, ch, start_tick, end_tick
            );
        }
    }

    let rescale = |tick: u64| -> u64 {
        (tick * resolution as u64 + ticks_per_quarter / 2) / ticks_per_quarter
    };

    let mut music = Music::new(resolution);

    intervals.sort_by_key(|interval| (interval.start_tick, interval.midi));
    for interval in intervals.into_iter() {
        let time = rescale(interval.start_tick);
        let end = rescale(interval.end_tick);

        if end <= time {
            debug!(
                "Note {} at tick {} is shorter than one step at resolution {}..!",
                interval.midi, interval.start_tick, resolution
            );
        }

        music.notes.push(Note {
            pitch: interval.midi,
            velocity: interval.velocity,
            time,
            duration: end.saturating_sub(time),
        });
    }

    tempo_changes.sort_by_key(|(tick, _)| *tick);
    if tempo_changes.is_empty() {
        tempo_changes.push((0, DEFAULT_MPQN));
    }
    for (tick, mpqn) in tempo_changes.into_iter() {
        music.tempos.push(Tempo {
            time: rescale(tick),
            qpm: MICROSECONDS_PER_MINUTE / mpqn.max(1) as f64,
        });
    }

    let end = music
        .notes
        .iter()
        .map(|note| note.time + note.duration)
        .max()
        .unwrap_or(0);
    music.barlines = barlines(&meters, resolution as u64, end, &rescale);

    debug!(
        "Imported {} notes, {} tempo changes and {} bar lines",
        music.notes.len(),
        music.tempos.len(),
        music.barlines.len()
    );

    Ok(music)
}

/// Lays bar lines from tick 0 until one closes the bar containing `end`.
/// A meter change restarts the bar grid at its own tick.
fn barlines(meters: &[Meter], resolution: u64, end: u64, rescale: &dyn Fn(u64) -> u64) -> Vec<u64> {
    let mut meters = meters.to_vec();
    meters.sort_by_key(|m| m.tick);
    if meters.first().map(|m| m.tick) != Some(0) {
        meters.insert(
            0,
            Meter {
                tick: 0,
                numerator: 4,
                denominator_pow: 2,
            },
        );
    }

    let mut lines = Vec::new();
    for (i, meter) in meters.iter().enumerate() {
        let start = rescale(meter.tick);
        let next = meters.get(i + 1).map(|m| rescale(m.tick));
        let bar_len = (meter.numerator * resolution * 4)
            .checked_shr(meter.denominator_pow)
            .unwrap_or(0)
            .max(1);

        let mut t = start;
        loop {
            match next {
                Some(limit) if t >= limit => break,
                None if t > end && lines.len() >= 2 && lines.last().is_some_and(|&l| l >= end) => {
                    break;
                }
                _ => {}
            }
            if lines.last() != Some(&t) {
                lines.push(t);
            }
            t += bar_len;
        }
    }

    lines
}

fn close_note(
    open_notes: &mut HashMap<(u8, u8), Vec<(u64, u8)>>,
    intervals: &mut Vec<NoteInterval>,
    ch: u8,
    midi_num: u8,
    abs_tick: u64,
) {
    if let Some(stack) = open_notes.get_mut(&(ch, midi_num))
        && let Some((start_tick, start_vel)) = stack.pop()
    {
        intervals.push(NoteInterval {
            midi: midi_num,
            start_tick,
            end_tick: abs_tick,
            velocity: start_vel,
        });
    } else {
        debug!(
            "Orphaned NoteOff for {} ch{} at tick {}..!",
            midi_num, ch, abs_tick
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encoder::encode_remi;
    use crate::model::event::Event;
    use midly::num::{u4, u7, u15, u24, u28};
    use midly::{Format, Header, TrackEvent};

    fn ev(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    fn note_on(key: u8, vel: u8) -> TrackEventKind<'static> {
        TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(vel),
            },
        }
    }

    fn note_off(key: u8) -> TrackEventKind<'static> {
        TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            },
        }
    }

    /// Two bars of 4/4 at 480 tpq: C4 quarter on beat one, E4 half note in bar two.
    fn fixture() -> Vec<u8> {
        fixture_with_meter(4, 2)
    }

    fn fixture_with_meter(numerator: u8, denominator_pow: u8) -> Vec<u8> {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(480)),
        ));
        smf.tracks.push(vec![
            ev(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000)))),
            ev(
                0,
                TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denominator_pow, 24, 8)),
            ),
            ev(0, note_on(60, 100)),
            ev(480, note_off(60)),
            ev(1440, note_on(64, 80)),
            ev(960, note_on(64, 0)),
            ev(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ]);

        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn midi_import_rescales_ticks() {
        env_logger::try_init().unwrap_or(());

        let music = midi_bytes_to_music(&fixture(), 24).unwrap();

        assert_eq!(music.notes.len(), 2);
        assert_eq!(music.notes[0].pitch, 60);
        assert_eq!(music.notes[0].time, 0);
        assert_eq!(music.notes[0].duration, 24);
        assert_eq!(music.notes[1].pitch, 64);
        assert_eq!(music.notes[1].time, 96);
        assert_eq!(music.notes[1].duration, 48);

        assert_eq!(music.tempos.len(), 1);
        assert!((music.tempos[0].qpm - 120.0).abs() < 1e-9);
    }

    #[test]
    fn midi_import_lays_bar_lines() {
        env_logger::try_init().unwrap_or(());

        let music = midi_bytes_to_music(&fixture(), 24).unwrap();
        assert_eq!(&music.barlines[..3], &[0, 96, 192]);
    }

    #[test]
    fn imported_music_encodes() {
        env_logger::try_init().unwrap_or(());

        let music = midi_bytes_to_music(&fixture(), 24).unwrap();
        let events = encode_remi(&music, 24).unwrap();

        assert_eq!(events[0], Event::Bar);
        assert_eq!(events.last(), Some(&Event::EndOfSequence));
        assert!(events.contains(&Event::NoteOn(60)));
        assert!(events.contains(&Event::NoteOn(64)));
        assert!(events.contains(&Event::Tempo(120)));
    }

    #[test]
    fn rejects_malformed_time_signature() {
        env_logger::try_init().unwrap_or(());

        assert!(midi_bytes_to_music(&fixture_with_meter(4, 64), 24).is_err());
        assert!(midi_bytes_to_music(&fixture_with_meter(4, 7), 24).is_err());

        let music = midi_bytes_to_music(&fixture_with_meter(6, 3), 24).unwrap();
        assert_eq!(&music.barlines[..3], &[0, 72, 144]);
    }

    #[test]
    fn bar_length_never_reaches_zero() {
        let meters = [Meter {
            tick: 0,
            numerator: 1,
            denominator_pow: 64,
        }];
        assert_eq!(barlines(&meters, 1, 2, &|t| t), vec![0, 1, 2]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(midi_bytes_to_music(b"not a midi file", 24).is_err());
    }
}
