use anyhow::{Result, bail};
use log::warn;

/// A song's token stream and the positions where its bars start.
///
/// `bar_pos` always holds one entry per bar plus a final entry equal to
/// `events.len()`, so bar `b` spans `bar_pos[b]..bar_pos[b + 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece<E> {
    pub events: Vec<E>,
    pub bar_pos: Vec<usize>,
}

impl<E> Piece<E> {
    /// Wraps a stream whose bar starts are known exactly, e.g. straight from the encoder.
    pub fn from_events(events: Vec<E>, is_bar: impl Fn(&E) -> bool) -> Result<Self> {
        let mut bar_pos = scan_bar_positions(&events, is_bar);
        if bar_pos.is_empty() {
            bail!("Token stream contains no bar markers..!");
        }
        bar_pos.push(events.len());
        Ok(Self { events, bar_pos })
    }

    pub fn n_bars(&self) -> usize {
        self.bar_pos.len().saturating_sub(1)
    }
}

pub fn scan_bar_positions<E>(events: &[E], is_bar: impl Fn(&E) -> bool) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, ev)| is_bar(ev))
        .map(|(i, _)| i)
        .collect()
}

/// Repairs a stored boundary list so that it ends with exactly one terminator at `len`.
///
/// A terminator that was already stored is dropped first, then a final bar of
/// exactly two tokens (bar marker + end of sequence) is treated as empty and
/// folded away. The last remaining bar start is never removed.
pub fn normalize_bar_positions(
    piece_id: &str,
    mut bar_pos: Vec<usize>,
    len: usize,
) -> Result<Vec<usize>> {
    if bar_pos.is_empty() {
        bail!("Piece {} has no bar positions..!", piece_id);
    }

    if bar_pos.windows(2).any(|w| w[0] > w[1]) || bar_pos.last().is_some_and(|&b| b > len) {
        bail!(
            "Piece {} has bar positions that are unsorted or exceed its {} tokens..!",
            piece_id,
            len
        );
    }

    if bar_pos.len() > 1 && bar_pos.last() == Some(&len) {
        warn!("Piece {}, got appended bar markers..!", piece_id);
        bar_pos.pop();
    }

    if bar_pos.len() > 1 && bar_pos.last().is_some_and(|&b| len - b == 2) {
        warn!("Piece {}, got an empty trailing bar..!", piece_id);
        bar_pos.pop();
    }

    bar_pos.push(len);
    Ok(bar_pos)
}
