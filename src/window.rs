use anyhow::{Result, bail};
use log::debug;
use rand::Rng;

/// A bar-aligned slice of a piece, in window-local coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Window<E> {
    pub start_bar: usize,
    /// Exactly `max_bars + 1` entries, padded bars repeat the final position.
    pub bar_pos: Vec<usize>,
    /// Real (unpadded) bars in the window.
    pub n_bars: usize,
    pub events: Vec<E>,
}

/// Chooses the first bar of a window over a piece of `n_bars` bars.
pub fn pick_start_bar<R: Rng + ?Sized>(
    n_bars: usize,
    max_bars: usize,
    appointed: Option<usize>,
    rng: &mut R,
) -> usize {
    if n_bars < max_bars {
        return 0;
    }

    let last_start = n_bars - max_bars;
    match appointed {
        None => rng.gen_range(0..=last_start),
        Some(start) if start <= last_start => start,
        Some(_) => 0,
    }
}

/// Cuts at most `max_bars` bars out of a piece with normalized `bar_pos`.
pub fn sample_window<E: Clone, R: Rng + ?Sized>(
    events: &[E],
    bar_pos: &[usize],
    max_bars: usize,
    appointed: Option<usize>,
    rng: &mut R,
) -> Result<Window<E>> {
    if max_bars == 0 {
        bail!("A window must hold at least one bar..!");
    }
    if bar_pos.len() < 2 || bar_pos.last() != Some(&events.len()) {
        bail!(
            "Bar positions {:?} do not terminate the {} events of the piece..!",
            bar_pos,
            events.len()
        );
    }

    let n_bars = bar_pos.len() - 1;
    let start_bar = pick_start_bar(n_bars, max_bars, appointed, rng);

    let window = if n_bars >= max_bars {
        let offset = bar_pos[start_bar];
        Window {
            start_bar,
            bar_pos: bar_pos[start_bar..=start_bar + max_bars]
                .iter()
                .map(|&b| b - offset)
                .collect(),
            n_bars: max_bars,
            events: events[offset..bar_pos[start_bar + max_bars]].to_vec(),
        }
    } else {
        let mut padded = bar_pos.to_vec();
        padded.resize(max_bars + 1, events.len());
        Window {
            start_bar,
            bar_pos: padded,
            n_bars,
            events: events.to_vec(),
        }
    };

    debug!(
        "Window at bar {} with {} of {} bars, {} events",
        window.start_bar,
        window.n_bars,
        n_bars,
        window.events.len()
    );

    Ok(window)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// `n` bars of 3 tokens each: bar marker, then two bar-numbered tokens.
    fn piece(n: usize) -> (Vec<usize>, Vec<usize>) {
        let events = (0..n).flat_map(|b| [0, b + 1, b + 1]).collect::<Vec<_>>();
        let bar_pos = (0..=n).map(|b| b * 3).collect();
        (events, bar_pos)
    }

    #[test]
    fn exact_fit_starts_at_zero() {
        let (events, bar_pos) = piece(4);
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..20 {
            let w = sample_window(&events, &bar_pos, 4, None, &mut rng).unwrap();
            assert_eq!(w.start_bar, 0);
            assert_eq!(w.n_bars, 4);
            assert_eq!(w.bar_pos, vec![0, 3, 6, 9, 12]);
            assert_eq!(w.events, events);
        }
    }

    #[test]
    fn single_bar_is_padded() {
        let (events, bar_pos) = piece(1);
        let mut rng = StdRng::seed_from_u64(3);

        let w = sample_window(&events, &bar_pos, 16, None, &mut rng).unwrap();
        assert_eq!(w.n_bars, 1);
        assert_eq!(w.bar_pos.len(), 17);
        assert_eq!(w.bar_pos[0], 0);
        assert_eq!(w.bar_pos.iter().filter(|&&b| b == 3).count(), 16);
    }

    #[test]
    fn random_windows_are_local() {
        let (events, bar_pos) = piece(10);
        let mut rng = StdRng::seed_from_u64(11);
        let mut seen = [false; 7];

        for _ in 0..300 {
            let w = sample_window(&events, &bar_pos, 4, None, &mut rng).unwrap();
            assert!(w.start_bar <= 6);
            seen[w.start_bar] = true;

            assert_eq!(w.bar_pos, vec![0, 3, 6, 9, 12]);
            assert_eq!(w.events.len(), 12);
            assert_eq!(w.events[1], w.start_bar + 1);
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn appointed_start_bar() {
        let (events, bar_pos) = piece(10);
        let mut rng = StdRng::seed_from_u64(0);

        let w = sample_window(&events, &bar_pos, 4, Some(6), &mut rng).unwrap();
        assert_eq!(w.start_bar, 6);
        assert_eq!(w.events[1], 7);

        let w = sample_window(&events, &bar_pos, 4, Some(7), &mut rng).unwrap();
        assert_eq!(w.start_bar, 0);
    }

    #[test]
    fn rejects_unterminated_positions() {
        let (events, _) = piece(2);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(sample_window(&events, &[0, 3], 4, None, &mut rng).is_err());
    }
}
