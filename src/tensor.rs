use anyhow::{Result, bail};
use serde::Serialize;

/// Row-major rectangular array.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Clone> Matrix<T> {
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// # Panics
    ///
    /// Panics if `r` is not below the row count.
    pub fn row(&self, r: usize) -> &[T] {
        assert!(r < self.rows, "row {} out of {} rows", r, self.rows);
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// # Panics
    ///
    /// Panics if `r` is not below the row count.
    pub fn row_mut(&mut self, r: usize) -> &mut [T] {
        assert!(r < self.rows, "row {} out of {} rows", r, self.rows);
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn get(&self, r: usize, c: usize) -> Option<&T> {
        if r < self.rows && c < self.cols {
            self.data.get(r * self.cols + c)
        } else {
            None
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DecoderTensors {
    pub input: Vec<u32>,
    pub target: Vec<u32>,
    pub length: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EncoderTensors {
    /// `(max_bars, seqlen)` bar-wise tokens.
    pub input: Matrix<u32>,
    /// `true` marks padding.
    pub padding_mask: Matrix<bool>,
    /// Untruncated token count of each bar.
    pub lengths: Vec<usize>,
}

/// Columns left unmasked in every encoder row, even for empty bars.
pub const MIN_UNMASKED: usize = 2;

/// Shifted input/target pair for next-token training.
///
/// With `pad_to_same` the sequence is padded with `pad` to `seqlen + 1`,
/// otherwise a single `end_pad` is appended.
pub fn build_decoder(
    tokens: &[u32],
    seqlen: usize,
    pad_to_same: bool,
    pad: u32,
    end_pad: u32,
) -> DecoderTensors {
    let mut seq = tokens.to_vec();
    if pad_to_same {
        if seq.len() < seqlen + 1 {
            seq.resize(seqlen + 1, pad);
        }
    } else {
        seq.push(end_pad);
    }

    let input = seq[..seq.len() - 1].iter().take(seqlen).copied().collect();
    let target = seq[1..].iter().take(seqlen).copied().collect();

    DecoderTensors {
        input,
        target,
        length: tokens.len().min(seqlen),
    }
}

/// Lays each bar of the window into its own padded row.
pub fn build_encoder(
    tokens: &[u32],
    bar_pos: &[usize],
    max_bars: usize,
    seqlen: usize,
    pad: u32,
) -> Result<EncoderTensors> {
    if bar_pos.len() != max_bars + 1 {
        bail!(
            "Encoder needs {} bar positions, got {}..!",
            max_bars + 1,
            bar_pos.len()
        );
    }
    if bar_pos.windows(2).any(|w| w[0] > w[1]) || bar_pos[max_bars] > tokens.len() {
        bail!(
            "Bar positions {:?} are not a partition of {} tokens..!",
            bar_pos,
            tokens.len()
        );
    }

    let mut input = Matrix::filled(max_bars, seqlen, pad);
    let mut padding_mask = Matrix::filled(max_bars, seqlen, true);
    let mut lengths = vec![0; max_bars];

    for (b, span) in bar_pos.windows(2).enumerate() {
        let (st, ed) = (span[0], span[1]);
        let bar = &tokens[st..ed];
        let unmasked = bar.len().max(MIN_UNMASKED).min(seqlen);

        padding_mask.row_mut(b)[..unmasked].fill(false);
        lengths[b] = bar.len();

        let kept = bar.len().min(seqlen);
        input.row_mut(b)[..kept].copy_from_slice(&bar[..kept]);
    }

    Ok(EncoderTensors {
        input,
        padding_mask,
        lengths,
    })
}

/// Broadcasts each real bar's label over that bar's decoder positions.
pub fn expand_bar_labels(labels: &[i64], bar_pos: &[usize], n_bars: usize, seqlen: usize) -> Vec<i64> {
    let mut expanded = vec![0; seqlen];
    for (b, span) in bar_pos.windows(2).take(n_bars).enumerate() {
        let st = span[0].min(seqlen);
        let ed = span[1].min(seqlen);
        let label = labels.get(b).copied().unwrap_or(0);
        expanded[st..ed].fill(label);
    }
    expanded
}
