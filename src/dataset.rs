use crate::augment::{AugmentError, EventAdapter, PitchAugmenter};
use crate::model::config::{DatasetConfig, DecEndPad};
use crate::piece::{Piece, normalize_bar_positions, scan_bar_positions};
use crate::store::{AttributeLabels, PieceStore, sort_piece_ids};
use crate::tensor::{Matrix, build_decoder, build_encoder, expand_bar_labels};
use crate::vocab::Vocabulary;
use crate::window::sample_window;
use anyhow::{Result, anyhow, bail};
use log::{debug, info, warn};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

const PROGRESS_EVERY: usize = 200;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AttributeSample {
    /// Label of the bar each decoder position belongs to, 0 past the real bars.
    pub per_token: Vec<i64>,
    /// One label per window bar, 0 for padded bars.
    pub per_bar: Vec<i64>,
}

/// One training example. Every array has a shape fixed by the dataset config.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: usize,
    pub piece_id: String,
    pub st_bar_id: usize,
    pub bar_pos: Vec<usize>,
    pub enc_input: Matrix<u32>,
    pub enc_padding_mask: Matrix<bool>,
    pub enc_length: Vec<usize>,
    pub enc_n_bars: usize,
    pub dec_input: Vec<u32>,
    pub dec_target: Vec<u32>,
    pub length: usize,
    pub attributes: BTreeMap<String, AttributeSample>,
}

/// Turns one piece into a sample: window, augmentation, tokenization, tensors.
#[derive(Debug, Clone)]
pub struct SamplePipeline<A: EventAdapter> {
    adapter: A,
    vocab: Vocabulary,
    config: DatasetConfig,
    augmenter: PitchAugmenter,
    bar_token: u32,
    eos_token: u32,
    pad_token: u32,
}

impl<A: EventAdapter> SamplePipeline<A> {
    pub fn new(adapter: A, vocab: Vocabulary, config: DatasetConfig) -> Result<Self> {
        config.validate()?;

        let keys = adapter.vocab_keys();
        let bar_token = vocab.require(keys.bar)?;
        let eos_token = vocab.require(keys.eos)?;
        let pad_token = vocab.pad_id();
        let augmenter = PitchAugmenter::new(
            config.augment_range.clone(),
            config.min_pitch,
            config.max_pitch,
        );

        Ok(Self {
            adapter,
            vocab,
            config,
            augmenter,
            bar_token,
            eos_token,
            pad_token,
        })
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn bar_token(&self) -> u32 {
        self.bar_token
    }

    pub fn eos_token(&self) -> u32 {
        self.eos_token
    }

    pub fn pad_token(&self) -> u32 {
        self.pad_token
    }

    /// Vocabulary size including the pad code.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len() + 1
    }

    fn end_pad_token(&self) -> u32 {
        match self.config.dec_end_pad {
            DecEndPad::Pad => self.pad_token,
            DecEndPad::Eos => self.eos_token,
        }
    }

    pub fn sample<R: Rng + ?Sized>(
        &self,
        id: usize,
        piece_id: &str,
        piece: &Piece<A::Event>,
        attributes: &[(String, AttributeLabels)],
        rng: &mut R,
    ) -> Result<Sample> {
        let cfg = &self.config;
        let window = sample_window(
            &piece.events,
            &piece.bar_pos,
            cfg.model_max_bars,
            cfg.appoint_st_bar,
            rng,
        )?;

        let events = if cfg.do_augment {
            match self.augmenter.augment(&self.adapter, &window.events, rng) {
                Ok((shift, events)) => {
                    debug!("Piece {} transposed by {} semitones", piece_id, shift);
                    events
                }
                Err(e @ AugmentError::Unsatisfiable { .. }) => {
                    warn!("Piece {} left untransposed: {}..!", piece_id, e);
                    window.events
                }
                Err(e) => return Err(anyhow!("Piece {}: {}", piece_id, e)),
            }
        } else {
            window.events
        };

        let mut labels = BTreeMap::new();
        for (name, source) in attributes.iter() {
            let mut per_bar = source.window(window.start_bar, window.n_bars)?;
            per_bar.resize(cfg.model_max_bars, 0);
            let per_token =
                expand_bar_labels(&per_bar, &window.bar_pos, window.n_bars, cfg.model_dec_seqlen);
            labels.insert(name.clone(), AttributeSample { per_token, per_bar });
        }

        let tokens = events
            .iter()
            .map(|ev| self.adapter.to_id(ev, &self.vocab))
            .collect::<Result<Vec<u32>>>()?;

        if window.bar_pos.last() != Some(&tokens.len()) {
            bail!(
                "Window of piece {} ends at {} but holds {} tokens..!",
                piece_id,
                window.bar_pos.last().copied().unwrap_or(0),
                tokens.len()
            );
        }

        let enc = build_encoder(
            &tokens,
            &window.bar_pos,
            cfg.model_max_bars,
            cfg.model_enc_seqlen,
            self.pad_token,
        )?;
        let dec = build_decoder(
            &tokens,
            cfg.model_dec_seqlen,
            cfg.pad_to_same,
            self.pad_token,
            self.end_pad_token(),
        );

        Ok(Sample {
            id,
            piece_id: piece_id.to_owned(),
            st_bar_id: window.start_bar,
            bar_pos: window.bar_pos,
            enc_input: enc.input,
            enc_padding_mask: enc.padding_mask,
            enc_length: enc.lengths,
            enc_n_bars: window.n_bars,
            dec_input: dec.input,
            dec_target: dec.target,
            length: dec.length,
            attributes: labels,
        })
    }
}

/// Pieces from a store with their bar positions normalized once up front.
///
/// Immutable after `open`, so one instance can serve samples to many threads.
pub struct Dataset<S: PieceStore, A: EventAdapter<Event = S::Event>> {
    store: S,
    pipeline: SamplePipeline<A>,
    pieces: Vec<String>,
    piece_bar_pos: Vec<Vec<usize>>,
}

impl<S: PieceStore, A: EventAdapter<Event = S::Event>> Dataset<S, A> {
    pub fn open(store: S, adapter: A, vocab: Vocabulary, config: DatasetConfig) -> Result<Self> {
        let pipeline = SamplePipeline::new(adapter, vocab, config)?;

        let mut pieces = if pipeline.config.pieces.is_empty() {
            store.piece_ids()?
        } else {
            pipeline.config.pieces.clone()
        };
        sort_piece_ids(&mut pieces);

        let mut piece_bar_pos = Vec::with_capacity(pieces.len());
        for (i, piece_id) in pieces.iter().enumerate() {
            if i % PROGRESS_EVERY == 0 {
                info!("[preparing data] now at #{}", i);
            }

            let stored = store.load(piece_id)?;
            let bar_pos = match stored.bar_pos {
                Some(bar_pos) => bar_pos,
                None => scan_bar_positions(&stored.events, |ev| pipeline.adapter.is_bar(ev)),
            };
            piece_bar_pos.push(normalize_bar_positions(
                piece_id,
                bar_pos,
                stored.events.len(),
            )?);
        }

        info!(
            "Dataset ready: {} pieces, vocabulary of {} (+1 pad)",
            pieces.len(),
            pipeline.vocab.len()
        );

        Ok(Self {
            store,
            pipeline,
            pieces,
            piece_bar_pos,
        })
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn piece_ids(&self) -> &[String] {
        &self.pieces
    }

    pub fn bar_positions(&self, idx: usize) -> Option<&[usize]> {
        self.piece_bar_pos.get(idx).map(Vec::as_slice)
    }

    pub fn pipeline(&self) -> &SamplePipeline<A> {
        &self.pipeline
    }

    pub fn get<R: Rng + ?Sized>(&self, idx: usize, rng: &mut R) -> Result<Sample> {
        let piece_id = self
            .pieces
            .get(idx)
            .ok_or_else(|| anyhow!("Sample {} is out of range for {} pieces..!", idx, self.len()))?;
        let bar_pos = &self.piece_bar_pos[idx];

        let stored = self.store.load(piece_id)?;
        if bar_pos.last() != Some(&stored.events.len()) {
            bail!(
                "Piece {} changed since the dataset was opened ({} events, expected {})..!",
                piece_id,
                stored.events.len(),
                bar_pos.last().copied().unwrap_or(0)
            );
        }

        let attributes = if self.pipeline.config.use_attr_cls {
            self.store.attributes(piece_id)?
        } else {
            Vec::new()
        };

        let piece = Piece {
            events: stored.events,
            bar_pos: bar_pos.clone(),
        };
        self.pipeline.sample(idx, piece_id, &piece, &attributes, rng)
    }
}
