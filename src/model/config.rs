use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "remi",
    about = "Encode music as REMI tokens and draw bar-aligned training windows."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the REMI vocabulary as a JSON map of event id to token.
    Vocab {
        /// Subdivisions per bar.
        #[arg(short, long, default_value_t = 24)]
        resolution: u32,

        /// Output path for the vocabulary file.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Import a MIDI file and encode it as REMI tokens.
    Encode {
        /// Path to the source MIDI file.
        midi: PathBuf,

        /// Subdivisions per bar.
        #[arg(short, long, default_value_t = 24)]
        resolution: u32,

        /// Write a token piece file here instead of logging the events.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Encode with this vocabulary file instead of building one for `resolution`.
        #[arg(long)]
        vocab: Option<PathBuf>,

        /// Difficulty label stored alongside the tokens.
        #[arg(long)]
        difficulty: Option<i64>,
    },

    /// Open a piece directory and draw training samples from it.
    Sample {
        /// Directory of piece files.
        data_dir: PathBuf,

        /// Vocabulary JSON file.
        vocab: PathBuf,

        /// Layout of the piece files.
        #[arg(short, long, value_enum, default_value_t = PieceFormat::Tokens)]
        format: PieceFormat,

        /// JSON file with dataset settings, defaults are used for missing keys.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of samples to draw.
        #[arg(short = 'n', long, default_value_t = 4)]
        count: usize,

        /// Seed for window and transposition choices.
        #[arg(short, long, default_value_t = 0)]
        seed: u64,

        /// Start every window at this bar when the piece is long enough.
        #[arg(long = "start-bar")]
        start_bar: Option<usize>,

        /// Disable pitch augmentation.
        #[arg(long = "no-augment", default_value_t = false)]
        no_augment: bool,

        /// Write the drawn samples as JSON.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

/// Layout of a piece directory.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PieceFormat {
    /// `{bar_pos, events}` files of named events.
    Events,
    /// `{tokens, difficulty}` files of REMI ids with in-band bars.
    Tokens,
}

/// Value appended to the decoder sequence when it is not padded to a uniform length.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecEndPad {
    #[default]
    Pad,
    Eos,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    pub model_enc_seqlen: usize,
    pub model_dec_seqlen: usize,
    pub model_max_bars: usize,
    pub do_augment: bool,
    pub augment_range: RangeInclusive<i32>,
    pub min_pitch: i32,
    pub max_pitch: i32,
    pub pad_to_same: bool,
    pub use_attr_cls: bool,
    pub appoint_st_bar: Option<usize>,
    pub dec_end_pad: DecEndPad,
    /// Restrict the dataset to these piece ids.
    pub pieces: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            model_enc_seqlen: 128,
            model_dec_seqlen: 1280,
            model_max_bars: 16,
            do_augment: true,
            augment_range: -6..=6,
            min_pitch: 22,
            max_pitch: 107,
            pad_to_same: true,
            use_attr_cls: true,
            appoint_st_bar: None,
            dec_end_pad: DecEndPad::Pad,
            pieces: Vec::new(),
        }
    }
}

impl DatasetConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path.as_ref()).map_err(|e| {
            anyhow!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            )
        })?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_max_bars == 0 {
            bail!("model_max_bars must be positive..!");
        }
        if self.model_enc_seqlen < 2 {
            bail!("model_enc_seqlen must leave room for a bar marker and one token..!");
        }
        if self.model_dec_seqlen == 0 {
            bail!("model_dec_seqlen must be positive..!");
        }
        if self.min_pitch < 0 || self.max_pitch > 127 || self.min_pitch > self.max_pitch {
            bail!(
                "Pitch band [{}..={}] is not a valid MIDI range..!",
                self.min_pitch,
                self.max_pitch
            );
        }
        if self.augment_range.is_empty() {
            bail!("augment_range {:?} is empty..!", self.augment_range);
        }
        Ok(())
    }
}
