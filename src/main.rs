use anyhow::Result;
use clap::Parser;
use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use remi_windows::{
    Args, Command, Dataset, DatasetConfig, EventAdapter, JsonEventStore, JsonTokenStore,
    NamedEventAdapter, Piece, PieceFormat, PieceStore, TokenAdapter, TokenPieceFile, Vocabulary,
    encode_remi, import_midi_file,
};
use std::fs;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Vocab { resolution, out } => {
            let vocab = Vocabulary::remi(resolution)?;
            vocab.save(&out)?;
            info!(
                "Wrote {} event ids at resolution {} to '{}'..!",
                vocab.len(),
                resolution,
                out.display()
            );
        }
        Command::Encode {
            midi,
            resolution,
            out,
            vocab,
            difficulty,
        } => encode(&midi, resolution, vocab.as_deref(), out.as_deref(), difficulty)?,
        Command::Sample {
            data_dir,
            vocab,
            format,
            config,
            count,
            seed,
            start_bar,
            no_augment,
            out,
        } => {
            let mut config = match config {
                Some(path) => DatasetConfig::load(path)?,
                None => DatasetConfig::default(),
            };
            if start_bar.is_some() {
                config.appoint_st_bar = start_bar;
            }
            if no_augment {
                config.do_augment = false;
            }

            let vocab = Vocabulary::load(&vocab)?;
            let opts = SampleOpts { count, seed, out };
            match format {
                PieceFormat::Events => {
                    let store = JsonEventStore::new(&data_dir);
                    draw_samples(Dataset::open(store, NamedEventAdapter, vocab, config)?, opts)?;
                }
                PieceFormat::Tokens => {
                    let store = JsonTokenStore::new(&data_dir);
                    let adapter = TokenAdapter::new(&vocab)?;
                    draw_samples(Dataset::open(store, adapter, vocab, config)?, opts)?;
                }
            }
        }
    }

    Ok(())
}

fn encode(
    midi: &Path,
    resolution: u32,
    vocab: Option<&Path>,
    out: Option<&Path>,
    difficulty: Option<i64>,
) -> Result<()> {
    let vocab = match vocab {
        Some(path) => Vocabulary::load(path)?,
        None => Vocabulary::remi(resolution)?,
    };
    vocab.ensure_resolution(resolution)?;

    info!("Importing MIDI file: '{}'...", midi.display());
    let music = import_midi_file(midi, resolution)?;
    let events = encode_remi(&music, resolution)?;

    let tokens = vocab.encode(&events)?;
    let bar = vocab.require("bar")?;
    let piece = Piece::from_events(tokens, |&t| t == bar)?;

    info!(
        "Encoded '{}' into {} tokens over {} bars..!",
        music
            .metadata
            .title
            .clone()
            .unwrap_or_else(|| "<unknown>".into()),
        piece.events.len(),
        piece.n_bars()
    );

    match out {
        Some(path) => {
            TokenPieceFile {
                tokens: piece.events,
                difficulty,
            }
            .save(path)?;
            info!("Wrote piece file '{}'..!", path.display());
        }
        None => {
            for (i, ev) in events.iter().enumerate() {
                info!("Event {}: {}", i, ev);
            }
        }
    }

    Ok(())
}

struct SampleOpts {
    count: usize,
    seed: u64,
    out: Option<PathBuf>,
}

fn draw_samples<S, A>(dataset: Dataset<S, A>, opts: SampleOpts) -> Result<()>
where
    S: PieceStore,
    A: EventAdapter<Event = S::Event>,
{
    if dataset.is_empty() {
        info!("No pieces found, nothing to sample..!");
        return Ok(());
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut samples = Vec::with_capacity(opts.count);
    for i in 0..opts.count {
        let sample = dataset.get(i % dataset.len(), &mut rng)?;
        info!(
            "Sample {}: piece={} st_bar={} n_bars={} length={} enc_input={:?}",
            i,
            sample.piece_id,
            sample.st_bar_id,
            sample.enc_n_bars,
            sample.length,
            sample.enc_input.shape()
        );
        debug!("Sample {} bar positions: {:?}", i, sample.bar_pos);
        samples.push(sample);
    }

    if let Some(path) = opts.out {
        fs::write(&path, serde_json::to_vec(&samples)?)?;
        info!("Wrote {} samples to '{}'..!", samples.len(), path.display());
    }

    Ok(())
}
