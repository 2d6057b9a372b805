use crate::model::event::NamedEvent;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const PIECE_EXT: &str = "json";

/// Per-bar attribute labels for one piece.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum AttributeLabels {
    PerBar(Vec<i64>),
    /// One label shared by every bar of the piece.
    Constant(i64),
}

impl AttributeLabels {
    /// Labels for bars `start..start + n`, failing if the store holds fewer.
    pub fn window(&self, start: usize, n: usize) -> Result<Vec<i64>> {
        match self {
            AttributeLabels::Constant(label) => Ok(vec![*label; n]),
            AttributeLabels::PerBar(labels) => labels
                .get(start..start + n)
                .map(|slice| slice.to_vec())
                .ok_or_else(|| {
                    anyhow!(
                        "Attribute labels cover {} bars, bars {}..{} were requested..!",
                        labels.len(),
                        start,
                        start + n
                    )
                }),
        }
    }
}

/// A piece as it comes out of storage. Bar positions are absent when the
/// format marks bars in-band.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPiece<E> {
    pub events: Vec<E>,
    pub bar_pos: Option<Vec<usize>>,
}

/// Read-only lookup of precomputed pieces and their attribute labels.
pub trait PieceStore: Send + Sync {
    type Event: Clone + Send + Sync;

    fn piece_ids(&self) -> Result<Vec<String>>;

    fn load(&self, piece_id: &str) -> Result<StoredPiece<Self::Event>>;

    fn attributes(&self, piece_id: &str) -> Result<Vec<(String, AttributeLabels)>>;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EventPieceFile {
    pub bar_pos: Vec<usize>,
    pub events: Vec<NamedEvent>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenPieceFile {
    pub tokens: Vec<u32>,
    #[serde(default)]
    pub difficulty: Option<i64>,
}

impl TokenPieceFile {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), serde_json::to_vec(self)?).map_err(|e| {
            anyhow!(
                "Failed to write piece file {}: {}",
                path.as_ref().display(),
                e
            )
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)
        .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| anyhow!("Corrupt file {}: {}", path.display(), e))
}

/// Stems of every piece file in `dir`, numerically ordered when they are all numbers.
fn list_piece_ids(dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)
        .map_err(|e| anyhow!("Failed to list data directory {}: {}", dir.display(), e))?
    {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some(PIECE_EXT) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            ids.push(stem.to_owned());
        }
    }

    sort_piece_ids(&mut ids);
    Ok(ids)
}

pub fn sort_piece_ids(ids: &mut [String]) {
    if ids.iter().all(|id| id.parse::<u64>().is_ok()) {
        ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
    } else {
        ids.sort();
    }
}

/// Directory of `{bar_pos, events}` files with labels under `attr_cls/{polyph,rhythm}/`.
#[derive(Debug, Clone)]
pub struct JsonEventStore {
    dir: PathBuf,
}

impl JsonEventStore {
    pub const ATTRIBUTES: [&'static str; 2] = ["polyph", "rhythm"];

    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn piece_path(&self, piece_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", piece_id, PIECE_EXT))
    }
}

impl PieceStore for JsonEventStore {
    type Event = NamedEvent;

    fn piece_ids(&self) -> Result<Vec<String>> {
        list_piece_ids(&self.dir)
    }

    fn load(&self, piece_id: &str) -> Result<StoredPiece<NamedEvent>> {
        let file: EventPieceFile = read_json(&self.piece_path(piece_id))?;
        Ok(StoredPiece {
            events: file.events,
            bar_pos: Some(file.bar_pos),
        })
    }

    fn attributes(&self, piece_id: &str) -> Result<Vec<(String, AttributeLabels)>> {
        Self::ATTRIBUTES
            .iter()
            .map(|name| {
                let path = self
                    .dir
                    .join("attr_cls")
                    .join(name)
                    .join(format!("{}.{}", piece_id, PIECE_EXT));
                let labels: Vec<i64> = read_json(&path)?;
                Ok((name.to_string(), AttributeLabels::PerBar(labels)))
            })
            .collect()
    }
}

/// Directory of `{tokens, difficulty}` files whose bars are marked in-band.
#[derive(Debug, Clone)]
pub struct JsonTokenStore {
    dir: PathBuf,
}

impl JsonTokenStore {
    pub const ATTRIBUTE: &'static str = "difficulty";

    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn read(&self, piece_id: &str) -> Result<TokenPieceFile> {
        read_json(&self.dir.join(format!("{}.{}", piece_id, PIECE_EXT)))
    }
}

impl PieceStore for JsonTokenStore {
    type Event = u32;

    fn piece_ids(&self) -> Result<Vec<String>> {
        list_piece_ids(&self.dir)
    }

    fn load(&self, piece_id: &str) -> Result<StoredPiece<u32>> {
        Ok(StoredPiece {
            events: self.read(piece_id)?.tokens,
            bar_pos: None,
        })
    }

    /// Stored difficulties are 1-based, labels are 0-based.
    fn attributes(&self, piece_id: &str) -> Result<Vec<(String, AttributeLabels)>> {
        let difficulty = self
            .read(piece_id)?
            .difficulty
            .ok_or_else(|| anyhow!("Piece {} has no difficulty label..!", piece_id))?;
        Ok(vec![(
            Self::ATTRIBUTE.to_owned(),
            AttributeLabels::Constant(difficulty - 1),
        )])
    }
}

/// Pieces held in memory, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore<E> {
    pieces: BTreeMap<String, (StoredPiece<E>, Vec<(String, AttributeLabels)>)>,
}

impl<E> MemoryStore<E> {
    pub fn new() -> Self {
        Self {
            pieces: BTreeMap::new(),
        }
    }

    pub fn insert(
        &mut self,
        piece_id: &str,
        piece: StoredPiece<E>,
        attributes: Vec<(String, AttributeLabels)>,
    ) {
        self.pieces.insert(piece_id.to_owned(), (piece, attributes));
    }
}

impl<E: Clone + Send + Sync> PieceStore for MemoryStore<E> {
    type Event = E;

    fn piece_ids(&self) -> Result<Vec<String>> {
        let mut ids = self.pieces.keys().cloned().collect::<Vec<_>>();
        sort_piece_ids(&mut ids);
        Ok(ids)
    }

    fn load(&self, piece_id: &str) -> Result<StoredPiece<E>> {
        self.pieces
            .get(piece_id)
            .map(|(piece, _)| piece.clone())
            .ok_or_else(|| anyhow!("Piece {} is not in the store..!", piece_id))
    }

    fn attributes(&self, piece_id: &str) -> Result<Vec<(String, AttributeLabels)>> {
        self.pieces
            .get(piece_id)
            .map(|(_, attributes)| attributes.clone())
            .ok_or_else(|| anyhow!("Piece {} is not in the store..!", piece_id))
    }
}
