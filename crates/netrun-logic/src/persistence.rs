//! Save/load for [`MemoryStore`].
//!
//! Writes the full store (definitions, runs, states, timelines) as one
//! bincode blob prefixed by a format version. Loading a file written with
//! a different version is refused rather than guessed at.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{MemoryStore, StoreContents};

/// Bump whenever a persisted type changes shape.
pub const SAVE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("save version {found} is not supported (expected {expected})")]
    VersionMismatch { expected: u32, found: u32 },
}

#[derive(Serialize, Deserialize)]
struct SaveData {
    version: u32,
    contents: StoreContents,
}

/// Serialize the store into `writer`.
pub fn save_store<W: Write>(store: &MemoryStore, writer: W) -> Result<(), SaveError> {
    let data = SaveData {
        version: SAVE_VERSION,
        contents: store.contents(),
    };
    bincode::serialize_into(writer, &data)?;
    log::info!(
        "saved {} runs, {} definitions",
        data.contents.runs.len(),
        data.contents.definitions.len()
    );
    Ok(())
}

/// Rebuild a store from bytes written by [`save_store`].
pub fn load_store<R: Read>(reader: R) -> Result<MemoryStore, SaveError> {
    let data: SaveData = bincode::deserialize_from(reader)?;
    if data.version != SAVE_VERSION {
        return Err(SaveError::VersionMismatch {
            expected: SAVE_VERSION,
            found: data.version,
        });
    }
    log::info!("loaded {} runs", data.contents.runs.len());
    Ok(MemoryStore::from_contents(data.contents))
}

pub fn save_to_file(store: &MemoryStore, path: impl AsRef<Path>) -> Result<(), SaveError> {
    let mut writer = BufWriter::new(File::create(path)?);
    save_store(store, &mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn load_from_file(path: impl AsRef<Path>) -> Result<MemoryStore, SaveError> {
    load_store(BufReader::new(File::open(path)?))
}
