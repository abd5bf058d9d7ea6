use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Mapping from game identifier to display name.
pub type GameCache = HashMap<String, String>;

/// JSON file backing the game cache.
///
/// The file layout is a flat object (`{"<game id>": "<name>"}`) written with a
/// four space indent. Every save replaces the whole file.
#[derive(Debug, Clone)]
pub struct GameCacheStore {
    path: PathBuf,
}

impl GameCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the cache file. A missing file yields an empty cache.
    pub fn load(&self) -> Result<GameCache, CacheError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(GameCache::new()),
            Err(err) => return Err(CacheError::Read(err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(GameCache::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Atomically replaces the cache file with `cache`.
    ///
    /// The contents are written to a temporary file in the same directory and
    /// then renamed over the target, so readers never observe a partial file.
    pub fn save(&self, cache: &GameCache) -> Result<(), CacheError> {
        let sorted: BTreeMap<&str, &str> = cache
            .iter()
            .map(|(id, name)| (id.as_str(), name.as_str()))
            .collect();

        let mut buffer = Vec::new();
        let mut serializer =
            Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
        sorted.serialize(&mut serializer)?;
        buffer.push(b'\n');

        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&directory).map_err(CacheError::Write)?;

        let mut temp = NamedTempFile::new_in(&directory).map_err(CacheError::Write)?;
        temp.write_all(&buffer).map_err(CacheError::Write)?;
        temp.as_file().sync_all().map_err(CacheError::Write)?;
        temp.persist(&self.path)
            .map_err(|err| CacheError::Write(err.error))?;
        Ok(())
    }
}

/// Errors raised by [`GameCacheStore`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read game cache: {0}")]
    Read(io::Error),
    #[error("failed to write game cache: {0}")]
    Write(io::Error),
    #[error("game cache is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}
