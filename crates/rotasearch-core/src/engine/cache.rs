use crate::core::models::ids::{PositionId, RotamerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Energy cache lock was poisoned by a panicking writer")]
    Poisoned,
}

/// Content address of a matrix entry. Pair keys are normalised so that
/// `pos1 < pos2`, which makes `(p1, r1, p2, r2)` and `(p2, r2, p1, r1)` the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub pos1: PositionId,
    pub rot1: RotamerId,
    pub second: Option<(PositionId, RotamerId)>,
}

impl CacheKey {
    pub fn single(position: PositionId, rotamer: RotamerId) -> Self {
        Self {
            pos1: position,
            rot1: rotamer,
            second: None,
        }
    }

    pub fn pair(pos1: PositionId, rot1: RotamerId, pos2: PositionId, rot2: RotamerId) -> Self {
        let ((pos1, rot1), (pos2, rot2)) = if pos1 <= pos2 {
            ((pos1, rot1), (pos2, rot2))
        } else {
            ((pos2, rot2), (pos1, rot1))
        };
        Self {
            pos1,
            rot1,
            second: Some((pos2, rot2)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedEnergy {
    pub energy: f64,
    /// False when the minimizer hit its iteration cap.
    pub converged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    context: String,
    pos1: u32,
    rot1: u32,
    pos2: Option<u32>,
    rot2: Option<u32>,
    energy: f64,
    converged: bool,
}

impl CacheRecord {
    fn new(context: &str, key: &CacheKey, value: &CachedEnergy) -> Self {
        Self {
            context: context.to_string(),
            pos1: key.pos1.0,
            rot1: key.rot1.0,
            pos2: key.second.map(|(p, _)| p.0),
            rot2: key.second.map(|(_, r)| r.0),
            energy: value.energy,
            converged: value.converged,
        }
    }

    fn to_entry(&self) -> Option<(CacheKey, CachedEnergy)> {
        let key = match (self.pos2, self.rot2) {
            (None, None) => CacheKey::single(PositionId(self.pos1), RotamerId(self.rot1)),
            (Some(p2), Some(r2)) => CacheKey::pair(
                PositionId(self.pos1),
                RotamerId(self.rot1),
                PositionId(p2),
                RotamerId(r2),
            ),
            _ => return None,
        };
        if self.energy.is_nan() {
            return None;
        }
        Some((
            key,
            CachedEnergy {
                energy: self.energy,
                converged: self.converged,
            },
        ))
    }
}

/// Persistent, append-only store of computed energy terms.
///
/// Every entry is written once and never updated. The on-disk form is a CSV log that
/// is replayed on [`EnergyCache::open`], so a re-run or a run resumed after a crash
/// skips every term that already reached the log. A torn final line from an
/// interrupted write is dropped and the log is rewritten without it.
///
/// Each row carries the context fingerprint of the evaluation that produced it (see
/// [`Evaluator::fingerprint`](crate::engine::evaluation::Evaluator::fingerprint)).
/// Only rows of the context the cache was opened with are served; rows of other
/// contexts stay in the log untouched, so runs with different force fields,
/// conformation spaces or strategies can share one file without mixing energies.
pub struct EnergyCache {
    context: String,
    entries: RwLock<HashMap<CacheKey, CachedEnergy>>,
    log: Option<Mutex<csv::Writer<File>>>,
    path: Option<PathBuf>,
}

impl EnergyCache {
    /// A cache that lives only for the current process.
    pub fn in_memory() -> Self {
        Self {
            context: String::new(),
            entries: RwLock::new(HashMap::new()),
            log: None,
            path: None,
        }
    }

    pub fn open(path: &Path, context: &str) -> Result<Self, CacheError> {
        let path_str = path.to_string_lossy().to_string();
        let io_err = |e| CacheError::Io {
            path: path_str.clone(),
            source: e,
        };

        let mut entries = HashMap::new();
        let mut foreign = Vec::new();
        let mut needs_rewrite = false;
        let existing = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_err(e)),
        };

        if !existing.is_empty() {
            if existing.last() != Some(&b'\n') {
                needs_rewrite = true;
            }
            let mut reader = csv::Reader::from_reader(existing.as_slice());
            for (row, record) in reader.deserialize::<CacheRecord>().enumerate() {
                match record.map(|r| (r.to_entry(), r)) {
                    Ok((Some(_), record)) if record.context != context => foreign.push(record),
                    Ok((Some((key, value)), _)) => {
                        entries.entry(key).or_insert(value);
                    }
                    Ok((None, _)) => {
                        warn!(row, "Discarding malformed energy cache row and everything after it");
                        needs_rewrite = true;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            row,
                            error = %e,
                            "Energy cache log is truncated; recovering valid prefix"
                        );
                        needs_rewrite = true;
                        break;
                    }
                }
            }
        }

        let write_header = existing.is_empty() || needs_rewrite;
        let file = if needs_rewrite {
            File::create(path).map_err(io_err)?
        } else {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(io_err)?
        };
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);

        if needs_rewrite {
            let mut sorted: Vec<_> = entries.iter().collect();
            sorted.sort_by_key(|(key, _)| **key);
            let own = sorted
                .into_iter()
                .map(|(key, value)| CacheRecord::new(context, key, value));
            let records = foreign.iter().cloned().chain(own);
            for record in records {
                writer.serialize(record).map_err(|e| CacheError::Csv {
                    path: path_str.clone(),
                    source: e,
                })?;
            }
            writer.flush().map_err(io_err)?;
        }

        info!(
            path = %path_str,
            entries = entries.len(),
            other_contexts = foreign.len(),
            "Opened energy cache"
        );
        Ok(Self {
            context: context.to_string(),
            entries: RwLock::new(entries),
            log: Some(Mutex::new(writer)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedEnergy> {
        self.entries.read().ok()?.get(key).copied()
    }

    /// Stores `value` under `key` unless an entry already exists.
    ///
    /// Returns whether this call stored the entry. The existing value always wins,
    /// so concurrent inserts of the same key leave exactly one stored value.
    pub fn insert_if_absent(&self, key: CacheKey, value: CachedEnergy) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        if entries.contains_key(&key) {
            return Ok(false);
        }
        if let Some(log) = &self.log {
            let mut writer = log.lock().map_err(|_| CacheError::Poisoned)?;
            writer
                .serialize(CacheRecord::new(&self.context, &key, &value))
                .map_err(|e| CacheError::Csv {
                    path: self.path_string(),
                    source: e,
                })?;
            writer.flush().map_err(|e| CacheError::Io {
                path: self.path_string(),
                source: e,
            })?;
        }
        entries.insert(key, value);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn flush(&self) -> Result<(), CacheError> {
        if let Some(log) = &self.log {
            let mut writer = log.lock().map_err(|_| CacheError::Poisoned)?;
            writer.flush().map_err(|e| CacheError::Io {
                path: self.path_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Flushes and releases the backing log.
    pub fn close(self) -> Result<(), CacheError> {
        self.flush()?;
        debug!(entries = self.len(), "Closed energy cache");
        Ok(())
    }

    fn path_string(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(String::new, |p| p.to_string_lossy().to_string())
    }
}
