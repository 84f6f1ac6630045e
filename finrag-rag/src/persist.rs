//! On-disk format for [`Index`]es.
//!
//! An index location is a directory holding three files:
//!
//! - `vectors.json`: `[{ "id", "vector" }]` in insertion order
//! - `chunks.json`: the content store, `[Chunk]` in insertion order
//! - `manifest.json`: format version, embedding model, dimension, entry count,
//!   and SHA-256 digests of the two stores
//!
//! Writes go to a sibling staging directory that is renamed onto the location
//! only after all three files are complete and synced, so a crashed or failed
//! write never leaves a loadable index behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::document::Chunk;
use crate::error::{RagError, Result};
use crate::index::{Index, IndexManifest};

/// Version of the on-disk layout written by this crate.
pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.json";
const CHUNKS_FILE: &str = "chunks.json";

#[derive(Debug, Serialize, Deserialize)]
struct PersistedManifest {
    format_version: u32,
    #[serde(flatten)]
    manifest: IndexManifest,
    vectors_sha256: String,
    chunks_sha256: String,
}

#[derive(Serialize, Deserialize)]
struct VectorRecord {
    id: String,
    vector: Vec<f32>,
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn split_location(location: &Path) -> Result<(PathBuf, String)> {
    let name = location.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        RagError::Configuration(format!("invalid index location '{}'", location.display()))
    })?;
    let parent = match location.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((parent, name.to_string()))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)
        .map_err(|e| RagError::io(format!("create {}", path.display()), e))?;
    file.write_all(bytes).map_err(|e| RagError::io(format!("write {}", path.display()), e))?;
    file.sync_all().map_err(|e| RagError::io(format!("sync {}", path.display()), e))
}

fn to_json<T: Serialize + ?Sized>(value: &T, context: &str) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|source| RagError::Serialization { context: context.to_string(), source })
}

fn write_staging(index: &Index, staging: &Path) -> Result<()> {
    fs::create_dir(staging)
        .map_err(|e| RagError::io(format!("create {}", staging.display()), e))?;

    let records: Vec<VectorRecord> = index
        .chunks()
        .iter()
        .zip(index.vectors())
        .map(|(chunk, vector)| VectorRecord { id: chunk.id.clone(), vector: vector.clone() })
        .collect();
    let vectors = to_json(&records, "vector store")?;
    let chunks = to_json(index.chunks(), "content store")?;

    write_synced(&staging.join(VECTORS_FILE), &vectors)?;
    write_synced(&staging.join(CHUNKS_FILE), &chunks)?;

    // The manifest goes last: a directory without one is never a valid index.
    let manifest = PersistedManifest {
        format_version: FORMAT_VERSION,
        manifest: index.manifest(),
        vectors_sha256: digest(&vectors),
        chunks_sha256: digest(&chunks),
    };
    write_synced(&staging.join(MANIFEST_FILE), &to_json(&manifest, "index manifest")?)
}

/// Write `index` to `location`, replacing any index already there.
///
/// Either the new index is fully in place afterwards or the call fails; the
/// previous index, if any, survives a failure before the final swap.
pub fn persist_index(index: &Index, location: &Path) -> Result<()> {
    let (parent, name) = split_location(location)?;
    fs::create_dir_all(&parent)
        .map_err(|e| RagError::io(format!("create {}", parent.display()), e))?;

    let staging = parent.join(format!(".{name}.staging-{}", uuid::Uuid::new_v4()));
    if let Err(e) = write_staging(index, &staging) {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            warn!(
                path = %staging.display(),
                error = %cleanup,
                "failed to remove staging directory"
            );
        }
        return Err(e);
    }

    let retired = if location.exists() {
        let retired = parent.join(format!(".{name}.old-{}", uuid::Uuid::new_v4()));
        fs::rename(location, &retired)
            .map_err(|e| RagError::io(format!("retire {}", location.display()), e))?;
        Some(retired)
    } else {
        None
    };

    if let Err(e) = fs::rename(&staging, location) {
        if let Some(retired) = &retired {
            if let Err(restore) = fs::rename(retired, location) {
                warn!(error = %restore, "failed to restore previous index");
            }
        }
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            warn!(
                path = %staging.display(),
                error = %cleanup,
                "failed to remove staging directory"
            );
        }
        return Err(RagError::io(format!("install index at {}", location.display()), e));
    }

    if let Some(retired) = retired {
        if let Err(e) = fs::remove_dir_all(&retired) {
            warn!(path = %retired.display(), error = %e, "failed to remove previous index");
        }
    }

    info!(location = %location.display(), entry_count = index.len(), "persisted index");
    Ok(())
}

fn corrupt(location: &Path, message: impl Into<String>) -> RagError {
    RagError::IndexCorrupt { location: location.to_path_buf(), message: message.into() }
}

fn read_verified(location: &Path, file: &str, expected_sha256: &str) -> Result<Vec<u8>> {
    let path = location.join(file);
    let bytes = fs::read(&path).map_err(|e| corrupt(location, format!("cannot read {file}: {e}")))?;
    if digest(&bytes) != expected_sha256 {
        return Err(corrupt(location, format!("{file} does not match its manifest digest")));
    }
    Ok(bytes)
}

/// Read an index previously written by [`persist_index`].
///
/// # Errors
///
/// - [`RagError::IndexNotFound`] if `location` is missing or an empty directory
/// - [`RagError::IndexCorrupt`] if any file is missing, unreadable, fails its
///   digest, or the two stores disagree
pub fn load_index(location: &Path) -> Result<Index> {
    let is_empty_dir = fs::read_dir(location).map(|mut d| d.next().is_none()).unwrap_or(false);
    if !location.exists() || is_empty_dir {
        return Err(RagError::IndexNotFound { location: location.to_path_buf() });
    }
    if !location.is_dir() {
        return Err(corrupt(location, "index location is not a directory"));
    }

    let manifest_bytes = fs::read(location.join(MANIFEST_FILE))
        .map_err(|e| corrupt(location, format!("cannot read {MANIFEST_FILE}: {e}")))?;
    let manifest: PersistedManifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| corrupt(location, format!("invalid {MANIFEST_FILE}: {e}")))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(corrupt(
            location,
            format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                manifest.format_version
            ),
        ));
    }

    let vectors: Vec<VectorRecord> =
        serde_json::from_slice(&read_verified(location, VECTORS_FILE, &manifest.vectors_sha256)?)
            .map_err(|e| corrupt(location, format!("invalid {VECTORS_FILE}: {e}")))?;
    let chunks: Vec<Chunk> =
        serde_json::from_slice(&read_verified(location, CHUNKS_FILE, &manifest.chunks_sha256)?)
            .map_err(|e| corrupt(location, format!("invalid {CHUNKS_FILE}: {e}")))?;

    if vectors.len() != chunks.len() {
        return Err(corrupt(
            location,
            format!("{} vectors but {} chunks", vectors.len(), chunks.len()),
        ));
    }

    let mut entries = Vec::with_capacity(chunks.len());
    for (record, chunk) in vectors.into_iter().zip(chunks) {
        if record.id != chunk.id {
            return Err(corrupt(
                location,
                format!("vector '{}' is paired with chunk '{}'", record.id, chunk.id),
            ));
        }
        entries.push((chunk, record.vector));
    }

    let index = Index::from_parts(&manifest.manifest, entries).map_err(|m| corrupt(location, m))?;
    debug!(location = %location.display(), entry_count = index.len(), "loaded index");
    Ok(index)
}

/// An exclusive advisory lock serialising index builds for one location.
///
/// The lock file sits next to the index (`<location>.lock`) and is released
/// when the guard is dropped.
#[derive(Debug)]
pub struct IndexLock {
    file: File,
    path: PathBuf,
}

impl IndexLock {
    /// Take the lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexBusy`] if another holder has it.
    pub fn acquire(location: &Path) -> Result<Self> {
        use fs2::FileExt;

        let (parent, name) = split_location(location)?;
        fs::create_dir_all(&parent)
            .map_err(|e| RagError::io(format!("create {}", parent.display()), e))?;
        let path = parent.join(format!("{name}.lock"));
        let file = File::create(&path)
            .map_err(|e| RagError::io(format!("open lock file {}", path.display()), e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(RagError::IndexBusy { location: location.to_path_buf() })
            }
            Err(e) => Err(RagError::io(format!("lock {}", path.display()), e)),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        use fs2::FileExt;

        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "failed to release index lock");
        }
    }
}
