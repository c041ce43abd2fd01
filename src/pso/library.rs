//! PSO Library Cache
//!
//! Pipeline state objects are expensive to compile; the driver-level
//! pipeline library serialization is cached on disk as a single file per
//! machine, `Data/<name>.bpl`. The blob format is opaque — it comes from
//! and goes back to the device untouched.
//!
//! The cache is read once at startup. When any PSO turns out to be
//! missing from the loaded library, the library is marked dirty and
//! rewritten on a worker job; the write goes through a temporary file so
//! a crash mid-write never corrupts the cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::errors::Result;
use crate::jobs::JobSystem;

/// Extension of the serialized pipeline library file.
pub const PSO_CACHE_FILE_EXTENSION: &str = "bpl";

/// Directory (under the working directory) holding the cache.
pub const PSO_CACHE_DIRECTORY: &str = "Data";

/// On-disk pipeline library cache.
pub struct PsoLibrary {
    path: PathBuf,
    serialized_blob: Mutex<Vec<u8>>,
    needs_rewrite: AtomicBool,
    rewrite_in_flight: AtomicBool,
}

impl PsoLibrary {
    /// Loads the cache file `<root>/Data/<name>.bpl`, or starts empty if
    /// it does not exist or cannot be read.
    #[must_use]
    pub fn load(root: &Path, name: &str) -> Arc<Self> {
        let path = root
            .join(PSO_CACHE_DIRECTORY)
            .join(format!("{name}.{PSO_CACHE_FILE_EXTENSION}"));

        let serialized_blob = match std::fs::read(&path) {
            Ok(blob) => {
                log::info!("Loaded PSO library cache ({} bytes) from {}", blob.len(), path.display());
                blob
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => {
                // A damaged cache only costs recompilation time.
                log::warn!("Discarding unreadable PSO library cache {}: {error}", path.display());
                Vec::new()
            }
        };

        Arc::new(Self {
            path,
            serialized_blob: Mutex::new(serialized_blob),
            needs_rewrite: AtomicBool::new(false),
            rewrite_in_flight: AtomicBool::new(false),
        })
    }

    /// The cache file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` when no cache was found on disk.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.serialized_blob.lock().is_empty()
    }

    /// A copy of the serialized library blob, as handed to the device at
    /// startup.
    #[must_use]
    pub fn serialized_blob(&self) -> Vec<u8> {
        self.serialized_blob.lock().clone()
    }

    /// Replaces the blob with a fresh serialization and marks the cache
    /// dirty. Called after a PSO was compiled that the loaded library
    /// did not contain.
    pub fn update_serialized_blob(&self, blob: Vec<u8>) {
        *self.serialized_blob.lock() = blob;
        self.needs_rewrite.store(true, Ordering::Release);
    }

    /// `true` while the on-disk file lags the in-memory blob.
    #[must_use]
    pub fn needs_rewrite(&self) -> bool {
        self.needs_rewrite.load(Ordering::Acquire)
    }

    /// Rewrites the cache file on a worker job if it is dirty. Multiple
    /// calls coalesce: at most one write is in flight at a time.
    pub fn begin_async_rewrite(self: &Arc<Self>, jobs: &JobSystem) {
        if !self.needs_rewrite.load(Ordering::Acquire) {
            return;
        }
        if self.rewrite_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }

        let library = Arc::clone(self);
        jobs.submit(move || {
            library.needs_rewrite.store(false, Ordering::Release);
            if let Err(error) = library.write_to_disk() {
                // Leave the dirty flag set so a later call retries.
                library.needs_rewrite.store(true, Ordering::Release);
                log::error!(
                    "Failed to rewrite PSO library cache {}: {error}",
                    library.path.display()
                );
            }
            library.rewrite_in_flight.store(false, Ordering::Release);
        });
    }

    fn write_to_disk(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let blob = self.serialized_blob.lock().clone();
        let temp_path = self.path.with_extension(format!("{PSO_CACHE_FILE_EXTENSION}.tmp"));

        std::fs::write(&temp_path, &blob)?;
        std::fs::rename(&temp_path, &self.path)?;

        log::info!(
            "Rewrote PSO library cache ({} bytes) at {}",
            blob.len(),
            self.path.display()
        );
        Ok(())
    }
}
