//! Parsed archive view: the central directory of one archive slice.
//!
//! Central-directory parsing is delegated to the `zip` crate over a
//! chunk-spanning slice reader; only the entry descriptors are kept, so
//! entry bytes are always read back out of the slice on demand.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;
use zip::CompressionMethod;

use crate::error::ScanError;
use crate::physical::ArchiveSlice;

/// Entry descriptor. Owns no bytes; `offset` is the start of the entry's
/// (possibly compressed) data relative to the containing slice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FastEntry {
    pub name: String,
    pub offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub is_deflated: bool,
}

pub struct LogicalArchive {
    slice: ArchiveSlice,
    entries: Vec<FastEntry>,
    classpath_roots: Mutex<BTreeSet<String>>,
    closed: AtomicBool,
}

impl LogicalArchive {
    /// Parse the central directory of `slice`. Directory entries and
    /// entries with unsupported compression methods are skipped.
    pub(crate) fn parse(slice: ArchiveSlice) -> Result<Self, ScanError> {
        let mut archive = zip::ZipArchive::new(slice.reader())
            .map_err(|e| ScanError::not_archive(slice.path(), e))?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive
                .by_index_raw(i)
                .map_err(|e| ScanError::not_archive(slice.path(), e))?;
            if entry.is_dir() {
                continue;
            }
            let is_deflated = match entry.compression() {
                CompressionMethod::Stored => false,
                CompressionMethod::Deflated => true,
                other => {
                    debug!(
                        archive = %slice.path(),
                        entry = entry.name(),
                        method = ?other,
                        "skipping entry with unsupported compression method"
                    );
                    continue;
                }
            };
            entries.push(FastEntry {
                name: entry.name().to_string(),
                offset: entry.data_start(),
                compressed_size: entry.compressed_size(),
                uncompressed_size: entry.size(),
                is_deflated,
            });
        }

        Ok(Self {
            slice,
            entries,
            classpath_roots: Mutex::new(BTreeSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn slice(&self) -> &ArchiveSlice {
        &self.slice
    }

    pub fn path(&self) -> String {
        self.slice.path()
    }

    pub fn entries(&self) -> &[FastEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&FastEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Directory prefixes that act as root packages for this archive.
    pub fn classpath_roots(&self) -> Vec<String> {
        self.classpath_roots.lock().unwrap().iter().cloned().collect()
    }

    pub fn add_classpath_root(&self, root: &str) {
        self.classpath_roots.lock().unwrap().insert(root.to_string());
    }

    /// The entry's bytes exactly as stored in the archive, compressed for
    /// deflated entries.
    pub fn raw_bytes(&self, entry: &FastEntry) -> Result<Vec<u8>, ScanError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScanError::Closed);
        }
        self.slice.sub(entry.offset, entry.compressed_size)?.to_vec()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for LogicalArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalArchive")
            .field("path", &self.path())
            .field("entries", &self.entries.len())
            .finish()
    }
}
