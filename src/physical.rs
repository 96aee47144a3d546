//! Physical archive backing: a memory-mapped file or an in-RAM buffer.
//!
//! File mappings are split into lazily created chunks because the mapping
//! primitive is index-limited to a 2^32 span. Each chunk slot is populated
//! at most once through a per-index singleton map, so racing readers share
//! one mapping. `ArchiveSlice` is the cheap value type that addresses one
//! logical archive's extent within a physical backing; `SliceReader` gives
//! `Read + Seek` over a slice, crossing chunk boundaries transparently.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use memmap2::{Mmap, MmapOptions};

use crate::error::ScanError;
use crate::singleton::SingletonMap;

/// Span of a single mapping. Also the ceiling for inflating a nested entry
/// to memory, since a RAM backing is a single chunk.
pub const CHUNK_SIZE: u64 = 1 << 32;

/// Identity of a physical backing: the outermost file on disk, plus the
/// nested path for backings that were inflated to RAM. Two construction
/// paths that reach the same identity must collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ArchiveIdent {
    pub outermost: PathBuf,
    pub nested: Option<String>,
}

enum Backing {
    File {
        handle: Mutex<Option<File>>,
        chunks: SingletonMap<usize, Arc<Mmap>, ScanError>,
        num_chunks: usize,
    },
    Ram(Arc<Vec<u8>>),
}

pub struct PhysicalArchive {
    ident: ArchiveIdent,
    len: u64,
    backing: Backing,
    closed: AtomicBool,
}

/// Read-only view of one chunk.
#[derive(Clone, Debug)]
pub enum ChunkBytes {
    Mapped(Arc<Mmap>),
    Ram(Arc<Vec<u8>>),
}

impl ChunkBytes {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            ChunkBytes::Mapped(m) => &m[..],
            ChunkBytes::Ram(b) => &b[..],
        }
    }
}

impl PhysicalArchive {
    pub fn from_file(canonical: PathBuf) -> Result<Self, ScanError> {
        let handle = File::open(&canonical).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ScanError::NotFound(canonical.display().to_string())
            }
            _ => ScanError::io(canonical.display(), e),
        })?;
        let len = handle
            .metadata()
            .map_err(|e| ScanError::io(canonical.display(), e))?
            .len();
        if len == 0 {
            return Err(ScanError::not_archive(
                canonical.display(),
                "archive is empty",
            ));
        }
        let num_chunks = len.div_ceil(CHUNK_SIZE) as usize;
        Ok(Self {
            ident: ArchiveIdent {
                outermost: canonical,
                nested: None,
            },
            len,
            backing: Backing::File {
                handle: Mutex::new(Some(handle)),
                chunks: SingletonMap::new(),
                num_chunks,
            },
            closed: AtomicBool::new(false),
        })
    }

    pub fn from_bytes(
        bytes: Vec<u8>,
        outermost: PathBuf,
        nested_path: String,
    ) -> Result<Self, ScanError> {
        if bytes.is_empty() {
            return Err(ScanError::not_archive(&nested_path, "archive is empty"));
        }
        let len = bytes.len() as u64;
        Ok(Self {
            ident: ArchiveIdent {
                outermost,
                nested: Some(nested_path),
            },
            len,
            backing: Backing::Ram(Arc::new(bytes)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn outermost_file(&self) -> &Path {
        &self.ident.outermost
    }

    pub fn is_in_ram(&self) -> bool {
        matches!(self.backing, Backing::Ram(_))
    }

    /// Display identity: the file path, or the nested path for RAM
    /// backings.
    pub fn path(&self) -> String {
        match &self.ident.nested {
            Some(nested) => nested.clone(),
            None => self.ident.outermost.display().to_string(),
        }
    }

    pub(crate) fn ident(&self) -> &ArchiveIdent {
        &self.ident
    }

    /// The chunk covering `[i * 2^32, i * 2^32 + min(2^32, len - i * 2^32))`.
    pub fn chunk(&self, idx: usize) -> Result<ChunkBytes, ScanError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScanError::Closed);
        }
        match &self.backing {
            Backing::Ram(buf) => {
                if idx != 0 {
                    return Err(ScanError::Mapping {
                        path: self.path(),
                        reason: format!("chunk index {idx} out of range"),
                    });
                }
                Ok(ChunkBytes::Ram(Arc::clone(buf)))
            }
            Backing::File {
                handle,
                chunks,
                num_chunks,
            } => {
                if idx >= *num_chunks {
                    return Err(ScanError::Mapping {
                        path: self.path(),
                        reason: format!("chunk index {idx} out of range"),
                    });
                }
                chunks
                    .get(idx, || {
                        let guard = handle.lock().unwrap();
                        let Some(file) = guard.as_ref() else {
                            return Err(ScanError::Closed);
                        };
                        match Self::map_chunk(file, idx, self.len) {
                            Ok(m) => Ok(Arc::new(m)),
                            // One retry before surfacing: a transient
                            // address-space shortage may have cleared.
                            Err(_) => Self::map_chunk(file, idx, self.len)
                                .map(Arc::new)
                                .map_err(|e| ScanError::Mapping {
                                    path: self.path(),
                                    reason: e.to_string(),
                                }),
                        }
                    })
                    .map(ChunkBytes::Mapped)
            }
        }
    }

    fn map_chunk(file: &File, idx: usize, total_len: u64) -> std::io::Result<Mmap> {
        let pos = idx as u64 * CHUNK_SIZE;
        let chunk_len = (total_len - pos).min(CHUNK_SIZE) as usize;
        // SAFETY: the file is opened read-only and the mapping is read-only;
        // the handler's close ordering drops every mapping before the file
        // handle is released.
        unsafe { MmapOptions::new().offset(pos).len(chunk_len).map(file) }
    }

    /// Idempotent. Chunk mappings are released before the file handle.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Backing::File { handle, chunks, .. } = &self.backing {
            chunks.clear();
            drop(handle.lock().unwrap().take());
        }
    }
}

impl PartialEq for PhysicalArchive {
    fn eq(&self, other: &Self) -> bool {
        self.ident == other.ident
    }
}

impl Eq for PhysicalArchive {}

impl std::fmt::Debug for PhysicalArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalArchive")
            .field("path", &self.path())
            .field("len", &self.len)
            .finish()
    }
}

/// The extent of one logical archive within a physical backing. Equality
/// is structural over (backing identity, offset, length).
#[derive(Clone)]
pub struct ArchiveSlice {
    physical: Arc<PhysicalArchive>,
    offset: u64,
    len: u64,
}

impl ArchiveSlice {
    pub fn whole(physical: Arc<PhysicalArchive>) -> Self {
        let len = physical.len();
        Self {
            physical,
            offset: 0,
            len,
        }
    }

    pub fn sub(&self, offset: u64, len: u64) -> Result<Self, ScanError> {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(ScanError::Io {
                path: self.path(),
                reason: format!("sub-slice [{offset}, +{len}) exceeds slice length {}", self.len),
            });
        }
        Ok(Self {
            physical: Arc::clone(&self.physical),
            offset: self.offset + offset,
            len,
        })
    }

    pub fn physical(&self) -> &Arc<PhysicalArchive> {
        &self.physical
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> String {
        if self.offset == 0 && self.len == self.physical.len() {
            self.physical.path()
        } else {
            format!("{}[{}+{}]", self.physical.path(), self.offset, self.len)
        }
    }

    pub fn reader(&self) -> SliceReader {
        SliceReader {
            slice: self.clone(),
            pos: 0,
        }
    }

    /// Read at a slice-relative offset, stopping at chunk boundaries.
    /// Returns 0 at end of slice.
    fn read_at(&self, rel: u64, buf: &mut [u8]) -> Result<usize, ScanError> {
        if rel >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let abs = self.offset + rel;
        let chunk_idx = (abs / CHUNK_SIZE) as usize;
        let within = (abs % CHUNK_SIZE) as usize;
        let chunk = self.physical.chunk(chunk_idx)?;
        let view = chunk.as_slice();

        let in_chunk = view.len().saturating_sub(within);
        let in_slice = (self.len - rel).min(usize::MAX as u64) as usize;
        let n = buf.len().min(in_chunk).min(in_slice);
        buf[..n].copy_from_slice(&view[within..within + n]);
        Ok(n)
    }

    /// Copy the whole slice into memory.
    pub fn to_vec(&self) -> Result<Vec<u8>, ScanError> {
        let mut out = vec![0u8; self.len as usize];
        let mut filled = 0usize;
        while filled < out.len() {
            let n = self.read_at(filled as u64, &mut out[filled..])?;
            if n == 0 {
                return Err(ScanError::Io {
                    path: self.path(),
                    reason: "short read from archive backing".to_string(),
                });
            }
            filled += n;
        }
        Ok(out)
    }
}

impl PartialEq for ArchiveSlice {
    fn eq(&self, other: &Self) -> bool {
        self.physical.ident() == other.physical.ident()
            && self.offset == other.offset
            && self.len == other.len
    }
}

impl Eq for ArchiveSlice {}

impl std::hash::Hash for ArchiveSlice {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.physical.ident().hash(state);
        self.offset.hash(state);
        self.len.hash(state);
    }
}

impl std::fmt::Debug for ArchiveSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSlice")
            .field("path", &self.path())
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

/// `Read + Seek` over an `ArchiveSlice`.
pub struct SliceReader {
    slice: ArchiveSlice,
    pos: u64,
}

impl Read for SliceReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self
            .slice
            .read_at(self.pos, buf)
            .map_err(std::io::Error::other)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SliceReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => add_signed(self.slice.len(), n),
            SeekFrom::Current(n) => add_signed(self.pos, n),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of slice",
            )),
        }
    }
}

fn add_signed(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, content: &[u8]) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "classpath_scanner_physical_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ));
        let mut f = File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    #[test]
    fn file_backed_chunk_and_slice_reads() {
        let path = temp_file("chunks.bin", b"0123456789abcdef");
        let physical = Arc::new(PhysicalArchive::from_file(path.canonicalize().unwrap()).unwrap());
        assert_eq!(physical.len(), 16);

        let chunk = physical.chunk(0).unwrap();
        assert_eq!(chunk.as_slice(), b"0123456789abcdef");

        let slice = ArchiveSlice::whole(Arc::clone(&physical));
        let sub = slice.sub(4, 8).unwrap();
        assert_eq!(sub.to_vec().unwrap(), b"456789ab");

        let mut reader = sub.reader();
        reader.seek(SeekFrom::End(-2)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"ab");

        physical.close();
        assert_eq!(physical.chunk(0).unwrap_err(), ScanError::Closed);
        physical.close();

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn ram_backed_has_single_chunk() {
        let physical = Arc::new(
            PhysicalArchive::from_bytes(
                b"hello".to_vec(),
                PathBuf::from("/w/outer.jar"),
                "/w/outer.jar!inner.jar".to_string(),
            )
            .unwrap(),
        );
        assert!(physical.is_in_ram());
        assert_eq!(physical.chunk(0).unwrap().as_slice(), b"hello");
        assert!(matches!(
            physical.chunk(1).unwrap_err(),
            ScanError::Mapping { .. }
        ));
    }

    #[test]
    fn empty_backings_are_rejected() {
        let path = temp_file("empty.bin", b"");
        assert!(matches!(
            PhysicalArchive::from_file(path.canonicalize().unwrap()),
            Err(ScanError::NotArchive { .. })
        ));
        assert!(matches!(
            PhysicalArchive::from_bytes(Vec::new(), PathBuf::from("x"), "x!y".to_string()),
            Err(ScanError::NotArchive { .. })
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn slice_equality_is_structural() {
        let physical = Arc::new(
            PhysicalArchive::from_bytes(
                b"0123456789".to_vec(),
                PathBuf::from("/w/outer.jar"),
                "/w/outer.jar!a".to_string(),
            )
            .unwrap(),
        );
        let a = ArchiveSlice::whole(Arc::clone(&physical)).sub(2, 4).unwrap();
        let b = ArchiveSlice::whole(Arc::clone(&physical)).sub(2, 4).unwrap();
        let c = ArchiveSlice::whole(physical).sub(2, 5).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.sub(3, 4).is_err());
    }
}
