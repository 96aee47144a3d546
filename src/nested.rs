//! Open and read archives that may be nested inside other archives.
//!
//! A nested path has the form `outer!inner!leaf`: every `!`-delimited
//! segment after the first names an entry inside the preceding archive.
//! The handler memoizes every stage through singleton maps, so any two
//! paths that reach the same archive share one physical backing, one
//! parsed central directory, and one set of temp files.
//!
//! Stored nested archives are addressed as a slice of the parent's
//! backing without copying. Deflated nested archives are inflated to RAM
//! when small, or streamed to a registered temp file when large or of
//! untrusted size. Everything the handler allocates is torn down by
//! `close()` in a fixed order: logical archives, then physical backings,
//! then temp files.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use flate2::read::DeflateDecoder;
use flate2::{Decompress, FlushDecompress, Status};
use tracing::{debug, warn};

use crate::config::ScanSpec;
use crate::error::ScanError;
use crate::logical::{FastEntry, LogicalArchive};
use crate::path;
use crate::physical::{ArchiveSlice, PhysicalArchive, CHUNK_SIZE};
use crate::recycler::{Borrowed, Recycler, SimpleRecycler};
use crate::singleton::SingletonMap;

/// Separator between the random part of a temp filename and the sanitized
/// leaf it was extracted from. Part of the external contract so tooling
/// can identify session temp files.
pub const TEMP_FILENAME_LEAF_SEPARATOR: &str = "---";

const TEMP_PREFIX: &str = "classpath-scanner-";

/// Deflated nested archives at or above this uncompressed size are
/// extracted to disk instead of RAM.
const INFLATE_TO_DISK_THRESHOLD: u64 = 32 * 1024 * 1024;

/// A reusable raw-deflate decompressor, pooled by the handler.
pub struct Inflater {
    raw: Decompress,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            raw: Decompress::new(false),
        }
    }

    pub fn inflate(
        &mut self,
        name: &str,
        input: &[u8],
        uncompressed_size: u64,
    ) -> Result<Vec<u8>, ScanError> {
        self.raw.reset(false);
        let cap = uncompressed_size.clamp(64, CHUNK_SIZE) as usize;
        let mut out = Vec::with_capacity(cap);
        loop {
            let consumed = (self.raw.total_in() as usize).min(input.len());
            let status = self
                .raw
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Finish)
                .map_err(|e| ScanError::Extraction {
                    path: name.to_string(),
                    reason: e.to_string(),
                })?;
            match status {
                Status::StreamEnd => return Ok(out),
                Status::Ok | Status::BufError => {
                    if out.len() == out.capacity() {
                        out.reserve(64 * 1024);
                    } else if self.raw.total_in() as usize >= input.len() {
                        return Err(ScanError::Extraction {
                            path: name.to_string(),
                            reason: "deflated data is truncated".to_string(),
                        });
                    }
                }
            }
        }
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference to a module whose resources can be opened through a pooled
/// reader: a jmod archive or a plain modular jar.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    pub name: String,
    pub location: PathBuf,
}

pub struct ModuleReader {
    archive: zip::ZipArchive<File>,
    classes_prefix: bool,
}

impl ModuleReader {
    fn open(module: &ModuleRef) -> Result<Self, ScanError> {
        let file = File::open(&module.location)
            .map_err(|e| ScanError::io(module.location.display(), e))?;
        let archive = zip::ZipArchive::new(file)
            .map_err(|e| ScanError::not_archive(module.location.display(), e))?;
        // jmod archives keep class files under a classes/ root.
        let classes_prefix = module.location.extension().is_some_and(|e| e == "jmod");
        Ok(Self {
            archive,
            classes_prefix,
        })
    }

    pub fn read(&mut self, resource: &str) -> Result<Vec<u8>, ScanError> {
        let name = if self.classes_prefix {
            format!("classes/{resource}")
        } else {
            resource.to_string()
        };
        let mut entry = self
            .archive
            .by_name(&name)
            .map_err(|_| ScanError::NotFound(name.clone()))?;
        let mut out = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut out)
            .map_err(|e| ScanError::io(&name, e))?;
        Ok(out)
    }
}

/// Owning pooled borrow of a module reader; returned to the pool on drop.
pub struct PooledModuleReader {
    recycler: Arc<Recycler<ModuleReader>>,
    reader: Option<ModuleReader>,
}

impl Deref for PooledModuleReader {
    type Target = ModuleReader;

    fn deref(&self) -> &ModuleReader {
        self.reader.as_ref().expect("module reader already returned")
    }
}

impl DerefMut for PooledModuleReader {
    fn deref_mut(&mut self) -> &mut ModuleReader {
        self.reader.as_mut().expect("module reader already returned")
    }
}

impl Drop for PooledModuleReader {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            self.recycler.release(reader);
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    parent: ArchiveSlice,
    name: String,
}

pub struct NestedArchiveHandler {
    spec: ScanSpec,
    closed: Arc<AtomicBool>,
    inflaters: SimpleRecycler<Inflater>,
    physical_by_file: SingletonMap<PathBuf, Arc<PhysicalArchive>, ScanError>,
    slice_by_entry: SingletonMap<EntryKey, ArchiveSlice, ScanError>,
    logical_by_slice: SingletonMap<ArchiveSlice, Arc<LogicalArchive>, ScanError>,
    by_nested_path: SingletonMap<String, (Arc<LogicalArchive>, String), ScanError>,
    module_readers: SingletonMap<ModuleRef, Arc<Recycler<ModuleReader>>, ScanError>,
    allocated_logicals: Mutex<Vec<Arc<LogicalArchive>>>,
    additional_physicals: Mutex<Vec<Arc<PhysicalArchive>>>,
    temp_files: Mutex<VecDeque<PathBuf>>,
}

impl NestedArchiveHandler {
    pub fn new(spec: ScanSpec) -> Self {
        Self {
            spec,
            closed: Arc::new(AtomicBool::new(false)),
            inflaters: SimpleRecycler::new(Inflater::new),
            physical_by_file: SingletonMap::new(),
            slice_by_entry: SingletonMap::new(),
            logical_by_slice: SingletonMap::new(),
            by_nested_path: SingletonMap::new(),
            module_readers: SingletonMap::new(),
            allocated_logicals: Mutex::new(Vec::new()),
            additional_physicals: Mutex::new(Vec::new()),
            temp_files: Mutex::new(VecDeque::new()),
        }
    }

    /// Resolve a possibly nested path to a logical archive and the package
    /// root within it. Memoized: equal normalized paths share one result.
    pub fn open(&self, nested_path: &str) -> Result<(Arc<LogicalArchive>, String), ScanError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScanError::Closed);
        }
        let normalized = path::normalize(nested_path);
        self.by_nested_path
            .get(normalized.clone(), || self.open_uncached(&normalized))
    }

    fn open_uncached(
        &self,
        nested_path: &str,
    ) -> Result<(Arc<LogicalArchive>, String), ScanError> {
        match nested_path.rfind('!') {
            None => self.open_top_level(nested_path),
            Some(idx) => self.open_nested(&nested_path[..idx], &nested_path[idx + 1..]),
        }
    }

    fn open_top_level(&self, raw: &str) -> Result<(Arc<LogicalArchive>, String), ScanError> {
        let canonical = if path::is_url(raw) {
            if !self.spec.enable_remote_jar_scanning {
                return Err(ScanError::Disabled("remote jar"));
            }
            self.download_to_temp_file(raw)?
        } else {
            path::canonicalize(raw).map_err(|_| ScanError::NotFound(raw.to_string()))?
        };

        let meta = std::fs::metadata(&canonical)
            .map_err(|_| ScanError::NotFound(canonical.display().to_string()))?;
        if !meta.is_file() {
            return Err(ScanError::not_archive(
                canonical.display(),
                "expected a regular file",
            ));
        }

        let physical = self.physical_for_file(canonical)?;
        let logical = self.logical_for_slice(ArchiveSlice::whole(physical))?;
        Ok((logical, String::new()))
    }

    fn open_nested(
        &self,
        parent_raw: &str,
        child_raw: &str,
    ) -> Result<(Arc<LogicalArchive>, String), ScanError> {
        // "outer.jar!/path" means the same as "outer.jar!path".
        let mut child = child_raw.trim_start_matches('/').to_string();

        // One '!' section is removed per frame, so the recursion terminates.
        let (parent_archive, _) = self.open(parent_raw)?;

        let mut is_directory = false;
        while child.ends_with('/') {
            is_directory = true;
            child.pop();
        }

        let mut child_entry = None;
        if !is_directory {
            child_entry = parent_archive.entry(&child).cloned();
        }
        if child_entry.is_none() && !is_directory {
            let prefix = format!("{child}/");
            if parent_archive
                .entries()
                .iter()
                .any(|e| e.name.starts_with(&prefix))
            {
                is_directory = true;
            } else {
                return Err(ScanError::NotFound(format!(
                    "{child} does not exist in {}",
                    parent_archive.path()
                )));
            }
        }

        if is_directory {
            if !child.is_empty() {
                debug!(
                    archive = %parent_archive.path(),
                    root = %child,
                    "directory path used as package root"
                );
                parent_archive.add_classpath_root(&child);
            }
            return Ok((parent_archive, child));
        }

        if !self.spec.scan_nested_jars {
            return Err(ScanError::Disabled("nested jar"));
        }

        let Some(entry) = child_entry else {
            return Err(ScanError::NotFound(format!(
                "{child} does not exist in {}",
                parent_archive.path()
            )));
        };
        let key = EntryKey {
            parent: parent_archive.slice().clone(),
            name: entry.name.clone(),
        };
        let slice = self
            .slice_by_entry
            .get(key, || self.slice_for_entry(&parent_archive, &entry))?;
        let logical = self.logical_for_slice(slice)?;
        Ok((logical, String::new()))
    }

    fn physical_for_file(&self, canonical: PathBuf) -> Result<Arc<PhysicalArchive>, ScanError> {
        let closed = Arc::clone(&self.closed);
        self.physical_by_file.get(canonical.clone(), move || {
            if closed.load(Ordering::Acquire) {
                return Err(ScanError::Closed);
            }
            PhysicalArchive::from_file(canonical).map(Arc::new)
        })
    }

    fn logical_for_slice(&self, slice: ArchiveSlice) -> Result<Arc<LogicalArchive>, ScanError> {
        self.logical_by_slice.get(slice.clone(), || {
            if self.closed.load(Ordering::Acquire) {
                return Err(ScanError::Closed);
            }
            let logical = Arc::new(LogicalArchive::parse(slice)?);
            self.allocated_logicals
                .lock()
                .unwrap()
                .push(Arc::clone(&logical));
            Ok(logical)
        })
    }

    /// Turn a nested-archive entry into a slice: directly for stored
    /// entries, via a temp file for large deflated entries, via RAM for
    /// the rest.
    fn slice_for_entry(
        &self,
        parent: &Arc<LogicalArchive>,
        entry: &FastEntry,
    ) -> Result<ArchiveSlice, ScanError> {
        if !entry.is_deflated {
            // Most nested archives are stored, so the common path is a
            // zero-copy slice of the parent's backing.
            return parent.slice().sub(entry.offset, entry.compressed_size);
        }

        if entry.uncompressed_size >= INFLATE_TO_DISK_THRESHOLD
            || entry.compressed_size >= INFLATE_TO_DISK_THRESHOLD
        {
            match self.extract_to_temp_file(parent, entry) {
                Ok(slice) => return Ok(slice),
                Err(e) => {
                    warn!(
                        entry = %entry.name,
                        error = %e,
                        "temp-file extraction failed, inflating to memory instead"
                    );
                }
            }
        }

        if entry.uncompressed_size > CHUNK_SIZE {
            return Err(ScanError::TooLarge {
                path: entry.name.clone(),
                size: entry.uncompressed_size,
            });
        }

        debug!(
            entry = %entry.name,
            size = entry.uncompressed_size,
            "inflating nested archive to memory"
        );
        let raw = parent.raw_bytes(entry)?;
        let inflated = {
            let mut inflater = self.inflaters.acquire_scoped()?;
            inflater.inflate(&entry.name, &raw, entry.uncompressed_size)?
        };
        let nested_path = format!("{}!{}", parent.path(), entry.name);
        let physical = Arc::new(PhysicalArchive::from_bytes(
            inflated,
            parent.slice().physical().outermost_file().to_path_buf(),
            nested_path,
        )?);
        self.additional_physicals
            .lock()
            .unwrap()
            .push(Arc::clone(&physical));
        Ok(ArchiveSlice::whole(physical))
    }

    fn extract_to_temp_file(
        &self,
        parent: &Arc<LogicalArchive>,
        entry: &FastEntry,
    ) -> Result<ArchiveSlice, ScanError> {
        let (mut file, temp_path) = self.make_temp_file(&entry.name)?;
        debug!(
            entry = %entry.name,
            size = entry.uncompressed_size,
            temp = %temp_path.display(),
            "extracting nested archive to temp file"
        );

        let written: Result<(), ScanError> = (|| {
            let sub = parent.slice().sub(entry.offset, entry.compressed_size)?;
            let mut decoder = DeflateDecoder::new(sub.reader());
            std::io::copy(&mut decoder, &mut file).map_err(|e| ScanError::Extraction {
                path: entry.name.clone(),
                reason: e.to_string(),
            })?;
            file.flush().map_err(|e| ScanError::Extraction {
                path: entry.name.clone(),
                reason: e.to_string(),
            })
        })();
        drop(file);

        if let Err(e) = written {
            // Partial data must not survive (the disk may have filled); the
            // registry entry stays and close() tolerates missing files.
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        let canonical = temp_path
            .canonicalize()
            .map_err(|e| ScanError::io(temp_path.display(), e))?;
        let physical = self.physical_for_file(canonical)?;
        self.additional_physicals
            .lock()
            .unwrap()
            .push(Arc::clone(&physical));
        Ok(ArchiveSlice::whole(physical))
    }

    fn make_temp_file(&self, file_path: &str) -> Result<(File, PathBuf), ScanError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScanError::Closed);
        }
        let leaf = file_path.rsplit('/').next().unwrap_or(file_path);
        let named = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(&format!(
                "{TEMP_FILENAME_LEAF_SEPARATOR}{}",
                sanitize_filename(leaf)
            ))
            .tempfile()
            .map_err(|e| ScanError::Extraction {
                path: file_path.to_string(),
                reason: e.to_string(),
            })?;
        let (file, temp_path) = named.keep().map_err(|e| ScanError::Extraction {
            path: file_path.to_string(),
            reason: e.to_string(),
        })?;
        self.temp_files.lock().unwrap().push_back(temp_path.clone());
        Ok((file, temp_path))
    }

    fn download_to_temp_file(&self, url: &str) -> Result<PathBuf, ScanError> {
        let (file, temp_path) = self.make_temp_file(url)?;
        drop(file);
        debug!(url, temp = %temp_path.display(), "downloading remote jar");

        let target = temp_path.to_str().ok_or_else(|| ScanError::Extraction {
            path: url.to_string(),
            reason: "temp path is not valid UTF-8".to_string(),
        })?;
        let status = Command::new("curl")
            .args(["-L", "--fail", "--silent", "--show-error", "-o", target, url])
            .status()
            .map_err(|e| ScanError::Extraction {
                path: url.to_string(),
                reason: format!("failed to run curl: {e}"),
            })?;
        if !status.success() {
            let _ = std::fs::remove_file(&temp_path);
            return Err(ScanError::Extraction {
                path: url.to_string(),
                reason: format!("download failed (exit: {status})"),
            });
        }
        temp_path
            .canonicalize()
            .map_err(|e| ScanError::io(temp_path.display(), e))
    }

    pub fn borrow_inflater(&self) -> Result<Borrowed<'_, Inflater>, ScanError> {
        self.inflaters.acquire_scoped()
    }

    pub fn borrow_module_reader(
        &self,
        module: &ModuleRef,
    ) -> Result<PooledModuleReader, ScanError> {
        let recycler = self.module_readers.get(module.clone(), || {
            if self.closed.load(Ordering::Acquire) {
                return Err(ScanError::Closed);
            }
            let module = module.clone();
            let closed = Arc::clone(&self.closed);
            Ok(Arc::new(Recycler::new(move || {
                if closed.load(Ordering::Acquire) {
                    return Err(ScanError::Closed);
                }
                ModuleReader::open(&module)
            })))
        })?;
        let reader = recycler.acquire()?;
        Ok(PooledModuleReader {
            recycler,
            reader: Some(reader),
        })
    }

    /// The entry's uncompressed bytes, inflated through a pooled inflater
    /// when needed.
    pub fn read_entry(
        &self,
        archive: &LogicalArchive,
        entry: &FastEntry,
    ) -> Result<Vec<u8>, ScanError> {
        let raw = archive.raw_bytes(entry)?;
        if !entry.is_deflated {
            return Ok(raw);
        }
        let mut inflater = self.inflaters.acquire_scoped()?;
        inflater.inflate(&entry.name, &raw, entry.uncompressed_size)
    }

    pub fn temp_file_count(&self) -> usize {
        self.temp_files.lock().unwrap().len()
    }

    /// Tear everything down: recyclers, factory maps, logical archives,
    /// physical backings, temp files — in that order, so no mapping is
    /// alive when its backing file is closed or deleted. Idempotent.
    pub fn close(&self) -> Result<(), ScanError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.inflaters.force_close();
        for recycler in self.module_readers.values() {
            recycler.force_close();
        }
        self.module_readers.clear();

        self.logical_by_slice.clear();
        self.by_nested_path.clear();
        for logical in self.allocated_logicals.lock().unwrap().drain(..) {
            logical.close();
        }
        for physical in self.physical_by_file.values() {
            physical.close();
        }
        self.physical_by_file.clear();
        for physical in self.additional_physicals.lock().unwrap().drain(..) {
            physical.close();
        }
        self.slice_by_entry.clear();

        // Temp files go last, in reverse creation order, once every mapping
        // over them has been released.
        let mut failures = Vec::new();
        let mut temp_files = self.temp_files.lock().unwrap();
        while let Some(path) = temp_files.pop_back() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(temp = %path.display(), "removed temp file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(temp = %path.display(), error = %e, "unable to remove temp file");
                    failures.push(format!("{}: {e}", path.display()));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ScanError::Close(failures.join("; ")))
        }
    }
}

impl Drop for NestedArchiveHandler {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '?' | '&' | '=' | ' ' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::Path;
    use zip::write::FileOptions;

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "classpath_scanner_nested_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn jar_bytes(entries: &[(&str, &[u8], bool)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content, deflated) in entries {
            let method = if *deflated {
                zip::CompressionMethod::Deflated
            } else {
                zip::CompressionMethod::Stored
            };
            zip.start_file(*name, FileOptions::default().compression_method(method))
                .unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn write_jar(path: &Path, entries: &[(&str, &[u8], bool)]) {
        std::fs::write(path, jar_bytes(entries)).unwrap();
    }

    fn nested_spec() -> ScanSpec {
        ScanSpec {
            num_worker_threads: 1,
            ..ScanSpec::default()
        }
    }

    #[test]
    fn open_is_memoized_per_normalized_path() {
        let dir = temp_dir("memoized");
        let jar = dir.join("outer.jar");
        write_jar(&jar, &[("pkg/A.class", b"a", false)]);

        let handler = NestedArchiveHandler::new(nested_spec());
        let (first, root) = handler.open(jar.to_str().unwrap()).unwrap();
        assert_eq!(root, "");
        let dotted = format!("{}/./outer.jar", dir.display());
        let (second, _) = handler.open(&dotted).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        handler.close().unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn stored_nested_archive_shares_the_parent_backing() {
        let dir = temp_dir("stored");
        let inner = jar_bytes(&[("com/x/Y.class", b"class-bytes", false)]);
        let outer = dir.join("outer.jar");
        write_jar(&outer, &[("inner.jar", &inner, false)]);

        let handler = NestedArchiveHandler::new(nested_spec());
        let (outer_archive, _) = handler.open(outer.to_str().unwrap()).unwrap();
        let nested_path = format!("{}!inner.jar", outer.display());
        let (inner_archive, root) = handler.open(&nested_path).unwrap();

        assert_eq!(root, "");
        assert!(Arc::ptr_eq(
            outer_archive.slice().physical(),
            inner_archive.slice().physical()
        ));
        assert!(inner_archive.slice().offset() > 0);
        assert!(inner_archive.entry("com/x/Y.class").is_some());
        assert_eq!(handler.temp_file_count(), 0);

        handler.close().unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn small_deflated_nested_archive_is_inflated_to_ram() {
        let dir = temp_dir("deflated");
        let inner = jar_bytes(&[("pkg/Big.class", &vec![0u8; 256 * 1024], true)]);
        let outer = dir.join("outer.jar");
        write_jar(&outer, &[("inner.jar", &inner, true)]);

        let handler = NestedArchiveHandler::new(nested_spec());
        let nested_path = format!("{}!inner.jar", outer.display());
        let (inner_archive, _) = handler.open(&nested_path).unwrap();

        assert!(inner_archive.slice().physical().is_in_ram());
        assert_eq!(handler.temp_file_count(), 0);

        let entry = inner_archive.entry("pkg/Big.class").unwrap().clone();
        let bytes = handler.read_entry(&inner_archive, &entry).unwrap();
        assert_eq!(bytes, vec![0u8; 256 * 1024]);

        handler.close().unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn directory_child_becomes_a_package_root() {
        let dir = temp_dir("dirchild");
        let jar = dir.join("outer.jar");
        write_jar(
            &jar,
            &[
                ("BOOT-INF/classes/a/A.class", b"a", false),
                ("other/B.class", b"b", false),
            ],
        );

        let handler = NestedArchiveHandler::new(nested_spec());
        let (archive, root) = handler
            .open(&format!("{}!/BOOT-INF/classes", jar.display()))
            .unwrap();
        assert_eq!(root, "BOOT-INF/classes");
        assert_eq!(archive.classpath_roots(), vec!["BOOT-INF/classes"]);

        // A trailing slash is an explicit directory marker.
        let (_, root) = handler
            .open(&format!("{}!other/", jar.display()))
            .unwrap();
        assert_eq!(root, "other");

        handler.close().unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_child_and_disabled_modes_fail() {
        let dir = temp_dir("failures");
        let inner = jar_bytes(&[("x", b"x", false)]);
        let jar = dir.join("outer.jar");
        write_jar(&jar, &[("inner.jar", &inner, false)]);

        let handler = NestedArchiveHandler::new(nested_spec());
        assert!(matches!(
            handler.open(&format!("{}!nope.jar", jar.display())),
            Err(ScanError::NotFound(_))
        ));
        assert!(matches!(
            handler.open("https://example.com/remote.jar"),
            Err(ScanError::Disabled("remote jar"))
        ));
        handler.close().unwrap();

        let no_nested = NestedArchiveHandler::new(ScanSpec {
            scan_nested_jars: false,
            num_worker_threads: 1,
            ..ScanSpec::default()
        });
        assert!(matches!(
            no_nested.open(&format!("{}!inner.jar", jar.display())),
            Err(ScanError::Disabled("nested jar"))
        ));
        no_nested.close().unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn module_readers_are_pooled_per_module() {
        let dir = temp_dir("modules");
        let jmod = dir.join("java.base.jmod");
        write_jar(
            &jmod,
            &[("classes/java/lang/Object.class", b"object-bytes", true)],
        );

        let handler = NestedArchiveHandler::new(nested_spec());
        let module = ModuleRef {
            name: "java.base".to_string(),
            location: jmod.clone(),
        };

        {
            let mut reader = handler.borrow_module_reader(&module).unwrap();
            // jmod resources are addressed without the classes/ prefix.
            assert_eq!(
                reader.read("java/lang/Object.class").unwrap(),
                b"object-bytes"
            );
            assert!(matches!(
                reader.read("java/lang/Missing.class"),
                Err(ScanError::NotFound(_))
            ));
        }
        // The returned reader is reused by the next borrow.
        let _again = handler.borrow_module_reader(&module).unwrap();

        handler.close().unwrap();
        assert!(handler.borrow_module_reader(&module).is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn close_is_idempotent_and_rejects_further_opens() {
        let dir = temp_dir("close");
        let jar = dir.join("outer.jar");
        write_jar(&jar, &[("a", b"a", false)]);

        let handler = NestedArchiveHandler::new(nested_spec());
        handler.open(jar.to_str().unwrap()).unwrap();
        handler.close().unwrap();
        handler.close().unwrap();
        assert_eq!(
            handler.open(jar.to_str().unwrap()).unwrap_err(),
            ScanError::Closed
        );
        assert!(handler.borrow_inflater().is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn temp_filenames_sanitize_the_leaf() {
        assert_eq!(sanitize_filename("a/b\\c:d?e&f=g h"), "a_b_c_d_e_f_g_h");

        let handler = NestedArchiveHandler::new(nested_spec());
        let (_, path) = handler.make_temp_file("lib/my inner.jar").unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(TEMP_PREFIX));
        assert!(name.ends_with(&format!(
            "{TEMP_FILENAME_LEAF_SEPARATOR}my_inner.jar"
        )));
        assert_eq!(handler.temp_file_count(), 1);
        handler.close().unwrap();
        assert!(!path.exists());
    }
}
