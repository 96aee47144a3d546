use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use memmap2::Mmap;
use zip::result::ZipError;

use crate::error::ScanError;

const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// The manifest `Class-Path` attribute of a jar, or `None` when the jar has
/// no manifest or the manifest has no such attribute.
pub fn class_path_attribute(jar: &Path) -> Result<Option<String>, ScanError> {
    let file = File::open(jar).map_err(|e| ScanError::io(jar.display(), e))?;
    // SAFETY: the file is opened read-only and the mapping is dropped
    // before the file handle.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| ScanError::Mapping {
        path: jar.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut archive = zip::ZipArchive::new(Cursor::new(&mmap[..]))
        .map_err(|e| ScanError::not_archive(jar.display(), e))?;

    let mut entry = match archive.by_name(MANIFEST_PATH) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ScanError::not_archive(jar.display(), e)),
    };
    let mut manifest = String::new();
    entry
        .read_to_string(&mut manifest)
        .map_err(|e| ScanError::io(jar.display(), e))?;

    Ok(attribute_value(&manifest, "Class-Path"))
}

/// Look up a main-section manifest attribute. Values wrapped across 72-byte
/// manifest lines are unfolded first (a continuation line begins with a
/// single space).
pub fn attribute_value(manifest: &str, name: &str) -> Option<String> {
    let unfolded = manifest.replace("\r\n", "\n").replace("\n ", "");
    for line in unfolded.lines() {
        // A blank line ends the main section; per-entry sections cannot
        // contribute a Class-Path.
        if line.is_empty() {
            break;
        }
        let Some((header, value)) = line.split_once(':') else {
            continue;
        };
        if header.eq_ignore_ascii_case(name) {
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use zip::write::FileOptions;

    fn temp_jar(name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "classpath_scanner_manifest_{}_{}_{}.jar",
            std::process::id(),
            nanos,
            name
        ));
        let file = File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default();
        for (entry_name, content) in entries {
            zip.start_file(*entry_name, options).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    #[test]
    fn reads_class_path_from_manifest() {
        let jar = temp_jar(
            "cp",
            &[(
                MANIFEST_PATH,
                b"Manifest-Version: 1.0\r\nClass-Path: c.jar d.jar\r\n\r\n" as &[u8],
            )],
        );
        assert_eq!(
            class_path_attribute(&jar).unwrap().as_deref(),
            Some("c.jar d.jar")
        );
        let _ = std::fs::remove_file(jar);
    }

    #[test]
    fn jar_without_manifest_yields_none() {
        let jar = temp_jar("none", &[("a/A.class", b"" as &[u8])]);
        assert_eq!(class_path_attribute(&jar).unwrap(), None);
        let _ = std::fs::remove_file(jar);
    }

    #[test]
    fn unfolds_wrapped_attribute_values() {
        let manifest = "Manifest-Version: 1.0\r\nClass-Path: first.jar second\r\n .jar third.jar\r\n\r\n";
        assert_eq!(
            attribute_value(manifest, "Class-Path").as_deref(),
            Some("first.jar second.jar third.jar")
        );
    }

    #[test]
    fn attribute_names_are_case_insensitive() {
        let manifest = "class-path: a.jar\n";
        assert_eq!(attribute_value(manifest, "Class-Path").as_deref(), Some("a.jar"));
    }

    #[test]
    fn per_entry_sections_are_ignored() {
        let manifest = "Manifest-Version: 1.0\n\nName: x.class\nClass-Path: bogus.jar\n";
        assert_eq!(attribute_value(manifest, "Class-Path"), None);
    }
}
