use std::path::{Path, PathBuf};

pub fn is_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Normalize a path string: backslashes become forward slashes, `.`
/// segments are dropped, `..` segments are resolved textually, repeated
/// slashes are collapsed. A trailing slash is preserved because it carries
/// directory intent for `!`-delimited archive-internal paths.
pub fn normalize(path: &str) -> String {
    let p = path.trim().replace('\\', "/");
    if is_url(&p) {
        return p;
    }

    let absolute = p.starts_with('/');
    let trailing = p.len() > 1 && p.ends_with('/');

    let mut out: Vec<&str> = Vec::new();
    for comp in p.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|c| *c != "..") {
                    out.pop();
                } else if !absolute {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }

    let mut result = String::new();
    if absolute {
        result.push('/');
    }
    result.push_str(&out.join("/"));
    if trailing && !result.ends_with('/') {
        result.push('/');
    }
    if result.is_empty() {
        result.push('.');
    }
    result
}

/// Resolve a raw path against a parent directory. Absolute paths, drive
/// paths and URLs ignore the parent.
pub fn resolve(parent: &str, raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return normalize(parent);
    }
    if is_url(raw) || is_absolute(raw) || parent.is_empty() {
        return normalize(raw);
    }
    normalize(&format!("{parent}/{raw}"))
}

pub fn canonicalize(path: &str) -> std::io::Result<PathBuf> {
    Path::new(path).canonicalize()
}
