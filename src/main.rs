use anyhow::{Context, Result};
use clap::Parser;
use classpath_scanner::cli::{Cli, Commands};
use classpath_scanner::config::{classpath_separator, ScanSpec};
use classpath_scanner::nested::NestedArchiveHandler;
use classpath_scanner::resolver::ClasspathResolver;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let spec = ScanSpec::from_cli(&cli);

    match cli.command.clone() {
        Commands::Resolve { classpath } => {
            let result = resolve_classpath(spec, &classpath)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Entries { path } => {
            let result = list_entries(spec, &path)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Cat {
            path,
            entry,
            output,
        } => {
            cat_entry(spec, &path, &entry, output.as_deref())?;
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct ResolveResult {
    raw_entries: usize,
    resolved: Vec<String>,
    duration_ms: u64,
}

fn resolve_classpath(spec: ScanSpec, classpath: &str) -> Result<ResolveResult> {
    let start = Instant::now();
    let raw: Vec<String> = classpath
        .split(classpath_separator())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let raw_entries = raw.len();

    let resolver = ClasspathResolver::new(spec, raw)?;
    let resolved = resolver
        .resolve()
        .with_context(|| format!("无法解析 classpath: {classpath}"))?;

    Ok(ResolveResult {
        raw_entries,
        resolved: resolved
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

#[derive(Debug, Serialize)]
struct EntriesResult {
    archive: String,
    package_root: String,
    entries: Vec<EntryRow>,
}

#[derive(Debug, Serialize)]
struct EntryRow {
    name: String,
    compressed_size: u64,
    uncompressed_size: u64,
    deflated: bool,
}

fn list_entries(spec: ScanSpec, path: &str) -> Result<EntriesResult> {
    let handler = NestedArchiveHandler::new(spec);
    let (archive, package_root) = handler
        .open(path)
        .with_context(|| format!("无法打开归档: {path}"))?;

    let entries = archive
        .entries()
        .iter()
        .map(|e| EntryRow {
            name: e.name.clone(),
            compressed_size: e.compressed_size,
            uncompressed_size: e.uncompressed_size,
            deflated: e.is_deflated,
        })
        .collect();

    let result = EntriesResult {
        archive: archive.path(),
        package_root,
        entries,
    };
    handler.close()?;
    Ok(result)
}

fn cat_entry(spec: ScanSpec, path: &str, entry_name: &str, output: Option<&Path>) -> Result<()> {
    let handler = NestedArchiveHandler::new(spec);
    let (archive, _) = handler
        .open(path)
        .with_context(|| format!("无法打开归档: {path}"))?;
    let entry = archive
        .entry(entry_name)
        .with_context(|| format!("归档 {path} 中未找到条目: {entry_name}"))?
        .clone();
    let bytes = handler.read_entry(&archive, &entry)?;

    if let Some(out_path) = output {
        if let Some(parent) = out_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(out_path, &bytes)?;
    } else {
        std::io::stdout().write_all(&bytes)?;
    }
    handler.close()?;
    Ok(())
}
