//! Concurrent classpath resolution.
//!
//! Raw classpath strings become work units on a priority queue ordered by
//! `OrderKey`, drained by a fixed pool of workers (the calling thread is
//! one of them). A jar accepted by validation may enqueue further units
//! for its manifest `Class-Path` references, keyed so they sort directly
//! after the referring jar and before its next sibling — the order the
//! platform class loader would load them in. Dedup is first-wins by key:
//! among identical canonical paths the smallest order key survives.

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::ScanSpec;
use crate::error::ScanError;
use crate::manifest;
use crate::path;

/// Zero-padded dotted position string; lexicographic order is classpath
/// precedence, lower wins. Child keys extend their parent, so they sort
/// strictly between the parent and the parent's next sibling.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey(String);

impl OrderKey {
    pub fn top_level(index: usize, count: usize) -> Self {
        OrderKey(zero_pad(index, count))
    }

    pub fn child(&self, index: usize, count: usize) -> Self {
        OrderKey(format!("{}.{}", self.0, zero_pad(index, count)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn zero_pad(index: usize, count: usize) -> String {
    let width = count.saturating_sub(1).to_string().len();
    format!("{index:0width$}")
}

#[derive(Clone, Debug)]
struct OrderedClasspathElement {
    key: OrderKey,
    parent_path: String,
    raw_path: String,
}

// Keys are unique per live work unit, so ordering on the key alone is
// total.
impl PartialEq for OrderedClasspathElement {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for OrderedClasspathElement {}

impl Ord for OrderedClasspathElement {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for OrderedClasspathElement {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct AcceptedElement {
    key: OrderKey,
    canonical: PathBuf,
    is_file: bool,
}

const SYSTEM_JAR_NAMES: &[&str] = &[
    "rt.jar",
    "jce.jar",
    "jsse.jar",
    "charsets.jar",
    "resources.jar",
    "jfr.jar",
];

struct ResolverState {
    queue: Mutex<BinaryHeap<Reverse<OrderedClasspathElement>>>,
    queue_ready: Condvar,
    remaining: AtomicUsize,
    kill_all: AtomicBool,
    earliest_key: Mutex<HashMap<PathBuf, OrderKey>>,
    known_jre_paths: Mutex<HashSet<PathBuf>>,
    valid_out: Mutex<Vec<AcceptedElement>>,
    error: Mutex<Option<ScanError>>,
    blacklist_system_jars: bool,
}

impl ResolverState {
    fn new(blacklist_system_jars: bool) -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            queue_ready: Condvar::new(),
            remaining: AtomicUsize::new(0),
            kill_all: AtomicBool::new(false),
            earliest_key: Mutex::new(HashMap::new()),
            known_jre_paths: Mutex::new(HashSet::new()),
            valid_out: Mutex::new(Vec::new()),
            error: Mutex::new(None),
            blacklist_system_jars,
        }
    }

    fn seed_jre_paths(&self) {
        if let Ok(java_home) = std::env::var("JAVA_HOME") {
            let home = PathBuf::from(java_home);
            let mut known = self.known_jre_paths.lock().unwrap();
            for dir in [home.join("lib"), home.join("jre").join("lib"), home.join("jmods")] {
                if let Ok(canonical) = dir.canonicalize() {
                    known.insert(canonical);
                }
            }
        }
    }

    /// `remaining` is bumped before the unit becomes visible, so no worker
    /// can observe an empty queue with a zero count while work is pending.
    fn enqueue(&self, element: OrderedClasspathElement) {
        self.remaining.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().unwrap().push(Reverse(element));
        self.queue_ready.notify_one();
    }

    fn finish_unit(&self) {
        self.remaining.fetch_sub(1, Ordering::SeqCst);
        self.queue_ready.notify_all();
    }

    fn fail(&self, error: ScanError) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(error);
        }
        drop(slot);
        self.kill_all.store(true, Ordering::SeqCst);
        self.queue_ready.notify_all();
    }

    /// Bounded blocking poll: a unit in flight on another worker may still
    /// enqueue children after the queue has gone empty, so emptiness alone
    /// is not completion.
    fn poll(&self) -> Result<Option<OrderedClasspathElement>, ScanError> {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if self.kill_all.load(Ordering::SeqCst) {
                return Err(ScanError::Interrupted);
            }
            if let Some(Reverse(element)) = queue.pop() {
                return Ok(Some(element));
            }
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            let (guard, _) = self
                .queue_ready
                .wait_timeout(queue, Duration::from_millis(10))
                .unwrap();
            queue = guard;
        }
    }

    fn process_work_queue(&self) -> Result<(), ScanError> {
        while self.remaining.load(Ordering::SeqCst) > 0 {
            let Some(element) = self.poll()? else {
                return Ok(());
            };
            self.process_element(&element);
            self.finish_unit();
        }
        Ok(())
    }

    fn process_element(&self, element: &OrderedClasspathElement) {
        let Some(accepted) = self.validate(element) else {
            return;
        };
        debug!(
            path = %accepted.canonical.display(),
            key = element.key.as_str(),
            "found classpath element"
        );
        let canonical = accepted.canonical.clone();
        let is_file = accepted.is_file;
        self.valid_out.lock().unwrap().push(accepted);
        if is_file {
            self.expand_manifest(&element.key, &canonical);
        }
    }

    fn validate(&self, element: &OrderedClasspathElement) -> Option<AcceptedElement> {
        let resolved = path::resolve(&element.parent_path, &element.raw_path);
        let canonical = match path::canonicalize(&resolved) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %resolved, error = %e, "skipping classpath element that does not resolve");
                return None;
            }
        };
        let meta = match std::fs::metadata(&canonical) {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %canonical.display(), error = %e, "skipping unreadable classpath element");
                return None;
            }
        };
        let is_file = meta.is_file();
        if !is_file && !meta.is_dir() {
            debug!(path = %canonical.display(), "skipping: neither a regular file nor a directory");
            return None;
        }
        if self.blacklist_system_jars && is_file && self.is_system_jar(&canonical) {
            debug!(path = %canonical.display(), "skipping system jar");
            return None;
        }

        {
            let mut earliest = self.earliest_key.lock().unwrap();
            match earliest.entry(canonical.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(element.key.clone());
                }
                Entry::Occupied(mut slot) => {
                    if *slot.get() <= element.key {
                        debug!(path = %canonical.display(), "skipping duplicate classpath element");
                        return None;
                    }
                    // This element outranks the earlier claim; the final
                    // drain drops the retracted occurrence.
                    slot.insert(element.key.clone());
                }
            }
        }

        Some(AcceptedElement {
            key: element.key.clone(),
            canonical,
            is_file,
        })
    }

    fn is_system_jar(&self, canonical: &Path) -> bool {
        {
            let known = self.known_jre_paths.lock().unwrap();
            if canonical.ancestors().skip(1).any(|dir| known.contains(dir)) {
                return true;
            }
        }
        let name = canonical.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if SYSTEM_JAR_NAMES.contains(&name) {
            if let Some(lib_dir) = canonical.parent() {
                self.known_jre_paths
                    .lock()
                    .unwrap()
                    .insert(lib_dir.to_path_buf());
            }
            return true;
        }
        false
    }

    fn expand_manifest(&self, key: &OrderKey, jar: &Path) {
        let class_path = match manifest::class_path_attribute(jar) {
            Ok(Some(value)) => value,
            Ok(None) => return,
            Err(e) => {
                debug!(jar = %jar.display(), error = %e, "unable to read manifest");
                return;
            }
        };
        debug!(jar = %jar.display(), class_path = %class_path, "found Class-Path manifest entry");

        // Manifest references resolve relative to the directory containing
        // the referring jar.
        let parent_dir = jar
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let items: Vec<&str> = class_path.split(' ').filter(|s| !s.is_empty()).collect();
        for (i, item) in items.iter().enumerate() {
            self.enqueue(OrderedClasspathElement {
                key: key.child(i, items.len()),
                parent_path: parent_dir.clone(),
                raw_path: (*item).to_string(),
            });
        }
    }

    fn into_ordered_paths(self) -> Vec<PathBuf> {
        let mut accepted = self.valid_out.into_inner().unwrap();
        accepted.sort_by(|a, b| a.key.cmp(&b.key));
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(accepted.len());
        for element in accepted {
            // A lower-keyed claim retracts an earlier acceptance of the
            // same canonical path; keep the first occurrence in key order.
            if seen.insert(element.canonical.clone()) {
                out.push(element.canonical);
            }
        }
        out
    }
}

pub struct ClasspathResolver {
    spec: ScanSpec,
    raw_classpath: Vec<String>,
    current_dir: String,
}

impl ClasspathResolver {
    pub fn new(spec: ScanSpec, raw_classpath: Vec<String>) -> Result<Self> {
        let cwd = std::env::current_dir().context("unable to determine the current directory")?;
        Ok(Self::with_current_dir(spec, raw_classpath, &cwd))
    }

    /// Resolve relative top-level entries against `current_dir` instead of
    /// the process working directory.
    pub fn with_current_dir(spec: ScanSpec, raw_classpath: Vec<String>, current_dir: &Path) -> Self {
        Self {
            spec,
            raw_classpath,
            current_dir: path::normalize(&current_dir.to_string_lossy()),
        }
    }

    /// The deduplicated, canonical classpath in precedence order. Entries
    /// that fail validation are logged and skipped, never fatal.
    pub fn resolve(&self) -> Result<Vec<PathBuf>> {
        let state = ResolverState::new(self.spec.blacklist_system_jars);
        state.seed_jre_paths();
        for (i, raw) in self.raw_classpath.iter().enumerate() {
            state.enqueue(OrderedClasspathElement {
                key: OrderKey::top_level(i, self.raw_classpath.len()),
                parent_path: self.current_dir.clone(),
                raw_path: raw.clone(),
            });
        }

        let workers = self.spec.num_worker_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .context("unable to build the resolver worker pool")?;
        pool.scope(|scope| {
            for _ in 1..workers {
                scope.spawn(|_| {
                    if let Err(e) = state.process_work_queue() {
                        state.fail(e);
                    }
                });
            }
            if let Err(e) = state.process_work_queue() {
                state.fail(e);
            }
        });

        // Cancel anything that never got scheduled, then drain.
        state.kill_all.store(true, Ordering::SeqCst);
        state.queue_ready.notify_all();

        if let Some(e) = state.error.lock().unwrap().take() {
            return Err(e.into());
        }
        Ok(state.into_ordered_paths())
    }
}
