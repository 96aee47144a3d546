//! Concurrent construct-once factory cache.
//!
//! `SingletonMap` guarantees at most one successful construction per key.
//! The first caller for a key runs the factory; concurrent callers for the
//! same key block on the cell until construction finishes and then receive
//! the same value, or the same failure. A failed construction removes the
//! cell so a later caller can retry.
//!
//! The map lock is only held while looking up or inserting a cell, never
//! while a factory runs, so a factory may recursively call `get` for a
//! different key (the nested-archive factory relies on this).

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

enum CellState<V, E> {
    Building,
    Done(V),
    Failed(E),
}

struct Cell<V, E> {
    state: Mutex<CellState<V, E>>,
    ready: Condvar,
}

impl<V, E> Cell<V, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Building),
            ready: Condvar::new(),
        }
    }
}

pub struct SingletonMap<K, V, E> {
    cells: Mutex<HashMap<K, Arc<Cell<V, E>>>>,
}

impl<K, V, E> SingletonMap<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: K, construct: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        let (cell, is_builder) = {
            let mut cells = self.cells.lock().unwrap();
            match cells.entry(key.clone()) {
                Entry::Occupied(e) => (Arc::clone(e.get()), false),
                Entry::Vacant(e) => {
                    let cell = Arc::new(Cell::new());
                    e.insert(Arc::clone(&cell));
                    (cell, true)
                }
            }
        };

        if is_builder {
            let result = construct();
            if result.is_err() {
                // Drop the cell so the key can be retried, but only if it is
                // still ours (a retry may already have replaced it).
                let mut cells = self.cells.lock().unwrap();
                if let Some(current) = cells.get(&key) {
                    if Arc::ptr_eq(current, &cell) {
                        cells.remove(&key);
                    }
                }
            }
            let mut state = cell.state.lock().unwrap();
            *state = match &result {
                Ok(v) => CellState::Done(v.clone()),
                Err(e) => CellState::Failed(e.clone()),
            };
            drop(state);
            cell.ready.notify_all();
            return result;
        }

        let mut state = cell.state.lock().unwrap();
        while matches!(*state, CellState::Building) {
            state = cell.ready.wait(state).unwrap();
        }
        match &*state {
            CellState::Done(v) => Ok(v.clone()),
            CellState::Failed(e) => Err(e.clone()),
            CellState::Building => unreachable!(),
        }
    }

    /// Successfully constructed values; in-flight and failed cells are
    /// skipped.
    pub fn values(&self) -> Vec<V> {
        let cells = self.cells.lock().unwrap();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells.values() {
            if let CellState::Done(v) = &*cell.state.lock().unwrap() {
                out.push(v.clone());
            }
        }
        out
    }

    /// Discard all cells. Callers must already have drained dependents.
    pub fn clear(&self) {
        self.cells.lock().unwrap().clear();
    }
}

impl<K, V, E> Default for SingletonMap<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn constructs_once_per_key_across_threads() {
        let map: SingletonMap<u32, u32, String> = SingletonMap::new();
        let constructions = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let v = map
                        .get(7, || {
                            constructions.fetch_add(1, Ordering::SeqCst);
                            // Give racing threads a chance to pile onto the cell.
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(42)
                        })
                        .unwrap();
                    assert_eq!(v, 42);
                });
            }
        });

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert_eq!(map.values(), vec![42]);
    }

    #[test]
    fn failed_construction_is_retryable() {
        let map: SingletonMap<&str, u32, String> = SingletonMap::new();

        let err = map.get("k", || Err("boom".to_string())).unwrap_err();
        assert_eq!(err, "boom");
        assert!(map.values().is_empty());

        let v = map.get("k", || Ok(5)).unwrap();
        assert_eq!(v, 5);
        assert_eq!(map.values(), vec![5]);
    }

    #[test]
    fn distinct_keys_construct_independently() {
        let map: SingletonMap<u32, u32, String> = SingletonMap::new();
        assert_eq!(map.get(1, || Ok(10)).unwrap(), 10);
        assert_eq!(map.get(2, || Ok(20)).unwrap(), 20);
        let mut values = map.values();
        values.sort();
        assert_eq!(values, vec![10, 20]);
        map.clear();
        assert!(map.values().is_empty());
    }
}
