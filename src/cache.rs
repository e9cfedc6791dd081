use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::Hash32;

#[derive(Debug, Default)]
struct CacheState {
    hashes: HashMap<Utf8PathBuf, Hash32>,
    failed: HashSet<Utf8PathBuf>,
}

/// Content fingerprints of the files seen by the previous template run.
///
/// The orchestrator owns one cache per process and hands it to tasks through
/// their context. A file is changed when its hash differs from the recorded
/// one, when it was never recorded, or when it disappeared since the last
/// commit.
#[derive(Debug, Default)]
pub struct ChangeCache {
    state: Mutex<CacheState>,
}

impl ChangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares a fresh scan against the recorded fingerprints.
    pub fn changed(&self, scan: &HashMap<Utf8PathBuf, Hash32>) -> HashSet<Utf8PathBuf> {
        let state = self.state.lock().unwrap();

        let mut changed: HashSet<_> = scan
            .iter()
            .filter(|(path, hash)| state.hashes.get(*path) != Some(*hash))
            .map(|(path, _)| path.clone())
            .collect();

        changed.extend(
            state
                .hashes
                .keys()
                .filter(|path| !scan.contains_key(*path))
                .cloned(),
        );

        changed
    }

    /// Records a scan as the new baseline.
    pub fn commit(&self, scan: HashMap<Utf8PathBuf, Hash32>) {
        self.state.lock().unwrap().hashes = scan;
    }

    /// Marks an entry point whose compilation failed so the next run retries
    /// it even if none of its inputs changed.
    pub fn mark_failed(&self, path: &Utf8Path) {
        self.state.lock().unwrap().failed.insert(path.to_owned());
    }

    pub fn clear_failed(&self, path: &Utf8Path) {
        self.state.lock().unwrap().failed.remove(path);
    }

    pub fn has_failed(&self, path: &Utf8Path) -> bool {
        self.state.lock().unwrap().failed.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(files: &[(&str, &str)]) -> HashMap<Utf8PathBuf, Hash32> {
        files
            .iter()
            .map(|(path, text)| (Utf8PathBuf::from(*path), Hash32::hash(text)))
            .collect()
    }

    #[test]
    fn everything_is_changed_initially() {
        let cache = ChangeCache::new();
        let first = scan(&[("a.html", "a"), ("_b.html", "b")]);

        assert_eq!(cache.changed(&first).len(), 2);
    }

    #[test]
    fn only_modified_added_and_removed_files_change() {
        let cache = ChangeCache::new();
        cache.commit(scan(&[("a.html", "a"), ("_b.html", "b"), ("_c.html", "c")]));

        let next = scan(&[("a.html", "a"), ("_b.html", "B"), ("_d.html", "d")]);
        let changed = cache.changed(&next);

        let expected: HashSet<Utf8PathBuf> =
            ["_b.html", "_c.html", "_d.html"].map(Utf8PathBuf::from).into();
        assert_eq!(changed, expected);
    }

    #[test]
    fn failures_are_tracked_until_cleared() {
        let cache = ChangeCache::new();
        let path = Utf8Path::new("pages/index.html");

        cache.mark_failed(path);
        assert!(cache.has_failed(path));

        cache.clear_failed(path);
        assert!(!cache.has_failed(path));
    }
}
