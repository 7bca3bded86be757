//! Reference counts of staging directories shared by live sessions.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// How many live sessions still write into each staging root.
///
/// A staging root may only be pruned once its count drops to zero.
#[derive(Debug, Default)]
pub struct StagingRefs {
    counts: DashMap<PathBuf, usize>,
}

impl StagingRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more session using `root`.
    pub fn acquire(&self, root: &Path) -> usize {
        let mut count = self.counts.entry(root.to_path_buf()).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop one session's use of `root`. Returns the remaining count.
    pub fn release(&self, root: &Path) -> usize {
        match self.counts.entry(root.to_path_buf()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() <= 1 {
                    entry.remove();
                    0
                } else {
                    *entry.get_mut() -= 1;
                    *entry.get()
                }
            }
            Entry::Vacant(_) => {
                tracing::warn!(root = %root.display(), "Released staging root that was never acquired");
                0
            }
        }
    }

    pub fn count(&self, root: &Path) -> usize {
        self.counts.get(root).map(|c| *c).unwrap_or(0)
    }
}
