use std::num::NonZeroUsize;

use clru::CLruCache;
use git2::Oid;

use crate::git::CommitMeta;

/// Default number of entries each cache holds before evicting.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Bounded per-invocation caches for blame results and commit metadata.
///
/// Keys are content addresses (commit hash, or rev+path+range), so eviction
/// never affects correctness: every value is re-derivable from the
/// repository. The caches live and die with one invocation.
pub struct RepoCaches {
    blame: CLruCache<String, Vec<(usize, Oid)>>,
    metadata: CLruCache<Oid, CommitMeta>,
}

impl RepoCaches {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        RepoCaches {
            blame: CLruCache::new(capacity),
            metadata: CLruCache::new(capacity),
        }
    }

    pub fn blame_key(newest: Oid, path: &str, start: usize, len: usize) -> String {
        format!("{}:{}:{}+{}", newest, path, start, len)
    }

    pub fn get_blame(&mut self, key: &str) -> Option<Vec<(usize, Oid)>> {
        self.blame.get(key).cloned()
    }

    pub fn put_blame(&mut self, key: String, value: Vec<(usize, Oid)>) {
        self.blame.put(key, value);
    }

    pub fn get_metadata(&mut self, oid: Oid) -> Option<CommitMeta> {
        self.metadata.get(&oid).cloned()
    }

    pub fn put_metadata(&mut self, meta: CommitMeta) {
        self.metadata.put(meta.oid, meta);
    }
}

impl Default for RepoCaches {
    fn default() -> Self {
        RepoCaches::new(DEFAULT_CAPACITY)
    }
}
