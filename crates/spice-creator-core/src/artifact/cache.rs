use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::hash::compute_hash;

/// Cache shared by the plugins of one build context
pub type SharedCache = Arc<Mutex<BuildCache>>;

/// Last emitted content for one logical output
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub logical_name: String,
    pub content_hash: String,
    pub bytes: Arc<[u8]>,
}

/// Emitted outputs of a build context and the set that changed in the
/// current build
#[derive(Debug, Default)]
pub struct BuildCache {
    files: HashMap<String, ArtifactRecord>,
    changed: BTreeSet<String>,
    has_changes: bool,
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Reset the change set; called once at build start
    pub fn begin_build(&mut self) {
        self.changed.clear();
        self.has_changes = false;
    }

    /// Store `bytes` under `logical_name` when they differ from the previous
    /// record. Returns whether the artifact changed.
    pub fn record_if_changed(&mut self, logical_name: &str, bytes: &[u8]) -> bool {
        if let Some(previous) = self.files.get(logical_name) {
            if previous.bytes.as_ref() == bytes {
                return false;
            }
        }

        self.files.insert(
            logical_name.to_string(),
            ArtifactRecord {
                logical_name: logical_name.to_string(),
                content_hash: compute_hash(bytes),
                bytes: Arc::from(bytes),
            },
        );
        self.changed.insert(logical_name.to_string());
        self.has_changes = true;
        true
    }

    pub fn has_changes(&self) -> bool {
        self.has_changes
    }

    pub fn get(&self, logical_name: &str) -> Option<&ArtifactRecord> {
        self.files.get(logical_name)
    }

    /// Logical names changed in the current build, in sorted order
    pub fn changed(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    pub fn changed_count(&self) -> usize {
        self.changed.len()
    }

    /// Records for every changed name
    pub fn changed_records(&self) -> Vec<ArtifactRecord> {
        self.changed
            .iter()
            .filter_map(|name| self.files.get(name))
            .cloned()
            .collect()
    }

    /// All stored records, sorted by logical name
    pub fn records(&self) -> Vec<&ArtifactRecord> {
        let mut records: Vec<_> = self.files.values().collect();
        records.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        records
    }
}
