//! Index of entity modification files.
//!
//! Modification files are registered by symbolic target key while mods load.
//! The first time an entity is materialized the flat list is resolved into a
//! key → file map, exactly once; the list is then dropped and the index is
//! sealed against further registrations.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::path::PathBuf;

/// A document of field overrides for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationFile {
    /// Symbolic key of the entity to patch, resolved by the host.
    pub target: String,
    /// The modification document on disk.
    pub path: PathBuf,
    /// Base directory for relative paths inside the document.
    pub context_dir: PathBuf,
}

impl ModificationFile {
    pub fn new(
        target: impl Into<String>,
        path: impl Into<PathBuf>,
        context_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target: target.into(),
            path: path.into(),
            context_dir: context_dir.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModificationError {
    /// The index was already built; the file would never be applied.
    #[error("modification for '{target}' registered after the modification cache was built")]
    Sealed { target: String },
}

/// Pending modification files plus the resolved cache built from them.
#[derive(Debug)]
pub struct ModificationIndex<K> {
    pending: Vec<ModificationFile>,
    cache: Option<HashMap<K, ModificationFile>>,
}

impl<K> Default for ModificationIndex<K> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            cache: None,
        }
    }
}

impl<K: Eq + Hash + Debug> ModificationIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a modification file. Rejected once the cache has been built.
    pub fn register(&mut self, file: ModificationFile) -> Result<(), ModificationError> {
        if self.cache.is_some() {
            tracing::error!(
                target: "modkit::modification",
                entity = %file.target,
                file = %file.path.display(),
                "modification registered too late, the cache is already built"
            );
            return Err(ModificationError::Sealed {
                target: file.target,
            });
        }
        self.pending.push(file);
        Ok(())
    }

    /// Resolve every pending file into the cache. Runs once; later calls
    /// return `false` and change nothing.
    ///
    /// Unresolvable targets are logged and dropped. When two files resolve to
    /// the same entity the first one registered is kept.
    pub fn build_once(&mut self, mut resolve: impl FnMut(&str) -> Option<K>) -> bool {
        if self.cache.is_some() {
            return false;
        }

        let mut cache: HashMap<K, ModificationFile> = HashMap::with_capacity(self.pending.len());
        for file in self.pending.drain(..) {
            let Some(key) = resolve(&file.target) else {
                tracing::error!(
                    target: "modkit::modification",
                    entity = %file.target,
                    file = %file.path.display(),
                    "failed to apply entity modification, target is not a valid entity"
                );
                continue;
            };

            if let Some(existing) = cache.get(&key) {
                tracing::error!(
                    target: "modkit::modification",
                    entity = ?key,
                    kept = %existing.path.display(),
                    dropped = %file.path.display(),
                    "entity already has a modification file"
                );
                continue;
            }
            cache.insert(key, file);
        }

        // Release the backing allocation along with its contents.
        self.pending = Vec::new();
        tracing::debug!(
            target: "modkit::modification",
            entries = cache.len(),
            "built modification cache"
        );
        self.cache = Some(cache);
        true
    }

    pub fn is_built(&self) -> bool {
        self.cache.is_some()
    }

    /// The modification for `key`. Always `None` before the cache is built.
    pub fn get(&self, key: &K) -> Option<&ModificationFile> {
        self.cache.as_ref().and_then(|cache| cache.get(key))
    }

    /// Files waiting for the cache build.
    pub fn pending(&self) -> &[ModificationFile] {
        &self.pending
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of resolved entries.
    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
