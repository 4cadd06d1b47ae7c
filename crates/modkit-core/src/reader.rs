//! Pluggable readers and the registry that dispatches to them by type tag.
//!
//! A [`Reader`] interprets documents carrying one `type` tag. It runs twice
//! per load cycle: [`Reader::apply_pre`] as soon as the file is read, and
//! [`Reader::apply_post`] after every mod has finished its first pass, for
//! work that refers to data other mods may add.
//!
//! Readers are generic over the host type `H` they write into. The registry
//! is filled once at startup from a static table of [`ReaderEntry`] values.

use crate::context::{ContextGuard, ContextStack, LoadContext};
use crate::document::{Document, DocumentError};
use crate::id::{HandlerId, ModId};
use crate::interaction::InteractionHandlers;
use crate::populate::{PopulateReport, Populator, Schema};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// FileContext
// ---------------------------------------------------------------------------

/// The file currently being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContext {
    path: PathBuf,
    name: String,
}

impl FileContext {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }

    /// Full path of the file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directories, for messages.
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// ReadCx
// ---------------------------------------------------------------------------

/// Everything a reader may touch while applying one document.
pub struct ReadCx<'a, H: ?Sized> {
    /// The host state the reader writes into.
    pub host: &'a mut H,
    /// The file being applied.
    pub file: &'a FileContext,
    /// The session's context stack.
    pub contexts: &'a ContextStack,
    /// Field populator configured for this session.
    pub populator: &'a Populator,
    /// The session's interaction handler table.
    pub handlers: &'a mut InteractionHandlers,
}

impl<'a, H: ?Sized> ReadCx<'a, H> {
    pub fn new(
        host: &'a mut H,
        file: &'a FileContext,
        contexts: &'a ContextStack,
        populator: &'a Populator,
        handlers: &'a mut InteractionHandlers,
    ) -> Self {
        Self {
            host,
            file,
            contexts,
            populator,
            handlers,
        }
    }

    /// Resolve an asset path relative to the active load context.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.contexts.resolve(path)
    }

    /// The mod that owns the active load, if any.
    pub fn module(&self) -> Option<ModId> {
        self.contexts.current_module()
    }

    /// Register an interaction handler declared by the mod that owns the active load.
    pub fn register_interaction_handler(&mut self, type_name: &str) -> HandlerId {
        let module = self.contexts.current_module();
        self.handlers.register(module.as_ref(), type_name)
    }

    /// Populate `target` from `doc`, resolving path fields against the active context.
    pub fn populate<T>(
        &self,
        schema: &Schema<T>,
        target: &mut T,
        doc: &Document,
        exclude: &[&str],
    ) -> PopulateReport {
        self.populator
            .populate_in(self.contexts, schema, target, doc, exclude)
    }

    /// Enter a nested context, e.g. to load a sub-resource from another directory.
    pub fn scope(&self, context: LoadContext) -> ContextGuard {
        self.contexts.push(context)
    }
}

// ---------------------------------------------------------------------------
// Reader trait
// ---------------------------------------------------------------------------

/// Errors a reader reports for one document. The pipeline logs them and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// A key the reader cannot work without is absent.
    #[error("missing required field '{0}'")]
    MissingField(String),

    /// The document is structurally valid but its content is unusable.
    #[error("invalid definition: {0}")]
    Invalid(String),
}

/// Interprets documents tagged with one type string.
///
/// Only `apply_pre` is required. Readers with no deferred work keep the
/// default `apply_post`, which does nothing; the pipeline still calls it.
pub trait Reader<H: ?Sized> {
    /// First pass, run while the mod folder is being loaded.
    fn apply_pre(&self, doc: &Document, cx: &mut ReadCx<'_, H>) -> Result<(), ReadError>;

    /// Second pass, run once after every mod finished its first pass.
    fn apply_post(&self, doc: &Document, cx: &mut ReadCx<'_, H>) -> Result<(), ReadError> {
        let _ = (doc, cx);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One row of the static reader table: a tag and a factory for its reader.
pub struct ReaderEntry<H: ?Sized> {
    pub tag: &'static str,
    pub make: fn() -> Box<dyn Reader<H>>,
}

impl<H: ?Sized> Clone for ReaderEntry<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: ?Sized> Copy for ReaderEntry<H> {}

impl<H: ?Sized> std::fmt::Debug for ReaderEntry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderEntry").field("tag", &self.tag).finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("reader tag '{0}' is already taken")]
    DuplicateTag(String),
}

/// Maps type tags to readers. The first reader registered for a tag wins.
pub struct ReaderRegistry<H: ?Sized> {
    readers: HashMap<String, Box<dyn Reader<H>>>,
}

impl<H: ?Sized> Default for ReaderRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> std::fmt::Debug for ReaderRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&str> = self.tags().collect();
        tags.sort_unstable();
        f.debug_struct("ReaderRegistry").field("tags", &tags).finish()
    }
}

impl<H: ?Sized> ReaderRegistry<H> {
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    /// Register `reader` under `tag`. A taken tag keeps its first reader.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        reader: Box<dyn Reader<H>>,
    ) -> Result<(), RegistryError> {
        let tag = tag.into();
        if self.readers.contains_key(&tag) {
            tracing::error!(
                target: "modkit::reader",
                tag = %tag,
                "failed to register reader, tag is already taken"
            );
            return Err(RegistryError::DuplicateTag(tag));
        }
        tracing::debug!(target: "modkit::reader", tag = %tag, "registered reader");
        self.readers.insert(tag, reader);
        Ok(())
    }

    /// Register every entry of a static reader table. Returns how many were accepted.
    pub fn register_all(&mut self, entries: impl IntoIterator<Item = ReaderEntry<H>>) -> usize {
        entries
            .into_iter()
            .filter(|entry| self.register(entry.tag, (entry.make)()).is_ok())
            .count()
    }

    pub fn resolve(&self, tag: &str) -> Option<&dyn Reader<H>> {
        self.readers.get(tag).map(|reader| reader.as_ref())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.readers.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.readers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}
