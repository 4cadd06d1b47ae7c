//! Modkit Core -- building blocks for loading mod data into a host game.
//!
//! This crate holds the I/O-free half of the loader: untyped documents, the
//! scoped load-context stack, the reader registry, the schema-driven field
//! populator, the entity modification index and the interaction handler
//! table. The filesystem pipeline that drives them lives in `modkit-data`.
//!
//! # Two-Phase Reading
//!
//! Every data file carries a `type` tag naming the [`reader::Reader`] that
//! interprets it. Readers run twice per load cycle:
//!
//! 1. **Pre-apply** -- as soon as a mod folder is read.
//! 2. **Post-apply** -- once, after every mod finished pre-apply, for work
//!    that refers to data other mods may add.
//!
//! # Scoped Contexts
//!
//! Base directory and owning mod travel on a [`context::ContextStack`].
//! Pushing returns a guard; dropping it restores the previous context:
//!
//! ```rust,ignore
//! let _guard = contexts.push(LoadContext::for_mod(resources_dir, mod_id));
//! let icon = contexts.resolve("icons/sword.png");
//! ```
//!
//! # Key Types
//!
//! - [`document::Document`] -- Ordered key/value tree parsed from a data file.
//! - [`reader::ReaderRegistry`] -- Type tag to reader dispatch table.
//! - [`populate::Schema`] -- Per-type map of document keys to typed setters.
//! - [`populate::Populator`] -- Applies a document through a schema, per-key fault isolation.
//! - [`modification::ModificationIndex`] -- Lazily built entity patch lookup.
//! - [`interaction::InteractionHandlers`] -- Index-addressed behaviour objects.

pub mod context;
pub mod document;
pub mod id;
pub mod interaction;
pub mod modification;
pub mod populate;
pub mod reader;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use context::{ContextGuard, ContextStack, LoadContext};
pub use document::{Document, DocumentError};
pub use id::{HandlerId, ModId};
pub use interaction::{HandlerError, InteractionHandler, InteractionHandlers, OnInteract, OnTrigger};
pub use modification::{ModificationError, ModificationFile, ModificationIndex};
pub use populate::{
    AssetPath, DEFAULT_SPECIAL_KEYS, Describe, FieldIssue, FieldWarning, PopulateReport, Populator, Schema,
};
pub use reader::{FileContext, ReadCx, ReadError, Reader, ReaderEntry, ReaderRegistry, RegistryError};
