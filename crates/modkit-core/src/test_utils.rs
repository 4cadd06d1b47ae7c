//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests and, via the `test-utils` feature, in the
//! tests of downstream crates.

use crate::document::Document;
use crate::id::ModId;
use crate::populate::{Describe, Schema, schema_once};
use crate::reader::{ReadCx, ReadError, Reader};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;

// ===========================================================================
// Temporary mod folders
// ===========================================================================

/// Create an empty, uniquely named directory under the system temp dir.
pub fn make_test_dir(suffix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("modkit_test_{suffix}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn cleanup(dir: &Path) {
    let _ = fs::remove_dir_all(dir);
}

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

// ===========================================================================
// Target types
// ===========================================================================

/// An item definition, as an item reader would build it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub name: String,
    pub stack_size: u32,
    pub icon: Option<PathBuf>,
}

impl Describe for Item {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: OnceLock<Schema<Item>> = OnceLock::new();
        schema_once(&SCHEMA, || {
            Schema::new("Item")
                .field("name", |i: &mut Item| &mut i.name)
                .field("stackSize", |i: &mut Item| &mut i.stack_size)
                .formerly("maxStack")
                .path("icon", |i: &mut Item| &mut i.icon)
        })
    }
}

/// A spawned entity that modification files patch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Creature {
    pub health: u32,
    pub damage: u32,
    pub runtime_id: u64,
}

impl Creature {
    pub fn new(health: u32, damage: u32) -> Self {
        Self {
            health,
            damage,
            runtime_id: 0,
        }
    }
}

impl Describe for Creature {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: OnceLock<Schema<Creature>> = OnceLock::new();
        schema_once(&SCHEMA, || {
            Schema::new("Creature")
                .field("health", |c: &mut Creature| &mut c.health)
                .formerly("hp")
                .field("damage", |c: &mut Creature| &mut c.damage)
                .field("runtime_id", |c: &mut Creature| &mut c.runtime_id)
                .non_serialized()
        })
    }
}

// ===========================================================================
// Readers
// ===========================================================================

/// Hosts that collect items built by [`ItemReader`].
pub trait ItemSink {
    fn add_item(&mut self, item: Item);
}

/// Populates an [`Item`] from the document and hands it to the host.
/// A relative `icon` path is resolved against the active load context.
#[derive(Debug, Default)]
pub struct ItemReader;

impl<H: ItemSink + ?Sized> Reader<H> for ItemReader {
    fn apply_pre(&self, doc: &Document, cx: &mut ReadCx<'_, H>) -> Result<(), ReadError> {
        let mut item = Item::default();
        cx.populate(Item::schema(), &mut item, doc, &[]);
        if item.name.is_empty() {
            return Err(ReadError::MissingField("name".to_string()));
        }
        cx.host.add_item(item);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

/// One reader invocation as seen from inside the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderCall {
    pub reader: &'static str,
    pub phase: Phase,
    pub file: String,
    pub module: Option<ModId>,
    pub base_dir: Option<PathBuf>,
}

/// Shared journal of reader calls. Clones append to the same journal.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<ReaderCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record<H: ?Sized>(&self, reader: &'static str, phase: Phase, cx: &ReadCx<'_, H>) {
        self.calls.borrow_mut().push(ReaderCall {
            reader,
            phase,
            file: cx.file.name().to_string(),
            module: cx.module(),
            base_dir: cx.contexts.current().map(|c| c.base_dir().to_path_buf()),
        });
    }

    pub fn calls(&self) -> Vec<ReaderCall> {
        self.calls.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// File names seen in `phase`, sorted.
    pub fn files(&self, phase: Phase) -> Vec<String> {
        let mut files: Vec<String> = self
            .calls
            .borrow()
            .iter()
            .filter(|call| call.phase == phase)
            .map(|call| call.file.clone())
            .collect();
        files.sort();
        files
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.phase == phase)
            .count()
    }
}

/// Records both phases into a [`CallLog`] and otherwise does nothing.
#[derive(Debug, Clone)]
pub struct RecordingReader {
    pub name: &'static str,
    pub log: CallLog,
}

impl RecordingReader {
    pub fn new(name: &'static str, log: &CallLog) -> Self {
        Self {
            name,
            log: log.clone(),
        }
    }
}

impl<H: ?Sized> Reader<H> for RecordingReader {
    fn apply_pre(&self, _doc: &Document, cx: &mut ReadCx<'_, H>) -> Result<(), ReadError> {
        self.log.record(self.name, Phase::Pre, cx);
        Ok(())
    }

    fn apply_post(&self, _doc: &Document, cx: &mut ReadCx<'_, H>) -> Result<(), ReadError> {
        self.log.record(self.name, Phase::Post, cx);
        Ok(())
    }
}

/// Records its calls, then fails in the configured phases.
#[derive(Debug, Clone)]
pub struct FailingReader {
    pub log: CallLog,
    pub fail_pre: bool,
    pub fail_post: bool,
}

impl FailingReader {
    pub fn in_pre(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            fail_pre: true,
            fail_post: false,
        }
    }

    pub fn in_post(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            fail_pre: false,
            fail_post: true,
        }
    }
}

impl<H: ?Sized> Reader<H> for FailingReader {
    fn apply_pre(&self, _doc: &Document, cx: &mut ReadCx<'_, H>) -> Result<(), ReadError> {
        self.log.record("failing", Phase::Pre, cx);
        if self.fail_pre {
            return Err(ReadError::Invalid("refusing pre-apply".to_string()));
        }
        Ok(())
    }

    fn apply_post(&self, _doc: &Document, cx: &mut ReadCx<'_, H>) -> Result<(), ReadError> {
        self.log.record("failing", Phase::Post, cx);
        if self.fail_post {
            return Err(ReadError::Invalid("refusing post-apply".to_string()));
        }
        Ok(())
    }
}
