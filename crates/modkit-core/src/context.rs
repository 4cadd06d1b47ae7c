//! Scoped load contexts.
//!
//! A [`LoadContext`] pairs a base directory with the identity of the mod that
//! owns the current load. Contexts live on a [`ContextStack`]; pushing one
//! returns a [`ContextGuard`] and dropping the guard pops exactly that frame,
//! so nested (and re-entrant) loads always see their own context and the
//! caller's context comes back when they return or fail.
//!
//! The stack is single-threaded shared state. Clone the handle to share it
//! between the pipeline and the readers it calls.

use crate::id::ModId;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

// ---------------------------------------------------------------------------
// LoadContext
// ---------------------------------------------------------------------------

/// Base directory plus owning mod for one load operation. Immutable once pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadContext {
    base_dir: PathBuf,
    module: Option<ModId>,
}

impl LoadContext {
    pub fn new(base_dir: impl Into<PathBuf>, module: Option<ModId>) -> Self {
        Self {
            base_dir: base_dir.into(),
            module,
        }
    }

    /// Context for loading a mod's own resources.
    pub fn for_mod(base_dir: impl Into<PathBuf>, module: ModId) -> Self {
        Self::new(base_dir, Some(module))
    }

    /// Context with no owning mod (entity modifications, host-side loads).
    pub fn detached(base_dir: impl Into<PathBuf>) -> Self {
        Self::new(base_dir, None)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn module(&self) -> Option<&ModId> {
        self.module.as_ref()
    }

    /// Join a relative path onto the base directory. Absolute paths pass through.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

// ---------------------------------------------------------------------------
// ContextStack
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Frame {
    token: u64,
    context: LoadContext,
}

#[derive(Debug, Default)]
struct StackState {
    frames: Vec<Frame>,
    next_token: u64,
}

/// Shared stack of active load contexts. Cloning shares the same stack.
#[derive(Debug, Clone, Default)]
pub struct ContextStack {
    state: Rc<RefCell<StackState>>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `context` and return the guard that pops it.
    pub fn push(&self, context: LoadContext) -> ContextGuard {
        let mut state = self.state.borrow_mut();
        let token = state.next_token;
        state.next_token += 1;
        tracing::trace!(
            target: "modkit::context",
            depth = state.frames.len() + 1,
            base_dir = %context.base_dir.display(),
            module = ?context.module,
            "push load context"
        );
        state.frames.push(Frame {
            token,
            context: context.clone(),
        });
        ContextGuard {
            state: Rc::clone(&self.state),
            token,
            context,
        }
    }

    /// The innermost active context, or `None` outside any load.
    pub fn current(&self) -> Option<LoadContext> {
        self.state
            .borrow()
            .frames
            .last()
            .map(|frame| frame.context.clone())
    }

    /// Owning mod of the innermost context, if any.
    pub fn current_module(&self) -> Option<ModId> {
        self.state
            .borrow()
            .frames
            .last()
            .and_then(|frame| frame.context.module.clone())
    }

    pub fn depth(&self) -> usize {
        self.state.borrow().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Resolve `path` against the current context. Unchanged when no context is active.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        match self.state.borrow().frames.last() {
            Some(frame) => frame.context.resolve(path),
            None => path.as_ref().to_path_buf(),
        }
    }
}

// ---------------------------------------------------------------------------
// ContextGuard
// ---------------------------------------------------------------------------

/// Keeps a pushed context active until dropped.
///
/// Guards must be released in reverse push order. Releasing any other frame
/// means the stack was mutated behind the pipeline's back and panics.
#[must_use = "dropping the guard pops the context immediately"]
#[derive(Debug)]
pub struct ContextGuard {
    state: Rc<RefCell<StackState>>,
    token: u64,
    context: LoadContext,
}

impl ContextGuard {
    /// The context this guard keeps alive.
    pub fn context(&self) -> &LoadContext {
        &self.context
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let misuse = {
            let mut state = self.state.borrow_mut();
            match state.frames.last() {
                Some(top) if top.token == self.token => {
                    state.frames.pop();
                    None
                }
                _ => {
                    // Drop the stray frame so a panic already in flight is not
                    // followed by a second one.
                    state.frames.retain(|frame| frame.token != self.token);
                    Some(state.frames.len())
                }
            }
        };

        if let Some(depth) = misuse {
            if !std::thread::panicking() {
                panic!(
                    "load context released out of order (guard {}, {} frames still active)",
                    self.token, depth
                );
            }
        }
    }
}
