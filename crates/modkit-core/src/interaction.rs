//! Interaction handlers registered by index.
//!
//! Data files refer to behaviour objects by type name; the session turns the
//! name into a small integer index that entities store and later use to find
//! the handler again. Names are resolved per mod: each mod declares the
//! handler types it ships, and a name only resolves inside a load context
//! owned by that mod.
//!
//! Slot 0 of the table is a permanent sentinel, so [`HandlerId::INVALID`] is
//! never a real handler.

use crate::id::{HandlerId, ModId};
use std::any::{Any, TypeId};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Reacts when something interacts with the owning entity.
pub trait OnInteract {
    fn on_interact(&self, entity: &mut dyn Any);
}

/// Reacts to entities entering or leaving the owner's trigger area.
pub trait OnTrigger {
    fn on_trigger_enter(&self, entity: &mut dyn Any);

    fn on_trigger_exit(&self, entity: &mut dyn Any) {
        let _ = entity;
    }
}

/// A registrable handler. It must expose at least one capability.
pub trait InteractionHandler: 'static {
    fn as_interact(&self) -> Option<&dyn OnInteract> {
        None
    }

    fn as_trigger(&self) -> Option<&dyn OnTrigger> {
        None
    }

    /// Downcast to `&dyn Any` for access to the concrete handler type.
    fn as_any(&self) -> &dyn Any;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Lookups with a bad index. These are caller bugs, not data problems.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("interaction handler index {0} is not valid")]
    Invalid(u32),
    #[error("no interaction handler registered at index {0}")]
    Unknown(u32),
    #[error("interaction handler at index {index} is not a {expected}")]
    WrongType { index: u32, expected: &'static str },
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct HandlerFactory {
    type_id: TypeId,
    make: fn() -> Box<dyn InteractionHandler>,
}

struct Slot {
    type_id: TypeId,
    type_name: String,
    handler: Box<dyn InteractionHandler>,
}

/// Declared handler types per mod, plus the append-only handler table.
pub struct InteractionHandlers {
    catalog: HashMap<(ModId, String), HandlerFactory>,
    /// Index 0 stays `None` forever.
    table: Vec<Option<Slot>>,
}

impl Default for InteractionHandlers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InteractionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<&str> = self
            .table
            .iter()
            .flatten()
            .map(|slot| slot.type_name.as_str())
            .collect();
        f.debug_struct("InteractionHandlers")
            .field("declared", &self.catalog.len())
            .field("registered", &registered)
            .finish()
    }
}

fn make_default<T: InteractionHandler + Default>() -> Box<dyn InteractionHandler> {
    Box::new(T::default())
}

impl InteractionHandlers {
    pub fn new() -> Self {
        Self {
            catalog: HashMap::new(),
            table: vec![None],
        }
    }

    /// Make handler type `T` resolvable as `type_name` for loads owned by `module`.
    pub fn declare<T: InteractionHandler + Default>(&mut self, module: ModId, type_name: &str) {
        self.catalog.insert(
            (module, type_name.to_string()),
            HandlerFactory {
                type_id: TypeId::of::<T>(),
                make: make_default::<T>,
            },
        );
    }

    /// Resolve `type_name` for `module` and return its table index.
    ///
    /// Registering a handler type a second time returns its existing index.
    /// Every failure is logged and answered with [`HandlerId::INVALID`].
    pub fn register(&mut self, module: Option<&ModId>, type_name: &str) -> HandlerId {
        let Some(module) = module else {
            tracing::error!(
                target: "modkit::interaction",
                handler = type_name,
                "failed to register interaction handler, no mod owns the current load context"
            );
            return HandlerId::INVALID;
        };

        let Some(factory) = self
            .catalog
            .get(&(module.clone(), type_name.to_string()))
            .copied()
        else {
            tracing::error!(
                target: "modkit::interaction",
                module = %module,
                handler = type_name,
                "failed to register interaction handler, type not found"
            );
            return HandlerId::INVALID;
        };

        if let Some(index) = self.index_of(factory.type_id) {
            return index;
        }

        let handler = (factory.make)();
        if handler.as_interact().is_none() && handler.as_trigger().is_none() {
            tracing::error!(
                target: "modkit::interaction",
                module = %module,
                handler = type_name,
                "failed to register interaction handler, it implements neither OnInteract nor OnTrigger"
            );
            return HandlerId::INVALID;
        }

        let index = HandlerId(self.table.len() as u32);
        tracing::debug!(
            target: "modkit::interaction",
            module = %module,
            handler = type_name,
            index = index.0,
            "registered interaction handler"
        );
        self.table.push(Some(Slot {
            type_id: factory.type_id,
            type_name: type_name.to_string(),
            handler,
        }));
        index
    }

    fn index_of(&self, type_id: TypeId) -> Option<HandlerId> {
        self.table
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.type_id == type_id))
            .map(|i| HandlerId(i as u32))
    }

    /// The handler at `id`.
    pub fn get(&self, id: HandlerId) -> Result<&dyn InteractionHandler, HandlerError> {
        if !id.is_valid() {
            return Err(HandlerError::Invalid(id.0));
        }
        self.table
            .get(id.index())
            .and_then(Option::as_ref)
            .map(|slot| slot.handler.as_ref())
            .ok_or(HandlerError::Unknown(id.0))
    }

    /// The handler at `id`, downcast to its concrete type.
    pub fn get_as<T: InteractionHandler>(&self, id: HandlerId) -> Result<&T, HandlerError> {
        self.get(id)?
            .as_any()
            .downcast_ref::<T>()
            .ok_or(HandlerError::WrongType {
                index: id.0,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Number of registered handlers, not counting the sentinel.
    pub fn len(&self) -> usize {
        self.table.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
