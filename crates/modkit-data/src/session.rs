//! The load session: owns every piece of loader state and drives the
//! two-phase pipeline over mod folders.
//!
//! # Initialization order
//!
//! 1. Create the session and register readers (and declare interaction
//!    handler types) for every mod.
//! 2. Call [`Session::load_mod_folder`] once per mod. Each folder is read
//!    immediately and its readers' `apply_pre` run.
//! 3. Call [`Session::run_post_apply`] once all mods are loaded. After this
//!    no more folders can be loaded.
//! 4. Call [`Session::apply_to_entity`] whenever the host materializes an
//!    entity. The first call seals the modification index.
//!
//! The host state readers write into is passed to each call rather than
//! owned, so the caller keeps full control over it between phases.

use crate::config::LoaderConfig;
use crate::loader::{DataLoadError, discover_with_extensions, parse_document};
use modkit_core::context::{ContextGuard, ContextStack, LoadContext};
use modkit_core::id::{HandlerId, ModId};
use modkit_core::interaction::{HandlerError, InteractionHandler, InteractionHandlers};
use modkit_core::modification::{ModificationError, ModificationFile, ModificationIndex};
use modkit_core::populate::{PopulateReport, Populator, Schema};
use modkit_core::reader::{FileContext, ReadCx, Reader, ReaderEntry, ReaderRegistry, RegistryError};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

// ===========================================================================
// Host
// ===========================================================================

/// The game-side state readers write into.
pub trait Host {
    /// Concrete key of a spawnable entity kind.
    type EntityKey: Eq + Hash + Debug;

    /// Map a symbolic entity name from a modification file to its key.
    fn resolve_entity_key(&self, key: &str) -> Option<Self::EntityKey>;
}

// ===========================================================================
// Results
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Post-apply already ran; a folder loaded now would never see it.
    #[error("cannot load mod '{module}', loading has already finished")]
    LoadingFinished { module: ModId },

    /// The resources directory exists but could not be enumerated.
    #[error("failed to enumerate data files of mod '{module}': {source}")]
    Discovery {
        module: ModId,
        #[source]
        source: DataLoadError,
    },
}

/// What one phase did with the files it was given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSummary {
    /// Files whose reader ran and succeeded.
    pub dispatched: usize,
    /// Files without a usable type tag or without a reader for it.
    pub skipped: usize,
    /// Files that failed to parse or whose reader returned an error or panicked.
    pub failed: usize,
}

impl PhaseSummary {
    pub fn total(&self) -> usize {
        self.dispatched + self.skipped + self.failed
    }
}

/// Outcome of [`Session::load_mod_folder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderLoad {
    Loaded(PhaseSummary),
    /// The mod identity was loaded before; nothing happened.
    AlreadyLoaded,
    /// The folder has no resources directory; nothing happened.
    MissingResources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Pre,
    Post,
}

impl Pass {
    fn name(self) -> &'static str {
        match self {
            Pass::Pre => "pre-apply",
            Pass::Post => "post-apply",
        }
    }
}

enum Dispatch {
    Applied,
    Skipped,
    Failed,
}

impl PhaseSummary {
    fn record(&mut self, outcome: &Dispatch) {
        match outcome {
            Dispatch::Applied => self.dispatched += 1,
            Dispatch::Skipped => self.skipped += 1,
            Dispatch::Failed => self.failed += 1,
        }
    }
}

/// A file waiting for post-apply, with the context it was first read under.
#[derive(Debug, Clone)]
struct PendingFile {
    path: PathBuf,
    context: LoadContext,
}

// ===========================================================================
// Session
// ===========================================================================

/// All loader state for one game session.
pub struct Session<H: Host> {
    config: LoaderConfig,
    contexts: ContextStack,
    readers: ReaderRegistry<H>,
    populator: Populator,
    mod_folders: BTreeMap<ModId, PathBuf>,
    post_apply: Vec<PendingFile>,
    modifications: ModificationIndex<H::EntityKey>,
    handlers: InteractionHandlers,
    finished: bool,
}

impl<H: Host> Default for Session<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Host> Debug for Session<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("readers", &self.readers)
            .field("mods", &self.mod_folders.keys().collect::<Vec<_>>())
            .field("post_apply", &self.post_apply.len())
            .field("modifications", &self.modifications)
            .field("handlers", &self.handlers)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<H: Host> Session<H> {
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        let populator = config.populator();
        Self {
            config,
            contexts: ContextStack::new(),
            readers: ReaderRegistry::new(),
            populator,
            mod_folders: BTreeMap::new(),
            post_apply: Vec::new(),
            modifications: ModificationIndex::new(),
            handlers: InteractionHandlers::new(),
            finished: false,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn populator(&self) -> &Populator {
        &self.populator
    }

    pub fn contexts(&self) -> &ContextStack {
        &self.contexts
    }

    /// Make `context` the active load context until the guard is dropped.
    pub fn with_context(&self, context: LoadContext) -> ContextGuard {
        self.contexts.push(context)
    }

    // -----------------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------------

    pub fn register_reader(
        &mut self,
        tag: impl Into<String>,
        reader: Box<dyn Reader<H>>,
    ) -> Result<(), RegistryError> {
        self.readers.register(tag, reader)
    }

    /// Register a static reader table. Returns how many entries were accepted.
    pub fn register_readers(&mut self, entries: impl IntoIterator<Item = ReaderEntry<H>>) -> usize {
        self.readers.register_all(entries)
    }

    pub fn readers(&self) -> &ReaderRegistry<H> {
        &self.readers
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    pub fn is_loaded(&self, module: &ModId) -> bool {
        self.mod_folders.contains_key(module)
    }

    /// Root folder a mod was loaded from.
    pub fn mod_folder(&self, module: &ModId) -> Option<&Path> {
        self.mod_folders.get(module).map(PathBuf::as_path)
    }

    pub fn loaded_mods(&self) -> impl Iterator<Item = &ModId> {
        self.mod_folders.keys()
    }

    /// Files queued for post-apply.
    pub fn pending_post_apply(&self) -> usize {
        self.post_apply.len()
    }

    /// Whether post-apply has run.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read every data file of a mod folder and run its readers' pre-apply.
    ///
    /// Files that cannot be parsed, carry no `type` tag, or whose reader
    /// fails or panics are logged and counted; the rest of the folder still loads.
    /// Files whose reader succeeded are queued for post-apply.
    pub fn load_mod_folder(
        &mut self,
        module: ModId,
        root: impl AsRef<Path>,
        host: &mut H,
    ) -> Result<FolderLoad, PipelineError> {
        let root = root.as_ref();
        if self.finished {
            tracing::error!(
                target: "modkit::pipeline",
                module = %module,
                "tried to load a mod folder after loading finished"
            );
            return Err(PipelineError::LoadingFinished { module });
        }

        if self.mod_folders.contains_key(&module) {
            tracing::warn!(
                target: "modkit::pipeline",
                module = %module,
                "trying to load mod folder again"
            );
            return Ok(FolderLoad::AlreadyLoaded);
        }

        let resources = root.join(&self.config.resources_dir);
        if !resources.is_dir() {
            tracing::warn!(
                target: "modkit::pipeline",
                module = %module,
                folder = %root.display(),
                resources_dir = %self.config.resources_dir,
                "mod folder does not contain a resources folder"
            );
            return Ok(FolderLoad::MissingResources);
        }

        let files = discover_with_extensions(&resources, self.config.extensions.as_slice()).map_err(
            |source| {
                tracing::error!(
                    target: "modkit::pipeline",
                    module = %module,
                    error = %source,
                    "failed to enumerate data files"
                );
                PipelineError::Discovery {
                    module: module.clone(),
                    source,
                }
            },
        )?;

        let context = LoadContext::for_mod(&resources, module.clone());
        let _guard = self.contexts.push(context.clone());
        let mut summary = PhaseSummary::default();
        let mut dispatcher = Dispatcher {
            readers: &self.readers,
            contexts: &self.contexts,
            populator: &self.populator,
            handlers: &mut self.handlers,
        };

        for path in files {
            let outcome = dispatcher.dispatch(Pass::Pre, &path, &resources, host);
            summary.record(&outcome);
            if matches!(outcome, Dispatch::Applied) {
                self.post_apply.push(PendingFile {
                    path,
                    context: context.clone(),
                });
            }
        }

        tracing::info!(
            target: "modkit::pipeline",
            module = %module,
            dispatched = summary.dispatched,
            skipped = summary.skipped,
            failed = summary.failed,
            "loaded mod folder"
        );
        self.mod_folders.insert(module, root.to_path_buf());
        Ok(FolderLoad::Loaded(summary))
    }

    /// Run every queued file's post-apply, then clear the queue.
    ///
    /// Files are parsed again rather than kept from pre-apply. Each runs under
    /// the load context of the mod it came from. Marks loading as finished.
    pub fn run_post_apply(&mut self, host: &mut H) -> PhaseSummary {
        tracing::info!(
            target: "modkit::pipeline",
            files = self.post_apply.len(),
            "start post-apply"
        );

        let pending = std::mem::take(&mut self.post_apply);
        let mut summary = PhaseSummary::default();
        let mut dispatcher = Dispatcher {
            readers: &self.readers,
            contexts: &self.contexts,
            populator: &self.populator,
            handlers: &mut self.handlers,
        };
        for entry in pending {
            let _guard = dispatcher.contexts.push(entry.context.clone());
            let outcome =
                dispatcher.dispatch(Pass::Post, &entry.path, entry.context.base_dir(), host);
            summary.record(&outcome);
        }

        self.finished = true;
        tracing::info!(
            target: "modkit::pipeline",
            dispatched = summary.dispatched,
            skipped = summary.skipped,
            failed = summary.failed,
            "finished post-apply"
        );
        summary
    }

    // -----------------------------------------------------------------------
    // Entity modifications
    // -----------------------------------------------------------------------

    /// Queue a modification file. Fails once the modification cache is built.
    pub fn register_modification(&mut self, file: ModificationFile) -> Result<(), ModificationError> {
        self.modifications.register(file)
    }

    /// Resolve queued modification files into the cache. Only the first call does work.
    pub fn build_modification_cache(&mut self, host: &H) -> bool {
        self.modifications
            .build_once(|key| host.resolve_entity_key(key))
    }

    pub fn modifications(&self) -> &ModificationIndex<H::EntityKey> {
        &self.modifications
    }

    /// Patch a freshly materialized entity with its modification file, if any.
    ///
    /// Builds the modification cache on first use. Returns `None` when the
    /// entity has no modification or its file cannot be read; the entity is
    /// left untouched in both cases.
    pub fn apply_to_entity<T>(
        &mut self,
        host: &H,
        key: &H::EntityKey,
        entity: &mut T,
        schema: &Schema<T>,
    ) -> Option<PopulateReport> {
        self.build_modification_cache(host);
        let file = self.modifications.get(key)?;

        let doc = match parse_document(&file.path) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(
                    target: "modkit::modification",
                    entity = ?key,
                    file = %file.path.display(),
                    error = %e,
                    "failed to read entity modification"
                );
                return None;
            }
        };

        let _guard = self.contexts.push(LoadContext::detached(&file.context_dir));
        tracing::debug!(
            target: "modkit::modification",
            entity = ?key,
            file = %file.path.display(),
            "applying entity modification"
        );
        Some(
            self.populator
                .populate_in(&self.contexts, schema, entity, &doc, &[]),
        )
    }

    // -----------------------------------------------------------------------
    // Interaction handlers
    // -----------------------------------------------------------------------

    /// Make handler type `T` resolvable as `type_name` for loads owned by `module`.
    pub fn declare_interaction_handler<T: InteractionHandler + Default>(
        &mut self,
        module: ModId,
        type_name: &str,
    ) {
        self.handlers.declare::<T>(module, type_name);
    }

    /// Register a handler for the mod that owns the active load context.
    /// Returns [`HandlerId::INVALID`] on failure.
    pub fn register_interaction_handler(&mut self, type_name: &str) -> HandlerId {
        let module = self.contexts.current_module();
        self.handlers.register(module.as_ref(), type_name)
    }

    pub fn interaction_handler(&self, id: HandlerId) -> Result<&dyn InteractionHandler, HandlerError> {
        self.handlers.get(id)
    }

    pub fn interaction_handlers(&self) -> &InteractionHandlers {
        &self.handlers
    }
}

/// Borrowed session state needed to run one reader pass over a file.
struct Dispatcher<'a, H: Host> {
    readers: &'a ReaderRegistry<H>,
    contexts: &'a ContextStack,
    populator: &'a Populator,
    handlers: &'a mut InteractionHandlers,
}

impl<H: Host> Dispatcher<'_, H> {
    /// Parse one file and hand it to its reader, isolating every failure to this file.
    fn dispatch(&mut self, pass: Pass, path: &Path, resources: &Path, host: &mut H) -> Dispatch {
        let relative = path.strip_prefix(resources).unwrap_or(path);

        let doc = match parse_document(path) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(
                    target: "modkit::pipeline",
                    file = %relative.display(),
                    phase = pass.name(),
                    error = %e,
                    "failed to parse data file"
                );
                return Dispatch::Failed;
            }
        };

        let Some(tag) = doc.type_tag() else {
            tracing::warn!(
                target: "modkit::pipeline",
                file = %relative.display(),
                "data file does not contain type information, please specify a 'type' value"
            );
            return Dispatch::Skipped;
        };

        let Some(reader) = self.readers.resolve(tag) else {
            tracing::debug!(
                target: "modkit::pipeline",
                file = %relative.display(),
                tag,
                "no reader registered for type"
            );
            return Dispatch::Skipped;
        };

        let file = FileContext::new(path);
        tracing::debug!(
            target: "modkit::pipeline",
            file = file.name(),
            tag,
            phase = pass.name(),
            "dispatching data file"
        );

        let mut cx = ReadCx::new(host, &file, self.contexts, self.populator, self.handlers);
        let result = catch_unwind(AssertUnwindSafe(|| match pass {
            Pass::Pre => reader.apply_pre(&doc, &mut cx),
            Pass::Post => reader.apply_post(&doc, &mut cx),
        }));

        match result {
            Ok(Ok(())) => Dispatch::Applied,
            Ok(Err(e)) => {
                tracing::error!(
                    target: "modkit::pipeline",
                    file = %relative.display(),
                    tag,
                    phase = pass.name(),
                    error = %e,
                    "reader failed"
                );
                Dispatch::Failed
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("non-string panic payload");
                tracing::error!(
                    target: "modkit::pipeline",
                    file = %relative.display(),
                    tag,
                    phase = pass.name(),
                    panic = message,
                    "reader panicked"
                );
                Dispatch::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modkit_core::test_utils::*;
    use modkit_core::{Describe, ReadError};

    #[derive(Debug, Default)]
    struct World {
        items: Vec<Item>,
    }

    impl ItemSink for World {
        fn add_item(&mut self, item: Item) {
            self.items.push(item);
        }
    }

    impl Host for World {
        type EntityKey = u32;

        fn resolve_entity_key(&self, key: &str) -> Option<u32> {
            match key {
                "goblin" => Some(1),
                "orc" => Some(2),
                _ => None,
            }
        }
    }

    fn session_with(log: &CallLog) -> Session<World> {
        let mut session = Session::new();
        session
            .register_reader("item", Box::new(ItemReader))
            .unwrap();
        session
            .register_reader("note", Box::new(RecordingReader::new("note", log)))
            .unwrap();
        session
    }

    #[test]
    fn pre_apply_dispatches_and_queues() {
        let root = make_test_dir("session_pre");
        write_file(&root, "resources/sword.json", r#"{"type": "item", "name": "Sword"}"#);
        write_file(&root, "resources/lore/a.json", r#"{"type": "note"}"#);

        let log = CallLog::new();
        let mut session = session_with(&log);
        let mut world = World::default();
        let result = session
            .load_mod_folder(ModId::new("swords"), &root, &mut world)
            .unwrap();

        assert_eq!(
            result,
            FolderLoad::Loaded(PhaseSummary {
                dispatched: 2,
                skipped: 0,
                failed: 0
            })
        );
        assert_eq!(world.items[0].name, "Sword");
        assert_eq!(session.pending_post_apply(), 2);
        assert!(session.is_loaded(&ModId::new("swords")));
        assert_eq!(session.mod_folder(&ModId::new("swords")), Some(root.as_path()));

        let calls = log.calls();
        assert_eq!(calls[0].module, Some(ModId::new("swords")));
        assert_eq!(calls[0].base_dir, Some(root.join("resources")));
        assert!(session.contexts().is_empty());

        cleanup(&root);
    }

    #[test]
    fn untyped_unknown_and_broken_files_are_isolated() {
        let root = make_test_dir("session_isolation");
        write_file(&root, "resources/a.json", r#"{"name": "Untyped"}"#);
        write_file(&root, "resources/b.json", r#"{"type": "spell"}"#);
        write_file(&root, "resources/c.json", "{ broken");
        write_file(&root, "resources/d.json", r#"{"type": "item"}"#);
        write_file(&root, "resources/e.json", r#"{"type": "item", "name": "Axe"}"#);
        write_file(&root, "resources/f.json", r#"{"type": 7, "name": "Odd"}"#);

        let log = CallLog::new();
        let mut session = session_with(&log);
        let mut world = World::default();
        let result = session
            .load_mod_folder(ModId::new("m"), &root, &mut world)
            .unwrap();

        // a, f: no usable type; b: no reader; c: parse error; d: reader error.
        assert_eq!(
            result,
            FolderLoad::Loaded(PhaseSummary {
                dispatched: 1,
                skipped: 3,
                failed: 2
            })
        );
        assert_eq!(world.items.len(), 1);
        assert_eq!(world.items[0].name, "Axe");
        assert_eq!(session.pending_post_apply(), 1);

        cleanup(&root);
    }

    #[test]
    fn second_load_of_same_mod_is_rejected() {
        let root = make_test_dir("session_again");
        write_file(&root, "resources/a.json", r#"{"type": "note"}"#);

        let log = CallLog::new();
        let mut session = session_with(&log);
        let mut world = World::default();
        let m = ModId::new("m");
        session.load_mod_folder(m.clone(), &root, &mut world).unwrap();
        let again = session.load_mod_folder(m, &root, &mut world).unwrap();

        assert_eq!(again, FolderLoad::AlreadyLoaded);
        assert_eq!(log.count(Phase::Pre), 1);
        assert_eq!(session.pending_post_apply(), 1);

        cleanup(&root);
    }

    #[test]
    fn folder_without_resources_is_skipped() {
        let root = make_test_dir("session_no_resources");
        write_file(&root, "data/a.json", r#"{"type": "note"}"#);

        let log = CallLog::new();
        let mut session = session_with(&log);
        let mut world = World::default();
        let m = ModId::new("m");
        let result = session.load_mod_folder(m.clone(), &root, &mut world).unwrap();

        assert_eq!(result, FolderLoad::MissingResources);
        assert!(!session.is_loaded(&m));
        assert!(log.is_empty());

        cleanup(&root);
    }

    #[test]
    fn configured_resources_dir_and_extensions() {
        let root = make_test_dir("session_config");
        write_file(&root, "data/a.json", r#"{"type": "note"}"#);
        write_file(&root, "data/b.ron", r#"{"type": "note"}"#);

        let log = CallLog::new();
        let config = LoaderConfig {
            resources_dir: "data".to_string(),
            extensions: vec!["ron".to_string()],
            ..LoaderConfig::default()
        };
        let mut session: Session<World> = Session::with_config(config);
        session
            .register_reader("note", Box::new(RecordingReader::new("note", &log)))
            .unwrap();
        let mut world = World::default();
        session.load_mod_folder(ModId::new("m"), &root, &mut world).unwrap();

        assert_eq!(log.files(Phase::Pre), vec!["b.ron"]);

        cleanup(&root);
    }

    #[test]
    fn post_apply_reuses_mod_context_and_clears_queue() {
        let root_a = make_test_dir("session_post_a");
        let root_b = make_test_dir("session_post_b");
        write_file(&root_a, "resources/one.json", r#"{"type": "note"}"#);
        write_file(&root_b, "resources/two.json", r#"{"type": "note"}"#);

        let log = CallLog::new();
        let mut session = session_with(&log);
        let mut world = World::default();
        session.load_mod_folder(ModId::new("a"), &root_a, &mut world).unwrap();
        session.load_mod_folder(ModId::new("b"), &root_b, &mut world).unwrap();

        let summary = session.run_post_apply(&mut world);
        assert_eq!(summary.dispatched, 2);
        assert_eq!(session.pending_post_apply(), 0);
        assert!(session.is_finished());

        let post: Vec<_> = log
            .calls()
            .into_iter()
            .filter(|c| c.phase == Phase::Post)
            .collect();
        let two = post.iter().find(|c| c.file == "two.json").unwrap();
        assert_eq!(two.module, Some(ModId::new("b")));
        assert_eq!(two.base_dir, Some(root_b.join("resources")));

        cleanup(&root_a);
        cleanup(&root_b);
    }

    #[test]
    fn post_apply_failures_still_clear_queue() {
        let root = make_test_dir("session_post_fail");
        write_file(&root, "resources/a.json", r#"{"type": "fragile"}"#);
        write_file(&root, "resources/b.json", r#"{"type": "note"}"#);

        let log = CallLog::new();
        let mut session = session_with(&log);
        session
            .register_reader("fragile", Box::new(FailingReader::in_post(&log)))
            .unwrap();
        let mut world = World::default();
        session.load_mod_folder(ModId::new("m"), &root, &mut world).unwrap();
        assert_eq!(session.pending_post_apply(), 2);

        // Remove one queued file between the phases.
        std::fs::remove_file(root.join("resources/b.json")).unwrap();

        let summary = session.run_post_apply(&mut world);
        assert_eq!(summary.failed, 2);
        assert_eq!(session.pending_post_apply(), 0);

        cleanup(&root);
    }

    #[test]
    fn failed_pre_apply_is_not_queued() {
        let root = make_test_dir("session_pre_fail");
        write_file(&root, "resources/a.json", r#"{"type": "fragile"}"#);

        let log = CallLog::new();
        let mut session: Session<World> = Session::new();
        session
            .register_reader("fragile", Box::new(FailingReader::in_pre(&log)))
            .unwrap();
        let mut world = World::default();
        session.load_mod_folder(ModId::new("m"), &root, &mut world).unwrap();

        assert_eq!(session.pending_post_apply(), 0);
        session.run_post_apply(&mut world);
        assert_eq!(log.count(Phase::Post), 0);

        cleanup(&root);
    }

    #[test]
    fn loading_after_post_apply_is_an_error() {
        let root = make_test_dir("session_too_late");
        write_file(&root, "resources/a.json", r#"{"type": "note"}"#);

        let log = CallLog::new();
        let mut session = session_with(&log);
        let mut world = World::default();
        session.run_post_apply(&mut world);

        let err = session
            .load_mod_folder(ModId::new("late"), &root, &mut world)
            .unwrap_err();
        assert!(matches!(err, PipelineError::LoadingFinished { ref module } if module.as_str() == "late"));
        assert!(log.is_empty());

        cleanup(&root);
    }

    #[test]
    fn modification_applies_to_matching_entity_only() {
        let root = make_test_dir("session_mods");
        let path = write_file(&root, "goblin.json", r#"{"health": 50}"#);

        let mut session: Session<World> = Session::new();
        session
            .register_modification(ModificationFile::new("goblin", &path, &root))
            .unwrap();
        let world = World::default();

        let mut goblin = Creature::new(10, 2);
        let report = session
            .apply_to_entity(&world, &1, &mut goblin, Creature::schema())
            .unwrap();
        assert!(report.is_clean());
        assert_eq!(goblin.health, 50);
        assert_eq!(goblin.damage, 2);

        let mut orc = Creature::new(30, 5);
        assert!(session
            .apply_to_entity(&world, &2, &mut orc, Creature::schema())
            .is_none());
        assert_eq!(orc, Creature::new(30, 5));
        assert!(session.contexts().is_empty());

        cleanup(&root);
    }

    #[test]
    fn modification_cache_seals_after_first_entity() {
        let root = make_test_dir("session_mods_sealed");
        let path = write_file(&root, "orc.json", r#"{"hp": 99}"#);

        let mut session: Session<World> = Session::new();
        let world = World::default();
        let mut goblin = Creature::default();
        assert!(session
            .apply_to_entity(&world, &1, &mut goblin, Creature::schema())
            .is_none());
        assert!(session.modifications().is_built());
        assert!(!session.build_modification_cache(&world));

        let err = session
            .register_modification(ModificationFile::new("orc", &path, &root))
            .unwrap_err();
        assert!(matches!(err, ModificationError::Sealed { .. }));

        cleanup(&root);
    }

    #[test]
    fn unreadable_modification_leaves_entity_untouched() {
        let root = make_test_dir("session_mods_broken");
        let path = write_file(&root, "goblin.json", "{ nope");

        let mut session: Session<World> = Session::new();
        session
            .register_modification(ModificationFile::new("goblin", &path, &root))
            .unwrap();
        let world = World::default();
        let mut goblin = Creature::new(10, 2);
        assert!(session
            .apply_to_entity(&world, &1, &mut goblin, Creature::schema())
            .is_none());
        assert_eq!(goblin, Creature::new(10, 2));

        cleanup(&root);
    }

    #[test]
    fn post_apply_reparses_and_redispatches_by_current_tag() {
        let root = make_test_dir("session_post_retag");
        write_file(&root, "resources/a.json", r#"{"type": "note"}"#);
        write_file(&root, "resources/b.json", r#"{"type": "note"}"#);

        let log = CallLog::new();
        let mut session = session_with(&log);
        session
            .register_reader("lore", Box::new(RecordingReader::new("lore", &log)))
            .unwrap();
        let mut world = World::default();
        session.load_mod_folder(ModId::new("m"), &root, &mut world).unwrap();
        assert_eq!(session.pending_post_apply(), 2);

        // Between the phases a loses its tag and b is retagged.
        write_file(&root, "resources/a.json", r#"{"name": "untyped now"}"#);
        write_file(&root, "resources/b.json", r#"{"type": "lore"}"#);

        let summary = session.run_post_apply(&mut world);
        assert_eq!(
            summary,
            PhaseSummary {
                dispatched: 1,
                skipped: 1,
                failed: 0
            }
        );
        let post: Vec<_> = log
            .calls()
            .into_iter()
            .filter(|c| c.phase == Phase::Post)
            .collect();
        assert_eq!(post.len(), 1);
        assert_eq!(post[0].reader, "lore");
        assert_eq!(post[0].file, "b.json");
        assert_eq!(session.pending_post_apply(), 0);

        cleanup(&root);
    }

    struct Panicky;

    impl Reader<World> for Panicky {
        fn apply_pre(
            &self,
            _doc: &modkit_core::Document,
            cx: &mut ReadCx<'_, World>,
        ) -> Result<(), ReadError> {
            let _nested = cx.scope(LoadContext::detached("/elsewhere"));
            panic!("reader bug");
        }
    }

    #[test]
    fn panicking_reader_only_fails_its_own_file() {
        let root = make_test_dir("session_panic");
        write_file(&root, "resources/a.json", r#"{"type": "boom"}"#);
        write_file(&root, "resources/b.json", r#"{"type": "item", "name": "Axe"}"#);

        let log = CallLog::new();
        let mut session = session_with(&log);
        session.register_reader("boom", Box::new(Panicky)).unwrap();
        let mut world = World::default();
        let result = session
            .load_mod_folder(ModId::new("m"), &root, &mut world)
            .unwrap();

        assert_eq!(
            result,
            FolderLoad::Loaded(PhaseSummary {
                dispatched: 1,
                skipped: 0,
                failed: 1
            })
        );
        assert_eq!(world.items[0].name, "Axe");
        assert_eq!(session.pending_post_apply(), 1);
        assert!(session.contexts().is_empty());

        cleanup(&root);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_under_resources_loads_each_file_once() {
        let root = make_test_dir("session_symlink_loop");
        write_file(&root, "resources/sword.json", r#"{"type": "item", "name": "Sword"}"#);
        std::os::unix::fs::symlink(root.join("resources"), root.join("resources/loop")).unwrap();

        let log = CallLog::new();
        let mut session = session_with(&log);
        let mut world = World::default();
        session.load_mod_folder(ModId::new("m"), &root, &mut world).unwrap();

        assert_eq!(world.items.len(), 1);
        assert_eq!(session.pending_post_apply(), 1);

        cleanup(&root);
    }

    #[test]
    fn modification_paths_resolve_against_its_directory() {
        let root = make_test_dir("session_mods_paths");
        let patches = root.join("patches");
        let path = write_file(&patches, "goblin.json", r#"{"icon": "icons/goblin.png"}"#);

        let mut session: Session<World> = Session::new();
        session
            .register_modification(ModificationFile::new("goblin", &path, &patches))
            .unwrap();
        let world = World::default();
        let mut goblin = Item::default();
        let report = session
            .apply_to_entity(&world, &1, &mut goblin, Item::schema())
            .unwrap();

        assert!(report.was_applied("icon"));
        assert_eq!(goblin.icon, Some(patches.join("icons/goblin.png")));
        assert!(session.contexts().is_empty());

        cleanup(&root);
    }

    struct IconCheck;

    impl Reader<World> for IconCheck {
        fn apply_pre(
            &self,
            _doc: &modkit_core::Document,
            cx: &mut ReadCx<'_, World>,
        ) -> Result<(), ReadError> {
            let shared = cx.resolve_path("shared");
            let _nested = cx.scope(LoadContext::detached(shared));
            let icon = cx.resolve_path("icon.png");
            cx.host.items.push(Item {
                name: icon.to_string_lossy().into_owned(),
                ..Item::default()
            });
            Ok(())
        }
    }

    #[test]
    fn nested_scope_inside_reader_restores_mod_context() {
        let root = make_test_dir("session_nested");
        write_file(&root, "resources/a.json", r#"{"type": "icons"}"#);
        write_file(&root, "resources/b.json", r#"{"type": "note"}"#);

        let log = CallLog::new();
        let mut session = session_with(&log);
        session.register_reader("icons", Box::new(IconCheck)).unwrap();
        let mut world = World::default();
        session.load_mod_folder(ModId::new("m"), &root, &mut world).unwrap();

        let resources = root.join("resources");
        assert_eq!(
            PathBuf::from(&world.items[0].name),
            resources.join("shared").join("icon.png")
        );
        // b.json, read after a.json, still sees the mod context.
        let note = &log.calls()[0];
        assert_eq!(note.module, Some(ModId::new("m")));
        assert_eq!(note.base_dir, Some(resources));

        cleanup(&root);
    }
}
