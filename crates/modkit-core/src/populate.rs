//! Populating typed targets from untyped documents.
//!
//! A [`Schema`] describes, once per target type, which document keys map to
//! which members and how to assign them. Members are either *properties*
//! (a setter closure receiving the typed value) or *fields* (a place accessor
//! the populator writes through). Fields may list former names so data files
//! written before a rename keep working, and may be marked non-serialized so
//! documents can never touch them. Path fields hold asset paths and are
//! resolved against the active load context when populated through
//! [`Populator::populate_in`].
//!
//! [`Populator::populate`] walks a document key by key. Every failure is
//! confined to its key: it is logged, recorded in the [`PopulateReport`], and
//! the remaining keys still apply.

use crate::context::ContextStack;
use crate::document::Document;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Keys owned by dedicated readers or by the pipeline itself. The populator
/// skips them without complaint when a target has no matching member.
pub const DEFAULT_SPECIAL_KEYS: &[&str] = &[
    "type",
    "itemId",
    "requiredObjectsToCraft",
    "components",
    "localizedName",
    "localizedDescription",
    "colliderSize",
    "colliderCenter",
];

// ===========================================================================
// Schema
// ===========================================================================

type Setter<T> =
    Box<dyn Fn(&mut T, &Value, Option<&ContextStack>) -> Result<(), serde_json::Error> + Send + Sync>;

/// Field values holding asset paths relative to the file they were read from.
pub trait AssetPath: DeserializeOwned {
    /// Rebase every relative path onto the current context's base directory.
    fn resolve_in(&mut self, contexts: &ContextStack);
}

impl AssetPath for PathBuf {
    fn resolve_in(&mut self, contexts: &ContextStack) {
        *self = contexts.resolve(&*self);
    }
}

impl<P: AssetPath> AssetPath for Option<P> {
    fn resolve_in(&mut self, contexts: &ContextStack) {
        if let Some(path) = self {
            path.resolve_in(contexts);
        }
    }
}

impl<P: AssetPath> AssetPath for Vec<P> {
    fn resolve_in(&mut self, contexts: &ContextStack) {
        for path in self {
            path.resolve_in(contexts);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberKind {
    Property,
    Field { serialized: bool },
}

struct Member<T> {
    name: String,
    former_names: Vec<String>,
    kind: MemberKind,
    set: Setter<T>,
}

/// Describes how document keys map onto members of `T`.
pub struct Schema<T> {
    type_name: &'static str,
    members: Vec<Member<T>>,
}

impl<T: 'static> Schema<T> {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            members: Vec::new(),
        }
    }

    /// Add a field written through `place`.
    pub fn field<V>(mut self, name: &str, place: fn(&mut T) -> &mut V) -> Self
    where
        V: DeserializeOwned + 'static,
    {
        self.members.push(Member {
            name: name.to_string(),
            former_names: Vec::new(),
            kind: MemberKind::Field { serialized: true },
            set: Box::new(move |target: &mut T, value: &Value, _: Option<&ContextStack>| {
                *place(target) = V::deserialize(value)?;
                Ok(())
            }),
        });
        self
    }

    /// Add a field holding asset paths, resolved against the active load context.
    pub fn path<V>(mut self, name: &str, place: fn(&mut T) -> &mut V) -> Self
    where
        V: AssetPath + 'static,
    {
        self.members.push(Member {
            name: name.to_string(),
            former_names: Vec::new(),
            kind: MemberKind::Field { serialized: true },
            set: Box::new(move |target: &mut T, value: &Value, contexts: Option<&ContextStack>| {
                let mut paths = V::deserialize(value)?;
                if let Some(contexts) = contexts {
                    paths.resolve_in(contexts);
                }
                *place(target) = paths;
                Ok(())
            }),
        });
        self
    }

    /// Add a property assigned through a setter.
    pub fn property<V, F>(mut self, name: &str, set: F) -> Self
    where
        V: DeserializeOwned + 'static,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.members.push(Member {
            name: name.to_string(),
            former_names: Vec::new(),
            kind: MemberKind::Property,
            set: Box::new(move |target: &mut T, value: &Value, _: Option<&ContextStack>| {
                set(target, V::deserialize(value)?);
                Ok(())
            }),
        });
        self
    }

    /// Record a former name of the field added last.
    ///
    /// # Panics
    ///
    /// If the last member is a property or the schema is empty.
    pub fn formerly(mut self, old_name: &str) -> Self {
        let member = self.last_field_mut("formerly");
        member.former_names.push(old_name.to_string());
        self
    }

    /// Mark the field added last as never assignable from documents.
    ///
    /// # Panics
    ///
    /// If the last member is a property or the schema is empty.
    pub fn non_serialized(mut self) -> Self {
        let member = self.last_field_mut("non_serialized");
        member.kind = MemberKind::Field { serialized: false };
        self
    }

    fn last_field_mut(&mut self, modifier: &str) -> &mut Member<T> {
        let type_name = self.type_name;
        match self.members.last_mut() {
            Some(member) if matches!(member.kind, MemberKind::Field { .. }) => member,
            _ => panic!("Schema<{type_name}>::{modifier} must follow a field"),
        }
    }
}

impl<T> Schema<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `key` names a member, directly or through a former name.
    pub fn resolves(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }

    /// Exact name first, properties ahead of fields; then former names of fields.
    fn resolve(&self, key: &str) -> Option<&Member<T>> {
        self.members
            .iter()
            .find(|m| m.kind == MemberKind::Property && m.name == key)
            .or_else(|| self.members.iter().find(|m| m.name == key))
            .or_else(|| {
                self.members.iter().find(|m| {
                    matches!(m.kind, MemberKind::Field { .. })
                        && m.former_names.iter().any(|old| old == key)
                })
            })
    }
}

impl<T> std::fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.members.iter().map(|m| m.name.as_str()).collect();
        f.debug_struct("Schema")
            .field("type_name", &self.type_name)
            .field("members", &names)
            .finish()
    }
}

/// Types with a schema built once per process.
///
/// ```rust,ignore
/// impl Describe for Creature {
///     fn schema() -> &'static Schema<Self> {
///         static SCHEMA: OnceLock<Schema<Creature>> = OnceLock::new();
///         SCHEMA.get_or_init(|| Schema::new("Creature").field("health", |c| &mut c.health))
///     }
/// }
/// ```
pub trait Describe: Sized + 'static {
    fn schema() -> &'static Schema<Self>;
}

/// Build a schema on first use and keep it for the rest of the process.
pub fn schema_once<T: 'static>(
    cell: &'static OnceLock<Schema<T>>,
    build: impl FnOnce() -> Schema<T>,
) -> &'static Schema<T> {
    cell.get_or_init(build)
}

// ===========================================================================
// Report
// ===========================================================================

/// Why a key was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssue {
    /// The caller forbade overriding this key.
    Excluded,
    /// No member matches the key.
    Unknown,
    /// The value could not be deserialized into the member's type.
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWarning {
    pub key: String,
    pub issue: FieldIssue,
}

/// Per-key outcome of one [`Populator::populate`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulateReport {
    /// Keys assigned to the target, in document order.
    pub applied: Vec<String>,
    /// Keys skipped without a warning: special keys and non-serialized fields.
    pub ignored: Vec<String>,
    pub warnings: Vec<FieldWarning>,
}

impl PopulateReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn was_applied(&self, key: &str) -> bool {
        self.applied.iter().any(|k| k == key)
    }
}

// ===========================================================================
// Populator
// ===========================================================================

/// Assigns document values onto typed targets through their [`Schema`].
#[derive(Debug, Clone)]
pub struct Populator {
    special_keys: HashSet<String>,
}

impl Default for Populator {
    fn default() -> Self {
        Self::new(DEFAULT_SPECIAL_KEYS.iter().copied())
    }
}

impl Populator {
    pub fn new<I, S>(special_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            special_keys: special_keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_special(&self, key: &str) -> bool {
        self.special_keys.contains(key)
    }

    /// Apply every key of `doc` onto `target`, skipping keys in `exclude`.
    ///
    /// Path fields keep the paths exactly as written.
    pub fn populate<T>(
        &self,
        schema: &Schema<T>,
        target: &mut T,
        doc: &Document,
        exclude: &[&str],
    ) -> PopulateReport {
        self.apply(schema, target, doc, exclude, None)
    }

    /// Like [`populate`](Self::populate), resolving path fields against the
    /// current context of `contexts`.
    pub fn populate_in<T>(
        &self,
        contexts: &ContextStack,
        schema: &Schema<T>,
        target: &mut T,
        doc: &Document,
        exclude: &[&str],
    ) -> PopulateReport {
        self.apply(schema, target, doc, exclude, Some(contexts))
    }

    fn apply<T>(
        &self,
        schema: &Schema<T>,
        target: &mut T,
        doc: &Document,
        exclude: &[&str],
        contexts: Option<&ContextStack>,
    ) -> PopulateReport {
        let mut report = PopulateReport::default();

        for (key, value) in doc.iter() {
            if exclude.contains(&key) {
                tracing::warn!(
                    target: "modkit::populate",
                    schema = schema.type_name(),
                    key,
                    "overriding this field is not allowed"
                );
                report.warnings.push(FieldWarning {
                    key: key.to_string(),
                    issue: FieldIssue::Excluded,
                });
                continue;
            }

            let Some(member) = schema.resolve(key) else {
                if self.is_special(key) {
                    report.ignored.push(key.to_string());
                } else {
                    tracing::warn!(
                        target: "modkit::populate",
                        schema = schema.type_name(),
                        key,
                        "field not found"
                    );
                    report.warnings.push(FieldWarning {
                        key: key.to_string(),
                        issue: FieldIssue::Unknown,
                    });
                }
                continue;
            };

            if member.kind == (MemberKind::Field { serialized: false }) {
                report.ignored.push(key.to_string());
                continue;
            }

            match (member.set)(target, value, contexts) {
                Ok(()) => report.applied.push(key.to_string()),
                Err(e) => {
                    tracing::warn!(
                        target: "modkit::populate",
                        schema = schema.type_name(),
                        key,
                        error = %e,
                        "failed to deserialize field"
                    );
                    report.warnings.push(FieldWarning {
                        key: key.to_string(),
                        issue: FieldIssue::Malformed(e.to_string()),
                    });
                }
            }
        }

        report
    }
}
