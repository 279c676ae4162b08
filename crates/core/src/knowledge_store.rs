//! Querent: an offline, append-only tarot interpretation knowledge store.
//!
//! The core primitive is a [`Fact`]: an (entity, attribute, value,
//! recorded_at, source) tuple. Facts are immutable once recorded;
//! "editing" an interpretation always means inserting a newer fact, and
//! every view (current value, history, association queries, the reading
//! log) is derived from the ledger, never separately authoritative.
//!
//! The entity universe is closed: the 78 cards plus their suits, arcana
//! classes, and the declared spread positions, all enumerated by the
//! [`Registry`]. Attribute names, by contrast, are open. The store is
//! schema-on-write, and any `record` call may coin a new attribute whose
//! shape is then fixed for the life of the store.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use querent::{Entity, KnowledgeStore, Source, Value};
//!
//! let mut store = KnowledgeStore::open("my-deck.querent").unwrap();
//!
//! // Record an interpretation
//! store
//!     .record(
//!         Entity::card("the_fool"),
//!         "note",
//!         Value::Text("leap of faith, naively".into()),
//!         Source::User,
//!     )
//!     .unwrap();
//!
//! // Query the accumulated history
//! let notes = store.history(&Entity::card("the_fool"), "note");
//!
//! // Ordered combinations carry their own meaning
//! let pair = [Entity::card("the_fool"), Entity::card("death")];
//! let combo_facts = store.facts_for_combination(&pair).unwrap();
//! ```

mod index;
mod ledger;
mod merge;
mod reading;
mod registry;
mod schema;
mod seed;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::index::AssociationIndex;
use crate::ledger::Ledger;
use crate::reading::{ATTR_CREATED_AT, ATTR_DREW, ATTR_LAYOUT, ATTR_QUERENT_NOTE};
use crate::schema::SchemaRegistry;

pub use crate::merge::{Conflict, MergeOptions, MergeReport};
pub use crate::reading::{Orientation, Reading, ReadingFilter, ReadingId, SpreadEntry};
pub use crate::registry::{
    Arcana, CardClass, CardInfo, Entity, Rank, Registry, SlotDef, SpreadLayout, Suit,
};
pub use crate::schema::{AttributeDef, Cardinality, ValueKind, ATTR_CARDINALITY, ATTR_VALUE_KIND};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum QuerentError {
    /// The id is outside the closed registry. A caller bug, never retried.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    /// An attribute was reused with an incompatible shape. Surfaced to the
    /// user, never auto-resolved.
    #[error("schema conflict on attribute `{attribute}`: {detail}")]
    SchemaConflict { attribute: String, detail: String },
    /// `current` was asked of a cumulative attribute.
    #[error("attribute `{0}` is cumulative, not singular")]
    NotSingular(String),
    /// The reading violates its layout; nothing was written.
    #[error("invalid spread: {0}")]
    InvalidSpread(String),
    /// Another process holds the ledger. Fail fast; retry later.
    #[error("another process holds the ledger at {}", .0.display())]
    StoreLocked(PathBuf),
    /// An interior ledger line failed to parse. Loading refuses to proceed
    /// rather than silently drop history.
    #[error("corrupt ledger record at line {line}")]
    CorruptRecord { line: usize },
    /// An index rebuild was cancelled; reopen the store to recover.
    #[error("index rebuild cancelled")]
    RebuildCancelled,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for QuerentError {
    fn from(e: std::io::Error) -> Self {
        QuerentError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuerentError>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Where a fact came from: the shipped base vocabulary, or the querent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Base,
    User,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Base => write!(f, "base"),
            Source::User => write!(f, "user"),
        }
    }
}

/// The value stored in a fact: opaque text, a short tag, or a reference
/// to another entity (the graph-edge case, e.g. `symbol_of`).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Tag(String),
    EntityRef(Entity),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Tag(_) => ValueKind::Tag,
            Value::EntityRef(_) => ValueKind::EntityRef,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Tag(s) => Some(s),
            Value::EntityRef(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) | Value::Tag(s) => write!(f, "{s}"),
            Value::EntityRef(e) => write!(f, "{e}"),
        }
    }
}

/// The atomic unit of the store. Immutable once recorded; identified by
/// its full content (which is what makes merge a plain set union).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub entity: Entity,
    pub attribute: String,
    pub value: Value,
    pub recorded_at: DateTime<Utc>,
    pub source: Source,
}

impl Fact {
    pub fn new(
        entity: Entity,
        attribute: impl Into<String>,
        value: Value,
        recorded_at: DateTime<Utc>,
        source: Source,
    ) -> Self {
        Self {
            entity,
            attribute: attribute.into(),
            value,
            recorded_at,
            source,
        }
    }

    /// Dedupe key for seed application: (entity, attribute, value,
    /// source), deliberately ignoring the timestamp.
    fn seed_key(&self) -> (String, String, Value, Source) {
        (
            self.entity.id(),
            self.attribute.clone(),
            self.value.clone(),
            self.source,
        )
    }
}

// ---------------------------------------------------------------------------
// The store
// ---------------------------------------------------------------------------

/// The interpretation knowledge store: an append-only fact ledger plus the
/// derived views over it.
///
/// Single-writer, single-reader, embedded. Writes (`record`,
/// `save_reading`, `merge`) take a scoped exclusive lock on the ledger
/// file and fail fast with [`QuerentError::StoreLocked`] if another
/// process holds it; reads are served from the in-memory association
/// index without the lock.
pub struct KnowledgeStore {
    registry: Registry,
    schema: SchemaRegistry,
    /// The ledger, in file order. Source of truth for every derived view.
    facts: Vec<Fact>,
    index: AssociationIndex,
    readings: reading::ReadingLog,
    ledger: Ledger,
}

impl KnowledgeStore {
    /// Open or create a store at the given path, replaying the ledger and
    /// applying any missing base vocabulary.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let ledger = Ledger::new(path.as_ref());
        let facts = ledger.load()?;

        let mut schema = SchemaRegistry::with_builtins();
        for fact in &facts {
            schema.absorb_fact(fact)?;
        }
        let index = AssociationIndex::rebuild(&facts, None)?;
        let readings = reading::ReadingLog::rebuild(&facts);

        let mut store = Self {
            registry: Registry::new(),
            schema,
            facts,
            index,
            readings,
            ledger,
        };
        store.apply_seed()?;
        Ok(store)
    }

    /// The fixed enumeration of cards, suits, arcana classes, and layouts.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Declared shape of an attribute, if it has ever been used.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.schema.get(name)
    }

    /// Total number of facts in the ledger.
    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    // -- writing ------------------------------------------------------------

    /// Record a fact at the current time. See [`record_at`].
    ///
    /// [`record_at`]: KnowledgeStore::record_at
    pub fn record(
        &mut self,
        entity: Entity,
        attribute: &str,
        value: Value,
        source: Source,
    ) -> Result<&Fact> {
        self.record_at(entity, attribute, value, source, Utc::now())
    }

    /// Record a fact with an explicit transaction time (import tooling,
    /// backdated journal entries).
    ///
    /// Appends exactly one immutable ledger entry, plus the two
    /// declaration entries when the attribute is new to the store. A new
    /// attribute takes its value kind from `value` and defaults to
    /// cumulative; declare it with [`declare_attribute`] first if it
    /// should be singular.
    ///
    /// [`declare_attribute`]: KnowledgeStore::declare_attribute
    pub fn record_at(
        &mut self,
        entity: Entity,
        attribute: &str,
        value: Value,
        source: Source,
        recorded_at: DateTime<Utc>,
    ) -> Result<&Fact> {
        if schema::is_reserved(attribute) {
            return Err(QuerentError::SchemaConflict {
                attribute: attribute.to_string(),
                detail: "reserved for schema declarations; use declare_attribute".to_string(),
            });
        }
        self.validate_entity(&entity)?;
        if let Value::EntityRef(target) = &value {
            self.validate_entity(target)?;
        }

        // A new attribute's definition is staged here and committed to the
        // schema only after its declaration facts hit the ledger; a failed
        // append must not leave a definition the ledger never recorded.
        let (staged_def, declaration_facts): (Option<AttributeDef>, Vec<Fact>) =
            match self.schema.get(attribute) {
                Some(def) => {
                    self.schema.check_value(def, &value)?;
                    (None, Vec::new())
                }
                None => {
                    let def = AttributeDef {
                        name: attribute.to_string(),
                        cardinality: Cardinality::Cumulative,
                        value_kind: value.kind(),
                    };
                    let declarations = def
                        .declaration_values()
                        .into_iter()
                        .map(|(e, a, v)| Fact::new(e, a, v, recorded_at, source))
                        .collect();
                    (Some(def), declarations)
                }
            };

        let mut lock = self.ledger.lock()?;
        let fact = Fact::new(entity, attribute, value, recorded_at, source);
        for declaration in &declaration_facts {
            lock.append(declaration)?;
        }
        lock.append(&fact)?;
        drop(lock);

        if let Some(def) = staged_def {
            self.schema
                .declare_or_get(&def.name, def.value_kind, def.cardinality)?;
        }
        for declaration in declaration_facts {
            self.push_fact(declaration);
        }
        self.push_fact(fact);
        let last = self.facts.len() - 1;
        Ok(&self.facts[last])
    }

    /// Declare an attribute's shape explicitly. Idempotent on an identical
    /// shape; [`QuerentError::SchemaConflict`] on a different one. The
    /// shape is immutable once set.
    pub fn declare_attribute(
        &mut self,
        name: &str,
        value_kind: ValueKind,
        cardinality: Cardinality,
    ) -> Result<AttributeDef> {
        if self.schema.get(name).is_some() {
            // Idempotent success or a conflict; no mutation either way.
            let (def, _) = self.schema.declare_or_get(name, value_kind, cardinality)?;
            return Ok(def);
        }

        let def = AttributeDef {
            name: name.to_string(),
            cardinality,
            value_kind,
        };
        let now = Utc::now();
        let declarations: Vec<Fact> = def
            .declaration_values()
            .into_iter()
            .map(|(e, a, v)| Fact::new(e, a, v, now, Source::User))
            .collect();

        let mut lock = self.ledger.lock()?;
        for declaration in &declarations {
            lock.append(declaration)?;
        }
        drop(lock);

        self.schema.declare_or_get(name, value_kind, cardinality)?;
        for declaration in declarations {
            self.push_fact(declaration);
        }
        Ok(def)
    }

    // -- querying -----------------------------------------------------------

    /// Chronological history for one (entity, attribute) pair: stable sort
    /// by recorded_at, ledger order breaking ties. Empty if none.
    pub fn history(&self, entity: &Entity, attribute: &str) -> Vec<&Fact> {
        self.index.history(&self.facts, &entity.id(), attribute)
    }

    /// Current value of a singular attribute, a pure function of the fact
    /// set: latest recorded_at, `user` over `base` on exact ties.
    ///
    /// `Ok(None)` if nothing was ever recorded;
    /// [`QuerentError::NotSingular`] for cumulative attributes.
    pub fn current(&self, entity: &Entity, attribute: &str) -> Result<Option<&Fact>> {
        match self.schema.get(attribute) {
            None => Ok(None),
            Some(def) if def.cardinality == Cardinality::Singular => {
                Ok(self.index.most_relevant(&self.facts, &entity.id(), attribute))
            }
            Some(def) => Err(QuerentError::NotSingular(def.name.clone())),
        }
    }

    /// The most relevant recent interpretation for any attribute, singular
    /// or cumulative: latest recorded_at, `user` preferred over `base` on
    /// exact timestamp ties.
    pub fn most_relevant(&self, entity: &Entity, attribute: &str) -> Option<&Fact> {
        self.index
            .most_relevant(&self.facts, &entity.id(), attribute)
    }

    /// Everything recorded against an entity: attribute → ordered history.
    pub fn facts_for(&self, entity: &Entity) -> BTreeMap<String, Vec<&Fact>> {
        self.index.facts_for(&self.facts, &entity.id())
    }

    /// Facts recorded against an ordered entity tuple. Order is
    /// significant: `(A, B)` and `(B, A)` are different subjects.
    pub fn facts_for_combination(&self, parts: &[Entity]) -> Result<Vec<&Fact>> {
        let combo = Entity::Combination(parts.to_vec());
        self.validate_entity(&combo)?;
        let mut all: Vec<&Fact> = self
            .facts_for(&combo)
            .into_values()
            .flatten()
            .collect();
        all.sort_by_key(|fact| fact.recorded_at);
        Ok(all)
    }

    // -- readings -----------------------------------------------------------

    /// Save a spread. Fails with [`QuerentError::InvalidSpread`], and
    /// appends nothing, if the entries don't fit the named layout or a
    /// position appears twice.
    ///
    /// On success the reading is persisted as facts on a synthetic
    /// `reading:<id>` entity (one cumulative `drew` fact per drawn card),
    /// so later reflections about it flow through the same fact paths.
    pub fn save_reading(
        &mut self,
        layout_id: &str,
        entries: &[SpreadEntry],
        querent_note: Option<&str>,
    ) -> Result<&Reading> {
        let layout = self.registry.layout(layout_id).ok_or_else(|| {
            QuerentError::InvalidSpread(format!("unknown layout `{layout_id}`"))
        })?;
        if entries.is_empty() {
            return Err(QuerentError::InvalidSpread(
                "a reading needs at least one drawn card".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for entry in entries {
            if entry.slot >= layout.slots.len() {
                return Err(QuerentError::InvalidSpread(format!(
                    "slot {} is outside layout `{layout_id}` ({} positions)",
                    entry.slot,
                    layout.slots.len()
                )));
            }
            if !seen.insert(entry.slot) {
                return Err(QuerentError::InvalidSpread(format!(
                    "position {} appears twice",
                    entry.slot
                )));
            }
            if self.registry.card(&entry.card).is_none() {
                return Err(QuerentError::UnknownEntity(format!("card:{}", entry.card)));
            }
        }

        // Entries are held in slot order, whatever order they were given
        // in, so a reading reads back identically after reload and merge.
        let mut entries = entries.to_vec();
        entries.sort_by_key(|entry| entry.slot);

        let created_at = Utc::now();
        let reading = Reading {
            id: ReadingId::new(),
            layout: layout_id.to_string(),
            created_at,
            entries,
            querent_note: querent_note.map(|s| s.to_string()),
        };
        let subject = reading.entity();

        let mut to_append = vec![
            Fact::new(
                subject.clone(),
                ATTR_LAYOUT,
                Value::Tag(layout_id.to_string()),
                created_at,
                Source::User,
            ),
            Fact::new(
                subject.clone(),
                ATTR_CREATED_AT,
                Value::Text(created_at.to_rfc3339()),
                created_at,
                Source::User,
            ),
        ];
        if let Some(note) = &reading.querent_note {
            to_append.push(Fact::new(
                subject.clone(),
                ATTR_QUERENT_NOTE,
                Value::Text(note.clone()),
                created_at,
                Source::User,
            ));
        }
        for entry in &reading.entries {
            to_append.push(Fact::new(
                subject.clone(),
                ATTR_DREW,
                Value::Text(reading::encode_drawn(layout_id, entry)),
                created_at,
                Source::User,
            ));
        }

        let mut lock = self.ledger.lock()?;
        for fact in &to_append {
            lock.append(fact)?;
        }
        drop(lock);
        for fact in to_append {
            self.push_fact(fact);
        }
        Ok(self.readings.push(reading))
    }

    /// Saved readings matching the filter, oldest first. Restartable
    /// (call again for a fresh pass) and bounded by the ledger.
    pub fn list_readings(&self, filter: ReadingFilter) -> impl Iterator<Item = &Reading> {
        self.readings.iter().filter(move |r| filter.matches(r))
    }

    pub fn reading(&self, id: &ReadingId) -> Option<&Reading> {
        self.readings.get(id)
    }

    // -- snapshot / merge ---------------------------------------------------

    /// The full ledger in stable export order: recorded_at, ledger
    /// position breaking ties.
    pub fn export(&self) -> Vec<Fact> {
        let mut facts = self.facts.clone();
        facts.sort_by_key(|fact| fact.recorded_at);
        facts
    }

    /// Write the export to a fresh ledger file at `path`.
    pub fn export_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let target = Ledger::new(path.as_ref());
        let guard = target.lock()?;
        target.rewrite(&guard, &self.export())
    }

    /// Merge another ledger's facts into this store: a lossless set union
    /// with conflicts surfaced, never resolved silently. See
    /// [`MergeReport`].
    pub fn merge(&mut self, remote: Vec<Fact>, options: &MergeOptions) -> Result<MergeReport> {
        self.merge_with_cancel(remote, options, None)
    }

    /// Merge a ledger file exported from a divergent copy of this store.
    pub fn merge_from(
        &mut self,
        path: impl AsRef<Path>,
        options: &MergeOptions,
    ) -> Result<MergeReport> {
        let remote = Ledger::new(path.as_ref()).load()?;
        self.merge(remote, options)
    }

    /// Merge with a cooperative cancel flag for the post-union index
    /// rebuild (the session is unusable mid-rebuild; a cancelled rebuild
    /// leaves the store needing a reopen).
    pub fn merge_with_cancel(
        &mut self,
        remote: Vec<Fact>,
        options: &MergeOptions,
        cancel: Option<&AtomicBool>,
    ) -> Result<MergeReport> {
        let (merged, conflicts) =
            merge::merge_facts(&self.facts, &remote, &self.schema, options)?;
        let added = merged.len() - self.facts.len();

        if added > 0 {
            let guard = self.ledger.lock()?;
            self.ledger.rewrite(&guard, &merged)?;
            drop(guard);

            let mut schema = SchemaRegistry::with_builtins();
            for fact in &merged {
                // Shape disagreements were surfaced as conflicts above;
                // the first declaration in merged order stands.
                let _ = schema.absorb_fact(fact);
            }
            self.index = AssociationIndex::rebuild(&merged, cancel)?;
            self.readings = reading::ReadingLog::rebuild(&merged);
            self.schema = schema;
            self.facts = merged;
            info!(added, conflicts = conflicts.len(), "merge complete");
        }

        Ok(MergeReport { added, conflicts })
    }

    // -- internals ----------------------------------------------------------

    fn validate_entity(&self, entity: &Entity) -> Result<()> {
        let readings = &self.readings;
        self.registry
            .validate(entity, &|id| readings.contains(id))
    }

    fn push_fact(&mut self, fact: Fact) {
        self.index.insert(self.facts.len(), &fact);
        self.facts.push(fact);
    }

    /// Append any missing base vocabulary, deduplicated by
    /// (entity, attribute, value, source) so reopening never duplicates.
    fn apply_seed(&mut self) -> Result<()> {
        let existing: HashSet<_> = self
            .facts
            .iter()
            .filter(|f| f.source == Source::Base)
            .map(Fact::seed_key)
            .collect();
        let missing: Vec<Fact> = seed::seed_facts(&self.registry)
            .into_iter()
            .filter(|f| !existing.contains(&f.seed_key()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut lock = self.ledger.lock()?;
        for fact in &missing {
            lock.append(fact)?;
        }
        drop(lock);

        info!(facts = missing.len(), "seeded base vocabulary");
        for fact in missing {
            self.schema.absorb_fact(&fact)?;
            self.push_fact(fact);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
