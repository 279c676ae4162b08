//! Attribute schema registry: schema-on-write with immutable shapes.
//!
//! Attribute names are open (any `record` call may introduce one) but an
//! attribute's shape (`cardinality`, `value_kind`), once set, never changes
//! for the life of the store. Reinterpreting recorded history is the one
//! kind of flexibility this store refuses to offer.
//!
//! Declarations are persisted as ordinary facts about `attr:<name>`
//! entities (see [`SchemaRegistry::absorb_fact`]), so the schema travels
//! with the ledger through export, load, and merge.

use std::collections::HashMap;

use crate::registry::Entity;
use crate::{Fact, QuerentError, Result, Value};

/// Reserved attribute name carrying a declaration's cardinality.
pub const ATTR_CARDINALITY: &str = "cardinality";
/// Reserved attribute name carrying a declaration's value kind.
pub const ATTR_VALUE_KIND: &str = "value_kind";

pub(crate) fn is_reserved(attribute: &str) -> bool {
    attribute == ATTR_CARDINALITY || attribute == ATTR_VALUE_KIND
}

/// Whether an attribute keeps one current value or a full history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Latest value wins; earlier facts remain as provenance.
    Singular,
    /// Every value is part of the answer, in order.
    Cumulative,
}

impl Cardinality {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Cardinality::Singular => "singular",
            Cardinality::Cumulative => "cumulative",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "singular" => Some(Cardinality::Singular),
            "cumulative" => Some(Cardinality::Cumulative),
            _ => None,
        }
    }
}

/// The declared shape of an attribute's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Tag,
    EntityRef,
}

impl ValueKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Tag => "tag",
            ValueKind::EntityRef => "entity_ref",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "text" => Some(ValueKind::Text),
            "tag" => Some(ValueKind::Tag),
            "entity_ref" => Some(ValueKind::EntityRef),
            _ => None,
        }
    }
}

/// An attribute's immutable definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    pub cardinality: Cardinality,
    pub value_kind: ValueKind,
}

impl AttributeDef {
    /// The two declaration facts that persist this definition.
    pub(crate) fn declaration_values(&self) -> [(Entity, &'static str, Value); 2] {
        let subject = Entity::Attribute(self.name.clone());
        [
            (
                subject.clone(),
                ATTR_CARDINALITY,
                Value::Tag(self.cardinality.as_tag().to_string()),
            ),
            (
                subject,
                ATTR_VALUE_KIND,
                Value::Tag(self.value_kind.as_tag().to_string()),
            ),
        ]
    }
}

/// Name → shape registry, rebuilt from declaration facts on load.
#[derive(Debug, Clone)]
pub(crate) struct SchemaRegistry {
    defs: HashMap<String, AttributeDef>,
    /// Declarations arrive as two separate facts; halves wait here until
    /// both have been seen.
    pending: HashMap<String, (Option<Cardinality>, Option<ValueKind>)>,
}

impl SchemaRegistry {
    /// Registry pre-loaded with the two reserved bootstrap attributes.
    pub fn with_builtins() -> Self {
        let mut defs = HashMap::new();
        for name in [ATTR_CARDINALITY, ATTR_VALUE_KIND] {
            defs.insert(
                name.to_string(),
                AttributeDef {
                    name: name.to_string(),
                    cardinality: Cardinality::Singular,
                    value_kind: ValueKind::Tag,
                },
            );
        }
        Self {
            defs,
            pending: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDef> {
        self.defs.get(name)
    }

    /// Idempotent declaration. Returns the definition and whether it is new.
    pub fn declare_or_get(
        &mut self,
        name: &str,
        value_kind: ValueKind,
        cardinality: Cardinality,
    ) -> Result<(AttributeDef, bool)> {
        if let Some(existing) = self.defs.get(name) {
            if existing.value_kind == value_kind && existing.cardinality == cardinality {
                return Ok((existing.clone(), false));
            }
            return Err(QuerentError::SchemaConflict {
                attribute: name.to_string(),
                detail: format!(
                    "declared as ({}, {}), requested ({}, {})",
                    existing.cardinality.as_tag(),
                    existing.value_kind.as_tag(),
                    cardinality.as_tag(),
                    value_kind.as_tag()
                ),
            });
        }
        let def = AttributeDef {
            name: name.to_string(),
            cardinality,
            value_kind,
        };
        self.defs.insert(name.to_string(), def.clone());
        Ok((def, true))
    }

    /// Check a value against an attribute's declared kind.
    pub fn check_value(&self, def: &AttributeDef, value: &Value) -> Result<()> {
        if value.kind() == def.value_kind {
            Ok(())
        } else {
            Err(QuerentError::SchemaConflict {
                attribute: def.name.clone(),
                detail: format!(
                    "value kind {} does not match declared {}",
                    value.kind().as_tag(),
                    def.value_kind.as_tag()
                ),
            })
        }
    }

    /// Feed one ledger fact through during replay. Non-declaration facts
    /// pass straight through; declaration facts build up definitions, first
    /// declaration wins, a later conflicting one aborts the load.
    pub fn absorb_fact(&mut self, fact: &Fact) -> Result<()> {
        let Entity::Attribute(name) = &fact.entity else {
            return Ok(());
        };
        let Value::Tag(tag) = &fact.value else {
            return Ok(());
        };

        let slot = self
            .pending
            .entry(name.clone())
            .or_insert((None, None));
        match fact.attribute.as_str() {
            ATTR_CARDINALITY => {
                slot.0 = Cardinality::from_tag(tag).or(slot.0);
            }
            ATTR_VALUE_KIND => {
                slot.1 = ValueKind::from_tag(tag).or(slot.1);
            }
            _ => return Ok(()),
        }

        if let (Some(cardinality), Some(value_kind)) = *slot {
            self.pending.remove(name);
            if let Some(existing) = self.defs.get(name) {
                if existing.cardinality != cardinality || existing.value_kind != value_kind {
                    return Err(QuerentError::SchemaConflict {
                        attribute: name.clone(),
                        detail: format!(
                            "ledger re-declares ({}, {}) over established ({}, {})",
                            cardinality.as_tag(),
                            value_kind.as_tag(),
                            existing.cardinality.as_tag(),
                            existing.value_kind.as_tag()
                        ),
                    });
                }
            } else {
                self.defs.insert(
                    name.clone(),
                    AttributeDef {
                        name: name.clone(),
                        cardinality,
                        value_kind,
                    },
                );
            }
        }
        Ok(())
    }
}
