//! Snapshot merge: set union over content-identified facts.
//!
//! Two ledgers grown from a common fork merge by union: facts are
//! immutable and identified by their full content, so union is always
//! safe and lossless. The only ambiguity union can introduce is two
//! t-close values for a singular attribute; those are kept *and* surfaced
//! as [`Conflict`]s for the querent to reconcile with a later explicit
//! fact. Merge never errors on divergence and never drops a fact.

use std::collections::{BTreeSet, HashSet};

use chrono::Duration;

use crate::registry::Entity;
use crate::schema::{is_reserved, Cardinality, SchemaRegistry};
use crate::{Fact, Result};

/// Tuning for conflict detection.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Two divergent singular-attribute facts closer together than this
    /// are ambiguous enough to surface.
    pub skew_tolerance: Duration,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            skew_tolerance: Duration::hours(24),
        }
    }
}

/// A surfaced ambiguity; not an error. Both facts remain in the ledger.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub entity: Entity,
    pub attribute: String,
    pub local: Fact,
    pub remote: Fact,
}

/// Outcome of a merge.
#[derive(Debug)]
pub struct MergeReport {
    /// Remote facts that were new to this ledger.
    pub added: usize,
    pub conflicts: Vec<Conflict>,
}

/// Union `local` and `remote`, returning the merged ledger in stable
/// order plus surfaced conflicts. Commutative and idempotent up to
/// fact-set equality.
pub(crate) fn merge_facts(
    local: &[Fact],
    remote: &[Fact],
    schema: &SchemaRegistry,
    options: &MergeOptions,
) -> Result<(Vec<Fact>, Vec<Conflict>)> {
    let local_set: HashSet<&Fact> = local.iter().collect();

    let mut added: Vec<Fact> = Vec::new();
    {
        let mut seen: HashSet<&Fact> = HashSet::new();
        for fact in remote {
            if !local_set.contains(fact) && seen.insert(fact) {
                added.push(fact.clone());
            }
        }
    }

    // The remote side may declare attributes this ledger has never seen;
    // conflict detection needs the union schema. A remote declaration that
    // contradicts the local one is itself a conflict, handled below, so
    // absorption here keeps the local shape on disagreement.
    let mut merged_schema = schema.clone();
    for fact in added.iter() {
        let _ = merged_schema.absorb_fact(fact);
    }

    let conflicts = detect_conflicts(local, &added, &merged_schema, options);

    let mut merged: Vec<Fact> = Vec::with_capacity(local.len() + added.len());
    merged.extend_from_slice(local);
    merged.extend(added);
    merged.sort_by(|a, b| {
        a.recorded_at
            .cmp(&b.recorded_at)
            .then_with(|| a.entity.cmp(&b.entity))
            .then_with(|| a.attribute.cmp(&b.attribute))
            .then_with(|| a.value.cmp(&b.value))
            .then_with(|| a.source.cmp(&b.source))
    });

    Ok((merged, conflicts))
}

fn detect_conflicts(
    local: &[Fact],
    added: &[Fact],
    schema: &SchemaRegistry,
    options: &MergeOptions,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    // At most one conflict per (entity, attribute) pair.
    let mut flagged: BTreeSet<(String, String)> = BTreeSet::new();

    for remote_fact in added {
        let key = (remote_fact.entity.id(), remote_fact.attribute.clone());
        if flagged.contains(&key) {
            continue;
        }

        // Schema declarations with incompatible shapes are flagged
        // regardless of timestamp skew: recency cannot reconcile them.
        let schema_declaration =
            matches!(remote_fact.entity, Entity::Attribute(_)) && is_reserved(&remote_fact.attribute);

        let singular = schema
            .get(&remote_fact.attribute)
            .map(|def| def.cardinality == Cardinality::Singular)
            .unwrap_or(false);
        if !singular && !schema_declaration {
            continue;
        }

        let contested = local.iter().rev().find(|local_fact| {
            local_fact.entity == remote_fact.entity
                && local_fact.attribute == remote_fact.attribute
                && local_fact.value != remote_fact.value
                && (schema_declaration
                    || within_skew(local_fact, remote_fact, options.skew_tolerance))
        });

        if let Some(local_fact) = contested {
            flagged.insert(key);
            conflicts.push(Conflict {
                entity: remote_fact.entity.clone(),
                attribute: remote_fact.attribute.clone(),
                local: local_fact.clone(),
                remote: remote_fact.clone(),
            });
        }
    }

    conflicts
}

fn within_skew(a: &Fact, b: &Fact, tolerance: Duration) -> bool {
    let delta = if a.recorded_at >= b.recorded_at {
        a.recorded_at - b.recorded_at
    } else {
        b.recorded_at - a.recorded_at
    };
    delta <= tolerance
}
