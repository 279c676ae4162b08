//! Association index: a derived, rebuildable view over the ledger.
//!
//! Maps entity id → attribute → fact positions, kept incrementally
//! consistent on every record. Because facts are never deleted, the index
//! only ever inserts. The ledger vector is the source of truth; this is a
//! read-optimised view of it, fully reconstructible by replay.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::{Fact, QuerentError, Result, Source};

/// How often rebuild progress is reported, in facts.
const REBUILD_PROGRESS_EVERY: usize = 1000;

#[derive(Debug, Default)]
pub(crate) struct AssociationIndex {
    by_entity: HashMap<String, BTreeMap<String, Vec<usize>>>,
}

impl AssociationIndex {
    /// Register the fact at ledger position `pos`.
    pub fn insert(&mut self, pos: usize, fact: &Fact) {
        self.by_entity
            .entry(fact.entity.id())
            .or_default()
            .entry(fact.attribute.clone())
            .or_default()
            .push(pos);
    }

    /// Rebuild from scratch by replaying the ledger.
    ///
    /// This is the one blocking batch step in the store (after a bulk
    /// merge). Progress is reported as it goes and a completion event is
    /// always emitted; the cooperative `cancel` flag aborts between facts.
    pub fn rebuild(facts: &[Fact], cancel: Option<&AtomicBool>) -> Result<Self> {
        let mut index = Self::default();
        for (pos, fact) in facts.iter().enumerate() {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(QuerentError::RebuildCancelled);
                }
            }
            if pos > 0 && pos % REBUILD_PROGRESS_EVERY == 0 {
                info!(processed = pos, total = facts.len(), "index rebuild in progress");
            }
            index.insert(pos, fact);
        }
        info!(total = facts.len(), "index rebuild complete");
        Ok(index)
    }

    /// Chronological history for one (entity, attribute) pair: stable sort
    /// by recorded_at, ledger position breaking ties.
    pub fn history<'a>(&self, facts: &'a [Fact], entity_id: &str, attribute: &str) -> Vec<&'a Fact> {
        let Some(positions) = self
            .by_entity
            .get(entity_id)
            .and_then(|attrs| attrs.get(attribute))
        else {
            return Vec::new();
        };
        let mut ordered = positions.clone();
        ordered.sort_by_key(|&pos| facts[pos].recorded_at);
        ordered.into_iter().map(|pos| &facts[pos]).collect()
    }

    /// Every attribute recorded against an entity, each with its ordered
    /// history.
    pub fn facts_for<'a>(
        &self,
        facts: &'a [Fact],
        entity_id: &str,
    ) -> BTreeMap<String, Vec<&'a Fact>> {
        let Some(attrs) = self.by_entity.get(entity_id) else {
            return BTreeMap::new();
        };
        attrs
            .keys()
            .map(|attr| (attr.clone(), self.history(facts, entity_id, attr)))
            .collect()
    }

    /// The "most relevant recent interpretation" rule: latest recorded_at,
    /// user-recorded facts preferred over base on exact timestamp ties,
    /// later ledger position breaking what remains.
    pub fn most_relevant<'a>(
        &self,
        facts: &'a [Fact],
        entity_id: &str,
        attribute: &str,
    ) -> Option<&'a Fact> {
        self.history(facts, entity_id, attribute)
            .into_iter()
            .max_by_key(|fact| (fact.recorded_at, fact.source == Source::User))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Entity;
    use crate::Value;
    use chrono::{Duration, Utc};

    fn fact_at(minutes: i64, source: Source, text: &str) -> Fact {
        Fact::new(
            Entity::card("the_fool"),
            "meaning",
            Value::Text(text.to_string()),
            Utc::now() + Duration::minutes(minutes),
            source,
        )
    }

    #[test]
    fn history_is_chronological_regardless_of_insertion_order() {
        let facts = vec![
            fact_at(10, Source::User, "later"),
            fact_at(0, Source::Base, "earlier"),
        ];
        let index = AssociationIndex::rebuild(&facts, None).unwrap();
        let history = index.history(&facts, "card:the_fool", "meaning");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, Value::Text("earlier".into()));
        assert_eq!(history[1].value, Value::Text("later".into()));
    }

    #[test]
    fn user_beats_base_on_exact_timestamp_tie() {
        let t = Utc::now();
        let facts = vec![
            Fact::new(
                Entity::card("the_fool"),
                "meaning",
                Value::Text("factory default".into()),
                t,
                Source::Base,
            ),
            Fact::new(
                Entity::card("the_fool"),
                "meaning",
                Value::Text("lived refinement".into()),
                t,
                Source::User,
            ),
        ];
        let index = AssociationIndex::rebuild(&facts, None).unwrap();
        let best = index
            .most_relevant(&facts, "card:the_fool", "meaning")
            .unwrap();
        assert_eq!(best.value, Value::Text("lived refinement".into()));
    }

    #[test]
    fn replay_matches_incremental_insertion() {
        let facts: Vec<Fact> = (0..50)
            .map(|i| fact_at(i, Source::User, &format!("note {i}")))
            .collect();

        let mut live = AssociationIndex::default();
        for (pos, fact) in facts.iter().enumerate() {
            live.insert(pos, fact);
        }
        let replayed = AssociationIndex::rebuild(&facts, None).unwrap();

        assert_eq!(
            live.history(&facts, "card:the_fool", "meaning"),
            replayed.history(&facts, "card:the_fool", "meaning"),
        );
    }

    #[test]
    fn rebuild_honors_cancel_flag() {
        let facts = vec![fact_at(0, Source::User, "a")];
        let cancel = AtomicBool::new(true);
        let err = AssociationIndex::rebuild(&facts, Some(&cancel)).unwrap_err();
        assert!(matches!(err, QuerentError::RebuildCancelled));
    }
}
