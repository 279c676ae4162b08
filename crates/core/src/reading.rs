//! Reading log: recorded spreads, persisted as facts.
//!
//! A reading is never stored as its own record type. Saving one emits
//! ordinary facts on a synthetic `reading:<ulid>` entity (`layout`,
//! `created_at`, `querent_note`, and one cumulative `drew` fact per
//! drawn card), and the log here is rebuilt from those facts on load. One store, one format; readings merge and export
//! exactly like everything else.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::warn;
use ulid::Ulid;

use crate::registry::Entity;
use crate::{Fact, Value};

/// Attribute carrying a reading's layout id.
pub(crate) const ATTR_LAYOUT: &str = "layout";
/// Attribute carrying a reading's creation time.
pub(crate) const ATTR_CREATED_AT: &str = "created_at";
/// Attribute carrying the querent's note, when present.
pub(crate) const ATTR_QUERENT_NOTE: &str = "querent_note";
/// Cumulative attribute: one fact per drawn card.
pub(crate) const ATTR_DREW: &str = "drew";

/// Stable, time-sortable reading identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadingId(pub String);

impl ReadingId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string().to_ascii_lowercase())
    }
}

impl Default for ReadingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way up a card landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Upright,
    Reversed,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Upright => "upright",
            Orientation::Reversed => "reversed",
        }
    }
}

impl FromStr for Orientation {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "upright" => Ok(Orientation::Upright),
            "reversed" => Ok(Orientation::Reversed),
            _ => Err(()),
        }
    }
}

/// One drawn card within a spread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadEntry {
    /// Slot index within the layout.
    pub slot: usize,
    /// Card slug, e.g. `the_fool`.
    pub card: String,
    pub orientation: Orientation,
}

impl SpreadEntry {
    pub fn new(slot: usize, card: impl Into<String>, orientation: Orientation) -> Self {
        Self {
            slot,
            card: card.into(),
            orientation,
        }
    }
}

/// A saved spread. Immutable once saved; later facts may reference it.
#[derive(Debug, Clone)]
pub struct Reading {
    pub id: ReadingId,
    pub layout: String,
    pub created_at: DateTime<Utc>,
    /// Drawn cards, in slot order.
    pub entries: Vec<SpreadEntry>,
    pub querent_note: Option<String>,
}

impl Reading {
    pub fn entity(&self) -> Entity {
        Entity::Reading(self.id.clone())
    }

    pub fn involves_card(&self, slug: &str) -> bool {
        self.entries.iter().any(|e| e.card == slug)
    }
}

/// Filter for [`crate::KnowledgeStore::list_readings`].
#[derive(Debug, Clone, Default)]
pub struct ReadingFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Card slug that must appear somewhere in the spread.
    pub involving: Option<String>,
}

impl ReadingFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }

    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        self.until = Some(at);
        self
    }

    pub fn involving_card(mut self, slug: impl Into<String>) -> Self {
        self.involving = Some(slug.into());
        self
    }

    pub fn matches(&self, reading: &Reading) -> bool {
        if let Some(since) = self.since {
            if reading.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if reading.created_at > until {
                return false;
            }
        }
        if let Some(slug) = &self.involving {
            if !reading.involves_card(slug) {
                return false;
            }
        }
        true
    }
}

/// Canonical text encoding of one drawn card:
/// `"position:<layout>:<slot> card:<slug> <upright|reversed>"`.
pub(crate) fn encode_drawn(layout: &str, entry: &SpreadEntry) -> String {
    format!(
        "position:{layout}:{slot} card:{card} {orientation}",
        slot = entry.slot,
        card = entry.card,
        orientation = entry.orientation.as_str()
    )
}

pub(crate) fn decode_drawn(text: &str) -> Option<(String, SpreadEntry)> {
    let mut parts = text.split_whitespace();
    let position: Entity = parts.next()?.parse().ok()?;
    let card: Entity = parts.next()?.parse().ok()?;
    let orientation: Orientation = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    match (position, card) {
        (Entity::Position { layout, slot }, Entity::Card(slug)) => {
            Some((layout, SpreadEntry::new(slot, slug, orientation)))
        }
        _ => None,
    }
}

/// In-memory view of saved readings, rebuilt from the ledger.
#[derive(Debug, Default)]
pub(crate) struct ReadingLog {
    readings: Vec<Reading>,
    by_id: HashMap<String, usize>,
}

impl ReadingLog {
    /// Reconstruct from the fact ledger in order. Facts on reading
    /// entities that do not decode (possible only in a hand-edited file)
    /// are skipped with a warning rather than poisoning the load.
    pub fn rebuild(facts: &[Fact]) -> Self {
        let mut log = Self::default();
        for fact in facts {
            let Entity::Reading(id) = &fact.entity else {
                continue;
            };
            let idx = *log.by_id.entry(id.0.clone()).or_insert_with(|| {
                log.readings.push(Reading {
                    id: id.clone(),
                    layout: String::new(),
                    created_at: fact.recorded_at,
                    entries: Vec::new(),
                    querent_note: None,
                });
                log.readings.len() - 1
            });
            let reading = &mut log.readings[idx];

            match (fact.attribute.as_str(), &fact.value) {
                (ATTR_LAYOUT, Value::Tag(layout)) => reading.layout = layout.clone(),
                (ATTR_CREATED_AT, Value::Text(ts)) => match ts.parse() {
                    Ok(at) => reading.created_at = at,
                    Err(_) => warn!(reading = %id, %ts, "unparseable created_at on reading"),
                },
                (ATTR_QUERENT_NOTE, Value::Text(note)) => {
                    reading.querent_note = Some(note.clone());
                }
                (ATTR_DREW, Value::Text(encoded)) => match decode_drawn(encoded) {
                    Some((_, entry)) => reading.entries.push(entry),
                    None => warn!(reading = %id, %encoded, "undecodable drew fact"),
                },
                // Reflections and other later facts about the reading.
                _ => {}
            }
        }
        // Merge rewrites reorder equal-timestamp facts, so `drew` facts
        // may arrive in any order. Slot order is the canonical one.
        for reading in &mut log.readings {
            reading.entries.sort_by_key(|entry| entry.slot);
        }
        log
    }

    pub fn contains(&self, id: &ReadingId) -> bool {
        self.by_id.contains_key(&id.0)
    }

    pub fn get(&self, id: &ReadingId) -> Option<&Reading> {
        self.by_id.get(&id.0).map(|&i| &self.readings[i])
    }

    pub fn push(&mut self, reading: Reading) -> &Reading {
        let idx = self.readings.len();
        self.by_id.insert(reading.id.0.clone(), idx);
        self.readings.push(reading);
        &self.readings[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawn_encoding_round_trips() {
        let entry = SpreadEntry::new(2, "the_fool", Orientation::Reversed);
        let encoded = encode_drawn("three_card", &entry);
        assert_eq!(encoded, "position:three_card:2 card:the_fool reversed");
        let (layout, decoded) = decode_drawn(&encoded).unwrap();
        assert_eq!(layout, "three_card");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn malformed_drawn_text_is_rejected() {
        assert!(decode_drawn("").is_none());
        assert!(decode_drawn("card:the_fool upright").is_none());
        assert!(decode_drawn("position:three_card:0 card:the_fool sideways").is_none());
        assert!(decode_drawn("position:three_card:0 card:the_fool upright extra").is_none());
    }

    #[test]
    fn filter_by_card_and_date() {
        let reading = Reading {
            id: ReadingId::new(),
            layout: "three_card".into(),
            created_at: "2026-03-01T12:00:00Z".parse().unwrap(),
            entries: vec![SpreadEntry::new(0, "the_star", Orientation::Upright)],
            querent_note: None,
        };

        assert!(ReadingFilter::any().matches(&reading));
        assert!(ReadingFilter::any()
            .involving_card("the_star")
            .matches(&reading));
        assert!(!ReadingFilter::any()
            .involving_card("death")
            .matches(&reading));
        assert!(!ReadingFilter::any()
            .since("2026-04-01T00:00:00Z".parse().unwrap())
            .matches(&reading));
        assert!(ReadingFilter::any()
            .until("2026-04-01T00:00:00Z".parse().unwrap())
            .matches(&reading));
    }
}
