//! High-level tarot journal API built on Querent.
//!
//! A `Session` is what a front end holds: card lookup by display name,
//! note-taking, the reading journal, and plain-text interpretation
//! composition, all delegating to the underlying [`KnowledgeStore`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use querent_session::Session;
//!
//! let mut session = Session::open("./my-deck.querent").unwrap();
//!
//! // Resolve a card the way a person names it
//! let fool = session.find_card("The Fool").unwrap().slug.clone();
//!
//! // Accumulate interpretation notes against it
//! session.note_card(&fool, "note", "keeps turning up before travel").unwrap();
//!
//! // Compose a text block for display
//! let block = session
//!     .compose_interpretation(&fool, "single", 0, querent_session::Orientation::Upright)
//!     .unwrap();
//! println!("{block}");
//! ```

use std::path::Path;

use querent::{Entity, Fact, KnowledgeStore, Source, Value};

pub use querent::QuerentError as Error;
pub use querent::{
    CardInfo, MergeOptions, MergeReport, Orientation, Reading, ReadingFilter, ReadingId,
    SpreadEntry,
};
pub type Result<T> = std::result::Result<T, Error>;

/// A querent's working session over one knowledge store.
///
/// This is the primary entry point for front ends. It wraps
/// [`KnowledgeStore`] with an API phrased in cards, spreads, and notes
/// rather than entities and facts.
pub struct Session {
    store: KnowledgeStore,
}

impl Session {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store: KnowledgeStore::open(path)?,
        })
    }

    /// The underlying store, for queries the facade doesn't phrase.
    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// Look a card up the way a person names it, e.g. `"Ace of Wands"`.
    pub fn find_card(&self, name: &str) -> Option<&CardInfo> {
        self.store.registry().card_by_name(name)
    }

    /// Record a text note against a card.
    pub fn note_card(&mut self, slug: &str, attribute: &str, text: &str) -> Result<()> {
        self.store.record(
            Entity::card(slug),
            attribute,
            Value::Text(text.to_string()),
            Source::User,
        )?;
        Ok(())
    }

    /// Record a text note against an ordered card combination.
    ///
    /// Order matters: The Fool followed by Death is a different subject
    /// than Death followed by The Fool.
    pub fn note_combination(&mut self, slugs: &[&str], attribute: &str, text: &str) -> Result<()> {
        let combo = Entity::combination(slugs.iter().map(|&s| Entity::card(s)));
        self.store
            .record(combo, attribute, Value::Text(text.to_string()), Source::User)?;
        Ok(())
    }

    /// Record a text note against a spread position.
    pub fn note_position(
        &mut self,
        layout: &str,
        slot: usize,
        attribute: &str,
        text: &str,
    ) -> Result<()> {
        let position = Entity::Position {
            layout: layout.to_string(),
            slot,
        };
        self.store
            .record(position, attribute, Value::Text(text.to_string()), Source::User)?;
        Ok(())
    }

    /// Full chronological history of one attribute of a card.
    pub fn card_attribute_history(&self, slug: &str, attribute: &str) -> Vec<&Fact> {
        self.store.history(&Entity::card(slug), attribute)
    }

    /// The card's current `meaning`: the user's latest refinement when one
    /// exists, otherwise the shipped base meaning.
    pub fn card_meaning(&self, slug: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .current(&Entity::card(slug), "meaning")?
            .map(|fact| fact.value.to_string()))
    }

    /// Save a spread to the journal.
    pub fn save_reading(
        &mut self,
        layout: &str,
        entries: &[SpreadEntry],
        querent_note: Option<&str>,
    ) -> Result<&Reading> {
        self.store.save_reading(layout, entries, querent_note)
    }

    /// Journal entries matching the filter, oldest first.
    pub fn journal(&self, filter: ReadingFilter) -> Vec<&Reading> {
        self.store.list_readings(filter).collect()
    }

    /// Assemble a plain-text interpretation block for one drawn card:
    /// the position's meaning, the card's meaning, and any accumulated
    /// notes, ready for a front end to render.
    ///
    /// A reversed card keeps its recorded meaning; the block renders it
    /// behind a fixed "blocked or inverted" marker rather than rewriting
    /// the text.
    pub fn compose_interpretation(
        &self,
        card: &str,
        layout: &str,
        slot: usize,
        orientation: Orientation,
    ) -> Result<String> {
        let info = self
            .store
            .registry()
            .card(card)
            .ok_or_else(|| Error::UnknownEntity(format!("card:{card}")))?;
        let spread = self
            .store
            .registry()
            .layout(layout)
            .ok_or_else(|| Error::InvalidSpread(format!("unknown layout `{layout}`")))?;
        let slot_def = spread.slots.get(slot).ok_or_else(|| {
            Error::InvalidSpread(format!(
                "slot {slot} is outside layout `{layout}` ({} positions)",
                spread.slots.len()
            ))
        })?;

        let position_meaning = self
            .store
            .most_relevant(&spread.position(slot), "meaning")
            .map(|fact| fact.value.to_string())
            .unwrap_or_else(|| slot_def.meaning.to_string());
        let card_meaning = self
            .store
            .most_relevant(&Entity::card(card), "meaning")
            .map(|fact| fact.value.to_string())
            .unwrap_or_else(|| "no recorded meaning".to_string());

        let mut block = format!(
            "{}: {} ({})\n",
            slot_def.name,
            info.name,
            orientation.as_str()
        );
        block.push_str(&format!("Position: {position_meaning}\n"));
        match orientation {
            Orientation::Upright => block.push_str(&format!("Card: {card_meaning}\n")),
            Orientation::Reversed => {
                block.push_str(&format!("Card: blocked or inverted: {card_meaning}\n"))
            }
        }
        for note in self.store.history(&Entity::card(card), "note") {
            block.push_str(&format!("Note: {}\n", note.value));
        }
        Ok(block)
    }

    /// Assemble the interpretation of a whole saved reading: one block per
    /// drawn card in spread order, the querent's note, and any recorded
    /// meaning for adjacent card pairs.
    pub fn compose_reading(&self, id: &ReadingId) -> Result<String> {
        let reading = self
            .store
            .reading(id)
            .ok_or_else(|| Error::UnknownEntity(format!("reading:{id}")))?;

        let mut text = String::new();
        if let Some(note) = &reading.querent_note {
            text.push_str(&format!("Querent: {note}\n\n"));
        }
        for entry in &reading.entries {
            text.push_str(&self.compose_interpretation(
                &entry.card,
                &reading.layout,
                entry.slot,
                entry.orientation,
            )?);
            text.push('\n');
        }
        for pair in reading.entries.windows(2) {
            let parts = [
                Entity::card(pair[0].card.clone()),
                Entity::card(pair[1].card.clone()),
            ];
            if let Some(fact) = self.store.facts_for_combination(&parts)?.last() {
                text.push_str(&format!(
                    "Together, {} and {}: {}\n",
                    pair[0].card, pair[1].card, fact.value
                ));
            }
        }
        Ok(text)
    }

    /// Write a snapshot of the full ledger to `path`.
    pub fn export_to(&self, path: impl AsRef<Path>) -> Result<()> {
        self.store.export_to(path)
    }

    /// Merge a ledger exported from a divergent copy of this store.
    pub fn merge_from(&mut self, path: impl AsRef<Path>, options: &MergeOptions) -> Result<MergeReport> {
        self.store.merge_from(path, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp_session() -> (Session, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::open(dir.path().join("session.querent")).unwrap();
        (session, dir)
    }

    #[test]
    fn find_card_resolves_display_names() {
        let (session, _tmp) = open_temp_session();
        assert_eq!(session.find_card("The Fool").unwrap().slug, "the_fool");
        assert_eq!(
            session.find_card("ace of wands").unwrap().slug,
            "ace_of_wands"
        );
        assert!(session.find_card("The Happy Squirrel").is_none());
    }

    #[test]
    fn notes_accumulate_in_order() {
        let (mut session, _tmp) = open_temp_session();
        session.note_card("the_fool", "note", "first").unwrap();
        session.note_card("the_fool", "note", "second").unwrap();

        let history = session.card_attribute_history("the_fool", "note");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value.to_string(), "first");
        assert_eq!(history[1].value.to_string(), "second");
    }

    #[test]
    fn card_meaning_prefers_the_users_refinement() {
        let (mut session, _tmp) = open_temp_session();
        let base = session.card_meaning("the_fool").unwrap().unwrap();

        session
            .note_card("the_fool", "meaning", "a leap I keep almost taking")
            .unwrap();
        let refined = session.card_meaning("the_fool").unwrap().unwrap();
        assert_ne!(refined, base);
        assert_eq!(refined, "a leap I keep almost taking");
    }

    #[test]
    fn composed_block_names_position_and_card() {
        let (session, _tmp) = open_temp_session();
        let block = session
            .compose_interpretation("the_fool", "single", 0, Orientation::Upright)
            .unwrap();
        assert!(block.contains("FOCUS"));
        assert!(block.contains("The Fool"));
        assert!(block.contains("Position: "));
        assert!(block.contains("Card: "));
    }

    #[test]
    fn reversed_block_is_marked_not_rewritten() {
        let (session, _tmp) = open_temp_session();
        let upright = session
            .compose_interpretation("death", "single", 0, Orientation::Upright)
            .unwrap();
        let reversed = session
            .compose_interpretation("death", "single", 0, Orientation::Reversed)
            .unwrap();
        assert!(!upright.contains("blocked or inverted"));
        assert!(reversed.contains("blocked or inverted"));
    }

    #[test]
    fn composing_an_unknown_slot_is_invalid() {
        let (session, _tmp) = open_temp_session();
        let err = session
            .compose_interpretation("the_fool", "single", 3, Orientation::Upright)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSpread(_)));
    }

    #[test]
    fn composed_reading_includes_pair_notes() {
        let (mut session, _tmp) = open_temp_session();
        session
            .note_combination(&["the_fool", "death"], "note", "risk transforms")
            .unwrap();
        let id = session
            .save_reading(
                "three_card",
                &[
                    SpreadEntry::new(0, "the_fool", Orientation::Upright),
                    SpreadEntry::new(1, "death", Orientation::Reversed),
                    SpreadEntry::new(2, "the_star", Orientation::Upright),
                ],
                Some("a crossing"),
            )
            .unwrap()
            .id
            .clone();

        let text = session.compose_reading(&id).unwrap();
        assert!(text.contains("Querent: a crossing"));
        assert!(text.contains("ANCHOR"));
        assert!(text.contains("TIDE"));
        assert!(text.contains("HORIZON"));
        assert!(text.contains("risk transforms"));
        // The pair was noted in fool-then-death order only.
        assert!(!text.contains("Together, death and the_star"));
    }

    #[test]
    fn journal_filters_by_involved_card() {
        let (mut session, _tmp) = open_temp_session();
        session
            .save_reading(
                "single",
                &[SpreadEntry::new(0, "the_moon", Orientation::Upright)],
                None,
            )
            .unwrap();
        session
            .save_reading(
                "single",
                &[SpreadEntry::new(0, "the_sun", Orientation::Upright)],
                None,
            )
            .unwrap();

        assert_eq!(session.journal(ReadingFilter::any()).len(), 2);
        let moon = session.journal(ReadingFilter::any().involving_card("the_moon"));
        assert_eq!(moon.len(), 1);
        assert_eq!(moon[0].entries[0].card, "the_moon");
    }

    #[test]
    fn merge_from_a_travelling_copy() {
        let dir = tempfile::tempdir().unwrap();

        let mut remote = Session::open(dir.path().join("remote.querent")).unwrap();
        remote
            .save_reading(
                "single",
                &[SpreadEntry::new(0, "the_star", Orientation::Upright)],
                Some("from the road"),
            )
            .unwrap();
        let snapshot = dir.path().join("snapshot.querent");
        remote.export_to(&snapshot).unwrap();

        let mut local = Session::open(dir.path().join("local.querent")).unwrap();
        let report = local.merge_from(&snapshot, &MergeOptions::default()).unwrap();
        assert!(report.added > 0);
        assert!(report.conflicts.is_empty());

        let journal = local.journal(ReadingFilter::any().involving_card("the_star"));
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].querent_note.as_deref(), Some("from the road"));
    }
}
