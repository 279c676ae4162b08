//! Built-in base vocabulary: canonical card meanings, position meanings,
//! and the seed attribute declarations.
//!
//! Seed facts carry a fixed timestamp and `Source::Base`, so two stores
//! seeded independently produce content-identical base facts and merge
//! without duplication. Application is deduplicated by
//! (entity, attribute, value, source), making it a no-op after first run.

use chrono::{DateTime, Utc};

use crate::registry::{CardClass, Entity, Rank, Registry, Suit};
use crate::schema::{AttributeDef, Cardinality, ValueKind};
use crate::{Fact, Source, Value};

/// Fixed transaction time for every seed fact.
pub(crate) const SEED_RECORDED_AT: &str = "2020-03-21T00:00:00Z";

const MAJOR_MEANINGS: [&str; 22] = [
    "New beginnings, innocence, a leap into the unknown.",
    "Willed intent, resourcefulness, the power to manifest.",
    "Intuition, hidden knowledge, the inner voice.",
    "Fertility, abundance, nurture, the natural world.",
    "Structure, authority, stability, the established order.",
    "Tradition, teaching, conformity, spiritual counsel.",
    "Union, choice, alignment of values.",
    "Drive, victory through will, opposing forces held in harness.",
    "Fairness, truth, cause and effect, accountability.",
    "Withdrawal, searching inward, the lamp of solitary wisdom.",
    "Cycles, turning fortune, what rises and falls.",
    "Gentle mastery, courage, appetite tamed by patience.",
    "Suspension, surrender, the view from upside down.",
    "Endings, transformation, clearing for what follows.",
    "Moderation, blending, the middle path.",
    "Bondage, appetite, the chains we choose.",
    "Sudden upheaval, collapse of the false, revelation by lightning.",
    "Hope, renewal, quiet guidance after the storm.",
    "Illusion, the unconscious, paths walked by half-light.",
    "Clarity, vitality, unshadowed joy.",
    "Reckoning, awakening, the call to rise.",
    "Completion, integration, the dance at the end of the cycle.",
];

fn rank_theme(rank: Rank) -> &'static str {
    match rank {
        Rank::Ace => "A seed, pure potential",
        Rank::Two => "Duality, balance, exchange",
        Rank::Three => "First growth, collaboration",
        Rank::Four => "Stability, consolidation",
        Rank::Five => "Friction, loss, contest",
        Rank::Six => "Harmony restored, passage",
        Rank::Seven => "Assessment, perseverance",
        Rank::Eight => "Mastery in motion, sustained effort",
        Rank::Nine => "Fruition, near-completion",
        Rank::Ten => "Culmination, the full weight carried",
        Rank::Page => "A student's curiosity, news arriving",
        Rank::Knight => "Pursuit, momentum, single-minded quest",
        Rank::Queen => "Inward command, sustaining presence",
        Rank::King => "Outward command, seasoned authority",
    }
}

fn suit_theme(suit: Suit) -> &'static str {
    match suit {
        Suit::Wands => "the fire of will and venture",
        Suit::Swords => "the air of intellect and strife",
        Suit::Cups => "the water of feeling and relation",
        Suit::Pentacles => "the earth of body and craft",
    }
}

/// Attribute definitions shipped with the base data.
pub(crate) fn seed_attribute_defs() -> Vec<AttributeDef> {
    let def = |name: &str, cardinality, value_kind| AttributeDef {
        name: name.to_string(),
        cardinality,
        value_kind,
    };
    vec![
        def("meaning", Cardinality::Singular, ValueKind::Text),
        def("note", Cardinality::Cumulative, ValueKind::Text),
        def("theme", Cardinality::Singular, ValueKind::Text),
        def("symbol_of", Cardinality::Cumulative, ValueKind::EntityRef),
        def("drew", Cardinality::Cumulative, ValueKind::Text),
        def("created_at", Cardinality::Singular, ValueKind::Text),
        def("querent_note", Cardinality::Singular, ValueKind::Text),
        def("layout", Cardinality::Singular, ValueKind::Tag),
    ]
}

/// The full base-fact bundle, in a deterministic order.
pub(crate) fn seed_facts(registry: &Registry) -> Vec<Fact> {
    let at: DateTime<Utc> = SEED_RECORDED_AT
        .parse()
        .expect("seed timestamp is a valid RFC 3339 literal");
    let base = |entity: Entity, attribute: &str, value: Value| {
        Fact::new(entity, attribute, value, at, Source::Base)
    };

    let mut facts = Vec::with_capacity(110);

    for def in seed_attribute_defs() {
        for (entity, attribute, value) in def.declaration_values() {
            facts.push(base(entity, attribute, value));
        }
    }

    for card in registry.cards() {
        let meaning = match card.class {
            CardClass::Major { number } => MAJOR_MEANINGS[number as usize].to_string(),
            CardClass::Minor { suit, rank } => {
                format!("{}, in {}.", rank_theme(rank), suit_theme(suit))
            }
        };
        facts.push(base(card.entity(), "meaning", Value::Text(meaning)));
    }

    for suit in Suit::ALL {
        facts.push(base(
            Entity::Suit(suit),
            "meaning",
            Value::Text(format!("The suit of {}.", suit_theme(suit))),
        ));
    }

    for layout in registry.layouts() {
        for (slot, def) in layout.slots.iter().enumerate() {
            facts.push(base(
                layout.position(slot),
                "meaning",
                Value::Text(def.meaning.to_string()),
            ));
        }
    }

    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_card_gets_exactly_one_seed_meaning() {
        let registry = Registry::new();
        let facts = seed_facts(&registry);

        let card_meanings = facts
            .iter()
            .filter(|f| matches!(f.entity, Entity::Card(_)) && f.attribute == "meaning")
            .count();
        assert_eq!(card_meanings, 78);
        assert!(facts.iter().all(|f| f.source == Source::Base));
    }

    #[test]
    fn seed_is_deterministic_across_builds() {
        let registry = Registry::new();
        assert_eq!(seed_facts(&registry), seed_facts(&registry));
    }

    #[test]
    fn seeded_positions_cover_declared_layouts() {
        let registry = Registry::new();
        let facts = seed_facts(&registry);
        let positions = facts
            .iter()
            .filter(|f| matches!(f.entity, Entity::Position { .. }))
            .count();
        let declared: usize = registry.layouts().map(|l| l.slots.len()).sum();
        assert_eq!(positions, declared);
    }
}
