//! Canonical identifiers for the closed deck universe.
//!
//! The registry is built once when a store opens and never mutates: 78
//! cards (22 majors in the Marseille ordering, where 8 is Justice and 11
//! is Strength, plus 56 rank/suit minors), four suits, two arcana
//! classes, and the declared spread layouts. Everything else in the store
//! refers to these objects by stable string id, never by display name.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::reading::ReadingId;
use crate::{QuerentError, Result};

/// The four minor-arcana suits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Suit {
    Wands,
    Swords,
    Cups,
    Pentacles,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Wands, Suit::Swords, Suit::Cups, Suit::Pentacles];

    pub fn as_str(&self) -> &'static str {
        match self {
            Suit::Wands => "wands",
            Suit::Swords => "swords",
            Suit::Cups => "cups",
            Suit::Pentacles => "pentacles",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Suit::Wands => "Wands",
            Suit::Swords => "Swords",
            Suit::Cups => "Cups",
            Suit::Pentacles => "Pentacles",
        }
    }
}

impl FromStr for Suit {
    type Err = QuerentError;

    fn from_str(s: &str) -> Result<Self> {
        Suit::ALL
            .into_iter()
            .find(|suit| suit.as_str() == s)
            .ok_or_else(|| QuerentError::UnknownEntity(format!("suit:{s}")))
    }
}

/// The two arcana classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arcana {
    Major,
    Minor,
}

impl Arcana {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arcana::Major => "major",
            Arcana::Minor => "minor",
        }
    }
}

impl FromStr for Arcana {
    type Err = QuerentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "major" => Ok(Arcana::Major),
            "minor" => Ok(Arcana::Minor),
            other => Err(QuerentError::UnknownEntity(format!("arcana:{other}"))),
        }
    }
}

/// Minor-arcana ranks, ace through king.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rank {
    Ace,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Page,
    Knight,
    Queen,
    King,
}

impl Rank {
    pub const ALL: [Rank; 14] = [
        Rank::Ace,
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Page,
        Rank::Knight,
        Rank::Queen,
        Rank::King,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Rank::Ace => "Ace",
            Rank::Two => "Two",
            Rank::Three => "Three",
            Rank::Four => "Four",
            Rank::Five => "Five",
            Rank::Six => "Six",
            Rank::Seven => "Seven",
            Rank::Eight => "Eight",
            Rank::Nine => "Nine",
            Rank::Ten => "Ten",
            Rank::Page => "Page",
            Rank::Knight => "Knight",
            Rank::Queen => "Queen",
            Rank::King => "King",
        }
    }
}

/// Whether a card is a numbered major or a suited minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardClass {
    Major { number: u8 },
    Minor { suit: Suit, rank: Rank },
}

/// One of the 78 cards in the closed set.
#[derive(Debug, Clone)]
pub struct CardInfo {
    /// Stable id fragment, e.g. `the_fool`, `ace_of_wands`.
    pub slug: String,
    /// Display name, e.g. `The Fool`.
    pub name: String,
    pub class: CardClass,
}

impl CardInfo {
    pub fn entity(&self) -> Entity {
        Entity::Card(self.slug.clone())
    }

    /// The suit for minors, `None` for majors.
    pub fn suit(&self) -> Option<Suit> {
        match self.class {
            CardClass::Major { .. } => None,
            CardClass::Minor { suit, .. } => Some(suit),
        }
    }

    pub fn arcana(&self) -> Arcana {
        match self.class {
            CardClass::Major { .. } => Arcana::Major,
            CardClass::Minor { .. } => Arcana::Minor,
        }
    }
}

/// A named slot within a spread layout.
#[derive(Debug, Clone)]
pub struct SlotDef {
    pub name: &'static str,
    pub meaning: &'static str,
}

/// A declared spread layout that a reading instantiates with drawn cards.
#[derive(Debug, Clone)]
pub struct SpreadLayout {
    pub id: &'static str,
    pub slots: Vec<SlotDef>,
}

impl SpreadLayout {
    pub fn position(&self, slot: usize) -> Entity {
        Entity::Position {
            layout: self.id.to_string(),
            slot,
        }
    }
}

/// Anything the store can hold facts about, referenced by stable id.
///
/// The canonical string form (via [`fmt::Display`] / [`FromStr`]) is what
/// the ledger and the association index key on:
///
/// | variant       | id form                          |
/// |---------------|----------------------------------|
/// | `Card`        | `card:the_fool`                  |
/// | `Suit`        | `suit:wands`                     |
/// | `Arcana`      | `arcana:major`                   |
/// | `Position`    | `position:three_card:2`          |
/// | `Reading`     | `reading:<ulid>`                 |
/// | `Attribute`   | `attr:meaning`                   |
/// | `Combination` | `combo:card:the_fool>card:death` |
///
/// Combination order is significant: `combo:a>b` and `combo:b>a` are
/// different entities, always.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Card(String),
    Suit(Suit),
    Arcana(Arcana),
    Position { layout: String, slot: usize },
    Reading(ReadingId),
    /// Subject of a schema declaration (see the `schema` module).
    Attribute(String),
    /// Ordered tuple of non-combination entities.
    Combination(Vec<Entity>),
}

impl Entity {
    pub fn card(slug: impl Into<String>) -> Self {
        Entity::Card(slug.into())
    }

    pub fn combination(parts: impl IntoIterator<Item = Entity>) -> Self {
        Entity::Combination(parts.into_iter().collect())
    }

    /// Canonical id string, identical to the `Display` rendering.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Card(slug) => write!(f, "card:{slug}"),
            Entity::Suit(suit) => write!(f, "suit:{}", suit.as_str()),
            Entity::Arcana(class) => write!(f, "arcana:{}", class.as_str()),
            Entity::Position { layout, slot } => write!(f, "position:{layout}:{slot}"),
            Entity::Reading(id) => write!(f, "reading:{id}"),
            Entity::Attribute(name) => write!(f, "attr:{name}"),
            Entity::Combination(parts) => {
                write!(f, "combo:")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ">")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}

fn valid_fragment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl FromStr for Entity {
    type Err = QuerentError;

    fn from_str(s: &str) -> Result<Self> {
        let unknown = || QuerentError::UnknownEntity(s.to_string());
        let (kind, rest) = s.split_once(':').ok_or_else(unknown)?;
        match kind {
            "card" if valid_fragment(rest) => Ok(Entity::Card(rest.to_string())),
            "suit" => Ok(Entity::Suit(rest.parse()?)),
            "arcana" => Ok(Entity::Arcana(rest.parse()?)),
            "position" => {
                let (layout, slot) = rest.rsplit_once(':').ok_or_else(unknown)?;
                let slot = slot.parse::<usize>().map_err(|_| unknown())?;
                if !valid_fragment(layout) {
                    return Err(unknown());
                }
                Ok(Entity::Position {
                    layout: layout.to_string(),
                    slot,
                })
            }
            "reading" if valid_fragment(rest) => Ok(Entity::Reading(ReadingId(rest.to_string()))),
            "attr" if valid_fragment(rest) => Ok(Entity::Attribute(rest.to_string())),
            "combo" => {
                let parts: Vec<Entity> = rest
                    .split('>')
                    .map(Entity::from_str)
                    .collect::<Result<_>>()?;
                if parts.len() < 2 || parts.iter().any(|p| matches!(p, Entity::Combination(_))) {
                    return Err(unknown());
                }
                Ok(Entity::Combination(parts))
            }
            _ => Err(unknown()),
        }
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

const MAJOR_ARCANA: [&str; 22] = [
    "The Fool",
    "The Magician",
    "The High Priestess",
    "The Empress",
    "The Emperor",
    "The Hierophant",
    "The Lovers",
    "The Chariot",
    "Justice",
    "The Hermit",
    "The Wheel of Fortune",
    "Strength",
    "The Hanged Man",
    "Death",
    "Temperance",
    "The Devil",
    "The Tower",
    "The Star",
    "The Moon",
    "The Sun",
    "Judgement",
    "The World",
];

fn slugify(name: &str) -> String {
    name.to_ascii_lowercase().replace(' ', "_")
}

/// Pure lookup over the fixed domain objects. No mutation after `new`.
#[derive(Debug)]
pub struct Registry {
    cards: Vec<CardInfo>,
    by_slug: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    layouts: Vec<SpreadLayout>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let mut cards = Vec::with_capacity(78);
        for (number, name) in MAJOR_ARCANA.iter().enumerate() {
            cards.push(CardInfo {
                slug: slugify(name),
                name: (*name).to_string(),
                class: CardClass::Major {
                    number: number as u8,
                },
            });
        }
        for rank in Rank::ALL {
            for suit in Suit::ALL {
                let name = format!("{} of {}", rank.display_name(), suit.display_name());
                cards.push(CardInfo {
                    slug: slugify(&name),
                    name,
                    class: CardClass::Minor { suit, rank },
                });
            }
        }

        let by_slug = cards
            .iter()
            .enumerate()
            .map(|(i, c)| (c.slug.clone(), i))
            .collect();
        let by_name = cards
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.to_ascii_lowercase(), i))
            .collect();

        let layouts = vec![
            SpreadLayout {
                id: "three_card",
                slots: vec![
                    SlotDef {
                        name: "ANCHOR",
                        meaning: "The present situation, what grounds you.",
                    },
                    SlotDef {
                        name: "TIDE",
                        meaning: "The changing influences, what's in flux.",
                    },
                    SlotDef {
                        name: "HORIZON",
                        meaning: "The long-term outlook, what's ahead.",
                    },
                ],
            },
            SpreadLayout {
                id: "single",
                slots: vec![SlotDef {
                    name: "FOCUS",
                    meaning: "The single matter at hand.",
                }],
            },
        ];

        Self {
            cards,
            by_slug,
            by_name,
            layouts,
        }
    }

    pub fn cards(&self) -> impl Iterator<Item = &CardInfo> {
        self.cards.iter()
    }

    pub fn card(&self, slug: &str) -> Option<&CardInfo> {
        self.by_slug.get(slug).map(|&i| &self.cards[i])
    }

    /// Case-insensitive lookup by display name, e.g. `"The Fool"`.
    pub fn card_by_name(&self, name: &str) -> Option<&CardInfo> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(|&i| &self.cards[i])
    }

    pub fn layouts(&self) -> impl Iterator<Item = &SpreadLayout> {
        self.layouts.iter()
    }

    pub fn layout(&self, id: &str) -> Option<&SpreadLayout> {
        self.layouts.iter().find(|l| l.id == id)
    }

    /// Check that an entity id belongs to the closed universe.
    ///
    /// `reading_known` answers whether a reading id is already in the
    /// reading log (the log, not the registry, owns reading ids).
    /// Attribute entities are always accepted: the attribute namespace is
    /// open, and shapes are checked by the schema registry instead.
    pub fn validate(&self, entity: &Entity, reading_known: &dyn Fn(&ReadingId) -> bool) -> Result<()> {
        match entity {
            Entity::Card(slug) => {
                if self.card(slug).is_some() {
                    Ok(())
                } else {
                    Err(QuerentError::UnknownEntity(entity.id()))
                }
            }
            Entity::Suit(_) | Entity::Arcana(_) => Ok(()),
            Entity::Position { layout, slot } => match self.layout(layout) {
                Some(l) if *slot < l.slots.len() => Ok(()),
                _ => Err(QuerentError::UnknownEntity(entity.id())),
            },
            Entity::Reading(id) => {
                if reading_known(id) {
                    Ok(())
                } else {
                    Err(QuerentError::UnknownEntity(entity.id()))
                }
            }
            Entity::Attribute(name) => {
                if valid_fragment(name) {
                    Ok(())
                } else {
                    Err(QuerentError::UnknownEntity(entity.id()))
                }
            }
            Entity::Combination(parts) => {
                if parts.len() < 2 {
                    return Err(QuerentError::UnknownEntity(entity.id()));
                }
                for part in parts {
                    if matches!(part, Entity::Combination(_)) {
                        return Err(QuerentError::UnknownEntity(entity.id()));
                    }
                    self.validate(part, reading_known)?;
                }
                Ok(())
            }
        }
    }
}
