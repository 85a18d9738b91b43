use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CardFace {
    pub name: String,
    pub img: Option<String>,
}

/// Snapshot of a card as returned by the catalog.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Card {
    pub id: String,
    pub name: String,
    pub type_line: String,
    pub mana_cost: String,
    pub img: Option<String>,
    pub faces: Vec<CardFace>,
}

impl Card {
    /// Image references to show for the card, one per face for multi-faced cards.
    pub fn images(&self) -> Vec<String> {
        if self.faces.len() > 1 {
            self.faces.iter().filter_map(|f| f.img.clone()).collect()
        } else {
            self.img.iter().cloned().collect()
        }
    }
}

/// A card document stored under a binder's `cards` collection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CardEntry {
    pub name: String,
    #[serde(rename = "counters")]
    pub count: u32,
    #[serde(default)]
    pub image_uris: Vec<String>,
    #[serde(default)]
    pub type_line: String,
    #[serde(default)]
    pub mana_cost: String,
}

impl CardEntry {
    pub fn first_copy(card: &Card) -> Self {
        Self {
            name: card.name.clone(),
            count: 1,
            image_uris: card.images(),
            type_line: card.type_line.clone(),
            mana_cost: card.mana_cost.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinderKind {
    Deck,
    Collection,
}

impl BinderKind {
    /// Collection segment under `users/{uid}`.
    pub fn segment(self) -> &'static str {
        match self {
            BinderKind::Deck => "decks",
            BinderKind::Collection => "collections",
        }
    }

    /// Name given to a freshly created binder; `existing` is how many there already are.
    pub fn default_name(self, existing: usize) -> String {
        match self {
            BinderKind::Deck => format!("Deck {}", existing + 1),
            BinderKind::Collection => "Untitled Binder".to_owned(),
        }
    }

    pub fn export_suffix(self) -> &'static str {
        match self {
            BinderKind::Deck => "Decklist",
            BinderKind::Collection => "Collection",
        }
    }
}

/// A deck or a collection, without its cards.
#[derive(Debug, Clone, PartialEq)]
pub struct Binder {
    pub id: String,
    pub name: String,
    pub kind: BinderKind,
}

/// The binder document itself, `users/{uid}/{kind}/{id}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BinderDoc {
    pub name: String,
}
