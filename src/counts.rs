use std::collections::BTreeMap;

use crate::models::{Card, CardEntry};

/// Store write produced by a local count change.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Add `by` copies; `seed` is written when the card is not stored yet.
    Increment {
        card_id: String,
        seed: CardEntry,
        by: u32,
    },
    /// Remove one copy, deleting the record at zero.
    Decrement { card_id: String },
}

impl Mutation {
    pub fn card_id(&self) -> &str {
        match self {
            Mutation::Increment { card_id, .. } | Mutation::Decrement { card_id } => card_id,
        }
    }
}

/// Per-card counters of the open binder. Counts never sit at zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardCounts {
    entries: BTreeMap<String, CardEntry>,
}

impl CardCounts {
    pub fn from_entries(entries: impl IntoIterator<Item = (String, CardEntry)>) -> Self {
        Self {
            entries: entries.into_iter().filter(|(_, e)| e.count > 0).collect(),
        }
    }

    /// Adds `by` copies at once. Zero is treated as one.
    pub fn increment(&mut self, card: &Card, by: u32) -> Mutation {
        let by = by.max(1);
        let mut seed = CardEntry::first_copy(card);
        seed.count = by;
        match self.entries.get_mut(&card.id) {
            Some(entry) => entry.count = entry.count.saturating_add(by),
            None => {
                self.entries.insert(card.id.clone(), seed.clone());
            }
        }
        Mutation::Increment {
            card_id: card.id.clone(),
            seed,
            by,
        }
    }

    /// `None` when the card is not in the binder.
    pub fn decrement(&mut self, card_id: &str) -> Option<Mutation> {
        let entry = self.entries.get_mut(card_id)?;
        if entry.count > 1 {
            entry.count -= 1;
        } else {
            self.entries.remove(card_id);
        }
        Some(Mutation::Decrement {
            card_id: card_id.to_owned(),
        })
    }

    /// Replaces one entry with the stored version; `None` drops it.
    pub fn put(&mut self, card_id: &str, entry: Option<CardEntry>) {
        match entry.filter(|e| e.count > 0) {
            Some(entry) => {
                self.entries.insert(card_id.to_owned(), entry);
            }
            None => {
                self.entries.remove(card_id);
            }
        }
    }

    pub fn count(&self, card_id: &str) -> u32 {
        self.entries.get(card_id).map(|e| e.count).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CardEntry)> {
        self.entries.iter()
    }

    pub fn total(&self) -> u32 {
        self.entries
            .values()
            .fold(0u32, |total, e| total.saturating_add(e.count))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str, name: &str) -> Card {
        Card {
            id: id.to_owned(),
            name: name.to_owned(),
            type_line: "Instant".to_owned(),
            mana_cost: "{R}".to_owned(),
            img: None,
            faces: Vec::new(),
        }
    }

    #[test]
    fn first_add_inserts_with_count_one() {
        let mut counts = CardCounts::default();
        let mutation = counts.increment(&card("bolt", "Lightning Bolt"), 1);

        assert_eq!(counts.count("bolt"), 1);
        assert_eq!(mutation.card_id(), "bolt");
        assert!(matches!(mutation, Mutation::Increment { seed, by: 1, .. } if seed.count == 1));
    }

    #[test]
    fn bulk_add_is_one_mutation() {
        let mut counts = CardCounts::default();
        let bolt = card("bolt", "Lightning Bolt");
        counts.increment(&bolt, 1);

        let mutation = counts.increment(&bolt, 3);
        assert_eq!(counts.count("bolt"), 4);
        assert!(matches!(mutation, Mutation::Increment { seed, by: 3, .. } if seed.count == 3));

        counts.increment(&bolt, u32::MAX);
        assert_eq!(counts.count("bolt"), u32::MAX);
    }

    #[test]
    fn final_count_is_adds_minus_removes() {
        // (adds, removes) sequences interleaved in different orders
        let sequences: [&[bool]; 5] = [
            &[true, true, true, false],
            &[true, false, true, false, true],
            &[true, true, false, false, false, true],
            &[false, true, true, true, true, false],
            &[true; 9],
        ];

        for sequence in sequences {
            let mut counts = CardCounts::default();
            let bolt = card("bolt", "Lightning Bolt");
            let mut expected: u32 = 0;
            for &add in sequence {
                if add {
                    counts.increment(&bolt, 1);
                    expected += 1;
                } else {
                    let mutation = counts.decrement("bolt");
                    assert_eq!(mutation.is_some(), expected > 0);
                    expected = expected.saturating_sub(1);
                }
                assert_eq!(counts.count("bolt"), expected);
                assert_eq!(counts.iter().any(|(id, _)| id == "bolt"), expected > 0);
            }
        }
    }

    #[test]
    fn removing_last_copy_drops_the_entry() {
        let mut counts = CardCounts::default();
        counts.increment(&card("bolt", "Lightning Bolt"), 1);
        counts.increment(&card("island", "Island"), 1);

        counts.decrement("bolt");
        assert_eq!(counts.count("bolt"), 0);
        assert_eq!(counts.iter().count(), 1);
        assert!(counts.iter().all(|(_, e)| e.count > 0));
    }

    #[test]
    fn decrementing_absent_card_is_a_no_op() {
        let mut counts = CardCounts::default();
        assert!(counts.decrement("ghost").is_none());
        assert_eq!(counts.iter().count(), 0);
    }

    #[test]
    fn zero_count_entries_are_never_kept() {
        let mut zero = CardEntry::first_copy(&card("bolt", "Lightning Bolt"));
        zero.count = 0;
        let counts = CardCounts::from_entries([("bolt".to_owned(), zero.clone())]);
        assert_eq!(counts.iter().count(), 0);

        let mut counts = CardCounts::default();
        counts.increment(&card("bolt", "Lightning Bolt"), 1);
        counts.put("bolt", Some(zero));
        assert_eq!(counts.iter().count(), 0);
    }

    #[test]
    fn total_sums_all_copies() {
        let mut counts = CardCounts::default();
        for _ in 0..4 {
            counts.increment(&card("bolt", "Lightning Bolt"), 1);
        }
        counts.increment(&card("island", "Island"), 1);
        assert_eq!(counts.total(), 5);
    }
}
