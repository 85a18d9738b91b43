use crate::{
    catalog::CatalogClient, counts::Mutation, error::AppError, models::Card,
    reconciler::Reconciler,
};

/// Largest quantity accepted on one decklist line.
pub const MAX_QUANTITY: u32 = 999;

#[derive(Clone, Debug, PartialEq)]
pub struct CardErrorInsight {
    pub card_name: String,
    pub error: String,
}

impl CardErrorInsight {
    pub fn new(card_name: &str, error: &str) -> Self {
        Self {
            card_name: card_name.to_owned(),
            error: error.to_owned(),
        }
    }
}

/// Splits `"4x Lightning Bolt"` / `"4 Lightning Bolt"` lines into quantity and name.
pub fn parse_decklist(decklist: &str) -> (Vec<(u32, String)>, Vec<CardErrorInsight>) {
    let mut lines = Vec::new();
    let mut errors = Vec::new();

    for line in decklist.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (quantity, name) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let name = name.trim();
        let quantity = quantity
            .strip_suffix(['x', 'X'])
            .unwrap_or(quantity)
            .parse::<u32>()
            .unwrap_or(0);

        if name.is_empty() {
            errors.push(CardErrorInsight::new(line, "Missing card name"));
        } else if quantity == 0 {
            errors.push(CardErrorInsight::new(name, "Invalid quantity"));
        } else if quantity > MAX_QUANTITY {
            errors.push(CardErrorInsight::new(name, "Quantity too large"));
        } else {
            lines.push((quantity, name.to_owned()));
        }
    }

    (lines, errors)
}

/// Looks every parsed line up in the catalog.
pub async fn resolve_decklist(
    catalog: &CatalogClient,
    decklist: &str,
) -> (Vec<(u32, Card)>, Vec<CardErrorInsight>) {
    let (lines, mut errors) = parse_decklist(decklist);
    let mut cards = Vec::new();

    for (quantity, name) in lines {
        match catalog.named(&name).await {
            Ok(card) => cards.push((quantity, card)),
            Err(e) => errors.push(CardErrorInsight::new(&name, &e.to_string())),
        }
    }

    (cards, errors)
}

#[derive(Debug, Default, PartialEq)]
pub struct ImportReport {
    pub unique: usize,
    pub total: u32,
    pub errors: Vec<CardErrorInsight>,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Found {} unique cards ({} total cards).\n",
            self.unique, self.total
        );
        if !self.errors.is_empty() {
            out.push_str("Errors:\n");
        }
        for error in &self.errors {
            out.push_str(&format!("{}: {}\n", error.card_name, error.error));
        }
        out
    }
}

/// Adds every resolved line to the open binder, one mutation per line.
/// The returned mutations still have to be pushed.
pub fn stage(
    reconciler: &mut Reconciler,
    cards: Vec<(u32, Card)>,
    errors: Vec<CardErrorInsight>,
) -> Result<(ImportReport, Vec<(String, Mutation)>), AppError> {
    if reconciler.selected().is_none() {
        return Err(AppError::NoBinderSelected);
    }

    let mut report = ImportReport {
        unique: cards.len(),
        errors,
        ..Default::default()
    };
    let mut mutations = Vec::with_capacity(cards.len());
    for (quantity, card) in cards {
        mutations.push(reconciler.stage_add(&card, quantity)?);
        report.total = report.total.saturating_add(quantity);
    }

    Ok((report, mutations))
}
