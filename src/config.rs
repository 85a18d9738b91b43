use std::{env, path::PathBuf};

use log::{info, warn};

pub const SCRYFALL_API_URL: &str = "https://api.scryfall.com";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub catalog_url: String,
    pub search_limit: usize,
    pub owner: String,
    /// `None` keeps the store in memory only.
    pub data_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_url: SCRYFALL_API_URL.to_owned(),
            search_limit: 10,
            owner: "local".to_owned(),
            data_file: Some(PathBuf::from("boardstate.json")),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.update_from(|key| env::var(key).ok());
        config
    }

    fn update_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("CATALOG_URL").filter(|u| !u.trim().is_empty()) {
            self.catalog_url = url;
        }
        if let Some(limit) = var("SEARCH_LIMIT") {
            match limit.parse::<usize>() {
                Ok(limit) if limit > 0 => self.search_limit = limit,
                _ => warn!("Invalid SEARCH_LIMIT '{}', using {}", limit, self.search_limit),
            }
        }
        if let Some(owner) = var("BOARDSTATE_USER") {
            if owner.is_empty() || owner.contains('/') {
                warn!("Invalid BOARDSTATE_USER '{}', using '{}'", owner, self.owner);
            } else {
                self.owner = owner;
            }
        }
        if let Some(data) = var("BOARDSTATE_DATA") {
            self.data_file = (!data.trim().is_empty()).then(|| PathBuf::from(data));
        }
        info!(
            "Catalog at {}, store {}",
            self.catalog_url,
            self.data_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in memory".to_owned())
        );
    }
}
