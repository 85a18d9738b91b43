use std::fmt;

use bytes::Bytes;
use log::{debug, error};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT},
    StatusCode,
};
use serde::Deserialize;

use crate::{
    error::CatalogError,
    models::{Card, CardFace},
};

#[derive(Debug, Deserialize)]
struct SearchPage {
    data: Vec<RawCard>,
}

#[derive(Debug, Deserialize)]
struct ImageUris {
    normal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFace {
    name: String,
    #[serde(default)]
    mana_cost: Option<String>,
    #[serde(default)]
    image_uris: Option<ImageUris>,
}

#[derive(Debug, Deserialize)]
struct RawCard {
    id: String,
    name: String,
    #[serde(default)]
    type_line: Option<String>,
    #[serde(default)]
    mana_cost: Option<String>,
    #[serde(default)]
    image_uris: Option<ImageUris>,
    #[serde(default)]
    card_faces: Vec<RawFace>,
}

impl From<RawCard> for Card {
    fn from(raw: RawCard) -> Self {
        let mana_cost = raw.mana_cost.unwrap_or_else(|| {
            raw.card_faces
                .iter()
                .filter_map(|f| f.mana_cost.as_deref())
                .collect::<Vec<_>>()
                .join(" // ")
        });
        let faces = if raw.card_faces.len() > 1 {
            raw.card_faces
                .into_iter()
                .map(|f| CardFace {
                    name: f.name,
                    img: f.image_uris.and_then(|i| i.normal),
                })
                .collect()
        } else {
            Vec::new()
        };

        Card {
            id: raw.id,
            name: raw.name,
            type_line: raw.type_line.unwrap_or_default(),
            mana_cost,
            img: raw.image_uris.and_then(|i| i.normal),
            faces,
        }
    }
}

/// Read-only client for a Scryfall compatible card search API.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: String,
    limit: usize,
}

impl CatalogClient {
    pub fn new(base_url: &str, limit: usize) -> Self {
        CatalogClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            limit,
        }
    }

    fn setup_http_headers() -> HeaderMap {
        let mut header_map = HeaderMap::new();
        header_map.insert(ACCEPT, HeaderValue::from_static("application/json"));
        header_map.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("boardstate/", env!("CARGO_PKG_VERSION"))),
        );
        header_map
    }

    /// First page of cards matching `query`, ordered by name.
    pub async fn search(&self, query: &str) -> Result<Vec<Card>, CatalogError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .get(format!("{}/cards/search", self.base_url))
            .headers(Self::setup_http_headers())
            .query(&[("q", query), ("order", "name")])
            .send()
            .await?;

        // Scryfall answers 404 when nothing matched
        if response.status() == StatusCode::NOT_FOUND {
            debug!("No cards matched '{}'", query);
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status()));
        }

        let page: SearchPage = response.json().await?;
        Ok(page
            .data
            .into_iter()
            .take(self.limit)
            .map(Card::from)
            .collect())
    }

    /// Closest card to `name`.
    pub async fn named(&self, name: &str) -> Result<Card, CatalogError> {
        let response = self
            .client
            .get(format!("{}/cards/named", self.base_url))
            .headers(Self::setup_http_headers())
            .query(&[("fuzzy", name.trim())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status()));
        }
        Ok(response.json::<RawCard>().await?.into())
    }

    pub async fn download_image(&self, url: &str) -> Result<Bytes, CatalogError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status()));
        }
        Ok(response.bytes().await?)
    }
}

/// Search results paired with the query sequence, so late answers for old queries are dropped.
#[derive(Debug, Default)]
pub struct SearchState {
    pub query: String,
    pub results: Vec<Card>,
    latest: u64,
}

impl SearchState {
    /// Records a new query and returns the ticket its response must present.
    pub fn begin(&mut self, query: String) -> u64 {
        self.latest += 1;
        self.query = query;
        if self.query.trim().is_empty() {
            self.results.clear();
        }
        self.latest
    }

    /// Applies a response; returns false when it belongs to a superseded query.
    pub fn finish<E: fmt::Display>(&mut self, ticket: u64, result: Result<Vec<Card>, E>) -> bool {
        if ticket != self.latest {
            debug!("Dropping stale search response #{}", ticket);
            return false;
        }
        self.results = result.unwrap_or_else(|e| {
            error!("Error fetching search results: {}", e);
            Vec::new()
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn search_body() -> String {
        json!({
            "object": "list",
            "total_cards": 3,
            "has_more": false,
            "data": [
                {
                    "id": "e3285e6b",
                    "name": "Lightning Bolt",
                    "type_line": "Instant",
                    "mana_cost": "{R}",
                    "image_uris": { "small": "s.jpg", "normal": "bolt.jpg" }
                },
                {
                    "id": "11bf83bb",
                    "name": "Delver of Secrets // Insectile Aberration",
                    "type_line": "Creature — Human Wizard // Creature — Human Insect",
                    "card_faces": [
                        { "name": "Delver of Secrets", "mana_cost": "{U}",
                          "image_uris": { "normal": "front.jpg" } },
                        { "name": "Insectile Aberration", "mana_cost": "",
                          "image_uris": { "normal": "back.jpg" } }
                    ]
                },
                {
                    "id": "0000",
                    "name": "Island",
                    "type_line": "Basic Land — Island",
                    "mana_cost": ""
                }
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn search_parses_single_and_multi_faced_cards() {
        init_logger();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/cards/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "bolt".into()),
                Matcher::UrlEncoded("order".into(), "name".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(search_body())
            .create_async()
            .await;

        let client = CatalogClient::new(&server.url(), 10);
        let cards = client.search(" bolt ").await.unwrap();
        mock.assert_async().await;

        assert_eq!(cards.len(), 3);
        assert_eq!(cards[0].name, "Lightning Bolt");
        assert_eq!(cards[0].img.as_deref(), Some("bolt.jpg"));
        assert!(cards[0].faces.is_empty());

        let delver = &cards[1];
        assert_eq!(delver.faces.len(), 2);
        assert_eq!(delver.faces[1].img.as_deref(), Some("back.jpg"));
        assert_eq!(delver.mana_cost, "{U} // ");
        assert_eq!(delver.images(), vec!["front.jpg", "back.jpg"]);
    }

    #[tokio::test]
    async fn search_respects_limit() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/cards/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(search_body())
            .create_async()
            .await;

        let client = CatalogClient::new(&server.url(), 2);
        assert_eq!(client.search("a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn no_match_is_an_empty_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/cards/search")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"object":"error","code":"not_found"}"#)
            .create_async()
            .await;

        let client = CatalogClient::new(&server.url(), 10);
        assert!(client.search("zzzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_errors_are_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/cards/search")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let client = CatalogClient::new(&server.url(), 10);
        let result = client.search("bolt").await;
        assert!(matches!(result, Err(CatalogError::Status(s)) if s.as_u16() == 503));
    }

    #[tokio::test]
    async fn blank_query_does_not_hit_the_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = CatalogClient::new(&server.url(), 10);
        assert!(client.search("   ").await.unwrap().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn named_uses_fuzzy_lookup() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/cards/named")
            .match_query(Matcher::UrlEncoded("fuzzy".into(), "lightnin bolt".into()))
            .with_status(200)
            .with_body(
                json!({ "id": "e3285e6b", "name": "Lightning Bolt", "type_line": "Instant",
                        "mana_cost": "{R}" })
                .to_string(),
            )
            .create_async()
            .await;

        let client = CatalogClient::new(&format!("{}/", server.url()), 10);
        let card = client.named("lightnin bolt").await.unwrap();
        assert_eq!(card.id, "e3285e6b");
        assert_eq!(card.type_line, "Instant");
    }

    fn bolt() -> Card {
        Card {
            id: "bolt".to_owned(),
            name: "Lightning Bolt".to_owned(),
            type_line: "Instant".to_owned(),
            mana_cost: "{R}".to_owned(),
            img: None,
            faces: Vec::new(),
        }
    }

    #[test]
    fn stale_responses_do_not_overwrite_newer_results() {
        let mut state = SearchState::default();
        let first = state.begin("light".to_owned());
        let second = state.begin("lightning".to_owned());

        assert!(state.finish::<CatalogError>(second, Ok(vec![bolt()])));
        assert!(!state.finish::<CatalogError>(first, Ok(Vec::new())));
        assert_eq!(state.results, vec![bolt()]);
    }

    #[test]
    fn failures_clear_results() {
        let mut state = SearchState::default();
        let ticket = state.begin("bolt".to_owned());
        state.finish::<CatalogError>(ticket, Ok(vec![bolt()]));

        let ticket = state.begin("bolt2".to_owned());
        state.finish(ticket, Err(CatalogError::Status(StatusCode::BAD_GATEWAY)));
        assert!(state.results.is_empty());
    }

    #[test]
    fn blank_query_clears_immediately() {
        let mut state = SearchState::default();
        let ticket = state.begin("bolt".to_owned());
        state.finish::<CatalogError>(ticket, Ok(vec![bolt()]));

        state.begin("  ".to_owned());
        assert!(state.results.is_empty());
    }
}
