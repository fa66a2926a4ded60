//! SciELO Chile article scraper (scielo.conicyt.cl).

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::json;

use super::{field, normalize_whitespace, RawItem, ScrapeError, SourceScraper};

const SOURCE: &str = "scielo";
const SEARCH_URL: &str = "https://scielo.conicyt.cl/scielo.php";

/// Academic article search against the SciELO result listing.
pub struct ScieloScraper {
    client: reqwest::Client,
}

impl ScieloScraper {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn parse_results(html: &str, max_results: usize) -> Result<Vec<RawItem>, ScrapeError> {
        let document = Html::parse_document(html);

        let row_selector = Selector::parse(".results .item, .record").map_err(|e| {
            ScrapeError::StructureChanged {
                source_name: SOURCE.to_string(),
                detail: format!("bad selector: {:?}", e),
            }
        })?;

        let titulo_sel = Selector::parse(".title, .titulo").ok();
        let revista_sel = Selector::parse(".source, .revista").ok();
        let autor_sel = Selector::parse(".author, .autor").ok();

        let mut items = Vec::new();
        for row in document.select(&row_selector).take(max_results) {
            let text_of = |sel: &Option<Selector>| -> String {
                sel.as_ref()
                    .and_then(|s| row.select(s).next())
                    .map(|el| normalize_whitespace(&el.text().collect::<String>()))
                    .unwrap_or_default()
            };

            let titulo = text_of(&titulo_sel);
            if titulo.is_empty() {
                continue;
            }

            let autores: Vec<String> = autor_sel
                .as_ref()
                .map(|s| {
                    row.select(s)
                        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
                        .filter(|a| !a.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            items.push(
                json!({
                    "titulo": titulo,
                    "revista": text_of(&revista_sel),
                    "autores": autores,
                })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            );
        }

        Ok(items)
    }
}

#[async_trait]
impl SourceScraper for ScieloScraper {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawItem>, ScrapeError> {
        tracing::debug!("Searching SciELO: {}", query);

        let count = max_results.to_string();
        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("script", "sci_search"),
                ("lng", "es"),
                ("count", count.as_str()),
                ("from", "0"),
                ("output", "html"),
                ("q", query),
            ])
            .send()
            .await
            .map_err(|cause| ScrapeError::Network {
                source: SOURCE.to_string(),
                cause,
            })?;

        if response.status().as_u16() == 429 {
            return Err(ScrapeError::RateLimited {
                source_name: SOURCE.to_string(),
            });
        }

        let html = response
            .error_for_status()
            .map_err(|cause| ScrapeError::Network {
                source: SOURCE.to_string(),
                cause,
            })?
            .text()
            .await
            .map_err(|cause| ScrapeError::Network {
                source: SOURCE.to_string(),
                cause,
            })?;

        Self::parse_results(&html, max_results)
    }
}

/// Document text for a SciELO article. Authors arrive as a list and are
/// joined for display.
pub fn render(item: &RawItem) -> String {
    let autores = item
        .get("autores")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|a| a.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();

    format!(
        "ARTICULO: {} REVISTA: {} AUTORES: {}",
        field(item, "titulo"),
        field(item, "revista"),
        autores,
    )
}

// ============================================================================
// Tests
// ============================================================================
