//! BCN Ley Chile legislation scraper (leychile.cl).

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::json;

use super::{field, normalize_whitespace, RawItem, ScrapeError, SourceScraper};

const SOURCE: &str = "bcn";
const SEARCH_URL: &str = "https://www.leychile.cl/Consulta/obtxml";
const NORMA_URL: &str = "https://www.leychile.cl/Navegar";

/// Legislation search against the BCN public XML endpoint.
pub struct BcnScraper {
    client: reqwest::Client,
}

impl BcnScraper {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    // The endpoint answers loosely-formed XML; the HTML parser copes with it
    // and lowercases element names.
    fn parse_results(body: &str, max_results: usize) -> Result<Vec<RawItem>, ScrapeError> {
        let document = Html::parse_document(body);

        let norma_selector =
            Selector::parse("norma").map_err(|e| ScrapeError::StructureChanged {
                source_name: SOURCE.to_string(),
                detail: format!("bad selector: {:?}", e),
            })?;

        let tipo_sel = Selector::parse("tiponorma, tipo").ok();
        let numero_sel = Selector::parse("numero").ok();
        let titulo_sel = Selector::parse("titulonorma, titulo").ok();
        let id_sel = Selector::parse("idnorma").ok();

        let mut items = Vec::new();
        for norma in document.select(&norma_selector).take(max_results) {
            let text_of = |sel: &Option<Selector>| -> String {
                sel.as_ref()
                    .and_then(|s| norma.select(s).next())
                    .map(|el| normalize_whitespace(&el.text().collect::<String>()))
                    .unwrap_or_default()
            };

            let titulo = text_of(&titulo_sel);
            if titulo.is_empty() {
                continue;
            }

            let id_norma = text_of(&id_sel);
            let url = if id_norma.is_empty() {
                String::new()
            } else {
                match url::Url::parse_with_params(NORMA_URL, [("idNorma", id_norma.as_str())]) {
                    Ok(u) => u.to_string(),
                    Err(_) => String::new(),
                }
            };

            items.push(
                json!({
                    "tipo": text_of(&tipo_sel),
                    "numero": text_of(&numero_sel),
                    "titulo": titulo,
                    "url": url,
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
impl SourceScraper for BcnScraper {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawItem>, ScrapeError> {
        tracing::debug!("Searching BCN: {}", query);

        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[("opt", "7"), ("string", query)])
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

        let body = response
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

        Self::parse_results(&body, max_results)
    }
}

/// Document text for a BCN norm.
pub fn render(item: &RawItem) -> String {
    format!(
        "NORMA: {} {} TITULO: {} URL: {}",
        field(item, "tipo"),
        field(item, "numero"),
        field(item, "titulo"),
        field(item, "url"),
    )
}

// ============================================================================
// Tests
// ============================================================================
