//! PJUD jurisprudence scraper (juris.pjud.cl).

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::json;

use super::{field, normalize_whitespace, RawItem, ScrapeError, SourceScraper};

const SOURCE: &str = "pjud";
const SEARCH_URL: &str = "https://juris.pjud.cl/busqueda";

/// Jurisprudence search against the judiciary's public search page.
pub struct PjudScraper {
    client: reqwest::Client,
}

impl PjudScraper {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn parse_results(html: &str, max_results: usize) -> Result<Vec<RawItem>, ScrapeError> {
        let document = Html::parse_document(html);

        let row_selector = Selector::parse(".resultado-busqueda, .card-sentencia").map_err(|e| {
            ScrapeError::StructureChanged {
                source_name: SOURCE.to_string(),
                detail: format!("bad selector: {:?}", e),
            }
        })?;

        let caratulado_sel = Selector::parse(".caratulado, .titulo").ok();
        let rol_sel = Selector::parse(".rol").ok();
        let fecha_sel = Selector::parse(".fecha").ok();
        let resumen_sel = Selector::parse(".resumen, .extracto").ok();

        let mut items = Vec::new();
        for row in document.select(&row_selector).take(max_results) {
            let text_of = |sel: &Option<Selector>| -> String {
                sel.as_ref()
                    .and_then(|s| row.select(s).next())
                    .map(|el| normalize_whitespace(&el.text().collect::<String>()))
                    .unwrap_or_default()
            };

            let caratulado = text_of(&caratulado_sel);
            if caratulado.is_empty() {
                continue;
            }

            items.push(
                json!({
                    "caratulado": caratulado,
                    "rol": text_of(&rol_sel),
                    "fecha": text_of(&fecha_sel),
                    "resumen": text_of(&resumen_sel),
                })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            );
        }

        if items.is_empty() && document.select(&row_selector).next().is_some() {
            return Err(ScrapeError::StructureChanged {
                source_name: SOURCE.to_string(),
                detail: "result rows present but fields missing".to_string(),
            });
        }

        Ok(items)
    }
}

#[async_trait]
impl SourceScraper for PjudScraper {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawItem>, ScrapeError> {
        tracing::debug!("Searching PJUD: {}", query);

        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[("texto", query)])
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

/// Document text for a PJUD sentence.
pub fn render(item: &RawItem) -> String {
    format!(
        "SENTENCIA: {} ROL: {} FECHA: {} RESUMEN: {}",
        field(item, "caratulado"),
        field(item, "rol"),
        field(item, "fecha"),
        field(item, "resumen"),
    )
}

// ============================================================================
// Tests
// ============================================================================
