//! lexrag CLI command definitions and implementations.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Settings;
use crate::embedding::{has_api_key, GeminiEmbedding};
use crate::knowledge::{
    ExternalCache, KnowledgeBase, LanceVectorStore, LocalRetriever, MetaValue, Metadata,
    LOCAL_COLLECTIONS,
};
use crate::scraper::SourceRegistry;
use crate::search::{ExternalRetriever, SearchOrchestrator, WeightProvider};
use crate::telemetry::{
    ranked_sources, spawn_worker, TelemetryStore, TrainMode, TrainStatus, WeightTrainer,
    DEFAULT_QUEUE_CAPACITY,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "lexrag")]
#[command(version, about = "Motor de recuperación legal chileno", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consultar las fuentes legales
    Ask {
        /// Pregunta o consulta
        query: String,

        /// Número de resultados
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Solo colecciones locales, sin fuentes externas
        #[arg(long)]
        local_only: bool,

        /// Área legal (civil, penal, laboral, ...)
        #[arg(short, long)]
        area: Option<String>,
    },

    /// Registrar feedback sobre una respuesta
    Feedback {
        /// Identificador de correlación de la respuesta
        correlation_id: String,

        /// La respuesta fue útil
        #[arg(long, conflicts_with = "not_helpful")]
        helpful: bool,

        /// La respuesta no fue útil
        #[arg(long)]
        not_helpful: bool,

        /// Comentario opcional
        #[arg(short, long)]
        comment: Option<String>,
    },

    /// Reentrenar los pesos de las fuentes a partir del feedback
    Train {
        /// Usar regresión logística en vez de conteo de votos
        #[arg(long)]
        model: bool,
    },

    /// Agregar un documento a una colección local
    Ingest {
        /// Colección destino
        collection: String,

        /// Texto del documento
        text: String,
    },

    /// Estado de las colecciones y la telemetría
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ask {
            query,
            limit,
            local_only,
            area,
        } => cmd_ask(&query, limit, local_only, area.as_deref()).await,
        Commands::Feedback {
            correlation_id,
            helpful,
            not_helpful,
            comment,
        } => cmd_feedback(&correlation_id, helpful, not_helpful, comment.as_deref()),
        Commands::Train { model } => cmd_train(model),
        Commands::Ingest { collection, text } => cmd_ingest(&collection, &text).await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "No hay clave de API configurada.\n\n\
             Configuración:\n  \
             export GEMINI_API_KEY=su-clave\n  \
             o\n  \
             export GOOGLE_AI_API_KEY=su-clave"
        );
    }
    Ok(())
}

async fn open_knowledge_base(settings: &Settings) -> Result<Arc<KnowledgeBase>> {
    let store = LanceVectorStore::open(&settings.data_dir.join("lancedb"))
        .await
        .context("no se pudo abrir el almacén vectorial")?;
    let embedder = GeminiEmbedding::from_env().context("no se pudo crear el embebedor")?;
    Ok(Arc::new(KnowledgeBase::new(
        Arc::new(store),
        Arc::new(embedder),
    )))
}

async fn cmd_ask(query: &str, limit: usize, local_only: bool, area: Option<&str>) -> Result<()> {
    require_api_key()?;

    let settings = Settings::from_env();
    let kb = open_knowledge_base(&settings).await?;

    let local = Arc::new(LocalRetriever::new(kb.clone()));
    let registry =
        Arc::new(SourceRegistry::with_default_sources().context("no se pudo crear las fuentes")?);
    let cache = Arc::new(ExternalCache::new(kb.clone(), settings.cache_ttl_seconds()));
    let external = Arc::new(ExternalRetriever::new(cache, registry));

    let telemetry = Arc::new(
        TelemetryStore::open_default(&settings.data_dir, settings.telemetry_enabled)
            .context("no se pudo abrir la base de telemetría")?,
    );
    let (sender, worker) = spawn_worker(telemetry.clone(), DEFAULT_QUEUE_CAPACITY);

    let weights: Arc<dyn WeightProvider> = telemetry.clone();
    let orchestrator = SearchOrchestrator::new(local, external, weights)
        .with_branch_timeout(settings.branch_timeout)
        .with_telemetry(sender);

    println!("[*] Buscando: {}", query);
    let results = orchestrator
        .execute(query, limit, !local_only, area)
        .await;

    if results.is_empty() {
        println!("[!] Sin resultados.");
        drop(orchestrator);
        let _ = worker.await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!();
        println!(
            "--- {} | {} | puntaje {:.3} ---",
            i + 1,
            result.source_type,
            result.adjusted_score
        );
        println!("{}", snippet(&result.document, 400));
    }

    let correlation_id = Uuid::new_v4().to_string();
    let answer = results
        .iter()
        .map(|r| r.document.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n");
    telemetry
        .log_event(&correlation_id, query, &answer, &ranked_sources(&results))
        .context("no se pudo registrar la consulta")?;

    println!();
    println!("[OK] Consulta registrada (ID: {})", correlation_id);
    println!("     Feedback: lexrag feedback {} --helpful", correlation_id);

    // Dropping the orchestrator releases the sender; the worker drains and
    // exits before the process does.
    drop(orchestrator);
    let _ = worker.await;
    Ok(())
}

fn cmd_feedback(
    correlation_id: &str,
    helpful: bool,
    not_helpful: bool,
    comment: Option<&str>,
) -> Result<()> {
    if helpful == not_helpful {
        bail!("Debe indicar --helpful o --not-helpful");
    }

    let settings = Settings::from_env();
    let telemetry = TelemetryStore::open_default(&settings.data_dir, settings.telemetry_enabled)
        .context("no se pudo abrir la base de telemetría")?;

    telemetry
        .log_feedback(correlation_id, helpful, comment)
        .with_context(|| format!("no se pudo registrar feedback para {}", correlation_id))?;

    println!("[OK] Feedback registrado para {}", correlation_id);
    Ok(())
}

fn cmd_train(model: bool) -> Result<()> {
    let settings = Settings::from_env();
    let telemetry = Arc::new(
        TelemetryStore::open_default(&settings.data_dir, settings.telemetry_enabled)
            .context("no se pudo abrir la base de telemetría")?,
    );

    let mode = if model {
        TrainMode::Model
    } else {
        TrainMode::Heuristic
    };

    let trainer = WeightTrainer::new(telemetry);
    match trainer.train(mode)? {
        TrainStatus::Updated { weights } => {
            println!("[OK] Pesos actualizados:");
            let mut sorted: Vec<_> = weights.into_iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            for (source, weight) in sorted {
                println!("     {:20} {:.3}", source, weight);
            }
        }
        TrainStatus::SkippedNoFeedback => {
            println!("[!] Sin feedback registrado; pesos sin cambios.");
        }
        TrainStatus::SkippedSingleClass => {
            println!("[!] El modo modelo necesita feedback positivo y negativo.");
        }
    }
    Ok(())
}

async fn cmd_ingest(collection: &str, text: &str) -> Result<()> {
    if !LOCAL_COLLECTIONS.contains(&collection) {
        bail!(
            "Colección desconocida: {}\nColecciones válidas: {}",
            collection,
            LOCAL_COLLECTIONS.join(", ")
        );
    }

    require_api_key()?;

    let settings = Settings::from_env();
    let kb = open_knowledge_base(&settings).await?;

    let id = format!("doc_{}", Uuid::new_v4());
    let mut metadata = Metadata::new();
    metadata.insert(
        "source_type".to_string(),
        MetaValue::Text(collection.to_string()),
    );

    println!("[*] Generando embedding y guardando...");
    kb.add_documents(
        collection,
        vec![id.clone()],
        vec![text.to_string()],
        vec![metadata],
    )
    .await
    .context("no se pudo agregar el documento")?;

    println!("[OK] Documento agregado a {} (ID: {})", collection, id);
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let settings = Settings::from_env();

    println!("=== lexrag ===");
    println!("Directorio de datos: {:?}", settings.data_dir);
    println!("TTL de caché externa: {} días", settings.external_cache_ttl_days);
    println!(
        "Telemetría: {}",
        if settings.telemetry_enabled {
            "activada"
        } else {
            "desactivada"
        }
    );
    println!();

    if has_api_key() {
        let kb = open_knowledge_base(&settings).await?;
        println!("Colecciones locales:");
        for collection in LOCAL_COLLECTIONS {
            let count = kb.collection_count(collection).await.unwrap_or(0);
            println!("  {:20} {} documentos", collection, count);
        }
    } else {
        println!("[!] Sin clave de API; no se pueden consultar las colecciones.");
    }

    let telemetry = TelemetryStore::open_default(&settings.data_dir, settings.telemetry_enabled)
        .context("no se pudo abrir la base de telemetría")?;
    let (events, feedback) = telemetry.counts()?;
    println!();
    println!("Telemetría:");
    println!("  eventos:  {}", events);
    println!("  feedback: {}", feedback);

    let weights = telemetry.get_source_weights(None)?;
    if !weights.is_empty() {
        println!();
        println!("Pesos de fuentes:");
        let mut sorted: Vec<_> = weights.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        for (source, weight) in sorted {
            println!("  {:20} {:.3}", source, weight);
        }
    }

    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_ask() {
        let cli = Cli::parse_from(["lexrag", "ask", "despido injustificado", "--limit", "3"]);
        match cli.command {
            Commands::Ask { query, limit, local_only, .. } => {
                assert_eq!(query, "despido injustificado");
                assert_eq!(limit, 3);
                assert!(!local_only);
            }
            _ => panic!("expected Ask"),
        }
    }

    #[test]
    fn test_cli_rejects_conflicting_feedback_flags() {
        let parsed = Cli::try_parse_from([
            "lexrag",
            "feedback",
            "abc",
            "--helpful",
            "--not-helpful",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        assert_eq!(snippet("corto", 10), "corto");
        let long = "á".repeat(20);
        let cut = snippet(&long, 10);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 13);
    }
}
