//! `casetwin-pipeline`: builds the historical case dataset, indexes it, and
//! runs the differential-diagnosis graph over single cases.
//!
//! ```bash
//! casetwin-pipeline build-cxr --source medical_datasets/whole_multicare_dataset --output cxr_full_dataset
//! casetwin-pipeline extract-schema --input cxr_full_dataset/dataset.json --output cxr_schema_dataset
//! casetwin-pipeline transform --enriched cxr_schema_dataset/dataset.json --source cxr_full_dataset/dataset.json --output cxr_schema_dataset
//! casetwin-pipeline cluster --dir cxr_schema_dataset
//! casetwin-pipeline index --dataset cxr_schema_dataset/dataset_cxr_primary.json --images cxr_full_dataset
//! casetwin-pipeline diagnose <case_id> --ask "Why not heart failure?"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use casetwin_api::config::{optional_env, require_env, Config};
use casetwin_api::diagnosis::{CaseChat, DiagnosisGraph};
use casetwin_api::llm_client::{GeminiClient, MedGemmaClient, MedSiglipEmbedder, MiniLmEmbedder};
use casetwin_api::pipeline::cluster::{cluster_cases, ClusteringSidecar};
use casetwin_api::pipeline::cxr_dataset::build_cxr_dataset;
use casetwin_api::pipeline::index::index_profiles;
use casetwin_api::pipeline::schema::extract_schema;
use casetwin_api::pipeline::transform::transform;
use casetwin_api::search::{CaseIndex, QdrantClient};

/// MedSigLIP image embedding width.
const IMAGE_EMBEDDING_DIM: usize = 1152;

#[derive(Parser, Debug)]
#[command(name = "casetwin-pipeline", version, about = "CaseTwin dataset pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect every article with a chest X-ray, copying all of its images.
    BuildCxr {
        #[arg(long, value_name = "DIR", default_value = "medical_datasets/whole_multicare_dataset")]
        source: PathBuf,
        #[arg(long, value_name = "DIR", default_value = "cxr_full_dataset")]
        output: PathBuf,
    },
    /// Extract structured clinical fields with Gemini.
    ExtractSchema {
        #[arg(long, value_name = "FILE", default_value = "cxr_full_dataset/dataset.json")]
        input: PathBuf,
        #[arg(long, value_name = "DIR", default_value = "cxr_schema_dataset")]
        output: PathBuf,
    },
    /// Write the per-case and CXR-primary dataset variants.
    Transform {
        #[arg(long, value_name = "FILE", default_value = "cxr_schema_dataset/dataset.json")]
        enriched: PathBuf,
        #[arg(long, value_name = "FILE", default_value = "cxr_full_dataset/dataset.json")]
        source: PathBuf,
        #[arg(long, value_name = "DIR", default_value = "cxr_schema_dataset")]
        output: PathBuf,
    },
    /// Embed and cluster cases; backfill embeddings.
    Cluster {
        #[arg(long, value_name = "DIR", default_value = "cxr_schema_dataset")]
        dir: PathBuf,
    },
    /// Embed CXR-primary images and upsert them into the vector collection.
    Index {
        #[arg(long, value_name = "FILE", default_value = "cxr_schema_dataset/dataset_cxr_primary.json")]
        dataset: PathBuf,
        /// Directory the profiles' `storage_path` values are relative to.
        #[arg(long, value_name = "DIR", default_value = "cxr_full_dataset")]
        images: PathBuf,
    },
    /// Run the differential-diagnosis graph on one case and print the report.
    Diagnose {
        case_id: String,
        #[arg(long, value_name = "FILE", default_value = "cxr_schema_dataset/dataset_per_case.json")]
        dataset: PathBuf,
        #[arg(long, value_name = "DIR", default_value = "cxr_full_dataset")]
        images: PathBuf,
        /// Follow-up questions, asked in order.
        #[arg(long, value_name = "QUESTION")]
        ask: Vec<String>,
        /// Attach the case images to follow-up questions.
        #[arg(long, default_value_t = false)]
        with_images: bool,
    },
    /// Print the first stored payload of the vector collection.
    Scroll,
}

fn qdrant_from_env() -> Result<QdrantClient> {
    let defaults = Config::default();
    Ok(QdrantClient::new(
        &require_env("QDRANT_URL")?,
        optional_env("QDRANT_COLLECTION").unwrap_or(defaults.qdrant_collection),
        optional_env("QDRANT_API_KEY"),
    )?)
}

fn medgemma_from_env() -> Result<MedGemmaClient> {
    Ok(MedGemmaClient::new(
        &require_env("MEDGEMMA_URL")?,
        optional_env("MEDGEMMA_MODEL").unwrap_or(Config::default().medgemma_model),
        require_env("HF_TOKEN")?,
    )?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("casetwin_api=info,casetwin_pipeline=info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::BuildCxr { source, output } => {
            let summary = tokio::task::spawn_blocking(move || build_cxr_dataset(&source, &output))
                .await??;
            println!(
                "Articles: {}\nImages copied: {}\nImages missing: {}",
                summary.articles, summary.copied, summary.missing
            );
        }
        Command::ExtractSchema { input, output } => {
            let gemini = GeminiClient::new(
                require_env("GEMINI_API_KEY")?,
                optional_env("GEMINI_MODEL").unwrap_or(Config::default().gemini_model),
            )?;
            let summary = extract_schema(&gemini, &input, &output).await?;
            println!(
                "Records: {} ({} from cache, {} errors)",
                summary.records, summary.cached, summary.errors
            );
        }
        Command::Transform { enriched, source, output } => {
            let summary = transform(&enriched, &source, &output)?;
            println!(
                "Cases: {} (missing {})\nCXR-primary profiles: {}",
                summary.cases, summary.missing, summary.profiles
            );
        }
        Command::Cluster { dir } => {
            let embedder = MiniLmEmbedder::new(
                optional_env("TEXT_EMBEDDING_URL").unwrap_or(Config::default().text_embedding_url),
                require_env("HF_TOKEN")?,
            )?;
            let sidecar = ClusteringSidecar::new(&require_env("CLUSTERING_URL")?)?;
            let clusters = cluster_cases(&embedder, &sidecar, &dir).await?;
            println!("Clusters: {}", clusters.len());
        }
        Command::Index { dataset, images } => {
            let embedder = MedSiglipEmbedder::new(require_env("MEDSIGLIP_URL")?, require_env("HF_TOKEN")?)?;
            let qdrant = qdrant_from_env()?;
            qdrant.ensure_collection(IMAGE_EMBEDDING_DIM).await?;
            let summary = index_profiles(&embedder, &qdrant, &dataset, &images).await?;
            println!("Indexed: {}\nSkipped: {}", summary.indexed, summary.skipped);
        }
        Command::Diagnose {
            case_id,
            dataset,
            images,
            ask,
            with_images,
        } => {
            let llm = Arc::new(medgemma_from_env()?);
            let graph = DiagnosisGraph::new(llm.clone(), dataset, images);
            let state = graph.run(&case_id).await?;
            println!("{}", state.final_report.as_deref().unwrap_or_default());

            let mut chat = CaseChat::new(llm, state);
            for question in &ask {
                info!("Asking: {question}");
                let answer = chat.ask(question, with_images).await?;
                println!("\nQ: {question}\nA: {answer}");
            }
            println!(
                "\n{}",
                serde_json::to_string_pretty(&chat.diagnosis_summary())?
            );
        }
        Command::Scroll => {
            let qdrant = qdrant_from_env()?;
            let points = qdrant.scroll(1).await.context("Scroll failed")?;
            match points.first() {
                Some(point) => println!("{}", serde_json::to_string_pretty(&point.payload)?),
                None => println!("No results found."),
            }
        }
    }
    Ok(())
}
