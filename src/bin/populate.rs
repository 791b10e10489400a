use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use recipe_rag::{
    CsvRecordSource, GeminiClient, GeminiEmbedder, GeminiGenerator, IngestArgs, IngestOutcome,
    PgVectorIndex, PipelineArgs, QueryConfig, RecipePipeline,
};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "recipe-rag-populate",
    about = "Chunk, embed and store a recipe CSV export in a pgvector table"
)]
struct PopulateCli {
    /// Path to the recipe CSV export
    #[arg(long, env = "RECIPE_RAG_INPUT")]
    input: PathBuf,

    /// Field delimiter (single ASCII character)
    #[arg(long, env = "RECIPE_RAG_DELIMITER", default_value_t = ',')]
    delimiter: char,

    /// Query to run against the index afterwards as a smoke check
    #[arg(long)]
    check_query: Option<String>,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(flatten)]
    ingest: IngestArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    recipe_rag::init_tracing();
    let cli = PopulateCli::parse();
    anyhow::ensure!(
        cli.delimiter.is_ascii(),
        "delimiter '{}' must be ASCII",
        cli.delimiter
    );

    let gemini = cli.pipeline.gemini_config();
    let client = GeminiClient::new(&gemini).context("failed to configure Gemini client")?;
    let embedder = GeminiEmbedder::new(client.clone(), &gemini)?;
    let generator = GeminiGenerator::new(client, &gemini)?;
    let index = Arc::new(
        PgVectorIndex::connect(&cli.pipeline.pgvector_config())
            .await
            .context("failed to connect to the vector index")?,
    );
    index
        .ensure_schema()
        .await
        .context("failed to prepare the embeddings table")?;

    let source = CsvRecordSource::new(&cli.input).with_delimiter(cli.delimiter as u8);
    let ingest = cli.ingest.build_config(cli.pipeline.embed_batch_size)?;
    let pipeline = RecipePipeline::new(
        Arc::new(source),
        Arc::new(embedder),
        index.clone(),
        Some(Arc::new(generator)),
        ingest,
        QueryConfig::default(),
    )?;

    let stop = pipeline.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current batch");
            stop.raise();
        }
    });

    let outcome = pipeline
        .populate()
        .await
        .with_context(|| format!("failed to ingest {:?}", cli.input))?;
    match outcome {
        IngestOutcome::Skipped { existing } => {
            println!("Found {existing} existing chunk(s). Skipping processing.");
        }
        IngestOutcome::Completed(report) => {
            println!(
                "Stored {} chunk(s) from {}/{} record(s) in {} batch(es).",
                report.chunks_stored,
                report.processed_records,
                report.total_records,
                report.batches.len()
            );
            if report.skipped_records > 0 {
                println!("Skipped {} malformed row(s).", report.skipped_records);
            }
            if report.abandoned_records > 0 {
                println!(
                    "Abandoned {} record(s) from failed batches.",
                    report.abandoned_records
                );
            }
            if report.cancelled {
                println!("Stopped early on request; rerunning will not resume a partial index.");
            }
        }
    }

    if let Some(query) = cli.check_query.as_deref() {
        match pipeline.best_match(query).await.context("check query failed")? {
            Some(recipe) => println!(
                "Best match for {query:?}: {} (distance {:.4})",
                recipe.title, recipe.distance
            ),
            None => println!("No match for {query:?}."),
        }
    }

    drop(pipeline);
    if let Ok(index) = Arc::try_unwrap(index) {
        index.close().await;
    }
    Ok(())
}
