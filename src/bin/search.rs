use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use recipe_rag::{
    GeminiClient, GeminiEmbedder, GeminiGenerator, Generator, PgVectorIndex, PipelineArgs,
    QueryConfig, QueryEngine, SearchFilter,
};

#[path = "search/render.rs"]
mod render;

#[derive(Parser, Debug)]
#[command(
    name = "recipe-rag-search",
    about = "Find recipes similar to a free-text request and estimate their cost"
)]
struct SearchCli {
    /// Free-text request, e.g. "vegetarian dish with 20g protein"
    #[arg(long)]
    query: String,

    /// Number of recipes to return
    #[arg(long, env = "RECIPE_RAG_TOP_K", default_value_t = 5)]
    top_k: usize,

    /// Only return recipes with at least this much protein (g)
    #[arg(long)]
    min_protein: Option<f64>,

    /// Only return recipes with at most this many calories
    #[arg(long)]
    max_calories: Option<f64>,

    /// Skip the per-recipe cost estimates
    #[arg(long, default_value_t = false)]
    no_enrich: bool,

    /// Concurrent cost estimate requests
    #[arg(long, env = "RECIPE_RAG_ENRICH_CONCURRENCY", default_value_t = 4)]
    enrichment_concurrency: usize,

    /// Print results as JSON instead of text
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    recipe_rag::init_tracing();
    let cli = SearchCli::parse();

    let gemini = cli.pipeline.gemini_config();
    let client = GeminiClient::new(&gemini).context("failed to configure Gemini client")?;
    let embedder = GeminiEmbedder::new(client.clone(), &gemini)?;
    let generator: Option<Arc<dyn Generator>> = if cli.no_enrich {
        None
    } else {
        Some(Arc::new(GeminiGenerator::new(client, &gemini)?))
    };
    let index = Arc::new(
        PgVectorIndex::connect(&cli.pipeline.pgvector_config())
            .await
            .context("failed to connect to the vector index")?,
    );

    let config = QueryConfig {
        top_k: cli.top_k,
        enrich: !cli.no_enrich,
        enrichment_concurrency: cli.enrichment_concurrency,
        ..QueryConfig::default()
    };
    let engine = QueryEngine::new(Arc::new(embedder), index.clone(), generator, config)?;

    let mut filter = SearchFilter::none();
    if let Some(min) = cli.min_protein {
        filter = filter.at_least("protein", min);
    }
    if let Some(max) = cli.max_calories {
        filter = filter.at_most("calories", max);
    }

    let recipes = engine
        .search(&cli.query, &filter)
        .await
        .context("search failed")?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&recipes).context("failed to encode results")?
        );
    } else if recipes.is_empty() {
        println!("\nNo recipes found.");
    } else {
        for recipe in &recipes {
            print!("{}", render::render_recipe(recipe));
        }
    }

    drop(engine);
    if let Ok(index) = Arc::try_unwrap(index) {
        index.close().await;
    }
    Ok(())
}
