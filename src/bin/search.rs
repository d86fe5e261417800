use anyhow::{Context, Result};
use clap::Parser;
use reporag::{AppContext, Config};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "search")]
#[command(about = "Rank the chunks of an imported repository against a query")]
struct Args {
    /// Repository id as returned by `ingest`
    repository_id: String,

    /// Natural-language or code query
    query: String,

    /// Number of results (defaults to search.default_k)
    #[arg(short)]
    k: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    if args.query.trim().is_empty() {
        anyhow::bail!("Query cannot be empty");
    }

    let config = Config::load()?;
    let ctx = AppContext::from_config(&config)
        .await
        .context("Failed to initialise application")?;

    let repo = reporag::db::repos::get_repository(&ctx.db, &args.repository_id)
        .await?
        .with_context(|| format!("No repository with id {}", args.repository_id))?;
    if repo.status != reporag::db::RepoStatus::Ready {
        log::warn!("{} is {}; results may be incomplete", repo.full_name, repo.status);
    }

    let start = Instant::now();
    let results = ctx.retriever.retrieve(&repo.id, &args.query, args.k).await?;
    let elapsed = start.elapsed();

    if results.is_empty() {
        println!("{}", reporag::rag::REFUSAL);
        return Ok(());
    }

    println!("Found {} results in {:?}\n", results.len(), elapsed);
    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. {} (chunk {}, line {}) score {:.3} [vector {:.3}, lexical {:.3}, {}]",
            i + 1,
            result.file,
            result.chunk_index,
            result.start_line,
            result.score,
            result.vector_score,
            result.lexical_score,
            result.model
        );
        let preview: String = result.content.lines().take(6).collect::<Vec<_>>().join("\n");
        println!("{}\n", preview);
    }
    Ok(())
}
