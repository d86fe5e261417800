use anyhow::{Context, Result};
use reporag::db::{migrate, Db};
use reporag::{AppContext, Config, HttpServer};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "verify" => run_schema_verification().await,
        "serve" => run_http_server().await,
        other => anyhow::bail!("Unknown command '{}'. Usage: reporag [serve|verify]", other),
    }
}

async fn run_http_server() -> Result<()> {
    log::info!("Starting RepoRAG v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Database path: {}", config.db_path().display());
    log::info!(
        "Embedding models: code={} prose={}; chat model: {}",
        config.embeddings.code_model,
        config.embeddings.prose_model,
        config.llm.model
    );
    if config.github_token().is_none() {
        log::warn!(
            "{} not set; GitHub requests are unauthenticated and heavily rate limited",
            config.github.token_env
        );
    }

    let ctx = AppContext::from_config(&config)
        .await
        .context("Failed to initialise application")?;
    ctx.fail_interrupted_imports()
        .await
        .context("Failed to settle interrupted imports")?;
    let server = HttpServer::new(ctx, &config.http_server)?;
    server.run().await?;
    Ok(())
}

/// Open the store, apply migrations and report what is there
async fn run_schema_verification() -> Result<()> {
    let config = Config::load()?;
    let db = Db::open_migrated(config.db_path())
        .await
        .with_context(|| format!("Failed to open {}", config.db_path().display()))?;

    let (applied, journal_mode, integrity) = db
        .with_connection(|conn| {
            let applied = migrate::get_applied_migrations(conn)?;
            let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            Ok((applied, journal_mode, integrity))
        })
        .await?;

    log::info!("{} migrations applied: {}", applied.len(), applied.join(", "));
    if !journal_mode.eq_ignore_ascii_case("wal") {
        anyhow::bail!("Journal mode is not WAL: {}", journal_mode);
    }
    if integrity != "ok" {
        anyhow::bail!("Database integrity check failed: {}", integrity);
    }
    log::info!("Database schema verification complete");
    Ok(())
}
