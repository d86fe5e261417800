use anyhow::{Context, Result};
use clap::Parser;
use reporag::ingest::ImportRequest;
use reporag::progress::ProgressEvent;
use reporag::{AppContext, Config};

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Import a GitHub repository into the RepoRAG index (incremental on refresh)")]
struct Args {
    /// Repository URL (`https://github.com/owner/name`) or `owner/name`
    repo_url: String,

    /// Owner of the import record
    #[arg(short, long, default_value = "local")]
    user: String,

    /// Re-run an import that already completed; unchanged files are skipped
    #[arg(short, long)]
    refresh: bool,
}

fn describe(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::FileStart {
            file,
            index,
            total_files,
            overall_percent,
        } => Some(format!("[{}/{}] {:>6.2}% {}", index, total_files, overall_percent, file)),
        ProgressEvent::FileDone {
            file,
            message: Some(message),
            ..
        } => Some(format!("        {}: {}", file, message)),
        ProgressEvent::Error { message } => Some(format!("error: {}", message)),
        ProgressEvent::Done { message, .. } => Some(message.clone()),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;
    log::info!("Database path: {}", config.db_path().display());

    let ctx = AppContext::from_config(&config)
        .await
        .context("Failed to initialise application")?;

    let request = ImportRequest {
        user_id: args.user,
        repo_url: args.repo_url,
        refresh: args.refresh,
    };

    // a late listener still gets the latest event replayed
    let import_id = ctx.importer.start(request).await?;
    let (_, mut events) = ctx.importer.progress().register(&import_id);
    println!("Import {} started", import_id);

    let mut failed = false;
    while let Some(event) = events.recv().await {
        if let Some(line) = describe(&event) {
            println!("{}", line);
        }
        if matches!(event, ProgressEvent::Error { .. }) {
            failed = true;
        }
    }

    let repo = reporag::db::repos::get_repository(&ctx.db, &import_id)
        .await?
        .context("Import record disappeared")?;
    println!(
        "{} is {}: {} candidate files, {} indexed",
        repo.full_name, repo.status, repo.file_count, repo.indexed_files
    );

    if failed {
        anyhow::bail!("Import failed: {}", repo.error_message.unwrap_or_default());
    }
    Ok(())
}
