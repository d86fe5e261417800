//! Import orchestration: fetch → detect change → chunk → embed → store, with progress.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::db::repos::{self, RepoStatus, Repository};
use crate::db::Db;
use crate::embeddings::EmbeddingGenerator;
use crate::error::{Result, RepoRagError};
use crate::ingest::chunker::{Chunk, Chunker};
use crate::ingest::db_writer::{self, ChunkWrite, FileWrite};
use crate::ingest::digest::{digest, FileChange};
use crate::ingest::filter::{decode_text, extension_of, select_candidates};
use crate::progress::{PercentTracker, ProgressEvent, ProgressHub};
use crate::remote::{parse_repo_url, RemoteRepo, RepoRef, RepoSource};

/// A request to import (or refresh) one repository for one user
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub user_id: String,
    pub repo_url: String,
    /// Re-run on an already `ready` import instead of rejecting it
    pub refresh: bool,
}

/// Per-import counters, logged at the end and returned to foreground callers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub repository_id: String,
    pub file_count: usize,
    pub indexed_files: usize,
    pub reindexed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub chunks_written: usize,
    pub chunks_failed: usize,
}

/// What happened to one candidate file
#[derive(Debug)]
enum FileOutcome {
    Indexed { chunks: usize, failed: usize },
    Unchanged,
    Binary,
    FetchFailed(String),
}

type InFlightKey = (String, String);

/// Removes the (user, repository) key when the import ends, however it ends
struct InFlightGuard {
    set: Arc<Mutex<HashSet<InFlightKey>>>,
    key: InFlightKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// A validated import holding its in-flight slot
struct ImportJob {
    repo: Repository,
    /// The record was created by this request rather than reused for a refresh
    created: bool,
    _guard: InFlightGuard,
}

/// Drives imports. Cheap to clone; clones share the in-flight set.
#[derive(Clone)]
pub struct Importer {
    db: Db,
    source: Arc<dyn RepoSource>,
    generator: Arc<EmbeddingGenerator>,
    chunker: Chunker,
    progress: Arc<ProgressHub>,
    in_flight: Arc<Mutex<HashSet<InFlightKey>>>,
}

impl Importer {
    pub fn new(
        db: Db,
        source: Arc<dyn RepoSource>,
        generator: Arc<EmbeddingGenerator>,
        chunker: Chunker,
        progress: Arc<ProgressHub>,
    ) -> Self {
        Self {
            db,
            source,
            generator,
            chunker,
            progress,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn progress(&self) -> &Arc<ProgressHub> {
        &self.progress
    }

    /// Validate the request and launch the import in the background.
    ///
    /// Returns the import id (== repository id) immediately; the outcome is observable
    /// through the repository status and the progress channel.
    pub async fn start(&self, request: ImportRequest) -> Result<String> {
        let job = self.prepare(&request).await?;
        let id = job.repo.id.clone();
        let importer = self.clone();
        tokio::spawn(async move {
            // errors are recorded on the repository and pushed as ERROR
            let _ = importer.run(job).await;
        });
        Ok(id)
    }

    /// Run an import to completion on the current task
    pub async fn import(&self, request: ImportRequest) -> Result<ImportSummary> {
        let job = self.prepare(&request).await?;
        self.run(job).await
    }

    /// Parse the URL, enforce the single-import rules and create or reuse the record.
    ///
    /// Runs before any call to the hosting API.
    async fn prepare(&self, request: &ImportRequest) -> Result<ImportJob> {
        if request.user_id.trim().is_empty() {
            return Err(RepoRagError::InvalidInput("user_id required".to_string()));
        }
        let repo_ref = parse_repo_url(&request.repo_url)?;
        let full_name = repo_ref.full_name();

        let key = (request.user_id.clone(), full_name.to_lowercase());
        {
            let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !set.insert(key.clone()) {
                return Err(RepoRagError::ImportInFlight(full_name));
            }
        }
        let guard = InFlightGuard {
            set: self.in_flight.clone(),
            key,
        };

        let existing = repos::find_ready_by_full_name(&self.db, &request.user_id, &full_name).await?;
        let (repo, created) = match existing {
            Some(repo) if !request.refresh => {
                log::info!("{} already imported as {}", full_name, repo.id);
                return Err(RepoRagError::AlreadyImported {
                    full_name: repo.full_name,
                    repository_id: repo.id,
                });
            }
            Some(repo) => {
                log::info!("Refreshing {} ({})", repo.full_name, repo.id);
                (repo, false)
            }
            None => {
                let repo =
                    repos::create_repository(&self.db, &request.user_id, &repo_ref.owner, &repo_ref.name).await?;
                (repo, true)
            }
        };

        self.progress.begin(&repo.id);
        Ok(ImportJob {
            repo,
            created,
            _guard: guard,
        })
    }

    async fn run(&self, job: ImportJob) -> Result<ImportSummary> {
        let repo = &job.repo;
        let started = Instant::now();
        match self.execute(repo).await {
            Ok(summary) => {
                log::info!(
                    "Import of {} finished in {:?}: {} files, {} re-indexed, {} unchanged, {} skipped, {} deleted, {} chunks ({} failed)",
                    repo.full_name,
                    started.elapsed(),
                    summary.file_count,
                    summary.reindexed,
                    summary.unchanged,
                    summary.skipped,
                    summary.deleted,
                    summary.chunks_written,
                    summary.chunks_failed,
                );
                Ok(summary)
            }
            Err(e @ RepoRagError::AlreadyImported { .. }) if job.created => {
                // a new record that resolved to an existing import is not kept
                log::info!("Discarding {}: {}", repo.id, e);
                if let Err(store_err) = repos::delete_repository(&self.db, &repo.id).await {
                    log::error!("Could not remove duplicate record {}: {}", repo.id, store_err);
                }
                self.progress.push(&repo.id, ProgressEvent::Error { message: e.to_string() });
                Err(e)
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("Import of {} failed: {}", repo.full_name, message);
                if let Err(store_err) =
                    repos::set_status(&self.db, &repo.id, RepoStatus::Error, Some(&message)).await
                {
                    log::error!("Could not record failure for {}: {}", repo.id, store_err);
                }
                self.progress.push(&repo.id, ProgressEvent::Error { message });
                Err(e)
            }
        }
    }

    async fn execute(&self, repo: &Repository) -> Result<ImportSummary> {
        let repo_ref = RepoRef {
            owner: repo.owner.clone(),
            name: repo.name.clone(),
        };
        let remote = self.source.resolve(&repo_ref).await?;

        if let Some(existing) =
            repos::find_ready_by_remote_id(&self.db, &repo.user_id, remote.remote_id).await?
        {
            if existing.id != repo.id {
                return Err(RepoRagError::AlreadyImported {
                    full_name: existing.full_name,
                    repository_id: existing.id,
                });
            }
        }

        let candidates = select_candidates(self.source.list_tree(&remote).await?);
        let total = candidates.len();
        repos::mark_importing(
            &self.db,
            &repo.id,
            &remote.full_name(),
            remote.remote_id,
            &remote.default_branch,
            total,
        )
        .await?;
        log::info!(
            "Importing {} ({} candidate files, branch {})",
            remote.full_name(),
            total,
            remote.default_branch
        );

        let stored = db_writer::get_file_digests(&self.db, &repo.id).await?;
        let mut tracker = PercentTracker::new(total);
        let mut summary = ImportSummary {
            repository_id: repo.id.clone(),
            file_count: total,
            ..Default::default()
        };
        let mut keep = HashSet::with_capacity(total);
        let mut indexed_so_far = 0;

        for (position, entry) in candidates.iter().enumerate() {
            let index = position + 1;
            self.progress.push(
                &repo.id,
                ProgressEvent::FileStart {
                    file: entry.path.clone(),
                    index,
                    total_files: total,
                    overall_percent: tracker.at(position, 0.0),
                },
            );

            let outcome = self
                .process_file(
                    &repo.id,
                    &remote,
                    &entry.path,
                    stored.get(&entry.path).map(String::as_str),
                    (index, total),
                    &mut tracker,
                )
                .await?;

            let message = match &outcome {
                FileOutcome::Indexed { chunks, failed } => {
                    summary.reindexed += 1;
                    summary.chunks_written += chunks;
                    summary.chunks_failed += failed;
                    keep.insert(entry.path.clone());
                    (*failed > 0).then(|| format!("{} chunks indexed, {} failed", chunks, failed))
                }
                FileOutcome::Unchanged => {
                    summary.unchanged += 1;
                    keep.insert(entry.path.clone());
                    Some("unchanged".to_string())
                }
                FileOutcome::Binary => {
                    summary.skipped += 1;
                    Some("skipped: binary content".to_string())
                }
                FileOutcome::FetchFailed(reason) => {
                    summary.skipped += 1;
                    // keep the previous version rather than dropping it on a transient failure
                    keep.insert(entry.path.clone());
                    Some(format!("skipped: {}", reason))
                }
            };

            let stored_now = match &outcome {
                FileOutcome::Indexed { .. } | FileOutcome::Unchanged => true,
                FileOutcome::FetchFailed(_) => stored.contains_key(&entry.path),
                FileOutcome::Binary => false,
            };
            if stored_now {
                indexed_so_far += 1;
                repos::set_indexed_files(&self.db, &repo.id, indexed_so_far).await?;
            }

            self.progress.push(
                &repo.id,
                ProgressEvent::FileDone {
                    file: entry.path.clone(),
                    index,
                    total_files: total,
                    overall_percent: tracker.at(index, 0.0),
                    message,
                },
            );
        }

        let deleted = db_writer::delete_files_not_in(&self.db, &repo.id, keep).await?;
        if !deleted.is_empty() {
            log::info!("Removed {} files no longer in {}", deleted.len(), remote.full_name());
        }
        summary.deleted = deleted.len();

        summary.indexed_files = db_writer::list_file_paths(&self.db, &repo.id).await?.len();
        repos::mark_ready(&self.db, &repo.id, total, summary.indexed_files).await?;

        self.progress.push(
            &repo.id,
            ProgressEvent::Done {
                total_files: total,
                overall_percent: 100.0,
                message: format!(
                    "Imported {}: {} of {} files indexed",
                    remote.full_name(),
                    summary.indexed_files,
                    total
                ),
            },
        );

        Ok(summary)
    }

    /// Per-file failures come back as [`FileOutcome`]; `Err` means the store failed.
    async fn process_file(
        &self,
        repository_id: &str,
        remote: &RemoteRepo,
        path: &str,
        stored_digest: Option<&str>,
        (index, total): (usize, usize),
        tracker: &mut PercentTracker,
    ) -> Result<FileOutcome> {
        let bytes = match self.source.fetch_file(remote, path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Skipping {}: {}", path, e);
                return Ok(FileOutcome::FetchFailed(e.to_string()));
            }
        };

        let Some(content) = decode_text(&bytes) else {
            log::debug!("Skipping {}: binary content", path);
            return Ok(FileOutcome::Binary);
        };

        let file_digest = digest(&bytes);
        let change = FileChange::detect(stored_digest, &file_digest);
        if !change.needs_indexing() {
            log::debug!("Unchanged: {}", path);
            return Ok(FileOutcome::Unchanged);
        }

        let chunks: Vec<Chunk> = self
            .chunker
            .chunks(&content)
            .filter(|c| !c.text.trim().is_empty())
            .collect();
        let chunk_total = chunks.len();

        let mut writes = Vec::with_capacity(chunk_total);
        let mut failed = 0;
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            match self.generator.embed_chunk(&chunk.text).await {
                Some(embedding) => writes.push(ChunkWrite {
                    chunk_index,
                    digest: digest(chunk.text.as_bytes()),
                    content: chunk.text,
                    start_line: chunk.start_line,
                    embedding: embedding.vector,
                    model: embedding.model,
                    tokens: chunk.tokens,
                }),
                None => {
                    log::warn!("{}: chunk {} not embedded, left out of the index", path, chunk_index);
                    failed += 1;
                }
            }

            self.progress.push(
                repository_id,
                ProgressEvent::ChunkProgress {
                    file: path.to_string(),
                    index,
                    total_files: total,
                    chunk_index: chunk_index + 1,
                    chunk_total,
                    overall_percent: tracker.at(index - 1, (chunk_index + 1) as f64 / chunk_total as f64),
                },
            );
        }

        let written = writes.len();
        let file = FileWrite {
            path: path.to_string(),
            extension: extension_of(path),
            tokens: self.chunker.estimate_tokens(&content),
            content,
            // an incomplete chunk set is stored without a digest so the next import retries it
            digest: if failed == 0 { file_digest } else { String::new() },
        };
        db_writer::replace_file(&self.db, repository_id, file, writes).await?;
        log::debug!("{} {:?}: {} chunks written, {} failed", path, change, written, failed);

        Ok(FileOutcome::Indexed {
            chunks: written,
            failed,
        })
    }
}
