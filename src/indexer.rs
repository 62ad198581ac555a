//! Rebuild orchestration: extraction → chunking → embedding → build →
//! atomic activation.
//!
//! The [`Indexer`] owns the document store, the task registry, and the
//! active-index handle, and is the only writer of all three. Uploads and
//! deletes mutate the store, then schedule a full rebuild on a background
//! tokio task and return the task id immediately; callers poll the registry
//! for progress. A failed rebuild marks its task failed and leaves the
//! previously active generation serving queries.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ChunkingConfig, Config};
use crate::chunk::split_text;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::extract::{extract_text, DocumentFormat};
use crate::index::{Generation, IndexHandle};
use crate::store::{validate_filename, DocumentStore};
use crate::tasks::{RebuildReason, TaskRegistry, TaskSnapshot};

/// Cheaply cloneable: every clone shares the same store, registry, and
/// active-index handle, so spawned rebuild workers operate on the same
/// state as the request path.
#[derive(Clone)]
pub struct Indexer {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    handle: Arc<IndexHandle>,
    registry: Arc<TaskRegistry>,
    chunking: ChunkingConfig,
    batch_size: usize,
    index_dir: PathBuf,
}

impl Indexer {
    pub fn new(
        config: &Config,
        store: DocumentStore,
        embedder: Arc<dyn Embedder>,
        handle: Arc<IndexHandle>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            store: Arc::new(store),
            embedder,
            handle,
            registry,
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size.max(1),
            index_dir: config.storage.index_dir.clone(),
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn handle(&self) -> &Arc<IndexHandle> {
        &self.handle
    }

    /// Stores the uploaded files, then schedules a rebuild.
    ///
    /// All filenames and formats are validated before anything is written,
    /// so an unsupported file rejects the whole upload. Returns the task id
    /// for polling, or a busy conflict while another rebuild is active.
    pub fn upload(&self, files: &[(String, Vec<u8>)]) -> Result<Uuid> {
        if files.is_empty() {
            return Err(Error::validation("no files in upload"));
        }
        for (filename, _) in files {
            validate_filename(filename)?;
            if DocumentFormat::from_filename(filename).is_none() {
                return Err(Error::validation(format!(
                    "unsupported document format: '{}'. Accepted: pdf, txt, md, docx, xlsx.",
                    filename
                )));
            }
        }

        let task_id = self.registry.begin(RebuildReason::Upload)?;
        for (filename, bytes) in files {
            match self.store.put(filename, bytes) {
                Ok(doc) => debug!(filename = %doc.filename, bytes = doc.size_bytes, "stored document"),
                Err(e) => {
                    self.registry.fail(task_id, format!("failed to store {}: {}", filename, e));
                    return Err(e);
                }
            }
        }

        self.spawn_worker(task_id);
        Ok(task_id)
    }

    /// Deletes a document by filename, then schedules a rebuild.
    ///
    /// Deleting an unknown filename is an error and creates no task.
    /// Deletion always rebuilds the whole index; stale vectors pointing at
    /// a removed source must never stay searchable.
    pub fn remove(&self, filename: &str) -> Result<Uuid> {
        validate_filename(filename)?;
        if !self.store.contains(filename) {
            return Err(Error::not_found(format!("document not found: {}", filename)));
        }

        let task_id = self.registry.begin(RebuildReason::Delete)?;
        match self.store.delete(filename) {
            Ok(_) => {}
            Err(e) => {
                self.registry.fail(task_id, format!("failed to delete {}: {}", filename, e));
                return Err(e);
            }
        }

        self.spawn_worker(task_id);
        Ok(task_id)
    }

    /// Runs a rebuild inline and returns the terminal task snapshot.
    /// Used by the one-shot CLI path.
    pub async fn rebuild_now(&self, reason: RebuildReason) -> Result<TaskSnapshot> {
        let task_id = self.registry.begin(reason)?;
        self.run(task_id).await;
        self.registry.status(task_id)
    }

    fn spawn_worker(&self, task_id: Uuid) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run(task_id).await;
        });
    }

    async fn run(&self, task_id: Uuid) {
        self.registry.set_processing(task_id, "scanning documents");
        match self.rebuild(task_id).await {
            Ok(message) => {
                info!(task = %task_id, "{}", message);
                self.registry.complete(task_id, message);
            }
            Err(e) => {
                warn!(task = %task_id, error = %e, "index rebuild failed");
                self.registry.fail(task_id, e.to_string());
            }
        }
    }

    /// The rebuild pipeline. Any stage error aborts the build; the active
    /// generation is only replaced after the new one is fully built and
    /// persisted.
    async fn rebuild(&self, task_id: Uuid) -> Result<String> {
        let files = self.store.list()?;

        if files.is_empty() {
            let generation = Generation::empty(self.embedder.model_name(), self.embedder.dims());
            generation.save(&self.index_dir)?;
            self.handle.activate(generation);
            return Ok("knowledge base is empty; an empty index is now active".to_string());
        }

        let total_files = files.len();
        let mut chunks = Vec::new();
        for (i, filename) in files.iter().enumerate() {
            let bytes = self.store.read(filename)?;
            let format = DocumentFormat::from_filename(filename).ok_or_else(|| {
                Error::extraction(format!("stored document has unsupported format: {}", filename))
            })?;

            let text = tokio::task::spawn_blocking(move || extract_text(&bytes, format))
                .await
                .map_err(|e| Error::internal(format!("extraction worker panicked: {}", e)))?
                .map_err(|e| Error::extraction(format!("{}: {}", filename, e)))?;

            chunks.extend(split_text(filename, &text, &self.chunking));
            let progress = 5 + (35 * (i + 1) / total_files) as u8;
            self.registry
                .set_progress(task_id, progress, format!("extracted {}", filename));
        }

        if chunks.is_empty() {
            return Err(Error::extraction(format!(
                "no text could be extracted from {} document(s)",
                total_files
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let total_chunks = texts.len();
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(total_chunks);
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embedder.embed(batch).await?);
            let progress = 40 + (50 * vectors.len() / total_chunks) as u8;
            self.registry.set_progress(
                task_id,
                progress,
                format!("embedded {}/{} chunks", vectors.len(), total_chunks),
            );
        }

        let pairs: Vec<_> = chunks.into_iter().zip(vectors).collect();
        let generation = Generation::build(self.embedder.model_name(), self.embedder.dims(), pairs)?;

        self.registry
            .set_progress(task_id, 95, "activating new index generation");
        generation.save(&self.index_dir)?;
        let indexed = generation.len();
        self.handle.activate(generation);

        Ok(format!(
            "indexed {} chunks from {} documents",
            indexed, total_files
        ))
    }
}
