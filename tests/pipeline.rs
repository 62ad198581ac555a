//! End-to-end knowledge-base pipeline tests: upload through task polling to
//! search, rebuild mutual exclusion, and atomic generation swap.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use uuid::Uuid;

use foresight::config::{load_config, Config};
use foresight::embedding::{Embedder, HashingEmbedder};
use foresight::error::Result;
use foresight::index::{Generation, IndexHandle};
use foresight::indexer::Indexer;
use foresight::store::DocumentStore;
use foresight::tasks::{TaskRegistry, TaskSnapshot, TaskStatus};

const DIMS: usize = 64;

fn write_config(root: &std::path::Path) -> Config {
    let config_path = root.join("foresight.toml");
    let content = format!(
        r#"[storage]
data_dir = "{root}/data"
index_dir = "{root}/index"

[chunking]
chunk_size = 200
overlap = 40

[embedding]
provider = "hashing"
dims = {dims}

[server]
bind = "127.0.0.1:0"
"#,
        root = root.display(),
        dims = DIMS,
    );
    std::fs::write(&config_path, content).unwrap();
    load_config(&config_path).unwrap()
}

struct Harness {
    _tmp: TempDir,
    config: Config,
    embedder: Arc<HashingEmbedder>,
    indexer: Indexer,
}

fn harness_with(embedder_for_indexer: Arc<dyn Embedder>) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let store = DocumentStore::open(&config.storage.data_dir).unwrap();
    let handle = Arc::new(IndexHandle::new(Generation::empty("token-hash", DIMS)));
    let registry = Arc::new(TaskRegistry::new(Duration::from_secs(600)));
    let indexer = Indexer::new(&config, store, embedder_for_indexer, handle, registry);
    Harness {
        _tmp: tmp,
        config,
        embedder: Arc::new(HashingEmbedder::new(DIMS)),
        indexer,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(HashingEmbedder::new(DIMS)))
}

async fn wait_terminal(indexer: &Indexer, id: Uuid) -> TaskSnapshot {
    for _ in 0..500 {
        let snap = indexer.registry().status(id).unwrap();
        if snap.status.is_terminal() {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {} never reached a terminal state", id);
}

/// Minimal one-page PDF whose content stream draws `phrase`.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::new();

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n",
    );
    offsets.push(out.len());
    let content = format!("BT /F1 12 Tf 72 712 Td ({}) Tj ET", phrase);
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");

    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Minimal docx: a ZIP holding word/document.xml with one text run.
fn minimal_docx(phrase: &str) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("word/document.xml", options).unwrap();
        writer
            .write_all(
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>"#,
                    phrase
                )
                .as_bytes(),
            )
            .unwrap();
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

async fn query(embedder: &HashingEmbedder, text: &str) -> Vec<f32> {
    embedder
        .embed(&[text.to_string()])
        .await
        .unwrap()
        .remove(0)
}

#[tokio::test]
async fn uploaded_pdf_becomes_searchable() {
    let h = harness();

    let id = h
        .indexer
        .upload(&[
            ("spec.pdf".to_string(), minimal_pdf("vector index rollout plan")),
            (
                "recipes.txt".to_string(),
                b"grapefruit marmalade recipe with three ingredients".to_vec(),
            ),
        ])
        .unwrap();

    let snap = wait_terminal(&h.indexer, id).await;
    assert_eq!(snap.status, TaskStatus::Completed);
    assert_eq!(snap.progress, 100);

    let generation = h.indexer.handle().current();
    assert!(generation.contains_source("spec.pdf"));

    let hits = generation
        .search(&query(&h.embedder, "vector index rollout").await, 3)
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].chunk.source, "spec.pdf");
}

#[tokio::test]
async fn uploaded_docx_becomes_searchable() {
    let h = harness();

    let id = h
        .indexer
        .upload(&[(
            "meeting-notes.docx".to_string(),
            minimal_docx("quarterly staffing review minutes"),
        )])
        .unwrap();

    let snap = wait_terminal(&h.indexer, id).await;
    assert_eq!(snap.status, TaskStatus::Completed);

    let generation = h.indexer.handle().current();
    let hits = generation
        .search(&query(&h.embedder, "staffing review minutes").await, 3)
        .unwrap();
    assert_eq!(hits[0].chunk.source, "meeting-notes.docx");
}

#[tokio::test]
async fn completed_generation_persists_and_reloads() {
    let h = harness();

    let id = h
        .indexer
        .upload(&[("guide.md".to_string(), b"# Guide\n\nRollback steps here.".to_vec())])
        .unwrap();
    wait_terminal(&h.indexer, id).await;

    let loaded = Generation::load(&h.config.storage.index_dir).unwrap();
    assert_eq!(loaded.len(), h.indexer.handle().current().len());
    assert!(loaded.contains_source("guide.md"));

    // Re-pointing a fresh handle to the persisted generation serves the
    // same chunks without a rebuild.
    let handle = IndexHandle::new(Generation::empty("token-hash", DIMS));
    handle.activate(loaded);
    let hits = handle
        .current()
        .search(&query(&h.embedder, "rollback steps").await, 2)
        .unwrap();
    assert_eq!(hits[0].chunk.source, "guide.md");
}

/// Embedder whose second and later calls block until the test releases
/// them, pinning a rebuild inside its embedding stage.
struct GatedEmbedder {
    inner: HashingEmbedder,
    calls: AtomicUsize,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Embedder for GatedEmbedder {
    fn model_name(&self) -> &str {
        "gated-token-hash"
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= 1 {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| foresight::Error::embedding("gate closed"))?;
            permit.forget();
        }
        self.inner.embed(texts).await
    }
}

#[tokio::test]
async fn rebuild_in_progress_rejects_new_triggers_and_swaps_atomically() {
    let gate = Arc::new(Semaphore::new(0));
    let gated = Arc::new(GatedEmbedder {
        inner: HashingEmbedder::new(DIMS),
        calls: AtomicUsize::new(0),
        gate: Arc::clone(&gate),
    });
    let h = harness_with(gated);

    // First rebuild embeds without blocking.
    let id = h
        .indexer
        .upload(&[("first.txt".to_string(), b"first document body".to_vec())])
        .unwrap();
    wait_terminal(&h.indexer, id).await;
    let before = h.indexer.handle().current();
    assert!(before.contains_source("first.txt"));

    // Second rebuild blocks inside the embedding stage.
    let id2 = h
        .indexer
        .upload(&[("second.txt".to_string(), b"second document body".to_vec())])
        .unwrap();
    for _ in 0..500 {
        if h.indexer.registry().status(id2).unwrap().status == TaskStatus::Processing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // While the worker is mid-build, readers still see the old complete
    // generation, and a new trigger is rejected as busy.
    let during = h.indexer.handle().current();
    assert!(Arc::ptr_eq(&before, &during));
    assert!(!during.contains_source("second.txt"));

    let err = h
        .indexer
        .upload(&[("third.txt".to_string(), b"third".to_vec())])
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    // Release the gate; the build finishes and the swap becomes visible.
    gate.add_permits(8);
    let snap = wait_terminal(&h.indexer, id2).await;
    assert_eq!(snap.status, TaskStatus::Completed);

    let after = h.indexer.handle().current();
    assert!(after.contains_source("second.txt"));
    assert!(after.contains_source("first.txt"));
}

#[tokio::test]
async fn task_progress_is_monotone_while_polling() {
    let h = harness();

    let files: Vec<(String, Vec<u8>)> = (0..6)
        .map(|i| {
            (
                format!("doc{}.txt", i),
                format!("document number {} talks about subsystem {}", i, i)
                    .repeat(20)
                    .into_bytes(),
            )
        })
        .collect();
    let id = h.indexer.upload(&files).unwrap();

    let mut last_progress = 0u8;
    loop {
        let snap = h.indexer.registry().status(id).unwrap();
        assert!(
            snap.progress >= last_progress,
            "progress went backwards: {} -> {}",
            last_progress,
            snap.progress
        );
        last_progress = snap.progress;
        if snap.status.is_terminal() {
            assert_eq!(snap.status, TaskStatus::Completed);
            assert_eq!(snap.progress, 100);
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
