//! Filesystem-backed document store.
//!
//! The store is a flat directory keyed by logical filename, the durable
//! holding area the index is rebuilt from. Mutations (put, delete) change
//! only the raw files; scheduling the rebuild that keeps the vector index
//! consistent is the job of [`crate::indexer::Indexer`], which owns this
//! store.

use std::path::PathBuf;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::extract::DocumentFormat;
use crate::models::StoredDocument;

pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Opens (and creates if missing) the store directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Writes a document under its logical filename, overwriting any
    /// previous upload with the same name.
    pub fn put(&self, filename: &str, bytes: &[u8]) -> Result<StoredDocument> {
        validate_filename(filename)?;
        let format = DocumentFormat::from_filename(filename).ok_or_else(|| {
            Error::validation(format!(
                "unsupported document format: '{}'. Accepted: pdf, txt, md, docx, xlsx.",
                filename
            ))
        })?;

        std::fs::write(self.root.join(filename), bytes)?;
        Ok(StoredDocument {
            filename: filename.to_string(),
            format,
            size_bytes: bytes.len() as u64,
            uploaded_at: Utc::now(),
        })
    }

    /// Removes a document. Returns `false` when no such filename exists.
    pub fn delete(&self, filename: &str) -> Result<bool> {
        validate_filename(filename)?;
        let path = self.root.join(filename);
        if !path.is_file() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }

    pub fn contains(&self, filename: &str) -> bool {
        validate_filename(filename).is_ok() && self.root.join(filename).is_file()
    }

    /// Lists stored filenames in lexicographic order.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn read(&self, filename: &str) -> Result<Vec<u8>> {
        validate_filename(filename)?;
        let path = self.root.join(filename);
        if !path.is_file() {
            return Err(Error::not_found(format!("document not found: {}", filename)));
        }
        Ok(std::fs::read(path)?)
    }
}

/// Rejects filenames that are empty or could escape the store directory.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(Error::validation("filename must not be empty"));
    }
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(Error::validation(format!("invalid filename: '{}'", filename)));
    }
    Ok(())
}
