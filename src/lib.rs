//! # Foresight
//!
//! A knowledge-base retrieval and progress-forecasting backend for issue
//! trackers.
//!
//! Foresight ingests uploaded project documents into a searchable vector
//! index, answers questions about them with cited sources, and forecasts
//! planned-vs-actual-vs-predicted progress for projects and single issues
//! from sparse lifecycle timestamps.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────────┐   ┌─────────────────┐
//! │ Document     │──▶│ Rebuild worker      │──▶│ Index           │
//! │ Store (fs)   │   │ extract→chunk→embed │   │ Generation      │
//! └──────┬───────┘   └──────────┬──────────┘   └────────┬────────┘
//!        │                      │ task id / progress    │ atomic swap
//!        ▼                      ▼                       ▼
//! ┌──────────────┐   ┌─────────────────────┐   ┌─────────────────┐
//! │ HTTP API     │◀──│ Task Registry       │   │ Query Pipeline  │
//! │ (axum)       │   │ pending→processing→ │   │ rewrite→search→ │
//! │              │   │ {completed, failed} │   │ generate+cite   │
//! └──────────────┘   └─────────────────────┘   └─────────────────┘
//!
//! ┌─────────────────────┐
//! │ Prediction Engine   │  independent of the pipeline above;
//! │ planned/actual/     │  consumes issue lifecycle records
//! │ predicted curves    │  supplied by the tracker proxy
//! └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`store`] | Filesystem document store |
//! | [`extract`] | Per-format plain-text extraction |
//! | [`chunk`] | Overlapping text chunker |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Index generations and the active-index handle |
//! | [`tasks`] | Rebuild task state machine and registry |
//! | [`indexer`] | Rebuild orchestration |
//! | [`generate`] | Text-generation collaborator abstraction |
//! | [`chat`] | Retrieval-augmented answer pipeline |
//! | [`predict`] | Progress prediction engine |
//! | [`server`] | JSON HTTP API |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod index;
pub mod indexer;
pub mod models;
pub mod predict;
pub mod server;
pub mod store;
pub mod tasks;

pub use error::{Error, Result};
