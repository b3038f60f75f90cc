//! # roux-core
//!
//! A synchronization engine that keeps a directory of linked documents and a queryable cache
//! of them in agreement.
//!
//! ## Overview
//!
//! roux-core reads a tree of Markdown files (or any format with a registered parser), assigns
//! each document a stable identifier that it writes back into the file, and mirrors the
//! documents into a SQLite cache. Wikilinks between documents are resolved to identifiers and
//! form a directed graph that answers neighbor, shortest-path and hub queries. Optional
//! embeddings add nearest-neighbor search.
//!
//! ### Key Features
//!
//! - **Stable identifiers**: documents without an id get one written into their front matter
//! - **Incremental sync**: only files whose modification time moved are reparsed
//! - **Link graph**: neighbors, bidirectional shortest path, hubs and degree centrality
//! - **Vector search**: cosine nearest neighbors over stored embeddings
//! - **File watching**: debounced, coalesced change batches applied in the background
//!
//! ## Architecture
//!
//! - **[`sync`]**: [`SyncEngine`], the entry point tying everything together
//! - **[`codec`]**: document parsing (`DocumentParser` trait, Markdown parser)
//! - **[`db`]**: SQLite document cache
//! - **[`graph`]**: link graph and traversal algorithms
//! - **[`vector`]**: embedding storage and similarity search
//! - **[`watch`]** / **[`event`]**: file watching and change coalescing
//! - **[`query`]**: provider operations shared by all node stores
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roux_core::{config::RouxConfig, properties::NeighborOptions, SyncEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(SyncEngine::open(RouxConfig::new("./notes")).await?);
//!     let report = engine.sync().await?;
//!     println!("parsed {} document(s)", report.parsed);
//!
//!     for (id, links) in engine.get_hubs(roux_core::properties::HubMetric::InDegree, 5)? {
//!         let neighbors = engine.get_neighbors(&id, NeighborOptions::default()).await?;
//!         println!("{id}: {links} inbound, {} neighbors", neighbors.len());
//!     }
//!
//!     // Keep the cache current while the process runs.
//!     engine.start_watching()?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod graph;
pub mod heap;
pub mod links;
pub mod names;
pub mod nodeid;
pub mod paths;
pub mod properties;
pub mod query;
pub mod sync;
pub mod vector;
pub mod watch;

pub use error::*;
pub use sync::{SyncEngine, SyncReport};
pub use vector::Embedder;
