//! # wikidex
//!
//! Link graph and semantic search over a repository of Markdown wiki pages.
//!
//! wikidex keeps three tables in step with the files of a repository:
//! documents (parsed, rendered), the `[[wiki link]]` graph between them,
//! and overlapping text chunks with embedding vectors for semantic search.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Watch   │──▶│ Sync Engine │──▶│ Link Resolver│   │  SQLite  │
//! │ Pipeline │   │  two-phase  │   │   + render   │──▶│  Store   │
//! └──────────┘   └──────┬──────┘   └──────────────┘   └────▲─────┘
//!                       │ enqueue                          │
//!                       ▼                                  │
//!                ┌─────────────┐   ┌──────────────┐        │
//!                │ Embed Queue │──▶│ Chunker +    │────────┘
//!                │  (worker)   │   │ Embed Index  │
//!                └─────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! wikidex init                  # create database
//! wikidex sync                  # full two-phase sync
//! wikidex search "deployment"   # semantic search
//! wikidex watch                 # follow file changes
//! wikidex serve                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`markdown`] | Frontmatter, titles, HTML rendering |
//! | [`links`] | Wiki-link extraction and resolution |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Chunk vectors and similarity search |
//! | [`jobs`] | Background embedding queue |
//! | [`store`] | Storage trait, SQLite and in-memory backends |
//! | [`scan`] | Repository file discovery |
//! | [`vcs`] | Commit-on-save collaborator |
//! | [`sync`] | Full and incremental sync |
//! | [`watch`] | Filesystem watch pipeline |
//! | [`server`] | HTTP server |
//! | [`error`] | Typed index errors |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod jobs;
pub mod links;
pub mod markdown;
pub mod migrate;
pub mod models;
pub mod scan;
pub mod server;
pub mod store;
pub mod sync;
pub mod vcs;
pub mod watch;
