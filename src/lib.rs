//! # docdex
//!
//! A local-first documentation indexing and retrieval engine for AI tools.
//!
//! docdex chunks markdown by structure (headers first, then paragraphs,
//! then character windows), embeds the chunks, stores them in SQLite, and
//! answers semantic and structural queries via a CLI and an HTTP tool
//! server for agent runtimes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │  Files   │──▶│   Pipeline   │──▶│  SQLite   │
//! │ .md/.txt │   │ Chunk+Embed  │   │ chunks+vec│
//! └──────────┘   └──────────────┘   └────┬─────┘
//!                                        │
//!                    ┌───────────────────┤
//!                    ▼                   ▼
//!               ┌──────────┐       ┌──────────┐
//!               │   CLI    │       │   HTTP   │
//!               │ (docdex) │       │ (tools)  │
//!               └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docdex init                    # create database
//! docdex index ./docs            # chunk and store markdown
//! docdex embed                   # backfill embedding vectors
//! docdex search "rate limits"    # ranked semantic search
//! docdex serve mcp               # start the tool server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`models`] | Core data types |
//! | [`chunk`] | Structure-aware markdown chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | SQLite-backed chunk and vector store |
//! | [`retrieval`] | Search, header filter, context windows, stats |
//! | [`ingest`] | File walking and the index/embed pipeline |
//! | [`server`] | HTTP tool server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod server;
pub mod store;
