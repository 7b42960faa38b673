//! # docshelf
//!
//! A local-first document ingestion and hybrid retrieval service.
//!
//! docshelf accepts heterogeneous documents (PDF, DOCX, HTML, spreadsheets,
//! presentations, images, plain text), normalizes them into ordered text
//! chunks, attaches vector embeddings obtained from an external inference
//! endpoint, and serves hybrid (keyword + semantic) search scoped per owner,
//! via a CLI and an HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Parser    │──▶│   Pipeline    │──▶│  SQLite   │
//! │ PDF/DOCX/…  │   │ Chunk+Embed  │   │ FTS5+Vec │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │
//!                       ┌───────────────────┤
//!                       ▼                   ▼
//!                  ┌──────────┐       ┌──────────┐
//!                  │   CLI    │       │   HTTP   │
//!                  │ (shelf)  │       │  (axum)  │
//!                  └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! shelf init                          # create database
//! shelf ingest report.pdf --owner me  # parse, chunk, embed, persist
//! shelf search "quarterly revenue" --owner me
//! shelf serve http                    # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`parse`] | Multi-format text extraction |
//! | [`chunk`] | Recursive text chunking |
//! | [`embed`] | Embedding client abstraction |
//! | [`store`] | Raw/clean object storage |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Hybrid lexical + vector search |
//! | [`docs`] | Document listing and status |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod docs;
pub mod embed;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod search;
pub mod server;
pub mod store;
