//! # Exopedia
//!
//! An AI-written, internally consistent wiki of the year 3025. Readers click
//! red links (`[text](/create/{slug})`) to pages that do not exist yet; the
//! system either sends them to an equivalent existing page or drafts a new
//! one with a tool-using language model, then turns the red link blue.
//!
//! ## Architecture
//!
//! ```text
//!  POST /api/create
//!        │
//!        ▼
//! ┌──────────────┐  candidates  ┌────────────────┐
//! │   Creation   │─────────────▶│ Semantic Index │
//! │   Service    │              └────────────────┘
//! │              │   verdict    ┌────────────────┐
//! │              │◀─────────────│    Decider     │
//! └──────┬───────┘              └────────────────┘
//!        │ get_or_create
//!        ▼
//! ┌──────────────┐   spawn      ┌────────────────┐  tools  ┌─────────────────┐
//! │  Job Ledger  │◀────────────▶│  Orchestrator  │────────▶│  Tool Surface   │
//! │  (SQLite)    │  status/log  │  (≤12 turns)   │         │ pages + indices │
//! └──────────────┘              └────────────────┘         └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`blob`] | Markdown body storage |
//! | [`chunk`] | Paragraph/sentence-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`pages`] | Content Store |
//! | [`index`] | Semantic and Retrieval indices |
//! | [`links`] | Red/blue link parsing and rewriting |
//! | [`llm`] | Language model abstraction (Gemini) |
//! | [`prompts`] | Decider and drafting prompts |
//! | [`tools`] | Tool Surface |
//! | [`decider`] | Link Resolution Decider |
//! | [`orchestrator`] | Drafting Orchestrator |
//! | [`jobs`] | Job Ledger |
//! | [`ratelimit`] | Per-client sliding-window limiter |
//! | [`creation`] | Request policy and background runner |
//! | [`services`] | Composition root |
//! | [`server`] | HTTP server |
//! | [`get`], [`search`], [`seed`], [`queue_cmd`], [`embed_cmd`] | CLI commands |

pub mod blob;
pub mod chunk;
pub mod config;
pub mod creation;
pub mod db;
pub mod decider;
pub mod embed_cmd;
pub mod embedding;
pub mod get;
pub mod index;
pub mod jobs;
pub mod links;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod pages;
pub mod prompts;
pub mod queue_cmd;
pub mod ratelimit;
pub mod search;
pub mod seed;
pub mod server;
pub mod services;
pub mod tools;
