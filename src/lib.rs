//! # Jorge
//!
//! A course-study chat backend. Students attach lecture PDFs and slide
//! decks to a conversation; every turn folds the text of those files into
//! a grounded system prompt and forwards the recent transcript to a local
//! (Ollama) or remote (OpenAI-compatible) model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  ┌──────────────┐  ┌──────────────┐  ┌────────────┐
//! │ Extract  │─▶│ Context      │─▶│ Prompt       │─▶│ Transcript │─▶ model
//! │ PDF/PPTX │  │ FILE: blocks │  │ rules + ctx  │  │ sys + last │
//! └──────────┘  └──────────────┘  └──────────────┘  └─────┬──────┘
//!                                                         │
//!                     ┌──────────┐   ┌──────────┐   ┌─────▼─────┐
//!                     │   CLI    │   │   HTTP   │──▶│  SQLite   │
//!                     │ (jorge)  │   │  (axum)  │   │ ChatStore │
//!                     └──────────┘   └──────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! jorge init                          # create database
//! jorge user add alice --name Alice   # register a user
//! jorge extract lecture.pdf           # inspect extracted text
//! jorge serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`store`] | Data-access trait, SQLite and in-memory stores |
//! | [`blob`] | Upload byte storage |
//! | [`extract`] | PDF and PPTX text extraction |
//! | [`context`] | Per-conversation file context |
//! | [`prompt`] | System prompt composition |
//! | [`llm`] | Inference clients |
//! | [`transcript`] | Turn assembly and the send pipeline |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod blob;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod extract;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod server;
pub mod store;
pub mod transcript;
