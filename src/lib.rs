//! # CaseClip
//!
//! A clipboard capture and support-case context analysis pipeline.
//!
//! CaseClip polls a shared text buffer for case-review identifiers (ICM and
//! support case IDs), persists matching captures durably, and enriches them
//! in the background with chunk-based contextual analysis and a condensed
//! Support Context Protocol artifact.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐
//! │  Buffer   │──▶│  Monitor  │──▶│  Parser   │──▶│  Storage  │
//! │ primitive │   │   loop    │   │ (IDs/meta)│   │ (atomic)  │
//! └──────────┘   └───────────┘   └───────────┘   └────┬──────┘
//!                                                     │ background
//!                                                     ▼
//!                                               ┌───────────┐
//!                                               │ Analyzer  │
//!                                               │ +Protocol │
//!                                               └───────────┘
//! ```
//!
//! The raw capture and its basic metadata are written synchronously on the
//! poll path; analysis artifacts are produced by a tracked background task
//! whose failure never invalidates the raw save.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with merged defaults |
//! | [`parser`] | ICM / case ID extraction and basic metadata |
//! | [`chunk`] | Overlapping-window text splitter |
//! | [`analyzer`] | Per-chunk classification, entities, key information |
//! | [`protocol`] | Support Context Protocol synthesis |
//! | [`storage`] | Atomic persistence, collision resolution, retention |
//! | [`monitor`] | Buffer poll loop and deduplication |
//! | [`clipboard`] | Shared-buffer read seam |
//! | [`notify`] | Notification sink seam |
//! | [`error`] | Pipeline error types |

pub mod analyzer;
pub mod chunk;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod parser;
pub mod protocol;
pub mod storage;
