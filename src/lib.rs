// SPDX-License-Identifier: MPL-2.0
//! # tilewho
//!
//! Copy-provenance reconstruction and deterministic pseudonymization for interaction logs of collaborative
//! document tools.
//!
//! ## Overview
//!
//! Learning platforms built around shared documents log every edit as a row of a CSV export: an event
//! tag, a JSON blob of parameters and a handful of identifying columns. When a student copies a text tile
//! from someone else and then keeps typing, the log only ever records the *combined* text. `tilewho`
//! reconstructs which part of that text came from the copy and which part the student wrote themselves,
//! and masks the identifying columns so the logs can be shared with researchers.
//!
//! **Key Features:**
//!
//! - **Copy Provenance**: Every text edit is compared against the latest copy of its tile, and the
//!   characters the student inserted are reported separately.
//! - **Robust Text Extraction**: Rich-text payloads of any shape are flattened to plain text, skipping
//!   opaque subtrees such as embedded serialized objects.
//! - **Consistent Pseudonymization**: Identifiers are replaced by short opaque tokens. The same value
//!   always gets the same token, across files and across runs.
//! - **Streaming**: Files are processed row by row; only the copy events of a log are held in memory.
//!
//! ## Basic Usage
//!
//! ```rust
//! use tilewho::event::LogRecord;
//! use tilewho::provenance::ProvenanceTracker;
//!
//! let records = vec![
//!     LogRecord::new(
//!         0,
//!         "TEXT_TOOL_CHANGE",
//!         Some(r#"{"tileId":"t1","args":[{"text":"hi there friend"}]}"#.to_string()),
//!     ),
//!     LogRecord::new(
//!         1,
//!         "COPY_TILE",
//!         Some(r#"{"tileId":"t1","serializedObject":{"type":"Text","text":"hi there"}}"#.to_string()),
//!     ),
//! ];
//!
//! let (_, attributions) = ProvenanceTracker::default().run(&records);
//! assert_eq!(attributions[0].copied_text, "hi there");
//! assert_eq!(attributions[0].self_authored_text, "friend");
//! ```
//!
//! Copies are indexed in a first pass over the whole log, so a copy event recorded *after* the edit it
//! explains is still found.
//!
//! ### Processing CSV Files
//!
//! [`pipeline::Pipeline`] wraps the tracker and the pseudonymizer for CSV input:
//!
//! ```rust,no_run
//! use std::fs::File;
//! use tilewho::{config::PipelineConfig, pipeline::Pipeline};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(PipelineConfig::default());
//!     let output = File::create("annotated.csv")?;
//!     pipeline.annotate_provenance(|| File::open("log.csv"), output)?;
//!     Ok(())
//! }
//! ```
//!
//! The `tilewho` binary exposes the same operations as the `provenance`, `pairs` and `mask` subcommands.
//!
//! ## Modules and API
//!
//! ### `extract` Module
//!
//! Flattens JSON rich-text documents into plain text. The first `text` string found on a path wins, and
//! keys listed in [`extract::OpaqueKeys`] are never descended into.
//!
//! ### `event` Module
//!
//! Classifies log records into text edits and copy events and resolves their tile identifiers.
//!
//! ### `provenance` Module
//!
//! Builds the per-tile copy index and attributes text edits. Also produces audit pairs: one row per
//! (edit, copy) combination on the same tile.
//!
//! ### `pseudonymize` Module
//!
//! Masks identifiers with content-derived, keyed or random tokens and keeps the persistent
//! original-to-token mapping. The mapping file is a CSV with the header
//! `original_identifier,masked_identifier,column`.
//!
//! ### `pipeline` and `config` Modules
//!
//! Stream CSV files through the above, configured by [`config::PipelineConfig`] (loadable from a JSON
//! file).
//!
//! ### `utils` Module
//!
//! Character-level diffing and token encoding.
//!
//! ## Features and Configuration
//!
//! ### Diff Algorithm Selection
//!
//! Attribution uses a character-level Myers diff from `imara-diff` by default. Histogram and minimal Myers
//! are available through [`utils::DiffAlgorithm`].
//!
//! Enable the `python-diff` feature to diff with Python's `difflib.SequenceMatcher` through `pyo3`
//! instead. This is slow and only meant for comparing results with existing Python tooling:
//!
//! ```toml
//! [dependencies]
//! tilewho = { version = "0.1.0", features = ["python-diff"] }
//! ```
//!
//! ### Strict Mode
//!
//! With the `strict` feature enabled, values that do not match the pattern of the pattern masking policy
//! are rejected with an error instead of being masked with a content-derived token.
//!
//! ### Logging and Error Handling
//!
//! All diagnostics go through the `tracing` crate. Malformed rows are never fatal: they are logged at
//! debug level and treated as carrying no text. Structural problems, such as a missing column, are
//! reported as errors before any output is written.
//!
//! ## Limitations
//!
//! - **Heuristic Attribution**: The residue is whatever the diff marks as inserted. Text the student
//!   typed that happens to equal copied characters is attributed to the copy.
//! - **Latest Copy Only**: When a tile is copied several times, attribution subtracts the latest copy.
//!   Audit pairs cover every copy.
//! - **Pseudonymization is not Anonymization**: Free-text columns may still identify people.

pub mod config;
pub mod event;
pub mod extract;
pub mod pipeline;
pub mod provenance;
pub mod pseudonymize;
pub mod utils;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod test_support;
