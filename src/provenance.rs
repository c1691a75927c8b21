// SPDX-License-Identifier: MPL-2.0
//! Reconstructs which parts of a student's text were typed and which were copied.
//!
//! Copy events and text edits of the same tile can appear in any order in a log, so attribution is done in
//! two passes: the first pass builds a [`TileCopyIndex`] from all copy events, the second resolves every
//! text edit against the complete, frozen index.
//!
//! The result is a textual heuristic, not proof of authorship. It misattributes when copied text was edited
//! before the next logged change, or when several tiles hold identical text.

use rustc_hash::FxHashMap;

use crate::{
    event::{EventClassifier, ExtractedText, LogRecord, TileId},
    extract::{flatten_payload, OpaqueKeys},
    utils::{char_diff, char_offsets, DiffAlgorithm},
};

/// Remove the parts of `target` that are aligned with `source`.
///
/// Computes the edit script from `source` to `target` and concatenates, in order, the spans of `target`
/// that are inserted or replaced. Equal and deleted spans are dropped. If either input is empty `target`
/// is returned unchanged.
pub fn align(algorithm: DiffAlgorithm, source: &str, target: &str) -> String {
    if source.is_empty() || target.is_empty() {
        return target.to_string();
    }

    let offsets = char_offsets(target);
    let mut residue = String::new();
    for hunk in char_diff(algorithm, source, target) {
        if hunk.after.is_empty() {
            continue;
        }
        let start = offsets[hunk.after.start as usize];
        let end = offsets[hunk.after.end as usize];
        residue.push_str(&target[start..end]);
    }
    residue
}

/// Flattened text of one copy event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySnapshot {
    pub ordinal: usize,
    pub text: String,
}

/// Collects copy events during the first pass.
#[derive(Debug, Default)]
pub struct CopyIndexBuilder {
    copies: FxHashMap<TileId, Vec<CopySnapshot>>,
}

impl CopyIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a classified event. Anything but a copy event with a tile id is ignored.
    pub fn observe(&mut self, ordinal: usize, extracted: &ExtractedText, opaque: &OpaqueKeys) {
        let ExtractedText::CopyEvent {
            tile_id: Some(tile_id),
            payload,
        } = extracted
        else {
            return;
        };

        let snapshot = CopySnapshot {
            ordinal,
            text: flatten_payload(payload, opaque),
        };

        let history = self.copies.entry(tile_id.clone()).or_default();
        if !history.is_empty() {
            tracing::debug!(
                message = "Tile copied more than once, latest copy wins",
                tile_id = tile_id.as_str(),
                ordinal
            );
        }
        history.push(snapshot);
    }

    pub fn freeze(self) -> TileCopyIndex {
        TileCopyIndex {
            copies: self.copies,
        }
    }
}

/// Tile id to copied text, complete for a whole file. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct TileCopyIndex {
    copies: FxHashMap<TileId, Vec<CopySnapshot>>,
}

impl TileCopyIndex {
    /// The latest copied text for `tile_id`, or `""` if the tile was never copied or is absent.
    pub fn get(&self, tile_id: Option<&str>) -> &str {
        self.latest(tile_id).map_or("", |snapshot| snapshot.text.as_str())
    }

    pub fn latest(&self, tile_id: Option<&str>) -> Option<&CopySnapshot> {
        self.history(tile_id).last()
    }

    /// All copies of `tile_id` in log order.
    pub fn history(&self, tile_id: Option<&str>) -> &[CopySnapshot] {
        tile_id
            .and_then(|tile_id| self.copies.get(tile_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of tiles with at least one copy.
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }
}

/// Attribution of one text edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub ordinal: usize,
    pub tile_id: Option<TileId>,
    /// All text of the edit, flattened.
    pub combined_text: String,
    /// Latest text copied into the tile, flattened.
    pub copied_text: String,
    /// What remains of `combined_text` after removing spans aligned with `copied_text`.
    pub self_authored_text: String,
}

/// A text edit paired with one copy event of the same tile, for audit review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditPair {
    pub tile_id: TileId,
    pub edit_ordinal: usize,
    pub copy_ordinal: usize,
    pub edited_text: String,
    pub copied_text: String,
    pub self_authored_text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProvenanceTracker {
    pub classifier: EventClassifier,
    pub opaque: OpaqueKeys,
    pub algorithm: DiffAlgorithm,
}

impl ProvenanceTracker {
    pub fn new(classifier: EventClassifier, opaque: OpaqueKeys, algorithm: DiffAlgorithm) -> Self {
        Self {
            classifier,
            opaque,
            algorithm,
        }
    }

    /// First pass: index every copy event.
    pub fn build_index<'r>(&self, records: impl IntoIterator<Item = &'r LogRecord>) -> TileCopyIndex {
        let mut builder = CopyIndexBuilder::new();
        for record in records {
            self.observe(&mut builder, record);
        }
        builder.freeze()
    }

    /// First pass, one record at a time. Useful when records are streamed.
    pub fn observe(&self, builder: &mut CopyIndexBuilder, record: &LogRecord) {
        let extracted = self.classifier.classify(record);
        builder.observe(record.ordinal, &extracted, &self.opaque);
    }

    /// Second pass: attribute a single record. Returns `None` for anything but a text edit.
    pub fn attribute(&self, index: &TileCopyIndex, record: &LogRecord) -> Option<Attribution> {
        let ExtractedText::TextEdit { tile_id, payload } = self.classifier.classify(record) else {
            return None;
        };

        let combined_text = flatten_payload(&payload, &self.opaque);
        let copied_text = index.get(tile_id.as_deref()).to_string();
        let self_authored_text = self.self_authored(&copied_text, &combined_text);

        Some(Attribution {
            ordinal: record.ordinal,
            tile_id,
            combined_text,
            copied_text,
            self_authored_text,
        })
    }

    fn self_authored(&self, copied_text: &str, combined_text: &str) -> String {
        align(self.algorithm, copied_text, combined_text).trim().to_string()
    }

    /// Run both passes over an in-memory set of records.
    pub fn run(&self, records: &[LogRecord]) -> (TileCopyIndex, Vec<Attribution>) {
        let index = self.build_index(records);
        tracing::debug!(message = "Built copy index", tiles = index.len());

        let attributions = records
            .iter()
            .filter_map(|record| self.attribute(&index, record))
            .collect();
        (index, attributions)
    }

    /// Pair an attribution with every copy of its tile, in log order.
    ///
    /// Unlike [`Self::attribute`], which subtracts only the latest copy, each pair subtracts the copy it
    /// was joined with.
    pub fn pairs(&self, index: &TileCopyIndex, attribution: &Attribution) -> Vec<AuditPair> {
        let Some(tile_id) = &attribution.tile_id else {
            return Vec::new();
        };

        index
            .history(Some(tile_id.as_str()))
            .iter()
            .map(|copy| AuditPair {
                tile_id: tile_id.clone(),
                edit_ordinal: attribution.ordinal,
                copy_ordinal: copy.ordinal,
                edited_text: attribution.combined_text.clone(),
                copied_text: copy.text.clone(),
                self_authored_text: self.self_authored(&copy.text, &attribution.combined_text),
            })
            .collect()
    }
}
