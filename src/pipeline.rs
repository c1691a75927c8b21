// SPDX-License-Identifier: MPL-2.0
//! Streams CSV log files through the provenance tracker and the pseudonymizer.
//!
//! Provenance runs read the input twice: the first pass keeps only the copy events in memory, the second
//! pass streams every row straight to the output. Fields are read without any length limit.

use std::io;

use csv::StringRecord;
use tracing::instrument;

use crate::{
    config::{ConfigError, PipelineConfig},
    event::LogRecord,
    provenance::{CopyIndexBuilder, ProvenanceTracker, TileCopyIndex},
    pseudonymize::{IdentifierMap, MappingFileError, PseudonymizeError, Pseudonymizer},
};

/// Columns appended by [`Pipeline::annotate_provenance`].
pub const PROVENANCE_COLUMNS: [&str; 3] = ["combinedText", "copiedText", "selfAuthoredText"];

/// Header of the output of [`Pipeline::audit_pairs`].
pub const AUDIT_COLUMNS: [&str; 4] = [
    "Matching Tile ID",
    "Student Edited Text",
    "Copied Text",
    "Final Student-Only Text",
];

const PROGRESS_INTERVAL: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("could not find column `{column}`; columns are: {}", available.join(", "))]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },
    #[error("input header changed between passes")]
    InputChanged,
    #[error("failed to mask column `{column}` on row {row}")]
    Mask {
        column: String,
        row: usize,
        #[source]
        source: PseudonymizeError,
    },
    #[error("I/O error")]
    Io(#[from] io::Error),
    #[error("CSV error")]
    Csv(#[from] csv::Error),
    #[error("mapping file error")]
    MappingFile(#[from] MappingFileError),
    #[error("configuration error")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Whether the input itself lacks something the run needs, as opposed to a runtime failure.
    pub fn is_structural(&self) -> bool {
        matches!(self, PipelineError::MissingColumn { .. })
    }
}

fn column_index(headers: &StringRecord, column: &str) -> Result<usize, PipelineError> {
    headers
        .iter()
        .position(|header| header == column)
        .ok_or_else(|| PipelineError::MissingColumn {
            column: column.to_string(),
            available: headers.iter().map(str::to_string).collect(),
        })
}

fn csv_reader<R: io::Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new().has_headers(true).from_reader(input)
}

fn csv_writer<W: io::Write>(output: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(output)
}

/// Positions of the columns a log record is built from.
#[derive(Debug, Clone)]
struct LogColumns<'c> {
    event: usize,
    parameters: usize,
    tile: Option<(usize, &'c str)>,
}

impl LogColumns<'_> {
    fn record(&self, ordinal: usize, row: &StringRecord) -> LogRecord {
        let parameters = row
            .get(self.parameters)
            .filter(|parameters| !parameters.is_empty())
            .map(str::to_string);
        let mut record = LogRecord::new(ordinal, row.get(self.event).unwrap_or_default(), parameters);
        if let Some((index, name)) = self.tile {
            record = record.with_field(name, row.get(index).unwrap_or_default());
        }
        record
    }

    fn event<'r>(&self, row: &'r StringRecord) -> &'r str {
        row.get(self.event).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvenanceSummary {
    pub rows: usize,
    pub copied_tiles: usize,
    pub text_edits: usize,
    /// Rows written to the audit output, if one was produced.
    pub pairs: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaskSummary {
    pub rows: usize,
    pub masked: usize,
    pub empty: usize,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    tracker: ProvenanceTracker,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let tracker = config.tracker();
        Self { config, tracker }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn log_columns<'c>(&'c self, headers: &StringRecord) -> Result<LogColumns<'c>, PipelineError> {
        let tile = match &self.config.tile_column {
            Some(name) => match headers.iter().position(|header| header == name) {
                Some(index) => Some((index, name.as_str())),
                None => {
                    tracing::debug!(
                        message = "Tile column not present, reading tile ids from the JSON parameters",
                        column = name.as_str()
                    );
                    None
                }
            },
            None => None,
        };

        Ok(LogColumns {
            event: column_index(headers, &self.config.event_column)?,
            parameters: column_index(headers, &self.config.json_column)?,
            tile,
        })
    }

    /// First pass over a file: index all copy events.
    #[instrument(skip_all)]
    pub fn build_index<R: io::Read>(
        &self,
        input: R,
    ) -> Result<(StringRecord, TileCopyIndex), PipelineError> {
        let mut reader = csv_reader(input);
        let headers = reader.headers()?.clone();
        let columns = self.log_columns(&headers)?;
        let copy_tag = self.config.event_tags.copy_tile.as_str();

        let mut builder = CopyIndexBuilder::new();
        let mut row = StringRecord::new();
        let mut ordinal = 0;
        while reader.read_record(&mut row)? {
            if columns.event(&row) == copy_tag {
                self.tracker.observe(&mut builder, &columns.record(ordinal, &row));
            }
            ordinal += 1;
            if ordinal % PROGRESS_INTERVAL == 0 {
                tracing::debug!(message = "Indexing copy events", rows = ordinal);
            }
        }

        let index = builder.freeze();
        tracing::info!(message = "Built copy index", rows = ordinal, tiles = index.len());
        Ok((headers, index))
    }

    /// Append `combinedText`, `copiedText` and `selfAuthoredText` to every row.
    ///
    /// `open` is called once per pass and must yield the same input both times.
    #[instrument(skip_all)]
    pub fn annotate_provenance<R, W, F>(
        &self,
        open: F,
        output: W,
    ) -> Result<ProvenanceSummary, PipelineError>
    where
        R: io::Read,
        W: io::Write,
        F: Fn() -> io::Result<R>,
    {
        let (first_headers, index) = self.build_index(open()?)?;

        let mut reader = csv_reader(open()?);
        let headers = reader.headers()?.clone();
        if headers != first_headers {
            return Err(PipelineError::InputChanged);
        }
        let columns = self.log_columns(&headers)?;
        let edit_tag = self.config.event_tags.text_change.as_str();

        let mut writer = csv_writer(output);
        writer.write_record(headers.iter().chain(PROVENANCE_COLUMNS))?;

        let mut summary = ProvenanceSummary {
            copied_tiles: index.len(),
            ..ProvenanceSummary::default()
        };
        let mut row = StringRecord::new();
        while reader.read_record(&mut row)? {
            let attribution = if columns.event(&row) == edit_tag {
                self.tracker
                    .attribute(&index, &columns.record(summary.rows, &row))
            } else {
                None
            };

            match &attribution {
                Some(attribution) => {
                    summary.text_edits += 1;
                    writer.write_record(row.iter().chain([
                        attribution.combined_text.as_str(),
                        attribution.copied_text.as_str(),
                        attribution.self_authored_text.as_str(),
                    ]))?;
                }
                None => writer.write_record(row.iter().chain(["", "", ""]))?,
            }

            summary.rows += 1;
            if summary.rows % PROGRESS_INTERVAL == 0 {
                tracing::debug!(message = "Attributing text edits", rows = summary.rows);
            }
        }
        writer.flush()?;

        tracing::info!(
            message = "Annotated text provenance",
            rows = summary.rows,
            text_edits = summary.text_edits,
            copied_tiles = summary.copied_tiles
        );
        Ok(summary)
    }

    /// Write one row per (text edit, copy event) pair sharing a tile, for audit review.
    #[instrument(skip_all)]
    pub fn audit_pairs<R, W, F>(&self, open: F, output: W) -> Result<ProvenanceSummary, PipelineError>
    where
        R: io::Read,
        W: io::Write,
        F: Fn() -> io::Result<R>,
    {
        let (first_headers, index) = self.build_index(open()?)?;

        let mut reader = csv_reader(open()?);
        let headers = reader.headers()?.clone();
        if headers != first_headers {
            return Err(PipelineError::InputChanged);
        }
        let columns = self.log_columns(&headers)?;
        let edit_tag = self.config.event_tags.text_change.as_str();

        let mut writer = csv_writer(output);
        writer.write_record(AUDIT_COLUMNS)?;

        let mut summary = ProvenanceSummary {
            copied_tiles: index.len(),
            ..ProvenanceSummary::default()
        };
        let mut row = StringRecord::new();
        while reader.read_record(&mut row)? {
            if columns.event(&row) == edit_tag {
                let record = columns.record(summary.rows, &row);
                if let Some(attribution) = self.tracker.attribute(&index, &record) {
                    summary.text_edits += 1;
                    for pair in self.tracker.pairs(&index, &attribution) {
                        writer.write_record([
                            pair.tile_id.as_str(),
                            pair.edited_text.as_str(),
                            pair.copied_text.as_str(),
                            pair.self_authored_text.as_str(),
                        ])?;
                        summary.pairs += 1;
                    }
                }
            }
            summary.rows += 1;
        }
        writer.flush()?;

        tracing::info!(
            message = "Wrote audit pairs",
            rows = summary.rows,
            pairs = summary.pairs
        );
        Ok(summary)
    }

    /// A pseudonymizer for the configured policy, preloaded from the mapping file if it exists.
    pub fn pseudonymizer(&self) -> Result<Pseudonymizer, PipelineError> {
        let policy = self.config.masking.policy()?;
        let mut map = IdentifierMap::for_policy(&policy);
        if let Some(path) = &self.config.masking.mapping_path {
            if path.exists() {
                map.read_path(path)?;
            }
        }
        Ok(Pseudonymizer::with_map(policy, map))
    }

    /// Write the pseudonymizer's map to the configured mapping file, if any.
    pub fn save_mapping(&self, pseudonymizer: &Pseudonymizer) -> Result<(), PipelineError> {
        if let Some(path) = &self.config.masking.mapping_path {
            pseudonymizer.map().save_path(path)?;
        }
        Ok(())
    }

    /// Replace the configured columns with masked tokens, in place.
    #[instrument(skip_all)]
    pub fn mask_columns<R: io::Read, W: io::Write>(
        &self,
        input: R,
        output: W,
        pseudonymizer: &mut Pseudonymizer,
    ) -> Result<MaskSummary, PipelineError> {
        let mut reader = csv_reader(input);
        let headers = reader.headers()?.clone();

        let targets = self
            .config
            .masking
            .columns
            .iter()
            .map(|column| column_index(&headers, column).map(|index| (index, column.as_str())))
            .collect::<Result<Vec<(usize, &str)>, PipelineError>>()?;
        if targets.is_empty() {
            tracing::warn!("No columns selected for masking, rows are copied unchanged");
        }

        let mut writer = csv_writer(output);
        writer.write_record(&headers)?;

        let mut summary = MaskSummary::default();
        let mut row = StringRecord::new();
        let mut masked_row = StringRecord::new();
        while reader.read_record(&mut row)? {
            masked_row.clear();
            for (index, field) in row.iter().enumerate() {
                let Some(&(_, space)) = targets.iter().find(|(target, _)| *target == index) else {
                    masked_row.push_field(field);
                    continue;
                };

                let masked = pseudonymizer
                    .mask(space, field)
                    .map_err(|source| PipelineError::Mask {
                        column: space.to_string(),
                        row: summary.rows,
                        source,
                    })?;
                if masked.token().is_some() {
                    summary.masked += 1;
                } else {
                    summary.empty += 1;
                }
                masked_row.push_field(masked.as_field());
            }
            writer.write_record(&masked_row)?;

            summary.rows += 1;
            if summary.rows % PROGRESS_INTERVAL == 0 {
                tracing::debug!(message = "Masking rows", rows = summary.rows);
            }
        }
        writer.flush()?;

        tracing::info!(
            message = "Masked columns",
            rows = summary.rows,
            masked = summary.masked,
            empty = summary.empty,
            mapping_entries = pseudonymizer.map().len()
        );
        Ok(summary)
    }
}
