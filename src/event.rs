// SPDX-License-Identifier: MPL-2.0
use compact_str::CompactString;
use serde_json::Value;

use crate::extract::TEXT_KEY;

/// Identifier of a tile (an addressable content unit such as a text box).
///
/// Empty identifiers are represented as `None` wherever a `TileId` is optional, so that rows without a
/// tile never correlate with each other.
pub type TileId = CompactString;

/// Turn a raw identifier into a `TileId`, mapping empty (or blank) values to `None`.
pub fn tile_id(raw: &str) -> Option<TileId> {
    let raw = raw.trim();
    if raw.is_empty() {
        None
    } else {
        Some(TileId::from(raw))
    }
}

/// One row of an exported interaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Position of the row in its file.
    pub ordinal: usize,
    pub event: String,
    /// Raw JSON parameters. May be absent or malformed.
    pub parameters: Option<String>,
    fields: Vec<(CompactString, String)>,
}

impl LogRecord {
    pub fn new(ordinal: usize, event: impl Into<String>, parameters: Option<String>) -> Self {
        Self {
            ordinal,
            event: event.into(),
            parameters,
            fields: Vec::new(),
        }
    }

    /// Attach an additional named column value.
    pub fn with_field(mut self, name: impl Into<CompactString>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Text extracted from a single log record.
///
/// Payloads are still JSON-encoded (or plain) text and need to be flattened with
/// [`crate::extract::flatten_payload`] before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedText {
    TextEdit {
        tile_id: Option<TileId>,
        payload: String,
    },
    CopyEvent {
        tile_id: Option<TileId>,
        payload: String,
    },
    None,
}

impl ExtractedText {
    pub fn tile_id(&self) -> Option<&TileId> {
        match self {
            ExtractedText::TextEdit { tile_id, .. } | ExtractedText::CopyEvent { tile_id, .. } => {
                tile_id.as_ref()
            }
            ExtractedText::None => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ExtractedText::None)
    }

    fn override_tile_id(&mut self, tile: TileId) {
        match self {
            ExtractedText::TextEdit { tile_id, .. } | ExtractedText::CopyEvent { tile_id, .. } => {
                *tile_id = Some(tile);
            }
            ExtractedText::None => {}
        }
    }
}

/// Event-type tags the classifier reacts to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct EventTags {
    pub text_change: String,
    pub copy_tile: String,
}

impl Default for EventTags {
    fn default() -> Self {
        Self {
            text_change: "TEXT_TOOL_CHANGE".to_string(),
            copy_tile: "COPY_TILE".to_string(),
        }
    }
}

/// Key of the embedded object carried by copy events.
const SERIALIZED_OBJECT_KEY: &str = "serializedObject";

enum EventKind {
    TextEdit,
    Copy,
}

/// Classify an event by its tag and raw JSON parameters.
///
/// Never fails: unknown tags, malformed JSON and unexpected shapes all yield [`ExtractedText::None`].
pub fn classify_event(
    event: &str,
    parameters: &str,
    tags: &EventTags,
    tile_key: &str,
) -> ExtractedText {
    let kind = if event == tags.text_change {
        EventKind::TextEdit
    } else if event == tags.copy_tile {
        EventKind::Copy
    } else {
        return ExtractedText::None;
    };

    let parameters: Value = match serde_json::from_str(parameters) {
        Ok(parameters) => parameters,
        Err(err) => {
            tracing::debug!(message = "Ignoring event with malformed parameters", event, error = %err);
            return ExtractedText::None;
        }
    };

    let tile_id = parameters.get(tile_key).and_then(|raw| match raw {
        Value::String(s) => tile_id(s),
        Value::Number(n) => tile_id(&n.to_string()),
        _ => None,
    });

    match kind {
        EventKind::TextEdit => match text_edit_payload(&parameters) {
            Some(payload) => ExtractedText::TextEdit { tile_id, payload },
            None => ExtractedText::None,
        },
        EventKind::Copy => match copy_payload(&parameters) {
            Some(payload) => ExtractedText::CopyEvent { tile_id, payload },
            None => ExtractedText::None,
        },
    }
}

fn text_edit_payload(parameters: &Value) -> Option<String> {
    let first = parameters.get("args")?.as_array()?.first()?;
    let text = first.as_object()?.get(TEXT_KEY)?;

    Some(match text {
        Value::String(text) => text.clone(),
        // list-valued text fields are log noise, not authored content
        Value::Array(_) => String::new(),
        Value::Object(_) => text.to_string(),
        _ => String::new(),
    })
}

fn copy_payload(parameters: &Value) -> Option<String> {
    let parsed: Value;
    let object = match parameters.get(SERIALIZED_OBJECT_KEY)? {
        Value::Object(object) => object,
        // some exports double-encode the embedded object
        Value::String(encoded) => {
            parsed = serde_json::from_str(encoded).ok()?;
            parsed.as_object()?
        }
        _ => return None,
    };

    if object.get("type")?.as_str()? != "Text" {
        return None;
    }

    match object.get(TEXT_KEY)? {
        Value::String(text) => Some(text.clone()),
        text @ (Value::Object(_) | Value::Array(_)) => Some(text.to_string()),
        _ => None,
    }
}

/// Classifies log records, resolving tile identifiers from a column or from the parameters.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    pub tags: EventTags,
    /// Key of the tile identifier inside the parameters JSON.
    pub tile_key: String,
    /// Column carrying the tile identifier. Takes precedence over `tile_key` when non-empty.
    pub tile_column: Option<String>,
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self {
            tags: EventTags::default(),
            tile_key: "tileId".to_string(),
            tile_column: None,
        }
    }
}

impl EventClassifier {
    pub fn classify(&self, record: &LogRecord) -> ExtractedText {
        let Some(parameters) = record.parameters.as_deref() else {
            return ExtractedText::None;
        };

        let mut extracted = classify_event(&record.event, parameters, &self.tags, &self.tile_key);

        if let Some(tile) = self
            .tile_column
            .as_deref()
            .and_then(|column| record.field(column))
            .and_then(tile_id)
        {
            extracted.override_tile_id(tile);
        }

        extracted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(event: &str, parameters: &str) -> ExtractedText {
        classify_event(event, parameters, &EventTags::default(), "tileId")
    }

    #[test]
    fn test_text_edit() {
        let extracted = classify(
            "TEXT_TOOL_CHANGE",
            r#"{"tileId":"t1","args":[{"text":"hi there friend"}]}"#,
        );
        assert_eq!(
            extracted,
            ExtractedText::TextEdit {
                tile_id: Some("t1".into()),
                payload: "hi there friend".to_string()
            }
        );
    }

    #[test]
    fn test_text_edit_with_list_text_is_empty() {
        let extracted = classify(
            "TEXT_TOOL_CHANGE",
            r#"{"tileId":"t2","args":[{"text":["a","b"]}]}"#,
        );
        assert_eq!(
            extracted,
            ExtractedText::TextEdit {
                tile_id: Some("t2".into()),
                payload: String::new()
            }
        );
    }

    #[test]
    fn test_text_edit_with_document_text() {
        let extracted = classify(
            "TEXT_TOOL_CHANGE",
            r#"{"args":[{"text":{"document":{"nodes":[{"text":"x"}]}}}]}"#,
        );
        assert_eq!(
            extracted,
            ExtractedText::TextEdit {
                tile_id: None,
                payload: r#"{"document":{"nodes":[{"text":"x"}]}}"#.to_string()
            }
        );
    }

    #[test]
    fn test_text_edit_requires_args() {
        for parameters in [
            r#"{"tileId":"t1"}"#,
            r#"{"tileId":"t1","args":[]}"#,
            r#"{"tileId":"t1","args":"text"}"#,
            r#"{"tileId":"t1","args":[{"operation":"insert"}]}"#,
            r#"{"tileId":"t1","args":["text"]}"#,
        ] {
            assert!(classify("TEXT_TOOL_CHANGE", parameters).is_none(), "{parameters}");
        }
    }

    #[test]
    fn test_copy_event() {
        let extracted = classify(
            "COPY_TILE",
            r#"{"tileId":"t1","serializedObject":{"type":"Text","text":"hi there"}}"#,
        );
        assert_eq!(
            extracted,
            ExtractedText::CopyEvent {
                tile_id: Some("t1".into()),
                payload: "hi there".to_string()
            }
        );
    }

    #[test]
    fn test_copy_event_double_encoded() {
        let extracted = classify(
            "COPY_TILE",
            r#"{"tileId":"t1","serializedObject":"{\"type\":\"Text\",\"text\":\"hi\"}"}"#,
        );
        assert_eq!(extracted.tile_id().map(|t| t.as_str()), Some("t1"));
        assert!(matches!(extracted, ExtractedText::CopyEvent { payload, .. } if payload == "hi"));
    }

    #[test]
    fn test_copy_of_non_text_tile() {
        let extracted = classify(
            "COPY_TILE",
            r#"{"tileId":"t1","serializedObject":{"type":"Geometry","text":"label"}}"#,
        );
        assert!(extracted.is_none());
    }

    #[test]
    fn test_malformed_and_unrelated() {
        assert!(classify("COPY_TILE", "{not json").is_none());
        assert!(classify("TEXT_TOOL_CHANGE", "").is_none());
        assert!(classify("OPEN_DOCUMENT", r#"{"args":[{"text":"x"}]}"#).is_none());
    }

    #[test]
    fn test_empty_tile_id_is_absent() {
        let extracted = classify("TEXT_TOOL_CHANGE", r#"{"tileId":"","args":[{"text":"x"}]}"#);
        assert_eq!(extracted.tile_id(), None);

        let extracted = classify("TEXT_TOOL_CHANGE", r#"{"tileId":42,"args":[{"text":"x"}]}"#);
        assert_eq!(extracted.tile_id().map(|t| t.as_str()), Some("42"));
    }

    #[test]
    fn test_classifier_prefers_tile_column() {
        let classifier = EventClassifier {
            tile_column: Some("tileId".to_string()),
            ..EventClassifier::default()
        };

        let record = LogRecord::new(
            0,
            "TEXT_TOOL_CHANGE",
            Some(r#"{"tileId":"from-json","args":[{"text":"x"}]}"#.to_string()),
        )
        .with_field("tileId", "from-column");
        assert_eq!(
            classifier.classify(&record).tile_id().map(|t| t.as_str()),
            Some("from-column")
        );

        let record = LogRecord::new(
            1,
            "TEXT_TOOL_CHANGE",
            Some(r#"{"tileId":"from-json","args":[{"text":"x"}]}"#.to_string()),
        )
        .with_field("tileId", "");
        assert_eq!(
            classifier.classify(&record).tile_id().map(|t| t.as_str()),
            Some("from-json")
        );

        let record = LogRecord::new(2, "TEXT_TOOL_CHANGE", None).with_field("tileId", "t9");
        assert!(classifier.classify(&record).is_none());
    }

    #[test]
    fn test_custom_tags() {
        let tags = EventTags {
            text_change: "EDIT".to_string(),
            copy_tile: "DUPLICATE".to_string(),
        };
        let extracted = classify_event("EDIT", r#"{"args":[{"text":"x"}]}"#, &tags, "tileId");
        assert!(matches!(extracted, ExtractedText::TextEdit { .. }));
        let extracted = classify_event("TEXT_TOOL_CHANGE", r#"{"args":[{"text":"x"}]}"#, &tags, "tileId");
        assert!(extracted.is_none());
    }
}
