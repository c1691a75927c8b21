use serde_json::json;

use crate::event::LogRecord;

pub mod prelude {
    pub(crate) use super::proptest as proptest_support;
    pub(crate) use super::{copy_record, csv_input, edit_record};
    pub(crate) use proptest::prelude::*;
}

/// A `COPY_TILE` record copying `text` into `tile_id`.
pub fn copy_record(ordinal: usize, tile_id: &str, text: &str) -> LogRecord {
    let parameters = json!({
        "tileId": tile_id,
        "serializedObject": { "type": "Text", "text": text },
    });
    LogRecord::new(ordinal, "COPY_TILE", Some(parameters.to_string()))
}

/// A `TEXT_TOOL_CHANGE` record setting the text of `tile_id`.
pub fn edit_record(ordinal: usize, tile_id: &str, text: &str) -> LogRecord {
    let parameters = json!({
        "tileId": tile_id,
        "args": [ { "text": text } ],
    });
    LogRecord::new(ordinal, "TEXT_TOOL_CHANGE", Some(parameters.to_string()))
}

/// Render rows as CSV with a header line, quoting every field.
pub fn csv_input(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    writer.write_record(header).unwrap();
    for row in rows {
        writer.write_record(row).unwrap();
    }
    String::from_utf8(writer.into_inner().unwrap()).unwrap()
}

pub mod proptest {
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    fn key() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("text".to_string()),
            Just("children".to_string()),
            Just("nodes".to_string()),
            "[a-z]{1,6}",
        ]
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(Value::from),
            "[a-zA-Z .,!?]{0,12}".prop_map(Value::String),
        ]
    }

    /// Arbitrary JSON documents shaped like rich-text trees, never containing any of the `excluded` keys.
    pub fn json_without_keys(excluded: &[&str]) -> BoxedStrategy<Value> {
        let excluded: Vec<String> = excluded.iter().map(|key| key.to_string()).collect();

        leaf()
            .prop_recursive(4, 48, 5, move |inner| {
                let excluded = excluded.clone();
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
                    prop::collection::vec((key(), inner), 0..5).prop_map(move |entries| {
                        let map: Map<String, Value> = entries
                            .into_iter()
                            .filter(|(key, _)| !excluded.contains(key))
                            .collect();
                        Value::Object(map)
                    }),
                ]
            })
            .boxed()
    }
}
