//! End-to-end runs of the pipeline over CSV input.

use std::io::Cursor;

use crate::{
    config::{MaskPolicyKind, PipelineConfig},
    pipeline::Pipeline,
    pseudonymize::{content_token, IdentifierMap},
    test_support::prelude::*,
};

const HEADER: &[&str] = &["application", "event", "parameters", "tileId", "student_name"];

fn row(event: &str, parameters: &str, tile_id: &str, student: &str) -> Vec<String> {
    ["CLUE", event, parameters, tile_id, student]
        .iter()
        .map(|field| field.to_string())
        .collect()
}

fn read_rows(output: &[u8]) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_reader(output);
    let mut rows = vec![reader
        .headers()
        .unwrap()
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>()];
    for record in reader.records() {
        rows.push(record.unwrap().iter().map(str::to_string).collect());
    }
    rows
}

fn sample_log() -> String {
    csv_input(
        HEADER,
        &[
            row("OPEN_DOCUMENT", r#"{"documentKey":"doc-1"}"#, "", "Ann"),
            row(
                "TEXT_TOOL_CHANGE",
                r#"{"tileId":"t1","args":[{"text":"hi there friend"}]}"#,
                "t1",
                "Ann",
            ),
            row(
                "COPY_TILE",
                r#"{"tileId":"t1","serializedObject":{"type":"Text","text":"hi there"}}"#,
                "t1",
                "Ben",
            ),
            row("TEXT_TOOL_CHANGE", "{broken json", "t1", ""),
            row(
                "TEXT_TOOL_CHANGE",
                r#"{"args":[{"text":"all my own words"}]}"#,
                "t2",
                "Ann",
            ),
        ],
    )
}

#[test]
fn test_annotate_provenance() {
    let input = sample_log();
    let pipeline = Pipeline::new(PipelineConfig::default());

    let mut output = Vec::new();
    let summary = pipeline
        .annotate_provenance(|| Ok(Cursor::new(input.as_bytes())), &mut output)
        .unwrap();

    assert_eq!(summary.rows, 5);
    assert_eq!(summary.copied_tiles, 1);
    assert_eq!(summary.text_edits, 2);

    let rows = read_rows(&output);
    assert_eq!(
        rows[0],
        vec![
            "application",
            "event",
            "parameters",
            "tileId",
            "student_name",
            "combinedText",
            "copiedText",
            "selfAuthoredText"
        ]
    );
    // the copy event comes after the edit in the log
    assert_eq!(rows[2][5..], ["hi there friend", "hi there", "friend"]);
    assert_eq!(rows[1][5..], ["", "", ""]);
    assert_eq!(rows[3][5..], ["", "", ""]);
    assert_eq!(rows[4][5..], ["", "", ""]);
    assert_eq!(rows[5][5..], ["all my own words", "", "all my own words"]);
    // original columns pass through untouched
    assert_eq!(rows[4][2], "{broken json");
}

#[test]
fn test_audit_pairs() {
    let input = sample_log();
    let pipeline = Pipeline::new(PipelineConfig::default());

    let mut output = Vec::new();
    let summary = pipeline
        .audit_pairs(|| Ok(input.as_bytes()), &mut output)
        .unwrap();
    assert_eq!(summary.pairs, 1);

    let rows = read_rows(&output);
    assert_eq!(
        rows,
        vec![
            vec![
                "Matching Tile ID",
                "Student Edited Text",
                "Copied Text",
                "Final Student-Only Text"
            ],
            vec!["t1", "hi there friend", "hi there", "friend"],
        ]
    );
}

#[test]
fn test_tile_id_from_json_without_column() {
    let input = csv_input(
        &["event", "parameters"],
        &[
            vec![
                "TEXT_TOOL_CHANGE".to_string(),
                r#"{"tileId":"5","args":[{"text":"hello world today"}]}"#.to_string(),
            ],
            vec![
                "COPY_TILE".to_string(),
                r#"{"tileId":"5","serializedObject":{"type":"Text","text":"hello world"}}"#
                    .to_string(),
            ],
        ],
    );
    let pipeline = Pipeline::new(PipelineConfig::default());

    let mut output = Vec::new();
    pipeline
        .annotate_provenance(|| Ok(input.as_bytes()), &mut output)
        .unwrap();

    let rows = read_rows(&output);
    assert_eq!(rows[1][2..], ["hello world today", "hello world", "today"]);
}

#[test]
fn test_large_fields_are_not_truncated() {
    let text = "word ".repeat(3 * 1024 * 1024);
    let parameters = serde_json::json!({ "tileId": "big", "args": [ { "text": text } ] }).to_string();
    let input = csv_input(
        &["event", "parameters"],
        &[vec!["TEXT_TOOL_CHANGE".to_string(), parameters]],
    );
    let pipeline = Pipeline::new(PipelineConfig::default());

    let mut output = Vec::new();
    pipeline
        .annotate_provenance(|| Ok(input.as_bytes()), &mut output)
        .unwrap();

    let rows = read_rows(&output);
    assert_eq!(rows[1][2].len(), text.trim().len());
    assert_eq!(rows[1][4].len(), text.trim().len());
}

#[test]
fn test_mask_columns() {
    let input = sample_log();
    let mut config = PipelineConfig::default();
    config.masking.columns = vec!["student_name".to_string()];
    let pipeline = Pipeline::new(config);
    let mut pseudonymizer = pipeline.pseudonymizer().unwrap();

    let mut output = Vec::new();
    let summary = pipeline
        .mask_columns(input.as_bytes(), &mut output, &mut pseudonymizer)
        .unwrap();
    assert_eq!(summary.rows, 5);
    assert_eq!(summary.masked, 4);
    assert_eq!(summary.empty, 1);

    let rows = read_rows(&output);
    let ann = content_token("Ann", None);
    let ben = content_token("Ben", None);
    let masked: Vec<&str> = rows[1..].iter().map(|row| row[4].as_str()).collect();
    assert_eq!(masked, vec![ann.as_str(), ann.as_str(), ben.as_str(), "", ann.as_str()]);
    assert_eq!(rows[0], HEADER);

    // originals never reach the primary output
    let output = String::from_utf8(output).unwrap();
    assert!(!output.contains("Ann") && !output.contains("Ben"));
}

#[test]
fn test_masking_is_stable_across_runs() {
    let input = sample_log();
    let mapping = std::env::temp_dir().join(format!(
        "tilewho-mapping-{}-{}.csv",
        std::process::id(),
        line!()
    ));
    let _ = std::fs::remove_file(&mapping);

    let mut config = PipelineConfig::default();
    config.masking.columns = vec!["student_name".to_string()];
    config.masking.policy = MaskPolicyKind::Random;
    config.masking.mapping_path = Some(mapping.clone());
    let pipeline = Pipeline::new(config);

    let mut runs = Vec::new();
    for _ in 0..2 {
        let mut pseudonymizer = pipeline.pseudonymizer().unwrap();
        let mut output = Vec::new();
        pipeline
            .mask_columns(input.as_bytes(), &mut output, &mut pseudonymizer)
            .unwrap();
        pipeline.save_mapping(&pseudonymizer).unwrap();
        runs.push(output);
    }
    assert_eq!(runs[0], runs[1]);

    let map = IdentifierMap::load_path(&mapping).unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map.entries()[0].original, "Ann");
    assert_eq!(map.entries()[0].space, "student_name");
    std::fs::remove_file(&mapping).unwrap();
}

#[test]
fn test_mask_instructor_ids() {
    let input = csv_input(
        &["event", "instructor"],
        &[
            vec!["OPEN_DOCUMENT".to_string(), "Jane Doe (12345)".to_string()],
            vec![
                "OPEN_DOCUMENT".to_string(),
                "Jane Doe (12345), Bob Roe (999)".to_string(),
            ],
            vec!["OPEN_DOCUMENT".to_string(), "Bob Roe (999)".to_string()],
        ],
    );
    let mapping = std::env::temp_dir().join(format!(
        "tilewho-mapping-{}-{}.csv",
        std::process::id(),
        line!()
    ));
    let _ = std::fs::remove_file(&mapping);

    let mut config = PipelineConfig::default();
    config.masking.columns = vec!["instructor".to_string()];
    config.masking.policy = MaskPolicyKind::Pattern;
    config.masking.pattern = Some(r"\d+".to_string());
    config.masking.mapping_path = Some(mapping.clone());
    let pipeline = Pipeline::new(config);

    // second run preloads the mapping written by the first
    for _ in 0..2 {
        let mut pseudonymizer = pipeline.pseudonymizer().unwrap();
        let mut output = Vec::new();
        let summary = pipeline
            .mask_columns(input.as_bytes(), &mut output, &mut pseudonymizer)
            .unwrap();
        pipeline.save_mapping(&pseudonymizer).unwrap();
        assert_eq!(summary.masked, 3);

        let rows = read_rows(&output);
        let masked: Vec<&str> = rows[1..].iter().map(|row| row[1].as_str()).collect();
        assert_eq!(masked, vec!["12345", "12345", "999"]);
    }

    std::fs::remove_file(&mapping).unwrap();
}

#[cfg(feature = "python-diff")]
mod python {
    use crate::{provenance::align, utils::DiffAlgorithm};
    use proptest::prelude::*;

    #[test]
    fn test_scenarios_match_difflib() {
        for (source, target, expected) in [
            ("hi there", "hi there friend", " friend"),
            ("hello world", "hello world today", " today"),
            ("same", "same", ""),
            ("abc", "xyz", "xyz"),
        ] {
            assert_eq!(align(DiffAlgorithm::Python, source, target), expected);
            assert_eq!(align(DiffAlgorithm::Myers, source, target), expected);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 1000,
            ..ProptestConfig::default()
        })]
        #[test]
        fn appended_text_matches_difflib(copied in "[a-z ]{1,40}", typed in "[A-Z]{1,20}") {
            // uppercase can't align with the lowercase copy, so both algorithms must agree
            let target = format!("{copied}{typed}");
            prop_assert_eq!(
                align(DiffAlgorithm::Python, &copied, &target),
                align(DiffAlgorithm::Myers, &copied, &target)
            );
        }
    }
}
