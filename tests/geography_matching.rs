use geo_ingest::catalog::{GeographyCatalog, GeographyKind};
use geo_ingest::CatalogError;
use geo_ingest::ingestion::{IngestOptions, MemorySource, load_source};
use geo_ingest::loader::MemoryLoader;
use geo_ingest::matcher::{best_match, match_all, rank_matches};
use geo_ingest::types::{ColumnSet, Value};

const DISJOINT: &str = r#"[
  {"name": "us_states", "fields": {"state": {"potential_names": ["state", "state_name"]}}, "rank": 5},
  {"name": "zip_codes", "fields": {"zip": {"potential_names": ["zip", "postal_code"]}}, "rank": 5},
  {"name": "school_districts", "fields": {"district": {"potential_names": ["district_id"]}}, "rank": 5}
]"#;

#[test]
fn disjoint_definitions_match_exclusively() {
    let catalog = GeographyCatalog::from_json_str(DISJOINT).unwrap();
    let cases = [
        (vec!["State Name", "total"], "us_states"),
        (vec!["Postal-Code", "total"], "zip_codes"),
        (vec!["DISTRICT_ID"], "school_districts"),
    ];
    for (headers, expected) in cases {
        let columns = ColumnSet::from_headers(headers);
        let matches = match_all(&catalog, &columns);
        assert_eq!(matches.len(), 1, "{expected}");
        assert_eq!(matches[0].definition.name, expected);
    }
}

#[test]
fn tie_break_is_deterministic_across_runs() {
    let catalog = GeographyCatalog::from_json_str(DISJOINT).unwrap();
    let columns = ColumnSet::from_headers(["zip", "state", "district_id"]);
    let first = rank_matches(&catalog, &columns);
    let names: Vec<&str> = first.iter().map(|m| m.definition.name.as_str()).collect();
    assert_eq!(names, vec!["us_states", "zip_codes", "school_districts"]);

    for _ in 0..16 {
        let again = best_match(&catalog, &columns).unwrap();
        assert_eq!(again.definition.name, "us_states");
    }
}

#[test]
fn builtins_win_ties_against_configured_signals() {
    let catalog = GeographyCatalog::from_json_str(
        r#"[{"name": "site_points", "kind": "coordinates", "fields": {
            "latitude": {"potential_names": ["northing"]},
            "longitude": {"potential_names": ["easting"]}
        }, "rank": 1000}]"#,
    )
    .unwrap()
    .with_builtin_signals();

    // The configured coordinate definition replaces the built-in one.
    assert_eq!(catalog.signal(GeographyKind::Coordinates).unwrap().name, "site_points");
    assert!(catalog.get("wkt_geometry").is_some());
    assert_eq!(catalog.iter().last().unwrap().name, "site_points");
}

#[test]
fn invalid_catalogs_are_rejected() {
    let zero_rank = r#"[{"name": "a", "fields": {"f": {"potential_names": ["f"]}}, "rank": 0}]"#;
    let no_fields = r#"[{"name": "a", "fields": {}, "rank": 1}]"#;
    let blank_alias = r#"[{"name": "a", "fields": {"f": {"potential_names": ["--"]}}, "rank": 1}]"#;
    let duplicate = r#"[
        {"name": "a", "fields": {"f": {"potential_names": ["f"]}}, "rank": 1},
        {"name": "a", "fields": {"g": {"potential_names": ["g"]}}, "rank": 2}
    ]"#;
    for input in [zero_rank, no_fields, blank_alias, duplicate] {
        let err = GeographyCatalog::from_json_str(input).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid { .. }), "{input}: {err}");
    }
    assert!(matches!(
        GeographyCatalog::from_json_str("{").unwrap_err(),
        CatalogError::Parse(_)
    ));
}

#[test]
fn sheets_of_one_source_are_processed_independently() {
    let text = |s: &str| Value::Utf8(s.to_string());
    let source = MemorySource::new("upload")
        .with_sheet("Good", &["lat", "lon"], vec![vec![text("1"), text("2")]])
        .with_sheet("Bad", &["lat", "lon"], vec![vec![text("x"), text("y")]])
        .with_sheet("Plain", &["name"], vec![vec![text("n")]]);

    let mut loader = MemoryLoader::new();
    let reports = load_source(
        Box::new(source),
        &GeographyCatalog::builtin(),
        &mut loader,
        &IngestOptions::default(),
    )
    .unwrap();

    let statuses: Vec<(&str, bool)> = reports.iter().map(|r| (r.table_name.as_str(), r.is_ok())).collect();
    assert_eq!(statuses, vec![("good", true), ("bad", false), ("plain", true)]);
    assert_eq!(loader.tables().len(), 2);
}

#[cfg(feature = "deep_tests")]
#[test]
fn large_sheet_keeps_row_order_across_chunks() {
    use geo_ingest::execution::ExecutionOptions;

    let rows: Vec<Vec<Value>> = (0..200_000)
        .map(|i| {
            vec![
                Value::Float64((i % 180) as f64 - 90.0),
                Value::Float64((i % 360) as f64 - 180.0),
                Value::Int64(i),
            ]
        })
        .collect();
    let source = MemorySource::single("big", &["lat", "lon", "id"], rows);
    let options = IngestOptions {
        execution: ExecutionOptions {
            num_threads: Some(4),
            chunk_size: 1024,
        },
        ..Default::default()
    };

    let mut loader = MemoryLoader::new();
    let reports = load_source(Box::new(source), &GeographyCatalog::builtin(), &mut loader, &options).unwrap();
    assert!(reports[0].is_ok());
    assert_eq!(reports[0].rows_failed, 0);

    let table = loader.table("big").unwrap();
    assert_eq!(table.records.len(), 200_000);
    for (i, record) in table.records.iter().enumerate() {
        assert_eq!(record.row, i + 1);
        assert_eq!(record.values[2], Value::Int64(i as i64));
    }
}
