use geo_ingest::catalog::GeographyCatalog;
use geo_ingest::geometry::{GeometryFailure, GeometryType};
use geo_ingest::ingestion::json::JsonSource;
use geo_ingest::ingestion::{IngestOptions, SourceOptions, ingest_from_path, load_source};
use geo_ingest::loader::{MemoryLoader, TableGeometry};
use geo_ingest::types::Value;

#[test]
fn geojson_objects_are_promoted_to_multipolygon() {
    let mut loader = MemoryLoader::new();
    let reports = ingest_from_path(
        "tests/fixtures/parks.json",
        &GeographyCatalog::builtin(),
        &mut loader,
        &SourceOptions::default(),
        &IngestOptions::default(),
    )
    .unwrap();

    let report = &reports[0];
    assert!(report.is_ok());
    assert_eq!(report.geography.as_deref(), Some("geojson_geometry"));
    assert_eq!(report.geometry_type, Some(GeometryType::MultiPolygon));
    assert_eq!(report.rows_loaded, 3);
    assert_eq!(report.rows_failed, 1);
    assert!(matches!(
        report.diagnostics[0].reason,
        GeometryFailure::MissingValue { ref column } if column == "geojson"
    ));

    let table = loader.table("parks").unwrap();
    assert_eq!(table.spec.columns, vec!["name"]);
    assert!(matches!(
        table.spec.geometry,
        TableGeometry::Typed {
            geometry_type: GeometryType::MultiPolygon,
            ..
        }
    ));

    let commons = table.records[0].geometry.as_ref().unwrap();
    assert_eq!(commons.geometry_type(), GeometryType::MultiPolygon);
    match commons.geometry() {
        geo_types::Geometry::MultiPolygon(mp) => assert_eq!(mp.0.len(), 1),
        other => panic!("expected a multipolygon, got {other:?}"),
    }
    match table.records[1].geometry.as_ref().unwrap().geometry() {
        geo_types::Geometry::MultiPolygon(mp) => assert_eq!(mp.0.len(), 2),
        other => panic!("expected a multipolygon, got {other:?}"),
    }
    assert_eq!(table.records[2].values[0], Value::Utf8("Unmapped".to_string()));
    assert!(table.records[2].geometry.is_none());
}

#[test]
fn unparseable_geojson_sheet_is_an_error_not_a_plain_table() {
    let mut loader = MemoryLoader::new();
    let reports = ingest_from_path(
        "tests/fixtures/broken_geojson.ndjson",
        &GeographyCatalog::builtin(),
        &mut loader,
        &SourceOptions::default(),
        &IngestOptions::default(),
    )
    .unwrap();

    let report = &reports[0];
    assert!(!report.is_ok());
    assert_eq!(report.table_name, "broken_geojson");
    assert_eq!(report.rows_failed, 2);
    assert!(loader.tables().is_empty());
    assert_eq!(loader.aborted(), ["broken_geojson".to_string()]);
}

#[test]
fn in_memory_json_with_coordinates() {
    let source = JsonSource::from_str(
        "stops",
        r#"[{"stop": "A", "lat": 45.5, "lng": -122.6}, {"stop": "B", "lat": 40, "lng": -74}]"#,
    );
    let mut loader = MemoryLoader::new();
    let reports = load_source(
        Box::new(source),
        &GeographyCatalog::builtin(),
        &mut loader,
        &IngestOptions::default(),
    )
    .unwrap();

    assert!(reports[0].is_ok());
    assert_eq!(reports[0].rows_failed, 0);
    let table = loader.table("stops").unwrap();
    assert_eq!(
        table.records[1].geometry.as_ref().unwrap().geometry(),
        &geo_types::Geometry::Point(geo_types::Point::new(-74.0, 40.0))
    );
}
