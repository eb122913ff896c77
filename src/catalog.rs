//! Geography catalog: the externally configured list of geography definitions.
//!
//! The configuration payload is a JSON array in the same shape the upload service has always
//! used:
//!
//! ```json
//! [
//!   {
//!     "name": "us_states",
//!     "fields": { "state_name": { "potential_names": ["state", "state_name"] } },
//!     "rank": 4
//!   }
//! ]
//! ```
//!
//! An optional `"kind"` key (`coordinates`, `wkt`, `wkb`, `geojson`, `custom`) selects how a
//! match is turned into geometry. Without it the kind is derived from the reserved names
//! `latitude_and_longitude`, `wkt_geometry`, `wkb_geometry` and `geojson_geometry`; every other
//! definition is a [`GeographyKind::Custom`] map-service join.
//!
//! A catalog is validated once when loaded and is immutable afterwards. [`SharedCatalog`]
//! allows hot reload by whole replacement only.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::types::normalize_column_name;

/// Rank given to the built-in signal definitions.
pub const BUILTIN_RANK: u32 = 1000;

/// Logical field names used by coordinate-pair definitions.
pub const LATITUDE_FIELD: &str = "latitude";
pub const LONGITUDE_FIELD: &str = "longitude";

/// How a matched geography produces geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographyKind {
    /// Latitude/longitude column pair.
    Coordinates,
    /// Single well-known-text column.
    Wkt,
    /// Single well-known-binary column.
    Wkb,
    /// Single GeoJSON geometry column.
    #[serde(rename = "geojson")]
    GeoJson,
    /// Join against a map table named after the geography.
    Custom,
}

impl GeographyKind {
    fn from_reserved_name(name: &str) -> Self {
        match name {
            "latitude_and_longitude" => Self::Coordinates,
            "wkt_geometry" => Self::Wkt,
            "wkb_geometry" => Self::Wkb,
            "geojson_geometry" => Self::GeoJson,
            _ => Self::Custom,
        }
    }

    fn is_single_column(self) -> bool {
        matches!(self, Self::Wkt | Self::Wkb | Self::GeoJson)
    }
}

/// One logical field of a geography and the column spellings that satisfy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeographyField {
    pub name: String,
    /// Aliases in declaration order; the first one present in a source is the one bound.
    pub aliases: Vec<String>,
}

/// A named rule set describing how to recognize a geography from tabular columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeographyDefinition {
    pub name: String,
    pub kind: GeographyKind,
    pub fields: Vec<GeographyField>,
    /// Tie-break priority: the highest rank wins among full matches.
    pub rank: u32,
}

impl GeographyDefinition {
    pub fn field(&self, name: &str) -> Option<&GeographyField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check the rules every catalog entry must satisfy, however it was built.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |message: String| CatalogError::Invalid {
            geography: self.name.clone(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.rank == 0 {
            return Err(invalid("rank must be a positive integer, got 0".to_string()));
        }
        if self.fields.is_empty() {
            return Err(invalid("at least one field is required".to_string()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("field '{}' is declared twice", field.name)));
            }
            if field.aliases.is_empty() {
                return Err(invalid(format!("field '{}' has no potential_names", field.name)));
            }
            if let Some(bad) = field.aliases.iter().find(|a| normalize_column_name(a).is_empty()) {
                return Err(invalid(format!(
                    "field '{}' has an alias with no letters or digits: '{bad}'",
                    field.name
                )));
            }
        }

        match self.kind {
            GeographyKind::Coordinates => {
                for required in [LATITUDE_FIELD, LONGITUDE_FIELD] {
                    if self.field(required).is_none() {
                        return Err(invalid(format!(
                            "coordinate geographies need a '{required}' field"
                        )));
                    }
                }
            }
            k if k.is_single_column() && self.fields.len() != 1 => {
                return Err(invalid(format!(
                    "{k:?} geographies take exactly one field, got {}",
                    self.fields.len()
                )));
            }
            _ => {}
        }
        Ok(())
    }

    fn builtin(name: &str, kind: GeographyKind, fields: &[(&str, &[&str])]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            fields: fields
                .iter()
                .map(|(field, aliases)| GeographyField {
                    name: (*field).to_string(),
                    aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
                })
                .collect(),
            rank: BUILTIN_RANK,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawField {
    potential_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawGeography {
    name: String,
    #[serde(deserialize_with = "ordered_fields")]
    fields: Vec<(String, RawField)>,
    rank: i64,
    #[serde(default)]
    kind: Option<GeographyKind>,
}

/// Deserialize a JSON object into a `Vec` so field declaration order survives.
fn ordered_fields<'de, D>(deserializer: D) -> Result<Vec<(String, RawField)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FieldsVisitor;

    impl<'de> Visitor<'de> for FieldsVisitor {
        type Value = Vec<(String, RawField)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of logical field names to {\"potential_names\": [...]}")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, field)) = map.next_entry::<String, RawField>()? {
                out.push((name, field));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(FieldsVisitor)
}

impl RawGeography {
    fn validate(self) -> Result<GeographyDefinition, CatalogError> {
        let name = self.name.trim().to_string();
        let rank = u32::try_from(self.rank).map_err(|_| CatalogError::Invalid {
            geography: name.clone(),
            message: format!("rank must be a positive integer, got {}", self.rank),
        })?;
        let kind = self
            .kind
            .unwrap_or_else(|| GeographyKind::from_reserved_name(&name));
        let definition = GeographyDefinition {
            name,
            kind,
            fields: self
                .fields
                .into_iter()
                .map(|(field, raw)| GeographyField {
                    name: field,
                    aliases: raw.potential_names.into_iter().map(|a| a.trim().to_string()).collect(),
                })
                .collect(),
            rank,
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// Ordered, immutable list of geography definitions.
///
/// Declaration order is significant: it breaks ties between definitions of equal rank.
#[derive(Debug, Clone, Default)]
pub struct GeographyCatalog {
    definitions: Vec<Arc<GeographyDefinition>>,
}

impl GeographyCatalog {
    /// Build a catalog from already constructed definitions (validated the same way as JSON).
    pub fn new(definitions: Vec<GeographyDefinition>) -> Result<Self, CatalogError> {
        let mut names = HashSet::new();
        for d in &definitions {
            d.validate()?;
            if !names.insert(d.name.clone()) {
                return Err(CatalogError::Invalid {
                    geography: d.name.clone(),
                    message: "duplicate geography name".to_string(),
                });
            }
        }
        Ok(Self {
            definitions: definitions.into_iter().map(Arc::new).collect(),
        })
    }

    /// Parse and validate a catalog from its JSON payload.
    pub fn from_json_str(input: &str) -> Result<Self, CatalogError> {
        let raw: Vec<RawGeography> = serde_json::from_str(input)?;
        let definitions = raw
            .into_iter()
            .map(RawGeography::validate)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(definitions)
    }

    /// Parse and validate a catalog file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Load a catalog file and add the built-in signal definitions it does not declare.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        Ok(Self::from_path(path)?.with_builtin_signals())
    }

    /// The four built-in signal definitions: coordinates, WKT, WKB, GeoJSON.
    pub fn builtin() -> Self {
        Self {
            definitions: builtin_definitions().into_iter().map(Arc::new).collect(),
        }
    }

    /// Prepend built-in signal definitions for every signal kind this catalog does not declare.
    ///
    /// Built-ins are declared ahead of configured entries, so they win rank ties.
    pub fn with_builtin_signals(self) -> Self {
        let mut definitions: Vec<Arc<GeographyDefinition>> = builtin_definitions()
            .into_iter()
            .filter(|b| {
                !self
                    .definitions
                    .iter()
                    .any(|d| d.kind == b.kind || d.name == b.name)
            })
            .map(Arc::new)
            .collect();
        definitions.extend(self.definitions);
        Self { definitions }
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<GeographyDefinition>> {
        self.definitions.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<GeographyDefinition>> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// First definition of the given kind in declaration order.
    pub fn signal(&self, kind: GeographyKind) -> Option<&Arc<GeographyDefinition>> {
        self.definitions.iter().find(|d| d.kind == kind)
    }
}

fn builtin_definitions() -> Vec<GeographyDefinition> {
    vec![
        GeographyDefinition::builtin(
            "latitude_and_longitude",
            GeographyKind::Coordinates,
            &[
                (LATITUDE_FIELD, &["latitude", "lat", "point_y", "y"]),
                (LONGITUDE_FIELD, &["longitude", "lon", "long", "lng", "point_x", "x"]),
            ],
        ),
        GeographyDefinition::builtin(
            "wkt_geometry",
            GeographyKind::Wkt,
            &[("geometry", &["wkt", "wkt_geometry", "geometry_wkt"])],
        ),
        GeographyDefinition::builtin(
            "wkb_geometry",
            GeographyKind::Wkb,
            &[("geometry", &["wkb", "wkb_geometry", "geometry_wkb"])],
        ),
        GeographyDefinition::builtin(
            "geojson_geometry",
            GeographyKind::GeoJson,
            &[("geometry", &["geojson", "geojson_geometry", "geometry_geojson"])],
        ),
    ]
}

/// Process-wide catalog holder.
///
/// Readers take an `Arc` snapshot and keep using it for a whole run; a reload swaps in a new
/// catalog atomically, so no reader ever observes a half-updated list.
#[derive(Debug)]
pub struct SharedCatalog {
    current: RwLock<Arc<GeographyCatalog>>,
}

impl SharedCatalog {
    pub fn new(catalog: GeographyCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn snapshot(&self) -> Arc<GeographyCatalog> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the whole catalog. Runs holding an older snapshot are unaffected.
    pub fn replace(&self, catalog: GeographyCatalog) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(catalog);
    }

    /// Re-read and validate `path`, then swap it in. On error the current catalog stays.
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<(), CatalogError> {
        let catalog = GeographyCatalog::load(path)?;
        self.replace(catalog);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: &str = r#"[
        {"name": "us_states",
         "fields": {"state_name": {"potential_names": ["state", "state_name"]}},
         "rank": 4},
        {"name": "us_counties",
         "fields": {"county": {"potential_names": ["county"]},
                    "state_name": {"potential_names": ["state"]}},
         "rank": 2}
    ]"#;

    #[test]
    fn parses_original_shape_and_keeps_field_order() {
        let catalog = GeographyCatalog::from_json_str(STATES).unwrap();
        assert_eq!(catalog.len(), 2);
        let counties = catalog.get("us_counties").unwrap();
        assert_eq!(counties.kind, GeographyKind::Custom);
        let names: Vec<&str> = counties.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["county", "state_name"]);
    }

    #[test]
    fn reserved_names_select_signal_kinds() {
        let catalog = GeographyCatalog::from_json_str(
            r#"[{"name": "wkt_geometry", "fields": {"geometry": {"potential_names": ["shape"]}}, "rank": 7}]"#,
        )
        .unwrap();
        assert_eq!(catalog.get("wkt_geometry").unwrap().kind, GeographyKind::Wkt);
    }

    #[test]
    fn explicit_kind_overrides_name() {
        let catalog = GeographyCatalog::from_json_str(
            r#"[{"name": "points", "kind": "coordinates", "rank": 3,
                 "fields": {"latitude": {"potential_names": ["ycoord"]},
                            "longitude": {"potential_names": ["xcoord"]}}}]"#,
        )
        .unwrap();
        assert_eq!(catalog.get("points").unwrap().kind, GeographyKind::Coordinates);
    }

    #[test]
    fn rejects_non_positive_rank() {
        let err = GeographyCatalog::from_json_str(
            r#"[{"name": "a", "fields": {"f": {"potential_names": ["x"]}}, "rank": 0}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("rank must be a positive integer"));
    }

    #[test]
    fn rejects_empty_alias_list_and_duplicate_names() {
        let err = GeographyCatalog::from_json_str(
            r#"[{"name": "a", "fields": {"f": {"potential_names": []}}, "rank": 1}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Invalid { .. }));

        let err = GeographyCatalog::from_json_str(
            r#"[{"name": "a", "fields": {"f": {"potential_names": ["x"]}}, "rank": 1},
                {"name": "a", "fields": {"g": {"potential_names": ["y"]}}, "rank": 2}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate geography name"));
    }

    #[test]
    fn rejects_coordinate_kind_without_longitude() {
        let err = GeographyCatalog::from_json_str(
            r#"[{"name": "latitude_and_longitude", "rank": 1,
                 "fields": {"latitude": {"potential_names": ["lat"]}}}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'longitude'"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = GeographyCatalog::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)));
        let err = GeographyCatalog::from_json_str(r#"[{"name": "a"}]"#).unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)));
    }

    #[test]
    fn builtins_are_prepended_only_for_missing_kinds() {
        let catalog = GeographyCatalog::from_json_str(
            r#"[{"name": "geojson_geometry", "rank": 5,
                 "fields": {"geometry": {"potential_names": ["shape_json"]}}}]"#,
        )
        .unwrap()
        .with_builtin_signals();
        assert_eq!(catalog.len(), 4);
        let names: Vec<&str> = catalog.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["latitude_and_longitude", "wkt_geometry", "wkb_geometry", "geojson_geometry"]
        );
        assert_eq!(catalog.signal(GeographyKind::GeoJson).unwrap().rank, 5);
    }

    fn definition(name: &str, kind: GeographyKind, fields: &[(&str, &[&str])], rank: u32) -> GeographyDefinition {
        GeographyDefinition {
            rank,
            ..GeographyDefinition::builtin(name, kind, fields)
        }
    }

    #[test]
    fn constructed_definitions_are_validated_like_json() {
        let cases = [
            definition("empty", GeographyKind::Custom, &[], 1),
            definition("zero", GeographyKind::Custom, &[("f", &["f"])], 0),
            definition("blank", GeographyKind::Custom, &[("f", &["  ", "--"])], 1),
            definition("no_aliases", GeographyKind::Custom, &[("f", &[])], 1),
            definition("points", GeographyKind::Coordinates, &[(LONGITUDE_FIELD, &["x"])], 1),
            definition("shapes", GeographyKind::Wkt, &[("a", &["a"]), ("b", &["b"])], 1),
        ];
        for d in cases {
            let name = d.name.clone();
            let err = GeographyCatalog::new(vec![d]).unwrap_err();
            assert!(
                matches!(&err, CatalogError::Invalid { geography, .. } if *geography == name),
                "{name}: {err}"
            );
        }

        let ok = definition("us_states", GeographyKind::Custom, &[("state_name", &["state"])], 4);
        assert_eq!(GeographyCatalog::new(vec![ok]).unwrap().len(), 1);
    }

    #[test]
    fn failed_reload_keeps_the_current_catalog() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("geo-ingest-catalog-{nanos}.json"));
        let shared = SharedCatalog::new(GeographyCatalog::from_json_str(STATES).unwrap());

        std::fs::write(&path, r#"[{"name": "broken", "fields": {}, "rank": 1}"#).unwrap();
        assert!(matches!(shared.reload(&path), Err(CatalogError::Parse(_))));
        assert!(shared.snapshot().get("us_states").is_some());

        std::fs::write(&path, r#"[{"name": "broken", "fields": {}, "rank": 1}]"#).unwrap();
        assert!(matches!(shared.reload(&path), Err(CatalogError::Invalid { .. })));
        let current = shared.snapshot();
        assert_eq!(current.len(), 2);
        assert!(current.get("broken").is_none());

        std::fs::write(&path, STATES).unwrap();
        shared.reload(&path).unwrap();
        assert_eq!(shared.snapshot().len(), 6);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn shared_catalog_replaces_whole_catalog() {
        let shared = SharedCatalog::new(GeographyCatalog::builtin());
        let before = shared.snapshot();
        shared.replace(GeographyCatalog::from_json_str(STATES).unwrap());
        assert_eq!(before.len(), 4);
        assert_eq!(shared.snapshot().len(), 2);
    }
}
