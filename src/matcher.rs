//! Geography matcher.
//!
//! A definition matches a [`ColumnSet`] when every one of its logical fields has at least one
//! alias present. For each field the first alias in declaration order that is present is the
//! one bound. Among several full matches the highest rank wins; equal ranks are resolved by
//! catalog declaration order (first declared wins).

use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;

use crate::catalog::{GeographyCatalog, GeographyDefinition};
use crate::types::{ColumnRef, ColumnSet};

/// A definition that fully matched a column set.
#[derive(Debug, Clone, PartialEq)]
pub struct GeographyMatch {
    pub definition: Arc<GeographyDefinition>,
    /// Position of `definition` in the catalog.
    pub declaration_index: usize,
    /// Logical field -> bound source column, in field declaration order.
    pub field_to_column: Vec<(String, ColumnRef)>,
}

impl GeographyMatch {
    pub fn column(&self, field: &str) -> Option<&ColumnRef> {
        self.field_to_column
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, col)| col)
    }

    fn precedence(&self, other: &Self) -> Ordering {
        other
            .definition
            .rank
            .cmp(&self.definition.rank)
            .then(self.declaration_index.cmp(&other.declaration_index))
    }
}

/// Bind every field of `definition` to a column, or `None` if some field has no alias present.
pub fn bind_fields(
    definition: &GeographyDefinition,
    columns: &ColumnSet,
) -> Option<Vec<(String, ColumnRef)>> {
    definition
        .fields
        .iter()
        .map(|field| {
            field
                .aliases
                .iter()
                .find_map(|alias| columns.find(alias))
                .map(|col| (field.name.clone(), col))
        })
        .collect()
}

/// All full matches in catalog declaration order.
pub fn match_all(catalog: &GeographyCatalog, columns: &ColumnSet) -> Vec<GeographyMatch> {
    catalog
        .iter()
        .enumerate()
        .filter_map(|(declaration_index, definition)| {
            bind_fields(definition, columns).map(|field_to_column| GeographyMatch {
                definition: Arc::clone(definition),
                declaration_index,
                field_to_column,
            })
        })
        .collect()
}

/// All full matches ordered by precedence: rank descending, then declaration order.
pub fn rank_matches(catalog: &GeographyCatalog, columns: &ColumnSet) -> Vec<GeographyMatch> {
    let mut matches = match_all(catalog, columns);
    matches.sort_by(GeographyMatch::precedence);
    debug!(
        "geography candidates for {:?}: {:?}",
        columns.headers().collect::<Vec<_>>(),
        matches
            .iter()
            .map(|m| (m.definition.name.as_str(), m.definition.rank))
            .collect::<Vec<_>>()
    );
    matches
}

/// The single best match, or `None` when no definition fully matches.
pub fn best_match(catalog: &GeographyCatalog, columns: &ColumnSet) -> Option<GeographyMatch> {
    rank_matches(catalog, columns).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GeographyField, GeographyKind};

    fn def(name: &str, rank: u32, fields: &[(&str, &[&str])]) -> GeographyDefinition {
        GeographyDefinition {
            name: name.to_string(),
            kind: GeographyKind::Custom,
            fields: fields
                .iter()
                .map(|(f, aliases)| GeographyField {
                    name: (*f).to_string(),
                    aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
                })
                .collect(),
            rank,
        }
    }

    #[test]
    fn partial_match_is_not_a_match() {
        let catalog = GeographyCatalog::new(vec![def(
            "counties",
            1,
            &[("county", &["county"]), ("state", &["state"])],
        )])
        .unwrap();
        let cols = ColumnSet::from_headers(["county", "population"]);
        assert!(match_all(&catalog, &cols).is_empty());
        assert!(best_match(&catalog, &cols).is_none());
    }

    #[test]
    fn first_declared_alias_is_bound() {
        let catalog = GeographyCatalog::new(vec![def(
            "states",
            1,
            &[("state_name", &["state_name", "state", "st"])],
        )])
        .unwrap();
        let cols = ColumnSet::from_headers(["st", "State", "State Name"]);
        let m = best_match(&catalog, &cols).unwrap();
        assert_eq!(m.column("state_name").unwrap().name, "State Name");
    }

    #[test]
    fn highest_rank_wins() {
        let catalog = GeographyCatalog::new(vec![
            def("low", 2, &[("state", &["state"])]),
            def("high", 4, &[("state", &["state"])]),
        ])
        .unwrap();
        let cols = ColumnSet::from_headers(["state"]);
        assert_eq!(best_match(&catalog, &cols).unwrap().definition.name, "high");
    }

    #[test]
    fn equal_rank_resolves_to_first_declared() {
        let catalog = GeographyCatalog::new(vec![
            def("first", 3, &[("state", &["state"])]),
            def("second", 3, &[("state", &["state"])]),
        ])
        .unwrap();
        let cols = ColumnSet::from_headers(["state"]);
        for _ in 0..50 {
            assert_eq!(best_match(&catalog, &cols).unwrap().definition.name, "first");
        }
        let ranked = rank_matches(&catalog, &cols);
        assert_eq!(ranked[1].definition.name, "second");
    }
}
