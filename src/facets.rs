//! Client-side facet computation over the current aggregate.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Item, QueryState};

/// Display order of a facet's values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacetOrder {
    /// Count descending, then label ascending. For open vocabularies such as
    /// author or culture.
    #[default]
    Count,
    /// Label ascending. For ordinal labels such as years or decades.
    Label,
    /// The listed order; unlisted values follow in label order.
    Fixed(Vec<String>),
}

/// A facet dimension to compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetSpec {
    /// Key in [`Item::facets`] and in [`QueryState::facets`].
    pub key: String,
    /// Display order.
    #[serde(default)]
    pub order: FacetOrder,
}

impl FacetSpec {
    /// Creates a count-ordered facet.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            order: FacetOrder::Count,
        }
    }

    /// Sets the display order.
    pub fn with_order(mut self, order: FacetOrder) -> Self {
        self.order = order;
        self
    }
}

/// One value of a facet with its count in the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: String,
    pub count: usize,
    pub selected: bool,
}

/// A computed facet dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub key: String,
    pub values: Vec<FacetValue>,
}

impl Facet {
    /// Looks up a value.
    pub fn value(&self, value: &str) -> Option<&FacetValue> {
        self.values.iter().find(|v| v.value == value)
    }
}

/// Computes every facet in `specs` from `items`.
///
/// Values selected in `query` but absent from `items` are still listed with
/// a zero count so they can be deselected.
pub fn compute_facets(items: &[Item], specs: &[FacetSpec], query: &QueryState) -> Vec<Facet> {
    specs
        .iter()
        .map(|spec| compute_facet(items, spec, query))
        .collect()
}

fn compute_facet(items: &[Item], spec: &FacetSpec, query: &QueryState) -> Facet {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        let mut values: Vec<&str> = item.facet_values(&spec.key).iter().map(String::as_str).collect();
        values.sort_unstable();
        values.dedup();
        for value in values {
            *counts.entry(value).or_insert(0) += 1;
        }
    }

    let selected: &[String] = query.facets.get(&spec.key).map(Vec::as_slice).unwrap_or(&[]);
    let mut values: Vec<FacetValue> = counts
        .into_iter()
        .map(|(value, count)| FacetValue {
            value: value.to_string(),
            count,
            selected: selected.iter().any(|s| s == value),
        })
        .collect();

    for value in selected {
        if !values.iter().any(|v| &v.value == value) {
            values.push(FacetValue {
                value: value.clone(),
                count: 0,
                selected: true,
            });
        }
    }

    values.sort_by(|a, b| compare(&spec.order, a, b));

    Facet {
        key: spec.key.clone(),
        values,
    }
}

fn compare(order: &FacetOrder, a: &FacetValue, b: &FacetValue) -> Ordering {
    match order {
        FacetOrder::Count => b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)),
        FacetOrder::Label => a.value.cmp(&b.value),
        FacetOrder::Fixed(fixed) => {
            let rank = |v: &FacetValue| fixed.iter().position(|f| f == &v.value).unwrap_or(usize::MAX);
            rank(a).cmp(&rank(b)).then_with(|| a.value.cmp(&b.value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<Item> {
        vec![
            Item::new("1", "a").with_facet("culture", "Japanese").with_facet("decade", "1830s"),
            Item::new("2", "b").with_facet("culture", "Dutch").with_facet("decade", "1650s"),
            Item::new("3", "c").with_facet("culture", "Japanese").with_facet("decade", "1830s"),
            Item::new("4", "d").with_facet("culture", "American"),
            Item::new("5", "e").with_facet("culture", "Dutch").with_facet("decade", "1900s"),
        ]
    }

    fn labels(facet: &Facet) -> Vec<&str> {
        facet.values.iter().map(|v| v.value.as_str()).collect()
    }

    #[test]
    fn test_count_order() {
        let facets = compute_facets(&items(), &[FacetSpec::new("culture")], &QueryState::new("x"));
        let culture = &facets[0];
        assert_eq!(culture.key, "culture");
        assert_eq!(labels(culture), vec!["Dutch", "Japanese", "American"]);
        assert_eq!(culture.value("Dutch").unwrap().count, 2);
        assert_eq!(culture.value("American").unwrap().count, 1);
    }

    #[test]
    fn test_label_order() {
        let spec = FacetSpec::new("decade").with_order(FacetOrder::Label);
        let facets = compute_facets(&items(), &[spec], &QueryState::new("x"));
        assert_eq!(labels(&facets[0]), vec!["1650s", "1830s", "1900s"]);
    }

    #[test]
    fn test_fixed_order() {
        let spec = FacetSpec::new("culture").with_order(FacetOrder::Fixed(vec![
            "American".to_string(),
            "Japanese".to_string(),
        ]));
        let facets = compute_facets(&items(), &[spec], &QueryState::new("x"));
        assert_eq!(labels(&facets[0]), vec!["American", "Japanese", "Dutch"]);
    }

    #[test]
    fn test_selected_flag() {
        let query = QueryState::new("x").with_facet("culture", "Dutch");
        let facets = compute_facets(&items(), &[FacetSpec::new("culture")], &query);
        assert!(facets[0].value("Dutch").unwrap().selected);
        assert!(!facets[0].value("Japanese").unwrap().selected);
    }

    #[test]
    fn test_selected_value_missing_from_aggregate_is_retained() {
        let query = QueryState::new("x").with_facet("culture", "Etruscan");
        let facets = compute_facets(&items(), &[FacetSpec::new("culture")], &query);
        let etruscan = facets[0].value("Etruscan").unwrap();
        assert_eq!(etruscan.count, 0);
        assert!(etruscan.selected);
        assert_eq!(facets[0].values.last().unwrap().value, "Etruscan");
    }

    #[test]
    fn test_selected_value_retained_on_empty_aggregate() {
        let query = QueryState::new("x").with_facet("culture", "Dutch");
        let facets = compute_facets(&[], &[FacetSpec::new("culture")], &query);
        assert_eq!(facets[0].values.len(), 1);
        assert_eq!(facets[0].values[0].count, 0);
        assert!(facets[0].values[0].selected);
    }

    #[test]
    fn test_duplicate_values_within_item_count_once() {
        let items = vec![Item::new("1", "a")
            .with_facet("author", "Hokusai")
            .with_facet("author", "Hokusai")];
        let facets = compute_facets(&items, &[FacetSpec::new("author")], &QueryState::new("x"));
        assert_eq!(facets[0].value("Hokusai").unwrap().count, 1);
    }

    #[test]
    fn test_items_without_dimension() {
        let facets = compute_facets(&items(), &[FacetSpec::new("medium")], &QueryState::new("x"));
        assert!(facets[0].values.is_empty());
    }

    #[test]
    fn test_facet_spec_deserialization() {
        let spec: FacetSpec =
            serde_json::from_str(r#"{"key":"century","order":{"fixed":["19th","20th"]}}"#).unwrap();
        assert_eq!(
            spec.order,
            FacetOrder::Fixed(vec!["19th".to_string(), "20th".to_string()])
        );
        let spec: FacetSpec = serde_json::from_str(r#"{"key":"author"}"#).unwrap();
        assert_eq!(spec.order, FacetOrder::Count);
    }
}
