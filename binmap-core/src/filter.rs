//! Read-only queries over loaded collections.

use std::collections::BTreeMap;

use crate::model::{Bin, CollectionCenter};

/// Centers and bins matching a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    /// Matching centers, in collection order.
    pub centers: Vec<CollectionCenter>,
    /// Matching bins, in collection order.
    pub bins: Vec<Bin>,
}

fn contains_folded(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

/// Bins whose waste category contains `category`, ignoring case.
///
/// An absent or empty category matches every bin.
#[must_use]
pub fn bins_by_type(bins: &[Bin], category: Option<&str>) -> Vec<Bin> {
    let Some(needle) = category.filter(|value| !value.is_empty()) else {
        return bins.to_vec();
    };
    let needle = needle.to_lowercase();
    bins.iter()
        .filter(|bin| contains_folded(&bin.waste_category, &needle))
        .cloned()
        .collect()
}

/// Centers accepting a waste category that contains `category`, ignoring case.
///
/// An absent or empty category matches every center.
#[must_use]
pub fn centers_by_type(centers: &[CollectionCenter], category: Option<&str>) -> Vec<CollectionCenter> {
    let Some(needle) = category.filter(|value| !value.is_empty()) else {
        return centers.to_vec();
    };
    let needle = needle.to_lowercase();
    centers
        .iter()
        .filter(|center| {
            center
                .accepted_waste
                .iter()
                .any(|waste| contains_folded(waste, &needle))
        })
        .cloned()
        .collect()
}

/// Search centers by name, address or community and bins by category or community.
///
/// A blank query returns both collections unfiltered.
#[must_use]
pub fn search(centers: &[CollectionCenter], bins: &[Bin], query: &str) -> SearchResults {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return SearchResults {
            centers: centers.to_vec(),
            bins: bins.to_vec(),
        };
    }

    SearchResults {
        centers: centers
            .iter()
            .filter(|center| {
                [&center.name, &center.address, &center.community]
                    .into_iter()
                    .any(|field| contains_folded(field, &needle))
            })
            .cloned()
            .collect(),
        bins: bins
            .iter()
            .filter(|bin| {
                contains_folded(&bin.waste_category, &needle)
                    || contains_folded(&bin.community, &needle)
            })
            .cloned()
            .collect(),
    }
}

/// Bins grouped by waste category.
#[must_use]
pub fn group_bins_by_type(bins: &[Bin]) -> BTreeMap<String, Vec<Bin>> {
    let mut groups: BTreeMap<String, Vec<Bin>> = BTreeMap::new();
    for bin in bins {
        groups
            .entry(bin.waste_category.clone())
            .or_default()
            .push(bin.clone());
    }
    groups
}

/// Colour family of a waste category, used for pins and list markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasteClass {
    /// Glass.
    Glass,
    /// Plastics and yellow-bin packaging.
    Plastic,
    /// Paper and cardboard.
    Paper,
    /// Metal.
    Metal,
    /// Organic waste.
    Organic,
    /// Unrecognised category.
    Other,
}

impl WasteClass {
    /// Classify a free-form category label (French or English).
    #[must_use]
    pub fn classify(category: &str) -> Self {
        let label = category.to_lowercase();
        let mentions = |keywords: &[&str]| keywords.iter().any(|keyword| label.contains(keyword));

        if mentions(&["verre", "glass"]) {
            WasteClass::Glass
        } else if mentions(&["plastique", "plastic", "jaune"]) {
            WasteClass::Plastic
        } else if mentions(&["papier", "paper", "carton"]) {
            WasteClass::Paper
        } else if mentions(&["métal", "metal"]) {
            WasteClass::Metal
        } else if mentions(&["organique", "organic", "bio"]) {
            WasteClass::Organic
        } else {
            WasteClass::Other
        }
    }
}
