//! Canonical schema and adapter
//!
//! City exports name the same attribute a dozen ways. The adapter maps raw
//! column names onto the canonical field set with a static variant table,
//! first match wins, case-sensitive exact comparison. Missing fields are
//! reported in a presence map, never raised: the caller decides what can
//! proceed without them.

use super::config::AnalysisConfig;
use super::loader::RawTable;
use super::table::CityTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The canonical field set. Downstream code addresses columns only through
/// these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanonicalField {
    Price,
    Capacity,
    RoomCategory,
    Region,
    Subregion,
    HostListings,
    EntireUnitListings,
    ReviewRating,
    ReviewsTotal,
    ReviewsRecent,
    Availability,
    TrustFlag,
    Latitude,
    Longitude,
}

/// How a canonical column is typed when adapted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Parsed with fast-float; unparseable cells become missing.
    Numeric,
    /// Trimmed; empty cells become missing.
    Text,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 14] = [
        CanonicalField::Price,
        CanonicalField::Capacity,
        CanonicalField::RoomCategory,
        CanonicalField::Region,
        CanonicalField::Subregion,
        CanonicalField::HostListings,
        CanonicalField::EntireUnitListings,
        CanonicalField::ReviewRating,
        CanonicalField::ReviewsTotal,
        CanonicalField::ReviewsRecent,
        CanonicalField::Availability,
        CanonicalField::TrustFlag,
        CanonicalField::Latitude,
        CanonicalField::Longitude,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalField::Price => "price",
            CanonicalField::Capacity => "capacity",
            CanonicalField::RoomCategory => "room_category",
            CanonicalField::Region => "region",
            CanonicalField::Subregion => "subregion",
            CanonicalField::HostListings => "host_listings",
            CanonicalField::EntireUnitListings => "entire_unit_listings",
            CanonicalField::ReviewRating => "review_rating",
            CanonicalField::ReviewsTotal => "reviews_total",
            CanonicalField::ReviewsRecent => "reviews_recent",
            CanonicalField::Availability => "availability",
            CanonicalField::TrustFlag => "trust_flag",
            CanonicalField::Latitude => "latitude",
            CanonicalField::Longitude => "longitude",
        }
    }

    /// Price stays text through adaptation; the cleaner owns currency
    /// parsing. Categorical fields are text, everything else numeric.
    pub fn kind(self) -> FieldKind {
        match self {
            CanonicalField::Price
            | CanonicalField::RoomCategory
            | CanonicalField::Region
            | CanonicalField::Subregion
            | CanonicalField::TrustFlag => FieldKind::Text,
            _ => FieldKind::Numeric,
        }
    }

    /// Accepted raw-name variants, in resolution order.
    pub fn variants(self) -> &'static [&'static str] {
        match self {
            CanonicalField::Price => &["price", "Price", "PRICE"],
            CanonicalField::Capacity => {
                &["accommodates", "Accommodates", "ACCOMMODATES", "capacity"]
            }
            CanonicalField::RoomCategory => {
                &["room_type", "Room Type", "ROOM_TYPE", "roomType"]
            }
            CanonicalField::Region => &[
                "neighbourhood_group_cleansed",
                "neighbourhood_group",
                "Neighbourhood Group",
                "neighborhood_group_cleansed",
                "neighborhood_group",
            ],
            CanonicalField::Subregion => &[
                "neighbourhood_cleansed",
                "neighbourhood",
                "Neighbourhood",
                "neighborhood_cleansed",
                "neighborhood",
            ],
            CanonicalField::HostListings => &[
                "calculated_host_listings_count",
                "host_listings_count",
                "Host Listings Count",
                "calculatedHostListingsCount",
            ],
            CanonicalField::EntireUnitListings => &[
                "calculated_host_listings_count_entire_homes",
                "host_listings_count_entire_homes",
                "calculatedHostListingsCountEntireHomes",
            ],
            CanonicalField::ReviewRating => &[
                "review_scores_rating",
                "review_rating",
                "Review Scores Rating",
                "reviewScoresRating",
            ],
            CanonicalField::ReviewsTotal => &[
                "number_of_reviews",
                "reviews_total",
                "Number of Reviews",
                "numberOfReviews",
            ],
            CanonicalField::ReviewsRecent => &[
                "number_of_reviews_ltm",
                "reviews_ltm",
                "Number of Reviews (LTM)",
                "numberOfReviewsLTM",
            ],
            CanonicalField::Availability => &[
                "availability_365",
                "availability",
                "Availability 365",
                "availability365",
            ],
            CanonicalField::TrustFlag => &[
                "host_is_superhost",
                "superhost",
                "Host Is Superhost",
                "hostIsSuperhost",
            ],
            CanonicalField::Latitude => &["latitude", "Latitude", "LATITUDE"],
            CanonicalField::Longitude => &["longitude", "Longitude", "LONGITUDE"],
        }
    }
}

/// Review sub-score columns the cleaner also needs; mapped alongside the
/// canonical set but not part of it.
pub const REVIEW_SUBSCORES: [(&str, &[&str]); 6] = [
    ("review_accuracy", &["review_scores_accuracy", "reviewScoresAccuracy"]),
    (
        "review_cleanliness",
        &["review_scores_cleanliness", "reviewScoresCleanliness"],
    ),
    ("review_checkin", &["review_scores_checkin", "reviewScoresCheckin"]),
    (
        "review_communication",
        &["review_scores_communication", "reviewScoresCommunication"],
    ),
    ("review_location", &["review_scores_location", "reviewScoresLocation"]),
    ("review_value", &["review_scores_value", "reviewScoresValue"]),
];

/// Which canonical fields were found in a raw dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceMap(BTreeMap<String, bool>);

impl PresenceMap {
    pub fn found(&self, field: &str) -> bool {
        self.0.get(field).copied().unwrap_or(false)
    }

    pub fn missing(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, &found)| !found)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(name, &found)| (name.as_str(), found))
    }

    fn set(&mut self, field: &str, found: bool) {
        self.0.insert(field.to_string(), found);
    }
}

/// One canonical column with its accepted raw names.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub variants: Vec<String>,
}

/// Adapter from raw tables to canonical city tables.
#[derive(Debug, Clone)]
pub struct SchemaAdapter {
    specs: Vec<FieldSpec>,
}

/// Adapter output: the canonical table, what was found, and how many
/// numeric cells failed to parse (made missing, row kept).
#[derive(Debug)]
pub struct AdaptedTable {
    pub table: CityTable,
    pub presence: PresenceMap,
    pub numeric_parse_failures: usize,
}

impl Default for SchemaAdapter {
    fn default() -> Self {
        let mut specs = Vec::with_capacity(CanonicalField::ALL.len() + REVIEW_SUBSCORES.len());
        for field in CanonicalField::ALL {
            specs.push(FieldSpec {
                name: field.name().to_string(),
                kind: field.kind(),
                variants: field.variants().iter().map(|v| v.to_string()).collect(),
            });
        }
        for (name, variants) in REVIEW_SUBSCORES {
            specs.push(FieldSpec {
                name: name.to_string(),
                kind: FieldKind::Numeric,
                variants: variants.iter().map(|v| v.to_string()).collect(),
            });
        }
        Self { specs }
    }
}

impl SchemaAdapter {
    /// Adapter with the built-in variant table, optionally overridden per
    /// field from the configuration.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let mut adapter = Self::default();
        if let Some(overrides) = &config.field_variants {
            for spec in &mut adapter.specs {
                if let Some(variants) = overrides.get(&spec.name) {
                    spec.variants = variants.clone();
                }
            }
        }
        adapter
    }

    /// First variant present in the headers, if any.
    fn resolve_one(spec: &FieldSpec, headers: &[String]) -> Option<usize> {
        for variant in &spec.variants {
            if let Some(idx) = headers.iter().position(|h| h == variant) {
                return Some(idx);
            }
        }
        None
    }

    /// Consume a raw table, producing the canonical table and presence map.
    ///
    /// Never fails: a field whose variants all miss is simply absent from
    /// the output table and `false` in the presence map.
    pub fn adapt(&self, raw: RawTable) -> AdaptedTable {
        let rows = raw.rows.len();
        let mut table = CityTable::new(rows);
        let mut presence = PresenceMap::default();
        let mut numeric_parse_failures = 0usize;

        for spec in &self.specs {
            let Some(col_idx) = Self::resolve_one(spec, &raw.headers) else {
                presence.set(&spec.name, false);
                continue;
            };
            presence.set(&spec.name, true);

            match spec.kind {
                FieldKind::Text => {
                    let values: Vec<Option<String>> = raw
                        .rows
                        .iter()
                        .map(|record| match record.get(col_idx) {
                            Some(cell) if !cell.is_empty() => Some(cell.to_string()),
                            _ => None,
                        })
                        .collect();
                    table.insert_text(&spec.name, values);
                }
                FieldKind::Numeric => {
                    let values: Vec<Option<f64>> = raw
                        .rows
                        .iter()
                        .map(|record| match record.get(col_idx) {
                            Some(cell) if !cell.is_empty() => {
                                match fast_float::parse::<f64, _>(cell) {
                                    Ok(v) if v.is_finite() => Some(v),
                                    _ => {
                                        numeric_parse_failures += 1;
                                        None
                                    }
                                }
                            }
                            _ => None,
                        })
                        .collect();
                    table.insert_numeric(&spec.name, values);
                }
            }
        }

        AdaptedTable {
            table,
            presence,
            numeric_parse_failures,
        }
    }
}
