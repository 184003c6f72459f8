//! Domain data structures for collection centers, bins and map statistics.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name used for a center whose record carries no usable name.
pub const UNNAMED_CENTER: &str = "Unnamed center";
/// Address used for a center whose record carries no address.
pub const UNKNOWN_ADDRESS: &str = "Address unavailable";
/// Community used for records that carry no community.
pub const UNKNOWN_COMMUNITY: &str = "Unknown community";
/// Waste category used for bins that carry no category.
pub const UNSPECIFIED_WASTE: &str = "Unspecified";

/// Kinds of map entities served by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Staffed collection center accepting several waste categories.
    Center,
    /// Single street bin.
    Bin,
}

impl EntityKind {
    /// API path segment of the collection endpoint.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            EntityKind::Center => "collect-center",
            EntityKind::Bin => "bins",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Center => "centers",
            EntityKind::Bin => "bins",
        };
        write!(formatter, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Opaque identifier assigned by the backend.
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(raw: &str) -> Self {
        EntityId(raw.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Minimal coordinate-bearing entity shared by centers and bins.
pub struct GeoPoint {
    /// Backend identifier.
    pub id: EntityId,
    /// Latitude in degrees, within [-90, 90].
    pub latitude: f64,
    /// Longitude in degrees, within [-180, 180].
    pub longitude: f64,
}

impl GeoPoint {
    /// Build a point, returning `None` when the coordinates are not valid.
    #[must_use]
    pub fn new(id: EntityId, latitude: f64, longitude: f64) -> Option<Self> {
        let point = Self {
            id,
            latitude,
            longitude,
        };
        point.is_valid().then_some(point)
    }

    /// Whether the identifier is present and both coordinates are finite and in range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.id.0.is_empty() && valid_latitude(self.latitude) && valid_longitude(self.longitude)
    }
}

/// Whether `latitude` is a finite value within [-90, 90].
#[must_use]
pub fn valid_latitude(latitude: f64) -> bool {
    latitude.is_finite() && (-90.0..=90.0).contains(&latitude)
}

/// Whether `longitude` is a finite value within [-180, 180].
#[must_use]
pub fn valid_longitude(longitude: f64) -> bool {
    longitude.is_finite() && (-180.0..=180.0).contains(&longitude)
}

/// Access to the point underlying a canonical entity.
pub trait Located {
    /// The validated coordinates and identifier.
    fn point(&self) -> &GeoPoint;

    /// Shorthand for the identifier.
    fn id(&self) -> &EntityId {
        &self.point().id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Collection center as delivered to the rendering surface.
pub struct CollectionCenter {
    /// Identifier and coordinates.
    #[serde(flatten)]
    pub point: GeoPoint,
    /// Display name, never empty.
    pub name: String,
    /// Postal address.
    pub address: String,
    /// Community the center belongs to.
    pub community: String,
    /// Waste categories the center accepts, in backend order.
    #[serde(rename = "garbageTypes")]
    pub accepted_waste: Vec<String>,
    /// External website.
    pub website: Option<String>,
}

impl Located for CollectionCenter {
    fn point(&self) -> &GeoPoint {
        &self.point
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Street bin as delivered to the rendering surface.
pub struct Bin {
    /// Identifier and coordinates.
    #[serde(flatten)]
    pub point: GeoPoint,
    /// Waste category collected by the bin.
    #[serde(rename = "garbageType")]
    pub waste_category: String,
    /// Community the bin belongs to.
    pub community: String,
    /// Reference resolvable from the bin's QR code.
    pub qr_code: Option<String>,
}

impl Located for Bin {
    fn point(&self) -> &GeoPoint {
        &self.point
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Either kind of normalized entity.
pub enum CanonicalEntity {
    /// A collection center.
    Center(CollectionCenter),
    /// A bin.
    Bin(Bin),
}

impl Located for CanonicalEntity {
    fn point(&self) -> &GeoPoint {
        match self {
            CanonicalEntity::Center(center) => &center.point,
            CanonicalEntity::Bin(bin) => &bin.point,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Breakdown of the bins collection.
pub struct BinBreakdown {
    /// Number of bins.
    pub total: usize,
    /// Bins per waste category.
    pub by_type: BTreeMap<String, usize>,
    /// Bins per community.
    pub by_community: BTreeMap<String, usize>,
}

impl BinBreakdown {
    /// Count `bins` by category and community.
    #[must_use]
    pub fn from_bins(bins: &[Bin]) -> Self {
        let mut breakdown = Self {
            total: bins.len(),
            ..Self::default()
        };
        for bin in bins {
            *breakdown
                .by_type
                .entry(bin.waste_category.clone())
                .or_default() += 1;
            *breakdown
                .by_community
                .entry(bin.community.clone())
                .or_default() += 1;
        }
        breakdown
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Aggregate counts derived from the loaded collections.
pub struct MapStats {
    /// Number of valid centers.
    pub centers_count: usize,
    /// Number of valid bins.
    pub bins_count: usize,
    /// Centers plus bins.
    pub total_points: usize,
    /// Per-category and per-community breakdown, present when bins are loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bins_stats: Option<BinBreakdown>,
}

impl MapStats {
    /// Compute statistics for both collections.
    #[must_use]
    pub fn compute(centers: &[CollectionCenter], bins: &[Bin]) -> Self {
        Self::default().with_centers(centers).with_bins(bins)
    }

    /// Replace the center counts, keeping the bin counts.
    #[must_use]
    pub fn with_centers(self, centers: &[CollectionCenter]) -> Self {
        Self {
            centers_count: centers.len(),
            total_points: centers.len() + self.bins_count,
            ..self
        }
    }

    /// Replace the bin counts and breakdown, keeping the center counts.
    #[must_use]
    pub fn with_bins(self, bins: &[Bin]) -> Self {
        Self {
            bins_count: bins.len(),
            total_points: self.centers_count + bins.len(),
            bins_stats: (!bins.is_empty()).then(|| BinBreakdown::from_bins(bins)),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// Position of the device user as forwarded to the rendering surface.
pub struct UserLocation {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Horizontal accuracy radius in meters, when known.
    pub accuracy: Option<f64>,
}
