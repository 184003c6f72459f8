//! Validation and reshaping of raw backend records into canonical entities.
//!
//! The functions here are pure: they never log or fail. Records that cannot be
//! placed on a map are dropped and counted, records missing optional
//! attributes receive the defaults from [`crate::model`].

use serde_json::{Map, Value};

use crate::model::{
    Bin, CanonicalEntity, CollectionCenter, EntityId, EntityKind, GeoPoint, UNKNOWN_ADDRESS,
    UNKNOWN_COMMUNITY, UNNAMED_CENTER, UNSPECIFIED_WASTE, valid_latitude, valid_longitude,
};

/// Why a raw record was left out of the canonical collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The record is not a JSON object.
    NotAnObject,
    /// No usable identifier.
    MissingId,
    /// Latitude or longitude absent or null.
    MissingCoordinates,
    /// Latitude or longitude present but not a number.
    NonNumericCoordinate,
    /// Coordinates outside [-90, 90] / [-180, 180] or not finite.
    OutOfRange,
}

/// Result of normalizing a raw collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    /// Valid entities in input order.
    pub items: Vec<T>,
    /// Number of input records that were dropped.
    pub dropped: usize,
}

impl<T> Normalized<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            dropped: 0,
        }
    }
}

/// Entity type that can be built from a raw backend record.
pub trait Canonical: Sized {
    /// Collection the entity belongs to.
    const KIND: EntityKind;

    /// Validate and reshape a single record.
    ///
    /// # Errors
    ///
    /// Returns the [`DropReason`] when the record cannot become a map entity.
    fn from_record(record: &Value) -> Result<Self, DropReason>;
}

impl Canonical for CollectionCenter {
    const KIND: EntityKind = EntityKind::Center;

    fn from_record(record: &Value) -> Result<Self, DropReason> {
        let fields = record.as_object().ok_or(DropReason::NotAnObject)?;
        let point = geo_point(fields)?;

        Ok(Self {
            point,
            name: text(fields, "name").unwrap_or_else(|| UNNAMED_CENTER.to_owned()),
            address: text(fields, "address").unwrap_or_else(|| UNKNOWN_ADDRESS.to_owned()),
            community: text(fields, "community").unwrap_or_else(|| UNKNOWN_COMMUNITY.to_owned()),
            accepted_waste: text_list(fields, "garbageTypes"),
            website: text(fields, "website"),
        })
    }
}

impl Canonical for Bin {
    const KIND: EntityKind = EntityKind::Bin;

    fn from_record(record: &Value) -> Result<Self, DropReason> {
        let fields = record.as_object().ok_or(DropReason::NotAnObject)?;
        let point = geo_point(fields)?;

        Ok(Self {
            point,
            waste_category: text(fields, "garbageType")
                .unwrap_or_else(|| UNSPECIFIED_WASTE.to_owned()),
            community: text(fields, "community").unwrap_or_else(|| UNKNOWN_COMMUNITY.to_owned()),
            qr_code: text(fields, "qrCode"),
        })
    }
}

/// Normalize a raw collection into entities of type `T`.
///
/// Anything other than a JSON array is treated as an empty collection.
#[must_use]
pub fn normalize_records<T: Canonical>(raw: &Value) -> Normalized<T> {
    let Some(records) = raw.as_array() else {
        return Normalized::empty();
    };

    let mut normalized = Normalized {
        items: Vec::with_capacity(records.len()),
        dropped: 0,
    };
    for record in records {
        match T::from_record(record) {
            Ok(entity) => normalized.items.push(entity),
            Err(_) => normalized.dropped += 1,
        }
    }
    normalized
}

/// Normalize a raw collection of the given kind into canonical entities.
#[must_use]
pub fn normalize(raw: &Value, kind: EntityKind) -> Normalized<CanonicalEntity> {
    match kind {
        EntityKind::Center => {
            let Normalized { items, dropped } = normalize_records::<CollectionCenter>(raw);
            Normalized {
                items: items.into_iter().map(CanonicalEntity::Center).collect(),
                dropped,
            }
        }
        EntityKind::Bin => {
            let Normalized { items, dropped } = normalize_records::<Bin>(raw);
            Normalized {
                items: items.into_iter().map(CanonicalEntity::Bin).collect(),
                dropped,
            }
        }
    }
}

/// Reason a single record would be dropped, if any.
#[must_use]
pub fn inspect(record: &Value, kind: EntityKind) -> Option<DropReason> {
    match kind {
        EntityKind::Center => CollectionCenter::from_record(record).err(),
        EntityKind::Bin => Bin::from_record(record).err(),
    }
}

fn geo_point(fields: &Map<String, Value>) -> Result<GeoPoint, DropReason> {
    let id = identifier(fields).ok_or(DropReason::MissingId)?;
    let latitude = coordinate(fields, "latitude")?;
    let longitude = coordinate(fields, "longitude")?;

    if !valid_latitude(latitude) || !valid_longitude(longitude) {
        return Err(DropReason::OutOfRange);
    }

    Ok(GeoPoint {
        id,
        latitude,
        longitude,
    })
}

fn identifier(fields: &Map<String, Value>) -> Option<EntityId> {
    match fields.get("id")? {
        Value::String(raw) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| EntityId(trimmed.to_owned()))
        }
        Value::Number(number) => Some(EntityId(number.to_string())),
        _ => None,
    }
}

fn coordinate(fields: &Map<String, Value>, key: &str) -> Result<f64, DropReason> {
    let parsed = match fields.get(key) {
        None | Some(Value::Null) => return Err(DropReason::MissingCoordinates),
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    parsed.ok_or(DropReason::NonNumericCoordinate)
}

// Blank strings count as absent so that defaults apply.
fn text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn text_list(fields: &Map<String, Value>, key: &str) -> Vec<String> {
    fields
        .get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}
