//! Wire field <-> model feature mapping and the single-row feature table.
//!
//! `Feature::ALL` is the column layout the preprocessing transformer was
//! fitted on. Adding a variant forces every exhaustive match (notably
//! `RawRecord::value`) to be updated.

use std::fmt;

use crate::schema::{FieldKind, RawRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Age,
    Ratings,
    Weather,
    Traffic,
    VehicleCondition,
    TypeOfOrder,
    TypeOfVehicle,
    MultipleDeliveries,
    Festival,
    CityType,
    IsWeekend,
    PickupTimeMinutes,
    OrderTimeOfDay,
    Distance,
    DistanceType,
}

impl Feature {
    /// Fitted column order.
    pub const ALL: [Feature; 15] = [
        Feature::Age,
        Feature::Ratings,
        Feature::Weather,
        Feature::Traffic,
        Feature::VehicleCondition,
        Feature::TypeOfOrder,
        Feature::TypeOfVehicle,
        Feature::MultipleDeliveries,
        Feature::Festival,
        Feature::CityType,
        Feature::IsWeekend,
        Feature::PickupTimeMinutes,
        Feature::OrderTimeOfDay,
        Feature::Distance,
        Feature::DistanceType,
    ];

    /// Column name the transformer expects.
    pub fn name(self) -> &'static str {
        match self {
            Feature::Age => "age",
            Feature::Ratings => "ratings",
            Feature::Weather => "weather",
            Feature::Traffic => "traffic",
            Feature::VehicleCondition => "vehicle_condition",
            Feature::TypeOfOrder => "type_of_order",
            Feature::TypeOfVehicle => "type_of_vehicle",
            Feature::MultipleDeliveries => "multiple_deliveries",
            Feature::Festival => "festival",
            Feature::CityType => "city_type",
            Feature::IsWeekend => "is_weekend",
            Feature::PickupTimeMinutes => "pickup_time_minutes",
            Feature::OrderTimeOfDay => "order_time_of_day",
            Feature::Distance => "distance",
            Feature::DistanceType => "distance_type",
        }
    }

    /// Field name on the `/predict` body. The feature name is accepted as an alias.
    pub fn wire_name(self) -> &'static str {
        match self {
            Feature::Age => "Delivery_person_Age",
            Feature::Ratings => "Delivery_person_Ratings",
            Feature::Weather => "Weatherconditions",
            Feature::Traffic => "Road_traffic_density",
            Feature::VehicleCondition => "Vehicle_condition",
            Feature::TypeOfOrder => "Type_of_order",
            Feature::TypeOfVehicle => "Type_of_vehicle",
            Feature::Festival => "Festival",
            Feature::CityType => "City",
            // no raw counterpart, wire and feature names agree
            Feature::MultipleDeliveries
            | Feature::IsWeekend
            | Feature::PickupTimeMinutes
            | Feature::OrderTimeOfDay
            | Feature::Distance
            | Feature::DistanceType => self.name(),
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Feature::Age | Feature::Ratings | Feature::MultipleDeliveries => FieldKind::NumericText,
            Feature::VehicleCondition => FieldKind::Integer,
            Feature::PickupTimeMinutes | Feature::Distance => FieldKind::Number,
            Feature::Weather
            | Feature::Traffic
            | Feature::TypeOfOrder
            | Feature::TypeOfVehicle
            | Feature::Festival
            | Feature::CityType
            | Feature::IsWeekend
            | Feature::OrderTimeOfDay
            | Feature::DistanceType => FieldKind::Text,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------- Feature row ----------

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
}

impl FeatureValue {
    /// Numeric view. Text is parsed, nothing else is coerced.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) => Some(*v),
            FeatureValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Categorical view. Integral numbers render without a fraction so `0.0` matches "0".
    pub fn as_category(&self) -> String {
        match self {
            FeatureValue::Text(s) => s.clone(),
            FeatureValue::Number(v) if v.fract() == 0.0 && v.is_finite() => format!("{}", *v as i64),
            FeatureValue::Number(v) => v.to_string(),
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Number(v) => write!(f, "{}", v),
            FeatureValue::Text(s) => f.write_str(s),
        }
    }
}

/// One named, ordered row; the input shape of the composed pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRow {
    columns: Vec<(String, FeatureValue)>,
}

impl FeatureRow {
    pub fn from_record(record: &RawRecord) -> Self {
        let columns = Feature::ALL
            .iter()
            .map(|f| (f.name().to_string(), record.value(*f)))
            .collect();
        Self { columns }
    }

    pub fn with_column(mut self, name: impl Into<String>, value: FeatureValue) -> Self {
        self.columns.push((name.into(), value));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn value_at(&self, idx: usize) -> Option<&FeatureValue> {
        self.columns.get(idx).map(|(_, v)| v)
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
