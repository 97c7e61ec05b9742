//! The `/predict` request body and its validation.
//!
//! Validation runs in two passes: a presence/type pass over the raw JSON
//! object (so errors name the offending field) and a typed serde pass into
//! [`RawRecord`]. Age, ratings and multiple deliveries arrive as text in the
//! raw dataset; they are coerced to numbers here, at the boundary. Vehicle
//! condition takes integral text the same way.

use serde::{de, Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::features::{Feature, FeatureValue};

/// Accepted JSON shape of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// JSON number.
    Number,
    /// JSON integer or a string holding one, e.g. `"2"`.
    Integer,
    /// JSON number or a string holding one, e.g. `"37"`.
    NumericText,
    /// JSON string.
    Text,
}

/// Optional descriptive fields: type-checked when present, never fed to the model.
const DESCRIPTIVE: [(&str, FieldKind); 9] = [
    ("ID", FieldKind::Text),
    ("Delivery_person_ID", FieldKind::Text),
    ("Restaurant_latitude", FieldKind::Number),
    ("Restaurant_longitude", FieldKind::Number),
    ("Delivery_location_latitude", FieldKind::Number),
    ("Delivery_location_longitude", FieldKind::Number),
    ("Order_Date", FieldKind::Text),
    ("Time_Orderd", FieldKind::Text),
    ("Time_Order_picked", FieldKind::Text),
];

/// One validated delivery order. Immutable once built.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawRecord {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "Delivery_person_ID", default)]
    pub delivery_person_id: Option<String>,
    #[serde(rename = "Restaurant_latitude", default)]
    pub restaurant_latitude: Option<f64>,
    #[serde(rename = "Restaurant_longitude", default)]
    pub restaurant_longitude: Option<f64>,
    #[serde(rename = "Delivery_location_latitude", default)]
    pub delivery_location_latitude: Option<f64>,
    #[serde(rename = "Delivery_location_longitude", default)]
    pub delivery_location_longitude: Option<f64>,
    #[serde(rename = "Order_Date", default)]
    pub order_date: Option<String>,
    #[serde(rename = "Time_Orderd", default)]
    pub time_ordered: Option<String>,
    #[serde(rename = "Time_Order_picked", default)]
    pub time_order_picked: Option<String>,

    #[serde(rename = "Delivery_person_Age", alias = "age", deserialize_with = "numeric_text")]
    pub age: f64,
    #[serde(rename = "Delivery_person_Ratings", alias = "ratings", deserialize_with = "numeric_text")]
    pub ratings: f64,
    #[serde(rename = "Weatherconditions", alias = "weather")]
    pub weather: String,
    #[serde(rename = "Road_traffic_density", alias = "traffic")]
    pub traffic: String,
    #[serde(rename = "Vehicle_condition", alias = "vehicle_condition", deserialize_with = "integer_text")]
    pub vehicle_condition: i64,
    #[serde(rename = "Type_of_order", alias = "type_of_order")]
    pub type_of_order: String,
    #[serde(rename = "Type_of_vehicle", alias = "type_of_vehicle")]
    pub type_of_vehicle: String,
    #[serde(deserialize_with = "numeric_text")]
    pub multiple_deliveries: f64,
    #[serde(rename = "Festival", alias = "festival")]
    pub festival: String,
    #[serde(rename = "City", alias = "city_type")]
    pub city_type: String,
    pub is_weekend: String,
    pub pickup_time_minutes: f64,
    pub order_time_of_day: String,
    pub distance: f64,
    pub distance_type: String,
}

impl RawRecord {
    /// Value of `feature` as the transformer will see it.
    pub fn value(&self, feature: Feature) -> FeatureValue {
        use FeatureValue::{Number, Text};
        match feature {
            Feature::Age => Number(self.age),
            Feature::Ratings => Number(self.ratings),
            Feature::Weather => Text(self.weather.clone()),
            Feature::Traffic => Text(self.traffic.clone()),
            Feature::VehicleCondition => Number(self.vehicle_condition as f64),
            Feature::TypeOfOrder => Text(self.type_of_order.clone()),
            Feature::TypeOfVehicle => Text(self.type_of_vehicle.clone()),
            Feature::MultipleDeliveries => Number(self.multiple_deliveries),
            Feature::Festival => Text(self.festival.clone()),
            Feature::CityType => Text(self.city_type.clone()),
            Feature::IsWeekend => Text(self.is_weekend.clone()),
            Feature::PickupTimeMinutes => Number(self.pickup_time_minutes),
            Feature::OrderTimeOfDay => Text(self.order_time_of_day.clone()),
            Feature::Distance => Number(self.distance),
            Feature::DistanceType => Text(self.distance_type.clone()),
        }
    }
}

/// Parse and validate a raw request body.
pub fn parse_body(body: &[u8]) -> Result<RawRecord, ValidationError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
    validate(&value)
}

/// Validate an already-decoded JSON value against the request schema.
pub fn validate(body: &Value) -> Result<RawRecord, ValidationError> {
    let obj = body.as_object().ok_or(ValidationError::NotAnObject)?;

    // presence first, so a missing field wins over a mistyped one
    let mut present = Vec::with_capacity(Feature::ALL.len());
    for feature in Feature::ALL {
        match lookup(obj, feature)? {
            Some(entry) => present.push((entry, feature.kind())),
            None => return Err(ValidationError::MissingField(feature.wire_name())),
        }
    }
    for ((key, value), kind) in present {
        check_kind(key, value, kind)?;
    }
    for (key, kind) in DESCRIPTIVE {
        match obj.get(key) {
            None | Some(Value::Null) => {}
            Some(value) => check_kind(key, value, kind)?,
        }
    }

    serde_json::from_value(body.clone()).map_err(|e| ValidationError::InvalidType {
        field: "body".to_string(),
        reason: e.to_string(),
    })
}

fn lookup<'a>(
    obj: &'a Map<String, Value>,
    feature: Feature,
) -> Result<Option<(&'a str, &'a Value)>, ValidationError> {
    let wire = obj.get_key_value(feature.wire_name());
    let alias = if feature.wire_name() == feature.name() {
        None
    } else {
        obj.get_key_value(feature.name())
    };
    match (wire, alias) {
        (Some(_), Some(_)) => Err(ValidationError::InvalidType {
            field: feature.wire_name().to_string(),
            reason: format!("given twice, also as '{}'", feature.name()),
        }),
        (Some((k, v)), None) | (None, Some((k, v))) => Ok(Some((k.as_str(), v))),
        (None, None) => Ok(None),
    }
}

fn check_kind(field: &str, value: &Value, kind: FieldKind) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidType {
        field: field.to_string(),
        reason: reason.to_string(),
    };
    match kind {
        FieldKind::Number => match value.as_f64() {
            Some(v) if v.is_finite() => Ok(()),
            _ => Err(invalid("expected a number")),
        },
        FieldKind::Integer => match value {
            Value::Number(n) if n.is_i64() => Ok(()),
            Value::String(s) if s.trim().parse::<i64>().is_ok() => Ok(()),
            _ => Err(invalid("expected an integer")),
        },
        FieldKind::NumericText => match value {
            Value::Number(_) => Ok(()),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(()),
                _ => Err(invalid("expected a number or numeric text")),
            },
            _ => Err(invalid("expected a number or numeric text")),
        },
        FieldKind::Text => match value {
            Value::String(_) => Ok(()),
            _ => Err(invalid("expected a string")),
        },
    }
}

fn numeric_text<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(v) => Ok(v),
        Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn integer_text<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario() -> Value {
        json!({
            "weather": "Sunny",
            "traffic": "Low",
            "distance": 5.2,
            "age": 30,
            "ratings": 4.5,
            "vehicle_condition": 1,
            "type_of_order": "Snack",
            "type_of_vehicle": "motorcycle",
            "multiple_deliveries": "0",
            "festival": "No",
            "city_type": "Urban",
            "is_weekend": "0",
            "pickup_time_minutes": 10,
            "order_time_of_day": "Afternoon",
            "distance_type": "short"
        })
    }

    #[test]
    fn accepts_feature_named_body() {
        let record = validate(&scenario()).unwrap();
        assert_eq!(record.age, 30.0);
        assert_eq!(record.multiple_deliveries, 0.0);
        assert_eq!(record.vehicle_condition, 1);
        assert_eq!(record.weather, "Sunny");
        assert!(record.id.is_none());
    }

    #[test]
    fn accepts_wire_named_body() {
        let body = json!({
            "ID": "0x4607",
            "Delivery_person_ID": "INDORES13DEL02",
            "Delivery_person_Age": "37",
            "Delivery_person_Ratings": "4.9",
            "Restaurant_latitude": 22.745049,
            "Restaurant_longitude": 75.892471,
            "Delivery_location_latitude": 22.765049,
            "Delivery_location_longitude": 75.912471,
            "Order_Date": "19-03-2022",
            "Time_Orderd": "11:30:00",
            "Time_Order_picked": "11:45:00",
            "Weatherconditions": "Sunny",
            "Road_traffic_density": "High",
            "Vehicle_condition": 2,
            "Type_of_order": "Snack",
            "Type_of_vehicle": "motorcycle",
            "multiple_deliveries": "0",
            "Festival": "No",
            "City": "Urban",
            "is_weekend": "0",
            "pickup_time_minutes": 15,
            "order_time_of_day": "Morning",
            "distance": 3.02,
            "distance_type": "short"
        });
        let record = validate(&body).unwrap();
        assert_eq!(record.age, 37.0);
        assert_eq!(record.ratings, 4.9);
        assert_eq!(record.traffic, "High");
        assert_eq!(record.id.as_deref(), Some("0x4607"));
        assert_eq!(record.value(Feature::CityType), FeatureValue::Text("Urban".into()));
    }

    #[test]
    fn every_required_field_is_enforced() {
        for feature in Feature::ALL {
            let mut body = scenario();
            body.as_object_mut().unwrap().remove(feature.name());
            assert_eq!(
                validate(&body),
                Err(ValidationError::MissingField(feature.wire_name())),
                "removing {} should be rejected",
                feature
            );
        }
    }

    #[test]
    fn rejects_mistyped_fields() {
        let mut body = scenario();
        body["distance"] = json!("far");
        assert!(matches!(
            validate(&body),
            Err(ValidationError::InvalidType { field, .. }) if field == "distance"
        ));

        let mut body = scenario();
        body["age"] = json!("thirty");
        assert!(matches!(
            validate(&body),
            Err(ValidationError::InvalidType { field, .. }) if field == "age"
        ));

        let mut body = scenario();
        body["vehicle_condition"] = json!(1.5);
        assert!(matches!(validate(&body), Err(ValidationError::InvalidType { .. })));

        let mut body = scenario();
        body["weather"] = json!(3);
        assert!(matches!(validate(&body), Err(ValidationError::InvalidType { .. })));

        let mut body = scenario();
        body["Restaurant_latitude"] = json!("north");
        assert!(matches!(
            validate(&body),
            Err(ValidationError::InvalidType { field, .. }) if field == "Restaurant_latitude"
        ));
    }

    #[test]
    fn vehicle_condition_takes_integral_text() {
        let mut body = scenario();
        body["vehicle_condition"] = json!(" 2");
        assert_eq!(validate(&body).unwrap().vehicle_condition, 2);

        for bad in [json!("2.5"), json!("good"), json!(2.0)] {
            let mut body = scenario();
            body["vehicle_condition"] = bad.clone();
            assert!(
                matches!(
                    validate(&body),
                    Err(ValidationError::InvalidType { field, .. }) if field == "vehicle_condition"
                ),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn rejects_nan_text_for_numeric_fields() {
        let mut body = scenario();
        body["ratings"] = json!("NaN ");
        assert!(matches!(validate(&body), Err(ValidationError::InvalidType { .. })));
    }

    #[test]
    fn rejects_field_given_twice() {
        let mut body = scenario();
        body["Delivery_person_Age"] = json!(31);
        assert!(matches!(validate(&body), Err(ValidationError::InvalidType { .. })));
    }

    #[test]
    fn body_must_be_an_object() {
        assert_eq!(validate(&json!([1, 2])), Err(ValidationError::NotAnObject));
        assert!(matches!(parse_body(b"{\"age\":"), Err(ValidationError::MalformedBody(_))));
    }

    #[test]
    fn nulls_are_allowed_for_descriptive_fields_only() {
        let mut body = scenario();
        body["ID"] = Value::Null;
        assert!(validate(&body).is_ok());

        let mut body = scenario();
        body["traffic"] = Value::Null;
        assert!(matches!(validate(&body), Err(ValidationError::InvalidType { .. })));
    }
}
