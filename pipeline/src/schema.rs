//! Event to point conversion and validation
//!
//! A [`PointSchema`] turns a [`StateEvent`] into a [`Point`] and validates
//! points before they are queued or written. Conversion is lossy on purpose:
//! only the configured attribute allow-list is lifted into fields, tags stay
//! small, and anything unrepresentable is skipped rather than guessed at.

use serde_json::Value;
use tracing::debug;
use virta_core::{FieldValue, Point, SinkError, StateEvent};

/// Maps state events onto time-series points
///
/// - measurement: the event domain, unless overridden with a static name
/// - tags: `entity_id` and `domain`, plus configured static tags
/// - fields: numeric states become `value` (float), non-numeric states
///   become `state` (string); allow-listed attributes are lifted with their
///   natural type (numbers, booleans, strings - nulls, arrays and objects
///   are skipped)
#[derive(Debug, Clone, Default)]
pub struct PointSchema {
    measurement_override: Option<String>,
    static_tags: Vec<(String, String)>,
    attribute_fields: Vec<String>,
    required_tags: Vec<String>,
}

impl PointSchema {
    /// Schema with domain-as-measurement and no extra tags or fields
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every point under one fixed measurement instead of the domain
    pub fn with_measurement(mut self, measurement: impl Into<String>) -> Self {
        self.measurement_override = Some(measurement.into());
        self
    }

    /// Add a static tag to every point (e.g. `site=home`)
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_tags.push((key.into(), value.into()));
        self
    }

    /// Lift the named attribute into a field when present
    pub fn with_attribute_field(mut self, name: impl Into<String>) -> Self {
        self.attribute_fields.push(name.into());
        self
    }

    /// Require every point to carry the named tag to pass validation
    ///
    /// Points produced by `event_to_point` always carry `entity_id`; this
    /// matters for points enqueued directly, and for revalidation after the
    /// schema was tightened between enqueue and flush.
    pub fn with_required_tag(mut self, key: impl Into<String>) -> Self {
        self.required_tags.push(key.into());
        self
    }

    /// Convert one event into a point
    ///
    /// Fails with [`SinkError::Conversion`] when the event has no entity id
    /// or no measurement can be derived; those are counted by the writer as
    /// validation failures, they never abort a batch.
    pub fn event_to_point(&self, event: &StateEvent) -> Result<Point, SinkError> {
        if event.entity_id.is_empty() {
            return Err(SinkError::Conversion("event has no entity id".to_string()));
        }

        let measurement = match &self.measurement_override {
            Some(m) => m.as_str(),
            None => event.domain.as_str(),
        };
        if measurement.is_empty() {
            return Err(SinkError::Conversion(format!(
                "no measurement derivable for '{}'",
                event.entity_id
            )));
        }

        let mut point = Point::new(measurement, event.timestamp_ns())
            .tag("entity_id", event.entity_id.as_str());
        if !event.domain.is_empty() {
            point = point.tag("domain", event.domain.as_str());
        }
        for (key, value) in &self.static_tags {
            point = point.tag(key.as_str(), value.as_str());
        }

        point = match event.numeric_state() {
            Some(value) => point.field("value", value),
            None => point.field("state", event.state.as_str()),
        };

        for name in &self.attribute_fields {
            if let Some(value) = event.attribute(name) {
                if let Some(fv) = json_to_field_value(value) {
                    point = point.field(name.as_str(), fv);
                } else {
                    debug!(
                        entity_id = %event.entity_id,
                        attribute = %name,
                        "attribute not representable as a field, skipping"
                    );
                }
            }
        }

        Ok(point)
    }

    /// Validate a point immediately before queueing or writing
    ///
    /// The schema may be reconfigured between enqueue and flush, so the
    /// writer runs this twice: rejection is per-point, counted, and never
    /// blocks the rest of the batch.
    pub fn validate(&self, point: &Point) -> Result<(), SinkError> {
        if point.measurement.is_empty() {
            return Err(SinkError::Conversion("empty measurement".to_string()));
        }
        if point.fields.is_empty() {
            return Err(SinkError::Conversion(format!(
                "point '{}' has no fields",
                point.measurement
            )));
        }
        for (key, value) in &point.fields {
            if !value.is_valid() {
                return Err(SinkError::Conversion(format!(
                    "field '{}' is not representable (non-finite float)",
                    key
                )));
            }
        }
        if point.timestamp_ns <= 0 {
            return Err(SinkError::Conversion(format!(
                "point '{}' has a non-positive timestamp",
                point.measurement
            )));
        }
        for required in &self.required_tags {
            if !point.tags.iter().any(|(k, _)| k == required) {
                return Err(SinkError::Conversion(format!(
                    "point '{}' is missing required tag '{}'",
                    point.measurement, required
                )));
            }
        }
        Ok(())
    }
}

/// Convert a JSON attribute value to a field value with type inference
///
/// Nulls, arrays and objects have no field representation and yield `None`.
fn json_to_field_value(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(FieldValue::Integer(i))
            } else {
                n.as_f64().filter(|f| f.is_finite()).map(FieldValue::Float)
            }
        }
        Value::Bool(b) => Some(FieldValue::Boolean(*b)),
        Value::String(s) => Some(FieldValue::String(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_state_becomes_value_field() {
        let event = StateEvent::new("sensor.kitchen_temperature", "21.5");
        let point = PointSchema::new().event_to_point(&event).unwrap();

        assert_eq!(point.measurement, "sensor");
        assert_eq!(point.fields[0], ("value".to_string(), FieldValue::Float(21.5)));
        assert!(point.tags.iter().any(|(k, v)| k == "entity_id" && v == "sensor.kitchen_temperature"));
        assert!(point.tags.iter().any(|(k, v)| k == "domain" && v == "sensor"));
    }

    #[test]
    fn test_non_numeric_state_becomes_state_field() {
        let event = StateEvent::new("light.hallway", "on");
        let point = PointSchema::new().event_to_point(&event).unwrap();

        assert_eq!(point.measurement, "light");
        assert_eq!(
            point.fields[0],
            ("state".to_string(), FieldValue::String("on".to_string()))
        );
    }

    #[test]
    fn test_measurement_override_and_static_tags() {
        let schema = PointSchema::new()
            .with_measurement("home_state")
            .with_tag("site", "cabin");
        let event = StateEvent::new("sensor.t", "1");
        let point = schema.event_to_point(&event).unwrap();

        assert_eq!(point.measurement, "home_state");
        assert!(point.tags.iter().any(|(k, v)| k == "site" && v == "cabin"));
    }

    #[test]
    fn test_attribute_fields_lifted_with_types() {
        let schema = PointSchema::new()
            .with_attribute_field("brightness")
            .with_attribute_field("battery")
            .with_attribute_field("charging")
            .with_attribute_field("linkquality");
        let event = StateEvent::new("light.desk", "on")
            .with_attribute("brightness", 200)
            .with_attribute("battery", 87.5)
            .with_attribute("charging", true)
            .with_attribute("ignored", 1);
        let point = schema.event_to_point(&event).unwrap();

        let field = |name: &str| {
            point
                .fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(field("brightness"), Some(FieldValue::Integer(200)));
        assert_eq!(field("battery"), Some(FieldValue::Float(87.5)));
        assert_eq!(field("charging"), Some(FieldValue::Boolean(true)));
        // Not on the allow-list
        assert_eq!(field("ignored"), None);
        // Absent attribute is skipped, not an error
        assert_eq!(field("linkquality"), None);
    }

    #[test]
    fn test_unrepresentable_attribute_skipped() {
        let schema = PointSchema::new().with_attribute_field("options");
        let event = StateEvent::new("select.mode", "eco")
            .with_attribute("options", serde_json::json!(["eco", "boost"]));
        let point = schema.event_to_point(&event).unwrap();

        assert!(point.fields.iter().all(|(k, _)| k != "options"));
        // State field still present
        assert_eq!(point.fields.len(), 1);
    }

    #[test]
    fn test_missing_entity_id_fails_conversion() {
        let mut event = StateEvent::new("sensor.t", "1");
        event.entity_id = String::new();
        let err = PointSchema::new().event_to_point(&event).unwrap_err();
        assert!(matches!(err, SinkError::Conversion(_)));
    }

    #[test]
    fn test_point_from_valid_event_passes_validation() {
        let schema = PointSchema::new();
        let event = StateEvent::new("sensor.t", "21.5");
        let point = schema.event_to_point(&event).unwrap();
        schema.validate(&point).unwrap();
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let point = Point::new("m", 1);
        assert!(PointSchema::new().validate(&point).is_err());
    }

    #[test]
    fn test_validation_rejects_non_finite_float() {
        let point = Point::new("m", 1).field("value", f64::NAN);
        assert!(PointSchema::new().validate(&point).is_err());
    }

    #[test]
    fn test_validation_rejects_non_positive_timestamp() {
        let point = Point::new("m", 0).field("value", 1.0);
        assert!(PointSchema::new().validate(&point).is_err());
    }

    #[test]
    fn test_validation_enforces_required_tags() {
        let schema = PointSchema::new().with_required_tag("entity_id");
        let tagged = Point::new("m", 1)
            .tag("entity_id", "sensor.t")
            .field("value", 1.0);
        let untagged = Point::new("m", 1).field("value", 1.0);

        schema.validate(&tagged).unwrap();
        assert!(schema.validate(&untagged).is_err());
    }
}
