//! The state-change event record
//!
//! A [`StateEvent`] is one observed state change pushed from the upstream
//! home-automation subscription. It is the universal record that flows
//! through the pipeline: filter → batch → point conversion → sink.
//!
//! The record is deliberately opaque to the pipeline itself: everything
//! beyond the identifying fields lives in the attribute map, and consumers
//! pull what they need through accessors rather than assuming a shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One home-automation state change
///
/// # Example
///
/// ```
/// use virta_core::StateEvent;
///
/// let event = StateEvent::new("sensor.kitchen_temperature", "21.5")
///     .with_attribute("unit_of_measurement", "°C")
///     .with_attribute("device_class", "temperature");
///
/// assert_eq!(event.domain, "sensor");
/// assert_eq!(event.device_class(), Some("temperature"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    /// Entity identifier, `<domain>.<object_id>` (e.g. `light.hallway`)
    pub entity_id: String,

    /// Entity domain (e.g. `sensor`, `light`, `binary_sensor`)
    ///
    /// Derived from the entity id at construction; kept denormalized because
    /// every filter rule and point conversion reads it.
    pub domain: String,

    /// The new state value, as reported upstream (always textual)
    pub state: String,

    /// When the state change occurred, per the upstream clock
    pub timestamp: DateTime<Utc>,

    /// Entity attributes at the time of the change
    ///
    /// Opaque to the pipeline. Well-known keys (`device_class`, `area_id`,
    /// `friendly_name`) have accessors; everything else is consumer-defined.
    pub attributes: Map<String, Value>,
}

impl StateEvent {
    /// Create a new event with the current timestamp and empty attributes
    ///
    /// The domain is derived from the portion of `entity_id` before the
    /// first `.`; an id without a `.` yields an empty domain.
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        let entity_id = entity_id.into();
        let domain = entity_id
            .split_once('.')
            .map(|(d, _)| d.to_string())
            .unwrap_or_default();
        Self {
            entity_id,
            domain,
            state: state.into(),
            timestamp: Utc::now(),
            attributes: Map::new(),
        }
    }

    /// Create an event with an explicit timestamp
    pub fn with_timestamp(
        entity_id: impl Into<String>,
        state: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut event = Self::new(entity_id, state);
        event.timestamp = timestamp;
        event
    }

    /// Add an attribute to the event
    ///
    /// # Example
    /// ```
    /// use virta_core::StateEvent;
    ///
    /// let event = StateEvent::new("light.hallway", "on")
    ///     .with_attribute("brightness", 255)
    ///     .with_attribute("area_id", "hallway");
    /// ```
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get an attribute value by key
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Get a string attribute by key
    ///
    /// Returns `None` when the key is absent or the value is not a string.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// The entity's device class, if the upstream reported one
    pub fn device_class(&self) -> Option<&str> {
        self.attribute_str("device_class")
    }

    /// The area the entity is assigned to, if any
    pub fn area_id(&self) -> Option<&str> {
        self.attribute_str("area_id")
    }

    /// Human-readable entity name, if the upstream reported one
    pub fn friendly_name(&self) -> Option<&str> {
        self.attribute_str("friendly_name")
    }

    /// The state parsed as a finite float, if it is numeric
    ///
    /// Non-numeric states (`on`, `unavailable`, ...) and non-finite parses
    /// return `None`.
    pub fn numeric_state(&self) -> Option<f64> {
        self.state.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }

    /// Event timestamp as nanoseconds since the Unix epoch
    ///
    /// Saturates instead of overflowing for timestamps past ~2262.
    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_millis().saturating_mul(1_000_000))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_derived_from_entity_id() {
        let event = StateEvent::new("sensor.kitchen_temperature", "21.5");
        assert_eq!(event.domain, "sensor");
        assert_eq!(event.entity_id, "sensor.kitchen_temperature");
    }

    #[test]
    fn test_entity_id_without_dot_has_empty_domain() {
        let event = StateEvent::new("orphan", "on");
        assert_eq!(event.domain, "");
    }

    #[test]
    fn test_attribute_accessors() {
        let event = StateEvent::new("sensor.kitchen_temperature", "21.5")
            .with_attribute("device_class", "temperature")
            .with_attribute("area_id", "kitchen")
            .with_attribute("friendly_name", "Kitchen temperature")
            .with_attribute("brightness", 255);

        assert_eq!(event.device_class(), Some("temperature"));
        assert_eq!(event.area_id(), Some("kitchen"));
        assert_eq!(event.friendly_name(), Some("Kitchen temperature"));
        // Non-string attribute is not visible through the str accessor
        assert_eq!(event.attribute_str("brightness"), None);
        assert_eq!(event.attribute("brightness").unwrap().as_i64(), Some(255));
    }

    #[test]
    fn test_numeric_state() {
        assert_eq!(StateEvent::new("sensor.t", "21.5").numeric_state(), Some(21.5));
        assert_eq!(StateEvent::new("sensor.t", " 42 ").numeric_state(), Some(42.0));
        assert_eq!(StateEvent::new("light.x", "on").numeric_state(), None);
        assert_eq!(StateEvent::new("sensor.t", "NaN").numeric_state(), None);
        assert_eq!(StateEvent::new("sensor.t", "unavailable").numeric_state(), None);
    }

    #[test]
    fn test_timestamp_ns_matches_timestamp() {
        let ts = Utc::now();
        let event = StateEvent::with_timestamp("sensor.t", "1", ts);
        assert_eq!(event.timestamp_ns(), ts.timestamp_nanos_opt().unwrap());
    }

    #[test]
    fn test_serde_round_trip() {
        let event = StateEvent::new("binary_sensor.door", "off")
            .with_attribute("device_class", "door");

        let json = serde_json::to_string(&event).unwrap();
        let back: StateEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.entity_id, event.entity_id);
        assert_eq!(back.domain, event.domain);
        assert_eq!(back.state, event.state);
        assert_eq!(back.device_class(), Some("door"));
    }
}
