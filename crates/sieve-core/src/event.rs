//! Event batches and per-message metadata.
//!
//! Events are kept close to their JSON shape: the sandboxed script sees the
//! batch exactly as it was serialised, including fields this type does not
//! name (they ride along in `extra`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single event handed to a transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub message: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Any other top-level fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    pub fn new(message: Value) -> Self {
        Self {
            message,
            destination: None,
            metadata: None,
            extra: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_destination(mut self, destination: Value) -> Self {
        self.destination = Some(destination);
        self
    }

    /// `message.messageId`, when present and a string
    pub fn message_id(&self) -> Option<&str> {
        self.message.get("messageId").and_then(Value::as_str)
    }
}

/// Ordered batch of events; order is preserved end-to-end.
pub type EventBatch = Vec<Event>;

/// Metadata records keyed by message id, consulted by the `metadata` bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataMap(HashMap<String, Value>);

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map from the events themselves: every event with a string
    /// `message.messageId` and a `metadata` field contributes one entry.
    pub fn from_events(events: &[Event]) -> Self {
        let map = events
            .iter()
            .filter_map(|event| {
                let id = event.message_id()?;
                let metadata = event.metadata.as_ref()?;
                Some((id.to_string(), metadata.clone()))
            })
            .collect();
        Self(map)
    }

    pub fn insert(&mut self, message_id: impl Into<String>, record: Value) {
        self.0.insert(message_id.into(), record);
    }

    /// Record for `message_id`, or an empty object when unknown.
    pub fn lookup(&self, message_id: &str) -> Value {
        self.0
            .get(message_id)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for MetadataMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_serialization() {
        let raw = json!({
            "message": { "messageId": "m-1" },
            "destination": { "ID": "dest" },
            "sourceId": "src-7"
        });
        let event: Event = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(event.extra.get("sourceId"), Some(&json!("src-7")));
        assert_eq!(serde_json::to_value(&event).unwrap(), raw);
    }

    #[test]
    fn metadata_map_from_events() {
        let events = vec![
            Event::new(json!({ "messageId": "a" })).with_metadata(json!({ "sourceType": "web" })),
            Event::new(json!({ "messageId": "b" })),
            Event::new(json!({ "anonymousId": "x" })).with_metadata(json!({ "ignored": true })),
        ];
        let map = MetadataMap::from_events(&events);
        assert_eq!(map.len(), 1);
        assert_eq!(map.lookup("a"), json!({ "sourceType": "web" }));
    }

    #[test]
    fn lookup_of_unknown_id_is_empty_record() {
        let map = MetadataMap::new();
        assert_eq!(map.lookup("missing"), json!({}));
    }
}
