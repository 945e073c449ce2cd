use serde::{Deserialize, Serialize};

/// A profile event as consumed from the ingress queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEvent {
    #[serde(rename = "profileID")]
    pub profile_id: i64,
    #[serde(rename = "classID")]
    pub class_id: u8,
}

impl ProfileEvent {
    pub fn new(profile_id: i64, class_id: u8) -> Self {
        Self {
            profile_id,
            class_id,
        }
    }

    /// Decode a raw message body. Bodies that are not valid JSON, or carry a `classID`
    /// outside of the `u8` range, are rejected.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Attach a roadmap to this event, producing the result we publish and persist.
    pub fn enrich(&self, roadmap_id: u8) -> EnrichedResult {
        EnrichedResult {
            profile_id: self.profile_id,
            class_id: self.class_id,
            roadmap_id,
        }
    }
}

/// A `ProfileEvent` enriched with the roadmap its class maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedResult {
    #[serde(rename = "profileID")]
    pub profile_id: i64,
    #[serde(rename = "classID")]
    pub class_id: u8,
    #[serde(rename = "roadmapID")]
    pub roadmap_id: u8,
}

/// Point-in-time view of the processed events counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn decodes_profile_event() {
        let event = ProfileEvent::from_slice(br#"{"profileID": 42, "classID": 1}"#)
            .expect("failed to decode event");

        assert_eq!(event, ProfileEvent::new(42, 1));
    }

    #[test]
    fn rejects_malformed_profile_events() {
        assert!(ProfileEvent::from_slice(b"not json").is_err());
        assert!(ProfileEvent::from_slice(br#"{"profileID": 42}"#).is_err());
        assert!(ProfileEvent::from_slice(br#"{"profileID": 42, "classID": 256}"#).is_err());
        assert!(ProfileEvent::from_slice(br#"{"profileID": "42", "classID": 1}"#).is_err());
    }

    #[test]
    fn enriched_result_wire_format() {
        let result = ProfileEvent::new(42, 1).enrich(7);

        assert_json_eq!(
            serde_json::to_value(result).unwrap(),
            json!({"profileID": 42, "classID": 1, "roadmapID": 7})
        );
    }

    #[test]
    fn stats_snapshot_wire_format() {
        assert_json_eq!(
            serde_json::to_value(StatsSnapshot { count: 20 }).unwrap(),
            json!({"count": 20})
        );
    }
}
