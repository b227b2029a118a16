//! Wire shapes exchanged with the configuration-update endpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const SUCCESS_MARKER: &str = "successfully applied";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueUpdate {
    #[serde(rename = "queue-name")]
    pub queue_name: String,
    pub params: BTreeMap<String, String>,
}

/// The consolidated mutation sent on apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    #[serde(rename = "add-queue", default, skip_serializing_if = "Vec::is_empty")]
    pub add_queue: Vec<QueueUpdate>,
    #[serde(rename = "update-queue", default, skip_serializing_if = "Vec::is_empty")]
    pub update_queue: Vec<QueueUpdate>,
    #[serde(rename = "remove-queue", default, skip_serializing_if = "Vec::is_empty")]
    pub remove_queue: Vec<String>,
    #[serde(
        rename = "global-updates",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub global_updates: BTreeMap<String, String>,
}

impl UpdateRequest {
    pub fn is_empty(&self) -> bool {
        self.add_queue.is_empty()
            && self.update_queue.is_empty()
            && self.remove_queue.is_empty()
            && self.global_updates.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What the collaborator answered to an update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResponse {
    pub status: u16,
    pub body: String,
}

impl ApplyResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A 200 whose body says the change was "successfully applied"; a 200
    /// without that phrase is still a failure.
    pub fn is_success(&self) -> bool {
        self.status == 200 && self.body.to_ascii_lowercase().contains(SUCCESS_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sections_are_omitted() {
        let mut request = UpdateRequest::default();
        request.remove_queue.push("root.default".to_string());
        assert_eq!(
            request.to_json().unwrap(),
            r#"{"remove-queue":["root.default"]}"#
        );
    }

    #[test]
    fn test_queue_entry_shape() {
        let mut params = BTreeMap::new();
        params.insert("capacity".to_string(), "10".to_string());
        let request = UpdateRequest {
            add_queue: vec![QueueUpdate {
                queue_name: "root.analytics".to_string(),
                params,
            }],
            ..Default::default()
        };
        let value: serde_json::Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(value["add-queue"][0]["queue-name"], "root.analytics");
        assert_eq!(value["add-queue"][0]["params"]["capacity"], "10");
        assert!(value.get("update-queue").is_none());
    }

    #[test]
    fn test_success_detection() {
        assert!(ApplyResponse::new(200, "Configuration change Successfully Applied.").is_success());
        assert!(!ApplyResponse::new(200, "queue root.x not found").is_success());
        assert!(!ApplyResponse::new(400, "successfully applied").is_success());
    }
}
