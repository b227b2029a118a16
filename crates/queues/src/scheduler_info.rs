//! Read-only runtime overlay from the scheduler info endpoint. It is merged
//! by path for display and never decides which queues exist.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::tree::{QueueState, QueueTree, ROOT};

/// Accept either a single object or an array of them.
pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    })
}

#[derive(Debug, Deserialize)]
struct SchedulerResponse {
    scheduler: SchedulerWrapper,
}

#[derive(Debug, Deserialize)]
struct SchedulerWrapper {
    #[serde(rename = "schedulerInfo")]
    scheduler_info: QueueInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueInfo {
    pub queue_name: String,
    pub queue_path: Option<String>,
    pub capacity: f64,
    pub used_capacity: f64,
    pub max_capacity: f64,
    pub absolute_capacity: f64,
    pub absolute_used_capacity: f64,
    pub absolute_max_capacity: f64,
    pub num_applications: u64,
    pub num_active_applications: u64,
    pub num_pending_applications: u64,
    pub state: Option<String>,
    pub queues: Option<QueueList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueList {
    #[serde(default, deserialize_with = "one_or_many")]
    pub queue: Vec<QueueInfo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueMetrics {
    pub capacity: f64,
    pub used_capacity: f64,
    pub max_capacity: f64,
    pub absolute_capacity: f64,
    pub absolute_used_capacity: f64,
    pub absolute_max_capacity: f64,
    pub num_applications: u64,
    pub num_active_applications: u64,
    pub num_pending_applications: u64,
    pub state: Option<QueueState>,
}

impl QueueMetrics {
    fn from_info(info: &QueueInfo) -> Self {
        Self {
            capacity: info.capacity,
            used_capacity: info.used_capacity,
            max_capacity: info.max_capacity,
            absolute_capacity: info.absolute_capacity,
            absolute_used_capacity: info.absolute_used_capacity,
            absolute_max_capacity: info.absolute_max_capacity,
            num_applications: info.num_applications,
            num_active_applications: info.num_active_applications,
            num_pending_applications: info.num_pending_applications,
            state: info.state.as_deref().and_then(QueueState::parse),
        }
    }
}

/// Live metrics keyed by queue path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeOverlay {
    metrics: BTreeMap<String, QueueMetrics>,
}

impl RuntimeOverlay {
    pub fn from_info(root: &QueueInfo) -> Self {
        let mut metrics = BTreeMap::new();
        let mut stack: Vec<(String, &QueueInfo)> = vec![(ROOT.to_string(), root)];
        while let Some((fallback_path, info)) = stack.pop() {
            let path = info.queue_path.clone().unwrap_or(fallback_path);
            if let Some(children) = &info.queues {
                for child in &children.queue {
                    stack.push((format!("{path}.{}", child.queue_name), child));
                }
            }
            metrics.insert(path, QueueMetrics::from_info(info));
        }
        debug!(queues = metrics.len(), "loaded scheduler runtime info");
        Self { metrics }
    }

    /// Parse the `{"scheduler":{"schedulerInfo":{...}}}` REST body.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let response: SchedulerResponse = serde_json::from_str(body)?;
        Ok(Self::from_info(&response.scheduler.scheduler_info))
    }

    pub fn get(&self, path: &str) -> Option<&QueueMetrics> {
        self.metrics.get(path)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueueMetrics)> {
        self.metrics.iter().map(|(path, m)| (path.as_str(), m))
    }

    /// Paths reported at runtime that the configuration does not declare.
    pub fn unknown_paths(&self, tree: &QueueTree) -> Vec<&str> {
        self.metrics
            .keys()
            .filter(|path| !tree.contains(path))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{CAPACITY_PREFIX, ConfigProperty};

    const BODY: &str = r#"{"scheduler":{"schedulerInfo":{
        "type":"capacityScheduler","queueName":"root","capacity":100.0,"usedCapacity":12.5,
        "queues":{"queue":[
            {"queueName":"default","queuePath":"root.default","capacity":40.0,
             "usedCapacity":10.0,"absoluteUsedCapacity":4.0,"numApplications":3,"state":"RUNNING"},
            {"queueName":"production","capacity":60.0,"state":"STOPPED",
             "queues":{"queue":{"queueName":"team1","capacity":100.0,"numActiveApplications":2}}}
        ]}
    }}}"#;

    #[test]
    fn test_overlay_paths() {
        let overlay = RuntimeOverlay::from_json(BODY).unwrap();
        assert_eq!(overlay.len(), 4);
        let default = overlay.get("root.default").unwrap();
        assert_eq!(default.num_applications, 3);
        assert_eq!(default.absolute_used_capacity, 4.0);
        let production = overlay.get("root.production").unwrap();
        assert_eq!(production.state, Some(QueueState::Stopped));
        assert_eq!(
            overlay
                .get("root.production.team1")
                .map(|m| m.num_active_applications),
            Some(2)
        );
        assert_eq!(overlay.get("root").map(|m| m.used_capacity), Some(12.5));
    }

    #[test]
    fn test_unknown_paths() {
        let overlay = RuntimeOverlay::from_json(BODY).unwrap();
        let tree = QueueTree::build(vec![ConfigProperty::new(
            format!("{CAPACITY_PREFIX}root.queues"),
            "default,production",
        )]);
        assert_eq!(overlay.unknown_paths(&tree), vec!["root.production.team1"]);
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        assert!(RuntimeOverlay::from_json("{}").is_err());
    }
}
