//! Node labels (partitions) and the resources available under each.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::scheduler_info::one_or_many;

/// The partition of nodes that carry no label.
pub const DEFAULT_PARTITION: &str = "";

fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Text(text) => text.trim().eq_ignore_ascii_case("true"),
    })
}

fn default_exclusive() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeLabel {
    pub name: String,
    #[serde(
        rename = "exclusivity",
        default = "default_exclusive",
        deserialize_with = "bool_or_string"
    )]
    pub exclusive: bool,
}

#[derive(Debug, Deserialize)]
struct NodeLabelsResponse {
    #[serde(rename = "nodeLabelInfo", default, deserialize_with = "one_or_many")]
    node_label_info: Vec<NodeLabel>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterNode {
    pub id: String,
    pub state: Option<String>,
    pub node_labels: Vec<String>,
    #[serde(rename = "availMemoryMB")]
    pub avail_memory_mb: u64,
    pub available_virtual_cores: u64,
}

#[derive(Debug, Deserialize)]
struct NodesResponse {
    nodes: Option<NodeList>,
}

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default, deserialize_with = "one_or_many")]
    node: Vec<ClusterNode>,
}

/// Parse the `{"nodes":{"node":[...]}}` REST body.
pub fn parse_nodes(body: &str) -> Result<Vec<ClusterNode>, serde_json::Error> {
    let response: NodesResponse = serde_json::from_str(body)?;
    Ok(response.nodes.map(|n| n.node).unwrap_or_default())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelResources {
    pub nodes: usize,
    pub available_memory_mb: u64,
    pub available_vcores: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeLabelCatalog {
    labels: Vec<NodeLabel>,
    resources: BTreeMap<String, LabelResources>,
}

impl NodeLabelCatalog {
    pub fn new(labels: Vec<NodeLabel>) -> Self {
        Self {
            labels,
            resources: BTreeMap::new(),
        }
    }

    /// Parse the `{"nodeLabelInfo":[...]}` REST body.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let response: NodeLabelsResponse = serde_json::from_str(body)?;
        Ok(Self::new(response.node_label_info))
    }

    /// Aggregate available resources per label from the node listing.
    /// Unlabelled nodes count toward the default partition.
    pub fn with_nodes(mut self, nodes: &[ClusterNode]) -> Self {
        self.resources.clear();
        for node in nodes {
            let partitions: Vec<&str> = if node.node_labels.is_empty() {
                vec![DEFAULT_PARTITION]
            } else {
                node.node_labels.iter().map(String::as_str).collect()
            };
            for partition in partitions {
                if partition != DEFAULT_PARTITION && self.get(partition).is_none() {
                    debug!(node = %node.id, label = %partition, "node carries an unknown label");
                }
                let entry = self.resources.entry(partition.to_string()).or_default();
                entry.nodes += 1;
                entry.available_memory_mb += node.avail_memory_mb;
                entry.available_vcores += node.available_virtual_cores;
            }
        }
        self
    }

    pub fn labels(&self) -> &[NodeLabel] {
        &self.labels
    }

    pub fn get(&self, name: &str) -> Option<&NodeLabel> {
        self.labels.iter().find(|l| l.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn resources_for(&self, partition: &str) -> Option<&LabelResources> {
        self.resources.get(partition)
    }

    /// Choices for the partition selector: the default partition first,
    /// then labels in catalog order.
    pub fn partition_choices(&self) -> Vec<&str> {
        std::iter::once(DEFAULT_PARTITION)
            .chain(self.labels.iter().map(|l| l.name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusivity_forms() {
        let catalog = NodeLabelCatalog::from_json(
            r#"{"nodeLabelInfo":[
                {"name":"gpu","exclusivity":"true"},
                {"name":"ssd","exclusivity":false},
                {"name":"fpga"}
            ]}"#,
        )
        .unwrap();
        assert!(catalog.get("gpu").unwrap().exclusive);
        assert!(!catalog.get("ssd").unwrap().exclusive);
        assert!(catalog.get("fpga").unwrap().exclusive);
        assert_eq!(catalog.partition_choices(), vec!["", "gpu", "ssd", "fpga"]);
    }

    #[test]
    fn test_single_label_object() {
        let catalog =
            NodeLabelCatalog::from_json(r#"{"nodeLabelInfo":{"name":"gpu","exclusivity":"false"}}"#)
                .unwrap();
        assert_eq!(catalog.labels().len(), 1);
        assert!(!catalog.labels()[0].exclusive);

        let empty = NodeLabelCatalog::from_json("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_resources_per_partition() {
        let nodes = parse_nodes(
            r#"{"nodes":{"node":[
                {"id":"n1:8041","nodeLabels":["gpu"],"availMemoryMB":4096,"availableVirtualCores":4},
                {"id":"n2:8041","nodeLabels":["gpu"],"availMemoryMB":2048,"availableVirtualCores":2},
                {"id":"n3:8041","availMemoryMB":1024,"availableVirtualCores":1}
            ]}}"#,
        )
        .unwrap();
        let catalog = NodeLabelCatalog::new(vec![NodeLabel {
            name: "gpu".to_string(),
            exclusive: true,
        }])
        .with_nodes(&nodes);
        assert_eq!(
            catalog.resources_for("gpu"),
            Some(&LabelResources {
                nodes: 2,
                available_memory_mb: 6144,
                available_vcores: 6,
            })
        );
        assert_eq!(catalog.resources_for(DEFAULT_PARTITION).map(|r| r.nodes), Some(1));
        assert!(catalog.resources_for("ssd").is_none());
    }

    #[test]
    fn test_empty_node_listing() {
        assert!(parse_nodes(r#"{"nodes":null}"#).unwrap().is_empty());
    }
}
