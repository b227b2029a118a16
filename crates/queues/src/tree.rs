//! The queue hierarchy built from the flat `yarn.scheduler.capacity.*`
//! property namespace.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capacity::{CapacityMode, CapacityValue, parse_resource_amount};

pub const CAPACITY_PREFIX: &str = "yarn.scheduler.capacity.";
pub const ROOT: &str = "root";

pub const KEY_QUEUES: &str = "queues";
pub const KEY_CAPACITY: &str = "capacity";
pub const KEY_MAX_CAPACITY: &str = "maximum-capacity";
pub const KEY_STATE: &str = "state";
pub const KEY_NODE_LABELS: &str = "accessible-node-labels";

/// Queue-scoped keys that legitimately contain dots. Any other dotted
/// remainder names a queue that was never declared.
const DOTTED_KEY_PREFIXES: &[&str] = &[
    "accessible-node-labels.",
    "ordering-policy.",
    "auto-queue-creation-v2.",
    "leaf-queue-template.",
    "auto-create-child-queue.",
];

/// One `{name, value}` pair of the scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigProperty {
    pub name: String,
    pub value: String,
}

impl ConfigProperty {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigResponse {
    #[serde(default)]
    property: Vec<ConfigProperty>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueState {
    #[default]
    Running,
    Stopped,
}

impl QueueState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Some(Self::Running),
            "STOPPED" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
        }
    }
}

/// Capacity settings of a queue within one node-label partition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelCapacity {
    pub capacity: CapacityValue,
    pub max_capacity: CapacityValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueNode {
    pub path: String,
    pub name: String,
    /// Parent path; the tree is an arena keyed by path.
    pub parent: Option<String>,
    /// Child paths in declaration order.
    pub children: Vec<String>,
    pub capacity: CapacityValue,
    pub max_capacity: CapacityValue,
    pub state: QueueState,
    pub properties: BTreeMap<String, String>,
    pub accessible_node_labels: BTreeSet<String>,
    pub label_capacities: BTreeMap<String, LabelCapacity>,
    // Derived from staged changes, never loaded.
    pub is_new: bool,
    pub is_deleted: bool,
}

impl QueueNode {
    pub fn new(path: &str, parent: Option<String>) -> Self {
        let name = path.rsplit('.').next().unwrap_or(path).to_string();
        let mut node = Self {
            path: path.to_string(),
            name,
            parent,
            children: Vec::new(),
            capacity: CapacityValue::default(),
            max_capacity: CapacityValue::percentage(100.0),
            state: QueueState::Running,
            properties: BTreeMap::new(),
            accessible_node_labels: BTreeSet::new(),
            label_capacities: BTreeMap::new(),
            is_new: false,
            is_deleted: false,
        };
        node.refresh_derived();
        node
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.path.matches('.').count()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Capacity for a node-label partition; `""` is the default partition.
    pub fn capacity_in(&self, partition: &str) -> Option<&CapacityValue> {
        if partition.is_empty() {
            Some(&self.capacity)
        } else {
            self.label_capacities.get(partition).map(|c| &c.capacity)
        }
    }

    pub fn max_capacity_in(&self, partition: &str) -> Option<&CapacityValue> {
        if partition.is_empty() {
            Some(&self.max_capacity)
        } else {
            self.label_capacities.get(partition).map(|c| &c.max_capacity)
        }
    }

    /// Recompute the typed fields from the raw property map.
    pub fn refresh_derived(&mut self) {
        let default_capacity = if self.is_root() { "100" } else { "0" };
        self.capacity = CapacityValue::parse(
            self.property(KEY_CAPACITY).unwrap_or(default_capacity),
        );
        self.max_capacity =
            CapacityValue::parse(self.property(KEY_MAX_CAPACITY).unwrap_or("100"));
        self.state = self
            .property(KEY_STATE)
            .and_then(QueueState::parse)
            .unwrap_or_default();

        self.accessible_node_labels = self
            .property(KEY_NODE_LABELS)
            .map(|labels| {
                labels
                    .split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut label_capacities: BTreeMap<String, LabelCapacity> = BTreeMap::new();
        for (key, value) in &self.properties {
            let Some(rest) = key.strip_prefix("accessible-node-labels.") else {
                continue;
            };
            if let Some(label) = rest.strip_suffix(".maximum-capacity") {
                label_capacities
                    .entry(label.to_string())
                    .or_insert_with(|| LabelCapacity {
                        capacity: CapacityValue::default(),
                        max_capacity: CapacityValue::percentage(100.0),
                    })
                    .max_capacity = CapacityValue::parse(value);
            } else if let Some(label) = rest.strip_suffix(".capacity") {
                label_capacities
                    .entry(label.to_string())
                    .or_insert_with(|| LabelCapacity {
                        capacity: CapacityValue::default(),
                        max_capacity: CapacityValue::percentage(100.0),
                    })
                    .capacity = CapacityValue::parse(value);
            }
        }
        self.label_capacities = label_capacities;
    }
}

/// Advisory check of sibling invariant (iii) under one parent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SiblingReport {
    pub parent: String,
    pub partition: String,
    /// `None` when the children disagree or there are none.
    pub mode: Option<CapacityMode>,
    pub percentage_sum: f64,
    pub weight_sum: f64,
    pub issues: Vec<String>,
}

impl SiblingReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueTree {
    nodes: HashMap<String, QueueNode>,
    global: BTreeMap<String, String>,
}

impl Default for QueueTree {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT.to_string(), QueueNode::new(ROOT, None));
        Self {
            nodes,
            global: BTreeMap::new(),
        }
    }
}

impl QueueTree {
    /// Build the hierarchy from a flat property list.
    ///
    /// Queue existence comes only from `<path>.queues` declarations starting
    /// at `root`; properties of undeclared queues are dropped and keys that
    /// belong to no queue go to the global side table.
    pub fn build<I>(properties: I) -> Self
    where
        I: IntoIterator<Item = ConfigProperty>,
    {
        let mut scoped: Vec<(String, String)> = Vec::new();
        let mut global = BTreeMap::new();
        for property in properties {
            match property.name.strip_prefix(CAPACITY_PREFIX) {
                Some(key) => scoped.push((key.to_string(), property.value)),
                None => {
                    global.insert(property.name, property.value);
                }
            }
        }

        let declared: HashMap<&str, &str> = scoped
            .iter()
            .filter_map(|(key, value)| {
                key.strip_suffix(".queues")
                    .map(|path| (path, value.as_str()))
            })
            .collect();

        // Pass 1: expand declared children from root.
        let mut nodes: HashMap<String, QueueNode> = HashMap::new();
        nodes.insert(ROOT.to_string(), QueueNode::new(ROOT, None));
        let mut stack = vec![ROOT.to_string()];
        while let Some(path) = stack.pop() {
            let Some(children) = declared.get(path.as_str()) else {
                continue;
            };
            let mut child_paths = Vec::new();
            for child in children.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                let child_path = format!("{path}.{child}");
                if nodes.contains_key(&child_path) {
                    warn!(queue = %child_path, "queue declared more than once, ignoring");
                    continue;
                }
                nodes.insert(
                    child_path.clone(),
                    QueueNode::new(&child_path, Some(path.clone())),
                );
                child_paths.push(child_path);
            }
            for child_path in child_paths.iter().rev() {
                stack.push(child_path.clone());
            }
            if let Some(node) = nodes.get_mut(&path) {
                node.children = child_paths;
            }
        }

        // Pass 2: attach properties by longest matching queue path.
        let mut by_length: Vec<String> = nodes.keys().cloned().collect();
        by_length.sort_by(|a, b| b.len().cmp(&a.len()));

        for (key, value) in scoped {
            let owner = by_length.iter().find(|path| {
                key.len() > path.len() + 1
                    && key.starts_with(path.as_str())
                    && key.as_bytes()[path.len()] == b'.'
            });
            match owner {
                Some(path) => {
                    let suffix = &key[path.len() + 1..];
                    if suffix.contains('.')
                        && !DOTTED_KEY_PREFIXES.iter().any(|p| suffix.starts_with(p))
                    {
                        debug!(property = %key, "property of an undeclared queue, ignoring");
                        continue;
                    }
                    if let Some(node) = nodes.get_mut(path) {
                        node.properties.insert(suffix.to_string(), value);
                    }
                }
                None => {
                    global.insert(format!("{CAPACITY_PREFIX}{key}"), value);
                }
            }
        }

        for node in nodes.values_mut() {
            node.refresh_derived();
        }

        debug!(queues = nodes.len(), globals = global.len(), "built queue tree");
        Self { nodes, global }
    }

    /// Build from the scheduler-conf REST body `{"property": [...]}`.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let response: ConfigResponse = serde_json::from_str(body)?;
        Ok(Self::build(response.property))
    }

    pub fn get_node(&self, path: &str) -> Option<&QueueNode> {
        self.nodes.get(path)
    }

    pub(crate) fn get_node_mut(&mut self, path: &str) -> Option<&mut QueueNode> {
        self.nodes.get_mut(path)
    }

    pub fn root(&self) -> &QueueNode {
        // Every constructor inserts root and nothing removes it.
        &self.nodes[ROOT]
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent_of(&self, path: &str) -> Option<&QueueNode> {
        let parent = self.nodes.get(path)?.parent.as_deref()?;
        self.nodes.get(parent)
    }

    pub fn children_of(&self, path: &str) -> Vec<&QueueNode> {
        self.nodes
            .get(path)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| self.nodes.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_leaf(&self, path: &str) -> bool {
        self.nodes.get(path).is_some_and(QueueNode::is_leaf)
    }

    pub fn global_properties(&self) -> &BTreeMap<String, String> {
        &self.global
    }

    /// Pre-order: parents before children, children in declared order.
    pub fn get_all_paths(&self) -> Vec<String> {
        self.flatten().into_iter().map(|n| n.path.clone()).collect()
    }

    pub fn flatten(&self) -> Vec<&QueueNode> {
        self.descendants_of(ROOT, true)
    }

    /// Pre-order walk below `path`, optionally including `path` itself.
    pub fn descendants_of(&self, path: &str, include_self: bool) -> Vec<&QueueNode> {
        let mut out = Vec::new();
        let Some(start) = self.nodes.get(path) else {
            return out;
        };
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&QueueNode> = Vec::new();
        if include_self {
            stack.push(start);
        } else {
            stack.extend(start.children.iter().rev().filter_map(|c| self.nodes.get(c)));
        }
        while let Some(node) = stack.pop() {
            if !visited.insert(node.path.as_str()) {
                continue;
            }
            out.push(node);
            stack.extend(node.children.iter().rev().filter_map(|c| self.nodes.get(c)));
        }
        out
    }

    /// Insert a node under an existing parent, appending it to the parent's
    /// children. Used to materialise staged additions.
    pub(crate) fn insert_child(&mut self, mut node: QueueNode) -> bool {
        let Some(parent_path) = node.parent.clone() else {
            return false;
        };
        if self.nodes.contains_key(&node.path) {
            return false;
        }
        let Some(parent) = self.nodes.get_mut(&parent_path) else {
            return false;
        };
        parent.children.push(node.path.clone());
        node.refresh_derived();
        self.nodes.insert(node.path.clone(), node);
        true
    }

    pub(crate) fn global_properties_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.global
    }

    /// Check the sibling capacity invariant under `parent` for a partition.
    pub fn sibling_report(&self, parent: &str, partition: &str) -> SiblingReport {
        let mut report = SiblingReport {
            parent: parent.to_string(),
            partition: partition.to_string(),
            ..Default::default()
        };
        let children: Vec<&QueueNode> = self
            .children_of(parent)
            .into_iter()
            .filter(|c| !c.is_deleted)
            .collect();

        let capacities: Vec<(&QueueNode, &CapacityValue)> = children
            .iter()
            .filter_map(|c| c.capacity_in(partition).map(|cap| (*c, cap)))
            .collect();

        let modes: BTreeSet<&'static str> =
            capacities.iter().map(|(_, c)| c.mode().as_str()).collect();
        if modes.len() > 1 {
            report.issues.push(format!(
                "children of {parent} mix capacity modes: {}",
                modes.into_iter().collect::<Vec<_>>().join(", ")
            ));
        } else {
            report.mode = capacities.first().map(|(_, c)| c.mode());
        }

        for (_, capacity) in &capacities {
            match capacity {
                CapacityValue::Percentage { value, .. } => report.percentage_sum += value,
                CapacityValue::Weight { value, .. } => report.weight_sum += value,
                CapacityValue::Absolute { .. } => {}
            }
        }
        if report.percentage_sum > 100.0 + 1e-6 {
            report.issues.push(format!(
                "percentage capacities under {parent} sum to {}, above 100",
                report.percentage_sum
            ));
        }

        let parent_max = self
            .get_node(parent)
            .and_then(|p| p.max_capacity_in(partition));
        if let Some(CapacityValue::Absolute {
            resources: bounds, ..
        }) = parent_max
        {
            for (child, capacity) in &capacities {
                let Some(resources) = capacity.resources() else {
                    continue;
                };
                for (key, value) in resources {
                    let Some((_, bound)) = bounds.iter().find(|(k, _)| k == key) else {
                        continue;
                    };
                    if let (Some(amount), Some(limit)) =
                        (parse_resource_amount(value), parse_resource_amount(bound))
                    {
                        if amount > limit {
                            report.issues.push(format!(
                                "{} requests {key}={value}, above the parent maximum {bound}",
                                child.path
                            ));
                        }
                    }
                }
            }
        }
        report
    }
}
