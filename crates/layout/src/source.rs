use queues::{CapacityValue, QueueTree};

/// A hierarchy the layout engine can place.
pub trait HierarchySource {
    fn root_id(&self) -> &str;
    fn contains(&self, id: &str) -> bool;
    /// Child ids in display order.
    fn children(&self, id: &str) -> Vec<String>;
    fn label(&self, id: &str) -> String;
    /// Relative size of the flow into `id`, 0..=100.
    fn flow_value(&self, id: &str) -> f64;
    fn capacity_label(&self, _id: &str) -> String {
        String::new()
    }
    fn is_new(&self, _id: &str) -> bool {
        false
    }
    fn is_deleted(&self, _id: &str) -> bool {
        false
    }
}

impl HierarchySource for QueueTree {
    fn root_id(&self) -> &str {
        &self.root().path
    }

    fn contains(&self, id: &str) -> bool {
        QueueTree::contains(self, id)
    }

    fn children(&self, id: &str) -> Vec<String> {
        self.get_node(id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn label(&self, id: &str) -> String {
        self.get_node(id).map(|n| n.name.clone()).unwrap_or_default()
    }

    /// Percentages are used as-is; weights become their share of the
    /// sibling weight sum; absolute capacities have no relative size.
    fn flow_value(&self, id: &str) -> f64 {
        let Some(node) = self.get_node(id) else {
            return 0.0;
        };
        match &node.capacity {
            CapacityValue::Percentage { value, .. } => value.clamp(0.0, 100.0),
            CapacityValue::Weight { value, .. } => {
                let total: f64 = self
                    .parent_of(id)
                    .map(|p| {
                        self.children_of(&p.path)
                            .iter()
                            .filter_map(|c| match &c.capacity {
                                CapacityValue::Weight { value, .. } => Some(*value),
                                _ => None,
                            })
                            .sum()
                    })
                    .unwrap_or(*value);
                if total > 0.0 {
                    (value / total * 100.0).clamp(0.0, 100.0)
                } else {
                    0.0
                }
            }
            CapacityValue::Absolute { .. } => node.capacity.to_display_percentage(),
        }
    }

    fn capacity_label(&self, id: &str) -> String {
        self.get_node(id)
            .map(|n| match &n.capacity {
                CapacityValue::Percentage { .. } => format!("{}%", n.capacity.serialize()),
                _ => n.capacity.serialize(),
            })
            .unwrap_or_default()
    }

    fn is_new(&self, id: &str) -> bool {
        self.get_node(id).is_some_and(|n| n.is_new)
    }

    fn is_deleted(&self, id: &str) -> bool {
        self.get_node(id).is_some_and(|n| n.is_deleted)
    }
}
