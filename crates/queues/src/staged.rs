//! Pending queue edits kept as an overlay on an immutable base tree.
//!
//! Every staging call validates first and either stages all of its changes
//! or none. Reads go through [`StagedChanges::get_effective_properties`] and
//! [`StagedChanges::effective_tree`], which merge the overlay on demand, so
//! discarding everything is a plain clear.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capacity::{
    CapacityMode, CapacityValue, input_mode, validate_capacity, validate_maximum_capacity,
};
use crate::error::{ApplyError, FieldErrors, StageError, StageResult};
use crate::request::{ApplyResponse, QueueUpdate, UpdateRequest};
use crate::tree::{
    KEY_CAPACITY, KEY_MAX_CAPACITY, KEY_NODE_LABELS, KEY_STATE, QueueNode, QueueState, QueueTree,
    ROOT,
};

static QUEUE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("queue name pattern"));

/// Form-only parameter carrying the capacity mode the user picked.
pub const UI_CAPACITY_MODE: &str = "_ui_capacityMode";
const UI_PREFIX: &str = "_ui_";

pub type QueueParams = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeId(u64);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chg-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: ChangeId,
    pub change_type: ChangeType,
    /// Empty for global updates.
    pub queue_path: String,
    /// `None` for queue-scoped changes (deletes).
    pub property: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeSet {
    fn matches(&self, change_type: ChangeType, path: &str, property: Option<&str>) -> bool {
        self.change_type == change_type
            && self.queue_path == path
            && self.property.as_deref() == property
    }

    pub fn is_global(&self) -> bool {
        self.queue_path.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Validation,
    Dependency,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// `None` for a failure that could not be tied to one change.
    pub change_id: Option<ChangeId>,
    pub kind: ConflictKind,
    pub message: String,
    pub severity: Severity,
}

/// Result of a successful [`StagedChanges::stage_update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub staged: Vec<ChangeId>,
    /// Keys whose pending change was dropped because the value went back to
    /// the base configuration.
    pub reverted: Vec<String>,
    /// Every key that changed, including [`UI_CAPACITY_MODE`] when the
    /// capacity switched representation.
    pub changed_keys: Vec<String>,
    pub capacity_mode_changed: bool,
}

/// Property key for a capacity setting within a node-label partition.
pub fn partition_key(partition: &str, key: &str) -> String {
    if partition.is_empty() {
        key.to_string()
    } else {
        format!("{KEY_NODE_LABELS}.{partition}.{key}")
    }
}

fn is_capacity_key(key: &str) -> bool {
    key == KEY_CAPACITY
        || key == KEY_MAX_CAPACITY
        || (key.starts_with("accessible-node-labels.")
            && (key.ends_with(".capacity") || key.ends_with(".maximum-capacity")))
}

/// Value a queue reports for `key` when the property is not configured.
fn derived_default(queue_path: &str, key: &str) -> Option<&'static str> {
    if key == KEY_CAPACITY {
        Some(if queue_path == ROOT { "100" } else { "0" })
    } else if key == KEY_MAX_CAPACITY || key.ends_with(".maximum-capacity") {
        Some("100")
    } else if is_capacity_key(key) {
        Some("0")
    } else if key == KEY_STATE {
        Some(QueueState::default().as_str())
    } else {
        None
    }
}

fn same_value(queue_path: &str, key: &str, current: Option<&String>, new: &str) -> bool {
    let Some(current) = current
        .map(String::as_str)
        .or_else(|| derived_default(queue_path, key))
    else {
        return false;
    };
    if is_capacity_key(key) {
        CapacityValue::parse(current).is_equivalent(&CapacityValue::parse(new))
    } else {
        current == new
    }
}

/// Validate a capacity input and, when the form asked for a different mode,
/// re-normalize it into that mode.
fn normalize_capacity(
    raw: &str,
    target: Option<CapacityMode>,
    maximum: bool,
) -> Result<String, Vec<String>> {
    let validate = if maximum {
        validate_maximum_capacity
    } else {
        validate_capacity
    };
    match target {
        Some(mode) if mode != input_mode(raw) => {
            let normalized = validate(raw, None)?;
            Ok(CapacityValue::parse(&normalized).convert_to(mode).serialize())
        }
        _ => validate(raw, target),
    }
}

fn is_below(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len() + 1
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'.'
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Whether `text` names `path` as a whole queue path, not a prefix of a
/// longer one.
fn mentions_queue(text: &str, path: &str) -> bool {
    text.match_indices(path).any(|(idx, _)| {
        let before = text[..idx].chars().next_back();
        let mut after = text[idx + path.len()..].chars();
        let starts_clean = before.is_none_or(|c| !is_path_char(c) && c != '.');
        let ends_clean = match after.next() {
            None => true,
            Some('.') => !after.next().is_some_and(is_path_char),
            Some(c) => !is_path_char(c),
        };
        starts_clean && ends_clean
    })
}

#[derive(Debug, Clone, Default)]
pub struct StagedChanges {
    base: QueueTree,
    changes: Vec<ChangeSet>,
    conflicts: Vec<ConflictInfo>,
    /// Parent of every queue that only exists as a staged addition.
    new_queue_parents: BTreeMap<String, String>,
    next_id: u64,
    apply_in_flight: bool,
}

impl StagedChanges {
    pub fn new(base: QueueTree) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    pub fn base(&self) -> &QueueTree {
        &self.base
    }

    /// Swap in a freshly loaded base tree. Pending changes stay staged on
    /// top of it.
    pub fn replace_base(&mut self, tree: QueueTree) {
        for (path, parent) in &self.new_queue_parents {
            if !tree.contains(parent) && !self.new_queue_parents.contains_key(parent) {
                warn!(queue = %path, parent = %parent, "staged queue lost its parent on reload");
            }
        }
        self.base = tree;
        self.apply_in_flight = false;
    }

    pub fn changes(&self) -> &[ChangeSet] {
        &self.changes
    }

    pub fn conflicts(&self) -> &[ConflictInfo] {
        &self.conflicts
    }

    pub fn conflicts_for(&self, id: ChangeId) -> Vec<&ConflictInfo> {
        self.conflicts
            .iter()
            .filter(|c| c.change_id == Some(id))
            .collect()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn is_apply_in_flight(&self) -> bool {
        self.apply_in_flight
    }

    pub fn get_changes_by_queue(&self, path: &str) -> Vec<&ChangeSet> {
        self.changes.iter().filter(|c| c.queue_path == path).collect()
    }

    pub fn is_staged_new(&self, path: &str) -> bool {
        self.new_queue_parents.contains_key(path)
    }

    pub fn is_staged_deleted(&self, path: &str) -> bool {
        self.changes
            .iter()
            .any(|c| c.change_type == ChangeType::Delete && c.queue_path == path)
    }

    /// Staged for deletion itself or through an ancestor.
    pub fn is_effectively_deleted(&self, path: &str) -> bool {
        self.changes.iter().any(|c| {
            c.change_type == ChangeType::Delete
                && (c.queue_path == path || is_below(path, &c.queue_path))
        })
    }

    fn queue_exists(&self, path: &str) -> bool {
        self.base.contains(path) || self.is_staged_new(path)
    }

    fn allocate_id(&mut self) -> ChangeId {
        self.next_id += 1;
        ChangeId(self.next_id)
    }

    /// Record a change, replacing any pending change of the same type for
    /// the same `(queue, property)`.
    fn upsert(
        &mut self,
        change_type: ChangeType,
        path: &str,
        property: Option<&str>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> ChangeId {
        if let Some(existing) = self
            .changes
            .iter_mut()
            .find(|c| c.matches(change_type, path, property))
        {
            existing.new_value = new_value;
            existing.timestamp = Utc::now();
            return existing.id;
        }
        let id = self.allocate_id();
        self.changes.push(ChangeSet {
            id,
            change_type,
            queue_path: path.to_string(),
            property: property.map(str::to_string),
            old_value,
            new_value,
            timestamp: Utc::now(),
        });
        id
    }

    fn remove_where(&mut self, predicate: impl Fn(&ChangeSet) -> bool) -> usize {
        let before = self.changes.len();
        self.changes.retain(|c| !predicate(c));
        let removed = before - self.changes.len();
        if removed > 0 {
            self.sync_after_removal();
        }
        removed
    }

    /// Forget staged-new queues whose last ADD is gone, together with every
    /// change at or below them, so nothing is left without a parent.
    fn sync_after_removal(&mut self) {
        loop {
            let added: BTreeSet<&str> = self
                .changes
                .iter()
                .filter(|c| c.change_type == ChangeType::Add)
                .map(|c| c.queue_path.as_str())
                .collect();
            let orphaned: Vec<String> = self
                .new_queue_parents
                .keys()
                .filter(|path| !added.contains(path.as_str()))
                .cloned()
                .collect();
            if orphaned.is_empty() {
                break;
            }
            for path in &orphaned {
                self.new_queue_parents.remove(path);
            }
            let before = self.changes.len();
            self.changes.retain(|c| {
                !orphaned
                    .iter()
                    .any(|p| c.queue_path == *p || is_below(&c.queue_path, p))
            });
            debug!(
                queues = ?orphaned,
                removed = before - self.changes.len(),
                "dropped changes below unstaged queues"
            );
        }
        let ids: BTreeSet<ChangeId> = self.changes.iter().map(|c| c.id).collect();
        self.conflicts
            .retain(|c| c.change_id.is_none_or(|id| ids.contains(&id)));
    }

    /// Stage a new queue `<parent_path>.<name>` with its initial properties.
    pub fn stage_add(
        &mut self,
        parent_path: &str,
        name: &str,
        params: &QueueParams,
    ) -> StageResult<Vec<ChangeId>> {
        let mut errors = FieldErrors::new();
        let name = name.trim();

        if !self.queue_exists(parent_path) {
            errors.add("parent", format!("Parent queue {parent_path} does not exist"));
        } else if self.is_effectively_deleted(parent_path) {
            errors.add(
                "parent",
                format!("Parent queue {parent_path} is staged for deletion"),
            );
        }

        let path = format!("{parent_path}.{name}");
        if name.is_empty() {
            errors.add("name", "Queue name is required");
        } else if !QUEUE_NAME.is_match(name) {
            errors.add(
                "name",
                "Queue name may only contain letters, digits, '_', '-' and '.'",
            );
        } else if self.queue_exists(&path) {
            errors.add(
                "name",
                format!("A queue named '{name}' already exists under {parent_path}"),
            );
        }

        let target_mode = self.requested_mode(params, &mut errors);
        let mut values: Vec<(String, String)> = Vec::new();
        match params
            .get(KEY_CAPACITY)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
        {
            None => errors.add(KEY_CAPACITY, "Capacity is required"),
            Some(raw) => match normalize_capacity(raw, target_mode, false) {
                Ok(value) => values.push((KEY_CAPACITY.to_string(), value)),
                Err(messages) => errors.extend(KEY_CAPACITY, messages),
            },
        }
        for (key, raw) in params {
            let raw = raw.trim();
            if key == KEY_CAPACITY || key.starts_with(UI_PREFIX) || raw.is_empty() {
                continue;
            }
            if let Some(value) = self.check_plain_param(key, raw, &mut errors) {
                values.push((key.clone(), value));
            }
        }

        errors.into_result()?;

        self.new_queue_parents
            .insert(path.clone(), parent_path.to_string());
        let ids = values
            .into_iter()
            .map(|(key, value)| {
                self.upsert(ChangeType::Add, &path, Some(key.as_str()), None, Some(value))
            })
            .collect::<Vec<_>>();
        debug!(queue = %path, changes = ids.len(), "staged queue addition");
        Ok(ids)
    }

    /// Stage property edits for an existing (or staged-new) queue. Only keys
    /// whose value differs from the effective one produce a change.
    pub fn stage_update(
        &mut self,
        queue_path: &str,
        params: &QueueParams,
        partition: &str,
    ) -> StageResult<UpdateOutcome> {
        if !self.queue_exists(queue_path) {
            return Err(StageError::QueueNotFound(queue_path.to_string()));
        }
        let mut errors = FieldErrors::new();
        if self.is_effectively_deleted(queue_path) {
            errors.add("queue", format!("Queue {queue_path} is staged for deletion"));
            return Err(StageError::Validation(errors));
        }

        let effective = self.get_effective_properties(queue_path).unwrap_or_default();
        let capacity_key = partition_key(partition, KEY_CAPACITY);
        let max_key = partition_key(partition, KEY_MAX_CAPACITY);
        let default_capacity = if queue_path == ROOT { "100" } else { "0" };
        let current_capacity = CapacityValue::parse(
            effective
                .get(&capacity_key)
                .map(String::as_str)
                .unwrap_or(default_capacity),
        );

        let target_mode = self.requested_mode(params, &mut errors);
        let mut desired: Vec<(String, String)> = Vec::new();
        for (key, raw) in params {
            let raw = raw.trim();
            if key.starts_with(UI_PREFIX) || raw.is_empty() {
                continue;
            }
            match key.as_str() {
                KEY_CAPACITY => match normalize_capacity(raw, target_mode, false) {
                    Ok(value) => desired.push((capacity_key.clone(), value)),
                    Err(messages) => errors.extend(KEY_CAPACITY, messages),
                },
                KEY_MAX_CAPACITY => match normalize_capacity(raw, None, true) {
                    Ok(value) => desired.push((max_key.clone(), value)),
                    Err(messages) => errors.extend(KEY_MAX_CAPACITY, messages),
                },
                _ => {
                    if let Some(value) = self.check_plain_param(key, raw, &mut errors) {
                        desired.push((key.clone(), value));
                    }
                }
            }
        }

        // A mode switch without a new value converts the current one.
        if let Some(mode) = target_mode {
            let has_capacity = desired.iter().any(|(k, _)| *k == capacity_key);
            if !has_capacity && current_capacity.mode() != mode {
                desired.push((
                    capacity_key.clone(),
                    current_capacity.convert_to(mode).serialize(),
                ));
            }
        }

        errors.into_result()?;

        let mut outcome = UpdateOutcome {
            capacity_mode_changed: desired
                .iter()
                .find(|(k, _)| *k == capacity_key)
                .is_some_and(|(_, v)| CapacityValue::parse(v).mode() != current_capacity.mode()),
            ..Default::default()
        };

        let staged_new = self.is_staged_new(queue_path);
        let base_properties = self
            .base
            .get_node(queue_path)
            .map(|n| n.properties.clone())
            .unwrap_or_default();

        for (key, value) in desired {
            if same_value(queue_path, &key, effective.get(&key), &value) {
                continue;
            }
            outcome.changed_keys.push(key.clone());
            if staged_new {
                let id =
                    self.upsert(ChangeType::Add, queue_path, Some(key.as_str()), None, Some(value));
                outcome.staged.push(id);
                continue;
            }
            let base_value = base_properties.get(&key);
            if same_value(queue_path, &key, base_value, &value) {
                let path = queue_path.to_string();
                self.remove_where(|c| c.matches(ChangeType::Update, &path, Some(key.as_str())));
                outcome.reverted.push(key);
            } else {
                let id = self.upsert(
                    ChangeType::Update,
                    queue_path,
                    Some(key.as_str()),
                    base_value.cloned(),
                    Some(value),
                );
                outcome.staged.push(id);
            }
        }
        if outcome.capacity_mode_changed {
            outcome.changed_keys.push(UI_CAPACITY_MODE.to_string());
        }

        debug!(
            queue = %queue_path,
            staged = outcome.staged.len(),
            reverted = outcome.reverted.len(),
            "staged queue update"
        );
        Ok(outcome)
    }

    fn requested_mode(&self, params: &QueueParams, errors: &mut FieldErrors) -> Option<CapacityMode> {
        let raw = params.get(UI_CAPACITY_MODE)?;
        let mode = CapacityMode::parse(raw);
        if mode.is_none() {
            errors.add(UI_CAPACITY_MODE, format!("Unknown capacity mode '{raw}'"));
        }
        mode
    }

    fn check_plain_param(&self, key: &str, raw: &str, errors: &mut FieldErrors) -> Option<String> {
        if key == KEY_MAX_CAPACITY {
            return match normalize_capacity(raw, None, true) {
                Ok(value) => Some(value),
                Err(messages) => {
                    errors.extend(KEY_MAX_CAPACITY, messages);
                    None
                }
            };
        }
        if key == KEY_STATE {
            return match QueueState::parse(raw) {
                Some(state) => Some(state.as_str().to_string()),
                None => {
                    errors.add(KEY_STATE, "State must be RUNNING or STOPPED");
                    None
                }
            };
        }
        if is_capacity_key(key) {
            return match normalize_capacity(raw, None, key.ends_with("maximum-capacity")) {
                Ok(value) => Some(value),
                Err(messages) => {
                    errors.extend(key, messages);
                    None
                }
            };
        }
        Some(raw.to_string())
    }

    /// Stage an update to a scheduler-wide property.
    pub fn stage_global_update(&mut self, key: &str, value: &str) -> Option<ChangeId> {
        let key = key.trim();
        let value = value.trim();
        if self.base.global_properties().get(key).map(String::as_str) == Some(value) {
            self.remove_where(|c| c.matches(ChangeType::Update, "", Some(key)));
            return None;
        }
        let old = self.base.global_properties().get(key).cloned();
        Some(self.upsert(ChangeType::Update, "", Some(key), old, Some(value.to_string())))
    }

    /// Mark a queue and all its descendants, configured or staged-new, for
    /// deletion. They stay in the effective tree, flagged, until the delete
    /// is undone or applied.
    pub fn stage_delete(&mut self, queue_path: &str) -> StageResult<Vec<ChangeId>> {
        if queue_path == ROOT {
            return Err(StageError::RootNotDeletable);
        }
        if !self.queue_exists(queue_path) {
            return Err(StageError::QueueNotFound(queue_path.to_string()));
        }

        let mut targets: Vec<String> = self
            .base
            .descendants_of(queue_path, true)
            .into_iter()
            .map(|n| n.path.clone())
            .collect();
        targets.extend(
            self.new_queue_parents
                .keys()
                .filter(|path| *path == queue_path || is_below(path, queue_path))
                .cloned(),
        );
        let mut ids = Vec::new();
        for target in targets {
            if !self.is_staged_deleted(&target) {
                ids.push(self.upsert(ChangeType::Delete, &target, None, None, None));
            }
        }
        debug!(queue = %queue_path, changes = ids.len(), "staged queue deletion");
        Ok(ids)
    }

    /// Drop the pending deletion of a queue and its descendants.
    pub fn undo_delete(&mut self, queue_path: &str) -> usize {
        let path = queue_path.to_string();
        self.remove_where(|c| {
            c.change_type == ChangeType::Delete
                && (c.queue_path == path || is_below(&c.queue_path, &path))
        })
    }

    pub fn discard(&mut self, id: ChangeId) -> bool {
        self.remove_where(|c| c.id == id) > 0
    }

    pub fn discard_all(&mut self) {
        self.changes.clear();
        self.conflicts.clear();
        self.new_queue_parents.clear();
    }

    /// Base properties overlaid with staged values for the queue.
    pub fn get_effective_properties(&self, queue_path: &str) -> Option<BTreeMap<String, String>> {
        if !self.queue_exists(queue_path) {
            return None;
        }
        let mut properties = self
            .base
            .get_node(queue_path)
            .map(|n| n.properties.clone())
            .unwrap_or_default();
        for change in &self.changes {
            if change.queue_path != queue_path || change.change_type == ChangeType::Delete {
                continue;
            }
            if let (Some(key), Some(value)) = (&change.property, &change.new_value) {
                properties.insert(key.clone(), value.clone());
            }
        }
        Some(properties)
    }

    /// The tree as it will look after apply, with staged additions flagged
    /// `is_new` and staged deletions flagged `is_deleted`.
    pub fn effective_tree(&self) -> QueueTree {
        let mut tree = self.base.clone();

        // Parents are always staged before their children.
        let mut added: Vec<(&String, &String)> = self.new_queue_parents.iter().collect();
        added.sort_by_key(|(path, _)| {
            self.changes
                .iter()
                .position(|c| c.change_type == ChangeType::Add && &c.queue_path == *path)
        });
        for (path, parent) in added {
            let mut node = QueueNode::new(path, Some(parent.clone()));
            node.name = path
                .strip_prefix(parent.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
                .unwrap_or(path)
                .to_string();
            node.is_new = true;
            node.properties = self.get_effective_properties(path).unwrap_or_default();
            if !tree.insert_child(node) {
                warn!(queue = %path, parent = %parent, "staged queue has no parent in the tree");
            }
        }

        let updated: BTreeSet<&str> = self
            .changes
            .iter()
            .filter(|c| c.change_type == ChangeType::Update && !c.is_global())
            .map(|c| c.queue_path.as_str())
            .collect();
        for path in updated {
            let Some(properties) = self.get_effective_properties(path) else {
                continue;
            };
            if let Some(node) = tree.get_node_mut(path) {
                node.properties = properties;
                node.refresh_derived();
            }
        }

        let mut deleted: Vec<String> = Vec::new();
        for change in &self.changes {
            if change.change_type == ChangeType::Delete {
                deleted.extend(
                    tree.descendants_of(&change.queue_path, true)
                        .into_iter()
                        .map(|n| n.path.clone()),
                );
            }
        }
        for path in deleted {
            if let Some(node) = tree.get_node_mut(&path) {
                node.is_deleted = true;
            }
        }

        for change in self.changes.iter().filter(|c| c.is_global()) {
            if let (Some(key), Some(value)) = (&change.property, &change.new_value) {
                tree.global_properties_mut()
                    .insert(key.clone(), value.clone());
            }
        }
        tree
    }

    /// Group the staged changes into the wire request.
    pub fn build_update_request(&self) -> UpdateRequest {
        let deleted: Vec<&str> = self
            .changes
            .iter()
            .filter(|c| c.change_type == ChangeType::Delete)
            .map(|c| c.queue_path.as_str())
            .collect();
        let removed = |path: &str| {
            deleted
                .iter()
                .any(|d| path == *d || is_below(path, d))
        };

        let mut request = UpdateRequest::default();
        let mut adds: Vec<QueueUpdate> = Vec::new();
        let mut updates: Vec<QueueUpdate> = Vec::new();

        for change in &self.changes {
            let (Some(key), Some(value)) = (&change.property, &change.new_value) else {
                continue;
            };
            let bucket = match change.change_type {
                ChangeType::Add => &mut adds,
                ChangeType::Update if change.is_global() => {
                    request.global_updates.insert(key.clone(), value.clone());
                    continue;
                }
                ChangeType::Update => &mut updates,
                ChangeType::Delete => continue,
            };
            if removed(&change.queue_path) {
                continue;
            }
            match bucket
                .iter_mut()
                .find(|entry| entry.queue_name == change.queue_path)
            {
                Some(entry) => {
                    entry.params.insert(key.clone(), value.clone());
                }
                None => {
                    let mut params = BTreeMap::new();
                    params.insert(key.clone(), value.clone());
                    bucket.push(QueueUpdate {
                        queue_name: change.queue_path.clone(),
                        params,
                    });
                }
            }
        }

        request.add_queue = adds;
        request.update_queue = updates;
        // Removing a queue removes its subtree; only send the topmost paths.
        // A deleted staged-new queue is never created, so there is nothing
        // to remove.
        request.remove_queue = deleted
            .iter()
            .filter(|path| !deleted.iter().any(|other| is_below(path, other)))
            .filter(|path| self.base.contains(path))
            .map(|path| path.to_string())
            .collect();
        request
    }

    /// Recompute advisory validation and dependency conflicts. Server
    /// conflicts from the last failed apply are kept. Nothing here blocks
    /// apply.
    pub fn validate(&mut self) -> Vec<ConflictInfo> {
        let effective = self.effective_tree();
        let mut found: Vec<ConflictInfo> = Vec::new();

        // (parent, partition) -> first capacity change below it
        let mut groups: BTreeMap<(String, String), ChangeId> = BTreeMap::new();
        for change in &self.changes {
            if change.change_type == ChangeType::Delete || change.is_global() {
                continue;
            }
            let Some(key) = change.property.as_deref() else {
                continue;
            };
            if key != KEY_CAPACITY
                && !(key.starts_with("accessible-node-labels.") && key.ends_with(".capacity"))
            {
                continue;
            }
            let partition = key
                .strip_prefix("accessible-node-labels.")
                .and_then(|rest| rest.strip_suffix(".capacity"))
                .unwrap_or("")
                .to_string();
            let Some(parent) = effective
                .get_node(&change.queue_path)
                .and_then(|n| n.parent.clone())
            else {
                continue;
            };
            groups.entry((parent, partition)).or_insert(change.id);
        }
        for ((parent, partition), change_id) in groups {
            let report = effective.sibling_report(&parent, &partition);
            for issue in report.issues {
                found.push(ConflictInfo {
                    change_id: Some(change_id),
                    kind: ConflictKind::Validation,
                    message: issue,
                    severity: Severity::Error,
                });
            }
        }

        for change in &self.changes {
            match change.change_type {
                ChangeType::Update
                    if !change.is_global() && self.is_effectively_deleted(&change.queue_path) =>
                {
                    found.push(ConflictInfo {
                        change_id: Some(change.id),
                        kind: ConflictKind::Dependency,
                        message: format!(
                            "update to {} is discarded because the queue is staged for deletion",
                            change.queue_path
                        ),
                        severity: Severity::Warning,
                    });
                }
                ChangeType::Add if self.is_effectively_deleted(&change.queue_path) => {
                    found.push(ConflictInfo {
                        change_id: Some(change.id),
                        kind: ConflictKind::Dependency,
                        message: format!(
                            "{} is added below a queue staged for deletion and will not be created",
                            change.queue_path
                        ),
                        severity: Severity::Warning,
                    });
                }
                _ => {}
            }
        }

        self.conflicts.retain(|c| c.kind == ConflictKind::Server);
        self.conflicts.extend(found);
        self.conflicts.clone()
    }

    /// Start an apply: returns the request to send. Rejects a second apply
    /// while one is pending.
    pub fn begin_apply(&mut self) -> Result<UpdateRequest, ApplyError> {
        if self.apply_in_flight {
            warn!("apply requested while another apply is in flight");
            return Err(ApplyError::InFlight);
        }
        let request = self.build_update_request();
        if request.is_empty() {
            return Err(ApplyError::NothingStaged);
        }
        self.apply_in_flight = true;
        info!(
            add = request.add_queue.len(),
            update = request.update_queue.len(),
            remove = request.remove_queue.len(),
            global = request.global_updates.len(),
            "applying staged changes"
        );
        Ok(request)
    }

    /// Finish an apply with the collaborator's answer. Success clears all
    /// staged state; failure keeps it and records server conflicts.
    pub fn complete_apply(&mut self, response: &ApplyResponse) -> Result<(), ApplyError> {
        self.apply_in_flight = false;
        if response.is_success() {
            info!(changes = self.changes.len(), "staged changes applied");
            self.discard_all();
            return Ok(());
        }

        let detail = match response.body.trim() {
            "" => format!("HTTP {}", response.status),
            body => body.to_string(),
        };
        warn!(status = response.status, detail = %detail, "configuration update rejected");

        self.conflicts.retain(|c| c.kind != ConflictKind::Server);
        let mut per_item: Vec<ConflictInfo> = self
            .changes
            .iter()
            .filter(|c| !c.is_global() && mentions_queue(&detail, &c.queue_path))
            .map(|c| ConflictInfo {
                change_id: Some(c.id),
                kind: ConflictKind::Server,
                message: detail.clone(),
                severity: Severity::Error,
            })
            .collect();
        if per_item.is_empty() {
            per_item.push(ConflictInfo {
                change_id: None,
                kind: ConflictKind::Server,
                message: detail.clone(),
                severity: Severity::Error,
            });
        }
        self.conflicts.extend(per_item);
        Err(ApplyError::Rejected(detail))
    }

    /// Finish an apply whose request never got an answer.
    pub fn abort_apply(&mut self, error: &str) -> ApplyError {
        self.apply_in_flight = false;
        warn!(error = %error, "configuration update failed");
        self.conflicts.retain(|c| c.kind != ConflictKind::Server);
        self.conflicts.push(ConflictInfo {
            change_id: None,
            kind: ConflictKind::Server,
            message: error.to_string(),
            severity: Severity::Error,
        });
        ApplyError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{CAPACITY_PREFIX, ConfigProperty};

    fn tree() -> QueueTree {
        let prop = |k: &str, v: &str| ConfigProperty::new(format!("{CAPACITY_PREFIX}{k}"), v);
        QueueTree::build(vec![
            prop("root.queues", "default,production"),
            prop("root.default.capacity", "40"),
            prop("root.production.capacity", "60"),
            prop("root.production.queues", "team1,team2"),
            prop("root.production.team1.capacity", "50"),
            prop("root.production.team2.capacity", "50"),
            prop("maximum-applications", "10000"),
        ])
    }

    fn params(pairs: &[(&str, &str)]) -> QueueParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_add_validates_atomically() {
        let mut staged = StagedChanges::new(tree());
        let err = staged
            .stage_add("root", "bad name!", &params(&[("capacity", "200")]))
            .unwrap_err();
        let fields = err.field_errors().unwrap();
        assert!(fields.get("name").is_some());
        assert!(fields.get("capacity").is_some());
        assert!(!staged.has_unsaved_changes());

        let err = staged.stage_add("root", "x", &QueueParams::new()).unwrap_err();
        assert!(err.field_errors().unwrap().get("capacity").is_some());

        let err = staged
            .stage_add("root.missing", "x", &params(&[("capacity", "1")]))
            .unwrap_err();
        assert!(err.field_errors().unwrap().get("parent").is_some());
    }

    #[test]
    fn test_add_rejects_existing_base_queue() {
        let mut staged = StagedChanges::new(tree());
        let err = staged
            .stage_add("root", "default", &params(&[("capacity", "1")]))
            .unwrap_err();
        assert!(err.field_errors().unwrap().get("name").is_some());
    }

    #[test]
    fn test_add_one_change_per_property() {
        let mut staged = StagedChanges::new(tree());
        let ids = staged
            .stage_add(
                "root.production",
                "team3",
                &params(&[
                    ("capacity", "0"),
                    ("maximum-capacity", "50%"),
                    ("state", "stopped"),
                    ("user-limit-factor", "2"),
                    (UI_CAPACITY_MODE, "percentage"),
                ]),
            )
            .unwrap();
        assert_eq!(ids.len(), 4);
        let props = staged
            .get_effective_properties("root.production.team3")
            .unwrap();
        assert_eq!(props.get("maximum-capacity").map(String::as_str), Some("50"));
        assert_eq!(props.get("state").map(String::as_str), Some("STOPPED"));
        assert!(!props.contains_key(UI_CAPACITY_MODE));
        assert!(staged.is_staged_new("root.production.team3"));
    }

    #[test]
    fn test_update_only_stages_differences() {
        let mut staged = StagedChanges::new(tree());
        let outcome = staged
            .stage_update(
                "root.default",
                &params(&[("capacity", "40.0"), ("user-limit-factor", "3")]),
                "",
            )
            .unwrap();
        assert_eq!(outcome.staged.len(), 1);
        assert_eq!(outcome.changed_keys, vec!["user-limit-factor"]);
        assert!(!outcome.capacity_mode_changed);
    }

    #[test]
    fn test_update_back_to_base_reverts() {
        let mut staged = StagedChanges::new(tree());
        staged
            .stage_update("root.default", &params(&[("capacity", "30")]), "")
            .unwrap();
        assert_eq!(staged.changes().len(), 1);
        let outcome = staged
            .stage_update("root.default", &params(&[("capacity", "40")]), "")
            .unwrap();
        assert_eq!(outcome.reverted, vec!["capacity"]);
        assert!(!staged.has_unsaved_changes());
    }

    #[test]
    fn test_update_rejects_invalid_atomically() {
        let mut staged = StagedChanges::new(tree());
        let err = staged
            .stage_update(
                "root.default",
                &params(&[("capacity", "30"), ("maximum-capacity", "150")]),
                "",
            )
            .unwrap_err();
        assert!(err.field_errors().unwrap().get("maximum-capacity").is_some());
        assert!(!staged.has_unsaved_changes());
        assert_eq!(
            staged.stage_update("root.nope", &QueueParams::new(), ""),
            Err(StageError::QueueNotFound("root.nope".to_string()))
        );
    }

    #[test]
    fn test_update_partition_maps_to_label_keys() {
        let mut staged = StagedChanges::new(tree());
        staged
            .stage_update("root.default", &params(&[("capacity", "25")]), "gpu")
            .unwrap();
        let change = &staged.changes()[0];
        assert_eq!(
            change.property.as_deref(),
            Some("accessible-node-labels.gpu.capacity")
        );
        let effective = staged.effective_tree();
        let node = effective.get_node("root.default").unwrap();
        assert_eq!(
            node.capacity_in("gpu").and_then(|c| c.numeric_value()),
            Some(25.0)
        );
    }

    #[test]
    fn test_ui_mode_switch_converts_current_value() {
        let mut staged = StagedChanges::new(tree());
        let outcome = staged
            .stage_update("root.default", &params(&[(UI_CAPACITY_MODE, "weight")]), "")
            .unwrap();
        assert!(outcome.capacity_mode_changed);
        assert_eq!(staged.changes()[0].new_value.as_deref(), Some("40w"));

        let outcome = staged
            .stage_update(
                "root.production",
                &params(&[(UI_CAPACITY_MODE, "weight"), ("capacity", "3")]),
                "",
            )
            .unwrap();
        assert!(outcome.capacity_mode_changed);
        let props = staged.get_effective_properties("root.production").unwrap();
        assert_eq!(props.get("capacity").map(String::as_str), Some("3w"));
    }

    #[test]
    fn test_update_of_staged_queue_edits_the_addition() {
        let mut staged = StagedChanges::new(tree());
        staged
            .stage_add("root", "analytics", &params(&[("capacity", "10")]))
            .unwrap();
        staged
            .stage_update("root.analytics", &params(&[("capacity", "15")]), "")
            .unwrap();
        assert_eq!(staged.changes().len(), 1);
        assert_eq!(staged.changes()[0].change_type, ChangeType::Add);
        let request = staged.build_update_request();
        assert_eq!(request.add_queue[0].params["capacity"], "15");
        assert!(request.update_queue.is_empty());
    }

    #[test]
    fn test_delete_marks_subtree() {
        let mut staged = StagedChanges::new(tree());
        let ids = staged.stage_delete("root.production").unwrap();
        assert_eq!(ids.len(), 3);
        let effective = staged.effective_tree();
        assert!(effective.get_node("root.production.team2").unwrap().is_deleted);
        assert!(!effective.get_node("root.default").unwrap().is_deleted);
        assert_eq!(effective.len(), 5);
        assert_eq!(
            staged.build_update_request().remove_queue,
            vec!["root.production"]
        );
        assert_eq!(staged.stage_delete("root"), Err(StageError::RootNotDeletable));
    }

    #[test]
    fn test_delete_of_staged_addition_is_flagged_not_sent() {
        let mut staged = StagedChanges::new(tree());
        staged
            .stage_add("root", "tmp", &params(&[("capacity", "1")]))
            .unwrap();
        staged
            .stage_add("root.tmp", "leaf", &params(&[("capacity", "100")]))
            .unwrap();
        assert_eq!(staged.stage_delete("root.tmp").unwrap().len(), 2);
        let effective = staged.effective_tree();
        assert!(effective.get_node("root.tmp").unwrap().is_deleted);
        assert!(effective.get_node("root.tmp.leaf").unwrap().is_deleted);
        assert!(staged.build_update_request().is_empty());
        assert_eq!(staged.begin_apply(), Err(ApplyError::NothingStaged));
    }

    #[test]
    fn test_undo_delete_restores_staged_addition() {
        let mut staged = StagedChanges::new(tree());
        staged
            .stage_add("root", "analytics", &params(&[("capacity", "10")]))
            .unwrap();
        let before = staged.effective_tree().get_all_paths();

        staged.stage_delete("root.analytics").unwrap();
        assert_eq!(staged.undo_delete("root.analytics"), 1);

        assert_eq!(staged.effective_tree().get_all_paths(), before);
        let request = staged.build_update_request();
        assert_eq!(request.add_queue[0].queue_name, "root.analytics");
        assert!(request.remove_queue.is_empty());
    }

    #[test]
    fn test_discarding_an_addition_drops_its_staged_children() {
        let mut staged = StagedChanges::new(tree());
        let parent = staged
            .stage_add("root", "p", &params(&[("capacity", "10")]))
            .unwrap();
        staged
            .stage_add("root.p", "c", &params(&[("capacity", "100")]))
            .unwrap();
        staged
            .stage_update("root.default", &params(&[("capacity", "30")]), "")
            .unwrap();

        assert!(staged.discard(parent[0]));
        assert!(!staged.is_staged_new("root.p.c"));
        let request = staged.build_update_request();
        assert!(request.add_queue.is_empty());
        assert_eq!(request.update_queue[0].queue_name, "root.default");
        assert!(staged.effective_tree().get_node("root.p").is_none());
    }

    #[test]
    fn test_unconfigured_default_is_not_a_change() {
        let prop = |k: &str, v: &str| ConfigProperty::new(format!("{CAPACITY_PREFIX}{k}"), v);
        let mut staged = StagedChanges::new(QueueTree::build(vec![
            prop("root.queues", "default,bare"),
            prop("root.default.capacity", "100"),
        ]));
        let outcome = staged
            .stage_update(
                "root.bare",
                &params(&[("capacity", "0"), ("maximum-capacity", "100"), ("state", "RUNNING")]),
                "",
            )
            .unwrap();
        assert!(outcome.staged.is_empty());
        assert!(!staged.has_unsaved_changes());

        let outcome = staged
            .stage_update("root", &params(&[("capacity", "100")]), "")
            .unwrap();
        assert!(outcome.staged.is_empty());

        let outcome = staged
            .stage_update("root.bare", &params(&[("capacity", "5")]), "")
            .unwrap();
        assert_eq!(outcome.staged.len(), 1);
        // back to the default reverts the pending change
        let outcome = staged
            .stage_update("root.bare", &params(&[("capacity", "0")]), "")
            .unwrap();
        assert_eq!(outcome.reverted, vec!["capacity".to_string()]);
        assert!(!staged.has_unsaved_changes());
    }

    #[test]
    fn test_updates_below_deleted_queues_are_not_sent() {
        let mut staged = StagedChanges::new(tree());
        staged
            .stage_update("root.production.team1", &params(&[("capacity", "70")]), "")
            .unwrap();
        staged.stage_delete("root.production").unwrap();
        let request = staged.build_update_request();
        assert!(request.update_queue.is_empty());
        let conflicts = staged.validate();
        assert!(
            conflicts
                .iter()
                .any(|c| c.kind == ConflictKind::Dependency)
        );
    }

    #[test]
    fn test_validate_reports_sibling_sum() {
        let mut staged = StagedChanges::new(tree());
        staged
            .stage_update("root.default", &params(&[("capacity", "50")]), "")
            .unwrap();
        let conflicts = staged.validate();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Validation);
        assert_eq!(conflicts[0].change_id, Some(staged.changes()[0].id));
        // advisory only
        assert!(staged.begin_apply().is_ok());
    }

    #[test]
    fn test_global_updates() {
        let mut staged = StagedChanges::new(tree());
        let key = "yarn.scheduler.capacity.maximum-applications";
        assert!(staged.stage_global_update(key, "20000").is_some());
        assert!(staged.stage_global_update(key, "30000").is_some());
        assert_eq!(staged.changes().len(), 1);
        let request = staged.build_update_request();
        assert_eq!(request.global_updates[key], "30000");
        assert!(staged.stage_global_update(key, "10000").is_none());
        assert!(!staged.has_unsaved_changes());
    }

    #[test]
    fn test_apply_lifecycle() {
        let mut staged = StagedChanges::new(tree());
        assert_eq!(staged.begin_apply(), Err(ApplyError::NothingStaged));

        staged
            .stage_update("root.default", &params(&[("capacity", "35")]), "")
            .unwrap();
        staged
            .stage_update("root.production", &params(&[("capacity", "65")]), "")
            .unwrap();
        staged.begin_apply().unwrap();
        assert_eq!(staged.begin_apply(), Err(ApplyError::InFlight));

        let err = staged
            .complete_apply(&ApplyResponse::new(400, "Failed to update root.default: bad"))
            .unwrap_err();
        assert!(matches!(err, ApplyError::Rejected(_)));
        assert!(staged.has_unsaved_changes());
        assert_eq!(staged.conflicts().len(), 1);
        assert_eq!(staged.conflicts()[0].change_id, Some(staged.changes()[0].id));

        staged.begin_apply().unwrap();
        let err = staged.abort_apply("connection refused");
        assert!(matches!(err, ApplyError::Transport(_)));
        assert_eq!(staged.conflicts().len(), 1);
        assert_eq!(staged.conflicts()[0].change_id, None);

        staged.begin_apply().unwrap();
        staged
            .complete_apply(&ApplyResponse::new(200, "Configuration change successfully applied."))
            .unwrap();
        assert!(!staged.has_unsaved_changes());
        assert!(staged.conflicts().is_empty());
        assert!(!staged.is_apply_in_flight());
    }

    #[test]
    fn test_mentions_queue_whole_paths_only() {
        assert!(mentions_queue("queue root.a failed", "root.a"));
        assert!(mentions_queue("root.a.", "root.a"));
        assert!(!mentions_queue("queue root.a.b failed", "root.a"));
        assert!(!mentions_queue("queue root.ab failed", "root.a"));
        assert!(mentions_queue("queue root.a.b failed", "root.a.b"));
    }
}
