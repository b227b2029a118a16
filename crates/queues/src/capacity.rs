//! Capacity values in the three representations the capacity scheduler
//! understands: plain percentages (`50`), relative weights (`2w`) and
//! absolute resource vectors (`[memory=1024,vcores=1]`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static ABSOLUTE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[\w.,\-_= /]+\]$").expect("absolute capacity pattern"));

static FLOAT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").expect("float prefix pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityMode {
    Percentage,
    Weight,
    Absolute,
}

impl CapacityMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "percentage" => Some(Self::Percentage),
            "weight" => Some(Self::Weight),
            "absolute" => Some(Self::Absolute),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Weight => "weight",
            Self::Absolute => "absolute",
        }
    }
}

impl fmt::Display for CapacityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed capacity-bearing property. Immutable: edits produce a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CapacityValue {
    Percentage {
        raw: String,
        value: f64,
    },
    Weight {
        raw: String,
        value: f64,
    },
    Absolute {
        raw: String,
        resources: Vec<(String, String)>,
    },
}

/// Mode detection is syntactic and never fails.
pub fn detect_mode(raw: &str) -> CapacityMode {
    let trimmed = raw.trim();
    if ABSOLUTE_PATTERN.is_match(trimmed) {
        CapacityMode::Absolute
    } else if trimmed.ends_with('w') {
        CapacityMode::Weight
    } else {
        CapacityMode::Percentage
    }
}

/// Percentage and weight are both relative sibling shares; absolute only
/// compares with itself.
pub fn are_modes_compatible(a: CapacityMode, b: CapacityMode) -> bool {
    match (a, b) {
        (CapacityMode::Absolute, CapacityMode::Absolute) => true,
        (CapacityMode::Absolute, _) | (_, CapacityMode::Absolute) => false,
        _ => true,
    }
}

/// Leading-float parse in the lenient style of form inputs: `"12.5abc"` is
/// 12.5, anything without a numeric prefix is 0.
fn parse_float_lenient(value: &str) -> f64 {
    FLOAT_PREFIX
        .find(value.trim())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn parse_resources(trimmed: &str) -> Vec<(String, String)> {
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    let mut resources: Vec<(String, String)> = Vec::new();
    for pair in inner.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim().to_string();
        match resources.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value,
            None => resources.push((key.to_string(), value)),
        }
    }
    resources
}

fn format_number(value: f64) -> String {
    // f64 Display already drops a trailing ".0"
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{value}")
}

impl CapacityValue {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match detect_mode(trimmed) {
            CapacityMode::Percentage => Self::Percentage {
                raw: raw.to_string(),
                value: parse_float_lenient(trimmed),
            },
            CapacityMode::Weight => Self::Weight {
                raw: raw.to_string(),
                value: parse_float_lenient(trimmed.trim_end_matches('w')),
            },
            CapacityMode::Absolute => Self::Absolute {
                raw: raw.to_string(),
                resources: parse_resources(trimmed),
            },
        }
    }

    pub fn percentage(value: f64) -> Self {
        let raw = format_number(value);
        Self::Percentage { raw, value }
    }

    pub fn weight(value: f64) -> Self {
        let raw = format!("{}w", format_number(value));
        Self::Weight { raw, value }
    }

    pub fn absolute(resources: Vec<(String, String)>) -> Self {
        let raw = serialize_resources(&resources);
        Self::Absolute { raw, resources }
    }

    /// The value a freshly switched capacity field starts from.
    pub fn default_for(mode: CapacityMode) -> Self {
        match mode {
            CapacityMode::Percentage => Self::percentage(0.0),
            CapacityMode::Weight => Self::weight(1.0),
            CapacityMode::Absolute => Self::absolute(vec![
                ("memory".to_string(), "0".to_string()),
                ("vcores".to_string(), "0".to_string()),
            ]),
        }
    }

    pub fn mode(&self) -> CapacityMode {
        match self {
            Self::Percentage { .. } => CapacityMode::Percentage,
            Self::Weight { .. } => CapacityMode::Weight,
            Self::Absolute { .. } => CapacityMode::Absolute,
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Self::Percentage { raw, .. } | Self::Weight { raw, .. } | Self::Absolute { raw, .. } => {
                raw
            }
        }
    }

    pub fn numeric_value(&self) -> Option<f64> {
        match self {
            Self::Percentage { value, .. } | Self::Weight { value, .. } => Some(*value),
            Self::Absolute { .. } => None,
        }
    }

    pub fn resources(&self) -> Option<&[(String, String)]> {
        match self {
            Self::Absolute { resources, .. } => Some(resources),
            _ => None,
        }
    }

    pub fn resource(&self, key: &str) -> Option<&str> {
        self.resources()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Absolute values have no percentage without parent context and show as 0.
    pub fn to_display_percentage(&self) -> f64 {
        match self {
            Self::Percentage { value, .. } | Self::Weight { value, .. } => *value,
            Self::Absolute { .. } => 0.0,
        }
    }

    /// Canonical raw form for the value's mode.
    pub fn serialize(&self) -> String {
        match self {
            Self::Percentage { value, .. } => format_number(*value),
            Self::Weight { value, .. } => format!("{}w", format_number(*value)),
            Self::Absolute { resources, .. } => serialize_resources(resources),
        }
    }

    /// Same mode and same effective value, ignoring formatting.
    pub fn is_equivalent(&self, other: &CapacityValue) -> bool {
        match (self, other) {
            (Self::Percentage { value: a, .. }, Self::Percentage { value: b, .. })
            | (Self::Weight { value: a, .. }, Self::Weight { value: b, .. }) => {
                (a - b).abs() < 1e-9
            }
            (Self::Absolute { resources: a, .. }, Self::Absolute { resources: b, .. }) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter()
                            .any(|(bk, bv)| bk == k && bv.eq_ignore_ascii_case(v))
                    })
            }
            _ => false,
        }
    }

    /// Re-express the value in another mode. Numeric modes carry the number
    /// across; anything involving absolute starts from the target default.
    pub fn convert_to(&self, mode: CapacityMode) -> CapacityValue {
        if self.mode() == mode {
            return self.clone();
        }
        match (self.numeric_value(), mode) {
            (Some(v), CapacityMode::Percentage) => Self::percentage(v.clamp(0.0, 100.0)),
            (Some(v), CapacityMode::Weight) => Self::weight(v.max(0.0)),
            _ => Self::default_for(mode),
        }
    }
}

impl Default for CapacityValue {
    fn default() -> Self {
        Self::percentage(0.0)
    }
}

impl fmt::Display for CapacityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn serialize_resources(resources: &[(String, String)]) -> String {
    let body = resources
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("[{body}]")
}

/// Parse a resource amount such as `1024`, `1024mb`, `2gb` or `1tb`.
/// Memory amounts are returned in megabytes; unitless values pass through.
pub fn parse_resource_amount(value: &str) -> Option<f64> {
    let lower = value.trim().to_ascii_lowercase();
    let (number, multiplier) = if let Some(n) = lower.strip_suffix("tb") {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = lower.strip_suffix("gb") {
        (n, 1024.0)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n, 1.0)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n, 1.0 / 1024.0)
    } else if let Some(n) = lower.strip_suffix('t') {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = lower.strip_suffix('g') {
        (n, 1024.0)
    } else if let Some(n) = lower.strip_suffix('m') {
        (n, 1.0)
    } else {
        (lower.as_str(), 1.0)
    };
    number
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v * multiplier)
}

/// Validate a capacity input typed into a form. Returns the normalized raw
/// string, or every problem found with it.
pub fn validate_capacity(
    raw_input: &str,
    expected_mode: Option<CapacityMode>,
) -> Result<String, Vec<String>> {
    validate_capacity_value(raw_input, expected_mode, "Capacity", false)
}

/// Like [`validate_capacity`], but a percentage maximum must be above zero.
pub fn validate_maximum_capacity(
    raw_input: &str,
    expected_mode: Option<CapacityMode>,
) -> Result<String, Vec<String>> {
    validate_capacity_value(raw_input, expected_mode, "Maximum capacity", true)
}

/// Mode a form input is meant to be in. Unlike [`detect_mode`], a trailing
/// `%` or a leading `[` is taken as intent.
pub fn input_mode(raw_input: &str) -> CapacityMode {
    let trimmed = raw_input.trim();
    if trimmed.starts_with('[') {
        CapacityMode::Absolute
    } else if trimmed.ends_with('%') {
        CapacityMode::Percentage
    } else {
        detect_mode(trimmed)
    }
}

fn validate_capacity_value(
    raw_input: &str,
    expected_mode: Option<CapacityMode>,
    field: &str,
    positive_percentage: bool,
) -> Result<String, Vec<String>> {
    let trimmed = raw_input.trim();
    if trimmed.is_empty() {
        return Err(vec![format!("{field} is required")]);
    }

    let mode = input_mode(trimmed);
    if let Some(expected) = expected_mode {
        if expected != mode {
            return Err(vec![format!(
                "{field} must be a {expected} value, got a {mode} value"
            )]);
        }
    }

    let mut errors = Vec::new();
    match mode {
        CapacityMode::Percentage => {
            let body = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
            match body.parse::<f64>() {
                Ok(value) if value.is_finite() => {
                    if !(0.0..=100.0).contains(&value) {
                        errors.push(format!("{field} must be between 0 and 100"));
                    } else if positive_percentage && value <= 0.0 {
                        errors.push(format!("{field} must be greater than 0"));
                    } else {
                        return Ok(format_number(value));
                    }
                }
                _ => errors.push(format!("{field} must be a number")),
            }
        }
        CapacityMode::Weight => {
            let body = trimmed.strip_suffix('w').unwrap_or(trimmed).trim();
            match body.parse::<f64>() {
                Ok(value) if value.is_finite() && value >= 0.0 => {
                    return Ok(format!("{}w", format_number(value)));
                }
                Ok(value) if value.is_finite() => {
                    errors.push(format!("{field} weight must not be negative"));
                }
                _ => errors.push(format!(
                    "{field} weight must be a number followed by 'w', e.g. 2w"
                )),
            }
        }
        CapacityMode::Absolute => {
            if !ABSOLUTE_PATTERN.is_match(trimmed) {
                errors.push(format!(
                    "{field} must look like [memory=1024,vcores=1]"
                ));
                return Err(errors);
            }
            let inner = &trimmed[1..trimmed.len() - 1];
            let mut resources = Vec::new();
            for pair in inner.split(',') {
                match pair.split_once('=') {
                    None => errors.push(format!("'{}' is missing '='", pair.trim())),
                    Some((key, value)) => {
                        let (key, value) = (key.trim(), value.trim());
                        if key.is_empty() {
                            errors.push(format!("'{}' has an empty resource name", pair.trim()));
                        } else if value.is_empty() {
                            errors.push(format!("resource '{key}' has an empty value"));
                        } else {
                            resources.push((key.to_string(), value.to_string()));
                        }
                    }
                }
            }
            if errors.is_empty() {
                return Ok(serialize_resources(&resources));
            }
        }
    }
    Err(errors)
}
