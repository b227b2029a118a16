//! Console settings from a KDL document.
//!
//! ```kdl
//! server "http://resourcemanager:8088" user="yarn"
//! output "queues.svg"
//! partition "gpu"
//! layout orientation="vertical" node-width=180 flow-style="ribbon"
//! viewport width=1600 height=900 max-scale=3.0 cull-padding=80
//! ```

use std::path::{Path, PathBuf};

use graphview::ControllerOptions;
use kdl::{KdlDocument, KdlNode, KdlValue};
use queueviz_layout::{FlowStyle, LayoutOptions, Orientation, ViewportCuller};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings document: {0}")]
    Parse(#[from] kdl::KdlError),
    #[error("`{node}` {property}: {message}")]
    Invalid {
        node: String,
        property: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server: String,
    /// Sent as `user.name` on every request when set.
    pub user: Option<String>,
    pub output: PathBuf,
    /// Node label whose capacities are shown; empty is the default partition.
    pub partition: String,
    pub layout: LayoutOptions,
    pub controller: ControllerOptions,
    pub culler: ViewportCuller,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: "http://localhost:8088".to_string(),
            user: None,
            output: PathBuf::from("queues.svg"),
            partition: String::new(),
            layout: LayoutOptions::default(),
            controller: ControllerOptions::default(),
            culler: ViewportCuller::default(),
            viewport_width: 1280.0,
            viewport_height: 800.0,
        }
    }
}

fn invalid(node: &KdlNode, property: &str, message: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        node: node.name().value().to_string(),
        property: property.to_string(),
        message: message.into(),
    }
}

fn entry<'a>(node: &'a KdlNode, property: &str) -> Option<&'a KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == property))
        .map(|e| e.value())
}

/// First positional argument as a string.
fn argument(node: &KdlNode) -> Result<String, SettingsError> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
        .ok_or_else(|| invalid(node, "argument", "expected a string"))
}

fn string(node: &KdlNode, property: &str) -> Result<Option<String>, SettingsError> {
    match entry(node, property) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| invalid(node, property, "expected a string")),
    }
}

fn number(node: &KdlNode, property: &str, target: &mut f64) -> Result<(), SettingsError> {
    let Some(value) = entry(node, property) else {
        return Ok(());
    };
    let parsed = value
        .as_integer()
        .map(|i| i as f64)
        .or_else(|| value.as_float())
        .ok_or_else(|| invalid(node, property, "expected a number"))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(invalid(node, property, "must be a non-negative number"));
    }
    *target = parsed;
    Ok(())
}

fn apply_layout(node: &KdlNode, layout: &mut LayoutOptions) -> Result<(), SettingsError> {
    if let Some(orientation) = string(node, "orientation")? {
        layout.orientation = match orientation.as_str() {
            "horizontal" => Orientation::Horizontal,
            "vertical" => Orientation::Vertical,
            _ => return Err(invalid(node, "orientation", "expected horizontal or vertical")),
        };
    }
    if let Some(style) = string(node, "flow-style")? {
        layout.flow_style = match style.as_str() {
            "bezier" => FlowStyle::Bezier,
            "ribbon" => FlowStyle::Ribbon,
            _ => return Err(invalid(node, "flow-style", "expected bezier or ribbon")),
        };
    }
    number(node, "node-width", &mut layout.node_width)?;
    number(node, "node-height", &mut layout.node_height)?;
    number(node, "level-spacing", &mut layout.level_spacing)?;
    number(node, "sibling-spacing", &mut layout.sibling_spacing)?;
    number(node, "curvature", &mut layout.curvature)?;
    number(node, "min-flow-width", &mut layout.min_flow_width)?;
    number(node, "max-flow-width", &mut layout.max_flow_width)?;
    number(node, "padding", &mut layout.padding)?;
    if layout.min_flow_width > layout.max_flow_width {
        return Err(invalid(node, "min-flow-width", "exceeds max-flow-width"));
    }
    Ok(())
}

fn apply_viewport(node: &KdlNode, settings: &mut Settings) -> Result<(), SettingsError> {
    number(node, "width", &mut settings.viewport_width)?;
    number(node, "height", &mut settings.viewport_height)?;
    let controller = &mut settings.controller;
    number(node, "min-scale", &mut controller.min_scale)?;
    number(node, "max-scale", &mut controller.max_scale)?;
    number(node, "wheel-sensitivity", &mut controller.wheel_sensitivity)?;
    number(node, "animation-ms", &mut controller.animation_ms)?;
    number(node, "cull-padding", &mut settings.culler.padding)?;
    let mut threshold = settings.culler.spatial_index_threshold as f64;
    number(node, "spatial-index-threshold", &mut threshold)?;
    settings.culler.spatial_index_threshold = threshold as usize;

    let controller = &settings.controller;
    if controller.min_scale <= 0.0 || controller.min_scale > controller.max_scale {
        return Err(invalid(node, "min-scale", "must be positive and at most max-scale"));
    }
    Ok(())
}

impl Settings {
    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        let doc = KdlDocument::parse(content)?;
        let mut settings = Settings::default();
        for node in doc.nodes() {
            match node.name().value() {
                "server" => {
                    settings.server = argument(node)?;
                    settings.user = string(node, "user")?;
                }
                "output" => settings.output = PathBuf::from(argument(node)?),
                "partition" => settings.partition = argument(node)?,
                "layout" => apply_layout(node, &mut settings.layout)?,
                "viewport" => apply_viewport(node, &mut settings)?,
                other => debug!(node = other, "ignoring unknown settings node"),
            }
        }
        Ok(settings)
    }

    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            info!(path = %path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_document() {
        let settings = Settings::parse(
            r#"
            server "http://rm:8088" user="yarn"
            output "out/queues.svg"
            partition "gpu"
            layout orientation="vertical" node-width=180 curvature=0.3 flow-style="ribbon"
            viewport width=1600 height=900 max-scale=3.0 cull-padding=80 spatial-index-threshold=200
            theme "dark"
            "#,
        )
        .unwrap();
        assert_eq!(settings.server, "http://rm:8088");
        assert_eq!(settings.user.as_deref(), Some("yarn"));
        assert_eq!(settings.output, PathBuf::from("out/queues.svg"));
        assert_eq!(settings.partition, "gpu");
        assert_eq!(settings.layout.orientation, Orientation::Vertical);
        assert_eq!(settings.layout.flow_style, FlowStyle::Ribbon);
        assert_eq!(settings.layout.node_width, 180.0);
        assert_eq!(settings.layout.curvature, 0.3);
        assert_eq!(settings.layout.node_height, LayoutOptions::default().node_height);
        assert_eq!(settings.viewport_width, 1600.0);
        assert_eq!(settings.controller.max_scale, 3.0);
        assert_eq!(settings.culler.padding, 80.0);
        assert_eq!(settings.culler.spatial_index_threshold, 200);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
    }

    #[test]
    fn test_bad_values_name_node_and_property() {
        let err = Settings::parse(r#"layout node-width="wide""#).unwrap_err();
        assert_eq!(err.to_string(), "`layout` node-width: expected a number");

        let err = Settings::parse(r#"layout orientation="diagonal""#).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { property, .. } if property == "orientation"));

        let err = Settings::parse("viewport min-scale=5 max-scale=2").unwrap_err();
        assert!(err.to_string().contains("min-scale"));

        assert!(matches!(
            Settings::parse("server").unwrap_err(),
            SettingsError::Invalid { .. }
        ));
        assert!(matches!(
            Settings::parse("layout {").unwrap_err(),
            SettingsError::Parse(_)
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load_or_default(Path::new("/nonexistent/queueviz.kdl")).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
