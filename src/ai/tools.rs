//! Tool catalogue advertised to the model and the typed calls parsed back.
//!
//! Translator output is untyped JSON. It is parsed here, at the boundary,
//! into the closed [`ToolCall`] set; an unknown tool name or malformed
//! arguments become a validation error.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::spatial::{Layout, Position};
use crate::document::{ShapeId, ShapeKind};
use crate::error::CommandError;
use crate::llm::Tool;

pub const CREATE_SHAPE: &str = "createShape";
pub const MOVE_SHAPE: &str = "moveShape";
pub const RESIZE_SHAPE: &str = "resizeShape";
pub const ROTATE_SHAPE: &str = "rotateShape";
pub const UPDATE_SHAPE_STYLE: &str = "updateShapeStyle";
pub const DELETE_SHAPE: &str = "deleteShape";
pub const ARRANGE_SHAPES: &str = "arrangeShapes";
pub const FIND_SHAPES: &str = "findShapes";

// =============================================================================
// ARGUMENTS
// =============================================================================

/// How a tool call names the shapes it acts on.
///
/// Resolution order: `id`, then `selected`, then the conjunctive filters. A
/// reference with no criteria means the current selection.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeRef {
    pub id: Option<ShapeId>,
    #[serde(rename = "type")]
    pub kind: Option<ShapeKind>,
    pub fill: Option<String>,
    /// Case-insensitive substring of a text shape's content.
    pub text: Option<String>,
    #[serde(default)]
    pub selected: bool,
    /// Act on every match instead of the most recently created one.
    #[serde(default)]
    pub all: bool,
}

impl ShapeRef {
    #[must_use]
    pub fn has_filters(&self) -> bool {
        self.kind.is_some() || self.fill.is_some() || self.text.is_some()
    }

    /// True when the reference names the selection rather than a query.
    #[must_use]
    pub fn is_selection(&self) -> bool {
        self.id.is_none() && (self.selected || (!self.has_filters() && !self.all))
    }

    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(id) = self.id {
            parts.push(format!("id={id}"));
        }
        if let Some(kind) = self.kind {
            parts.push(format!("type={}", kind.as_str()));
        }
        if let Some(fill) = &self.fill {
            parts.push(format!("fill={fill}"));
        }
        if let Some(text) = &self.text {
            parts.push(format!("text~{text:?}"));
        }
        if self.selected {
            parts.push("selected".into());
        }
        if parts.is_empty() {
            if self.all { "all shapes".into() } else { "the selection".into() }
        } else {
            parts.join(", ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub position: Position,
    pub relative_to: Option<ShapeRef>,
    /// Center on the requester's viewport instead of the canvas.
    #[serde(default)]
    pub viewport: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShapeArgs {
    #[serde(rename = "type")]
    pub kind: ShapeKind,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub radius: Option<f64>,
    pub text: Option<String>,
    pub font_size: Option<f64>,
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub stroke_width: Option<f64>,
    pub rotation: Option<f64>,
    pub placement: Option<Placement>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveShapeArgs {
    #[serde(default, alias = "ref")]
    pub target: ShapeRef,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub dx: Option<f64>,
    pub dy: Option<f64>,
    pub placement: Option<Placement>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeShapeArgs {
    #[serde(default, alias = "ref")]
    pub target: ShapeRef,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub radius: Option<f64>,
    pub font_size: Option<f64>,
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateShapeArgs {
    #[serde(default, alias = "ref")]
    pub target: ShapeRef,
    pub degrees: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShapeStyleArgs {
    #[serde(default, alias = "ref")]
    pub target: ShapeRef,
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub stroke_width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteShapeArgs {
    #[serde(default, alias = "ref")]
    pub target: ShapeRef,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrangeShapesArgs {
    #[serde(default, alias = "refs")]
    pub targets: Option<Vec<ShapeRef>>,
    pub layout: Layout,
    pub rows: Option<usize>,
    pub columns: Option<usize>,
    pub spacing: Option<f64>,
}

// =============================================================================
// TOOL CALL
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    CreateShape(CreateShapeArgs),
    MoveShape(MoveShapeArgs),
    ResizeShape(ResizeShapeArgs),
    RotateShape(RotateShapeArgs),
    UpdateShapeStyle(UpdateShapeStyleArgs),
    DeleteShape(DeleteShapeArgs),
    ArrangeShapes(ArrangeShapesArgs),
    FindShapes(ShapeRef),
}

fn args<T: DeserializeOwned>(tool: &str, input: &Value) -> Result<T, CommandError> {
    let input = if input.is_null() { json!({}) } else { input.clone() };
    serde_json::from_value(input).map_err(|e| CommandError::Validation(format!("invalid {tool} arguments: {e}")))
}

impl ToolCall {
    /// Parse one raw call from the translator.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown tool or arguments that do
    /// not fit its schema.
    pub fn parse(name: &str, input: &Value) -> Result<Self, CommandError> {
        Ok(match name {
            CREATE_SHAPE => Self::CreateShape(args(name, input)?),
            MOVE_SHAPE => Self::MoveShape(args(name, input)?),
            RESIZE_SHAPE => Self::ResizeShape(args(name, input)?),
            ROTATE_SHAPE => Self::RotateShape(args(name, input)?),
            UPDATE_SHAPE_STYLE => Self::UpdateShapeStyle(args(name, input)?),
            DELETE_SHAPE => Self::DeleteShape(args(name, input)?),
            ARRANGE_SHAPES => Self::ArrangeShapes(args(name, input)?),
            FIND_SHAPES => Self::FindShapes(args(name, input)?),
            other => return Err(CommandError::Validation(format!("unknown tool: {other}"))),
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateShape(_) => CREATE_SHAPE,
            Self::MoveShape(_) => MOVE_SHAPE,
            Self::ResizeShape(_) => RESIZE_SHAPE,
            Self::RotateShape(_) => ROTATE_SHAPE,
            Self::UpdateShapeStyle(_) => UPDATE_SHAPE_STYLE,
            Self::DeleteShape(_) => DELETE_SHAPE,
            Self::ArrangeShapes(_) => ARRANGE_SHAPES,
            Self::FindShapes(_) => FIND_SHAPES,
        }
    }
}

// =============================================================================
// SCHEMAS
// =============================================================================

fn ref_schema() -> Value {
    json!({
        "type": "object",
        "description": "Which shapes to act on. Omit every field to use the user's selection.",
        "properties": {
            "id": { "type": "string", "format": "uuid" },
            "type": { "type": "string", "enum": ["rectangle", "circle", "text"] },
            "fill": { "type": "string", "description": "Color name or hex" },
            "text": { "type": "string", "description": "Substring of a text shape's content" },
            "selected": { "type": "boolean" },
            "all": { "type": "boolean", "description": "Every match rather than the newest one" }
        }
    })
}

fn placement_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "position": { "type": "string", "enum": ["above", "below", "leftOf", "rightOf", "center"] },
            "relativeTo": ref_schema(),
            "viewport": { "type": "boolean", "description": "Only when the user says 'center of my view'" }
        },
        "required": ["position"]
    })
}

/// Tools advertised to the model.
#[must_use]
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: CREATE_SHAPE.into(),
            description: "Create one rectangle, circle, or text shape. x/y is the top-left corner.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "type": { "type": "string", "enum": ["rectangle", "circle", "text"] },
                    "x": { "type": "number" },
                    "y": { "type": "number" },
                    "width": { "type": "number" },
                    "height": { "type": "number" },
                    "radius": { "type": "number" },
                    "text": { "type": "string" },
                    "fontSize": { "type": "number" },
                    "fill": { "type": "string" },
                    "stroke": { "type": "string" },
                    "strokeWidth": { "type": "number" },
                    "rotation": { "type": "number" },
                    "placement": placement_schema()
                },
                "required": ["type"]
            }),
        },
        Tool {
            name: MOVE_SHAPE.into(),
            description: "Move shapes to an absolute x/y, by dx/dy, or next to another shape.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target": ref_schema(),
                    "x": { "type": "number" },
                    "y": { "type": "number" },
                    "dx": { "type": "number" },
                    "dy": { "type": "number" },
                    "placement": placement_schema()
                }
            }),
        },
        Tool {
            name: RESIZE_SHAPE.into(),
            description: "Resize shapes to absolute dimensions or by a scale factor.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target": ref_schema(),
                    "width": { "type": "number" },
                    "height": { "type": "number" },
                    "radius": { "type": "number" },
                    "fontSize": { "type": "number" },
                    "scale": { "type": "number" }
                }
            }),
        },
        Tool {
            name: ROTATE_SHAPE.into(),
            description: "Rotate shapes by a number of degrees, relative to their current rotation.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target": ref_schema(),
                    "degrees": { "type": "number" }
                },
                "required": ["degrees"]
            }),
        },
        Tool {
            name: UPDATE_SHAPE_STYLE.into(),
            description: "Change fill, stroke, or stroke width. Omitted fields are left alone.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target": ref_schema(),
                    "fill": { "type": "string" },
                    "stroke": { "type": "string" },
                    "strokeWidth": { "type": "number" }
                }
            }),
        },
        Tool {
            name: DELETE_SHAPE.into(),
            description: "Delete shapes.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "target": ref_schema() }
            }),
        },
        Tool {
            name: ARRANGE_SHAPES.into(),
            description: "Lay shapes out in a row, a column, or a grid, keeping their sizes and reading order.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "targets": { "type": "array", "items": ref_schema() },
                    "layout": { "type": "string", "enum": ["horizontal", "vertical", "grid"] },
                    "rows": { "type": "integer", "minimum": 1 },
                    "columns": { "type": "integer", "minimum": 1 },
                    "spacing": { "type": "number" }
                },
                "required": ["layout"]
            }),
        },
        Tool {
            name: FIND_SHAPES.into(),
            description: "Find shapes by type, fill, or text. The matches become the selection for later calls.".into(),
            input_schema: ref_schema(),
        },
    ]
}
