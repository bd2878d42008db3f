//! Shape model: kinds, geometry, style, and the field vocabulary used for
//! per-field replication.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clock::Stamp;

pub type ShapeId = Uuid;

/// `created_by` value for shapes produced by the AI assistant.
pub const AI_ASSISTANT: &str = "ai-assistant";

pub const DEFAULT_FILL: &str = "#CCCCCC";
pub const DEFAULT_STROKE: &str = "#000000";
pub const DEFAULT_STROKE_WIDTH: f64 = 1.0;
pub const DEFAULT_FONT_SIZE: f64 = 16.0;

/// Width of one text glyph relative to the font size, for bounding boxes.
const GLYPH_WIDTH_RATIO: f64 = 0.6;
const LINE_HEIGHT_RATIO: f64 = 1.2;

// =============================================================================
// KIND + GEOMETRY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Rectangle,
    Circle,
    Text,
}

impl ShapeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rectangle => "rectangle",
            Self::Circle => "circle",
            Self::Text => "text",
        }
    }
}

/// Kind-specific geometry. `x`/`y` on the owning shape is always the top-left
/// of the bounding box, including for circles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Geometry {
    Rectangle { width: f64, height: f64 },
    Circle { radius: f64 },
    Text { text: String, font_size: f64 },
}

impl Geometry {
    #[must_use]
    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::Rectangle { .. } => ShapeKind::Rectangle,
            Self::Circle { .. } => ShapeKind::Circle,
            Self::Text { .. } => ShapeKind::Text,
        }
    }

    /// Width and height of the bounding box.
    #[must_use]
    pub fn extent(&self) -> (f64, f64) {
        match self {
            Self::Rectangle { width, height } => (*width, *height),
            Self::Circle { radius } => (radius * 2.0, radius * 2.0),
            Self::Text { text, font_size } => {
                #[allow(clippy::cast_precision_loss)]
                let chars = text.chars().count().max(1) as f64;
                (chars * GLYPH_WIDTH_RATIO * font_size, LINE_HEIGHT_RATIO * font_size)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub fill: String,
    pub stroke: String,
    pub stroke_width: f64,
}

impl Default for Style {
    fn default() -> Self {
        Self { fill: DEFAULT_FILL.into(), stroke: DEFAULT_STROKE.into(), stroke_width: DEFAULT_STROKE_WIDTH }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

// =============================================================================
// SHAPE
// =============================================================================

/// Materialized view of one live shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub id: ShapeId,
    pub x: f64,
    pub y: f64,
    #[serde(flatten)]
    pub geometry: Geometry,
    pub style: Style,
    /// Degrees, always in `[0, 360)`.
    pub rotation: f64,
    pub z_index: i64,
    pub created_by: String,
    pub ai_generated: bool,
    /// Version of the creating write. Assigned by the store.
    #[serde(default = "zero_stamp")]
    pub created: Stamp,
}

fn zero_stamp() -> Stamp {
    Stamp::ZERO
}

impl Shape {
    /// New shape with a freshly minted id and default style.
    #[must_use]
    pub fn new(geometry: Geometry, x: f64, y: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            x,
            y,
            geometry,
            style: Style::default(),
            rotation: 0.0,
            z_index: 0,
            created_by: String::new(),
            ai_generated: false,
            created: Stamp::ZERO,
        }
    }

    #[must_use]
    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(Geometry::Rectangle { width, height }, x, y)
    }

    #[must_use]
    pub fn circle(x: f64, y: f64, radius: f64) -> Self {
        Self::new(Geometry::Circle { radius }, x, y)
    }

    #[must_use]
    pub fn text(x: f64, y: f64, text: impl Into<String>) -> Self {
        Self::new(Geometry::Text { text: text.into(), font_size: DEFAULT_FONT_SIZE }, x, y)
    }

    #[must_use]
    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    #[must_use]
    pub fn with_creator(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }

    #[must_use]
    pub fn kind(&self) -> ShapeKind {
        self.geometry.kind()
    }

    #[must_use]
    pub fn bounds(&self) -> Bounds {
        let (width, height) = self.geometry.extent();
        Bounds { x: self.x, y: self.y, width, height }
    }

    /// Every replicated field of this shape with its current value.
    #[must_use]
    pub fn fields(&self) -> Vec<(Field, FieldValue)> {
        #[allow(clippy::cast_precision_loss)]
        let z_index = self.z_index as f64;
        let mut out = vec![
            (Field::X, FieldValue::Number(self.x)),
            (Field::Y, FieldValue::Number(self.y)),
            (Field::Fill, FieldValue::Text(self.style.fill.clone())),
            (Field::Stroke, FieldValue::Text(self.style.stroke.clone())),
            (Field::StrokeWidth, FieldValue::Number(self.style.stroke_width)),
            (Field::Rotation, FieldValue::Number(self.rotation)),
            (Field::ZIndex, FieldValue::Number(z_index)),
        ];
        match &self.geometry {
            Geometry::Rectangle { width, height } => {
                out.push((Field::Width, FieldValue::Number(*width)));
                out.push((Field::Height, FieldValue::Number(*height)));
            }
            Geometry::Circle { radius } => out.push((Field::Radius, FieldValue::Number(*radius))),
            Geometry::Text { text, font_size } => {
                out.push((Field::Text, FieldValue::Text(text.clone())));
                out.push((Field::FontSize, FieldValue::Number(*font_size)));
            }
        }
        out
    }

    /// Write one field. Values are expected to have passed [`Field::check`];
    /// a field that does not apply to this kind or a mistyped value is ignored.
    pub fn set(&mut self, field: Field, value: &FieldValue) {
        match (field, value) {
            (Field::X, FieldValue::Number(v)) => self.x = *v,
            (Field::Y, FieldValue::Number(v)) => self.y = *v,
            (Field::Fill, FieldValue::Text(v)) => self.style.fill.clone_from(v),
            (Field::Stroke, FieldValue::Text(v)) => self.style.stroke.clone_from(v),
            (Field::StrokeWidth, FieldValue::Number(v)) => self.style.stroke_width = *v,
            (Field::Rotation, FieldValue::Number(v)) => self.rotation = normalize_rotation(*v),
            #[allow(clippy::cast_possible_truncation)]
            (Field::ZIndex, FieldValue::Number(v)) => self.z_index = v.round() as i64,
            (Field::Width, FieldValue::Number(v)) => {
                if let Geometry::Rectangle { width, .. } = &mut self.geometry {
                    *width = *v;
                }
            }
            (Field::Height, FieldValue::Number(v)) => {
                if let Geometry::Rectangle { height, .. } = &mut self.geometry {
                    *height = *v;
                }
            }
            (Field::Radius, FieldValue::Number(v)) => {
                if let Geometry::Circle { radius } = &mut self.geometry {
                    *radius = *v;
                }
            }
            (Field::Text, FieldValue::Text(v)) => {
                if let Geometry::Text { text, .. } = &mut self.geometry {
                    text.clone_from(v);
                }
            }
            (Field::FontSize, FieldValue::Number(v)) => {
                if let Geometry::Text { font_size, .. } = &mut self.geometry {
                    *font_size = *v;
                }
            }
            _ => {}
        }
    }

    /// Blank shape of a kind, used as the base when materializing registers.
    pub(crate) fn blank(id: ShapeId, kind: ShapeKind) -> Self {
        let geometry = match kind {
            ShapeKind::Rectangle => Geometry::Rectangle { width: 0.0, height: 0.0 },
            ShapeKind::Circle => Geometry::Circle { radius: 0.0 },
            ShapeKind::Text => Geometry::Text { text: String::new(), font_size: DEFAULT_FONT_SIZE },
        };
        Self { id, ..Self::new(geometry, 0.0, 0.0) }
    }
}

/// Fold any angle into `[0, 360)`.
#[must_use]
pub fn normalize_rotation(degrees: f64) -> f64 {
    let r = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if r >= 360.0 { 0.0 } else { r }
}

// =============================================================================
// FIELDS
// =============================================================================

/// Independently replicated shape attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    X,
    Y,
    Width,
    Height,
    Radius,
    Text,
    FontSize,
    Fill,
    Stroke,
    StrokeWidth,
    Rotation,
    ZIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl Field {
    #[must_use]
    pub fn applies_to(self, kind: ShapeKind) -> bool {
        match self {
            Self::Width | Self::Height => kind == ShapeKind::Rectangle,
            Self::Radius => kind == ShapeKind::Circle,
            Self::Text | Self::FontSize => kind == ShapeKind::Text,
            _ => true,
        }
    }

    /// Type-check and normalize a value for this field.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the value has the wrong
    /// type, is not finite, or is a negative size.
    pub fn check(self, value: FieldValue) -> Result<FieldValue, String> {
        match (self, value) {
            (Self::Text | Self::Fill | Self::Stroke, FieldValue::Text(s)) => Ok(FieldValue::Text(s)),
            (Self::Text | Self::Fill | Self::Stroke, FieldValue::Number(_)) => {
                Err(format!("{self:?} expects a string"))
            }
            (_, FieldValue::Text(_)) => Err(format!("{self:?} expects a number")),
            (_, FieldValue::Number(v)) if !v.is_finite() => Err(format!("{self:?} must be finite")),
            (Self::Rotation, FieldValue::Number(v)) => Ok(FieldValue::Number(normalize_rotation(v))),
            (Self::Width | Self::Height | Self::Radius | Self::FontSize | Self::StrokeWidth, FieldValue::Number(v))
                if v < 0.0 =>
            {
                Err(format!("{self:?} must not be negative"))
            }
            (_, value) => Ok(value),
        }
    }
}
