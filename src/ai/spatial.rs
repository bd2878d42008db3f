//! Spatial reasoning for AI placement and layout.
//!
//! Relative positions are computed from the anchor shape's bounding box plus
//! a fixed margin. "Center" without an anchor means the center of the
//! canonical canvas, or of the viewport when the instruction explicitly asks
//! for it.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::document::{Bounds, Shape, ShapeId};
use crate::error::CommandError;

pub const CANVAS_WIDTH: f64 = 5000.0;
pub const CANVAS_HEIGHT: f64 = 5000.0;
pub const MARGIN: f64 = 20.0;

/// Visible region of the requesting client, in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        Bounds { x: self.x, y: self.y, width: self.width, height: self.height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Position {
    Above,
    Below,
    LeftOf,
    RightOf,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Horizontal,
    Vertical,
    Grid,
}

#[must_use]
pub fn canvas_bounds() -> Bounds {
    Bounds { x: 0.0, y: 0.0, width: CANVAS_WIDTH, height: CANVAS_HEIGHT }
}

/// Clamp a top-left coordinate so a span of `extent` stays on the canvas.
#[must_use]
pub fn clamp_origin(value: f64, extent: f64, limit: f64) -> f64 {
    value.clamp(0.0, (limit - extent).max(0.0))
}

/// Top-left for a box of `size` placed at `position`.
///
/// `anchor` is the reference shape's bounds, if any. `frame` is what
/// `Center` falls back to without an anchor.
///
/// # Errors
///
/// Directional positions need an anchor.
pub fn place(position: Position, anchor: Option<Bounds>, frame: Bounds, size: (f64, f64)) -> Result<(f64, f64), CommandError> {
    let (w, h) = size;
    let Some(a) = anchor else {
        return match position {
            Position::Center => {
                let (cx, cy) = frame.center();
                Ok((cx - w / 2.0, cy - h / 2.0))
            }
            _ => Err(CommandError::Validation(format!("{position:?} placement needs a relativeTo shape"))),
        };
    };
    Ok(match position {
        Position::Above => (a.x, a.y - MARGIN - h),
        Position::Below => (a.x, a.y + a.height + MARGIN),
        Position::LeftOf => (a.x - MARGIN - w, a.y),
        Position::RightOf => (a.x + a.width + MARGIN, a.y),
        Position::Center => {
            let (cx, cy) = a.center();
            (cx - w / 2.0, cy - h / 2.0)
        }
    })
}

fn reading_order(a: &Shape, b: &Shape, primary_is_x: bool) -> Ordering {
    let (pa, sa, pb, sb) = if primary_is_x { (a.x, a.y, b.x, b.y) } else { (a.y, a.x, b.y, b.x) };
    pa.total_cmp(&pb).then(sa.total_cmp(&sb)).then(a.created.cmp(&b.created))
}

/// Grid dimensions for `count` shapes.
///
/// # Errors
///
/// Returns a validation error when explicit rows and columns cannot hold
/// every shape, either is zero, or their product overflows.
pub fn grid_shape(count: usize, rows: Option<usize>, columns: Option<usize>) -> Result<(usize, usize), CommandError> {
    let count = count.max(1);
    let (rows, columns) = match (rows, columns) {
        (Some(0), _) | (_, Some(0)) => {
            return Err(CommandError::Validation("grid rows and columns must be at least 1".into()));
        }
        (Some(r), Some(c)) => (r, c),
        (Some(r), None) => (r, count.div_ceil(r)),
        (None, Some(c)) => (count.div_ceil(c), c),
        (None, None) => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
            let c = (count as f64).sqrt().ceil() as usize;
            (count.div_ceil(c), c)
        }
    };
    let Some(cells) = rows.checked_mul(columns) else {
        return Err(CommandError::Validation(format!("a {rows}x{columns} grid is too large")));
    };
    if cells < count {
        return Err(CommandError::Validation(format!("a {rows}x{columns} grid cannot hold {count} shapes")));
    }
    Ok((rows, columns))
}

/// Origin for a laid-out group spanning `extent` along one axis, shifted as
/// a whole so the group stays on the canvas.
fn fit_span(origin: f64, extent: f64, limit: f64, what: &str) -> Result<f64, CommandError> {
    if extent > limit {
        return Err(CommandError::Validation(format!("{what} spans {extent}, wider than the {limit} canvas")));
    }
    Ok(clamp_origin(origin, extent, limit))
}

/// New top-left positions laying `shapes` out in `layout`. Sizes are kept.
/// Ordering is stable: horizontal by `(x, y, creation)`, vertical and grid
/// by `(y, x, creation)`. The layout starts at the group's top-left corner
/// and the whole group moves back onto the canvas if it would overhang.
///
/// # Errors
///
/// Propagates grid sizing errors. A layout larger than the canvas is a
/// validation error.
pub fn arrange(
    shapes: &[Shape],
    layout: Layout,
    spacing: f64,
    grid: (Option<usize>, Option<usize>),
) -> Result<Vec<(ShapeId, f64, f64)>, CommandError> {
    if shapes.is_empty() {
        return Ok(Vec::new());
    }
    let mut ordered: Vec<&Shape> = shapes.iter().collect();
    ordered.sort_by(|a, b| reading_order(a, b, layout == Layout::Horizontal));

    let x0 = shapes.iter().map(|s| s.x).fold(f64::INFINITY, f64::min);
    let y0 = shapes.iter().map(|s| s.y).fold(f64::INFINITY, f64::min);

    let sizes: Vec<(f64, f64)> = ordered.iter().map(|s| s.bounds()).map(|b| (b.width, b.height)).collect();
    let (total_w, total_h) = sizes.iter().fold((0.0_f64, 0.0_f64), |(w, h), (sw, sh)| (w + sw, h + sh));
    let (max_w, max_h) = sizes.iter().fold((0.0_f64, 0.0_f64), |(w, h), (sw, sh)| (w.max(*sw), h.max(*sh)));
    #[allow(clippy::cast_precision_loss)]
    let gaps = (ordered.len() - 1) as f64 * spacing;

    let mut out = Vec::with_capacity(ordered.len());
    match layout {
        Layout::Horizontal => {
            let mut cursor = fit_span(x0, total_w + gaps, CANVAS_WIDTH, "horizontal row")?;
            let y = fit_span(y0, max_h, CANVAS_HEIGHT, "horizontal row")?;
            for shape in ordered {
                out.push((shape.id, cursor, y));
                cursor += shape.bounds().width + spacing;
            }
        }
        Layout::Vertical => {
            let x = fit_span(x0, max_w, CANVAS_WIDTH, "vertical column")?;
            let mut cursor = fit_span(y0, total_h + gaps, CANVAS_HEIGHT, "vertical column")?;
            for shape in ordered {
                out.push((shape.id, x, cursor));
                cursor += shape.bounds().height + spacing;
            }
        }
        Layout::Grid => {
            let (_, columns) = grid_shape(ordered.len(), grid.0, grid.1)?;
            let used_columns = columns.min(ordered.len());
            let used_rows = ordered.len().div_ceil(columns);
            #[allow(clippy::cast_precision_loss)]
            let (span_w, span_h) = (
                used_columns as f64 * (max_w + spacing) - spacing,
                used_rows as f64 * (max_h + spacing) - spacing,
            );
            let gx = fit_span(x0, span_w, CANVAS_WIDTH, "grid")?;
            let gy = fit_span(y0, span_h, CANVAS_HEIGHT, "grid")?;
            for (i, shape) in ordered.into_iter().enumerate() {
                #[allow(clippy::cast_precision_loss)]
                let (col, row) = ((i % columns) as f64, (i / columns) as f64);
                out.push((shape.id, gx + col * (max_w + spacing), gy + row * (max_h + spacing)));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "spatial_test.rs"]
mod tests;
