//! Argument validation and clamping for AI tool calls.
//!
//! Values below a minimum are rejected; values above a maximum are clamped.

use crate::error::CommandError;

pub const MIN_LINEAR: f64 = 10.0;
pub const MIN_RADIUS: f64 = 5.0;
pub const MIN_FONT_SIZE: f64 = 8.0;
pub const MAX_DIMENSION: f64 = 5000.0;
pub const MAX_STROKE_WIDTH: f64 = 50.0;
pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 10.0;
pub const DEFAULT_SPACING: f64 = 20.0;
pub const MAX_SPACING: f64 = 500.0;
pub const MAX_TEXT_CHARS: usize = 500;

const NAMED_COLORS: &[(&str, &str)] = &[
    ("black", "#000000"),
    ("white", "#FFFFFF"),
    ("red", "#FF0000"),
    ("green", "#00FF00"),
    ("blue", "#0000FF"),
    ("yellow", "#FFFF00"),
    ("orange", "#FFA500"),
    ("purple", "#800080"),
    ("pink", "#FFC0CB"),
    ("brown", "#A52A2A"),
    ("gray", "#808080"),
    ("grey", "#808080"),
    ("cyan", "#00FFFF"),
    ("magenta", "#FF00FF"),
    ("teal", "#008080"),
    ("navy", "#000080"),
    ("lime", "#00FF00"),
    ("maroon", "#800000"),
    ("olive", "#808000"),
    ("silver", "#C0C0C0"),
];

/// Normalize a color to uppercase `#RRGGBB`. Accepts common names, `#rgb`,
/// and `#rrggbb` with or without the leading `#`.
///
/// # Errors
///
/// Returns a validation error for anything else.
pub fn normalize_color(raw: &str) -> Result<String, CommandError> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    if let Some((_, hex)) = NAMED_COLORS.iter().find(|(name, _)| *name == lower) {
        return Ok((*hex).to_string());
    }

    let digits = lower.strip_prefix('#').unwrap_or(&lower);
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CommandError::Validation(format!("unrecognized color: {trimmed:?}")));
    }
    let expanded = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => digits.to_string(),
        _ => return Err(CommandError::Validation(format!("unrecognized color: {trimmed:?}"))),
    };
    Ok(format!("#{}", expanded.to_ascii_uppercase()))
}

/// # Errors
///
/// Returns a validation error for NaN or infinite input.
pub fn finite(name: &str, value: f64) -> Result<f64, CommandError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CommandError::Validation(format!("{name} must be a finite number")))
    }
}

/// Reject a size below `min`, clamp one above [`MAX_DIMENSION`].
///
/// # Errors
///
/// Returns a validation error when the value is below `min` or not finite.
pub fn dimension(name: &str, value: f64, min: f64) -> Result<f64, CommandError> {
    let value = finite(name, value)?;
    if value < min {
        return Err(CommandError::Validation(format!("{name} {value} is below the minimum of {min}")));
    }
    Ok(value.min(MAX_DIMENSION))
}

/// # Errors
///
/// Returns a validation error for non-finite input.
pub fn stroke_width(value: f64) -> Result<f64, CommandError> {
    Ok(finite("strokeWidth", value)?.clamp(0.0, MAX_STROKE_WIDTH))
}

/// # Errors
///
/// Returns a validation error for a non-positive or non-finite factor.
pub fn scale(value: f64) -> Result<f64, CommandError> {
    let value = finite("scale", value)?;
    if value <= 0.0 {
        return Err(CommandError::Validation(format!("scale must be positive, got {value}")));
    }
    Ok(value.clamp(MIN_SCALE, MAX_SCALE))
}

/// # Errors
///
/// Returns a validation error for non-finite input.
pub fn spacing(value: Option<f64>) -> Result<f64, CommandError> {
    match value {
        None => Ok(DEFAULT_SPACING),
        Some(v) => Ok(finite("spacing", v)?.clamp(0.0, MAX_SPACING)),
    }
}

/// # Errors
///
/// Returns a validation error for blank or oversized text.
pub fn text(value: &str) -> Result<String, CommandError> {
    if value.trim().is_empty() {
        return Err(CommandError::Validation("text must not be empty".into()));
    }
    if value.chars().count() > MAX_TEXT_CHARS {
        return Err(CommandError::Validation(format!("text exceeds {MAX_TEXT_CHARS} characters")));
    }
    Ok(value.to_string())
}

/// Check prompt length before anything is dispatched.
///
/// # Errors
///
/// Returns a validation error for an empty prompt or one over `max_chars`.
pub fn prompt(value: &str, max_chars: usize) -> Result<(), CommandError> {
    if value.trim().is_empty() {
        return Err(CommandError::Validation("prompt is empty".into()));
    }
    let len = value.chars().count();
    if len > max_chars {
        return Err(CommandError::Validation(format!("prompt is {len} characters; the limit is {max_chars}")));
    }
    Ok(())
}
