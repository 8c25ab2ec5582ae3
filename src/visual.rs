//! Declarative visuals for a segment: background plus timed text overlays
//!
//! Values here carry no ffmpeg syntax; [`crate::filter`] compiles them.

use serde::{Deserialize, Serialize};

/// A color as written in job files: `#RRGGBB`, `#RRGGBBAA`, or a named color
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub String);

impl Color {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// ffmpeg color syntax (`0xRRGGBB[AA]` or the name unchanged)
    pub fn to_ffmpeg(&self) -> Result<String, String> {
        let raw = self.0.trim();
        if let Some(hex) = raw.strip_prefix('#') {
            let valid_len = hex.len() == 6 || hex.len() == 8;
            if !valid_len || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!("invalid hex color '{raw}'"));
            }
            return Ok(format!("0x{}", hex.to_ascii_uppercase()));
        }
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("invalid color '{raw}'"));
        }
        Ok(raw.to_string())
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::new("#000000")
    }
}

/// Gradient direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradientDirection {
    #[default]
    Vertical,
    Horizontal,
    Diagonal,
}

/// Segment background
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Background {
    Solid {
        color: Color,
    },
    Gradient {
        from: Color,
        to: Color,
        #[serde(default)]
        direction: GradientDirection,
    },
}

impl Default for Background {
    fn default() -> Self {
        Self::Solid { color: Color::default() }
    }
}

impl Background {
    #[must_use]
    pub fn solid(color: &str) -> Self {
        Self::Solid { color: Color::new(color) }
    }

    #[must_use]
    pub fn gradient(from: &str, to: &str) -> Self {
        Self::Gradient {
            from: Color::new(from),
            to: Color::new(to),
            direction: GradientDirection::Vertical,
        }
    }
}

/// Position for overlay text
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayPosition {
    /// Upper left corner, inset by the margin
    TopLeft,
    /// Centered along the top edge (titles)
    TopCenter,
    /// Upper right corner
    TopRight,
    /// Left edge, vertically centered
    MiddleLeft,
    /// Canvas center
    #[default]
    MiddleCenter,
    /// Right edge, vertically centered
    MiddleRight,
    /// Lower left corner
    BottomLeft,
    /// Centered along the bottom edge (captions)
    BottomCenter,
    /// Lower right corner (watermarks)
    BottomRight,
    /// Explicit x, y: pixels, or fractions of the canvas when both are below 1.0
    Custom(f32, f32),
}

/// Placement along one axis of the canvas
#[derive(Debug, Clone, Copy)]
enum Align {
    Start,
    Center,
    End,
}

impl Align {
    /// drawtext expression for an axis of `extent` holding text of `size`
    fn expr(self, extent: &str, size: &str, margin: u32) -> String {
        match self {
            Self::Start => margin.to_string(),
            Self::Center => format!("({extent}-{size})/2"),
            Self::End => format!("{extent}-{size}-{margin}"),
        }
    }
}

impl OverlayPosition {
    /// Horizontal and vertical alignment; `Custom` has none and reads as centered
    fn alignment(self) -> (Align, Align) {
        use Align::{Center, End, Start};
        match self {
            Self::TopLeft => (Start, Start),
            Self::TopCenter => (Center, Start),
            Self::TopRight => (End, Start),
            Self::MiddleLeft => (Start, Center),
            Self::MiddleRight => (End, Center),
            Self::BottomLeft => (Start, End),
            Self::BottomCenter => (Center, End),
            Self::BottomRight => (End, End),
            Self::MiddleCenter | Self::Custom(..) => (Center, Center),
        }
    }

    /// drawtext `x` and `y` expressions, `margin` pixels in from the edges
    #[must_use]
    pub fn to_drawtext_position(&self, margin: u32) -> (String, String) {
        match *self {
            Self::Custom(x, y) if x < 1.0 && y < 1.0 => (format!("w*{x}"), format!("h*{y}")),
            Self::Custom(x, y) => (format!("{x}"), format!("{y}")),
            grid => {
                let (h, v) = grid.alignment();
                (h.expr("w", "text_w", margin), v.expr("h", "text_h", margin))
            }
        }
    }
}

/// Text styling for one overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextStyle {
    /// Font family resolved through fontconfig
    pub font: String,
    /// Explicit font file; wins over `font`
    pub font_file: Option<String>,
    pub font_size: u32,
    pub color: Color,
    /// Box behind the text; `None` for no box
    pub box_color: Option<Color>,
    pub box_opacity: f32,
    pub outline_color: Color,
    pub outline_width: u32,
    pub position: OverlayPosition,
    /// Distance from the canvas edge for anchored positions
    pub margin: u32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font: "Sans".to_string(),
            font_file: None,
            font_size: 64,
            color: Color::new("#FFFFFF"),
            box_color: None,
            box_opacity: 0.5,
            outline_color: Color::new("#000000"),
            outline_width: 2,
            position: OverlayPosition::MiddleCenter,
            margin: 60,
        }
    }
}

impl TextStyle {
    /// Large centered headline
    #[must_use]
    pub fn headline() -> Self {
        Self {
            font_size: 96,
            outline_width: 4,
            ..Default::default()
        }
    }

    /// Call-to-action banner near the bottom edge
    #[must_use]
    pub fn banner() -> Self {
        Self {
            font_size: 56,
            box_color: Some(Color::new("#000000")),
            box_opacity: 0.6,
            outline_width: 0,
            position: OverlayPosition::BottomCenter,
            margin: 160,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_position(mut self, position: OverlayPosition) -> Self {
        self.position = position;
        self
    }
}

/// Text drawn during `[visible_from, visible_to)` of its segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOverlay {
    pub text: String,
    #[serde(default)]
    pub style: TextStyle,
    #[serde(default)]
    pub visible_from: f64,
    /// Open-ended when absent: visible until the segment ends
    #[serde(default)]
    pub visible_to: Option<f64>,
}

impl TextOverlay {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: TextStyle::default(),
            visible_from: 0.0,
            visible_to: None,
        }
    }

    #[must_use]
    pub fn with_style(mut self, style: TextStyle) -> Self {
        self.style = style;
        self
    }

    #[must_use]
    pub fn between(mut self, from: f64, to: f64) -> Self {
        self.visible_from = from;
        self.visible_to = Some(to);
        self
    }

    /// Clamp the window to `[0, duration)`.
    ///
    /// Returns `None` when the window lies entirely outside the clip or is
    /// empty, which callers treat as a configuration error.
    #[must_use]
    pub fn clamped_window(&self, duration: f64) -> Option<(f64, f64)> {
        let to = self.visible_to.unwrap_or(duration);
        if !self.visible_from.is_finite() || !to.is_finite() {
            return None;
        }
        let from = self.visible_from.max(0.0);
        let to = to.min(duration);
        (from < to).then_some((from, to))
    }
}

/// Everything visual about a segment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisualSpec {
    #[serde(default)]
    pub background: Background,
    #[serde(default)]
    pub overlays: Vec<TextOverlay>,
}

impl VisualSpec {
    #[must_use]
    pub fn new(background: Background) -> Self {
        Self {
            background,
            overlays: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_overlay(mut self, overlay: TextOverlay) -> Self {
        self.overlays.push(overlay);
        self
    }

    /// Same background, no text
    #[must_use]
    pub fn background_only(&self) -> Self {
        Self::new(self.background.clone())
    }
}
