use std::fmt;

use serde::{Deserialize, Serialize};

/// Fill colour of one glyph, each channel in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Rgb { r, g, b }
    }

    pub fn is_valid(&self) -> bool {
        [self.r, self.g, self.b]
            .iter()
            .all(|c| c.is_finite() && (0.0..=1.0).contains(c))
    }

    /// Channels rounded to hundredths, as integers to keep comparisons exact.
    fn hundredths(&self) -> (i32, i32, i32) {
        (round2(self.r), round2(self.g), round2(self.b))
    }

    /// The green used for the copyright line stamped on every page.
    pub fn is_watermark(&self) -> bool {
        self.hundredths() == (0, 39, 0)
    }
}

fn round2(c: f32) -> i32 {
    (c as f64 * 100.0).round() as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorCategory {
    Black,
    Blue,
    Green,
    Red,
    DarkGray,
    Other,
}

impl ColorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorCategory::Black => "black",
            ColorCategory::Blue => "blue",
            ColorCategory::Green => "green",
            ColorCategory::Red => "red",
            ColorCategory::DarkGray => "dark_gray",
            ColorCategory::Other => "other",
        }
    }

    pub fn is_highlight(&self) -> bool {
        matches!(self, ColorCategory::Red | ColorCategory::Blue)
    }
}

impl fmt::Display for ColorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First matching rule wins; anything unmatched is `Other`.
pub fn classify(color: Rgb) -> ColorCategory {
    let (r, g, b) = color.hundredths();

    if r == 0 && g == 0 && b == 0 {
        ColorCategory::Black
    } else if b >= 55 && b > r.max(g) {
        ColorCategory::Blue
    } else if g >= 39 && g > r.max(b) {
        ColorCategory::Green
    } else if r >= 50 && r > g.max(b) {
        ColorCategory::Red
    } else if [r, g, b].iter().all(|c| (14..=15).contains(c)) {
        ColorCategory::DarkGray
    } else {
        ColorCategory::Other
    }
}
