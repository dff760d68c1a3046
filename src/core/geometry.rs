use serde::{Deserialize, Serialize};

/// Axis-aligned box in PDF user space: `[left, top, right, bottom]`, y grows downward.
///
/// Serialized as a four-element array, which is how extractors and the cache exchange it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn left(&self) -> f64 {
        self.x0
    }

    pub fn top(&self) -> f64 {
        self.y0
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &Self) -> f64 {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);

        if x1 <= x0 || y1 <= y0 {
            return 0.0;
        }

        let inter_area = (x1 - x0) * (y1 - y0);
        let union = self.area() + other.area() - inter_area;
        if union <= 0.0 {
            0.0
        } else {
            inter_area / union
        }
    }

    /// Multiplies every coordinate by `factor` (PDF points to pixels).
    pub fn scale(&self, factor: f64) -> Self {
        Self {
            x0: self.x0 * factor,
            y0: self.y0 * factor,
            x1: self.x1 * factor,
            y1: self.y1 * factor,
        }
    }

    /// Converts a box whose y axis grows upward from the page bottom into top-left convention.
    pub fn flip_vertical(&self, page_height: f64) -> Self {
        Self {
            x0: self.x0,
            y0: page_height - self.y0,
            x1: self.x1,
            y1: page_height - self.y1,
        }
    }
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}
