use anyhow::{anyhow, Result};
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::core::error::TableFuseError;
use crate::core::geometry::BBox;
use crate::render::PageSource;

pub const DEFAULT_DPI: u32 = 192;

/// PDF user space is 72 points per inch.
const PDF_POINTS_PER_INCH: f64 = 72.0;

/// Pixel rectangle inside a rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Scales a PDF-space box to pixels, rounding each edge to the nearest pixel.
    pub fn from_bbox(bbox: &BBox, scale: f64) -> Self {
        let px = bbox.scale(scale);
        let x0 = px.x0.round().max(0.0) as u32;
        let y0 = px.y0.round().max(0.0) as u32;
        let x1 = px.x1.round().max(0.0) as u32;
        let y1 = px.y1.round().max(0.0) as u32;
        Self {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.right().min(width) - x,
            height: self.bottom().min(height) - y,
        }
    }
}

/// Crops table regions out of rendered pages of one document.
///
/// Each page is rendered at most once and kept until `close`. Fusion workers
/// of the same document share one cropper. The map lock is only held to find
/// a page's slot; the render holds that slot's lock alone, so a worker asking
/// for the same page waits for the first render while workers on other pages
/// carry on.
pub struct RegionCropper {
    source: Box<dyn PageSource>,
    dpi: u32,
    page_count: usize,
    pages: Mutex<HashMap<usize, Arc<PageSlot>>>,
}

type PageSlot = Mutex<Option<Arc<DynamicImage>>>;

impl RegionCropper {
    pub fn new(source: Box<dyn PageSource>, dpi: u32) -> Result<Self> {
        if dpi == 0 {
            return Err(TableFuseError::Config("dpi must be positive".to_string()).into());
        }
        let page_count = source.page_count()?;
        Ok(Self {
            source,
            dpi,
            page_count,
            pages: Mutex::new(HashMap::new()),
        })
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Pixels per PDF point.
    pub fn scale(&self) -> f64 {
        f64::from(self.dpi) / PDF_POINTS_PER_INCH
    }

    pub fn render(&self, page_idx: usize) -> Result<Arc<DynamicImage>> {
        if page_idx >= self.page_count {
            return Err(TableFuseError::PageNotFound {
                page_idx,
                page_count: self.page_count,
            }
            .into());
        }

        let slot = {
            let mut pages = self
                .pages
                .lock()
                .map_err(|_| anyhow!("page image cache lock poisoned"))?;
            Arc::clone(pages.entry(page_idx).or_default())
        };

        let mut cached = slot
            .lock()
            .map_err(|_| anyhow!("page {page_idx} image lock poisoned"))?;
        if let Some(image) = cached.as_ref() {
            return Ok(Arc::clone(image));
        }

        debug!(page_idx, dpi = self.dpi, "rendering page");
        let image = Arc::new(self.source.render_page(page_idx, self.dpi)?);
        *cached = Some(Arc::clone(&image));
        Ok(image)
    }

    pub fn crop(&self, page_idx: usize, bbox: &BBox) -> Result<DynamicImage> {
        let page = self.render(page_idx)?;
        let rect = PixelRect::from_bbox(bbox, self.scale()).clamp_to(page.width(), page.height());
        if rect.width == 0 || rect.height == 0 {
            anyhow::bail!(
                "bbox {:?} on page {page_idx} maps to an empty pixel region",
                <[f64; 4]>::from(*bbox)
            );
        }
        Ok(page.crop_imm(rect.x, rect.y, rect.width, rect.height))
    }

    pub fn cached_pages(&self) -> usize {
        let Ok(pages) = self.pages.lock() else {
            return 0;
        };
        pages
            .values()
            .filter(|slot| slot.lock().map(|image| image.is_some()).unwrap_or(false))
            .count()
    }

    /// Drops every cached render and releases the page source.
    pub fn close(self) -> Result<()> {
        if let Ok(mut pages) = self.pages.lock() {
            pages.clear();
        }
        self.source.close()
    }
}

impl std::fmt::Debug for RegionCropper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionCropper")
            .field("dpi", &self.dpi)
            .field("page_count", &self.page_count)
            .field("cached_pages", &self.cached_pages())
            .finish()
    }
}
