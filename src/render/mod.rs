pub mod cropper;
pub mod pdf_reader;
pub mod renderer;

pub use cropper::{PixelRect, RegionCropper, DEFAULT_DPI};
pub use pdf_reader::PdfReader;
pub use renderer::PageRenderer;

use anyhow::Result;
use image::DynamicImage;

/// Anything that can rasterize pages of one document.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> Result<usize>;

    fn render_page(&self, page_idx: usize, dpi: u32) -> Result<DynamicImage>;

    /// Releases whatever the source holds open. Called once, by `RegionCropper::close`.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
