use anyhow::{Context, Result};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::render::pdf_reader::PdfReader;
use crate::render::PageSource;

/// Renders pages with poppler's `pdftoppm` into a scratch directory.
#[derive(Debug, Clone)]
pub struct PageRenderer {
    reader: PdfReader,
    out_dir: PathBuf,
}

impl PageRenderer {
    pub fn new(pdf_path: PathBuf, out_dir: PathBuf) -> Result<Self> {
        let reader = PdfReader::new(pdf_path)?;
        Ok(Self { reader, out_dir })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn render_to_file(&self, page_idx: usize, dpi: u32) -> Result<PathBuf> {
        fs::create_dir_all(&self.out_dir)?;

        // pdftoppm uses 1-based page indices
        let page_number = page_idx + 1;
        let prefix = self.out_dir.join(format!("page_{:03}", page_number));
        let prefix_str = prefix
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("non-UTF8 output path not supported"))?;

        let status = Command::new("pdftoppm")
            .arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(page_number.to_string())
            .arg("-l")
            .arg(page_number.to_string())
            .arg(self.reader.path())
            .arg(prefix_str)
            .status()
            .with_context(|| "failed to invoke pdftoppm; is poppler-utils installed?")?;

        if !status.success() {
            anyhow::bail!("pdftoppm failed with status: {status}");
        }

        // -singlefile writes `<prefix>.png` without a page suffix
        let image_path = prefix.with_extension("png");
        if !image_path.exists() {
            anyhow::bail!(
                "expected rendered image not found: {}",
                image_path.display()
            );
        }
        Ok(image_path)
    }
}

impl PageSource for PageRenderer {
    fn page_count(&self) -> Result<usize> {
        self.reader.page_count()
    }

    fn render_page(&self, page_idx: usize, dpi: u32) -> Result<DynamicImage> {
        let path = self.render_to_file(page_idx, dpi)?;
        let image = image::open(&path)
            .with_context(|| format!("failed to decode rendered page {}", path.display()))?;
        Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
    }

    fn close(&self) -> Result<()> {
        if self.out_dir.exists() {
            fs::remove_dir_all(&self.out_dir).with_context(|| {
                format!("failed to remove render directory {}", self.out_dir.display())
            })?;
        }
        Ok(())
    }
}
