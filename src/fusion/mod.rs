pub mod literal;
pub mod parse;
pub mod prompt;

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::core::error::TableFuseError;
use crate::core::model::{FusionResponse, MatchedGroup, TableDetection};
use crate::oracle::CorrectionOracle;
use crate::render::RegionCropper;

/// How a matched group is turned into one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FusionMode {
    /// Text-only fusion of every tool's candidate.
    #[default]
    Combined,
    /// Fusion of every tool's candidate plus a crop of the table.
    CombinedVision,
    /// One tool's tables, each corrected against its crop.
    Single,
}

impl FusionMode {
    pub fn needs_image(self) -> bool {
        matches!(self, FusionMode::CombinedVision | FusionMode::Single)
    }
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FusionMode::Combined => "combined",
            FusionMode::CombinedVision => "combined-vision",
            FusionMode::Single => "single",
        };
        f.write_str(name)
    }
}

pub trait FusionEngine: Send + Sync {
    fn fuse(&self, group: MatchedGroup) -> Result<FusionResponse>;
}

/// Fuses groups by asking a `CorrectionOracle`.
///
/// The page and bbox of the first present detection locate the crop; bboxes
/// are stripped before anything reaches the prompt.
pub struct OracleFusionEngine<'a> {
    oracle: &'a dyn CorrectionOracle,
    cropper: Option<&'a RegionCropper>,
    tool_names: Vec<String>,
    mode: FusionMode,
}

impl<'a> OracleFusionEngine<'a> {
    pub fn new(oracle: &'a dyn CorrectionOracle, tool_names: Vec<String>, mode: FusionMode) -> Self {
        Self {
            oracle,
            cropper: None,
            tool_names,
            mode,
        }
    }

    pub fn with_cropper(mut self, cropper: &'a RegionCropper) -> Self {
        self.cropper = Some(cropper);
        self
    }

    pub fn mode(&self) -> FusionMode {
        self.mode
    }

    fn table_images(&self, anchor: &TableDetection) -> Result<Vec<image::DynamicImage>> {
        if !self.mode.needs_image() {
            return Ok(Vec::new());
        }
        let cropper = self.cropper.ok_or_else(|| {
            TableFuseError::Config(format!("fusion mode `{}` needs a page renderer", self.mode))
        })?;
        let crop = cropper
            .crop(anchor.page_index, &anchor.bbox)
            .with_context(|| format!("Failed to crop table on page {}", anchor.page_index))?;
        Ok(vec![crop])
    }
}

impl FusionEngine for OracleFusionEngine<'_> {
    fn fuse(&self, group: MatchedGroup) -> Result<FusionResponse> {
        let anchor = group
            .first_present()
            .cloned()
            .ok_or_else(|| anyhow!("matched group has no detections"))?;
        let images = self.table_images(&anchor)?;
        debug!(
            mode = %self.mode,
            page = anchor.page_index,
            votes = group.votes(),
            "fusing table group"
        );

        let (rationale, outcome) = match self.mode {
            FusionMode::Single => {
                let content = anchor.into_content();
                let prompt = prompt::correction_prompt(&content.table_body);
                let response = self.oracle.respond(&prompt, &images)?;
                let outcome = parse::parse_correction_response(&response, content);
                (response, outcome)
            }
            FusionMode::Combined | FusionMode::CombinedVision => {
                let candidates: Vec<_> = group
                    .slots
                    .into_iter()
                    .map(|slot| slot.map(TableDetection::into_content))
                    .collect();
                let prompt = prompt::fusion_prompt(&self.tool_names, &candidates, !images.is_empty());
                let response = self.oracle.respond(&prompt, &images)?;
                let outcome = parse::parse_fusion_response(&response);
                (response, outcome)
            }
        };

        Ok(FusionResponse { rationale, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::BBox;
    use crate::core::model::FusionOutcome;
    use crate::oracle::FnOracle;
    use crate::render::PageSource;
    use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct GreyPages;

    impl PageSource for GreyPages {
        fn page_count(&self) -> Result<usize> {
            Ok(3)
        }

        fn render_page(&self, _page_idx: usize, _dpi: u32) -> Result<DynamicImage> {
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(612, 792, Rgb([128, 128, 128]))))
        }
    }

    fn names() -> Vec<String> {
        vec!["marker".to_string(), "mineru".to_string(), "docling".to_string()]
    }

    fn group() -> MatchedGroup {
        let mut group = MatchedGroup::new(3);
        group.slots[1] = Some(
            TableDetection::new("<table>m</table>", 1, BBox::new(10.0, 20.0, 110.0, 70.0))
                .with_caption("Table 3"),
        );
        group.slots[2] = Some(TableDetection::new("<table>d</table>", 1, BBox::new(12.0, 20.0, 110.0, 72.0)));
        group
    }

    #[test]
    fn combined_prompt_has_no_bbox_and_no_image() {
        let seen = Mutex::new(Vec::new());
        let oracle = FnOracle::new(|prompt: &str, images: &[DynamicImage]| {
            seen.lock().unwrap().push((prompt.to_string(), images.len()));
            Ok("comparison: mineru has the caption.\nFinal Answer:\n{\"table_body\": \"<table>m</table>\", \"table_caption\": \"Table 3\", \"table_footnote\": \"\", \"page_idx\": \"1\"}".to_string())
        });
        let engine = OracleFusionEngine::new(&oracle, names(), FusionMode::Combined);
        let response = engine.fuse(group()).unwrap();

        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].0.contains("bbox"));
        assert!(calls[0].0.contains("marker_result: null"));
        assert_eq!(calls[0].1, 0);
        assert_eq!(
            response.outcome.record().map(|r| r.table_caption.as_str()),
            Some("Table 3")
        );
        assert!(response.rationale.starts_with("comparison:"));
    }

    #[test]
    fn vision_mode_sends_crop_of_first_present_detection() {
        let sizes = Mutex::new(Vec::new());
        let oracle = FnOracle::new(|_: &str, images: &[DynamicImage]| {
            sizes
                .lock()
                .unwrap()
                .extend(images.iter().map(|img| img.dimensions()));
            Ok("comparison: none usable\nFinal Answer:\n{}".to_string())
        });
        let cropper = RegionCropper::new(Box::new(GreyPages), 72).unwrap();
        let engine =
            OracleFusionEngine::new(&oracle, names(), FusionMode::CombinedVision).with_cropper(&cropper);

        let response = engine.fuse(group()).unwrap();
        assert_eq!(response.outcome, FusionOutcome::Empty);
        // slot 1 is the first present: [10, 20, 110, 70] at 72 dpi
        assert_eq!(*sizes.lock().unwrap(), vec![(100, 50)]);
    }

    #[test]
    fn vision_mode_without_cropper_is_a_config_error() {
        let oracle = FnOracle::new(|_: &str, _: &[DynamicImage]| Ok(String::new()));
        let engine = OracleFusionEngine::new(&oracle, names(), FusionMode::CombinedVision);
        let err = engine.fuse(group()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TableFuseError>(),
            Some(TableFuseError::Config(_))
        ));
    }

    #[test]
    fn single_mode_keeps_body_when_no_corrections() {
        let oracle = FnOracle::new(|prompt: &str, images: &[DynamicImage]| {
            assert!(prompt.contains("<table>only</table>"));
            assert_eq!(images.len(), 1);
            Ok("comparison: matches.\n```html\nNo corrections needed.\n```".to_string())
        });
        let cropper = RegionCropper::new(Box::new(GreyPages), 72).unwrap();
        let engine = OracleFusionEngine::new(&oracle, vec!["marker".to_string()], FusionMode::Single)
            .with_cropper(&cropper);

        let mut group = MatchedGroup::new(1);
        group.slots[0] = Some(TableDetection::new("<table>only</table>", 0, BBox::new(0.0, 0.0, 50.0, 50.0)));
        let response = engine.fuse(group).unwrap();
        assert_eq!(
            response.outcome.record().map(|r| r.table_body.as_str()),
            Some("<table>only</table>")
        );
    }

    #[test]
    fn oracle_errors_propagate() {
        let oracle = FnOracle::new(|_: &str, _: &[DynamicImage]| {
            Err(TableFuseError::Oracle {
                status: 503,
                message: "overloaded".to_string(),
            }
            .into())
        });
        let engine = OracleFusionEngine::new(&oracle, names(), FusionMode::Combined);
        let err = engine.fuse(group()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TableFuseError>(),
            Some(TableFuseError::Oracle { status: 503, .. })
        ));
    }

    #[test]
    fn mode_names_are_kebab_case() {
        assert_eq!(FusionMode::CombinedVision.to_string(), "combined-vision");
        let mode: FusionMode = serde_json::from_str("\"combined-vision\"").unwrap();
        assert_eq!(mode, FusionMode::CombinedVision);
    }
}
