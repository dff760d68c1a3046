use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::core::geometry::BBox;

/// Name used for a document's cache and output directories: the file stem.
pub fn document_name(pdf_path: &Path) -> String {
    pdf_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

/// One tool's claim about one table on one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableDetection {
    #[serde(rename = "table_body", default)]
    pub body: String,
    #[serde(rename = "table_caption", default)]
    pub caption: String,
    #[serde(rename = "table_footnote", default)]
    pub footnote: String,
    #[serde(rename = "page_idx", with = "page_idx")]
    pub page_index: usize,
    pub bbox: BBox,
}

impl TableDetection {
    pub fn new(body: impl Into<String>, page_index: usize, bbox: BBox) -> Self {
        Self {
            body: body.into(),
            caption: String::new(),
            footnote: String::new(),
            page_index,
            bbox,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = caption.into();
        self
    }

    pub fn with_footnote(mut self, footnote: impl Into<String>) -> Self {
        self.footnote = footnote.into();
        self
    }

    /// Drops the bbox, which only matters for matching and cropping.
    pub fn into_content(self) -> TableContent {
        TableContent {
            table_body: self.body,
            table_caption: self.caption,
            table_footnote: self.footnote,
            page_idx: self.page_index.to_string(),
        }
    }
}

/// A detection as the oracle sees it: everything but the bbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableContent {
    pub table_body: String,
    pub table_caption: String,
    pub table_footnote: String,
    pub page_idx: String,
}

/// The detections believed to describe one physical table, one slot per tool.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedGroup {
    pub slots: Vec<Option<TableDetection>>,
}

impl MatchedGroup {
    pub fn new(n_tools: usize) -> Self {
        Self {
            slots: vec![None; n_tools],
        }
    }

    pub fn n_tools(&self) -> usize {
        self.slots.len()
    }

    pub fn votes(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// First present detection in slot order.
    pub fn first_present(&self) -> Option<&TableDetection> {
        self.slots.iter().flatten().next()
    }

    pub fn tool_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|_| idx))
            .collect()
    }
}

/// Final record for one table, as persisted to `tables/<i>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FusedTableRecord {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub table_body: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub table_caption: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub table_footnote: String,
    #[serde(default, deserialize_with = "page_idx::deserialize_string")]
    pub page_idx: String,
}

impl From<TableContent> for FusedTableRecord {
    fn from(content: TableContent) -> Self {
        Self {
            table_body: content.table_body,
            table_caption: content.table_caption,
            table_footnote: content.table_footnote,
            page_idx: content.page_idx,
        }
    }
}

/// Oracles write `null` for a caption or footnote they did not find.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Result of fusing one group. `Empty` persists as `{}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FusionOutcome {
    Fused(FusedTableRecord),
    Empty,
}

impl FusionOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, FusionOutcome::Empty)
    }

    pub fn record(&self) -> Option<&FusedTableRecord> {
        match self {
            FusionOutcome::Fused(record) => Some(record),
            FusionOutcome::Empty => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FusionOutcome::Fused(record) => {
                serde_json::to_value(record).unwrap_or_else(|_| serde_json::json!({}))
            }
            FusionOutcome::Empty => serde_json::json!({}),
        }
    }
}

/// The oracle's raw answer next to what was made of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionResponse {
    pub rationale: String,
    pub outcome: FusionOutcome,
}

/// Extractors disagree on whether `page_idx` is a string or a number; accept both.
pub(crate) mod page_idx {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &usize, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
        deserializer.deserialize_any(PageIdxVisitor)
    }

    pub fn deserialize_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<String, D::Error> {
        deserializer.deserialize_any(PageIdxStringVisitor)
    }

    struct PageIdxVisitor;

    impl<'de> Visitor<'de> for PageIdxVisitor {
        type Value = usize;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a page index as integer or numeric string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<usize, E> {
            usize::try_from(v).map_err(E::custom)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<usize, E> {
            usize::try_from(v).map_err(E::custom)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<usize, E> {
            if v >= 0.0 && v.fract() == 0.0 {
                Ok(v as usize)
            } else {
                Err(E::custom(format!("invalid page index {v}")))
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<usize, E> {
            v.trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid page index {v:?}")))
        }
    }

    struct PageIdxStringVisitor;

    impl<'de> Visitor<'de> for PageIdxStringVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a page index as string or integer")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_unit<E: de::Error>(self) -> Result<String, E> {
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detection_accepts_string_or_numeric_page_idx() {
        let from_str: TableDetection = serde_json::from_str(
            r#"{"table_body":"<table></table>","table_caption":"","table_footnote":"","page_idx":"3","bbox":[1,2,3,4]}"#,
        )
        .unwrap();
        let from_int: TableDetection =
            serde_json::from_str(r#"{"table_body":"<table></table>","page_idx":3,"bbox":[1,2,3,4]}"#)
                .unwrap();
        assert_eq!(from_str, from_int);
        assert_eq!(from_str.page_index, 3);
    }

    #[test]
    fn detection_writes_page_idx_as_string() {
        let det = TableDetection::new("<table></table>", 7, BBox::new(0.0, 0.0, 1.0, 1.0));
        let value = serde_json::to_value(&det).unwrap();
        assert_eq!(value["page_idx"], serde_json::json!("7"));
        assert_eq!(value["bbox"], serde_json::json!([0.0, 0.0, 1.0, 1.0]));
    }

    #[test]
    fn content_has_no_bbox() {
        let det = TableDetection::new("<table></table>", 2, BBox::new(0.0, 0.0, 1.0, 1.0))
            .with_caption("Table 1");
        let value = serde_json::to_value(det.into_content()).unwrap();
        assert!(value.get("bbox").is_none());
        assert_eq!(value["page_idx"], serde_json::json!("2"));
        assert_eq!(value["table_caption"], serde_json::json!("Table 1"));
    }

    #[test]
    fn group_reports_votes_and_first_present() {
        let mut group = MatchedGroup::new(3);
        group.slots[1] = Some(TableDetection::new("b", 0, BBox::new(0.0, 0.0, 1.0, 1.0)));
        group.slots[2] = Some(TableDetection::new("c", 0, BBox::new(0.0, 0.0, 1.0, 1.0)));
        assert_eq!(group.votes(), 2);
        assert_eq!(group.tool_indices(), vec![1, 2]);
        assert_eq!(group.first_present().map(|d| d.body.as_str()), Some("b"));
    }

    #[test]
    fn document_name_is_file_stem() {
        assert_eq!(document_name(Path::new("/in/DeepSeek_onlyTable.pdf")), "DeepSeek_onlyTable");
    }

    #[test]
    fn empty_outcome_serializes_to_empty_object() {
        assert_eq!(FusionOutcome::Empty.to_json().to_string(), "{}");
    }
}
