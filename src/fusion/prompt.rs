use crate::core::model::TableContent;

const CORRECTION_TEMPLATE: &str = r#"You are a text correction expert who reproduces tables from images exactly.
You will receive an image of a table and an HTML representation of that table.
Correct every error in the HTML so it matches the image as faithfully as possible. The image may be rotated; the HTML must not be. Emit the full table, including the opening and closing table tags.

Guidelines:
- Reproduce the values in the image exactly and remove stray characters that are not in the image.
- Column headers must line up with the values underneath them.
- Fence inline math with <math>, block math with <math display="block">.
- Replace images inside cells with a description such as "Image: [description]".
- Only use the tags table, tr, th, td, br, span, sup, sub, i, b and math, and only the attributes display, style, colspan and rowspan when needed.

Instructions:
1. Examine the image.
2. Read the HTML representation.
3. Write "comparison:" followed by a short comparison of the two, paying attention to headers and column values.
4. If the HTML is already correct, or the image cannot be read, write "No corrections needed." Otherwise write the corrected HTML in a fenced ```html block. Output nothing else after the comparison.

Example output:
comparison: The image shows a table with 2 rows and 3 columns. The html matches the image and the headers match their columns.
```html
No corrections needed.
```

Input:
```html
{table_body}
```
"#;

const FUSION_TEMPLATE: &str = r#"You are an expert at combining table extraction results from PDF documents.
{count} candidate results follow, one per extraction tool, each a JSON object with the keys table_body, table_caption, table_footnote and page_idx. A candidate is null when that tool did not find the table. Any candidate may contain errors such as a missing caption, wrongly merged rows or columns, or misaligned cells.

{candidates}

Your task:
1. For each candidate, check whether the rows and columns in table_body are structured correctly, and whether table_caption and table_footnote are relevant and complete.
2. Choose the best candidate or merge across candidates. You may keep the body of one and the caption of another. Fix merged cells and alignment errors when it is safe to do so.
3. Answer in two parts:
   - First write "comparison:" on a new line, followed by a short assessment of the candidates and what you decided to do.
   - Then write "Final Answer:" followed by a line break, and after it a single JSON object with the keys "table_body", "table_caption", "table_footnote" and "page_idx". If no usable table can be produced, write the empty object {} instead.
"#;

const FUSION_VISION_TEMPLATE: &str = r#"You are a table correction and fusion expert.
You will receive one screenshot of a table and {count} candidate extraction results, one per tool, each a JSON object with the keys table_body, table_caption, table_footnote and page_idx. A candidate is null when that tool did not find the table.

{candidates}

Deliver one clean HTML table that matches the screenshot as closely as possible.

Guidelines:
- The screenshot is the final authority for every value, row and column. After choosing or merging candidates, correct the result until it matches the screenshot.
- The screenshot shows only the table body. Select or merge table_caption and table_footnote from the candidates.
- Fix stray characters, split or merged cells and misaligned columns.
- Fence inline math with <math>, block math with <math display="block">. Replace images inside cells with "Image: [short description]".
- Only use the tags table, tr, th, td, br, span, sup, sub, i, b and math, and only the attributes style, display, colspan and rowspan when needed.
- table_body must start with <table> and end with </table>, and must not be rotated even if the screenshot is.

Answer in two parts:
- First write "comparison:" on a new line, followed by the problems found in the candidates and what you decided to do.
- Then write "Final Answer:" followed by a line break, and after it a single JSON object with the keys "table_body", "table_caption", "table_footnote" and "page_idx". If no candidate yields a usable table, write the empty object {} instead.
"#;

/// Prompt asking the oracle to correct one representation against its image.
pub fn correction_prompt(table_body: &str) -> String {
    CORRECTION_TEMPLATE.replace("{table_body}", table_body)
}

/// Prompt asking the oracle to fuse one candidate per tool, with or without a screenshot.
///
/// `tool_names` and `candidates` are parallel; each becomes a `<tool>_result:` line.
pub fn fusion_prompt(
    tool_names: &[String],
    candidates: &[Option<TableContent>],
    with_image: bool,
) -> String {
    let template = if with_image {
        FUSION_VISION_TEMPLATE
    } else {
        FUSION_TEMPLATE
    };
    template
        .replace("{count}", &candidates.len().to_string())
        .replace("{candidates}", &candidate_lines(tool_names, candidates))
}

fn candidate_lines(tool_names: &[String], candidates: &[Option<TableContent>]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(idx, candidate)| {
            let name = tool_names
                .get(idx)
                .map(String::as_str)
                .unwrap_or("tool");
            let rendered = candidate
                .as_ref()
                .and_then(|content| serde_json::to_string(content).ok())
                .unwrap_or_else(|| "null".to_string());
            format!("{name}_result: {rendered}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
