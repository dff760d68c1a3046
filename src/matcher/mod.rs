//! Aligns per-tool table detections into groups and keeps the ones a strict
//! majority of tools agree on.
//!
//! Assignment is greedy first-fit in tool order, then detection order: a
//! detection joins the earliest group on the same page whose representative
//! box overlaps it with IoU at or above the threshold. The representative is
//! the box of whichever detection created the group and never moves. This is
//! order-sensitive and not an optimal assignment; downstream output depends on
//! that exact tie-break.

pub mod summary;

use tracing::info;

use crate::core::geometry::BBox;
use crate::core::model::{MatchedGroup, TableDetection};

pub use summary::MatchSummary;

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.70;

#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Kept groups sorted by `(page, top, left)` of their representative box.
    pub groups: Vec<MatchedGroup>,
    pub summary: MatchSummary,
}

/// Minimum number of tools that must agree for a group to survive.
pub fn majority(n_tools: usize) -> usize {
    n_tools / 2 + 1
}

pub fn match_tables(tool_tables: Vec<Vec<TableDetection>>, iou_threshold: f64) -> MatchResult {
    let n_tools = tool_tables.len();
    let raw_counts: Vec<usize> = tool_tables.iter().map(Vec::len).collect();

    let mut groups: Vec<MatchedGroup> = Vec::new();
    let mut reps: Vec<(usize, BBox)> = Vec::new();

    for (t_idx, tables) in tool_tables.into_iter().enumerate() {
        for det in tables {
            let assigned = reps.iter().position(|(page, bbox)| {
                *page == det.page_index && det.bbox.iou(bbox) >= iou_threshold
            });

            match assigned {
                Some(g_idx) => groups[g_idx].slots[t_idx] = Some(det),
                None => {
                    reps.push((det.page_index, det.bbox));
                    let mut group = MatchedGroup::new(n_tools);
                    group.slots[t_idx] = Some(det);
                    groups.push(group);
                }
            }
        }
    }

    let groups_formed = groups.len();
    let needed = majority(n_tools);
    let mut kept: Vec<(MatchedGroup, (usize, BBox))> = groups
        .into_iter()
        .zip(reps)
        .filter(|(group, _)| group.votes() >= needed)
        .collect();

    kept.sort_by(|(_, (pa, a)), (_, (pb, b))| {
        pa.cmp(pb)
            .then(a.top().total_cmp(&b.top()))
            .then(a.left().total_cmp(&b.left()))
    });

    let summary = MatchSummary {
        raw_counts,
        groups_formed,
        groups_kept: kept.len(),
    };
    info!(
        tools = n_tools,
        raw_total = summary.raw_total(),
        groups_formed,
        groups_kept = summary.groups_kept,
        "table matching: {summary}"
    );

    MatchResult {
        groups: kept.into_iter().map(|(group, _)| group).collect(),
        summary,
    }
}

/// Wraps every detection of one tool in its own single-slot group, skipping
/// IoU grouping entirely so overlapping detections all survive. Groups are
/// sorted by `(page, top, left)` like matched ones.
pub fn one_group_per_detection(tables: Vec<TableDetection>) -> MatchResult {
    let mut tables = tables;
    tables.sort_by(|a, b| {
        a.page_index
            .cmp(&b.page_index)
            .then(a.bbox.top().total_cmp(&b.bbox.top()))
            .then(a.bbox.left().total_cmp(&b.bbox.left()))
    });

    let count = tables.len();
    let summary = MatchSummary {
        raw_counts: vec![count],
        groups_formed: count,
        groups_kept: count,
    };
    info!(tools = 1, raw_total = count, "table matching skipped: {summary}");

    let groups = tables
        .into_iter()
        .map(|det| {
            let mut group = MatchedGroup::new(1);
            group.slots[0] = Some(det);
            group
        })
        .collect();
    MatchResult { groups, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn det(body: &str, page: usize, bbox: [f64; 4]) -> TableDetection {
        TableDetection::new(body, page, BBox::from(bbox))
    }

    fn bodies(group: &MatchedGroup) -> Vec<Option<&str>> {
        group
            .slots
            .iter()
            .map(|slot| slot.as_ref().map(|d| d.body.as_str()))
            .collect()
    }

    #[test]
    fn majority_threshold() {
        assert_eq!(majority(1), 1);
        assert_eq!(majority(2), 2);
        assert_eq!(majority(3), 2);
        assert_eq!(majority(4), 3);
    }

    #[test]
    fn three_tools_keep_two_votes_and_drop_one() {
        let tools = vec![
            vec![det("a1", 0, [0.0, 0.0, 100.0, 50.0]), det("a2", 0, [0.0, 200.0, 100.0, 260.0])],
            vec![det("b1", 0, [2.0, 1.0, 101.0, 51.0])],
            vec![],
        ];
        let result = match_tables(tools, DEFAULT_IOU_THRESHOLD);
        assert_eq!(result.groups.len(), 1);
        assert_eq!(bodies(&result.groups[0]), vec![Some("a1"), Some("b1"), None]);
        assert_eq!(result.summary.raw_counts, vec![2, 1, 0]);
        assert_eq!(result.summary.groups_formed, 2);
        assert_eq!(result.summary.groups_kept, 1);
    }

    #[test]
    fn four_tools_need_three_votes() {
        let bbox = [10.0, 10.0, 200.0, 100.0];
        let two_votes = vec![vec![det("a", 0, bbox)], vec![det("b", 0, bbox)], vec![], vec![]];
        assert!(match_tables(two_votes, DEFAULT_IOU_THRESHOLD).groups.is_empty());

        let three_votes = vec![
            vec![det("a", 0, bbox)],
            vec![det("b", 0, bbox)],
            vec![det("c", 0, bbox)],
            vec![],
        ];
        let result = match_tables(three_votes, DEFAULT_IOU_THRESHOLD);
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.groups[0].votes(), 3);
    }

    #[test]
    fn single_tool_keeps_every_detection() {
        let tools = vec![vec![
            det("x", 1, [0.0, 0.0, 10.0, 10.0]),
            det("y", 0, [0.0, 0.0, 10.0, 10.0]),
        ]];
        let result = match_tables(tools, DEFAULT_IOU_THRESHOLD);
        assert_eq!(result.groups.len(), 2);
        assert_eq!(bodies(&result.groups[0]), vec![Some("y")]);
        assert_eq!(bodies(&result.groups[1]), vec![Some("x")]);
    }

    #[test]
    fn different_pages_never_merge() {
        let bbox = [10.0, 10.0, 200.0, 100.0];
        let tools = vec![
            vec![det("a", 0, bbox)],
            vec![det("b", 1, bbox)],
            vec![det("c", 2, bbox)],
        ];
        let result = match_tables(tools, DEFAULT_IOU_THRESHOLD);
        assert!(result.groups.is_empty());
        assert_eq!(result.summary.groups_formed, 3);
    }

    #[test]
    fn sorts_by_page_then_top_then_left() {
        let tools = vec![
            vec![
                det("p2t5", 2, [0.0, 5.0, 50.0, 40.0]),
                det("p1t10", 1, [0.0, 10.0, 50.0, 40.0]),
                det("p1t3", 1, [0.0, 3.0, 50.0, 9.0]),
            ],
            vec![
                det("p2t5", 2, [0.0, 5.0, 50.0, 40.0]),
                det("p1t10", 1, [0.0, 10.0, 50.0, 40.0]),
                det("p1t3", 1, [0.0, 3.0, 50.0, 9.0]),
            ],
        ];
        let result = match_tables(tools, DEFAULT_IOU_THRESHOLD);
        let order: Vec<&str> = result
            .groups
            .iter()
            .map(|g| g.first_present().map(|d| d.body.as_str()).unwrap_or_default())
            .collect();
        assert_eq!(order, vec!["p1t3", "p1t10", "p2t5"]);
    }

    #[test]
    fn same_top_orders_by_left() {
        let tools = vec![vec![
            det("right", 0, [300.0, 10.0, 400.0, 60.0]),
            det("left", 0, [0.0, 10.0, 100.0, 60.0]),
        ]];
        let result = match_tables(tools, DEFAULT_IOU_THRESHOLD);
        assert_eq!(bodies(&result.groups[0]), vec![Some("left")]);
        assert_eq!(bodies(&result.groups[1]), vec![Some("right")]);
    }

    #[test]
    fn first_fit_assigns_to_earliest_group() {
        // a1/a2 overlap at IoU 0.667, so they form two groups. b overlaps a1 at 0.739
        // and a2 at 0.905: the earlier group wins even though a2 is the better fit.
        let tools = vec![
            vec![
                det("a1", 0, [0.0, 0.0, 100.0, 100.0]),
                det("a2", 0, [20.0, 0.0, 120.0, 100.0]),
            ],
            vec![det("b", 0, [15.0, 0.0, 115.0, 100.0])],
        ];
        let result = match_tables(tools, DEFAULT_IOU_THRESHOLD);
        assert_eq!(result.summary.groups_formed, 2);
        assert_eq!(result.groups.len(), 1);
        assert_eq!(bodies(&result.groups[0]), vec![Some("a1"), Some("b")]);
    }

    #[test]
    fn later_detection_from_same_tool_overwrites_slot() {
        let tools = vec![
            vec![
                det("first", 0, [0.0, 0.0, 100.0, 100.0]),
                det("second", 0, [1.0, 1.0, 100.0, 100.0]),
            ],
            vec![det("b", 0, [0.0, 0.0, 100.0, 100.0])],
        ];
        let result = match_tables(tools, DEFAULT_IOU_THRESHOLD);
        assert_eq!(result.groups.len(), 1);
        assert_eq!(bodies(&result.groups[0]), vec![Some("second"), Some("b")]);
    }

    #[test]
    fn threshold_is_compared_at_full_precision() {
        // IoU is 0.69999999, just under the default threshold
        let tools = vec![
            vec![det("a", 0, [0.0, 0.0, 100.0, 100.0])],
            vec![det("b", 0, [0.0, 0.0, 69.999999, 100.0])],
        ];
        let result = match_tables(tools, DEFAULT_IOU_THRESHOLD);
        assert_eq!(result.summary.groups_formed, 2);
        assert!(result.groups.is_empty());

        let exact = vec![
            vec![det("a", 0, [0.0, 0.0, 100.0, 100.0])],
            vec![det("b", 0, [0.0, 0.0, 70.0, 100.0])],
        ];
        assert_eq!(match_tables(exact, DEFAULT_IOU_THRESHOLD).groups.len(), 1);
    }

    #[test]
    fn overlapping_detections_get_their_own_groups() {
        let result = one_group_per_detection(vec![
            det("late", 1, [0.0, 0.0, 100.0, 100.0]),
            det("outer", 0, [0.0, 10.0, 100.0, 100.0]),
            det("inner", 0, [0.0, 0.0, 100.0, 100.0]),
        ]);
        assert_eq!(result.groups.len(), 3);
        assert_eq!(bodies(&result.groups[0]), vec![Some("inner")]);
        assert_eq!(bodies(&result.groups[1]), vec![Some("outer")]);
        assert_eq!(bodies(&result.groups[2]), vec![Some("late")]);
        assert_eq!(result.summary.raw_counts, vec![3]);
        assert_eq!(result.summary.groups_formed, 3);
        assert_eq!(result.summary.groups_kept, 3);
    }

    #[test]
    fn matching_is_deterministic() {
        let build = || {
            vec![
                vec![det("a1", 0, [0.0, 0.0, 100.0, 50.0]), det("a2", 1, [0.0, 0.0, 100.0, 50.0])],
                vec![det("b1", 1, [1.0, 0.0, 100.0, 50.0]), det("b2", 0, [0.0, 1.0, 99.0, 50.0])],
                vec![det("c1", 0, [0.0, 0.0, 100.0, 52.0])],
            ]
        };
        let first = match_tables(build(), DEFAULT_IOU_THRESHOLD);
        let second = match_tables(build(), DEFAULT_IOU_THRESHOLD);
        assert_eq!(first.groups, second.groups);
        assert_eq!(first.summary, second.summary);
        assert_eq!(first.groups.len(), 2);
    }
}
