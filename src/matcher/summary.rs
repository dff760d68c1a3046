use std::fmt;

use serde::Serialize;

/// Diagnostic counts from one matcher run. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchSummary {
    /// Raw detections per tool, in tool order.
    pub raw_counts: Vec<usize>,
    /// Groups formed before the majority vote.
    pub groups_formed: usize,
    /// Groups that survived the majority vote.
    pub groups_kept: usize,
}

impl MatchSummary {
    pub fn keep_rate(&self) -> f32 {
        if self.groups_formed == 0 {
            0.0
        } else {
            self.groups_kept as f32 / self.groups_formed as f32
        }
    }

    pub fn raw_total(&self) -> usize {
        self.raw_counts.iter().sum()
    }
}

impl fmt::Display for MatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self
            .raw_counts
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(
            f,
            "raw detections [{counts}], kept {}/{} groups ({:.1}%)",
            self.groups_kept,
            self.groups_formed,
            self.keep_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_rate_without_groups_is_zero() {
        let summary = MatchSummary::default();
        assert_eq!(summary.keep_rate(), 0.0);
    }

    #[test]
    fn displays_counts() {
        let summary = MatchSummary {
            raw_counts: vec![3, 4, 2],
            groups_formed: 4,
            groups_kept: 3,
        };
        assert_eq!(
            summary.to_string(),
            "raw detections [3,4,2], kept 3/4 groups (75.0%)"
        );
    }
}
