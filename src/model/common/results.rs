use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Aggregated results of a poll. Always derived from the stored votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSnapshot {
    pub total_votes: u64,
    /// One entry per option, in declaration order.
    pub per_option: Vec<OptionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub text: String,
    pub votes: u64,
    /// Share of the total, in percent, rounded to 2 decimal places.
    pub percentage: f64,
}

impl ResultSnapshot {
    /// Tally vote counts (keyed by 1-based option index) against the option list.
    ///
    /// Counts for indexes outside the option list are ignored, so the total
    /// is always the sum of the per-option counts.
    pub fn tally<S: AsRef<str>>(options: &[S], counts: &HashMap<u32, u64>) -> Self {
        let votes: Vec<u64> = (1..)
            .zip(options)
            .map(|(index, _)| counts.get(&index).copied().unwrap_or(0))
            .collect();
        let total_votes: u64 = votes.iter().sum();
        let per_option = options
            .iter()
            .zip(votes)
            .map(|(text, votes)| OptionResult {
                text: text.as_ref().to_string(),
                votes,
                percentage: percentage(votes, total_votes),
            })
            .collect();
        Self {
            total_votes,
            per_option,
        }
    }
}

fn percentage(votes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = votes as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}
