use serde::{Deserialize, Serialize};

/// Voting activity within a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub total_polls: u64,
    pub active_polls: u64,
    pub total_votes: u64,
    pub approved_members: u64,
    /// Votes cast per approved member, as a percentage rounded to 2 decimal
    /// places. Not normalised by the number of polls, so it can exceed 100.
    /// Creators count as members even though they cannot vote on their polls.
    pub participation_rate: f64,
}

impl GroupStats {
    pub fn new(total_polls: u64, active_polls: u64, total_votes: u64, approved_members: u64) -> Self {
        let participation_rate = if approved_members == 0 {
            0.0
        } else {
            let raw = total_votes as f64 / approved_members as f64 * 100.0;
            (raw * 100.0).round() / 100.0
        };
        Self {
            total_polls,
            active_polls,
            total_votes,
            approved_members,
            participation_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participation_rate() {
        assert_eq!(GroupStats::new(0, 0, 0, 5).participation_rate, 0.0);
        assert_eq!(GroupStats::new(3, 1, 0, 0).participation_rate, 0.0);
        // 4 votes from 3 members, whatever the number of polls.
        assert_eq!(GroupStats::new(2, 1, 4, 3).participation_rate, 133.33);
        assert_eq!(GroupStats::new(9, 1, 4, 3).participation_rate, 133.33);
        assert_eq!(GroupStats::new(1, 1, 1, 3).participation_rate, 33.33);
    }
}
