use serde::{Deserialize, Serialize};

use crate::{domain::Participant, protocol::VoteBoard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub lowest: i64,
    pub lowest_names: Vec<String>,
    pub highest: i64,
    pub highest_names: Vec<String>,
    /// Rounded to one decimal place.
    pub average: f64,
}

/// Summarizes the set votes of estimators, in participant order.
///
/// Votes held by observers or by ids without a participant are ignored.
pub fn summarize(participants: &[Participant], votes: &VoteBoard) -> Option<Summary> {
    let counted: Vec<(&str, i64)> = participants
        .iter()
        .filter(|participant| participant.is_estimator())
        .filter_map(|participant| {
            votes
                .get(&participant.id)
                .copied()
                .flatten()
                .map(|value| (participant.name.as_str(), value))
        })
        .collect();

    let lowest = counted.iter().map(|(_, value)| *value).min()?;
    let highest = counted.iter().map(|(_, value)| *value).max()?;
    let total: i128 = counted.iter().map(|(_, value)| i128::from(*value)).sum();
    let average = round_one_decimal(total as f64 / counted.len() as f64);

    let names_for = |target: i64| {
        counted
            .iter()
            .filter(|(_, value)| *value == target)
            .map(|(name, _)| name.to_string())
            .collect::<Vec<_>>()
    };

    Some(Summary {
        lowest,
        lowest_names: names_for(lowest),
        highest,
        highest_names: names_for(highest),
        average,
    })
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
#[path = "tests/summary_tests.rs"]
mod tests;
