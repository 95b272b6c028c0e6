//! Read-only frequency statistics over rotation history.

use crate::model::rotation::RotationState;
use std::collections::BTreeMap;

/// Completion count for one person.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonStat {
    pub name: String,
    pub count: usize,
    /// `count / total`, `0.0` when history is empty.
    pub share: f64,
    /// `share` as a rounded whole percentage.
    pub percentage: u32,
    /// `count / max_count`, `0.0` when nobody has a count.
    pub bar_scale: f64,
}

/// Ranking derived from one rotation snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statistics {
    /// Number of history entries.
    pub total: usize,
    /// Highest single count in `ranking`.
    pub max_count: usize,
    /// Descending by count, ties by ascending name.
    pub ranking: Vec<PersonStat>,
}

/// Counts completions for everyone in `people` or `history`.
///
/// People removed from the rotation still show up while history mentions
/// them; current people without any completion show up with zero.
pub fn compute_statistics(state: &RotationState) -> Statistics {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in state.history() {
        *counts.entry(entry.person.as_str()).or_insert(0) += 1;
    }
    for person in state.people() {
        counts.entry(person.as_str()).or_insert(0);
    }

    let total = state.history().len();
    let max_count = counts.values().copied().max().unwrap_or(0);

    let mut ranking = counts
        .into_iter()
        .map(|(name, count)| {
            let share = ratio(count, total);
            PersonStat {
                name: name.to_string(),
                count,
                share,
                percentage: (share * 100.0).round() as u32,
                bar_scale: ratio(count, max_count),
            }
        })
        .collect::<Vec<_>>();
    // BTreeMap already yields names ascending; a stable sort keeps that for ties.
    ranking.sort_by(|left, right| right.count.cmp(&left.count));

    Statistics {
        total,
        max_count,
        ranking,
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::compute_statistics;
    use crate::model::rotation::RotationState;

    #[test]
    fn empty_state_has_no_ranking() {
        let stats = compute_statistics(&RotationState::new());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.max_count, 0);
        assert!(stats.ranking.is_empty());
    }

    #[test]
    fn people_without_history_rank_alphabetically_at_zero() {
        let state = RotationState::from_parts(
            vec!["Cara".to_string(), "Anna".to_string(), "Ben".to_string()],
            0,
            Vec::new(),
        );

        let stats = compute_statistics(&state);
        let names = stats
            .ranking
            .iter()
            .map(|stat| stat.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Anna", "Ben", "Cara"]);
        assert!(stats
            .ranking
            .iter()
            .all(|stat| stat.count == 0 && stat.percentage == 0 && stat.bar_scale == 0.0));
    }
}
