//! Minimum-Distance Ranker

use super::candidate::CandidateRow;

/// Order candidate rows by ascending distance ranking
///
/// The sort is stable, so rows with equal ranking keep the order in which
/// they were enumerated and repeated passes over the same input make the same
/// choices. The returned iterator is consumed once.
pub fn sort_by_minimum_distance(
    rows: impl IntoIterator<Item = CandidateRow>,
) -> impl Iterator<Item = CandidateRow> {
    let mut rows: Vec<CandidateRow> = rows.into_iter().collect();
    rows.sort_by_key(|row| row.ranking);
    rows.into_iter()
}
