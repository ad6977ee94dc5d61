use std::collections::HashMap;

use crate::types::SearchSource;

/// Per-source weight used by the reciprocal-rank-weighted sum in
/// `weighted_rrf_fusion`.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub vector: f32,
    pub bm25: f32,
    pub graph: f32,
    pub rrf_k: usize,
}

/// One ranked list from a single source, already sorted best-first.
pub struct SourceRanking<'a> {
    pub source: SearchSource,
    pub ranked_ids: &'a [String],
}

/// Reciprocal-rank-weighted sum across up to three sources, followed by a
/// final min-max normalization so fused scores live in [0,1]. Ties in
/// source membership resolve by summing each source's weighted
/// contribution for ids that appear in more than one list.
pub fn weighted_rrf_fusion(
    rankings: &[SourceRanking],
    weights: FusionWeights,
    top_k: usize,
) -> Vec<(String, f32, Vec<SearchSource>)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut sources: HashMap<String, Vec<SearchSource>> = HashMap::new();

    for ranking in rankings {
        let weight = match ranking.source {
            SearchSource::Vector => weights.vector,
            SearchSource::Bm25 => weights.bm25,
            SearchSource::Graph | SearchSource::GraphVector => weights.graph,
            _ => 0.0,
        };
        for (rank, id) in ranking.ranked_ids.iter().enumerate() {
            let rrf = weight / (weights.rrf_k as f32 + rank as f32 + 1.0);
            *scores.entry(id.clone()).or_insert(0.0) += rrf;
            sources.entry(id.clone()).or_default().push(ranking.source);
        }
    }

    let mut merged: Vec<(String, f32, Vec<SearchSource>)> = scores
        .into_iter()
        .map(|(id, score)| {
            let src = sources.remove(&id).unwrap_or_default();
            (id, score, src)
        })
        .collect();

    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(top_k);

    if let Some(max_score) = merged.first().map(|(_, s, _)| *s) {
        if max_score > 0.0 {
            for item in &mut merged {
                item.1 = (item.1 / max_score).clamp(0.0, 1.0);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_in_multiple_sources_outrank_single_source_items() {
        let vector_ids = vec!["a".to_string(), "b".to_string()];
        let bm25_ids = vec!["b".to_string(), "c".to_string()];

        let weights = FusionWeights {
            vector: 0.5,
            bm25: 0.3,
            graph: 0.2,
            rrf_k: 60,
        };

        let fused = weighted_rrf_fusion(
            &[
                SourceRanking {
                    source: SearchSource::Vector,
                    ranked_ids: &vector_ids,
                },
                SourceRanking {
                    source: SearchSource::Bm25,
                    ranked_ids: &bm25_ids,
                },
            ],
            weights,
            10,
        );

        let b_pos = fused.iter().position(|(id, _, _)| id == "b").unwrap();
        assert_eq!(b_pos, 0, "item present in both sources should rank first");
    }

    #[test]
    fn fused_scores_stay_in_unit_interval() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let weights = FusionWeights {
            vector: 0.5,
            bm25: 0.3,
            graph: 0.2,
            rrf_k: 60,
        };
        let fused = weighted_rrf_fusion(
            &[SourceRanking {
                source: SearchSource::Vector,
                ranked_ids: &ids,
            }],
            weights,
            10,
        );
        for (_, score, _) in &fused {
            assert!(*score >= 0.0 && *score <= 1.0);
        }
    }
}
