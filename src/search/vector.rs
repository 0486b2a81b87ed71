use crate::embedding::cosine_similarity;
use crate::models::EmbeddingRecord;
use crate::search::SearchHit;

/// Ranks records by cosine similarity to `query_vec`, best first. Records
/// without a vector, or with a vector of another dimension, are skipped.
pub fn rank_by_similarity(records: Vec<EmbeddingRecord>, query_vec: &[f32], top_k: usize) -> Vec<SearchHit> {
    let mut hits = records
        .into_iter()
        .filter_map(|record| {
            let vector = record.summary_embedding.as_deref()?;
            if vector.len() != query_vec.len() {
                return None;
            }
            let score = cosine_similarity(query_vec, vector);
            Some(SearchHit {
                record_id: record.id,
                file_name: record.file_name,
                summary: record.summary,
                score,
            })
        })
        .collect::<Vec<_>>();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Option<Vec<f32>>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: id.into(),
            project_id: "p1".into(),
            file_name: format!("{id}.rs"),
            source_code: String::new(),
            summary: format!("summary of {id}"),
            summary_embedding: vector,
            content_hash: String::new(),
            created_at: String::new(),
        }
    }

    #[test]
    fn closest_vector_ranks_first() {
        let records = vec![
            record("far", Some(vec![0.0, 1.0])),
            record("near", Some(vec![1.0, 0.1])),
            record("none", None),
            record("wrong_dim", Some(vec![1.0, 0.0, 0.0])),
        ];
        let hits = rank_by_similarity(records, &[1.0, 0.0], 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.record_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn results_are_capped_at_top_k() {
        let records = (0..5).map(|i| record(&i.to_string(), Some(vec![1.0, i as f32]))).collect();
        assert_eq!(rank_by_similarity(records, &[1.0, 0.0], 2).len(), 2);
    }
}
