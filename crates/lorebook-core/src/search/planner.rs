//! Query planning: SINGLE/MULTI dispatch, ranking, and context formatting.

use super::types::{ChunkId, Match, QueryMetadata, QueryResult, Reference};
use crate::error::RagError;
use crate::kb::KnowledgeBase;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Citation heading label in the context block.
pub const CITATION_LABEL: &str = "引用";
/// Knowledge-base label in the context block.
pub const KB_LABEL: &str = "知识库";
/// Relevance label in the context block.
pub const RELEVANCE_LABEL: &str = "相关度";

/// Maximum characters kept in a reference excerpt.
pub const EXCERPT_MAX_CHARS: usize = 120;

/// A match annotated with its origin, before result assembly.
#[derive(Debug, Clone)]
pub(crate) struct RankedMatch {
    pub kb_name: String,
    pub chunk_id: ChunkId,
    pub content: String,
    pub score: f32,
}

/// Dispatches queries over one or many knowledge bases and assembles results.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetrievalPlanner {
    pub max_docs: usize,
    pub min_score: f32,
}

impl RetrievalPlanner {
    /// SINGLE mode: top-k over the active knowledge base, threshold applied.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NoRelevantContent`] when nothing reaches the
    /// threshold.
    pub fn search_single(
        &self,
        kb: &Arc<KnowledgeBase>,
        query: &[f32],
    ) -> Result<Vec<RankedMatch>, RagError> {
        let hits = kb.index.top_k(query, self.max_docs)?;
        let matches = self.collect_matches(kb, hits);

        debug!(kb = %kb.name, matches = matches.len(), "single-mode search complete");

        if matches.is_empty() {
            return Err(RagError::NoRelevantContent);
        }
        Ok(matches)
    }

    /// MULTI mode: parallel top-k over every knowledge base in the snapshot,
    /// then merge, rank, and truncate.
    ///
    /// A knowledge base whose search fails contributes an empty result and a
    /// warning; it never fails the whole query.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Cancelled`] when the token fires before the
    /// fan-out finishes, and [`RagError::NoRelevantContent`] when nothing
    /// reaches the threshold.
    pub async fn search_multi(
        &self,
        kbs: &[Arc<KnowledgeBase>],
        query: Arc<Vec<f32>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedMatch>, RagError> {
        let planner = *self;
        let handles: Vec<_> = kbs
            .iter()
            .map(|kb| {
                let kb = Arc::clone(kb);
                let query = Arc::clone(&query);
                tokio::task::spawn_blocking(move || -> Result<Vec<RankedMatch>, RagError> {
                    let hits = kb.index.top_k(&query, planner.max_docs)?;
                    Ok(planner.collect_matches(&kb, hits))
                })
            })
            .collect();

        let joined = tokio::select! {
            _ = cancel.cancelled() => return Err(RagError::Cancelled),
            joined = futures::future::join_all(handles) => joined,
        };

        let mut matches = Vec::new();
        for (kb, outcome) in kbs.iter().zip(joined) {
            match outcome {
                Ok(Ok(kb_matches)) => matches.extend(kb_matches),
                Ok(Err(err)) => {
                    warn!(kb = %kb.name, error = %err, "knowledge-base search failed, skipping");
                }
                Err(err) => {
                    warn!(kb = %kb.name, error = %err, "knowledge-base search panicked, skipping");
                }
            }
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.kb_name.cmp(&b.kb_name))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(self.max_docs);

        debug!(kbs = kbs.len(), matches = matches.len(), "multi-mode search complete");

        if matches.is_empty() {
            return Err(RagError::NoRelevantContent);
        }
        Ok(matches)
    }

    /// Builds the query result from ranked matches.
    pub fn assemble(
        &self,
        matches: Vec<RankedMatch>,
        kb_single: Option<String>,
        kb_multi: Vec<String>,
    ) -> QueryResult {
        let context = format_context(&matches);

        let references = matches
            .iter()
            .map(|m| Reference {
                id: m.chunk_id,
                score: m.score,
                kb: m.kb_name.clone(),
                excerpt: excerpt(&m.content),
            })
            .collect();

        let documents: Vec<Match> = matches
            .into_iter()
            .map(|m| Match {
                content: m.content,
                score: m.score,
                kb_name: m.kb_name,
            })
            .collect();

        QueryResult {
            context,
            metadata: QueryMetadata {
                match_count: documents.len(),
                kb_single,
                kb_multi,
                references,
            },
            documents,
        }
    }

    fn collect_matches(
        &self,
        kb: &Arc<KnowledgeBase>,
        hits: Vec<(ChunkId, f32)>,
    ) -> Vec<RankedMatch> {
        hits.into_iter()
            .filter(|(_, score)| *score >= self.min_score)
            .filter_map(|(id, score)| {
                kb.index.get(id).map(|chunk| RankedMatch {
                    kb_name: kb.name.clone(),
                    chunk_id: id,
                    content: chunk.content.clone(),
                    score,
                })
            })
            .collect()
    }
}

/// Formats the grounded context block handed to the LLM prompt.
///
/// The block shape is frozen so prompts stay stable: one citation block per
/// match, in match order, with a 1-based index, the knowledge-base name, and
/// the score as a percentage with one decimal.
fn format_context(matches: &[RankedMatch]) -> String {
    matches
        .iter()
        .enumerate()
        .map(|(i, m)| {
            format!(
                "\n{} {} ({}: {}, {}: {:.1}%):\n{}\n",
                CITATION_LABEL,
                i + 1,
                KB_LABEL,
                m.kb_name,
                RELEVANCE_LABEL,
                m.score * 100.0,
                m.content
            )
        })
        .collect()
}

/// Truncates content to [`EXCERPT_MAX_CHARS`] characters on a char boundary.
fn excerpt(content: &str) -> String {
    match content.char_indices().nth(EXCERPT_MAX_CHARS) {
        Some((byte, _)) => content[..byte].to_string(),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::KbOrigin;
    use crate::search::VectorIndex;
    use std::path::PathBuf;

    fn make_kb(name: &str, vectors: &[(&str, Vec<f32>)]) -> Arc<KnowledgeBase> {
        let mut index = VectorIndex::new();
        for (content, vector) in vectors {
            index
                .push(content.to_string(), vector.clone(), None)
                .unwrap();
        }
        Arc::new(KnowledgeBase {
            name: name.to_string(),
            source_path: PathBuf::from(format!("/tmp/{name}.txt")),
            index,
            origin: KbOrigin::User,
        })
    }

    fn planner() -> RetrievalPlanner {
        RetrievalPlanner {
            max_docs: 5,
            min_score: 0.7,
        }
    }

    /// Unit vector at `angle` radians from the x axis; cos against [1, 0]
    /// equals cos(angle).
    fn at_angle(angle: f32) -> Vec<f32> {
        vec![angle.cos(), angle.sin()]
    }

    #[test]
    fn test_single_filters_below_threshold() {
        // cos = 0.91 -> score 0.955; cos = 0.32 -> score 0.66.
        let kb = make_kb(
            "agent-article",
            &[
                ("relevant passage", at_angle(0.91f32.acos())),
                ("irrelevant passage", at_angle(0.32f32.acos())),
            ],
        );

        let matches = planner().search_single(&kb, &[1.0, 0.0]).unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].content, "relevant passage");
        assert!((matches[0].score - 0.955).abs() < 1e-3);
    }

    #[test]
    fn test_single_nothing_relevant() {
        let kb = make_kb("kb", &[("off-topic", at_angle(0.2f32.acos()))]);

        let result = planner().search_single(&kb, &[1.0, 0.0]);
        assert!(matches!(result, Err(RagError::NoRelevantContent)));
    }

    #[tokio::test]
    async fn test_multi_merges_and_orders_across_kbs() {
        // programming scores 0.94, agent-article scores 0.86.
        let programming = make_kb("programming", &[("rust and python", at_angle(0.88f32.acos()))]);
        let agent = make_kb("agent-article", &[("agents act", at_angle(0.72f32.acos()))]);

        let matches = planner()
            .search_multi(
                &[Arc::clone(&agent), Arc::clone(&programming)],
                Arc::new(vec![1.0, 0.0]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].kb_name, "programming");
        assert_eq!(matches[1].kb_name, "agent-article");
        assert!(matches[0].score > matches[1].score);
    }

    #[tokio::test]
    async fn test_multi_tie_breaks_by_kb_name_then_id() {
        let same = at_angle(0.9f32.acos());
        let zeta = make_kb("zeta", &[("z passage", same.clone())]);
        let alpha = make_kb(
            "alpha",
            &[("a first", same.clone()), ("a second", same.clone())],
        );

        let matches = planner()
            .search_multi(
                &[zeta, alpha],
                Arc::new(vec![1.0, 0.0]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let order: Vec<(&str, u32)> = matches
            .iter()
            .map(|m| (m.kb_name.as_str(), m.chunk_id.as_u32()))
            .collect();
        assert_eq!(order, vec![("alpha", 0), ("alpha", 1), ("zeta", 0)]);
    }

    #[tokio::test]
    async fn test_multi_truncates_to_max_docs() {
        let vectors: Vec<(&str, Vec<f32>)> = vec![
            ("one", at_angle(0.95f32.acos())),
            ("two", at_angle(0.94f32.acos())),
            ("three", at_angle(0.93f32.acos())),
            ("four", at_angle(0.92f32.acos())),
        ];
        let kb_a = make_kb("a", &vectors);
        let kb_b = make_kb("b", &vectors);

        let planner = RetrievalPlanner {
            max_docs: 3,
            min_score: 0.7,
        };
        let matches = planner
            .search_multi(
                &[kb_a, kb_b],
                Arc::new(vec![1.0, 0.0]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(matches.len(), 3);
        for pair in matches.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_multi_kb_failure_is_isolated() {
        // The middle KB rejects the query (dimension mismatch) while the
        // others answer; the query must still succeed.
        let good_a = make_kb("aaa", &[("passage a", at_angle(0.9f32.acos()))]);
        let bad = {
            let mut index = VectorIndex::new();
            index
                .push("three dims".to_string(), vec![1.0, 0.0, 0.0], None)
                .unwrap();
            Arc::new(KnowledgeBase {
                name: "bad".to_string(),
                source_path: PathBuf::from("/tmp/bad.txt"),
                index,
                origin: KbOrigin::User,
            })
        };
        let good_b = make_kb("zzz", &[("passage z", at_angle(0.8f32.acos()))]);

        let matches = planner()
            .search_multi(
                &[good_a, bad, good_b],
                Arc::new(vec![1.0, 0.0]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let kbs: Vec<&str> = matches.iter().map(|m| m.kb_name.as_str()).collect();
        assert_eq!(kbs, vec!["aaa", "zzz"]);
    }

    #[tokio::test]
    async fn test_multi_cancelled() {
        let kb = make_kb("kb", &[("passage", at_angle(0.9f32.acos()))]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = planner()
            .search_multi(&[kb], Arc::new(vec![1.0, 0.0]), &cancel)
            .await;

        assert!(matches!(result, Err(RagError::Cancelled)));
    }

    #[test]
    fn test_context_block_shape() {
        let matches = vec![RankedMatch {
            kb_name: "agent-article".to_string(),
            chunk_id: ChunkId::from_u32(0),
            content: "Agents are autonomous programs.".to_string(),
            score: 0.955,
        }];

        let context = format_context(&matches);
        assert_eq!(
            context,
            "\n引用 1 (知识库: agent-article, 相关度: 95.5%):\nAgents are autonomous programs.\n"
        );
    }

    #[test]
    fn test_context_blocks_are_numbered_in_order() {
        let matches = vec![
            RankedMatch {
                kb_name: "a".to_string(),
                chunk_id: ChunkId::from_u32(0),
                content: "first".to_string(),
                score: 0.9,
            },
            RankedMatch {
                kb_name: "b".to_string(),
                chunk_id: ChunkId::from_u32(0),
                content: "second".to_string(),
                score: 0.8,
            },
        ];

        let context = format_context(&matches);
        let first = context.find("引用 1").unwrap();
        let second = context.find("引用 2").unwrap();
        assert!(first < second);
        assert!(context.contains("相关度: 90.0%"));
        assert!(context.contains("相关度: 80.0%"));
    }

    #[test]
    fn test_assemble_aligns_documents_and_references() {
        let matches = vec![
            RankedMatch {
                kb_name: "programming".to_string(),
                chunk_id: ChunkId::from_u32(3),
                content: "x".repeat(200),
                score: 0.88,
            },
            RankedMatch {
                kb_name: "agent-article".to_string(),
                chunk_id: ChunkId::from_u32(0),
                content: "short".to_string(),
                score: 0.72,
            },
        ];

        let result = planner().assemble(
            matches,
            None,
            vec!["agent-article".to_string(), "programming".to_string()],
        );

        assert_eq!(result.metadata.match_count, 2);
        assert_eq!(result.documents.len(), 2);
        assert_eq!(result.metadata.references.len(), 2);
        for (doc, reference) in result.documents.iter().zip(&result.metadata.references) {
            assert_eq!(doc.kb_name, reference.kb);
            assert_eq!(doc.score, reference.score);
            assert!(doc.content.starts_with(&reference.excerpt));
        }
        // Long content is excerpted.
        assert_eq!(
            result.metadata.references[0].excerpt.chars().count(),
            EXCERPT_MAX_CHARS
        );
        assert!(result.metadata.kb_single.is_none());
        assert_eq!(result.metadata.kb_multi.len(), 2);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let content = "界".repeat(200);
        let cut = excerpt(&content);
        assert_eq!(cut.chars().count(), EXCERPT_MAX_CHARS);
    }
}
