//! Retrieval over the pages read so far.
//!
//! Pages are split into character-bounded chunks and each chunk is scored
//! against the enhanced query and its sub-questions. With an embedder the
//! score is the best cosine similarity over those questions; without one
//! it is the share of query terms the chunk contains.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use text_splitter::{Characters, ChunkConfig, TextSplitter};

use super::unexpected;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::OrdinalStep;
use crate::providers::Embedder;
use crate::providers::embeddings::cosine_similarity;
use crate::workflow::{PageContent, PayloadKind, RankedChunk, Step, StepContext, StepOutcome, StepPayload};

#[derive(Debug)]
pub struct RagStep {
    embedder: Option<Arc<dyn Embedder>>,
}

impl RagStep {
    pub fn new(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { embedder }
    }
}

fn split_pages(pages: &[PageContent], chunk_size: usize) -> Vec<(String, String)> {
    let config = ChunkConfig::new(chunk_size.max(1))
        .with_sizer(Characters)
        .with_trim(true);
    let splitter = TextSplitter::new(config);

    pages
        .iter()
        .filter(|page| !page.error)
        .flat_map(|page| {
            let text = page.content.join("\n\n");
            splitter
                .chunks(&text)
                .map(|chunk| (page.url.clone(), chunk.to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn lexical_score(query_terms: &HashSet<String>, chunk: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let chunk_terms = terms(chunk);
    #[allow(clippy::cast_precision_loss)]
    let score = query_terms.intersection(&chunk_terms).count() as f32 / query_terms.len() as f32;
    score
}

/// Highest score first; equal scores keep page order.
fn top_chunks(mut chunks: Vec<RankedChunk>, max_chunks: usize) -> Vec<RankedChunk> {
    chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
    chunks.truncate(max_chunks);
    chunks
}

impl RagStep {
    async fn score_with_embeddings(
        embedder: &dyn Embedder,
        questions: &[String],
        chunks: Vec<(String, String)>,
    ) -> anyhow::Result<Vec<RankedChunk>> {
        let mut texts = questions.to_vec();
        texts.extend(chunks.iter().map(|(_, text)| text.clone()));

        let vectors = embedder.embed(texts).await?;
        if vectors.len() != questions.len() + chunks.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                questions.len() + chunks.len()
            );
        }
        let (question_vecs, chunk_vecs) = vectors.split_at(questions.len());

        Ok(chunks
            .into_iter()
            .zip(chunk_vecs)
            .map(|((url, text), vector)| RankedChunk {
                url,
                text,
                score: question_vecs
                    .iter()
                    .map(|q| cosine_similarity(q, vector))
                    .fold(0.0, f32::max),
            })
            .collect())
    }

    fn score_lexically(questions: &[String], chunks: Vec<(String, String)>) -> Vec<RankedChunk> {
        let query_terms = terms(&questions.join(" "));
        chunks
            .into_iter()
            .map(|(url, text)| RankedChunk {
                score: lexical_score(&query_terms, &text),
                url,
                text,
            })
            .collect()
    }
}

#[async_trait]
impl Step for RagStep {
    fn id(&self) -> &str {
        "rag"
    }

    fn input_kind(&self) -> PayloadKind {
        PayloadKind::RagRequest
    }

    fn output_kind(&self) -> PayloadKind {
        PayloadKind::Chunks
    }

    async fn execute(&self, input: &StepPayload, ctx: &StepContext) -> WorkflowResult<StepOutcome> {
        let StepPayload::RagRequest {
            query,
            sub_questions,
            pages,
        } = input
        else {
            return Err(unexpected(self.id(), input));
        };

        let read = pages.iter().filter(|p| !p.error).count();
        ctx.events.send_manual_update(
            OrdinalStep::Read,
            "pages_read",
            json!({
                "read": read,
                "failed": pages.len() - read,
                "urls": pages.iter().filter(|p| !p.error).map(|p| &p.url).collect::<Vec<_>>(),
            }),
        );

        let chunks = split_pages(pages, ctx.config.chunk_size);
        let mut questions = vec![query.clone()];
        questions.extend(sub_questions.iter().cloned());

        let scored = match &self.embedder {
            Some(embedder) if !chunks.is_empty() => {
                Self::score_with_embeddings(embedder.as_ref(), &questions, chunks)
                    .await
                    .map_err(|e| WorkflowError::step_failed(self.id(), e))?
            }
            _ => Self::score_lexically(&questions, chunks),
        };

        let chunks = top_chunks(scored, ctx.config.max_chunks);
        tracing::info!(run_id = %ctx.run_id, pages = read, chunks = chunks.len(), "Context ranked");

        Ok(StepOutcome::Completed(StepPayload::Chunks { chunks }))
    }

    /// Leading block of each page that was read.
    fn degraded(&self, input: &StepPayload, _error: &WorkflowError) -> Option<StepPayload> {
        let StepPayload::RagRequest { pages, .. } = input else {
            return None;
        };
        let chunks = pages
            .iter()
            .filter(|page| !page.error)
            .filter_map(|page| {
                page.content.first().map(|text| RankedChunk {
                    url: page.url.clone(),
                    text: text.clone(),
                    score: 0.0,
                })
            })
            .collect();
        Some(StepPayload::Chunks { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::steps::test_support::{context, event_types};

    fn page(url: &str, blocks: &[&str]) -> PageContent {
        PageContent {
            url: url.into(),
            title: url.into(),
            content: blocks.iter().map(ToString::to_string).collect(),
            error: false,
        }
    }

    fn request(pages: Vec<PageContent>) -> StepPayload {
        StepPayload::RagRequest {
            query: "quantum computing qubits".into(),
            sub_questions: vec![],
            pages,
        }
    }

    #[derive(Debug)]
    struct AxisEmbedder;

    /// Embeds text on two axes: mentions of "qubit" and everything else.
    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("qubit") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    #[derive(Debug)]
    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("model not loaded")
        }
    }

    #[tokio::test]
    async fn test_lexical_ranking() {
        let step = RagStep::new(None);
        let (ctx, log) = context(WorkflowConfig::default());
        let input = request(vec![
            page("https://cooking", &["Bake the bread at high heat."]),
            page("https://physics", &["Quantum computing uses qubits."]),
        ]);

        let out = step.execute(&input, &ctx).await.unwrap();
        let StepOutcome::Completed(StepPayload::Chunks { chunks }) = out else {
            panic!("expected chunks");
        };
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].url, "https://physics");
        assert!(chunks[0].score > chunks[1].score);
        assert_eq!(event_types(&ctx, &log).await, vec!["pages_read"]);
    }

    #[tokio::test]
    async fn test_embedding_ranking_and_limit() {
        let step = RagStep::new(Some(Arc::new(AxisEmbedder)));
        let config = WorkflowConfig {
            max_chunks: 1,
            ..WorkflowConfig::default()
        };
        let (ctx, _log) = context(config);
        let input = StepPayload::RagRequest {
            query: "what is a qubit".into(),
            sub_questions: vec![],
            pages: vec![
                page("https://a", &["Nothing relevant here."]),
                page("https://b", &["A qubit is a two-level system."]),
            ],
        };

        let out = step.execute(&input, &ctx).await.unwrap();
        let StepOutcome::Completed(StepPayload::Chunks { chunks }) = out else {
            panic!("expected chunks");
        };
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].url, "https://b");
    }

    #[tokio::test]
    async fn test_embedder_failure_degrades_to_leading_blocks() {
        let step = RagStep::new(Some(Arc::new(FailingEmbedder)));
        let (ctx, _log) = context(WorkflowConfig::default());
        let mut broken = page("https://broken", &[]);
        broken.error = true;
        let input = request(vec![page("https://a", &["first", "second"]), broken]);

        let err = step.execute(&input, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), "workflow_execution_error");

        let Some(StepPayload::Chunks { chunks }) = step.degraded(&input, &err) else {
            panic!("expected degraded chunks");
        };
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "first");
    }

    #[test]
    fn test_split_respects_chunk_size() {
        let long = "word ".repeat(100);
        let chunks = split_pages(&[page("https://a", &[long.as_str()])], 50);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|(_, text)| text.chars().count() <= 50));
    }
}
