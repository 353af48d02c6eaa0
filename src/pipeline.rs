//! The search workflow as a graph.
//!
//! ```text
//! input -> enhance -> search_path ─┬─ deep:     deep_search (providers x questions)
//!                                  └─ standard: standard_search (providers)
//!       -> aggregate -> [review] -> scrape (top URLs) -> rag -> summarize
//! ```
//!
//! Mappers read earlier results out of [`RunState`]; nothing else flows
//! between nodes.

use std::sync::Arc;

use crate::config::WorkflowConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::OrdinalStep;
use crate::llm::TextModel;
use crate::providers::{Embedder, ProviderRegistry, Scraper, SearchResultItem};
use crate::steps::{
    AggregateStep, EnhanceStep, PageScrapeStep, ProviderSearchStep, RagStep, ReviewStep,
    SummarizeStep,
};
use crate::workflow::{
    INPUT_STEP_ID, PageContent, RunState, SearchPath, Source, Step, StepPayload, WorkflowGraph,
    classify,
};

pub const ENHANCE: &str = "enhance";
pub const SEARCH_PATH: &str = "search_path";
pub const STANDARD_SEARCH: &str = "standard_search";
pub const DEEP_SEARCH: &str = "deep_search";
pub const AGGREGATE: &str = "aggregate";
pub const REVIEW: &str = "review";
pub const SCRAPE: &str = "scrape";
pub const RAG: &str = "rag";
pub const SUMMARIZE: &str = "summarize";

/// Capabilities the pipeline's steps are built from.
#[derive(Debug, Clone)]
pub struct PipelineDeps {
    pub registry: ProviderRegistry,
    pub model: Arc<dyn TextModel>,
    pub scraper: Arc<dyn Scraper>,
    pub embedder: Option<Arc<dyn Embedder>>,
}

fn missing(step: &str, what: &str) -> WorkflowError {
    WorkflowError::invalid_input(step, format!("{what} is not available"))
}

/// Enhanced query recorded by the `enhance` step.
pub fn enhanced_query(state: &RunState) -> Option<&str> {
    match state.completed_payload(ENHANCE)? {
        StepPayload::Plan { enhanced, .. } => Some(enhanced),
        _ => None,
    }
}

/// Search path the run took, once decided.
pub fn search_path(state: &RunState) -> Option<SearchPath> {
    match state.completed_payload(SEARCH_PATH)? {
        StepPayload::BranchDecision { arm } => SearchPath::parse(arm),
        _ => None,
    }
}

fn plan(state: &RunState, step: &str) -> WorkflowResult<(String, String, Vec<String>)> {
    match state.completed_payload(ENHANCE) {
        Some(StepPayload::Plan {
            original,
            enhanced,
            sub_questions,
        }) => Ok((original.clone(), enhanced.clone(), sub_questions.clone())),
        _ => Err(missing(step, "enhanced query")),
    }
}

fn fan_out_id(path: SearchPath) -> &'static str {
    match path {
        SearchPath::Deep => DEEP_SEARCH,
        SearchPath::Standard => STANDARD_SEARCH,
    }
}

/// URLs chosen for reading: the reviewer's picks if there was a review,
/// the aggregated list otherwise.
fn scrape_candidates(state: &RunState, max_scrape: usize) -> WorkflowResult<Vec<SearchResultItem>> {
    let items = match (
        state.completed_payload(REVIEW),
        state.completed_payload(AGGREGATE),
    ) {
        (Some(StepPayload::ReviewSelection { items, .. }), _)
        | (None, Some(StepPayload::SearchResults { items, .. })) => items,
        _ => return Err(missing(SCRAPE, "search results")),
    };
    Ok(items.iter().take(max_scrape).cloned().collect())
}

fn scraped_pages(state: &RunState, step: &str) -> WorkflowResult<Vec<PageContent>> {
    match state.completed_payload(SCRAPE) {
        Some(StepPayload::Pages { pages }) => Ok(pages.clone()),
        _ => Err(missing(step, "scraped pages")),
    }
}

fn summary_context(state: &RunState, pages: &[PageContent]) -> Vec<String> {
    if let Some(StepPayload::Chunks { chunks }) = state.output(RAG)
        && !chunks.is_empty()
    {
        return chunks
            .iter()
            .map(|c| format!("Source: {}\n{}", c.url, c.text))
            .collect();
    }
    pages
        .iter()
        .filter(|p| !p.error)
        .filter_map(|p| {
            p.content
                .first()
                .map(|block| format!("Source: {}\n{block}", p.url))
        })
        .collect()
}

/// Builds the graph for one orchestrator configuration.
pub fn build_search_graph(
    deps: &PipelineDeps,
    config: &WorkflowConfig,
) -> WorkflowResult<WorkflowGraph> {
    let providers = deps.registry.names();
    let search_step: Arc<dyn Step> = Arc::new(ProviderSearchStep::new(deps.registry.clone()));

    let mut b = WorkflowGraph::builder();

    let enhance = b.task(
        Arc::new(EnhanceStep::new(Arc::clone(&deps.model))),
        &[],
        Arc::new(|state| {
            state
                .completed_payload(INPUT_STEP_ID)
                .cloned()
                .ok_or_else(|| missing(ENHANCE, "initial query"))
        }),
        true,
    );

    let standard = {
        let providers = providers.clone();
        let per_provider = config.results_per_provider;
        b.fan_out(
            STANDARD_SEARCH,
            Arc::clone(&search_step),
            &[ENHANCE],
            Arc::new(move |state| {
                let (_, enhanced, _) = plan(state, STANDARD_SEARCH)?;
                Ok(providers
                    .iter()
                    .map(|provider| StepPayload::SearchRequest {
                        provider: provider.clone(),
                        query: enhanced.clone(),
                        num_results: per_provider,
                    })
                    .collect())
            }),
            Arc::new(|state, outputs| join_batches(state, STANDARD_SEARCH, outputs)),
        )
    };

    let deep = {
        let per_query = config.deep_results_per_query;
        b.fan_out(
            DEEP_SEARCH,
            search_step,
            &[ENHANCE],
            Arc::new(move |state| {
                let (_, enhanced, sub_questions) = plan(state, DEEP_SEARCH)?;
                let mut queries = vec![enhanced];
                for q in sub_questions {
                    if !queries.contains(&q) {
                        queries.push(q);
                    }
                }
                Ok(providers
                    .iter()
                    .flat_map(|provider| {
                        queries.iter().map(move |query| StepPayload::SearchRequest {
                            provider: provider.clone(),
                            query: query.clone(),
                            num_results: per_query,
                        })
                    })
                    .collect())
            }),
            Arc::new(|state, outputs| join_batches(state, DEEP_SEARCH, outputs)),
        )
    };

    let path_branch = b.branch(
        SEARCH_PATH,
        OrdinalStep::Search,
        Arc::new(|state| {
            let query =
                enhanced_query(state).ok_or_else(|| missing(SEARCH_PATH, "enhanced query"))?;
            Ok(classify(query).as_str().to_string())
        }),
        vec![
            (SearchPath::Deep.as_str().to_string(), deep),
            (SearchPath::Standard.as_str().to_string(), standard),
        ],
    );

    let aggregate = b.task(
        Arc::new(AggregateStep),
        &[SEARCH_PATH],
        Arc::new(|state| {
            let path = search_path(state).ok_or_else(|| missing(AGGREGATE, "search path"))?;
            state
                .completed_payload(fan_out_id(path))
                .cloned()
                .ok_or_else(|| missing(AGGREGATE, "search batches"))
        }),
        true,
    );

    let review = config.human_review.then(|| {
        b.task(
            Arc::new(ReviewStep),
            &[AGGREGATE],
            Arc::new(|state| {
                state
                    .completed_payload(AGGREGATE)
                    .cloned()
                    .ok_or_else(|| missing(REVIEW, "search results"))
            }),
            true,
        )
    });

    let max_scrape = config.max_scrape;
    let scrape = b.fan_out(
        SCRAPE,
        Arc::new(PageScrapeStep::new(Arc::clone(&deps.scraper))),
        &[AGGREGATE],
        Arc::new(move |state| {
            Ok(scrape_candidates(state, max_scrape)?
                .into_iter()
                .map(|item| StepPayload::ScrapeRequest {
                    url: item.url,
                    title: item.title,
                })
                .collect())
        }),
        Arc::new(|_, outputs| {
            let pages = outputs
                .into_iter()
                .filter_map(|payload| match payload {
                    StepPayload::Page { page } => Some(page),
                    _ => None,
                })
                .collect();
            Ok(StepPayload::Pages { pages })
        }),
    );

    let rag = b.task(
        Arc::new(RagStep::new(deps.embedder.clone())),
        &[SCRAPE],
        Arc::new(|state| {
            let (_, enhanced, sub_questions) = plan(state, RAG)?;
            Ok(StepPayload::RagRequest {
                query: enhanced,
                sub_questions,
                pages: scraped_pages(state, RAG)?,
            })
        }),
        false,
    );

    let summarize = b.task(
        Arc::new(SummarizeStep::new(Arc::clone(&deps.model))),
        &[SCRAPE],
        Arc::new(move |state| {
            let (original, _, _) = plan(state, SUMMARIZE)?;
            let pages = scraped_pages(state, SUMMARIZE)?;
            let read: Vec<Source> = pages
                .iter()
                .filter(|p| !p.error)
                .map(|p| Source {
                    title: p.title.clone(),
                    url: p.url.clone(),
                })
                .collect();
            // Nothing could be read: cite what the search returned.
            let sources = if read.is_empty() {
                scrape_candidates(state, max_scrape)?
                    .into_iter()
                    .map(|item| Source {
                        title: item.title,
                        url: item.url,
                    })
                    .collect()
            } else {
                read
            };
            Ok(StepPayload::SummaryRequest {
                query: original,
                sources,
                context: summary_context(state, &pages),
            })
        }),
        true,
    );

    let mut chain = vec![enhance, path_branch, aggregate];
    chain.extend(review);
    chain.extend([scrape, rag, summarize]);
    b.chain(&chain);

    b.build(enhance)
}

fn join_batches(
    state: &RunState,
    step: &str,
    outputs: Vec<StepPayload>,
) -> WorkflowResult<StepPayload> {
    let query = enhanced_query(state)
        .ok_or_else(|| missing(step, "enhanced query"))?
        .to_string();
    let batches = outputs
        .into_iter()
        .filter_map(|payload| match payload {
            StepPayload::SearchResults { items, .. } => Some(items),
            _ => None,
        })
        .collect();
    Ok(StepPayload::SearchBatches { query, batches })
}
