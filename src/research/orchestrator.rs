//! 研究编排器：PLAN → SEARCH → SUMMARIZE → ANALYZE → DECIDE → {PLAN | REPORT} → DONE
//!
//! 编排器只通过 [`PipelineMessage`] 通道汇报进度，从不直接触碰任务登记表。
//! 阶段之间检查取消令牌；单次外部调用不会被中断。

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ResearchSection;
use crate::core::ResearchError;
use crate::jobs::EventType;
use crate::llm::LlmClient;
use crate::research::prompts;
use crate::research::state::{
    mode_for_iteration, PlannedQuery, ResearchState, SearchResult, SiteSummary, FIXED_ROUNDS,
};
use crate::sources::text::{truncate_chars, TRUNCATION_MARKER};
use crate::sources::web::MIN_USEFUL_CHARS;
use crate::sources::{SourceSet, SourceType};

/// 编排器发往任务登记表的消息
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    Event {
        event_type: EventType,
        message: String,
        details: serde_json::Value,
    },
    /// 一轮分析产出的片段，用于超时 / 失败时的部分结果
    Partial(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Plan,
    Search,
    Summarize,
    Analyze,
    Decide,
    Report,
}

/// DECIDE 阶段的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Finish,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Continue => "continue",
            Decision::Finish => "finish",
        }
    }
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

pub struct ResearchOrchestrator {
    llm: Arc<dyn LlmClient>,
    sources: Arc<SourceSet>,
    settings: ResearchSection,
    progress: mpsc::UnboundedSender<PipelineMessage>,
    cancel: CancellationToken,
}

impl ResearchOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sources: Arc<SourceSet>,
        settings: ResearchSection,
        progress: mpsc::UnboundedSender<PipelineMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            llm,
            sources,
            settings,
            progress,
            cancel,
        }
    }

    fn emit(&self, event_type: EventType, message: impl Into<String>, details: serde_json::Value) {
        // 接收端已关闭说明任务已结束，丢弃即可
        let _ = self.progress.send(PipelineMessage::Event {
            event_type,
            message: message.into(),
            details,
        });
    }

    fn ensure_active(&self) -> Result<(), ResearchError> {
        if self.cancel.is_cancelled() {
            Err(ResearchError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 执行完整流水线，返回最终报告
    pub async fn run(&self, query: &str, max_iterations: usize) -> Result<String, ResearchError> {
        let mut state = ResearchState::new(query, max_iterations.max(1));
        let mut stage = Stage::Plan;

        tracing::info!(query = %query, max_iterations = state.max_iterations, "Research pipeline started");

        loop {
            self.ensure_active()?;
            stage = match stage {
                Stage::Plan => {
                    self.plan(&mut state).await;
                    Stage::Search
                }
                Stage::Search => {
                    self.search(&mut state).await?;
                    Stage::Summarize
                }
                Stage::Summarize => {
                    self.summarize(&mut state).await?;
                    Stage::Analyze
                }
                Stage::Analyze => {
                    self.analyze(&mut state).await?;
                    Stage::Decide
                }
                Stage::Decide => match self.decide(&state) {
                    Decision::Continue => Stage::Plan,
                    Decision::Finish => Stage::Report,
                },
                Stage::Report => {
                    let report = self.report(&mut state).await?;
                    let (_, _, total_tokens) = self.llm.token_usage();
                    tracing::info!(
                        iterations = state.iteration,
                        sources = state.sources.len(),
                        total_tokens,
                        "Research pipeline finished"
                    );
                    return Ok(report);
                }
            };
        }
    }

    async fn plan(&self, state: &mut ResearchState) {
        let iteration = state.iteration;
        let mode = mode_for_iteration(iteration);

        let query = if iteration < FIXED_ROUNDS {
            state.query.clone()
        } else {
            let prompt = prompts::refine_query(&state.query, &state.cumulative_analysis);
            match self.llm.generate(&prompt).await {
                Ok(text) => {
                    let refined = text.trim().trim_matches('"').trim().to_string();
                    if refined.is_empty() {
                        state.query.clone()
                    } else {
                        refined
                    }
                }
                Err(e) => {
                    tracing::warn!(iteration, error = %e, "Query refinement failed, reusing original query");
                    state.query.clone()
                }
            }
        };

        state.current_query = query.clone();
        state.current_search_mode = mode;
        state.search_queries.push(PlannedQuery {
            query: query.clone(),
            mode,
        });

        self.emit(
            EventType::Plan,
            format!("Planned {} search: {}", mode, query),
            json!({ "query": query, "mode": mode, "iteration": iteration + 1 }),
        );
    }

    async fn search(&self, state: &mut ResearchState) -> Result<(), ResearchError> {
        let mode = state.current_search_mode;
        let query = state.current_query.clone();
        let limit = self.settings.results_per_search;

        let Some(binding) = self.sources.binding(mode) else {
            tracing::warn!(mode = %mode, "No source registered for search mode");
            self.emit_search(&query, mode, &[]);
            self.emit(
                EventType::SearchComplete,
                "Search complete: 0 pages extracted",
                json!({ "count": 0, "failed": 0 }),
            );
            return Ok(());
        };

        let hits = binding.adapter.search(&query, limit).await;
        let (failed, valid): (Vec<_>, Vec<_>) = hits.into_iter().partition(|h| h.is_error());
        for hit in &failed {
            tracing::warn!(mode = %mode, error = ?hit.error, "Search adapter reported a failure");
        }
        let valid: Vec<_> = valid
            .into_iter()
            .filter(|h| !h.url.is_empty())
            .take(limit)
            .collect();

        let urls: Vec<String> = valid.iter().map(|h| h.url.clone()).collect();
        self.emit_search(&query, mode, &urls);

        let mut extracted = 0;
        let mut fetch_failures = 0;
        for hit in valid {
            self.ensure_active()?;
            self.emit(
                EventType::Extract,
                format!("Extracting content from: {}", hit.url),
                json!({ "url": hit.url }),
            );

            let fetched = binding.fetcher.fetch(&hit.url).await;
            let error = fetched.error || fetched.content.trim().is_empty();
            let length = fetched.content.chars().count();
            let status = if error {
                "error"
            } else if length < MIN_USEFUL_CHARS {
                "low"
            } else {
                "ok"
            };
            self.emit(
                EventType::ExtractDetail,
                format!("Extracted {} characters from {}", length, hit.url),
                json!({ "url": hit.url, "length": length, "status": status }),
            );
            if error {
                fetch_failures += 1;
                tracing::warn!(url = %hit.url, reason = %fetched.content, "Content fetch failed");
            } else {
                extracted += 1;
            }

            state.search_results.push(SearchResult {
                title: fetched.title.unwrap_or(hit.title),
                url: hit.url,
                snippet: hit.snippet,
                source_type: hit.source_type,
                content: fetched.content,
                error,
            });
        }

        self.emit(
            EventType::SearchComplete,
            format!("Search complete: {} pages extracted", extracted),
            json!({ "count": extracted, "failed": fetch_failures }),
        );
        Ok(())
    }

    fn emit_search(&self, query: &str, mode: SourceType, urls: &[String]) {
        self.emit(
            EventType::Search,
            format!("Searching {} sources for: {} ({} valid results)", mode, query, urls.len()),
            json!({
                "query": query,
                "mode": mode,
                "count": urls.len(),
                "urls": urls.iter().take(3).collect::<Vec<_>>(),
            }),
        );
    }

    /// 处理最近追加的 results_per_search 条结果；抓取失败的和已摘要过的跳过
    async fn summarize(&self, state: &mut ResearchState) -> Result<(), ResearchError> {
        let total = state.search_results.len();
        let start = total
            .saturating_sub(self.settings.results_per_search)
            .max(state.summarized_results.min(total));
        let window: Vec<SearchResult> = state.search_results[start..]
            .iter()
            .filter(|r| r.is_usable())
            .cloned()
            .collect();
        state.summarized_results = total;

        for result in window {
            self.ensure_active()?;
            let content = truncate_chars(
                &result.content,
                self.settings.summary_input_chars,
                TRUNCATION_MARKER,
            );
            let prompt = prompts::summarize(
                result.source_type,
                &state.query,
                &result.title,
                &result.url,
                &content,
            );

            match self.llm.generate(&prompt).await {
                Ok(summary) => {
                    self.emit(
                        EventType::SiteSummary,
                        format!("Summarized: {}", result.title),
                        json!({
                            "url": result.url,
                            "sourceType": result.source_type,
                            "length": summary.chars().count(),
                            "status": "ok",
                        }),
                    );
                    state.site_summaries.push(SiteSummary {
                        title: result.title,
                        url: result.url,
                        source_type: result.source_type,
                        summary,
                    });
                }
                Err(e) => {
                    tracing::warn!(url = %result.url, error = %e, "Summarization failed, skipping document");
                    self.emit(
                        EventType::SiteSummary,
                        format!("Summarization failed for {}: {}", result.url, e),
                        json!({
                            "url": result.url,
                            "sourceType": result.source_type,
                            "status": "failed",
                            "error": e.to_string(),
                        }),
                    );
                }
            }
        }
        Ok(())
    }

    /// 分析最近的 results_per_search 条摘要；本轮无新结果时沿用上一窗口
    async fn analyze(&self, state: &mut ResearchState) -> Result<(), ResearchError> {
        let next_iteration = state.iteration + 1;
        let window = tail(&state.site_summaries, self.settings.results_per_search);

        self.emit(
            EventType::Analyze,
            format!(
                "Analyzing {} summaries (iteration {}/{})",
                window.len(),
                next_iteration,
                state.max_iterations
            ),
            json!({ "iteration": next_iteration, "documents": window.len() }),
        );

        let consolidated = prompts::consolidate(window);
        let prompt = prompts::analyze(&state.query, &consolidated, &state.cumulative_analysis);
        let fragment = self
            .llm
            .generate(&prompt)
            .await
            .map_err(|e| ResearchError::collaborator("analyze", e))?;

        state.append_analysis(&fragment);
        state.iteration = next_iteration;

        let _ = self.progress.send(PipelineMessage::Partial(fragment.clone()));
        self.emit(
            EventType::AnalyzeComplete,
            format!("Analysis complete - iteration {}", state.iteration),
            json!({
                "iteration": state.iteration,
                "insightsPreview": truncate_chars(&fragment, self.settings.insights_preview_chars, "..."),
            }),
        );
        Ok(())
    }

    fn decide(&self, state: &ResearchState) -> Decision {
        let (decision, reason) = if state.iteration >= state.max_iterations {
            (
                Decision::Finish,
                format!("Maximum number of iterations reached ({})", state.max_iterations),
            )
        } else if state.is_sufficient(
            self.settings.sufficiency_min_chars,
            &self.settings.sufficiency_marker,
        ) {
            (Decision::Finish, "Sufficient information collected".to_string())
        } else {
            (
                Decision::Continue,
                format!(
                    "Continuing research - iteration {} of {}",
                    state.iteration + 1,
                    state.max_iterations
                ),
            )
        };

        tracing::debug!(decision = decision.as_str(), iteration = state.iteration, "Decision");
        self.emit(
            EventType::Decision,
            reason.clone(),
            json!({
                "decision": decision.as_str(),
                "reason": reason,
                "iteration": state.iteration,
            }),
        );
        decision
    }

    async fn report(&self, state: &mut ResearchState) -> Result<String, ResearchError> {
        state.sources = state.unique_sources();

        self.emit(
            EventType::Report,
            format!(
                "Compiling report from {} results and {} searches",
                state.search_results.len(),
                state.search_queries.len()
            ),
            json!({
                "totalResults": state.search_results.len(),
                "totalQueries": state.search_queries.len(),
                "sourcesCount": state.sources.len(),
            }),
        );

        let citations = prompts::citations(&state.sources);
        let prompt = prompts::report(
            &state.query,
            &state.search_queries,
            &state.cumulative_analysis,
            &citations,
        );
        let body = self
            .llm
            .generate(&prompt)
            .await
            .map_err(|e| ResearchError::collaborator("report", e))?;

        let report = if citations.is_empty() {
            body
        } else {
            format!("{}\n\n## Sources\n\n{}", body.trim_end(), citations.trim_end())
        };

        self.emit(
            EventType::ReportComplete,
            "Final report generated",
            json!({
                "reportLength": report.chars().count(),
                "wordCount": report.split_whitespace().count(),
            }),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, Message, MockLlmClient};
    use crate::sources::{ContentFetcher, FetchedContent, SourceAdapter, SourceHit};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TwoHits(SourceType);

    #[async_trait]
    impl SourceAdapter for TwoHits {
        fn source_type(&self) -> SourceType {
            self.0
        }

        async fn search(&self, _query: &str, _limit: usize) -> Vec<SourceHit> {
            vec![
                SourceHit::new(self.0, "A", "https://shared.example/a", "a"),
                SourceHit::failed(self.0, "one backend was down"),
                SourceHit::new(self.0, "B", format!("https://{}.example/b", self.0), "b"),
            ]
        }
    }

    struct Echo;

    #[async_trait]
    impl ContentFetcher for Echo {
        async fn fetch(&self, url: &str) -> FetchedContent {
            FetchedContent::ok(None, format!("content of {}", url))
        }
    }

    /// 记录收到的提示词；摘要 / 分析阶段可配置失败，分析回复可替换
    struct Recording {
        prompts: Mutex<Vec<String>>,
        fail_analyze: bool,
        fail_summaries: bool,
        analysis_reply: Option<String>,
    }

    fn recording() -> Recording {
        Recording {
            prompts: Mutex::new(Vec::new()),
            fail_analyze: false,
            fail_summaries: false,
            analysis_reply: None,
        }
    }

    #[async_trait]
    impl LlmClient for Recording {
        async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
            let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let is_analyze = prompt.contains("Comparative insights");
            let is_summary = prompt.contains("--- CONTENT ---");
            self.prompts.lock().unwrap().push(prompt);
            if is_analyze && self.fail_analyze {
                return Err(LlmError::ApiError("model overloaded".into()));
            }
            if is_summary && self.fail_summaries {
                return Err(LlmError::Timeout(30));
            }
            match (&self.analysis_reply, is_analyze) {
                (Some(reply), true) => Ok(reply.clone()),
                _ => Ok("generated".into()),
            }
        }
    }

    /// 只有第一次检索有结果
    struct FirstRoundOnly {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for FirstRoundOnly {
        fn source_type(&self) -> SourceType {
            SourceType::General
        }

        async fn search(&self, _query: &str, _limit: usize) -> Vec<SourceHit> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Vec::new();
            }
            vec![
                SourceHit::new(SourceType::General, "A", "https://first.example/a", "a"),
                SourceHit::new(SourceType::General, "B", "https://first.example/b", "b"),
            ]
        }
    }

    fn orchestrator_with(
        llm: Arc<dyn LlmClient>,
        sources: Arc<SourceSet>,
    ) -> (ResearchOrchestrator, mpsc::UnboundedReceiver<PipelineMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = ResearchOrchestrator::new(
            llm,
            sources,
            ResearchSection::default(),
            tx,
            CancellationToken::new(),
        );
        (orchestrator, rx)
    }

    fn all_sources() -> Arc<SourceSet> {
        let mut set = SourceSet::new();
        for t in SourceType::ALL {
            set = set.with(Arc::new(TwoHits(t)), Arc::new(Echo));
        }
        Arc::new(set)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PipelineMessage>) -> Vec<(EventType, serde_json::Value)> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let PipelineMessage::Event {
                event_type, details, ..
            } = msg
            {
                out.push((event_type, details));
            }
        }
        out
    }

    #[tokio::test]
    async fn test_three_rounds_rotate_modes_and_dedupe_sources() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = ResearchOrchestrator::new(
            Arc::new(MockLlmClient),
            all_sources(),
            ResearchSection::default(),
            tx,
            CancellationToken::new(),
        );
        let report = orchestrator.run("rust ownership", 3).await.unwrap();

        let events = drain(&mut rx);
        let modes: Vec<_> = events
            .iter()
            .filter(|(t, _)| *t == EventType::Plan)
            .map(|(_, d)| d["mode"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(modes, vec!["general", "academic", "encyclopedic"]);

        // 同一 URL 在三种模式下都出现过，报告中只列一次
        assert_eq!(report.matches("https://shared.example/a").count(), 1);
        let sources_count = events
            .iter()
            .find(|(t, _)| *t == EventType::Report)
            .map(|(_, d)| d["sourcesCount"].as_u64().unwrap())
            .unwrap();
        assert_eq!(sources_count, 4);
    }

    #[tokio::test]
    async fn test_summaries_use_source_specific_prompts() {
        let llm = Arc::new(recording());
        let (tx, _rx) = mpsc::unbounded_channel();
        let orchestrator = ResearchOrchestrator::new(
            llm.clone(),
            all_sources(),
            ResearchSection::default(),
            tx,
            CancellationToken::new(),
        );
        orchestrator.run("q", 2).await.unwrap();

        let prompts = llm.prompts.lock().unwrap();
        let methodology = prompts.iter().filter(|p| p.contains("Methodology")).count();
        // 第 2 轮为学术模式，两篇文档
        assert_eq!(methodology, 2);
        // 前三轮不改写查询
        assert!(!prompts.iter().any(|p| p.contains("Return only the new search query")));
    }

    #[tokio::test]
    async fn test_analyze_failure_is_a_job_level_error() {
        let llm = Arc::new(Recording {
            fail_analyze: true,
            ..recording()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = ResearchOrchestrator::new(
            llm,
            all_sources(),
            ResearchSection::default(),
            tx,
            CancellationToken::new(),
        );
        let err = orchestrator.run("q", 1).await.unwrap_err();
        assert!(matches!(
            err,
            ResearchError::Collaborator { stage: "analyze", .. }
        ));
        let events = drain(&mut rx);
        assert!(!events.iter().any(|(t, _)| *t == EventType::Report));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_emits_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = ResearchOrchestrator::new(
            Arc::new(MockLlmClient),
            all_sources(),
            ResearchSection::default(),
            tx,
            token,
        );
        assert!(matches!(
            orchestrator.run("q", 1).await,
            Err(ResearchError::Cancelled)
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_refinement_starts_at_fourth_round() {
        let llm = Arc::new(recording());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = ResearchOrchestrator::new(
            llm.clone(),
            all_sources(),
            ResearchSection::default(),
            tx,
            CancellationToken::new(),
        );
        orchestrator.run("original", 4).await.unwrap();

        let refinements = llm
            .prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains("Return only the new search query"))
            .count();
        assert_eq!(refinements, 1);

        let queries: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|(t, _)| *t == EventType::Plan)
            .map(|(_, d)| d["query"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(queries, vec!["original", "original", "original", "generated"]);
    }

    #[tokio::test]
    async fn test_failed_summaries_are_skipped() {
        let llm = Arc::new(Recording {
            fail_summaries: true,
            ..recording()
        });
        let (orchestrator, mut rx) = orchestrator_with(llm, all_sources());
        let report = orchestrator.run("q", 1).await.unwrap();
        assert!(report.starts_with("generated"));

        let events = drain(&mut rx);
        let statuses: Vec<_> = events
            .iter()
            .filter(|(t, _)| *t == EventType::SiteSummary)
            .map(|(_, d)| d["status"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(statuses, vec!["failed", "failed"]);
        let analyzed = events
            .iter()
            .find(|(t, _)| *t == EventType::Analyze)
            .map(|(_, d)| d["documents"].as_u64().unwrap())
            .unwrap();
        assert_eq!(analyzed, 0);
        assert!(events.iter().any(|(t, _)| *t == EventType::AnalyzeComplete));
        assert!(events.iter().any(|(t, _)| *t == EventType::ReportComplete));
    }

    #[tokio::test]
    async fn test_empty_round_reanalyzes_latest_summaries() {
        let sources = SourceSet::new().with(
            Arc::new(FirstRoundOnly {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(Echo),
        );
        let llm = Arc::new(recording());
        // 第 2 轮是学术模式，没有注册来源，检索为空
        let (orchestrator, mut rx) = orchestrator_with(llm.clone(), Arc::new(sources));
        orchestrator.run("q", 2).await.unwrap();

        let documents: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|(t, _)| *t == EventType::Analyze)
            .map(|(_, d)| d["documents"].as_u64().unwrap())
            .collect();
        assert_eq!(documents, vec![2, 2]);

        let analyze_prompts: Vec<_> = llm
            .prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains("Comparative insights"))
            .cloned()
            .collect();
        assert!(analyze_prompts[1].contains("https://first.example/a"));
    }

    #[tokio::test]
    async fn test_gap_report_does_not_stop_early() {
        let llm = Arc::new(Recording {
            analysis_reply: Some(format!(
                "{}\nThere is insufficient information about memory safety.",
                "detail ".repeat(400)
            )),
            ..recording()
        });
        let (orchestrator, mut rx) = orchestrator_with(llm, all_sources());
        orchestrator.run("q", 3).await.unwrap();

        let decisions: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|(t, _)| *t == EventType::Decision)
            .map(|(_, d)| d["decision"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(decisions, vec!["continue", "continue", "finish"]);
    }

    #[tokio::test]
    async fn test_report_prompt_lists_query_and_mode_history() {
        let llm = Arc::new(recording());
        let (orchestrator, _rx) = orchestrator_with(llm.clone(), all_sources());
        orchestrator.run("rust", 2).await.unwrap();

        let prompts = llm.prompts.lock().unwrap();
        let report = prompts
            .iter()
            .find(|p| p.contains("Write the final research report"))
            .unwrap();
        assert!(report.contains("- rust (general)"));
        assert!(report.contains("- rust (academic)"));
    }
}
