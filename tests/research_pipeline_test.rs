//! 研究流水线集成测试：脚本化 LLM + 桩信息源，经 JobRunner 与登记表端到端运行

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use seeker::config::ResearchSection;
use seeker::jobs::{EventType, JobHandle, JobRegistry, JobRunner, JobStatus, ResearchEvent, Submission};
use seeker::llm::{LlmClient, LlmError, LlmFactory, LlmProvider, Message, ProviderSelection};
use seeker::sources::{ContentFetcher, FetchedContent, SourceAdapter, SourceHit, SourceSet, SourceType};

/// 按提示词类型返回固定文本，可选每次调用前等待
struct ScriptedLlm {
    delay: Duration,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        let reply = if prompt.contains("Comparative insights") {
            "**Key findings**: ownership prevents data races."
        } else if prompt.contains("Return only the new search query") {
            "rust borrow checker internals"
        } else if prompt.contains("Write the final research report") {
            "# Report\n\nOwnership is central to Rust."
        } else {
            "A concise summary of the page."
        };
        Ok(reply.to_string())
    }
}

struct ScriptedFactory {
    llm: Arc<dyn LlmClient>,
}

impl LlmFactory for ScriptedFactory {
    fn create(&self, _selection: &ProviderSelection) -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(self.llm.clone())
    }

    fn default_model(&self, _provider: LlmProvider) -> String {
        "scripted".into()
    }
}

/// 返回固定 URL 列表的检索桩，可选检索前等待
struct FixedHits {
    source_type: SourceType,
    urls: Vec<&'static str>,
    delay: Duration,
}

#[async_trait]
impl SourceAdapter for FixedHits {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn search(&self, _query: &str, limit: usize) -> Vec<SourceHit> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.urls
            .iter()
            .take(limit)
            .map(|u| SourceHit::new(self.source_type, format!("Page {}", u), *u, "snippet"))
            .collect()
    }
}

struct LongPage;

#[async_trait]
impl ContentFetcher for LongPage {
    async fn fetch(&self, url: &str) -> FetchedContent {
        FetchedContent::ok(Some(format!("Title of {}", url)), "ownership ".repeat(200))
    }
}

fn sources(urls: Vec<&'static str>, delay: Duration) -> Arc<SourceSet> {
    let mut set = SourceSet::new();
    for t in SourceType::ALL {
        set = set.with(
            Arc::new(FixedHits {
                source_type: t,
                urls: urls.clone(),
                delay,
            }),
            Arc::new(LongPage),
        );
    }
    Arc::new(set)
}

fn runner(llm_delay: Duration, sources: Arc<SourceSet>) -> JobRunner {
    JobRunner::new(
        Arc::new(JobRegistry::new()),
        Arc::new(ScriptedFactory {
            llm: Arc::new(ScriptedLlm { delay: llm_delay }),
        }),
        sources,
        ResearchSection::default(),
    )
}

fn submission(max_iterations: usize) -> Submission {
    Submission {
        query: "rust ownership".into(),
        selection: ProviderSelection::parse("mock", None, None).unwrap(),
        max_iterations,
    }
}

async fn wait_terminal(handle: &JobHandle) -> JobStatus {
    for _ in 0..500 {
        let status = handle.status().await;
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached a terminal status", handle.id());
}

fn count(events: &[ResearchEvent], t: EventType) -> usize {
    events.iter().filter(|e| e.event_type == t).count()
}

fn assert_log_invariants(events: &[ResearchEvent]) {
    for (i, e) in events.iter().enumerate() {
        assert_eq!(e.sequence_index, i, "sequence index must be dense and increasing");
    }
    let terminal: Vec<_> = events.iter().filter(|e| e.event_type.is_terminal()).collect();
    assert_eq!(terminal.len(), 1, "exactly one terminal event");
    assert!(events.last().unwrap().event_type.is_terminal());
}

#[tokio::test]
async fn test_single_iteration_completes() {
    let r = runner(
        Duration::ZERO,
        sources(vec!["https://a.example/1", "https://b.example/2"], Duration::ZERO),
    );
    let handle = r.submit(submission(1)).await.unwrap();
    assert_eq!(wait_terminal(&handle).await, JobStatus::Completed);

    let events = handle.events_from(0).await;
    assert_log_invariants(&events);
    assert_eq!(count(&events, EventType::Plan), 1);
    assert_eq!(count(&events, EventType::Search), 1);
    assert_eq!(count(&events, EventType::AnalyzeComplete), 1);
    assert_eq!(count(&events, EventType::Decision), 1);
    assert_eq!(count(&events, EventType::ReportComplete), 1);

    let search = events.iter().find(|e| e.event_type == EventType::Search).unwrap();
    assert_eq!(search.details["count"], 2);
    let analyzed = events
        .iter()
        .find(|e| e.event_type == EventType::AnalyzeComplete)
        .unwrap();
    assert_eq!(analyzed.details["iteration"], 1);
    let decision = events.iter().find(|e| e.event_type == EventType::Decision).unwrap();
    assert_eq!(decision.details["decision"], "finish");

    let job = handle.snapshot().await;
    assert_eq!(job.progress, 100);
    let report = job.result.unwrap();
    assert!(report.contains("## Sources"));
    assert!(report.contains("https://a.example/1"));
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let r = runner(
        Duration::ZERO,
        sources(vec!["https://a.example/1"], Duration::ZERO),
    );
    let handle = r.submit(submission(2)).await.unwrap();
    let mut last = 0;
    loop {
        let job = handle.snapshot().await;
        assert!(job.progress >= last, "progress went from {} to {}", last, job.progress);
        last = job.progress;
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(last, 100);
}

#[tokio::test]
async fn test_deadline_produces_timeout_with_result() {
    let r = runner(
        Duration::from_millis(200),
        sources(vec!["https://a.example/1"], Duration::ZERO),
    )
    .with_deadline(Duration::from_millis(100));
    let handle = r.submit(submission(3)).await.unwrap();
    assert_eq!(wait_terminal(&handle).await, JobStatus::Timeout);

    let events = handle.events_from(0).await;
    assert_log_invariants(&events);
    let timeout = events.last().unwrap();
    assert_eq!(timeout.event_type, EventType::Timeout);
    assert_eq!(timeout.details["error"], "timeout");
    assert!(!timeout.details["result"].as_str().unwrap().is_empty());

    let job = handle.snapshot().await;
    assert_eq!(job.error.as_deref(), Some("timeout"));
    assert!(!job.result.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_during_search_stops_before_report() {
    let r = runner(
        Duration::ZERO,
        sources(vec!["https://a.example/1"], Duration::from_millis(150)),
    );
    let handle = r.submit(submission(3)).await.unwrap();

    // 等第一个 plan 事件出现后再取消
    for _ in 0..200 {
        if handle.event_count().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(handle.cancel("research cancelled by user").await);
    assert!(handle.cancel_token().is_cancelled());
    assert!(!handle.cancel("again").await);

    // 让流水线跑到下一个检查点
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.status().await, JobStatus::Cancelled);

    let events = handle.events_from(0).await;
    assert_log_invariants(&events);
    assert_eq!(events.last().unwrap().event_type, EventType::Cancelled);
    assert_eq!(count(&events, EventType::Report), 0);
    assert_eq!(count(&events, EventType::ReportComplete), 0);
}

#[tokio::test]
async fn test_empty_search_still_analyzes_and_decides() {
    let r = runner(Duration::ZERO, sources(vec![], Duration::ZERO));
    let handle = r.submit(submission(1)).await.unwrap();
    assert_eq!(wait_terminal(&handle).await, JobStatus::Completed);

    let events = handle.events_from(0).await;
    assert_log_invariants(&events);
    let search = events.iter().find(|e| e.event_type == EventType::Search).unwrap();
    assert_eq!(search.details["count"], 0);
    assert_eq!(count(&events, EventType::Extract), 0);
    assert_eq!(count(&events, EventType::AnalyzeComplete), 1);
    assert_eq!(count(&events, EventType::Decision), 1);
}

#[tokio::test]
async fn test_multi_round_sources_are_unique() {
    let r = runner(
        Duration::ZERO,
        sources(
            vec!["https://shared.example/x", "https://shared.example/y"],
            Duration::ZERO,
        ),
    );
    let handle = r.submit(submission(3)).await.unwrap();
    assert_eq!(wait_terminal(&handle).await, JobStatus::Completed);

    let events = handle.events_from(0).await;
    assert_log_invariants(&events);
    assert_eq!(count(&events, EventType::Plan), 3);
    let report = events.iter().find(|e| e.event_type == EventType::Report).unwrap();
    assert_eq!(report.details["sourcesCount"], 2);

    let job = handle.snapshot().await;
    assert!(job.has_partial_result());
    let result = job.result.clone().unwrap();
    let cited: Vec<_> = result
        .lines()
        .filter(|l| l.contains("https://shared.example/"))
        .collect();
    let unique: HashSet<_> = cited.iter().collect();
    assert_eq!(cited.len(), unique.len());
}
