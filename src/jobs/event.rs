//! 任务事件：类型集合、事件记录与每个任务的只追加事件日志

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 事件类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Plan,
    Search,
    SearchComplete,
    Extract,
    ExtractDetail,
    SiteSummary,
    Analyze,
    AnalyzeComplete,
    Decision,
    Report,
    ReportComplete,
    Complete,
    Error,
    Timeout,
    Cancelled,
    /// 以下两种只由流式连接本地生成，不写入日志
    Connected,
    Disconnected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Plan => "plan",
            EventType::Search => "search",
            EventType::SearchComplete => "search_complete",
            EventType::Extract => "extract",
            EventType::ExtractDetail => "extract_detail",
            EventType::SiteSummary => "site_summary",
            EventType::Analyze => "analyze",
            EventType::AnalyzeComplete => "analyze_complete",
            EventType::Decision => "decision",
            EventType::Report => "report",
            EventType::ReportComplete => "report_complete",
            EventType::Complete => "complete",
            EventType::Error => "error",
            EventType::Timeout => "timeout",
            EventType::Cancelled => "cancelled",
            EventType::Connected => "connected",
            EventType::Disconnected => "disconnected",
        }
    }

    /// 终止事件：每个任务恰好一个，之后不再追加
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::Complete | EventType::Error | EventType::Timeout | EventType::Cancelled
        )
    }

    /// 进度启发式：按事件类型推进，终态前封顶 90
    pub fn progress_after(&self, current: u8) -> u8 {
        let next = match self {
            EventType::Plan | EventType::Search => current.saturating_add(5),
            EventType::Analyze => current.saturating_add(10),
            EventType::Report => 90,
            _ => current,
        };
        next.min(90).max(current)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条进度事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchEvent {
    pub job_id: String,
    pub sequence_index: usize,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// 追加被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendRejected {
    /// 日志已有终止事件
    Closed,
    /// 连接本地事件不入日志
    StreamLocal,
}

/// 单个任务的事件日志：只追加，序号从 0 严格递增，终止事件之后拒绝追加
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<ResearchEvent>,
    closed: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        job_id: &str,
        event_type: EventType,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Result<&ResearchEvent, AppendRejected> {
        if self.closed {
            return Err(AppendRejected::Closed);
        }
        if matches!(event_type, EventType::Connected | EventType::Disconnected) {
            return Err(AppendRejected::StreamLocal);
        }
        let event = ResearchEvent {
            job_id: job_id.to_string(),
            sequence_index: self.events.len(),
            event_type,
            message: message.into(),
            timestamp: Utc::now(),
            details,
        };
        self.closed = event_type.is_terminal();
        self.events.push(event);
        Ok(&self.events[self.events.len() - 1])
    }

    /// 序号 >= cursor 的事件
    pub fn from_cursor(&self, cursor: usize) -> Vec<ResearchEvent> {
        self.events.get(cursor..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn count_of(&self, event_type: EventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequence_indices_increase() {
        let mut log = EventLog::new();
        for i in 0..3 {
            let e = log.append("j", EventType::Plan, "p", json!({})).unwrap();
            assert_eq!(e.sequence_index, i);
        }
        assert_eq!(log.from_cursor(1).len(), 2);
        assert!(log.from_cursor(10).is_empty());
    }

    #[test]
    fn test_closed_after_terminal() {
        let mut log = EventLog::new();
        log.append("j", EventType::Plan, "p", json!({})).unwrap();
        log.append("j", EventType::Cancelled, "stop", json!({})).unwrap();
        assert!(log.is_closed());
        assert_eq!(
            log.append("j", EventType::Report, "late", json!({})).unwrap_err(),
            AppendRejected::Closed
        );
        assert_eq!(
            log.append("j", EventType::Complete, "late", json!({})).unwrap_err(),
            AppendRejected::Closed
        );
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_stream_local_types_rejected() {
        let mut log = EventLog::new();
        assert_eq!(
            log.append("j", EventType::Connected, "hi", json!({})).unwrap_err(),
            AppendRejected::StreamLocal
        );
        assert!(log.is_empty());
    }

    #[test]
    fn test_progress_heuristic_caps_at_90() {
        assert_eq!(EventType::Plan.progress_after(10), 15);
        assert_eq!(EventType::Analyze.progress_after(85), 90);
        assert_eq!(EventType::Report.progress_after(40), 90);
        assert_eq!(EventType::Extract.progress_after(33), 33);
        // 不回退
        assert_eq!(EventType::Report.progress_after(95), 95);
    }

    #[test]
    fn test_event_serializes_type_tag() {
        let mut log = EventLog::new();
        let e = log
            .append("j", EventType::AnalyzeComplete, "done", json!({"iteration": 1}))
            .unwrap();
        let v = serde_json::to_value(e).unwrap();
        assert_eq!(v["type"], "analyze_complete");
        assert_eq!(v["sequenceIndex"], 0);
        assert_eq!(v["jobId"], "j");
    }
}
