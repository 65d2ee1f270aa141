//! SSE 进度流
//!
//! 连接建立后先发 `connected`，随后按序转发事件日志（每条带 `id = sequenceIndex`），
//! 每转发若干条补一个心跳注释，空闲时由 KeepAlive 定时发心跳。
//! 转发到终止事件、或超过最长连接时间后关闭；关闭前发 `disconnected`。
//! 客户端可用 `Last-Event-ID` 头或 `?cursor=N` 从第 N 条之后续传。

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::jobs::{EventType, JobHandle, ResearchEvent};
use crate::web::AppState;

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// 最后收到的事件序号
    pub cursor: Option<usize>,
}

/// 连接本地生成的事件（不入日志、不带 id）
fn local_event(event_type: EventType, message: &str, details: serde_json::Value) -> Event {
    let payload = json!({
        "type": event_type,
        "message": message,
        "timestamp": Utc::now(),
        "details": details,
    });
    Event::default()
        .event(event_type.as_str())
        .data(payload.to_string())
}

fn log_event(event: &ResearchEvent) -> Event {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(event.sequence_index.to_string())
        .event(event.event_type.as_str())
        .data(payload)
}

fn heartbeat() -> Event {
    Event::default().comment("heartbeat")
}

/// 续传位置：Last-Event-ID 优先，其次 ?cursor=N；都没有时从头重放
pub fn resume_position(headers: &HeaderMap, params: &StreamParams) -> usize {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
        .or(params.cursor)
        .map(|last_seen| last_seen.saturating_add(1))
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Relaying,
    Closing,
    Done,
}

struct Relay {
    handle: Arc<JobHandle>,
    appended: watch::Receiver<usize>,
    cursor: usize,
    pending: VecDeque<Event>,
    relayed: usize,
    heartbeat_every: usize,
    deadline: Instant,
    phase: Phase,
}

impl Relay {
    /// 拉取 cursor 之后的事件放入待发队列；遇到终止事件时进入关闭阶段
    async fn pull(&mut self) -> bool {
        // 先标记已读，再读日志，避免漏掉两者之间的追加
        self.appended.borrow_and_update();
        let events = self.handle.events_from(self.cursor).await;
        if events.is_empty() {
            return false;
        }
        for event in events {
            self.cursor = event.sequence_index + 1;
            self.pending.push_back(log_event(&event));
            self.relayed += 1;
            if self.heartbeat_every > 0 && self.relayed % self.heartbeat_every == 0 {
                self.pending.push_back(heartbeat());
            }
            if event.event_type.is_terminal() {
                self.phase = Phase::Closing;
                break;
            }
        }
        true
    }

    async fn expire(&mut self) {
        tracing::info!(job_id = %self.handle.id(), "Stream lifetime exceeded");
        self.pending.push_back(local_event(
            EventType::Timeout,
            "Stream lifetime exceeded",
            json!({}),
        ));
        let job = self.handle.snapshot().await;
        if job.has_partial_result() {
            self.pending.push_back(local_event(
                EventType::Complete,
                "Research partially completed before the stream timed out",
                json!({ "result": job.partial_result, "partial": true }),
            ));
        }
        self.phase = Phase::Closing;
    }

    async fn next(mut self) -> Option<(Result<Event, Infallible>, Self)> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some((Ok(event), self));
            }
            match self.phase {
                Phase::Done => return None,
                Phase::Closing => {
                    self.phase = Phase::Done;
                    tracing::info!(job_id = %self.handle.id(), "Stream closed");
                    let event = local_event(
                        EventType::Disconnected,
                        "Stream finished",
                        json!({ "jobId": self.handle.id() }),
                    );
                    return Some((Ok(event), self));
                }
                Phase::Relaying => {
                    if self.pull().await {
                        continue;
                    }
                    tokio::select! {
                        changed = self.appended.changed() => {
                            // 发送端已释放
                            if changed.is_err() {
                                self.phase = Phase::Closing;
                            }
                        }
                        _ = tokio::time::sleep_until(self.deadline) => self.expire().await,
                    }
                }
            }
        }
    }
}

/// GET /research/stream/:id
pub async fn research_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Sse<EventStream> {
    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.stream.heartbeat_secs))
        .text("heartbeat");

    let Some(handle) = state.registry.get(&id).await else {
        tracing::warn!(job_id = %id, "Stream requested for unknown research");
        let only = local_event(EventType::Error, "research not found", json!({ "jobId": id }));
        let body: EventStream = stream::iter([Ok(only)]).boxed();
        return Sse::new(body).keep_alive(keep_alive);
    };

    let cursor = resume_position(&headers, &params);
    tracing::info!(job_id = %id, cursor, "Stream connected");

    let mut pending = VecDeque::new();
    pending.push_back(local_event(
        EventType::Connected,
        "Connected to research event stream",
        json!({ "jobId": id, "cursor": cursor }),
    ));

    let relay = Relay {
        appended: handle.subscribe(),
        handle,
        cursor,
        pending,
        relayed: 0,
        heartbeat_every: state.stream.heartbeat_every_events,
        deadline: Instant::now() + Duration::from_secs(state.stream.max_lifetime_secs),
        phase: Phase::Relaying,
    };

    let body: EventStream = stream::unfold(relay, Relay::next).boxed();
    Sse::new(body).keep_alive(keep_alive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_resume_position() {
        let mut headers = HeaderMap::new();
        assert_eq!(resume_position(&headers, &StreamParams::default()), 0);
        assert_eq!(
            resume_position(&headers, &StreamParams { cursor: Some(4) }),
            5
        );
        headers.insert("last-event-id", HeaderValue::from_static("9"));
        assert_eq!(
            resume_position(&headers, &StreamParams { cursor: Some(4) }),
            10
        );
    }

    #[test]
    fn test_resume_position_saturates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "last-event-id",
            HeaderValue::from_static("18446744073709551615"),
        );
        assert_eq!(
            resume_position(&headers, &StreamParams::default()),
            usize::MAX
        );
        assert_eq!(
            resume_position(&HeaderMap::new(), &StreamParams { cursor: Some(usize::MAX) }),
            usize::MAX
        );
    }
}
