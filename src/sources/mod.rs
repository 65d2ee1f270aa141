//! 信息源：检索适配器与正文抓取器
//!
//! 每种来源类型（通用网页 / 学术 / 百科）对应一对实现：
//! - `SourceAdapter::search`：查询 → 候选结果列表
//! - `ContentFetcher::fetch`：URL → 抽取后的正文
//!
//! 失败一律以数据返回（`error` 字段），从不以 Err / panic 打断流水线。
//! 流水线在 SEARCH 阶段按当前模式选定一对实现，之后不再根据 URL 猜测来源。

pub mod arxiv;
pub mod http;
pub mod text;
pub mod web;
pub mod wikipedia;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SourcesSection;

pub use arxiv::{ArxivAdapter, ArxivFetcher};
pub use web::{SearxngAdapter, WebPageFetcher};
pub use wikipedia::{WikipediaAdapter, WikipediaFetcher};

/// 来源类型，同时也是 SEARCH 阶段的检索模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    General,
    Academic,
    Encyclopedic,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [
        SourceType::General,
        SourceType::Academic,
        SourceType::Encyclopedic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::General => "general",
            SourceType::Academic => "academic",
            SourceType::Encyclopedic => "encyclopedic",
        }
    }

    /// 报告与提示词中使用的分组标题
    pub fn label(&self) -> &'static str {
        match self {
            SourceType::General => "General web sources",
            SourceType::Academic => "Academic sources (arXiv)",
            SourceType::Encyclopedic => "Encyclopedic sources (Wikipedia)",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 检索返回的候选条目；`error` 为 Some 时表示这次检索失败，条目只携带诊断信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source_type: SourceType,
    pub error: Option<String>,
}

impl SourceHit {
    pub fn new(
        source_type: SourceType,
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            source_type,
            error: None,
        }
    }

    pub fn failed(source_type: SourceType, message: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            url: String::new(),
            snippet: String::new(),
            source_type,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// 抓取结果；失败时 content 为诊断文本且 `error = true`
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedContent {
    pub title: Option<String>,
    pub content: String,
    pub error: bool,
}

impl FetchedContent {
    pub fn ok(title: Option<String>, content: impl Into<String>) -> Self {
        Self {
            title,
            content: content.into(),
            error: false,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            title: None,
            content: message.into(),
            error: true,
        }
    }
}

/// 检索适配器
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// 最多返回 limit 条；失败时返回带 error 的条目
    async fn search(&self, query: &str, limit: usize) -> Vec<SourceHit>;
}

/// 正文抓取器
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchedContent;
}

/// 一种来源类型的检索 + 抓取实现
#[derive(Clone)]
pub struct SourceBinding {
    pub adapter: Arc<dyn SourceAdapter>,
    pub fetcher: Arc<dyn ContentFetcher>,
}

/// 来源类型 → 实现 的映射，由 SEARCH 阶段查询
#[derive(Clone, Default)]
pub struct SourceSet {
    bindings: HashMap<SourceType, SourceBinding>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（或替换）一种来源；来源类型取自适配器自身
    pub fn with(
        mut self,
        adapter: Arc<dyn SourceAdapter>,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> Self {
        self.bindings
            .insert(adapter.source_type(), SourceBinding { adapter, fetcher });
        self
    }

    pub fn binding(&self, source_type: SourceType) -> Option<&SourceBinding> {
        self.bindings.get(&source_type)
    }

    pub fn source_types(&self) -> Vec<SourceType> {
        SourceType::ALL
            .into_iter()
            .filter(|t| self.bindings.contains_key(t))
            .collect()
    }

    /// 按配置创建三种真实来源（SearXNG / arXiv / Wikipedia），共用一个 HTTP 客户端
    pub fn from_config(cfg: &SourcesSection) -> Self {
        let client = http::build_http_client(cfg);
        Self::new()
            .with(
                Arc::new(SearxngAdapter::new(client.clone(), cfg.resolved_searxng_urls())),
                Arc::new(WebPageFetcher::new(client.clone(), cfg.max_content_chars)),
            )
            .with(
                Arc::new(ArxivAdapter::new(
                    client.clone(),
                    cfg.arxiv_api_url.clone(),
                    cfg.arxiv_max_results,
                )),
                Arc::new(ArxivFetcher::new(client.clone(), cfg.max_content_chars)),
            )
            .with(
                Arc::new(WikipediaAdapter::new(
                    client.clone(),
                    &cfg.wikipedia_lang,
                    cfg.wikipedia_max_results,
                )),
                Arc::new(WikipediaFetcher::new(
                    client,
                    &cfg.wikipedia_lang,
                    cfg.max_content_chars,
                )),
            )
    }
}
