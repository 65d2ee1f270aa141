//! 单个研究任务的瞬态状态（只属于一个编排器实例，不共享）

use std::collections::HashSet;

use regex::RegexBuilder;
use serde::Serialize;

use crate::sources::SourceType;

/// 检索模式与来源类型一一对应
pub type SearchMode = SourceType;

/// 第 3 轮起按 iteration % 4 轮换，通用 : 学术 : 百科 = 2 : 1 : 1
pub const MODE_SCHEDULE: [SearchMode; 4] = [
    SourceType::General,
    SourceType::Academic,
    SourceType::General,
    SourceType::Encyclopedic,
];

/// 前三轮固定覆盖三种来源，之后才开始改写查询
pub const FIXED_ROUNDS: usize = 3;

pub fn mode_for_iteration(iteration: usize) -> SearchMode {
    match iteration {
        0 => SourceType::General,
        1 => SourceType::Academic,
        2 => SourceType::Encyclopedic,
        n => MODE_SCHEDULE[n % MODE_SCHEDULE.len()],
    }
}

/// 检索条目 + 抓取正文
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source_type: SourceType,
    pub content: String,
    pub error: bool,
}

impl SearchResult {
    /// 只有抓取成功且正文非空的条目才进入摘要
    pub fn is_usable(&self) -> bool {
        !self.error && !self.content.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummary {
    pub title: String,
    pub url: String,
    pub source_type: SourceType,
    pub summary: String,
}

/// 一轮规划选定的查询与检索模式
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedQuery {
    pub query: String,
    pub mode: SearchMode,
}

/// 报告引用的来源（按 URL 去重后）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub title: String,
    pub url: String,
    pub source_type: SourceType,
}

#[derive(Debug, Clone)]
pub struct ResearchState {
    pub query: String,
    pub iteration: usize,
    pub max_iterations: usize,
    pub search_queries: Vec<PlannedQuery>,
    pub search_results: Vec<SearchResult>,
    /// search_results 中已交给 SUMMARIZE 的条目数
    pub summarized_results: usize,
    pub site_summaries: Vec<SiteSummary>,
    pub cumulative_analysis: String,
    pub current_search_mode: SearchMode,
    pub current_query: String,
    pub sources: Vec<Source>,
}

impl ResearchState {
    pub fn new(query: impl Into<String>, max_iterations: usize) -> Self {
        let query = query.into();
        Self {
            current_query: query.clone(),
            query,
            iteration: 0,
            max_iterations,
            search_queries: Vec::new(),
            search_results: Vec::new(),
            summarized_results: 0,
            site_summaries: Vec::new(),
            cumulative_analysis: String::new(),
            current_search_mode: SourceType::General,
            sources: Vec::new(),
        }
    }

    /// 只追加，不改写已有分析
    pub fn append_analysis(&mut self, fragment: &str) {
        if !self.cumulative_analysis.is_empty() {
            self.cumulative_analysis.push_str("\n\n");
        }
        self.cumulative_analysis.push_str(fragment);
    }

    /// 所有成功抓取的条目按 URL 去重，保持首次出现的顺序
    pub fn unique_sources(&self) -> Vec<Source> {
        let mut seen = HashSet::new();
        self.search_results
            .iter()
            .filter(|r| !r.error && !r.url.is_empty())
            .filter(|r| seen.insert(r.url.clone()))
            .map(|r| Source {
                title: if r.title.is_empty() {
                    r.url.clone()
                } else {
                    r.title.clone()
                },
                url: r.url.clone(),
                source_type: r.source_type,
            })
            .collect()
    }

    /// 字面充分性判定：长度超过阈值且以完整词组形式包含标记短语（大小写不敏感）
    ///
    /// "insufficient information" 不算命中。
    pub fn is_sufficient(&self, min_chars: usize, marker: &str) -> bool {
        if self.cumulative_analysis.chars().count() <= min_chars {
            return false;
        }
        let pattern = format!(r"\b{}\b", regex::escape(marker.trim()));
        match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(re) => re.is_match(&self.cumulative_analysis),
            Err(e) => {
                tracing::warn!(marker = %marker, error = %e, "Invalid sufficiency marker");
                false
            }
        }
    }
}
