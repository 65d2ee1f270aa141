//! 学术来源：arXiv 查询 API（Atom）+ 摘要页解析

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};

use super::text::{collapse_whitespace, decode_xml_entities, truncate_chars, TRUNCATION_MARKER};
use super::{ContentFetcher, FetchedContent, SourceAdapter, SourceHit, SourceType};

const SNIPPET_CHARS: usize = 200;

pub struct ArxivAdapter {
    client: Client,
    api_url: String,
    max_results: usize,
}

impl ArxivAdapter {
    pub fn new(client: Client, api_url: String, max_results: usize) -> Self {
        Self {
            client,
            api_url,
            max_results,
        }
    }

    async fn query(&self, query: &str, limit: usize) -> Result<String, String> {
        let max = limit.min(self.max_results).max(1).to_string();
        let search = format!("all:{}", query);
        let resp = self
            .client
            .get(&self.api_url)
            .query(&[
                ("search_query", search.as_str()),
                ("start", "0"),
                ("max_results", max.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("status {}", resp.status().as_u16()));
        }
        resp.text().await.map_err(|e| format!("read body: {}", e))
    }
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Academic
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<SourceHit> {
        match self.query(query, limit).await {
            Ok(feed) => match parse_feed(&feed) {
                Ok(mut hits) => {
                    hits.truncate(limit);
                    hits
                }
                Err(e) => vec![SourceHit::failed(
                    SourceType::Academic,
                    format!("arXiv search failed: {}", e),
                )],
            },
            Err(e) => {
                tracing::warn!(error = %e, "arXiv search failed");
                vec![SourceHit::failed(
                    SourceType::Academic,
                    format!("arXiv search failed: {}", e),
                )]
            }
        }
    }
}

fn regex(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| e.to_string())
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| collapse_whitespace(&decode_xml_entities(m.as_str())))
}

/// 解析 Atom feed；条目 URL 优先取 pdf 链接改写成的摘要页，没有时用 `<id>`
pub fn parse_feed(feed: &str) -> Result<Vec<SourceHit>, String> {
    let entry_re = regex(r"(?s)<entry>(.*?)</entry>")?;
    let title_re = regex(r"(?s)<title[^>]*>(.*?)</title>")?;
    let summary_re = regex(r"(?s)<summary[^>]*>(.*?)</summary>")?;
    let id_re = regex(r"(?s)<id>(.*?)</id>")?;
    let link_re = regex(r"<link\s[^>]*>")?;
    let href_re = regex(r#"href="([^"]+)""#)?;

    let mut hits = Vec::new();
    for entry in entry_re.captures_iter(feed).filter_map(|c| c.get(1)) {
        let entry = entry.as_str();
        let Some(title) = capture(&title_re, entry) else {
            continue;
        };

        let pdf = link_re
            .find_iter(entry)
            .map(|m| m.as_str())
            .find(|tag| tag.contains(r#"title="pdf""#))
            .and_then(|tag| capture(&href_re, tag));
        let url = match pdf {
            Some(pdf) => to_abs_url(&pdf),
            None => match capture(&id_re, entry) {
                Some(id) => id,
                None => continue,
            },
        };

        let summary = capture(&summary_re, entry).unwrap_or_else(|| "No abstract".to_string());
        let snippet = truncate_chars(&summary, SNIPPET_CHARS, "...");
        hits.push(SourceHit::new(SourceType::Academic, title, url, snippet));
    }
    Ok(hits)
}

/// PDF 链接 → 摘要页链接
pub fn to_abs_url(url: &str) -> String {
    let url = url.replace("/pdf/", "/abs/");
    url.strip_suffix(".pdf").map(str::to_string).unwrap_or(url)
}

/// arXiv 摘要页抓取：标题、作者、日期、分类、摘要
pub struct ArxivFetcher {
    client: Client,
    max_chars: usize,
}

impl ArxivFetcher {
    pub fn new(client: Client, max_chars: usize) -> Self {
        Self { client, max_chars }
    }
}

#[async_trait]
impl ContentFetcher for ArxivFetcher {
    async fn fetch(&self, url: &str) -> FetchedContent {
        let url = to_abs_url(url);
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return FetchedContent::failed(format!("Error fetching arXiv page: {}", e)),
        };
        if !resp.status().is_success() {
            return FetchedContent::failed(format!(
                "Error fetching arXiv page: status {}",
                resp.status().as_u16()
            ));
        }
        match resp.text().await {
            Ok(html) => {
                let (title, content) = extract_abstract_page(&html, &url);
                FetchedContent::ok(
                    Some(title),
                    truncate_chars(&content, self.max_chars, TRUNCATION_MARKER),
                )
            }
            Err(e) => FetchedContent::failed(format!("Error reading arXiv page: {}", e)),
        }
    }
}

fn texts(doc: &Html, selector: &str) -> Vec<String> {
    Selector::parse(selector)
        .map(|sel| {
            doc.select(&sel)
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// 返回 (标题, 结构化正文)
pub fn extract_abstract_page(html: &str, url: &str) -> (String, String) {
    let doc = Html::parse_document(html);
    let first = |selector: &str| texts(&doc, selector).into_iter().next().unwrap_or_default();

    let mut title = first(".title").trim_start_matches("Title:").trim().to_string();
    if title.is_empty() {
        title = "arXiv paper".to_string();
    }
    let authors = texts(&doc, ".authors a").join(", ");
    let abstract_text = first(".abstract").trim_start_matches("Abstract:").trim().to_string();
    let categories = texts(&doc, ".tablecell.subjects .arxiv-link").join(", ");
    let date = first(".dateline");

    let content = format!(
        "Title: {}\n\nAuthors: {}\n\nDate: {}\n\nCategories: {}\n\nAbstract:\n{}\n\nURL: {}",
        title, authors, date, categories, abstract_text, url
    );
    (title, content)
}
