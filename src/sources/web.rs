//! 通用网页来源：SearXNG JSON 检索 + 页面正文抽取
//!
//! 正文抽取按以下顺序回退，直到拿到至少 1000 字符：
//! 1. 主内容区候选（article / main / *content* / *article* / *post* / *body*），取其中最长且 >100 字符者
//! 2. 所有 >20 字符的 `<p>` 拼接
//! 3. 整个 body 的可读文本
//!
//! 导航、页眉页脚、脚本等样板元素在三步中都不计入文本。

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use serde::Deserialize;

use super::text::{collapse_whitespace, truncate_chars, TRUNCATION_MARKER};
use super::{ContentFetcher, FetchedContent, SourceAdapter, SourceHit, SourceType};

/// 抽取结果低于此长度时继续回退
pub const MIN_USEFUL_CHARS: usize = 1000;

const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "aside", "iframe", "form", "button", "meta",
    "link", "noscript",
];

const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    r#"div[role="main"]"#,
    r#"div[class*="content"]"#,
    r#"div[id*="content"]"#,
    r#"div[class*="article"]"#,
    r#"div[id*="article"]"#,
    r#"div[class*="post"]"#,
    r#"div[id*="post"]"#,
    r#"div[class*="body"]"#,
    r#"div[id*="body"]"#,
    r#"section[class*="content"]"#,
    r#"section[id*="content"]"#,
];

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// SearXNG 检索：按顺序尝试各实例，第一个返回非空结果的实例胜出
pub struct SearxngAdapter {
    client: Client,
    endpoints: Vec<String>,
}

impl SearxngAdapter {
    pub fn new(client: Client, base_urls: Vec<String>) -> Self {
        let endpoints = base_urls
            .into_iter()
            .map(|u| {
                let u = u.trim_end_matches('/');
                if u.ends_with("/search") {
                    u.to_string()
                } else {
                    format!("{}/search", u)
                }
            })
            .collect();
        Self { client, endpoints }
    }

    async fn try_endpoint(&self, endpoint: &str, query: &str) -> Result<Vec<SearxngResult>, String> {
        let url = format!("{}?q={}&format=json", endpoint, urlencoding::encode(query));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: SearxngResponse = resp
            .json()
            .await
            .map_err(|e| format!("invalid JSON: {}", e))?;
        Ok(body.results)
    }
}

fn to_hits(results: Vec<SearxngResult>, limit: usize) -> Vec<SourceHit> {
    results
        .into_iter()
        .filter(|r| !r.url.is_empty())
        .take(limit)
        .map(|r| {
            let title = if r.title.trim().is_empty() {
                r.url.clone()
            } else {
                collapse_whitespace(&r.title)
            };
            SourceHit::new(SourceType::General, title, r.url, collapse_whitespace(&r.content))
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for SearxngAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::General
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<SourceHit> {
        if self.endpoints.is_empty() {
            return vec![SourceHit::failed(
                SourceType::General,
                "web search failed: no SearXNG instance configured",
            )];
        }

        let mut last_error = String::new();
        for endpoint in &self.endpoints {
            match self.try_endpoint(endpoint, query).await {
                Ok(results) if !results.is_empty() => {
                    tracing::debug!(endpoint = %endpoint, count = results.len(), "SearXNG results");
                    return to_hits(results, limit);
                }
                Ok(_) => {
                    last_error = format!("{} returned no results", endpoint);
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "SearXNG instance failed");
                    last_error = format!("{}: {}", endpoint, e);
                }
            }
        }
        vec![SourceHit::failed(
            SourceType::General,
            format!("web search failed: {}", last_error),
        )]
    }
}

/// 通用网页抓取：下载 HTML 并抽取正文
pub struct WebPageFetcher {
    client: Client,
    max_chars: usize,
}

impl WebPageFetcher {
    pub fn new(client: Client, max_chars: usize) -> Self {
        Self { client, max_chars }
    }
}

#[async_trait]
impl ContentFetcher for WebPageFetcher {
    async fn fetch(&self, url: &str) -> FetchedContent {
        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return FetchedContent::failed(format!("Error fetching page: {}", e)),
        };
        if !resp.status().is_success() {
            return FetchedContent::failed(format!(
                "Error fetching page: status {}",
                resp.status().as_u16()
            ));
        }
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return FetchedContent::failed(format!("Error reading page: {}", e)),
        };

        let (title, content) = extract_page(&body);
        let content = truncate_chars(&content, self.max_chars, TRUNCATION_MARKER);
        let len = content.chars().count();
        if len < MIN_USEFUL_CHARS {
            tracing::warn!(url = %url, chars = len, "Little content extracted");
        } else {
            tracing::debug!(url = %url, chars = len, "Extracted page content");
        }
        FetchedContent::ok(title, content)
    }
}

fn is_boilerplate(node: &Node) -> bool {
    node.as_element()
        .map(|e| BOILERPLATE_TAGS.contains(&e.name()))
        .unwrap_or(false)
}

/// 元素内的可读文本，跳过样板子树
fn readable_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        if let Node::Text(text) = node.value() {
            if node.ancestors().any(|a| is_boilerplate(a.value())) {
                continue;
            }
            out.push_str(text);
            out.push(' ');
        }
    }
    collapse_whitespace(&out)
}

fn select_all<'a>(doc: &'a Html, selector: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(selector) {
        Ok(sel) => doc.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

/// 返回 (标题, 正文)
pub fn extract_page(html: &str) -> (Option<String>, String) {
    let html = html.trim_start_matches('\u{FEFF}');
    let doc = Html::parse_document(html);

    let title = select_all(&doc, "title")
        .first()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let mut content = CONTENT_SELECTORS
        .iter()
        .flat_map(|s| select_all(&doc, s))
        .filter(|el| !el.ancestors().any(|a| is_boilerplate(a.value())))
        .map(readable_text)
        .filter(|t| t.chars().count() > 100)
        .max_by_key(|t| t.chars().count())
        .unwrap_or_default();

    if content.chars().count() < MIN_USEFUL_CHARS {
        let paragraphs: Vec<String> = select_all(&doc, "p")
            .into_iter()
            .filter(|p| !p.ancestors().any(|a| is_boilerplate(a.value())))
            .map(readable_text)
            .filter(|t| t.chars().count() > 20)
            .collect();
        if !paragraphs.is_empty() {
            content = paragraphs.join(" ");
        }
    }

    if content.chars().count() < MIN_USEFUL_CHARS {
        if let Some(body) = select_all(&doc, "body").first() {
            let text = readable_text(*body);
            if !text.is_empty() {
                content = text;
            }
        }
    }

    if content.is_empty() {
        // 非 HTML 或解析不到 body 时交给 html2text
        content = match html2text::from_read(html.as_bytes(), 120) {
            Ok(text) => collapse_whitespace(&text),
            Err(_) => String::new(),
        };
    }

    (title, content)
}
