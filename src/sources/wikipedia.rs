//! 百科来源：Wikipedia 检索 API + 条目正文抽取

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use super::text::{collapse_whitespace, strip_tags, truncate_chars, TRUNCATION_MARKER};
use super::{ContentFetcher, FetchedContent, SourceAdapter, SourceHit, SourceType};

/// 这些小节不计入正文
const SKIPPED_SECTIONS: &[&str] = &[
    "References",
    "See also",
    "Bibliography",
    "External links",
    "Notes",
    "Further reading",
];

/// 位于这些容器内的元素不计入正文
const SKIPPED_CONTAINERS: &[&str] = &[
    "navbox",
    "vertical-navbox",
    "infobox",
    "sidebar",
    "reflist",
    "references",
    "toc",
    "mw-editsection",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    title: String,
    #[serde(default)]
    snippet: String,
}

pub struct WikipediaAdapter {
    client: Client,
    base_url: String,
    max_results: usize,
}

impl WikipediaAdapter {
    pub fn new(client: Client, lang: &str, max_results: usize) -> Self {
        Self {
            client,
            base_url: format!("https://{}.wikipedia.org", lang),
            max_results,
        }
    }

    async fn query(&self, query: &str, limit: usize) -> Result<SearchResponse, String> {
        let limit = limit.min(self.max_results).max(1).to_string();
        let resp = self
            .client
            .get(format!("{}/w/api.php", self.base_url))
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("format", "json"),
                ("srlimit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("status {}", resp.status().as_u16()));
        }
        resp.json().await.map_err(|e| format!("invalid JSON: {}", e))
    }
}

/// 条目标题 → 页面 URL（空格转下划线后百分号编码）
pub fn article_url(base_url: &str, title: &str) -> String {
    format!(
        "{}/wiki/{}",
        base_url,
        urlencoding::encode(&title.replace(' ', "_"))
    )
}

fn to_hits(base_url: &str, resp: SearchResponse, limit: usize) -> Vec<SourceHit> {
    resp.query
        .map(|q| q.search)
        .unwrap_or_default()
        .into_iter()
        .take(limit)
        .map(|e| {
            let url = article_url(base_url, &e.title);
            SourceHit::new(SourceType::Encyclopedic, e.title, url, strip_tags(&e.snippet))
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for WikipediaAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Encyclopedic
    }

    async fn search(&self, query: &str, limit: usize) -> Vec<SourceHit> {
        match self.query(query, limit).await {
            Ok(resp) => to_hits(&self.base_url, resp, limit),
            Err(e) => {
                tracing::warn!(error = %e, "Wikipedia search failed");
                vec![SourceHit::failed(
                    SourceType::Encyclopedic,
                    format!("Wikipedia search failed: {}", e),
                )]
            }
        }
    }
}

/// Wikipedia 条目抓取：段落、小节标题与列表项，去掉脚注编号
pub struct WikipediaFetcher {
    client: Client,
    max_chars: usize,
    lang: String,
}

impl WikipediaFetcher {
    pub fn new(client: Client, lang: &str, max_chars: usize) -> Self {
        Self {
            client,
            max_chars,
            lang: lang.to_string(),
        }
    }
}

#[async_trait]
impl ContentFetcher for WikipediaFetcher {
    async fn fetch(&self, url: &str) -> FetchedContent {
        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                return FetchedContent::failed(format!("Error fetching Wikipedia page: {}", e))
            }
        };
        if !resp.status().is_success() {
            return FetchedContent::failed(format!(
                "Error fetching Wikipedia page: status {}",
                resp.status().as_u16()
            ));
        }
        match resp.text().await {
            Ok(html) => {
                let (title, content) = extract_article(&html);
                tracing::debug!(url = %url, lang = %self.lang, chars = content.chars().count(), "Extracted Wikipedia article");
                FetchedContent::ok(
                    Some(title),
                    truncate_chars(&content, self.max_chars, TRUNCATION_MARKER),
                )
            }
            Err(e) => FetchedContent::failed(format!("Error reading Wikipedia page: {}", e)),
        }
    }
}

fn in_skipped_container(el: &ElementRef<'_>) -> bool {
    el.ancestors().filter_map(ElementRef::wrap).any(|a| {
        let v = a.value();
        v.name() == "table" || v.classes().any(|c| SKIPPED_CONTAINERS.contains(&c)) || v.id() == Some("toc")
    })
}

/// 返回 (标题, 正文)
pub fn extract_article(html: &str) -> (String, String) {
    let doc = Html::parse_document(html);

    let title = Selector::parse("#firstHeading")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Wikipedia article".to_string());

    let Ok(blocks) = Selector::parse(
        "#mw-content-text p, #mw-content-text h2, #mw-content-text h3, #mw-content-text h4, #mw-content-text li",
    ) else {
        return (title, String::new());
    };
    let refs = Regex::new(r"\[(\d+|\w+ \d+|edit)\]").ok();

    let mut parts: Vec<String> = Vec::new();
    let mut skipping_section = false;
    for el in doc.select(&blocks) {
        if in_skipped_container(&el) {
            continue;
        }
        let mut text = collapse_whitespace(&el.text().collect::<String>());
        if let Some(re) = &refs {
            text = collapse_whitespace(&re.replace_all(&text, ""));
        }
        if text.is_empty() {
            continue;
        }

        match el.value().name() {
            "h2" | "h3" | "h4" => {
                skipping_section = SKIPPED_SECTIONS.iter().any(|s| text.starts_with(s));
                if !skipping_section {
                    parts.push(format!("## {}", text));
                }
            }
            "li" if !skipping_section => parts.push(format!("- {}", text)),
            _ if !skipping_section => parts.push(text),
            _ => {}
        }
    }

    (title, parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_url_encodes_title() {
        assert_eq!(
            article_url("https://en.wikipedia.org", "Rust (programming language)"),
            "https://en.wikipedia.org/wiki/Rust_%28programming_language%29"
        );
    }

    #[test]
    fn test_search_response_to_hits() {
        let body = r#"{"batchcomplete":"","query":{"search":[
            {"ns":0,"title":"Borrow checker","snippet":"The <span class=\"searchmatch\">borrow</span> checker"}
        ]}}"#;
        let resp: SearchResponse = serde_json::from_str(body).unwrap();
        let hits = to_hits("https://en.wikipedia.org", resp, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet, "The borrow checker");
        assert_eq!(hits[0].url, "https://en.wikipedia.org/wiki/Borrow_checker");
        assert_eq!(hits[0].source_type, SourceType::Encyclopedic);
    }

    #[test]
    fn test_empty_search_response() {
        let resp: SearchResponse = serde_json::from_str(r#"{"batchcomplete":""}"#).unwrap();
        assert!(to_hits("https://en.wikipedia.org", resp, 1).is_empty());
    }

    #[test]
    fn test_extract_article_sections_and_refs() {
        let html = r#"<html><body>
            <h1 id="firstHeading">Rust</h1>
            <div id="mw-content-text">
              <table class="infobox"><tr><td><p>Infobox noise</p></td></tr></table>
              <p>Rust is a language.[1]</p>
              <h2>History<span class="mw-editsection">[edit]</span></h2>
              <p>Started in 2006.[2][3]</p>
              <ul><li>First item</li></ul>
              <h2>References</h2>
              <ol class="references"><li>Ref one</li></ol>
              <p>Trailing reference text</p>
            </div>
        </body></html>"#;
        let (title, content) = extract_article(html);
        assert_eq!(title, "Rust");
        assert!(content.contains("Rust is a language."));
        assert!(!content.contains("[1]"));
        assert!(content.contains("## History"));
        assert!(content.contains("Started in 2006."));
        assert!(content.contains("- First item"));
        assert!(!content.contains("Infobox noise"));
        assert!(!content.contains("Ref one"));
        assert!(!content.contains("Trailing reference text"));
    }
}
