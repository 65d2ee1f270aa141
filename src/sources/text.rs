//! 文本清洗：空白折叠、截断、去标签、XML 实体解码

use scraper::Html;

pub const TRUNCATION_MARKER: &str = "... [content truncated]";

/// 把任意空白序列折叠成单个空格
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 按字符数截断（不会切断 UTF-8 字符），超出时追加 marker
pub fn truncate_chars(s: &str, max_chars: usize, marker: &str) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str(marker);
    out
}

/// 去掉 HTML 片段中的标签（检索接口返回的高亮 snippet）
pub fn strip_tags(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    collapse_whitespace(&doc.root_element().text().collect::<String>())
}

/// Atom / XML 中常见实体
pub fn decode_xml_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
