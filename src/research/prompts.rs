//! 研究流水线各阶段的提示词

use crate::research::state::{PlannedQuery, SiteSummary, Source};
use crate::sources::SourceType;

/// 分析阶段的分组顺序
const ANALYSIS_GROUP_ORDER: [SourceType; 3] = [
    SourceType::General,
    SourceType::Encyclopedic,
    SourceType::Academic,
];

/// 第 3 轮起改写查询
pub fn refine_query(query: &str, analysis: &str) -> String {
    format!(
        r#"Original research query: "{query}"

Analysis produced so far:
"{analysis}"

Write a new, specific and refined search query that retrieves complementary information not yet covered above.
Avoid angles that have already been explored; focus on new, deeper or secondary aspects that would enrich the understanding of the topic.

Return only the new search query text, without explanations or comments."#
    )
}

/// 按来源类型选择摘要提示词
pub fn summarize(
    source_type: SourceType,
    query: &str,
    title: &str,
    url: &str,
    content: &str,
) -> String {
    let instructions = match source_type {
        SourceType::Academic => {
            r#"You are reading an academic paper. Summarize it for a technical audience:
1. Research question and motivation
2. Methodology and experimental setup
3. Key results, with concrete numbers where available
4. Limitations and how the work relates to the research query"#
        }
        SourceType::Encyclopedic => {
            r#"You are reading an encyclopedia article. Summarize it as reference material:
1. Core definition and context
2. Historical background and key milestones
3. Main concepts, categories or components
4. Facts most relevant to the research query"#
        }
        SourceType::General => {
            r#"You are reading a web page. Summarize it:
1. Main points relevant to the research query
2. Concrete data, statistics or examples
3. Opinions or claims, attributed to their authors
4. Anything that contradicts or qualifies other common views"#
        }
    };

    format!(
        r#"Research query: "{query}"

Document: {title}
URL: {url}

{instructions}

Base the summary only on the content below.

--- CONTENT ---
{content}
--- END CONTENT ---"#
    )
}

/// 把最近窗口的摘要按 通用 / 百科 / 学术 分组拼成一段文本
pub fn consolidate(summaries: &[SiteSummary]) -> String {
    let mut out = String::new();
    for source_type in ANALYSIS_GROUP_ORDER {
        let group: Vec<&SiteSummary> = summaries
            .iter()
            .filter(|s| s.source_type == source_type)
            .collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("### {}\n\n", source_type.label()));
        for (i, s) in group.iter().enumerate() {
            out.push_str(&format!(
                "--- DOCUMENT {} ---\nTitle: {}\nURL: {}\nSummary:\n{}\n\n",
                i + 1,
                s.title,
                s.url,
                s.summary
            ));
        }
    }
    if out.is_empty() {
        out.push_str("(No documents have been summarized so far.)\n");
    }
    out
}

pub fn analyze(query: &str, consolidated: &str, previous_analysis: &str) -> String {
    let previous = if previous_analysis.trim().is_empty() {
        "No previous analysis."
    } else {
        previous_analysis
    };
    format!(
        r#"Original query: "{query}"

Most recent summaries, grouped by source type:
{consolidated}

Previous analysis:
"{previous}"

Based on the summaries above, complete the following tasks:

1. **Consolidate findings**: organize the relevant information into topics, with a detailed summary for each.
2. **Identify gaps**: point out which aspects of the original query are still unanswered or insufficiently explored, and what should be researched next.
3. **Comparative insights**: synthesize the main insights across source types, noting where web, encyclopedic and academic sources agree or differ. Include specific data and facts.

Be detailed and ground every statement in the summaries."#
    )
}

/// 报告中的引用块（按来源类型分组）
pub fn citations(sources: &[Source]) -> String {
    let mut out = String::new();
    for source_type in SourceType::ALL {
        let group: Vec<&Source> = sources
            .iter()
            .filter(|s| s.source_type == source_type)
            .collect();
        if group.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("**{}**\n", source_type.label()));
        for s in group {
            out.push_str(&format!("- {} ({})\n", s.title, s.url));
        }
    }
    out
}

pub fn report(query: &str, search_queries: &[PlannedQuery], analysis: &str, citations: &str) -> String {
    format!(
        r#"**Original research query:**
"{query}"

**Search queries used during the investigation:**
{queries}

**Consolidated analysis:**
{analysis}

**Sources consulted:**
{citations}

Write the final research report following these guidelines:

1. Open with a direct, structured answer to the original query.
2. Organize the report into sections, integrating what each source type (web, encyclopedic, academic) contributed.
3. For each section, write a synthesis of 200 to 600 words with concrete data found during the research.
4. Cite the sources inline and always include their links.
5. Close with a synthesis of the main findings and the open questions that remain."#,
        queries = search_queries
            .iter()
            .map(|q| format!("- {} ({})", q.query, q.mode))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}
