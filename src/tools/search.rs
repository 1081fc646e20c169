//! Search 工具：DuckDuckGo 即时回答接口
//!
//! GET `{endpoint}?q=...&format=json&no_html=1&skip_disambig=1`，把摘要、结果与相关主题拍平成列表，
//! 取前 max_results 条格式化为文本。网络失败同样返回文本，不中断对话。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::memory::ToolOutput;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::Tool;

const BODY_PREVIEW_CHARS: usize = 200;

/// duckduckgo_search 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// The search query
    pub query: String,
    /// Maximum number of results to return (default: 3)
    #[serde(default)]
    pub max_results: Option<usize>,
}

/// 即时回答接口的响应（只取用到的字段）
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstantAnswer {
    pub heading: String,
    pub abstract_text: String,
    #[serde(rename = "AbstractURL")]
    pub abstract_url: String,
    pub results: Vec<Topic>,
    pub related_topics: Vec<Topic>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Topic {
    pub text: String,
    #[serde(rename = "FirstURL")]
    pub first_url: String,
    /// 分组主题（嵌套）
    pub topics: Vec<Topic>,
}

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub href: String,
    pub body: String,
}

pub struct SearchTool {
    client: Client,
    endpoint: String,
    default_max_results: usize,
}

impl SearchTool {
    pub fn new(endpoint: &str, timeout_secs: u64, default_max_results: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(concat!("forager/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: endpoint.to_string(),
            default_max_results: default_max_results.max(1),
        }
    }

    async fn fetch(&self, query: &str) -> Result<InstantAnswer, reqwest::Error> {
        self.client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<InstantAnswer>()
            .await
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "duckduckgo_search"
    }

    fn description(&self) -> &str {
        "Search the web using DuckDuckGo. Returns titles, links and short summaries."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<SearchArgs>()
    }

    fn examples(&self) -> Vec<String> {
        vec![
            "search for latest Rust news".to_string(),
            "find information about axum".to_string(),
        ]
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, String> {
        let args: SearchArgs = parse_args(args)?;
        let max = args.max_results.unwrap_or(self.default_max_results).max(1);
        let text = match self.fetch(&args.query).await {
            Ok(answer) => format_results(&args.query, &collect_hits(&answer, max)),
            Err(e) => {
                tracing::warn!(query = %args.query, error = %e, "search request failed");
                format!("Error searching for '{}': {e}", args.query)
            }
        };
        Ok(ToolOutput::text(text))
    }
}

/// 摘要 → Results → RelatedTopics（展开分组），最多 max 条
pub fn collect_hits(answer: &InstantAnswer, max: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    if !answer.abstract_text.trim().is_empty() {
        hits.push(SearchHit {
            title: if answer.heading.is_empty() {
                answer.abstract_text.chars().take(60).collect()
            } else {
                answer.heading.clone()
            },
            href: answer.abstract_url.clone(),
            body: answer.abstract_text.clone(),
        });
    }

    fn walk(topics: &[Topic], out: &mut Vec<SearchHit>) {
        for topic in topics {
            if !topic.topics.is_empty() {
                walk(&topic.topics, out);
            } else if !topic.text.is_empty() {
                let title = topic
                    .text
                    .split_once(" - ")
                    .map(|(t, _)| t.to_string())
                    .unwrap_or_else(|| topic.text.chars().take(60).collect());
                out.push(SearchHit {
                    title,
                    href: topic.first_url.clone(),
                    body: topic.text.clone(),
                });
            }
        }
    }
    walk(&answer.results, &mut hits);
    walk(&answer.related_topics, &mut hits);
    hits.truncate(max);
    hits
}

pub fn format_results(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for query: {query}");
    }
    let mut out = format!("Search results for '{query}':\n\n");
    for (i, hit) in hits.iter().enumerate() {
        let body: String = hit.body.chars().take(BODY_PREVIEW_CHARS).collect();
        out.push_str(&format!(
            "{}. {}\n   {}\n   {}...\n\n",
            i + 1,
            hit.title,
            hit.href,
            body
        ));
    }
    out
}
