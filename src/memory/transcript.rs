//! 对话记录（Transcript）：只追加的有序消息日志
//!
//! 消息是四种角色（system / human / ai / tool_result）的封闭枚举；
//! tool_result 必须回答最近一条 ai 消息中尚未回答的调用，所有调用回答完之前不能再问模型。
//! 不提供删除与修改，重置会话即丢弃整个 Transcript。

use std::borrow::Cow;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 旧式文本哨兵：URL 图片
pub const IMAGE_URL_SENTINEL: &str = "IMAGE_URL_READY:";
/// 旧式文本哨兵：本地图片（`data:<mime>;base64,<data>|<filename>`）
pub const LOCAL_IMAGE_SENTINEL: &str = "LOCAL_IMAGE_READY:";

/// 图片来源：远程 URL 或内嵌 base64 数据
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    Url {
        url: String,
    },
    Inline {
        mime_type: String,
        /// base64 编码（不含 data: 前缀）
        data: String,
        filename: String,
    },
}

impl ImageSource {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn inline(
        mime_type: impl Into<String>,
        data: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self::Inline {
            mime_type: mime_type.into(),
            data: data.into(),
            filename: filename.into(),
        }
    }

    /// 供视觉模型使用的 URL（内嵌图片转为 data URL）
    pub fn data_url(&self) -> String {
        match self {
            Self::Url { url } => url.clone(),
            Self::Inline {
                mime_type, data, ..
            } => format!("data:{mime_type};base64,{data}"),
        }
    }

    /// 简短描述，用于包装视觉回答
    pub fn describe(&self) -> String {
        match self {
            Self::Url { url } => format!("Image from URL: {url}"),
            Self::Inline { filename, .. } => format!("Local image: {filename}"),
        }
    }

    /// 工具产出图片时交给视觉模型的默认指令
    pub fn analysis_instruction(&self) -> String {
        match self {
            Self::Url { .. } => {
                "Please analyze this image and describe what you see in detail.".to_string()
            }
            Self::Inline { filename, .. } => format!(
                "Please analyze this local image ({filename}) and describe what you see in detail. \
                 Include information about objects, people, colors, composition, and any text visible in the image."
            ),
        }
    }

    /// 解析 `data:<mime>;base64,<data>`
    fn from_data_url(data_url: &str, filename: &str) -> Option<Self> {
        let rest = data_url.strip_prefix("data:")?;
        let (mime_type, data) = rest.split_once(";base64,")?;
        if mime_type.is_empty() || data.is_empty() {
            return None;
        }
        Some(Self::inline(mime_type, data, filename))
    }
}

/// 工具输出：普通文本，或可供视觉分支分析的图片
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    Text(String),
    ImageReady(ImageSource),
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// 从纯文本构造；识别旧式哨兵前缀，其余原样作为文本
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        if let Some(url) = text.strip_prefix(IMAGE_URL_SENTINEL) {
            let url = url.trim();
            if !url.is_empty() {
                return Self::ImageReady(ImageSource::url(url));
            }
        }
        if let Some(rest) = text.strip_prefix(LOCAL_IMAGE_SENTINEL) {
            let (data_url, filename) = match rest.split_once('|') {
                Some((d, f)) => (d, f),
                None => (rest, "unknown"),
            };
            if let Some(image) = ImageSource::from_data_url(data_url.trim(), filename.trim()) {
                return Self::ImageReady(image);
            }
        }
        Self::Text(text)
    }

    pub fn as_image(&self) -> Option<&ImageSource> {
        match self {
            Self::ImageReady(image) => Some(image),
            Self::Text(_) => None,
        }
    }

    /// 交给文本模型的内容；图片不内联 base64，只给出简短说明
    pub fn model_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::ImageReady(ImageSource::Url { url }) => {
                Cow::Owned(format!("Image ready for analysis: {url}"))
            }
            Self::ImageReady(ImageSource::Inline { filename, .. }) => {
                Cow::Owned(format!("Local image ready for analysis: {filename}"))
            }
        }
    }
}

/// 模型发起的待执行工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub call_id: String,
    pub name: String,
    /// JSON 对象形式的参数
    #[serde(default)]
    pub arguments: Value,
}

impl PendingToolCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Human,
    Ai,
    ToolResult,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    Human {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageSource>,
    },
    Ai {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<PendingToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        name: String,
        output: ToolOutput,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::Human {
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn human_with_images(content: impl Into<String>, images: Vec<ImageSource>) -> Self {
        Self::Human {
            content: content.into(),
            images,
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::Ai {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn ai_with_tool_calls(content: impl Into<String>, tool_calls: Vec<PendingToolCall>) -> Self {
        Self::Ai {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        output: ToolOutput,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            output,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::Human { .. } => Role::Human,
            Self::Ai { .. } => Role::Ai,
            Self::ToolResult { .. } => Role::ToolResult,
        }
    }

    /// 文本内容（tool_result 为交给模型的文本）
    pub fn content(&self) -> Cow<'_, str> {
        match self {
            Self::System { content } | Self::Human { content, .. } | Self::Ai { content, .. } => {
                Cow::Borrowed(content)
            }
            Self::ToolResult { output, .. } => output.model_text(),
        }
    }

    pub fn tool_calls(&self) -> &[PendingToolCall] {
        match self {
            Self::Ai { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }
}

/// Transcript 不变量被破坏
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("tool result '{0}' does not answer any outstanding tool call")]
    OrphanToolResult(String),

    #[error("system message must be the first message")]
    MisplacedSystem,

    #[error("{count} tool call(s) still outstanding: {ids}")]
    OutstandingCalls { count: usize, ids: String },

    #[error("duplicate tool call id '{0}' in one batch")]
    DuplicateCallId(String),
}

/// 单个会话的对话记录
#[derive(Clone, Debug, Default, Serialize)]
pub struct Transcript {
    messages: Vec<Message>,
    /// 最近一条 ai 消息中尚未回答的 call_id（按列出顺序）
    #[serde(skip)]
    outstanding: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以第一条用户消息开局
    pub fn with_human(content: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::human(content)],
            outstanding: Vec::new(),
        }
    }

    /// 追加消息；破坏调用/结果对应关系时返回错误且不修改记录
    pub fn append(&mut self, message: Message) -> Result<(), TranscriptError> {
        match &message {
            Message::System { .. } => {
                if !self.messages.is_empty() {
                    return Err(TranscriptError::MisplacedSystem);
                }
            }
            Message::Human { .. } => self.require_settled()?,
            Message::Ai { tool_calls, .. } => {
                self.require_settled()?;
                let mut seen = HashSet::new();
                for call in tool_calls {
                    if !seen.insert(call.call_id.as_str()) {
                        return Err(TranscriptError::DuplicateCallId(call.call_id.clone()));
                    }
                }
                self.outstanding = tool_calls.iter().map(|c| c.call_id.clone()).collect();
            }
            Message::ToolResult { tool_call_id, .. } => {
                let pos = self
                    .outstanding
                    .iter()
                    .position(|id| id == tool_call_id)
                    .ok_or_else(|| TranscriptError::OrphanToolResult(tool_call_id.clone()))?;
                self.outstanding.remove(pos);
            }
        }
        self.messages.push(message);
        Ok(())
    }

    fn require_settled(&self) -> Result<(), TranscriptError> {
        if self.outstanding.is_empty() {
            Ok(())
        } else {
            Err(TranscriptError::OutstandingCalls {
                count: self.outstanding.len(),
                ids: self.outstanding.join(", "),
            })
        }
    }

    /// 若没有 system 消息则插入到最前面；返回是否插入
    pub fn ensure_system_prompt(&mut self, prompt: &str) -> bool {
        if matches!(self.messages.first(), Some(Message::System { .. })) {
            return false;
        }
        self.messages.insert(0, Message::system(prompt));
        true
    }

    /// 最近一条 ai 消息中尚未回答的调用（按列出顺序）
    pub fn outstanding_calls(&self) -> Vec<PendingToolCall> {
        if self.outstanding.is_empty() {
            return Vec::new();
        }
        self.messages
            .iter()
            .rev()
            .find(|m| m.role() == Role::Ai)
            .map(|m| {
                m.tool_calls()
                    .iter()
                    .filter(|c| self.outstanding.contains(&c.call_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 用同一段文本回答所有未完成调用（上一轮被中途放弃时使用）；返回补齐的条数
    pub fn resolve_outstanding(&mut self, reason: &str) -> Result<usize, TranscriptError> {
        let calls = self.outstanding_calls();
        for call in &calls {
            self.append(Message::tool_result(
                call.call_id.clone(),
                call.name.clone(),
                ToolOutput::text(reason),
            ))?;
        }
        Ok(calls.len())
    }

    /// 最后一条不含待执行调用、内容非空的 ai 消息
    pub fn final_answer(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Ai {
                content,
                tool_calls,
            } if tool_calls.is_empty() && !content.trim().is_empty() => Some(content.as_str()),
            _ => None,
        })
    }

    /// 当前这一轮：从最近一条 human 消息到末尾
    pub fn current_exchange(&self) -> &[Message] {
        let start = self
            .messages
            .iter()
            .rposition(|m| m.role() == Role::Human)
            .unwrap_or(0);
        &self.messages[start..]
    }

    pub fn system_prompt(&self) -> Option<&str> {
        match self.messages.first() {
            Some(Message::System { content }) => Some(content),
            _ => None,
        }
    }

    pub fn last_human(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role() == Role::Human)
    }

    /// 给模型用的不可变副本
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> PendingToolCall {
        PendingToolCall::new(id, name, json!({}))
    }

    #[test]
    fn test_tool_result_must_match_outstanding_call() {
        let mut t = Transcript::with_human("hi");
        t.append(Message::ai_with_tool_calls("", vec![call("a", "calculator")]))
            .unwrap();
        let err = t
            .append(Message::tool_result("zzz", "calculator", ToolOutput::text("x")))
            .unwrap_err();
        assert_eq!(err, TranscriptError::OrphanToolResult("zzz".into()));
        assert_eq!(t.len(), 2);

        t.append(Message::tool_result("a", "calculator", ToolOutput::text("4")))
            .unwrap();
        // 同一个 id 不能回答两次
        let err = t
            .append(Message::tool_result("a", "calculator", ToolOutput::text("4")))
            .unwrap_err();
        assert!(matches!(err, TranscriptError::OrphanToolResult(_)));
    }

    #[test]
    fn test_orphan_tool_result_without_ai() {
        let mut t = Transcript::with_human("hi");
        assert!(t
            .append(Message::tool_result("a", "x", ToolOutput::text("y")))
            .is_err());
    }

    #[test]
    fn test_ai_blocked_while_calls_outstanding() {
        let mut t = Transcript::with_human("hi");
        t.append(Message::ai_with_tool_calls(
            "",
            vec![call("a", "x"), call("b", "y")],
        ))
        .unwrap();
        t.append(Message::tool_result("b", "y", ToolOutput::text("ok")))
            .unwrap();
        match t.append(Message::ai("done")).unwrap_err() {
            TranscriptError::OutstandingCalls { count, ids } => {
                assert_eq!(count, 1);
                assert_eq!(ids, "a");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(t.append(Message::human("again")).is_err());
    }

    #[test]
    fn test_duplicate_call_ids_rejected() {
        let mut t = Transcript::with_human("hi");
        let err = t
            .append(Message::ai_with_tool_calls("", vec![call("a", "x"), call("a", "y")]))
            .unwrap_err();
        assert_eq!(err, TranscriptError::DuplicateCallId("a".into()));
        assert!(t.outstanding_calls().is_empty());
    }

    #[test]
    fn test_system_only_first() {
        let mut t = Transcript::new();
        t.append(Message::system("sys")).unwrap();
        assert!(matches!(
            t.append(Message::system("again")),
            Err(TranscriptError::MisplacedSystem)
        ));
    }

    #[test]
    fn test_ensure_system_prompt_inserts_once() {
        let mut t = Transcript::with_human("hi");
        assert!(t.ensure_system_prompt("sys"));
        assert!(!t.ensure_system_prompt("other"));
        assert_eq!(t.system_prompt(), Some("sys"));
        assert_eq!(t.messages()[1].role(), Role::Human);
    }

    #[test]
    fn test_outstanding_calls_in_listed_order() {
        let mut t = Transcript::with_human("hi");
        t.append(Message::ai_with_tool_calls(
            "",
            vec![call("1", "a"), call("2", "b"), call("3", "c")],
        ))
        .unwrap();
        t.append(Message::tool_result("2", "b", ToolOutput::text("ok")))
            .unwrap();
        let ids: Vec<_> = t
            .outstanding_calls()
            .into_iter()
            .map(|c| c.call_id)
            .collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn test_resolve_outstanding_settles_transcript() {
        let mut t = Transcript::with_human("hi");
        t.append(Message::ai_with_tool_calls("", vec![call("1", "a"), call("2", "b")]))
            .unwrap();
        assert_eq!(t.resolve_outstanding("cancelled").unwrap(), 2);
        assert!(t.outstanding_calls().is_empty());
        t.append(Message::human("next")).unwrap();
    }

    #[test]
    fn test_final_answer_skips_tool_call_messages() {
        let mut t = Transcript::with_human("hi");
        assert_eq!(t.final_answer(), None);
        t.append(Message::ai_with_tool_calls("thinking", vec![call("1", "a")]))
            .unwrap();
        assert_eq!(t.final_answer(), None);
        t.append(Message::tool_result("1", "a", ToolOutput::text("r")))
            .unwrap();
        t.append(Message::ai("the answer")).unwrap();
        assert_eq!(t.final_answer(), Some("the answer"));
    }

    #[test]
    fn test_current_exchange_starts_at_last_human() {
        let mut t = Transcript::with_human("first");
        t.append(Message::ai("a1")).unwrap();
        t.append(Message::human("second")).unwrap();
        t.append(Message::ai("a2")).unwrap();
        let ex = t.current_exchange();
        assert_eq!(ex.len(), 2);
        assert_eq!(ex[0].content(), "second");
    }

    #[test]
    fn test_sentinel_parsing() {
        let out = ToolOutput::from_text("IMAGE_URL_READY:https://example.com/cat.png");
        assert_eq!(
            out.as_image(),
            Some(&ImageSource::url("https://example.com/cat.png"))
        );

        let out = ToolOutput::from_text("LOCAL_IMAGE_READY:data:image/png;base64,AAAA|cat.png");
        assert_eq!(
            out.as_image(),
            Some(&ImageSource::inline("image/png", "AAAA", "cat.png"))
        );

        let out = ToolOutput::from_text("LOCAL_IMAGE_READY:garbage");
        assert!(out.as_image().is_none());

        let out = ToolOutput::from_text("Result: 4");
        assert_eq!(out, ToolOutput::text("Result: 4"));
    }

    #[test]
    fn test_model_text_hides_inline_data() {
        let out = ToolOutput::ImageReady(ImageSource::inline("image/png", "AAAA", "cat.png"));
        assert_eq!(out.model_text(), "Local image ready for analysis: cat.png");
        assert_eq!(
            ImageSource::inline("image/png", "AAAA", "cat.png").data_url(),
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn test_message_serialization_roles() {
        let m = Message::tool_result("c1", "calculator", ToolOutput::text("Result: 4"));
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "tool_result");
        assert_eq!(v["tool_call_id"], "c1");
        let back: Message = serde_json::from_value(v).unwrap();
        assert_eq!(back, m);
    }
}
