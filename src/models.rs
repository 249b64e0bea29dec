//! # 数据模型模块
//!
//! 该模块定义了聊天助手客户端使用的核心数据结构，涵盖聊天消息、
//! 会话、升级提示信号、请求体以及流式事件。
//!
//! 主要配合 `serde` 库进行 JSON 数据解析，字段命名与服务端保持一致（camelCase）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 消息发送者的角色。
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 代表对话中的一条消息。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// 消息 ID：乐观插入的消息由客户端生成，已持久化的消息由服务端生成。
    pub id: String,
    pub role: Role,
    /// 消息正文，助手消息在流式输出期间不断增长。
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// 仍在追加内容时为 `true`。
    #[serde(default)]
    pub is_streaming: bool,
    /// 流式输出失败时为 `true`。
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    /// 用户刚提交的消息（客户端生成 ID）。
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            is_streaming: false,
            is_error: false,
        }
    }

    /// 空的助手占位消息，收到响应时插入。
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            is_streaming: true,
            is_error: false,
        }
    }
}

/// 一个会话：服务端在首次回复时分配 ID，之后的轮次复用该 ID。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conversation {
    /// 服务端分配前为 `None`。
    pub id: Option<String>,
    /// 按插入顺序排列的消息。
    pub messages: Vec<ChatMessage>,
}

impl Conversation {
    /// 当前正在流式输出的消息（同一会话最多一条）。
    pub fn streaming_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.is_streaming)
    }
}

/// 会话列表中的一项（来自 `GET /api/v1/ai/conversations`）。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// 单个会话详情（来自 `GET /api/v1/ai/conversations/{id}`）。
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// 额度用尽时由服务端在流中下发的升级提示。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UpgradeSignal {
    /// 被拒绝时已使用的次数。
    pub current: i64,
    /// 当前套餐的额度上限。
    pub limit: i64,
    /// 当前订阅档位（如 "free"、"basic"）。
    pub tier: String,
}

/// `POST /api/v1/ai/chat/stream` 的请求体。
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    /// 首轮对话时为空，序列化时跳过。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// 事件解释器的输出：在解析边界上一次性确定类型，下游不再检查字段。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// 助手回复的一个增量片段。
    ContentFragment(String),
    /// 服务端为本次对话分配的会话 ID。
    ConversationAssigned(String),
    /// 额度用尽，流应立即终止。
    RateLimited(UpgradeSignal),
}
