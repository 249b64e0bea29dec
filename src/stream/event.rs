//! 把事件负载解析成 [`StreamEvent`]。
//!
//! 判定优先级：`error` 为限流哨兵 > `content` 字符串 > `conversationId`。
//! 负载不是合法 JSON 时返回 `None`，调用方跳过该记录继续读流。

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{StreamEvent, UpgradeSignal};

/// 服务端在额度用尽时下发的错误哨兵。
pub const LIMIT_EXCEEDED: &str = "limit_exceeded";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPayload {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    current: Option<Value>,
    #[serde(default)]
    limit: Option<Value>,
    #[serde(default)]
    tier: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    conversation_id: Option<Value>,
}

pub fn interpret(payload: &str) -> Option<StreamEvent> {
    let raw: RawPayload = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, len = payload.len(), "skipping malformed stream payload");
            return None;
        }
    };

    match raw.error.as_ref() {
        Some(Value::String(code)) if code == LIMIT_EXCEEDED => {
            return Some(StreamEvent::RateLimited(UpgradeSignal {
                current: counter(raw.current.as_ref()),
                limit: counter(raw.limit.as_ref()),
                tier: match raw.tier {
                    Some(Value::String(tier)) => tier,
                    _ => String::new(),
                },
            }));
        }
        Some(Value::Null) | None => {}
        Some(other) => warn!(error = %other, "server reported an unknown stream error"),
    }

    if let Some(Value::String(content)) = raw.content {
        return Some(StreamEvent::ContentFragment(content));
    }

    match raw.conversation_id {
        Some(Value::String(id)) => Some(StreamEvent::ConversationAssigned(id)),
        Some(Value::Number(id)) => Some(StreamEvent::ConversationAssigned(id.to_string())),
        _ => None,
    }
}

/// 计数字段是 JSON number，整数或浮点都接受；缺失或类型不对时为 0
fn counter(value: Option<&Value>) -> i64 {
    value
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or_default()
}
