//! # 错误类型模块
//!
//! 客户端所有可失败操作统一返回 `Result<T, ChatError>`。
//!
//! 注意：限流（额度用尽）不是错误，它通过 `StreamEvent::RateLimited`
//! 作为控制流信号传递；流中格式错误的 JSON 记录也不会成为错误，
//! 只会被记录日志后跳过。

use thiserror::Error;

/// 发送失败时展示给用户的通用提示（不暴露内部原因）。
pub const SEND_FAILED_MESSAGE: &str = "Impossible d'envoyer le message. Veuillez réessayer.";

/// 流式回复失败时写入错误气泡的通用内容。
pub const REPLY_FAILED_MESSAGE: &str =
    "Désolé, une erreur est survenue. Veuillez réessayer dans quelques instants.";

#[derive(Debug, Error)]
pub enum ChatError {
    /// 会话中没有可用的 Bearer 凭证，请求未发出。
    /// 服务端返回的 401 与其他非 2xx 一样归为 [`ChatError::Network`]。
    #[error("missing or invalid credential")]
    Auth,

    /// 服务端返回了非 2xx 状态码。
    #[error("server responded with status {status}")]
    Network { status: u16 },

    /// 连接失败、读取响应体中断等 HTTP 层错误。
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 当前视图已有一个正在进行的流，拒绝并发发送。
    #[error("a reply is already streaming for this conversation")]
    Busy,

    /// 去除首尾空白后消息为空。
    #[error("message is empty")]
    EmptyMessage,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// 网络层失败（发送前或流式过程中），对应 UI 上的错误气泡。
    pub fn is_network(&self) -> bool {
        matches!(self, ChatError::Network { .. } | ChatError::Transport(_))
    }

    /// 返回给用户看的提示语，内部细节只进日志。
    pub fn user_message(&self) -> &'static str {
        if self.is_network() {
            REPLY_FAILED_MESSAGE
        } else {
            SEND_FAILED_MESSAGE
        }
    }
}
