use crate::error::ChatError;
use crate::models::*;
use crate::session::CredentialSource;
use crate::stream::{ByteStream, EventStream};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 流式聊天接口路径
pub const CHAT_STREAM_PATH: &str = "/api/v1/ai/chat/stream";
/// 会话列表/详情/删除接口路径
pub const CONVERSATIONS_PATH: &str = "/api/v1/ai/conversations";

/// AIDE+ 后端的 REST 客户端。
///
/// 凭证通过 [`CredentialSource`] 注入，每次请求时读取，
/// 这样登录/登出后无需重建客户端。
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl ApiClient {
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialSource>) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url, credentials)
    }

    pub fn with_http_client(
        http: reqwest::Client,
        base_url: &str,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        // 安全处理 URL，去掉末尾的 '/'
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 取出 `Authorization` 头的值，没有凭证时直接失败，不发请求
    fn bearer(&self) -> Result<String, ChatError> {
        self.credentials
            .bearer_token()
            .map(|token| format!("Bearer {}", token))
            .ok_or(ChatError::Auth)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ChatError> {
        let response = request
            .header(AUTHORIZATION, self.bearer()?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), url = %response.url(), "request rejected");
            return Err(ChatError::Network {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// 打开一次流式对话。
    ///
    /// # 参数
    /// * `message` - 已去除首尾空白的非空用户输入。
    /// * `conversation_id` - 续聊时携带的会话 ID，首轮为 `None`。
    ///
    /// # 错误
    /// 没有凭证时返回 [`ChatError::Auth`]；连接失败或状态码非 2xx 时返回网络错误。
    pub async fn open_chat_stream(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<EventStream<ByteStream>, ChatError> {
        // 1. 构造请求体，续聊时带上会话 ID
        let body = ChatRequest {
            message: message.to_string(),
            conversation_id: conversation_id.map(str::to_string),
        };

        // 2. 发送 POST 请求
        let request = self
            .http
            .post(self.url(CHAT_STREAM_PATH))
            .header(ACCEPT, "text/event-stream")
            .json(&body);
        let response = self.send(request).await?;

        debug!(
            conversation_id = ?conversation_id,
            status = response.status().as_u16(),
            "chat stream opened"
        );

        // 3. 获取响应字节流，交给事件读取器
        let body: ByteStream = Box::pin(response.bytes_stream());
        Ok(EventStream::new(body))
    }

    /// 获取当前用户的会话列表。
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        let response = self.send(self.http.get(self.url(CONVERSATIONS_PATH))).await?;
        let list: Vec<ConversationSummary> = response.json().await?;
        debug!(count = list.len(), "conversation list fetched");
        Ok(list)
    }

    /// 获取单个会话及其历史消息。
    pub async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ChatError> {
        let url = format!("{}/{}", self.url(CONVERSATIONS_PATH), id);
        let response = self.send(self.http.get(url)).await?;
        Ok(response.json().await?)
    }

    /// 删除会话。
    pub async fn delete_conversation(&self, id: &str) -> Result<(), ChatError> {
        let url = format!("{}/{}", self.url(CONVERSATIONS_PATH), id);
        self.send(self.http.delete(url)).await?;
        info!(conversation_id = %id, "conversation deleted");
        Ok(())
    }
}
