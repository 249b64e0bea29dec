//! # 聊天视图状态机
//!
//! 状态流转：`Idle -> Sending -> Streaming -> {完成 | 出错 | 限流} -> Idle`。
//!
//! - 提交时只允许在 `Idle` 状态下发送非空消息（同一会话同时只有一个流）。
//! - 收到响应后才插入空的助手占位消息（`is_streaming = true`）。
//! - 每个内容片段按顺序拼接到占位消息上。
//! - 完成时清除 `is_streaming`；若服务端首次分配了会话 ID 则采用并刷新会话列表。
//! - 限流时整条占位消息被移除，并弹出升级提示。
//! - 网络错误时占位消息改写为通用错误文本并标记 `is_error`。
//!
//! 三种结束情形都立即回到 `Idle`，用户可以马上发送下一条消息。

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::commands::chat::ApiClient;
use crate::error::{ChatError, REPLY_FAILED_MESSAGE};
use crate::models::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatState {
    /// 可以发送。
    Idle,
    /// 请求已发出，尚未收到响应。
    Sending,
    /// 正在接收回复片段。
    Streaming,
}

/// 一次发送的最终结果。结束后视图总是回到 [`ChatState::Idle`]。
#[derive(Debug)]
pub enum SendOutcome {
    Completed { conversation_id: Option<String> },
    RateLimited(UpgradeSignal),
    Failed(ChatError),
}

/// 界面层的回调。所有方法都有空实现，按需覆盖。
pub trait ChatObserver: Send + Sync {
    /// 占位消息追加了一个片段。
    fn on_content(&self, _fragment: &str, _message: &ChatMessage) {}
    /// 助手消息定稿（正常完成或改写为错误气泡）。
    fn on_reply_finished(&self, _message: &ChatMessage) {}
    /// 需要展示升级提示。
    fn on_upgrade_required(&self, _signal: &UpgradeSignal) {}
    /// 发送失败的提示（toast）。
    fn on_send_failed(&self, _text: &str) {}
    fn on_conversations_refreshed(&self, _conversations: &[ConversationSummary]) {}
}

pub struct NoopObserver;

impl ChatObserver for NoopObserver {}

/// 一个聊天视图：当前会话、消息列表、会话列表缓存和升级提示。
pub struct ChatView {
    client: ApiClient,
    observer: Arc<dyn ChatObserver>,
    state: ChatState,
    conversation: Conversation,
    placeholder_id: Option<String>,
    assigned_id: Option<String>,
    conversations: Vec<ConversationSummary>,
    upgrade_prompt: Option<UpgradeSignal>,
}

impl ChatView {
    pub fn new(client: ApiClient) -> Self {
        Self::with_observer(client, Arc::new(NoopObserver))
    }

    pub fn with_observer(client: ApiClient, observer: Arc<dyn ChatObserver>) -> Self {
        Self {
            client,
            observer,
            state: ChatState::Idle,
            conversation: Conversation::default(),
            placeholder_id: None,
            assigned_id: None,
            conversations: Vec::new(),
            upgrade_prompt: None,
        }
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.conversation.messages
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.id.as_deref()
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn upgrade_prompt(&self) -> Option<&UpgradeSignal> {
        self.upgrade_prompt.as_ref()
    }

    /// 关闭升级提示。
    pub fn dismiss_upgrade_prompt(&mut self) -> Option<UpgradeSignal> {
        self.upgrade_prompt.take()
    }

    /// 发送一条消息并消费整段流式回复。
    ///
    /// 只有守卫失败（已有流在进行、消息为空）时返回 `Err`，此时视图状态不变；
    /// 网络、凭证等失败都已转换成界面状态，以 [`SendOutcome::Failed`] 返回。
    ///
    /// 返回的 future 中途被丢弃（超时、`select!`、任务中止）时按放弃处理：
    /// 已收到的内容保留，视图回到 `Idle`。
    pub async fn send(&mut self, input: &str) -> Result<SendOutcome, ChatError> {
        let message = self.begin_send(input)?;
        let mut view = InFlight(self);
        view.stream_reply(&message).await
    }

    async fn stream_reply(&mut self, message: &str) -> Result<SendOutcome, ChatError> {
        let conversation_id = self.conversation.id.clone();

        let mut events = match self
            .client
            .open_chat_stream(message, conversation_id.as_deref())
            .await
        {
            Ok(events) => events,
            Err(e) => return Ok(self.fail(e)),
        };
        self.start_streaming();

        loop {
            match events.next_event().await {
                Ok(Some(StreamEvent::ContentFragment(fragment))) => self.apply_fragment(&fragment),
                Ok(Some(StreamEvent::ConversationAssigned(id))) => self.assigned_id = Some(id),
                Ok(Some(StreamEvent::RateLimited(signal))) => {
                    // 丢弃读取器，不再读取剩余内容
                    drop(events);
                    return Ok(self.rate_limited(signal));
                }
                Ok(None) => break,
                Err(e) => return Ok(self.fail(e)),
            }
        }

        debug!(bytes = events.bytes_read(), "reply stream finished");
        if self.complete() {
            if let Err(e) = self.refresh_conversations().await {
                warn!(error = %e, "failed to refresh conversation list");
            }
        }
        Ok(SendOutcome::Completed {
            conversation_id: self.conversation.id.clone(),
        })
    }

    /// 从服务端重新拉取会话列表。
    pub async fn refresh_conversations(&mut self) -> Result<(), ChatError> {
        let list = self.client.list_conversations().await?;
        self.conversations = list;
        self.observer.on_conversations_refreshed(&self.conversations);
        Ok(())
    }

    /// 打开已有会话，载入其历史消息。
    pub async fn open_conversation(&mut self, id: &str) -> Result<(), ChatError> {
        if self.state != ChatState::Idle {
            return Err(ChatError::Busy);
        }
        let detail = self.client.get_conversation(id).await?;
        debug!(conversation_id = %detail.id, messages = detail.messages.len(), "conversation opened");
        self.conversation = Conversation {
            id: Some(detail.id),
            messages: detail.messages,
        };
        self.upgrade_prompt = None;
        Ok(())
    }

    /// 删除会话；若删除的是当前打开的会话，视图重置为新对话。
    pub async fn delete_conversation(&mut self, id: &str) -> Result<(), ChatError> {
        self.client.delete_conversation(id).await?;
        self.conversations.retain(|c| c.id != id);
        if self.conversation.id.as_deref() == Some(id) {
            self.new_chat();
        }
        Ok(())
    }

    /// 开始新对话。正在进行的流应先通过 `StreamManager::abandon` 放弃。
    pub fn new_chat(&mut self) {
        self.conversation = Conversation::default();
        self.placeholder_id = None;
        self.assigned_id = None;
        self.upgrade_prompt = None;
        self.state = ChatState::Idle;
    }

    /// 读取任务被中止后收尾：保留已收到的内容，清除流式标记。
    pub fn abandon(&mut self) {
        if let Some(msg) = self.placeholder_mut() {
            msg.is_streaming = false;
        }
        if self.state != ChatState::Idle {
            debug!(state = ?self.state, "in-flight reply abandoned");
        }
        self.placeholder_id = None;
        self.assigned_id = None;
        self.state = ChatState::Idle;
    }

    // ── 状态转换 ─────────────────────────────────────────────────────────────

    /// `Idle -> Sending`：校验输入，乐观插入用户消息。
    fn begin_send(&mut self, input: &str) -> Result<String, ChatError> {
        if self.state != ChatState::Idle {
            return Err(ChatError::Busy);
        }
        let message = input.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        self.conversation.messages.push(ChatMessage::user(message));
        self.upgrade_prompt = None;
        self.assigned_id = None;
        self.state = ChatState::Sending;
        Ok(message.to_string())
    }

    /// `Sending -> Streaming`：插入空占位消息。
    fn start_streaming(&mut self) {
        let placeholder = ChatMessage::assistant_placeholder();
        self.placeholder_id = Some(placeholder.id.clone());
        self.conversation.messages.push(placeholder);
        self.state = ChatState::Streaming;
    }

    fn apply_fragment(&mut self, fragment: &str) {
        let observer = Arc::clone(&self.observer);
        if let Some(msg) = self.placeholder_mut() {
            msg.content.push_str(fragment);
            observer.on_content(fragment, msg);
        }
    }

    /// `Streaming -> Idle`（完成）。返回是否采用了新的会话 ID。
    fn complete(&mut self) -> bool {
        let observer = Arc::clone(&self.observer);
        if let Some(msg) = self.placeholder_mut() {
            msg.is_streaming = false;
            observer.on_reply_finished(msg);
        }
        self.placeholder_id = None;
        self.state = ChatState::Idle;

        match self.assigned_id.take() {
            Some(id) if self.conversation.id.is_none() => {
                info!(conversation_id = %id, "conversation assigned by server");
                self.conversation.id = Some(id);
                true
            }
            Some(id) => {
                debug!(conversation_id = %id, "conversation already has an id, ignoring");
                false
            }
            None => false,
        }
    }

    /// `Streaming -> Idle`（限流）：移除占位消息，展示升级提示。
    fn rate_limited(&mut self, signal: UpgradeSignal) -> SendOutcome {
        info!(
            current = signal.current,
            limit = signal.limit,
            tier = %signal.tier,
            "usage limit reached"
        );
        if let Some(id) = self.placeholder_id.take() {
            self.conversation.messages.retain(|m| m.id != id);
        }
        self.assigned_id = None;
        self.state = ChatState::Idle;
        self.upgrade_prompt = Some(signal.clone());
        self.observer.on_upgrade_required(&signal);
        SendOutcome::RateLimited(signal)
    }

    /// `Sending | Streaming -> Idle`（出错）。
    fn fail(&mut self, error: ChatError) -> SendOutcome {
        let observer = Arc::clone(&self.observer);

        if error.is_network() {
            warn!(error = %error, "chat reply failed");
            match self.placeholder_mut() {
                Some(msg) => {
                    msg.content = REPLY_FAILED_MESSAGE.to_string();
                    msg.is_streaming = false;
                    msg.is_error = true;
                    observer.on_reply_finished(msg);
                }
                None => {
                    // 还没收到响应：补一条错误气泡
                    let mut msg = ChatMessage::assistant_placeholder();
                    msg.content = REPLY_FAILED_MESSAGE.to_string();
                    msg.is_streaming = false;
                    msg.is_error = true;
                    observer.on_reply_finished(&msg);
                    self.conversation.messages.push(msg);
                }
            }
        } else {
            warn!(error = %error, "chat message could not be sent");
            if let Some(id) = self.placeholder_id.as_deref() {
                self.conversation.messages.retain(|m| m.id != id);
            }
            observer.on_send_failed(error.user_message());
        }

        self.placeholder_id = None;
        self.assigned_id = None;
        self.state = ChatState::Idle;
        SendOutcome::Failed(error)
    }

    fn placeholder_mut(&mut self) -> Option<&mut ChatMessage> {
        let id = self.placeholder_id.as_deref()?;
        self.conversation.messages.iter_mut().find(|m| m.id == id)
    }
}

/// 发送期间持有视图；未走到结束状态就被丢弃时收尾为放弃。
struct InFlight<'a>(&'a mut ChatView);

impl Deref for InFlight<'_> {
    type Target = ChatView;

    fn deref(&self) -> &ChatView {
        &*self.0
    }
}

impl DerefMut for InFlight<'_> {
    fn deref_mut(&mut self) -> &mut ChatView {
        &mut *self.0
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.state != ChatState::Idle {
            self.0.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SEND_FAILED_MESSAGE;
    use crate::session::Session;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        toasts: Mutex<Vec<String>>,
        fragments: Mutex<Vec<String>>,
        upgrades: Mutex<Vec<UpgradeSignal>>,
    }

    impl ChatObserver for Recorder {
        fn on_content(&self, fragment: &str, _message: &ChatMessage) {
            self.fragments.lock().unwrap().push(fragment.to_string());
        }

        fn on_upgrade_required(&self, signal: &UpgradeSignal) {
            self.upgrades.lock().unwrap().push(signal.clone());
        }

        fn on_send_failed(&self, text: &str) {
            self.toasts.lock().unwrap().push(text.to_string());
        }
    }

    fn view() -> ChatView {
        ChatView::new(ApiClient::new("http://127.0.0.1:9", Arc::new(Session::new())))
    }

    fn recorded_view() -> (ChatView, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let client = ApiClient::new("http://127.0.0.1:9", Arc::new(Session::new()));
        (ChatView::with_observer(client, recorder.clone()), recorder)
    }

    #[test]
    fn submit_guard_rejects_empty_and_concurrent_sends() {
        let mut view = view();
        assert!(matches!(view.begin_send("   \n"), Err(ChatError::EmptyMessage)));
        assert_eq!(view.state(), ChatState::Idle);
        assert!(view.messages().is_empty());

        assert_eq!(view.begin_send("  Bonjour ").unwrap(), "Bonjour");
        assert_eq!(view.state(), ChatState::Sending);
        assert!(matches!(view.begin_send("encore"), Err(ChatError::Busy)));
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.messages()[0].role, Role::User);
        assert_eq!(view.messages()[0].content, "Bonjour");
    }

    #[test]
    fn placeholder_appears_only_when_streaming_starts() {
        let mut view = view();
        view.begin_send("Bonjour").unwrap();
        assert!(view.conversation().streaming_message().is_none());

        view.start_streaming();
        assert_eq!(view.state(), ChatState::Streaming);
        let placeholder = view.conversation().streaming_message().unwrap();
        assert_eq!(placeholder.role, Role::Assistant);
        assert!(placeholder.content.is_empty());
    }

    #[test]
    fn fragments_concatenate_in_order() {
        let (mut view, recorder) = recorded_view();
        view.begin_send("Salut").unwrap();
        view.start_streaming();
        for fragment in ["Bon", "jour", " le monde"] {
            view.apply_fragment(fragment);
        }
        assert!(!view.complete());

        let reply = view.messages().last().unwrap();
        assert_eq!(reply.content, "Bonjour le monde");
        assert!(!reply.is_streaming);
        assert_eq!(view.state(), ChatState::Idle);
        assert_eq!(recorder.fragments.lock().unwrap().len(), 3);
    }

    #[test]
    fn first_assigned_id_is_adopted() {
        let mut view = view();
        view.begin_send("Bonjour").unwrap();
        view.start_streaming();
        view.assigned_id = Some("conv-42".into());
        assert!(view.complete());
        assert_eq!(view.conversation_id(), Some("conv-42"));

        // 后续轮次不会覆盖已有的会话 ID
        view.begin_send("Et ensuite ?").unwrap();
        view.start_streaming();
        view.assigned_id = Some("conv-99".into());
        assert!(!view.complete());
        assert_eq!(view.conversation_id(), Some("conv-42"));
    }

    #[test]
    fn rate_limit_removes_placeholder_and_shows_prompt() {
        let (mut view, recorder) = recorded_view();
        view.begin_send("Bonjour").unwrap();
        view.start_streaming();
        view.apply_fragment("partiel");

        let signal = UpgradeSignal {
            current: 20,
            limit: 20,
            tier: "basic".into(),
        };
        let outcome = view.rate_limited(signal.clone());

        assert!(matches!(outcome, SendOutcome::RateLimited(ref s) if *s == signal));
        assert!(view.messages().iter().all(|m| m.role == Role::User));
        assert_eq!(view.upgrade_prompt(), Some(&signal));
        assert_eq!(view.state(), ChatState::Idle);
        assert_eq!(recorder.upgrades.lock().unwrap().as_slice(), &[signal.clone()]);

        assert_eq!(view.dismiss_upgrade_prompt(), Some(signal));
        assert!(view.upgrade_prompt().is_none());
    }

    #[test]
    fn network_failure_rewrites_placeholder() {
        let mut view = view();
        view.begin_send("Bonjour").unwrap();
        view.start_streaming();
        view.apply_fragment("Bon");

        view.fail(ChatError::Network { status: 500 });
        let reply = view.messages().last().unwrap();
        assert_eq!(reply.content, REPLY_FAILED_MESSAGE);
        assert!(reply.is_error);
        assert!(!reply.is_streaming);
        assert_eq!(view.messages().len(), 2);
        assert_eq!(view.state(), ChatState::Idle);
    }

    #[test]
    fn network_failure_before_response_adds_error_bubble() {
        let mut view = view();
        view.begin_send("Bonjour").unwrap();
        view.fail(ChatError::Network { status: 503 });

        assert_eq!(view.messages().len(), 2);
        let reply = &view.messages()[1];
        assert_eq!(reply.role, Role::Assistant);
        assert!(reply.is_error);
        assert!(view.conversation().streaming_message().is_none());
    }

    #[tokio::test]
    async fn missing_credential_shows_generic_toast() {
        let (mut view, recorder) = recorded_view();
        let outcome = view.send("Bonjour").await.unwrap();

        assert!(matches!(outcome, SendOutcome::Failed(ChatError::Auth)));
        assert_eq!(view.state(), ChatState::Idle);
        // 用户消息保留，没有助手消息
        assert_eq!(view.messages().len(), 1);
        assert_eq!(
            recorder.toasts.lock().unwrap().as_slice(),
            &[SEND_FAILED_MESSAGE.to_string()]
        );
    }

    #[test]
    fn dropped_send_is_finalised_as_abandoned() {
        let mut view = view();
        view.begin_send("Bonjour").unwrap();
        view.start_streaming();
        view.apply_fragment("Voi");
        drop(InFlight(&mut view));

        assert_eq!(view.state(), ChatState::Idle);
        let reply = view.messages().last().unwrap();
        assert_eq!(reply.content, "Voi");
        assert!(!reply.is_streaming);
        assert!(view.begin_send("Encore").is_ok());
    }

    #[test]
    fn abandon_keeps_partial_text() {
        let mut view = view();
        view.begin_send("Bonjour").unwrap();
        view.start_streaming();
        view.apply_fragment("Voici");
        view.abandon();

        assert_eq!(view.state(), ChatState::Idle);
        let reply = view.messages().last().unwrap();
        assert_eq!(reply.content, "Voici");
        assert!(!reply.is_streaming);

        view.new_chat();
        assert!(view.messages().is_empty());
        assert_eq!(view.conversation_id(), None);
    }
}
