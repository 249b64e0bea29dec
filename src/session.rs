//! # 会话凭证
//!
//! 登录本身由第三方认证服务完成，这里只保存其签发的 Bearer 令牌。
//! 凭证以显式的上下文对象注入 [`ApiClient`](crate::commands::chat::ApiClient)，
//! 生命周期跟随应用启动与用户登录/登出。

use std::sync::RwLock;

/// 为请求提供 Bearer 凭证。
pub trait CredentialSource: Send + Sync {
    /// 当前可用的令牌；未登录或令牌为空时返回 `None`。
    fn bearer_token(&self) -> Option<String>;
}

/// 内存中的会话存储。
#[derive(Default)]
pub struct Session {
    token: RwLock<Option<String>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(token);
        session
    }

    /// 登录成功后保存令牌。
    pub fn sign_in(&self, token: impl Into<String>) {
        let mut lock = self.token.write().unwrap_or_else(|e| e.into_inner());
        *lock = Some(token.into());
    }

    /// 登出：清空令牌。
    pub fn sign_out(&self) {
        let mut lock = self.token.write().unwrap_or_else(|e| e.into_inner());
        lock.take();
    }

    pub fn is_signed_in(&self) -> bool {
        self.bearer_token().is_some()
    }
}

impl CredentialSource for Session {
    fn bearer_token(&self) -> Option<String> {
        let lock = self.token.read().unwrap_or_else(|e| e.into_inner());
        lock.as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}
