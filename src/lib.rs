// src/lib.rs
pub mod chat;
pub mod commands;
pub mod error;
pub mod models;
pub mod session;
pub mod stream;

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::{ChatObserver, ChatView, SendOutcome};
use crate::commands::chat::ApiClient;
use crate::commands::config::AppConfig;
use crate::error::ChatError;
use crate::models::{ChatMessage, UpgradeSignal};
use crate::session::Session;

// --- 基础数据结构 ---

/// 正在进行的流任务，按视图 Key 管理。每个视图同时最多一个。
#[derive(Clone, Default)]
pub struct StreamManager {
    tasks: Arc<DashMap<String, (u64, JoinHandle<()>)>>,
    next_generation: Arc<AtomicU64>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 该视图是否有仍在运行的流任务
    pub fn is_active(&self, view_key: &str) -> bool {
        self.tasks
            .get(view_key)
            .map(|task| !task.1.is_finished())
            .unwrap_or(false)
    }

    /// 在后台任务中发送消息。
    ///
    /// 同一视图已有流在进行时返回 [`ChatError::Busy`]，不会排队。
    pub fn spawn_send(
        &self,
        view_key: &str,
        view: Arc<Mutex<ChatView>>,
        message: String,
    ) -> Result<(), ChatError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        match self.tasks.entry(view_key.to_string()) {
            Entry::Occupied(task) if !task.get().1.is_finished() => Err(ChatError::Busy),
            entry => {
                let tasks = Arc::clone(&self.tasks);
                let key = view_key.to_string();

                // 1. 创建异步任务：锁住视图，执行完整的发送流程
                let handle = tokio::spawn(async move {
                    let result = view.lock().await.send(&message).await;
                    match result {
                        Ok(SendOutcome::Completed { conversation_id }) => {
                            debug!(view = %key, conversation_id = ?conversation_id, "reply completed")
                        }
                        Ok(SendOutcome::RateLimited(_)) => debug!(view = %key, "reply rate limited"),
                        Ok(SendOutcome::Failed(e)) => debug!(view = %key, error = %e, "reply failed"),
                        Err(e) => warn!(view = %key, error = %e, "send rejected"),
                    }

                    // 2. 任务完成后移除自己的句柄（不误删后来者）
                    tasks.remove_if(&key, |_, task| task.0 == generation);
                });

                // 3. 存入句柄，以便后续可以放弃
                match entry {
                    Entry::Occupied(mut task) => {
                        task.insert((generation, handle));
                    }
                    Entry::Vacant(slot) => {
                        slot.insert((generation, handle));
                    }
                }
                Ok(())
            }
        }
    }

    /// 等待该视图正在进行的流自然结束。返回是否有任务可等。
    ///
    /// 句柄在等待前就被取出，等待期间同一视图的 `spawn_send` 不会报 Busy，
    /// 调用方需自行保证不在此期间发送。
    pub async fn wait(&self, view_key: &str) -> bool {
        let Some((_, (_, handle))) = self.tasks.remove(view_key) else {
            return false;
        };
        if let Err(e) = handle.await {
            warn!(view = %view_key, error = %e, "stream task did not finish cleanly");
        }
        true
    }

    /// 放弃该视图正在进行的流（离开页面或开始新对话时调用）。
    ///
    /// 不会通知服务端；连接随任务一起被丢弃。返回是否确实中止了任务。
    pub async fn abandon(&self, view_key: &str, view: &Mutex<ChatView>) -> bool {
        let Some((_, (_, handle))) = self.tasks.remove(view_key) else {
            return false;
        };
        let was_running = !handle.is_finished();
        handle.abort();
        let _ = handle.await;

        view.lock().await.abandon();
        if was_running {
            info!(view = %view_key, "stream abandoned");
        }
        was_running
    }
}

// --- 日志 ---

/// 初始化 tracing：`RUST_LOG` 优先，其次使用配置中的 `log_level`。
pub fn init_tracing(config: &AppConfig) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match config.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: log level '{}' is not a valid tracing filter ({}); falling back to 'info'",
                    config.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // 重复初始化（例如测试中）时忽略错误
    let _ = if config.log_json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
}

// --- 终端前端 ---

/// 把回复逐段打印到标准输出
struct TerminalObserver;

impl ChatObserver for TerminalObserver {
    fn on_content(&self, fragment: &str, _message: &ChatMessage) {
        print!("{}", fragment);
        let _ = std::io::stdout().flush();
    }

    fn on_reply_finished(&self, message: &ChatMessage) {
        if message.is_error {
            println!("\n[{}]", message.content);
        } else {
            println!();
        }
    }

    fn on_upgrade_required(&self, signal: &UpgradeSignal) {
        println!(
            "\n[Limite atteinte : {}/{} messages (offre {}). Passez à une offre supérieure pour continuer.]",
            signal.current, signal.limit, signal.tier
        );
    }

    fn on_send_failed(&self, text: &str) {
        println!("[{}]", text);
    }
}

const VIEW_KEY: &str = "terminal";

// --- 应用程序入口 ---

/// 终端聊天：逐行读取标准输入并发送。
///
/// 命令：`/new` 新对话，`/list` 会话列表，`/stop` 放弃当前回复，`/quit` 退出。
pub async fn run() -> Result<(), ChatError> {
    // 1. 配置与日志
    let config = AppConfig::load()?.apply_env();
    init_tracing(&config);
    info!(version = env!("CARGO_PKG_VERSION"), api_url = %config.api_url, "aide-chat starting");

    // 2. 会话凭证与客户端
    let session = Arc::new(Session::new());
    if let Some(token) = config.token.as_deref() {
        session.sign_in(token);
    }
    if !session.is_signed_in() {
        warn!("no credential configured; set AIDE_TOKEN or `token` in the config file");
    }
    let client = ApiClient::new(&config.api_url, session);
    let view = Arc::new(Mutex::new(ChatView::with_observer(
        client,
        Arc::new(TerminalObserver),
    )));
    let streams = StreamManager::new();

    // 3. 主循环
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut quit = false;
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => {
                quit = true;
                break;
            }
            "/stop" => {
                streams.abandon(VIEW_KEY, &view).await;
            }
            "/new" => {
                streams.abandon(VIEW_KEY, &view).await;
                view.lock().await.new_chat();
                println!("[Nouvelle conversation]");
            }
            "/list" => {
                let Ok(mut guard) = view.try_lock() else {
                    println!("[Réponse en cours]");
                    continue;
                };
                match guard.refresh_conversations().await {
                    Ok(()) => {
                        for c in guard.conversations() {
                            println!("{}  {}", c.id, c.title.as_deref().unwrap_or("(sans titre)"));
                        }
                    }
                    Err(e) => println!("[{}]", e.user_message()),
                }
            }
            input => {
                // 上一条回复还没结束时先等它，输入按顺序逐条发送
                streams.wait(VIEW_KEY).await;
                streams.spawn_send(VIEW_KEY, Arc::clone(&view), input.to_string())?;
            }
        }
    }

    // `/quit` 放弃当前回复；输入读完（管道）则等最后一条回复结束
    if quit {
        streams.abandon(VIEW_KEY, &view).await;
    } else {
        streams.wait(VIEW_KEY).await;
    }
    info!("aide-chat stopped");
    Ok(())
}
