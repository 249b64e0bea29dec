// src/main.rs
#[tokio::main]
async fn main() {
    // 调用 lib.rs 里的 run 函数
    if let Err(e) = aide_chat_lib::run().await {
        eprintln!("aide-chat: {}", e);
        std::process::exit(1);
    }
}
