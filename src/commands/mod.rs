//! 与 AIDE+ 后端及本地配置打交道的操作。

pub mod chat;
pub mod config;
