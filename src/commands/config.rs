use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use std::fs; // 导入标准库文件系统模块
use std::path::{Path, PathBuf};

/// 配置目录名（位于系统配置目录下）
pub const CONFIG_DIR_NAME: &str = "aide-plus";
const CONFIG_FILE_NAME: &str = "config.json";

/// 应用程序的全局配置文件结构。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// 后端 API 服务基地址。
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// 认证服务签发的 Bearer 令牌，未登录时为空。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// `tracing` 过滤表达式，如 `"info"` 或 `"debug,reqwest=warn"`。
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 为 `true` 时日志按 JSON 行输出。
    #[serde(default)]
    pub log_json: bool,
}

fn default_api_url() -> String {
    "http://localhost:8080".into()
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl AppConfig {
    /// 默认配置文件路径：如 Linux 的 `~/.config/aide-plus/config.json`
    pub fn default_path() -> Result<PathBuf, ChatError> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| ChatError::Config("无法获取系统配置目录".into()))?;
        path.push(CONFIG_DIR_NAME);
        path.push(CONFIG_FILE_NAME);
        Ok(path)
    }

    /// 读取默认位置的配置
    pub fn load() -> Result<Self, ChatError> {
        Self::load_from(&Self::default_path()?)
    }

    /// 读取指定位置的配置，文件不存在时返回默认配置
    pub fn load_from(path: &Path) -> Result<Self, ChatError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 保存到默认位置
    pub fn save(&self) -> Result<(), ChatError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ChatError> {
        // 1. 确保父目录存在
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        // 2. 序列化为格式化后的 JSON 并写入
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// 用环境变量覆盖文件中的配置
    pub fn apply_env(self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = var("AIDE_API_URL") {
            self.api_url = url;
        }
        if let Some(token) = var("AIDE_TOKEN") {
            self.token = Some(token);
        }
        if let Some(level) = var("AIDE_LOG") {
            self.log_level = level;
        }
        if let Some(json) = var("AIDE_LOG_JSON") {
            self.log_json = json == "1" || json.eq_ignore_ascii_case("true");
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.api_url, "http://localhost:8080");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = AppConfig {
            api_url: "https://api.aideplus.fr".into(),
            token: Some("jwt".into()),
            log_level: "debug".into(),
            log_json: true,
        };
        config.save_to(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"apiUrl\""));
        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"token":"abc"}"#).unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("AIDE_API_URL", "http://127.0.0.1:3000"),
            ("AIDE_LOG_JSON", "TRUE"),
        ]
        .into_iter()
        .collect();
        let config = AppConfig::default().apply_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_url, "http://127.0.0.1:3000");
        assert!(config.log_json);
        assert_eq!(config.token, None);
    }
}
