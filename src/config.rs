use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const APPLE_GERMAN_ENGLISH: &str = "/System/Library/AssetsV2/com_apple_MobileAsset_DictionaryServices_dictionaryOSX/0c247d541a5a54cc5db9ec9986c030fad7ff8d68.asset/AssetData/German - English.dictionary/Contents/Resources/Body.data";

// 配置文件结构
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub dictionary: DictionaryConfig,
    pub processing: ProcessingConfig,
    pub deepl: DeeplConfig,
    pub anki: AnkiConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DictionaryConfig {
    pub body_data: PathBuf,
    pub cache_file: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    pub request_timeout_seconds: u64,
    // 同时使用非精选的精确结果和不精确结果
    pub comprehensive: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeeplConfig {
    pub auth_key: String,
    pub api_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnkiConfig {
    pub connect_url: String,
    pub default_deck: String,
    pub output_dir: PathBuf,
    // 导入后保留 .apkg 文件
    pub keep_packages: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    // 用户名 -> token
    pub users: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            body_data: PathBuf::from(APPLE_GERMAN_ENGLISH),
            cache_file: PathBuf::from("data/apple_german_english.json"),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            comprehensive: false,
        }
    }
}

impl Default for DeeplConfig {
    fn default() -> Self {
        Self {
            auth_key: String::new(),
            api_url: "https://api-free.deepl.com".to_string(),
        }
    }
}

impl Default for AnkiConfig {
    fn default() -> Self {
        Self {
            connect_url: "http://localhost:8765".to_string(),
            default_deck: "Fluency Lube".to_string(),
            output_dir: PathBuf::from("output"),
            keep_packages: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://crunchy-nut-server.herokuapp.com".to_string(),
            users: BTreeMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
        }
    }
}

impl Config {
    pub fn load() -> Result<Config> {
        Self::from_path(Path::new(DEFAULT_CONFIG_FILE))
    }

    pub fn from_path(path: &Path) -> Result<Config> {
        let config_content = std::fs::read_to_string(path)
            .map_err(|_| anyhow::anyhow!("配置文件 {} 不存在或无法读取", path.display()))?;
        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow::anyhow!("配置文件解析失败: {}", e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_use_defaults() {
        let config = Config::from_toml(
            r#"
            [deepl]
            auth_key = "secret:fx"

            [server.users]
            Teague = "token-1"
            "#,
        )
        .unwrap();
        assert_eq!(config.deepl.auth_key, "secret:fx");
        assert_eq!(config.deepl.api_url, "https://api-free.deepl.com");
        assert_eq!(config.anki.default_deck, "Fluency Lube");
        assert_eq!(config.processing.request_timeout_seconds, 30);
        assert_eq!(config.server.users.get("Teague").map(String::as_str), Some("token-1"));
    }

    #[test]
    fn invalid_toml_is_reported() {
        assert!(Config::from_toml("[deepl\nauth_key = 1").is_err());
        assert!(Config::from_path(Path::new("/nicht/vorhanden.toml")).is_err());
    }
}
