use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;

// AnkiConnect 接受的最低版本
const MIN_VERSION: u32 = 4;

#[derive(Debug, Serialize)]
pub struct AnkiRequest<'a> {
    pub action: &'a str,
    pub params: Value,
    pub version: u32,
}

#[derive(Debug, Deserialize)]
pub struct PermissionResult {
    pub permission: String,
    #[serde(default)]
    pub version: Option<u32>,
}

/// 把卡片包交给 Anki
#[async_trait]
pub trait AnkiImporter: Send + Sync {
    async fn import_package(&self, path: &Path) -> Result<()>;
    async fn sync(&self) -> Result<()>;
}

pub struct AnkiConnect {
    client: Client,
    url: String,
    version: u32,
}

impl AnkiConnect {
    /// 请求权限并采用 AnkiConnect 报告的版本；失败时只记录，继续使用最低版本
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.processing.request_timeout_seconds))
            .build()?;
        let mut anki = AnkiConnect {
            client,
            url: config.anki.connect_url.clone(),
            version: MIN_VERSION,
        };

        match anki.request_permission().await {
            Ok(Some(version)) => {
                tracing::info!("AnkiConnect 版本 {}", version);
                anki.version = version.max(MIN_VERSION);
            }
            Ok(None) => tracing::warn!("Anki 拒绝了连接请求"),
            Err(e) => tracing::warn!("初始化 AnkiConnect 失败: {}", e),
        }
        Ok(anki)
    }

    async fn request_permission(&self) -> Result<Option<u32>> {
        let result = self.request("requestPermission", json!({})).await?;
        let permission: PermissionResult = serde_json::from_value(result)?;
        if permission.permission == "granted" {
            Ok(Some(permission.version.unwrap_or(MIN_VERSION)))
        } else {
            Ok(None)
        }
    }

    /// 发送一个动作，返回 `result` 字段
    pub async fn request(&self, action: &str, params: Value) -> Result<Value> {
        let body = AnkiRequest {
            action,
            params,
            version: self.version,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("无法连接 AnkiConnect: {}", e))?;

        if !response.status().is_success() {
            anyhow::bail!("AnkiConnect 请求失败 (状态码: {})", response.status());
        }
        let reply: Value = response.json().await?;
        unwrap_reply(reply)
    }
}

// 版本 5 以后的回复是 {"result": .., "error": ..}，更早的版本直接返回结果
fn unwrap_reply(reply: Value) -> Result<Value> {
    match reply {
        Value::Object(mut map) if map.contains_key("result") && map.contains_key("error") => {
            match map.remove("error") {
                Some(Value::Null) | None => Ok(map.remove("result").unwrap_or(Value::Null)),
                Some(error) => anyhow::bail!("AnkiConnect 返回错误: {}", error),
            }
        }
        other => Ok(other),
    }
}

#[async_trait]
impl AnkiImporter for AnkiConnect {
    async fn import_package(&self, path: &Path) -> Result<()> {
        let path = std::path::absolute(path)?;
        self.request("importPackage", json!({ "path": path.display().to_string() }))
            .await?;
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        self.request("sync", json!({})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_anki_connect_format() {
        let body = AnkiRequest {
            action: "importPackage",
            params: json!({ "path": "/tmp/deck.apkg" }),
            version: 6,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "action": "importPackage", "params": { "path": "/tmp/deck.apkg" }, "version": 6 })
        );
    }

    #[test]
    fn replies_are_unwrapped() {
        assert_eq!(
            unwrap_reply(json!({ "result": { "permission": "granted" }, "error": null })).unwrap(),
            json!({ "permission": "granted" })
        );
        assert!(unwrap_reply(json!({ "result": null, "error": "collection is not available" })).is_err());
        // 旧版本直接返回结果
        assert_eq!(unwrap_reply(json!(true)).unwrap(), json!(true));
    }

    #[test]
    fn permission_reply_parses() {
        let granted: PermissionResult =
            serde_json::from_value(json!({ "permission": "granted", "requireApikey": false, "version": 6 })).unwrap();
        assert_eq!(granted.version, Some(6));
        let denied: PermissionResult = serde_json::from_value(json!({ "permission": "denied" })).unwrap();
        assert_eq!(denied.version, None);
    }
}
