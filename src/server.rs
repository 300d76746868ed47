use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::logs::RunLog;
use crate::models::Phrase;

#[derive(Debug, Serialize)]
struct Authorization<'a> {
    name: &'a str,
    token: &'a str,
}

/// 保存用户短语的远程服务
#[async_trait]
pub trait PhraseStore: Send + Sync {
    async fn get_phrases(&self, owner: &str, include_flashcarded: bool) -> Result<Vec<Phrase>>;
    async fn post_phrases(&self, phrases: &[Phrase]) -> Result<()>;
}

pub struct PhraseServer {
    client: Client,
    phrase_url: String,
    users: BTreeMap<String, String>,
    log: Arc<RunLog>,
}

impl PhraseServer {
    pub fn new(config: &Config, log: Arc<RunLog>) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.processing.request_timeout_seconds))
            .build()?;
        Ok(PhraseServer {
            client,
            phrase_url: format!("{}/phrase/", config.server.base_url.trim_end_matches('/')),
            users: config.server.users.clone(),
            log,
        })
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    /// Authorization 头：`{"name": .., "token": ..}`
    fn authorization(&self, owner: &str) -> Result<String> {
        let token = self
            .users
            .get(owner)
            .ok_or_else(|| anyhow::anyhow!("没有用户 '{}' 的 token", owner))?;
        Ok(serde_json::to_string(&Authorization { name: owner, token })?)
    }

    fn phrase_url(&self, phrase: &Phrase) -> String {
        format!("{}{}", self.phrase_url, phrase.id.as_deref().unwrap_or(""))
    }
}

#[async_trait]
impl PhraseStore for PhraseServer {
    async fn get_phrases(&self, owner: &str, include_flashcarded: bool) -> Result<Vec<Phrase>> {
        self.log.line(format!("查找用户 {} 的短语...", owner));
        if include_flashcarded {
            self.log.line("包括已经制作过卡片的短语...");
        }
        let response = self
            .client
            .get(&self.phrase_url)
            .query(&[("flashcarded", include_flashcarded.to_string())])
            .header("Authorization", self.authorization(owner)?)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("网络请求失败: {}", e))?;

        if !response.status().is_success() {
            anyhow::bail!("获取短语失败 (状态码: {})", response.status());
        }
        let phrases: Vec<Phrase> = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("JSON解析失败: {}", e))?;
        self.log.line(format!("得到 {} 个短语", phrases.len()));
        Ok(phrases)
    }

    async fn post_phrases(&self, phrases: &[Phrase]) -> Result<()> {
        self.log.line("把结果写回服务器...");
        for phrase in phrases {
            let owner = phrase.owner.as_deref().unwrap_or_default();
            let response = self
                .client
                .post(self.phrase_url(phrase))
                .header("Authorization", self.authorization(owner)?)
                .json(phrase)
                .send()
                .await?;
            if !response.status().is_success() {
                self.log.line(format!(
                    "写回 '{}' 失败 (状态码: {})",
                    phrase.german,
                    response.status()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> PhraseServer {
        let mut config = Config::default();
        config.server.base_url = "https://phrases.example/".to_string();
        config.server.users.insert("Teague".to_string(), "t0k3n".to_string());
        PhraseServer::new(&config, Arc::new(RunLog::discard())).unwrap()
    }

    #[test]
    fn authorization_header_is_json() {
        let server = server();
        let header: serde_json::Value =
            serde_json::from_str(&server.authorization("Teague").unwrap()).unwrap();
        assert_eq!(header, serde_json::json!({ "name": "Teague", "token": "t0k3n" }));
        assert!(server.authorization("Unbekannt").is_err());
        assert_eq!(server.users().collect::<Vec<_>>(), vec!["Teague"]);
    }

    #[test]
    fn phrase_url_appends_id() {
        let server = server();
        let mut phrase = Phrase::new("Haus");
        assert_eq!(server.phrase_url(&phrase), "https://phrases.example/phrase/");
        phrase.id = Some("abc123".to_string());
        assert_eq!(server.phrase_url(&phrase), "https://phrases.example/phrase/abc123");
    }
}
