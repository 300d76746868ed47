use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use unicode_normalization::UnicodeNormalization;

use crate::config::Config;

const LINGUEE_SEARCH_URL: &str = "https://www.linguee.com/english-german/search";
const VERBFORMEN_URL: &str = "https://www.verbformen.de/";

/// 主词典返回的页面
#[derive(Debug, Clone, PartialEq)]
pub enum SearchPage {
    Page(String),
    // 5xx，通常是请求太频繁
    Overloaded(u16),
}

/// 主词典：按德语词搜索，返回结果页面
#[async_trait]
pub trait DictionarySource: Send + Sync {
    fn name(&self) -> &str;
    async fn search(&self, query: &str) -> Result<SearchPage>;
}

/// 动词变位页面
#[async_trait]
pub trait ConjugationSource: Send + Sync {
    async fn conjugation_page(&self, verb: &str) -> Result<String>;
}

/// 机器翻译，主词典没有结果时使用
#[async_trait]
pub trait MachineTranslator: Send + Sync {
    fn name(&self) -> &str;
    async fn translate(&self, text: &str) -> Result<String>;
}

fn build_client(config: &Config) -> Result<Client> {
    let client = ClientBuilder::new()
        .timeout(Duration::from_secs(config.processing.request_timeout_seconds))
        .build()?;
    Ok(client)
}

pub struct LingueeClient {
    client: Client,
}

impl LingueeClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(LingueeClient {
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl DictionarySource for LingueeClient {
    fn name(&self) -> &str {
        "Linguee"
    }

    async fn search(&self, query: &str) -> Result<SearchPage> {
        let response = self
            .client
            .get(LINGUEE_SEARCH_URL)
            .query(&[("source", "auto"), ("query", query)])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("网络请求失败: {}", e))?;

        let status = response.status();
        if status.is_server_error() {
            return Ok(SearchPage::Overloaded(status.as_u16()));
        }
        if !status.is_success() {
            anyhow::bail!("Linguee 请求失败 (状态码: {})", status);
        }
        Ok(SearchPage::Page(response.text().await?))
    }
}

pub struct VerbformenClient {
    client: Client,
}

impl VerbformenClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(VerbformenClient {
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl ConjugationSource for VerbformenClient {
    async fn conjugation_page(&self, verb: &str) -> Result<String> {
        let verb: String = verb.nfc().collect();
        let response = self
            .client
            .get(VERBFORMEN_URL)
            .query(&[("w", verb.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("verbformen 请求失败 (状态码: {})", status);
        }
        Ok(response.text().await?)
    }
}

// DeepL API 请求 / 响应结构
#[derive(Debug, Serialize)]
pub struct DeeplRequest<'a> {
    pub text: &'a str,
    pub source_lang: &'a str,
    pub target_lang: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct DeeplResponse {
    pub translations: Vec<DeeplTranslation>,
}

#[derive(Debug, Deserialize)]
pub struct DeeplTranslation {
    pub text: String,
}

impl DeeplResponse {
    /// 第一条译文，去掉首尾空白；没有译文时为空字符串
    pub fn first_text(&self) -> String {
        self.translations
            .first()
            .map(|t| t.text.trim().to_string())
            .unwrap_or_default()
    }
}

pub struct DeeplClient {
    client: Client,
    auth_key: String,
    api_url: String,
}

impl DeeplClient {
    pub fn new(config: &Config) -> Result<Self> {
        if config.deepl.auth_key.is_empty() {
            println!("⚠️  未设置 DeepL auth_key，机器翻译请求会失败");
        }
        Ok(DeeplClient {
            client: build_client(config)?,
            auth_key: config.deepl.auth_key.clone(),
            api_url: config.deepl.api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MachineTranslator for DeeplClient {
    fn name(&self) -> &str {
        "DeepL"
    }

    async fn translate(&self, text: &str) -> Result<String> {
        let request = DeeplRequest {
            text,
            source_lang: "DE",
            target_lang: "EN-GB",
        };
        let response = self
            .client
            .post(format!("{}/v2/translate", self.api_url))
            .header("Authorization", format!("DeepL-Auth-Key {}", self.auth_key))
            .form(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("网络请求失败: {}", e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("DeepL 请求失败 (状态码: {}): {}", status, error_text);
        }

        let api_response: DeeplResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("JSON解析失败: {}", e))?;
        Ok(api_response.first_text())
    }
}
