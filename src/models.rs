use chrono::Local;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// 上游词典返回的词性字符串
pub mod category {
    pub const NOUN_PREFIX: &str = "noun";
    pub const NOUN_MASCULINE: &str = "noun, masculine";
    pub const NOUN_NEUTER: &str = "noun, neuter";
    pub const NOUN_FEMININE: &str = "noun, feminine";
    pub const NOUN_PLURAL: &str = "noun, plural";
    pub const VERB: &str = "verb";
    pub const ADJECTIVE: &str = "adjective";
    pub const ADVERB: &str = "adverb";
}

// 一条翻译结果，对应一张卡片
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationCandidate {
    pub german: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub english: Option<String>,
    #[serde(default)]
    pub example: Option<String>,
    // 只有名词有
    #[serde(default)]
    pub plural: Option<String>,
    // 只有动词有
    #[serde(default)]
    pub conjugation: Option<String>,
    #[serde(default)]
    pub article: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl TranslationCandidate {
    /// 冠词根据词性推出
    pub fn new(german: String, category: Option<String>, context: Option<String>) -> Self {
        let article = category
            .as_deref()
            .and_then(Self::article_for)
            .map(str::to_string);
        Self {
            german,
            category,
            context,
            article,
            ..Default::default()
        }
    }

    /// 用户自己给出的翻译
    pub fn given(german: &str, english: &str) -> Self {
        Self {
            german: german.to_string(),
            english: Some(english.to_string()),
            ..Default::default()
        }
    }

    pub fn article_for(category: &str) -> Option<&'static str> {
        match category {
            category::NOUN_MASCULINE => Some("der"),
            category::NOUN_NEUTER => Some("das"),
            category::NOUN_FEMININE | category::NOUN_PLURAL => Some("die"),
            _ => None,
        }
    }

    pub fn category_is(&self, expected: &str) -> bool {
        self.category.as_deref() == Some(expected)
    }

    pub fn is_noun(&self) -> bool {
        self.category
            .as_deref()
            .is_some_and(|c| c.starts_with(category::NOUN_PREFIX))
    }

    pub fn is_verb(&self) -> bool {
        self.category_is(category::VERB)
    }
}

impl fmt::Display for TranslationCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "[{} | {} {} {} | {} | {} | 复数: {} | 变位: {}]",
            field(&self.english),
            field(&self.article),
            self.german,
            field(&self.context),
            field(&self.category),
            field(&self.example),
            field(&self.plural),
            field(&self.conjugation)
        )
    }
}

// 翻译一个词的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Vec<TranslationCandidate>),
    // 两个来源都没有结果
    NoMatch,
    // 主词典返回 5xx，稍后重试
    UpstreamUnavailable,
    // 网络、页面结构等意外错误
    Failed(String),
}

impl Resolution {
    pub fn into_candidates(self) -> Vec<TranslationCandidate> {
        match self {
            Resolution::Resolved(candidates) => candidates,
            _ => Vec::new(),
        }
    }

    /// 结果是否可以认为已经处理完，不需要下次再试
    pub fn is_settled(&self) -> bool {
        matches!(self, Resolution::Resolved(_) | Resolution::NoMatch)
    }
}

// 远程服务上的短语记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub german: String,
    #[serde(default)]
    pub english: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub deck_name: Option<String>,
    #[serde(default)]
    pub share_date: Option<String>,
    #[serde(default)]
    pub database_date: Option<String>,
    #[serde(default)]
    pub translation_date: Option<String>,
    #[serde(default)]
    pub flashcard_date: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub translations: Vec<TranslationCandidate>,
}

impl Phrase {
    pub fn new(german: &str) -> Self {
        Self {
            german: german.to_string(),
            ..Default::default()
        }
    }

    /// 用户是否已经给出了英文
    pub fn given_english(&self) -> Option<&str> {
        self.english.as_deref().filter(|e| !e.trim().is_empty())
    }

    pub fn deck<'a>(&'a self, default_deck: &'a str) -> &'a str {
        self.deck_name
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(default_deck)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<TranslationCandidate>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<TranslationCandidate>>::deserialize(deserializer)?.unwrap_or_default())
}

// 写回服务器的时间格式
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_follows_category_unless_given() {
        let noun = TranslationCandidate::new("Haus".into(), Some("noun, neuter".into()), None);
        assert_eq!(noun.article.as_deref(), Some("das"));
        let plural = TranslationCandidate::new("Leute".into(), Some("noun, plural".into()), None);
        assert_eq!(plural.article.as_deref(), Some("die"));
        let verb = TranslationCandidate::new("laufen".into(), Some("verb".into()), None);
        assert_eq!(verb.article, None);
        assert!(verb.is_verb());
        assert!(noun.is_noun());
    }

    #[test]
    fn phrase_reads_server_json() {
        let json = r#"{
            "_id": "abc",
            "german": "Haus",
            "english": "",
            "owner": "Teague",
            "translations": null
        }"#;
        let phrase: Phrase = serde_json::from_str(json).unwrap();
        assert_eq!(phrase.id.as_deref(), Some("abc"));
        assert!(phrase.translations.is_empty());
        assert_eq!(phrase.given_english(), None);
        assert_eq!(phrase.deck("Fluency Lube"), "Fluency Lube");

        let back = serde_json::to_value(&phrase).unwrap();
        assert_eq!(back["_id"], "abc");
        assert_eq!(back["german"], "Haus");
    }

    #[test]
    fn only_resolved_and_no_match_are_settled() {
        assert!(Resolution::Resolved(vec![]).is_settled());
        assert!(Resolution::NoMatch.is_settled());
        assert!(!Resolution::UpstreamUnavailable.is_settled());
        assert!(!Resolution::Failed("x".into()).is_settled());
    }
}
