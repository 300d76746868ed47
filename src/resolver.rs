//! 把一个德语词翻译成若干条卡片内容
//!
//! 先查主词典（Linguee）；没有结果时整句交给机器翻译。主词典过载时直接放弃，
//! 留到下次再试。

use anyhow::Result;
use std::sync::Arc;

use crate::api::{
    ConjugationSource, DeeplClient, DictionarySource, LingueeClient, MachineTranslator,
    SearchPage, VerbformenClient,
};
use crate::cache::{DictionaryCache, PLURAL_PLACEHOLDER};
use crate::config::Config;
use crate::logs::RunLog;
use crate::models::{category, Resolution, TranslationCandidate};
use crate::pages;

pub struct TranslationResolver {
    dictionary: Box<dyn DictionarySource>,
    conjugator: Box<dyn ConjugationSource>,
    translator: Box<dyn MachineTranslator>,
    cache: Arc<DictionaryCache>,
    log: Arc<RunLog>,
    comprehensive: bool,
}

impl TranslationResolver {
    pub fn new(
        dictionary: Box<dyn DictionarySource>,
        conjugator: Box<dyn ConjugationSource>,
        translator: Box<dyn MachineTranslator>,
        cache: Arc<DictionaryCache>,
        log: Arc<RunLog>,
    ) -> Self {
        TranslationResolver {
            dictionary,
            conjugator,
            translator,
            cache,
            log,
            comprehensive: false,
        }
    }

    /// 使用真实的 HTTP 客户端
    pub fn from_config(
        config: &Config,
        cache: Arc<DictionaryCache>,
        log: Arc<RunLog>,
    ) -> Result<Self> {
        let resolver = Self::new(
            Box::new(LingueeClient::new(config)?),
            Box::new(VerbformenClient::new(config)?),
            Box::new(DeeplClient::new(config)?),
            cache,
            log,
        )
        .comprehensive(config.processing.comprehensive);
        Ok(resolver)
    }

    pub fn comprehensive(mut self, comprehensive: bool) -> Self {
        self.comprehensive = comprehensive;
        self
    }

    /// 翻译失败时只记录日志，返回空列表
    pub async fn translate(&self, german: &str) -> Vec<TranslationCandidate> {
        self.resolve(german).await.into_candidates()
    }

    pub async fn resolve(&self, german: &str) -> Resolution {
        self.log.line(format!("翻译 '{}'...", german));
        match self.try_resolve(german).await {
            Ok(resolution) => resolution,
            Err(e) => {
                self.log
                    .line(format!("翻译 '{}' 时出错: {}", german, e));
                Resolution::Failed(e.to_string())
            }
        }
    }

    async fn try_resolve(&self, german: &str) -> Result<Resolution> {
        let html = match self.dictionary.search(german).await? {
            SearchPage::Page(html) => html,
            SearchPage::Overloaded(status) => {
                self.log.line(format!(
                    "{} 暂时不可用 (状态码: {})，'{}' 留到下次再试",
                    self.dictionary.name(),
                    status,
                    german
                ));
                return Ok(Resolution::UpstreamUnavailable);
            }
        };

        let hits = pages::parse_search_results(&html, self.comprehensive, &self.log)?;
        if hits.is_empty() {
            return self.fall_back(german).await;
        }

        let hits = remove_derivatives(hits, &self.log);
        let mut hits = self.add_noun_plurals(hits)?;
        self.conjugate_verbs(&mut hits).await?;

        let source = format!("{}: {}", self.dictionary.name(), german);
        for hit in &mut hits {
            hit.source = Some(source.clone());
        }
        Ok(Resolution::Resolved(hits))
    }

    async fn fall_back(&self, german: &str) -> Result<Resolution> {
        self.log
            .line(format!("改用 {} 翻译 '{}'...", self.translator.name(), german));
        let english = self.translator.translate(german).await?;
        if english.is_empty() {
            self.log.line(format!("{} 也没有结果", self.translator.name()));
            return Ok(Resolution::NoMatch);
        }

        let mut candidate = TranslationCandidate::given(german, &english);
        candidate.source = Some(format!("{}: {}", self.translator.name(), german));
        self.log.line(candidate.to_string());
        Ok(Resolution::Resolved(vec![candidate]))
    }

    /// 去掉词典给出的复数词条，再从本地词典查名词的复数
    fn add_noun_plurals(&self, hits: Vec<TranslationCandidate>) -> Result<Vec<TranslationCandidate>> {
        let mut hits: Vec<_> = hits
            .into_iter()
            .filter(|hit| !hit.category_is(category::NOUN_PLURAL))
            .collect();

        for noun in hits.iter_mut().filter(|hit| hit.is_noun()) {
            let noun_category = noun.category.clone().unwrap_or_default();
            self.log
                .line(format!("查找 {} ({}) 的复数...", noun.german, noun_category));
            let plural = match self.cache.plural_for(&noun.german, &noun_category)? {
                Some(plural) => plural,
                None => {
                    self.log.line(format!("'{}' 不在本地词典中", noun.german));
                    PLURAL_PLACEHOLDER.to_string()
                }
            };
            noun.plural = Some(plural);
        }
        Ok(hits)
    }

    async fn conjugate_verbs(&self, hits: &mut [TranslationCandidate]) -> Result<()> {
        for verb in hits.iter_mut().filter(|hit| hit.is_verb()) {
            self.log.line(format!("查找动词 '{}' 的变位...", verb.german));
            let page = self.conjugator.conjugation_page(&verb.german).await?;
            verb.conjugation = Some(pages::parse_principal_forms(&page)?);
        }
        Ok(())
    }
}

/// 去掉由其它词条派生出的重复项：与形容词同形的副词，以及由动词名词化的中性名词。
/// 判断总是基于原始列表。
pub fn remove_derivatives(
    hits: Vec<TranslationCandidate>,
    log: &RunLog,
) -> Vec<TranslationCandidate> {
    let derived_adverb = |hit: &TranslationCandidate| {
        hit.category_is(category::ADVERB)
            && hits
                .iter()
                .any(|x| x.german == hit.german && x.category_is(category::ADJECTIVE))
    };
    let derived_noun = |hit: &TranslationCandidate| {
        hit.category_is(category::NOUN_NEUTER)
            && hits
                .iter()
                .any(|x| hit.german == capitalize(&x.german) && x.is_verb())
    };

    let keep: Vec<bool> = hits
        .iter()
        .map(|hit| !(derived_adverb(hit) || derived_noun(hit)))
        .collect();
    if keep.iter().all(|k| *k) {
        return hits;
    }

    let filtered: Vec<_> = hits
        .into_iter()
        .zip(keep)
        .filter_map(|(hit, keep)| keep.then_some(hit))
        .collect();
    log.line("去掉了重复的派生词，剩下:");
    for hit in &filtered {
        log.line(hit.to_string());
    }
    filtered
}

// 首字母大写，其余小写
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
