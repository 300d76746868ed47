//! 翻译短语并把卡片导入 Anki

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::anki::AnkiImporter;
use crate::config::AnkiConfig;
use crate::deck::NoteTaker;
use crate::logs::RunLog;
use crate::models::{timestamp, Phrase, Resolution, TranslationCandidate};
use crate::resolver::TranslationResolver;
use crate::server::PhraseStore;

pub struct FlashcardMaker {
    resolver: TranslationResolver,
    note_taker: NoteTaker,
    importer: Box<dyn AnkiImporter>,
    log: Arc<RunLog>,
    output_dir: PathBuf,
    keep_packages: bool,
}

impl FlashcardMaker {
    pub fn new(
        resolver: TranslationResolver,
        importer: Box<dyn AnkiImporter>,
        config: &AnkiConfig,
        log: Arc<RunLog>,
    ) -> Self {
        FlashcardMaker {
            resolver,
            note_taker: NoteTaker::new(&config.default_deck),
            importer,
            log,
            output_dir: config.output_dir.clone(),
            keep_packages: config.keep_packages,
        }
    }

    pub fn note_taker(&self) -> &NoteTaker {
        &self.note_taker
    }

    /// 翻译一个词并为每条结果加一张卡片
    pub async fn create(&mut self, german: &str, deck_name: Option<&str>) -> Resolution {
        let resolution = self.resolver.resolve(german).await;
        if let Resolution::Resolved(candidates) = &resolution {
            for candidate in candidates {
                self.note_taker.add_note(candidate, deck_name);
            }
        }
        resolution
    }

    /// 处理一个短语。返回 true 表示已经处理完，应该写回服务器；
    /// 主词典过载或出错时返回 false，短语留到下次。
    pub async fn translate_phrase(&mut self, phrase: &mut Phrase) -> bool {
        let now = timestamp();

        // 已经翻译过（例如别的用户分享过），只需要做卡片
        if !phrase.translations.is_empty() {
            self.log
                .line(format!("'{}' 已有翻译，直接制作卡片...", phrase.german));
            for translation in &phrase.translations {
                self.note_taker
                    .add_note(translation, phrase.deck_name.as_deref());
            }
            phrase.flashcard_date = Some(now);
            return true;
        }

        let given = phrase
            .given_english()
            .map(|english| TranslationCandidate::given(&phrase.german, english));
        match given {
            Some(candidate) => {
                self.log.line(format!(
                    "用户给出了翻译: {} = {}",
                    candidate.german,
                    candidate.english.as_deref().unwrap_or_default()
                ));
                self.note_taker
                    .add_note(&candidate, phrase.deck_name.as_deref());
                phrase.translations = vec![candidate];
            }
            None => {
                self.log
                    .line(format!("自动翻译 '{}' 并制作卡片...", phrase.german));
                let resolution = self.create(&phrase.german, phrase.deck_name.as_deref()).await;
                if !resolution.is_settled() {
                    self.log.line(format!(
                        "'{}' 这次没有翻译成功，不写回服务器",
                        phrase.german
                    ));
                    return false;
                }
                phrase.translations = resolution.into_candidates();
            }
        }

        phrase.translation_date = Some(now.clone());
        phrase.flashcard_date = Some(now);
        true
    }

    /// 依次处理，只返回处理完的短语
    pub async fn translate_phrases(&mut self, phrases: Vec<Phrase>) -> Vec<Phrase> {
        let mut translated = Vec::new();
        for mut phrase in phrases {
            if self.translate_phrase(&mut phrase).await {
                translated.push(phrase);
            }
        }
        translated
    }

    /// 为文件中的每一行德语建立短语
    pub async fn phrases_from_lines<I, S>(&mut self, lines: I, deck_name: Option<&str>, owner: Option<&str>) -> Vec<Phrase>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut phrases = Vec::new();
        for line in lines {
            let german = line.as_ref().trim_end();
            if german.is_empty() {
                continue;
            }
            let mut phrase = Phrase::new(german);
            phrase.owner = owner.map(str::to_string);
            phrase.deck_name = deck_name.map(str::to_string);
            phrase.share_date = Some(timestamp());
            if self.translate_phrase(&mut phrase).await {
                phrases.push(phrase);
            }
        }
        phrases
    }

    /// 写出每个牌组的 .apkg 并导入 Anki，最后同步
    pub async fn update_anki(&self) -> Result<Vec<PathBuf>> {
        self.log.line("更新 Anki...");
        let mut packages = Vec::new();
        for deck in self.note_taker.decks() {
            if deck.notes.is_empty() {
                continue;
            }
            let path = self
                .note_taker
                .write_package(&deck.name, &self.output_dir)
                .await?;
            self.log.line(format!(
                "导入牌组 '{}' ({} 张卡片)...",
                deck.name,
                deck.notes.len()
            ));
            self.importer.import_package(&path).await?;
            if self.keep_packages {
                packages.push(path);
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        self.importer.sync().await?;
        Ok(packages)
    }

    /// 一个用户的完整流程：取短语、翻译、导入 Anki、写回。返回写回的短语数量。
    pub async fn sync_user(&mut self, store: &dyn PhraseStore, owner: &str) -> Result<usize> {
        let phrases = store.get_phrases(owner, false).await?;
        if phrases.is_empty() {
            return Ok(0);
        }
        let translated = self.translate_phrases(phrases).await;
        self.update_anki().await?;
        store.post_phrases(&translated).await?;
        Ok(translated.len())
    }
}
