use anyhow::{Context, Result};
use serde::Serialize;
use md5::{Digest, Md5};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::database::PackageWriter;
use crate::models::TranslationCandidate;

pub const DEFAULT_DECK: &str = "Fluency Lube";
pub const FIELD_NAMES: [&str; 6] = ["english", "german", "example", "plural", "conjugation", "source"];
pub const CARD_TEMPLATE_NAME: &str = "Card 1";
pub const FRONT_TEMPLATE: &str = "{{english}}";
pub const BACK_TEMPLATE: &str = "{{FrontSide}}<hr id=answer>{{german}}<br><br>{{example}}<br><br>{{plural}}<br><br>{{conjugation}}<br><br><i>{{source}}</i><br><br>";

const ID_BASE: u128 = 1 << 30;

/// 由名字得到稳定的 Anki id，范围 [2^30, 2^31)
///
/// 整个 MD5 摘要当作大端整数取模，和以前建的牌组、笔记类型 id 一致。
pub fn anki_id(name: &str) -> i64 {
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&Md5::digest(name.as_bytes()));
    (u128::from_be_bytes(digest) % ID_BASE + ID_BASE) as i64
}

// 一张卡片的字段，顺序与 FIELD_NAMES 相同
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub english: String,
    pub german: String,
    pub example: String,
    pub plural: String,
    pub conjugation: String,
    pub source: String,
}

impl Note {
    /// 德语字段为 "冠词 词 上下文"，缺少的字段为空字符串
    pub fn from_candidate(candidate: &TranslationCandidate) -> Self {
        let mut german = candidate.german.clone();
        if let Some(article) = &candidate.article {
            german = format!("{} {}", article, german);
        }
        if let Some(context) = &candidate.context {
            german = format!("{} {}", german, context);
        }
        let field = |value: &Option<String>| value.clone().unwrap_or_default();

        Note {
            english: field(&candidate.english),
            german,
            example: field(&candidate.example),
            plural: field(&candidate.plural),
            conjugation: field(&candidate.conjugation),
            source: field(&candidate.source),
        }
    }

    pub fn fields(&self) -> [&str; 6] {
        [
            self.english.as_str(),
            self.german.as_str(),
            self.example.as_str(),
            self.plural.as_str(),
            self.conjugation.as_str(),
            self.source.as_str(),
        ]
    }

    /// 按字段内容生成的 guid，同样的卡片重复导入时 Anki 会更新而不是新建
    pub fn guid(&self) -> String {
        let digest = Sha256::digest(self.fields().join("\u{1f}").as_bytes());
        hex::encode(&digest[..8])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteModel {
    pub id: i64,
    pub name: String,
}

impl NoteModel {
    pub fn named(name: &str) -> Self {
        NoteModel {
            id: anki_id(name),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deck {
    pub id: i64,
    pub name: String,
    pub notes: Vec<Note>,
}

impl Deck {
    pub fn named(name: &str) -> Self {
        Deck {
            id: anki_id(name),
            name: name.to_string(),
            notes: Vec::new(),
        }
    }

    /// `<YYYYMMDD_HHMMSS>_<名字中空格换成下划线>.apkg`
    pub fn package_file_name(&self, stamp: &str) -> String {
        format!("{}_{}.apkg", stamp, self.name.replace(' ', "_"))
    }
}

/// 按牌组收集卡片
pub struct NoteTaker {
    default_deck: String,
    decks: BTreeMap<String, Deck>,
    model: NoteModel,
}

impl NoteTaker {
    pub fn new(default_deck: &str) -> Self {
        let mut decks = BTreeMap::new();
        decks.insert(default_deck.to_string(), Deck::named(default_deck));
        NoteTaker {
            default_deck: default_deck.to_string(),
            decks,
            model: NoteModel::named(default_deck),
        }
    }

    /// 加入一张卡片，没有指定牌组时放进默认牌组
    pub fn add_note(&mut self, candidate: &TranslationCandidate, deck_name: Option<&str>) -> &Note {
        let name = deck_name
            .filter(|d| !d.is_empty())
            .unwrap_or(self.default_deck.as_str())
            .to_string();
        let deck = self
            .decks
            .entry(name)
            .or_insert_with_key(|name| Deck::named(name));
        deck.notes.push(Note::from_candidate(candidate));
        &deck.notes[deck.notes.len() - 1]
    }

    pub fn deck(&self, name: &str) -> Option<&Deck> {
        self.decks.get(name)
    }

    pub fn decks(&self) -> impl Iterator<Item = &Deck> {
        self.decks.values()
    }

    pub fn model(&self) -> &NoteModel {
        &self.model
    }

    pub fn note_count(&self) -> usize {
        self.decks.values().map(|d| d.notes.len()).sum()
    }

    /// 把牌组写成 .apkg，返回文件路径
    pub async fn write_package(&self, deck_name: &str, dir: &Path) -> Result<PathBuf> {
        let deck = self
            .deck(deck_name)
            .ok_or_else(|| anyhow::anyhow!("牌组 '{}' 不存在", deck_name))?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("无法创建输出目录 {}", dir.display()))?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let path = dir.join(deck.package_file_name(&stamp));
        PackageWriter::new(&self.model).write(deck, &path).await?;
        Ok(path)
    }

    /// 导出 CSV，第一行是字段名
    pub fn export_csv(&self, deck_name: &str, path: &Path) -> Result<()> {
        let deck = self
            .deck(deck_name)
            .ok_or_else(|| anyhow::anyhow!("牌组 '{}' 不存在", deck_name))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("无法创建 {}", path.display()))?;
        for note in &deck.notes {
            wtr.serialize(note).context("写入 CSV 失败")?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> TranslationCandidate {
        let mut candidate = TranslationCandidate::new(
            "Bank".to_string(),
            Some("noun, feminine".to_string()),
            Some("[Sitzbank]".to_string()),
        );
        candidate.english = Some("bench".to_string());
        candidate.plural = Some("Bänke".to_string());
        candidate
    }

    #[test]
    fn ids_are_stable_and_in_range() {
        let id = anki_id("Fluency Lube");
        assert_eq!(id, anki_id("Fluency Lube"));
        assert_ne!(id, anki_id("Fluency Lube Auto"));
        assert!((1i64 << 30..1i64 << 31).contains(&id));
    }

    #[test]
    fn ids_match_existing_collections() {
        assert_eq!(anki_id("Fluency Lube"), 1570091555);
        assert_eq!(anki_id("Wohnen"), 1466572585);
    }

    #[test]
    fn german_field_combines_article_and_context() {
        let note = Note::from_candidate(&bank());
        assert_eq!(note.german, "die Bank [Sitzbank]");
        assert_eq!(note.fields(), ["bench", "die Bank [Sitzbank]", "", "Bänke", "", ""]);
        assert_eq!(note.guid(), Note::from_candidate(&bank()).guid());
    }

    #[test]
    fn notes_go_to_named_or_default_deck() {
        let mut taker = NoteTaker::new(DEFAULT_DECK);
        taker.add_note(&bank(), None);
        taker.add_note(&bank(), Some(""));
        taker.add_note(&TranslationCandidate::given("Haus", "house"), Some("Wohnen"));

        assert_eq!(taker.deck(DEFAULT_DECK).unwrap().notes.len(), 2);
        assert_eq!(taker.deck("Wohnen").unwrap().id, anki_id("Wohnen"));
        assert_eq!(taker.note_count(), 3);
        assert_eq!(taker.model().id, anki_id(DEFAULT_DECK));
    }

    #[test]
    fn package_file_name_replaces_spaces() {
        let deck = Deck::named("Fluency Lube");
        assert_eq!(
            deck.package_file_name("20240101_120000"),
            "20240101_120000_Fluency_Lube.apkg"
        );
    }

    #[test]
    fn csv_has_header_and_one_row_per_note() {
        let mut taker = NoteTaker::new(DEFAULT_DECK);
        taker.add_note(&bank(), None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cards.csv");
        taker.export_csv(DEFAULT_DECK, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("english,german,example,plural,conjugation,source"));
        assert_eq!(lines.next(), Some("bench,die Bank [Sitzbank],,Bänke,,"));
        assert_eq!(lines.next(), None);
        assert!(taker.export_csv("fehlt", &path).is_err());
    }
}
