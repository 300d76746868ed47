//! 词典缓存
//!
//! Body.data 有几百 MB，每次运行都重新解析太慢。这里把解析结果压平成
//! “词头 -> 缩进后的释义 XML” 写成一个 JSON 文件，反向链接的键也各自保存一份文本。

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

use crate::archive::ArchiveSplitter;
use crate::entries::{EntryId, EntryStore};
use crate::errors::{DictionaryError, DictionaryResult};
use crate::logs::RunLog;
use crate::markup::Element;

/// 找不到复数时使用的占位符
pub const PLURAL_PLACEHOLDER: &str = "?";
// "noun, masculine" 去掉这个前缀就是性别
const NOUN_PREFIX: &str = "noun, ";
const GRAMMAR_SECTION_CLASS: &str = "gramb x_xd0";
const PART_OF_SPEECH_CLASS: &str = "ps";
const PLURAL_MARKER: &str = "Pl. ";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DictionaryCache {
    definitions: HashMap<String, String>,
}

impl DictionaryCache {
    pub fn from_map(definitions: HashMap<String, String>) -> Self {
        Self { definitions }
    }

    /// 解析 Body.data 并生成缓存内容
    pub fn build_from_archive(body_data: &Path, log: &RunLog) -> DictionaryResult<Self> {
        let raw_entries = ArchiveSplitter::new(log).split_file(body_data)?;
        log.line(format!("共切分出 {} 个词条片段", raw_entries.len()));
        let store = EntryStore::build(raw_entries, log);
        Ok(Self::from_store(&store, log))
    }

    /// 把所有键（包括反向链接）压平成渲染后的文本，每个词条只渲染一次
    pub fn from_store(store: &EntryStore, log: &RunLog) -> Self {
        let mut rendered: HashMap<EntryId, Option<String>> = HashMap::new();
        let mut definitions = HashMap::with_capacity(store.len());

        for (key, entry) in store.iter() {
            let Some(id) = store.id_of(key) else { continue };
            let text = rendered.entry(id).or_insert_with(|| match entry.render() {
                Ok(text) => Some(text),
                Err(e) => {
                    log.line(format!("词条 '{}' 无法渲染，不写入缓存: {}", entry.key(), e));
                    None
                }
            });
            if let Some(text) = text {
                definitions.insert(key.to_string(), text.clone());
            }
        }

        Self { definitions }
    }

    /// 写成 JSON，键按字典序排列
    pub fn save(&self, path: &Path) -> DictionaryResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DictionaryError::io(parent, e))?;
        }
        let sorted: BTreeMap<&str, &str> = self
            .definitions
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let file = File::create(path).map_err(|e| DictionaryError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &sorted).map_err(|source| {
            DictionaryError::CorruptedCache {
                path: path.to_path_buf(),
                source,
            }
        })?;
        writer.flush().map_err(|e| DictionaryError::io(path, e))
    }

    pub fn load(path: &Path) -> DictionaryResult<Self> {
        let file = File::open(path).map_err(|e| DictionaryError::io(path, e))?;
        let definitions = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            DictionaryError::CorruptedCache {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self { definitions })
    }

    /// 查找释义。找不到时再用 NFC 规范化后的写法试一次。
    pub fn get(&self, headword: &str) -> Option<&str> {
        self.definitions
            .get(headword)
            .or_else(|| {
                let composed: String = headword.nfc().collect();
                self.definitions.get(&composed)
            })
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.definitions
    }

    /// 名词的复数形式。
    ///
    /// 词头不在词典中返回 `Ok(None)`；在词典中但找不到复数返回占位符 `?`；
    /// 多个写法用 `/` 连接。
    pub fn plural_for(&self, headword: &str, category: &str) -> DictionaryResult<Option<String>> {
        let Some(markup) = self.get(headword) else {
            return Ok(None);
        };
        let plurals = plural_forms(markup, category)?;
        if plurals.is_empty() {
            Ok(Some(PLURAL_PLACEHOLDER.to_string()))
        } else {
            Ok(Some(plurals.join("/")))
        }
    }
}

/// 从释义 XML 中找出与 `category` 同性别的名词段落里的复数写法
pub fn plural_forms(markup: &str, category: &str) -> DictionaryResult<Vec<String>> {
    let root = Element::parse(markup)?;
    let gender = category.strip_prefix(NOUN_PREFIX).unwrap_or("");
    let order = root.preorder();
    let mut plurals = Vec::new();

    for section in root.descendants_where(|e| e.class_is(GRAMMAR_SECTION_CLASS)) {
        let same_gender = section
            .descendants_where(|e| e.has_class(PART_OF_SPEECH_CLASS))
            .first()
            .is_some_and(|ps| ps.text().starts_with(gender));
        if !same_gender {
            continue;
        }

        let marker = section
            .descendants_where(|e| e.name == "span" && e.only_text() == Some(PLURAL_MARKER))
            .into_iter()
            .next();
        let Some(marker) = marker else { continue };

        // 复数写法是标记之后文档顺序中的下一个元素
        let next = order
            .iter()
            .position(|e| std::ptr::eq(*e, marker))
            .and_then(|position| order.get(position + 1));
        if let Some(next) = next {
            plurals.push(next.text().trim().to_string());
        }
    }

    Ok(plurals)
}

/// 缓存文件不存在，或者比 Body.data 旧
pub fn is_stale(cache_file: &Path, body_data: &Path) -> bool {
    let modified = |path: &Path| std::fs::metadata(path).and_then(|m| m.modified()).ok();
    match (modified(cache_file), modified(body_data)) {
        (Some(cache), Some(source)) => cache < source,
        (None, _) => true,
        (Some(_), None) => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::tests::entry;
    use crate::archive::RawEntry;

    pub(crate) fn noun_markup(sections: &[(&str, Option<&str>)]) -> String {
        let body: String = sections
            .iter()
            .map(|(gender, plural)| {
                let plural = plural
                    .map(|p| format!(r#"<span class="gg"><span>Pl. </span><span class="f">{}</span></span>"#, p))
                    .unwrap_or_default();
                format!(
                    r#"<span class="gramb x_xd0"><span class="ps">{} noun</span>{}</span>"#,
                    gender, plural
                )
            })
            .collect();
        entry("Bank", &body)
    }

    #[test]
    fn save_then_load_round_trips_every_key() {
        let log = RunLog::discard();
        let store = EntryStore::build(
            vec![
                RawEntry {
                    key: "Käse".to_string(),
                    xml: entry("Käse", r#"<span class="t_derivatives"><span class="x_xoh"><span role="text">Käses</span></span></span>"#),
                },
                RawEntry {
                    // 分解形式的 ü
                    key: "Mu\u{308}ll".to_string(),
                    xml: entry("Mu\u{308}ll", "<span>rubbish</span>"),
                },
            ],
            &log,
        );
        let cache = DictionaryCache::from_store(&store, &log);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("Käses"), cache.get("Käse"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dict.json");
        cache.save(&path).unwrap();
        let loaded = DictionaryCache::load(&path).unwrap();
        assert_eq!(loaded, cache);
        assert!(loaded.as_map().contains_key("Mu\u{308}ll"));
    }

    #[test]
    fn lookup_falls_back_to_composed_form() {
        let mut map = HashMap::new();
        map.insert("Müll".to_string(), "<x/>".to_string());
        let cache = DictionaryCache::from_map(map);
        assert_eq!(cache.get("Mu\u{308}ll"), Some("<x/>"));
        assert_eq!(cache.get("Mull"), None);
    }

    #[test]
    fn plural_matches_gender_section() {
        let markup = noun_markup(&[("feminine", Some("Banken")), ("masculine", Some("Bänke"))]);
        assert_eq!(plural_forms(&markup, "noun, masculine").unwrap(), vec!["Bänke"]);
        assert_eq!(plural_forms(&markup, "noun, feminine").unwrap(), vec!["Banken"]);
    }

    #[test]
    fn multiple_plural_spellings_are_joined() {
        let markup = noun_markup(&[("masculine", Some("Bänke")), ("masculine", Some("Banke"))]);
        let mut map = HashMap::new();
        map.insert("Bank".to_string(), markup);
        let cache = DictionaryCache::from_map(map);
        assert_eq!(
            cache.plural_for("Bank", "noun, masculine").unwrap().as_deref(),
            Some("Bänke/Banke")
        );
    }

    #[test]
    fn missing_plural_yields_placeholder_and_missing_word_yields_none() {
        let mut map = HashMap::new();
        map.insert("Bank".to_string(), noun_markup(&[("neuter", None)]));
        let cache = DictionaryCache::from_map(map);
        assert_eq!(
            cache.plural_for("Bank", "noun, neuter").unwrap().as_deref(),
            Some(PLURAL_PLACEHOLDER)
        );
        assert_eq!(cache.plural_for("Tisch", "noun, masculine").unwrap(), None);
    }

    #[test]
    fn staleness_follows_modification_times() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache.json");
        let source = dir.path().join("Body.data");
        std::fs::write(&source, b"x").unwrap();
        assert!(is_stale(&cache, &source));
        std::fs::write(&cache, b"{}").unwrap();
        assert!(!is_stale(&cache, &dir.path().join("nicht-da")));
    }
}
