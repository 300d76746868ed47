//! 词条存储
//!
//! 同一词头的多个片段先合并成一个词条；之后为每个词条里出现的派生词、
//! 加粗的相关词建立反向链接，让这些词查到原词条。
//!
//! 词条放在一个 arena 里，用 `EntryId` 寻址，反向链接只保存 id。
//! 构建完成后词条不再修改，多个键指向同一个词条是安全的。

use once_cell::sync::OnceCell;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use crate::archive::RawEntry;
use crate::errors::DictionaryResult;
use crate::logs::RunLog;
use crate::markup::Element;

/// 词条在 arena 中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

/// 从词条 XML 中提取出的词
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedWords {
    /// 词条末尾列出的派生词、变形
    pub derivatives: BTreeSet<String>,
    /// 释义中加粗的相关词（已去掉 "the"）
    pub other_words: BTreeSet<String>,
    /// 语体标注，例如 "literary"、"informal"
    pub info: BTreeSet<String>,
}

#[derive(Debug)]
pub struct Entry {
    key: String,
    content: String,
    fragments: usize,
    derived: OnceCell<DerivedWords>,
}

impl Entry {
    fn new(key: String, content: String) -> Self {
        Self {
            key,
            content,
            fragments: 1,
            derived: OnceCell::new(),
        }
    }

    // 只在构建阶段调用
    fn append_definition(&mut self, content: &str) {
        self.content.push_str(content);
        self.fragments += 1;
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 是否由多个片段合并而来
    pub fn is_merged(&self) -> bool {
        self.fragments > 1
    }

    /// 可解析的 XML 文本。合并过的词条外面包一层 `<div>`。
    pub fn xml_source(&self) -> Cow<'_, str> {
        if self.is_merged() {
            Cow::Owned(format!("<div>{}</div>", self.content))
        } else {
            Cow::Borrowed(&self.content)
        }
    }

    pub fn parse(&self) -> DictionaryResult<Element> {
        Element::parse(&self.xml_source())
    }

    /// 缩进后的释义 XML，写进缓存用
    pub fn render(&self) -> DictionaryResult<String> {
        Ok(self.parse()?.render_pretty())
    }

    /// 派生词等信息。第一次调用时解析 XML 并计算，之后直接返回保存的结果；
    /// 解析失败不会被缓存，下次调用会重新尝试。
    pub fn derived(&self) -> DictionaryResult<&DerivedWords> {
        self.derived.get_or_try_init(|| {
            let root = self.parse()?;
            Ok(DerivedWords {
                derivatives: derivatives(&root),
                other_words: other_words(&root),
                info: info_tags(&root),
            })
        })
    }

    /// 派生词和相关词的并集，去掉词头本身
    pub fn words_and_derivatives(&self) -> DictionaryResult<BTreeSet<String>> {
        let derived = self.derived()?;
        Ok(derived
            .derivatives
            .union(&derived.other_words)
            .filter(|word| **word != self.key)
            .cloned()
            .collect())
    }

    pub fn info(&self) -> DictionaryResult<&BTreeSet<String>> {
        Ok(&self.derived()?.info)
    }
}

fn is_span(element: &Element) -> bool {
    element.name == "span"
}

fn collect_texts<'a, I>(elements: I, strip_the: bool) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Element>,
{
    elements
        .into_iter()
        .filter_map(|element| element.leading_text())
        .map(|text| {
            if strip_the {
                text.replace("the", "").trim().to_string()
            } else {
                text.trim().to_string()
            }
        })
        .filter(|text| !text.is_empty())
        .collect()
}

// span[contains(@class,"t_derivatives")] // span[contains(@class,"x_xoh")] / span[@role="text"]
fn derivatives(root: &Element) -> BTreeSet<String> {
    let mut matches = Vec::new();
    for section in root.descendants_where(|e| is_span(e) && e.class_contains("t_derivatives")) {
        for item in section.descendants_where(|e| is_span(e) && e.class_contains("x_xoh")) {
            matches.extend(
                item.child_elements()
                    .filter(|e| is_span(e) && e.attr("role") == Some("text")),
            );
        }
    }
    collect_texts(matches, false)
}

// span[@class="fg"] / span[@class="f"]
fn other_words(root: &Element) -> BTreeSet<String> {
    let matches = root
        .descendants_where(|e| is_span(e) && e.class_is("fg"))
        .into_iter()
        .flat_map(|group| group.child_elements().filter(|e| is_span(e) && e.class_is("f")));
    collect_texts(matches, true)
}

// span[@class="lg"] / span[@class="reg"]
fn info_tags(root: &Element) -> BTreeSet<String> {
    let matches = root
        .descendants_where(|e| is_span(e) && e.class_is("lg"))
        .into_iter()
        .flat_map(|group| group.child_elements().filter(|e| is_span(e) && e.class_is("reg")));
    collect_texts(matches, false)
}

/// 词头到词条的映射
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: Vec<Entry>,
    index: HashMap<String, EntryId>,
}

impl EntryStore {
    /// 合并同键词条并建立反向链接
    pub fn build(raw_entries: Vec<RawEntry>, log: &RunLog) -> Self {
        log.line("合并同名词条...");
        let mut store = Self::merge(raw_entries);
        log.line(format!("共 {} 个词条，建立链接...", store.entries.len()));
        let added = store.resolve_links(log);
        log.line(format!("新增 {} 个派生词链接", added));
        store
    }

    /// 按键合并，保持第一次出现的顺序
    pub fn merge(raw_entries: Vec<RawEntry>) -> Self {
        let mut store = Self::default();
        for RawEntry { key, xml } in raw_entries {
            match store.index.get(&key) {
                Some(id) => store.entries[id.0].append_definition(&xml),
                None => {
                    let id = EntryId(store.entries.len());
                    store.index.insert(key.clone(), id);
                    store.entries.push(Entry::new(key, xml));
                }
            }
        }
        store
    }

    /// 为每个词条的派生词 / 相关词插入指向原词条的键。
    /// 已经存在的键不会被覆盖。返回新增的键数量。
    pub fn resolve_links(&mut self, log: &RunLog) -> usize {
        let total = self.entries.len();
        let mut added = 0;

        for i in 0..total {
            if i % 1000 == 0 && i > 0 {
                tracing::debug!("建立链接: {:.1}%", i as f64 / total as f64 * 100.0);
            }
            let entry = &self.entries[i];
            let words = match entry.words_and_derivatives() {
                Ok(words) => words,
                Err(e) => {
                    log.line(format!("词条 '{}' 的 XML 无法解析，跳过链接: {}", entry.key, e));
                    continue;
                }
            };
            for word in words {
                if !self.index.contains_key(&word) {
                    self.index.insert(word, EntryId(i));
                    added += 1;
                }
            }
        }

        added
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.index.get(key).map(|id| &self.entries[id.0])
    }

    pub fn id_of(&self, key: &str) -> Option<EntryId> {
        self.index.get(key).copied()
    }

    /// 键的数量（包含反向链接）
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// 实际词条数量
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// 所有键及其词条，顺序不固定
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.index
            .iter()
            .map(|(key, id)| (key.as_str(), &self.entries[id.0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::entry;

    fn raw(key: &str, body: &str) -> RawEntry {
        RawEntry {
            key: key.to_string(),
            xml: entry(key, body),
        }
    }

    fn derivative(word: &str) -> String {
        format!(
            r#"<span class="t_derivatives"><span class="x_xoh z"><span role="text">{}</span></span></span>"#,
            word
        )
    }

    #[test]
    fn merges_same_key_into_one_parseable_entry() {
        let store = EntryStore::merge(vec![
            raw("Bank", "<span>bench</span>"),
            raw("Bank", "<span>bank</span>"),
        ]);
        assert_eq!(store.entry_count(), 1);
        let bank = store.get("Bank").unwrap();
        assert!(bank.is_merged());

        let root = bank.parse().unwrap();
        assert_eq!(root.name, "div");
        let rendered = bank.render().unwrap();
        assert!(rendered.contains("bench"));
        assert!(rendered.contains("bank"));
        assert!(Element::parse(&rendered).is_ok());
    }

    #[test]
    fn derivatives_link_back_to_the_origin_entry() {
        let log = RunLog::discard();
        let store = EntryStore::build(
            vec![raw("laufen", &derivative("läuft")), raw("gehen", "")],
            &log,
        );
        assert_eq!(store.id_of("läuft"), store.id_of("laufen"));
        assert_eq!(store.get("läuft").unwrap().key(), "laufen");
        assert_eq!(store.len(), 3);
        assert_eq!(store.entry_count(), 2);
    }

    #[test]
    fn links_never_clobber_existing_keys() {
        let log = RunLog::discard();
        let store = EntryStore::build(
            vec![
                raw("laufen", &derivative("Lauf")),
                raw("rennen", &derivative("Renner")),
                raw("Lauf", "<span>run</span>"),
                raw("sprinten", &derivative("Renner")),
            ],
            &log,
        );
        // 直接解析出的词条优先
        assert_eq!(store.get("Lauf").unwrap().key(), "Lauf");
        // 先建立的链接优先
        assert_eq!(store.get("Renner").unwrap().key(), "rennen");
    }

    #[test]
    fn link_resolution_is_idempotent() {
        let log = RunLog::discard();
        let mut store = EntryStore::build(vec![raw("laufen", &derivative("lief"))], &log);
        let before = store.len();
        assert_eq!(store.resolve_links(&log), 0);
        assert_eq!(store.len(), before);
    }

    #[test]
    fn other_words_strip_the_and_skip_own_key() {
        let body = r#"<span class="fg"><span class="f">the Vitals</span></span><span class="fg"><span class="f">vital</span></span>"#;
        let store = EntryStore::merge(vec![raw("vital", body)]);
        let words = store.get("vital").unwrap().words_and_derivatives().unwrap();
        assert_eq!(words.into_iter().collect::<Vec<_>>(), vec!["Vitals".to_string()]);
    }

    #[test]
    fn info_tags_are_extracted_once() {
        let body = r#"<span class="lg"><span class="reg">informal</span></span>"#;
        let store = EntryStore::merge(vec![raw("Kumpel", body)]);
        let entry = store.get("Kumpel").unwrap();
        let first = entry.derived().unwrap();
        let second = entry.derived().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(entry.info().unwrap().contains("informal"));
    }

    #[test]
    fn unparsable_entry_is_skipped_without_aborting() {
        let log = RunLog::memory();
        let store = EntryStore::build(
            vec![
                raw("kaputt", "<span>&unbekannt;</span>"),
                raw("heil", &derivative("heile")),
            ],
            &log,
        );
        assert!(store.get("heile").is_some());
        assert!(log.recorded().iter().any(|l| l.contains("kaputt")));
    }
}
