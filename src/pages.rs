//! 抓取页面的解析：Linguee 搜索结果和 verbformen.de 的变位页面

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use unicode_normalization::UnicodeNormalization;

use crate::logs::RunLog;
use crate::models::TranslationCandidate;

// 每个词条最多取前三个译文
const MAX_GLOSSES: usize = 3;

struct Selectors {
    dictionary: Selector,
    foreign_term: Selector,
    exact: Selector,
    inexact: Selector,
    lemma: Selector,
    featured_lemma: Selector,
    lemma_desc: Selector,
    lemma_content: Selector,
    dict_link: Selector,
    lemma_context: Selector,
    word_type: Selector,
    featured_translation: Selector,
    example_lines: Selector,
    example_text: Selector,
    principal_forms: Selector,
}

fn css(selector: &str) -> Selector {
    Selector::parse(selector).expect("CSS 选择器常量必须合法")
}

static SELECTORS: Lazy<Selectors> = Lazy::new(|| Selectors {
    dictionary: css("#dictionary"),
    foreign_term: css(".isForeignTerm"),
    exact: css(".exact"),
    inexact: css(".inexact"),
    lemma: css(".lemma"),
    featured_lemma: css(".lemma.featured"),
    lemma_desc: css(".line.lemma_desc"),
    lemma_content: css(".lemma_content"),
    dict_link: css(".dictLink"),
    lemma_context: css(".tag_lemma_context"),
    word_type: css(".tag_wordtype"),
    featured_translation: css(".translation.sortablemg.featured"),
    example_lines: css(".example_lines"),
    example_text: css(".tag_s"),
    principal_forms: css("#stammformen"),
});

fn first<'a>(element: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    element.select(selector).next()
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// 解析 Linguee 搜索结果页面。
///
/// 默认只使用精确匹配里的精选词条；`comprehensive` 时还使用非精选的精确词条，
/// 以及只有不精确结果时其中的精选词条。返回空列表表示没有候选。
pub fn parse_search_results(
    html: &str,
    comprehensive: bool,
    log: &RunLog,
) -> Result<Vec<TranslationCandidate>> {
    let s = &*SELECTORS;
    let document = Html::parse_document(html);

    let Some(dictionary) = document.select(&s.dictionary).next() else {
        log.line("Linguee 没有这个词的翻译");
        return Ok(Vec::new());
    };
    let Some(results) = first(dictionary, &s.foreign_term) else {
        log.line("Linguee 没有德语词条结果");
        return Ok(Vec::new());
    };

    let mut blocks: Vec<ElementRef<'_>> = Vec::new();
    match (first(results, &s.exact), first(results, &s.inexact)) {
        (Some(exact), _) => {
            log.line("找到精确匹配...");
            let lemma = if comprehensive { &s.lemma } else { &s.featured_lemma };
            blocks.extend(exact.select(lemma));
        }
        (None, Some(inexact)) if comprehensive => {
            log.line("只有不精确结果，全面模式下使用其中的精选词条");
            blocks.extend(inexact.select(&s.featured_lemma));
        }
        (None, Some(_)) => log.line("只有不精确结果，已忽略"),
        (None, None) => log.line("没有找到任何结果"),
    }

    let candidates = blocks
        .into_iter()
        .map(|block| parse_lemma(block, log))
        .collect::<Result<Vec<_>>>()?;

    if !candidates.is_empty() {
        log.line("Linguee 结果:");
        for candidate in &candidates {
            log.line(candidate.to_string());
        }
    }
    Ok(candidates)
}

/// 一个词条块 -> 一条翻译
fn parse_lemma(block: ElementRef<'_>, log: &RunLog) -> Result<TranslationCandidate> {
    let s = &*SELECTORS;

    let description =
        first(block, &s.lemma_desc).ok_or_else(|| anyhow!("词条缺少 lemma_desc 区域"))?;
    let headword =
        first(description, &s.dict_link).ok_or_else(|| anyhow!("词条缺少德语词头"))?;
    let german = format_contents(headword, log);
    let context = first(description, &s.lemma_context).map(|tag| format_contents(tag, log));
    let category = first(description, &s.word_type).map(|tag| format_contents(tag, log));
    let mut candidate = TranslationCandidate::new(german, category, context);

    let content =
        first(block, &s.lemma_content).ok_or_else(|| anyhow!("'{}' 缺少译文区域", candidate.german))?;
    let top: Vec<ElementRef<'_>> = content
        .select(&s.featured_translation)
        .take(MAX_GLOSSES)
        .collect();
    let Some(best) = top.first().copied() else {
        anyhow::bail!("'{}' 没有精选译文", candidate.german);
    };

    let glosses = top
        .iter()
        .map(|gloss| first(*gloss, &s.dict_link).map(text_of))
        .collect::<Option<Vec<String>>>()
        .ok_or_else(|| anyhow!("'{}' 的译文缺少链接文本", candidate.german))?;
    candidate.english = Some(join_glosses(&glosses, candidate.is_verb()));

    candidate.example = first(best, &s.example_lines)
        .and_then(|lines| first(lines, &s.example_text))
        .map(text_of);

    Ok(candidate)
}

/// 译文用 ", " 连接，动词加上 "to "
pub fn join_glosses<S: AsRef<str>>(glosses: &[S], is_verb: bool) -> String {
    let joined = glosses
        .iter()
        .map(|g| g.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    if is_verb {
        format!("to {}", joined)
    } else {
        joined
    }
}

/// 拼出标签文本：grammar_info 放进方括号，其它子标签展开。结果做 NFKD 规范化。
pub fn format_contents(tag: ElementRef<'_>, log: &RunLog) -> String {
    collect_contents(tag, log).nfkd().collect()
}

fn collect_contents(tag: ElementRef<'_>, log: &RunLog) -> String {
    let mut out = String::new();
    for child in tag.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                let inner = collect_contents(child, log);
                if element.classes().any(|c| c == "grammar_info") {
                    out.push('[');
                    out.push_str(&inner);
                    out.push(']');
                } else if element.classes().any(|c| c == "placeholder") {
                    out.push_str(&inner);
                } else {
                    if let Some(class) = element.attr("class") {
                        log.line(format!("发现新的标签 class: {}", class));
                    }
                    out.push_str(&inner);
                }
            }
            _ => {}
        }
    }
    out
}

/// verbformen.de 页面中的基本形式（#stammformen）
pub fn parse_principal_forms(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    document
        .select(&SELECTORS.principal_forms)
        .next()
        .map(text_of)
        .ok_or_else(|| anyhow!("变位页面中没有 stammformen"))
}
