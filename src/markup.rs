//! 词典词条用的简易 XML 元素树
//!
//! 词条 XML 只需要：解析、按 class / 属性做结构化查询、以及缩进输出。
//! 这里用 quick-xml 的事件流构建一棵自有的元素树，不做命名空间解析，
//! 元素名和属性名保留原始的带前缀形式（例如 `d:entry`、`d:title`）。

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::errors::{DictionaryError, DictionaryResult};

/// XML 节点
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// XML 元素
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// 解析只有一个根元素的 XML 文本
    pub fn parse(xml: &str) -> DictionaryResult<Element> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event().map_err(DictionaryError::xml)? {
                Event::Start(start) => {
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| DictionaryError::xml("多余的结束标签"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(DictionaryError::xml)?;
                    push_text(&mut stack, &text)?;
                }
                Event::CData(data) => {
                    let text = std::str::from_utf8(&data).map_err(DictionaryError::xml)?;
                    push_text(&mut stack, text)?;
                }
                Event::Eof => break,
                // 注释、声明、处理指令都不需要
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(DictionaryError::xml(format!(
                "元素 <{}> 没有闭合",
                stack[stack.len() - 1].name
            )));
        }
        root.ok_or_else(|| DictionaryError::xml("没有根元素"))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// class 属性完全等于 `value`
    pub fn class_is(&self, value: &str) -> bool {
        self.attr("class") == Some(value)
    }

    /// class 属性的子串包含 `needle`（对应 XPath 的 contains(@class, ..)）
    pub fn class_contains(&self, needle: &str) -> bool {
        self.attr("class").is_some_and(|class| class.contains(needle))
    }

    /// class 属性按空白分隔后包含 `token`
    pub fn has_class(&self, token: &str) -> bool {
        self.attr("class")
            .is_some_and(|class| class.split_whitespace().any(|c| c == token))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// 第一个子元素之前的文本
    pub fn leading_text(&self) -> Option<&str> {
        match self.children.first() {
            Some(Node::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// 元素只有一个文本子节点时返回该文本
    pub fn only_text(&self) -> Option<&str> {
        match self.children.as_slice() {
            [Node::Text(text)] => Some(text),
            _ => None,
        }
    }

    /// 所有后代文本按文档顺序拼接
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// 先序遍历（包含自身）
    pub fn preorder(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        collect_preorder(self, &mut out);
        out
    }

    /// 满足条件的后代元素（不含自身），按文档顺序
    pub fn descendants_where<F>(&self, predicate: F) -> Vec<&Element>
    where
        F: Fn(&Element) -> bool,
    {
        self.preorder()
            .into_iter()
            .skip(1)
            .filter(|&element| predicate(element))
            .collect()
    }

    /// 缩进输出。只包含元素子节点的元素会换行缩进，含有文本的混合内容原样输出。
    pub fn render_pretty(&self) -> String {
        let mut out = String::new();
        render(self, 0, true, &mut out);
        out.push('\n');
        out
    }
}

fn element_from_start(start: &BytesStart<'_>) -> DictionaryResult<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(DictionaryError::xml)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(DictionaryError::xml)?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> DictionaryResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(DictionaryError::xml(format!(
            "存在多个根元素 (<{}>)",
            element.name
        ))),
    }
}

fn push_text(stack: &mut [Element], text: &str) -> DictionaryResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            // 相邻文本合并，和 DOM 的行为一致
            if let Some(Node::Text(previous)) = parent.children.last_mut() {
                previous.push_str(text);
            } else {
                parent.children.push(Node::Text(text.to_string()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(DictionaryError::xml("根元素之外出现文本")),
    }
}

fn collect_text(element: &Element, out: &mut String) {
    for child in &element.children {
        match child {
            Node::Text(text) => out.push_str(text),
            Node::Element(child) => collect_text(child, out),
        }
    }
}

fn collect_preorder<'a>(element: &'a Element, out: &mut Vec<&'a Element>) {
    out.push(element);
    for child in element.child_elements() {
        collect_preorder(child, out);
    }
}

fn render(element: &Element, depth: usize, pretty: bool, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value.as_str()));
        out.push('"');
    }
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');

    let mixed = element
        .children
        .iter()
        .any(|child| matches!(child, Node::Text(text) if !text.trim().is_empty()));

    if pretty && !mixed && element.child_elements().next().is_some() {
        for child in element.child_elements() {
            out.push('\n');
            out.push_str(&"  ".repeat(depth + 1));
            render(child, depth + 1, true, out);
        }
        out.push('\n');
        out.push_str(&"  ".repeat(depth));
    } else {
        for child in &element.children {
            match child {
                Node::Text(text) => out.push_str(&escape(text.as_str())),
                Node::Element(child) => render(child, depth + 1, false, out),
            }
        }
    }

    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attributes_and_mixed_text() {
        let root = Element::parse(
            r#"<d:entry xmlns:d="urn:dict" d:title="Haus"><span class="hw">Haus <b>n</b> tail</span></d:entry>"#,
        )
        .unwrap();
        assert_eq!(root.name, "d:entry");
        assert_eq!(root.attr("d:title"), Some("Haus"));
        let span = root.child_elements().next().unwrap();
        assert_eq!(span.leading_text(), Some("Haus "));
        assert_eq!(span.text(), "Haus n tail");
    }

    #[test]
    fn rejects_multiple_roots_and_unclosed_elements() {
        assert!(Element::parse("<a/><b/>").is_err());
        assert!(Element::parse("<a><b></a>").is_err());
        assert!(Element::parse("   ").is_err());
    }

    #[test]
    fn class_matching_modes() {
        let root = Element::parse(r#"<span class="gramb x_xd0"/>"#).unwrap();
        assert!(root.class_is("gramb x_xd0"));
        assert!(root.has_class("x_xd0"));
        assert!(!root.has_class("x_xd"));
        assert!(root.class_contains("x_xd"));
    }

    #[test]
    fn pretty_render_indents_element_only_content() {
        let root =
            Element::parse(r#"<div><p>a &amp; b</p><p><i>x</i> y</p><br/></div>"#).unwrap();
        let rendered = root.render_pretty();
        assert_eq!(
            rendered,
            "<div>\n  <p>a &amp; b</p>\n  <p><i>x</i> y</p>\n  <br/>\n</div>\n"
        );
        // 再解析一遍输出，结果不变
        assert_eq!(Element::parse(&rendered).unwrap().render_pretty(), rendered);
    }

    #[test]
    fn preorder_follows_document_order() {
        let root = Element::parse("<a><b><c/></b><d/></a>").unwrap();
        let names: Vec<&str> = root.preorder().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }
}
