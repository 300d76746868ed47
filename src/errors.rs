//! 词典解析相关的错误类型

use std::path::PathBuf;

/// 词典解析的结果类型
pub type DictionaryResult<T, E = DictionaryError> = std::result::Result<T, E>;

/// 解析 Body.data、词条 XML 或缓存文件时可能出现的错误
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DictionaryError {
    /// 词条边界损坏，整个解析中止
    #[error("词条格式损坏 (块内偏移 {offset}): {snippet}")]
    MalformedEntry { offset: usize, snippet: String },

    /// 词条不是合法的 UTF-8
    #[error("词条不是合法的 UTF-8 (块内偏移 {offset})")]
    InvalidUtf8 {
        offset: usize,
        #[source]
        source: std::str::Utf8Error,
    },

    /// 根元素上找不到 d:title
    #[error("词条缺少标题属性: {snippet}")]
    MissingTitle { snippet: String },

    /// XML 无法解析
    #[error("XML 解析失败: {message}")]
    Xml { message: String },

    /// 读写文件失败
    #[error("无法访问 {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 缓存文件内容无法反序列化
    #[error("缓存文件 {} 格式错误", path.display())]
    CorruptedCache {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl DictionaryError {
    pub(crate) fn malformed_entry(offset: usize, text: &str) -> Self {
        Self::MalformedEntry {
            offset,
            snippet: snippet(text),
        }
    }

    pub(crate) fn missing_title(text: &str) -> Self {
        Self::MissingTitle {
            snippet: snippet(text),
        }
    }

    pub(crate) fn xml<E: std::fmt::Display>(e: E) -> Self {
        Self::Xml {
            message: e.to_string(),
        }
    }

    pub(crate) fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// 错误信息里只保留开头一小段，避免把整个词条打进日志
fn snippet(text: &str) -> String {
    const MAX_CHARS: usize = 120;
    if text.chars().count() <= MAX_CHARS {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX_CHARS).collect();
        format!("{}…", head)
    }
}
