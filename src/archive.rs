//! Apple 词典 Body.data 拆分
//!
//! Body.data 没有目录：一段段独立的 zlib 压缩块首尾相接，中间夹着不压缩的杂质字节。
//! 做法是逐字节尝试解压，成功后按换行切出 `<d:entry>` 词条，
//! 然后从压缩块末尾的下一个字节继续寻找。

use flate2::{Decompress, FlushDecompress, Status};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;

use crate::errors::{DictionaryError, DictionaryResult};
use crate::logs::RunLog;

/// 文件开头不含词条数据的字节数
pub const HEADER_LEN: usize = 100;
// 每个解压块开头的非 UTF-8 字节
const BLOCK_PREFIX_LEN: usize = 4;
// 换行加上词条之间的 4 个杂质字节
const ENTRY_GAP: usize = 5;
// 出现这个标题说明后面都是元数据
const END_OF_DATA_MARKER: &str = "fbm_AdvisoryBoard";
const MARKER_WINDOW_CHARS: usize = 1000;
const ENTRY_OPEN: &str = "<d:entry";
const ENTRY_CLOSE: &str = "</d:entry>";
const ENTRY_NS_PREFIX: &str = "d";

/// 从压缩块中切出的一个词条
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub key: String,
    pub xml: String,
}

pub struct ArchiveSplitter<'a> {
    log: &'a RunLog,
}

impl<'a> ArchiveSplitter<'a> {
    pub fn new(log: &'a RunLog) -> Self {
        Self { log }
    }

    /// 读取并拆分 Body.data 文件
    pub fn split_file(&self, path: &Path) -> DictionaryResult<Vec<RawEntry>> {
        self.log.line(format!("解析 {}...", path.display()));
        let bytes = std::fs::read(path).map_err(|e| DictionaryError::io(path, e))?;
        self.split(&bytes)
    }

    /// 拆分整个字节块，按出现顺序返回所有词条
    pub fn split(&self, bytes: &[u8]) -> DictionaryResult<Vec<RawEntry>> {
        let total = bytes.len();
        let mut offset = HEADER_LEN.min(total);
        let mut entries = Vec::new();
        let mut segments = 0usize;

        while offset < total {
            let Some((block, consumed)) = inflate_segment(&bytes[offset..]) else {
                // 当前位置不是压缩块，跳过一个字节
                offset += 1;
                continue;
            };

            let (block_entries, stop) = split_block(&block)?;
            entries.extend(block_entries);
            if stop {
                self.log.line(format!("检测到 {}，停止解析", END_OF_DATA_MARKER));
                break;
            }

            segments += 1;
            if segments % 10 == 0 {
                let progress = offset as f64 / total as f64 * 100.0;
                let latest = entries.last().map(|e| e.key.as_str()).unwrap_or("-");
                self.log.line(format!(
                    "{:.1}% // 已解析 {} 个词条 // 最新词条: {}",
                    progress,
                    entries.len(),
                    latest
                ));
            }
            offset += consumed.max(1);
        }

        Ok(entries)
    }
}

// zlib 头：CM = 8、窗口不超过 32K、FCHECK 校验
fn looks_like_zlib_header(bytes: &[u8]) -> bool {
    match bytes {
        [cmf, flg, ..] => {
            (cmf & 0x0f) == 8
                && (cmf >> 4) <= 7
                && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    }
}

/// 从 `input` 开头解压一个完整的 zlib 流，返回解压结果和消耗的输入字节数
fn inflate_segment(input: &[u8]) -> Option<(Vec<u8>, usize)> {
    if !looks_like_zlib_header(input) {
        return None;
    }

    let mut inflater = Decompress::new(true);
    let mut output = Vec::with_capacity(64 * 1024);

    loop {
        if output.len() == output.capacity() {
            output.reserve(output.capacity().max(4096));
        }
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();

        match inflater.decompress_vec(&input[consumed..], &mut output, FlushDecompress::None) {
            Ok(Status::StreamEnd) => return Some((output, inflater.total_in() as usize)),
            Ok(Status::Ok) | Ok(Status::BufError) => {
                let stalled =
                    inflater.total_in() as usize == consumed && inflater.total_out() == produced;
                // 输入耗尽但流没有结束：不算一个完整的压缩块
                if stalled && output.len() < output.capacity() {
                    return None;
                }
            }
            Err(_) => return None,
        }
    }
}

/// 切分一个解压后的块。第二个返回值表示遇到了元数据区，应停止整个解析。
fn split_block(block: &[u8]) -> DictionaryResult<(Vec<RawEntry>, bool)> {
    let mut rest = block.get(BLOCK_PREFIX_LEN..).unwrap_or(&[]);
    let mut offset = BLOCK_PREFIX_LEN;
    let mut entries = Vec::new();

    while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
        let text = std::str::from_utf8(&rest[..newline])
            .map_err(|source| DictionaryError::InvalidUtf8 { offset, source })?;

        if marker_window(text).contains(END_OF_DATA_MARKER) {
            return Ok((entries, true));
        }

        if !(text.starts_with(ENTRY_OPEN) && text.ends_with(ENTRY_CLOSE)) {
            return Err(DictionaryError::malformed_entry(offset, text));
        }

        entries.push(RawEntry {
            key: entry_title(text)?,
            xml: text.to_string(),
        });

        let advance = (newline + ENTRY_GAP).min(rest.len());
        rest = &rest[advance..];
        offset += advance;
    }

    Ok((entries, false))
}

fn marker_window(text: &str) -> &str {
    match text.char_indices().nth(MARKER_WINDOW_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// 读取根元素上的 `d:title`。
///
/// 前缀 `d` 绑定的命名空间 URI 从根元素的 `xmlns:d` 声明里取，
/// 然后找绑定到同一 URI 的 `title` 属性。
pub fn entry_title(text: &str) -> DictionaryResult<String> {
    let mut reader = Reader::from_str(text);
    let start = loop {
        match reader.read_event().map_err(DictionaryError::xml)? {
            Event::Start(start) | Event::Empty(start) => break start,
            Event::Eof => return Err(DictionaryError::missing_title(text)),
            _ => {}
        }
    };

    let mut bindings: Vec<(String, String)> = Vec::new();
    let mut attributes: Vec<(String, String)> = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(DictionaryError::xml)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(DictionaryError::xml)?
            .into_owned();
        match key.strip_prefix("xmlns:") {
            Some(prefix) => bindings.push((prefix.to_string(), value)),
            None => attributes.push((key, value)),
        }
    }

    let namespace = bindings
        .iter()
        .find(|(prefix, _)| prefix == ENTRY_NS_PREFIX)
        .map(|(_, uri)| uri.as_str())
        .ok_or_else(|| DictionaryError::missing_title(text))?;

    attributes
        .iter()
        .find_map(|(key, value)| {
            let (prefix, local) = key.split_once(':')?;
            let (_, uri) = bindings.iter().find(|(p, _)| p == prefix)?;
            (uri == namespace && local == "title").then(|| value.clone())
        })
        .ok_or_else(|| DictionaryError::missing_title(text))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub(crate) const NS: &str = "http://www.apple.com/DTDs/DictionaryService-1.0.rng";

    pub(crate) fn entry(title: &str, body: &str) -> String {
        format!(
            r#"<d:entry xmlns:d="{}" id="x" d:title="{}">{}</d:entry>"#,
            NS, title, body
        )
    }

    fn block(entries: &[String]) -> Vec<u8> {
        let mut raw = vec![0x01, 0x02, 0x03, 0x04];
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                raw.extend_from_slice(&[0x00, 0x00, 0x01, 0x2a]);
            }
            raw.extend_from_slice(entry.as_bytes());
            raw.push(b'\n');
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap()
    }

    pub(crate) fn archive(blocks: &[Vec<String>]) -> Vec<u8> {
        let mut bytes = vec![0xab; HEADER_LEN];
        for entries in blocks {
            bytes.extend_from_slice(&[0xee; 37]);
            bytes.extend(block(entries));
        }
        bytes.extend_from_slice(&[0xee; 11]);
        bytes
    }

    #[test]
    fn splits_entries_across_blocks_in_order() {
        let bytes = archive(&[
            vec![entry("Haus", "<span>house</span>"), entry("Maus", "")],
            vec![entry("Käse", "<span>cheese</span>")],
        ]);
        let log = RunLog::memory();
        let entries = ArchiveSplitter::new(&log).split(&bytes).unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["Haus", "Maus", "Käse"]);
        assert_eq!(entries[0].xml, entry("Haus", "<span>house</span>"));
    }

    #[test]
    fn splitting_is_idempotent() {
        let bytes = archive(&[vec![entry("a", ""), entry("b", "")], vec![entry("c", "")]]);
        let log = RunLog::discard();
        let splitter = ArchiveSplitter::new(&log);
        assert_eq!(splitter.split(&bytes).unwrap(), splitter.split(&bytes).unwrap());
    }

    #[test]
    fn stops_at_advisory_board() {
        let advisory = format!(
            r#"<d:entry xmlns:d="{}" d:title="{}">board</d:entry>"#,
            NS, END_OF_DATA_MARKER
        );
        let bytes = archive(&[
            vec![entry("eins", "")],
            vec![advisory, entry("zwei", "")],
            vec![entry("drei", "")],
        ]);
        let log = RunLog::memory();
        let entries = ArchiveSplitter::new(&log).split(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "eins");
        assert!(log.recorded().iter().any(|l| l.contains(END_OF_DATA_MARKER)));
    }

    #[test]
    fn malformed_entry_is_fatal() {
        let bytes = archive(&[vec![entry("gut", ""), "<div>kaputt</div>".to_string()]]);
        let log = RunLog::discard();
        let err = ArchiveSplitter::new(&log).split(&bytes).unwrap_err();
        assert!(matches!(err, DictionaryError::MalformedEntry { .. }));
    }

    #[test]
    fn title_namespace_is_resolved_from_declaration() {
        let text = r#"<d:entry xmlns:d="urn:other" xmlns:x="urn:x" x:title="falsch" d:title="richtig"></d:entry>"#;
        assert_eq!(entry_title(text).unwrap(), "richtig");

        let undeclared = r#"<d:entry d:title="ohne"></d:entry>"#;
        assert!(matches!(
            entry_title(undeclared),
            Err(DictionaryError::MissingTitle { .. })
        ));
    }

    #[test]
    fn noise_only_input_yields_nothing() {
        let log = RunLog::discard();
        let splitter = ArchiveSplitter::new(&log);
        assert!(splitter.split(&[0x78; 300]).unwrap().is_empty());
        assert!(splitter.split(&[]).unwrap().is_empty());
    }
}
