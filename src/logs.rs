use anyhow::{Context, Result};
use chrono::Local;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// 运行日志
///
/// 每天一个文本文件（`<目录>/<YYYY-MM-DD>.txt`，由 tracing-appender 按日轮换）。有两种写法：
/// - `line`：在当前段落后追加一行；
/// - `section`：开启带时间戳的新段落，通常一次运行或一个单词开始时使用。
///
/// 每条日志同时转发给 `tracing`，控制台输出由订阅者决定。
pub struct RunLog {
    sink: Sink,
}

enum Sink {
    Dir(Mutex<RollingFileAppender>),
    Memory(Mutex<Vec<String>>),
    Discard,
}

impl RunLog {
    /// 写入指定目录下的按日日志文件，目录不存在时自动创建
    pub fn to_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_suffix("txt")
            .build(dir)
            .with_context(|| format!("无法打开日志目录 {}", dir.display()))?;
        Ok(Self {
            sink: Sink::Dir(Mutex::new(appender)),
        })
    }

    /// 只记录在内存里，测试时用来检查日志内容
    pub fn memory() -> Self {
        Self {
            sink: Sink::Memory(Mutex::new(Vec::new())),
        }
    }

    /// 只转发给 tracing，不落盘
    pub fn discard() -> Self {
        Self { sink: Sink::Discard }
    }

    /// 追加一行
    pub fn line<S: AsRef<str>>(&self, text: S) {
        let text = text.as_ref();
        tracing::info!("{}", text);
        self.write(&format!("\n{}", text), text);
    }

    /// 开启新的带时间戳段落
    pub fn section<S: AsRef<str>>(&self, text: S) {
        let text = text.as_ref();
        tracing::info!("{}", text);
        let now = Local::now().format("%d/%m/%Y, %H:%M:%S");
        self.write(&format!("\n\n{}\n{}", now, text), text);
    }

    /// 内存模式下已记录的日志（不含时间戳）
    pub fn recorded(&self) -> Vec<String> {
        match &self.sink {
            Sink::Memory(lines) => lines.lock().map(|l| l.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn write(&self, formatted: &str, raw: &str) {
        match &self.sink {
            Sink::Dir(appender) => {
                let Ok(mut appender) = appender.lock() else {
                    return;
                };
                if let Err(e) = appender
                    .write_all(formatted.as_bytes())
                    .and_then(|_| appender.flush())
                {
                    // 日志写不进去不影响主流程
                    tracing::warn!("无法写入日志文件: {}", e);
                }
            }
            Sink::Memory(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(raw.to_string());
                }
            }
            Sink::Discard => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn log_files(dir: &Path) -> Vec<std::path::PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    #[test]
    fn sections_are_timestamped_and_lines_are_not() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let log = RunLog::to_dir(&logs).unwrap();
        log.section("开始运行");
        log.line("第一行");

        let files = log_files(&logs);
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        // 轮换按 UTC 日期命名
        assert_eq!(name, format!("{}.txt", chrono::Utc::now().format("%Y-%m-%d")));

        let content = fs::read_to_string(&files[0]).unwrap();
        let parts: Vec<&str> = content.split('\n').collect();
        // "", "", 时间戳, "开始运行", "第一行"
        assert_eq!(parts.len(), 5);
        assert!(parts[2].contains(", "));
        assert_eq!(parts[3], "开始运行");
        assert_eq!(parts[4], "第一行");
    }

    #[test]
    fn later_logs_append_to_the_same_day_file() {
        let dir = tempfile::tempdir().unwrap();
        RunLog::to_dir(dir.path()).unwrap().line("一");
        RunLog::to_dir(dir.path()).unwrap().line("二");

        let files = log_files(dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "\n一\n二");
    }

    #[test]
    fn memory_sink_records_raw_text() {
        let log = RunLog::memory();
        log.section("a");
        log.line("b");
        assert_eq!(log.recorded(), vec!["a".to_string(), "b".to_string()]);
        assert!(RunLog::discard().recorded().is_empty());
    }
}
