//! 日志系统
//!
//! 控制台输出 + 可选的文件持久化。文件按启动时间命名、按大小滚动，启动时清理过期文件

use crate::config::LogConfig;
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_PREFIX: &str = "filemanager-rust.";
const LOG_SUFFIX: &str = ".log";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 滚动写入状态
struct RollingState {
    /// 启动时间戳（YYYY-MM-DD-HHMMSS）
    started_at: String,
    log_dir: PathBuf,
    file: Option<File>,
    /// 0 为首个文件，之后依次 _1、_2 ...
    index: u32,
    max_file_size: u64,
    written: u64,
}

impl RollingState {
    fn open(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let mut state = Self {
            started_at: Local::now().format("%Y-%m-%d-%H%M%S").to_string(),
            log_dir,
            file: None,
            index: 0,
            max_file_size,
            written: 0,
        };
        state.open_current()?;
        Ok(state)
    }

    fn file_path(&self) -> PathBuf {
        let name = if self.index == 0 {
            format!("{}{}{}", LOG_PREFIX, self.started_at, LOG_SUFFIX)
        } else {
            format!("{}{}_{}{}", LOG_PREFIX, self.started_at, self.index, LOG_SUFFIX)
        };
        self.log_dir.join(name)
    }

    fn open_current(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(self.file_path())?;
        self.file = Some(file);
        self.written = 0;
        Ok(())
    }

    fn write_chunk(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 单文件为空时不滚动，避免超大单条日志导致无限换文件
        if self.written > 0 && self.written + buf.len() as u64 > self.max_file_size {
            if let Some(mut file) = self.file.take() {
                file.flush()?;
            }
            self.index += 1;
            self.open_current()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件未打开"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 按大小滚动的日志文件写入器
///
/// 克隆后共享同一个文件状态，交给 tracing-appender 的后台线程使用
#[derive(Clone)]
pub struct RollingFileWriter {
    state: Arc<Mutex<RollingState>>,
}

impl RollingFileWriter {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        Ok(Self {
            state: Arc::new(Mutex::new(RollingState::open(log_dir, max_file_size)?)),
        })
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, RollingState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "日志写入器锁已损坏"))
    }
}

impl Write for RollingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write_chunk(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

/// 日志守卫，进程结束前必须保持存活
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

fn console_only(env_filter: EnvFilter) -> LogGuard {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(true);
    // 测试中可能重复初始化，忽略已存在的全局订阅器
    let _ = tracing_subscriber::registry().with(env_filter).with(console_layer).try_init();
    LogGuard { _file_guard: None }
}

/// 初始化日志系统
///
/// # 参数
/// - config: [log] 配置段
///
/// # 返回
/// 日志守卫；文件目录不可用时自动回退为仅控制台输出
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if !config.enabled {
        let guard = console_only(env_filter);
        info!("日志系统初始化完成（仅控制台输出）");
        return guard;
    }

    if let Err(e) = fs::create_dir_all(&config.log_dir) {
        eprintln!("创建日志目录失败: {:?}, 错误: {}", config.log_dir, e);
        return console_only(env_filter);
    }

    let writer = match RollingFileWriter::new(config.log_dir.clone(), config.max_file_size) {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("创建日志文件失败: {}, 回退到仅控制台输出", e);
            return console_only(env_filter);
        }
    };
    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(true);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
        config.log_dir,
        config.retention_days,
        config.level,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );

    let removed = cleanup_old_logs(&config.log_dir, config.retention_days);
    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 从日志文件名中取出日期（YYYY-MM-DD）
fn date_of(file_name: &str) -> Option<chrono::NaiveDate> {
    let stem = file_name.strip_prefix(LOG_PREFIX)?.strip_suffix(LOG_SUFFIX)?;
    let date = stem.get(..10)?;
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn modified_before(path: &Path, retention: chrono::Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| {
            let modified: chrono::DateTime<chrono::Utc> = modified.into();
            chrono::Utc::now().signed_duration_since(modified) > retention
        })
        .unwrap_or(false)
}

/// 删除超过保留天数的日志文件，返回删除数量
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> usize {
    let today = Local::now().date_naive();
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !name.starts_with(LOG_PREFIX) || !name.ends_with(LOG_SUFFIX) {
            continue;
        }

        let expired = match date_of(name) {
            Some(date) => today.signed_duration_since(date) > retention,
            None => modified_before(&path, retention),
        };
        if !expired {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                tracing::debug!("已删除过期日志文件: {:?}", path);
            }
            Err(e) => tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_date_of() {
        assert_eq!(
            date_of("filemanager-rust.2024-03-05-101112_2.log"),
            chrono::NaiveDate::from_ymd_opt(2024, 3, 5)
        );
        assert_eq!(date_of("other.2024-03-05.log"), None);
        assert_eq!(date_of("filemanager-rust.garbage.log"), None);
    }

    #[test]
    fn test_rolling_writer_rotates() {
        let dir = TempDir::new().unwrap();
        let mut writer = RollingFileWriter::new(dir.path().to_path_buf(), 16).unwrap();
        writer.write_all(b"0123456789").unwrap();
        writer.write_all(b"0123456789").unwrap();
        writer.flush().unwrap();

        let count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_cleanup_keeps_recent_logs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("filemanager-rust.2000-01-01-000000.log"), "old").unwrap();
        let recent = format!("filemanager-rust.{}.log", Local::now().format("%Y-%m-%d-%H%M%S"));
        fs::write(dir.path().join(&recent), "new").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 7), 1);
        assert!(dir.path().join(&recent).exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
