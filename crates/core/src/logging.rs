use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const DEFAULT_MAX_FILE_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub directory: PathBuf,
    /// Base name; files are `<file_name>.log` and `<file_name>.log.1`.
    pub file_name: String,
    pub max_file_bytes: u64,
    pub to_stderr: bool,
}

impl LogConfig {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            directory: default_log_dir(),
            file_name: file_name.into(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            to_stderr: false,
        }
    }
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".filewatchd")
        .join("logs")
}

/// Size-capped log file that keeps at most one rotated predecessor.
pub struct RollingFileWriter {
    active: PathBuf,
    rotated: PathBuf,
    max_bytes: u64,
    file: File,
    written: u64,
}

impl RollingFileWriter {
    pub fn open(directory: &Path, file_name: &str, max_bytes: u64) -> io::Result<Self> {
        fs::create_dir_all(directory)?;
        let active = directory.join(format!("{file_name}.log"));
        let rotated = directory.join(format!("{file_name}.log.1"));
        let file = open_append(&active)?;
        let written = file.metadata()?.len();
        Ok(Self {
            active,
            rotated,
            max_bytes,
            file,
            written,
        })
    }

    pub fn active_path(&self) -> &Path {
        &self.active
    }

    pub fn rotated_path(&self) -> &Path {
        &self.rotated
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.rotated.exists() {
            fs::remove_file(&self.rotated)?;
        }
        fs::rename(&self.active, &self.rotated)?;
        self.file = open_append(&self.active)?;
        self.written = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for RollingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A single oversized record still lands whole in a fresh file.
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Installs the global subscriber. Keep the guard alive until exit so the
/// background writer drains. Fails if a global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> io::Result<WorkerGuard> {
    let writer =
        RollingFileWriter::open(&config.directory, &config.file_name, config.max_file_bytes)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if config.to_stderr {
        let stderr_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_ansi(true)
            .with_target(false);
        registry.with(stderr_layer).try_init().map_err(io::Error::other)?;
    } else {
        registry.try_init().map_err(io::Error::other)?;
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_into_single_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RollingFileWriter::open(dir.path(), "daemon", 10).unwrap();

        writer.write_all(b"aaaaaaaa\n").unwrap();
        writer.write_all(b"bbbbbbbb\n").unwrap();
        writer.write_all(b"cccccccc\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(writer.active_path()).unwrap(), "cccccccc\n");
        assert_eq!(fs::read_to_string(writer.rotated_path()).unwrap(), "bbbbbbbb\n");
        let files = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 2);
    }

    #[test]
    fn reopening_continues_existing_size() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = RollingFileWriter::open(dir.path(), "daemon", 16).unwrap();
            writer.write_all(b"0123456789\n").unwrap();
        }
        let mut writer = RollingFileWriter::open(dir.path(), "daemon", 16).unwrap();
        writer.write_all(b"abcdefghij\n").unwrap();

        assert_eq!(fs::read_to_string(writer.rotated_path()).unwrap(), "0123456789\n");
        assert_eq!(fs::read_to_string(writer.active_path()).unwrap(), "abcdefghij\n");
    }

    #[test]
    fn default_config_uses_home_directory() {
        let config = LogConfig::new("filewatchd");
        assert!(config.directory.ends_with(".filewatchd/logs"));
        assert_eq!(config.max_file_bytes, DEFAULT_MAX_FILE_BYTES);
    }

    #[test]
    fn second_initialization_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LogConfig::new("daemon");
        config.directory = dir.path().to_path_buf();

        let _guard = init_logging(&config).unwrap();
        tracing::info!("first subscriber installed");
        assert!(init_logging(&config).is_err());
    }
}
