//! Size-rotating log file writer.
//!
//! The engine logs through `tracing`; when a log directory is configured,
//! lines also go to `ekyc.log` in that directory. Once the file crosses
//! the configured size it is renamed to `ekyc.log.1` (replacing the
//! previous backup) and a fresh file starts, so the pair bounds disk use
//! at roughly twice the rotation size.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the active log file inside the log directory.
pub const LOG_FILE_NAME: &str = "ekyc.log";

/// Appending file writer that rotates at a byte threshold.
///
/// Intended to sit behind `tracing_appender::non_blocking`, which gives it
/// a single writing thread.
pub struct RollingFileWriter {
    path: PathBuf,
    backup_path: PathBuf,
    max_size: u64,
    file: File,
    written: u64,
}

impl RollingFileWriter {
    /// Opens (creating as needed) the log file under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open(dir: &Path, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);
        let backup_path = dir.join(format!("{LOG_FILE_NAME}.1"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            backup_path,
            max_size,
            file,
            written,
        })
    }

    /// Moves the current file to the backup slot and starts a fresh one.
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        fs::rename(&self.path, &self.backup_path)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_land_in_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RollingFileWriter::open(dir.path(), 1024).unwrap();
        writer.write_all(b"line one\n").unwrap();
        writer.flush().unwrap();

        let text = fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert_eq!(text, "line one\n");
    }

    #[test]
    fn test_rotation_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RollingFileWriter::open(dir.path(), 32).unwrap();

        writer.write_all(b"0123456789012345678901234567\n").unwrap();
        // This write would cross 32 bytes, so the first file rotates out.
        writer.write_all(b"second file\n").unwrap();
        writer.flush().unwrap();

        let active = fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        let backup = fs::read_to_string(dir.path().join(format!("{LOG_FILE_NAME}.1"))).unwrap();
        assert_eq!(active, "second file\n");
        assert!(backup.starts_with("0123456789"));
    }

    #[test]
    fn test_reopen_continues_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = RollingFileWriter::open(dir.path(), 1024).unwrap();
            writer.write_all(b"before restart\n").unwrap();
        }
        let mut writer = RollingFileWriter::open(dir.path(), 1024).unwrap();
        writer.write_all(b"after restart\n").unwrap();
        writer.flush().unwrap();

        let text = fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert_eq!(text, "before restart\nafter restart\n");
    }
}
