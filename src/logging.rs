use crate::error::Result;
use log::{Level, LevelFilter, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

/// File logger behind the `log` facade. Lines carry a `%X %a %x` timestamp;
/// error-level records get the `!!! ERROR !!!` marker. Writes are serialized
/// with an advisory file lock so every line stays intact even if several
/// processes share the file.
pub struct FileLogger {
    file: Mutex<File>,
}

static LOGGER: OnceLock<FileLogger> = OnceLock::new();

fn stamp() -> String {
    chrono::Local::now().format("%X %a %x").to_string()
}

impl FileLogger {
    fn write_locked(&self, bytes: &[u8]) {
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        let fd = file.as_raw_fd();
        unsafe {
            libc::lockf(fd, libc::F_LOCK, 0);
        }
        let _ = file.write_all(bytes);
        unsafe {
            libc::lockf(fd, libc::F_ULOCK, 0);
        }
    }
}

impl log::Log for FileLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let line = if record.level() == Level::Error {
            format!("{} !!! ERROR !!! {}\n", stamp(), record.args())
        } else {
            format!("{} - {}\n", stamp(), record.args())
        };
        self.write_locked(line.as_bytes());
    }

    fn flush(&self) {
        if let Ok(file) = self.file.lock() {
            let _ = file.sync_data();
        }
    }
}

/// Open (truncating) the log file and install the logger process-wide.
pub fn init(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o640)
        .open(path)?;
    let _ = LOGGER.set(FileLogger {
        file: Mutex::new(file),
    });
    if let Some(logger) = LOGGER.get() {
        log::set_logger(logger)?;
        log::set_max_level(LevelFilter::Debug);
    }
    Ok(())
}

/// Forward bytes to the log verbatim (CGI stderr capture).
pub fn raw(data: &[u8]) {
    if let Some(logger) = LOGGER.get() {
        let mut out = Vec::with_capacity(data.len() + 1);
        out.extend_from_slice(data);
        out.push(b'\n');
        logger.write_locked(&out);
    }
}

/// Final flush before exit.
pub fn stop() {
    if let Some(logger) = LOGGER.get() {
        log::Log::flush(logger);
    }
}
