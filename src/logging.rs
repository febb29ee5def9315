use crate::settings::data_dir;
use chrono::Local;
use log::{Level, Metadata, Record, SetLoggerError};
use once_cell::sync::OnceCell;
use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug)]
struct SimpleLogger {
    log_path: PathBuf,
    max_level: Level,
}

static LOGGER: OnceCell<SimpleLogger> = OnceCell::new();

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_entry = format!(
                "{} {} [{}] - {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            );
            let log_file = self.log_path.join("log.txt");

            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(log_file) {
                let _ = file.write_all(log_entry.as_bytes());
            }
        }
    }

    fn flush(&self) {}
}

/// Routes the `log` macros to `log.txt` in the data directory.
/// Debug records are kept only in debug mode.
pub fn init(debug_mode: bool) -> Result<(), SetLoggerError> {
    let log_path = data_dir();
    // Without a writable directory every write silently fails; the game still runs.
    let _ = create_dir_all(&log_path);

    let max_level = if debug_mode { Level::Debug } else { Level::Info };
    let logger = LOGGER.get_or_init(|| SimpleLogger {
        log_path,
        max_level,
    });

    log::set_logger(logger).map(|()| log::set_max_level(max_level.to_level_filter()))
}
