use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Env, Target};
use log::Record;

/// Mirrors every log line to stderr and to the append-only service log.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn format_line(buf: &mut env_logger::fmt::Formatter, record: &Record) -> io::Result<()> {
    writeln!(
        buf,
        "{} - {} - {} - {}",
        buf.timestamp_millis(),
        record.target(),
        record.level(),
        record.args()
    )
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Service logging: `info` by default (`RUST_LOG` overrides), written to stderr
/// and appended to `log_file`.
pub fn init(log_file: &Path) -> io::Result<()> {
    let file = open_log_file(log_file)?;
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(format_line)
        .target(Target::Pipe(Box::new(TeeWriter { file })))
        .try_init()
        .map_err(io::Error::other)
}

/// Console-only logging for the command line tools.
pub fn init_console(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let _ = Builder::from_env(Env::default().default_filter_or(level))
        .format(format_line)
        .try_init();
}
