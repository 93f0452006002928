use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Env, Target, WriteStyle};
use log::warn;

/// Copies every log line to stderr and to a second writer.
pub struct Tee<W> {
    file: W,
}

impl<W: Write> Tee<W> {
    pub fn new(file: W) -> Self {
        Self { file }
    }
}

impl<W: Write> Write for Tee<W> {
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

/// `info` by default, `RUST_LOG` overrides. Falls back to stderr only when
/// the log file cannot be opened.
pub fn init(log_path: &Path) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => {
            builder
                .target(Target::Pipe(Box::new(Tee::new(file))))
                .write_style(WriteStyle::Never)
                .init();
        }
        Err(e) => {
            builder.init();
            warn!("Cannot open log file {}: {e}, logging to stderr only", log_path.display());
        }
    }
}
