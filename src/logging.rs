use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{anyhow, Result};

/// Copies every log line to stderr and to an append-mode file.
struct Tee {
  file: File,
}

impl Write for Tee {
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

fn builder() -> env_logger::Builder {
  let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
  builder.format_target(false);
  builder
}

/// Sets up `env_logger`, mirroring output into `log_file` when one is given.
pub fn init(log_file: Option<&Path>) -> Result<()> {
  let mut builder = builder();
  if let Some(path) = log_file {
    let file = OpenOptions::new().create(true).append(true).open(path)
      .map_err(|e| anyhow!("could not open log file {}: {}", path.display(), e))?;
    builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
  }
  builder.try_init().map_err(|e| anyhow!("logger already initialised: {}", e))
}
