use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use hfsnap::config::{Config, DEFAULT_COLLECTION_URL};
use hfsnap::data::HttpPageSource;
use hfsnap::{ledger, logging, Extractor};

/// List all models in a collection without downloading them.
#[derive(Parser, Debug)]
#[command(name = "hfsnap-list", version)]
struct Args {
  /// Collection page URL
  #[arg(long = "collection_url", default_value = DEFAULT_COLLECTION_URL)]
  collection_url: String,

  /// Save the model list to this file, one identifier per line
  #[arg(long = "output_file")]
  output_file: Option<PathBuf>,

  /// Optional YAML settings file
  #[arg(long)]
  config: Option<PathBuf>,

  /// Also append log output to this file
  #[arg(long = "log_file")]
  log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
  let args = Args::parse();
  logging::init(args.log_file.as_deref())?;
  let config = Config::load(args.config.as_deref())?;

  let source = HttpPageSource::new(&config.user_agent, config.request_timeout)?;
  let ids = Extractor::new(Box::new(source)).extract(&args.collection_url)?.identifiers();

  println!("Found {} models/datasets in the collection", ids.len());
  for (i, id) in ids.iter().enumerate() {
    println!("{}. {}", i + 1, id);
  }

  if let Some(path) = &args.output_file {
    ledger::write_lines(path, &ids)?;
    println!("Model list has been saved to {}", path.display());
  }
  Ok(())
}
