use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use hfsnap::config::{Config, DEFAULT_COLLECTION_URL};
use hfsnap::coordinator::DEFAULT_WORKERS;
use hfsnap::data::HttpPageSource;
use hfsnap::fetcher::HubFetcher;
use hfsnap::notifiers::ProgressNotifier;
use hfsnap::{logging, Coordinator, Extractor, RunOptions};

/// Download every model and dataset of a collection in parallel.
#[derive(Parser, Debug)]
#[command(name = "hfsnap-fetch", version)]
struct Args {
  /// Collection page URL
  #[arg(long = "collection_url", default_value = DEFAULT_COLLECTION_URL)]
  collection_url: String,

  /// Directory receiving one sub-directory per model plus the download records
  #[arg(long = "output_dir", default_value = "./downloaded_models")]
  output_dir: PathBuf,

  /// Hub access token for private or gated repositories
  #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
  token: Option<String>,

  /// Number of models downloaded at the same time
  #[arg(long = "max_workers", default_value_t = DEFAULT_WORKERS)]
  max_workers: usize,

  /// Try to continue partially downloaded files
  #[arg(long)]
  resume: bool,

  /// Retry the models that failed on the previous run
  #[arg(long = "retry_failed")]
  retry_failed: bool,

  /// Optional YAML settings file
  #[arg(long)]
  config: Option<PathBuf>,

  /// Also append log output to this file
  #[arg(long = "log_file")]
  log_file: Option<PathBuf>,
}

fn build_progress_bar() -> ProgressBar {
  let bar = ProgressBar::new(0);
  if let Ok(style) = ProgressStyle::with_template(
    "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} models ({msg})",
  ) {
    bar.set_style(style.progress_chars("=> "));
  }
  bar
}

fn main() -> Result<()> {
  let args = Args::parse();
  logging::init(args.log_file.as_deref())?;
  let config = Config::load(args.config.as_deref())?;

  let source = HttpPageSource::new(&config.user_agent, config.request_timeout)?;
  let bar = build_progress_bar();
  let coordinator = Coordinator::new(
    Extractor::new(Box::new(source)),
    Box::new(HubFetcher::from_config(&config)?),
    config.build_notifier(Box::new(ProgressNotifier::new(bar.clone())))?,
  ).with_progress(bar);

  coordinator.run(&RunOptions {
    page_url: args.collection_url,
    output_dir: args.output_dir,
    worker_count: args.max_workers,
    token: args.token,
    resume: args.resume,
    retry_failed: args.retry_failed,
  })?;
  Ok(())
}
