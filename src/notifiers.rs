use std::env;
use std::sync::{Arc, Mutex};
use anyhow::{anyhow,Result};
use indicatif::ProgressBar;

/// A Notifier is one channel that receives download progress and run summaries.
pub trait Notifier: Sync + Send{
  fn send_message(&self, msg: &str) -> Result<()>;
  fn chain_with(self, other: Box<dyn Notifier>) -> NotifierChain
  where Self: Sized + 'static + Sync
  {
      let nc = NotifierChain::new().chain_with(Box::new(self));
      nc.chain_with(other)
  }
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
  fn send_message(&self, msg: &str) -> Result<()> {
    (**self).send_message(msg)
  }
}

/// Sends a message and only logs when the channel fails; progress reporting never aborts a run.
pub fn notify(notifier: &dyn Notifier, msg: &str) {
  if let Err(e) = notifier.send_message(msg) {
    log::warn!("could not deliver notification: {}", e);
  }
}

/// The TelegramNotifier is a specific implementation of Notifier that sends its message via Telegram.
pub struct TelegramNotifier {
  chat_id: i64,
  token: String
}

impl TelegramNotifier {
  pub fn new(token: String, chat_id: i64) -> Self {
    Self { token, chat_id }
  }

  pub fn from_env() -> Result<Self> {
    let token = env::var("T_TOKEN").map_err(|_| anyhow!("need T_TOKEN variable"))?;
    let chat_id: i64 = env::var("T_CHAT_ID").map_err(|_| anyhow!("need T_CHAT_ID variable"))?
      .parse().map_err(|_| anyhow!("T_CHAT_ID not parseable to an integer"))?;
    Ok(Self { token, chat_id })
  }
}

impl Notifier for TelegramNotifier {
  fn send_message(&self, msg: &str) -> Result<()> {
    let response = telegram_notifyrs::send_message(msg.to_owned(), &self.token, self.chat_id);
    if response.error() { Err(anyhow!("telegram notification returned an error")) }
    else {Ok(())}
  }
}

pub struct PrintNotifier {}
impl PrintNotifier {
  pub fn new() -> Self {
    Self {}
  }
}
impl Notifier for PrintNotifier {
  fn send_message(&self, msg: &str) -> Result<()> {
    println!("{}",msg);
    Ok(())
  }
}

/// Prints above a live progress bar so the two don't garble each other.
pub struct ProgressNotifier {
  bar: ProgressBar
}
impl ProgressNotifier {
  pub fn new(bar: ProgressBar) -> Self {
    Self { bar }
  }
}
impl Notifier for ProgressNotifier {
  fn send_message(&self, msg: &str) -> Result<()> {
    if self.bar.is_hidden() || self.bar.is_finished() {
      println!("{}", msg);
    } else {
      self.bar.println(msg);
    }
    Ok(())
  }
}

/// Routes messages into the `log` facade at info level.
pub struct LogNotifier {}
impl LogNotifier {
  pub fn new() -> Self {
    Self {}
  }
}
impl Notifier for LogNotifier {
  fn send_message(&self, msg: &str) -> Result<()> {
    log::info!("{}", msg);
    Ok(())
  }
}

pub struct MemoryNotifier {
 saved_messages: Mutex<Vec<String>>
}
impl Notifier for MemoryNotifier {
  fn send_message(&self, msg: &str) -> Result<()> {
    self.saved_messages.lock().map_err(|_| anyhow!("message store poisoned"))?.push(msg.to_owned());
    Ok(())
  }
}
impl MemoryNotifier {
  pub fn new() -> Self {
    Self { saved_messages: Mutex::new(Vec::new()) }
  }
  pub fn get_saved_messages(&self) -> Vec<String> {
    self.saved_messages.lock().map(|m| m.clone()).unwrap_or_default()
  }
}

/// A NotifierChain can be set up with any number of Notifier instances, and will send its messages to all of them.
pub struct NotifierChain {
  notifiers: Vec<Box<dyn Notifier>>
}

impl Notifier for NotifierChain {
  fn send_message(&self, msg: &str) -> Result<()> {
    let mut last_err = None;
    for notifier in &self.notifiers {
      // one broken channel should not starve the others
      if let Err(e) = notifier.send_message(msg) {
        last_err = Some(e);
      }
    }
    last_err.map_or(Ok(()), Err)
  }
  fn chain_with(mut self, notifier: Box<dyn Notifier>) -> Self {
    self.notifiers.push(notifier);
    self
  }
}

impl NotifierChain {
  pub fn new() -> Self {
    Self {
      notifiers: Vec::new()
    }
  }

  pub fn len(&self) -> usize {
    self.notifiers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.notifiers.is_empty()
  }
}
