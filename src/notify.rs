//! Collaborators that talk to the person driving the process.
//!
//! The core never renders anything itself. It reports dismissable messages through a
//! [`Notifier`] and asks before every destructive or multi-step mutation through a
//! [`Confirmation`].

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
	Info,
	Warning,
	Error,
}

/// Sink for dismissable messages.
pub trait Notifier: Send + Sync {
	fn notify(&self, level: NoticeLevel, message: &str);
}

/// Yes/no question answered after user interaction.
#[async_trait]
pub trait Confirmation: Send + Sync {
	async fn confirm(&self, prompt: &str) -> bool;
}

/// Notifier that writes every message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
	fn notify(&self, level: NoticeLevel, message: &str) {
		match level {
			NoticeLevel::Info => info!("{}", message),
			NoticeLevel::Warning => warn!("{}", message),
			NoticeLevel::Error => error!("{}", message),
		}
	}
}

/// Asks on stdout and reads a `y`/`yes` answer from stdin. Anything else declines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirmation;

#[async_trait]
impl Confirmation for TerminalConfirmation {
	async fn confirm(&self, prompt: &str) -> bool {
		let mut stdout = tokio::io::stdout();
		if stdout
			.write_all(format!("{prompt} [y/N] ").as_bytes())
			.await
			.and(stdout.flush().await)
			.is_err()
		{
			return false;
		}

		let mut answer = String::new();
		let mut reader = BufReader::new(tokio::io::stdin());
		match reader.read_line(&mut answer).await {
			Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
			Err(e) => {
				warn!("Could not read confirmation: {}", e);
				false
			}
		}
	}
}

/// Confirmation that always gives the same answer, for unattended runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirmation(pub bool);

#[async_trait]
impl Confirmation for FixedConfirmation {
	async fn confirm(&self, prompt: &str) -> bool {
		info!("{} -> {}", prompt, if self.0 { "yes" } else { "no" });
		self.0
	}
}
