//! Spoken announcements through an external text-to-speech command.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use recall_core::Notifier;
use tokio::process::Command;

pub const DEFAULT_SPEECH_COMMAND: &str = "spd-say";

/// [`Notifier`] that runs `<command> <text>` and waits for it to finish.
///
/// A missing or failing command is logged once and otherwise ignored:
/// recognition results never depend on speech.
pub struct SpeechNotifier {
    command: String,
    unavailable: AtomicBool,
}

impl SpeechNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn report_once(&self, message: &str) {
        if !self.unavailable.swap(true, Ordering::Relaxed) {
            tracing::warn!(command = %self.command, "speech unavailable: {message}");
        } else {
            tracing::debug!(command = %self.command, "speech unavailable: {message}");
        }
    }
}

impl Default for SpeechNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_SPEECH_COMMAND)
    }
}

#[async_trait]
impl Notifier for SpeechNotifier {
    async fn announce(&self, text: &str) {
        let status = Command::new(&self.command)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                tracing::debug!(text, "announced");
            }
            Ok(status) => self.report_once(&format!("exited with {status}")),
            Err(e) => self.report_once(&e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_command_is_silent() {
        let notifier = SpeechNotifier::new("recall-no-such-speech-command");
        notifier.announce("This is Alice.").await;
        notifier.announce("This is Alice.").await;
        assert!(notifier.unavailable.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_successful_command() {
        let notifier = SpeechNotifier::new("true");
        notifier.announce("hello").await;
        assert!(!notifier.unavailable.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_failing_command_is_reported() {
        let notifier = SpeechNotifier::new("false");
        notifier.announce("hello").await;
        assert!(notifier.unavailable.load(Ordering::Relaxed));
    }

    #[test]
    fn test_default_command() {
        assert_eq!(SpeechNotifier::default().command(), "spd-say");
    }
}
