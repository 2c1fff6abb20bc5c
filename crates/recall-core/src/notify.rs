//! Announcement of recognized people.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Person;

/// How much of a recognized person to announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnounceMode {
    None,
    #[default]
    Name,
    Full,
}

impl AnnounceMode {
    /// Text to speak for `person`, or `None` when announcements are off.
    pub fn announcement(self, person: &Person) -> Option<String> {
        match self {
            AnnounceMode::None => None,
            AnnounceMode::Name => Some(format!("This is {}.", person.name)),
            AnnounceMode::Full => {
                let mut text = format!("This is {}", person.name);
                if let Some(relationship) = &person.relationship {
                    text.push_str(&format!(", your {relationship}"));
                }
                text.push('.');
                if let Some(notes) = &person.notes {
                    text.push(' ');
                    text.push_str(notes);
                }
                Some(text)
            }
        }
    }
}

impl fmt::Display for AnnounceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AnnounceMode::None => "none",
            AnnounceMode::Name => "name",
            AnnounceMode::Full => "full",
        })
    }
}

impl FromStr for AnnounceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(AnnounceMode::None),
            "name" => Ok(AnnounceMode::Name),
            "full" => Ok(AnnounceMode::Full),
            other => Err(format!("unknown announce mode: {other} (expected none, name or full)")),
        }
    }
}

/// Side-effecting output channel for announcements (speech, chime, ...).
///
/// Implementations swallow their own failures: a missing speech backend
/// degrades to visual-only output.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn announce(&self, text: &str);
}

/// Notifier that discards everything.
pub struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn announce(&self, _text: &str) {}
}
