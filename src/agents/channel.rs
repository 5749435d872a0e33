use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Communication surface an agent serves.
///
/// Names that don't match a known surface are kept as `Unsupported` so the
/// agent can still be registered and reported on; it just never gets a run loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelKind {
    ChatEvents,
    Email,
    WebChat,
    Api,
    Unsupported(String),
}

/// Shape of the run loop a channel kind gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopVariant {
    /// Work arrives through the connector; the loop only heartbeats.
    EventDriven,
    /// The loop wakes on a fixed interval and performs a monitoring tick.
    Polling,
}

impl ChannelKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelKind::ChatEvents => "chat-events",
            ChannelKind::Email => "email",
            ChannelKind::WebChat => "web-chat",
            ChannelKind::Api => "api",
            ChannelKind::Unsupported(name) => name,
        }
    }

    pub fn loop_variant(&self) -> Option<LoopVariant> {
        match self {
            ChannelKind::ChatEvents => Some(LoopVariant::EventDriven),
            ChannelKind::Email | ChannelKind::WebChat | ChannelKind::Api => {
                Some(LoopVariant::Polling)
            }
            ChannelKind::Unsupported(_) => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.loop_variant().is_some()
    }
}

impl From<&str> for ChannelKind {
    fn from(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "chat-events" | "slack" => ChannelKind::ChatEvents,
            "email" => ChannelKind::Email,
            "web-chat" | "web" => ChannelKind::WebChat,
            "api" => ChannelKind::Api,
            _ => ChannelKind::Unsupported(name.to_string()),
        }
    }
}

impl From<String> for ChannelKind {
    fn from(name: String) -> Self {
        ChannelKind::from(name.as_str())
    }
}

impl From<ChannelKind> for String {
    fn from(kind: ChannelKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for ChannelKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ChannelKind::from(s))
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
