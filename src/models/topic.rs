use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument stream key (e.g. `btcusdt`)
///
/// Topics are case-folded on construction so `BTCUSDT`, `BtcUsdt` and `btcusdt`
/// all address the same cursor, replay buffer and subscriber set. The store keeps
/// coins lowercased, so the normalized form is also the query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Create a normalized topic
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}
