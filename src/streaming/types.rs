use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Account and application status as returned by the info endpoint.
/// Only the fields the CLI reads are typed; the rest stays raw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountInfo(pub Value);

impl AccountInfo {
    pub fn username(&self) -> Option<&str> {
        self.0["user"]["username"].as_str()
    }

    pub fn application_status(&self) -> Option<&str> {
        self.0["application_status"]["status"].as_str()
    }

    pub fn can_go_live(&self) -> bool {
        match &self.0["can_be_live"] {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
            _ => false,
        }
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }
}

/// One search result. Ids may arrive as strings, numbers or null; other
/// remote fields are passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default, deserialize_with = "lenient_string")]
    pub full_name: String,
    /// Empty for the catch-all entry
    #[serde(default, deserialize_with = "lenient_string")]
    pub game_mask_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Category {
    /// Catch-all option appended to every search result
    pub fn other() -> Self {
        Self {
            full_name: "Other".to_string(),
            game_mask_id: String::new(),
            extra: Map::new(),
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Publishing credentials of a started broadcast. All `None` when the
/// platform answered without usable credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartedStream {
    pub stream_url: Option<String>,
    pub stream_key: Option<String>,
    pub stream_id: Option<String>,
}

impl StartedStream {
    pub fn is_empty(&self) -> bool {
        self.stream_url.is_none() && self.stream_key.is_none() && self.stream_id.is_none()
    }
}
