//! Request and response bodies exchanged with the game server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod paths {
    pub const START_SESSION: &str = "inizia";
    pub const COMMAND: &str = "comando";
    pub const STATE: &str = "stato";
    pub const MAP: &str = "mappa";
    pub const DESTINATIONS: &str = "destinazioni";
    pub const NOTIFICATIONS: &str = "notifiche";
    pub const MARK_NOTIFICATION: &str = "leggi_notifica";
    pub const CLASSES: &str = "classi";
    pub const HEALTH: &str = "health";
}

/// Name of the session credential on the wire.
pub const SESSION_FIELD: &str = "id_sessione";

#[derive(Debug, Clone, Serialize)]
pub struct StartSessionRequest<'a> {
    #[serde(rename = "nome")]
    pub name: &'a str,
    #[serde(rename = "classe")]
    pub class: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(rename = "id_sessione", default)]
    pub session_id: Option<String>,
    #[serde(rename = "stato", default)]
    pub state: Value,
    #[serde(rename = "stato_nome", default)]
    pub state_name: Option<String>,
    #[serde(rename = "messaggio", default)]
    pub message: Option<String>,
}

impl StartSessionResponse {
    /// Welcome narrative: the explicit message, else the initial state's output.
    pub fn welcome_text(&self) -> Option<String> {
        if let Some(message) = self.message.as_ref().filter(|m| !m.trim().is_empty()) {
            return Some(message.clone());
        }
        match self.state.get("output") {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text.clone()),
            Some(Value::Array(items)) => {
                let joined = items
                    .iter()
                    .filter_map(|item| OutputEntry::from_value(item).text().map(str::to_string))
                    .collect::<Vec<_>>()
                    .join("\n");
                (!joined.trim().is_empty()).then_some(joined)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest<'a> {
    #[serde(rename = "comando")]
    pub text: &'a str,
}

/// One line of command output: bare text or a kind-tagged entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OutputEntry {
    Text(String),
    Structured {
        #[serde(rename = "tipo", default)]
        kind: Option<String>,
        #[serde(rename = "testo")]
        text: String,
    },
    Other(Value),
}

impl OutputEntry {
    fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_else(|_| OutputEntry::Other(value.clone()))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            OutputEntry::Text(text) => Some(text),
            OutputEntry::Structured { text, .. } => Some(text),
            OutputEntry::Other(_) => None,
        }
    }

    pub fn kind(&self) -> Option<&str> {
        match self {
            OutputEntry::Structured { kind, .. } => kind.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandResponse {
    #[serde(default, deserialize_with = "output_list")]
    pub output: Vec<OutputEntry>,
    #[serde(rename = "stato", default)]
    pub state: Value,
    #[serde(rename = "stato_nome", default)]
    pub state_name: Option<String>,
    #[serde(rename = "fine", default)]
    pub finished: bool,
}

/// Accepts a list, a single string or null for `output`.
fn output_list<'de, D>(deserializer: D) -> Result<Vec<OutputEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(OutputEntry::from_value).collect(),
        other => vec![OutputEntry::from_value(&other)],
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Destination {
    pub id: Value,
    #[serde(rename = "nome", default)]
    pub name: String,
    #[serde(rename = "descrizione", default)]
    pub description: String,
    #[serde(rename = "posizione_attuale", default)]
    pub current: bool,
}

impl Destination {
    /// Matches either the id or the display name, ignoring case.
    pub fn matches(&self, destination: &str) -> bool {
        let wanted = destination.trim();
        let id_matches = match &self.id {
            Value::String(id) => id.eq_ignore_ascii_case(wanted),
            other => other.to_string() == wanted,
        };
        id_matches || self.name.eq_ignore_ascii_case(wanted)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub id: Value,
    #[serde(rename = "tipo", default)]
    pub kind: String,
    #[serde(rename = "messaggio", default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(rename = "letta", default)]
    pub read: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationListResponse {
    #[serde(rename = "notifiche", default)]
    pub notifications: Vec<Notification>,
    #[serde(rename = "totale_non_lette", default)]
    pub unread_total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkReadRequest {
    #[serde(rename = "id_notifica", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(rename = "tutte", skip_serializing_if = "std::ops::Not::not")]
    pub all: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassInfo {
    #[serde(rename = "nome", default)]
    pub name: String,
    #[serde(rename = "descrizione", default)]
    pub description: String,
    #[serde(rename = "statistiche_base", default)]
    pub base_stats: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthData {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<HealthData>,
    #[serde(rename = "messaggio", default)]
    pub message: Option<String>,
    #[serde(rename = "errore", default)]
    pub error: Option<String>,
    #[serde(rename = "dettagli", default)]
    pub details: Option<String>,
}
