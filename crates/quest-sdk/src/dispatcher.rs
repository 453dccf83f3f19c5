use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{paths, CommandRequest, CommandResponse, OutputEntry};
use crate::error::ApiResult;
use crate::messages::{Message, MessageKind, MessageLog};
use crate::net::{ApiRequest, NetworkClient};
use crate::reconciler::StateReconciler;

const TRAVEL_PREFIXES: [&str; 2] = ["viaggia ", "travel to "];

/// One denylist rule for server-side text-menu artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuPattern {
    /// Literal substring.
    Contains(String),
    /// A numbered menu line: digits, a dot, whitespace, then one of `labels`.
    NumberedOption(Vec<String>),
    /// `prefix`, at least one character, then `suffix`.
    Enclosed { prefix: String, suffix: String },
}

impl MenuPattern {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            MenuPattern::Contains(needle) => text.contains(needle.as_str()),
            MenuPattern::NumberedOption(labels) => numbered_option(text, labels),
            MenuPattern::Enclosed { prefix, suffix } => {
                text.match_indices(prefix.as_str()).any(|(start, _)| {
                    let rest = &text[start + prefix.len()..];
                    rest.chars()
                        .next()
                        .is_some_and(|first| rest[first.len_utf8()..].contains(suffix.as_str()))
                })
            }
        }
    }
}

fn numbered_option(text: &str, labels: &[String]) -> bool {
    let bytes = text.as_bytes();
    for (index, byte) in bytes.iter().enumerate() {
        if !byte.is_ascii_digit() || bytes.get(index + 1) != Some(&b'.') {
            continue;
        }
        let after_dot = &text[index + 2..];
        let label_start = after_dot.trim_start();
        if label_start.len() == after_dot.len() {
            continue;
        }
        if labels.iter().any(|label| label_start.starts_with(label.as_str())) {
            return true;
        }
    }
    false
}

/// Drops output lines that belong to the server's text-only menus.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    patterns: Vec<MenuPattern>,
}

impl OutputFilter {
    pub fn new(patterns: Vec<MenuPattern>) -> Self {
        Self { patterns }
    }

    /// Built-in patterns plus extra literal substrings.
    pub fn with_extras(extra: &[String]) -> Self {
        let mut filter = Self::default();
        filter.patterns.extend(
            extra
                .iter()
                .filter(|needle| !needle.is_empty())
                .map(|needle| MenuPattern::Contains(needle.clone())),
        );
        filter
    }

    pub fn is_artifact(&self, text: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(text))
    }
}

impl Default for OutputFilter {
    fn default() -> Self {
        let contains = |s: &str| MenuPattern::Contains(s.to_string());
        let labels = |items: &[&str]| {
            MenuPattern::NumberedOption(items.iter().map(|s| s.to_string()).collect())
        };
        Self::new(vec![
            contains("=== SELEZIONE DESTINAZIONE ==="),
            contains("Dove desideri andare?"),
            labels(&["Cantina", "Mercato", "Taverna", "Torna indietro"]),
            contains("Scegli una destinazione:"),
            contains("Inserisci un numero valido"),
            contains("Premi Invio per continuare"),
            contains("La taverna rimane in attesa"),
            contains("Ti trovi nella taverna. Cosa vuoi fare?"),
            labels(&[
                "Parla",
                "Viaggia",
                "Mostra",
                "Combatti",
                "Sfida",
                "Esplora",
                "Prova",
                "Visualizza",
                "Muoviti",
                "Interagisci",
                "Salva",
                "Esci",
            ]),
            contains("Scelta:"),
            MenuPattern::Enclosed {
                prefix: "Ti dirigi verso ".into(),
                suffix: "...".into(),
            },
            MenuPattern::Enclosed {
                prefix: "Sei arrivato a ".into(),
                suffix: ".".into(),
            },
        ])
    }
}

/// Destination named by a travel command, if `command` is one.
pub fn travel_destination(command: &str) -> Option<&str> {
    let lowered = command.to_lowercase();
    TRAVEL_PREFIXES.iter().find_map(|prefix| {
        if lowered.starts_with(prefix) && command.is_char_boundary(prefix.len()) {
            Some(command[prefix.len()..].trim()).filter(|dest| !dest.is_empty())
        } else {
            None
        }
    })
}

/// Sends player commands and folds their output into the message log.
#[derive(Clone, Debug)]
pub struct CommandDispatcher {
    net: NetworkClient,
    reconciler: StateReconciler,
    messages: Arc<MessageLog>,
    filter: OutputFilter,
}

impl CommandDispatcher {
    pub fn new(
        net: NetworkClient,
        reconciler: StateReconciler,
        messages: Arc<MessageLog>,
    ) -> Self {
        let filter = OutputFilter::with_extras(&net.context().config().menu_filter_extra);
        Self {
            net,
            reconciler,
            messages,
            filter,
        }
    }

    pub fn filter(&self) -> &OutputFilter {
        &self.filter
    }

    pub async fn execute(&self, command: &str) -> ApiResult<CommandResponse> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(CommandResponse::default());
        }
        self.messages.append(Message::command(format!("> {command}")));

        let result = match travel_destination(command) {
            Some(destination) => self.travel(destination).await,
            None => self.send(command).await,
        };

        result.inspect_err(|err| {
            warn!(target: "quest::dispatch", command, error = %err, "command failed");
            if !err.is_session_expired() {
                self.messages.append(Message::error(format!("Error: {err}")));
            }
        })
    }

    async fn travel(&self, destination: &str) -> ApiResult<CommandResponse> {
        let response = self.reconciler.travel_to(destination).await?;
        self.messages.append(Message::narrative(format!(
            "You travel towards {destination}"
        )));
        self.reconciler.spawn_force_refresh();
        Ok(response)
    }

    async fn send(&self, command: &str) -> ApiResult<CommandResponse> {
        let request =
            ApiRequest::post(paths::COMMAND).with_json(&CommandRequest { text: command })?;
        let response: CommandResponse = self.net.send_as(request).await?;

        let mut kept = 0usize;
        for entry in &response.output {
            let Some(text) = entry.text() else {
                debug!(target: "quest::dispatch", ?entry, "skipping non-text output entry");
                continue;
            };
            if self.filter.is_artifact(text) {
                continue;
            }
            let kind = match entry {
                OutputEntry::Structured { kind: Some(kind), .. } => MessageKind::from_wire(kind),
                _ => MessageKind::Narrative,
            };
            self.messages.append(Message::new(kind, text));
            kept += 1;
        }
        debug!(
            target: "quest::dispatch",
            command,
            received = response.output.len(),
            kept,
            finished = response.finished,
            "command output processed"
        );

        if let Err(err) = self.reconciler.refresh(true).await {
            warn!(target: "quest::dispatch", error = %err, "post-command refresh failed");
        }
        Ok(response)
    }
}
