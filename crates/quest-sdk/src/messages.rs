use std::collections::VecDeque;

use parking_lot::Mutex;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    System,
    Error,
    Command,
    Narrative,
}

impl MessageKind {
    /// Maps the server's `tipo` labels; unknown labels read as narrative.
    pub fn from_wire(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "sistema" | "system" => MessageKind::System,
            "errore" | "error" => MessageKind::Error,
            "comando" | "command" => MessageKind::Command,
            _ => MessageKind::Narrative,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::System => "system",
            MessageKind::Error => "error",
            MessageKind::Command => "command",
            MessageKind::Narrative => "narrative",
        }
    }

    fn collapses_at_storage(&self) -> bool {
        matches!(self, MessageKind::System | MessageKind::Error)
    }

    fn is_prose(&self) -> bool {
        matches!(self, MessageKind::System | MessageKind::Narrative)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
    pub timestamp: OffsetDateTime,
}

impl Message {
    pub fn new(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageKind::System, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, text)
    }

    pub fn command(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Command, text)
    }

    pub fn narrative(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Narrative, text)
    }
}

/// Ordered, capacity-bounded log of user-visible messages.
#[derive(Debug)]
pub struct MessageLog {
    inner: Mutex<LogInner>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct LogInner {
    entries: VecDeque<Message>,
    /// Total accepted appends; never decreases, even across `clear`.
    appended: u64,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(LogInner {
                entries: VecDeque::with_capacity(capacity),
                appended: 0,
            }),
            capacity,
        }
    }

    /// Returns false when the message repeats the previous system/error entry.
    pub fn append(&self, message: Message) -> bool {
        let mut inner = self.inner.lock();
        if message.kind.collapses_at_storage() {
            if let Some(last) = inner.entries.back() {
                if last.kind == message.kind && last.text == message.text {
                    return false;
                }
            }
        }
        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(message);
        inner.appended += 1;
        true
    }

    pub fn all(&self) -> Vec<Message> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Cursor for [`MessageLog::since`]: the number of messages ever accepted.
    pub fn cursor(&self) -> u64 {
        self.inner.lock().appended
    }

    /// Retained entries accepted at or after `cursor`, plus the new cursor.
    pub fn since(&self, cursor: u64) -> (Vec<Message>, u64) {
        let inner = self.inner.lock();
        let oldest = inner.appended - inner.entries.len() as u64;
        let skip = cursor.saturating_sub(oldest) as usize;
        let fresh = inner.entries.iter().skip(skip).cloned().collect();
        (fresh, inner.appended)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

/// Drops adjacent repeats for display: equal text of the same kind, or equal
/// text where both entries are narrative/system prose.
pub fn collapse_for_display(messages: &[Message]) -> Vec<Message> {
    let mut shown: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        if let Some(previous) = shown.last() {
            let same_text = previous.text == message.text;
            let both_prose = previous.kind.is_prose() && message.kind.is_prose();
            if same_text && (both_prose || previous.kind == message.kind) {
                continue;
            }
        }
        shown.push(message.clone());
    }
    shown
}
