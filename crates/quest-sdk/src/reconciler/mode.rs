use serde_json::Value;

/// Well-known sub-modes the client reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpecialMode {
    #[default]
    Regular,
    DestinationSelection,
}

impl SpecialMode {
    /// Parses an explicit server tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "scelta_mappa" | "destination_selection" => Some(SpecialMode::DestinationSelection),
            "regular" | "normale" => Some(SpecialMode::Regular),
            _ => None,
        }
    }
}

const TAG_FIELDS: [&str; 2] = ["modalita", "mode"];

const DEFAULT_MARKERS: [&str; 5] = [
    "sceltamappa",
    "scelta_mappa",
    "scelta mappa",
    "map selection",
    "map_selection",
];

/// Classifies a state into a [`SpecialMode`], preferring the server's tag and
/// falling back to marker matching on the free-text state name.
#[derive(Debug, Clone)]
pub struct ModeDetector {
    markers: Vec<String>,
}

impl ModeDetector {
    pub fn new(extra_markers: &[String]) -> Self {
        let markers = DEFAULT_MARKERS
            .iter()
            .map(|m| m.to_string())
            .chain(extra_markers.iter().map(|m| m.trim().to_lowercase()))
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    pub fn detect(&self, state_name: &str, payload: &Value) -> SpecialMode {
        let tagged = TAG_FIELDS
            .iter()
            .filter_map(|field| payload.get(field).and_then(Value::as_str))
            .find_map(SpecialMode::from_tag);
        match tagged {
            Some(mode) => mode,
            None => self.detect_name(state_name),
        }
    }

    pub fn detect_name(&self, state_name: &str) -> SpecialMode {
        let folded = state_name.to_lowercase();
        if self.markers.iter().any(|marker| folded.contains(marker.as_str())) {
            SpecialMode::DestinationSelection
        } else {
            SpecialMode::Regular
        }
    }
}

impl Default for ModeDetector {
    fn default() -> Self {
        Self::new(&[])
    }
}
