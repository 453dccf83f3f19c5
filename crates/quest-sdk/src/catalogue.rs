use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::api::{paths, ClassInfo};
use crate::net::{ApiRequest, NetworkClient};

pub type Classes = BTreeMap<String, ClassInfo>;

/// Character classes offered at session start, cached for the process lifetime.
#[derive(Clone, Debug)]
pub struct ClassCatalogue {
    net: NetworkClient,
    cache: Arc<Mutex<Option<Classes>>>,
}

impl ClassCatalogue {
    pub fn new(net: NetworkClient) -> Self {
        Self {
            net,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Never fails: an unusable answer falls back to [`default_classes`].
    pub async fn load(&self, force: bool) -> Classes {
        if !force {
            if let Some(cached) = self.cache.lock().clone() {
                return cached;
            }
        }

        let request = ApiRequest::get(paths::CLASSES)
            .with_timeout(self.net.context().config().catalogue_timeout)
            .without_retry();
        let classes = match self.net.send_as::<Classes>(request).await {
            Ok(classes) if !classes.is_empty() => {
                debug!(target: "quest::session", count = classes.len(), "class catalogue loaded");
                classes
            }
            Ok(_) => {
                warn!(target: "quest::session", "class catalogue empty; using defaults");
                default_classes()
            }
            Err(err) => {
                warn!(target: "quest::session", error = %err, "class catalogue unavailable; using defaults");
                default_classes()
            }
        };
        *self.cache.lock() = Some(classes.clone());
        classes
    }
}

pub fn default_classes() -> Classes {
    let class = |name: &str, description: &str, stats: [i64; 6]| {
        let keys = [
            "forza",
            "destrezza",
            "costituzione",
            "intelligenza",
            "saggezza",
            "carisma",
        ];
        ClassInfo {
            name: name.to_string(),
            description: description.to_string(),
            base_stats: keys
                .iter()
                .zip(stats)
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        }
    };
    BTreeMap::from([
        (
            "guerriero".to_string(),
            class(
                "Guerriero",
                "Un combattente specializzato nell'uso delle armi e delle armature pesanti",
                [15, 10, 14, 8, 10, 9],
            ),
        ),
        (
            "mago".to_string(),
            class(
                "Mago",
                "Un incantatore che ha imparato a manipolare la magia attraverso lo studio",
                [6, 10, 8, 16, 12, 10],
            ),
        ),
        (
            "ladro".to_string(),
            class(
                "Ladro",
                "Un abile furfante specializzato nella furtività e nelle serrature",
                [8, 16, 10, 12, 10, 12],
            ),
        ),
        (
            "chierico".to_string(),
            class(
                "Chierico",
                "Un sacerdote che canalizza la potenza divina",
                [10, 8, 12, 10, 16, 12],
            ),
        ),
    ])
}
