use std::collections::BTreeMap;

use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{ApiError, ApiResult};

/// Tile coordinate on a map grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coord {
    pub x: i64,
    pub y: i64,
}

impl Coord {
    /// Parses the server's `"(x, y)"` index keys.
    pub fn parse_key(raw: &str) -> Option<Self> {
        let inner = raw.trim().strip_prefix('(')?.strip_suffix(')')?;
        let (x, y) = inner.split_once(',')?;
        Some(Self {
            x: x.trim().parse().ok()?,
            y: y.trim().parse().ok()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position {
    pub map: String,
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Equipment {
    pub weapon: Option<String>,
    pub armor: Option<String>,
    pub accessories: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerView {
    pub name: String,
    pub class: String,
    pub hp: i64,
    pub max_hp: i64,
    pub mana: i64,
    pub max_mana: i64,
    pub inventory: Vec<String>,
    pub equipment: Equipment,
    pub stats: BTreeMap<String, i64>,
}

/// Local copy of the authoritative game state.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub state_name: String,
    pub player: PlayerView,
    pub position: Option<Position>,
    /// Full payload as received, for fields this model does not lift out.
    pub raw: Value,
    pub fetched_at: OffsetDateTime,
    pub generation: u64,
}

impl StateSnapshot {
    pub fn from_payload(raw: Value, generation: u64) -> ApiResult<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| ApiError::Parse("state payload is not an object".into()))?;

        let player = PlayerView {
            name: str_field(&raw, "nome"),
            class: str_field(&raw, "classe"),
            hp: int_field(&raw, "hp"),
            max_hp: int_field(&raw, "max_hp"),
            mana: int_field(&raw, "mana"),
            max_mana: int_field(&raw, "mana_max"),
            inventory: object
                .get("inventario")
                .map(name_list)
                .unwrap_or_default(),
            equipment: object
                .get("equipaggiamento")
                .map(|eq| Equipment {
                    weapon: item_name(eq.get("arma")),
                    armor: item_name(eq.get("armatura")),
                    accessories: eq.get("accessori").map(name_list).unwrap_or_default(),
                })
                .unwrap_or_default(),
            stats: object
                .get("statistiche")
                .and_then(Value::as_object)
                .map(|stats| {
                    stats
                        .iter()
                        .filter_map(|(key, value)| Some((key.clone(), value.as_i64()?)))
                        .collect()
                })
                .unwrap_or_default(),
        };

        let position = object.get("posizione").and_then(|pos| {
            Some(Position {
                map: pos.get("mappa")?.as_str()?.to_string(),
                x: pos.get("x")?.as_i64()?,
                y: pos.get("y")?.as_i64()?,
            })
        });

        Ok(Self {
            state_name: str_field(&raw, "stato"),
            player,
            position,
            raw,
            fetched_at: OffsetDateTime::now_utc(),
            generation,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapEntity {
    pub name: String,
    pub token: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Door {
    pub destination: String,
    pub target: Coord,
}

/// Grid and positional indexes of the current map.
#[derive(Debug, Clone)]
pub struct MapSnapshot {
    pub map: String,
    pub player: Coord,
    pub width: usize,
    pub height: usize,
    pub grid: Vec<Vec<i64>>,
    pub ascii: Option<String>,
    pub objects: BTreeMap<Coord, MapEntity>,
    pub npcs: BTreeMap<Coord, MapEntity>,
    pub doors: BTreeMap<Coord, Door>,
    pub fetched_at: OffsetDateTime,
    pub generation: u64,
}

impl MapSnapshot {
    pub fn from_payload(raw: &Value, generation: u64) -> ApiResult<Self> {
        let grid: Vec<Vec<i64>> = match raw.get("griglia") {
            Some(Value::Array(rows)) => rows
                .iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(|c| c.as_i64().unwrap_or(0)).collect())
                        .unwrap_or_default()
                })
                .collect(),
            _ => return Err(ApiError::Parse("map payload has no grid".into())),
        };

        Ok(Self {
            map: str_field(raw, "mappa"),
            player: Coord {
                x: int_field(raw, "x"),
                y: int_field(raw, "y"),
            },
            width: grid.iter().map(Vec::len).max().unwrap_or(0),
            height: grid.len(),
            grid,
            ascii: raw
                .get("griglia_ascii")
                .and_then(Value::as_str)
                .map(str::to_string),
            objects: entity_index(raw.get("oggetti_vicini")),
            npcs: entity_index(raw.get("npg_vicini")),
            doors: door_index(raw.get("porte")),
            fetched_at: OffsetDateTime::now_utc(),
            generation,
        })
    }

    pub fn is_walkable(&self, at: Coord) -> bool {
        if at.x < 0 || at.y < 0 {
            return false;
        }
        self.grid
            .get(at.y as usize)
            .and_then(|row| row.get(at.x as usize))
            .map(|cell| *cell == 0)
            .unwrap_or(false)
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn int_field(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

fn item_name(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(name) => Some(name.clone()),
        Value::Object(map) => map.get("nome").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn name_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|item| item_name(Some(item))).collect())
        .unwrap_or_default()
}

fn entity_index(value: Option<&Value>) -> BTreeMap<Coord, MapEntity> {
    let Some(Value::Object(entries)) = value else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(key, entity)| {
            let coord = Coord::parse_key(key)?;
            Some((
                coord,
                MapEntity {
                    name: entity.get("nome")?.as_str()?.to_string(),
                    token: entity.get("token").and_then(Value::as_str).map(str::to_string),
                    state: entity.get("stato").and_then(Value::as_str).map(str::to_string),
                },
            ))
        })
        .collect()
}

fn door_index(value: Option<&Value>) -> BTreeMap<Coord, Door> {
    let Some(Value::Object(entries)) = value else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(key, door)| {
            let coord = Coord::parse_key(key)?;
            let parts = door.as_array()?;
            Some((
                coord,
                Door {
                    destination: parts.first()?.as_str()?.to_string(),
                    target: Coord {
                        x: parts.get(1)?.as_i64()?,
                        y: parts.get(2)?.as_i64()?,
                    },
                },
            ))
        })
        .collect()
}
