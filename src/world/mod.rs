//! Read-only world configuration: the room graph, item and object
//! definitions, and the objects placed in each room.
//!
//! Loaded once at startup and shared as `Arc<WorldModel>`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::DungeonError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldModel {
    #[serde(default)]
    pub rooms: HashMap<String, Room>,
    /// Object definitions keyed by object id.
    #[serde(default)]
    pub objects: HashMap<String, ItemDef>,
    /// Room id to the object ids placed in it.
    #[serde(default)]
    pub placements: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Room {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Direction to destination room id. Ordered so exit listings are stable.
    #[serde(default)]
    pub exits: BTreeMap<String, String>,
    #[serde(default)]
    pub items: BTreeMap<String, ItemDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: HashMap<String, Trigger>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// What a handler sees of a room. Unknown ids resolve to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomView<'a> {
    pub id: &'a str,
    pub title: String,
    pub description: String,
    pub exits: Vec<&'a str>,
    pub known: bool,
}

impl RoomView<'_> {
    pub fn exit_list(&self) -> String {
        if self.exits.is_empty() {
            "none".to_string()
        } else {
            self.exits.join(", ")
        }
    }

    /// Title, description and exits as shown after moving or looking.
    pub fn render(&self) -> String {
        format!("{}\n{}\nExits: {}", self.title, self.description, self.exit_list())
    }
}

/// Direction an arriving agent is seen coming from.
pub fn opposite_direction(direction: &str) -> &'static str {
    match direction {
        "north" => "south",
        "south" => "north",
        "east" => "west",
        "west" => "east",
        "up" => "down",
        "down" => "up",
        _ => "somewhere",
    }
}

impl WorldModel {
    pub fn from_json(text: &str) -> Result<Self> {
        let world: WorldModel = serde_json::from_str(text).context("parsing world JSON")?;
        world.validate()?;
        Ok(world)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let world: WorldModel = serde_yaml::from_str(text).context("parsing world YAML")?;
        world.validate()?;
        Ok(world)
    }

    /// Loads a world file, choosing the format from the extension.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading world file {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&text),
            _ => Self::from_json(&text),
        }
    }

    /// Rejects placements of undefined objects. Dangling exits are tolerated
    /// and degrade to placeholder rooms at lookup time.
    fn validate(&self) -> Result<()> {
        for (room_id, object_ids) in &self.placements {
            for object_id in object_ids {
                if !self.objects.contains_key(object_id) {
                    return Err(DungeonError::World(format!(
                        "room {} places undefined object {}",
                        room_id, object_id
                    ))
                    .into());
                }
            }
        }
        for (room_id, room) in &self.rooms {
            for target in room.exits.values() {
                if !self.rooms.contains_key(target) {
                    log::warn!("Room {} has an exit to unknown room {}", room_id, target);
                }
            }
        }
        Ok(())
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn view<'a>(&'a self, id: &'a str) -> RoomView<'a> {
        match self.rooms.get(id) {
            Some(room) => RoomView {
                id,
                title: if room.title.is_empty() {
                    format!("Room {}", id)
                } else {
                    room.title.clone()
                },
                description: if room.description.is_empty() {
                    "No description available.".to_string()
                } else {
                    room.description.clone()
                },
                exits: room.exits.keys().map(String::as_str).collect(),
                known: true,
            },
            None => {
                log::warn!("Lookup of unknown room id {}", id);
                RoomView {
                    id,
                    title: format!("Room {}", id),
                    description: "An unknown room.".to_string(),
                    exits: Vec::new(),
                    known: false,
                }
            }
        }
    }

    pub fn exit(&self, room_id: &str, direction: &str) -> Option<&str> {
        self.rooms
            .get(room_id)
            .and_then(|room| room.exits.get(direction))
            .map(String::as_str)
    }

    /// Objects placed in a room, in placement order.
    pub fn objects_in(&self, room_id: &str) -> Vec<(&str, &ItemDef)> {
        self.placements
            .get(room_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.objects.get(id).map(|def| (id.as_str(), def)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Finds a room item or placed object by id or name, case-insensitively.
    pub fn find_in_room(&self, room_id: &str, needle: &str) -> Option<&ItemDef> {
        let needle = needle.to_lowercase();
        let matches = |id: &str, def: &ItemDef| {
            id.to_lowercase() == needle || def.name.to_lowercase() == needle
        };

        if let Some(room) = self.rooms.get(room_id) {
            if let Some((_, def)) = room.items.iter().find(|(id, def)| matches(id, def)) {
                return Some(def);
            }
        }
        self.objects_in(room_id)
            .into_iter()
            .find(|(id, def)| matches(id, def))
            .map(|(_, def)| def)
    }

    /// Finds a placed object by name, case-insensitively.
    pub fn find_object_by_name(&self, room_id: &str, name: &str) -> Option<&ItemDef> {
        let name = name.to_lowercase();
        self.objects_in(room_id)
            .into_iter()
            .find(|(_, def)| def.name.to_lowercase() == name)
            .map(|(_, def)| def)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_view_known_room() {
        let world = fixtures::world();
        let view = world.view("start_room");
        assert!(view.known);
        assert_eq!(view.title, "The Entrance Hall");
        assert_eq!(view.exit_list(), "north, up");
        assert_eq!(
            view.render(),
            "The Entrance Hall\nA draughty hall with a stone floor.\nExits: north, up"
        );
    }

    #[test]
    fn test_view_unknown_room_is_placeholder() {
        let world = fixtures::world();
        let view = world.view("void");
        assert!(!view.known);
        assert_eq!(view.title, "Room void");
        assert_eq!(view.description, "An unknown room.");
        assert_eq!(view.exit_list(), "none");
    }

    #[test]
    fn test_opposite_directions() {
        assert_eq!(opposite_direction("north"), "south");
        assert_eq!(opposite_direction("up"), "down");
        assert_eq!(opposite_direction("west"), "east");
        assert_eq!(opposite_direction("northeast"), "somewhere");
    }

    #[test]
    fn test_find_in_room_by_id_and_name() {
        let world = fixtures::world();
        assert!(world.find_in_room("start_room", "STATUE").is_some());
        assert!(world.find_in_room("start_room", "lever").is_some());
        assert!(world.find_in_room("start_room", "book").is_none());
        assert!(world.find_object_by_name("library", "book").is_some());
    }

    #[test]
    fn test_undefined_placement_rejected() {
        let json = r#"{"rooms": {}, "objects": {}, "placements": {"a": ["ghost"]}}"#;
        assert!(WorldModel::from_json(json).is_err());
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "rooms:\n  cell:\n    title: A Cell\n    description: Cold and damp.\n    exits:\n{}",
            "      east: yard\n  yard:\n    title: The Yard\n"
        )
        .unwrap();

        let world = WorldModel::load(file.path()).unwrap();
        assert_eq!(world.exit("cell", "east"), Some("yard"));
        assert_eq!(world.view("yard").description, "No description available.");
    }
}
