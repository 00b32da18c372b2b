use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entities::{AnimalState, Entity, EntityKind};
use crate::items::{ItemLocation, Items};
use crate::rooms::{Direction, Room, Rooms};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Room,
    Item,
    Entity,
    Person,
}

/// One line of the store log. `data = null` deletes the object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreRecord {
    pub index: u64,
    pub ms: u64,
    pub world: String,
    pub kind: ObjectKind,
    pub key: String,
    pub data: serde_json::Value,
}

type ObjectKey = (String, ObjectKind, String);

/// Append-only JSONL object store, replayed into memory on open.
#[derive(Debug)]
pub struct Store {
    path: Option<PathBuf>,
    next_index: u64,
    objects: BTreeMap<ObjectKey, serde_json::Value>,
}

impl Store {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let mut out = Self {
            path: Some(path),
            next_index: 1,
            objects: BTreeMap::new(),
        };
        out.load_replay()?;
        Ok(out)
    }

    /// A store that never touches disk.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            next_index: 1,
            objects: BTreeMap::new(),
        }
    }

    pub fn put<T: Serialize>(
        &mut self,
        ms: u64,
        world: &str,
        kind: ObjectKind,
        key: &str,
        value: &T,
    ) -> anyhow::Result<()> {
        let data = serde_json::to_value(value)?;
        self.append(ms, world, kind, key, data)
    }

    pub fn delete(
        &mut self,
        ms: u64,
        world: &str,
        kind: ObjectKind,
        key: &str,
    ) -> anyhow::Result<()> {
        self.append(ms, world, kind, key, serde_json::Value::Null)
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        world: &str,
        kind: ObjectKind,
        key: &str,
    ) -> anyhow::Result<Option<T>> {
        let k = (world.to_string(), kind, key.to_lowercase());
        match self.objects.get(&k) {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
        }
    }

    /// Every object of `kind` in `world`. Records that fail to decode are skipped with a warning.
    pub fn list<T: DeserializeOwned>(&self, world: &str, kind: ObjectKind) -> Vec<(String, T)> {
        self.objects
            .iter()
            .filter(|((w, k, _), _)| w == world && *k == kind)
            .filter_map(|((_, _, key), v)| match serde_json::from_value::<T>(v.clone()) {
                Ok(t) => Some((key.clone(), t)),
                Err(e) => {
                    warn!(
                        world = %world,
                        kind = ?kind,
                        key = %key,
                        err = %e,
                        "skipping bad record"
                    );
                    None
                }
            })
            .collect()
    }

    fn append(
        &mut self,
        ms: u64,
        world: &str,
        kind: ObjectKind,
        key: &str,
        data: serde_json::Value,
    ) -> anyhow::Result<()> {
        let rec = StoreRecord {
            index: self.next_index,
            ms,
            world: world.to_string(),
            kind,
            key: key.to_lowercase(),
            data,
        };
        self.next_index = self.next_index.saturating_add(1);

        if let Some(path) = &self.path {
            if let Some(dir) = path.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }
            let line = serde_json::to_string(&rec)?;
            let mut f = OpenOptions::new().create(true).append(true).open(path)?;
            f.write_all(line.as_bytes())?;
            f.write_all(b"\n")?;
            f.flush()?;
        }

        self.apply(rec);
        Ok(())
    }

    fn apply(&mut self, rec: StoreRecord) {
        let k = (rec.world, rec.kind, rec.key);
        if rec.data.is_null() {
            self.objects.remove(&k);
        } else {
            self.objects.insert(k, rec.data);
        }
    }

    fn load_replay(&mut self) -> anyhow::Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let f = match std::fs::File::open(&path) {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let rd = BufReader::new(f);

        let mut max_index = 0u64;
        for (lineno, line) in rd.lines().enumerate() {
            let line = line?;
            let raw = line.trim();
            if raw.is_empty() {
                continue;
            }
            let rec: StoreRecord = match serde_json::from_str(raw) {
                Ok(v) => v,
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "store parse error at {}:{}: {}",
                        path.display(),
                        lineno + 1,
                        e
                    ));
                }
            };
            max_index = max_index.max(rec.index);
            self.apply(rec);
        }
        self.next_index = max_index.saturating_add(1).max(1);
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomRecord {
    pub name: String,
    pub description: String,
    pub exits: BTreeMap<Direction, String>,
    pub image: Option<String>,
    pub creator: Option<String>,
    pub origin: bool,
}

impl RoomRecord {
    pub fn from_room(r: &Room, origin: bool) -> Self {
        Self {
            name: r.name.clone(),
            description: r.description.clone(),
            exits: r.exits.clone(),
            image: r.image.clone(),
            creator: r.creator.clone(),
            origin,
        }
    }

    fn into_room(self) -> Room {
        let mut r = Room::new(self.name, self.description);
        r.exits = self.exits;
        r.image = self.image;
        r.creator = self.creator;
        r
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: u32,
    pub location: ItemLocation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NpcKind {
    Animal,
    Merchant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    pub kind: NpcKind,
    #[serde(default)]
    pub description: String,
    pub location: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub action_chance: f64,
    #[serde(default)]
    pub move_chance: f64,
}

impl EntityRecord {
    /// `None` for people, which are stored as [`PersonRecord`]s.
    pub fn from_entity(e: &Entity) -> Option<Self> {
        let (kind, actions, action_chance, move_chance) = match &e.kind {
            EntityKind::Person(_) => return None,
            EntityKind::Merchant => (NpcKind::Merchant, Vec::new(), 0.0, 0.0),
            EntityKind::Animal(a) => (
                NpcKind::Animal,
                a.actions.clone(),
                a.action_chance,
                a.move_chance,
            ),
        };
        Some(Self {
            name: e.name.clone(),
            kind,
            description: e.description.clone(),
            location: e.location.clone(),
            actions,
            action_chance,
            move_chance,
        })
    }

    pub fn into_entity(self) -> Entity {
        match self.kind {
            NpcKind::Merchant => Entity::merchant(&self.name, &self.description, &self.location),
            NpcKind::Animal => Entity::animal(
                &self.name,
                &self.description,
                &self.location,
                AnimalState {
                    actions: self.actions,
                    action_chance: self.action_chance.clamp(0.0, 1.0),
                    move_chance: self.move_chance.clamp(0.0, 1.0),
                },
            ),
        }
    }
}

/// What survives a person's logout.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonRecord {
    pub name: String,
    pub money: u32,
    pub location: String,
    pub seen_rooms: Vec<String>,
}

/// A consistent world rebuilt from records.
#[derive(Debug)]
pub struct LoadedWorld {
    pub rooms: Rooms,
    pub items: Items,
    pub npcs: Vec<Entity>,
}

impl LoadedWorld {
    /// Validate records against each other: entities must stand in a known room and items must
    /// belong to a known room or entity. Strays are moved to the origin room.
    pub fn assemble(
        rooms: Vec<RoomRecord>,
        items: Vec<ItemRecord>,
        npcs: Vec<EntityRecord>,
    ) -> anyhow::Result<Self> {
        let origin = rooms
            .iter()
            .find(|r| r.origin)
            .or_else(|| rooms.first())
            .map(|r| r.name.clone())
            .unwrap_or_default();
        let rooms = Rooms::from_rooms(
            rooms.into_iter().map(RoomRecord::into_room).collect(),
            &origin,
        )?;
        let origin = rooms.origin().to_string();

        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for rec in npcs {
            let mut e = rec.into_entity();
            if !seen.insert(e.key()) {
                warn!(entity = %e.name, "duplicate entity; keeping the first");
                continue;
            }
            match rooms.get(&e.location) {
                Some(r) => e.location = r.name.clone(),
                None => {
                    warn!(
                        entity = %e.name,
                        room = %e.location,
                        "entity in unknown room; moving to origin"
                    );
                    e.location = origin.clone();
                }
            }
            entities.push(e);
        }

        let mut table = Items::new();
        for rec in items {
            let location = match &rec.location {
                ItemLocation::Room(r) if rooms.contains(r) => rec.location.clone(),
                ItemLocation::Entity(e) if seen.contains(e) => rec.location.clone(),
                other => {
                    warn!(
                        item = %rec.name,
                        location = ?other,
                        "item location does not resolve; moving to origin"
                    );
                    ItemLocation::room(&origin)
                }
            };
            table.restore(rec.id, &rec.name, &rec.description, rec.price, location);
        }

        Ok(Self {
            rooms,
            items: table,
            npcs: entities,
        })
    }

    /// Rebuild `world` from the store. `Ok(None)` when the store holds no rooms for it.
    pub fn from_store(store: &Store, world: &str) -> anyhow::Result<Option<Self>> {
        let rooms: Vec<RoomRecord> = store
            .list(world, ObjectKind::Room)
            .into_iter()
            .map(|(_, r)| r)
            .collect();
        if rooms.is_empty() {
            return Ok(None);
        }
        let items = store
            .list(world, ObjectKind::Item)
            .into_iter()
            .map(|(_, r)| r)
            .collect();
        let npcs = store
            .list(world, ObjectKind::Entity)
            .into_iter()
            .map(|(_, r)| r)
            .collect();
        Self::assemble(rooms, items, npcs).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("orchestrator_store_{tag}_{nanos}.jsonl"))
    }

    #[test]
    fn replays_puts_and_tombstones() {
        let path = temp_path("replay");
        {
            let mut s = Store::open(path.clone()).unwrap();
            let rec = PersonRecord {
                name: "Alice".to_string(),
                money: 90,
                location: "Road".to_string(),
                seen_rooms: vec!["road".to_string()],
            };
            s.put(1, "corvid", ObjectKind::Person, "Alice", &rec).unwrap();
            s.put(2, "corvid", ObjectKind::Item, "7", &serde_json::json!({"x": 1}))
                .unwrap();
            s.delete(3, "corvid", ObjectKind::Item, "7").unwrap();
        }

        let s = Store::open(path.clone()).unwrap();
        let p: PersonRecord = s
            .get("corvid", ObjectKind::Person, "alice")
            .unwrap()
            .unwrap();
        assert_eq!(p.money, 90);
        assert!(s
            .get::<serde_json::Value>("corvid", ObjectKind::Item, "7")
            .unwrap()
            .is_none());
        assert!(s
            .get::<PersonRecord>("other", ObjectKind::Person, "alice")
            .unwrap()
            .is_none());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn corrupt_line_names_file_and_line() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "\n{not json}\n").unwrap();
        let err = Store::open(path.clone()).unwrap_err().to_string();
        assert!(err.contains(":2:"), "{err}");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn assemble_relocates_strays() {
        let mut road = RoomRecord {
            name: "Road".to_string(),
            origin: true,
            ..RoomRecord::default()
        };
        road.exits.insert(Direction::North, "Clearing".to_string());
        let clearing = RoomRecord {
            name: "Clearing".to_string(),
            ..RoomRecord::default()
        };
        let items = vec![
            ItemRecord {
                id: 3,
                name: "bell".to_string(),
                description: String::new(),
                price: 4,
                location: ItemLocation::entity("Gambino"),
            },
            ItemRecord {
                id: 4,
                name: "lamp".to_string(),
                description: String::new(),
                price: 0,
                location: ItemLocation::entity("Alice"),
            },
        ];
        let npcs = vec![EntityRecord {
            name: "Gambino".to_string(),
            kind: NpcKind::Merchant,
            description: String::new(),
            location: "nowhere".to_string(),
            actions: vec![],
            action_chance: 0.0,
            move_chance: 0.0,
        }];

        let w = LoadedWorld::assemble(vec![road, clearing], items, npcs).unwrap();
        assert_eq!(w.rooms.origin(), "Road");
        assert_eq!(w.rooms.next_room("Clearing", Direction::South), Some("Road"));
        assert_eq!(w.npcs[0].location, "Road");
        assert_eq!(w.items.get(3).unwrap().location, ItemLocation::entity("gambino"));
        assert_eq!(w.items.get(4).unwrap().location, ItemLocation::room("Road"));
    }

    #[test]
    fn empty_store_has_no_world() {
        let s = Store::in_memory();
        assert!(LoadedWorld::from_store(&s, "corvid").unwrap().is_none());
    }
}
