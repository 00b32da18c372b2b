use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::items::ItemLocation;
use crate::rooms::Direction;
use crate::store::{EntityRecord, ItemRecord, LoadedWorld, NpcKind, RoomRecord};

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    pub landscape: Option<String>,
    #[serde(default)]
    pub start_room: Option<String>,
    pub rooms: Vec<SeedRoom>,
    #[serde(default)]
    pub items: Vec<SeedItem>,
    #[serde(default)]
    pub merchants: Vec<SeedMerchant>,
    #[serde(default)]
    pub animals: Vec<SeedAnimal>,
}

#[derive(Debug, Deserialize)]
pub struct SeedRoom {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exits: BTreeMap<Direction, String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: u32,
    pub room: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedWare {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: u32,
}

#[derive(Debug, Deserialize)]
pub struct SeedMerchant {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub room: String,
    #[serde(default)]
    pub wares: Vec<SeedWare>,
}

#[derive(Debug, Deserialize)]
pub struct SeedAnimal {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub room: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub action_chance: f64,
    #[serde(default)]
    pub move_chance: f64,
}

pub fn parse_seed(text: &str, source: &str) -> anyhow::Result<SeedFile> {
    serde_yaml::from_str::<SeedFile>(text).with_context(|| format!("parse seed yaml: {source}"))
}

pub fn load_seed(path: &Path) -> anyhow::Result<SeedFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read seed file {}", path.display()))?;
    parse_seed(&text, &path.display().to_string())
}

impl SeedFile {
    pub fn into_world(self) -> anyhow::Result<LoadedWorld> {
        let start = self
            .start_room
            .clone()
            .or_else(|| self.rooms.first().map(|r| r.name.clone()))
            .context("seed has no rooms")?;

        let rooms = self
            .rooms
            .into_iter()
            .map(|r| RoomRecord {
                origin: r.name.eq_ignore_ascii_case(&start),
                name: r.name,
                description: r.description.trim().to_string(),
                exits: r.exits,
                image: None,
                creator: None,
            })
            .collect::<Vec<_>>();

        let mut next_id = 1u64;
        let mut items = Vec::new();
        let mut push_item = |name: String, description: String, price: u32, location| {
            items.push(ItemRecord {
                id: next_id,
                name,
                description,
                price,
                location,
            });
            next_id += 1;
        };
        for it in self.items {
            push_item(it.name, it.description, it.price, ItemLocation::room(&it.room));
        }

        let mut npcs = Vec::new();
        for m in self.merchants {
            for w in m.wares {
                push_item(w.name, w.description, w.price, ItemLocation::entity(&m.name));
            }
            npcs.push(EntityRecord {
                name: m.name,
                kind: NpcKind::Merchant,
                description: m.description,
                location: m.room,
                actions: Vec::new(),
                action_chance: 0.0,
                move_chance: 0.0,
            });
        }
        for a in self.animals {
            // A creature that never had its own move chance wanders as often as it gestures.
            let move_chance = if a.move_chance > 0.0 {
                a.move_chance
            } else {
                a.action_chance
            };
            npcs.push(EntityRecord {
                name: a.name,
                kind: NpcKind::Animal,
                description: a.description,
                location: a.room,
                actions: a.actions,
                action_chance: a.action_chance,
                move_chance,
            });
        }

        LoadedWorld::assemble(rooms, items, npcs)
    }
}
