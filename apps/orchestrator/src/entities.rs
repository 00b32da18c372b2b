use std::collections::{BTreeMap, HashSet, VecDeque};

use worldbus::user::UserId;

use crate::rooms::capitalize;

pub const MAX_INVENTORY: usize = 5;
pub const STARTING_MONEY: u32 = 100;
pub const HISTORY_CAP: usize = 1000;
pub const MAX_NAME_LEN: usize = 20;
pub const SPAWNED_ACTION_CHANCE: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct PersonState {
    pub user_id: UserId,
    pub money: u32,
    pub seen_rooms: HashSet<String>,
    pub history: VecDeque<String>,
    pub last_action_ms: u64,
}

impl PersonState {
    pub fn new(user_id: UserId, now_ms: u64) -> Self {
        Self {
            user_id,
            money: STARTING_MONEY,
            seen_rooms: HashSet::new(),
            history: VecDeque::new(),
            last_action_ms: now_ms,
        }
    }

    pub fn record(&mut self, line: impl Into<String>) {
        while self.history.len() >= HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(line.into());
    }

    /// Mark a room visited. Returns true on the first visit.
    pub fn visit(&mut self, room: &str) -> bool {
        self.seen_rooms.insert(room.to_lowercase())
    }

    pub fn recent_history(&self, n: usize) -> Vec<&str> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).map(String::as_str).collect()
    }
}

#[derive(Debug, Clone)]
pub struct AnimalState {
    pub actions: Vec<String>,
    pub action_chance: f64,
    pub move_chance: f64,
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    Person(PersonState),
    Animal(AnimalState),
    Merchant,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub role: String,
    pub description: String,
    pub location: String,
    pub kind: EntityKind,
}

impl Entity {
    pub fn person(name: &str, role: &str, location: &str, user_id: UserId, now_ms: u64) -> Self {
        let role = role.trim().to_lowercase();
        Self {
            name: name.to_string(),
            role: if role.is_empty() { "person".to_string() } else { role },
            description: String::new(),
            location: location.to_string(),
            kind: EntityKind::Person(PersonState::new(user_id, now_ms)),
        }
    }

    pub fn animal(name: &str, description: &str, location: &str, animal: AnimalState) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            role: "animal".to_string(),
            description: description.trim().to_string(),
            location: location.to_string(),
            kind: EntityKind::Animal(animal),
        }
    }

    pub fn merchant(name: &str, description: &str, location: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            role: "merchant".to_string(),
            description: description.trim().to_string(),
            location: location.to_string(),
            kind: EntityKind::Merchant,
        }
    }

    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    #[cfg(test)]
    pub fn is_live_session(&self) -> bool {
        matches!(self.kind, EntityKind::Person(_))
    }

    pub fn is_autonomous(&self) -> bool {
        matches!(self.kind, EntityKind::Animal(_))
    }

    pub fn is_merchant(&self) -> bool {
        matches!(self.kind, EntityKind::Merchant)
    }

    /// Whether this entity accepts one more item given how many it already holds.
    pub fn can_receive(&self, held: usize) -> Result<(), String> {
        match &self.kind {
            EntityKind::Person(_) if held >= MAX_INVENTORY => {
                Err("You can't carry any more items.".to_string())
            }
            EntityKind::Person(_) | EntityKind::Merchant => Ok(()),
            EntityKind::Animal(_) => Err(format!("The {} cannot carry anything.", self.name)),
        }
    }

    pub fn as_person(&self) -> Option<&PersonState> {
        match &self.kind {
            EntityKind::Person(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_person_mut(&mut self) -> Option<&mut PersonState> {
        match &mut self.kind {
            EntityKind::Person(p) => Some(p),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.as_person().map(|p| &p.user_id)
    }

    /// Name as shown in room listings: "Alice", "Bob The Builder", "Gambino The Merchant",
    /// "a fox".
    pub fn display_name(&self) -> String {
        match &self.kind {
            EntityKind::Animal(_) => format!("a {}", self.name),
            _ if self.role == "person" => self.name.clone(),
            _ => format!("{} The {}", self.name, capitalize(&self.role)),
        }
    }

    /// Sentence-initial, definite form: "The fox" for animals.
    pub fn definite(&self) -> String {
        match &self.kind {
            EntityKind::Animal(_) => format!("The {}", self.name),
            _ => self.name.clone(),
        }
    }

    /// Sentence-initial, indefinite form: "A fox" for animals.
    pub fn indefinite(&self) -> String {
        match &self.kind {
            EntityKind::Animal(_) => format!("A {}", self.name),
            _ => self.name.clone(),
        }
    }

    pub fn matches(&self, token: &str) -> bool {
        let t = token.trim();
        !t.is_empty() && (self.name.eq_ignore_ascii_case(t) || self.role.eq_ignore_ascii_case(t))
    }
}

/// Identifies an entity in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Person(UserId),
    Npc(String),
}

/// People keyed by session, everything else keyed by lower-cased name.
#[derive(Debug, Clone, Default)]
pub struct Entities {
    people: BTreeMap<UserId, Entity>,
    npcs: BTreeMap<String, Entity>,
}

impl Entities {
    pub fn get(&self, r: &EntityRef) -> Option<&Entity> {
        match r {
            EntityRef::Person(id) => self.people.get(id),
            EntityRef::Npc(k) => self.npcs.get(k),
        }
    }

    pub fn get_mut(&mut self, r: &EntityRef) -> Option<&mut Entity> {
        match r {
            EntityRef::Person(id) => self.people.get_mut(id),
            EntityRef::Npc(k) => self.npcs.get_mut(k),
        }
    }

    pub fn person(&self, id: &UserId) -> Option<&Entity> {
        self.people.get(id)
    }

    pub fn person_mut(&mut self, id: &UserId) -> Option<&mut Entity> {
        self.people.get_mut(id)
    }

    pub fn add_person(&mut self, e: Entity) {
        if let Some(id) = e.user_id().cloned() {
            self.people.insert(id, e);
        }
    }

    pub fn remove_person(&mut self, id: &UserId) -> Option<Entity> {
        self.people.remove(id)
    }

    pub fn add_npc(&mut self, e: Entity) -> Result<(), String> {
        let k = e.key();
        if self.name_in_use(&k) {
            return Err(format!("{} is already here.", e.name));
        }
        self.npcs.insert(k, e);
        Ok(())
    }

    pub fn npc(&self, name: &str) -> Option<&Entity> {
        self.npcs.get(&name.trim().to_lowercase())
    }

    pub fn npc_mut(&mut self, name: &str) -> Option<&mut Entity> {
        self.npcs.get_mut(&name.trim().to_lowercase())
    }

    pub fn people(&self) -> impl Iterator<Item = &Entity> {
        self.people.values()
    }

    pub fn npcs(&self) -> impl Iterator<Item = &Entity> {
        self.npcs.values()
    }

    pub fn people_count(&self) -> usize {
        self.people.len()
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.people.keys().cloned().collect()
    }

    pub fn animal_keys(&self) -> Vec<String> {
        self.npcs
            .iter()
            .filter(|(_, e)| e.is_autonomous())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn name_in_use(&self, name: &str) -> bool {
        let n = name.trim();
        self.npcs.contains_key(&n.to_lowercase())
            || self.people.values().any(|p| p.name.eq_ignore_ascii_case(n))
    }

    /// Sessions whose person stands in `room`.
    pub fn people_in(&self, room: &str) -> Vec<UserId> {
        self.people
            .iter()
            .filter(|(_, e)| e.location.eq_ignore_ascii_case(room))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every entity in `room` except `exclude`.
    pub fn others_in(&self, room: &str, exclude: Option<&EntityRef>) -> Vec<EntityRef> {
        let people = self
            .people
            .iter()
            .filter(|(_, e)| e.location.eq_ignore_ascii_case(room))
            .map(|(id, _)| EntityRef::Person(id.clone()));
        let npcs = self
            .npcs
            .iter()
            .filter(|(_, e)| e.location.eq_ignore_ascii_case(room))
            .map(|(k, _)| EntityRef::Npc(k.clone()));
        people
            .chain(npcs)
            .filter(|r| Some(r) != exclude)
            .collect()
    }

    /// An entity matching `token` by name or role, in `room` when given, else anywhere.
    pub fn find(
        &self,
        token: &str,
        room: Option<&str>,
        exclude: Option<&EntityRef>,
    ) -> Option<EntityRef> {
        let in_room = |e: &Entity| room.map_or(true, |r| e.location.eq_ignore_ascii_case(r));
        let person = self
            .people
            .iter()
            .filter(|(_, e)| in_room(e) && e.matches(token))
            .map(|(id, _)| EntityRef::Person(id.clone()))
            .find(|r| Some(r) != exclude);
        person.or_else(|| {
            self.npcs
                .iter()
                .filter(|(_, e)| in_room(e) && e.matches(token))
                .map(|(k, _)| EntityRef::Npc(k.clone()))
                .find(|r| Some(r) != exclude)
        })
    }

    pub fn merchant_in(&self, room: &str) -> Option<&Entity> {
        self.npcs
            .values()
            .find(|e| e.is_merchant() && e.location.eq_ignore_ascii_case(room))
    }
}

/// Trim and title-case a requested person name, then validate it.
pub fn validate_person_name(raw: &str) -> Result<String, String> {
    let name = title_case(raw.trim());
    let ok = !name.is_empty()
        && name.chars().count() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_alphabetic() && !c.is_control());
    if !ok {
        return Err(format!(
            "Sorry, name {} is not valid, it should be up to {MAX_NAME_LEN} alphabetical \
             characters only. Please try again.",
            raw.trim()
        ));
    }
    if name.eq_ignore_ascii_case("system") {
        return Err(format!(
            "The name '{name}' is a reserved word, it would be confusing to be called that."
        ));
    }
    Ok(name)
}

pub fn title_case(s: &str) -> String {
    s.split(' ').map(capitalize).collect::<Vec<_>>().join(" ")
}
