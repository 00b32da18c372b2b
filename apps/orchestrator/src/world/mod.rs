use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use tracing::{info, warn};
use worldbus::topic::{
    ImageCreationResponse, Inbound, OutEvent, Outbound, RoomUpdate, SetUserName,
    SummonAgentResponse, UserAction, WorldDataUpdate,
};
use worldbus::user::UserId;

use crate::bootstrap::SeedFile;
use crate::commands::{self, Parsed};
use crate::entities::{validate_person_name, Entities, Entity, EntityKind, EntityRef};
use crate::items::{ItemId, ItemLocation, Items};
use crate::remote::Correlator;
use crate::rooms::Rooms;
use crate::store::{
    EntityRecord, ItemRecord, LoadedWorld, ObjectKind, PersonRecord, RoomRecord, Store,
};
use crate::transcript::Transcripts;

mod actions;
mod ai;
#[cfg(test)]
mod tests;

pub use actions::Move;

#[derive(Clone, Debug)]
pub struct WorldConfig {
    pub name: String,
    pub landscape: Option<String>,
    pub seed: u64,
    pub tick_ms: u64,
    pub idle_timeout_ms: u64,
    pub ai_timeout_ms: u64,
    pub logout_grace_ms: u64,
    pub animals_active: bool,
    pub ai_enabled: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: "corvid".to_string(),
            landscape: None,
            seed: 1,
            tick_ms: 30_000,
            idle_timeout_ms: 300_000,
            ai_timeout_ms: 120_000,
            logout_grace_ms: 3_000,
            animals_active: true,
            ai_enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
enum EventKind {
    Tick { generation: u64 },
    Logout { user_id: UserId, reason: String },
    RequestDeadline { request_id: String },
}

#[derive(Debug, Clone)]
struct ScheduledEvent {
    due_ms: u64,
    seq: u64,
    kind: EventKind,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms && self.seq == other.seq
    }
}
impl Eq for ScheduledEvent {}
impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.due_ms.cmp(&other.due_ms) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            o => o,
        }
    }
}

#[derive(Debug, Clone)]
struct Rng64 {
    state: u64,
}

impl Rng64 {
    fn from_seed(seed: u64) -> Self {
        let mut s = seed;
        if s == 0 {
            s = 0x9e3779b97f4a7c15;
        }
        Self { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn chance(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        let unit = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        unit < p
    }

    fn pick(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        (self.next_u64() % len as u64) as usize
    }
}

/// The authoritative world. Every inbound event and scheduled event is applied here, one at a
/// time; outbound events accumulate in the outbox until the bus loop flushes them.
pub struct World {
    cfg: WorldConfig,
    rooms: Rooms,
    items: Items,
    entities: Entities,
    pending: Correlator,
    summons: HashMap<String, UserId>,
    summon_seq: u64,
    store: Store,
    transcripts: Transcripts,
    rng: Rng64,
    now_ms: u64,
    event_seq: u64,
    events: BinaryHeap<Reverse<ScheduledEvent>>,
    tick_active: bool,
    tick_generation: u64,
    outbox: Vec<Outbound>,
}

impl World {
    /// Rebuild the world from `store`, falling back to `seed` (persisted on first use) and then
    /// to the empty placeholder world.
    pub fn new(
        mut cfg: WorldConfig,
        mut store: Store,
        transcripts: Transcripts,
        seed: Option<SeedFile>,
    ) -> anyhow::Result<Self> {
        let mut fresh_seed = false;
        let loaded = match LoadedWorld::from_store(&store, &cfg.name)? {
            Some(w) => Some(w),
            None => match seed {
                Some(seed) => {
                    if cfg.landscape.is_none() {
                        cfg.landscape = seed.landscape.clone();
                    }
                    fresh_seed = true;
                    Some(seed.into_world()?)
                }
                None => None,
            },
        };

        let (rooms, items, npcs) = match loaded {
            Some(w) => (w.rooms, w.items, w.npcs),
            None => (Rooms::empty_world(), Items::new(), Vec::new()),
        };
        let mut entities = Entities::default();
        for e in npcs {
            if let Err(msg) = entities.add_npc(e) {
                warn!(err = %msg, "skipping entity");
            }
        }

        if fresh_seed {
            persist_all(&mut store, &cfg.name, &rooms, &items, &entities)?;
        }

        info!(
            world = %cfg.name,
            rooms = rooms.len(),
            items = items.len(),
            entities = entities.npcs().count(),
            empty = rooms.is_empty_world(),
            "world loaded"
        );

        Ok(Self {
            rng: Rng64::from_seed(cfg.seed),
            cfg,
            rooms,
            items,
            entities,
            pending: Correlator::default(),
            summons: HashMap::new(),
            summon_seq: 0,
            store,
            transcripts,
            now_ms: 0,
            event_seq: 1,
            events: BinaryHeap::new(),
            tick_active: false,
            tick_generation: 0,
            outbox: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn set_now(&mut self, ms: u64) {
        self.now_ms = self.now_ms.max(ms);
    }

    #[cfg(test)]
    pub fn people_count(&self) -> usize {
        self.entities.people_count()
    }

    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    fn schedule_at_ms(&mut self, due_ms: u64, kind: EventKind) {
        let seq = self.event_seq;
        self.event_seq = self.event_seq.saturating_add(1);
        self.events
            .push(Reverse(ScheduledEvent { due_ms, seq, kind }));
    }

    fn schedule_in_ms(&mut self, delay_ms: u64, kind: EventKind) {
        self.schedule_at_ms(self.now_ms.saturating_add(delay_ms), kind);
    }

    fn pop_due_event(&mut self) -> Option<ScheduledEvent> {
        let due = self
            .events
            .peek()
            .is_some_and(|Reverse(ev)| ev.due_ms <= self.now_ms);
        if !due {
            return None;
        }
        self.events.pop().map(|Reverse(ev)| ev)
    }

    /// Milliseconds until the next scheduled event, if any.
    pub fn next_event_in_ms(&self) -> Option<u64> {
        self.events
            .peek()
            .map(|Reverse(ev)| ev.due_ms.saturating_sub(self.now_ms))
    }

    pub fn run_due_events(&mut self) -> anyhow::Result<()> {
        while let Some(ev) = self.pop_due_event() {
            self.handle_event(ev)?;
        }
        Ok(())
    }

    fn handle_event(&mut self, ev: ScheduledEvent) -> anyhow::Result<()> {
        match ev.kind {
            EventKind::Tick { generation } => self.on_tick(generation),
            EventKind::Logout { user_id, reason } => {
                self.send(&user_id, OutEvent::Logout(reason));
                Ok(())
            }
            EventKind::RequestDeadline { request_id } => {
                self.expire_request(&request_id);
                Ok(())
            }
        }
    }

    pub fn handle_inbound(&mut self, ev: Inbound) -> anyhow::Result<()> {
        match ev {
            Inbound::SetUserName(x) => self.on_set_user_name(x),
            Inbound::UserAction(x) => self.on_user_action(x),
            Inbound::UserDisconnect(x) => {
                self.remove_person(&x.user_id, "You have been disconnected.")
            }
            Inbound::ImageCreationResponse(x) => self.on_image_response(x),
            Inbound::SummonAgentResponse(x) => {
                self.on_summon_response(x);
                Ok(())
            }
            Inbound::AiResponse(x) => self.on_ai_response(x),
        }
    }

    // ---- messaging ----

    fn publish(&mut self, event: OutEvent) {
        self.outbox.push(Outbound::broadcast(event));
    }

    fn send(&mut self, user: &UserId, event: OutEvent) {
        self.outbox.push(Outbound::to(user, event));
    }

    /// Send text to one person and remember it in their history.
    fn tell_person(&mut self, user: &UserId, msg: &str) {
        let msg = msg.trim();
        if msg.is_empty() {
            return;
        }
        if let Some(p) = self
            .entities
            .person_mut(user)
            .and_then(Entity::as_person_mut)
        {
            p.record(format!("World: {msg}"));
        }
        self.send(user, OutEvent::WorldUpdate(msg.to_string()));
    }

    fn tell_everyone(&mut self, msg: &str) {
        for id in self.entities.user_ids() {
            self.tell_person(&id, msg);
        }
    }

    /// Tell every person except `exclude`: only those in `room` unless `shout`. Returns how many
    /// heard it.
    fn tell_others(
        &mut self,
        exclude: Option<&UserId>,
        room: &str,
        msg: &str,
        shout: bool,
    ) -> usize {
        let targets = if shout {
            self.entities.user_ids()
        } else {
            self.entities.people_in(room)
        };
        let mut n = 0;
        for id in targets {
            if Some(&id) == exclude {
                continue;
            }
            self.tell_person(&id, msg);
            n += 1;
        }
        n
    }

    /// Deliver the result of a command and log the exchange.
    fn reply_to(&mut self, user: &UserId, request: &str, reply: &str) {
        if reply.trim().is_empty() {
            return;
        }
        self.tell_person(user, reply);
        if let Some(name) = self.entities.person(user).map(|e| e.name.clone()) {
            self.transcripts.record(&name, request, reply.trim());
        }
    }

    fn room_update_for(&mut self, user: &UserId, room: &str) {
        let Some(r) = self.rooms.get(room) else {
            return;
        };
        let update = RoomUpdate {
            image: r.image.clone(),
            title: r.name.clone(),
            description: r.description.clone(),
            exits: self.rooms.exit_labels(room),
        };
        self.send(user, OutEvent::RoomUpdate(update));
    }

    fn broadcast_user_count(&mut self) {
        let n = self.entities.people_count();
        self.publish(OutEvent::WorldDataUpdate(WorldDataUpdate { user_count: n }));
    }

    // ---- persistence ----

    fn save_room(&mut self, name: &str) -> anyhow::Result<()> {
        let Some(r) = self.rooms.get(name) else {
            return Ok(());
        };
        let origin = r.name.eq_ignore_ascii_case(self.rooms.origin());
        let rec = RoomRecord::from_room(r, origin);
        self.store
            .put(self.now_ms, &self.cfg.name, ObjectKind::Room, &rec.name.clone(), &rec)
    }

    fn save_item(&mut self, id: ItemId) -> anyhow::Result<()> {
        let Some(it) = self.items.get(id) else {
            return Ok(());
        };
        let rec = ItemRecord {
            id,
            name: it.name.clone(),
            description: it.description.clone(),
            price: it.price,
            location: it.location.clone(),
        };
        self.store
            .put(self.now_ms, &self.cfg.name, ObjectKind::Item, &id.to_string(), &rec)
    }

    fn delete_item(&mut self, id: ItemId) -> anyhow::Result<()> {
        self.items.remove(id);
        self.store
            .delete(self.now_ms, &self.cfg.name, ObjectKind::Item, &id.to_string())
    }

    fn save_npc(&mut self, key: &str) -> anyhow::Result<()> {
        let Some(rec) = self.entities.npc(key).and_then(EntityRecord::from_entity) else {
            return Ok(());
        };
        self.store
            .put(self.now_ms, &self.cfg.name, ObjectKind::Entity, &rec.name.clone(), &rec)
    }

    fn save_person(&mut self, e: &Entity) -> anyhow::Result<()> {
        let Some(p) = e.as_person() else {
            return Ok(());
        };
        let mut seen_rooms = p.seen_rooms.iter().cloned().collect::<Vec<_>>();
        seen_rooms.sort();
        let rec = PersonRecord {
            name: e.name.clone(),
            money: p.money,
            location: e.location.clone(),
            seen_rooms,
        };
        self.store
            .put(self.now_ms, &self.cfg.name, ObjectKind::Person, &e.name, &rec)
    }

    fn load_person(&self, name: &str) -> Option<PersonRecord> {
        match self.store.get::<PersonRecord>(&self.cfg.name, ObjectKind::Person, name) {
            Ok(r) => r,
            Err(e) => {
                warn!(person = %name, err = %e, "ignoring unreadable person record");
                None
            }
        }
    }

    // ---- sessions ----

    fn on_set_user_name(&mut self, ev: SetUserName) -> anyhow::Result<()> {
        let SetUserName {
            user_id,
            name,
            role,
        } = ev;
        if user_id.is_empty() {
            warn!("set_user_name without a user id");
            return Ok(());
        }
        if let Some(existing) = self.entities.person(&user_id) {
            let msg = format!("You are already in the world as {}.", existing.name);
            self.send(&user_id, OutEvent::NameInvalid(msg));
            return Ok(());
        }
        let name = match validate_person_name(&name) {
            Ok(n) => n,
            Err(msg) => {
                self.send(&user_id, OutEvent::NameInvalid(msg));
                return Ok(());
            }
        };
        if self.entities.name_in_use(&name) {
            let msg = format!("The name {name} is already in use.");
            self.send(&user_id, OutEvent::NameInvalid(msg));
            return Ok(());
        }

        let record = self.load_person(&name);
        let start = record
            .as_ref()
            .and_then(|r| self.rooms.get(&r.location))
            .map(|r| r.name.clone())
            .unwrap_or_else(|| self.rooms.origin().to_string());

        let mut person = Entity::person(
            &name,
            role.as_deref().unwrap_or(""),
            &start,
            user_id.clone(),
            self.now_ms,
        );
        if let (Some(rec), Some(p)) = (record, person.as_person_mut()) {
            p.money = rec.money;
            p.seen_rooms = rec.seen_rooms.into_iter().map(|r| r.to_lowercase()).collect();
        }
        self.entities.add_person(person);

        let n = self.entities.people_count();
        let joined = format!(
            "{name} has joined, starting in the {}; there are now {}.",
            start.to_lowercase(),
            people_phrase(n)
        );
        self.tell_others(Some(&user_id), &start, &joined, true);

        let welcome = format!(
            "Welcome to {}, {name}. {}\n\n{}",
            self.cfg.name,
            self.people_text(&user_id),
            commands::help_text()
        );
        self.send(&user_id, OutEvent::Instructions(welcome));

        let arrival = self.move_entity(&EntityRef::Person(user_id.clone()), Move::Join)?;
        self.tell_person(&user_id, &arrival);
        self.broadcast_user_count();
        self.activate_tick();
        info!(user = %user_id, name = %name, room = %start, people = n, "person joined");
        Ok(())
    }

    /// Remove a person: drop what they carry, say goodbye, persist, then log them out after the
    /// grace delay. Unknown users are ignored, so racing triggers are harmless.
    fn remove_person(&mut self, user: &UserId, reason: &str) -> anyhow::Result<()> {
        let Some(name) = self.entities.person(user).map(|e| e.name.clone()) else {
            info!(user = %user, "removal for unknown user; ignoring");
            return Ok(());
        };

        if let Some(dropped) = self.drop_items(user, "all")? {
            self.tell_person(user, &dropped);
        }
        self.tell_person(user, reason);

        let Some(entity) = self.entities.remove_person(user) else {
            return Ok(());
        };
        self.save_person(&entity)?;
        self.transcripts.close(&name);

        let n = self.entities.people_count();
        self.tell_everyone(&format!(
            "{name} has left; there are now {}.",
            people_phrase(n)
        ));
        self.broadcast_user_count();
        self.schedule_in_ms(
            self.cfg.logout_grace_ms,
            EventKind::Logout {
                user_id: user.clone(),
                reason: reason.to_string(),
            },
        );
        if n == 0 {
            self.tick_active = false;
        }
        info!(user = %user, name = %name, people = n, reason = %reason, "person removed");
        Ok(())
    }

    /// The bus went away: every session is gone. Inventories fall to the floor, nobody is told.
    pub fn drop_all_sessions(&mut self) -> anyhow::Result<()> {
        for id in self.entities.user_ids() {
            let Some(entity) = self.entities.remove_person(&id) else {
                continue;
            };
            let mine = ItemLocation::entity(&entity.name);
            let here = ItemLocation::room(&entity.location);
            let ids = self.items.at(&mine).iter().map(|i| i.id).collect::<Vec<_>>();
            for item in ids {
                self.items.move_to(item, here.clone());
                self.save_item(item)?;
            }
            self.save_person(&entity)?;
            self.transcripts.close(&entity.name);
        }
        self.tick_active = false;
        self.outbox.clear();
        Ok(())
    }

    fn on_user_action(&mut self, ev: UserAction) -> anyhow::Result<()> {
        let UserAction {
            user_id,
            user_input,
        } = ev;
        let now = self.now_ms;
        let Some(person) = self
            .entities
            .person_mut(&user_id)
            .and_then(Entity::as_person_mut)
        else {
            warn!(user = %user_id, "action from unknown user");
            self.send(
                &user_id,
                OutEvent::Logout(
                    "You have been logged out due to a server error. Please log in again."
                        .to_string(),
                ),
            );
            return Ok(());
        };
        person.last_action_ms = now;
        person.record(format!("You: {user_input}"));
        self.send(&user_id, OutEvent::WorldUpdate(format!("You: {user_input}")));

        let reply = self.execute(&user_id, &user_input)?;
        self.reply_to(&user_id, &user_input, &reply);
        Ok(())
    }

    fn execute(&mut self, user: &UserId, input: &str) -> anyhow::Result<String> {
        match commands::parse(input) {
            Parsed::Reply(msg) => Ok(msg),
            Parsed::Run(cmd) => self.run_command(user, cmd),
            Parsed::Unknown if self.cfg.ai_enabled => {
                self.request_translation(user, input.trim());
                Ok(String::new())
            }
            Parsed::Unknown => Ok(commands::unrecognised_reply()),
        }
    }

    fn on_image_response(&mut self, ev: ImageCreationResponse) -> anyhow::Result<()> {
        let Some(room) = self.rooms.get(&ev.room_name).map(|r| r.name.clone()) else {
            warn!(room = %ev.room_name, "image for unknown room");
            return Ok(());
        };
        if !ev.success {
            self.tell_everyone(&format!("Room image creation for {room} failed."));
            return Ok(());
        }
        if let Some(r) = self.rooms.get_mut(&room) {
            r.image = Some(ev.image_filename.clone());
        }
        self.save_room(&room)?;
        self.tell_everyone(&format!("Room image for {room} has been created."));
        for id in self.entities.people_in(&room) {
            self.room_update_for(&id, &room);
        }
        Ok(())
    }

    fn on_summon_response(&mut self, ev: SummonAgentResponse) {
        match self.summons.remove(&ev.request_id) {
            Some(by) => {
                info!(request_id = %ev.request_id, summoner = %by, "summon answered");
                self.tell_everyone("Someone has been summoned!");
            }
            None => warn!(request_id = %ev.request_id, "summon response for unknown request"),
        }
    }

    // ---- background tick ----

    fn activate_tick(&mut self) {
        if self.tick_active {
            return;
        }
        self.tick_active = true;
        self.tick_generation = self.tick_generation.wrapping_add(1);
        let generation = self.tick_generation;
        self.schedule_in_ms(self.cfg.tick_ms, EventKind::Tick { generation });
    }

    fn on_tick(&mut self, generation: u64) -> anyhow::Result<()> {
        if !self.tick_active || generation != self.tick_generation {
            return Ok(());
        }

        let idle = self
            .entities
            .people()
            .filter_map(|e| {
                let p = e.as_person()?;
                let quiet = self.now_ms.saturating_sub(p.last_action_ms);
                (quiet > self.cfg.idle_timeout_ms).then(|| p.user_id.clone())
            })
            .collect::<Vec<_>>();
        for id in idle {
            self.remove_person(&id, "You have been logged out due to inactivity.")?;
        }

        if self.cfg.animals_active {
            self.animal_turns()?;
        }

        if self.entities.people_count() > 0 {
            self.schedule_in_ms(self.cfg.tick_ms, EventKind::Tick { generation });
        } else {
            self.tick_active = false;
        }
        Ok(())
    }

    /// Each animal may wander through a random exit; one that stays put may gesture instead.
    fn animal_turns(&mut self) -> anyhow::Result<()> {
        for key in self.entities.animal_keys() {
            let Some((room, state)) = self.entities.npc(&key).and_then(|e| match &e.kind {
                EntityKind::Animal(a) => Some((e.location.clone(), a.clone())),
                _ => None,
            }) else {
                continue;
            };

            if self.rng.chance(state.move_chance) {
                let exits = self
                    .rooms
                    .get(&room)
                    .map(|r| r.exits.keys().copied().collect::<Vec<_>>())
                    .unwrap_or_default();
                if !exits.is_empty() {
                    let dir = exits[self.rng.pick(exits.len())];
                    self.move_entity(&EntityRef::Npc(key.clone()), Move::Dir(dir))?;
                    continue;
                }
            }

            if !state.actions.is_empty() && self.rng.chance(state.action_chance) {
                let gesture = state.actions[self.rng.pick(state.actions.len())].clone();
                let msg = format!("The {key} {gesture}.");
                self.tell_others(None, &room, &msg, false);
            }
        }
        Ok(())
    }

    fn people_text(&self, viewer: &UserId) -> String {
        let others = self
            .entities
            .people()
            .filter(|e| e.user_id() != Some(viewer))
            .map(|e| e.name.clone())
            .collect::<Vec<_>>();
        if others.is_empty() {
            return "You are the only person in this world.".to_string();
        }
        format!("Also in this world: {}.", crate::items::join_and(&others))
    }
}

fn people_phrase(n: usize) -> String {
    if n == 1 {
        "1 person".to_string()
    } else {
        format!("{n} people")
    }
}

fn persist_all(
    store: &mut Store,
    world: &str,
    rooms: &Rooms,
    items: &Items,
    entities: &Entities,
) -> anyhow::Result<()> {
    for r in rooms.iter() {
        let origin = r.name.eq_ignore_ascii_case(rooms.origin());
        store.put(0, world, ObjectKind::Room, &r.name, &RoomRecord::from_room(r, origin))?;
    }
    for it in items.iter() {
        let rec = ItemRecord {
            id: it.id,
            name: it.name.clone(),
            description: it.description.clone(),
            price: it.price,
            location: it.location.clone(),
        };
        store.put(0, world, ObjectKind::Item, &it.id.to_string(), &rec)?;
    }
    for e in entities.npcs() {
        if let Some(rec) = EntityRecord::from_entity(e) {
            store.put(0, world, ObjectKind::Entity, &e.name, &rec)?;
        }
    }
    Ok(())
}
