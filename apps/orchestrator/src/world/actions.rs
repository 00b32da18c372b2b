use tracing::info;
use worldbus::topic::{ImageCreationRequest, OutEvent, SummonAgentRequest};
use worldbus::user::UserId;

use crate::commands::{self, Command, Verb};
use crate::entities::{AnimalState, Entity, EntityRef, SPAWNED_ACTION_CHANCE};
use crate::items::{
    article, currency, is_all, join_and, list_with_the, validate_item_name, validate_price,
    ItemId, ItemLocation,
};
use crate::rooms::{render_build_options, Direction};

use super::World;

const MONEY_WORDS: [&str; 6] = ["money", "penny", "pennies", "coin", "coins", "cash"];

/// How an entity changes room.
#[derive(Debug, Clone, PartialEq)]
pub enum Move {
    Dir(Direction),
    /// A direction word or the name of a neighbouring room.
    Toward(String),
    /// Straight to a room, no exit needed.
    Jump(String),
    /// Arrival on login; nobody is told.
    Join,
    /// Silent relocation, used when the first real room replaces the placeholder.
    Relocate(String),
}

enum Route {
    Walk(Direction),
    Jump,
    Join,
    Relocate,
}

fn ensure_period(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() || s.ends_with(['.', '!', '?']) {
        s.to_string()
    } else {
        format!("{s}.")
    }
}

fn strip_the(s: &str) -> &str {
    let s = s.trim();
    match s.get(..4) {
        Some(p) if p.eq_ignore_ascii_case("the ") => s[4..].trim_start(),
        _ => s,
    }
}

fn upper_first(s: &str) -> String {
    let mut cs = s.chars();
    match cs.next() {
        Some(c) => c.to_uppercase().chain(cs).collect(),
        None => String::new(),
    }
}

/// Byte offset of the ASCII `needle` in `s`, ignoring ASCII case. Always a char boundary.
fn find_ascii_ci(s: &str, needle: &str) -> Option<usize> {
    s.as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

fn is_money(token: &str) -> bool {
    let t = token.trim().to_lowercase();
    MONEY_WORDS.contains(&t.as_str())
}

impl World {
    /// Current name and room of a connected person.
    pub(super) fn whoami(&self, user: &UserId) -> Option<(String, String)> {
        self.entities
            .person(user)
            .map(|e| (e.name.clone(), e.location.clone()))
    }

    pub(super) fn run_command(&mut self, user: &UserId, cmd: Command) -> anyhow::Result<String> {
        match cmd {
            Command::Move(dir) => {
                self.move_entity(&EntityRef::Person(user.clone()), Move::Dir(dir))
            }
            Command::Build {
                direction,
                name,
                description,
            } => self.do_build(user, direction, &name, &description),
            Command::Create {
                name,
                description,
                price,
            } => self.do_create(user, &name, &description, price),
            Command::Spawn {
                name,
                description,
                actions,
            } => self.do_spawn(user, &name, &description, actions),
            Command::Custom(action) => {
                if !self.cfg.ai_enabled {
                    return Ok("Custom actions are not available in this world.".to_string());
                }
                self.request_custom(user, &action, 1);
                Ok(String::new())
            }
            Command::Simple { verb, arg } => match verb {
                Verb::Look => Ok(self.do_look(user, &arg)),
                Verb::Say => Ok(self.do_say(user, &arg, false)),
                Verb::Shout => Ok(self.do_say(user, &arg, true)),
                Verb::Greet => Ok(self.do_greet(user, &arg)),
                Verb::Wait => Ok("You wait. Time passes.".to_string()),
                Verb::Attack => Ok(
                    "This world does not condone violence! Perhaps you could talk it out instead?"
                        .to_string(),
                ),
                Verb::Trade => Ok(
                    "Trading between people is coming soon. \
                     For now you can buy from and sell to merchants."
                        .to_string(),
                ),
                Verb::Quit => {
                    self.remove_person(user, "You have left the world. Goodbye!")?;
                    Ok(String::new())
                }
                Verb::Jump => self.do_jump(user, &arg),
                Verb::Go => self.do_go(user, &arg),
                Verb::Get => self.do_get(user, &arg),
                Verb::Drop => Ok(self
                    .drop_items(user, &arg)?
                    .unwrap_or_else(|| "You are not carrying anything.".to_string())),
                Verb::Buy => self.do_buy(user, &arg),
                Verb::Sell => self.do_sell(user, &arg),
                Verb::Inventory => Ok(self.do_inventory(user)),
                Verb::Help => Ok(self.do_help(user)),
                Verb::Summon => Ok(self.do_summon(user, &arg)),
                Verb::Build | Verb::Create | Verb::Spawn => Ok(commands::unrecognised_reply()),
            },
        }
    }

    // ---- movement ----

    /// Move an entity and tell onlookers. For a person the returned text describes the arrival;
    /// an unknown direction or room leaves everything as it was and explains why.
    pub(super) fn move_entity(&mut self, who: &EntityRef, how: Move) -> anyhow::Result<String> {
        let Some(from) = self.entities.get(who).map(|e| e.location.clone()) else {
            return Ok(String::new());
        };

        let (to, route) = match how {
            Move::Join => (from.clone(), Route::Join),
            Move::Relocate(room) => (room, Route::Relocate),
            Move::Jump(room) => (room, Route::Jump),
            Move::Dir(dir) => match self.rooms.next_room(&from, dir) {
                Some(next) => (next.to_string(), Route::Walk(dir)),
                None => {
                    return Ok(format!(
                        "You can't go {dir}. {} {}",
                        self.rooms.render_exits(&from),
                        render_build_options(&self.rooms.build_options(&from))
                    ));
                }
            },
            Move::Toward(token) => {
                let dir = Direction::parse(commands::synonym(&token.trim().to_lowercase()))
                    .or_else(|| self.rooms.exit_by_room_name(&from, strip_the(&token)));
                match dir {
                    Some(d) => return self.move_entity(who, Move::Dir(d)),
                    None => {
                        return Ok(format!(
                            "{} is not a valid direction or room name. {}",
                            token.trim(),
                            self.rooms.render_exits(&from)
                        ));
                    }
                }
            }
        };
        let Some(to) = self.rooms.get(&to).map(|r| r.name.clone()) else {
            anyhow::bail!("move to unknown room {to}");
        };

        let Some(mover) = self.entities.get(who).cloned() else {
            return Ok(String::new());
        };
        let mover_user = mover.user_id().cloned();

        let leaving = match &route {
            Route::Walk(d) => Some(format!(
                "{} leaves, heading {d} to the {}.",
                mover.definite(),
                to.to_lowercase()
            )),
            Route::Jump => Some(format!("{} has disappeared in a puff of smoke!", mover.name)),
            Route::Join | Route::Relocate => None,
        };
        if let Some(msg) = leaving {
            self.tell_others(mover_user.as_ref(), &from, &msg, false);
        }

        if let Some(e) = self.entities.get_mut(who) {
            e.location = to.clone();
        }

        let arriving = match &route {
            Route::Walk(_) => Some(format!(
                "{} arrives from the {}.",
                mover.indefinite(),
                from.to_lowercase()
            )),
            Route::Jump => Some(format!("{} has materialised as if by magic!", mover.name)),
            Route::Join | Route::Relocate => None,
        };
        if let Some(msg) = arriving {
            self.tell_others(mover_user.as_ref(), &to, &msg, false);
        }

        let Some(user) = mover_user else {
            if let EntityRef::Npc(key) = who {
                self.save_npc(key)?;
            }
            return Ok(String::new());
        };

        let first_visit = self
            .entities
            .person_mut(&user)
            .and_then(Entity::as_person_mut)
            .is_some_and(|p| p.visit(&to));
        let lead = match route {
            Route::Walk(d) => format!("You head {d} to the {}", to.to_lowercase()),
            Route::Jump => format!("You jump to the {}", to.to_lowercase()),
            Route::Join => format!("You start in the {}", to.to_lowercase()),
            Route::Relocate => format!("You find yourself in the {}", to.to_lowercase()),
        };
        let mut reply = if first_visit {
            format!("{lead}: {}", self.room_text(&to, true))
        } else {
            format!("{lead}. {}", self.room_text(&to, false))
        };
        if let Some(others) = self.others_here_text(&to, &user) {
            reply.push('\n');
            reply.push_str(&others);
        }
        self.room_update_for(&user, &to);
        Ok(reply)
    }

    /// Description of a room: the full text on a first visit or `look`, otherwise exits and
    /// contents only.
    pub(super) fn room_text(&self, room: &str, full: bool) -> String {
        let mut parts = Vec::new();
        if full {
            if let Some(r) = self.rooms.get(room) {
                parts.push(ensure_period(&r.description));
            }
        }
        parts.push(self.rooms.render_exits(room));
        parts.push(render_build_options(&self.rooms.build_options(room)));
        if let Some(items) = self.items_here_text(room) {
            parts.push(items);
        }
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }

    fn items_here_text(&self, room: &str) -> Option<String> {
        let xs = self
            .items
            .at(&ItemLocation::room(room))
            .iter()
            .map(|i| format!("{} {}", article(&i.name), i.name))
            .collect::<Vec<_>>();
        if xs.is_empty() {
            return None;
        }
        Some(format!("You can see {} here.", join_and(&xs)))
    }

    fn others_here_text(&self, room: &str, viewer: &UserId) -> Option<String> {
        let me = EntityRef::Person(viewer.clone());
        let lines = self
            .entities
            .others_in(room, Some(&me))
            .iter()
            .filter_map(|r| self.entities.get(r))
            .map(|e| {
                let name = upper_first(&e.display_name());
                if !e.is_merchant() {
                    return format!("{name} is here.");
                }
                let wares = self
                    .items
                    .at(&ItemLocation::entity(&e.name))
                    .iter()
                    .map(|i| format!("{} {} ({})", article(&i.name), i.name, currency(i.price)))
                    .collect::<Vec<_>>();
                if wares.is_empty() {
                    format!("{name} is here.")
                } else {
                    format!("{name} is here, selling {}.", join_and(&wares))
                }
            })
            .collect::<Vec<_>>();
        if lines.is_empty() {
            return None;
        }
        Some(lines.join("\n"))
    }

    fn do_go(&mut self, user: &UserId, arg: &str) -> anyhow::Result<String> {
        let target = arg.trim();
        let target = target.strip_prefix("to ").unwrap_or(target);
        if target.is_empty() {
            let Some((_, room)) = self.whoami(user) else {
                return Ok(String::new());
            };
            return Ok(format!("Go where? {}", self.rooms.render_exits(&room)));
        }
        self.move_entity(&EntityRef::Person(user.clone()), Move::Toward(target.to_string()))
    }

    fn do_jump(&mut self, user: &UserId, arg: &str) -> anyhow::Result<String> {
        let target = arg.trim();
        let target = target.strip_prefix("to ").unwrap_or(target).trim();
        if target.is_empty() {
            return Ok("Jump to whom?".to_string());
        }
        let Some((_, room)) = self.whoami(user) else {
            return Ok(String::new());
        };
        let me = EntityRef::Person(user.clone());
        let Some(found) = self.entities.find(strip_the(target), None, Some(&me)) else {
            return Ok(format!("'{target}' is not a valid person name."));
        };
        let Some((name, there)) = self
            .entities
            .get(&found)
            .map(|e| (e.display_name(), e.location.clone()))
        else {
            return Ok(String::new());
        };
        if there.eq_ignore_ascii_case(&room) {
            return Ok(format!("You are already with {name}."));
        }
        self.move_entity(&me, Move::Jump(there))
    }

    // ---- talking ----

    fn do_look(&self, user: &UserId, arg: &str) -> String {
        let Some((name, room)) = self.whoami(user) else {
            return String::new();
        };
        let raw = arg.trim();
        if raw.eq_ignore_ascii_case("at") {
            return "Look at what?".to_string();
        }
        let t = match raw.get(..3) {
            Some(p) if p.eq_ignore_ascii_case("at ") => raw[3..].trim(),
            _ => raw,
        };
        let t = strip_the(t);

        if t.is_empty() || t.eq_ignore_ascii_case("around") || t.eq_ignore_ascii_case(&room) {
            let mut s = format!(
                "You look again at the {}: {}",
                room.to_lowercase(),
                self.room_text(&room, true)
            );
            if let Some(others) = self.others_here_text(&room, user) {
                s.push('\n');
                s.push_str(&others);
            }
            return s;
        }

        let here = ItemLocation::room(&room);
        let mine = ItemLocation::entity(&name);
        if let Some(id) = self
            .items
            .find_at(&here, t)
            .or_else(|| self.items.find_at(&mine, t))
        {
            if let Some(it) = self.items.get(id) {
                return format!("You look at the {}: {}", it.name, ensure_period(&it.description));
            }
        }
        if let Some(m) = self.entities.merchant_in(&room) {
            let stock = ItemLocation::entity(&m.name);
            if let Some(it) = self.items.find_at(&stock, t).and_then(|id| self.items.get(id)) {
                return format!(
                    "You look at the {}: {} {} sells it for {}.",
                    it.name,
                    ensure_period(&it.description),
                    m.name,
                    currency(it.price)
                );
            }
        }
        let me = EntityRef::Person(user.clone());
        if let Some(e) = self
            .entities
            .find(t, Some(&room), Some(&me))
            .and_then(|r| self.entities.get(&r))
        {
            if e.description.is_empty() {
                return format!("You see {}.", e.display_name());
            }
            return format!("You look at {}: {}", e.display_name(), ensure_period(&e.description));
        }
        format!(
            "There is no '{t}' here. \
             You can look around (just say look) or look at a specific item."
        )
    }

    pub(super) fn do_say(&mut self, user: &UserId, text: &str, shout: bool) -> String {
        let Some((name, room)) = self.whoami(user) else {
            return String::new();
        };
        let text = commands::strip_outer_quotes(text).trim().to_string();
        if text.is_empty() {
            return if shout { "Shout what?" } else { "Say what?" }.to_string();
        }
        let lower = text.to_lowercase();
        if lower.starts_with("to ") || lower.starts_with("only ") {
            return "Sorry, you can't speak to one person privately. \
                    Everyone nearby hears what you say."
                .to_string();
        }
        let (verb, verbs) = if shout { ("shout", "shouts") } else { ("say", "says") };
        let heard =
            self.tell_others(Some(user), &room, &format!("{name} {verbs}, \"{text}\""), shout);
        if heard == 0 {
            format!("You mutter to yourself, '{text}'.")
        } else {
            format!("You {verb}, '{text}'.")
        }
    }

    fn do_greet(&mut self, user: &UserId, arg: &str) -> String {
        let target = commands::strip_outer_quotes(arg).trim();
        if target.is_empty() {
            return self.do_say(user, "Hello everyone!", false);
        }
        self.do_say(user, &format!("Hello {target}!"), false)
    }

    fn do_help(&self, user: &UserId) -> String {
        format!(
            "Welcome to {}. Explore, build new locations, create items and trade with \
             merchants. {}\n\n{}",
            self.cfg.name,
            self.people_text(user),
            commands::help_text()
        )
    }

    fn do_summon(&mut self, user: &UserId, arg: &str) -> String {
        let who = commands::strip_outer_quotes(arg).trim().to_string();
        if who.is_empty() {
            return "Summon whom? Describe who you would like to join the world.".to_string();
        }
        self.summon_seq = self.summon_seq.saturating_add(1);
        let request_id = format!("{user}-{}-{}", self.now_ms, self.summon_seq);
        self.summons.insert(request_id.clone(), user.clone());
        self.publish(OutEvent::SummonAgentRequest(SummonAgentRequest {
            request_id,
            request_data: who,
        }));
        "Your summons has been sent. Someone may arrive shortly.".to_string()
    }

    // ---- items ----

    fn do_get(&mut self, user: &UserId, arg: &str) -> anyhow::Result<String> {
        let Some((name, room)) = self.whoami(user) else {
            return Ok(String::new());
        };
        let mut token = arg.trim();
        if token.eq_ignore_ascii_case("up") {
            token = "";
        } else if let Some(rest) = token.get(..3).filter(|p| p.eq_ignore_ascii_case("up ")) {
            token = token[rest.len()..].trim();
        }
        if let Some(idx) = find_ascii_ci(token, " from ") {
            token = token[..idx].trim();
        }
        let token = strip_the(token).to_string();
        if token.is_empty() {
            return Ok(
                "Get what? You can pick up an item by name, or everything here with 'get all'."
                    .to_string(),
            );
        }

        let me = EntityRef::Person(user.clone());
        if !is_all(&token) {
            if let Some(e) = self
                .entities
                .find(&token, Some(&room), Some(&me))
                .and_then(|r| self.entities.get(&r))
            {
                return Ok(format!(
                    "I would advise against picking up {}, they will not react well!",
                    e.display_name()
                ));
            }
        }

        let here = ItemLocation::room(&room);
        let mine = ItemLocation::entity(&name);
        let mut lines = Vec::new();
        let mut picked = Vec::new();
        while let Some(id) = self.items.find_at(&here, &token) {
            let held = self.items.count_at(&mine);
            let Some(person) = self.entities.person(user) else {
                break;
            };
            if let Err(msg) = person.can_receive(held) {
                lines.push(msg);
                break;
            }
            self.items.move_to(id, mine.clone());
            self.save_item(id)?;
            if let Some(it) = self.items.get(id) {
                lines.push(format!("You pick up the {}.", it.name));
                picked.push(it.name.clone());
            }
            if !is_all(&token) {
                break;
            }
        }

        if lines.is_empty() {
            if is_all(&token) {
                return Ok("There is nothing here that you can pick up.".to_string());
            }
            let sold_here = self.entities.merchant_in(&room).is_some_and(|m| {
                self.items
                    .find_at(&ItemLocation::entity(&m.name), &token)
                    .is_some()
            });
            if sold_here {
                return Ok(format!(
                    "The {token} is in the possession of a merchant. Perhaps you can purchase it?"
                ));
            }
            return Ok(format!("There is no {token} to be found here."));
        }
        if !picked.is_empty() {
            let msg = format!("{name} picks up {}.", list_with_the(&picked));
            self.tell_others(Some(user), &room, &msg, false);
        }
        Ok(lines.join("\n"))
    }

    /// Drop carried items matching `arg` ("all" for everything). `None` when the person carries
    /// nothing at all.
    pub(super) fn drop_items(
        &mut self,
        user: &UserId,
        arg: &str,
    ) -> anyhow::Result<Option<String>> {
        let Some((name, room)) = self.whoami(user) else {
            return Ok(None);
        };
        let token = strip_the(arg).to_string();
        if token.is_empty() {
            return Ok(Some(
                "Drop what? You can drop an item by name, or everything with 'drop all'."
                    .to_string(),
            ));
        }
        if is_money(&token) {
            return Ok(Some("You can't drop your money, you might need it!".to_string()));
        }

        let mine = ItemLocation::entity(&name);
        if self.items.count_at(&mine) == 0 {
            return Ok(None);
        }
        let ids: Vec<ItemId> = if is_all(&token) {
            self.items.at(&mine).iter().map(|i| i.id).collect()
        } else {
            self.items.find_at(&mine, &token).into_iter().collect()
        };
        if ids.is_empty() {
            return Ok(Some(format!("You are not carrying '{token}'.")));
        }

        let here = ItemLocation::room(&room);
        let mut names = Vec::new();
        for id in ids {
            self.items.move_to(id, here.clone());
            self.save_item(id)?;
            if let Some(it) = self.items.get(id) {
                names.push(it.name.clone());
            }
        }
        let listed = list_with_the(&names);
        self.tell_others(Some(user), &room, &format!("{name} has dropped {listed}."), false);
        Ok(Some(format!("You drop {listed}.")))
    }

    fn do_inventory(&self, user: &UserId) -> String {
        let Some(e) = self.entities.person(user) else {
            return String::new();
        };
        let money = e.as_person().map(|p| p.money).unwrap_or(0);
        let xs = self
            .items
            .at(&ItemLocation::entity(&e.name))
            .iter()
            .map(|i| format!("{} {}", article(&i.name), i.name))
            .collect::<Vec<_>>();
        let carrying = if xs.is_empty() {
            "You are not carrying anything.".to_string()
        } else {
            format!("You are carrying {}.", join_and(&xs))
        };
        format!("{carrying} You have {}.", currency(money))
    }

    fn do_buy(&mut self, user: &UserId, arg: &str) -> anyhow::Result<String> {
        let Some((name, room)) = self.whoami(user) else {
            return Ok(String::new());
        };
        let token = strip_the(arg).to_string();
        if token.is_empty() {
            return Ok("Buy what?".to_string());
        }
        if self.items.find_at(&ItemLocation::room(&room), &token).is_some() {
            return Ok("You don't have to buy that, you can just pick it up!".to_string());
        }
        let me = EntityRef::Person(user.clone());
        if let Some(e) = self
            .entities
            .find(&token, Some(&room), Some(&me))
            .and_then(|r| self.entities.get(&r))
        {
            if !e.is_merchant() {
                return Ok(format!("{} is not for sale!", e.definite()));
            }
        }
        let Some(merchant) = self.entities.merchant_in(&room).map(|m| m.name.clone()) else {
            return Ok("There is no merchant here to trade with.".to_string());
        };
        let stock = ItemLocation::entity(&merchant);
        let Some(id) = self.items.find_at(&stock, &token) else {
            return Ok(format!("{merchant} does not have any {token} for sale."));
        };
        let Some((item, price)) = self.items.get(id).map(|i| (i.name.clone(), i.price)) else {
            return Ok(String::new());
        };

        let mine = ItemLocation::entity(&name);
        let held = self.items.count_at(&mine);
        let Some(person) = self.entities.person_mut(user) else {
            return Ok(String::new());
        };
        if let Err(msg) = person.can_receive(held) {
            return Ok(msg);
        }
        let Some(p) = person.as_person_mut() else {
            return Ok(String::new());
        };
        if p.money < price {
            return Ok(format!(
                "You do not have enough money to buy the {item}. It costs {} and you have {}.",
                currency(price),
                currency(p.money)
            ));
        }
        p.money -= price;
        self.items.move_to(id, mine);
        self.save_item(id)?;
        self.tell_others(
            Some(user),
            &room,
            &format!("{name} has bought the {item} from {merchant}."),
            false,
        );
        info!(person = %name, item = %item, price, "purchase");
        Ok(format!(
            "Congratulations, you successfully purchased the {item} for {}.",
            currency(price)
        ))
    }

    fn do_sell(&mut self, user: &UserId, arg: &str) -> anyhow::Result<String> {
        let Some((name, room)) = self.whoami(user) else {
            return Ok(String::new());
        };
        let token = strip_the(arg).to_string();
        if token.is_empty() {
            return Ok("Sell what?".to_string());
        }
        if is_money(&token) {
            return Ok("You can't sell money!".to_string());
        }
        let Some(merchant) = self.entities.merchant_in(&room).cloned() else {
            return Ok("There is no merchant here to trade with.".to_string());
        };
        let mine = ItemLocation::entity(&name);
        let ids: Vec<ItemId> = if is_all(&token) {
            self.items.at(&mine).iter().map(|i| i.id).collect()
        } else {
            self.items.find_at(&mine, &token).into_iter().collect()
        };
        if ids.is_empty() {
            return Ok(if is_all(&token) {
                "You are not carrying anything.".to_string()
            } else {
                format!("You are not carrying '{token}'.")
            });
        }

        let stock = ItemLocation::entity(&merchant.name);
        let mut lines = Vec::new();
        let mut sold = Vec::new();
        for id in ids {
            let Some((item, price)) = self.items.get(id).map(|i| (i.name.clone(), i.price)) else {
                continue;
            };
            if price == 0 {
                lines.push(format!(
                    "You can't sell the {item} - it is valueless (or priceless!)."
                ));
                continue;
            }
            if let Err(msg) = merchant.can_receive(self.items.count_at(&stock)) {
                lines.push(msg);
                break;
            }
            self.items.move_to(id, stock.clone());
            self.save_item(id)?;
            if let Some(p) = self
                .entities
                .person_mut(user)
                .and_then(Entity::as_person_mut)
            {
                p.money = p.money.saturating_add(price);
            }
            lines.push(format!(
                "You sell the {item} to {} for {}.",
                merchant.display_name(),
                currency(price)
            ));
            sold.push(item);
        }
        if !sold.is_empty() {
            let msg = format!("{name} has sold {} to {}.", list_with_the(&sold), merchant.name);
            self.tell_others(Some(user), &room, &msg, false);
        }
        Ok(lines.join("\n"))
    }

    fn do_create(
        &mut self,
        user: &UserId,
        name: &str,
        description: &str,
        price: u32,
    ) -> anyhow::Result<String> {
        let Some((me, room)) = self.whoami(user) else {
            return Ok(String::new());
        };
        let name = match validate_item_name(name) {
            Ok(n) => n.to_lowercase(),
            Err(msg) => return Ok(msg),
        };
        let price = match validate_price(price) {
            Ok(p) => p,
            Err(msg) => return Ok(msg),
        };
        let description = ensure_period(description);
        if description.is_empty() {
            return Ok("Invalid input: item description is empty.".to_string());
        }
        if self
            .items
            .find_exact_at(&ItemLocation::room(&room), &name)
            .is_some()
        {
            return Ok(format!("There is already {} {name} here.", article(&name)));
        }
        if self.entities.name_in_use(&name) {
            return Ok(format!("{name} is already the name of someone in this world."));
        }

        let id = self
            .items
            .insert(&name, &description, price, ItemLocation::room(&room));
        self.save_item(id)?;
        let a = article(&name);
        self.tell_others(Some(user), &room, &format!("{me} has created {a} {name}."), false);
        let mut reply =
            format!("You create {a} {name} with the following description: {description}");
        if price > 0 {
            reply.push_str(&format!(" It is worth {}.", currency(price)));
        }
        Ok(reply)
    }

    fn do_spawn(
        &mut self,
        user: &UserId,
        name: &str,
        description: &str,
        actions: Vec<String>,
    ) -> anyhow::Result<String> {
        let Some((me, room)) = self.whoami(user) else {
            return Ok(String::new());
        };
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return Ok("Invalid input: animal name is empty.".to_string());
        }
        if !name.chars().all(|c| c.is_alphabetic() || c == ' ') {
            return Ok(
                "Invalid input: animal name must contain only letters and spaces.".to_string(),
            );
        }
        if commands::is_reserved_word(&name) {
            return Ok(format!("'{name}' is a reserved word."));
        }
        let description = ensure_period(description);
        if description.is_empty() {
            return Ok("Invalid input: animal description is empty.".to_string());
        }
        if actions.is_empty() {
            return Ok("Please give the animal at least one action.".to_string());
        }
        if self
            .items
            .find_exact_at(&ItemLocation::room(&room), &name)
            .is_some()
        {
            return Ok(format!("{name} is already the name of an item here."));
        }

        let animal = Entity::animal(
            &name,
            &description,
            &room,
            AnimalState {
                actions,
                action_chance: SPAWNED_ACTION_CHANCE,
                move_chance: 0.0,
            },
        );
        if let Err(msg) = self.entities.add_npc(animal) {
            return Ok(msg);
        }
        self.save_npc(&name)?;
        let a = article(&name);
        self.tell_others(Some(user), &room, &format!("{me} has spawned {a} {name}."), false);
        info!(by = %me, animal = %name, room = %room, "animal spawned");
        Ok(format!("You spawn {a} {name}: {description}"))
    }

    // ---- building ----

    fn do_build(
        &mut self,
        user: &UserId,
        direction: Direction,
        name: &str,
        description: &str,
    ) -> anyhow::Result<String> {
        let Some((_, room)) = self.whoami(user) else {
            return Ok(String::new());
        };
        if let Err(e) = self.rooms.check_build(&room, direction, name) {
            return Ok(e.to_string());
        }
        if description.trim().is_empty() {
            if self.cfg.ai_enabled {
                self.request_room_description(user, &room, direction, name);
                return Ok(format!(
                    "The {} is taking shape; its description will follow shortly.",
                    name.to_lowercase()
                ));
            }
            return self.finish_build(
                user,
                &room,
                direction,
                name,
                &format!("A newly built location called {name}."),
            );
        }
        self.finish_build(user, &room, direction, name, description)
    }

    /// Add the room and announce it. The checks run again because the world may have changed
    /// while a description was being written.
    pub(super) fn finish_build(
        &mut self,
        user: &UserId,
        from: &str,
        direction: Direction,
        name: &str,
        description: &str,
    ) -> anyhow::Result<String> {
        let Some((builder, _)) = self.whoami(user) else {
            return Ok(String::new());
        };
        if let Err(e) = self.rooms.check_build(from, direction, name) {
            return Ok(e.to_string());
        }
        let description = ensure_period(description);
        let Some(from) = self.rooms.get(from).map(|r| r.name.clone()) else {
            return Ok(String::new());
        };
        let was_empty = self.rooms.is_empty_world();

        self.rooms
            .add_room(&from, direction, name, &description, Some(&builder))?;
        if was_empty {
            self.retire_placeholder(&from, name)?;
        } else {
            self.save_room(&from)?;
        }
        self.save_room(name)?;

        self.publish(OutEvent::ImageCreationRequest(ImageCreationRequest {
            world_name: self.cfg.name.clone(),
            room_name: name.to_string(),
            description: description.clone(),
            landscape: self.cfg.landscape.clone(),
        }));
        let news = format!(
            "{builder} has built to the {direction} of the {} and made a new location, {name}.",
            from.to_lowercase()
        );
        self.tell_others(Some(user), &from, &news, true);
        info!(builder = %builder, room = %name, from = %from, dir = %direction, "room built");

        let mut reply =
            format!("You build {direction} and make a new location, {name}: {description}");
        if was_empty {
            reply.push_str(" It is the first location in this world, so everyone moves there.");
            for id in self.entities.people_in(&from) {
                let arrival = self.move_entity(
                    &EntityRef::Person(id.clone()),
                    Move::Relocate(name.to_string()),
                )?;
                if &id == user {
                    reply.push('\n');
                    reply.push_str(&arrival);
                } else {
                    self.tell_person(&id, &arrival);
                }
            }
        }
        Ok(reply)
    }

    /// The first real room replaces the placeholder: everything standing in it moves over.
    fn retire_placeholder(&mut self, placeholder: &str, origin: &str) -> anyhow::Result<()> {
        let from = ItemLocation::room(placeholder);
        let to = ItemLocation::room(origin);
        let strays = self.items.at(&from).iter().map(|i| i.id).collect::<Vec<_>>();
        for id in strays {
            self.items.move_to(id, to.clone());
            self.save_item(id)?;
        }
        for key in self.entities.npcs().map(Entity::key).collect::<Vec<_>>() {
            if let Some(e) = self.entities.npc_mut(&key) {
                if e.location.eq_ignore_ascii_case(placeholder) {
                    e.location = origin.to_string();
                }
            }
            self.save_npc(&key)?;
        }

        self.rooms.retire_placeholder(origin)?;
        Ok(())
    }
}
