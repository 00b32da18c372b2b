use tracing::{error, info, warn};
use worldbus::topic::{AiResponse, OutEvent};
use worldbus::user::UserId;

use crate::commands::{self, Command, Parsed, CUSTOM_VERB};
use crate::contract::{
    self, parse_custom_reply, CustomEffects, CustomVerdict, Scene, CUSTOM_SYSTEM,
    DESCRIBE_SYSTEM, TRANSLATE_SYSTEM,
};
use crate::entities::EntityRef;
use crate::items::{validate_item_name, ItemId, ItemLocation};
use crate::remote::{PendingKind, MAX_CUSTOM_ATTEMPTS};
use crate::rooms::Direction;

use super::{EventKind, World};

const RECENT_HISTORY: usize = 10;

impl World {
    fn scene_for(&self, user: &UserId) -> Option<Scene> {
        let me = self.entities.person(user)?;
        let room = self.rooms.get(&me.location)?;
        let describe = |loc: &ItemLocation| {
            self.items
                .at(loc)
                .iter()
                .map(|i| (i.name.clone(), i.description.clone()))
                .collect::<Vec<_>>()
        };
        let me_ref = EntityRef::Person(user.clone());
        let others = self
            .entities
            .others_in(&room.name, Some(&me_ref))
            .iter()
            .filter_map(|r| self.entities.get(r))
            .map(|e| (e.display_name(), e.description.clone()))
            .collect();
        Some(Scene {
            world: self.cfg.name.clone(),
            landscape: self.cfg.landscape.clone(),
            person: me.name.clone(),
            room: room.name.clone(),
            room_description: room.description.clone(),
            exits: self.rooms.render_exits(&room.name),
            items_here: describe(&ItemLocation::room(&room.name)),
            inventory: describe(&ItemLocation::entity(&me.name)),
            others,
            recent: me
                .as_person()
                .map(|p| {
                    p.recent_history(RECENT_HISTORY)
                        .into_iter()
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    fn submit(&mut self, user: &UserId, kind: PendingKind, prompt: String, system: &str) {
        let req = self
            .pending
            .submit(user, kind, prompt, system.to_string(), self.now_ms);
        info!(user = %user, request_id = %req.request_id, "ai request");
        self.schedule_in_ms(
            self.cfg.ai_timeout_ms,
            EventKind::RequestDeadline {
                request_id: req.request_id.clone(),
            },
        );
        self.publish(OutEvent::AiRequest(req));
    }

    pub(super) fn request_translation(&mut self, user: &UserId, input: &str) {
        let Some(scene) = self.scene_for(user) else {
            return;
        };
        let prompt = contract::translate_prompt(input, &scene, &commands::help_text());
        let kind = PendingKind::Translate {
            input: input.to_string(),
        };
        self.submit(user, kind, prompt, TRANSLATE_SYSTEM);
    }

    pub(super) fn request_custom(&mut self, user: &UserId, action: &str, attempt: u32) {
        let Some(scene) = self.scene_for(user) else {
            return;
        };
        let prompt = contract::custom_prompt(action, &scene);
        let kind = PendingKind::CustomAction {
            action: action.to_string(),
            attempt,
        };
        self.submit(user, kind, prompt, CUSTOM_SYSTEM);
    }

    pub(super) fn request_room_description(
        &mut self,
        user: &UserId,
        from_room: &str,
        direction: Direction,
        room_name: &str,
    ) {
        let from_description = self
            .rooms
            .get(from_room)
            .map(|r| r.description.clone())
            .unwrap_or_default();
        let prompt = contract::room_description_prompt(
            &self.cfg.name,
            self.cfg.landscape.as_deref(),
            room_name,
            from_room,
            &from_description,
        );
        let kind = PendingKind::RoomDescription {
            from_room: from_room.to_string(),
            direction,
            room_name: room_name.to_string(),
        };
        self.submit(user, kind, prompt, DESCRIBE_SYSTEM);
    }

    pub(super) fn on_ai_response(&mut self, resp: AiResponse) -> anyhow::Result<()> {
        let Some(pending) = self.pending.take(&resp.request_id) else {
            error!(request_id = %resp.request_id, "ai response for unknown request");
            return Ok(());
        };
        let user = pending.user_id.clone();
        if self.entities.person(&user).is_none() {
            info!(
                user = %user,
                request_id = %resp.request_id,
                "requester has left; dropping ai response"
            );
            return Ok(());
        }

        let text = resp.ai_response.trim();
        if text.is_empty() {
            warn!(user = %user, request_id = %resp.request_id, "ai backend gave up");
            self.reply_to(&user, "(ai)", "The world could not respond to that right now.");
            return Ok(());
        }

        let (request, reply) = match pending.kind {
            PendingKind::Translate { input } => {
                let reply = self.resume_translation(&user, &input, text)?;
                (input, reply)
            }
            PendingKind::CustomAction { action, attempt } => {
                let reply = match parse_custom_reply(text) {
                    CustomVerdict::Success(fx) => self.apply_custom(&user, fx)?,
                    CustomVerdict::Rejected(why) => why,
                    CustomVerdict::Unintelligible(why) => {
                        warn!(
                            user = %user,
                            action = %action,
                            reason = %why,
                            "unusable custom reply"
                        );
                        format!("The AI could not understand the command '{action}'.")
                    }
                    CustomVerdict::MissingVerdict if attempt < MAX_CUSTOM_ATTEMPTS => {
                        warn!(
                            user = %user,
                            action = %action,
                            attempt,
                            "custom reply without a verdict; retrying"
                        );
                        self.submit(
                            &user,
                            PendingKind::CustomAction {
                                action: action.clone(),
                                attempt: attempt + 1,
                            },
                            pending.prompt,
                            &pending.system_message,
                        );
                        String::new()
                    }
                    CustomVerdict::MissingVerdict => {
                        format!("The AI could not understand the command '{action}'.")
                    }
                };
                (action, reply)
            }
            PendingKind::RoomDescription {
                from_room,
                direction,
                room_name,
            } => {
                let reply = self.finish_build(&user, &from_room, direction, &room_name, text)?;
                (format!("build {direction} {room_name}"), reply)
            }
        };
        self.reply_to(&user, &request, &reply);
        Ok(())
    }

    /// Run the translated command. Anything that still does not parse, or the answer `custom`,
    /// becomes a custom action on the original input.
    fn resume_translation(
        &mut self,
        user: &UserId,
        input: &str,
        text: &str,
    ) -> anyhow::Result<String> {
        let line = text.lines().next().unwrap_or("");
        let translated = commands::strip_outer_quotes(line).trim();
        let as_custom = Command::Custom(input.to_string());

        if translated.is_empty() || translated.eq_ignore_ascii_case(CUSTOM_VERB) {
            return self.run_command(user, as_custom);
        }
        match commands::parse(translated) {
            Parsed::Run(Command::Custom(_)) | Parsed::Unknown => self.run_command(user, as_custom),
            Parsed::Run(cmd) => {
                info!(user = %user, input = %input, translated = %translated, "input translated");
                self.run_command(user, cmd)
            }
            Parsed::Reply(msg) => Ok(msg),
        }
    }

    /// Apply an accepted custom action: utterance, room description, entity descriptions, item
    /// descriptions, deletions, then new items.
    fn apply_custom(&mut self, user: &UserId, fx: CustomEffects) -> anyhow::Result<String> {
        let Some((name, room)) = self.whoami(user) else {
            return Ok(String::new());
        };
        let mut lines = vec![fx.response];

        if let Some(said) = fx.utterance {
            lines.push(self.do_say(user, &said, false));
        }

        if let Some(desc) = fx.updated_location {
            if let Some(r) = self.rooms.get_mut(&room) {
                r.description = desc;
            }
            self.save_room(&room)?;
        }

        for upd in fx.updated_entities {
            let Some(found) = self.entities.find(&upd.name, Some(&room), None) else {
                warn!(entity = %upd.name, "custom action updated an entity that is not here");
                continue;
            };
            if let Some(e) = self.entities.get_mut(&found) {
                e.description = upd.description.trim().to_string();
            }
            if let EntityRef::Npc(key) = &found {
                self.save_npc(key)?;
            }
        }

        let here = ItemLocation::room(&room);
        let mine = ItemLocation::entity(&name);
        let locate = |w: &World, token: &str| -> Option<ItemId> {
            w.items
                .find_at(&here, token)
                .or_else(|| w.items.find_at(&mine, token))
        };

        for upd in fx.updated_items {
            let Some(id) = locate(self, &upd.name) else {
                warn!(item = %upd.name, "custom action updated an item that is not here");
                continue;
            };
            if let Some(it) = self.items.get_mut(id) {
                it.description = upd.description.trim().to_string();
            }
            self.save_item(id)?;
        }

        for gone in fx.deleted_items {
            let Some(id) = locate(self, &gone) else {
                warn!(item = %gone, "custom action deleted an item that is not here");
                continue;
            };
            self.delete_item(id)?;
        }

        for new in fx.new_items {
            let item = match validate_item_name(&new.name) {
                Ok(n) => n.to_lowercase(),
                Err(msg) => {
                    warn!(item = %new.name, err = %msg, "custom action created an invalid item");
                    continue;
                }
            };
            let id = self
                .items
                .insert(&item, &new.description, 0, here.clone());
            self.save_item(id)?;
        }

        lines.retain(|l| !l.trim().is_empty());
        Ok(lines.join("\n"))
    }

    pub(super) fn expire_request(&mut self, request_id: &str) {
        let Some(p) = self.pending.take(request_id) else {
            return;
        };
        warn!(
            user = %p.user_id,
            request_id = %request_id,
            waited_ms = self.now_ms.saturating_sub(p.issued_ms),
            "ai request expired"
        );
        if self.entities.person(&p.user_id).is_some() {
            self.tell_person(
                &p.user_id,
                "The world took too long to respond. Please try again.",
            );
        }
    }
}
