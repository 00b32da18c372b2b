use worldbus::topic::{
    AiRequest, AiResponse, ImageCreationResponse, Inbound, OutEvent, Outbound, SetUserName,
    SummonAgentResponse, UserAction, UserDisconnect,
};
use worldbus::user::UserId;

use super::*;
use crate::bootstrap::parse_seed;
use crate::contract::{CUSTOM_SYSTEM, TRANSLATE_SYSTEM};
use crate::rooms::Direction;

fn quiet() -> WorldConfig {
    WorldConfig {
        animals_active: false,
        ..WorldConfig::default()
    }
}

fn seeded(cfg: WorldConfig) -> World {
    let seed = parse_seed(include_str!("../../world/corvid.yaml"), "corvid.yaml").unwrap();
    World::new(cfg, Store::in_memory(), Transcripts::new(None), Some(seed)).unwrap()
}

fn empty(cfg: WorldConfig) -> World {
    World::new(cfg, Store::in_memory(), Transcripts::new(None), None).unwrap()
}

fn uid(s: &str) -> UserId {
    UserId::from(s)
}

fn join(w: &mut World, id: &str, name: &str) -> Vec<Outbound> {
    w.handle_inbound(Inbound::SetUserName(SetUserName {
        user_id: uid(id),
        name: name.to_string(),
        role: None,
    }))
    .unwrap();
    w.take_outbox()
}

fn texts(out: &[Outbound], id: &str) -> Vec<String> {
    out.iter()
        .filter(|o| o.to.as_ref().map(UserId::as_str) == Some(id))
        .filter_map(|o| match &o.event {
            OutEvent::WorldUpdate(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

fn act_raw(w: &mut World, id: &str, input: &str) -> Vec<Outbound> {
    w.handle_inbound(Inbound::UserAction(UserAction {
        user_id: uid(id),
        user_input: input.to_string(),
    }))
    .unwrap();
    w.take_outbox()
}

/// The reply to an action, without the "You: ..." echo.
fn act(w: &mut World, id: &str, input: &str) -> String {
    let out = act_raw(w, id, input);
    texts(&out, id)
        .into_iter()
        .filter(|t| !t.starts_with("You: "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn ai_requests(out: &[Outbound]) -> Vec<AiRequest> {
    out.iter()
        .filter_map(|o| match &o.event {
            OutEvent::AiRequest(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

fn answer(w: &mut World, request_id: &str, text: &str) -> Vec<Outbound> {
    w.handle_inbound(Inbound::AiResponse(AiResponse {
        request_id: request_id.to_string(),
        ai_response: text.to_string(),
    }))
    .unwrap();
    w.take_outbox()
}

#[test]
fn join_welcomes_and_announces() {
    let mut w = seeded(quiet());
    let out = join(&mut w, "u1", "alice");

    let welcome = out
        .iter()
        .find_map(|o| match &o.event {
            OutEvent::Instructions(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap();
    assert!(
        welcome.starts_with("Welcome to corvid, Alice. You are the only person in this world.")
    );
    let arrival = texts(&out, "u1").join("\n");
    assert!(
        arrival.starts_with("You start in the road: A muddy road winds between dry-stone walls.")
    );
    assert!(arrival.contains("Available exits: north (Orchard), east (Market)."));
    assert!(arrival.contains("Available directions in which you can build: south, west."));
    assert!(arrival.contains("A crow is here."));
    assert!(out.iter().any(|o| matches!(
        &o.event,
        OutEvent::RoomUpdate(r) if r.title == "Road" && r.exits == vec!["north", "east"]
    )));
    assert!(out.iter().any(|o| o.to.is_none()
        && matches!(&o.event, OutEvent::WorldDataUpdate(d) if d.user_count == 1)));

    let out = join(&mut w, "u2", "Bob");
    assert_eq!(
        texts(&out, "u1"),
        vec!["Bob has joined, starting in the road; there are now 2 people."]
    );
    assert_eq!(w.people_count(), 2);
}

#[test]
fn names_must_be_valid_and_unique() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");

    let invalid = |out: Vec<Outbound>| {
        out.into_iter()
            .find_map(|o| match o.event {
                OutEvent::NameInvalid(s) => Some(s),
                _ => None,
            })
            .unwrap()
    };
    assert_eq!(
        invalid(join(&mut w, "u2", "ALICE")),
        "The name Alice is already in use."
    );
    assert_eq!(invalid(join(&mut w, "u2", "crow")), "The name Crow is already in use.");
    assert!(invalid(join(&mut w, "u2", "b0b")).contains("not valid"));
    assert_eq!(w.people_count(), 1);
}

#[test]
fn walking_describes_first_visits_in_full() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");

    let r = act(&mut w, "u1", "n");
    assert!(r.starts_with("You head north to the orchard: Crooked apple trees"));
    assert!(r.contains("You can see an apple here."));

    let r = act(&mut w, "u1", "south");
    assert!(r.starts_with("You head south to the road. Available exits"));
    assert!(!r.contains("muddy"));

    assert!(act(&mut w, "u1", "w")
        .starts_with("You can't go west. Available exits: north (Orchard), east (Market)."));
    assert!(act(&mut w, "u1", "go market").starts_with("You head east to the market"));
    assert!(act(&mut w, "u1", "go nowhere")
        .starts_with("nowhere is not a valid direction or room name."));
}

#[test]
fn every_action_is_echoed() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    let out = act_raw(&mut w, "u1", "wait");
    assert_eq!(texts(&out, "u1"), vec!["You: wait", "You wait. Time passes."]);
}

#[test]
fn onlookers_see_departures_and_arrivals() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    join(&mut w, "u2", "Bob");
    act(&mut w, "u2", "e");

    let out = act_raw(&mut w, "u1", "e");
    assert_eq!(texts(&out, "u2"), vec!["Alice arrives from the road."]);

    let out = act_raw(&mut w, "u1", "w");
    assert_eq!(texts(&out, "u2"), vec!["Alice leaves, heading west to the road."]);

    let out = act_raw(&mut w, "u1", "jump bob");
    assert!(texts(&out, "u1").iter().any(|t| t.starts_with("You jump to the market")));
    assert_eq!(texts(&out, "u2"), vec!["Alice has materialised as if by magic!"]);
    assert_eq!(act(&mut w, "u1", "jump bob"), "You are already with Bob.");
    assert_eq!(act(&mut w, "u1", "jump zed"), "'zed' is not a valid person name.");
}

#[test]
fn get_and_drop_move_items_between_room_and_inventory() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    act(&mut w, "u1", "n");

    assert_eq!(act(&mut w, "u1", "pick up the apple"), "You pick up the apple.");
    assert_eq!(
        act(&mut w, "u1", "inventory"),
        "You are carrying an apple. You have 100 pennies."
    );
    assert_eq!(
        act(&mut w, "u1", "get all"),
        "There is nothing here that you can pick up."
    );
    assert_eq!(act(&mut w, "u1", "get pear"), "There is no pear to be found here.");
    assert_eq!(
        act(&mut w, "u1", "drop money"),
        "You can't drop your money, you might need it!"
    );
    assert_eq!(act(&mut w, "u1", "drop all"), "You drop the apple.");
    assert_eq!(act(&mut w, "u1", "drop all"), "You are not carrying anything.");
    assert_eq!(
        w.items.count_at(&ItemLocation::room("Orchard")),
        1
    );
}

#[test]
fn get_from_ignores_case_and_accepts_any_script() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");

    assert_eq!(
        act(&mut w, "u1", "get İİİİİİİ from ééé"),
        "There is no İİİİİİİ to be found here."
    );
    assert_eq!(
        act(&mut w, "u1", "get Ünïcödé FROM the wall"),
        "There is no Ünïcödé to be found here."
    );
    act(&mut w, "u1", "n");
    assert_eq!(act(&mut w, "u1", "get apple FROM the tree"), "You pick up the apple.");
}

#[test]
fn inventory_capacity_stops_get_all() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    for name in ["cup", "bowl", "spoon", "fork", "knife", "plate"] {
        let r = act(&mut w, "u1", &format!("create \"{name}\" \"A plain {name}.\""));
        assert!(r.starts_with("You create a"), "{r}");
    }

    let r = act(&mut w, "u1", "get all");
    assert_eq!(r.matches("You pick up the").count(), 5);
    assert!(r.ends_with("You can't carry any more items."));
    assert_eq!(w.items.count_at(&ItemLocation::entity("Alice")), 5);
    assert_eq!(act(&mut w, "u1", "get plate"), "You can't carry any more items.");
    assert_eq!(w.items.count_at(&ItemLocation::room("Road")), 1);
}

#[test]
fn create_validates_its_input() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    assert_eq!(
        act(&mut w, "u1", "create \"gold coin\" \"Shiny.\" 7"),
        "You create a gold coin with the following description: Shiny. It is worth 7 pennies."
    );
    assert_eq!(
        act(&mut w, "u1", "create \"gold coin\" \"Another.\""),
        "There is already a gold coin here."
    );
    assert_eq!(
        act(&mut w, "u1", "create \"cup\" \"A cup.\" 5000"),
        "Invalid input: price must be no more than 1000."
    );
    assert_eq!(
        act(&mut w, "u1", "create \"cup9\" \"A cup.\""),
        "Invalid input: item name must contain only letters and spaces."
    );
    assert_eq!(
        act(&mut w, "u1", "create \"crow\" \"A fake crow.\""),
        "crow is already the name of someone in this world."
    );
}

#[test]
fn buying_and_selling_with_a_merchant() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    assert_eq!(
        act(&mut w, "u1", "buy lantern"),
        "There is no merchant here to trade with."
    );
    let r = act(&mut w, "u1", "e");
    assert!(r.contains(
        "Gambino The Merchant is here, selling a lantern (12 pennies) and a map (5 pennies)."
    ));

    assert_eq!(
        act(&mut w, "u1", "get lantern"),
        "The lantern is in the possession of a merchant. Perhaps you can purchase it?"
    );
    assert_eq!(
        act(&mut w, "u1", "buy lantern"),
        "Congratulations, you successfully purchased the lantern for 12 pennies."
    );
    assert_eq!(
        act(&mut w, "u1", "inv"),
        "You are carrying a lantern. You have 88 pennies."
    );
    assert_eq!(
        act(&mut w, "u1", "sell lantern"),
        "You sell the lantern to Gambino The Merchant for 12 pennies."
    );
    assert_eq!(
        act(&mut w, "u1", "inventory"),
        "You are not carrying anything. You have 100 pennies."
    );

    if let Some(p) = w.entities.person_mut(&uid("u1")).and_then(Entity::as_person_mut) {
        p.money = 3;
    }
    assert!(act(&mut w, "u1", "buy map")
        .starts_with("You do not have enough money to buy the map."));
    assert_eq!(w.items.count_at(&ItemLocation::entity("Gambino")), 2);

    act(&mut w, "u1", "create \"pebble\" \"A pebble.\"");
    act(&mut w, "u1", "get pebble");
    assert_eq!(
        act(&mut w, "u1", "sell pebble"),
        "You can't sell the pebble - it is valueless (or priceless!)."
    );
    assert_eq!(act(&mut w, "u1", "sell money"), "You can't sell money!");
}

#[test]
fn building_wires_exits_and_rejects_conflicts() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");

    let out = act_raw(&mut w, "u1", "build south \"Clearing\" \"A quiet grove.\"");
    let reply = texts(&out, "u1").join("\n");
    assert!(reply.contains("You build south and make a new location, Clearing: A quiet grove."));
    assert_eq!(
        w.rooms.get("clearing").unwrap().exits.get(&Direction::North).map(String::as_str),
        Some("Road")
    );
    assert!(out.iter().any(|o| matches!(
        &o.event,
        OutEvent::ImageCreationRequest(r) if r.room_name == "Clearing" && r.world_name == "corvid"
    )));

    assert_eq!(
        act(&mut w, "u1", "build south \"Dell\" \"A dell.\""),
        "There is already a room to the south."
    );
    assert_eq!(
        act(&mut w, "u1", "build west \"the market\" \"Another market.\""),
        "Sorry, there is already a room called 'Market'."
    );

    act(&mut w, "u1", "n");
    assert_eq!(
        act(&mut w, "u1", "build east \"Dell\" \"A dell.\""),
        "Sorry, there is already a room to the east of Orchard, called Cliff Path. \
         It must be accessed from somewhere else. \
         Available directions in which you can build: north, west."
    );
}

#[test]
fn first_room_replaces_the_placeholder() {
    let mut w = empty(WorldConfig {
        ai_enabled: false,
        ..quiet()
    });
    join(&mut w, "u1", "Alice");
    join(&mut w, "u2", "Bob");
    assert!(w.rooms.is_empty_world());

    let out = act_raw(&mut w, "u1", "build north \"Clearing\" \"A quiet grove.\"");
    let reply = texts(&out, "u1").join("\n");
    assert!(reply.contains("It is the first location in this world, so everyone moves there."));
    assert!(reply.contains("You find yourself in the clearing: A quiet grove."));
    assert!(texts(&out, "u2")
        .iter()
        .any(|t| t.starts_with("You find yourself in the clearing")));

    assert!(!w.rooms.is_empty_world());
    assert_eq!(w.rooms.len(), 1);
    assert_eq!(w.rooms.origin(), "Clearing");
    assert_eq!(w.whoami(&uid("u2")).unwrap().1, "Clearing");

    // Without a description and without AI the room gets a stock one.
    let r = act(&mut w, "u1", "build east \"Dell\"");
    assert!(r.starts_with(
        "You build east and make a new location, Dell: A newly built location called Dell."
    ));
}

#[test]
fn build_without_description_asks_the_ai() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    let out = act_raw(&mut w, "u1", "build south \"Dell\"");
    let reqs = ai_requests(&out);
    assert_eq!(reqs.len(), 1);
    assert!(reqs[0].prompt.contains("'Dell'"));
    assert!(!w.rooms.contains("Dell"));

    let out = answer(&mut w, &reqs[0].request_id, "A hollow full of ferns.");
    assert!(texts(&out, "u1")
        .iter()
        .any(|t| t.starts_with(
            "You build south and make a new location, Dell: A hollow full of ferns."
        )));
    assert_eq!(w.rooms.get("dell").unwrap().description, "A hollow full of ferns.");
}

#[test]
fn image_responses_update_the_room() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    w.handle_inbound(Inbound::ImageCreationResponse(ImageCreationResponse {
        room_name: "road".to_string(),
        image_filename: "road.png".to_string(),
        success: true,
    }))
    .unwrap();
    let out = w.take_outbox();
    assert_eq!(texts(&out, "u1"), vec!["Room image for Road has been created."]);
    assert!(out.iter().any(|o| matches!(
        &o.event,
        OutEvent::RoomUpdate(r) if r.image.as_deref() == Some("road.png")
    )));
    assert_eq!(w.rooms.get("Road").unwrap().image.as_deref(), Some("road.png"));
}

#[test]
fn speech_reaches_the_room_or_everyone() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    assert_eq!(act(&mut w, "u1", "say hello"), "You mutter to yourself, 'hello'.");

    join(&mut w, "u2", "Bob");
    let out = act_raw(&mut w, "u1", "'hello bob");
    assert!(texts(&out, "u1").contains(&"You say, 'hello bob'.".to_string()));
    assert_eq!(texts(&out, "u2"), vec!["Alice says, \"hello bob\""]);

    act(&mut w, "u2", "e");
    assert_eq!(act(&mut w, "u1", "say hello"), "You mutter to yourself, 'hello'.");
    let out = act_raw(&mut w, "u1", "shout anyone there");
    assert_eq!(texts(&out, "u2"), vec!["Alice shouts, \"anyone there\""]);
}

#[test]
fn translation_resolves_to_a_command() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    let out = act_raw(&mut w, "u1", "have a gander around");
    let reqs = ai_requests(&out);
    assert_eq!(reqs.len(), 1);
    assert!(reqs[0].request_id.starts_with("u1-"));
    assert_eq!(reqs[0].system_message, TRANSLATE_SYSTEM);

    let out = answer(&mut w, &reqs[0].request_id, "'look'");
    assert!(texts(&out, "u1")[0].starts_with("You look again at the road:"));
}

#[test]
fn translation_misses_become_custom_actions() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    let reqs = ai_requests(&act_raw(&mut w, "u1", "dance a jig"));

    // A second miss does not translate again.
    let out = answer(&mut w, &reqs[0].request_id, "frobnicate wildly");
    let reqs = ai_requests(&out);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].system_message, CUSTOM_SYSTEM);
    assert!(reqs[0].prompt.contains("Alice wants to do this: 'dance a jig'"));

    let out = answer(
        &mut w,
        &reqs[0].request_id,
        r#"{"success_response": "You dance a lively jig.",
            "user_utterance": "hup!",
            "new_items": [{"name": "ribbon", "description": "A red ribbon."}]}"#,
    );
    let said = texts(&out, "u1");
    assert!(said[0].starts_with("You dance a lively jig."));
    assert!(said[0].contains("You mutter to yourself, 'hup!'."));
    assert!(w
        .items
        .find_exact_at(&ItemLocation::room("Road"), "ribbon")
        .is_some());
}

#[test]
fn custom_effects_update_and_delete() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    act(&mut w, "u1", "n");
    let reqs = ai_requests(&act_raw(&mut w, "u1", "custom eat the apple"));
    let out = answer(
        &mut w,
        &reqs[0].request_id,
        r#"[{"success_response": "Crunch.", "deleted_items": ["apple"],
             "updated_location": "Crooked trees, one fewer apple."}]"#,
    );
    assert_eq!(texts(&out, "u1"), vec!["Crunch."]);
    assert_eq!(w.items.count_at(&ItemLocation::room("Orchard")), 0);
    assert_eq!(
        w.rooms.get("orchard").unwrap().description,
        "Crooked trees, one fewer apple."
    );

    let reqs = ai_requests(&act_raw(&mut w, "u1", "custom fly"));
    let out = answer(
        &mut w,
        &reqs[0].request_id,
        r#"{"rejection_response": "You flap. Nothing."}"#,
    );
    assert_eq!(texts(&out, "u1"), vec!["You flap. Nothing."]);

    let reqs = ai_requests(&act_raw(&mut w, "u1", "custom sing"));
    let out = answer(&mut w, &reqs[0].request_id, "la la la");
    assert_eq!(
        texts(&out, "u1"),
        vec!["The AI could not understand the command 'sing'."]
    );
}

#[test]
fn custom_effects_accept_name_keyed_items() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    act(&mut w, "u1", "n");
    let reqs = ai_requests(&act_raw(&mut w, "u1", "custom polish the apple"));
    let out = answer(
        &mut w,
        &reqs[0].request_id,
        r#"{"success_response": "It gleams.",
            "updated_items": {"apple": "A gleaming apple."},
            "new_items": {"pip": "A small seed."}}"#,
    );
    assert_eq!(texts(&out, "u1"), vec!["It gleams."]);

    let orchard = ItemLocation::room("Orchard");
    let apple = w
        .items
        .find_exact_at(&orchard, "apple")
        .and_then(|id| w.items.get(id))
        .unwrap();
    assert_eq!(apple.description, "A gleaming apple.");
    assert!(w.items.find_exact_at(&orchard, "pip").is_some());
    assert_eq!(w.items.count_at(&orchard), 2);
}

#[test]
fn missing_verdict_is_retried_then_reported() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    let mut reqs = ai_requests(&act_raw(&mut w, "u1", "custom juggle"));
    let prompt = reqs[0].prompt.clone();

    for _ in 0..2 {
        let out = answer(&mut w, &reqs[0].request_id, r#"{"user_utterance": "hm"}"#);
        assert!(texts(&out, "u1").is_empty());
        reqs = ai_requests(&out);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].prompt, prompt);
    }
    let out = answer(&mut w, &reqs[0].request_id, r#"{"user_utterance": "hm"}"#);
    assert!(ai_requests(&out).is_empty());
    assert_eq!(
        texts(&out, "u1"),
        vec!["The AI could not understand the command 'juggle'."]
    );
}

#[test]
fn ai_requests_expire_and_late_answers_are_ignored() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    let reqs = ai_requests(&act_raw(&mut w, "u1", "custom juggle"));
    assert!(w.pending.is_pending(&reqs[0].request_id));

    w.set_now(w.cfg.ai_timeout_ms + 1);
    w.run_due_events().unwrap();
    let out = w.take_outbox();
    assert_eq!(
        texts(&out, "u1"),
        vec!["The world took too long to respond. Please try again."]
    );
    assert_eq!(w.pending.len(), 0);

    let out = answer(&mut w, &reqs[0].request_id, r#"{"success_response": "Late."}"#);
    assert!(out.is_empty());
}

#[test]
fn an_empty_ai_answer_is_a_failed_operation() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    let reqs = ai_requests(&act_raw(&mut w, "u1", "custom juggle"));
    let out = answer(&mut w, &reqs[0].request_id, "");
    assert_eq!(
        texts(&out, "u1"),
        vec!["The world could not respond to that right now."]
    );
}

#[test]
fn idle_people_are_removed_by_the_tick() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    join(&mut w, "u2", "Bob");
    act(&mut w, "u1", "create \"cup\" \"A cup.\"");
    act(&mut w, "u1", "get cup");

    // Bob stays active, Alice does not.
    w.set_now(200_000);
    act(&mut w, "u2", "wait");
    w.set_now(330_000);
    w.run_due_events().unwrap();
    let out = w.take_outbox();

    assert_eq!(
        texts(&out, "u1"),
        vec![
            "You drop the cup.",
            "You have been logged out due to inactivity."
        ]
    );
    assert_eq!(
        texts(&out, "u2"),
        vec![
            "Alice has dropped the cup.",
            "Alice has left; there are now 1 person."
        ]
    );
    assert!(out
        .iter()
        .any(|o| matches!(&o.event, OutEvent::WorldDataUpdate(d) if d.user_count == 1)));
    assert_eq!(w.people_count(), 1);
    assert_eq!(w.items.count_at(&ItemLocation::room("Road")), 1);

    w.set_now(330_000 + w.cfg.logout_grace_ms);
    w.run_due_events().unwrap();
    let out = w.take_outbox();
    assert!(out.iter().any(|o| o.to == Some(uid("u1"))
        && matches!(
            &o.event,
            OutEvent::Logout(r) if r == "You have been logged out due to inactivity."
        )));
}

#[test]
fn duplicate_removal_is_harmless() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    act(&mut w, "u1", "quit");
    w.handle_inbound(Inbound::UserDisconnect(UserDisconnect { user_id: uid("u1") }))
        .unwrap();
    assert!(w.take_outbox().is_empty());
    assert_eq!(w.people_count(), 0);
    assert!(!w.tick_active);
}

#[test]
fn unknown_users_are_logged_out() {
    let mut w = seeded(quiet());
    let out = act_raw(&mut w, "ghost", "look");
    assert_eq!(out.len(), 1);
    assert!(matches!(
        &out[0].event,
        OutEvent::Logout(r)
            if r == "You have been logged out due to a server error. Please log in again."
    ));
}

#[test]
fn people_resume_where_they_left() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    act(&mut w, "u1", "e");
    act(&mut w, "u1", "buy map");
    act(&mut w, "u1", "quit");

    let out = join(&mut w, "u9", "alice");
    assert!(texts(&out, "u9")[0].starts_with("You start in the market. "));
    assert_eq!(
        act(&mut w, "u9", "inventory"),
        "You are not carrying anything. You have 95 pennies."
    );
    assert_eq!(w.items.count_at(&ItemLocation::room("Market")), 1);
}

#[test]
fn animals_wander_or_gesture() {
    let mut w = seeded(WorldConfig {
        tick_ms: 10,
        ..WorldConfig::default()
    });
    join(&mut w, "u1", "Alice");
    let mut seen = Vec::new();
    for i in 1..=200 {
        w.set_now(i * 10);
        w.run_due_events().unwrap();
        seen.extend(texts(&w.take_outbox(), "u1"));
    }
    let crow_room = w.entities.npc("crow").unwrap().location.clone();
    assert!(crow_room != "Road" || seen.iter().any(|t| t.starts_with("The crow ")));
}

#[test]
fn spawned_animals_join_the_world() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    assert_eq!(
        act(&mut w, "u1", "spawn \"Fox\" \"A sly fox.\" \"sniffs the air, yawns\""),
        "You spawn a fox: A sly fox."
    );
    let fox = w.entities.npc("fox").unwrap();
    let EntityKind::Animal(state) = &fox.kind else {
        panic!("fox is not an animal");
    };
    assert_eq!(state.actions, vec!["sniffs the air", "yawns"]);
    assert_eq!(state.move_chance, 0.0);
    assert!(act(&mut w, "u1", "spawn \"crow\" \"Again.\" \"caws\"").contains("already"));
    assert_eq!(
        act(&mut w, "u1", "get fox"),
        "I would advise against picking up a fox, they will not react well!"
    );
}

#[test]
fn summons_are_forwarded_and_announced() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    let out = act_raw(&mut w, "u1", "summon a wandering bard");
    let id = out
        .iter()
        .find_map(|o| match &o.event {
            OutEvent::SummonAgentRequest(r) if r.request_data == "a wandering bard" => {
                Some(r.request_id.clone())
            }
            _ => None,
        })
        .unwrap();
    w.handle_inbound(Inbound::SummonAgentResponse(SummonAgentResponse { request_id: id }))
        .unwrap();
    assert_eq!(texts(&w.take_outbox(), "u1"), vec!["Someone has been summoned!"]);
}

#[test]
fn look_finds_items_and_entities() {
    let mut w = seeded(quiet());
    join(&mut w, "u1", "Alice");
    assert_eq!(
        act(&mut w, "u1", "examine the crow"),
        "You look at a crow: A glossy black crow with a knowing eye."
    );
    assert_eq!(act(&mut w, "u1", "look at"), "Look at what?");
    assert!(act(&mut w, "u1", "look at unicorn").starts_with("There is no 'unicorn' here."));
    act(&mut w, "u1", "e");
    assert_eq!(
        act(&mut w, "u1", "look at map"),
        "You look at the map: A hand-drawn map of the valley. Gambino sells it for 5 pennies."
    );
}

#[test]
fn the_world_survives_a_restart() {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let path = std::env::temp_dir().join(format!("orchestrator_world_{nanos}.jsonl"));
    let seed = || parse_seed(include_str!("../../world/corvid.yaml"), "corvid.yaml").unwrap();

    let mut w = World::new(
        quiet(),
        Store::open(path.clone()).unwrap(),
        Transcripts::new(None),
        Some(seed()),
    )
    .unwrap();
    join(&mut w, "u1", "Alice");
    act(&mut w, "u1", "build south \"Dell\" \"A dell.\"");
    act(&mut w, "u1", "n");
    act(&mut w, "u1", "get apple");
    act(&mut w, "u1", "quit");
    drop(w);

    let w = World::new(
        quiet(),
        Store::open(path.clone()).unwrap(),
        Transcripts::new(None),
        None,
    )
    .unwrap();
    assert!(w.rooms.contains("Dell"));
    assert_eq!(w.rooms.len(), 5);
    assert_eq!(w.items.count_at(&ItemLocation::room("Orchard")), 1);
    assert!(w.entities.npc("crow").is_some());
    let _ = std::fs::remove_file(path);
}
