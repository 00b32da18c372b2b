//! Prompts sent to the language model and the JSON contract its custom-action replies follow.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

pub const TRANSLATE_SYSTEM: &str = "You help players of a multiplayer text adventure. \
You turn what a player typed into one of the game's commands, or the single word 'custom' \
when no command fits.";

pub const CUSTOM_SYSTEM: &str = "You are the narrator of a multiplayer text adventure. \
You decide whether a player's free-form action can happen and describe its outcome. \
You always reply with a single JSON object and nothing else.";

pub const DESCRIBE_SYSTEM: &str = "You write short, vivid location descriptions for a \
multiplayer text adventure.";

/// What the player can currently perceive.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub world: String,
    pub landscape: Option<String>,
    pub person: String,
    pub room: String,
    pub room_description: String,
    pub exits: String,
    pub items_here: Vec<(String, String)>,
    pub inventory: Vec<(String, String)>,
    pub others: Vec<(String, String)>,
    pub recent: Vec<String>,
}

impl Scene {
    fn render(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!(
            "{} is in the world of {}, at the location '{}': {}\n",
            self.person, self.world, self.room, self.room_description
        ));
        if let Some(l) = &self.landscape {
            s.push_str(&format!("The landscape: {l}\n"));
        }
        s.push_str(&format!("{}\n", self.exits));
        s.push_str(&render_list("Items here", &self.items_here));
        s.push_str(&render_list(
            &format!("{} is carrying", self.person),
            &self.inventory,
        ));
        s.push_str(&render_list("Also here", &self.others));
        s
    }
}

fn render_list(title: &str, xs: &[(String, String)]) -> String {
    if xs.is_empty() {
        return format!("{title}: nothing.\n");
    }
    let lines = xs
        .iter()
        .map(|(n, d)| format!("- {n}: {d}"))
        .collect::<Vec<_>>();
    format!("{title}:\n{}\n", lines.join("\n"))
}

pub fn translate_prompt(input: &str, scene: &Scene, help: &str) -> String {
    let mut s = scene.render();
    if !scene.recent.is_empty() {
        s.push_str("Recent conversation:\n");
        for line in &scene.recent {
            s.push_str(line);
            s.push('\n');
        }
    }
    s.push_str("\nThe game understands these commands:\n");
    s.push_str(help);
    s.push_str(&format!(
        "\n\nThe player typed: '{input}'\n\
Respond with only a valid command phrase or the word 'custom'."
    ));
    s
}

pub fn custom_prompt(action: &str, scene: &Scene) -> String {
    let mut s = scene.render();
    s.push_str(&format!(
        "\n{} wants to do this: '{action}'\n\n\
If it is possible here, reply with:\n\
{{\"success_response\": \"what happens, addressed to the player\", \
\"user_utterance\": \"optional words the player says aloud\", \
\"updated_location\": \"optional new description of the location\", \
\"updated_items\": [{{\"name\": \"item\", \"description\": \"new description\"}}], \
\"new_items\": [{{\"name\": \"item\", \"description\": \"description\"}}], \
\"deleted_items\": [\"item\"], \
\"updated_entities\": [{{\"name\": \"someone here\", \"description\": \"new description\"}}]}}\n\
Omit keys that do not change. If it is not possible, reply with:\n\
{{\"rejection_response\": \"why not, addressed to the player\"}}",
        scene.person
    ));
    s
}

pub fn room_description_prompt(
    world: &str,
    landscape: Option<&str>,
    room_name: &str,
    from_room: &str,
    from_description: &str,
) -> String {
    let mut s = format!(
        "In the world of {world}, someone is building a new location called '{room_name}' \
next to '{from_room}' ({from_description}).\n"
    );
    if let Some(l) = landscape {
        s.push_str(&format!("The landscape: {l}\n"));
    }
    s.push_str(
        "Describe the new location in one or two sentences. Reply with the description only.",
    );
    s
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NamedText {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Either `[{"name", "description"}]` or `{"name": "description"}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum NamedTexts {
    List(Vec<NamedText>),
    Keyed(BTreeMap<String, String>),
}

fn named_texts<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<NamedText>, D::Error> {
    Ok(match Option::<NamedTexts>::deserialize(d)? {
        None => Vec::new(),
        Some(NamedTexts::List(xs)) => xs,
        Some(NamedTexts::Keyed(m)) => m
            .into_iter()
            .map(|(name, description)| NamedText { name, description })
            .collect(),
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CustomReply {
    success_response: Option<String>,
    rejection_response: Option<String>,
    user_utterance: Option<String>,
    updated_location: Option<String>,
    #[serde(deserialize_with = "named_texts")]
    updated_items: Vec<NamedText>,
    #[serde(deserialize_with = "named_texts")]
    new_items: Vec<NamedText>,
    deleted_items: Vec<String>,
    #[serde(deserialize_with = "named_texts")]
    updated_entities: Vec<NamedText>,
}

/// Effects of an accepted custom action, applied in field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomEffects {
    pub response: String,
    pub utterance: Option<String>,
    pub updated_location: Option<String>,
    pub updated_entities: Vec<NamedText>,
    pub updated_items: Vec<NamedText>,
    pub deleted_items: Vec<String>,
    pub new_items: Vec<NamedText>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CustomVerdict {
    Success(CustomEffects),
    Rejected(String),
    /// Not JSON, not an object, or fields of the wrong shape.
    Unintelligible(String),
    /// Well-formed, but neither `success_response` nor `rejection_response`.
    MissingVerdict,
}

fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(inner) = t.strip_prefix("```") else {
        return t;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim_end().trim_end_matches("```").trim()
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|x| x.trim().to_string()).filter(|x| !x.is_empty())
}

pub fn parse_custom_reply(text: &str) -> CustomVerdict {
    let raw = strip_code_fence(text);
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return CustomVerdict::Unintelligible(format!("not json: {e}")),
    };
    let value = match value {
        serde_json::Value::Array(mut xs) if xs.len() == 1 => xs.remove(0),
        serde_json::Value::Array(xs) => {
            return CustomVerdict::Unintelligible(format!("array of {} elements", xs.len()));
        }
        v => v,
    };
    if !value.is_object() {
        return CustomVerdict::Unintelligible("not an object".to_string());
    }
    let reply: CustomReply = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => return CustomVerdict::Unintelligible(format!("bad fields: {e}")),
    };

    if let Some(response) = non_empty(reply.success_response) {
        return CustomVerdict::Success(CustomEffects {
            response,
            utterance: non_empty(reply.user_utterance),
            updated_location: non_empty(reply.updated_location),
            updated_entities: reply.updated_entities,
            updated_items: reply.updated_items,
            deleted_items: reply.deleted_items,
            new_items: reply.new_items,
        });
    }
    if let Some(r) = non_empty(reply.rejection_response) {
        return CustomVerdict::Rejected(r);
    }
    CustomVerdict::MissingVerdict
}
