use crate::rooms::{Direction, normalize_room_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Look,
    Say,
    Shout,
    Greet,
    Wait,
    Jump,
    Attack,
    Quit,
    Get,
    Drop,
    Go,
    Build,
    Create,
    Spawn,
    Summon,
    Buy,
    Sell,
    Trade,
    Inventory,
    Help,
}

pub struct VerbDef {
    pub word: &'static str,
    pub verb: Verb,
    pub help: &'static str,
}

pub static VERBS: &[VerbDef] = &[
    VerbDef {
        word: "look",
        verb: Verb::Look,
        help: "look around, or look at an item or someone here",
    },
    VerbDef {
        word: "say",
        verb: Verb::Say,
        help: "say something to the people here",
    },
    VerbDef {
        word: "shout",
        verb: Verb::Shout,
        help: "shout something to everyone in the world",
    },
    VerbDef {
        word: "greet",
        verb: Verb::Greet,
        help: "greet someone here",
    },
    VerbDef {
        word: "wait",
        verb: Verb::Wait,
        help: "let some time pass",
    },
    VerbDef {
        word: "jump",
        verb: Verb::Jump,
        help: "jump to wherever another person or creature is",
    },
    VerbDef {
        word: "attack",
        verb: Verb::Attack,
        help: "attack someone (not recommended)",
    },
    VerbDef {
        word: "quit",
        verb: Verb::Quit,
        help: "leave the world",
    },
    VerbDef {
        word: "get",
        verb: Verb::Get,
        help: "pick up an item here, or 'all'",
    },
    VerbDef {
        word: "drop",
        verb: Verb::Drop,
        help: "drop an item you carry, or 'all'",
    },
    VerbDef {
        word: "go",
        verb: Verb::Go,
        help: "go in a direction or to a neighbouring location",
    },
    VerbDef {
        word: "build",
        verb: Verb::Build,
        help: "build a location: build <direction> \"<name>\" \"<description>\"",
    },
    VerbDef {
        word: "create",
        verb: Verb::Create,
        help: "create an item here: create \"<name>\" \"<description>\" [price]",
    },
    VerbDef {
        word: "spawn",
        verb: Verb::Spawn,
        help: "spawn an animal here: spawn \"<name>\" \"<description>\" \"<action>, <action>\"",
    },
    VerbDef {
        word: "summon",
        verb: Verb::Summon,
        help: "summon a helper into the world",
    },
    VerbDef {
        word: "buy",
        verb: Verb::Buy,
        help: "buy an item from a merchant here",
    },
    VerbDef {
        word: "sell",
        verb: Verb::Sell,
        help: "sell an item to a merchant here",
    },
    VerbDef {
        word: "trade",
        verb: Verb::Trade,
        help: "trade with someone here",
    },
    VerbDef {
        word: "inventory",
        verb: Verb::Inventory,
        help: "list what you are carrying",
    },
    VerbDef {
        word: "help",
        verb: Verb::Help,
        help: "show this help",
    },
];

pub static SYNONYMS: &[(&str, &str)] = &[
    ("n", "north"),
    ("e", "east"),
    ("s", "south"),
    ("w", "west"),
    ("pick", "get"),
    ("take", "get"),
    ("head", "go"),
    ("walk", "go"),
    ("run", "go"),
    ("enter", "go"),
    ("hi", "greet"),
    ("talk", "say"),
    ("inv", "inventory"),
    ("haggle", "trade"),
    ("purchase", "buy"),
    ("examine", "look"),
    ("inspect", "look"),
    ("press", "push"),
    ("kill", "attack"),
    ("hit", "attack"),
];

pub const CUSTOM_VERB: &str = "custom";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move(Direction),
    Simple {
        verb: Verb,
        arg: String,
    },
    Build {
        direction: Direction,
        name: String,
        description: String,
    },
    Create {
        name: String,
        description: String,
        price: u32,
    },
    Spawn {
        name: String,
        description: String,
        actions: Vec<String>,
    },
    Custom(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Run(Command),
    /// The input was understood well enough to reject it.
    Reply(String),
    /// No verb matched; the caller may try a translation.
    Unknown,
}

pub fn synonym(word: &str) -> &str {
    SYNONYMS
        .iter()
        .find(|(k, _)| *k == word)
        .map(|(_, v)| *v)
        .unwrap_or(word)
}

fn verb_def(word: &str) -> Option<&'static VerbDef> {
    VERBS.iter().find(|d| d.word == word)
}

pub fn is_reserved_word(word: &str) -> bool {
    let w = word.trim().to_lowercase();
    w == CUSTOM_VERB
        || verb_def(&w).is_some()
        || SYNONYMS.iter().any(|(k, _)| *k == w)
        || Direction::parse(&w).is_some()
}

/// Remove one layer of matching outer quotes.
pub fn strip_outer_quotes(s: &str) -> &str {
    let s = s.trim();
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Split into quoted phrases and bare words: `"a b" c 'd e'` → `[a b, c, d e]`.
pub fn phrases(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while let Some(c) = rest.chars().next() {
        if c == '"' || c == '\'' {
            if let Some(end) = rest[1..].find(c) {
                out.push(rest[1..1 + end].to_string());
                rest = rest[end + 2..].trim_start();
                continue;
            }
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        out.push(rest[..end].to_string());
        rest = rest[end..].trim_start();
    }
    out
}

fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

/// Tokenize one line of player input and route it.
pub fn parse(input: &str) -> Parsed {
    let mut line = input.trim().trim_end_matches('.').trim().to_string();
    if line.is_empty() {
        return Parsed::Reply("You need to enter a command.".to_string());
    }
    if let Some(spoken) = line.strip_prefix('\'') {
        line = format!("say {}", spoken.trim_end_matches('\''));
    }

    let (first, raw_rest) = split_first_word(&line);
    let word = first.to_lowercase();
    let word = synonym(&word);
    let rest = raw_rest.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(dir) = Direction::parse(word) {
        return Parsed::Run(Command::Move(dir));
    }
    if word == CUSTOM_VERB {
        if rest.is_empty() {
            return Parsed::Reply("What would you like to do?".to_string());
        }
        return Parsed::Run(Command::Custom(rest));
    }
    let Some(def) = verb_def(word) else {
        return Parsed::Unknown;
    };

    let res = match def.verb {
        Verb::Build => parse_build(&rest),
        Verb::Create => parse_create(&rest),
        Verb::Spawn => parse_spawn(&rest),
        verb => Ok(Command::Simple {
            verb,
            arg: strip_outer_quotes(&rest).to_string(),
        }),
    };
    match res {
        Ok(cmd) => Parsed::Run(cmd),
        Err(msg) => Parsed::Reply(msg),
    }
}

fn parse_build(rest: &str) -> Result<Command, String> {
    let (dir_tok, after) = split_first_word(rest);
    if dir_tok.is_empty() {
        return Err(
            "Please specify a direction, then a room name in quotes and a description.".to_string(),
        );
    }
    let Some(direction) = Direction::parse(synonym(&dir_tok.to_lowercase())) else {
        return Err(format!("'{dir_tok}' is not a valid direction."));
    };
    if after.is_empty() {
        return Err("Please specify room name in quotes and a description.".to_string());
    }

    let (raw_name, after) = take_room_name(after)?;
    let name = normalize_room_name(&raw_name);
    if name.is_empty() {
        return Err("Invalid input: room name is empty.".to_string());
    }
    if is_reserved_word(&name) {
        return Err(format!("'{name}' is a reserved word."));
    }
    let description = take_description(after)?;
    Ok(Command::Build {
        direction,
        name,
        description,
    })
}

fn take_room_name(s: &str) -> Result<(String, &str), String> {
    let s = s.trim();
    let Some(q) = s.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        let (word, after) = split_first_word(s);
        return Ok((word.to_string(), after));
    };
    let Some(end) = s[1..].find(q) else {
        return Err("Invalid input: room name is not properly quoted.".to_string());
    };
    let name = s[1..1 + end].trim().to_string();
    if name.is_empty() {
        return Err("Invalid input: room name is empty.".to_string());
    }
    Ok((name, s[end + 2..].trim_start()))
}

fn take_description(s: &str) -> Result<String, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(String::new());
    }
    let Some(q) = s.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        return Err("Invalid input: room description must be in quotes.".to_string());
    };
    if s.len() < 2 || !s.ends_with(q) {
        return Err("Invalid input: room description is not properly quoted.".to_string());
    }
    Ok(s[1..s.len() - 1].trim().to_string())
}

fn parse_create(rest: &str) -> Result<Command, String> {
    let ps = phrases(rest);
    if !(2..=3).contains(&ps.len()) {
        return Err(
            "Please specify item name and description in quotes, then optional price.".to_string(),
        );
    }
    let price = match ps.get(2) {
        None => 0,
        Some(p) => parse_price(p)?,
    };
    Ok(Command::Create {
        name: ps[0].clone(),
        description: ps[1].clone(),
        price,
    })
}

fn parse_price(p: &str) -> Result<u32, String> {
    let p = p.trim();
    if let Some(neg) = p.strip_prefix('-') {
        if !neg.is_empty() && neg.chars().all(|c| c.is_ascii_digit()) {
            return Err("Invalid input: price cannot be negative.".to_string());
        }
    }
    p.parse::<u32>()
        .map_err(|_| "Price must be a number.".to_string())
}

fn parse_spawn(rest: &str) -> Result<Command, String> {
    let ps = phrases(rest);
    if ps.len() != 3 {
        return Err(
            "You need to provide a name, description and actions for the animal.".to_string(),
        );
    }
    let actions = ps[2]
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();
    Ok(Command::Spawn {
        name: ps[0].clone(),
        description: ps[1].clone(),
        actions,
    })
}

pub fn help_text() -> String {
    let mut s = String::new();
    s.push_str("Valid directions: north, east, south, west.\n");
    s.push_str("Valid commands:\n");
    for d in VERBS {
        s.push_str(&format!("  {}: {}\n", d.word, d.help));
    }
    let syn = SYNONYMS
        .iter()
        .map(|(k, v)| format!("{k} = {v}"))
        .collect::<Vec<_>>();
    s.push_str(&format!("Synonyms: {}.\n", syn.join(", ")));
    s.push_str("Anything else you type is attempted as a free-form action.");
    s
}

pub fn unrecognised_reply() -> String {
    let verbs = VERBS.iter().map(|d| d.word).collect::<Vec<_>>();
    format!(
        "That is not a recognised command. Available commands: {}.",
        verbs.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> Command {
        match parse(input) {
            Parsed::Run(c) => c,
            other => panic!("{input}: {other:?}"),
        }
    }

    fn reply(input: &str) -> String {
        match parse(input) {
            Parsed::Reply(s) => s,
            other => panic!("{input}: {other:?}"),
        }
    }

    #[test]
    fn synonyms_and_directions() {
        assert_eq!(run("n"), Command::Move(Direction::North));
        assert_eq!(run("West."), Command::Move(Direction::West));
        assert_eq!(
            run("pick up the lamp"),
            Command::Simple {
                verb: Verb::Get,
                arg: "up the lamp".to_string()
            }
        );
        assert_eq!(
            run("examine   the   bell"),
            Command::Simple {
                verb: Verb::Look,
                arg: "the bell".to_string()
            }
        );
        assert_eq!(parse("press button"), Parsed::Unknown);
        assert_eq!(parse("dance wildly"), Parsed::Unknown);
    }

    #[test]
    fn quotes_and_speech() {
        assert_eq!(
            run("'hello there'"),
            Command::Simple {
                verb: Verb::Say,
                arg: "hello there".to_string()
            }
        );
        assert_eq!(
            run("say \"nice day\""),
            Command::Simple {
                verb: Verb::Say,
                arg: "nice day".to_string()
            }
        );
        assert_eq!(strip_outer_quotes("\"mixed'"), "\"mixed'");
        assert_eq!(reply("   "), "You need to enter a command.");
    }

    #[test]
    fn build_grammar() {
        assert_eq!(
            run("build north \"Clearing\" \"A quiet grove.\""),
            Command::Build {
                direction: Direction::North,
                name: "Clearing".to_string(),
                description: "A quiet grove.".to_string(),
            }
        );
        assert_eq!(
            run("build e 'the old mill'"),
            Command::Build {
                direction: Direction::East,
                name: "Old Mill".to_string(),
                description: String::new(),
            }
        );
        assert_eq!(reply("build up \"Loft\" \"x\""), "'up' is not a valid direction.");
        assert_eq!(
            reply("build north"),
            "Please specify room name in quotes and a description."
        );
        assert_eq!(
            reply("build north \"Loft \"x\""),
            "Invalid input: room description must be in quotes."
        );
        assert_eq!(
            reply("build north \"Loft"),
            "Invalid input: room name is not properly quoted."
        );
        assert_eq!(
            reply("build north Loft \"dusty"),
            "Invalid input: room description is not properly quoted."
        );
        assert_eq!(reply("build north Look \"x\""), "'Look' is a reserved word.");
        assert_eq!(
            reply("build north Loft dusty"),
            "Invalid input: room description must be in quotes."
        );
    }

    #[test]
    fn create_and_spawn_grammar() {
        assert_eq!(
            run("create \"brass bell\" \"A small bell\" 5"),
            Command::Create {
                name: "brass bell".to_string(),
                description: "A small bell".to_string(),
                price: 5,
            }
        );
        assert_eq!(
            reply("create bell"),
            "Please specify item name and description in quotes, then optional price."
        );
        assert_eq!(reply("create bell 'rings' lots"), "Price must be a number.");
        assert_eq!(
            reply("create bell 'rings' -3"),
            "Invalid input: price cannot be negative."
        );
        assert_eq!(
            run("spawn fox 'A sly fox' 'sniffs the air, yawns,'"),
            Command::Spawn {
                name: "fox".to_string(),
                description: "A sly fox".to_string(),
                actions: vec!["sniffs the air".to_string(), "yawns".to_string()],
            }
        );
        assert_eq!(
            reply("spawn fox 'A sly fox'"),
            "You need to provide a name, description and actions for the animal."
        );
    }

    #[test]
    fn phrase_tokenizer() {
        assert_eq!(
            phrases(r#""a b" c 'd e' "open"#),
            vec!["a b", "c", "d e", "\"open"]
        );
        assert!(phrases("   ").is_empty());
    }

    #[test]
    fn custom_and_help() {
        assert_eq!(
            run("custom juggle the apples"),
            Command::Custom("juggle the apples".to_string())
        );
        assert!(is_reserved_word("Inv"));
        assert!(!is_reserved_word("Meadow"));
        let help = help_text();
        assert!(help.contains("build: build a location"));
        assert!(help.contains("inv = inventory"));
        assert!(unrecognised_reply().starts_with("That is not a recognised command."));
    }
}
