use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const PLACEHOLDER_ROOM: &str = "Void";
const PLACEHOLDER_DESCRIPTION: &str =
    "Nothing has been built here yet. Use the build command to make the first location.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::East => "east",
            Direction::South => "south",
            Direction::West => "west",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "north" | "n" => Some(Direction::North),
            "east" | "e" => Some(Direction::East),
            "south" | "s" => Some(Direction::South),
            "west" | "w" => Some(Direction::West),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    pub fn vector(self) -> (i32, i32) {
        match self {
            Direction::North => (0, 1),
            Direction::East => (1, 0),
            Direction::South => (0, -1),
            Direction::West => (-1, 0),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Grid {
    pub x: i32,
    pub y: i32,
}

impl Grid {
    pub fn step(self, dir: Direction) -> Self {
        let (dx, dy) = dir.vector();
        Grid {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl std::fmt::Display for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone)]
pub struct Room {
    pub name: String,
    pub description: String,
    pub exits: BTreeMap<Direction, String>,
    pub grid: Grid,
    pub image: Option<String>,
    pub creator: Option<String>,
}

impl Room {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            exits: BTreeMap::new(),
            grid: Grid::default(),
            image: None,
            creator: None,
        }
    }
}

/// Why a build request was refused. The `Display` text is what the builder sees.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    UnknownRoom(String),
    ExitTaken(Direction),
    NameTaken(String),
    Occupied {
        direction: Direction,
        from: String,
        occupant: String,
        options: Vec<Direction>,
    },
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::UnknownRoom(r) => write!(f, "There is no location called '{r}'."),
            BuildError::ExitTaken(d) => write!(f, "There is already a room to the {d}."),
            BuildError::NameTaken(n) => write!(f, "Sorry, there is already a room called '{n}'."),
            BuildError::Occupied {
                direction,
                from,
                occupant,
                options,
            } => write!(
                f,
                "Sorry, there is already a room to the {direction} of {from}, called {occupant}. \
                 It must be accessed from somewhere else. {}",
                render_build_options(options)
            ),
        }
    }
}

/// The room graph. Lookups are case-insensitive; exits always come in pairs and no two rooms
/// share a grid coordinate.
#[derive(Debug, Clone)]
pub struct Rooms {
    rooms: BTreeMap<String, Room>,
    origin: String,
    empty_world: bool,
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Rooms {
    /// A world with nothing but the placeholder room at the origin.
    pub fn empty_world() -> Self {
        let mut rooms = BTreeMap::new();
        rooms.insert(
            key(PLACEHOLDER_ROOM),
            Room::new(PLACEHOLDER_ROOM, PLACEHOLDER_DESCRIPTION),
        );
        Self {
            rooms,
            origin: key(PLACEHOLDER_ROOM),
            empty_world: true,
        }
    }

    /// Build a graph from loaded rooms.
    ///
    /// Exits that point at unknown rooms are dropped, missing reverse exits are added when the
    /// slot is free, and rooms that cannot be reached from `origin` are discarded. Conflicting
    /// coordinates are an error.
    pub fn from_rooms(list: Vec<Room>, origin: &str) -> anyhow::Result<Self> {
        if list.is_empty() {
            return Ok(Self::empty_world());
        }

        let mut rooms = BTreeMap::new();
        for r in list {
            let k = key(&r.name);
            if rooms.contains_key(&k) {
                warn!(room = %r.name, "duplicate room name; keeping the first");
                continue;
            }
            rooms.insert(k, r);
        }

        let origin_key = if rooms.contains_key(&key(origin)) {
            key(origin)
        } else {
            let first = rooms.keys().next().cloned().unwrap_or_default();
            warn!(origin = %origin, fallback = %first, "origin room missing; using first room");
            first
        };

        let names: HashMap<String, String> = rooms
            .iter()
            .map(|(k, r)| (k.clone(), r.name.clone()))
            .collect();

        // Canonicalise exit targets and drop dangling ones.
        for r in rooms.values_mut() {
            let from = r.name.clone();
            r.exits.retain(|dir, to| match names.get(&key(to)) {
                Some(canon) => {
                    *to = canon.clone();
                    true
                }
                None => {
                    warn!(room = %from, dir = %dir, to = %to, "dropping exit to unknown room");
                    false
                }
            });
        }

        // Make every exit bidirectional.
        let pairs: Vec<(String, Direction, String)> = rooms
            .values()
            .flat_map(|r| {
                r.exits
                    .iter()
                    .map(|(d, to)| (r.name.clone(), *d, to.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (from, dir, to) in pairs {
            let back = dir.opposite();
            let Some(target) = rooms.get_mut(&key(&to)) else {
                continue;
            };
            match target.exits.get(&back) {
                Some(existing) if key(existing) == key(&from) => {}
                Some(existing) => {
                    warn!(
                        room = %to,
                        dir = %back,
                        existing = %existing,
                        expected = %from,
                        "one-way exit kept"
                    );
                }
                None => {
                    target.exits.insert(back, from.clone());
                }
            }
        }

        let mut out = Self {
            rooms,
            origin: origin_key,
            empty_world: false,
        };
        let origin_key = out.origin.clone();
        if let Some(r) = out.rooms.get_mut(&origin_key) {
            r.grid = Grid::default();
        }

        let reachable = out.reachable();
        let unreachable: Vec<String> = out
            .rooms
            .keys()
            .filter(|k| !reachable.contains_key(*k))
            .cloned()
            .collect();
        for k in unreachable {
            warn!(room = %k, "dropping room unreachable from origin");
            out.rooms.remove(&k);
        }

        out.assign_grid()?;
        Ok(out)
    }

    pub fn is_empty_world(&self) -> bool {
        self.empty_world
    }

    pub fn origin(&self) -> &str {
        self.rooms
            .get(&self.origin)
            .map(|r| r.name.as_str())
            .unwrap_or(PLACEHOLDER_ROOM)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(&key(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Room> {
        self.rooms.get_mut(&key(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rooms.contains_key(&key(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn next_room(&self, from: &str, dir: Direction) -> Option<&str> {
        self.get(from)?.exits.get(&dir).map(String::as_str)
    }

    /// Resolve a free-text token to one of the current room's exits by destination name.
    pub fn exit_by_room_name(&self, from: &str, token: &str) -> Option<Direction> {
        let room = self.get(from)?;
        let t = token.trim().to_lowercase();
        if t.is_empty() {
            return None;
        }
        room.exits
            .iter()
            .find(|(_, to)| {
                let to_lc = to.to_lowercase();
                to_lc == t || t.contains(&to_lc)
            })
            .map(|(d, _)| *d)
    }

    pub fn occupant(&self, grid: Grid) -> Option<&Room> {
        self.rooms.values().find(|r| r.grid == grid)
    }

    /// Directions in which building remains possible: exit unused and target cell free.
    pub fn build_options(&self, from: &str) -> Vec<Direction> {
        let Some(room) = self.get(from) else {
            return Vec::new();
        };
        Direction::ALL
            .into_iter()
            .filter(|d| !room.exits.contains_key(d))
            .filter(|d| self.occupant(room.grid.step(*d)).is_none())
            .collect()
    }

    /// Validate a build without mutating anything. Returns the new room's coordinate.
    pub fn check_build(&self, from: &str, dir: Direction, name: &str) -> Result<Grid, BuildError> {
        let Some(room) = self.get(from) else {
            return Err(BuildError::UnknownRoom(from.to_string()));
        };
        if room.exits.contains_key(&dir) {
            return Err(BuildError::ExitTaken(dir));
        }
        if let Some(existing) = self.get(name) {
            return Err(BuildError::NameTaken(existing.name.clone()));
        }
        let target = room.grid.step(dir);
        if let Some(occupant) = self.occupant(target) {
            return Err(BuildError::Occupied {
                direction: dir,
                from: room.name.clone(),
                occupant: occupant.name.clone(),
                options: self.build_options(from),
            });
        }
        Ok(target)
    }

    /// Add a room reached from `from` via `dir`, wiring both exits and re-propagating grid
    /// coordinates. Callers run [`Rooms::check_build`] first; a failure here means the graph is
    /// inconsistent.
    pub fn add_room(
        &mut self,
        from: &str,
        dir: Direction,
        name: &str,
        description: &str,
        creator: Option<&str>,
    ) -> anyhow::Result<Grid> {
        let grid = self
            .check_build(from, dir, name)
            .map_err(|e| anyhow::anyhow!("unchecked build from {from} {dir}: {e}"))?;
        let from_name = self
            .get(from)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| from.to_string());

        let mut room = Room::new(name, description);
        room.grid = grid;
        room.creator = creator.map(str::to_string);
        room.exits.insert(dir.opposite(), from_name.clone());
        self.rooms.insert(key(name), room);
        if let Some(r) = self.get_mut(&from_name) {
            r.exits.insert(dir, name.to_string());
        }

        self.assign_grid()?;
        Ok(grid)
    }

    /// Remove the empty-world placeholder once a real room exists, making `new_origin` the
    /// origin.
    pub fn retire_placeholder(&mut self, new_origin: &str) -> anyhow::Result<()> {
        if !self.empty_world {
            return Ok(());
        }
        if !self.contains(new_origin) {
            anyhow::bail!("cannot retire placeholder: {new_origin} does not exist");
        }
        self.rooms.remove(&key(PLACEHOLDER_ROOM));
        for r in self.rooms.values_mut() {
            r.exits.retain(|_, to| key(to) != key(PLACEHOLDER_ROOM));
        }
        self.origin = key(new_origin);
        self.empty_world = false;
        if let Some(r) = self.rooms.get_mut(&self.origin) {
            r.grid = Grid::default();
        }
        self.assign_grid()
    }

    fn reachable(&self) -> HashMap<String, ()> {
        let mut seen = HashMap::new();
        let mut queue = VecDeque::new();
        if self.rooms.contains_key(&self.origin) {
            seen.insert(self.origin.clone(), ());
            queue.push_back(self.origin.clone());
        }
        while let Some(k) = queue.pop_front() {
            let Some(room) = self.rooms.get(&k) else {
                continue;
            };
            for to in room.exits.values() {
                let tk = key(to);
                if self.rooms.contains_key(&tk) && !seen.contains_key(&tk) {
                    seen.insert(tk.clone(), ());
                    queue.push_back(tk);
                }
            }
        }
        seen
    }

    /// Breadth-first propagation of grid coordinates from the origin.
    ///
    /// Fails if two rooms land on the same coordinate or one room is reached at two different
    /// coordinates.
    pub fn assign_grid(&mut self) -> anyhow::Result<()> {
        let Some(origin) = self.rooms.get(&self.origin) else {
            anyhow::bail!("origin room {} missing", self.origin);
        };
        let mut coords: HashMap<String, Grid> = HashMap::new();
        let mut cells: HashMap<Grid, String> = HashMap::new();
        let mut queue = VecDeque::new();

        coords.insert(self.origin.clone(), origin.grid);
        cells.insert(origin.grid, self.origin.clone());
        queue.push_back(self.origin.clone());

        while let Some(k) = queue.pop_front() {
            let Some(room) = self.rooms.get(&k) else {
                anyhow::bail!("room {k} vanished during grid propagation");
            };
            let here = coords[&k];
            for (dir, to) in &room.exits {
                let tk = key(to);
                if !self.rooms.contains_key(&tk) {
                    anyhow::bail!("room {} has a {} exit to unknown room {}", room.name, dir, to);
                }
                let at = here.step(*dir);
                match coords.get(&tk) {
                    Some(prev) if *prev != at => {
                        anyhow::bail!("room {to} reached at both {prev} and {at}");
                    }
                    Some(_) => {}
                    None => {
                        if let Some(other) = cells.get(&at) {
                            anyhow::bail!("rooms {to} and {other} both map to grid {at}");
                        }
                        coords.insert(tk.clone(), at);
                        cells.insert(at, tk.clone());
                        queue.push_back(tk);
                    }
                }
            }
        }

        for (k, g) in coords {
            if let Some(r) = self.rooms.get_mut(&k) {
                r.grid = g;
            }
        }
        Ok(())
    }

    pub fn render_exits(&self, name: &str) -> String {
        let Some(room) = self.get(name) else {
            return "There are no exits.".to_string();
        };
        if room.exits.is_empty() {
            return "There are no exits.".to_string();
        }
        let xs = room
            .exits
            .iter()
            .map(|(d, to)| format!("{d} ({to})"))
            .collect::<Vec<_>>();
        format!("Available exits: {}.", xs.join(", "))
    }

    pub fn exit_labels(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|r| r.exits.keys().map(|d| d.as_str().to_string()).collect())
            .unwrap_or_default()
    }
}

pub fn render_build_options(options: &[Direction]) -> String {
    if options.is_empty() {
        return "You cannot build from here.".to_string();
    }
    let xs = options.iter().map(|d| d.as_str()).collect::<Vec<_>>();
    format!("Available directions in which you can build: {}.", xs.join(", "))
}

/// Canonical form for player-built room names: no leading article, each word capitalised.
pub fn normalize_room_name(raw: &str) -> String {
    let mut s = raw.trim();
    if s.len() > 4 && s.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("the ")) {
        s = s[4..].trim_start();
    }
    s.split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn capitalize(word: &str) -> String {
    let mut cs = word.chars();
    match cs.next() {
        Some(c) => c.to_uppercase().chain(cs.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}
