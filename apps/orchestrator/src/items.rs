use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const MAX_PRICE: u32 = 1000;

pub type ItemId = u64;

/// Where an item lives. Names are stored lower-cased; rooms and entities are looked up
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ItemLocation {
    Room(String),
    Entity(String),
}

impl ItemLocation {
    pub fn room(name: &str) -> Self {
        ItemLocation::Room(name.trim().to_lowercase())
    }

    pub fn entity(name: &str) -> Self {
        ItemLocation::Entity(name.trim().to_lowercase())
    }
}

#[derive(Debug, Clone)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    pub price: u32,
    pub location: ItemLocation,
    // Bumped on every move so listings keep arrival order.
    seq: u64,
}

impl Item {
    pub fn matches_token(&self, token: &str) -> bool {
        matches_token(&self.name, token)
    }
}

/// The world's item table. An item's `location` is its single owner.
#[derive(Debug, Clone)]
pub struct Items {
    items: BTreeMap<ItemId, Item>,
    next_id: ItemId,
    next_seq: u64,
}

impl Items {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
            next_id: 1,
            next_seq: 1,
        }
    }

    pub fn insert(
        &mut self,
        name: &str,
        description: &str,
        price: u32,
        location: ItemLocation,
    ) -> ItemId {
        let id = self.next_id;
        self.restore(id, name, description, price, location);
        id
    }

    /// Insert an item with a known id (store replay).
    pub fn restore(
        &mut self,
        id: ItemId,
        name: &str,
        description: &str,
        price: u32,
        location: ItemLocation,
    ) {
        let seq = self.bump_seq();
        self.items.insert(
            id,
            Item {
                id,
                name: name.trim().to_string(),
                description: description.trim().to_string(),
                price: price.min(MAX_PRICE),
                location,
                seq,
            },
        );
        self.next_id = self.next_id.max(id.saturating_add(1));
    }

    fn bump_seq(&mut self) -> u64 {
        let s = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        s
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(&id)
    }

    pub fn remove(&mut self, id: ItemId) -> Option<Item> {
        self.items.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn move_to(&mut self, id: ItemId, location: ItemLocation) -> bool {
        let seq = self.bump_seq();
        let Some(item) = self.items.get_mut(&id) else {
            return false;
        };
        item.location = location;
        item.seq = seq;
        true
    }

    /// Items at `loc`, oldest arrival first.
    pub fn at(&self, loc: &ItemLocation) -> Vec<&Item> {
        let mut xs = self
            .items
            .values()
            .filter(|i| &i.location == loc)
            .collect::<Vec<_>>();
        xs.sort_by_key(|i| i.seq);
        xs
    }

    pub fn count_at(&self, loc: &ItemLocation) -> usize {
        self.items.values().filter(|i| &i.location == loc).count()
    }

    /// First item at `loc` whose name contains `token` (or any item for "all").
    pub fn find_at(&self, loc: &ItemLocation, token: &str) -> Option<ItemId> {
        self.at(loc)
            .into_iter()
            .find(|i| i.matches_token(token))
            .map(|i| i.id)
    }

    pub fn find_exact_at(&self, loc: &ItemLocation, name: &str) -> Option<ItemId> {
        self.at(loc)
            .into_iter()
            .find(|i| i.name.eq_ignore_ascii_case(name.trim()))
            .map(|i| i.id)
    }
}

pub fn is_all(token: &str) -> bool {
    matches!(
        token.trim().to_lowercase().as_str(),
        "all" | "everything" | "*"
    )
}

pub fn matches_token(name: &str, token: &str) -> bool {
    let t = token.trim().to_lowercase();
    if t.is_empty() {
        return false;
    }
    if is_all(&t) {
        return true;
    }
    name.to_lowercase().contains(&t)
}

/// Validate a player-supplied item name, returning the cleaned name.
pub fn validate_item_name(raw: &str) -> Result<String, String> {
    let name = raw
        .trim()
        .trim_end_matches(['.', ',', '!', '?'])
        .trim()
        .to_string();
    if name.is_empty() {
        return Err("Invalid input: item name is empty.".to_string());
    }
    if !name.chars().all(|c| c.is_alphabetic() || c == ' ') {
        return Err("Invalid input: item name must contain only letters and spaces.".to_string());
    }
    let padded = format!(" {} ", name.to_lowercase());
    if [" from ", " up ", " to "].iter().any(|w| padded.contains(w)) {
        return Err(format!(
            "Invalid input: '{name}' contains a reserved word (from, up or to)."
        ));
    }
    Ok(name)
}

pub fn validate_price(price: u32) -> Result<u32, String> {
    if price > MAX_PRICE {
        return Err(format!(
            "Invalid input: price must be no more than {MAX_PRICE}."
        ));
    }
    Ok(price)
}

pub fn currency(amount: u32) -> String {
    if amount == 1 {
        "1 penny".to_string()
    } else {
        format!("{amount} pennies")
    }
}

pub fn article(name: &str) -> &'static str {
    match name.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}

/// "the a", "the a and the b", "the a, the b and the c".
pub fn list_with_the(names: &[String]) -> String {
    let xs = names.iter().map(|n| format!("the {n}")).collect::<Vec<_>>();
    join_and(&xs)
}

pub fn join_and(xs: &[String]) -> String {
    match xs {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listings_keep_arrival_order_and_single_owner() {
        let mut items = Items::new();
        let road = ItemLocation::room("Road");
        let alice = ItemLocation::entity("Alice");
        let a = items.insert("apple", "Red.", 2, road.clone());
        let b = items.insert("bell", "Brass.", 5, road.clone());

        assert!(items.move_to(a, alice.clone()));
        assert!(items.move_to(a, road.clone()));
        let names = items.at(&road).iter().map(|i| i.name.clone()).collect::<Vec<_>>();
        assert_eq!(names, vec!["bell", "apple"]);
        assert_eq!(items.count_at(&alice), 0);
        assert_eq!(items.find_at(&road, "ell"), Some(b));
        assert_eq!(items.find_at(&road, "all"), Some(b));
        assert_eq!(items.find_exact_at(&road, "APPLE"), Some(a));
    }

    #[test]
    fn restored_ids_advance_the_counter() {
        let mut items = Items::new();
        items.restore(41, "rope", "Long.", 5000, ItemLocation::room("Road"));
        assert_eq!(items.get(41).unwrap().price, MAX_PRICE);
        let next = items.insert("hook", "Sharp.", 1, ItemLocation::room("Road"));
        assert_eq!(next, 42);
    }

    #[test]
    fn item_names_are_letters_and_spaces() {
        assert_eq!(validate_item_name("golden cup!").unwrap(), "golden cup");
        assert!(validate_item_name("cup3").unwrap_err().contains("only letters"));
        assert!(validate_item_name("...").unwrap_err().contains("empty"));
        assert!(validate_item_name("cup from mars").is_err());
        assert!(validate_price(1001).is_err());
        assert_eq!(validate_price(1000), Ok(1000));
    }

    #[test]
    fn phrasing_helpers() {
        assert_eq!(currency(1), "1 penny");
        assert_eq!(currency(7), "7 pennies");
        assert_eq!(article("owl"), "an");
        assert_eq!(article("fox"), "a");
        assert_eq!(list_with_the(&["a".to_string()]), "the a");
        assert_eq!(
            list_with_the(&["a".to_string(), "b".to_string(), "c".to_string()]),
            "the a, the b and the c"
        );
        assert!(is_all("Everything"));
    }
}
