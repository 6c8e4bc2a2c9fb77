//! Item catalogue: every item type the host recognises, plus a pool of
//! derived ids for fake stage items.
//!
//! Item properties live behind the [`ItemProperties`] capability trait. Each
//! item kind has its own payload type and the [`ItemBody`] enum selects
//! between them, so overriding a stage's effects never needs to know which
//! kind of object the host will eventually swap in.

use std::collections::BTreeMap;

use ripen_types::{ItemKind, ItemTypeId, StageEffect};

use crate::config::ItemConfig;
use crate::error::CatalogueError;

/// First id handed out to derived (fake) stage items.
pub const DYNAMIC_ID_BASE: u32 = 0xFF00_0000;

/// Number of ids reserved for derived items.
pub const DYNAMIC_POOL_SIZE: u32 = 0x0001_0000;

/// Ingredients carry at most this many effects.
pub const MAX_INGREDIENT_EFFECTS: usize = 4;

// ---------------------------------------------------------------------------
// Capability interface
// ---------------------------------------------------------------------------

/// Properties a stage may read or override on an item, whatever its kind.
pub trait ItemProperties {
    /// Carry weight.
    fn weight(&self) -> f32;
    /// Set the carry weight.
    fn set_weight(&mut self, weight: f32);
    /// Gold value.
    fn value(&self) -> u32;
    /// Set the gold value.
    fn set_value(&mut self, value: u32);
    /// Magic effects. Empty for kinds without effects.
    fn effects(&self) -> &[StageEffect];
    /// Replace the effect list. Returns `false` if the kind has no effects.
    fn set_effects(&mut self, effects: Vec<StageEffect>) -> bool;
}

/// Food and potions: weight, value, and an unbounded effect list.
#[derive(Debug, Clone, PartialEq)]
pub struct Consumable {
    /// Carry weight.
    pub weight: f32,
    /// Gold value.
    pub value: u32,
    /// Magic effects.
    pub effects: Vec<StageEffect>,
}

impl ItemProperties for Consumable {
    fn weight(&self) -> f32 {
        self.weight
    }

    fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    fn value(&self) -> u32 {
        self.value
    }

    fn set_value(&mut self, value: u32) {
        self.value = value;
    }

    fn effects(&self) -> &[StageEffect] {
        &self.effects
    }

    fn set_effects(&mut self, effects: Vec<StageEffect>) -> bool {
        self.effects = effects;
        true
    }
}

/// Alchemy ingredient: like a consumable, but limited to four effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingredient {
    /// Carry weight.
    pub weight: f32,
    /// Gold value.
    pub value: u32,
    /// Magic effects (at most [`MAX_INGREDIENT_EFFECTS`]).
    pub effects: Vec<StageEffect>,
}

impl ItemProperties for Ingredient {
    fn weight(&self) -> f32 {
        self.weight
    }

    fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    fn value(&self) -> u32 {
        self.value
    }

    fn set_value(&mut self, value: u32) {
        self.value = value;
    }

    fn effects(&self) -> &[StageEffect] {
        &self.effects
    }

    fn set_effects(&mut self, mut effects: Vec<StageEffect>) -> bool {
        effects.truncate(MAX_INGREDIENT_EFFECTS);
        self.effects = effects;
        true
    }
}

/// Armor piece. Has a rating but no effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Armor {
    /// Carry weight.
    pub weight: f32,
    /// Gold value.
    pub value: u32,
    /// Armor rating.
    pub rating: f32,
}

impl ItemProperties for Armor {
    fn weight(&self) -> f32 {
        self.weight
    }

    fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    fn value(&self) -> u32 {
        self.value
    }

    fn set_value(&mut self, value: u32) {
        self.value = value;
    }

    fn effects(&self) -> &[StageEffect] {
        &[]
    }

    fn set_effects(&mut self, _effects: Vec<StageEffect>) -> bool {
        false
    }
}

/// Miscellaneous object: weight and value only.
#[derive(Debug, Clone, PartialEq)]
pub struct Misc {
    /// Carry weight.
    pub weight: f32,
    /// Gold value.
    pub value: u32,
}

impl ItemProperties for Misc {
    fn weight(&self) -> f32 {
        self.weight
    }

    fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    fn value(&self) -> u32 {
        self.value
    }

    fn set_value(&mut self, value: u32) {
        self.value = value;
    }

    fn effects(&self) -> &[StageEffect] {
        &[]
    }

    fn set_effects(&mut self, _effects: Vec<StageEffect>) -> bool {
        false
    }
}

/// Kind-tagged property payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemBody {
    /// Food.
    Food(Consumable),
    /// Alchemy ingredient.
    Ingredient(Ingredient),
    /// Potion or poison.
    Potion(Consumable),
    /// Armor piece.
    Armor(Armor),
    /// Anything else.
    Misc(Misc),
}

impl ItemBody {
    /// Build the payload for a catalogue entry.
    pub fn from_config(config: &ItemConfig) -> Self {
        let consumable = || Consumable {
            weight: config.weight,
            value: config.value,
            effects: config.effects.clone(),
        };
        match config.kind {
            ItemKind::Food => Self::Food(consumable()),
            ItemKind::Potion => Self::Potion(consumable()),
            ItemKind::Ingredient => {
                let mut ingredient = Ingredient {
                    weight: config.weight,
                    value: config.value,
                    effects: Vec::new(),
                };
                ingredient.set_effects(config.effects.clone());
                Self::Ingredient(ingredient)
            }
            ItemKind::Armor => Self::Armor(Armor {
                weight: config.weight,
                value: config.value,
                rating: config.armor_rating,
            }),
            ItemKind::Misc => Self::Misc(Misc {
                weight: config.weight,
                value: config.value,
            }),
        }
    }

    /// The kind tag.
    pub const fn kind(&self) -> ItemKind {
        match self {
            Self::Food(_) => ItemKind::Food,
            Self::Ingredient(_) => ItemKind::Ingredient,
            Self::Potion(_) => ItemKind::Potion,
            Self::Armor(_) => ItemKind::Armor,
            Self::Misc(_) => ItemKind::Misc,
        }
    }

    /// Borrow the payload through the capability interface.
    pub fn properties(&self) -> &dyn ItemProperties {
        match self {
            Self::Food(c) | Self::Potion(c) => c,
            Self::Ingredient(i) => i,
            Self::Armor(a) => a,
            Self::Misc(m) => m,
        }
    }

    /// Mutably borrow the payload through the capability interface.
    pub fn properties_mut(&mut self) -> &mut dyn ItemProperties {
        match self {
            Self::Food(c) | Self::Potion(c) => c,
            Self::Ingredient(i) => i,
            Self::Armor(a) => a,
            Self::Misc(m) => m,
        }
    }
}

// ---------------------------------------------------------------------------
// ItemRecord
// ---------------------------------------------------------------------------

/// One catalogue entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    /// Item id.
    pub id: ItemTypeId,
    /// Display name.
    pub name: String,
    /// Kind-specific properties.
    pub body: ItemBody,
    /// The item this one was derived from, for fake stage items.
    pub derived_from: Option<ItemTypeId>,
}

impl ItemRecord {
    /// The item kind.
    pub const fn kind(&self) -> ItemKind {
        self.body.kind()
    }

    /// Whether this is a derived (fake) item.
    pub const fn is_derived(&self) -> bool {
        self.derived_from.is_some()
    }
}

// ---------------------------------------------------------------------------
// ItemCatalogue
// ---------------------------------------------------------------------------

/// Registry of recognised item types.
///
/// Built from configuration at startup. Stage graphs add derived items
/// while they are constructed; after that the catalogue is read-only until
/// [`release_dynamic`](Self::release_dynamic) tears the derived items down.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalogue {
    items: BTreeMap<ItemTypeId, ItemRecord>,
    next_dynamic: u32,
}

impl ItemCatalogue {
    /// Create an empty catalogue.
    pub const fn new() -> Self {
        Self {
            items: BTreeMap::new(),
            next_dynamic: 0,
        }
    }

    /// Build a catalogue from configuration entries.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogueError::DuplicateItem`] if an id repeats, or
    /// [`CatalogueError::ReservedId`] if an id falls in the dynamic range.
    pub fn from_config(entries: &[ItemConfig]) -> Result<Self, CatalogueError> {
        let mut catalogue = Self::new();
        for entry in entries {
            catalogue.insert(ItemRecord {
                id: entry.id,
                name: entry.name.clone(),
                body: ItemBody::from_config(entry),
                derived_from: None,
            })?;
        }
        Ok(catalogue)
    }

    /// Add a host item.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogueError::DuplicateItem`] if the id is taken, or
    /// [`CatalogueError::ReservedId`] if it lies in the dynamic range.
    pub fn insert(&mut self, record: ItemRecord) -> Result<(), CatalogueError> {
        if is_dynamic(record.id) {
            return Err(CatalogueError::ReservedId(record.id));
        }
        if self.items.contains_key(&record.id) {
            return Err(CatalogueError::DuplicateItem(record.id));
        }
        self.items.insert(record.id, record);
        Ok(())
    }

    /// Look up an item.
    pub fn get(&self, id: ItemTypeId) -> Option<&ItemRecord> {
        self.items.get(&id)
    }

    /// Whether the id is known.
    pub fn contains(&self, id: ItemTypeId) -> bool {
        self.items.contains_key(&id)
    }

    /// Display name of an item, if known.
    pub fn name(&self, id: ItemTypeId) -> Option<&str> {
        self.items.get(&id).map(|record| record.name.as_str())
    }

    /// Number of known items (host and derived).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the catalogue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of derived items currently allocated.
    pub fn dynamic_count(&self) -> usize {
        self.items.values().filter(|record| record.is_derived()).count()
    }

    /// Number of dynamic ids still available to [`derive`](Self::derive).
    pub fn dynamic_remaining(&self) -> usize {
        usize::try_from(DYNAMIC_POOL_SIZE.saturating_sub(self.next_dynamic)).unwrap_or(usize::MAX)
    }

    /// Derive a fake stage item from `base`, replacing its effects with
    /// `effects` when the base kind carries effects and the list is
    /// non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogueError::UnknownItem`] if `base` is unknown, or
    /// [`CatalogueError::PoolExhausted`] if no dynamic id is left.
    pub fn derive(
        &mut self,
        base: ItemTypeId,
        name: &str,
        effects: &[StageEffect],
    ) -> Result<ItemTypeId, CatalogueError> {
        let template = self
            .items
            .get(&base)
            .ok_or(CatalogueError::UnknownItem(base))?;
        let mut body = template.body.clone();
        if !effects.is_empty() {
            body.properties_mut().set_effects(effects.to_vec());
        }
        let name = if name.is_empty() {
            template.name.clone()
        } else {
            format!("{} ({name})", template.name)
        };

        let id = self.allocate()?;
        self.items.insert(
            id,
            ItemRecord {
                id,
                name,
                body,
                derived_from: Some(base),
            },
        );
        Ok(id)
    }

    /// Drop every derived item and reset the dynamic pool.
    ///
    /// Returns the number of items released.
    pub fn release_dynamic(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|_, record| !record.is_derived());
        self.next_dynamic = 0;
        before.saturating_sub(self.items.len())
    }

    fn allocate(&mut self) -> Result<ItemTypeId, CatalogueError> {
        if self.next_dynamic >= DYNAMIC_POOL_SIZE {
            return Err(CatalogueError::PoolExhausted);
        }
        let raw = DYNAMIC_ID_BASE
            .checked_add(self.next_dynamic)
            .ok_or(CatalogueError::PoolExhausted)?;
        self.next_dynamic = self
            .next_dynamic
            .checked_add(1)
            .ok_or(CatalogueError::PoolExhausted)?;
        Ok(ItemTypeId(raw))
    }
}

const fn is_dynamic(id: ItemTypeId) -> bool {
    match id.0.checked_sub(DYNAMIC_ID_BASE) {
        Some(offset) => offset < DYNAMIC_POOL_SIZE,
        None => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(id: u32, name: &str, kind: ItemKind, effects: Vec<StageEffect>) -> ItemConfig {
        ItemConfig {
            id: ItemTypeId(id),
            name: name.to_owned(),
            kind,
            weight: 0.5,
            value: 10,
            armor_rating: 0.0,
            effects,
        }
    }

    fn effect(id: u32) -> StageEffect {
        StageEffect {
            effect: id,
            magnitude: 1.0,
            duration: 5,
        }
    }

    #[test]
    fn builds_from_config() {
        let catalogue = ItemCatalogue::from_config(&[
            item(1, "Apple", ItemKind::Food, vec![effect(10)]),
            item(2, "Helmet", ItemKind::Armor, Vec::new()),
        ])
        .unwrap();
        assert_eq!(catalogue.len(), 2);
        assert_eq!(catalogue.name(ItemTypeId(1)), Some("Apple"));
        assert_eq!(catalogue.get(ItemTypeId(2)).map(ItemRecord::kind), Some(ItemKind::Armor));
    }

    #[test]
    fn rejects_duplicates_and_reserved_ids() {
        let dup = ItemCatalogue::from_config(&[
            item(1, "A", ItemKind::Misc, Vec::new()),
            item(1, "B", ItemKind::Misc, Vec::new()),
        ]);
        assert_eq!(dup.err(), Some(CatalogueError::DuplicateItem(ItemTypeId(1))));

        let reserved =
            ItemCatalogue::from_config(&[item(DYNAMIC_ID_BASE, "X", ItemKind::Misc, Vec::new())]);
        assert_eq!(
            reserved.err(),
            Some(CatalogueError::ReservedId(ItemTypeId(DYNAMIC_ID_BASE)))
        );
    }

    #[test]
    fn derived_item_overrides_effects() {
        let mut catalogue =
            ItemCatalogue::from_config(&[item(1, "Apple", ItemKind::Food, vec![effect(10)])])
                .unwrap();
        let fake = catalogue.derive(ItemTypeId(1), "Ripe", &[effect(20), effect(21)]).unwrap();

        assert_eq!(fake, ItemTypeId(DYNAMIC_ID_BASE));
        let record = catalogue.get(fake).unwrap();
        assert_eq!(record.name, "Apple (Ripe)");
        assert_eq!(record.derived_from, Some(ItemTypeId(1)));
        assert_eq!(record.body.properties().effects().len(), 2);
        assert_eq!(record.body.properties().value(), 10);
        // The base item is untouched.
        let base = catalogue.get(ItemTypeId(1)).unwrap();
        assert_eq!(base.body.properties().effects().first().map(|e| e.effect), Some(10));
    }

    #[test]
    fn ingredient_effects_are_capped() {
        let mut catalogue =
            ItemCatalogue::from_config(&[item(1, "Root", ItemKind::Ingredient, Vec::new())])
                .unwrap();
        let effects: Vec<StageEffect> = (0..6).map(effect).collect();
        let fake = catalogue.derive(ItemTypeId(1), "", &effects).unwrap();
        let record = catalogue.get(fake).unwrap();
        assert_eq!(record.body.properties().effects().len(), MAX_INGREDIENT_EFFECTS);
        assert_eq!(record.name, "Root");
    }

    #[test]
    fn armor_ignores_effect_overrides() {
        let mut body = ItemBody::Armor(Armor {
            weight: 5.0,
            value: 100,
            rating: 12.0,
        });
        assert!(!body.properties_mut().set_effects(vec![effect(1)]));
        assert!(body.properties().effects().is_empty());
        body.properties_mut().set_value(80);
        assert_eq!(body.properties().value(), 80);
    }

    #[test]
    fn release_dynamic_resets_pool() {
        let mut catalogue =
            ItemCatalogue::from_config(&[item(1, "Apple", ItemKind::Food, Vec::new())]).unwrap();
        let first = catalogue.derive(ItemTypeId(1), "a", &[]).unwrap();
        let _ = catalogue.derive(ItemTypeId(1), "b", &[]).unwrap();
        assert_eq!(catalogue.dynamic_count(), 2);

        assert_eq!(catalogue.release_dynamic(), 2);
        assert_eq!(catalogue.dynamic_count(), 0);
        assert_eq!(catalogue.derive(ItemTypeId(1), "c", &[]).unwrap(), first);
    }

    #[test]
    fn derive_from_unknown_base_fails() {
        let mut catalogue = ItemCatalogue::new();
        assert_eq!(
            catalogue.derive(ItemTypeId(9), "x", &[]).err(),
            Some(CatalogueError::UnknownItem(ItemTypeId(9)))
        );
    }
}
