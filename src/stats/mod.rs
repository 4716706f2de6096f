// Copyright © 2017 Cormac O'Brien
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Gameplay-state reconstruction: the pickup catalog, observed-collection
//! inference, the per-frame stats replay, and the on-wire event fixup that
//! keeps sounds, prints and entity updates consistent with the recomputed
//! state.

pub mod collect;
pub mod fixup;
pub mod rebuild;

use crate::collision;
use crate::collision::Bounds;
use crate::demo::ClientStats;
use crate::demo::Demo;
use crate::demo::DemoError;
use crate::net::ItemFlags;

use cgmath::Vector3;
use thiserror::Error;

pub use collect::get_collections;
pub use fixup::fix_collection_events;
pub use rebuild::rebuild_stats;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("{0}")]
    Demo(#[from] DemoError),
    #[error("unknown skin {0} for the armor model")]
    UnknownArmorSkin(u8),
    #[error("duplicate spawn baseline for entity {0}")]
    DuplicateBaseline(i16),
    #[error("entity {0} became a collectable mid-demo")]
    LateCollectable(i16),
    #[error("pickup sounds and prints do not pair up ({sounds} sounds, {prints} prints)")]
    EventPairing { sounds: usize, prints: usize },
    #[error("block {block}: nearest pickup candidate is {distance} units away")]
    NoCandidate { block: usize, distance: f32 },
    #[error("block {block}: pickup print does not match the selected collectable")]
    PrintMismatch { block: usize },
    #[error("block {block}: pickup sound position does not match the player center")]
    SoundPosition { block: usize },
    #[error("block {block}: backpack text does not match the pickup grammar")]
    BackpackGrammar { block: usize },
    #[error("block {block}: damage message is inconsistent with the armor arithmetic")]
    DamageArithmetic { block: usize },
    #[error("block {block}: {stat} went negative during reconstruction")]
    NegativeStat { block: usize, stat: &'static str },
    #[error("unknown active weapon {0:#x}")]
    UnknownActiveWeapon(u32),
    #[error("model {0:?} missing from the model precache")]
    ModelNotPrecached(String),
    #[error("sound {0:?} missing from the sound precache")]
    SoundNotPrecached(String),
    #[error("block {block}: print flow is not cleanly isolable in its block")]
    PrintNotIsolable { block: usize },
    #[error("block {block}: expected exactly one matching pickup sound, found {found}")]
    SoundRemoval { block: usize, found: usize },
    #[error("no sibling block at time {0}")]
    SiblingTimeMissing(f64),
    #[error("{0}")]
    Invariant(String),
}

impl StatsError {
    pub fn invariant<S>(msg: S) -> Self
    where
        S: AsRef<str>,
    {
        StatsError::Invariant(msg.as_ref().to_owned())
    }
}

pub const MIN_HEALTH: i32 = 1;
pub const MAX_HEALTH: i32 = 100;
pub const MAX_MEGAHEALTH: i32 = 250;
pub const MAX_SHELLS: i32 = 100;
pub const MAX_NAILS: i32 = 200;
pub const MAX_ROCKETS: i32 = 100;
pub const MAX_CELLS: i32 = 100;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AmmoKind {
    Shells,
    Nails,
    Rockets,
    Cells,
}

impl AmmoKind {
    pub const ALL: [AmmoKind; 4] = [
        AmmoKind::Shells,
        AmmoKind::Nails,
        AmmoKind::Rockets,
        AmmoKind::Cells,
    ];

    pub fn item_flag(self) -> ItemFlags {
        match self {
            AmmoKind::Shells => ItemFlags::SHELLS,
            AmmoKind::Nails => ItemFlags::NAILS,
            AmmoKind::Rockets => ItemFlags::ROCKETS,
            AmmoKind::Cells => ItemFlags::CELLS,
        }
    }

    pub fn cap(self) -> i32 {
        match self {
            AmmoKind::Shells => MAX_SHELLS,
            AmmoKind::Nails => MAX_NAILS,
            AmmoKind::Rockets => MAX_ROCKETS,
            AmmoKind::Cells => MAX_CELLS,
        }
    }

    pub fn bound(self, value: i32) -> i32 {
        value.min(self.cap())
    }

    pub fn name(self) -> &'static str {
        match self {
            AmmoKind::Shells => "shells",
            AmmoKind::Nails => "nails",
            AmmoKind::Rockets => "rockets",
            AmmoKind::Cells => "cells",
        }
    }
}

/// Health clamps at 100, or 250 while the megahealth rot timer runs.
pub fn bound_health(value: i32, items: ItemFlags) -> i32 {
    if items.contains(ItemFlags::SUPERHEALTH) {
        value.min(MAX_MEGAHEALTH)
    } else {
        value.min(MAX_HEALTH)
    }
}

impl ClientStats {
    pub fn ammo_of(&self, kind: AmmoKind) -> i32 {
        match kind {
            AmmoKind::Shells => self.shells,
            AmmoKind::Nails => self.nails,
            AmmoKind::Rockets => self.rockets,
            AmmoKind::Cells => self.cells,
        }
    }

    pub fn ammo_of_mut(&mut self, kind: AmmoKind) -> &mut i32 {
        match kind {
            AmmoKind::Shells => &mut self.shells,
            AmmoKind::Nails => &mut self.nails,
            AmmoKind::Rockets => &mut self.rockets,
            AmmoKind::Cells => &mut self.cells,
        }
    }
}

fn reduction_value(items: ItemFlags) -> f32 {
    if items.contains(ItemFlags::ARMOR_1) {
        0.3
    } else if items.contains(ItemFlags::ARMOR_2) {
        0.6
    } else if items.contains(ItemFlags::ARMOR_3) {
        0.8
    } else {
        0.0
    }
}

/// The fraction of incoming damage absorbed by armor. At most one armor
/// flag may be set.
pub fn damage_reduction(items: ItemFlags) -> Result<f32, StatsError> {
    let armor_flags = (items & ItemFlags::ANY_ARMOR).bits().count_ones();
    if armor_flags > 1 {
        return Err(StatsError::invariant(format!(
            "more than one armor flag set: {:?}",
            items & ItemFlags::ANY_ARMOR
        )));
    }
    Ok(reduction_value(items))
}

/// Bounds on the armor lost to a damage message whose total was rounded up
/// to `damage_ceiled`.
pub fn lost_armor_bounds(damage_ceiled: i32, armor: i32, reduction: f32) -> (i32, i32) {
    let damage_floored = damage_ceiled - 1;
    let lower = armor.min((reduction * damage_floored as f32).ceil() as i32);
    let upper = armor.min((reduction * damage_ceiled as f32).ceil() as i32);
    (lower, upper)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CollectSound {
    Health15,
    Health25,
    Health100,
    Armor,
    Ammo,
    Weapon,
}

impl CollectSound {
    pub const ALL: [CollectSound; 6] = [
        CollectSound::Health15,
        CollectSound::Health25,
        CollectSound::Health100,
        CollectSound::Armor,
        CollectSound::Ammo,
        CollectSound::Weapon,
    ];

    pub fn wav(self) -> &'static [u8] {
        match self {
            CollectSound::Health15 => b"items/r_item1.wav",
            CollectSound::Health25 => b"items/health1.wav",
            CollectSound::Health100 => b"items/r_item2.wav",
            CollectSound::Armor => b"items/armor1.wav",
            CollectSound::Ammo => b"weapons/lock4.wav",
            CollectSound::Weapon => b"weapons/pkup.wav",
        }
    }

    pub fn from_wav(name: &[u8]) -> Option<CollectSound> {
        CollectSound::ALL.iter().copied().find(|s| s.wav() == name)
    }
}

/// One element of a pickup's effect on the player.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Give {
    Health(i32),
    Ammo(AmmoKind, i32),
    Armor(i32),
    Item(ItemFlags),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CollectableKind {
    Health15,
    Health25,
    Megahealth,
    Shells20,
    Shells40,
    Nails25,
    Nails50,
    Rockets5,
    Rockets10,
    Cells6,
    Cells12,
    GreenArmor,
    YellowArmor,
    RedArmor,
    SuperShotgun,
    Nailgun,
    SuperNailgun,
    GrenadeLauncher,
    RocketLauncher,
    Thunderbolt,
    Backpack,
}

const BOX_MINS: [f32; 3] = [0.0, 0.0, 0.0];
const BOX_MAXS: [f32; 3] = [32.0, 32.0, 56.0];
const ITEM_MINS: [f32; 3] = [-16.0, -16.0, 0.0];
const ITEM_MAXS: [f32; 3] = [16.0, 16.0, 56.0];

impl CollectableKind {
    /// What the pickup grants. Backpack contents are per-instance and live
    /// on the [`Collection`] instead.
    pub fn gives(self) -> &'static [Give] {
        use CollectableKind::*;
        match self {
            Health15 => &[Give::Health(15)],
            Health25 => &[Give::Health(25)],
            Megahealth => &[Give::Item(ItemFlags::SUPERHEALTH), Give::Health(100)],
            Shells20 => &[Give::Ammo(AmmoKind::Shells, 20)],
            Shells40 => &[Give::Ammo(AmmoKind::Shells, 40)],
            Nails25 => &[Give::Ammo(AmmoKind::Nails, 25)],
            Nails50 => &[Give::Ammo(AmmoKind::Nails, 50)],
            Rockets5 => &[Give::Ammo(AmmoKind::Rockets, 5)],
            Rockets10 => &[Give::Ammo(AmmoKind::Rockets, 10)],
            Cells6 => &[Give::Ammo(AmmoKind::Cells, 6)],
            Cells12 => &[Give::Ammo(AmmoKind::Cells, 12)],
            GreenArmor => &[Give::Item(ItemFlags::ARMOR_1), Give::Armor(100)],
            YellowArmor => &[Give::Item(ItemFlags::ARMOR_2), Give::Armor(150)],
            RedArmor => &[Give::Item(ItemFlags::ARMOR_3), Give::Armor(200)],
            SuperShotgun => &[
                Give::Item(ItemFlags::SUPER_SHOTGUN),
                Give::Ammo(AmmoKind::Shells, 5),
            ],
            Nailgun => &[
                Give::Item(ItemFlags::NAILGUN),
                Give::Ammo(AmmoKind::Nails, 30),
            ],
            SuperNailgun => &[
                Give::Item(ItemFlags::SUPER_NAILGUN),
                Give::Ammo(AmmoKind::Nails, 30),
            ],
            GrenadeLauncher => &[
                Give::Item(ItemFlags::GRENADE_LAUNCHER),
                Give::Ammo(AmmoKind::Rockets, 5),
            ],
            RocketLauncher => &[
                Give::Item(ItemFlags::ROCKET_LAUNCHER),
                Give::Ammo(AmmoKind::Rockets, 5),
            ],
            Thunderbolt => &[
                Give::Item(ItemFlags::LIGHTNING),
                Give::Ammo(AmmoKind::Cells, 15),
            ],
            Backpack => &[],
        }
    }

    pub fn collect_sound(self) -> CollectSound {
        use CollectableKind::*;
        match self {
            Health15 => CollectSound::Health15,
            Health25 => CollectSound::Health25,
            Megahealth => CollectSound::Health100,
            GreenArmor | YellowArmor | RedArmor => CollectSound::Armor,
            Shells20 | Shells40 | Nails25 | Nails50 | Rockets5 | Rockets10 | Cells6 | Cells12
            | Backpack => CollectSound::Ammo,
            SuperShotgun | Nailgun | SuperNailgun | GrenadeLauncher | RocketLauncher
            | Thunderbolt => CollectSound::Weapon,
        }
    }

    pub fn mins(self) -> [f32; 3] {
        use CollectableKind::*;
        match self {
            Health15 | Health25 | Megahealth | Shells20 | Shells40 | Nails25 | Nails50
            | Rockets5 | Rockets10 | Cells6 | Cells12 => BOX_MINS,
            _ => ITEM_MINS,
        }
    }

    pub fn maxs(self) -> [f32; 3] {
        use CollectableKind::*;
        match self {
            Health15 | Health25 | Megahealth | Shells20 | Shells40 | Nails25 | Nails50
            | Rockets5 | Rockets10 | Cells6 | Cells12 => BOX_MAXS,
            _ => ITEM_MAXS,
        }
    }

    pub fn print_text(self) -> &'static [u8] {
        use CollectableKind::*;
        match self {
            Health15 => b"You receive 15 health\n",
            Health25 => b"You receive 25 health\n",
            Megahealth => b"You receive 100 health\n",
            Shells20 | Shells40 => b"You got the shells\n",
            Nails25 | Nails50 => b"You got the nails\n",
            Rockets5 | Rockets10 => b"You got the rockets\n",
            Cells6 | Cells12 => b"You got the cells\n",
            GreenArmor | YellowArmor | RedArmor => b"You got armor\n",
            SuperShotgun => b"You got the Double-barrelled Shotgun\n",
            Nailgun => b"You got the nailgun\n",
            SuperNailgun => b"You got the Super Nailgun\n",
            GrenadeLauncher => b"You got the Grenade Launcher\n",
            RocketLauncher => b"You got the Rocket Launcher\n",
            Thunderbolt => b"You got the Thunderbolt\n",
            Backpack => b"",
        }
    }

    pub fn will_collect(self, stats: &ClientStats, is_coop: bool) -> bool {
        use CollectableKind::*;
        let owned = |flag| stats.items.contains(flag);
        match self {
            Health15 | Health25 => stats.health < MAX_HEALTH,
            Megahealth | Backpack => true,
            Shells20 | Shells40 => stats.shells < MAX_SHELLS,
            Nails25 | Nails50 => stats.nails < MAX_NAILS,
            Rockets5 | Rockets10 => stats.rockets < MAX_ROCKETS,
            Cells6 | Cells12 => stats.cells < MAX_CELLS,
            GreenArmor => armor_upgrade(ItemFlags::ARMOR_1, 100, stats),
            YellowArmor => armor_upgrade(ItemFlags::ARMOR_2, 150, stats),
            RedArmor => armor_upgrade(ItemFlags::ARMOR_3, 200, stats),
            SuperShotgun => !is_coop || !owned(ItemFlags::SUPER_SHOTGUN),
            Nailgun => !is_coop || !owned(ItemFlags::NAILGUN),
            SuperNailgun => !is_coop || !owned(ItemFlags::SUPER_NAILGUN),
            GrenadeLauncher => !is_coop || !owned(ItemFlags::GRENADE_LAUNCHER),
            RocketLauncher => !is_coop || !owned(ItemFlags::ROCKET_LAUNCHER),
            Thunderbolt => !is_coop || !owned(ItemFlags::LIGHTNING),
        }
    }

    /// Weapons stay in the world for the other players in co-op; everything
    /// else vanishes when collected.
    pub fn will_disappear(self, _stats: &ClientStats, is_coop: bool) -> bool {
        use CollectableKind::*;
        match self {
            SuperShotgun | Nailgun | SuperNailgun | GrenadeLauncher | RocketLauncher
            | Thunderbolt => !is_coop,
            _ => true,
        }
    }

    pub fn bounds(self, origin: Vector3<f32>) -> Bounds {
        collision::collectable_bounds(origin, self.mins(), self.maxs())
    }

    pub fn pickup_health(self) -> i32 {
        self.gives()
            .iter()
            .map(|g| match g {
                Give::Health(v) => *v,
                _ => 0,
            })
            .sum()
    }

    pub fn pickup_ammo(self, kind: AmmoKind) -> i32 {
        self.gives()
            .iter()
            .map(|g| match g {
                Give::Ammo(k, v) if *k == kind => *v,
                _ => 0,
            })
            .sum()
    }

    pub fn pickup_armor(self) -> i32 {
        self.gives()
            .iter()
            .map(|g| match g {
                Give::Armor(v) => *v,
                _ => 0,
            })
            .sum()
    }

    pub fn pickup_items(self) -> ItemFlags {
        let mut flags = ItemFlags::empty();
        for give in self.gives() {
            if let Give::Item(f) = give {
                flags |= *f;
            }
        }
        flags
    }
}

fn armor_upgrade(flag: ItemFlags, value: i32, stats: &ClientStats) -> bool {
    reduction_value(flag) * value as f32 >= reduction_value(stats.items) * stats.armor as f32
}

/// Maps a precached model name (and armor skin) to its pickup kind.
pub fn kind_for_model(
    model: &[u8],
    skin: u8,
) -> Result<Option<CollectableKind>, StatsError> {
    use CollectableKind::*;
    let kind = match model {
        b"progs/armor.mdl" => match skin {
            0 => GreenArmor,
            1 => YellowArmor,
            2 => RedArmor,
            _ => return Err(StatsError::UnknownArmorSkin(skin)),
        },
        b"maps/b_bh10.bsp" => Health15,
        b"maps/b_bh25.bsp" => Health25,
        b"maps/b_bh100.bsp" => Megahealth,
        b"maps/b_shell0.bsp" => Shells20,
        b"maps/b_shell1.bsp" => Shells40,
        b"maps/b_nail0.bsp" => Nails25,
        b"maps/b_nail1.bsp" => Nails50,
        b"maps/b_rock0.bsp" => Rockets5,
        b"maps/b_rock1.bsp" => Rockets10,
        b"maps/b_batt0.bsp" => Cells6,
        b"maps/b_batt1.bsp" => Cells12,
        b"progs/g_shot.mdl" => SuperShotgun,
        b"progs/g_nail.mdl" => Nailgun,
        b"progs/g_nail2.mdl" => SuperNailgun,
        b"progs/g_rock.mdl" => GrenadeLauncher,
        b"progs/g_rock2.mdl" => RocketLauncher,
        b"progs/g_light.mdl" => Thunderbolt,
        _ => return Ok(None),
    };
    Ok(Some(kind))
}

pub fn is_collectable_model(model: &[u8]) -> bool {
    matches!(
        model,
        b"progs/armor.mdl"
            | b"maps/b_bh10.bsp"
            | b"maps/b_bh25.bsp"
            | b"maps/b_bh100.bsp"
            | b"maps/b_shell0.bsp"
            | b"maps/b_shell1.bsp"
            | b"maps/b_nail0.bsp"
            | b"maps/b_nail1.bsp"
            | b"maps/b_rock0.bsp"
            | b"maps/b_rock1.bsp"
            | b"maps/b_batt0.bsp"
            | b"maps/b_batt1.bsp"
            | b"progs/g_shot.mdl"
            | b"progs/g_nail.mdl"
            | b"progs/g_nail2.mdl"
            | b"progs/g_rock.mdl"
            | b"progs/g_rock2.mdl"
            | b"progs/g_light.mdl"
    )
}

pub const BACKPACK_MODEL: &[u8] = b"progs/backpack.mdl";

pub(crate) fn parse_int(digits: &[u8]) -> Option<i32> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// The ammo family, cooldown, and view model of each carriable weapon.
pub fn ammo_for_active_weapon(stats: &ClientStats) -> Result<(ItemFlags, i32), StatsError> {
    let weapon = stats.active_weapon;
    if weapon == ItemFlags::AXE_ACTIVE {
        Ok((ItemFlags::empty(), 0))
    } else if weapon == ItemFlags::SHOTGUN || weapon == ItemFlags::SUPER_SHOTGUN {
        Ok((ItemFlags::SHELLS, stats.shells))
    } else if weapon == ItemFlags::NAILGUN || weapon == ItemFlags::SUPER_NAILGUN {
        Ok((ItemFlags::NAILS, stats.nails))
    } else if weapon == ItemFlags::GRENADE_LAUNCHER || weapon == ItemFlags::ROCKET_LAUNCHER {
        Ok((ItemFlags::ROCKETS, stats.rockets))
    } else if weapon == ItemFlags::LIGHTNING {
        Ok((ItemFlags::CELLS, stats.cells))
    } else {
        Err(StatsError::UnknownActiveWeapon(weapon.bits()))
    }
}

pub fn weapon_cooldown(stats: &ClientStats) -> Result<f64, StatsError> {
    let weapon = stats.active_weapon;
    if weapon == ItemFlags::AXE_ACTIVE || weapon == ItemFlags::SHOTGUN {
        Ok(0.5)
    } else if weapon == ItemFlags::SUPER_SHOTGUN {
        Ok(0.7)
    } else if weapon == ItemFlags::NAILGUN || weapon == ItemFlags::SUPER_NAILGUN {
        Ok(0.2)
    } else if weapon == ItemFlags::GRENADE_LAUNCHER {
        Ok(0.6)
    } else if weapon == ItemFlags::ROCKET_LAUNCHER {
        Ok(0.8)
    } else if weapon == ItemFlags::LIGHTNING {
        Ok(0.1)
    } else {
        Err(StatsError::UnknownActiveWeapon(weapon.bits()))
    }
}

pub fn weapon_model_path(stats: &ClientStats) -> Result<&'static [u8], StatsError> {
    let weapon = stats.active_weapon;
    if weapon == ItemFlags::AXE_ACTIVE {
        Ok(b"progs/v_axe.mdl")
    } else if weapon == ItemFlags::SHOTGUN {
        Ok(b"progs/v_shot.mdl")
    } else if weapon == ItemFlags::SUPER_SHOTGUN {
        Ok(b"progs/v_shot2.mdl")
    } else if weapon == ItemFlags::NAILGUN {
        Ok(b"progs/v_nail.mdl")
    } else if weapon == ItemFlags::SUPER_NAILGUN {
        Ok(b"progs/v_nail2.mdl")
    } else if weapon == ItemFlags::GRENADE_LAUNCHER {
        Ok(b"progs/v_rock.mdl")
    } else if weapon == ItemFlags::ROCKET_LAUNCHER {
        Ok(b"progs/v_rock2.mdl")
    } else if weapon == ItemFlags::LIGHTNING {
        Ok(b"progs/v_light.mdl")
    } else {
        Err(StatsError::UnknownActiveWeapon(weapon.bits()))
    }
}

/// The engine's auto-switch priority when the current weapon runs dry.
pub fn best_active_weapon(stats: &ClientStats) -> ItemFlags {
    if stats.cells >= 1 && stats.items.contains(ItemFlags::LIGHTNING) {
        ItemFlags::LIGHTNING
    } else if stats.nails >= 2 && stats.items.contains(ItemFlags::SUPER_NAILGUN) {
        ItemFlags::SUPER_NAILGUN
    } else if stats.shells >= 2 && stats.items.contains(ItemFlags::SUPER_SHOTGUN) {
        ItemFlags::SUPER_SHOTGUN
    } else if stats.nails >= 1 && stats.items.contains(ItemFlags::NAILGUN) {
        ItemFlags::NAILGUN
    } else if stats.shells >= 1 && stats.items.contains(ItemFlags::SHOTGUN) {
        ItemFlags::SHOTGUN
    } else {
        ItemFlags::AXE_ACTIVE
    }
}

/// A pickup sound paired with where and when it happened.
#[derive(Clone, Debug, PartialEq)]
pub struct SoundEvent {
    pub block_index: usize,
    pub sound_id: u16,
    pub origin: Vector3<f32>,
    pub sound: CollectSound,
}

/// A pickup print flow, flushed by the screen-flash stufftext.
#[derive(Clone, Debug, PartialEq)]
pub struct PrintEvent {
    pub block_index: usize,
    pub text: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollectEvent {
    pub sound: SoundEvent,
    pub print: PrintEvent,
}

/// One pickup: observed (carries its wire events) or reconstructed.
#[derive(Clone, Debug)]
pub struct Collection {
    pub entity_num: i16,
    pub kind: CollectableKind,
    /// Parsed backpack contents; empty for static collectables.
    pub contents: Vec<Give>,
    pub event: Option<CollectEvent>,
    /// Server time at which the pickup consumed the entity; +inf for co-op
    /// weapons that stay in the world.
    pub time: f64,
}

impl Collection {
    pub fn gives(&self) -> &[Give] {
        match self.kind {
            CollectableKind::Backpack => &self.contents,
            kind => kind.gives(),
        }
    }

    pub fn pickup_health(&self) -> i32 {
        self.gives()
            .iter()
            .map(|g| match g {
                Give::Health(v) => *v,
                _ => 0,
            })
            .sum()
    }

    pub fn pickup_ammo(&self, kind: AmmoKind) -> i32 {
        self.gives()
            .iter()
            .map(|g| match g {
                Give::Ammo(k, v) if *k == kind => *v,
                _ => 0,
            })
            .sum()
    }

    pub fn pickup_armor(&self) -> i32 {
        self.gives()
            .iter()
            .map(|g| match g {
                Give::Armor(v) => *v,
                _ => 0,
            })
            .sum()
    }

    pub fn pickup_items(&self) -> ItemFlags {
        let mut flags = ItemFlags::empty();
        for give in self.gives() {
            if let Give::Item(f) = give {
                flags |= *f;
            }
        }
        flags
    }
}

/// Per-block collection lists for one demo.
pub type BlockCollections = Vec<Vec<Collection>>;

/// Replays each demo under new starting stats and reconciles every on-wire
/// pickup event with the recomputed outcome.
pub fn apply_new_start_stats(
    start_stats: &[ClientStats],
    demos: &mut [Demo],
    is_coop: bool,
) -> Result<(), StatsError> {
    let mut old_statics = Vec::with_capacity(demos.len());
    let mut backpacks = Vec::with_capacity(demos.len());
    for demo in demos.iter() {
        let (statics, packs) = collect::get_collections(demo)?;
        old_statics.push(statics);
        backpacks.push(packs);
    }

    let new_collections =
        rebuild::rebuild_stats(start_stats, demos, &old_statics, &backpacks, is_coop)?;
    fixup::fix_collection_events(&old_statics, &new_collections, demos)
}

/// Grants episode runes by ORing their sigil bits into every ClientData
/// message.
pub fn add_runes(demo: &mut Demo, rune_nums: &[u8]) -> Result<(), StatsError> {
    let mut rune_flags = ItemFlags::empty();
    for num in rune_nums {
        rune_flags |= match num {
            1 => ItemFlags::SIGIL_1,
            2 => ItemFlags::SIGIL_2,
            3 => ItemFlags::SIGIL_3,
            4 => ItemFlags::SIGIL_4,
            other => {
                return Err(StatsError::invariant(format!("unknown rune {}", other)));
            }
        };
    }

    for block in demo.blocks.iter_mut() {
        for message in block.messages.iter_mut() {
            if let crate::net::ServerCmd::ClientData(data) = message {
                data.items |= rune_flags;
            }
        }
    }
    Ok(())
}
