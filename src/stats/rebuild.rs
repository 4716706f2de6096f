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

//! Replays the per-frame stat evolution of one or more co-op demos under
//! new starting stats, interleaving players by server time and deciding
//! which pickups, losses and weapon switches actually happen.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;

use crate::demo::ClientStats;
use crate::demo::Demo;
use crate::net::ItemFlags;
use crate::stats::collect;
use crate::stats::ammo_for_active_weapon;
use crate::stats::best_active_weapon;
use crate::stats::bound_health;
use crate::stats::damage_reduction;
use crate::stats::lost_armor_bounds;
use crate::stats::weapon_cooldown;
use crate::stats::weapon_model_path;
use crate::stats::AmmoKind;
use crate::stats::BlockCollections;
use crate::stats::CollectableKind;
use crate::stats::Collection;
use crate::stats::StatsError;
use crate::stats::MIN_HEALTH;

use log::warn;

/// Slack added to the weapon cooldown before an out-of-ammo auto-switch is
/// allowed to fire. Heuristic, tuned against real demos.
const SWITCH_DELAY_SLACK: f64 = 0.1 + 1.0 / 72.0;

/// Decides when the engine's out-of-ammo auto-switch changes the active
/// weapon during the replay.
pub struct ActiveWeaponManager {
    time_switch_required: Vec<f64>,
    warned: Vec<bool>,
}

impl ActiveWeaponManager {
    pub fn new(num_players: usize) -> ActiveWeaponManager {
        ActiveWeaponManager {
            time_switch_required: vec![f64::INFINITY; num_players],
            warned: vec![false; num_players],
        }
    }

    fn disable_switch(&mut self, player: usize) {
        self.warned[player] = false;
        self.time_switch_required[player] = f64::INFINITY;
    }

    fn enable_switch(
        &mut self,
        player: usize,
        stats: &ClientStats,
        time: f64,
    ) -> Result<(), StatsError> {
        let deadline = time + weapon_cooldown(stats)? + SWITCH_DELAY_SLACK;
        if deadline < self.time_switch_required[player] {
            self.time_switch_required[player] = deadline;
        }
        Ok(())
    }

    /// The weapon to arm on the very first emitted frame: the recorded one,
    /// unless it has no ammo under the new stats.
    pub fn first_active_weapon(stats: &ClientStats) -> Result<ItemFlags, StatsError> {
        let (ammo_flag, ammo) = ammo_for_active_weapon(stats)?;
        if ammo_flag != ItemFlags::empty() && ammo <= 0 {
            let start_weapon = best_active_weapon(stats);
            warn!(
                "no ammo for start weapon: switching from {:?} to {:?}",
                stats.active_weapon, start_weapon
            );
            return Ok(start_weapon);
        }
        Ok(stats.active_weapon)
    }

    pub fn active_weapon(
        &mut self,
        player: usize,
        stats: &ClientStats,
        old_stats: &ClientStats,
        time: f64,
    ) -> Result<ItemFlags, StatsError> {
        let (ammo_flag, ammo) = ammo_for_active_weapon(stats)?;
        let (_, ammo_old) = ammo_for_active_weapon(old_stats)?;
        if ammo_flag != ItemFlags::empty() && ammo <= 0 {
            self.enable_switch(player, stats, time)?;
            if time >= self.time_switch_required[player] {
                if ammo_old <= 0 {
                    return Err(StatsError::invariant(format!(
                        "auto-switch at time {} but the original was already dry",
                        time
                    )));
                }
                if stats.weapon_frame != 0 {
                    return Err(StatsError::invariant(format!(
                        "auto-switch at time {} mid weapon animation",
                        time
                    )));
                }
                let next_weapon = best_active_weapon(stats);
                if !self.warned[player] {
                    self.warned[player] = true;
                    warn!(
                        "out of ammo: switching from {:?} to {:?} at time {}",
                        stats.active_weapon, next_weapon, time
                    );
                }
                return Ok(next_weapon);
            }
        } else {
            self.disable_switch(player);
        }
        Ok(stats.active_weapon)
    }
}

/// Checks a damage message against the armor arithmetic, compensating for
/// blood totals above 255 wrapping in the byte-sized wire field.
fn verify_damage_message(
    damage: &mut (i32, i32),
    armor: i32,
    reduction: f32,
    block: usize,
) -> Result<(), StatsError> {
    let (lost_armor, ref mut blood) = *damage;
    let mut damage_ceiled = *blood + lost_armor;
    if reduction == 0.0 {
        if *blood != damage_ceiled {
            return Err(StatsError::DamageArithmetic { block });
        }
        return Ok(());
    }

    let (mut lower, mut upper) = lost_armor_bounds(damage_ceiled, armor, reduction);
    if lost_armor > upper {
        // more than 255 points of damage wrap around in the blood byte;
        // armor is unaffected since it caps at 200
        *blood += 256;
        damage_ceiled += 256;
        let bounds = lost_armor_bounds(damage_ceiled, armor, reduction);
        lower = bounds.0;
        upper = bounds.1;
    }
    if lost_armor < lower || lost_armor > upper {
        return Err(StatsError::DamageArithmetic { block });
    }
    let blood_lower = damage_ceiled - upper;
    let blood_upper = damage_ceiled - lower;
    if *blood < blood_lower || *blood > blood_upper {
        return Err(StatsError::DamageArithmetic { block });
    }
    Ok(())
}

/// Replays every demo block by block in global time order, evolving each
/// player's stats from `start_stats` and returning the collections that
/// actually happen under the new state. The recomputed stats are written
/// back into the demos' ClientData messages.
pub fn rebuild_stats(
    start_stats: &[ClientStats],
    demos: &mut [Demo],
    old_static_collections: &[BlockCollections],
    backpack_collections: &[BlockCollections],
    is_coop: bool,
) -> Result<Vec<BlockCollections>, StatsError> {
    if start_stats.len() != demos.len()
        || old_static_collections.len() != demos.len()
        || backpack_collections.len() != demos.len()
    {
        return Err(StatsError::invariant(
            "per-player inputs disagree on the player count".to_owned(),
        ));
    }
    let num_players = demos.len();

    let (models_precache, _) = demos[0].get_precaches()?;
    let statics: BTreeMap<i16, CollectableKind> =
        collect::get_static_collectables(&demos[0], &models_precache)?;

    let mut times: Vec<Vec<f64>> = Vec::with_capacity(num_players);
    let mut damage: Vec<Vec<(i32, i32)>> = Vec::with_capacity(num_players);
    let mut possible: Vec<Vec<Vec<i16>>> = Vec::with_capacity(num_players);
    let mut old_stats_lists: Vec<Vec<Option<ClientStats>>> = Vec::with_capacity(num_players);
    for (player, demo) in demos.iter().enumerate() {
        let mut player_times = demo.get_time()?;
        player_times.push(f64::INFINITY);
        times.push(player_times);
        damage.push(collect::get_damage(demo)?);
        possible.push(collect::get_possible_collections(
            demo,
            &statics,
            &old_static_collections[player],
        )?);
        old_stats_lists.push(demo.get_client_stats()?);
    }

    let mut cursor = vec![0usize; num_players];
    let mut old_previous: Vec<Option<ClientStats>> = vec![None; num_players];
    let mut working: Vec<ClientStats> = start_stats.to_vec();
    let mut emitted: Vec<Vec<Option<ClientStats>>> = vec![Vec::new(); num_players];
    let mut actual: Vec<BlockCollections> = demos
        .iter()
        .map(|d| vec![Vec::new(); d.blocks.len()])
        .collect();
    let mut time_consumed: HashMap<i16, f64> =
        statics.keys().map(|num| (*num, f64::INFINITY)).collect();
    let mut consumed_in_original: HashSet<i16> = HashSet::new();
    let mut weapon_manager = ActiveWeaponManager::new(num_players);

    while cursor
        .iter()
        .zip(demos.iter())
        .any(|(i, d)| *i < d.blocks.len())
    {
        // advance the player whose next block is earliest, breaking ties by
        // player index
        let mut player = 0;
        for p in 1..num_players {
            if times[p][cursor[p]] < times[player][cursor[player]] {
                player = p;
            }
        }

        let i = cursor[player];
        cursor[player] += 1;
        let time = times[player][i];

        let old_stats = match &old_stats_lists[player][i] {
            Some(stats) => stats.clone(),
            None => {
                emitted[player].push(None);
                continue;
            }
        };
        let old_prev = old_previous[player].clone().unwrap_or_else(|| old_stats.clone());
        let stats = &mut working[player];

        // damage application
        let old_lost_armor = damage[player][i].0;
        if old_static_collections[player][i]
            .iter()
            .all(|c| c.pickup_armor() == 0)
            && old_prev.armor - old_stats.armor != old_lost_armor
        {
            return Err(StatsError::invariant(format!(
                "block {}: armor loss disagrees with the damage message",
                i
            )));
        }

        let old_reduction = damage_reduction(old_prev.items)?;
        verify_damage_message(&mut damage[player][i], old_prev.armor, old_reduction, i)?;
        let (dmg_armor, dmg_blood) = damage[player][i];
        let old_damage_ceiled = dmg_blood + dmg_armor;

        let old_collected_health: i32 = old_static_collections[player][i]
            .iter()
            .map(|c| c.pickup_health())
            .sum();
        let old_health_before_loss =
            bound_health(old_prev.health + old_collected_health, old_stats.items);
        let old_lost_health = old_health_before_loss - old_stats.health;
        if old_lost_health < 0 {
            return Err(StatsError::invariant(format!(
                "block {}: health increased more than its pickups allow",
                i
            )));
        }

        let new_reduction = damage_reduction(stats.items)?;
        if old_damage_ceiled == 0
            || (old_reduction == new_reduction
                && (old_lost_armor == 0
                    || (old_lost_armor != old_prev.armor && old_lost_armor <= stats.armor)))
        {
            stats.armor -= old_lost_armor;
            stats.health -= old_lost_health;
        } else {
            let (lower, upper) = lost_armor_bounds(old_damage_ceiled, stats.armor, new_reduction);
            if lower != upper {
                warn!(
                    "block {}: health/armor reconstruction might be inaccurate",
                    i
                );
            }
            let lost_armor = upper;
            stats.armor -= lost_armor;
            // only fully ignored or fully applied damage can be replayed
            if old_lost_health != 0 && old_lost_health != dmg_blood {
                return Err(StatsError::DamageArithmetic { block: i });
            }
            if old_lost_health != 0 {
                stats.health -= old_damage_ceiled - lost_armor;
            }
        }

        if stats.armor == 0 {
            stats.items &= !ItemFlags::ANY_ARMOR;
        }
        if stats.health < MIN_HEALTH {
            warn!("block {}: health fell to {}", i, stats.health);
        }
        if stats.armor < 0 {
            return Err(StatsError::NegativeStat {
                block: i,
                stat: "armor",
            });
        }

        // ammo losses mirror the original, adjusted for its pickups
        for kind in AmmoKind::ALL {
            let collected: i32 = old_static_collections[player][i]
                .iter()
                .chain(backpack_collections[player][i].iter())
                .map(|c| c.pickup_ammo(kind))
                .sum();
            let old_before_loss = kind.bound(old_prev.ammo_of(kind) + collected);
            let lost = old_before_loss - old_stats.ammo_of(kind);
            if lost < 0 {
                return Err(StatsError::invariant(format!(
                    "block {}: {} increased more than their pickups allow",
                    i,
                    kind.name()
                )));
            }
            *stats.ammo_of_mut(kind) -= lost;
            if stats.ammo_of(kind) < 0 {
                return Err(StatsError::NegativeStat {
                    block: i,
                    stat: kind.name(),
                });
            }
            if lost > 0 {
                let (active_flag, _) = ammo_for_active_weapon(&old_stats)?;
                if active_flag != kind.item_flag() {
                    return Err(StatsError::invariant(format!(
                        "block {}: {} were spent outside the active weapon's family",
                        i,
                        kind.name()
                    )));
                }
            }
        }

        // decide pickups reachable at this frame
        for num in possible[player][i].iter().copied() {
            let kind = statics[&num];
            let picked_up_in_original = old_static_collections[player][i]
                .iter()
                .any(|c| c.entity_num == num);
            if picked_up_in_original && kind.will_disappear(stats, is_coop) {
                consumed_in_original.insert(num);
            }
            if kind.will_collect(stats, is_coop) && time_consumed[&num] > time {
                let already_consumed = consumed_in_original.contains(&num);
                if kind.will_collect(&old_prev, is_coop)
                    && !picked_up_in_original
                    && !already_consumed
                {
                    // something non-obvious kept the original from picking
                    // this up (e.g. the trapped nailgun on e1m3); trust the
                    // original over our box test
                    warn!(
                        "unknown why no pickup of entity {} happened in the original at time {}; \
                         not adding one",
                        num, time
                    );
                    continue;
                }

                let disappears = kind.will_disappear(stats, is_coop);
                actual[player][i].push(Collection {
                    entity_num: num,
                    kind,
                    contents: Vec::new(),
                    event: None,
                    time: if disappears { time } else { f64::INFINITY },
                });
                if disappears {
                    time_consumed.insert(num, time);
                }

                let pickup_items = kind.pickup_items();
                if !(pickup_items & ItemFlags::ANY_ARMOR).is_empty() {
                    // two armor flags at once would be invalid
                    stats.items &= !ItemFlags::ANY_ARMOR;
                }
                stats.items |= pickup_items;

                stats.health = bound_health(stats.health + kind.pickup_health(), stats.items);
                for ammo_kind in AmmoKind::ALL {
                    let value = stats.ammo_of(ammo_kind) + kind.pickup_ammo(ammo_kind);
                    *stats.ammo_of_mut(ammo_kind) = ammo_kind.bound(value);
                }
                let collected_armor = kind.pickup_armor();
                if collected_armor > 0 {
                    stats.armor = collected_armor;
                }
            }
        }

        // backpack contents always apply
        for kind in AmmoKind::ALL {
            let from_packs: i32 = backpack_collections[player][i]
                .iter()
                .map(|c| c.pickup_ammo(kind))
                .sum();
            let value = stats.ammo_of(kind) + from_packs;
            *stats.ammo_of_mut(kind) = kind.bound(value);
        }

        // mirror item flag changes from the original timeline
        let added_items = old_stats.items & !old_prev.items;
        let removed_items = !old_stats.items & old_prev.items;
        stats.items |= added_items;
        stats.items &= !removed_items;

        stats.weapon_frame = old_stats.weapon_frame;
        stats.active_weapon = old_stats.active_weapon;
        stats.active_weapon = if !emitted[player].iter().any(|s| s.is_some()) {
            ActiveWeaponManager::first_active_weapon(stats)?
        } else {
            weapon_manager.active_weapon(player, stats, &old_stats, time)?
        };

        let model_path = weapon_model_path(stats)?;
        stats.weapon_model = models_precache
            .iter()
            .position(|m| m.as_slice() == model_path)
            .ok_or_else(|| {
                StatsError::ModelNotPrecached(String::from_utf8_lossy(model_path).into_owned())
            })? as u16;

        if (stats.weapon_model == old_stats.weapon_model)
            != (stats.active_weapon == old_stats.active_weapon)
        {
            return Err(StatsError::invariant(format!(
                "block {}: weapon model and active weapon disagree",
                i
            )));
        }
        if (stats.items & stats.active_weapon).is_empty()
            && stats.active_weapon != ItemFlags::AXE_ACTIVE
        {
            return Err(StatsError::invariant(format!(
                "block {}: active weapon is not owned",
                i
            )));
        }

        let (ammo_flag, ammo_value) = ammo_for_active_weapon(stats)?;
        stats.ammo = ammo_value;
        stats.items &= !ItemFlags::ANY_AMMO;
        stats.items |= ammo_flag;

        emitted[player].push(Some(stats.clone()));
        old_previous[player] = Some(old_stats);
    }

    for (demo, stats_list) in demos.iter_mut().zip(emitted.iter()) {
        demo.set_client_stats(stats_list);
    }

    Ok(actual)
}
