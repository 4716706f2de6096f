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

//! Observed-collection inference: correlates pickup sounds and print flows
//! with the collectable entities near the player to recover what was picked
//! up, when, and from which entity.

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::collision;
use crate::collision::Bounds;
use crate::demo::Demo;
use crate::net::ServerCmd;
use crate::net::UpdateFlags;
use crate::stats::kind_for_model;
use crate::stats::parse_int;
use crate::stats::AmmoKind;
use crate::stats::BlockCollections;
use crate::stats::CollectEvent;
use crate::stats::CollectSound;
use crate::stats::CollectableKind;
use crate::stats::Collection;
use crate::stats::Give;
use crate::stats::PrintEvent;
use crate::stats::SoundEvent;
use crate::stats::StatsError;
use crate::stats::BACKPACK_MODEL;

use cgmath::Vector3;
use lazy_static::lazy_static;
use regex::bytes::Regex;

/// A collectable that can be touched at a particular frame.
#[derive(Clone, Debug)]
pub struct ActiveCollectable {
    pub entity_num: i16,
    pub kind: CollectableKind,
    pub origin: Vector3<f32>,
}

impl ActiveCollectable {
    fn bounds(&self) -> Bounds {
        self.kind.bounds(self.origin)
    }
}

/// Scans spawn baselines for map-placed pickups. An entity update that
/// turns some other entity into a collectable is not supported.
pub fn get_static_collectables(
    demo: &Demo,
    models_precache: &[Vec<u8>],
) -> Result<BTreeMap<i16, CollectableKind>, StatsError> {
    let mut statics = BTreeMap::new();
    for block in demo.blocks.iter() {
        for message in block.messages.iter() {
            match message {
                ServerCmd::SpawnBaseline(baseline) => {
                    let model_name = models_precache
                        .get(baseline.model_index as usize)
                        .map(|m| m.as_slice())
                        .unwrap_or(b"");
                    if let Some(kind) = kind_for_model(model_name, baseline.skin)? {
                        if statics.insert(baseline.entity_num, kind).is_some() {
                            return Err(StatsError::DuplicateBaseline(baseline.entity_num));
                        }
                    }
                }
                ServerCmd::EntityUpdate(update) => {
                    if update.flags.contains(UpdateFlags::MODEL) {
                        let model_name = update
                            .model_index
                            .and_then(|idx| models_precache.get(idx as usize))
                            .map(|m| m.as_slice())
                            .unwrap_or(b"");
                        if crate::stats::is_collectable_model(model_name) {
                            return Err(StatsError::LateCollectable(update.entity_num));
                        }
                    }
                }
                _ => (),
            }
        }
    }
    Ok(statics)
}

/// Per-frame origin of each static collectable. Origins default to the
/// spawn baseline; a frame's entity update overrides the transmitted axes
/// for that frame only, and a model change banishes the entity to the NaN
/// void so nothing can touch it again.
pub fn get_static_collectable_origins(
    demo: &Demo,
    statics: &BTreeMap<i16, CollectableKind>,
) -> Result<BTreeMap<i16, Vec<Vector3<f32>>>, StatsError> {
    let num_blocks = demo.blocks.len();
    let mut origins: BTreeMap<i16, Vec<Vector3<f32>>> = BTreeMap::new();
    for (i, block) in demo.blocks.iter().enumerate() {
        for message in block.messages.iter() {
            match message {
                ServerCmd::SpawnBaseline(baseline) => {
                    if statics.contains_key(&baseline.entity_num) {
                        if origins.contains_key(&baseline.entity_num) {
                            return Err(StatsError::DuplicateBaseline(baseline.entity_num));
                        }
                        origins.insert(baseline.entity_num, vec![baseline.origin; num_blocks]);
                    }
                }
                ServerCmd::EntityUpdate(update) => {
                    if let Some(entity_origins) = origins.get_mut(&update.entity_num) {
                        let origin = &mut entity_origins[i];
                        if update.flags.contains(UpdateFlags::ORIGIN_X) {
                            origin.x = update.origin.x;
                        }
                        if update.flags.contains(UpdateFlags::ORIGIN_Y) {
                            origin.y = update.origin.y;
                        }
                        if update.flags.contains(UpdateFlags::ORIGIN_Z) {
                            origin.z = update.origin.z;
                        }
                        if update.flags.contains(UpdateFlags::MODEL) {
                            *origin = Vector3::new(f32::NAN, f32::NAN, f32::NAN);
                        }
                    }
                }
                _ => (),
            }
        }
    }
    Ok(origins)
}

/// Per-frame world-linked bounds for each static collectable.
pub fn get_static_collectable_bounds(
    statics: &BTreeMap<i16, CollectableKind>,
    origins: &BTreeMap<i16, Vec<Vector3<f32>>>,
) -> BTreeMap<i16, Vec<Bounds>> {
    origins
        .iter()
        .map(|(num, entity_origins)| {
            let kind = statics[num];
            let bounds = entity_origins.iter().map(|o| kind.bounds(*o)).collect();
            (*num, bounds)
        })
        .collect()
}

/// The set of static collectables touchable at each frame: those with an
/// entity update in the block, plus everything from the baselines on the
/// sign-on frame so instant unpause pickups resolve. Blocks without a
/// TimeMessage inherit the previous frame's set.
pub fn get_static_collectables_by_frame(
    demo: &Demo,
    statics: &BTreeMap<i16, CollectableKind>,
) -> Result<Vec<Vec<ActiveCollectable>>, StatsError> {
    let origins = get_static_collectable_origins(demo, statics)?;
    let mut by_frame: Vec<Vec<ActiveCollectable>> = vec![Vec::new(); demo.blocks.len()];

    for (i, block) in demo.blocks.iter().enumerate() {
        let mut has_entity_update = false;
        let mut has_anchor = false;
        for message in block.messages.iter() {
            match message {
                ServerCmd::SpawnBaseline(baseline) => {
                    has_anchor = true;
                    if let Some(kind) = statics.get(&baseline.entity_num) {
                        if i != 1 {
                            return Err(StatsError::invariant(format!(
                                "collectable baseline outside the sign-on block (block {})",
                                i
                            )));
                        }
                        by_frame[i].push(ActiveCollectable {
                            entity_num: baseline.entity_num,
                            kind: *kind,
                            origin: origins[&baseline.entity_num][i],
                        });
                    }
                }
                ServerCmd::EntityUpdate(update) => {
                    if let Some(kind) = statics.get(&update.entity_num) {
                        has_entity_update = true;
                        by_frame[i].push(ActiveCollectable {
                            entity_num: update.entity_num,
                            kind: *kind,
                            origin: origins[&update.entity_num][i],
                        });
                    }
                }
                ServerCmd::Time(_) => has_anchor = true,
                _ => (),
            }
        }

        if !has_anchor {
            if has_entity_update {
                return Err(StatsError::invariant(format!(
                    "collectable update in a block without a time message (block {})",
                    i
                )));
            }
            // intermediate frames answer queries as if they were the
            // preceding proper frame; frame 0 wraps around to the final
            // frame's list, which is still empty when it is visited
            let previous = if i == 0 { by_frame.len() - 1 } else { i - 1 };
            by_frame[i] = by_frame[previous].clone();
        }
    }
    Ok(by_frame)
}

/// Ammo backpacks visible at each frame, located from their entity updates
/// with baseline origins filling untransmitted axes.
pub fn get_backpacks_by_frame(
    demo: &Demo,
    models_precache: &[Vec<u8>],
) -> Vec<Vec<ActiveCollectable>> {
    let mut by_frame: Vec<Vec<ActiveCollectable>> = vec![Vec::new(); demo.blocks.len()];
    let mut baseline_origins: HashMap<i16, Vector3<f32>> = HashMap::new();
    for (i, block) in demo.blocks.iter().enumerate() {
        for message in block.messages.iter() {
            match message {
                ServerCmd::SpawnBaseline(baseline) => {
                    baseline_origins.insert(baseline.entity_num, baseline.origin);
                }
                ServerCmd::EntityUpdate(update) => {
                    let is_backpack = update
                        .model_index
                        .filter(|idx| *idx != 0)
                        .and_then(|idx| models_precache.get(idx as usize))
                        .map(|name| name.as_slice() == BACKPACK_MODEL)
                        .unwrap_or(false);
                    if !is_backpack {
                        continue;
                    }
                    let mut origin = baseline_origins
                        .get(&update.entity_num)
                        .copied()
                        .unwrap_or_else(|| Vector3::new(0.0, 0.0, 0.0));
                    if update.flags.contains(UpdateFlags::ORIGIN_X) {
                        origin.x = update.origin.x;
                    }
                    if update.flags.contains(UpdateFlags::ORIGIN_Y) {
                        origin.y = update.origin.y;
                    }
                    if update.flags.contains(UpdateFlags::ORIGIN_Z) {
                        origin.z = update.origin.z;
                    }
                    by_frame[i].push(ActiveCollectable {
                        entity_num: update.entity_num,
                        kind: CollectableKind::Backpack,
                        origin,
                    });
                }
                _ => (),
            }
        }
    }
    by_frame
}

/// Pickup sounds attached to the recording player.
pub fn get_collection_sounds(
    demo: &Demo,
    sounds_precache: &[Vec<u8>],
    viewentity: i16,
) -> Vec<SoundEvent> {
    let mut events = Vec::new();
    for (block_index, block) in demo.blocks.iter().enumerate() {
        for message in block.messages.iter() {
            if let ServerCmd::Sound(sound) = message {
                if sound.entity_id != viewentity as u16 {
                    continue;
                }
                let name = sounds_precache
                    .get(sound.sound_id as usize)
                    .map(|n| n.as_slice())
                    .unwrap_or(b"");
                if let Some(collect_sound) = CollectSound::from_wav(name) {
                    events.push(SoundEvent {
                        block_index,
                        sound_id: sound.sound_id,
                        origin: sound.position,
                        sound: collect_sound,
                    });
                }
            }
        }
    }
    events
}

const PRINT_PREFIXES: [&[u8]; 3] = [b"You get", b"You got", b"You receive"];

const IGNORED_PICKUPS: [&[u8]; 10] = [
    b"silver key",
    b"gold key",
    b"silver keycard",
    b"gold keycard",
    b"silver runekey",
    b"gold runekey",
    b"Quad Damage",
    b"Biosuit",
    b"Ring of Shadows",
    b"Pentagram of Protection",
];

/// Pickup print flows: a run of prints opened by a "You get/got/receive"
/// line and flushed by the screen-flash stufftext. Keys, runes and powerups
/// are not collectables and are skipped.
pub fn get_collection_prints(demo: &Demo) -> Result<Vec<PrintEvent>, StatsError> {
    let ignored: Vec<Vec<u8>> = IGNORED_PICKUPS
        .iter()
        .map(|item| {
            let mut text = b"You got the ".to_vec();
            text.extend_from_slice(item);
            text.push(b'\n');
            text
        })
        .collect();

    let mut events = Vec::new();
    let mut text: Vec<u8> = Vec::new();
    for (block_index, block) in demo.blocks.iter().enumerate() {
        for message in block.messages.iter() {
            match message {
                ServerCmd::Print(print) => {
                    if PRINT_PREFIXES.iter().any(|p| print.text.starts_with(p)) {
                        if !text.is_empty() {
                            return Err(StatsError::invariant(format!(
                                "overlapping pickup print flows at block {}",
                                block_index
                            )));
                        }
                        text.extend_from_slice(&print.text);
                    } else if !text.is_empty() {
                        text.extend_from_slice(&print.text);
                    }
                }
                ServerCmd::StuffText(stuff) => {
                    if stuff.text == b"bf\n" {
                        if !text.is_empty() && !ignored.iter().any(|t| *t == text) {
                            events.push(PrintEvent {
                                block_index,
                                text: text.clone(),
                            });
                        }
                        text.clear();
                    }
                }
                _ => (),
            }
        }
    }
    Ok(events)
}

/// Pairs pickup sounds with pickup prints one to one, in demo order.
pub fn get_collection_events(
    demo: &Demo,
    sounds_precache: &[Vec<u8>],
) -> Result<Vec<CollectEvent>, StatsError> {
    let viewentity = demo.get_viewentity()?;
    let sounds = get_collection_sounds(demo, sounds_precache, viewentity);
    let prints = get_collection_prints(demo)?;
    if sounds.len() != prints.len() {
        return Err(StatsError::EventPairing {
            sounds: sounds.len(),
            prints: prints.len(),
        });
    }
    Ok(sounds
        .into_iter()
        .zip(prints)
        .map(|(sound, print)| CollectEvent { sound, print })
        .collect())
}

/// The recording player's per-block position, +inf where the block carries
/// no update for the view entity.
pub fn get_client_positions(
    demo: &Demo,
    client_num: i16,
) -> Result<Vec<Vector3<f32>>, StatsError> {
    let mut positions = Vec::with_capacity(demo.blocks.len());
    for (i, block) in demo.blocks.iter().enumerate() {
        let mut position = None;
        for message in block.messages.iter() {
            if let ServerCmd::EntityUpdate(update) = message {
                if update.entity_num == client_num {
                    if position.is_some() {
                        return Err(StatsError::invariant(format!(
                            "multiple client updates in block {}",
                            i
                        )));
                    }
                    position = Some(update.origin);
                }
            }
        }
        positions.push(position.unwrap_or_else(|| {
            Vector3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY)
        }));
    }
    Ok(positions)
}

/// Sounds spawn at the center of the touching player's box (SV_StartSound),
/// but the transmitted origin is not exact, so allow some slack.
fn is_sound_from_client_position(client_origin: Vector3<f32>, sound_origin: Vector3<f32>) -> bool {
    let center = collision::player_center(client_origin);
    let mut max_diff = 0.0f32;
    for i in 0..3 {
        max_diff = max_diff.max((center[i] - sound_origin[i]).abs());
    }
    max_diff < 2.25
}

fn find_closest_collectable(
    client_origin: Vector3<f32>,
    actives: &[ActiveCollectable],
) -> Option<(usize, f32)> {
    let player = collision::player_bounds(client_origin);
    let mut closest = None;
    for (index, active) in actives.iter().enumerate() {
        let distance = collision::distance(&player, &active.bounds());
        match closest {
            Some((_, best)) if distance >= best => (),
            _ if distance.is_nan() => (),
            _ => closest = Some((index, distance)),
        }
    }
    closest
}

lazy_static! {
    static ref BACKPACK_RE: Regex = Regex::new(
        r"^You get (?:([1-9]\d*) shells)?(?:, )?(?:([1-9]\d*) nails)?(?:, )?(?:([1-9]\d*) rockets)?(?:, )?(?:([1-9]\d*) cells)?\n"
    )
    .unwrap();
}

/// Parses "You get N shells, M nails, ...\n" into its ammo gives.
pub fn parse_backpack_contents(text: &[u8]) -> Option<Vec<Give>> {
    let captures = BACKPACK_RE.captures(text)?;
    let mut gives = Vec::new();
    for (group, kind) in AmmoKind::ALL.iter().enumerate() {
        if let Some(m) = captures.get(group + 1) {
            gives.push(Give::Ammo(*kind, parse_int(m.as_bytes())?));
        }
    }
    Some(gives)
}

/// Correlates every pickup sound/print pair with the nearest matching
/// collectable, yielding per-block static and backpack collection lists.
pub fn get_collections(demo: &Demo) -> Result<(BlockCollections, BlockCollections), StatsError> {
    let (models_precache, sounds_precache) = demo.get_precaches()?;
    let viewentity = demo.get_viewentity()?;
    let events = get_collection_events(demo, &sounds_precache)?;
    let statics = get_static_collectables(demo, &models_precache)?;
    let mut statics_by_frame = get_static_collectables_by_frame(demo, &statics)?;
    let mut backpacks_by_frame = get_backpacks_by_frame(demo, &models_precache);
    let client_positions = get_client_positions(demo, viewentity)?;
    let times = demo.get_time()?;

    let mut static_collections: BlockCollections = vec![Vec::new(); demo.blocks.len()];
    let mut backpack_collections: BlockCollections = vec![Vec::new(); demo.blocks.len()];

    for event in events {
        let block_index = event.sound.block_index;
        let client_origin = client_positions[block_index];
        if !is_sound_from_client_position(client_origin, event.sound.origin) {
            return Err(StatsError::SoundPosition { block: block_index });
        }

        let previous = demo.get_previous_block_index_with_time_message(block_index);

        let mut closest_static: Option<(usize, f32)> = None;
        {
            let player = collision::player_bounds(client_origin);
            for (index, active) in statics_by_frame[previous].iter().enumerate() {
                if active.kind.collect_sound() != event.sound.sound {
                    continue;
                }
                let distance = collision::distance(&player, &active.bounds());
                match closest_static {
                    Some((_, best)) if !(distance < best) => (),
                    _ if distance.is_nan() => (),
                    _ => closest_static = Some((index, distance)),
                }
            }
        }

        let mut closest_backpack: Option<(usize, f32)> = None;
        if event.sound.sound == CollectSound::Ammo {
            closest_backpack =
                find_closest_collectable(client_origin, &backpacks_by_frame[previous]);
        }

        let static_distance = closest_static.map_or(f32::INFINITY, |(_, d)| d);
        let backpack_distance = closest_backpack.map_or(f32::INFINITY, |(_, d)| d);

        if static_distance < backpack_distance {
            let (index, distance) = match closest_static {
                Some(found) => found,
                None => {
                    return Err(StatsError::NoCandidate {
                        block: block_index,
                        distance: f32::INFINITY,
                    })
                }
            };
            if !(distance < 0.5) {
                return Err(StatsError::NoCandidate {
                    block: block_index,
                    distance,
                });
            }
            let active = statics_by_frame[previous].remove(index);
            if event.print.text != active.kind.print_text() {
                return Err(StatsError::PrintMismatch { block: block_index });
            }
            static_collections[block_index].push(Collection {
                entity_num: active.entity_num,
                kind: active.kind,
                contents: Vec::new(),
                event: Some(event),
                time: times[block_index],
            });
        } else {
            let (index, distance) = match closest_backpack {
                Some(found) => found,
                None => {
                    return Err(StatsError::NoCandidate {
                        block: block_index,
                        distance: f32::INFINITY,
                    })
                }
            };
            if !(distance < 0.5) {
                return Err(StatsError::NoCandidate {
                    block: block_index,
                    distance,
                });
            }
            if !event.print.text.starts_with(b"You get ") {
                return Err(StatsError::PrintMismatch { block: block_index });
            }
            let contents = match parse_backpack_contents(&event.print.text) {
                Some(contents) => contents,
                None => return Err(StatsError::BackpackGrammar { block: block_index }),
            };
            let active = backpacks_by_frame[previous].remove(index);
            backpack_collections[block_index].push(Collection {
                entity_num: active.entity_num,
                kind: CollectableKind::Backpack,
                contents,
                event: Some(event),
                time: times[block_index],
            });
        }
    }

    Ok((static_collections, backpack_collections))
}

/// The pause state in effect at each block.
pub fn get_is_paused(demo: &Demo) -> Vec<bool> {
    let mut is_paused = false;
    demo.blocks
        .iter()
        .map(|block| {
            for message in block.messages.iter() {
                if let ServerCmd::SetPause(pause) = message {
                    is_paused = pause.paused != 0;
                }
            }
            is_paused
        })
        .collect()
}

/// The first unpaused block from which server time strictly increases
/// twice; nothing can be collected before it.
pub fn get_first_active_block_index(demo: &Demo) -> Result<usize, StatsError> {
    let mut indices: Vec<i64> = vec![-1];
    let mut times: Vec<f64> = vec![0.0];
    for (i, block) in demo.blocks.iter().enumerate() {
        for message in block.messages.iter() {
            if let ServerCmd::Time(time) = message {
                indices.push(i as i64);
                times.push(time.time as f64);
            }
        }
    }
    let is_paused = get_is_paused(demo);

    for i in 0..times.len().saturating_sub(2) {
        if times[i + 2] > times[i + 1] && times[i + 1] > times[i] {
            let candidate = indices[i + 1];
            if candidate >= 0 && !is_paused[candidate as usize] {
                return Ok(candidate as usize);
            }
        }
    }
    Err(StatsError::invariant(
        "demo time never starts advancing".to_owned(),
    ))
}

/// For each block, the static collectables whose world box the player's box
/// reaches at that frame (testing against the previous frame's bounds).
/// Observed pickups are cross-checked against the recorded sound position
/// and admitted even when the boxes merely touch.
pub fn get_possible_collections(
    demo: &Demo,
    statics: &BTreeMap<i16, CollectableKind>,
    old_collections: &BlockCollections,
) -> Result<Vec<Vec<i16>>, StatsError> {
    let origins = get_static_collectable_origins(demo, statics)?;
    let bounds = get_static_collectable_bounds(statics, &origins);
    let client_positions = get_client_positions(demo, demo.get_viewentity()?)?;
    let first_active = get_first_active_block_index(demo)?;

    let num_blocks = demo.blocks.len();
    let mut possible: Vec<Vec<i16>> = vec![Vec::new(); num_blocks];
    for (i, pos) in client_positions.iter().enumerate() {
        let player = collision::player_bounds(*pos);
        for (num, entity_bounds) in bounds.iter() {
            // frame 0 wraps around to the final frame's bounds; the player
            // has no position there, so nothing comes of it
            let previous = if i == 0 { num_blocks - 1 } else { i - 1 };
            let distance = collision::distance(&player, &entity_bounds[previous]);

            let mut originals = old_collections[i].iter().filter(|c| c.entity_num == *num);
            let original = originals.next();
            if originals.next().is_some() {
                return Err(StatsError::invariant(format!(
                    "entity {} collected twice in block {}",
                    num, i
                )));
            }

            let collected_in_original = original.is_some();
            if let Some(collection) = original {
                // client positions are not fully settled on the first
                // frames, so instant pickups get extra leeway
                let tolerance = if i <= first_active { 0.5f32 } else { 0.0 };
                if !(distance <= tolerance) {
                    return Err(StatsError::invariant(format!(
                        "observed pickup of entity {} at block {} but the boxes are {} apart",
                        num, i, distance
                    )));
                }
                let center = collision::player_center(*pos);
                let event = collection
                    .event
                    .as_ref()
                    .ok_or_else(|| StatsError::invariant("observed pickup without an event".to_owned()))?;
                let sound_origin = event.sound.origin;
                let slack = [0.125f32, 0.0, 0.5];
                for axis in 0..3 {
                    if (sound_origin[axis] - center[axis]).abs() > tolerance.max(slack[axis]) {
                        return Err(StatsError::SoundPosition { block: i });
                    }
                }
            }

            let tolerance = if i < first_active {
                f32::NEG_INFINITY
            } else {
                0.0
            };
            // collections normally require strict overlap; merely touching
            // boxes only count when the original demo shows the pickup
            if distance < tolerance || collected_in_original {
                possible[i].push(*num);
            }
        }
    }
    Ok(possible)
}

/// Per-block (armor, blood) damage, zero where the block has no
/// DamageMessage.
pub fn get_damage(demo: &Demo) -> Result<Vec<(i32, i32)>, StatsError> {
    let mut damage = Vec::with_capacity(demo.blocks.len());
    for (i, block) in demo.blocks.iter().enumerate() {
        let mut block_damage = None;
        for message in block.messages.iter() {
            if let ServerCmd::Damage(dmg) = message {
                if block_damage.is_some() {
                    return Err(StatsError::invariant(format!(
                        "multiple damage messages in block {}",
                        i
                    )));
                }
                block_damage = Some((dmg.armor as i32, dmg.blood as i32));
            }
        }
        damage.push(block_damage.unwrap_or((0, 0)));
    }
    Ok(damage)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::demo::Block;
    use crate::demo::CdTrack;
    use crate::demo::ViewAngles;
    use crate::net::ServerCmdPrint;
    use crate::net::ServerCmdSetPause;
    use crate::net::ServerCmdStuffText;
    use crate::net::ServerCmdTime;

    fn block(messages: Vec<ServerCmd>) -> Block {
        Block {
            viewangles: ViewAngles {
                pitch: 0.0,
                yaw: 0.0,
                roll: 0.0,
            },
            messages,
        }
    }

    fn demo(blocks: Vec<Block>) -> Demo {
        Demo {
            cdtrack: CdTrack {
                text: b"2\n".to_vec(),
            },
            blocks,
        }
    }

    fn print(text: &[u8]) -> ServerCmd {
        ServerCmd::Print(ServerCmdPrint {
            text: text.to_vec(),
        })
    }

    fn flash() -> ServerCmd {
        ServerCmd::StuffText(ServerCmdStuffText {
            text: b"bf\n".to_vec(),
        })
    }

    fn time(t: f32) -> ServerCmd {
        ServerCmd::Time(ServerCmdTime { time: t })
    }

    #[test]
    fn test_backpack_grammar() {
        let gives = parse_backpack_contents(b"You get 25 shells, 2 rockets\n").unwrap();
        assert_eq!(
            gives,
            vec![
                Give::Ammo(AmmoKind::Shells, 25),
                Give::Ammo(AmmoKind::Rockets, 2),
            ]
        );

        let gives = parse_backpack_contents(b"You get 200 nails\n").unwrap();
        assert_eq!(gives, vec![Give::Ammo(AmmoKind::Nails, 200)]);

        // counts start at one
        assert!(parse_backpack_contents(b"You get 0 shells\n").is_none());
        assert!(parse_backpack_contents(b"You got the shells\n").is_none());
    }

    #[test]
    fn test_collection_prints_flow() {
        let d = demo(vec![
            block(vec![print(b"You got the nailgun\n"), flash()]),
            // powerups are not collectables
            block(vec![print(b"You got the Quad Damage\n"), flash()]),
            // a multi-print flow accumulates until the flash
            block(vec![
                print(b"You get 5 shells"),
                print(b", 10 nails\n"),
                flash(),
            ]),
        ]);
        let prints = get_collection_prints(&d).unwrap();
        assert_eq!(prints.len(), 2);
        assert_eq!(prints[0].text, b"You got the nailgun\n".to_vec());
        assert_eq!(prints[0].block_index, 0);
        assert_eq!(prints[1].text, b"You get 5 shells, 10 nails\n".to_vec());
        assert_eq!(prints[1].block_index, 2);
    }

    #[test]
    fn test_first_active_block_skips_pauses() {
        let d = demo(vec![
            block(vec![]),
            block(vec![
                time(0.1),
                ServerCmd::SetPause(ServerCmdSetPause { paused: 1 }),
            ]),
            block(vec![time(0.1)]),
            block(vec![time(0.1)]),
            block(vec![ServerCmd::SetPause(ServerCmdSetPause { paused: 0 })]),
            block(vec![time(0.2)]),
            block(vec![time(0.3)]),
            block(vec![time(0.4)]),
        ]);
        // time stalls during the pause, so the first strictly increasing
        // run starts at block 5
        assert_eq!(get_first_active_block_index(&d).unwrap(), 5);
    }

    #[test]
    fn test_statics_by_frame_inherits_across_timeless_blocks() {
        use crate::net::EntityUpdate;
        use crate::net::ServerCmdSpawnBaseline;

        use cgmath::Deg;

        let mut statics = BTreeMap::new();
        statics.insert(30, CollectableKind::Shells20);

        let d = demo(vec![
            // the sign-on block has no anchor message at all
            block(vec![]),
            block(vec![ServerCmd::SpawnBaseline(ServerCmdSpawnBaseline {
                entity_num: 30,
                model_index: 3,
                frame: 0,
                colormap: 0,
                skin: 0,
                origin: Vector3::new(100.0, 100.0, 0.0),
                angles: Vector3::new(Deg(0.0), Deg(0.0), Deg(0.0)),
            })]),
            block(vec![
                time(0.1),
                ServerCmd::EntityUpdate(EntityUpdate::signal(30, None)),
            ]),
            // no time message: answers as the preceding proper frame
            block(vec![print(b"You got the shells\n"), flash()]),
        ]);

        let frames = get_static_collectables_by_frame(&d, &statics).unwrap();
        // block 0 wraps around to the final frame's list, which is empty
        // at the time it is visited
        assert!(frames[0].is_empty());
        assert_eq!(frames[1].len(), 1);
        assert_eq!(frames[2].len(), 1);
        assert_eq!(frames[3].len(), 1);
        assert_eq!(frames[3][0].entity_num, 30);
    }

    #[test]
    fn test_is_paused_carries_state() {
        let d = demo(vec![
            block(vec![]),
            block(vec![ServerCmd::SetPause(ServerCmdSetPause { paused: 1 })]),
            block(vec![]),
            block(vec![ServerCmd::SetPause(ServerCmdSetPause { paused: 0 })]),
        ]);
        assert_eq!(get_is_paused(&d), vec![false, true, true, false]);
    }
}
