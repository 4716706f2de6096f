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

//! Reconciles on-wire pickup events with the reconstructed collections:
//! sounds, print flows, screen flashes and entity visibility are removed or
//! synthesized so a replaying client sees exactly the recomputed pickups.
//! All removals run before any addition so a sound freshly added for one
//! player is never deleted on behalf of another.

use crate::collision;
use crate::demo::Block;
use crate::demo::Demo;
use crate::net::EntityUpdate;
use crate::net::ServerCmd;
use crate::net::ServerCmdPrint;
use crate::net::ServerCmdSound;
use crate::net::ServerCmdStuffText;
use crate::net::SoundFlags;
use crate::stats::collect;
use crate::stats::BlockCollections;
use crate::stats::CollectSound;
use crate::stats::PrintEvent;
use crate::stats::StatsError;

use cgmath::Vector3;
use log::info;

/// Deletes the single pickup sound for the view entity with the given
/// sound number from a block.
fn remove_collection_sound(
    sound_id: u16,
    viewentity: i16,
    block: &mut Block,
    block_index: usize,
) -> Result<(), StatsError> {
    let matches: Vec<usize> = block
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| match m {
            ServerCmd::Sound(sound) => {
                sound.sound_id == sound_id && sound.entity_id == viewentity as u16
            }
            _ => false,
        })
        .map(|(index, _)| index)
        .collect();
    if matches.len() != 1 {
        return Err(StatsError::SoundRemoval {
            block: block_index,
            found: matches.len(),
        });
    }
    block.messages.remove(matches[0]);
    Ok(())
}

/// Deletes a pickup print flow and its screen flash. The print block must
/// contain nothing but this flow; anything else means the demo interleaved
/// other traffic and the removal would corrupt it.
fn remove_collection_print(print: &PrintEvent, demo: &mut Demo) -> Result<(), StatsError> {
    let block = &mut demo.blocks[print.block_index];

    let stuff_indices: Vec<usize> = block
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| matches!(m, ServerCmd::StuffText(_)))
        .map(|(index, _)| index)
        .collect();
    let flash_ok = match stuff_indices.as_slice() {
        [index] => match &block.messages[*index] {
            ServerCmd::StuffText(stuff) => stuff.text == b"bf\n",
            _ => false,
        },
        _ => false,
    };
    if !flash_ok {
        return Err(StatsError::PrintNotIsolable {
            block: print.block_index,
        });
    }
    block.messages.remove(stuff_indices[0]);

    // every remaining message must be a print belonging to this flow
    let mut remaining = print.text.clone();
    for message in block.messages.iter() {
        let text = match message {
            ServerCmd::Print(p) => &p.text,
            _ => {
                return Err(StatsError::PrintNotIsolable {
                    block: print.block_index,
                })
            }
        };
        match crate::util::find_subslice(&remaining, text) {
            Some(position) => {
                remaining.drain(position..position + text.len());
            }
            None => {
                return Err(StatsError::PrintNotIsolable {
                    block: print.block_index,
                })
            }
        }
    }
    if !remaining.is_empty() {
        return Err(StatsError::PrintNotIsolable {
            block: print.block_index,
        });
    }

    block.messages.clear();
    Ok(())
}

/// Appends a synthetic pickup sound at the player's box center.
fn add_collection_sound(
    collect_sound: CollectSound,
    client_pos: Vector3<f32>,
    viewentity: i16,
    sounds_precache: &[Vec<u8>],
    block: &mut Block,
) -> Result<(), StatsError> {
    let wav = collect_sound.wav();
    let sound_id = sounds_precache
        .iter()
        .position(|name| name.as_slice() == wav)
        .ok_or_else(|| StatsError::SoundNotPrecached(String::from_utf8_lossy(wav).into_owned()))?;

    block.messages.push(ServerCmd::Sound(ServerCmdSound {
        flags: SoundFlags::empty(),
        volume: ServerCmdSound::DEFAULT_VOLUME,
        attenuation: ServerCmdSound::DEFAULT_ATTENUATION,
        entity_id: viewentity as u16,
        channel: 3,
        sound_id: sound_id as u16,
        position: collision::player_center(client_pos),
    }));
    Ok(())
}

/// Re-asserts an entity's presence in every later time-bearing block so the
/// client keeps rendering a pickup that no longer disappears.
fn keep_entity_after(
    start_block_index: usize,
    entity_num: i16,
    last_origin: Option<Vector3<f32>>,
    demo: &mut Demo,
) {
    let update = EntityUpdate::signal(entity_num, last_origin);
    for block in demo.blocks[start_block_index..].iter_mut() {
        if block
            .messages
            .iter()
            .any(|m| matches!(m, ServerCmd::Time(_)))
        {
            block.messages.push(ServerCmd::EntityUpdate(update.clone()));
        }
    }
}

/// Drops an entity's updates from every block at or after the given one so
/// a newly collected pickup stops being rendered.
fn remove_entity_after(start_block_index: usize, entity_num: i16, demo: &mut Demo) {
    for block in demo.blocks[start_block_index..].iter_mut() {
        block.messages.retain(|m| match m {
            ServerCmd::EntityUpdate(update) => update.entity_num != entity_num,
            _ => true,
        });
    }
}

fn remove_obsolete_collection_events(
    player: usize,
    old_collections: &BlockCollections,
    new_collections: &BlockCollections,
    demos: &mut [Demo],
    times_per_player: &[Vec<f64>],
) -> Result<(), StatsError> {
    let (models_precache, _) = demos[player].get_precaches()?;
    let viewentity = demos[player].get_viewentity()?;
    let statics = collect::get_static_collectables(&demos[player], &models_precache)?;
    let origins = collect::get_static_collectable_origins(&demos[player], &statics)?;
    let times = &times_per_player[player];

    let num_blocks = demos[player].blocks.len();
    for i in 0..num_blocks {
        let to_remove: Vec<_> = old_collections[i]
            .iter()
            .filter(|old| {
                !new_collections[i]
                    .iter()
                    .any(|new| new.entity_num == old.entity_num)
            })
            .cloned()
            .collect();

        for collection in to_remove {
            info!(
                "removed collection: {:?} at time {}",
                collection.kind, times[i]
            );

            let event = collection.event.as_ref().ok_or_else(|| {
                StatsError::invariant("observed collection without its events".to_owned())
            })?;
            if event.sound.block_index != i {
                return Err(StatsError::invariant(format!(
                    "collection at block {} carries a sound from block {}",
                    i, event.sound.block_index
                )));
            }

            remove_collection_sound(
                event.sound.sound_id,
                viewentity,
                &mut demos[player].blocks[i],
                i,
            )?;
            remove_collection_print(&event.print, &mut demos[player])?;

            let entity_origins = &origins[&collection.entity_num];
            let previous = if i == 0 { num_blocks - 1 } else { i - 1 };
            let last_origin = if entity_origins[previous] != entity_origins[0] {
                Some(entity_origins[previous])
            } else {
                None
            };
            keep_entity_after(i, collection.entity_num, last_origin, &mut demos[player]);

            for other in 0..demos.len() {
                if other == player {
                    continue;
                }
                let other_index = times_per_player[other]
                    .iter()
                    .position(|t| *t == collection.time)
                    .ok_or(StatsError::SiblingTimeMissing(collection.time))?;
                remove_collection_sound(
                    event.sound.sound_id,
                    viewentity,
                    &mut demos[other].blocks[other_index],
                    other_index,
                )?;
                keep_entity_after(other_index, collection.entity_num, last_origin, &mut demos[other]);
            }
        }
    }
    Ok(())
}

fn add_new_collection_events(
    player: usize,
    old_collections: &BlockCollections,
    new_collections: &BlockCollections,
    demos: &mut [Demo],
    times_per_player: &[Vec<f64>],
) -> Result<(), StatsError> {
    let (_, sounds_precache) = demos[player].get_precaches()?;
    let viewentity = demos[player].get_viewentity()?;
    let client_positions = collect::get_client_positions(&demos[player], viewentity)?;
    let times = &times_per_player[player];

    let num_blocks = demos[player].blocks.len();
    for i in 0..num_blocks {
        let to_add: Vec<_> = new_collections[i]
            .iter()
            .filter(|new| {
                !old_collections[i]
                    .iter()
                    .any(|old| old.entity_num == new.entity_num)
            })
            .cloned()
            .collect();

        for collection in to_add {
            info!("added collection: {:?} at time {}", collection.kind, times[i]);

            add_collection_sound(
                collection.kind.collect_sound(),
                client_positions[i],
                viewentity,
                &sounds_precache,
                &mut demos[player].blocks[i],
            )?;
            demos[player].blocks[i]
                .messages
                .push(ServerCmd::Print(ServerCmdPrint {
                    text: collection.kind.print_text().to_vec(),
                }));
            demos[player].blocks[i]
                .messages
                .push(ServerCmd::StuffText(ServerCmdStuffText {
                    text: b"bf\n".to_vec(),
                }));
            remove_entity_after(i, collection.entity_num, &mut demos[player]);

            for other in 0..demos.len() {
                if other == player {
                    continue;
                }
                let other_index = times_per_player[other]
                    .iter()
                    .position(|t| *t == collection.time)
                    .ok_or(StatsError::SiblingTimeMissing(collection.time))?;
                add_collection_sound(
                    collection.kind.collect_sound(),
                    client_positions[i],
                    viewentity,
                    &sounds_precache,
                    &mut demos[other].blocks[other_index],
                )?;
                remove_entity_after(other_index, collection.entity_num, &mut demos[other]);
            }
        }
    }
    Ok(())
}

/// Applies all event removals across every demo, then all additions.
pub fn fix_collection_events(
    old_collections: &[BlockCollections],
    new_collections: &[BlockCollections],
    demos: &mut [Demo],
) -> Result<(), StatsError> {
    if old_collections.len() != demos.len() || new_collections.len() != demos.len() {
        return Err(StatsError::invariant(
            "per-player inputs disagree on the player count".to_owned(),
        ));
    }

    let mut times_per_player = Vec::with_capacity(demos.len());
    for demo in demos.iter() {
        times_per_player.push(demo.get_time()?);
    }

    for player in 0..demos.len() {
        remove_obsolete_collection_events(
            player,
            &old_collections[player],
            &new_collections[player],
            demos,
            &times_per_player,
        )?;
    }
    for player in 0..demos.len() {
        add_new_collection_events(
            player,
            &old_collections[player],
            &new_collections[player],
            demos,
            &times_per_player,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::demo::ViewAngles;
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

    #[test]
    fn test_remove_collection_print_requires_isolation() {
        let mut demo = Demo {
            cdtrack: crate::demo::CdTrack {
                text: b"2\n".to_vec(),
            },
            blocks: vec![block(vec![
                ServerCmd::Print(ServerCmdPrint {
                    text: b"You got armor\n".to_vec(),
                }),
                ServerCmd::StuffText(ServerCmdStuffText {
                    text: b"bf\n".to_vec(),
                }),
                // a time message does not belong in a print flow block
                ServerCmd::Time(ServerCmdTime { time: 3.0 }),
            ])],
        };
        let event = PrintEvent {
            block_index: 0,
            text: b"You got armor\n".to_vec(),
        };
        assert!(matches!(
            remove_collection_print(&event, &mut demo),
            Err(StatsError::PrintNotIsolable { block: 0 })
        ));
    }

    #[test]
    fn test_remove_collection_print_clears_the_block() {
        let mut demo = Demo {
            cdtrack: crate::demo::CdTrack {
                text: b"2\n".to_vec(),
            },
            blocks: vec![block(vec![
                ServerCmd::Print(ServerCmdPrint {
                    text: b"You get 5 shells".to_vec(),
                }),
                ServerCmd::Print(ServerCmdPrint {
                    text: b", 10 nails\n".to_vec(),
                }),
                ServerCmd::StuffText(ServerCmdStuffText {
                    text: b"bf\n".to_vec(),
                }),
            ])],
        };
        let event = PrintEvent {
            block_index: 0,
            text: b"You get 5 shells, 10 nails\n".to_vec(),
        };
        remove_collection_print(&event, &mut demo).unwrap();
        assert!(demo.blocks[0].messages.is_empty());
    }

    #[test]
    fn test_keep_entity_targets_time_blocks() {
        let mut demo = Demo {
            cdtrack: crate::demo::CdTrack {
                text: b"2\n".to_vec(),
            },
            blocks: vec![
                block(vec![ServerCmd::Time(ServerCmdTime { time: 1.0 })]),
                block(vec![ServerCmd::NoOp]),
                block(vec![ServerCmd::Time(ServerCmdTime { time: 1.1 })]),
            ],
        };
        keep_entity_after(0, 7, None, &mut demo);
        assert_eq!(demo.blocks[0].messages.len(), 2);
        assert_eq!(demo.blocks[1].messages.len(), 1);
        assert_eq!(demo.blocks[2].messages.len(), 2);
        match demo.blocks[2].messages.last() {
            Some(ServerCmd::EntityUpdate(update)) => assert_eq!(update.entity_num, 7),
            other => panic!("expected an entity update, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_entity_after() {
        let update = |num| ServerCmd::EntityUpdate(EntityUpdate::signal(num, None));
        let mut demo = Demo {
            cdtrack: crate::demo::CdTrack {
                text: b"2\n".to_vec(),
            },
            blocks: vec![
                block(vec![update(7), update(8)]),
                block(vec![update(7)]),
                block(vec![update(7), update(8)]),
            ],
        };
        remove_entity_after(1, 7, &mut demo);
        assert_eq!(demo.blocks[0].messages.len(), 2);
        assert!(demo.blocks[1].messages.is_empty());
        assert_eq!(demo.blocks[2].messages.len(), 1);
    }
}
