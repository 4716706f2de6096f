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

//! In-place cleanup transforms: pause coalescing, intermission fixes,
//! print/sound filtering, tail cutting, and sound/weapon-model swaps.

use crate::demo::Block;
use crate::demo::Demo;
use crate::demo::DemoError;
use crate::demo::ViewAngles;
use crate::net::EntityUpdate;
use crate::net::ServerCmd;
use crate::util;

use lazy_static::lazy_static;
use log::info;
use log::warn;
use regex::bytes::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("{0}")]
    Demo(#[from] DemoError),
    #[error("no block matches the true intermission time {0}")]
    IntermissionTime(f64),
    #[error("{0:?} missing from the precache")]
    PrecacheMiss(String),
    #[error("entity {0} differs between the demos being merged")]
    MergeMismatch(i16),
}

lazy_static! {
    // the fractional seconds use a character class; a bare dot would match
    // any separator byte
    static ref RECORDED_TIME_RE: Regex =
        Regex::new(r"The recorded time was (?:(\d)*:)?([0-5]?\d[.]\d{5})").unwrap();
}

/// On laggy co-op recordings the intermission message can arrive a few
/// blocks after the block whose time the scoreboard shows. Move it (and the
/// accompanying cd-track change) back to the block matching the printed
/// time.
pub fn fix_intermission_lag(demo: &mut Demo) -> Result<(), CleanupError> {
    for i in 0..demo.blocks.len() {
        if !demo.blocks[i]
            .messages
            .iter()
            .any(|m| matches!(m, ServerCmd::Intermission))
        {
            continue;
        }

        let mut correct_time = None;
        for following in demo.blocks[i..].iter() {
            let text: Vec<u8> = following
                .messages
                .iter()
                .filter_map(|m| match m {
                    ServerCmd::Print(print) => Some(print.text.as_slice()),
                    _ => None,
                })
                .flatten()
                .copied()
                .collect();
            if let Some(captures) = RECORDED_TIME_RE.captures(&text) {
                let minutes: f64 = captures
                    .get(1)
                    .and_then(|m| crate::stats::parse_int(m.as_bytes()))
                    .unwrap_or(0) as f64;
                let seconds: f64 = captures
                    .get(2)
                    .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(f64::NAN);
                correct_time = Some(minutes * 60.0 + seconds);
                break;
            }
        }
        let correct_time = match correct_time {
            Some(time) => time,
            None => {
                warn!("no recorded-time print after the intermission, not fixing lag");
                continue;
            }
        };

        let mut target = None;
        for j in (0..i).rev() {
            let times: Vec<f32> = demo.blocks[j]
                .messages
                .iter()
                .filter_map(|m| match m {
                    ServerCmd::Time(time) => Some(time.time),
                    _ => None,
                })
                .collect();
            if times.is_empty() {
                continue;
            }
            if times.len() > 1 {
                return Err(DemoError::DuplicatePerBlock {
                    block: j,
                    kind: "Time",
                }
                .into());
            }

            let current_time = times[0] as f64;
            if (current_time - correct_time).abs() < 1e-5 {
                if j != i - 1 {
                    info!("shifting intermission to {}", current_time);
                    target = Some(j);
                }
                break;
            } else if current_time < correct_time {
                return Err(CleanupError::IntermissionTime(correct_time));
            }
        }

        if let Some(j) = target {
            let mut shifted = Vec::new();
            demo.blocks[i].messages.retain(|m| {
                if matches!(m, ServerCmd::Intermission | ServerCmd::CdTrack(_)) {
                    shifted.push(m.clone());
                    false
                } else {
                    true
                }
            });
            demo.blocks[j].messages.extend(shifted);
        }
    }
    Ok(())
}

/// Re-anchors intermission messages onto the preceding time-bearing block
/// (which carries the view snap), inserting a dedicated block for them.
pub fn fix_intermission_transition(demo: &mut Demo) {
    let mut reinsert: Vec<(usize, Vec<ServerCmd>)> = Vec::new();
    for i in 0..demo.blocks.len() {
        if !demo.blocks[i]
            .messages
            .iter()
            .any(|m| matches!(m, ServerCmd::Intermission))
        {
            continue;
        }

        let new_index = demo.get_previous_block_index_with_time_message(i);
        if !demo.blocks[new_index]
            .messages
            .iter()
            .any(|m| matches!(m, ServerCmd::SetAngle(_)))
        {
            warn!("could not find the expected setangle message, not fixing intermission transition");
            continue;
        }

        let mut moved = Vec::new();
        demo.blocks[i].messages.retain(|m| {
            if matches!(m, ServerCmd::Intermission) {
                moved.push(m.clone());
                false
            } else {
                true
            }
        });
        reinsert.push((new_index, moved));
    }

    for (index, messages) in reinsert.into_iter().rev() {
        let viewangles = demo.blocks[index].viewangles;
        demo.blocks.insert(
            index,
            Block {
                viewangles,
                messages,
            },
        );
    }
}

/// Color changes normally only take effect with the next full entity
/// update; a bare signal update makes them instant.
pub fn instant_skin_color(demo: &mut Demo) {
    for block in demo.blocks.iter_mut() {
        let player_ids: Vec<u8> = block
            .messages
            .iter()
            .filter_map(|m| match m {
                ServerCmd::UpdateColors(colors) => Some(colors.player_id),
                _ => None,
            })
            .collect();
        for player_id in player_ids {
            block.messages.push(ServerCmd::EntityUpdate(EntityUpdate::signal(
                player_id as i16 + 1,
                None,
            )));
        }
    }
}

/// Strips the center prints some mods use as a live grenade counter.
pub fn remove_grenade_counter(demo: &mut Demo) {
    for block in demo.blocks.iter_mut() {
        block.messages.retain(|m| match m {
            ServerCmd::CenterPrint(print) => !print.text.starts_with(b"Grenade"),
            _ => true,
        });
    }
}

/// Removes pauses: SetPause messages are dropped, and every paused block
/// takes the view angles and entity updates of the next unpaused block so
/// the replay holds still instead of jumping.
pub fn remove_pauses(demo: &mut Demo) {
    let mut is_paused_list = Vec::with_capacity(demo.blocks.len());
    let mut is_paused = false;
    for block in demo.blocks.iter_mut() {
        for message in block.messages.iter() {
            if let ServerCmd::SetPause(pause) = message {
                is_paused = pause.paused != 0;
            }
        }
        block
            .messages
            .retain(|m| !matches!(m, ServerCmd::SetPause(_)));
        is_paused_list.push(is_paused);
    }

    let mut viewangles_after_unpause: Option<ViewAngles> = None;
    let mut updates_after_unpause: Option<Vec<ServerCmd>> = None;
    for (block, is_paused) in demo
        .blocks
        .iter_mut()
        .rev()
        .zip(is_paused_list.into_iter().rev())
    {
        if is_paused {
            // a pause that runs to the end of the demo has no unpause
            // state to copy; leave those blocks untouched
            let viewangles = match viewangles_after_unpause {
                Some(viewangles) => viewangles,
                None => continue,
            };
            block.viewangles = viewangles;
            block
                .messages
                .retain(|m| !matches!(m, ServerCmd::EntityUpdate(_)));
            if let Some(updates) = &updates_after_unpause {
                block.messages.extend(updates.iter().cloned());
            }
        } else {
            viewangles_after_unpause = Some(block.viewangles);
            let updates: Vec<ServerCmd> = block
                .messages
                .iter()
                .filter(|m| matches!(m, ServerCmd::EntityUpdate(_)))
                .cloned()
                .collect();
            if !updates.is_empty() {
                updates_after_unpause = Some(updates);
            }
        }
    }
}

/// Drops notification prints containing any of the given patterns.
pub fn remove_prints(demo: &mut Demo, patterns: &[&[u8]]) {
    for block in demo.blocks.iter_mut() {
        block.messages.retain(|m| match m {
            ServerCmd::Print(print) => !patterns
                .iter()
                .any(|pattern| util::contains_subslice(&print.text, pattern)),
            _ => true,
        });
    }
}

/// Drops sounds whose precached name contains any of the given patterns.
pub fn remove_sounds(demo: &mut Demo, patterns: &[&[u8]]) -> Result<(), CleanupError> {
    let (_, sounds_precache) = demo.get_precaches()?;
    for block in demo.blocks.iter_mut() {
        block.messages.retain(|m| match m {
            ServerCmd::Sound(sound) => {
                let name = sounds_precache
                    .get(sound.sound_id as usize)
                    .map(|n| n.as_slice())
                    .unwrap_or(b"");
                !patterns
                    .iter()
                    .any(|pattern| util::contains_subslice(name, pattern))
            }
            _ => true,
        });
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EndKind {
    Intermission,
    Finale,
}

/// Cuts the demo `duration` seconds after its end marker, keeping the final
/// (disconnect) block.
pub fn cut_end_after(demo: &mut Demo, duration: f64, end: EndKind) -> Result<(), CleanupError> {
    let matches_end = |m: &ServerCmd| match end {
        EndKind::Intermission => matches!(m, ServerCmd::Intermission),
        EndKind::Finale => matches!(m, ServerCmd::Finale(_)),
    };

    let times = demo.get_time()?;
    let time_end = demo
        .blocks
        .iter()
        .position(|b| b.messages.iter().any(matches_end))
        .map(|i| times[i]);
    let time_end = match time_end {
        Some(time) => time,
        None => {
            warn!("no {:?} found, not cutting anything", end);
            return Ok(());
        }
    };

    let num_blocks = demo.blocks.len();
    let first_to_remove = times
        .iter()
        .position(|t| *t > time_end + duration)
        .unwrap_or(num_blocks);
    if first_to_remove == num_blocks {
        warn!("{:?} is shorter than the duration to cut to", end);
    }
    if first_to_remove + 1 < num_blocks {
        demo.blocks.drain(first_to_remove..num_blocks - 1);
    }
    Ok(())
}

/// Renumbers sound messages so `old` sounds play as `new`.
pub fn replace_sound(demo: &mut Demo, replacements: &[(&[u8], &[u8])]) -> Result<(), CleanupError> {
    let (_, sounds_precache) = demo.get_precaches()?;
    for block in demo.blocks.iter_mut() {
        for message in block.messages.iter_mut() {
            if let ServerCmd::Sound(sound) = message {
                let name = sounds_precache
                    .get(sound.sound_id as usize)
                    .map(|n| n.as_slice())
                    .unwrap_or(b"");
                for (old, new) in replacements.iter().copied() {
                    if name == old {
                        let new_id = sounds_precache
                            .iter()
                            .position(|n| n.as_slice() == new)
                            .ok_or_else(|| {
                                CleanupError::PrecacheMiss(
                                    String::from_utf8_lossy(new).into_owned(),
                                )
                            })?;
                        sound.sound_id = new_id as u16;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Renumbers the ClientData weapon model so `old` view models show as
/// `new`.
pub fn replace_weaponmodel(
    demo: &mut Demo,
    replacements: &[(&[u8], &[u8])],
) -> Result<(), CleanupError> {
    let (models_precache, _) = demo.get_precaches()?;
    for block in demo.blocks.iter_mut() {
        for message in block.messages.iter_mut() {
            if let ServerCmd::ClientData(data) = message {
                let name = models_precache
                    .get(data.weapon as usize)
                    .map(|n| n.as_slice())
                    .unwrap_or(b"");
                for (old, new) in replacements.iter().copied() {
                    if name == old {
                        let new_id = models_precache
                            .iter()
                            .position(|n| n.as_slice() == new)
                            .ok_or_else(|| {
                                CleanupError::PrecacheMiss(
                                    String::from_utf8_lossy(new).into_owned(),
                                )
                            })?;
                        data.weapon = new_id as u16;
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::demo::CdTrack;
    use crate::net::ServerCmdCenterPrint;
    use crate::net::ServerCmdPrint;
    use crate::net::ServerCmdSetPause;
    use crate::net::ServerCmdTime;
    use crate::net::UpdateFlags;

    fn block(yaw: f32, messages: Vec<ServerCmd>) -> Block {
        Block {
            viewangles: ViewAngles {
                pitch: 0.0,
                yaw,
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

    fn time(t: f32) -> ServerCmd {
        ServerCmd::Time(ServerCmdTime { time: t })
    }

    fn update(num: i16) -> ServerCmd {
        ServerCmd::EntityUpdate(EntityUpdate::signal(num, None))
    }

    fn pause(on: u8) -> ServerCmd {
        ServerCmd::SetPause(ServerCmdSetPause { paused: on })
    }

    #[test]
    fn test_remove_pauses() {
        // pause begins in block 1 and is lifted in block 3
        let mut d = demo(vec![
            block(10.0, vec![time(1.0), update(1)]),
            block(20.0, vec![time(1.1), pause(1), update(1)]),
            block(30.0, vec![time(1.1), update(1)]),
            block(40.0, vec![time(1.1), pause(0), update(1), update(2)]),
            block(50.0, vec![time(1.2), update(1)]),
        ]);
        remove_pauses(&mut d);

        for block in d.blocks.iter() {
            assert!(!block
                .messages
                .iter()
                .any(|m| matches!(m, ServerCmd::SetPause(_))));
        }

        // paused blocks carry the unpause block's view angles and updates
        for i in [1, 2] {
            assert_eq!(d.blocks[i].viewangles.yaw, 40.0);
            let updates: Vec<i16> = d.blocks[i]
                .messages
                .iter()
                .filter_map(|m| match m {
                    ServerCmd::EntityUpdate(u) => Some(u.entity_num),
                    _ => None,
                })
                .collect();
            assert_eq!(updates, vec![1, 2]);
        }
        // unpaused blocks are untouched
        assert_eq!(d.blocks[0].viewangles.yaw, 10.0);
        assert_eq!(d.blocks[4].viewangles.yaw, 50.0);
    }

    #[test]
    fn test_remove_pauses_keeps_a_trailing_pause_intact() {
        // the pause is never lifted, so there is no unpause state to copy
        let mut d = demo(vec![
            block(10.0, vec![time(1.0), update(1)]),
            block(20.0, vec![time(1.1), pause(1), update(1)]),
            block(30.0, vec![time(1.1), update(2)]),
        ]);
        remove_pauses(&mut d);

        for block in d.blocks.iter() {
            assert!(!block
                .messages
                .iter()
                .any(|m| matches!(m, ServerCmd::SetPause(_))));
        }

        // the paused tail keeps its own view angles and entity state
        assert_eq!(d.blocks[1].viewangles.yaw, 20.0);
        assert_eq!(d.blocks[2].viewangles.yaw, 30.0);
        let updates_of = |i: usize| -> Vec<i16> {
            d.blocks[i]
                .messages
                .iter()
                .filter_map(|m| match m {
                    ServerCmd::EntityUpdate(u) => Some(u.entity_num),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(updates_of(1), vec![1]);
        assert_eq!(updates_of(2), vec![2]);
    }

    #[test]
    fn test_remove_prints_by_pattern() {
        let mut d = demo(vec![block(
            0.0,
            vec![
                ServerCmd::Print(ServerCmdPrint {
                    text: b"Player exited the level\n".to_vec(),
                }),
                ServerCmd::Print(ServerCmdPrint {
                    text: b"You got the shells\n".to_vec(),
                }),
            ],
        )]);
        remove_prints(&mut d, &[b"exited"]);
        assert_eq!(d.blocks[0].messages.len(), 1);
    }

    #[test]
    fn test_remove_grenade_counter() {
        let mut d = demo(vec![block(
            0.0,
            vec![
                ServerCmd::CenterPrint(ServerCmdCenterPrint {
                    text: b"Grenades: 3\n".to_vec(),
                }),
                ServerCmd::CenterPrint(ServerCmdCenterPrint {
                    text: b"A secret door opens...\n".to_vec(),
                }),
            ],
        )]);
        remove_grenade_counter(&mut d);
        assert_eq!(d.blocks[0].messages.len(), 1);
    }

    #[test]
    fn test_cut_end_after_intermission() {
        let mut d = demo(vec![
            block(0.0, vec![time(59.0)]),
            block(0.0, vec![time(60.0), ServerCmd::Intermission]),
            block(0.0, vec![time(61.0)]),
            block(0.0, vec![time(62.5)]),
            block(0.0, vec![time(63.0)]),
            block(0.0, vec![ServerCmd::Disconnect]),
        ]);
        cut_end_after(&mut d, 2.0, EndKind::Intermission).unwrap();
        // blocks past 62.0 go, the disconnect block stays
        assert_eq!(d.blocks.len(), 4);
        assert!(d.blocks[3]
            .messages
            .iter()
            .any(|m| matches!(m, ServerCmd::Disconnect)));
    }

    #[test]
    fn test_cut_end_without_marker_is_a_noop() {
        let mut d = demo(vec![block(0.0, vec![time(1.0)])]);
        cut_end_after(&mut d, 2.0, EndKind::Finale).unwrap();
        assert_eq!(d.blocks.len(), 1);
    }

    #[test]
    fn test_fix_intermission_lag_shifts_messages() {
        let mut d = demo(vec![
            block(0.0, vec![time(71.0)]),
            // the block whose time the scoreboard shows
            block(0.0, vec![time(71.96758)]),
            block(0.0, vec![time(72.2)]),
            // intermission arrives late
            block(
                0.0,
                vec![
                    time(72.4),
                    ServerCmd::Intermission,
                    ServerCmd::CdTrack(crate::net::ServerCmdCdTrack {
                        track: 3,
                        loop_track: 3,
                    }),
                ],
            ),
            block(
                0.0,
                vec![ServerCmd::Print(ServerCmdPrint {
                    text: b"The recorded time was 1:11.96758\n".to_vec(),
                })],
            ),
        ]);
        fix_intermission_lag(&mut d).unwrap();

        assert!(d.blocks[1]
            .messages
            .iter()
            .any(|m| matches!(m, ServerCmd::Intermission)));
        assert!(d.blocks[1]
            .messages
            .iter()
            .any(|m| matches!(m, ServerCmd::CdTrack(_))));
        assert!(!d.blocks[3]
            .messages
            .iter()
            .any(|m| matches!(m, ServerCmd::Intermission)));
    }

    #[test]
    fn test_instant_skin_color_adds_signal() {
        let mut d = demo(vec![block(
            0.0,
            vec![ServerCmd::UpdateColors(crate::net::ServerCmdUpdateColors {
                player_id: 1,
                colors: 0x34,
            })],
        )]);
        instant_skin_color(&mut d);
        match d.blocks[0].messages.last() {
            Some(ServerCmd::EntityUpdate(u)) => {
                assert_eq!(u.entity_num, 2);
                assert_eq!(u.flags, UpdateFlags::SIGNAL);
            }
            other => panic!("expected an entity update, got {:?}", other),
        }
    }
}
