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

//! Cinematic helpers: screen fades via `v_cshift` stufftexts, and merging
//! the entity traffic of co-op recordings into one demo.

use crate::cleanup::CleanupError;
use crate::demo::Block;
use crate::demo::Demo;
use crate::net::EntityUpdate;
use crate::net::ServerCmd;
use crate::net::ServerCmdStuffText;

use log::warn;

fn block_time(block: &Block) -> Option<f64> {
    let times: Vec<f64> = block
        .messages
        .iter()
        .filter_map(|m| match m {
            ServerCmd::Time(time) => Some(time.time as f64),
            _ => None,
        })
        .collect();
    if times.is_empty() {
        None
    } else {
        Some(times.iter().sum::<f64>() / times.len() as f64)
    }
}

fn fade_stufftext(opacity_byte: i32) -> ServerCmd {
    ServerCmd::StuffText(ServerCmdStuffText {
        text: format!("v_cshift 0 0 0 {}\n", opacity_byte).into_bytes(),
    })
}

/// Emits one `v_cshift` per distinct time so the screen blends linearly to
/// or from black over `duration` seconds around `time_start`.
pub fn fade(demo: &mut Demo, time_start: f64, duration: f64, backwards: bool) {
    let mut time_previous: Option<f64> = None;

    let indices: Vec<usize> = if backwards {
        (0..demo.blocks.len()).rev().collect()
    } else {
        (0..demo.blocks.len()).collect()
    };
    for i in indices {
        let time_current = match block_time(&demo.blocks[i]) {
            Some(time) => time,
            None => continue,
        };
        if time_previous == Some(time_current) {
            // do not repeat the cshift command for the same time
            continue;
        }
        let time_elapsed = if backwards {
            time_start - time_current
        } else {
            time_current - time_start
        };
        let opacity = (1.0 - time_elapsed / duration).clamp(0.0, 1.0);
        let opacity_byte = (255.0 * opacity).round() as i32;
        demo.blocks[i].messages.push(fade_stufftext(opacity_byte));
        if opacity_byte <= 0 {
            break;
        }
        time_previous = Some(time_current);
    }
}

/// Distinct sorted times of every TimeMessage in the demo.
fn distinct_times(demo: &Demo) -> Vec<f64> {
    let mut times: Vec<f64> = demo
        .blocks
        .iter()
        .flat_map(|b| b.messages.iter())
        .filter_map(|m| match m {
            ServerCmd::Time(time) => Some(time.time as f64),
            _ => None,
        })
        .collect();
    times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    times.dedup();
    times
}

/// Fades in from black starting at the demo's second-smallest time (the
/// first is the sign-on frame).
pub fn fadein(demo: &mut Demo, duration: f64) {
    let times = distinct_times(demo);
    if times.len() < 2 {
        warn!("not enough time messages for a fade-in");
        return;
    }
    let time_start = times[1];
    fade(demo, time_start, duration, false);
}

/// Fades out to black ending at the demo's second-largest time (the last
/// belongs to the disconnect tail).
pub fn fadeout(demo: &mut Demo, duration: f64) {
    let times = distinct_times(demo);
    if times.len() < 2 {
        warn!("not enough time messages for a fade-out");
        return;
    }
    let time_end = times[times.len() - 2];
    fade(demo, time_end, duration, true);
}

fn entity_updates(block: &Block) -> Vec<&EntityUpdate> {
    block
        .messages
        .iter()
        .filter_map(|m| match m {
            ServerCmd::EntityUpdate(update) => Some(update),
            _ => None,
        })
        .collect()
}

fn merge_pair(base: &mut Demo, other: &Demo) -> Result<(), CleanupError> {
    let time = base.get_time()?;
    let time_other = other.get_time()?;

    let mut i = 0;
    for (i_other, other_block) in other.blocks.iter().enumerate() {
        while time_other[i_other] > time[i] {
            i += 1;
            if i >= base.blocks.len() {
                return Ok(());
            }
        }
        if time[i] != time_other[i_other] {
            // starts usually differ between host and client; everything
            // else should line up
            continue;
        }

        let mut additions: Vec<ServerCmd> = Vec::new();
        {
            let base_updates = entity_updates(&base.blocks[i]);
            for other_update in entity_updates(other_block) {
                match base_updates
                    .iter()
                    .find(|u| u.entity_num == other_update.entity_num)
                {
                    Some(existing) => {
                        if **existing != *other_update {
                            return Err(CleanupError::MergeMismatch(other_update.entity_num));
                        }
                    }
                    None => additions.push(ServerCmd::EntityUpdate(other_update.clone())),
                }
            }
        }
        base.blocks[i].messages.extend(additions);
    }
    Ok(())
}

/// Folds the entity traffic of sibling co-op demos into the first demo so a
/// single replay shows every player.
pub fn merge(mut demos: Vec<Demo>) -> Result<Demo, CleanupError> {
    let mut base = demos.remove(0);
    for other in demos.iter() {
        merge_pair(&mut base, other)?;
    }
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::demo::CdTrack;
    use crate::demo::ViewAngles;
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

    fn time(t: f32) -> ServerCmd {
        ServerCmd::Time(ServerCmdTime { time: t })
    }

    fn cshift_of(block: &Block) -> Option<Vec<u8>> {
        block.messages.iter().find_map(|m| match m {
            ServerCmd::StuffText(stuff) if stuff.text.starts_with(b"v_cshift") => {
                Some(stuff.text.clone())
            }
            _ => None,
        })
    }

    #[test]
    fn test_fadeout_is_linear_and_deduplicated() {
        let mut d = demo(vec![
            block(vec![time(58.0)]),
            block(vec![time(59.0)]),
            block(vec![time(59.5)]),
            // repeated time must not repeat the cshift
            block(vec![time(59.5)]),
            block(vec![time(60.0)]),
            // the true final time belongs to the disconnect tail
            block(vec![time(60.1)]),
        ]);
        fadeout(&mut d, 1.0);

        // fade anchors at 60.0: full black there, half way at 59.5, clear
        // at 59.0, and the walk stops once opacity reaches zero. The
        // backwards walk visits block 3 first, so the duplicate time in
        // block 2 adds nothing.
        assert_eq!(cshift_of(&d.blocks[4]).unwrap(), b"v_cshift 0 0 0 255\n".to_vec());
        assert_eq!(cshift_of(&d.blocks[3]).unwrap(), b"v_cshift 0 0 0 128\n".to_vec());
        assert!(cshift_of(&d.blocks[2]).is_none());
        assert_eq!(cshift_of(&d.blocks[1]).unwrap(), b"v_cshift 0 0 0 0\n".to_vec());
        assert!(cshift_of(&d.blocks[0]).is_none());
    }

    #[test]
    fn test_fadein_anchors_at_second_time() {
        let mut d = demo(vec![
            block(vec![time(0.0)]),
            block(vec![time(1.0)]),
            block(vec![time(1.5)]),
            block(vec![time(2.0)]),
            block(vec![time(3.0)]),
        ]);
        fadein(&mut d, 1.0);
        assert_eq!(cshift_of(&d.blocks[1]).unwrap(), b"v_cshift 0 0 0 255\n".to_vec());
        assert_eq!(cshift_of(&d.blocks[2]).unwrap(), b"v_cshift 0 0 0 128\n".to_vec());
        assert_eq!(cshift_of(&d.blocks[3]).unwrap(), b"v_cshift 0 0 0 0\n".to_vec());
        assert!(cshift_of(&d.blocks[4]).is_none());
    }

    #[test]
    fn test_merge_adds_missing_entities() {
        let update = |num| ServerCmd::EntityUpdate(EntityUpdate::signal(num, None));
        let demos = vec![
            demo(vec![
                block(vec![time(1.0), update(1)]),
                block(vec![time(2.0), update(1)]),
            ]),
            demo(vec![
                block(vec![time(1.5), update(2)]),
                block(vec![time(2.0), update(1), update(2)]),
            ]),
        ];
        let merged = merge(demos).unwrap();
        let nums: Vec<i16> = merged.blocks[1]
            .messages
            .iter()
            .filter_map(|m| match m {
                ServerCmd::EntityUpdate(u) => Some(u.entity_num),
                _ => None,
            })
            .collect();
        assert_eq!(nums, vec![1, 2]);
        // the unmatched 1.5s block contributes nothing
        assert_eq!(merged.blocks[0].messages.len(), 2);
    }
}
