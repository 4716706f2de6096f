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

//! End-to-end tests over synthetic but structurally faithful demos: byte
//! round-trips across protocols, reconstruction idempotence, and pickup
//! suppression with its event fixup.

use std::io::Cursor;

use demtool::demo::Block;
use demtool::demo::CdTrack;
use demtool::demo::ClientStats;
use demtool::demo::Demo;
use demtool::demo::ViewAngles;
use demtool::net::EntityUpdate;
use demtool::net::ItemFlags;
use demtool::net::Protocol;
use demtool::net::ProtocolFlags;
use demtool::net::ProtocolState;
use demtool::net::ProtocolVersion;
use demtool::net::ServerCmd;
use demtool::net::ServerCmdClientData;
use demtool::net::ServerCmdPrint;
use demtool::net::ServerCmdServerInfo;
use demtool::net::ServerCmdSetAngle;
use demtool::net::ServerCmdSetView;
use demtool::net::ServerCmdSignOnNum;
use demtool::net::ServerCmdSound;
use demtool::net::ServerCmdSpawnBaseline;
use demtool::net::ServerCmdStuffText;
use demtool::net::ServerCmdTime;
use demtool::net::ServerUpdateFlags;
use demtool::net::SoundFlags;
use demtool::stats;

use cgmath::Deg;
use cgmath::Vector3;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const VIEW_ENTITY: i16 = 1;
const SHELLS_BOX_ENTITY: i16 = 30;
const MEGAHEALTH_ENTITY: i16 = 31;

const PLAYER_MODEL: u8 = 2;
const SHELLS_BOX_MODEL: u8 = 3;
const MEGAHEALTH_MODEL: u8 = 4;
const V_SHOT_MODEL: u16 = 6;

const LOCK4_SOUND: u16 = 1;

fn models() -> Vec<Vec<u8>> {
    [
        b"".as_slice(),
        b"maps/e1m1.bsp",
        b"progs/player.mdl",
        b"maps/b_shell0.bsp",
        b"maps/b_bh100.bsp",
        b"progs/v_axe.mdl",
        b"progs/v_shot.mdl",
        b"progs/v_shot2.mdl",
        b"progs/v_nail.mdl",
        b"progs/v_nail2.mdl",
        b"progs/v_rock.mdl",
        b"progs/v_rock2.mdl",
        b"progs/v_light.mdl",
    ]
    .iter()
    .map(|m| m.to_vec())
    .collect()
}

fn sounds() -> Vec<Vec<u8>> {
    [
        b"".as_slice(),
        b"weapons/lock4.wav",
        b"items/r_item2.wav",
        b"weapons/guncock.wav",
    ]
    .iter()
    .map(|s| s.to_vec())
    .collect()
}

fn server_info() -> ServerCmd {
    ServerCmd::ServerInfo(ServerCmdServerInfo {
        version: ProtocolVersion::NetQuake,
        protocol_flags: ProtocolFlags::empty(),
        max_clients: 1,
        game_type: 0,
        level_name: b"the Slipgate Complex".to_vec(),
        model_precache: models(),
        sound_precache: sounds(),
    })
}

fn baseline(entity_num: i16, model_index: u8, origin: Vector3<f32>) -> ServerCmd {
    ServerCmd::SpawnBaseline(ServerCmdSpawnBaseline {
        entity_num,
        model_index,
        frame: 0,
        colormap: 0,
        skin: 0,
        origin,
        angles: Vector3::new(Deg(0.0), Deg(0.0), Deg(0.0)),
    })
}

fn time(t: f32) -> ServerCmd {
    ServerCmd::Time(ServerCmdTime { time: t })
}

fn player_at(pos: Vector3<f32>) -> ServerCmd {
    ServerCmd::EntityUpdate(EntityUpdate::signal(VIEW_ENTITY, Some(pos)))
}

fn presence(entity_num: i16) -> ServerCmd {
    ServerCmd::EntityUpdate(EntityUpdate::signal(entity_num, None))
}

fn client_data(shells: u16) -> ServerCmd {
    ServerCmd::ClientData(ServerCmdClientData {
        flags: ServerUpdateFlags::WEAPON,
        view_height: ServerCmdClientData::DEFAULT_VIEW_HEIGHT,
        ideal_pitch: 0.0,
        punch_angle: Vector3::new(0.0, 0.0, 0.0),
        velocity: Vector3::new(0.0, 0.0, 0.0),
        items: ItemFlags::SHOTGUN | ItemFlags::AXE | ItemFlags::SHELLS,
        weapon_frame: 0,
        armor: 0,
        weapon: V_SHOT_MODEL,
        health: 100,
        ammo: shells,
        shells,
        nails: 0,
        rockets: 0,
        cells: 0,
        active_weapon: ItemFlags::SHOTGUN.bits() as u8,
        weapon_alpha: 1,
    })
}

fn pickup_sound(position: Vector3<f32>) -> ServerCmd {
    ServerCmd::Sound(ServerCmdSound {
        flags: SoundFlags::empty(),
        volume: ServerCmdSound::DEFAULT_VOLUME,
        attenuation: ServerCmdSound::DEFAULT_ATTENUATION,
        entity_id: VIEW_ENTITY as u16,
        channel: 3,
        sound_id: LOCK4_SOUND,
        position,
    })
}

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

/// A one-player demo in which the player crosses a shell box at t=0.15,
/// picking it up (shells 50 -> 70), with an untouched megahealth elsewhere
/// on the map.
fn pickup_demo() -> Demo {
    let far = Vector3::new(500.0, 500.0, 24.0);
    let near = Vector3::new(400.0, 400.0, 24.0);
    let on_box = Vector3::new(116.0, 116.0, 24.0);
    // pickup sounds spawn at the player box center
    let sound_pos = Vector3::new(116.0, 116.0, 28.0);

    Demo {
        cdtrack: CdTrack {
            text: b"2\n".to_vec(),
        },
        blocks: vec![
            // 0: sign-on header
            block(vec![
                server_info(),
                ServerCmd::SetView(ServerCmdSetView {
                    view_ent: VIEW_ENTITY,
                }),
                ServerCmd::SignOnNum(ServerCmdSignOnNum { stage: 2 }),
            ]),
            // 1: baselines
            block(vec![
                baseline(VIEW_ENTITY, PLAYER_MODEL, far),
                baseline(
                    SHELLS_BOX_ENTITY,
                    SHELLS_BOX_MODEL,
                    Vector3::new(100.0, 100.0, 0.0),
                ),
                baseline(
                    MEGAHEALTH_ENTITY,
                    MEGAHEALTH_MODEL,
                    Vector3::new(300.0, 300.0, 0.0),
                ),
            ]),
            // 2-3: approach
            block(vec![
                time(0.05),
                client_data(50),
                player_at(far),
                presence(SHELLS_BOX_ENTITY),
                presence(MEGAHEALTH_ENTITY),
            ]),
            block(vec![
                time(0.10),
                client_data(50),
                player_at(near),
                presence(SHELLS_BOX_ENTITY),
                presence(MEGAHEALTH_ENTITY),
            ]),
            // 4: the pickup frame; the consumed box sends no more updates
            block(vec![
                time(0.15),
                client_data(70),
                player_at(on_box),
                presence(MEGAHEALTH_ENTITY),
                pickup_sound(sound_pos),
            ]),
            // 5: the pickup print flow in its own block
            block(vec![
                ServerCmd::Print(ServerCmdPrint {
                    text: b"You got the shells\n".to_vec(),
                }),
                ServerCmd::StuffText(ServerCmdStuffText {
                    text: b"bf\n".to_vec(),
                }),
            ]),
            // 6-7: aftermath
            block(vec![
                time(0.20),
                client_data(70),
                player_at(far),
                presence(MEGAHEALTH_ENTITY),
            ]),
            block(vec![
                time(0.25),
                client_data(70),
                player_at(far),
                presence(MEGAHEALTH_ENTITY),
            ]),
            // 8: disconnect tail
            block(vec![ServerCmd::Disconnect]),
        ],
    }
}

fn to_bytes(demo: &Demo) -> Vec<u8> {
    let mut bytes = Vec::new();
    demo.write(&mut bytes, None).unwrap();
    bytes
}

#[test]
fn test_demo_byte_round_trip() {
    let demo = pickup_demo();
    let bytes = to_bytes(&demo);

    let mut curs = Cursor::new(bytes.as_slice());
    let reread = Demo::parse(&mut curs).unwrap();
    assert_eq!(reread, demo);
    assert_eq!(to_bytes(&reread), bytes);
}

#[test]
fn test_rmq_float_coords_widen_origins() {
    let protocol = Protocol {
        version: ProtocolVersion::Rmq,
        flags: ProtocolFlags::FLOATCOORD,
    };
    let update_block = block(vec![player_at(Vector3::new(1.25, 2.5, 3.75))]);

    let mut state = ProtocolState::with_override(protocol);
    let mut bytes = Vec::new();
    update_block.write(&mut bytes, &mut state).unwrap();
    // 4-byte length, 12 bytes of view angles, then flags byte + entity
    // byte + three f32 origin components
    assert_eq!(bytes.len(), 4 + 12 + 1 + 1 + 12);

    let mut state = ProtocolState::with_override(protocol);
    let mut curs = Cursor::new(bytes.as_slice());
    let reread = Block::parse(&mut curs, &mut state, 0).unwrap();
    assert_eq!(reread, update_block);
}

#[test]
fn test_observed_collection_inference() {
    let demo = pickup_demo();
    let (statics, backpacks) = stats::get_collections(&demo).unwrap();

    let flattened: Vec<_> = statics.iter().flatten().collect();
    assert_eq!(flattened.len(), 1);
    let collection = flattened[0];
    assert_eq!(collection.entity_num, SHELLS_BOX_ENTITY);
    assert_eq!(collection.kind, stats::CollectableKind::Shells20);
    assert!((collection.time - 0.15).abs() < 1e-6);
    assert!(collection.event.is_some());
    assert_eq!(statics[4].len(), 1);

    assert!(backpacks.iter().all(|b| b.is_empty()));
}

#[test]
fn test_reconstruction_idempotence() {
    init_logging();
    let mut demo = pickup_demo();
    let original_bytes = to_bytes(&demo);
    let original_stats = demo.get_client_stats().unwrap();

    let start = demo.get_client_stats().unwrap().into_iter().flatten().next().unwrap();
    stats::apply_new_start_stats(&[start], std::slice::from_mut(&mut demo), false).unwrap();

    assert_eq!(demo.get_client_stats().unwrap(), original_stats);
    assert_eq!(to_bytes(&demo), original_bytes);
}

#[test]
fn test_suppressed_pickup_is_scrubbed_from_the_wire() {
    init_logging();
    let mut demo = pickup_demo();

    // a player already at the shell cap cannot pick the box up
    let mut start: ClientStats = demo
        .get_client_stats()
        .unwrap()
        .into_iter()
        .flatten()
        .next()
        .unwrap();
    start.shells = 100;
    start.ammo = 100;
    stats::apply_new_start_stats(&[start], std::slice::from_mut(&mut demo), false).unwrap();

    // the recomputed stats hold the cap through the old pickup frame
    for stats in demo.get_client_stats().unwrap().into_iter().flatten() {
        assert_eq!(stats.shells, 100);
        assert_eq!(stats.ammo, 100);
    }

    // the pickup sound is gone
    assert!(!demo.blocks[4]
        .messages
        .iter()
        .any(|m| matches!(m, ServerCmd::Sound(_))));
    // the print flow block was emptied
    assert!(demo.blocks[5].messages.is_empty());

    // the box is kept alive in every later time-bearing block
    for i in [4usize, 6, 7] {
        let kept = demo.blocks[i].messages.iter().any(|m| match m {
            ServerCmd::EntityUpdate(update) => update.entity_num == SHELLS_BOX_ENTITY,
            _ => false,
        });
        assert!(kept, "block {} should re-assert the shell box", i);
    }
    // but not in earlier ones beyond its own updates
    assert!(!demo.blocks[8].messages.iter().any(|m| match m {
        ServerCmd::EntityUpdate(update) => update.entity_num == SHELLS_BOX_ENTITY,
        _ => false,
    }));

    // the result still round-trips byte for byte
    let bytes = to_bytes(&demo);
    let mut curs = Cursor::new(bytes.as_slice());
    let reread = Demo::parse(&mut curs).unwrap();
    assert_eq!(to_bytes(&reread), bytes);
}

#[test]
fn test_angle_queries_on_demo() {
    let mut demo = pickup_demo();
    demo.blocks[2].viewangles.yaw = 359.5;
    demo.blocks[3].viewangles.yaw = 0.5;
    demo.blocks[3].messages.push(ServerCmd::SetAngle(ServerCmdSetAngle {
        angles: Vector3::new(Deg(0.0), Deg(90.0), Deg(0.0)),
    }));

    let yaw = demo.get_yaw();
    assert_eq!(yaw[2], 359.5);
    assert_eq!(yaw[3], 360.5);
    assert_eq!(demo.get_fixangle_indices(), vec![3]);

    let times = demo.get_time().unwrap();
    assert!((times[4] - 0.15).abs() < 1e-6);
    // the print block carries the previous time forward
    assert_eq!(times[5], times[4]);
}
