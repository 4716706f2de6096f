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

//! The demo container: a cd-track header followed by length-prefixed blocks
//! of view angles and messages, plus the derived per-block queries the
//! transforms are built on.

use std::io;
use std::io::BufRead;
use std::io::Cursor;
use std::io::Read;

use crate::net::ItemFlags;
use crate::net::NetError;
use crate::net::Protocol;
use crate::net::ProtocolState;
use crate::net::ServerCmd;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Net(#[from] NetError),
    #[error("cd track header not terminated within {} bytes", CdTrack::MAX_LEN)]
    CdTrackOverrun,
    #[error("block {block}, message at offset {offset}: {source}")]
    Message {
        block: usize,
        offset: u64,
        source: NetError,
    },
    #[error("block {block}: declared {declared} message bytes, consumed {consumed}")]
    BlockLength {
        block: usize,
        declared: i32,
        consumed: u64,
    },
    #[error("block {block}: more than one {kind} message")]
    DuplicatePerBlock { block: usize, kind: &'static str },
    #[error("expected exactly one ServerInfo message, found {0}")]
    ServerInfoCount(usize),
    #[error("demo contains no SetView message")]
    SetViewMissing,
    #[error("SetView messages disagree on the view entity")]
    SetViewConflict,
    #[error("demo contains no ClientData message")]
    NoClientData,
}

/// The short ASCII header naming the cd track to play, newline included.
#[derive(Clone, Debug, PartialEq)]
pub struct CdTrack {
    pub text: Vec<u8>,
}

impl CdTrack {
    pub const MAX_LEN: usize = 12;

    pub fn write<W>(&self, writer: &mut W) -> Result<(), DemoError>
    where
        W: WriteBytesExt,
    {
        writer.write_all(&self.text)?;
        Ok(())
    }

    pub fn parse<R>(reader: &mut R) -> Result<CdTrack, DemoError>
    where
        R: BufRead + ReadBytesExt,
    {
        let mut text = Vec::new();
        for _ in 0..CdTrack::MAX_LEN {
            let byte = reader.read_u8()?;
            text.push(byte);
            if byte == b'\n' {
                return Ok(CdTrack { text });
            }
        }
        Err(DemoError::CdTrackOverrun)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ViewAngles {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl ViewAngles {
    pub fn write<W>(&self, writer: &mut W) -> Result<(), DemoError>
    where
        W: WriteBytesExt,
    {
        writer.write_f32::<LittleEndian>(self.pitch)?;
        writer.write_f32::<LittleEndian>(self.yaw)?;
        writer.write_f32::<LittleEndian>(self.roll)?;
        Ok(())
    }

    pub fn parse<R>(reader: &mut R) -> Result<ViewAngles, DemoError>
    where
        R: BufRead + ReadBytesExt,
    {
        let pitch = reader.read_f32::<LittleEndian>()?;
        let yaw = reader.read_f32::<LittleEndian>()?;
        let roll = reader.read_f32::<LittleEndian>()?;
        Ok(ViewAngles { pitch, yaw, roll })
    }
}

/// One server frame: view angles plus a length-prefixed run of messages.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub viewangles: ViewAngles,
    pub messages: Vec<ServerCmd>,
}

impl Block {
    pub fn write<W>(&self, writer: &mut W, state: &mut ProtocolState) -> Result<(), DemoError>
    where
        W: WriteBytesExt,
    {
        let mut scratch = Vec::new();
        for message in self.messages.iter() {
            message.write_cmd(&mut scratch, state)?;
        }
        if self.messages.is_empty() {
            // a block without messages is not supported, so write a nop
            ServerCmd::NoOp.write_cmd(&mut scratch, state)?;
        }

        writer.write_i32::<LittleEndian>(scratch.len() as i32)?;
        self.viewangles.write(writer)?;
        writer.write_all(&scratch)?;
        Ok(())
    }

    pub fn parse<R>(
        reader: &mut R,
        state: &mut ProtocolState,
        block_index: usize,
    ) -> Result<Block, DemoError>
    where
        R: BufRead + ReadBytesExt,
    {
        let block_len = reader.read_i32::<LittleEndian>()?;
        let viewangles = ViewAngles::parse(reader)?;

        let mut payload = vec![0; block_len.max(0) as usize];
        reader.read_exact(&mut payload)?;

        let mut messages = Vec::new();
        let mut curs = Cursor::new(payload.as_slice());
        while (curs.position() as usize) < payload.len() {
            let offset = curs.position();
            let message = ServerCmd::read_cmd(&mut curs, state).map_err(|source| {
                // a message running past the block payload surfaces as a
                // short read, which is a framing mismatch
                match source {
                    NetError::Io(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                        DemoError::BlockLength {
                            block: block_index,
                            declared: block_len,
                            consumed: offset,
                        }
                    }
                    source => DemoError::Message {
                        block: block_index,
                        offset,
                        source,
                    },
                }
            })?;
            messages.push(message);
        }

        Ok(Block {
            viewangles,
            messages,
        })
    }

    fn has_time_message(&self) -> bool {
        self.messages
            .iter()
            .any(|m| matches!(m, ServerCmd::Time(_)))
    }
}

/// The projection of a ClientData message the reconstruction works on.
///
/// `active_weapon` keeps the byte-truncated item-flag convention: an empty
/// set is the axe.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientStats {
    pub items: ItemFlags,
    pub health: i32,
    pub armor: i32,
    pub shells: i32,
    pub nails: i32,
    pub rockets: i32,
    pub cells: i32,
    pub active_weapon: ItemFlags,
    pub ammo: i32,
    pub weapon_model: u16,
    pub weapon_frame: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Demo {
    pub cdtrack: CdTrack,
    pub blocks: Vec<Block>,
}

impl Demo {
    /// Writes the demo. The protocol starts as plain NetQuake and follows
    /// ServerInfo messages unless `protocol_override` pins it.
    pub fn write<W>(&self, writer: &mut W, protocol_override: Option<Protocol>) -> Result<(), DemoError>
    where
        W: WriteBytesExt,
    {
        let mut state = match protocol_override {
            Some(protocol) => ProtocolState::with_override(protocol),
            None => ProtocolState::new(),
        };
        self.cdtrack.write(writer)?;
        for block in self.blocks.iter() {
            block.write(writer, &mut state)?;
        }
        Ok(())
    }

    pub fn parse<R>(reader: &mut R) -> Result<Demo, DemoError>
    where
        R: BufRead + ReadBytesExt,
    {
        let cdtrack = CdTrack::parse(reader)?;
        let mut blocks = Vec::new();
        let mut state = ProtocolState::new();
        while !reader.fill_buf()?.is_empty() {
            let block = Block::parse(reader, &mut state, blocks.len())?;
            blocks.push(block);
        }
        Ok(Demo { cdtrack, blocks })
    }

    /// Returns the (model, sound) precache lists from the demo's single
    /// ServerInfo message, sentinels included.
    pub fn get_precaches(&self) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>), DemoError> {
        let mut infos = self.blocks.iter().flat_map(|b| b.messages.iter()).filter_map(|m| {
            match m {
                ServerCmd::ServerInfo(info) => Some(info),
                _ => None,
            }
        });
        let info = match infos.next() {
            Some(info) => info,
            None => return Err(DemoError::ServerInfoCount(0)),
        };
        if infos.next().is_some() {
            return Err(DemoError::ServerInfoCount(2 + infos.count()));
        }
        Ok((info.model_precache.clone(), info.sound_precache.clone()))
    }

    /// The recording player's entity number, per the demo's SetView
    /// messages (which must agree).
    pub fn get_viewentity(&self) -> Result<i16, DemoError> {
        let mut view_ent = None;
        for block in self.blocks.iter() {
            for message in block.messages.iter() {
                if let ServerCmd::SetView(set_view) = message {
                    match view_ent {
                        None => view_ent = Some(set_view.view_ent),
                        Some(prev) if prev != set_view.view_ent => {
                            return Err(DemoError::SetViewConflict)
                        }
                        Some(_) => (),
                    }
                }
            }
        }
        view_ent.ok_or(DemoError::SetViewMissing)
    }

    /// Per-block yaw with 360-degree unwrapping: each block's yaw is shifted
    /// by whole turns so consecutive values stay within half a turn.
    pub fn get_yaw(&self) -> Vec<f32> {
        let mut yaw: Vec<f32> = self.blocks.iter().map(|b| b.viewangles.yaw).collect();
        for i in 1..yaw.len() {
            let prev = yaw[i - 1];
            if ((yaw[i] + 360.0) - prev).abs() < (yaw[i] - prev).abs() {
                for y in yaw[i..].iter_mut() {
                    *y += 360.0;
                }
            } else if ((yaw[i] - 360.0) - prev).abs() < (yaw[i] - prev).abs() {
                for y in yaw[i..].iter_mut() {
                    *y -= 360.0;
                }
            }
        }
        yaw
    }

    pub fn get_pitch(&self) -> Vec<f32> {
        self.blocks.iter().map(|b| b.viewangles.pitch).collect()
    }

    /// Per-block server time, carrying the last seen TimeMessage forward
    /// from 0.0.
    pub fn get_time(&self) -> Result<Vec<f64>, DemoError> {
        let mut times = Vec::with_capacity(self.blocks.len());
        let mut previous_time = 0.0f64;
        for (i, block) in self.blocks.iter().enumerate() {
            let mut block_time = None;
            for message in block.messages.iter() {
                if let ServerCmd::Time(time) = message {
                    if block_time.is_some() {
                        return Err(DemoError::DuplicatePerBlock {
                            block: i,
                            kind: "Time",
                        });
                    }
                    block_time = Some(time.time as f64);
                }
            }
            if let Some(time) = block_time {
                previous_time = time;
            }
            times.push(previous_time);
        }
        Ok(times)
    }

    /// The greatest index `j < block_index` whose block carries a
    /// TimeMessage, or `block_index - 1` if there is none.
    pub fn get_previous_block_index_with_time_message(&self, block_index: usize) -> usize {
        (0..block_index)
            .rev()
            .find(|&j| self.blocks[j].has_time_message())
            .unwrap_or_else(|| block_index.saturating_sub(1))
    }

    /// Indices of blocks in which the server forced the view angles.
    pub fn get_fixangle_indices(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                b.messages
                    .iter()
                    .any(|m| matches!(m, ServerCmd::SetAngle(_)))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Per-block client stats; `None` for blocks without a ClientData
    /// message.
    pub fn get_client_stats(&self) -> Result<Vec<Option<ClientStats>>, DemoError> {
        let mut client_stats = Vec::with_capacity(self.blocks.len());
        for (i, block) in self.blocks.iter().enumerate() {
            let mut stats = None;
            for message in block.messages.iter() {
                if let ServerCmd::ClientData(data) = message {
                    if stats.is_some() {
                        return Err(DemoError::DuplicatePerBlock {
                            block: i,
                            kind: "ClientData",
                        });
                    }
                    stats = Some(ClientStats {
                        items: data.items,
                        health: data.health as i32,
                        armor: data.armor as i32,
                        shells: data.shells as i32,
                        nails: data.nails as i32,
                        rockets: data.rockets as i32,
                        cells: data.cells as i32,
                        active_weapon: ItemFlags::from_bits_truncate(data.active_weapon as u32),
                        ammo: data.ammo as i32,
                        weapon_model: data.weapon,
                        weapon_frame: data.weapon_frame,
                    });
                }
            }
            client_stats.push(stats);
        }
        Ok(client_stats)
    }

    pub fn get_final_client_stats(&self) -> Result<ClientStats, DemoError> {
        self.get_client_stats()?
            .into_iter()
            .rev()
            .flatten()
            .next()
            .ok_or(DemoError::NoClientData)
    }

    /// Writes a per-block stats list back into the ClientData messages.
    pub fn set_client_stats(&mut self, client_stats: &[Option<ClientStats>]) {
        for (block, stats) in self.blocks.iter_mut().zip(client_stats.iter()) {
            let stats = match stats {
                Some(stats) => stats,
                None => continue,
            };
            for message in block.messages.iter_mut() {
                if let ServerCmd::ClientData(data) = message {
                    data.items = stats.items;
                    data.health = stats.health as i16;
                    data.armor = stats.armor as u16;
                    data.shells = stats.shells as u16;
                    data.nails = stats.nails as u16;
                    data.rockets = stats.rockets as u16;
                    data.cells = stats.cells as u16;
                    data.active_weapon = stats.active_weapon.bits() as u8;
                    data.ammo = stats.ammo as u16;
                    data.weapon = stats.weapon_model;
                    data.weapon_frame = stats.weapon_frame;
                }
            }
        }
    }

    pub fn set_yaw(&mut self, yaw: &[f32]) {
        for (block, y) in self.blocks.iter_mut().zip(yaw.iter()) {
            block.viewangles.yaw = *y;
        }
    }

    pub fn set_pitch(&mut self, pitch: &[f32]) {
        for (block, p) in self.blocks.iter_mut().zip(pitch.iter()) {
            block.viewangles.pitch = *p;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::net::ServerCmdPrint;
    use crate::net::ServerCmdSetAngle;
    use crate::net::ServerCmdTime;

    use cgmath::Deg;
    use cgmath::Vector3;

    fn angles(pitch: f32, yaw: f32) -> ViewAngles {
        ViewAngles {
            pitch,
            yaw,
            roll: 0.0,
        }
    }

    fn time_cmd(time: f32) -> ServerCmd {
        ServerCmd::Time(ServerCmdTime { time })
    }

    fn demo_with_blocks(blocks: Vec<Block>) -> Demo {
        Demo {
            cdtrack: CdTrack {
                text: b"2\n".to_vec(),
            },
            blocks,
        }
    }

    #[test]
    fn test_cdtrack_parse_overrun() {
        let mut curs = Cursor::new(b"0123456789abcdef\n".to_vec());
        match CdTrack::parse(&mut curs) {
            Err(DemoError::CdTrackOverrun) => (),
            other => panic!("expected CdTrackOverrun, got {:?}", other),
        }
    }

    #[test]
    fn test_block_round_trip() {
        let block = Block {
            viewangles: angles(-5.0, 90.0),
            messages: vec![
                time_cmd(1.5),
                ServerCmd::Print(ServerCmdPrint {
                    text: b"hello\n".to_vec(),
                }),
            ],
        };

        let mut bytes = Vec::new();
        let mut state = ProtocolState::new();
        block.write(&mut bytes, &mut state).unwrap();

        let mut state = ProtocolState::new();
        let mut curs = Cursor::new(bytes.as_slice());
        let reread = Block::parse(&mut curs, &mut state, 0).unwrap();
        assert_eq!(block, reread);
    }

    #[test]
    fn test_empty_block_writes_a_nop() {
        let block = Block {
            viewangles: angles(0.0, 0.0),
            messages: Vec::new(),
        };
        let mut bytes = Vec::new();
        let mut state = ProtocolState::new();
        block.write(&mut bytes, &mut state).unwrap();

        // length prefix of 1, three angles, one nop byte
        assert_eq!(bytes.len(), 4 + 12 + 1);
        assert_eq!(bytes[0..4], [1, 0, 0, 0]);
        assert_eq!(*bytes.last().unwrap(), 1);
    }

    #[test]
    fn test_block_length_mismatch_is_fatal() {
        // declared two bytes of messages but a print message wants more
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        bytes.extend_from_slice(&[8, b'x']); // print, unterminated

        let mut state = ProtocolState::new();
        let mut curs = Cursor::new(bytes.as_slice());
        match Block::parse(&mut curs, &mut state, 3) {
            Err(DemoError::BlockLength { block: 3, .. }) => (),
            other => panic!("expected BlockLength, got {:?}", other),
        }
    }

    #[test]
    fn test_get_time_carries_forward() {
        let demo = demo_with_blocks(vec![
            Block {
                viewangles: angles(0.0, 0.0),
                messages: vec![ServerCmd::NoOp],
            },
            Block {
                viewangles: angles(0.0, 0.0),
                messages: vec![time_cmd(1.25)],
            },
            Block {
                viewangles: angles(0.0, 0.0),
                messages: vec![ServerCmd::NoOp],
            },
            Block {
                viewangles: angles(0.0, 0.0),
                messages: vec![time_cmd(1.5)],
            },
        ]);
        assert_eq!(demo.get_time().unwrap(), vec![0.0, 1.25, 1.25, 1.5]);
        assert_eq!(demo.get_previous_block_index_with_time_message(3), 1);
        assert_eq!(demo.get_previous_block_index_with_time_message(1), 0);
    }

    #[test]
    fn test_yaw_unwrap_at_the_seam() {
        let demo = demo_with_blocks(vec![
            Block {
                viewangles: angles(0.0, 359.5),
                messages: vec![ServerCmd::NoOp],
            },
            Block {
                viewangles: angles(0.0, 0.5),
                messages: vec![ServerCmd::NoOp],
            },
        ]);
        assert_eq!(demo.get_yaw(), vec![359.5, 360.5]);
    }

    #[test]
    fn test_yaw_unwrap_monotone_steps() {
        let raw = [350.0f32, 10.0, 30.0, 250.0, 230.0];
        let blocks = raw
            .iter()
            .map(|y| Block {
                viewangles: angles(0.0, *y),
                messages: vec![ServerCmd::NoOp],
            })
            .collect();
        let unwrapped = demo_with_blocks(blocks).get_yaw();
        for i in 1..unwrapped.len() {
            assert!((unwrapped[i] - unwrapped[i - 1]).abs() <= 180.0);
            let remainder = (unwrapped[i] - raw[i]) % 360.0;
            assert_eq!(remainder, 0.0);
        }
    }

    #[test]
    fn test_fixangle_indices() {
        let demo = demo_with_blocks(vec![
            Block {
                viewangles: angles(0.0, 0.0),
                messages: vec![ServerCmd::NoOp],
            },
            Block {
                viewangles: angles(0.0, 0.0),
                messages: vec![ServerCmd::SetAngle(ServerCmdSetAngle {
                    angles: Vector3::new(Deg(0.0), Deg(90.0), Deg(0.0)),
                })],
            },
        ]);
        assert_eq!(demo.get_fixangle_indices(), vec![1]);
    }
}
