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

//! A faithful round-trip codec for NetQuake/FitzQuake/RMQ demo files plus
//! semantics-aware transforms on top of it: per-frame queries, pause and
//! intermission cleanup, screen fades, and a full gameplay-state
//! reconstruction that replays recorded demos under new starting stats
//! while keeping every on-wire pickup event consistent.
//!
//! The core pipeline is bytes → [`net::ServerCmd`] messages →
//! [`demo::Block`]s → [`demo::Demo`], transforms mutating the demo in
//! place, and the same path backwards to bytes. Coordinate and angle
//! encodings vary with the protocol announced by the ServerInfo message,
//! so both directions thread a [`net::ProtocolState`] through every block.

pub mod cinematic;
pub mod cleanup;
pub mod collision;
pub mod demo;
pub mod net;
pub mod stats;
pub mod util;
