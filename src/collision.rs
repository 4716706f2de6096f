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

//! Axis-aligned bounds with the server's link-time box extensions.

use cgmath::Vector3;

pub const PLAYER_MINS: [f32; 3] = [-16.0, -16.0, -24.0];
pub const PLAYER_MAXS: [f32; 3] = [16.0, 16.0, 32.0];

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Bounds {
    pub fn new(pos: Vector3<f32>, mins: [f32; 3], maxs: [f32; 3]) -> Bounds {
        Bounds {
            min: Vector3::new(pos.x + mins[0], pos.y + mins[1], pos.z + mins[2]),
            max: Vector3::new(pos.x + maxs[0], pos.y + maxs[1], pos.z + maxs[2]),
        }
    }
}

/// Separation between two boxes: the largest per-axis gap. Negative values
/// mean the boxes overlap on every axis.
pub fn distance(a: &Bounds, b: &Bounds) -> f32 {
    let mut result = f32::NEG_INFINITY;
    for i in 0..3 {
        let gap = (a.min[i] - b.max[i]).max(b.min[i] - a.max[i]);
        result = result.max(gap);
    }
    result
}

/// A collectable's box grows by 15 units on x and y when linked into the
/// world, following SV_LinkEdict.
pub fn collectable_bounds(pos: Vector3<f32>, mins: [f32; 3], maxs: [f32; 3]) -> Bounds {
    let mut bounds = Bounds::new(pos, mins, maxs);
    bounds.min.x -= 15.0;
    bounds.min.y -= 15.0;
    bounds.max.x += 15.0;
    bounds.max.y += 15.0;
    bounds
}

/// A player's box grows by one unit on every axis when linked, following
/// SV_LinkEdict.
pub fn player_bounds(pos: Vector3<f32>) -> Bounds {
    let mut bounds = Bounds::new(pos, PLAYER_MINS, PLAYER_MAXS);
    for i in 0..3 {
        bounds.min[i] -= 1.0;
        bounds.max[i] += 1.0;
    }
    bounds
}

/// The center of the player box; pickup sounds spawn here.
pub fn player_center(pos: Vector3<f32>) -> Vector3<f32> {
    Vector3::new(
        pos.x + 0.5 * (PLAYER_MINS[0] + PLAYER_MAXS[0]),
        pos.y + 0.5 * (PLAYER_MINS[1] + PLAYER_MAXS[1]),
        pos.z + 0.5 * (PLAYER_MINS[2] + PLAYER_MAXS[2]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_signs() {
        let a = Bounds::new(Vector3::new(0.0, 0.0, 0.0), [0.0; 3], [10.0, 10.0, 10.0]);
        let apart = Bounds::new(Vector3::new(15.0, 0.0, 0.0), [0.0; 3], [10.0, 10.0, 10.0]);
        let touching = Bounds::new(Vector3::new(10.0, 0.0, 0.0), [0.0; 3], [10.0, 10.0, 10.0]);
        let overlapping = Bounds::new(Vector3::new(5.0, 5.0, 5.0), [0.0; 3], [10.0, 10.0, 10.0]);

        assert_eq!(distance(&a, &apart), 5.0);
        assert_eq!(distance(&a, &touching), 0.0);
        assert!(distance(&a, &overlapping) < 0.0);
        assert_eq!(distance(&a, &overlapping), distance(&overlapping, &a));
    }

    #[test]
    fn test_collectable_floor_extension() {
        let bounds = collectable_bounds(Vector3::new(100.0, 100.0, 0.0), [0.0; 3], [32.0, 32.0, 56.0]);
        assert_eq!(bounds.min, Vector3::new(85.0, 85.0, 0.0));
        assert_eq!(bounds.max, Vector3::new(147.0, 147.0, 56.0));
    }

    #[test]
    fn test_player_center() {
        let center = player_center(Vector3::new(8.0, 8.0, 24.0));
        assert_eq!(center, Vector3::new(8.0, 8.0, 28.0));
    }
}
