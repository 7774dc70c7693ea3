use serde::{Serialize, Deserialize};

/// Integer (x, y) coordinate of a site in the worldspace.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Vector2D {
    pub x: i32,
    pub y: i32,
}

impl Vector2D {
    #[inline(always)]
    pub fn new(x: i32, y: i32) -> Self { Self { x, y } }
    #[inline(always)]
    pub fn zero() -> Self { Self::new(0, 0) }
    #[inline(always)]
    pub fn offset(self, dx: i32, dy: i32) -> Self { Self::new(self.x + dx, self.y + dy) }
}

/// The 8 Moore offsets in row-major order, (0, 0) excluded.
pub const MOORE_OFFSETS: [(i32, i32); 8] = [
    (-1, -1), (0, -1), (1, -1),
    (-1, 0),           (1, 0),
    (-1, 1),  (0, 1),  (1, 1),
];

/// Wraps `value` into `0..size`.
#[inline(always)]
pub fn wrap(value: i32, size: i32) -> i32 { value.rem_euclid(size) }

#[inline(always)]
pub fn clamp(val: i32, min: i32, max: i32) -> i32 { val.max(min).min(max) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_handles_negative_and_overflowing_coordinates() {
        assert_eq!(wrap(-1, 5), 4);
        assert_eq!(wrap(5, 5), 0);
        assert_eq!(wrap(3, 5), 3);
    }

    #[test]
    fn moore_offsets_exclude_origin() {
        assert!(!MOORE_OFFSETS.contains(&(0, 0)));
        assert_eq!(MOORE_OFFSETS.len(), 8);
    }
}
