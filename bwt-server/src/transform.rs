//! Burrows-Wheeler transform of a text buffer.
//!
//! The input is treated as a sequence of Unicode scalar values. Rotations are
//! compared by `char` value, which is the same order as comparing the UTF-8
//! bytes of the rotated strings, so `"é"` (U+00E9) sorts after every ASCII
//! character.
//!
//! The sentinel `$` is assumed to be absent from the input and smaller than
//! every character in it. Neither assumption is checked: inputs containing `$`
//! or characters below it (space, `!`, `"`, `#`) still produce a deterministic
//! output of length `n + 1`, but that output is no longer guaranteed to be
//! invertible.

use std::{
    cmp::Ordering,
    time::{Duration, Instant},
};

/// Character appended to the input before rotating.
pub const SENTINEL: char = '$';

/// Computes the Burrows-Wheeler transform of `text`.
///
/// Equivalent to building every cyclic rotation of `text + "$"`, sorting
/// them, and concatenating their last characters. The rotations are never
/// materialized: a sorted list of start offsets is enough.
pub fn transform(text: &str) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    chars.push(SENTINEL);
    let len = chars.len();

    let mut offsets: Vec<usize> = (0..len).collect();
    offsets.sort_by(|&a, &b| compare_rotations(&chars, a, b));

    offsets
        .into_iter()
        .map(|offset| chars[(offset + len - 1) % len])
        .collect()
}

/// Runs [`transform`] and reports how long the computation took.
pub fn transform_timed(text: &str) -> (String, Duration) {
    let start = Instant::now();
    let transformed = transform(text);
    (transformed, start.elapsed())
}

fn compare_rotations(chars: &[char], a: usize, b: usize) -> Ordering {
    let len = chars.len();
    for step in 0..len {
        let ordering = chars[(a + step) % len].cmp(&chars[(b + step) % len]);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
