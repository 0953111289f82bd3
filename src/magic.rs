//! Gaussian-filtered periodic-bit-pattern heuristic for superblock recognition.
//!
//! Flash that has never been formatted reads back as all-ones; flash that
//! has suffered partial corruption reads back with a handful of flipped
//! bits. A plain magic number distinguishes "formatted" from "blank" but
//! gives no tolerance for bit rot. Instead the superblock stamps a
//! periodic bit pattern and recognition runs it through a small Gaussian
//! smoothing kernel before comparing: isolated flipped bits get smoothed
//! away by their neighbours, while genuinely random flash content does not
//! reconstruct the pattern at all.

use crate::MAGIC_PERIOD;

/// 5-tap Gaussian kernel applied around each bit position.
const KERNEL: [i64; 5] = [614, 2447, 3877, 2447, 614];

/// Per-position divider, selected by distance from the nearest edge of the
/// 64-bit word (taps that fall off the edge contribute nothing, so edge
/// positions use a smaller divider to compensate for their reduced weight).
const DIVIDERS: [i64; 3] = [3470, 4693, 5000];

/// Build the canonical periodic pattern for `period`: a `period`-bit group
/// repeated across all 64 bits, with the low `period / 2` bits of each
/// group set.
pub fn generate_periodic(period: u8) -> u64 {
    let shift = 64u32.saturating_sub(period as u32 / 2);
    let generator = if shift >= 64 { u64::MAX } else { u64::MAX >> shift };

    let mut periodic: u64 = 0;
    let mut i = 0u32;
    while i < 64 {
        periodic = periodic.wrapping_shl(period as u32) | generator;
        i += period as u32;
    }
    periodic
}

/// The canonical pattern for the default period, as stamped into a freshly
/// formatted superblock.
pub fn canonical() -> u64 {
    generate_periodic(MAGIC_PERIOD)
}

fn divider_for(i: u32) -> i64 {
    let edge_distance = if i < 32 { i } else { 64 - i };
    DIVIDERS[core::cmp::min(edge_distance, 2) as usize]
}

/// Reconstruct `value` through the smoothing kernel and return the Hamming
/// distance between the result and the canonical pattern for `period`.
pub fn filtered_distance(period: u8, value: u64) -> u32 {
    let ideal = generate_periodic(period);
    let mut filtered: u64 = 0;

    for i in 0..64u32 {
        let mut conv: i64 = 0;
        for (j, &weight) in KERNEL.iter().enumerate() {
            let offset = j as i32 - 2;
            let bit_index = i as i32 + offset;
            if (0..64).contains(&bit_index) {
                conv += weight * ((value >> bit_index) & 1) as i64;
            }
        }
        if conv / divider_for(i) >= 1 {
            filtered |= 1u64 << i;
        }
    }

    (filtered ^ ideal).count_ones()
}

/// Does `value` recognize as the canonical pattern, tolerating up to
/// `threshold` flipped bits after smoothing?
pub fn recognize(period: u8, threshold: u32, value: u64) -> bool {
    filtered_distance(period, value) < threshold
}
