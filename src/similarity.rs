//! Pairwise similarity kernels over fingerprint records: the weighted
//! rough/dominant distance (`match_fooid`), the chroma kernel family, and the
//! calibrated composite `match_cpfm` that drives the EQ/NEQ/MATCH predicates.
//!
//! The combiner polynomial and the cut-offs are calibration outputs, kept as
//! named constants so they can be re-tuned in one place.

use crate::bitops::{cmp_low_bit, le_tail16, le_words, popcount16, popcount32, rdiff_fooid};
use crate::fprint::{Fingerprint, DOM_BYTES, R_BYTES};

/// Largest possible weighted rough distance: weight 9 on every two-bit lane.
pub const MAX_RDIFF: u32 = 9 * (R_BYTES as u32) * 8;
/// Largest possible dominant distance (plain Hamming).
pub const MAX_DOMDIFF: u32 = (DOM_BYTES as u32) * 8;
pub const MAX_TOTDIFF: u32 = MAX_RDIFF + MAX_DOMDIFF;

/// Records whose songlen differs by more than this fraction of the shorter
/// one never match.
pub const SONGLEN_TOLERANCE: f64 = 0.1;

/// `match_cpfm` cut-off for the equality predicate.
pub const EQ_THRESHOLD: f64 = 0.98;
/// `match_cpfm` cut-off for the looser match predicate.
pub const MATCH_THRESHOLD: f64 = 0.6;

// Calibrated combiner: clamp01(((c0 + c1·fm + c2·cp + c3·cp³) + off) / scale)
pub const COMBINE_INTERCEPT: f64 = 0.012985;
pub const COMBINE_FOOID: f64 = 0.263439;
pub const COMBINE_CHROMA: f64 = -0.683234;
pub const COMBINE_CHROMA_CUBED: f64 = 1.592623;
pub const COMBINE_OFFSET: f64 = 0.06348;
pub const COMBINE_SCALE: f64 = 1.2489;

/// Window half-width for the offline offset histogram.
const CHROMA_OFFSET_WINDOW: usize = 120;
/// Codewords differing in at most this many bits vote in the histogram.
const CHROMA_VOTE_BITS: u32 = 2;

#[inline]
pub(crate) fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Combine a quaternary-lane histogram into the weighted rough distance.
/// Lane value 0 contributes nothing; higher values encode larger jumps.
#[inline]
pub(crate) fn weighted_rdiff(rdiff: &[u32; 4]) -> u32 {
    rdiff[1] + 4 * rdiff[2] + 9 * rdiff[3]
}

/// Map a raw (rough, dominant) distance pair onto the fooid confidence
/// curve: saturates to 0 at half the total distance range.
#[inline]
pub(crate) fn fooid_confidence(diff_r: u32, diff_dom: u32) -> f64 {
    let perc = (diff_r + diff_dom) as f64 / MAX_TOTDIFF as f64;
    clamp01((0.5 - perc) * 2.0)
}

/// The calibrated cubic combiner shared by `match_cpfm` and the union
/// matchers.
#[inline]
pub(crate) fn combine_cpfm(fm: f64, cp: f64) -> f64 {
    let poly = COMBINE_INTERCEPT
        + COMBINE_FOOID * fm
        + COMBINE_CHROMA * cp
        + COMBINE_CHROMA_CUBED * cp * cp * cp;
    clamp01((poly + COMBINE_OFFSET) / COMBINE_SCALE)
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

/// Weighted distance over the fixed feature blocks, as a confidence in
/// `[0, 1]`. Identical blocks score 1.0; complementary blocks score 0.0.
pub fn match_fooid(r_a: &[u8], dom_a: &[u8], r_b: &[u8], dom_b: &[u8]) -> f64 {
    debug_assert_eq!(r_a.len(), R_BYTES);
    debug_assert_eq!(r_b.len(), R_BYTES);
    debug_assert_eq!(dom_a.len(), DOM_BYTES);
    debug_assert_eq!(dom_b.len(), DOM_BYTES);

    let mut rdiff = [0u32; 4];
    for (wa, wb) in le_words(r_a).zip(le_words(r_b)) {
        rdiff_fooid(wa ^ wb, &mut rdiff);
    }
    let diff_r = weighted_rdiff(&rdiff);

    let mut diff_dom = 0;
    for (wa, wb) in le_words(&dom_a[..64]).zip(le_words(&dom_b[..64])) {
        diff_dom += popcount32(wa ^ wb);
    }
    diff_dom += popcount16(le_tail16(dom_a) ^ le_tail16(dom_b));

    fooid_confidence(diff_r, diff_dom)
}

/// Reference chroma matcher: a histogram over time offsets, voting whenever
/// two codewords differ in at most two bits. Only used for offline offset
/// analysis; the index relies on [`match_chromab`].
pub fn match_chroma(cp1: &[u32], cp2: &[u32], start: usize) -> f64 {
    // the longer stream plays the role of cp1
    let (cp1, cp2) = if cp1.len() >= cp2.len() {
        (cp1, cp2)
    } else {
        (cp2, cp1)
    };
    if cp2.is_empty() || cp2.len() <= start {
        return 0.0;
    }

    let mut counts = vec![0u32; cp1.len() + cp2.len()];
    for i in start..cp1.len() {
        let lo = i.saturating_sub(CHROMA_OFFSET_WINDOW).max(start);
        let hi = (i + CHROMA_OFFSET_WINDOW).min(cp2.len());
        for j in lo..hi {
            if popcount32(cp1[i] ^ cp2[j]) <= CHROMA_VOTE_BITS {
                counts[i + cp2.len() - j] += 1;
            }
        }
    }
    let best = counts.into_iter().max().unwrap_or(0);
    clamp01(best as f64 / (cp2.len() - start) as f64)
}

/// Production chroma kernel: lowest-set-bit agreement over the common
/// prefix, normalised by the longer stream.
pub fn match_chromab(cp1: &[u32], cp2: &[u32]) -> f64 {
    if cp1.is_empty() || cp2.is_empty() {
        return 0.0;
    }
    let n = cp1.len().min(cp2.len());
    let mut sum = 0u32;
    for i in 0..n {
        sum += cmp_low_bit(cp1[i], cp2[i]);
    }
    sum as f64 / cp1.len().max(cp2.len()) as f64
}

/// Tanimoto coefficient over paired codewords.
pub fn match_chromat(cp1: &[u32], cp2: &[u32]) -> f64 {
    let n = cp1.len().min(cp2.len());
    let mut tdiff = 0u64;
    let mut tcomm = 0u64;
    for i in 0..n {
        tdiff += popcount32(cp1[i] & cp2[i]) as u64;
        tcomm += popcount32(cp1[i] | cp2[i]) as u64;
    }
    if tcomm == 0 {
        0.0
    } else if tdiff == 0 {
        1.0
    } else {
        tdiff as f64 / tcomm as f64
    }
}

/// Absolute Pearson correlation over paired codewords read as signed
/// integers. A degenerate denominator maps to 0, never NaN.
pub fn match_chromac(cp1: &[u32], cp2: &[u32]) -> f64 {
    let n = cp1.len().min(cp2.len());
    if n == 0 {
        return 0.0;
    }
    let xs = cp1[..n].iter().map(|&w| w as i32 as f64);
    let ys = cp2[..n].iter().map(|&w| w as i32 as f64);
    let mean_x: f64 = xs.clone().sum::<f64>() / n as f64;
    let mean_y: f64 = ys.clone().sum::<f64>() / n as f64;

    let mut num = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        num += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    let den = var_x.sqrt() * var_y.sqrt();
    if den == 0.0 {
        0.0
    } else {
        clamp01((num / den).abs())
    }
}

/// Composite score over two records: a hard songlen gate, then the fooid and
/// chromab kernels through the calibrated cubic combiner.
pub fn match_cpfm(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let sa = a.songlen() as f64;
    let sb = b.songlen() as f64;
    if (sa - sb).abs() > SONGLEN_TOLERANCE * sa.min(sb) {
        return 0.0;
    }
    let fm = match_fooid(a.r(), a.dom(), b.r(), b.dom());
    let cp = match_chromab(a.cprint(), b.cprint());
    combine_cpfm(fm, cp)
}

// ---------------------------------------------------------------------------
// Scalar predicates
// ---------------------------------------------------------------------------

pub fn is_eq(a: &Fingerprint, b: &Fingerprint) -> bool {
    match_cpfm(a, b) > EQ_THRESHOLD
}

pub fn is_neq(a: &Fingerprint, b: &Fingerprint) -> bool {
    match_cpfm(a, b) <= EQ_THRESHOLD
}

pub fn is_match(a: &Fingerprint, b: &Fingerprint) -> bool {
    match_cpfm(a, b) > MATCH_THRESHOLD
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
