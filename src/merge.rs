//! Union keys: the node-level summary of a group of fingerprints, built by
//! bitwise OR with a songlen envelope. A union only bounds the records it
//! covers; nothing can ever be subtracted from one.

use serde::{Deserialize, Serialize};

use crate::bitops::{cmp_low_bit, le_tail16, le_words, popcount16, popcount32, rdiff_fooid};
use crate::fprint::{Fingerprint, DOM_BYTES, R_BYTES};
use crate::similarity::{combine_cpfm, fooid_confidence, match_fooid, weighted_rdiff};

/// Keys stored on index pages carry at most this many chroma codewords.
pub const MAX_KEY_CP_LEN: usize = 240;

// ---------------------------------------------------------------------------
// UnionKey
// ---------------------------------------------------------------------------

/// Summary of a set of fingerprint records: the pointwise OR of their bodies
/// and the inclusive envelope of their songlens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionKey {
    min_songlen: u32,
    max_songlen: u32,
    r: Vec<u8>,
    dom: Vec<u8>,
    cprint: Vec<u32>,
}

impl UnionKey {
    /// Key covering a single record. Both envelope bounds equal the record's
    /// songlen. Callers compress records before keying them; the chroma
    /// print is clamped to [`MAX_KEY_CP_LEN`] regardless.
    pub fn from_record(a: &Fingerprint) -> Self {
        let mut cprint = a.cprint().to_vec();
        cprint.truncate(MAX_KEY_CP_LEN);
        Self {
            min_songlen: a.songlen(),
            max_songlen: a.songlen(),
            r: a.r().to_vec(),
            dom: a.dom().to_vec(),
            cprint,
        }
    }

    /// Key covering exactly two records.
    pub fn merge(a: &Fingerprint, b: &Fingerprint) -> Self {
        let mut u = Self::from_record(a);
        u.merge_one(b);
        u
    }

    /// OR-merge one record into the key and extend the songlen envelope.
    pub fn merge_one(&mut self, a: &Fingerprint) {
        self.min_songlen = self.min_songlen.min(a.songlen());
        self.max_songlen = self.max_songlen.max(a.songlen());
        or_into(&mut self.r, a.r());
        or_into(&mut self.dom, a.dom());
        or_cprint(&mut self.cprint, a.cprint());
    }

    /// OR-merge another key, taking the min/max envelope pairwise.
    pub fn merge_one_union(&mut self, v: &UnionKey) {
        self.min_songlen = self.min_songlen.min(v.min_songlen);
        self.max_songlen = self.max_songlen.max(v.max_songlen);
        or_into(&mut self.r, &v.r);
        or_into(&mut self.dom, &v.dom);
        or_cprint(&mut self.cprint, &v.cprint);
    }

    pub fn min_songlen(&self) -> u32 {
        self.min_songlen
    }

    pub fn max_songlen(&self) -> u32 {
        self.max_songlen
    }

    pub fn r(&self) -> &[u8] {
        &self.r
    }

    pub fn dom(&self) -> &[u8] {
        &self.dom
    }

    pub fn cprint(&self) -> &[u32] {
        &self.cprint
    }

    pub fn cprint_len(&self) -> usize {
        self.cprint.len()
    }

    /// Bitwise coverage probe: true when every set bit of the record appears
    /// in the key (cprint checked over the common prefix).
    pub fn covers(&self, a: &Fingerprint) -> bool {
        let body = self
            .r
            .iter()
            .zip(a.r())
            .chain(self.dom.iter().zip(a.dom()))
            .all(|(u, x)| u & x == *x);
        let n = self.cprint.len().min(a.cprint_len());
        body
            && self.cprint[..n]
                .iter()
                .zip(a.cprint())
                .all(|(u, x)| u & x == *x)
            && self.min_songlen <= a.songlen()
            && a.songlen() <= self.max_songlen
    }

    /// Binary image in the shared on-page layout: the envelope bounds occupy
    /// the songlen and bit_rate header slots, num_errors is zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = 16 + R_BYTES + DOM_BYTES + 4 * self.cprint.len();
        let mut out = Vec::with_capacity(4 + payload);
        out.extend_from_slice(&(payload as u32).to_le_bytes());
        out.extend_from_slice(&(self.cprint.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.min_songlen.to_le_bytes());
        out.extend_from_slice(&self.max_songlen.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.r);
        out.extend_from_slice(&self.dom);
        for w in &self.cprint {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }
}

fn or_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d |= s;
    }
}

/// OR a chroma print into the accumulator, copying the tail where the source
/// is longer, clamped to the key ceiling.
fn or_cprint(dst: &mut Vec<u32>, src: &[u32]) {
    let target = dst.len().max(src.len().min(MAX_KEY_CP_LEN));
    dst.resize(target, 0);
    for (d, s) in dst.iter_mut().zip(src) {
        *d |= s;
    }
}

// ---------------------------------------------------------------------------
// Union matchers
// ---------------------------------------------------------------------------

/// Does record `a` look consistent with the set summarised by `u`? Scores
/// the bits of `a` not covered by `u` through the fooid confidence curve,
/// counts chroma lanes that are covered or share the lowest set bit, and
/// feeds both through the calibrated combiner.
pub fn match_fprint_merge(a: &Fingerprint, u: &UnionKey) -> f64 {
    residual_score(a.r(), a.dom(), a.cprint(), u)
}

/// Symmetric kernel between two union keys. Disjoint songlen envelopes
/// short-circuit to zero.
pub fn match_merges(u1: &UnionKey, u2: &UnionKey) -> f64 {
    if u1.max_songlen < u2.min_songlen || u2.max_songlen < u1.min_songlen {
        return 0.0;
    }
    let fooid = match_fooid(&u1.r, &u1.dom, &u2.r, &u2.dom);
    let chroma = chroma_mutual_score(&u1.cprint, &u2.cprint);
    combine_cpfm(fooid, chroma)
}

/// Score of the hypothetical `u2 ∪ probe` against `u1`: the would-adding-hurt
/// probe used by picksplit. Only scratch state is allocated; neither key nor
/// the probe is modified.
pub fn try_match_merges(u1: &UnionKey, u2: &UnionKey, probe: &UnionKey) -> f64 {
    let mut merged = u2.clone();
    merged.merge_one_union(probe);
    residual_score(&merged.r, &merged.dom, &merged.cprint, u1)
}

/// Residual kernel with a union body on the record side; picksplit uses it
/// to compare internal keys pairwise.
pub(crate) fn match_key_merge(rec: &UnionKey, u: &UnionKey) -> f64 {
    residual_score(&rec.r, &rec.dom, &rec.cprint, u)
}

/// The record-vs-union kernel body shared by `match_fprint_merge` and
/// `try_match_merges`.
fn residual_score(r: &[u8], dom: &[u8], cp: &[u32], u: &UnionKey) -> f64 {
    let mut rdiff = [0u32; 4];
    for (wa, wu) in le_words(r).zip(le_words(&u.r)) {
        rdiff_fooid(wa & !wu, &mut rdiff);
    }
    let diff_r = weighted_rdiff(&rdiff);

    let mut diff_dom = 0;
    for (wa, wu) in le_words(&dom[..64]).zip(le_words(&u.dom[..64])) {
        diff_dom += popcount32(wa & !wu);
    }
    diff_dom += popcount16(le_tail16(dom) & !le_tail16(&u.dom));

    let fooid = fooid_confidence(diff_r, diff_dom);
    let chroma = chroma_cover_score(cp, &u.cprint);
    combine_cpfm(fooid, chroma)
}

/// Lane k counts when the record word is fully covered by the key word or
/// shares its lowest set bit; normalised by the record length.
fn chroma_cover_score(cp: &[u32], ucp: &[u32]) -> f64 {
    if cp.is_empty() {
        return 0.0;
    }
    let n = cp.len().min(ucp.len());
    let mut count = 0u32;
    for k in 0..n {
        if cp[k] & ucp[k] == cp[k] || cmp_low_bit(cp[k], ucp[k]) == 1 {
            count += 1;
        }
    }
    count as f64 / cp.len() as f64
}

/// Symmetric chroma count for union-vs-union scoring: a lane counts when
/// either word covers the other or they share the lowest set bit;
/// normalised by the longer key.
fn chroma_mutual_score(a: &[u32], b: &[u32]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let n = a.len().min(b.len());
    let mut count = 0u32;
    for k in 0..n {
        let common = a[k] & b[k];
        if common == a[k] || common == b[k] || cmp_low_bit(a[k], b[k]) == 1 {
            count += 1;
        }
    }
    count as f64 / a.len().max(b.len()) as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
