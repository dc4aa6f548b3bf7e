//! The index operator set for an R-tree-style generalised search tree over
//! fingerprints: compress, decompress, union, penalty, picksplit, consistent
//! and same, plus the fixed strategy numbers of the host bindings.

use thiserror::Error;
use tracing::debug;

use crate::fprint::{Fingerprint, CP_LEN_CORRUPT};
use crate::merge::{match_fprint_merge, try_match_merges, UnionKey, MAX_KEY_CP_LEN};
use crate::similarity::{match_cpfm, EQ_THRESHOLD, MATCH_THRESHOLD};

/// Penalty reported when either side of the pair is missing, so the planner
/// avoids that branch.
pub const PENALTY_MISSING: f64 = 1e10;
/// Weight of envelope growth in the penalty; dominates the match term.
pub const PENALTY_SONGLEN_WEIGHT: f64 = 2000.0;
pub const PENALTY_MATCH_WEIGHT: f64 = 100.0;

/// All-equal picksplit pages fall through to seeded splitting only when some
/// pair is at least this similar.
pub const ALL_EQUAL_SPLIT_THRESHOLD: f64 = 0.4;

/// Cubic pressure toward the smaller side in the picksplit assignment loop.
const WISH_WEIGHT: f64 = 0.1;

// ---------------------------------------------------------------------------
// Errors, strategies, key views
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GistError {
    #[error("picksplit requires at least two entries, got {0}")]
    NotEnoughEntries(usize),
    #[error("corrupt key: cprint length {0}")]
    Corrupt(usize),
}

/// Strategy numbers of the host operator class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Eq = 3,
    Match = 6,
    Neq = 12,
}

impl Strategy {
    pub fn number(self) -> u16 {
        self as u16
    }

    pub fn from_number(n: u16) -> Option<Self> {
        match n {
            3 => Some(Strategy::Eq),
            6 => Some(Strategy::Match),
            12 => Some(Strategy::Neq),
            _ => None,
        }
    }
}

/// Borrowed view of a tree key: leaf entries hold compressed records,
/// internal entries hold union keys. Both shapes share the page layout.
#[derive(Debug, Clone, Copy)]
pub enum KeyRef<'a> {
    Leaf(&'a Fingerprint),
    Node(&'a UnionKey),
}

impl KeyRef<'_> {
    /// Inclusive songlen bounds; a leaf's collapse to its single songlen.
    fn bounds(&self) -> (u32, u32) {
        match self {
            KeyRef::Leaf(f) => (f.songlen(), f.songlen()),
            KeyRef::Node(u) => (u.min_songlen(), u.max_songlen()),
        }
    }

    fn cprint_len(&self) -> usize {
        match self {
            KeyRef::Leaf(f) => f.cprint_len(),
            KeyRef::Node(u) => u.cprint_len(),
        }
    }

    fn to_union(self) -> UnionKey {
        match self {
            KeyRef::Leaf(f) => UnionKey::from_record(f),
            KeyRef::Node(u) => u.clone(),
        }
    }
}

fn check_key(key: &KeyRef) -> Result<(), GistError> {
    let len = key.cprint_len();
    if len >= CP_LEN_CORRUPT {
        Err(GistError::Corrupt(len))
    } else {
        Ok(())
    }
}

/// Search verdict for one tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consistency {
    pub matches: bool,
    /// Whether the verdict is approximate. Leaf verdicts are exact; node
    /// verdicts request descent, and a rejected node clears the flag.
    pub recheck: bool,
}

// ---------------------------------------------------------------------------
// compress / decompress
// ---------------------------------------------------------------------------

/// The indexed slice of a chroma print: a bounded mid-song window for long
/// streams, the prefix otherwise.
pub fn slice_window(len: usize) -> std::ops::Range<usize> {
    if len >= 944 {
        704..944
    } else if len >= 704 {
        464..704
    } else {
        0..len.min(MAX_KEY_CP_LEN)
    }
}

/// Build the leaf key installed for a record: same header and fixed blocks,
/// chroma print cut to its index window.
pub fn compress(fp: &Fingerprint) -> Fingerprint {
    let w = slice_window(fp.cprint_len());
    if w.start == 0 && w.end == fp.cprint_len() {
        fp.clone()
    } else {
        fp.with_cprint(fp.cprint()[w].to_vec())
    }
}

/// Entries are stored uncompressed relative to their key form; the caller
/// keeps ownership of the backing record.
pub fn decompress<'a>(entry: &'a Fingerprint) -> &'a Fingerprint {
    entry
}

// ---------------------------------------------------------------------------
// union
// ---------------------------------------------------------------------------

/// Fold a node's child keys into one covering union key. The result's
/// cprint length is the maximum of the inputs'.
pub fn union(entries: &[KeyRef]) -> Result<UnionKey, GistError> {
    let first = entries.first().ok_or(GistError::NotEnoughEntries(0))?;
    check_key(first)?;
    let mut acc = first.to_union();
    for e in &entries[1..] {
        check_key(e)?;
        match e {
            KeyRef::Leaf(f) => acc.merge_one(f),
            KeyRef::Node(u) => acc.merge_one_union(u),
        }
    }
    Ok(acc)
}

// ---------------------------------------------------------------------------
// penalty
// ---------------------------------------------------------------------------

/// Cost of absorbing `new` under the node keyed by `orig`; lower is better.
/// Envelope growth is weighted to dominate the match term.
pub fn penalty(orig: Option<&UnionKey>, new: Option<&Fingerprint>) -> f64 {
    let (orig, new) = match (orig, new) {
        (Some(o), Some(n)) => (o, n),
        _ => return PENALTY_MISSING,
    };
    let orig_size = (orig.max_songlen() - orig.min_songlen()) as f64;
    let grown_max = orig.max_songlen().max(new.songlen());
    let grown_min = orig.min_songlen().min(new.songlen());
    let new_size = (grown_max - grown_min) as f64;
    let songlen_diff = if new_size == 0.0 {
        0.0
    } else {
        (new_size - orig_size) / new_size * PENALTY_SONGLEN_WEIGHT
    };
    let m = match_fprint_merge(new, orig);
    let m = if m > 0.0 {
        (1.0 - m) * PENALTY_MATCH_WEIGHT
    } else {
        PENALTY_MATCH_WEIGHT
    };
    m + songlen_diff
}

// ---------------------------------------------------------------------------
// picksplit
// ---------------------------------------------------------------------------

/// Redistribution of an overflowing node onto two pages.
#[derive(Debug)]
pub struct PickSplit {
    pub left: Vec<usize>,
    pub right: Vec<usize>,
    pub left_key: UnionKey,
    pub right_key: UnionKey,
}

/// Split ≥ 2 entries onto two sides. Seeds come from the songlen extremes;
/// pages of indistinguishable entries are halved outright. A single entry is
/// an error: a one-entry page loops the host's descent routine.
pub fn picksplit(entries: &[KeyRef]) -> Result<PickSplit, GistError> {
    let n = entries.len();
    if n < 2 {
        return Err(GistError::NotEnoughEntries(n));
    }
    for e in entries {
        check_key(e)?;
    }

    let bounds: Vec<(u32, u32)> = entries.iter().map(|e| e.bounds()).collect();
    let gmin = bounds.iter().map(|b| b.0).min().unwrap_or(0);
    let gmax = bounds.iter().map(|b| b.1).max().unwrap_or(0);

    if n == 2 {
        return finish(entries, vec![0], vec![1]);
    }

    let all_equal = bounds.iter().all(|&b| b == bounds[0]);
    let (seed_left, seed_right) = if all_equal {
        let mut best = (f64::INFINITY, 0, 1);
        let mut max_match = 0.0f64;
        for i in 0..n {
            for j in i + 1..n {
                let m = pair_match(&entries[i], &entries[j]);
                max_match = max_match.max(m);
                if m < best.0 {
                    best = (m, i, j);
                }
            }
        }
        if max_match <= ALL_EQUAL_SPLIT_THRESHOLD {
            // nothing tells the entries apart: halve the page
            let half = (n + 1) / 2;
            return finish(entries, (0..half).collect(), (half..n).collect());
        }
        (best.1, best.2)
    } else {
        let seed_left = (0..n).min_by_key(|&i| bounds[i].0).unwrap_or(0);
        let seed_right = (0..n)
            .filter(|&i| i != seed_left)
            .max_by_key(|&i| bounds[i].1)
            .unwrap_or(1);
        (seed_left, seed_right)
    };

    let mut u_left = entries[seed_left].to_union();
    let mut u_right = entries[seed_right].to_union();
    let mut left = vec![seed_left];
    let mut right = vec![seed_right];

    // easy placements first, hard cases last
    let mut order: Vec<(f64, f64, usize)> = (0..n)
        .filter(|&i| i != seed_left && i != seed_right)
        .map(|i| {
            let (lo, hi) = bounds[i];
            let songlen_diff = (lo - gmin).min(gmax - hi) as f64;
            let pu = entries[i].to_union();
            let val = try_match_merges(&u_right, &u_left, &pu)
                .min(try_match_merges(&u_left, &u_right, &pu));
            (songlen_diff, val, i)
        })
        .collect();
    order.sort_by(|a, b| {
        (a.0, a.1)
            .partial_cmp(&(b.0, b.1))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (_, _, i) in order {
        let (lo, hi) = bounds[i];
        let dl = lo - gmin;
        let dr = gmax - hi;
        let pu = entries[i].to_union();
        let go_left = if dl != dr {
            dl < dr
        } else {
            let tl = try_match_merges(&u_right, &u_left, &pu);
            let tr = try_match_merges(&u_left, &u_right, &pu);
            let wish = -((left.len() as f64 - right.len() as f64).powi(3)) * WISH_WEIGHT;
            if tl < tr + wish {
                true
            } else if tl > tr {
                false
            } else {
                left.len() <= right.len()
            }
        };
        if go_left {
            left.push(i);
            u_left.merge_one_union(&pu);
        } else {
            right.push(i);
            u_right.merge_one_union(&pu);
        }
    }

    // a one-entry side loops the host; give both sides two whenever possible
    while left.len() < 2 && right.len() > 2 {
        if let Some(i) = right.pop() {
            left.push(i);
        }
    }
    while right.len() < 2 && left.len() > 2 {
        if let Some(i) = left.pop() {
            right.push(i);
        }
    }

    finish(entries, left, right)
}

/// Assemble the split result, rebuilding both keys from their final member
/// lists (an OR key cannot be shrunk after a member moves sides).
fn finish(entries: &[KeyRef], left: Vec<usize>, right: Vec<usize>) -> Result<PickSplit, GistError> {
    let left_entries: Vec<KeyRef> = left.iter().map(|&i| entries[i]).collect();
    let right_entries: Vec<KeyRef> = right.iter().map(|&i| entries[i]).collect();
    let left_key = union(&left_entries)?;
    let right_key = union(&right_entries)?;
    debug!(
        total = entries.len(),
        left = left.len(),
        right = right.len(),
        "picksplit"
    );
    Ok(PickSplit {
        left,
        right,
        left_key,
        right_key,
    })
}

/// Pairwise similarity for the all-equal analysis: the composite record
/// score for leaves, the union residual kernel otherwise.
fn pair_match(a: &KeyRef, b: &KeyRef) -> f64 {
    match (a, b) {
        (KeyRef::Leaf(x), KeyRef::Leaf(y)) => match_cpfm(x, y),
        _ => crate::merge::match_key_merge(&a.to_union(), &b.to_union()),
    }
}

// ---------------------------------------------------------------------------
// consistent / same
// ---------------------------------------------------------------------------

/// Search predicate over one tree entry. Leaf verdicts are exact; node
/// verdicts gate descent on the songlen envelope and a threshold ladder.
/// Both the query and leaf keys are re-sliced defensively.
pub fn consistent(key: KeyRef, q: &Fingerprint, strategy: Strategy) -> Result<Consistency, GistError> {
    check_key(&key)?;
    if q.cprint_len() >= CP_LEN_CORRUPT {
        return Err(GistError::Corrupt(q.cprint_len()));
    }
    let q = compress(q);

    match key {
        KeyRef::Leaf(leaf) => {
            let leaf = compress(leaf);
            let v = match_cpfm(&q, &leaf);
            let matches = match strategy {
                Strategy::Eq => v > EQ_THRESHOLD,
                Strategy::Neq => v <= EQ_THRESHOLD,
                Strategy::Match => v > MATCH_THRESHOLD,
            };
            Ok(Consistency {
                matches,
                recheck: false,
            })
        }
        KeyRef::Node(u) => {
            let qs = q.songlen();
            let verdict = if u.min_songlen() <= qs && qs <= u.max_songlen() {
                let mut t = 0.08;
                if qs > 150 {
                    t = 0.1;
                }
                if qs > 40 && qs < 46 {
                    t = 0.03;
                }
                match_fprint_merge(&q, u) > t
            } else if qs < 155 {
                let d = if qs < u.min_songlen() {
                    (u.min_songlen() - qs) as f64 / u.min_songlen() as f64
                } else {
                    (qs - u.max_songlen()) as f64 / qs as f64
                };
                let bracket = (qs < 30 && d < 0.8)
                    || (qs < 61 && d < 0.6)
                    || (qs < 110 && d < 0.07)
                    || d < 0.05;
                let t = if qs > 150 { 0.15 } else { 0.08 };
                bracket && match_fprint_merge(&q, u) > t
            } else {
                // a long query never matches the short songs under this node
                false
            };
            Ok(Consistency {
                matches: verdict,
                recheck: verdict,
            })
        }
    }
}

/// True iff two node keys have identical binary images, letting the host
/// skip rewriting an unchanged page.
pub fn same(a: &UnionKey, b: &UnionKey) -> bool {
    a.cprint_len() == b.cprint_len() && a.to_bytes() == b.to_bytes()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fprint::{DOM_BYTES, R_BYTES};

    fn make_fp(songlen: u32, r_fill: u8, dom_fill: u8, cp: Vec<u32>) -> Fingerprint {
        Fingerprint::new(
            songlen,
            128,
            0,
            vec![r_fill; R_BYTES],
            vec![dom_fill; DOM_BYTES],
            cp,
        )
        .unwrap()
    }

    #[test]
    fn strategy_numbers_are_fixed() {
        assert_eq!(Strategy::Eq.number(), 3);
        assert_eq!(Strategy::Match.number(), 6);
        assert_eq!(Strategy::Neq.number(), 12);
        assert_eq!(Strategy::from_number(3), Some(Strategy::Eq));
        assert_eq!(Strategy::from_number(6), Some(Strategy::Match));
        assert_eq!(Strategy::from_number(12), Some(Strategy::Neq));
        assert_eq!(Strategy::from_number(4), None);
    }

    #[test]
    fn slicing_is_deterministic() {
        assert_eq!(slice_window(1000), 704..944);
        assert_eq!(slice_window(944), 704..944);
        assert_eq!(slice_window(943), 464..704);
        assert_eq!(slice_window(704), 464..704);
        assert_eq!(slice_window(703), 0..240);
        assert_eq!(slice_window(240), 0..240);
        assert_eq!(slice_window(100), 0..100);
    }

    #[test]
    fn compress_takes_the_window() {
        let fp = make_fp(60, 1, 1, (0..1000).collect());
        let key = compress(&fp);
        assert_eq!(key.cprint_len(), 240);
        assert_eq!(key.cprint()[0], 704);
        assert_eq!(key.cprint()[239], 943);
        assert_eq!(key.songlen(), fp.songlen());

        let short = make_fp(10, 1, 1, (0..50).collect());
        assert_eq!(compress(&short), short);
        assert_eq!(decompress(&short), &short);
    }

    #[test]
    fn union_covers_all_children_and_keeps_max_len() {
        let a = make_fp(100, 0x11, 0x01, vec![1, 2]);
        let b = make_fp(110, 0x22, 0x02, vec![4, 8, 16]);
        let c = make_fp(105, 0x44, 0x04, vec![32]);
        let entries = [KeyRef::Leaf(&a), KeyRef::Leaf(&b), KeyRef::Leaf(&c)];
        let u = union(&entries).unwrap();
        assert_eq!(u.cprint_len(), 3);
        assert_eq!(u.min_songlen(), 100);
        assert_eq!(u.max_songlen(), 110);
        assert!(u.covers(&a));
        assert!(u.covers(&b));
        assert!(u.covers(&c));
    }

    #[test]
    fn penalty_missing_side_is_prohibitive() {
        let fp = make_fp(100, 1, 1, vec![1]);
        let u = UnionKey::from_record(&fp);
        assert_eq!(penalty(None, Some(&fp)), PENALTY_MISSING);
        assert_eq!(penalty(Some(&u), None), PENALTY_MISSING);
    }

    #[test]
    fn penalty_prefers_the_covering_key() {
        let new = make_fp(100, 0x33, 0x0F, vec![5, 9]);
        let covering = UnionKey::from_record(&new);
        let far = UnionKey::from_record(&make_fp(200, 0x00, 0x00, vec![2]));
        let p_cover = penalty(Some(&covering), Some(&new));
        let p_far = penalty(Some(&far), Some(&new));
        assert!(p_cover >= 0.0);
        assert!(p_cover < p_far, "{p_cover} !< {p_far}");
    }

    #[test]
    fn penalty_weights_envelope_growth_over_match() {
        let new = make_fp(100, 0x33, 0x0F, vec![5, 9]);
        // same body; one key's envelope already spans the record
        let tight = UnionKey::from_record(&new);
        let mut wide = UnionKey::from_record(&new);
        wide.merge_one(&make_fp(260, 0x33, 0x0F, vec![5, 9]));
        let stretch = UnionKey::from_record(&make_fp(101, 0x33, 0x0F, vec![5, 9]));

        // a perfect-match key that needs any envelope growth still costs
        // more than the worst possible match term
        assert_eq!(penalty(Some(&tight), Some(&new)), 0.0);
        assert_eq!(penalty(Some(&wide), Some(&new)), 0.0);
        assert!(penalty(Some(&stretch), Some(&new)) > PENALTY_MATCH_WEIGHT);
    }

    #[test]
    fn picksplit_rejects_a_single_entry() {
        let fp = make_fp(100, 1, 1, vec![1]);
        let entries = [KeyRef::Leaf(&fp)];
        assert_eq!(
            picksplit(&entries).unwrap_err(),
            GistError::NotEnoughEntries(1)
        );
    }

    #[test]
    fn picksplit_two_entries_one_each() {
        let a = make_fp(100, 1, 1, vec![1]);
        let b = make_fp(200, 2, 2, vec![2]);
        let split = picksplit(&[KeyRef::Leaf(&a), KeyRef::Leaf(&b)]).unwrap();
        assert_eq!(split.left, vec![0]);
        assert_eq!(split.right, vec![1]);
        assert!(split.left_key.covers(&a));
        assert!(split.right_key.covers(&b));
    }

    #[test]
    fn picksplit_identical_leaves_halves_evenly() {
        let fp = make_fp(150, 0x5A, 0x3C, (0..100).map(|i| i * 7 + 1).collect());
        let entries: Vec<KeyRef> = std::iter::repeat(&fp).take(6).map(KeyRef::Leaf).collect();
        let split = picksplit(&entries).unwrap();
        assert_eq!(split.left.len(), 3);
        assert_eq!(split.right.len(), 3);
        // both page keys collapse to the single merged key
        assert!(same(&split.left_key, &split.right_key));
        let all = union(&entries).unwrap();
        assert!(same(&split.left_key, &all));
    }

    #[test]
    fn picksplit_indistinguishable_entries_are_halved() {
        // equal songlens, mutually alien bodies: no pair clears 0.4
        let fills: [(u8, u8, u32); 4] =
            [(0x00, 0x00, 1), (0xFF, 0xFF, 2), (0x0F, 0x0F, 4), (0xF0, 0xF0, 8)];
        let fps: Vec<Fingerprint> = fills
            .iter()
            .map(|&(r, d, c)| make_fp(90, r, d, vec![c]))
            .collect();
        let entries: Vec<KeyRef> = fps.iter().map(KeyRef::Leaf).collect();
        let split = picksplit(&entries).unwrap();
        assert_eq!(split.left, vec![0, 1]);
        assert_eq!(split.right, vec![2, 3]);
    }

    #[test]
    fn picksplit_keeps_two_entries_per_side() {
        // three clustered records and one far outlier pull 3/1 by songlen;
        // the fill pass must restore 2/2
        let near1 = make_fp(100, 0x10, 0x01, vec![1]);
        let near2 = make_fp(101, 0x20, 0x02, vec![2]);
        let near3 = make_fp(102, 0x40, 0x04, vec![4]);
        let far = make_fp(400, 0x80, 0x08, vec![8]);
        let entries = [
            KeyRef::Leaf(&near1),
            KeyRef::Leaf(&near2),
            KeyRef::Leaf(&near3),
            KeyRef::Leaf(&far),
        ];
        let split = picksplit(&entries).unwrap();
        assert!(split.left.len() >= 2 && split.right.len() >= 2);
        assert_eq!(split.left.len() + split.right.len(), 4);
    }

    #[test]
    fn picksplit_separates_songlen_extremes() {
        let short1 = make_fp(60, 0x11, 0x01, vec![1]);
        let short2 = make_fp(62, 0x11, 0x01, vec![1]);
        let long1 = make_fp(300, 0x44, 0x04, vec![16]);
        let long2 = make_fp(305, 0x44, 0x04, vec![16]);
        let entries = [
            KeyRef::Leaf(&short1),
            KeyRef::Leaf(&long1),
            KeyRef::Leaf(&short2),
            KeyRef::Leaf(&long2),
        ];
        let split = picksplit(&entries).unwrap();
        let left_set: Vec<usize> = split.left.clone();
        // seeds are the extremes; each companion lands with its cluster
        assert!(left_set.contains(&0) == left_set.contains(&2));
        assert!(split.right.contains(&1) == split.right.contains(&3));
    }

    #[test]
    fn consistent_leaf_is_exact() {
        let a = make_fp(100, 0x66, 0x33, (0..200).map(|i| i + 3).collect());
        let key = compress(&a);
        let eq = consistent(KeyRef::Leaf(&key), &a, Strategy::Eq).unwrap();
        assert!(eq.matches && !eq.recheck);
        let neq = consistent(KeyRef::Leaf(&key), &a, Strategy::Neq).unwrap();
        assert!(!neq.matches && !neq.recheck);
        let m = consistent(KeyRef::Leaf(&key), &a, Strategy::Match).unwrap();
        assert!(m.matches && !m.recheck);

        // songlen gate forces the other verdicts
        let b = make_fp(220, 0x66, 0x33, (0..200).map(|i| i + 3).collect());
        let eq = consistent(KeyRef::Leaf(&key), &b, Strategy::Eq).unwrap();
        assert!(!eq.matches);
        let neq = consistent(KeyRef::Leaf(&key), &b, Strategy::Neq).unwrap();
        assert!(neq.matches);
    }

    #[test]
    fn consistent_long_query_aligns_with_compressed_leaf() {
        // 1000-codeword query: both sides must be re-sliced onto the same
        // mid-song window for the scores to line up
        let full = make_fp(60, 0x2B, 0x4D, (0..1000).map(|i| i * 5 + 2).collect());
        let leaf = compress(&full);
        let v = consistent(KeyRef::Leaf(&leaf), &full, Strategy::Eq).unwrap();
        assert!(v.matches);
    }

    #[test]
    fn consistent_node_in_envelope() {
        let q = make_fp(100, 0x77, 0x55, vec![3, 5, 9]);
        let u = UnionKey::merge(&q, &make_fp(110, 0x88, 0x11, vec![3]));
        let v = consistent(KeyRef::Node(&u), &q, Strategy::Match).unwrap();
        assert!(v.matches && v.recheck);
    }

    #[test]
    fn consistent_node_close_envelope_brackets() {
        // query below a nearby envelope: the short-song bracket admits it
        let q = make_fp(20, 0x77, 0x55, vec![3, 5]);
        let mut u = UnionKey::from_record(&make_fp(30, 0x77, 0x55, vec![3, 5]));
        u.merge_one(&make_fp(35, 0x88, 0x11, vec![3]));
        let v = consistent(KeyRef::Node(&u), &q, Strategy::Match).unwrap();
        assert!(v.matches && v.recheck);

        // a mid-length query much shorter than the envelope is rejected
        let q2 = make_fp(80, 0x77, 0x55, vec![3, 5]);
        let far = UnionKey::from_record(&make_fp(200, 0x77, 0x55, vec![3, 5]));
        let v2 = consistent(KeyRef::Node(&far), &q2, Strategy::Match).unwrap();
        assert!(!v2.matches && !v2.recheck);
    }

    #[test]
    fn consistent_node_long_query_skips_short_songs() {
        let q = make_fp(200, 0x77, 0x55, vec![3]);
        let u = UnionKey::from_record(&make_fp(90, 0x77, 0x55, vec![3]));
        let v = consistent(KeyRef::Node(&u), &q, Strategy::Match).unwrap();
        assert!(!v.matches && !v.recheck);
    }

    #[test]
    fn consistent_rejects_corrupt_lengths() {
        let q = make_fp(100, 1, 1, vec![1]);
        let u = UnionKey::from_record(&q);
        // a corrupt query is refused outright
        let long = make_fp(100, 1, 1, vec![0; CP_LEN_CORRUPT]);
        assert!(matches!(
            consistent(KeyRef::Node(&u), &long, Strategy::Match),
            Err(GistError::Corrupt(_))
        ));
    }

    #[test]
    fn same_compares_binary_images() {
        let a = make_fp(100, 0x12, 0x34, vec![7, 8]);
        let u1 = UnionKey::from_record(&a);
        let u2 = UnionKey::from_record(&a);
        assert!(same(&u1, &u2));

        let mut u3 = UnionKey::from_record(&a);
        u3.merge_one(&make_fp(120, 0x56, 0x78, vec![9]));
        assert!(!same(&u1, &u3));
    }
}
