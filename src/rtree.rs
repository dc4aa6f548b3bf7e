//! In-memory R-tree over fingerprint records, driven entirely by the gist
//! operator set: records descend by minimum penalty, overflowing nodes are
//! redistributed with picksplit, and searches follow `consistent`.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::fprint::{Fingerprint, CP_LEN_CORRUPT};
use crate::gist::{compress, consistent, penalty, picksplit, GistError, KeyRef, PickSplit, Strategy};
use crate::merge::UnionKey;
use crate::similarity::match_cpfm;

/// Entries per node before a split; one node's worth of keys models one
/// host page.
pub const DEFAULT_NODE_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("duplicate id: {0}")]
    DuplicateId(Uuid),
    #[error(transparent)]
    Gist(#[from] GistError),
}

// ---------------------------------------------------------------------------
// Tree shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LeafEntry {
    id: Uuid,
    key: Fingerprint,
}

#[derive(Debug)]
struct InnerEntry {
    key: UnionKey,
    child: Box<Node>,
}

#[derive(Debug)]
enum Node {
    Leaf(Vec<LeafEntry>),
    Inner(Vec<InnerEntry>),
}

/// What an insert did to the node it descended into.
enum InsertOutcome {
    /// The node absorbed the record; the parent merges the record key.
    Grown,
    /// The node split; the parent replaces its key and adds a sibling.
    Split {
        left_key: UnionKey,
        right_key: UnionKey,
        right: Box<Node>,
    },
}

/// One search result: the record id and its exact composite score against
/// the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: Uuid,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// FprintIndex
// ---------------------------------------------------------------------------

/// An R-tree of compressed fingerprint keys with the full records kept in a
/// side map for exact rescoring.
pub struct FprintIndex {
    root: Node,
    records: HashMap<Uuid, Fingerprint>,
    node_capacity: usize,
}

impl FprintIndex {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NODE_CAPACITY)
    }

    /// `node_capacity` must leave room for a split; values below 4 are
    /// raised to 4.
    pub fn with_capacity(node_capacity: usize) -> Self {
        Self {
            root: Node::Leaf(Vec::new()),
            records: HashMap::new(),
            node_capacity: node_capacity.max(4),
        }
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Levels from the root down to the leaves.
    pub fn depth(&self) -> usize {
        let mut d = 1;
        let mut node = &self.root;
        while let Node::Inner(entries) = node {
            d += 1;
            match entries.first() {
                Some(e) => node = &e.child,
                None => break,
            }
        }
        d
    }

    pub fn get(&self, id: &Uuid) -> Option<&Fingerprint> {
        self.records.get(id)
    }

    /// All indexed records, in map order.
    pub fn records(&self) -> impl Iterator<Item = (&Uuid, &Fingerprint)> {
        self.records.iter()
    }

    /// Compress the record to its leaf key and install it, splitting along
    /// the descent path as needed.
    pub fn insert(&mut self, id: Uuid, fp: Fingerprint) -> Result<(), IndexError> {
        if self.records.contains_key(&id) {
            return Err(IndexError::DuplicateId(id));
        }
        if fp.cprint_len() >= CP_LEN_CORRUPT {
            return Err(GistError::Corrupt(fp.cprint_len()).into());
        }
        let key = compress(&fp);
        trace!(%id, songlen = fp.songlen(), "insert");

        let outcome = Self::insert_rec(&mut self.root, LeafEntry { id, key }, self.node_capacity)?;
        if let InsertOutcome::Split {
            left_key,
            right_key,
            right,
        } = outcome
        {
            let old_root = std::mem::replace(&mut self.root, Node::Leaf(Vec::new()));
            self.root = Node::Inner(vec![
                InnerEntry {
                    key: left_key,
                    child: Box::new(old_root),
                },
                InnerEntry {
                    key: right_key,
                    child: right,
                },
            ]);
            debug!(depth = self.depth(), "root split");
        }
        self.records.insert(id, fp);
        Ok(())
    }

    fn insert_rec(node: &mut Node, leaf: LeafEntry, cap: usize) -> Result<InsertOutcome, GistError> {
        match node {
            Node::Leaf(entries) => {
                entries.push(leaf);
                if entries.len() <= cap {
                    return Ok(InsertOutcome::Grown);
                }
                let refs: Vec<KeyRef> = entries.iter().map(|e| KeyRef::Leaf(&e.key)).collect();
                let split = picksplit(&refs)?;
                let (left, right) = take_sides(std::mem::take(entries), &split);
                *entries = left;
                Ok(InsertOutcome::Split {
                    left_key: split.left_key,
                    right_key: split.right_key,
                    right: Box::new(Node::Leaf(right)),
                })
            }
            Node::Inner(entries) => {
                let mut best = 0;
                let mut best_penalty = f64::INFINITY;
                for (i, e) in entries.iter().enumerate() {
                    let p = penalty(Some(&e.key), Some(&leaf.key));
                    if p < best_penalty {
                        best_penalty = p;
                        best = i;
                    }
                }
                let leaf_union = UnionKey::from_record(&leaf.key);

                match Self::insert_rec(&mut entries[best].child, leaf, cap)? {
                    InsertOutcome::Grown => {
                        entries[best].key.merge_one_union(&leaf_union);
                        Ok(InsertOutcome::Grown)
                    }
                    InsertOutcome::Split {
                        left_key,
                        right_key,
                        right,
                    } => {
                        entries[best].key = left_key;
                        entries.push(InnerEntry {
                            key: right_key,
                            child: right,
                        });
                        if entries.len() <= cap {
                            return Ok(InsertOutcome::Grown);
                        }
                        let refs: Vec<KeyRef> =
                            entries.iter().map(|e| KeyRef::Node(&e.key)).collect();
                        let split = picksplit(&refs)?;
                        let (left, right) = take_sides(std::mem::take(entries), &split);
                        *entries = left;
                        Ok(InsertOutcome::Split {
                            left_key: split.left_key,
                            right_key: split.right_key,
                            right: Box::new(Node::Inner(right)),
                        })
                    }
                }
            }
        }
    }

    /// Consistent-guided search. Hits carry the exact composite score
    /// against the stored record, best first.
    pub fn search(&self, q: &Fingerprint, strategy: Strategy) -> Result<Vec<SearchHit>, IndexError> {
        let mut hits = Vec::new();
        self.search_rec(&self.root, q, strategy, &mut hits)?;
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(hits)
    }

    fn search_rec(
        &self,
        node: &Node,
        q: &Fingerprint,
        strategy: Strategy,
        hits: &mut Vec<SearchHit>,
    ) -> Result<(), GistError> {
        match node {
            Node::Leaf(entries) => {
                for e in entries {
                    let v = consistent(KeyRef::Leaf(&e.key), q, strategy)?;
                    if v.matches {
                        let score = match self.records.get(&e.id) {
                            Some(full) => match_cpfm(q, full),
                            None => match_cpfm(q, &e.key),
                        };
                        hits.push(SearchHit { id: e.id, score });
                    }
                }
            }
            Node::Inner(entries) => {
                for e in entries {
                    let v = consistent(KeyRef::Node(&e.key), q, strategy)?;
                    if v.matches {
                        self.search_rec(&e.child, q, strategy, hits)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for FprintIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Partition a node's entries along a picksplit verdict.
fn take_sides<T>(items: Vec<T>, split: &PickSplit) -> (Vec<T>, Vec<T>) {
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let left = split.left.iter().filter_map(|&i| slots[i].take()).collect();
    let right = split.right.iter().filter_map(|&i| slots[i].take()).collect();
    (left, right)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fprint::{DOM_BYTES, R_BYTES};
    use crate::similarity::{EQ_THRESHOLD, MATCH_THRESHOLD};

    fn make_fp(songlen: u32, seed: u8, cp_seed: u32) -> Fingerprint {
        let r = (0..R_BYTES)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect();
        let dom = (0..DOM_BYTES)
            .map(|i| (i as u8).wrapping_mul(7) ^ seed)
            .collect();
        let cp = (0..120u32).map(|i| i.wrapping_mul(cp_seed) | 1 << (cp_seed % 31)).collect();
        Fingerprint::new(songlen, 192, 0, r, dom, cp).unwrap()
    }

    #[test]
    fn empty_index() {
        let index = FprintIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert_eq!(index.depth(), 1);
        let q = make_fp(100, 1, 1);
        assert!(index.search(&q, Strategy::Match).unwrap().is_empty());
    }

    #[test]
    fn insert_then_find_exact() {
        let mut index = FprintIndex::new();
        let fp = make_fp(140, 9, 3);
        let id = Uuid::new_v4();
        index.insert(id, fp.clone()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&id), Some(&fp));

        let hits = index.search(&fp, Strategy::Eq).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert!(hits[0].score > EQ_THRESHOLD);
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut index = FprintIndex::new();
        let id = Uuid::new_v4();
        index.insert(id, make_fp(100, 1, 1)).unwrap();
        assert!(matches!(
            index.insert(id, make_fp(101, 2, 2)),
            Err(IndexError::DuplicateId(_))
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn corrupt_record_rejected() {
        let mut index = FprintIndex::new();
        let fp = Fingerprint::new(
            100,
            0,
            0,
            vec![0; R_BYTES],
            vec![0; DOM_BYTES],
            vec![0; CP_LEN_CORRUPT],
        )
        .unwrap();
        assert!(matches!(
            index.insert(Uuid::new_v4(), fp),
            Err(IndexError::Gist(GistError::Corrupt(_)))
        ));
    }

    #[test]
    fn grows_past_one_node_and_keeps_recall() {
        let mut index = FprintIndex::with_capacity(8);
        let mut items = Vec::new();
        for i in 0..60u32 {
            let fp = make_fp(100 + (i % 50), (i * 13 % 251) as u8, i + 2);
            let id = Uuid::new_v4();
            index.insert(id, fp.clone()).unwrap();
            items.push((id, fp));
        }
        assert_eq!(index.len(), 60);
        assert!(index.depth() > 1, "60 records should overflow one page");

        // every record is still reachable as its own best equal
        for (id, fp) in &items {
            let hits = index.search(fp, Strategy::Eq).unwrap();
            assert!(
                hits.iter().any(|h| h.id == *id && h.score > EQ_THRESHOLD),
                "record {id} lost by the index"
            );
        }
    }

    #[test]
    fn match_strategy_finds_near_duplicates() {
        let mut index = FprintIndex::new();
        let base = make_fp(150, 77, 5);

        // invert 100 r bytes: inside MATCH, outside EQ
        let mut r = base.r().to_vec();
        for b in r.iter_mut().take(100) {
            *b ^= 0xFF;
        }
        let near = Fingerprint::new(
            base.songlen(),
            base.bit_rate(),
            0,
            r,
            base.dom().to_vec(),
            base.cprint().to_vec(),
        )
        .unwrap();

        let base_id = Uuid::new_v4();
        let near_id = Uuid::new_v4();
        index.insert(base_id, base.clone()).unwrap();
        index.insert(near_id, near).unwrap();

        let matches = index.search(&base, Strategy::Match).unwrap();
        assert!(matches.iter().any(|h| h.id == base_id));
        assert!(matches.iter().any(|h| h.id == near_id && h.score > MATCH_THRESHOLD));

        let equals = index.search(&base, Strategy::Eq).unwrap();
        assert!(equals.iter().any(|h| h.id == base_id));
        assert!(!equals.iter().any(|h| h.id == near_id));
    }

    #[test]
    fn neq_strategy_excludes_the_record_itself() {
        let mut index = FprintIndex::new();
        let a = make_fp(100, 3, 2);
        let b = make_fp(260, 200, 9);
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        index.insert(a_id, a.clone()).unwrap();
        index.insert(b_id, b).unwrap();

        let hits = index.search(&a, Strategy::Neq).unwrap();
        assert!(!hits.iter().any(|h| h.id == a_id));
        assert!(hits.iter().any(|h| h.id == b_id));
    }
}
