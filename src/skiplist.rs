// skiplist.rs — Probabilistic ordered index for sorted sets.
//
// Nodes are ordered by (score ascending, element bytes ascending) as a total
// order. Every level-i link carries a span, the number of level-0 steps it
// covers, which turns rank queries into O(log n) descents. Nodes live in an
// arena and refer to each other by index; a free list recycles slots. The
// arena replaces the raw back/forward pointers of the classic formulation
// while keeping the same update-vector algorithms.

use rand::Rng;

use crate::sds::Sds;

pub const MAX_LEVEL: usize = 32;
/// Probability of promoting a node one more level.
const P_BRANCH: u32 = 0x4000; // 0.25 * 0xFFFF

pub const NIL: u32 = u32::MAX;

#[derive(Clone, Copy)]
struct Link {
    forward: u32,
    span: u32,
}

struct Node {
    ele: Sds,
    score: f64,
    backward: u32,
    links: Vec<Link>,
}

/// Inclusive/exclusive score interval.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
    pub minex: bool,
    pub maxex: bool,
}

impl ScoreRange {
    pub fn inclusive(min: f64, max: f64) -> ScoreRange {
        ScoreRange { min, max, minex: false, maxex: false }
    }

    #[inline]
    pub fn gte_min(&self, score: f64) -> bool {
        if self.minex { score > self.min } else { score >= self.min }
    }

    #[inline]
    pub fn lte_max(&self, score: f64) -> bool {
        if self.maxex { score < self.max } else { score <= self.max }
    }

    /// An interval that cannot contain any score.
    pub fn is_void(&self) -> bool {
        self.min > self.max || (self.min == self.max && (self.minex || self.maxex))
    }
}

pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<u32>,
    tail: u32,
    length: usize,
    level: usize,
}

impl SkipList {
    pub fn new() -> SkipList {
        let head = Node {
            ele: Sds::new(),
            score: 0.0,
            backward: NIL,
            links: vec![Link { forward: NIL, span: 0 }; MAX_LEVEL],
        };
        SkipList { nodes: vec![head], free: Vec::new(), tail: NIL, length: 0, level: 1 }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    fn node(&self, r: u32) -> &Node {
        &self.nodes[r as usize]
    }

    #[inline]
    fn node_mut(&mut self, r: u32) -> &mut Node {
        &mut self.nodes[r as usize]
    }

    /// Element and score of a node handle returned by the query methods.
    pub fn entry(&self, r: u32) -> (&Sds, f64) {
        let n = self.node(r);
        (&n.ele, n.score)
    }

    /// First node in list order, if any.
    pub fn first(&self) -> Option<u32> {
        match self.node(0).links[0].forward {
            NIL => None,
            r => Some(r),
        }
    }

    pub fn last(&self) -> Option<u32> {
        match self.tail {
            NIL => None,
            r => Some(r),
        }
    }

    /// Successor in list order.
    pub fn next(&self, r: u32) -> Option<u32> {
        match self.node(r).links[0].forward {
            NIL => None,
            n => Some(n),
        }
    }

    /// Predecessor in list order; the head sentinel is never returned.
    pub fn prev(&self, r: u32) -> Option<u32> {
        match self.node(r).backward {
            NIL => None,
            n => Some(n),
        }
    }

    fn random_level(&self) -> usize {
        let mut level = 1;
        let mut rng = rand::rng();
        while level < MAX_LEVEL && (rng.random::<u32>() & 0xFFFF) < P_BRANCH {
            level += 1;
        }
        level
    }

    /// True when `(score, ele)` sorts after the node `r`.
    #[inline]
    fn comes_after(&self, r: u32, score: f64, ele: &[u8]) -> bool {
        let n = self.node(r);
        n.score < score || (n.score == score && n.ele.as_bytes() < ele)
    }

    /// Inserts an element assumed not already present. The caller (which
    /// keeps the member table) guarantees uniqueness.
    pub fn insert(&mut self, score: f64, ele: Sds) -> u32 {
        debug_assert!(!score.is_nan());
        let mut update = [0u32; MAX_LEVEL];
        let mut rank = [0u32; MAX_LEVEL];

        let mut x = 0u32;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            loop {
                let fwd = self.node(x).links[i].forward;
                if fwd != NIL && self.comes_after(fwd, score, ele.as_bytes()) {
                    rank[i] += self.node(x).links[i].span;
                    x = fwd;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let level = self.random_level();
        if level > self.level {
            for item in update.iter_mut().take(level).skip(self.level) {
                *item = 0;
            }
            for i in self.level..level {
                rank[i] = 0;
                self.node_mut(0).links[i].span = self.length as u32;
            }
            self.level = level;
        }

        let new = self.alloc(Node {
            ele,
            score,
            backward: NIL,
            links: vec![Link { forward: NIL, span: 0 }; level],
        });

        for i in 0..level {
            let at = update[i];
            let prev_link = self.node(at).links[i];
            self.node_mut(new).links[i] = Link {
                forward: prev_link.forward,
                span: prev_link.span - (rank[0] - rank[i]),
            };
            let up = self.node_mut(at);
            up.links[i].forward = new;
            up.links[i].span = (rank[0] - rank[i]) + 1;
        }
        // Untouched upper levels now skip one more node.
        for i in level..self.level {
            self.node_mut(update[i]).links[i].span += 1;
        }

        self.node_mut(new).backward = if update[0] == 0 { NIL } else { update[0] };
        let fwd = self.node(new).links[0].forward;
        if fwd != NIL {
            self.node_mut(fwd).backward = new;
        } else {
            self.tail = new;
        }
        self.length += 1;
        new
    }

    fn alloc(&mut self, node: Node) -> u32 {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    /// Deletes the node matching `(score, ele)` exactly. Returns whether a
    /// node was removed.
    pub fn delete(&mut self, score: f64, ele: &[u8]) -> bool {
        let mut update = [0u32; MAX_LEVEL];
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).links[i].forward;
                if fwd != NIL && self.comes_after(fwd, score, ele) {
                    x = fwd;
                } else {
                    break;
                }
            }
            update[i] = x;
        }
        let target = self.node(x).links[0].forward;
        if target != NIL {
            let n = self.node(target);
            if n.score == score && n.ele.as_bytes() == ele {
                self.unlink(target, &update);
                return true;
            }
        }
        false
    }

    fn unlink(&mut self, x: u32, update: &[u32; MAX_LEVEL]) {
        for i in 0..self.level {
            let up = update[i];
            if self.node(up).links[i].forward == x {
                let xspan = self.node(x).links[i].span;
                let xfwd = self.node(x).links[i].forward;
                let link = &mut self.node_mut(up).links[i];
                link.span += xspan;
                link.span -= 1;
                link.forward = xfwd;
            } else {
                self.node_mut(up).links[i].span -= 1;
            }
        }
        let fwd = self.node(x).links[0].forward;
        let back = self.node(x).backward;
        if fwd != NIL {
            self.node_mut(fwd).backward = back;
        } else {
            self.tail = back;
        }
        while self.level > 1 && self.node(0).links[self.level - 1].forward == NIL {
            self.level -= 1;
        }
        self.length -= 1;
        self.nodes[x as usize].ele = Sds::new();
        self.free.push(x);
    }

    /// 1-based rank of `(score, ele)`, or `None` when absent.
    pub fn rank(&self, score: f64, ele: &[u8]) -> Option<usize> {
        let mut rank = 0usize;
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).links[i].forward;
                if fwd == NIL {
                    break;
                }
                let n = self.node(fwd);
                let goes = n.score < score
                    || (n.score == score && n.ele.as_bytes() <= ele);
                if goes {
                    rank += self.node(x).links[i].span as usize;
                    x = fwd;
                } else {
                    break;
                }
            }
            if x != 0 && self.node(x).ele.as_bytes() == ele && self.node(x).score == score {
                return Some(rank);
            }
        }
        None
    }

    /// Node at 1-based rank.
    pub fn by_rank(&self, rank: usize) -> Option<u32> {
        if rank == 0 || rank > self.length {
            return None;
        }
        let mut traversed = 0usize;
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let link = self.node(x).links[i];
                if link.forward != NIL && traversed + link.span as usize <= rank {
                    traversed += link.span as usize;
                    x = link.forward;
                } else {
                    break;
                }
            }
            if traversed == rank && x != 0 {
                return Some(x);
            }
        }
        None
    }

    /// Whether any node falls inside `range`.
    pub fn any_in_range(&self, range: &ScoreRange) -> bool {
        if range.is_void() || self.length == 0 {
            return false;
        }
        // All scores below, or all above.
        let last = self.node(self.tail);
        if !range.gte_min(last.score) {
            return false;
        }
        let first = self.node(self.node(0).links[0].forward);
        if !range.lte_max(first.score) {
            return false;
        }
        true
    }

    /// First node with score inside `range`.
    pub fn first_in_range(&self, range: &ScoreRange) -> Option<u32> {
        if !self.any_in_range(range) {
            return None;
        }
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).links[i].forward;
                if fwd != NIL && !range.gte_min(self.node(fwd).score) {
                    x = fwd;
                } else {
                    break;
                }
            }
        }
        let x = self.node(x).links[0].forward;
        if x != NIL && range.lte_max(self.node(x).score) {
            Some(x)
        } else {
            None
        }
    }

    /// Last node with score inside `range`.
    pub fn last_in_range(&self, range: &ScoreRange) -> Option<u32> {
        if !self.any_in_range(range) {
            return None;
        }
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).links[i].forward;
                if fwd != NIL && range.lte_max(self.node(fwd).score) {
                    x = fwd;
                } else {
                    break;
                }
            }
        }
        if x != 0 && range.gte_min(self.node(x).score) {
            Some(x)
        } else {
            None
        }
    }

    /// Removes every node with score inside `range`, returning the removed
    /// elements so the caller can fix up its member table.
    pub fn delete_range_by_score(&mut self, range: &ScoreRange) -> Vec<(Sds, f64)> {
        let mut removed = Vec::new();
        let mut x = self.first_in_range(range);
        while let Some(r) = x {
            let (ele, score) = {
                let n = self.node(r);
                (n.ele.clone(), n.score)
            };
            if !range.lte_max(score) {
                break;
            }
            x = self.next(r);
            self.delete(score, ele.as_bytes());
            removed.push((ele, score));
        }
        removed
    }

    /// Removes nodes with 1-based rank in `[start, end]`.
    pub fn delete_range_by_rank(&mut self, start: usize, end: usize) -> Vec<(Sds, f64)> {
        let mut removed = Vec::new();
        let mut rank = start;
        while rank <= end {
            // Ranks shift down as nodes are removed, so keep deleting at
            // `start` until the window is exhausted.
            match self.by_rank(start) {
                Some(r) => {
                    let (ele, score) = {
                        let n = self.node(r);
                        (n.ele.clone(), n.score)
                    };
                    self.delete(score, ele.as_bytes());
                    removed.push((ele, score));
                    rank += 1;
                }
                None => break,
            }
        }
        removed
    }

    /// Iterates `(element, score)` in list order.
    pub fn iter(&self) -> SkipIter<'_> {
        SkipIter { zsl: self, cur: self.node(0).links[0].forward }
    }

    /// Structural checks used by tests: backward links point at the true
    /// predecessor and level-0 spans are all 1.
    #[cfg(test)]
    fn check_invariants(&self) {
        let mut prev = NIL;
        let mut cur = self.node(0).links[0].forward;
        let mut count = 0;
        while cur != NIL {
            let n = self.node(cur);
            assert_eq!(n.backward, prev, "backward link mismatch");
            if prev != NIL {
                let p = self.node(prev);
                assert!(
                    p.score < n.score || (p.score == n.score && p.ele < n.ele),
                    "order violation"
                );
            }
            count += 1;
            // Rank via spans equals position.
            assert_eq!(self.rank(n.score, n.ele.as_bytes()), Some(count));
            prev = cur;
            cur = n.links[0].forward;
        }
        assert_eq!(count, self.length);
    }
}

impl Default for SkipList {
    fn default() -> SkipList {
        SkipList::new()
    }
}

pub struct SkipIter<'a> {
    zsl: &'a SkipList,
    cur: u32,
}

impl<'a> Iterator for SkipIter<'a> {
    type Item = (&'a Sds, f64);

    fn next(&mut self) -> Option<(&'a Sds, f64)> {
        if self.cur == NIL {
            return None;
        }
        let n = &self.zsl.nodes[self.cur as usize];
        self.cur = n.links[0].forward;
        Some((&n.ele, n.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(pairs: &[(f64, &str)]) -> SkipList {
        let mut zsl = SkipList::new();
        for (score, ele) in pairs {
            zsl.insert(*score, Sds::from(*ele));
        }
        zsl
    }

    fn elements(zsl: &SkipList) -> Vec<String> {
        zsl.iter()
            .map(|(e, _)| String::from_utf8_lossy(e.as_bytes()).to_string())
            .collect()
    }

    #[test]
    fn ordering_by_score_then_element() {
        let zsl = build(&[(1.0, "a"), (2.0, "c"), (2.0, "b"), (0.5, "z")]);
        assert_eq!(elements(&zsl), vec!["z", "a", "b", "c"]);
        zsl.check_invariants();
    }

    #[test]
    fn rank_is_one_based_and_span_consistent() {
        let zsl = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]);
        assert_eq!(zsl.rank(1.0, b"a"), Some(1));
        assert_eq!(zsl.rank(4.0, b"d"), Some(4));
        assert_eq!(zsl.rank(2.5, b"x"), None);
        let r = zsl.by_rank(3).unwrap();
        assert_eq!(zsl.entry(r).0.as_bytes(), b"c");
        assert_eq!(zsl.by_rank(0), None);
        assert_eq!(zsl.by_rank(5), None);
        zsl.check_invariants();
    }

    #[test]
    fn delete_relinks() {
        let mut zsl = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        assert!(zsl.delete(2.0, b"b"));
        assert!(!zsl.delete(2.0, b"b"));
        // Wrong score does not match.
        assert!(!zsl.delete(9.0, b"a"));
        assert_eq!(elements(&zsl), vec!["a", "c"]);
        assert_eq!(zsl.len(), 2);
        zsl.check_invariants();
    }

    #[test]
    fn delete_tail_updates_tail() {
        let mut zsl = build(&[(1.0, "a"), (2.0, "b")]);
        assert!(zsl.delete(2.0, b"b"));
        let t = zsl.last().unwrap();
        assert_eq!(zsl.entry(t).0.as_bytes(), b"a");
        assert!(zsl.delete(1.0, b"a"));
        assert!(zsl.last().is_none());
        assert!(zsl.first().is_none());
    }

    #[test]
    fn score_ranges() {
        let zsl = build(&[(1.0, "a"), (2.0, "b"), (2.0, "c"), (3.0, "d")]);
        let r = ScoreRange::inclusive(2.0, 2.0);
        let first = zsl.first_in_range(&r).unwrap();
        assert_eq!(zsl.entry(first).0.as_bytes(), b"b");
        let last = zsl.last_in_range(&r).unwrap();
        assert_eq!(zsl.entry(last).0.as_bytes(), b"c");

        let exclusive = ScoreRange { min: 1.0, max: 3.0, minex: true, maxex: true };
        let first = zsl.first_in_range(&exclusive).unwrap();
        assert_eq!(zsl.entry(first).0.as_bytes(), b"b");
        let last = zsl.last_in_range(&exclusive).unwrap();
        assert_eq!(zsl.entry(last).0.as_bytes(), b"c");

        assert!(zsl.first_in_range(&ScoreRange::inclusive(5.0, 9.0)).is_none());
        assert!(zsl.first_in_range(&ScoreRange::inclusive(3.0, 1.0)).is_none());
    }

    #[test]
    fn delete_by_score_range() {
        let mut zsl = build(&[(1.0, "a"), (2.0, "b"), (2.5, "c"), (3.0, "d")]);
        let removed = zsl.delete_range_by_score(&ScoreRange::inclusive(2.0, 2.5));
        let names: Vec<_> = removed.iter().map(|(e, _)| e.as_bytes().to_vec()).collect();
        assert_eq!(names, vec![b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(elements(&zsl), vec!["a", "d"]);
        zsl.check_invariants();
    }

    #[test]
    fn delete_by_rank_range() {
        let mut zsl = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]);
        let removed = zsl.delete_range_by_rank(2, 3);
        assert_eq!(removed.len(), 2);
        assert_eq!(elements(&zsl), vec!["a", "d"]);
        zsl.check_invariants();
    }

    #[test]
    fn arena_recycles_slots() {
        let mut zsl = SkipList::new();
        for i in 0..100 {
            zsl.insert(i as f64, Sds::from_i64(i));
        }
        for i in 0..50 {
            assert!(zsl.delete(i as f64, Sds::from_i64(i).as_bytes()));
        }
        let before = zsl.nodes.len();
        for i in 100..150 {
            zsl.insert(i as f64, Sds::from_i64(i));
        }
        // Freed slots get reused before the arena grows.
        assert_eq!(zsl.nodes.len(), before);
        assert_eq!(zsl.len(), 100);
        zsl.check_invariants();
    }

    #[test]
    fn large_population_keeps_invariants() {
        let mut zsl = SkipList::new();
        for i in 0..500 {
            zsl.insert((i % 17) as f64, Sds::from_i64(i));
        }
        assert_eq!(zsl.len(), 500);
        zsl.check_invariants();
    }
}
