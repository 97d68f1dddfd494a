//! Sibling collapse and parent expansion over the current edges of one tag
//! service.
//!
//! Resolution rules:
//!
//! - A bad tag with several goods follows the lowest good tag id.
//! - Following goods transitively ends at the ideal tag. When the walk
//!   loops, the ideal is the lowest tag id in the loop.
//! - Parent edges are mapped onto ideals before expansion, so a parent of
//!   any sibling applies to the whole sibling group.
//! - A tag displays as `{ideal(tag)} ∪ ancestors(ideal(tag))`.

use crate::ids::TagId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDisplayGraph {
    /// Ideal of every tag on either side of a sibling edge.
    ideals: HashMap<TagId, TagId>,
    /// Ideal → every tag that collapses to it, the ideal included.
    members: HashMap<TagId, BTreeSet<TagId>>,
    /// Ideal child → ideal parents.
    parents: HashMap<TagId, BTreeSet<TagId>>,
    /// Ideal parent → ideal children.
    children: HashMap<TagId, BTreeSet<TagId>>,
    /// Every tag on either side of any sibling or parent edge.
    chained: HashSet<TagId>,
    /// Undirected adjacency over raw edges, for component lookups.
    adjacency: HashMap<TagId, BTreeSet<TagId>>,
}

impl TagDisplayGraph {
    /// Build from current (bad, good) sibling pairs and current
    /// (child, parent) parent pairs.
    pub fn build(siblings: &[(TagId, TagId)], parent_pairs: &[(TagId, TagId)]) -> Self {
        let mut graph = Self::default();

        let mut next: BTreeMap<TagId, TagId> = BTreeMap::new();
        for &(bad, good) in siblings {
            if bad == good {
                continue;
            }
            next.entry(bad)
                .and_modify(|current| *current = (*current).min(good))
                .or_insert(good);
            graph.link(bad, good);
        }

        let sibling_tags: BTreeSet<TagId> = siblings
            .iter()
            .filter(|(bad, good)| bad != good)
            .flat_map(|&(bad, good)| [bad, good])
            .collect();
        for tag in &sibling_tags {
            let ideal = resolve_ideal(&next, *tag);
            graph.ideals.insert(*tag, ideal);
            graph.members.entry(ideal).or_default().insert(*tag);
        }

        for &(child, parent) in parent_pairs {
            if child == parent {
                continue;
            }
            graph.link(child, parent);
            let (child, parent) = (graph.ideal(child), graph.ideal(parent));
            if child == parent {
                continue;
            }
            graph.parents.entry(child).or_default().insert(parent);
            graph.children.entry(parent).or_default().insert(child);
        }

        graph.chained = graph.adjacency.keys().copied().collect();
        graph
    }

    fn link(&mut self, a: TagId, b: TagId) {
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    /// The tag this one collapses to. Unchained tags are their own ideal.
    pub fn ideal(&self, tag: TagId) -> TagId {
        self.ideals.get(&tag).copied().unwrap_or(tag)
    }

    pub fn is_chained(&self, tag: TagId) -> bool {
        self.chained.contains(&tag)
    }

    pub fn filter_chained<'a>(&self, tags: impl IntoIterator<Item = &'a TagId>) -> BTreeSet<TagId> {
        tags.into_iter()
            .filter(|tag| self.chained.contains(tag))
            .copied()
            .collect()
    }

    pub fn chained_tags(&self) -> BTreeSet<TagId> {
        self.chained.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chained.is_empty()
    }

    /// Ideal ancestors of a tag's ideal, not including the ideal itself
    /// unless parents loop back to it.
    pub fn ancestors(&self, tag: TagId) -> BTreeSet<TagId> {
        walk(&self.parents, self.ideal(tag))
    }

    /// Ideal descendants of a tag's ideal.
    pub fn descendants(&self, tag: TagId) -> BTreeSet<TagId> {
        walk(&self.children, self.ideal(tag))
    }

    /// Display tags for a storage tag: its ideal plus every ancestor.
    pub fn implies(&self, tag: TagId) -> BTreeSet<TagId> {
        let ideal = self.ideal(tag);
        let mut implied = walk(&self.parents, ideal);
        implied.insert(ideal);
        implied
    }

    /// Storage tags whose display includes `tag`. Empty when `tag` is not an
    /// ideal, since such a tag never displays.
    pub fn implicators(&self, tag: TagId) -> BTreeSet<TagId> {
        if self.ideal(tag) != tag {
            return BTreeSet::new();
        }
        let mut implicators = BTreeSet::new();
        let mut ideals = walk(&self.children, tag);
        ideals.insert(tag);
        for ideal in ideals {
            match self.members.get(&ideal) {
                Some(members) => implicators.extend(members.iter().copied()),
                None => {
                    implicators.insert(ideal);
                }
            }
        }
        implicators
    }

    /// Every tag connected to `tag` through sibling or parent edges, `tag`
    /// included.
    pub fn component(&self, tag: TagId) -> BTreeSet<TagId> {
        let mut seen = BTreeSet::from([tag]);
        let mut queue = VecDeque::from([tag]);
        while let Some(current) = queue.pop_front() {
            if let Some(neighbours) = self.adjacency.get(&current) {
                for next in neighbours {
                    if seen.insert(*next) {
                        queue.push_back(*next);
                    }
                }
            }
        }
        seen
    }
}

fn resolve_ideal(next: &BTreeMap<TagId, TagId>, start: TagId) -> TagId {
    let mut path = vec![start];
    let mut position: HashMap<TagId, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    while let Some(&good) = next.get(&current) {
        if let Some(&loop_start) = position.get(&good) {
            return path[loop_start..].iter().copied().min().unwrap_or(good);
        }
        position.insert(good, path.len());
        path.push(good);
        current = good;
    }
    current
}

fn walk(edges: &HashMap<TagId, BTreeSet<TagId>>, start: TagId) -> BTreeSet<TagId> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        if let Some(next) = edges.get(&current) {
            for tag in next {
                if seen.insert(*tag) {
                    queue.push_back(*tag);
                }
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: i64) -> TagId {
        TagId(id)
    }

    fn set(ids: &[i64]) -> BTreeSet<TagId> {
        ids.iter().map(|id| TagId(*id)).collect()
    }

    #[test]
    fn test_siblings_collapse_transitively() {
        let graph = TagDisplayGraph::build(&[(t(1), t(2)), (t(2), t(3))], &[]);
        assert_eq!(graph.ideal(t(1)), t(3));
        assert_eq!(graph.ideal(t(2)), t(3));
        assert_eq!(graph.ideal(t(3)), t(3));
        assert_eq!(graph.implicators(t(3)), set(&[1, 2, 3]));
        assert!(graph.implicators(t(1)).is_empty());
    }

    #[test]
    fn test_multiple_goods_follow_lowest_id() {
        let graph = TagDisplayGraph::build(&[(t(5), t(9)), (t(5), t(7))], &[]);
        assert_eq!(graph.ideal(t(5)), t(7));
        assert_eq!(graph.ideal(t(9)), t(9));
    }

    #[test]
    fn test_sibling_loop_resolves_to_lowest_id() {
        let graph = TagDisplayGraph::build(&[(t(4), t(6)), (t(6), t(2)), (t(2), t(4))], &[]);
        for tag in [2, 4, 6] {
            assert_eq!(graph.ideal(t(tag)), t(2));
        }
        assert_eq!(graph.implies(t(6)), set(&[2]));
    }

    #[test]
    fn test_parents_apply_to_ideals() {
        // 1 -> 2 sibling, 2 child of 10, 10 child of 20
        let graph = TagDisplayGraph::build(&[(t(1), t(2))], &[(t(2), t(10)), (t(10), t(20))]);
        assert_eq!(graph.implies(t(1)), set(&[2, 10, 20]));
        assert_eq!(graph.implicators(t(20)), set(&[1, 2, 10, 20]));
        assert_eq!(graph.ancestors(t(1)), set(&[10, 20]));
        assert_eq!(graph.descendants(t(20)), set(&[2, 10]));
    }

    #[test]
    fn test_parent_of_bad_tag_is_moved_to_ideal() {
        let graph = TagDisplayGraph::build(&[(t(1), t(2))], &[(t(1), t(3))]);
        assert_eq!(graph.implies(t(2)), set(&[2, 3]));
        assert_eq!(graph.implicators(t(3)), set(&[1, 2, 3]));
    }

    #[test]
    fn test_chained_and_components() {
        let graph = TagDisplayGraph::build(&[(t(1), t(2))], &[(t(3), t(4))]);
        assert!(graph.is_chained(t(1)));
        assert!(graph.is_chained(t(4)));
        assert!(!graph.is_chained(t(5)));
        assert_eq!(graph.filter_chained(&[t(1), t(5), t(3)]), set(&[1, 3]));
        assert_eq!(graph.component(t(2)), set(&[1, 2]));
        assert_eq!(graph.component(t(5)), set(&[5]));
        assert_eq!(graph.implies(t(5)), set(&[5]));
    }

    #[test]
    fn test_resolution_is_independent_of_edge_order() {
        let siblings = [(t(1), t(2)), (t(3), t(2)), (t(2), t(8))];
        let parents = [(t(8), t(9)), (t(3), t(11))];
        let forward = TagDisplayGraph::build(&siblings, &parents);

        let mut reversed_siblings = siblings.to_vec();
        reversed_siblings.reverse();
        let mut reversed_parents = parents.to_vec();
        reversed_parents.reverse();
        let backward = TagDisplayGraph::build(&reversed_siblings, &reversed_parents);

        assert_eq!(forward, backward);
        assert_eq!(forward.implies(t(1)), set(&[8, 9, 11]));
    }
}
