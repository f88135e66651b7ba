//! Endpoint constraints shared between partnered tab vectors.
//!
//! Each vector proposes a `[min, max]` range for its top and bottom
//! endpoint; proposals from vectors that should end together are merged
//! into shared groups, and each group is resolved exactly once, rewriting
//! every participating endpoint.

use crate::vector::{VectorId, VectorStore};

/// Handle to a constraint group in a [`ConstraintPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintId(pub u32);

impl ConstraintId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Member {
    vector: VectorId,
    is_top: bool,
    y_min: i32,
    y_max: i32,
}

#[derive(Debug, Default)]
struct Group {
    members: Vec<Member>,
}

impl Group {
    /// Max of the mins and min of the maxes over all proposals.
    fn range(&self) -> (i32, i32) {
        let mut y_min = i32::MIN;
        let mut y_max = i32::MAX;
        for m in &self.members {
            y_min = y_min.max(m.y_min);
            y_max = y_max.min(m.y_max);
        }
        (y_min, y_max)
    }
}

/// Arena of constraint groups, explicitly shared by the vectors that
/// proposed into them.
#[derive(Debug, Default)]
pub struct ConstraintPool {
    groups: Vec<Option<Group>>,
}

impl ConstraintPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the top or bottom constraint for a vector: its confirmed end
    /// on one side, its extended range on the other.
    pub fn create(&mut self, store: &mut VectorStore, vector: VectorId, is_top: bool) {
        let v = store.get(vector);
        let (y_min, y_max) = if is_top {
            (v.end.y, v.extended_ymax)
        } else {
            (v.extended_ymin, v.start.y)
        };
        let id = ConstraintId(self.groups.len() as u32);
        self.groups.push(Some(Group {
            members: vec![Member {
                vector,
                is_top,
                y_min,
                y_max,
            }],
        }));
        let v = store.get_mut(vector);
        if is_top {
            v.top_constraint = Some(id);
        } else {
            v.bottom_constraint = Some(id);
        }
    }

    fn group(&self, id: ConstraintId) -> &Group {
        self.groups[id.index()].as_ref().expect("merged group id")
    }

    /// True if the two groups exist, differ, and their combined proposals
    /// still intersect.
    pub fn compatible(&self, a: ConstraintId, b: ConstraintId) -> bool {
        if a == b {
            return false;
        }
        let (min_a, max_a) = self.group(a).range();
        let (min_b, max_b) = self.group(b).range();
        max_a.min(max_b) >= min_a.max(min_b)
    }

    /// Merge group `b` into group `a`, re-pointing every member vector.
    pub fn merge(&mut self, store: &mut VectorStore, a: ConstraintId, b: ConstraintId) {
        if a == b {
            return;
        }
        let absorbed = self.groups[b.index()].take().expect("merged group id");
        for m in &absorbed.members {
            if !store.contains(m.vector) {
                continue;
            }
            let v = store.get_mut(m.vector);
            if m.is_top {
                v.top_constraint = Some(a);
            } else {
                v.bottom_constraint = Some(a);
            }
        }
        self.groups[a.index()]
            .as_mut()
            .expect("merged group id")
            .members
            .extend(absorbed.members);
    }

    /// Merge the two vectors' constraints on the given end when compatible.
    pub fn merge_if_compatible(
        &mut self,
        store: &mut VectorStore,
        a: VectorId,
        b: VectorId,
        is_top_a: bool,
        is_top_b: bool,
    ) {
        let ca = if is_top_a {
            store.get(a).top_constraint
        } else {
            store.get(a).bottom_constraint
        };
        let cb = if is_top_b {
            store.get(b).top_constraint
        } else {
            store.get(b).bottom_constraint
        };
        if let (Some(ca), Some(cb)) = (ca, cb) {
            if self.compatible(ca, cb) {
                self.merge(store, ca, cb);
            }
        }
    }

    /// Resolve every group once, writing the midpoint of the intersected
    /// range into each member endpoint. A group whose intersection came up
    /// empty leaves its endpoints at their pre-resolution values.
    pub fn apply(&mut self, store: &mut VectorStore) {
        for slot in &mut self.groups {
            let Some(group) = slot.take() else { continue };
            let (y_min, y_max) = group.range();
            let contradictory = y_max < y_min;
            let y = (i64::from(y_min) + i64::from(y_max)) / 2;
            for m in &group.members {
                if !store.contains(m.vector) {
                    continue;
                }
                let v = store.get_mut(m.vector);
                if !contradictory {
                    if m.is_top {
                        v.set_y_end(y as i32);
                    } else {
                        v.set_y_start(y as i32);
                    }
                }
                if m.is_top {
                    v.top_constraint = None;
                } else {
                    v.bottom_constraint = None;
                }
            }
        }
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Point;
    use crate::vector::{Alignment, TabVector};

    fn vector_at(x: i32, y0: i32, y1: i32, ext0: i32, ext1: i32) -> TabVector {
        let mut v = TabVector::from_boxes(Alignment::LeftAligned, ext0, ext1, Vec::new());
        v.start = Point::new(x, y0);
        v.end = Point::new(x, y1);
        v
    }

    #[test]
    fn test_compatible_groups_resolve_to_midpoint() {
        let mut store = VectorStore::new();
        let a = store.push(vector_at(100, 0, 200, -20, 260));
        let b = store.push(vector_at(400, 0, 240, -20, 260));
        let mut pool = ConstraintPool::new();
        pool.create(&mut store, a, true);
        pool.create(&mut store, b, true);
        // a proposes [200, 260], b proposes [240, 260].
        let ca = store.get(a).top_constraint.unwrap();
        let cb = store.get(b).top_constraint.unwrap();
        assert!(pool.compatible(ca, cb));
        pool.merge(&mut store, ca, cb);
        pool.apply(&mut store);
        assert_eq!(store.get(a).end.y, 250);
        assert_eq!(store.get(b).end.y, 250);
        assert!(store.get(a).top_constraint.is_none());
    }

    #[test]
    fn test_incompatible_groups_do_not_merge() {
        let mut store = VectorStore::new();
        let a = store.push(vector_at(100, 0, 200, -20, 210));
        let b = store.push(vector_at(400, 0, 300, -20, 340));
        let mut pool = ConstraintPool::new();
        pool.create(&mut store, a, true);
        pool.create(&mut store, b, true);
        let ca = store.get(a).top_constraint.unwrap();
        let cb = store.get(b).top_constraint.unwrap();
        // [200,210] vs [300,340] cannot intersect.
        assert!(!pool.compatible(ca, cb));
        pool.apply(&mut store);
        // Singleton groups resolve within their own range.
        assert_eq!(store.get(a).end.y, 205);
        assert_eq!(store.get(b).end.y, 320);
    }

    #[test]
    fn test_resolved_bound_within_intersection() {
        let mut store = VectorStore::new();
        let ids: Vec<_> = [(0, 150, -10, 180), (0, 130, -10, 200), (0, 120, -10, 160)]
            .iter()
            .map(|&(y0, y1, e0, e1)| store.push(vector_at(50, y0, y1, e0, e1)))
            .collect();
        let mut pool = ConstraintPool::new();
        for &id in &ids {
            pool.create(&mut store, id, true);
        }
        let groups: Vec<_> = ids
            .iter()
            .map(|&id| store.get(id).top_constraint.unwrap())
            .collect();
        pool.merge(&mut store, groups[0], groups[1]);
        assert!(pool.compatible(groups[0], groups[2]));
        pool.merge(&mut store, groups[0], groups[2]);
        pool.apply(&mut store);
        // Intersection of [150,180], [130,200], [120,160] is [150,160].
        for &id in &ids {
            let y = store.get(id).end.y;
            assert!((150..=160).contains(&y), "resolved y {y} outside range");
        }
    }

    #[test]
    fn test_bottom_constraints_move_start() {
        let mut store = VectorStore::new();
        let a = store.push(vector_at(100, 50, 200, 0, 260));
        let mut pool = ConstraintPool::new();
        pool.create(&mut store, a, false);
        pool.apply(&mut store);
        // Bottom proposal is [extended_ymin, start.y] = [0, 50].
        assert_eq!(store.get(a).start.y, 25);
    }
}
