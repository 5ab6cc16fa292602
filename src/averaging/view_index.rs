//! Stable mapping between caller view ids and dense matrix indices.

use std::collections::HashMap;

use super::{ViewId, ViewIdPair};

/// Dense index of the gauge anchor. The anchor view's rotation is held
/// constant by every estimator, and its tangent-space columns are omitted
/// from the sparse systems.
pub const ANCHOR_INDEX: usize = 0;

/// Bijection between view ids and contiguous 0-based indices.
///
/// Ids are ranked in ascending order, so the smallest view id becomes the
/// anchor. A caller that wants a different gauge view permutes ids before
/// building the index.
#[derive(Debug, Clone)]
pub struct ViewIndex {
    indices: HashMap<ViewId, usize>,
    ids: Vec<ViewId>,
}

impl ViewIndex {
    /// Builds the index over every view id appearing in `view_pairs`.
    pub fn from_view_pairs<T>(view_pairs: &HashMap<ViewIdPair, T>) -> Self {
        let mut ids: Vec<ViewId> = Vec::with_capacity(2 * view_pairs.len());
        for &(first, second) in view_pairs.keys() {
            ids.push(first);
            ids.push(second);
        }
        ids.sort_unstable();
        ids.dedup();
        let indices = ids
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index))
            .collect();
        Self { indices, ids }
    }

    pub fn num_views(&self) -> usize {
        self.ids.len()
    }

    /// Dense index of `id`, if the view participates in the graph.
    pub fn index_of(&self, id: ViewId) -> Option<usize> {
        self.indices.get(&id).copied()
    }

    /// View id sitting at a dense index.
    pub fn id_at(&self, index: usize) -> ViewId {
        self.ids[index]
    }

    /// Ascending view ids, parallel to the dense indices.
    pub fn ids(&self) -> &[ViewId] {
        &self.ids
    }

    pub fn anchor_index(&self) -> usize {
        ANCHOR_INDEX
    }

    /// View id of the gauge anchor.
    pub fn anchor_id(&self) -> ViewId {
        self.ids[ANCHOR_INDEX]
    }

    pub fn is_anchor(&self, id: ViewId) -> bool {
        self.index_of(id) == Some(ANCHOR_INDEX)
    }

    /// Column offset of a view's three tangent coordinates in the reduced
    /// system, or `None` for the anchor (whose columns are omitted).
    pub fn tangent_offset(&self, index: usize) -> Option<usize> {
        if index == ANCHOR_INDEX {
            None
        } else {
            Some(3 * (index - 1))
        }
    }
}
