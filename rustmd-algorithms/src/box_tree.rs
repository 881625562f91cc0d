//! Adaptive box tree over the output space.
//!
//! Boxes live in an arena and are addressed by index. A split appends all
//! `Π split_into_d` children contiguously, dimension 0 varying fastest, so an
//! interior node only needs the index of its first child.
//!
//! Each child covers the half-open interval `[lo, hi)` along every dimension;
//! the root's upper face is closed so the maximum extent lands in the last
//! child. Child boundaries come from one function of the parent extent, so
//! neighbouring children share bit-identical boundary values.

use std::ops::Range;

use log::debug;
use rustmd_core::{EventBatch, MdEvent, MdEventRef};

use crate::box_controller::BoxController;
use crate::error::{Error, Result};

/// Contents of a box.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Leaf holding its events.
    Leaf(EventBatch),
    /// Interior node; children occupy `first_child..first_child + n_children`.
    Interior {
        /// Arena index of the first child.
        first_child: usize,
    },
}

/// A box of the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxNode {
    lo: Vec<f64>,
    hi: Vec<f64>,
    depth: usize,
    kind: NodeKind,
}

impl BoxNode {
    fn leaf(lo: Vec<f64>, hi: Vec<f64>, depth: usize) -> Self {
        let nd = lo.len();
        Self {
            lo,
            hi,
            depth,
            kind: NodeKind::Leaf(EventBatch::new(nd)),
        }
    }

    /// Lower corner.
    #[must_use]
    pub fn lo(&self) -> &[f64] {
        &self.lo
    }

    /// Upper corner.
    #[must_use]
    pub fn hi(&self) -> &[f64] {
        &self.hi
    }

    /// Depth below the root (root = 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Node contents.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns true for a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    /// Events of a leaf.
    #[must_use]
    pub fn events(&self) -> Option<&EventBatch> {
        match &self.kind {
            NodeKind::Leaf(batch) => Some(batch),
            NodeKind::Interior { .. } => None,
        }
    }

    /// Volume of the box.
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.lo
            .iter()
            .zip(&self.hi)
            .map(|(lo, hi)| hi - lo)
            .product()
    }
}

/// `i`-th of `n` equal divisions of `[lo, hi]`; the last one is exactly `hi`.
#[inline]
#[allow(clippy::cast_precision_loss)]
fn boundary(lo: f64, hi: f64, n: usize, i: usize) -> f64 {
    if i >= n {
        hi
    } else {
        lo + (hi - lo) * (i as f64) / (n as f64)
    }
}

/// Child slot along one dimension for coordinate `c` in `[lo, hi]`.
#[inline]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn slot(c: f64, lo: f64, hi: f64, n: usize) -> usize {
    let guess = ((c - lo) / (hi - lo) * n as f64).floor();
    let mut s = if guess <= 0.0 {
        0
    } else {
        (guess as usize).min(n - 1)
    };
    while s > 0 && c < boundary(lo, hi, n, s) {
        s -= 1;
    }
    while s + 1 < n && c >= boundary(lo, hi, n, s + 1) {
        s += 1;
    }
    s
}

/// Adaptive box tree storing [`EventBatch`] leaves.
#[derive(Debug, Clone, PartialEq)]
pub struct MdBoxTree {
    nd: usize,
    controller: BoxController,
    factors: Vec<usize>,
    strides: Vec<usize>,
    n_children: usize,
    nodes: Vec<BoxNode>,
    n_events: u64,
    n_dropped: u64,
}

impl MdBoxTree {
    /// Creates a tree whose root covers `[min, max]`, pre-split to the
    /// controller's minimum depth.
    ///
    /// # Errors
    /// Returns an error for mismatched or degenerate extents, or an invalid
    /// controller.
    pub fn new(min: Vec<f64>, max: Vec<f64>, controller: BoxController) -> Result<Self> {
        let nd = min.len();
        if nd == 0 {
            return Err(Error::ExtentsLength {
                expected: 1,
                actual: 0,
            });
        }
        if max.len() != nd {
            return Err(Error::ExtentsLength {
                expected: nd,
                actual: max.len(),
            });
        }
        for (dim, (&lo, &hi)) in min.iter().zip(&max).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(Error::InvalidExtents {
                    dim,
                    min: lo,
                    max: hi,
                });
            }
        }
        controller.validate(nd)?;

        let factors = controller.factors(nd);
        let mut strides = Vec::with_capacity(nd);
        let mut stride = 1;
        for &f in &factors {
            strides.push(stride);
            stride *= f;
        }
        let min_depth = controller.min_depth;
        let mut tree = Self {
            nd,
            controller,
            factors,
            strides,
            n_children: stride,
            nodes: vec![BoxNode::leaf(min, max, 0)],
            n_events: 0,
            n_dropped: 0,
        };
        tree.presplit(min_depth);
        Ok(tree)
    }

    /// Forces every leaf to depth `depth`, regardless of event counts.
    ///
    /// # Errors
    /// Returns an error if `depth` exceeds the maximum recursion depth.
    pub fn set_min_recursion_depth(&mut self, depth: usize) -> Result<()> {
        if depth > self.controller.max_depth {
            return Err(Error::RecursionDepth {
                min: depth,
                max: self.controller.max_depth,
            });
        }
        self.controller.min_depth = depth;
        self.presplit(depth);
        Ok(())
    }

    fn presplit(&mut self, depth: usize) {
        let mut pending: Vec<usize> = self.leaf_indices().collect();
        while let Some(idx) = pending.pop() {
            if self.nodes[idx].depth < depth {
                let first = self.split(idx);
                pending.extend(first..first + self.n_children);
            }
        }
        if depth > 0 {
            debug!(
                "pre-split tree to depth {depth}: {} boxes",
                self.nodes.len()
            );
        }
    }

    /// Number of dimensions.
    #[must_use]
    pub fn nd(&self) -> usize {
        self.nd
    }

    /// Splitting policy.
    #[must_use]
    pub fn controller(&self) -> &BoxController {
        &self.controller
    }

    /// Root lower corner.
    #[must_use]
    pub fn min(&self) -> &[f64] {
        &self.nodes[0].lo
    }

    /// Root upper corner.
    #[must_use]
    pub fn max(&self) -> &[f64] {
        &self.nodes[0].hi
    }

    /// Number of children of a split box.
    #[must_use]
    pub fn children_per_split(&self) -> usize {
        self.n_children
    }

    /// Events stored.
    #[must_use]
    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    /// Events rejected as out of range or non-finite.
    #[must_use]
    pub fn n_dropped(&self) -> u64 {
        self.n_dropped
    }

    /// Total number of boxes.
    #[must_use]
    pub fn n_boxes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaves.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Deepest level reached.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Box at arena index `idx`.
    #[must_use]
    pub fn node(&self, idx: usize) -> Option<&BoxNode> {
        self.nodes.get(idx)
    }

    /// Arena indices of the children of `idx` (`None` for leaves).
    #[must_use]
    pub fn children(&self, idx: usize) -> Option<Range<usize>> {
        match self.nodes.get(idx)?.kind {
            NodeKind::Interior { first_child } => Some(first_child..first_child + self.n_children),
            NodeKind::Leaf(_) => None,
        }
    }

    /// Arena indices of all leaves, in arena order.
    pub fn leaf_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf())
            .map(|(i, _)| i)
    }

    /// Leaves in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = &BoxNode> + '_ {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Event count of every leaf, in arena order.
    #[must_use]
    pub fn leaf_event_counts(&self) -> Vec<usize> {
        self.leaves()
            .map(|n| n.events().map_or(0, EventBatch::len))
            .collect()
    }

    /// Sum of event signals.
    #[must_use]
    pub fn total_signal(&self) -> f64 {
        self.leaves()
            .filter_map(BoxNode::events)
            .map(EventBatch::total_signal)
            .sum()
    }

    /// Sum of squared errors.
    #[must_use]
    pub fn total_error_sq(&self) -> f64 {
        self.leaves()
            .filter_map(BoxNode::events)
            .map(EventBatch::total_error_sq)
            .sum()
    }

    /// Returns true if `coords` lies in the closed root extent.
    #[must_use]
    pub fn contains(&self, coords: &[f64]) -> bool {
        let root = &self.nodes[0];
        coords.len() == self.nd
            && coords
                .iter()
                .zip(root.lo.iter().zip(&root.hi))
                .all(|(&c, (&lo, &hi))| c.is_finite() && c >= lo && c <= hi)
    }

    fn child_offset(&self, node: &BoxNode, coords: &[f64]) -> usize {
        (0..self.nd)
            .map(|d| slot(coords[d], node.lo[d], node.hi[d], self.factors[d]) * self.strides[d])
            .sum()
    }

    /// Arena index of the leaf that holds (or would hold) `coords`.
    #[must_use]
    pub fn locate(&self, coords: &[f64]) -> Option<usize> {
        if !self.contains(coords) {
            return None;
        }
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            match node.kind {
                NodeKind::Leaf(_) => return Some(idx),
                NodeKind::Interior { first_child } => {
                    idx = first_child + self.child_offset(node, coords);
                }
            }
        }
    }

    /// Inserts one event. Returns false if it was dropped.
    pub fn insert(&mut self, event: MdEventRef<'_>) -> bool {
        let Some(idx) = self.locate(event.coords) else {
            self.n_dropped += 1;
            return false;
        };
        let count = match &mut self.nodes[idx].kind {
            NodeKind::Leaf(batch) => {
                batch.push_unchecked_from(event);
                batch.len()
            }
            NodeKind::Interior { .. } => return false,
        };
        self.n_events += 1;
        if self.controller.should_split(count, self.nodes[idx].depth) {
            self.split_recursive(idx);
        }
        true
    }

    /// Inserts an owned event. Returns false if it was dropped.
    ///
    /// # Errors
    /// Returns an error if the event has the wrong dimensionality.
    pub fn insert_event(&mut self, event: &MdEvent) -> Result<bool> {
        if event.coords.len() != self.nd {
            return Err(rustmd_core::Error::DimensionMismatch {
                expected: self.nd,
                actual: event.coords.len(),
            }
            .into());
        }
        Ok(self.insert(MdEventRef {
            signal: event.signal,
            error_sq: event.error_sq,
            run_index: event.run_index,
            detector_id: event.detector_id,
            coords: &event.coords,
        }))
    }

    /// Inserts every event of a batch. Returns the number inserted.
    ///
    /// # Errors
    /// Returns an error if the batch has the wrong dimensionality.
    pub fn insert_batch(&mut self, batch: &EventBatch) -> Result<usize> {
        if batch.nd() != self.nd {
            return Err(rustmd_core::Error::DimensionMismatch {
                expected: self.nd,
                actual: batch.nd(),
            }
            .into());
        }
        Ok(batch.iter().filter(|e| self.insert(*e)).count())
    }

    /// Splits `idx` and every resulting child that still exceeds the threshold.
    fn split_recursive(&mut self, idx: usize) {
        let mut pending = vec![idx];
        while let Some(i) = pending.pop() {
            let node = &self.nodes[i];
            let count = node.events().map_or(0, EventBatch::len);
            if !self.controller.should_split(count, node.depth) {
                continue;
            }
            let first = self.split(i);
            pending.extend(first..first + self.n_children);
        }
    }

    /// Turns leaf `idx` into an interior node and redistributes its events.
    /// Returns the index of the first child.
    fn split(&mut self, idx: usize) -> usize {
        if let NodeKind::Interior { first_child } = self.nodes[idx].kind {
            return first_child;
        }
        let first_child = self.nodes.len();
        let events = match std::mem::replace(
            &mut self.nodes[idx].kind,
            NodeKind::Interior { first_child },
        ) {
            NodeKind::Leaf(events) => events,
            NodeKind::Interior { .. } => EventBatch::new(self.nd),
        };

        let parent = &self.nodes[idx];
        let depth = parent.depth + 1;
        let mut children = Vec::with_capacity(self.n_children);
        for c in 0..self.n_children {
            let mut lo = Vec::with_capacity(self.nd);
            let mut hi = Vec::with_capacity(self.nd);
            for d in 0..self.nd {
                let n = self.factors[d];
                let s = (c / self.strides[d]) % n;
                lo.push(boundary(parent.lo[d], parent.hi[d], n, s));
                hi.push(boundary(parent.lo[d], parent.hi[d], n, s + 1));
            }
            children.push(BoxNode::leaf(lo, hi, depth));
        }
        for event in events.iter() {
            let offset = self.child_offset(parent, event.coords);
            if let NodeKind::Leaf(batch) = &mut children[offset].kind {
                batch.push_unchecked_from(event);
            }
        }
        self.nodes.extend(children);
        first_child
    }

    /// Inserts every event of `other` into this tree. Returns the number of
    /// events inserted.
    ///
    /// # Errors
    /// Returns an error if the trees differ in dimensionality or extents.
    pub fn merge(&mut self, other: &MdBoxTree) -> Result<u64> {
        if other.nd != self.nd || other.min() != self.min() || other.max() != self.max() {
            return Err(Error::IncompatibleTree(format!(
                "cannot merge {}-d tree {:?}..{:?} into {}-d tree {:?}..{:?}",
                other.nd,
                other.min(),
                other.max(),
                self.nd,
                self.min(),
                self.max()
            )));
        }
        let mut inserted = 0;
        for leaf in other.leaves() {
            if let Some(batch) = leaf.events() {
                for event in batch.iter() {
                    if self.insert(event) {
                        inserted += 1;
                    }
                }
            }
        }
        Ok(inserted)
    }

    /// Removes every event and box, keeping extents and controller.
    pub fn clear(&mut self) {
        let root = &self.nodes[0];
        let (lo, hi) = (root.lo.clone(), root.hi.clone());
        self.nodes = vec![BoxNode::leaf(lo, hi, 0)];
        self.n_events = 0;
        self.n_dropped = 0;
        self.presplit(self.controller.min_depth);
    }
}

trait PushRef {
    fn push_unchecked_from(&mut self, event: MdEventRef<'_>);
}

impl PushRef for EventBatch {
    #[inline]
    fn push_unchecked_from(&mut self, event: MdEventRef<'_>) {
        self.signal.push(event.signal);
        self.error_sq.push(event.error_sq);
        self.run_index.push(event.run_index);
        self.detector_id.push(event.detector_id);
        self.coords.extend_from_slice(event.coords);
    }
}
