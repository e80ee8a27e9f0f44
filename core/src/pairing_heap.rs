//! Meldable min-heap keyed by candidate distance.
//!
//! Insertion and meld are O(1); `pop_min` consolidates the root's children
//! with the classic two-pass pairing (left-to-right pairwise melds, then a
//! right-to-left fold) for an amortized O(log n) extraction.

use crate::candidate::Candidate;

#[derive(Debug)]
struct Node {
    candidate: Candidate,
    children: Vec<Node>,
}

impl Node {
    fn leaf(candidate: Candidate) -> Self {
        Self {
            candidate,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PairingHeap {
    root: Option<Node>,
    len: usize,
}

impl PairingHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn peek(&self) -> Option<&Candidate> {
        self.root.as_ref().map(|node| &node.candidate)
    }

    pub fn insert(&mut self, candidate: Candidate) {
        let root = self.root.take();
        self.root = Some(match root {
            Some(root) => meld(root, Node::leaf(candidate)),
            None => Node::leaf(candidate),
        });
        self.len += 1;
    }

    /// Melds `other` into `self`, leaving `other` empty.
    pub fn merge(&mut self, other: &mut PairingHeap) {
        let Some(incoming) = other.root.take() else {
            return;
        };
        self.len += std::mem::take(&mut other.len);
        self.root = Some(match self.root.take() {
            Some(root) => meld(root, incoming),
            None => incoming,
        });
    }

    pub fn pop_min(&mut self) -> Option<Candidate> {
        let root = self.root.take()?;
        self.len -= 1;
        let Node {
            candidate,
            children,
        } = root;
        self.root = consolidate(children);
        Some(candidate)
    }
}

impl Drop for PairingHeap {
    fn drop(&mut self) {
        // Descending inserts build a chain as deep as the heap; unwind it
        // without recursion.
        let mut stack: Vec<Node> = self.root.take().into_iter().collect();
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

/// The root with the larger distance becomes the newest child of the other.
/// Ties keep `left` on top.
fn meld(mut left: Node, mut right: Node) -> Node {
    if right.candidate.cmp_distance(&left.candidate).is_lt() {
        right.children.push(left);
        right
    } else {
        left.children.push(right);
        left
    }
}

fn consolidate(children: Vec<Node>) -> Option<Node> {
    let mut paired = Vec::with_capacity(children.len().div_ceil(2));
    let mut iter = children.into_iter();
    while let Some(first) = iter.next() {
        match iter.next() {
            Some(second) => paired.push(meld(first, second)),
            None => paired.push(first),
        }
    }

    let mut merged = paired.pop()?;
    while let Some(node) = paired.pop() {
        merged = meld(node, merged);
    }
    Some(merged)
}
