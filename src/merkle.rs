// ============================================================================
// Merkle Ledger - Inclusion & Update Proofs
// ============================================================================
//
// Binary SHA-256 Merkle tree over an ordered list of leaf hashes.
//
// Pairing rule (shared by every function here, and by the contract):
//   - nodes pair left-to-right by index
//   - an odd node at the end of a level is hashed with itself
//   - a single leaf is its own root, an empty list has EMPTY_ROOT
//
// A proof is the list of nodes from the leaf up to the root. Each node
// carries the sibling hash and which side it sits on; `Duplicate` marks a
// level where the node was paired with itself, so replacing that leaf also
// replaces its pair.
//
// ============================================================================

use crate::codec::{sha256_pair, ByteReader, Hash256};
use crate::error::{MarketError, Result};

/// Root of an empty ledger
pub const EMPTY_ROOT: Hash256 = Hash256::ZERO;

/// Bytes per encoded proof node: sibling hash + side flag
pub const PATH_NODE_LEN: usize = Hash256::LEN + 1;

/// Deepest proof accepted from the wire
pub const MAX_PATH_DEPTH: usize = 64;

// ============================================================================
// PROOF TYPES
// ============================================================================

/// Position of the sibling relative to the node being proven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Side {
    /// Sibling is the left child, our node is on the right
    Left = 0,
    /// Sibling is the right child
    Right = 1,
    /// No sibling, node is paired with itself
    Duplicate = 2,
}

impl Side {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Side::Left),
            1 => Some(Side::Right),
            2 => Some(Side::Duplicate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathNode {
    pub sibling: Hash256,
    pub side: Side,
}

impl PathNode {
    /// Parent hash given the current node value
    fn combine(&self, node: &Hash256) -> Hash256 {
        match self.side {
            Side::Left => sha256_pair(&self.sibling, node),
            Side::Right => sha256_pair(node, &self.sibling),
            Side::Duplicate => sha256_pair(node, node),
        }
    }
}

/// Sibling path from one leaf to the root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleProof {
    pub nodes: Vec<PathNode>,
}

impl MerkleProof {
    /// Leaf index implied by the sides of the path, `None` if it does not
    /// fit in a `usize`
    pub fn index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.side == Side::Left)
            .try_fold(0usize, |index, (level, _)| {
                u32::try_from(level)
                    .ok()
                    .and_then(|shift| 1usize.checked_shl(shift))
                    .map(|bit| index | bit)
            })
    }

    /// True when the path belongs to the rightmost leaf of its tree
    pub fn is_last(&self) -> bool {
        self.nodes.iter().all(|node| node.side != Side::Right)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.nodes.len() * PATH_NODE_LEN);
        for node in &self.nodes {
            out.extend_from_slice(node.sibling.as_bytes());
            out.push(node.side as u8);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % PATH_NODE_LEN != 0 {
            return Err(MarketError::format(format!(
                "Merkle path length {} is not a multiple of {}",
                bytes.len(),
                PATH_NODE_LEN
            )));
        }
        let depth = bytes.len() / PATH_NODE_LEN;
        if depth > MAX_PATH_DEPTH {
            return Err(MarketError::format(format!(
                "Merkle path of {} nodes exceeds maximum depth {}",
                depth, MAX_PATH_DEPTH
            )));
        }
        let mut reader = ByteReader::new(bytes);
        let mut nodes = Vec::with_capacity(depth);
        while reader.remaining() > 0 {
            let sibling = reader.read_hash()?;
            let flag = reader.read_u8()?;
            let side = Side::from_u8(flag)
                .ok_or_else(|| MarketError::format(format!("Unknown merkle side flag {}", flag)))?;
            nodes.push(PathNode { sibling, side });
        }
        Ok(Self { nodes })
    }
}

// ============================================================================
// TREE
// ============================================================================

fn next_level(level: &[Hash256]) -> Vec<Hash256> {
    level
        .chunks(2)
        .map(|pair| {
            // Odd node pairs with itself
            let right = pair.get(1).unwrap_or(&pair[0]);
            sha256_pair(&pair[0], right)
        })
        .collect()
}

/// Full tree with every level kept, for repeated proofs over one leaf set
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    pub fn from_leaves(leaves: Vec<Hash256>) -> Self {
        let mut levels = vec![leaves];
        while levels.last().map_or(false, |level| level.len() > 1) {
            let next = next_level(&levels[levels.len() - 1]);
            levels.push(next);
        }
        Self { levels }
    }

    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    pub fn leaves(&self) -> &[Hash256] {
        &self.levels[0]
    }

    pub fn root(&self) -> Hash256 {
        match self.levels.last() {
            Some(top) if top.len() == 1 => top[0],
            _ => EMPTY_ROOT,
        }
    }

    pub fn path(&self, index: usize) -> Result<MerkleProof> {
        if index >= self.len() {
            return Err(MarketError::bounds(format!(
                "Leaf index {} out of range for {} leaves",
                index,
                self.len()
            )));
        }

        let mut nodes = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let node = if position % 2 == 1 {
                PathNode { sibling: level[position - 1], side: Side::Left }
            } else if position + 1 < level.len() {
                PathNode { sibling: level[position + 1], side: Side::Right }
            } else {
                PathNode { sibling: level[position], side: Side::Duplicate }
            };
            nodes.push(node);
            position /= 2;
        }
        Ok(MerkleProof { nodes })
    }
}

// ============================================================================
// FREE FUNCTIONS
// ============================================================================

/// Root over `leaves` in order
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return EMPTY_ROOT;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

/// Proof for the leaf at `index`
pub fn merkle_path(leaves: &[Hash256], index: usize) -> Result<MerkleProof> {
    MerkleTree::from_leaves(leaves.to_vec()).path(index)
}

/// Root implied by putting `leaf` at the proof's position
pub fn root_from_path(leaf: &Hash256, proof: &MerkleProof) -> Hash256 {
    proof.nodes.iter().fold(*leaf, |node, path_node| path_node.combine(&node))
}

/// Root along `proof`, refusing a sided node whose sibling is the node
/// itself. Odd nodes must be proven with `Side::Duplicate`; otherwise the
/// copy made for the last node of a level passes as a leaf of its own.
fn canonical_root(leaf: &Hash256, proof: &MerkleProof) -> Option<Hash256> {
    proof.nodes.iter().try_fold(*leaf, |node, path_node| {
        if path_node.side != Side::Duplicate && path_node.sibling == node {
            None
        } else {
            Some(path_node.combine(&node))
        }
    })
}

/// Check that `leaf` sits under `root` along `proof`
pub fn verify_path(root: &Hash256, leaf: &Hash256, proof: &MerkleProof) -> bool {
    canonical_root(leaf, proof) == Some(*root)
}

/// Root after appending `new_leaf`, knowing only the current last leaf and
/// its path. `None` means the tree was empty.
pub fn root_after_append(last: Option<(&Hash256, &MerkleProof)>, new_leaf: &Hash256) -> Result<Hash256> {
    let (last_leaf, last_path) = match last {
        Some(last) => last,
        None => return Ok(*new_leaf),
    };
    if !last_path.is_last() || canonical_root(last_leaf, last_path).is_none() {
        return Err(MarketError::consistency("Append path does not belong to the last leaf"));
    }

    // `left` is the ancestor of the old last leaf, `right` the ancestor of
    // the new leaf until the two meet under a common parent.
    let mut left = *last_leaf;
    let mut right = Some(*new_leaf);
    for node in &last_path.nodes {
        match (node.side, right) {
            (Side::Duplicate, Some(new_node)) => {
                left = sha256_pair(&left, &new_node);
                right = None;
            }
            (Side::Left, Some(new_node)) => {
                left = sha256_pair(&node.sibling, &left);
                right = Some(sha256_pair(&new_node, &new_node));
            }
            // is_last rules out right siblings
            (Side::Right, Some(_)) | (_, None) => left = node.combine(&left),
        }
    }

    Ok(match right {
        Some(new_node) => sha256_pair(&left, &new_node),
        None => left,
    })
}
