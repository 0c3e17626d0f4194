//! Merkle Tree with Subtree Extraction
//!
//! A read-only binary SHA-256 tree that can be navigated by generalized index.
//! Large lists are stored as dense hash layers with virtual zero padding, so a
//! `List<Validator, 2^40>` costs memory proportional to the live validator
//! count rather than the list limit. Elements of dense layers are re-expanded
//! into their field subtrees only when a path descends into them.

use crate::gindex::GeneralizedIndex;
use crate::proof::ProofBundle;
use crate::types::Hash256;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Maximum supported tree depth
const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("no node at generalized index {gindex}: the path passes through a leaf")]
    MissingNode { gindex: GeneralizedIndex },

    #[error("{count} leaves do not fit in a tree of depth {depth}")]
    TooManyLeaves { count: usize, depth: u32 },
}

/// Precomputed zero hashes for each depth level.
/// `zero_hash(0)` is the zero chunk, `zero_hash(i) = hash(zero_hash(i-1), zero_hash(i-1))`.
#[must_use]
pub fn zero_hash(depth: u32) -> Hash256 {
    static ZERO_HASHES: OnceLock<[Hash256; MAX_DEPTH + 1]> = OnceLock::new();
    let hashes = ZERO_HASHES.get_or_init(|| {
        let mut hashes = [[0u8; 32]; MAX_DEPTH + 1];
        for i in 1..=MAX_DEPTH {
            hashes[i] = hash_pair(&hashes[i - 1], &hashes[i - 1]);
        }
        hashes
    });
    hashes[(depth as usize).min(MAX_DEPTH)]
}

/// SHA-256 hash of two 32-byte nodes
#[must_use]
pub fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Little-endian length chunk mixed into list roots
#[must_use]
pub fn length_chunk(length: u64) -> Hash256 {
    let mut chunk = [0u8; 32];
    chunk[..8].copy_from_slice(&length.to_le_bytes());
    chunk
}

/// Pack `u64` values four per 32-byte chunk, little-endian, zero-padding the
/// last chunk
#[must_use]
pub fn pack_u64s(values: &[u64]) -> Vec<Hash256> {
    values
        .chunks(4)
        .map(|group| {
            let mut chunk = [0u8; 32];
            for (slot, value) in chunk.chunks_exact_mut(8).zip(group) {
                slot.copy_from_slice(&value.to_le_bytes());
            }
            chunk
        })
        .collect()
}

/// Builds the subtree of a dense-layer element on demand
pub type ElementExpander = Arc<dyn Fn(u64) -> Option<Node> + Send + Sync>;

/// A node in the tree
#[derive(Clone)]
pub enum Node {
    /// A 32-byte chunk with no navigable children
    Leaf(Hash256),
    /// An all-zero subtree of the given depth
    Zero(u32),
    /// An internal node with both children held in memory
    Branch(Arc<Branch>),
    /// A position inside a dense layered subtree
    Dense(DenseNode),
}

#[derive(Debug)]
pub struct Branch {
    root: Hash256,
    left: Node,
    right: Node,
}

#[derive(Clone)]
pub struct DenseNode {
    layers: Arc<DenseLayers>,
    level: u32,
    position: u64,
}

struct DenseLayers {
    // layers[0] holds the leaves, layers[depth] the root
    layers: Vec<Vec<Hash256>>,
    expand: Option<ElementExpander>,
}

impl DenseLayers {
    fn hash_at(&self, level: u32, position: u64) -> Hash256 {
        usize::try_from(position)
            .ok()
            .and_then(|pos| self.layers[level as usize].get(pos))
            .copied()
            .unwrap_or_else(|| zero_hash(level))
    }

    fn leaf_count(&self) -> u64 {
        self.layers[0].len() as u64
    }
}

impl Node {
    /// Inner node over two children
    #[must_use]
    pub fn branch(left: Self, right: Self) -> Self {
        let root = hash_pair(&left.root(), &right.root());
        Self::Branch(Arc::new(Branch { root, left, right }))
    }

    /// Build a tree of `depth` over `leaves`, padding with zero subtrees
    pub fn from_leaves(leaves: Vec<Self>, depth: u32) -> Result<Self, TreeError> {
        if depth as usize > MAX_DEPTH || (depth < 64 && leaves.len() as u64 > 1_u64 << depth) {
            return Err(TreeError::TooManyLeaves {
                count: leaves.len(),
                depth,
            });
        }

        let mut layer = leaves;
        for level in 0..depth {
            if layer.is_empty() {
                return Ok(Self::Zero(depth));
            }
            let mut parents = Vec::with_capacity(layer.len().div_ceil(2));
            let mut nodes = layer.into_iter();
            while let Some(left) = nodes.next() {
                let right = nodes.next().unwrap_or(Self::Zero(level));
                parents.push(Self::branch(left, right));
            }
            layer = parents;
        }

        Ok(layer.into_iter().next().unwrap_or(Self::Zero(depth)))
    }

    /// Container over its field nodes: depth `ceil(log2(fields))`
    pub fn container(fields: Vec<Self>) -> Result<Self, TreeError> {
        let depth = fields.len().next_power_of_two().trailing_zeros();
        Self::from_leaves(fields, depth)
    }

    /// Dense layered tree of `depth` over leaf hashes.
    ///
    /// With an `expand` function, navigating below leaf `i` continues into
    /// `expand(i)`, whose root must equal `leaves[i]`.
    pub fn dense(
        leaves: Vec<Hash256>,
        depth: u32,
        expand: Option<ElementExpander>,
    ) -> Result<Self, TreeError> {
        if depth as usize > MAX_DEPTH || (depth < 64 && leaves.len() as u64 > 1_u64 << depth) {
            return Err(TreeError::TooManyLeaves {
                count: leaves.len(),
                depth,
            });
        }

        let mut layers = Vec::with_capacity(depth as usize + 1);
        layers.push(leaves);
        for level in 0..depth {
            let below = &layers[level as usize];
            let parents: Vec<Hash256> = below
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [left] => hash_pair(left, &zero_hash(level)),
                    _ => zero_hash(level + 1),
                })
                .collect();
            layers.push(parents);
        }

        Ok(Self::Dense(DenseNode {
            layers: Arc::new(DenseLayers { layers, expand }),
            level: depth,
            position: 0,
        }))
    }

    /// List root: `hash(data_root, length)`
    #[must_use]
    pub fn mix_in_length(data: Self, length: u64) -> Self {
        Self::branch(data, Self::Leaf(length_chunk(length)))
    }

    /// Hash of this node
    #[must_use]
    pub fn root(&self) -> Hash256 {
        match self {
            Self::Leaf(hash) => *hash,
            Self::Zero(depth) => zero_hash(*depth),
            Self::Branch(branch) => branch.root,
            Self::Dense(node) => node.layers.hash_at(node.level, node.position),
        }
    }

    /// Child on the given side; `None` below a leaf
    #[must_use]
    pub fn child(&self, right: bool) -> Option<Self> {
        match self {
            Self::Leaf(_) | Self::Zero(0) => None,
            Self::Zero(depth) => Some(Self::Zero(depth - 1)),
            Self::Branch(branch) => Some(if right {
                branch.right.clone()
            } else {
                branch.left.clone()
            }),
            Self::Dense(node) if node.level > 0 => Some(Self::Dense(DenseNode {
                layers: Arc::clone(&node.layers),
                level: node.level - 1,
                position: node.position * 2 + u64::from(right),
            })),
            Self::Dense(node) => {
                if node.position >= node.layers.leaf_count() {
                    return None;
                }
                let expand = node.layers.expand.as_ref()?;
                expand(node.position)?.child(right)
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(hash) => write!(f, "Leaf(0x{})", hex::encode(hash)),
            Self::Zero(depth) => write!(f, "Zero({depth})"),
            Self::Branch(branch) => write!(f, "Branch(0x{})", hex::encode(branch.root)),
            Self::Dense(node) => write!(
                f,
                "Dense(level={}, position={}, 0x{})",
                node.level,
                node.position,
                hex::encode(self.root())
            ),
        }
    }
}

/// A tree (or subtree) rooted at a node
#[derive(Debug, Clone)]
pub struct MerkleTree {
    root: Node,
}

impl MerkleTree {
    #[must_use]
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> Hash256 {
        self.root.root()
    }

    /// Node at `gindex`
    pub fn node(&self, gindex: GeneralizedIndex) -> Result<Node, TreeError> {
        let mut node = self.root.clone();
        for right in gindex.path_bits() {
            node = node.child(right).ok_or(TreeError::MissingNode { gindex })?;
        }
        Ok(node)
    }

    /// Re-root at `gindex`; indices into the result are relative to that node
    pub fn subtree(&self, gindex: GeneralizedIndex) -> Result<Self, TreeError> {
        self.node(gindex).map(Self::new)
    }

    /// Single-branch proof for the node at `gindex`.
    ///
    /// Siblings are collected walking down from the root and emitted
    /// leaf-first.
    pub fn prove(&self, gindex: GeneralizedIndex) -> Result<ProofBundle, TreeError> {
        let mut node = self.root.clone();
        let mut witnesses = Vec::with_capacity(gindex.depth() as usize);

        for right in gindex.path_bits() {
            let sibling = node
                .child(!right)
                .ok_or(TreeError::MissingNode { gindex })?;
            witnesses.push(sibling.root());
            node = node.child(right).ok_or(TreeError::MissingNode { gindex })?;
        }
        witnesses.reverse();

        Ok(ProofBundle::from_witnesses(
            &witnesses,
            gindex,
            self.root(),
            node.root(),
        ))
    }
}
