//! The fork tree: the unconfirmed suffix of the chain, held as an arena of
//! nodes rather than owned parent/child references, since the tree is
//! mutated and re-rooted (on merge) far more often than it is traversed by
//! anything that would benefit from pointer identity.

use std::collections::HashMap;

use chain_shared::{Hash256, OutPoint};

use crate::block::Block;
use crate::utxo::Utxo;

pub struct ForkNode {
    parent: Option<usize>,
    block: Block,
    children: Vec<usize>,
    /// Cached subtree height. `0` for a leaf; for an internal node, one less
    /// than `tree_height` (see [`ForkTree::tree_height`]).
    height: u32,
    /// Every input consumed by a transaction in this block.
    utxos_used: Vec<Utxo>,
    /// Every output produced by a transaction in this block, stamped with
    /// its producing txid.
    utxos_added: Vec<Utxo>,
}

impl ForkNode {
    fn from_block(parent: Option<usize>, block: Block) -> Self {
        let mut utxos_used = Vec::new();
        let mut utxos_added = Vec::new();
        for tx in block.transactions() {
            utxos_used.extend(tx.inputs().iter().cloned());
            utxos_added.extend(tx.outputs().iter().cloned());
        }
        Self {
            parent,
            block,
            children: Vec::new(),
            height: 0,
            utxos_used,
            utxos_added,
        }
    }

    #[must_use]
    pub const fn block(&self) -> &Block {
        &self.block
    }

    #[must_use]
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[usize] {
        &self.children
    }
}

pub struct ForkTree {
    nodes: Vec<ForkNode>,
    root: usize,
    /// Owned only meaningfully by the root: maps every block hash in the
    /// subtree to its node id.
    hash_cache: HashMap<Hash256, usize>,
}

impl ForkTree {
    #[must_use]
    pub fn new(root_block: Block) -> Self {
        let hash = root_block.hash();
        let node = ForkNode::from_block(None, root_block);
        let mut hash_cache = HashMap::new();
        hash_cache.insert(hash, 0);
        Self {
            nodes: vec![node],
            root: 0,
            hash_cache,
        }
    }

    #[must_use]
    pub const fn root(&self) -> usize {
        self.root
    }

    #[must_use]
    pub fn node(&self, id: usize) -> &ForkNode {
        &self.nodes[id]
    }

    #[must_use]
    pub fn block_hash_exists(&self, hash: &Hash256) -> bool {
        self.hash_cache.contains_key(hash)
    }

    #[must_use]
    pub fn get_by_hash(&self, hash: &Hash256) -> Option<usize> {
        self.hash_cache.get(hash).copied()
    }

    /// Attaches `block` under `parent`. Does no validation — the caller is
    /// responsible for having validated the block already.
    pub fn append_block(&mut self, parent: usize, block: Block) -> usize {
        let was_leaf = self.nodes[parent].children.is_empty();
        let hash = block.hash();
        let node = ForkNode::from_block(Some(parent), block);
        let new_id = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].children.push(new_id);
        self.hash_cache.insert(hash, new_id);

        if was_leaf {
            let mut cur = Some(parent);
            while let Some(id) = cur {
                self.nodes[id].height += 1;
                cur = self.nodes[id].parent;
            }
        }

        new_id
    }

    /// The height of the subtree rooted at `id`: `1` for a leaf, otherwise
    /// one more than its cached `height`.
    #[must_use]
    pub fn tree_height(&self, id: usize) -> u32 {
        let node = &self.nodes[id];
        if node.children.is_empty() {
            1
        } else {
            node.height + 1
        }
    }

    /// Whether every child of `id` roots a subtree of equal height. A leaf
    /// is balanced (vacuously); a node with exactly one child never is.
    #[must_use]
    pub fn is_balanced(&self, id: usize) -> bool {
        let children = &self.nodes[id].children;
        match children.len() {
            0 => true,
            1 => false,
            _ => {
                let first = self.tree_height(children[0]);
                children[1..].iter().all(|&c| self.tree_height(c) == first)
            }
        }
    }

    /// The child rooting the tallest subtree, ties broken toward the last
    /// child found (matching the reference's `>=` scan).
    #[must_use]
    pub fn tallest_child(&self, id: usize) -> Option<usize> {
        let children = &self.nodes[id].children;
        let mut best: Option<usize> = None;
        let mut best_height = -1i64;
        for &child in children {
            let height = i64::from(self.tree_height(child));
            if height >= best_height {
                best = Some(child);
                best_height = height;
            }
        }
        best
    }

    /// The deepest leaf in the subtree rooted at `id`, descending via the
    /// child with the greatest cached `height` at each step.
    #[must_use]
    pub fn tallest_leaf(&self, id: usize) -> usize {
        let mut current = id;
        loop {
            let children = &self.nodes[current].children;
            if children.is_empty() {
                return current;
            }
            current = *children
                .iter()
                .max_by_key(|&&c| self.nodes[c].height)
                .expect("children is non-empty");
        }
    }

    /// Count of consecutive single-child levels starting at `id`.
    #[must_use]
    pub fn linear_count(&self, id: usize) -> u32 {
        let mut current = id;
        let mut count = 0;
        while self.nodes[current].children.len() == 1 {
            count += 1;
            current = self.nodes[current].children[0];
        }
        count
    }

    /// The list of blocks from the root down to `id`, inclusive.
    #[must_use]
    pub fn route_to_root(&self, id: usize) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut cur = Some(id);
        while let Some(node_id) = cur {
            let node = &self.nodes[node_id];
            blocks.push(node.block.clone());
            cur = node.parent;
        }
        blocks.reverse();
        blocks
    }

    /// Recomputes every node's cached `height` from the leaves up.
    /// Idempotent: calling it twice in a row leaves heights unchanged.
    pub fn regenerate_heights(&mut self) -> u32 {
        self.regenerate_heights_from(self.root)
    }

    fn regenerate_heights_from(&mut self, id: usize) -> u32 {
        let children: Vec<usize> = self.nodes[id].children.clone();
        if children.is_empty() {
            self.nodes[id].height = 0;
            return 0;
        }
        let max_child = children
            .iter()
            .map(|&c| self.regenerate_heights_from(c))
            .max()
            .unwrap_or(0);
        self.nodes[id].height = max_child + 1;
        self.nodes[id].height
    }

    /// Rebuilds the root's hash cache from scratch over the whole subtree.
    pub fn regenerate_cache(&mut self) {
        let mut cache = HashMap::new();
        self.collect_cache(self.root, &mut cache);
        self.hash_cache = cache;
    }

    fn collect_cache(&self, id: usize, cache: &mut HashMap<Hash256, usize>) {
        cache.insert(self.nodes[id].block.hash(), id);
        for &child in &self.nodes[id].children {
            self.collect_cache(child, cache);
        }
    }

    /// Walks from `id` up to the root, accumulating the net UTXO delta this
    /// branch represents: outputs consumed from outside the branch (by
    /// outpoint) and outputs still live at the tip (stamped UTXOs).
    ///
    /// An output produced and later consumed on the same branch cancels out
    /// of both lists — it never needs to be matched against anything
    /// outside the branch.
    #[must_use]
    pub fn fork_utxo_delta(&self, id: usize) -> (Vec<OutPoint>, Vec<Utxo>) {
        let mut consumed: Vec<OutPoint> = Vec::new();
        let mut produced: Vec<Utxo> = Vec::new();

        let mut cur = Some(id);
        while let Some(node_id) = cur {
            let node = &self.nodes[node_id];
            for used in &node.utxos_used {
                if let Some(outpoint) = used.outpoint() {
                    consumed.push(outpoint);
                }
            }
            for added in &node.utxos_added {
                if let Some(outpoint) = added.outpoint() {
                    if let Some(pos) = consumed.iter().position(|c| *c == outpoint) {
                        consumed.remove(pos);
                        continue;
                    }
                }
                produced.push(added.clone());
            }
            cur = node.parent;
        }

        (consumed, produced)
    }

    /// Replaces the root with the node at `new_root_id`, severing its old
    /// parent link and regenerating both caches. Returns the route of
    /// blocks from the old root to (but not including) the new root — these
    /// are the blocks to confirm.
    pub fn sever_to(&mut self, new_root_id: usize) -> Vec<Block> {
        let mut confirmed = Vec::new();
        let mut cur = self.nodes[new_root_id].parent;
        let mut chain = Vec::new();
        while let Some(id) = cur {
            chain.push(id);
            cur = self.nodes[id].parent;
        }
        chain.reverse();
        for id in chain {
            confirmed.push(self.nodes[id].block.clone());
        }

        self.nodes[new_root_id].parent = None;
        self.root = new_root_id;
        self.regenerate_heights();
        self.regenerate_cache();

        confirmed
    }
}
