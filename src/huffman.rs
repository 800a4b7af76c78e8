//! Huffman tree over the filtered vocabulary, used to shape hierarchical softmax.
//!
//! Leaves are vocabulary ranks, internal nodes are numbered in creation order
//! (`0..V-1`, the root being `V-2`). Because the vocabulary already arrives sorted by
//! count descending, the tree is built in linear time with two queues: the leaves read
//! backwards (ascending count) and the internal nodes in the order they are created,
//! whose counts are non-decreasing by construction.

use crate::vocab::Vocabulary;

/// Code of a single leaf.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HuffmanNode {
    /// Branch taken at each ancestor, root first. Always 0 or 1.
    pub code: Vec<u8>,
    /// Internal node index of each ancestor, root first. Same length as `code`.
    pub point: Vec<usize>,
}

impl HuffmanNode {
    pub fn code_len(&self) -> usize {
        self.code.len()
    }
}

pub struct HuffmanCoding {
    counts: Vec<u64>,
}

impl HuffmanCoding {

    pub fn new(vocab: &Vocabulary) -> Self {
        Self { counts: vocab.counts() }
    }

    /// Builds the tree and returns one node per leaf, indexed by vocabulary rank.
    pub fn encode(&self) -> Vec<HuffmanNode> {

        let vocab_size = self.counts.len();
        if vocab_size == 0 {
            return Vec::new();
        }

        // node ids: leaves are 0..V, internal node k is V + k
        let mut count: Vec<u64> = Vec::with_capacity(vocab_size * 2 - 1);
        count.extend_from_slice(&self.counts);
        let mut parent: Vec<usize> = vec![0; vocab_size * 2 - 1];
        let mut binary: Vec<u8> = vec![0; vocab_size * 2 - 1];

        // `next_leaf` walks the ranks backwards, `next_internal` walks created nodes forward
        let mut next_leaf = vocab_size;
        let mut next_internal = vocab_size;

        let mut pop_min = |count: &[u64], created: usize| -> usize {
            let leaf_left = next_leaf > 0;
            let internal_left = next_internal < vocab_size + created;
            let take_leaf = leaf_left && (!internal_left || count[next_leaf - 1] <= count[next_internal]);
            if take_leaf {
                next_leaf -= 1;
                next_leaf
            } else {
                next_internal += 1;
                next_internal - 1
            }
        };

        for created in 0..vocab_size - 1 {
            let min1 = pop_min(&count, created);
            let min2 = pop_min(&count, created);

            let id = vocab_size + created;
            count.push(count[min1] + count[min2]);
            parent[min1] = id;
            parent[min2] = id;
            binary[min2] = 1;
        }

        // walk every leaf up to the root, then reverse so paths read root first
        let root = vocab_size * 2 - 2;
        (0..vocab_size).map(|leaf| {
            let mut code: Vec<u8> = Vec::new();
            let mut point: Vec<usize> = Vec::new();
            let mut b = leaf;
            while b != root {
                code.push(binary[b]);
                point.push(parent[b] - vocab_size);
                b = parent[b];
            }
            code.reverse();
            point.reverse();
            HuffmanNode { code, point }
        }).collect()
    }
}
