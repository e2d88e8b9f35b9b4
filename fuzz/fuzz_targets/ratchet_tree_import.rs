//! Fuzz target for ratchet tree import
//!
//! Decodes arbitrary bytes as a node list and imports it the way a joiner
//! imports a tree from a `GroupInfo`.
//!
//! # Invariants
//!
//! - Import never panics on structurally invalid trees
//! - An accepted tree exports exactly the imported nodes
//! - Resolution and filtered direct paths stay in bounds for every leaf

#![no_main]

use arbor_core::{LeafIndex, RatchetTree};
use arbor_proto::{Node, codec};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(nodes) = codec::decode::<Vec<Option<Node>>>(data) else {
        return;
    };
    let Ok(tree) = RatchetTree::from_wire(nodes.clone()) else {
        return;
    };
    assert_eq!(tree.to_wire(), nodes, "import must not rewrite nodes");

    let width = tree.width();
    for leaf in 0..tree.leaf_count() {
        let leaf = LeafIndex(leaf);
        for (parent, copath) in tree.filtered_direct_path(leaf) {
            assert!((parent as usize) < width);
            assert!((copath as usize) < width);
            for node in tree.resolution(copath) {
                assert!((node as usize) < width, "resolution escaped the tree");
            }
        }
    }
});
