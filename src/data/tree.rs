//! # Phylogeny
//!
//! Rooted phylogenetic tree stored as an index-based arena. Nodes carry an
//! optional species name (leaves), an optional branch length (the root has
//! none), and a signed taxon-group id used to partition rate parameters.
//!
//! Newick parsing accepts branch lengths and bracketed group annotations,
//! e.g. `(chimp:6[1],human:6[1])`. Serialization round-trips topology, names
//! and branch lengths.

use crate::error::{RafeError, Result};

/// Depth comparisons tolerate this much accumulated rounding.
const DEPTH_EPSILON: f64 = 1e-6;

/// A single node of the tree arena.
#[derive(Debug, Clone)]
pub struct PhyloNode {
    /// Species name; present on leaves, optional on internal nodes
    pub name: Option<String>,
    /// Branch length to the parent; `None` on the root
    pub branch: Option<f64>,
    /// Taxon-group id partitioning rate parameters (-1 when untagged)
    pub taxon_group: i32,
    /// Parent index; `None` on the root
    pub parent: Option<usize>,
    /// Child indices, left to right
    pub children: Vec<usize>,
}

impl PhyloNode {
    fn new() -> Self {
        Self {
            name: None,
            branch: None,
            taxon_group: -1,
            parent: None,
            children: Vec::new(),
        }
    }

    /// True when the node has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Rooted phylogeny with cached traversal orders.
#[derive(Debug, Clone)]
pub struct Phylogeny {
    nodes: Vec<PhyloNode>,
    root: usize,
}

impl Phylogeny {
    /// Parse a Newick string, with optional `[group]` annotations.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = NewickParser {
            bytes: text.trim().as_bytes(),
            pos: 0,
            nodes: Vec::new(),
        };
        let root = parser.parse_clade(None)?;
        parser.skip_whitespace();
        if parser.peek() == Some(b';') {
            parser.pos += 1;
        }
        parser.skip_whitespace();
        if parser.pos != parser.bytes.len() {
            return Err(RafeError::parse(
                1,
                format!("trailing characters at offset {} in tree", parser.pos),
            ));
        }
        Ok(Self {
            nodes: parser.nodes,
            root,
        })
    }

    /// Number of nodes in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root node index
    pub fn root(&self) -> usize {
        self.root
    }

    /// Borrow a node
    pub fn node(&self, id: usize) -> &PhyloNode {
        &self.nodes[id]
    }

    /// Mutably borrow a node
    pub fn node_mut(&mut self, id: usize) -> &mut PhyloNode {
        &mut self.nodes[id]
    }

    /// True when `id` is a leaf
    pub fn is_leaf(&self, id: usize) -> bool {
        self.nodes[id].is_leaf()
    }

    /// Leaf indices in left-to-right order
    pub fn leaves(&self) -> Vec<usize> {
        self.postorder()
            .into_iter()
            .filter(|&id| self.is_leaf(id))
            .collect()
    }

    /// Postorder traversal: children left to right, then the node itself
    pub fn postorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        self.postorder_visit(self.root, &mut order);
        order
    }

    fn postorder_visit(&self, id: usize, order: &mut Vec<usize>) {
        for &child in &self.nodes[id].children {
            self.postorder_visit(child, order);
        }
        order.push(id);
    }

    /// Preorder traversal: the node itself, then children left to right
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Find a node by name
    pub fn find(&self, name: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.name.as_deref() == Some(name))
    }

    /// Sum of branch lengths from the root down to `id`
    pub fn distance_from_root(&self, id: usize) -> f64 {
        let mut total = 0.0;
        let mut cur = id;
        while let Some(parent) = self.nodes[cur].parent {
            total += self.nodes[cur].branch.unwrap_or(0.0);
            cur = parent;
        }
        total
    }

    /// Depth of the deepest leaf
    pub fn max_root_to_leaf_length(&self) -> f64 {
        self.leaves()
            .iter()
            .map(|&leaf| self.distance_from_root(leaf))
            .fold(0.0, f64::max)
    }

    /// True when every leaf sits at the same depth
    pub fn is_ultrametric(&self) -> bool {
        let depths: Vec<f64> = self
            .leaves()
            .iter()
            .map(|&leaf| self.distance_from_root(leaf))
            .collect();
        match depths.first() {
            None => true,
            Some(&first) => depths.iter().all(|&d| (d - first).abs() < DEPTH_EPSILON),
        }
    }

    /// Scale the branch length of every node whose taxon-group id is
    /// positive; untagged and non-positive branches are left unchanged.
    pub fn scale_tagged_branches(&mut self, multiplier: f64) {
        for node in &mut self.nodes {
            if node.taxon_group > 0 {
                if let Some(branch) = node.branch.as_mut() {
                    *branch *= multiplier;
                }
            }
        }
    }

    /// Replace all branch lengths in postorder; the slice must cover every
    /// node including the root (whose entry is ignored).
    pub fn set_branch_lengths(&mut self, lengths: &[f64]) -> Result<()> {
        let order = self.postorder();
        if lengths.len() != order.len() {
            return Err(RafeError::inconsistent(format!(
                "expected {} branch lengths including the unused root entry, got {}",
                order.len(),
                lengths.len()
            )));
        }
        for (&id, &len) in order.iter().zip(lengths) {
            if id != self.root {
                self.nodes[id].branch = Some(len);
            }
        }
        Ok(())
    }

    /// Serialize to Newick (no trailing semicolon)
    pub fn to_newick(&self) -> String {
        self.to_newick_with(|_| None)
    }

    /// Serialize to Newick with a per-node label suffix, used by reports to
    /// annotate nodes with family sizes (`chimp_3:6` style).
    pub fn to_newick_with(&self, suffix: impl Fn(usize) -> Option<String>) -> String {
        let mut out = String::new();
        self.write_clade(self.root, &suffix, &mut out);
        out
    }

    fn write_clade(&self, id: usize, suffix: &impl Fn(usize) -> Option<String>, out: &mut String) {
        let node = &self.nodes[id];
        if !node.is_leaf() {
            out.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_clade(child, suffix, out);
            }
            out.push(')');
        }
        if let Some(name) = &node.name {
            out.push_str(name);
        }
        if let Some(tag) = suffix(id) {
            out.push('_');
            out.push_str(&tag);
        }
        if let Some(branch) = node.branch {
            out.push(':');
            out.push_str(&format_branch(branch));
        }
        if node.taxon_group >= 0 {
            out.push('[');
            out.push_str(&node.taxon_group.to_string());
            out.push(']');
        }
    }

    /// Clone the subtree rooted at `id` into its own tree; the new root
    /// keeps its name and group but drops its branch length.
    pub fn extract_subtree(&self, id: usize) -> Phylogeny {
        let mut nodes = Vec::new();
        let root = self.copy_into(id, None, &mut nodes);
        nodes[root].branch = None;
        Phylogeny { nodes, root }
    }

    /// The tree that remains after removing the subtree below `id`.
    /// Degree-one chains left by the removal are contracted: a non-root
    /// survivor with a single child absorbs the child's branch length, and a
    /// root with a single child is replaced by that child.
    pub fn extract_remainder(&self, id: usize) -> Result<Phylogeny> {
        if id == self.root {
            return Err(RafeError::inconsistent(
                "cannot take the remainder of the root split",
            ));
        }
        let mut pruned = self.clone();
        let parent = pruned.nodes[id].parent.expect("non-root node has a parent");
        pruned.nodes[parent].children.retain(|&c| c != id);

        // contract the parent if it is now degree one
        let mut nodes = Vec::new();
        let mut root = pruned.copy_contracted(pruned.root, None, &mut nodes);
        while nodes[root].children.len() == 1 {
            let only = nodes[root].children[0];
            nodes[only].parent = None;
            nodes[only].branch = None;
            root = only;
        }
        // repack to drop nodes orphaned by root replacement
        let contracted = Phylogeny { nodes, root };
        Ok(contracted.extract_subtree(contracted.root))
    }

    fn copy_into(&self, id: usize, parent: Option<usize>, nodes: &mut Vec<PhyloNode>) -> usize {
        let mut copy = self.nodes[id].clone();
        copy.parent = parent;
        copy.children = Vec::new();
        let new_id = nodes.len();
        nodes.push(copy);
        for &child in &self.nodes[id].children {
            let new_child = self.copy_into(child, Some(new_id), nodes);
            nodes[new_id].children.push(new_child);
        }
        new_id
    }

    fn copy_contracted(
        &self,
        id: usize,
        parent: Option<usize>,
        nodes: &mut Vec<PhyloNode>,
    ) -> usize {
        let node = &self.nodes[id];
        if node.children.len() == 1 && parent.is_some() {
            // absorb this node into its single child
            let child = node.children[0];
            let new_id = self.copy_contracted(child, parent, nodes);
            let parent_branch = node.branch.unwrap_or(0.0);
            if let Some(branch) = nodes[new_id].branch.as_mut() {
                *branch += parent_branch;
            } else {
                nodes[new_id].branch = Some(parent_branch);
            }
            return new_id;
        }
        let mut copy = node.clone();
        copy.parent = parent;
        copy.children = Vec::new();
        let new_id = nodes.len();
        nodes.push(copy);
        for &child in &node.children {
            let new_child = self.copy_contracted(child, Some(new_id), nodes);
            nodes[new_id].children.push(new_child);
        }
        new_id
    }
}

/// Format a branch length the way it was read: integral values print
/// without a decimal point.
fn format_branch(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

struct NewickParser<'a> {
    bytes: &'a [u8],
    pos: usize,
    nodes: Vec<PhyloNode>,
}

impl<'a> NewickParser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse_clade(&mut self, parent: Option<usize>) -> Result<usize> {
        self.skip_whitespace();
        let id = self.nodes.len();
        let mut node = PhyloNode::new();
        node.parent = parent;
        self.nodes.push(node);

        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                let child = self.parse_clade(Some(id))?;
                self.nodes[id].children.push(child);
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => {
                        return Err(RafeError::parse(
                            1,
                            format!("expected ',' or ')' at offset {}", self.pos),
                        ))
                    }
                }
            }
        }

        self.skip_whitespace();
        if let Some(name) = self.parse_label() {
            self.nodes[id].name = Some(name);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            let branch = self.parse_number()?;
            if branch < 0.0 {
                return Err(RafeError::parse(
                    1,
                    format!("negative branch length {}", branch),
                ));
            }
            self.nodes[id].branch = Some(branch);
        }
        self.skip_whitespace();
        if self.peek() == Some(b'[') {
            self.pos += 1;
            let group = self.parse_number()?;
            if self.peek() != Some(b']') {
                return Err(RafeError::parse(
                    1,
                    format!("unterminated group annotation at offset {}", self.pos),
                ));
            }
            self.pos += 1;
            self.nodes[id].taxon_group = group as i32;
        }
        Ok(id)
    }

    fn parse_label(&mut self) -> Option<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'(' | b')' | b',' | b':' | b';' | b'[' | b']') || b.is_ascii_whitespace()
            {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            Some(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
        }
    }

    fn parse_number(&mut self) -> Result<f64> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| RafeError::parse(1, "invalid number encoding"))?;
        text.parse::<f64>()
            .map_err(|_| RafeError::parse(1, format!("invalid number '{}'", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE_TAXA: &str = "(((chimp:6,human:6):81,(mouse:17,rat:17):70):6,dog:9)";

    #[test]
    fn test_parse_five_taxa() {
        let tree = Phylogeny::parse(FIVE_TAXA).unwrap();
        assert_eq!(tree.len(), 9);
        assert_eq!(tree.leaves().len(), 5);

        let chimp = tree.find("chimp").unwrap();
        assert!(tree.is_leaf(chimp));
        assert_eq!(tree.node(chimp).branch, Some(6.0));
        assert!(tree.node(tree.root()).branch.is_none());
    }

    #[test]
    fn test_distance_from_root() {
        let tree = Phylogeny::parse(FIVE_TAXA).unwrap();
        assert_eq!(tree.distance_from_root(tree.root()), 0.0);
        for name in ["chimp", "human", "mouse", "rat"] {
            let id = tree.find(name).unwrap();
            assert!((tree.distance_from_root(id) - 93.0).abs() < 1e-9);
        }
        let dog = tree.find("dog").unwrap();
        assert!((tree.distance_from_root(dog) - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_root_to_leaf_length() {
        let tree =
            Phylogeny::parse("(((chimp:6,human:6):81,(mouse:19,rat:17):70):6,dog:93)").unwrap();
        assert!((tree.max_root_to_leaf_length() - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_is_ultrametric() {
        let even =
            Phylogeny::parse("(((chimp:6,human:6):81,(mouse:17,rat:17):70):6,dog:93)").unwrap();
        assert!(even.is_ultrametric());

        let uneven =
            Phylogeny::parse("(((chimp:6,human:6):81,(mouse:17,rat:17):70):6,dog:92)").unwrap();
        assert!(!uneven.is_ultrametric());
    }

    #[test]
    fn test_postorder_root_last() {
        let tree = Phylogeny::parse(FIVE_TAXA).unwrap();
        let order = tree.postorder();
        assert_eq!(order.len(), 9);
        assert_eq!(*order.last().unwrap(), tree.root());
        // children always precede their parent
        for (pos, &id) in order.iter().enumerate() {
            for &child in &tree.node(id).children {
                assert!(order[..pos].contains(&child));
            }
        }
    }

    #[test]
    fn test_newick_round_trip() {
        let tree = Phylogeny::parse(FIVE_TAXA).unwrap();
        assert_eq!(tree.to_newick(), FIVE_TAXA);
    }

    #[test]
    fn test_group_annotations_round_trip() {
        let text = "(chimp:6[1],human:6[1])";
        let tree = Phylogeny::parse(text).unwrap();
        let chimp = tree.find("chimp").unwrap();
        assert_eq!(tree.node(chimp).taxon_group, 1);
        assert_eq!(tree.to_newick(), text);
    }

    #[test]
    fn test_thousand_node_round_trip() {
        // complete binary expansion to just over 1000 nodes
        let mut text = String::from("L0");
        let mut count = 1;
        let mut next = 1;
        while count < 1000 {
            text = format!("(N{}:1,{}:2)", next, text);
            next += 1;
            count += 2;
        }
        let tree = Phylogeny::parse(&text).unwrap();
        assert!(tree.len() >= 1000);
        let printed = tree.to_newick();
        let reparsed = Phylogeny::parse(&printed).unwrap();
        assert_eq!(reparsed.len(), tree.len());
        assert_eq!(reparsed.to_newick(), printed);
    }

    #[test]
    fn test_scale_tagged_branches() {
        let mut tree = Phylogeny::parse("(a:459[1],b:6)").unwrap();
        tree.scale_tagged_branches(1.5);
        let a = tree.find("a").unwrap();
        let b = tree.find("b").unwrap();
        assert!((tree.node(a).branch.unwrap() - 688.5).abs() < 1e-9);
        assert!((tree.node(b).branch.unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_branch_lengths_wrong_count() {
        let mut tree = Phylogeny::parse(FIVE_TAXA).unwrap();
        assert!(tree.set_branch_lengths(&[1.0, 2.0]).is_err());

        let lengths: Vec<f64> = (0..9).map(|i| i as f64).collect();
        tree.set_branch_lengths(&lengths).unwrap();
        let order = tree.postorder();
        assert_eq!(tree.node(order[5]).branch, Some(5.0));
    }

    #[test]
    fn test_split_at_branch() {
        let tree = Phylogeny::parse(FIVE_TAXA).unwrap();
        let root_children = tree.node(tree.root()).children.clone();
        let big_clade = root_children[0];

        let below = tree.extract_subtree(big_clade);
        assert_eq!(
            below.to_newick(),
            "((chimp:6,human:6):81,(mouse:17,rat:17):70)"
        );

        let rest = tree.extract_remainder(big_clade).unwrap();
        assert_eq!(rest.to_newick(), "dog");
    }

    #[test]
    fn test_remainder_contracts_chains() {
        let tree = Phylogeny::parse("((a:1,b:2):3,(c:4,d:5):6)").unwrap();
        let a = tree.find("a").unwrap();
        let rest = tree.extract_remainder(a).unwrap();
        // b absorbs the contracted ab-ancestor branch
        assert_eq!(rest.to_newick(), "(b:5,(c:4,d:5):6)");
    }

    #[test]
    fn test_annotated_newick() {
        let tree = Phylogeny::parse("(chimp:6,human:6)").unwrap();
        let sizes = [3u32, 5, 8];
        let order = tree.postorder();
        let printed = tree.to_newick_with(|id| {
            let pos = order.iter().position(|&n| n == id).unwrap();
            Some(sizes[pos].to_string())
        });
        assert_eq!(printed, "(chimp_3:6,human_5:6)_8");
    }
}
