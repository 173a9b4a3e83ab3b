//! Tile pyramid arena
//!
//! Every tile of a pyramid is a node in one flat vector indexed by its
//! [`TileId`]. Parent and child links are ids, so walking up to an ancestor
//! or down to the children never involves shared ownership.

use crate::lod::{LodTools, TileId, TileIndex};
use wall_core::Rect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidNode {
    pub id: TileId,
    pub index: TileIndex,
    /// Pixel rectangle in the node's LOD image
    pub rect: Rect,
    pub parent: Option<TileId>,
    /// Up to four tiles of the LOD below
    pub children: Vec<TileId>,
}

#[derive(Debug, Clone)]
pub struct PyramidTree {
    tools: LodTools,
    nodes: Vec<PyramidNode>,
}

impl PyramidTree {
    pub fn new(tools: LodTools) -> Self {
        let nodes = (0..tools.tile_count())
            .filter_map(|raw| {
                let id = TileId(raw);
                let index = tools.tile_index(id)?;
                let rect = tools.tile_rect(index.lod, index.x, index.y)?;

                let parent = if index.lod < tools.max_lod() {
                    tools.tile_id(TileIndex::new(index.lod + 1, index.x / 2, index.y / 2))
                } else {
                    None
                };

                let children = if index.lod > 0 {
                    let lod = index.lod - 1;
                    let (x, y) = (index.x * 2, index.y * 2);
                    [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)]
                        .into_iter()
                        .filter_map(|(cx, cy)| tools.tile_id(TileIndex::new(lod, cx, cy)))
                        .collect()
                } else {
                    Vec::new()
                };

                Some(PyramidNode {
                    id,
                    index,
                    rect,
                    parent,
                    children,
                })
            })
            .collect();

        Self { tools, nodes }
    }

    pub fn lod_tools(&self) -> &LodTools {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: TileId) -> Option<&PyramidNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn root(&self) -> Option<&PyramidNode> {
        self.node(TileId::ROOT)
    }

    pub fn parent(&self, id: TileId) -> Option<&PyramidNode> {
        self.node(id)?.parent.and_then(|parent| self.node(parent))
    }

    pub fn children(&self, id: TileId) -> impl Iterator<Item = &PyramidNode> {
        self.node(id)
            .into_iter()
            .flat_map(|node| node.children.iter())
            .filter_map(move |child| self.node(*child))
    }

    /// Ancestors of `id`, nearest first, ending at the root
    pub fn ancestors(&self, id: TileId) -> impl Iterator<Item = &PyramidNode> {
        std::iter::successors(self.parent(id), move |node| {
            node.parent.and_then(|parent| self.node(parent))
        })
    }

    /// Nodes of one LOD in id order
    pub fn level(&self, lod: u32) -> impl Iterator<Item = &PyramidNode> {
        self.nodes.iter().filter(move |node| node.index.lod == lod)
    }

    /// Every node, LOD 0 first, so children precede their parents
    pub fn bottom_up(&self) -> impl Iterator<Item = &PyramidNode> {
        self.nodes.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wall_core::Size;

    #[test]
    fn test_links_are_consistent() {
        let tree = PyramidTree::new(LodTools::new(Size::new(3000, 2000), 512));
        assert_eq!(tree.len() as u32, tree.lod_tools().tile_count());

        for node in tree.bottom_up() {
            for child in tree.children(node.id) {
                assert_eq!(child.parent, Some(node.id));
                assert_eq!(child.index.lod + 1, node.index.lod);
            }
            if let Some(parent) = tree.parent(node.id) {
                assert!(parent.children.contains(&node.id));
            }
        }
    }

    #[test]
    fn test_edge_tiles_have_fewer_children() {
        // LOD 1 is 3x2 tiles, LOD 0 is 6x4, LOD 2 is 2x1
        let tree = PyramidTree::new(LodTools::new(Size::new(3000, 2000), 512));
        let tools = *tree.lod_tools();
        let right = tools.tile_id(TileIndex::new(2, 1, 0)).unwrap();
        assert_eq!(tree.children(right).count(), 2);
        let root = tree.root().unwrap();
        assert_eq!(root.children.len(), 2);
    }

    #[test]
    fn test_ancestors_reach_root() {
        let tools = LodTools::new(Size::new(4096, 4096), 512);
        let tree = PyramidTree::new(tools);
        let leaf = tools.tile_id(TileIndex::new(0, 7, 7)).unwrap();

        let lods: Vec<u32> = tree.ancestors(leaf).map(|node| node.index.lod).collect();
        assert_eq!(lods, vec![1, 2, 3]);
        assert_eq!(tree.ancestors(leaf).last().map(|node| node.id), Some(TileId::ROOT));
        assert_eq!(tree.ancestors(TileId::ROOT).count(), 0);
    }

    #[test]
    fn test_bottom_up_starts_at_full_resolution() {
        let tree = PyramidTree::new(LodTools::new(Size::new(1024, 1024), 512));
        let lods: Vec<u32> = tree.bottom_up().map(|node| node.index.lod).collect();
        assert_eq!(lods, vec![0, 0, 0, 0, 1]);
        assert_eq!(tree.level(0).count(), 4);
    }
}
