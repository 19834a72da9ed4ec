//! The game façade: an arena of linked nodes with a lazily expanded root.
//!
//! Parsing produces a [`CoarseGameTree`]; only the root's properties are
//! moved into the arena straight away. The rest of the tree is linked the
//! first time a structural operation needs it, so callers that only read the
//! root (or walk the main line with [`SgfGame::main_sequence_iter`]) never pay
//! for materialising every variation.

use crate::charset::{BuiltinCharsets, CharsetCodec, LEGACY_DEFAULT_CHARSET, UTF_8};
use crate::error::{Result, SgfError};
use crate::grammar::{
    game_tree_pieces, join_pieces, make_coarse_game_tree, make_tree, parse_sgf_game, CoarseGameTree,
    CoarseMainSequence, PropertyMap,
};
use crate::node::{Node, NodeId, NodeMut, NodeProperties};
use crate::properties::{Colour, Presenter, PropertyValue, MAX_BOARD_SIZE};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use time::{Date, OffsetDateTime};
use tracing::{debug, trace};

static NEXT_GAME_ID: AtomicU64 = AtomicU64::new(1);

const ROOT: usize = 0;

/// Options for building games from SGF data.
#[derive(Clone)]
pub struct ParseConfig {
    /// Charset to use instead of the one declared by the `CA` property.
    /// The root's `CA` is rewritten to match.
    pub override_encoding: Option<String>,
    pub charsets: Arc<dyn CharsetCodec>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            override_encoding: None,
            charsets: Arc::new(BuiltinCharsets),
        }
    }
}

impl fmt::Debug for ParseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseConfig")
            .field("override_encoding", &self.override_encoding)
            .finish()
    }
}

#[derive(Debug)]
struct TreeNode {
    properties: PropertyMap,
    parent: Option<usize>,
    children: Vec<usize>,
    generation: u32,
    deleted: bool,
}

impl TreeNode {
    fn new(properties: PropertyMap, parent: Option<usize>) -> Self {
        TreeNode {
            properties,
            parent,
            children: Vec::new(),
            generation: 0,
            deleted: false,
        }
    }

    fn is_live(&self, generation: u32) -> bool {
        !self.deleted && self.generation == generation
    }
}

/// Links a parsed tree into arena form. The root's entry gets no properties.
fn link_coarse_tree(coarse_tree: &CoarseGameTree) -> Vec<TreeNode> {
    let mut nodes = vec![TreeNode::new(PropertyMap::new(), None)];
    let built = make_tree(coarse_tree, ROOT, |parent, properties: &PropertyMap| {
        let index = nodes.len();
        nodes.push(TreeNode::new(properties.clone(), Some(parent)));
        nodes[parent].children.push(index);
        index
    });
    debug!(nodes = built, "expanded root");
    nodes
}

/// Everything below the root, still in parsed form.
#[derive(Debug)]
struct Unexpanded {
    /// The first entry of the top-level sequence is the root itself and is empty.
    coarse_tree: CoarseGameTree,
    /// Linked form, built once by the first structural read.
    linked: OnceLock<Vec<TreeNode>>,
}

impl Unexpanded {
    fn nodes(&self) -> &[TreeNode] {
        self.linked.get_or_init(|| link_coarse_tree(&self.coarse_tree))
    }

    fn into_nodes(self) -> Vec<TreeNode> {
        let Unexpanded {
            coarse_tree,
            linked,
        } = self;
        linked
            .into_inner()
            .unwrap_or_else(|| link_coarse_tree(&coarse_tree))
    }
}

/// One SGF game tree.
///
/// Reading never needs `&mut`: the first structural read links the parsed
/// tree once and caches it, so a game can be walked through `&SgfGame` or an
/// `Arc<SgfGame>` from several threads. Edits take `&mut self`.
#[derive(Debug)]
pub struct SgfGame {
    id: u64,
    presenter: Presenter,
    root: PropertyMap,
    // Holds the linked tree once `unexpanded` is gone. The root's entry
    // carries structure only; its properties live in `root`.
    nodes: Vec<TreeNode>,
    // Slots of deleted nodes, reused by `new_child`.
    free: Vec<usize>,
    unexpanded: Option<Unexpanded>,
}

impl SgfGame {
    /// Creates a game with a fresh root carrying `FF`, `GM`, `SZ` and `CA`.
    pub fn new(size: usize) -> Result<Self> {
        Self::with_encoding(size, UTF_8)
    }

    pub fn with_encoding(size: usize, encoding: &str) -> Result<Self> {
        Self::with_codec(size, encoding, Arc::new(BuiltinCharsets))
    }

    pub fn with_codec(size: usize, encoding: &str, charsets: Arc<dyn CharsetCodec>) -> Result<Self> {
        let mut game = Self::build(size, encoding, charsets, PropertyMap::new(), None)?;
        let encoding = game.presenter.encoding().as_bytes().to_vec();
        let root = &mut game.root;
        root.insert("FF".to_string(), vec![b"4".to_vec()]);
        root.insert("GM".to_string(), vec![b"1".to_vec()]);
        root.insert("SZ".to_string(), vec![size.to_string().into_bytes()]);
        root.insert("CA".to_string(), vec![encoding]);
        Ok(game)
    }

    fn build(
        size: usize,
        encoding: &str,
        charsets: Arc<dyn CharsetCodec>,
        root: PropertyMap,
        unexpanded: Option<Unexpanded>,
    ) -> Result<Self> {
        if !(1..=MAX_BOARD_SIZE).contains(&size) {
            return Err(SgfError::value(format!("size out of range: {}", size)));
        }
        Ok(SgfGame {
            id: NEXT_GAME_ID.fetch_add(1, Ordering::Relaxed),
            presenter: Presenter::with_codec(size, encoding, charsets)?,
            root,
            nodes: vec![TreeNode::new(PropertyMap::new(), None)],
            free: Vec::new(),
            unexpanded,
        })
    }

    /// Wraps a parsed game tree. Only the root's properties are examined here.
    pub fn from_coarse_game_tree(mut coarse_game: CoarseGameTree, config: &ParseConfig) -> Result<Self> {
        let Some(root_properties) = coarse_game.sequence.first_mut() else {
            return Err(SgfError::grammar("empty sequence"));
        };
        let root_properties = std::mem::take(root_properties);

        let size = match root_properties.get("SZ").and_then(|values| values.first()) {
            None => 19,
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .ok_or_else(|| {
                    SgfError::value(format!("bad SZ property: {}", String::from_utf8_lossy(raw)))
                })?,
        };
        if !(1..=MAX_BOARD_SIZE as i64).contains(&size) {
            return Err(SgfError::value(format!("size out of range: {}", size)));
        }

        let encoding = match &config.override_encoding {
            Some(encoding) => encoding.clone(),
            None => root_properties
                .get("CA")
                .and_then(|values| values.first())
                .map(|raw| String::from_utf8_lossy(raw).trim().to_string())
                .unwrap_or_else(|| LEGACY_DEFAULT_CHARSET.to_string()),
        };

        let mut game = Self::build(
            size as usize,
            &encoding,
            config.charsets.clone(),
            root_properties,
            Some(Unexpanded {
                coarse_tree: coarse_game,
                linked: OnceLock::new(),
            }),
        )?;
        if config.override_encoding.is_some() {
            let encoding = game.presenter.encoding().as_bytes().to_vec();
            game.root.insert("CA".to_string(), vec![encoding]);
        }
        trace!(size, encoding = game.presenter.encoding(), "built game from coarse tree");
        Ok(game)
    }

    /// Parses the first game tree in `data`.
    pub fn from_bytes(data: &[u8], config: &ParseConfig) -> Result<Self> {
        Self::from_coarse_game_tree(parse_sgf_game(data)?, config)
    }

    /// Serialises the game, wrapping lines at `wrap` columns (0 for no wrapping).
    ///
    /// The output is encoded in the charset named by the root's `CA` property.
    /// Each property is transcoded before the lines are filled, so `wrap`
    /// bounds the encoded line length.
    pub fn serialise(&self, wrap: usize) -> Result<Vec<u8>> {
        let charset = self.charset()?;
        let nodes = self.arena();
        let root = &self.root;
        let coarse_tree = make_coarse_game_tree(
            ROOT,
            move |index| &nodes[index].children[..],
            move |index| {
                if index == ROOT {
                    root
                } else {
                    &nodes[index].properties
                }
            },
        );
        let mut pieces = game_tree_pieces(&coarse_tree);
        let encoding = self.presenter.encoding();
        if charset != encoding {
            let charsets = self.presenter.charsets();
            for piece in &mut pieces {
                *piece = charsets.transcode(piece, encoding, &charset)?;
            }
        }
        let serialised = join_pieces(&pieces, wrap);
        debug!(bytes = serialised.len(), charset = %charset, "serialised game");
        Ok(serialised)
    }

    /// The linked tree, linking the parsed form on first use.
    fn arena(&self) -> &[TreeNode] {
        match &self.unexpanded {
            Some(unexpanded) => unexpanded.nodes(),
            None => &self.nodes,
        }
    }

    /// Takes ownership of the linked tree so it can be edited.
    fn expand(&mut self) {
        if let Some(unexpanded) = self.unexpanded.take() {
            self.nodes = unexpanded.into_nodes();
        }
    }

    fn check_game(&self, id: NodeId) -> Result<()> {
        if id.game == self.id {
            Ok(())
        } else {
            Err(SgfError::structural("node doesn't belong to this game"))
        }
    }

    fn id_for(&self, index: usize) -> NodeId {
        NodeId {
            game: self.id,
            index,
            generation: self.arena()[index].generation,
        }
    }

    fn properties_at(&self, index: usize) -> &PropertyMap {
        if index == ROOT {
            &self.root
        } else {
            &self.arena()[index].properties
        }
    }

    fn tree_node(&self, id: NodeId) -> Result<&TreeNode> {
        self.check_game(id)?;
        self.arena()
            .get(id.index)
            .filter(|node| node.is_live(id.generation))
            .ok_or_else(|| SgfError::structural("node has been deleted"))
    }

    /// Expands the tree, then resolves `id` for editing.
    fn tree_node_mut(&mut self, id: NodeId) -> Result<&mut TreeNode> {
        self.check_game(id)?;
        self.expand();
        live_node_mut(&mut self.nodes, id)
    }

    pub fn root(&self) -> NodeId {
        NodeId {
            game: self.id,
            index: ROOT,
            generation: 0,
        }
    }

    pub fn node(&self, id: NodeId) -> Result<Node<'_>> {
        let properties = if id.index == ROOT {
            self.check_game(id)?;
            &self.root
        } else {
            &self.tree_node(id)?.properties
        };
        Ok(Node::new(properties, &self.presenter))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<NodeMut<'_>> {
        self.check_game(id)?;
        let properties = if id.index == ROOT {
            &mut self.root
        } else {
            self.expand();
            &mut live_node_mut(&mut self.nodes, id)?.properties
        };
        Ok(NodeMut::new(properties, &self.presenter))
    }

    pub fn root_node(&self) -> Node<'_> {
        Node::new(&self.root, &self.presenter)
    }

    pub fn root_node_mut(&mut self) -> NodeMut<'_> {
        NodeMut::new(&mut self.root, &self.presenter)
    }

    pub fn child_count(&self, id: NodeId) -> Result<usize> {
        Ok(self.tree_node(id)?.children.len())
    }

    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let children = &self.tree_node(id)?.children;
        Ok(children.iter().map(|&index| self.id_for(index)).collect())
    }

    /// The child at `index`; fails if there is no such child.
    pub fn child(&self, id: NodeId, index: usize) -> Result<NodeId> {
        let child = self
            .tree_node(id)?
            .children
            .get(index)
            .copied()
            .ok_or_else(|| SgfError::structural(format!("no child at index {}", index)))?;
        Ok(self.id_for(child))
    }

    /// Position of `child` among `parent`'s children.
    pub fn index_of(&self, parent: NodeId, child: NodeId) -> Result<usize> {
        self.tree_node(child)?;
        self.tree_node(parent)?
            .children
            .iter()
            .position(|&index| index == child.index)
            .ok_or_else(|| SgfError::structural("not a child of this node"))
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.tree_node(id)?.parent.map(|index| self.id_for(index)))
    }

    /// Creates an empty child of `parent`, appended or inserted at `index`.
    pub fn new_child(&mut self, parent: NodeId, index: Option<usize>) -> Result<NodeId> {
        self.tree_node_mut(parent)?;
        let node = TreeNode::new(PropertyMap::new(), Some(parent.index));
        let child = match self.free.pop() {
            Some(slot) => {
                let generation = self.nodes[slot].generation;
                self.nodes[slot] = TreeNode { generation, ..node };
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        let siblings = &mut self.nodes[parent.index].children;
        let position = index.map_or(siblings.len(), |i| i.min(siblings.len()));
        siblings.insert(position, child);
        Ok(NodeId {
            game: self.id,
            index: child,
            generation: self.nodes[child].generation,
        })
    }

    /// Removes a node and its whole subtree. The root can't be deleted.
    ///
    /// Ids of removed nodes stay invalid even after their slots are reused.
    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        let Some(parent) = self.tree_node_mut(id)?.parent else {
            return Err(SgfError::structural("can't remove the root node"));
        };
        self.nodes[parent].children.retain(|&child| child != id.index);
        let mut to_free = vec![id.index];
        while let Some(index) = to_free.pop() {
            let node = &mut self.nodes[index];
            node.deleted = true;
            node.generation = node.generation.wrapping_add(1);
            node.properties = PropertyMap::new();
            node.parent = None;
            to_free.append(&mut node.children);
            self.free.push(index);
        }
        Ok(())
    }

    /// Moves `id` (with its subtree) under `new_parent`, appended or inserted at `index`.
    ///
    /// Fails if `new_parent` belongs to another game or lies inside the moved subtree.
    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId, index: Option<usize>) -> Result<()> {
        if new_parent.game != self.id {
            return Err(SgfError::structural("new parent doesn't belong to the same game"));
        }
        self.tree_node_mut(id)?;
        self.tree_node_mut(new_parent)?;
        let mut ancestor = Some(new_parent.index);
        while let Some(current) = ancestor {
            if current == id.index {
                return Err(SgfError::structural("would create a loop"));
            }
            ancestor = self.nodes[current].parent;
        }
        // The root is an ancestor of every node, so it never gets this far.
        let Some(old_parent) = self.nodes[id.index].parent else {
            return Err(SgfError::structural("would create a loop"));
        };
        self.nodes[old_parent].children.retain(|&child| child != id.index);
        let siblings = &mut self.nodes[new_parent.index].children;
        let position = index.map_or(siblings.len(), |i| i.min(siblings.len()));
        siblings.insert(position, id.index);
        self.nodes[id.index].parent = Some(new_parent.index);
        Ok(())
    }

    /// Nearest node carrying `identifier`, starting from `id` itself and
    /// walking up towards the root.
    pub fn find(&self, id: NodeId, identifier: &str) -> Result<Option<NodeId>> {
        let mut current = Some(self.tree_node(id)?);
        let mut index = id.index;
        while let Some(node) = current {
            if self.properties_at(index).contains_key(identifier) {
                return Ok(Some(self.id_for(index)));
            }
            current = match node.parent {
                Some(parent) => {
                    index = parent;
                    Some(&self.arena()[parent])
                }
                None => None,
            };
        }
        Ok(None)
    }

    /// Interpreted value of `identifier` on the nearest node that has it.
    pub fn find_property(&self, id: NodeId, identifier: &str) -> Result<PropertyValue> {
        match self.find(id, identifier)? {
            Some(found) => self.node(found)?.get(identifier),
            None => Err(SgfError::missing(identifier)),
        }
    }

    fn first_child(&self, index: usize) -> Option<usize> {
        self.arena()[index].children.first().copied()
    }

    /// Nodes of the main line, from the root to the last node.
    pub fn main_sequence(&self) -> Vec<NodeId> {
        let mut result = vec![self.root()];
        let mut current = ROOT;
        while let Some(child) = self.first_child(current) {
            result.push(self.id_for(child));
            current = child;
        }
        result
    }

    /// Iterates over the main line without linking the parsed tree.
    pub fn main_sequence_iter(&self) -> MainSequenceIter<'_> {
        let rest = match &self.unexpanded {
            Some(unexpanded) => {
                let mut rest = unexpanded.coarse_tree.main_sequence_iter();
                rest.next();
                MainSequenceState::Coarse(rest)
            }
            None => MainSequenceState::Linked {
                nodes: &self.nodes,
                next: self.nodes[ROOT].children.first().copied(),
            },
        };
        MainSequenceIter {
            presenter: &self.presenter,
            root: Some(&self.root),
            rest,
        }
    }

    /// Last node of the main line.
    pub fn last_node(&self) -> NodeId {
        let mut current = ROOT;
        while let Some(child) = self.first_child(current) {
            current = child;
        }
        self.id_for(current)
    }

    /// Main-line continuation below `id`, not including `id`.
    pub fn main_sequence_below(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.tree_node(id)?;
        let mut result = Vec::new();
        let mut current = id.index;
        while let Some(child) = self.first_child(current) {
            result.push(self.id_for(child));
            current = child;
        }
        Ok(result)
    }

    /// Ancestors of `id`, root first, not including `id`.
    pub fn sequence_above(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut result = Vec::new();
        let mut current = self.tree_node(id)?.parent;
        while let Some(index) = current {
            result.push(self.id_for(index));
            current = self.arena()[index].parent;
        }
        result.reverse();
        Ok(result)
    }

    /// Appends an empty node after the last node of the main line.
    pub fn extend_main_sequence(&mut self) -> Result<NodeId> {
        let last = self.last_node();
        self.new_child(last, None)
    }

    pub fn size(&self) -> usize {
        self.presenter.size()
    }

    /// The presenter interpreting this game's property values.
    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    /// Mutable presenter, for registering custom property types.
    pub fn presenter_mut(&mut self) -> &mut Presenter {
        &mut self.presenter
    }

    /// Canonical name of the charset declared by the root's `CA` property.
    pub fn charset(&self) -> Result<String> {
        let declared = match self.root_node().get("CA") {
            Ok(PropertyValue::Text(declared)) => declared,
            Ok(other) => return Err(SgfError::value(format!("bad CA property: {:?}", other))),
            Err(e) if e.is_missing_property() => return Ok(LEGACY_DEFAULT_CHARSET.to_string()),
            Err(e) => return Err(e),
        };
        self.presenter
            .charsets()
            .normalise(&declared)
            .map_err(|_| SgfError::encoding(format!("no codec available for CA {}", declared)))
    }

    /// Komi from the root's `KM` property, 0.0 when absent.
    pub fn komi(&self) -> Result<f64> {
        match self.root_node().get("KM") {
            Ok(value) => value
                .as_real()
                .ok_or_else(|| SgfError::value(format!("bad KM property: {:?}", value))),
            Err(e) if e.is_missing_property() => Ok(0.0),
            Err(e) => Err(e),
        }
    }

    /// Handicap stones from `HA`. Zero means no handicap; a handicap of one is invalid.
    pub fn handicap(&self) -> Result<Option<i64>> {
        let handicap = match self.root_node().get("HA") {
            Ok(value) => value
                .as_number()
                .ok_or_else(|| SgfError::value(format!("bad HA property: {:?}", value)))?,
            Err(e) if e.is_missing_property() => return Ok(None),
            Err(e) => return Err(e),
        };
        match handicap {
            0 => Ok(None),
            1 => Err(SgfError::value("handicap of 1 is not permitted")),
            n => Ok(Some(n)),
        }
    }

    /// Name from `PB` or `PW`.
    pub fn player_name(&self, colour: Colour) -> Result<Option<String>> {
        let identifier = match colour {
            Colour::Black => "PB",
            Colour::White => "PW",
        };
        match self.root_node().get(identifier) {
            Ok(PropertyValue::Text(name)) => Ok(Some(name)),
            Ok(_) => Ok(None),
            Err(e) if e.is_missing_property() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Winner according to the first letter of `RE`.
    pub fn winner(&self) -> Result<Option<Colour>> {
        match self.root_node().get("RE") {
            Ok(PropertyValue::Text(result)) => Ok(result
                .chars()
                .next()
                .and_then(Colour::from_letter)),
            Ok(_) => Ok(None),
            Err(e) if e.is_missing_property() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Writes `DT` as `YYYY-MM-DD`, using today's date (UTC) when `date` is `None`.
    pub fn set_date(&mut self, date: Option<Date>) -> Result<()> {
        let date = date.unwrap_or_else(|| OffsetDateTime::now_utc().date());
        if !(0..=9999).contains(&date.year()) {
            return Err(SgfError::value(format!("year out of range: {}", date.year())));
        }
        self.root_node_mut().set(
            "DT",
            format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day()),
        )
    }
}

fn live_node_mut(nodes: &mut [TreeNode], id: NodeId) -> Result<&mut TreeNode> {
    nodes
        .get_mut(id.index)
        .filter(|node| node.is_live(id.generation))
        .ok_or_else(|| SgfError::structural("node has been deleted"))
}

enum MainSequenceState<'a> {
    Coarse(CoarseMainSequence<'a, PropertyMap>),
    Linked {
        nodes: &'a [TreeNode],
        next: Option<usize>,
    },
}

/// Iterator over the main line, yielding each node's properties.
pub struct MainSequenceIter<'a> {
    presenter: &'a Presenter,
    root: Option<&'a PropertyMap>,
    rest: MainSequenceState<'a>,
}

impl<'a> Iterator for MainSequenceIter<'a> {
    type Item = Node<'a>;

    fn next(&mut self) -> Option<Node<'a>> {
        let presenter = self.presenter;
        if let Some(root) = self.root.take() {
            return Some(Node::new(root, presenter));
        }
        match &mut self.rest {
            MainSequenceState::Coarse(rest) => rest.next().map(|properties| Node::new(properties, presenter)),
            MainSequenceState::Linked { nodes, next } => {
                let nodes: &'a [TreeNode] = *nodes;
                let node = &nodes[next.take()?];
                *next = node.children.first().copied();
                Some(Node::new(&node.properties, presenter))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::DEFAULT_WRAP;
    use crate::node::NodeProperties;
    use time::Month;

    const SAMPLE: &[u8] = b"(;FF[4]GM[1]SZ[9]CA[UTF-8]KM[6.5]HA[0]PB[Black]RE[W+R]\
        ;B[ee];W[ce](;B[dd];W[cc])(;B[gg]))";

    fn parse(data: &[u8]) -> SgfGame {
        SgfGame::from_bytes(data, &ParseConfig::default()).unwrap()
    }

    fn moves(game: &SgfGame) -> Vec<Option<(Colour, Option<(usize, usize)>)>> {
        game.main_sequence_iter()
            .map(|node| node.get_move().unwrap())
            .collect()
    }

    #[test]
    fn test_new_game() {
        let game = SgfGame::new(9).unwrap();
        let root = game.root_node();
        assert_eq!(root.properties(), vec!["CA", "FF", "GM", "SZ"]);
        assert_eq!(root.get_raw("SZ").unwrap(), b"9");
        assert_eq!(root.get_raw("CA").unwrap(), b"UTF-8");
        assert!(matches!(SgfGame::new(0), Err(SgfError::Value(_))));
        assert!(matches!(SgfGame::new(27), Err(SgfError::Value(_))));
    }

    #[test]
    fn test_parse_accessors() {
        let game = parse(SAMPLE);
        assert_eq!(game.size(), 9);
        assert_eq!(game.komi().unwrap(), 6.5);
        assert_eq!(game.handicap().unwrap(), None);
        assert_eq!(game.player_name(Colour::Black).unwrap().as_deref(), Some("Black"));
        assert_eq!(game.player_name(Colour::White).unwrap(), None);
        assert_eq!(game.winner().unwrap(), Some(Colour::White));
        assert_eq!(game.charset().unwrap(), "UTF-8");
    }

    #[test]
    fn test_bad_size() {
        let config = ParseConfig::default();
        assert!(matches!(SgfGame::from_bytes(b"(;SZ[0])", &config), Err(SgfError::Value(_))));
        assert!(matches!(SgfGame::from_bytes(b"(;SZ[x])", &config), Err(SgfError::Value(_))));
        assert!(matches!(SgfGame::from_bytes(b"(;)", &config), Err(SgfError::Grammar(_))));
    }

    #[test]
    fn test_handicap() {
        assert_eq!(parse(b"(;HA[3])").handicap().unwrap(), Some(3));
        assert_eq!(parse(b"(;HA[0])").handicap().unwrap(), None);
        assert!(matches!(parse(b"(;HA[1])").handicap(), Err(SgfError::Value(_))));
        assert_eq!(parse(b"(;FF[4])").handicap().unwrap(), None);
        assert_eq!(parse(b"(;FF[4])").komi().unwrap(), 0.0);
    }

    #[test]
    fn test_winner() {
        assert_eq!(parse(b"(;RE[b+3.5])").winner().unwrap(), Some(Colour::Black));
        assert_eq!(parse(b"(;RE[Draw])").winner().unwrap(), None);
        assert_eq!(parse(b"(;RE[])").winner().unwrap(), None);
        assert_eq!(parse(b"(;FF[4])").winner().unwrap(), None);
    }

    fn is_linked(game: &SgfGame) -> bool {
        match &game.unexpanded {
            Some(unexpanded) => unexpanded.linked.get().is_some(),
            None => true,
        }
    }

    #[test]
    fn test_main_sequence_iter_is_lazy() {
        let game = parse(SAMPLE);
        assert!(!is_linked(&game));
        assert_eq!(
            moves(&game),
            vec![
                None,
                Some((Colour::Black, Some((4, 4)))),
                Some((Colour::White, Some((4, 2)))),
                Some((Colour::Black, Some((5, 3)))),
                Some((Colour::White, Some((6, 2)))),
            ]
        );
        assert!(!is_linked(&game));
        assert_eq!(game.root_node().get_raw("PB").unwrap(), b"Black");
        assert!(!is_linked(&game));
    }

    #[test]
    fn test_expansion_matches_lazy_iteration() {
        let game = parse(SAMPLE);
        let lazy = moves(&game);
        let main = game.main_sequence();
        assert_eq!(main.len(), 5);
        assert!(is_linked(&game));
        assert!(game.unexpanded.is_some());
        assert_eq!(moves(&game), lazy);
        assert_eq!(game.arena().len(), 6);
        let fork = main[2];
        assert_eq!(game.child_count(fork).unwrap(), 2);
        let variation = game.child(fork, 1).unwrap();
        assert_eq!(
            game.node(variation).unwrap().get_move().unwrap(),
            Some((Colour::Black, Some((2, 6))))
        );
        assert_eq!(game.index_of(fork, variation).unwrap(), 1);
        assert_eq!(game.parent(variation).unwrap(), Some(fork));
        assert_eq!(game.parent(game.root()).unwrap(), None);
        assert!(game.child(fork, 2).is_err());
    }

    #[test]
    fn test_child_count_links_parsed_tree() {
        let game = parse(b"(;FF[4](;B[aa];W[bb])(;B[cc])(;B[dd]))");
        let root = game.root();
        assert_eq!(game.child_count(root).unwrap(), 3);
        assert!(is_linked(&game));
        let first = game.child(root, 0).unwrap();
        assert_eq!(game.child_count(first).unwrap(), 1);
        assert_eq!(game.node(first).unwrap().get_raw("B").unwrap(), b"aa");
    }

    #[test]
    fn test_new_child_on_parsed_tree_keeps_variations() {
        let mut game = parse(b"(;FF[4](;B[aa];W[bb])(;B[cc]))");
        let root = game.root();
        let added = game.new_child(root, None).unwrap();
        assert!(game.unexpanded.is_none());

        let children = game.children(root).unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(children[2], added);
        assert_eq!(game.node(children[0]).unwrap().get_raw("B").unwrap(), b"aa");
        assert_eq!(game.node(children[1]).unwrap().get_raw("B").unwrap(), b"cc");
        assert!(game.node(added).unwrap().properties().is_empty());
        assert_eq!(game.main_sequence().len(), 3);
        assert_eq!(
            game.serialise(0).unwrap(),
            b"(;FF[4](;B[aa];W[bb])(;B[cc])(;))\n".to_vec()
        );
    }

    #[test]
    fn test_shared_reads_across_threads() {
        let game = Arc::new(parse(SAMPLE));
        let main_lines: Vec<Vec<NodeId>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let game = Arc::clone(&game);
                    scope.spawn(move || {
                        let fork = game.child(game.child(game.root(), 0).unwrap(), 0).unwrap();
                        assert_eq!(game.child_count(fork).unwrap(), 2);
                        game.main_sequence()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });
        assert!(main_lines.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(main_lines[0].len(), 5);
        let serialised = game.serialise(0).unwrap();
        assert_eq!(parse(&serialised).serialise(0).unwrap(), serialised);
    }

    #[test]
    fn test_new_child_and_delete() {
        let mut game = SgfGame::new(19).unwrap();
        let root = game.root();
        let a = game.new_child(root, None).unwrap();
        let b = game.new_child(root, None).unwrap();
        let c = game.new_child(root, Some(0)).unwrap();
        let d = game.new_child(root, Some(99)).unwrap();
        assert_eq!(game.children(root).unwrap(), vec![c, a, b, d]);

        let grandchild = game.new_child(a, None).unwrap();
        game.delete(a).unwrap();
        assert_eq!(game.children(root).unwrap(), vec![c, b, d]);
        assert!(matches!(game.node(grandchild), Err(SgfError::Structural(_))));
        assert!(matches!(game.node_mut(a), Err(SgfError::Structural(_))));
        assert!(matches!(game.delete(root), Err(SgfError::Structural(_))));
    }

    #[test]
    fn test_deleted_slots_are_reused() {
        let mut game = SgfGame::new(19).unwrap();
        let root = game.root();
        let keep = game.new_child(root, None).unwrap();
        let mut stale = Vec::new();
        for _ in 0..1000 {
            let node = game.new_child(root, None).unwrap();
            game.new_child(node, None).unwrap();
            game.delete(node).unwrap();
            stale.push(node);
        }
        assert_eq!(game.nodes.len(), 4);
        assert_eq!(game.children(root).unwrap(), vec![keep]);

        let reused = game.new_child(root, None).unwrap();
        assert!(stale.iter().any(|old| old.index == reused.index));
        for old in &stale {
            assert!(matches!(game.node(*old), Err(SgfError::Structural(_))));
            assert!(matches!(game.new_child(*old, None), Err(SgfError::Structural(_))));
        }
        game.node_mut(reused).unwrap().set_raw("C", "fresh").unwrap();
        assert_eq!(game.node(reused).unwrap().get_raw("C").unwrap(), b"fresh");
        assert_eq!(game.parent(reused).unwrap(), Some(root));
    }

    #[test]
    fn test_reparent() {
        let mut game = SgfGame::new(19).unwrap();
        let root = game.root();
        let a = game.new_child(root, None).unwrap();
        let b = game.new_child(a, None).unwrap();
        let c = game.new_child(b, None).unwrap();

        assert!(matches!(game.reparent(a, c, None), Err(SgfError::Structural(_))));
        assert!(matches!(game.reparent(a, a, None), Err(SgfError::Structural(_))));
        assert!(matches!(game.reparent(root, a, None), Err(SgfError::Structural(_))));

        game.reparent(c, root, Some(0)).unwrap();
        assert_eq!(game.children(root).unwrap(), vec![c, a]);
        assert!(game.children(b).unwrap().is_empty());
        assert_eq!(game.parent(c).unwrap(), Some(root));

        let mut other = SgfGame::new(19).unwrap();
        let other_root = other.root();
        assert!(matches!(game.reparent(a, other_root, None), Err(SgfError::Structural(_))));
        assert!(matches!(other.children(a), Err(SgfError::Structural(_))));
    }

    #[test]
    fn test_find() {
        let game = parse(b"(;FF[4]KM[5.5];B[aa]C[x];W[bb])");
        let main = game.main_sequence();
        assert_eq!(game.find(main[2], "C").unwrap(), Some(main[1]));
        assert_eq!(game.find(main[1], "C").unwrap(), Some(main[1]));
        assert_eq!(game.find(main[2], "GN").unwrap(), None);
        assert_eq!(game.find_property(main[2], "KM").unwrap(), PropertyValue::Real(5.5));
        assert!(game.find_property(main[2], "GN").unwrap_err().is_missing_property());
    }

    #[test]
    fn test_sequences() {
        let mut game = parse(SAMPLE);
        let main = game.main_sequence();
        assert_eq!(game.last_node(), main[4]);
        assert_eq!(game.main_sequence_below(main[2]).unwrap(), main[3..].to_vec());
        assert_eq!(game.sequence_above(main[2]).unwrap(), main[..2].to_vec());
        assert!(game.sequence_above(game.root()).unwrap().is_empty());
        let extended = game.extend_main_sequence().unwrap();
        assert_eq!(game.last_node(), extended);

        let other = SgfGame::new(9).unwrap();
        assert!(matches!(other.sequence_above(main[1]), Err(SgfError::Structural(_))));
    }

    #[test]
    fn test_serialise_round_trip() {
        let game = parse(b"(;FF[4]GM[1]SZ[9];B[ee];W[ce])");
        assert_eq!(
            game.serialise(0).unwrap(),
            b"(;FF[4]GM[1]SZ[9];B[ee];W[ce])\n".to_vec()
        );
        let game = parse(SAMPLE);
        let first = game.serialise(0).unwrap();
        let second = parse(&first).serialise(0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_serialise_charset() {
        let mut game = SgfGame::with_encoding(19, "UTF-8").unwrap();
        let root = game.root();
        game.node_mut(root).unwrap().set("PB", "José").unwrap();
        game.node_mut(root).unwrap().set_raw("CA", "latin-1").unwrap();
        let serialised = game.serialise(0).unwrap();
        assert!(serialised.windows(5).any(|w| w == b"Jos\xe9]"));

        game.node_mut(root).unwrap().set_raw("CA", "klingon").unwrap();
        assert!(matches!(game.serialise(0), Err(SgfError::Encoding(_))));
    }

    #[test]
    fn test_wrap_applies_to_transcoded_output() {
        let mut game = SgfGame::with_encoding(19, "ISO-8859-1").unwrap();
        // 34 bytes as Latin-1, 64 as UTF-8.
        let comment = "é".repeat(30);
        {
            let mut root = game.root_node_mut();
            root.set("GC", comment.as_str()).unwrap();
            root.set_raw("CA", "UTF-8").unwrap();
        }
        let node = game.extend_main_sequence().unwrap();
        game.node_mut(node).unwrap().set_move(Colour::Black, Some((3, 3))).unwrap();

        let serialised = game.serialise(DEFAULT_WRAP).unwrap();
        for line in serialised.split(|&b| b == b'\n') {
            assert!(line.len() <= DEFAULT_WRAP, "line of {} bytes", line.len());
        }
        assert_eq!(
            serialised,
            format!("(;FF[4]CA[UTF-8]\nGC[{}]GM[1]SZ[19];\nB[dp])\n", comment).into_bytes()
        );

        let reparsed = parse(&serialised);
        assert_eq!(reparsed.charset().unwrap(), "UTF-8");
        assert_eq!(
            reparsed.root_node().get("GC").unwrap(),
            PropertyValue::Text(comment)
        );
    }

    #[test]
    fn test_override_encoding() {
        let config = ParseConfig {
            override_encoding: Some("latin1".to_string()),
            ..ParseConfig::default()
        };
        let game = SgfGame::from_bytes(b"(;CA[UTF-8]PB[Jos\xe9])", &config).unwrap();
        assert_eq!(game.root_node().get_raw("CA").unwrap(), b"ISO-8859-1");
        assert_eq!(game.player_name(Colour::Black).unwrap().as_deref(), Some("José"));
    }

    #[test]
    fn test_default_charset() {
        let game = parse(b"(;PB[Jos\xe9])");
        assert_eq!(game.charset().unwrap(), "ISO-8859-1");
        assert_eq!(game.presenter().encoding(), "ISO-8859-1");
    }

    #[test]
    fn test_set_date() {
        let mut game = SgfGame::new(19).unwrap();
        let date = Date::from_calendar_date(2024, Month::February, 29).unwrap();
        game.set_date(Some(date)).unwrap();
        assert_eq!(game.root_node().get_raw("DT").unwrap(), b"2024-02-29");
        assert!(Date::from_calendar_date(2023, Month::February, 29).is_err());

        let early = Date::from_calendar_date(-1, Month::March, 7).unwrap();
        assert!(matches!(game.set_date(Some(early)), Err(SgfError::Value(_))));

        game.set_date(None).unwrap();
        let today = OffsetDateTime::now_utc().date();
        let root = game.root_node();
        let written = root.get_raw("DT").unwrap();
        assert_eq!(written.len(), 10);
        assert!(written.starts_with(format!("{:04}-", today.year()).as_bytes()));
    }

    #[test]
    fn test_deep_tree() {
        let mut data = b"(;FF[4]".to_vec();
        for _ in 0..20_000 {
            data.extend_from_slice(b"(;B[aa]");
        }
        data.extend(std::iter::repeat(b')').take(20_001));
        let game = parse(&data);
        assert_eq!(game.main_sequence().len(), 20_001);
        let serialised = game.serialise(79).unwrap();
        assert_eq!(parse(&serialised).main_sequence_iter().count(), 20_001);
    }
}
