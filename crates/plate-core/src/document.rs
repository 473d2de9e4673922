use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::EditorError;
use crate::selection::{Point, Selection};

pub const FONT_SIZE: &str = "font-size";

pub type TextStyle = BTreeMap<String, String>;

/// Identity of a node for the lifetime of a [`Document`].
///
/// Keys are never reused. Once a node is removed its key stops resolving,
/// so holders must re-validate before reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey(u64);

impl NodeKey {
    pub const ROOT: NodeKey = NodeKey(0);

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("root")
        } else {
            write!(f, "k{}", self.0)
        }
    }
}

/// Bitmask of inline text formats. Bits are independent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextFormat(u8);

impl TextFormat {
    pub const BOLD: Self = Self(1);
    pub const ITALIC: Self = Self(1 << 1);
    pub const STRIKETHROUGH: Self = Self(1 << 2);
    pub const UNDERLINE: Self = Self(1 << 3);

    pub const NAMED: [(&'static str, TextFormat); 4] = [
        ("bold", Self::BOLD),
        ("italic", Self::ITALIC),
        ("underline", Self::UNDERLINE),
        ("strikethrough", Self::STRIKETHROUGH),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b1111)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, f)| *f)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn toggle(&mut self, other: Self) {
        self.0 ^= other.0;
    }

    pub const fn toggled(self, other: Self) -> Self {
        Self(self.0 ^ other.0)
    }
}

impl BitOr for TextFormat {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for TextFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(_, bit)| self.contains(*bit))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "TextFormat({})", names.join("|"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListType {
    Bullet,
    Number,
}

impl ListType {
    pub fn as_str(self) -> &'static str {
        match self {
            ListType::Bullet => "bullet",
            ListType::Number => "number",
        }
    }
}

/// Block alignment code. `Unset` inherits from the enclosing block and is
/// never drawn as an alignment of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementFormat {
    #[default]
    Unset,
    Left,
    Center,
    Right,
    Justify,
}

impl ElementFormat {
    pub fn code(self) -> u8 {
        match self {
            ElementFormat::Unset => 0,
            ElementFormat::Left => 1,
            ElementFormat::Center => 2,
            ElementFormat::Right => 3,
            ElementFormat::Justify => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ElementFormat::Unset),
            1 => Some(ElementFormat::Left),
            2 => Some(ElementFormat::Center),
            3 => Some(ElementFormat::Right),
            4 => Some(ElementFormat::Justify),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" => Some(ElementFormat::Unset),
            "left" | "start" => Some(ElementFormat::Left),
            "center" => Some(ElementFormat::Center),
            "right" | "end" => Some(ElementFormat::Right),
            "justify" => Some(ElementFormat::Justify),
            _ => None,
        }
    }

    /// CSS `text-align` value, `None` for `Unset`.
    pub fn css_value(self) -> Option<&'static str> {
        match self {
            ElementFormat::Unset => None,
            ElementFormat::Left => Some("left"),
            ElementFormat::Center => Some("center"),
            ElementFormat::Right => Some("right"),
            ElementFormat::Justify => Some("justify"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ElementKind {
    Paragraph,
    Heading(u8),
    ListItem,
    List(ListType),
}

impl ElementKind {
    pub const MAX_HEADING_LEVEL: u8 = 5;

    pub fn heading(level: u8) -> Self {
        ElementKind::Heading(level.clamp(1, Self::MAX_HEADING_LEVEL))
    }

    /// Blocks whose children are text runs.
    pub fn is_text_block(self) -> bool {
        matches!(
            self,
            ElementKind::Paragraph | ElementKind::Heading(_) | ElementKind::ListItem
        )
    }

    pub fn list_type(self) -> Option<ListType> {
        match self {
            ElementKind::List(list_type) => Some(list_type),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    pub kind: ElementKind,
    pub format: ElementFormat,
    pub(crate) children: Vec<NodeKey>,
}

impl ElementNode {
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub text: String,
    pub format: TextFormat,
    pub style: TextStyle,
}

impl TextNode {
    pub fn has_format(&self, format: TextFormat) -> bool {
        self.format.contains(format)
    }

    pub fn font_size(&self) -> Option<&str> {
        self.style.get(FONT_SIZE).map(String::as_str)
    }

    fn same_marks(&self, other: &TextNode) -> bool {
        self.format == other.format && self.style == other.style
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Root { children: Vec<NodeKey> },
    Element(ElementNode),
    Text(TextNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    key: NodeKey,
    parent: Option<NodeKey>,
    data: NodeData,
}

impl Node {
    pub fn key(&self) -> NodeKey {
        self.key
    }

    /// Lookup-only back reference; the parent owns this node, not the reverse.
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn data(&self) -> &NodeData {
        &self.data
    }

    pub fn is_root(&self) -> bool {
        matches!(self.data, NodeData::Root { .. })
    }

    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self.data, NodeData::Text(_))
    }

    pub fn is_list(&self) -> bool {
        self.element_kind()
            .is_some_and(|kind| matches!(kind, ElementKind::List(_)))
    }

    pub fn is_list_item(&self) -> bool {
        self.element_kind() == Some(ElementKind::ListItem)
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match &self.data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextNode> {
        match &self.data {
            NodeData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn element_kind(&self) -> Option<ElementKind> {
        self.as_element().map(|el| el.kind)
    }

    pub fn children(&self) -> &[NodeKey] {
        match &self.data {
            NodeData::Root { children } => children,
            NodeData::Element(el) => &el.children,
            NodeData::Text(_) => &[],
        }
    }
}

/// A detached node subtree, the input of [`Document::insert_nodes`] and the
/// output of HTML import.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTemplate {
    Element {
        kind: ElementKind,
        format: ElementFormat,
        children: Vec<NodeTemplate>,
    },
    Text {
        text: String,
        format: TextFormat,
        style: TextStyle,
    },
}

impl NodeTemplate {
    pub fn text(text: impl Into<String>) -> Self {
        NodeTemplate::Text {
            text: text.into(),
            format: TextFormat::empty(),
            style: TextStyle::new(),
        }
    }

    pub fn formatted(text: impl Into<String>, format: TextFormat) -> Self {
        NodeTemplate::Text {
            text: text.into(),
            format,
            style: TextStyle::new(),
        }
    }

    pub fn element(kind: ElementKind, children: Vec<NodeTemplate>) -> Self {
        NodeTemplate::Element {
            kind,
            format: ElementFormat::Unset,
            children,
        }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::element(ElementKind::Paragraph, vec![Self::text(text)])
    }

    pub fn with_format(mut self, element_format: ElementFormat) -> Self {
        if let NodeTemplate::Element { format, .. } = &mut self {
            *format = element_format;
        }
        self
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, NodeTemplate::Text { .. })
    }

    fn kind(&self) -> Option<ElementKind> {
        match self {
            NodeTemplate::Element { kind, .. } => Some(*kind),
            NodeTemplate::Text { .. } => None,
        }
    }

    fn is_blank_text(&self) -> bool {
        matches!(self, NodeTemplate::Text { text, .. } if text.trim().is_empty())
    }

    /// Rewrites a sequence of templates so every node sits where the
    /// document taxonomy allows it: no text directly under the root, only
    /// list items inside lists, only runs (and nested lists) inside text
    /// blocks. Nodes that cannot be placed are flattened to their runs.
    pub fn normalize_blocks(nodes: Vec<NodeTemplate>) -> Vec<NodeTemplate> {
        let mut out: Vec<NodeTemplate> = Vec::new();
        let mut inline: Vec<NodeTemplate> = Vec::new();
        let mut items: Vec<NodeTemplate> = Vec::new();

        fn flush_inline(inline: &mut Vec<NodeTemplate>, out: &mut Vec<NodeTemplate>) {
            if inline.is_empty() {
                return;
            }
            let runs = std::mem::take(inline);
            if runs.iter().all(NodeTemplate::is_blank_text) {
                return;
            }
            out.push(NodeTemplate::element(ElementKind::Paragraph, runs).finish_block());
        }

        fn flush_items(items: &mut Vec<NodeTemplate>, out: &mut Vec<NodeTemplate>) {
            if items.is_empty() {
                return;
            }
            out.push(NodeTemplate::element(
                ElementKind::List(ListType::Bullet),
                std::mem::take(items),
            ));
        }

        for node in nodes {
            match node.kind() {
                None => {
                    flush_items(&mut items, &mut out);
                    inline.push(node);
                }
                Some(ElementKind::ListItem) => {
                    flush_inline(&mut inline, &mut out);
                    items.push(node.finish_block());
                }
                Some(_) => {
                    flush_inline(&mut inline, &mut out);
                    flush_items(&mut items, &mut out);
                    out.push(node.finish_block());
                }
            }
        }
        flush_inline(&mut inline, &mut out);
        flush_items(&mut items, &mut out);
        out
    }

    fn finish_block(self) -> NodeTemplate {
        let NodeTemplate::Element {
            kind,
            format,
            children,
        } = self
        else {
            return self;
        };

        let children = match kind {
            ElementKind::Paragraph | ElementKind::Heading(_) => {
                let mut runs = Vec::new();
                for child in children {
                    child.collect_runs(&mut runs);
                }
                clear_lone_breaks(merge_runs(runs))
            }
            ElementKind::ListItem => {
                let mut out = Vec::new();
                let mut runs = Vec::new();
                for child in children {
                    match child.kind() {
                        Some(ElementKind::List(_)) => {
                            if !runs.is_empty() {
                                out.extend(merge_runs(std::mem::take(&mut runs)));
                            }
                            out.push(child.finish_block());
                        }
                        _ => child.collect_runs(&mut runs),
                    }
                }
                out.extend(merge_runs(runs));
                let has_nested = out.iter().any(|n| n.kind().is_some());
                let out: Vec<NodeTemplate> = if has_nested {
                    out.into_iter()
                        .filter(|n| !n.is_blank_text())
                        .collect()
                } else {
                    out
                };
                clear_lone_breaks(out)
            }
            ElementKind::List(_) => {
                let mut out = Vec::new();
                for child in children {
                    match child.kind() {
                        Some(ElementKind::ListItem) => out.push(child.finish_block()),
                        Some(ElementKind::List(_)) => out.push(
                            NodeTemplate::element(ElementKind::ListItem, vec![child])
                                .finish_block(),
                        ),
                        Some(_) => {
                            if let NodeTemplate::Element {
                                format, children, ..
                            } = child
                            {
                                out.push(
                                    NodeTemplate::Element {
                                        kind: ElementKind::ListItem,
                                        format,
                                        children,
                                    }
                                    .finish_block(),
                                );
                            }
                        }
                        None => {
                            if !child.is_blank_text() {
                                out.push(
                                    NodeTemplate::element(ElementKind::ListItem, vec![child])
                                        .finish_block(),
                                );
                            }
                        }
                    }
                }
                out
            }
        };

        NodeTemplate::Element {
            kind,
            format,
            children,
        }
    }

    fn collect_runs(self, runs: &mut Vec<NodeTemplate>) {
        match self {
            NodeTemplate::Text { .. } => runs.push(self),
            NodeTemplate::Element { children, .. } => {
                for child in children {
                    child.collect_runs(runs);
                }
            }
        }
    }
}

pub(crate) fn merge_runs(runs: Vec<NodeTemplate>) -> Vec<NodeTemplate> {
    let mut out: Vec<NodeTemplate> = Vec::with_capacity(runs.len());
    for run in runs {
        if let (
            Some(NodeTemplate::Text {
                text: prev_text,
                format: prev_format,
                style: prev_style,
            }),
            NodeTemplate::Text {
                text,
                format,
                style,
            },
        ) = (out.last_mut(), &run)
        {
            if prev_format == format && prev_style == style {
                prev_text.push_str(text);
                continue;
            }
        }
        if matches!(&run, NodeTemplate::Text { text, .. } if text.is_empty()) {
            continue;
        }
        out.push(run);
    }
    out
}

/// A block whose only content is a single line break renders as empty.
fn clear_lone_breaks(children: Vec<NodeTemplate>) -> Vec<NodeTemplate> {
    let lone_break = matches!(
        children.as_slice(),
        [NodeTemplate::Text { text, .. }] if text == "\n"
    );
    if lone_break { Vec::new() } else { children }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TxState {
    #[default]
    Idle,
    Update,
}

/// What a committed update changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Commit {
    pub content_changed: bool,
    pub selection_changed: bool,
}

/// Frozen copy of the tree and selection, used by history and rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    nodes: HashMap<NodeKey, Node>,
    selection: Option<Selection>,
}

/// The document tree. Nodes live in a keyed arena; the root owns its
/// children top-down and every other node points back to its parent.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: HashMap<NodeKey, Node>,
    next_key: u64,
    pub(crate) selection: Option<Selection>,
    tx: TxState,
    content_dirty: bool,
    selection_dirty: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// A document holding one empty paragraph with the caret inside it.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            NodeKey::ROOT,
            Node {
                key: NodeKey::ROOT,
                parent: None,
                data: NodeData::Root {
                    children: Vec::new(),
                },
            },
        );
        let mut doc = Self {
            nodes,
            next_key: 1,
            selection: None,
            tx: TxState::Idle,
            content_dirty: false,
            selection_dirty: false,
        };
        let paragraph = doc.alloc(
            NodeKey::ROOT,
            NodeData::Element(ElementNode {
                kind: ElementKind::Paragraph,
                format: ElementFormat::Unset,
                children: Vec::new(),
            }),
        );
        doc.push_child(NodeKey::ROOT, paragraph);
        doc.selection = Some(Selection::caret(Point::new(paragraph, 0)));
        doc.content_dirty = false;
        doc
    }

    pub fn root(&self) -> &Node {
        // The root entry is inserted in `new` and never removed.
        &self.nodes[&NodeKey::ROOT]
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(&key)
    }

    pub fn get(&self, key: NodeKey) -> Result<&Node, EditorError> {
        self.nodes.get(&key).ok_or(EditorError::UnknownNode { key })
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        let children = self.root().children();
        match children {
            [] => true,
            [only] => self.node(*only).is_some_and(|node| {
                node.element_kind() == Some(ElementKind::Paragraph)
                    && node
                        .children()
                        .iter()
                        .all(|c| self.node(*c).and_then(Node::as_text).is_some_and(|t| t.text.is_empty()))
            }),
            _ => false,
        }
    }

    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.node(key).map(Node::children).unwrap_or(&[])
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.node(key).and_then(Node::parent)
    }

    pub fn element(&self, key: NodeKey) -> Option<&ElementNode> {
        self.node(key).and_then(Node::as_element)
    }

    pub fn text(&self, key: NodeKey) -> Option<&TextNode> {
        self.node(key).and_then(Node::as_text)
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn is_updating(&self) -> bool {
        self.tx == TxState::Update
    }

    /// Concatenated text of a subtree; blocks are separated by newlines.
    pub fn text_content_of(&self, key: NodeKey) -> String {
        let Some(node) = self.node(key) else {
            return String::new();
        };
        match node.data() {
            NodeData::Text(text) => text.text.clone(),
            NodeData::Root { children } => children
                .iter()
                .map(|c| self.text_content_of(*c))
                .collect::<Vec<_>>()
                .join("\n"),
            NodeData::Element(el) => {
                let mut out = String::new();
                for child in &el.children {
                    let is_block = self.node(*child).is_some_and(Node::is_element);
                    if is_block && !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    out.push_str(&self.text_content_of(*child));
                }
                out
            }
        }
    }

    pub fn text_content(&self) -> String {
        self.text_content_of(NodeKey::ROOT)
    }

    /// Child-index path from the root; empty for the root itself.
    pub fn path_of(&self, key: NodeKey) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut current = key;
        loop {
            let node = self.node(current)?;
            let Some(parent) = node.parent else {
                break;
            };
            let index = self.children(parent).iter().position(|c| *c == current)?;
            path.push(index);
            current = parent;
        }
        if current != NodeKey::ROOT {
            return None;
        }
        path.reverse();
        Some(path)
    }

    pub fn index_in_parent(&self, key: NodeKey) -> Option<usize> {
        let parent = self.parent(key)?;
        self.children(parent).iter().position(|c| *c == key)
    }

    /// Text nodes in document order.
    pub fn text_nodes(&self) -> Vec<NodeKey> {
        let mut out = Vec::new();
        self.walk(NodeKey::ROOT, &mut |doc, key| {
            if doc.node(key).is_some_and(Node::is_text) {
                out.push(key);
            }
        });
        out
    }

    /// Elements whose children are runs, in document order.
    pub fn text_blocks(&self) -> Vec<NodeKey> {
        let mut out = Vec::new();
        self.walk(NodeKey::ROOT, &mut |doc, key| {
            if doc
                .node(key)
                .and_then(Node::element_kind)
                .is_some_and(ElementKind::is_text_block)
            {
                out.push(key);
            }
        });
        out
    }

    fn walk(&self, key: NodeKey, visit: &mut dyn FnMut(&Document, NodeKey)) {
        visit(self, key);
        for child in self.children(key) {
            self.walk(*child, visit);
        }
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            nodes: self.nodes.clone(),
            selection: self.selection.clone(),
        }
    }

    /// True when the tree is node-for-node identical to `snapshot`'s.
    pub fn content_matches(&self, snapshot: &DocumentSnapshot) -> bool {
        self.nodes == snapshot.nodes
    }

    pub(crate) fn begin_update(&mut self) -> Result<(), EditorError> {
        if self.tx == TxState::Update {
            return Err(EditorError::TransactionInProgress);
        }
        self.tx = TxState::Update;
        self.content_dirty = false;
        self.selection_dirty = false;
        Ok(())
    }

    pub(crate) fn end_update(&mut self) -> Commit {
        self.tx = TxState::Idle;
        Commit {
            content_changed: std::mem::take(&mut self.content_dirty),
            selection_changed: std::mem::take(&mut self.selection_dirty),
        }
    }

    pub(crate) fn require_update(&self) -> Result<(), EditorError> {
        if self.tx == TxState::Update {
            Ok(())
        } else {
            Err(EditorError::NoActiveTransaction)
        }
    }

    /// Replaces tree and selection with a snapshot. Keys allocated since the
    /// snapshot are never handed out again.
    pub fn restore_snapshot(&mut self, snapshot: DocumentSnapshot) -> Result<(), EditorError> {
        self.require_update()?;
        let content_changed = self.nodes != snapshot.nodes;
        let selection_changed = self.selection != snapshot.selection;
        let max_key = snapshot.nodes.keys().map(|k| k.0).max().unwrap_or(0);
        self.next_key = self.next_key.max(max_key + 1);
        self.nodes = snapshot.nodes;
        self.selection = snapshot.selection;
        self.content_dirty |= content_changed;
        self.selection_dirty |= selection_changed;
        Ok(())
    }

    pub(crate) fn mark_selection_dirty(&mut self) {
        self.selection_dirty = true;
    }

    pub(crate) fn alloc(&mut self, parent: NodeKey, data: NodeData) -> NodeKey {
        let key = NodeKey(self.next_key);
        self.next_key += 1;
        self.nodes.insert(
            key,
            Node {
                key,
                parent: Some(parent),
                data,
            },
        );
        self.content_dirty = true;
        key
    }

    pub(crate) fn alloc_text(&mut self, parent: NodeKey, text: TextNode) -> NodeKey {
        self.alloc(parent, NodeData::Text(text))
    }

    fn children_mut(&mut self, key: NodeKey) -> Result<&mut Vec<NodeKey>, EditorError> {
        match self.nodes.get_mut(&key).map(|n| &mut n.data) {
            Some(NodeData::Root { children }) => Ok(children),
            Some(NodeData::Element(el)) => Ok(&mut el.children),
            Some(NodeData::Text(_)) => Err(EditorError::InvalidNode(format!(
                "text node {key} cannot hold children"
            ))),
            None => Err(EditorError::UnknownNode { key }),
        }
    }

    fn push_child(&mut self, parent: NodeKey, child: NodeKey) {
        if let Ok(children) = self.children_mut(parent) {
            children.push(child);
        }
    }

    /// Attaches a detached node under `parent` at `index` (clamped).
    pub(crate) fn insert_child(
        &mut self,
        parent: NodeKey,
        index: usize,
        child: NodeKey,
    ) -> Result<(), EditorError> {
        let children = self.children_mut(parent)?;
        let index = index.min(children.len());
        children.insert(index, child);
        let node = self
            .nodes
            .get_mut(&child)
            .ok_or(EditorError::UnknownNode { key: child })?;
        node.parent = Some(parent);
        self.content_dirty = true;
        Ok(())
    }

    /// Unlinks a node from its parent, keeping it (and its subtree) alive.
    pub(crate) fn detach(&mut self, key: NodeKey) -> Result<usize, EditorError> {
        let parent = self
            .parent(key)
            .ok_or_else(|| EditorError::InvalidNode(format!("node {key} is not attached")))?;
        let children = self.children_mut(parent)?;
        let index = children
            .iter()
            .position(|c| *c == key)
            .ok_or(EditorError::UnknownNode { key })?;
        children.remove(index);
        if let Some(node) = self.nodes.get_mut(&key) {
            node.parent = None;
        }
        self.content_dirty = true;
        Ok(index)
    }

    /// Removes a subtree. Every key inside it stops resolving.
    pub(crate) fn remove(&mut self, key: NodeKey) -> Result<(), EditorError> {
        if key.is_root() {
            return Err(EditorError::InvalidNode("the root cannot be removed".into()));
        }
        if self.parent(key).is_some() {
            self.detach(key)?;
        }
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children().iter().copied());
            }
        }
        self.content_dirty = true;
        Ok(())
    }

    pub(crate) fn text_mut(&mut self, key: NodeKey) -> Result<&mut TextNode, EditorError> {
        self.content_dirty = true;
        match self.nodes.get_mut(&key).map(|n| &mut n.data) {
            Some(NodeData::Text(text)) => Ok(text),
            Some(_) => Err(EditorError::InvalidNode(format!("{key} is not a text node"))),
            None => Err(EditorError::UnknownNode { key }),
        }
    }

    pub(crate) fn element_mut(&mut self, key: NodeKey) -> Result<&mut ElementNode, EditorError> {
        self.content_dirty = true;
        match self.nodes.get_mut(&key).map(|n| &mut n.data) {
            Some(NodeData::Element(el)) => Ok(el),
            Some(_) => Err(EditorError::InvalidNode(format!(
                "{key} is not an element node"
            ))),
            None => Err(EditorError::UnknownNode { key }),
        }
    }

    /// Materializes a template under `parent` at `index`, returning its key.
    pub(crate) fn build(
        &mut self,
        parent: NodeKey,
        index: usize,
        template: NodeTemplate,
    ) -> Result<NodeKey, EditorError> {
        let key = match template {
            NodeTemplate::Text {
                text,
                format,
                style,
            } => self.alloc_text(
                parent,
                TextNode {
                    text,
                    format,
                    style,
                },
            ),
            NodeTemplate::Element {
                kind,
                format,
                children,
            } => {
                let key = self.alloc(
                    parent,
                    NodeData::Element(ElementNode {
                        kind,
                        format,
                        children: Vec::new(),
                    }),
                );
                for (ix, child) in children.into_iter().enumerate() {
                    self.build(key, ix, child)?;
                }
                key
            }
        };
        self.insert_child(parent, index, key)?;
        Ok(key)
    }

    /// Merges adjacent runs that share format and style, and drops empty
    /// runs when the block has other content. Selection points follow the
    /// merged text.
    pub(crate) fn normalize_runs(&mut self, block: NodeKey) -> Result<(), EditorError> {
        let mut ix = 0usize;
        loop {
            let children = self.children(block).to_vec();
            if ix + 1 >= children.len() {
                break;
            }
            let (left, right) = (children[ix], children[ix + 1]);
            let mergeable = match (self.text(left), self.text(right)) {
                (Some(a), Some(b)) => a.same_marks(b) || b.text.is_empty() || a.text.is_empty(),
                _ => false,
            };
            if !mergeable {
                ix += 1;
                continue;
            }

            let left_empty = self.text(left).is_some_and(|t| t.text.is_empty());
            if left_empty {
                self.map_points(|p| (p.key == left).then(|| Point::new(right, 0)));
                self.remove(left)?;
                continue;
            }

            let left_len = self.text(left).map(|t| t.text.len()).unwrap_or(0);
            let right_text = self.text(right).map(|t| t.text.clone()).unwrap_or_default();
            self.text_mut(left)?.text.push_str(&right_text);
            self.map_points(|p| (p.key == right).then(|| Point::new(left, left_len + p.offset)));
            self.remove(right)?;
        }
        Ok(())
    }

    pub(crate) fn map_points(&mut self, f: impl Fn(&Point) -> Option<Point>) {
        let Some(selection) = self.selection.as_mut() else {
            return;
        };
        let mut changed = false;
        for point in [&mut selection.anchor, &mut selection.focus] {
            if let Some(next) = f(point) {
                if *point != next {
                    *point = next;
                    changed = true;
                }
            }
        }
        if changed {
            self.selection_dirty = true;
        }
    }
}
