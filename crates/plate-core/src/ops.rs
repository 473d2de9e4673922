use std::ops::Range;

use tracing::{debug, trace};

use crate::document::{
    Document, ElementFormat, ElementKind, ElementNode, FONT_SIZE, ListType, Node, NodeData,
    NodeKey, NodeTemplate, TextFormat, TextNode, merge_runs,
};
use crate::error::EditorError;
use crate::selection::{Point, Selection, clamp_to_char_boundary};

impl Document {
    /// Splits a run at `at` (0 < at < len). The left part keeps the key;
    /// returns the key of the new right part.
    fn split_text(&mut self, key: NodeKey, at: usize) -> Result<NodeKey, EditorError> {
        let text = self.text(key).ok_or(EditorError::UnknownNode { key })?;
        let at = clamp_to_char_boundary(&text.text, at);
        let tail = TextNode {
            text: text.text[at..].to_string(),
            format: text.format,
            style: text.style.clone(),
        };
        let parent = self
            .parent(key)
            .ok_or_else(|| EditorError::InvalidNode(format!("{key} is detached")))?;
        let index = self
            .index_in_parent(key)
            .ok_or(EditorError::UnknownNode { key })?;

        self.text_mut(key)?.text.truncate(at);
        let right = self.alloc_text(parent, tail);
        self.insert_child(parent, index + 1, right)?;
        self.map_points(|p| (p.key == key && p.offset > at).then(|| Point::new(right, p.offset - at)));
        trace!(%key, %right, at, "split text run");
        Ok(right)
    }

    /// Splits a run so that exactly `range` sits in its own node.
    fn isolate(&mut self, key: NodeKey, range: Range<usize>) -> Result<NodeKey, EditorError> {
        let len = self.text(key).map(|t| t.text.len()).unwrap_or(0);
        if range.end > 0 && range.end < len {
            self.split_text(key, range.end)?;
        }
        if range.start > 0 {
            return self.split_text(key, range.start);
        }
        Ok(key)
    }

    /// Applies `f` to the selected part of every overlapped run. Returns the
    /// number of blocks touched.
    fn for_each_selected_run(
        &mut self,
        selection: &Selection,
        mut f: impl FnMut(&mut TextNode),
    ) -> Result<usize, EditorError> {
        let slices = self.selected_text_slices(selection)?;
        let mut blocks: Vec<NodeKey> = Vec::new();
        for slice in slices {
            let target = self.isolate(slice.key, slice.range)?;
            f(self.text_mut(target)?);
            if let Some(parent) = self.parent(target) {
                if !blocks.contains(&parent) {
                    blocks.push(parent);
                }
            }
        }
        for block in &blocks {
            self.normalize_runs(*block)?;
        }
        Ok(blocks.len())
    }

    /// Toggles `format` on every selected run, flipping each run's own bit.
    /// At a caret the pending format for typed text is toggled instead.
    pub fn set_text_format(&mut self, format: TextFormat) -> Result<(), EditorError> {
        self.require_update()?;
        let Some(selection) = self.current_selection()? else {
            return Ok(());
        };

        if selection.is_collapsed() {
            let pending = self.caret_format(&selection).toggled(format);
            self.put_selection(Selection {
                format: Some(pending),
                ..selection
            });
            return Ok(());
        }

        let blocks = self.for_each_selected_run(&selection, |text| text.format.toggle(format))?;
        debug!(?format, blocks, "toggled text format");
        Ok(())
    }

    /// Sets (or with an empty value, clears) the font size of the selected
    /// runs.
    pub fn set_font_size(&mut self, value: &str) -> Result<(), EditorError> {
        self.require_update()?;
        let Some(selection) = self.current_selection()? else {
            return Ok(());
        };
        let value = value.trim().to_string();

        if selection.is_collapsed() {
            let mut style = selection
                .style
                .clone()
                .or_else(|| self.text(selection.anchor.key).map(|t| t.style.clone()))
                .unwrap_or_default();
            if value.is_empty() {
                style.remove(FONT_SIZE);
            } else {
                style.insert(FONT_SIZE.to_string(), value);
            }
            self.put_selection(Selection {
                style: Some(style),
                ..selection
            });
            return Ok(());
        }

        let blocks = self.for_each_selected_run(&selection, |text| {
            if value.is_empty() {
                text.style.remove(FONT_SIZE);
            } else {
                text.style.insert(FONT_SIZE.to_string(), value.clone());
            }
        })?;
        debug!(size = %value, blocks, "patched font size");
        Ok(())
    }

    /// Writes `format` once on each distinct top-level block the selection
    /// touches. Returns the number of blocks written.
    pub fn set_element_format(&mut self, format: ElementFormat) -> Result<usize, EditorError> {
        self.require_update()?;
        let Some(selection) = self.current_selection()? else {
            return Ok(0);
        };
        let blocks = self.intersected_blocks(&selection)?;
        for block in &blocks {
            self.element_mut(*block)?.format = format;
        }
        debug!(?format, blocks = blocks.len(), "set element format");
        Ok(blocks.len())
    }

    /// Converts the selected top-level paragraphs and headings. Lists are
    /// left alone.
    pub fn set_block_type(&mut self, kind: ElementKind) -> Result<usize, EditorError> {
        self.require_update()?;
        if !matches!(kind, ElementKind::Paragraph | ElementKind::Heading(_)) {
            return Err(EditorError::InvalidNode(format!(
                "{kind:?} is not a block type"
            )));
        }
        let Some(selection) = self.current_selection()? else {
            return Ok(0);
        };
        let mut written = 0;
        for block in self.intersected_blocks(&selection)? {
            let current = self.element(block).map(|el| el.kind);
            if matches!(
                current,
                Some(ElementKind::Paragraph) | Some(ElementKind::Heading(_))
            ) {
                self.element_mut(block)?.kind = kind;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Wraps the selected top-level blocks in a `list_type` list, or
    /// returns them to paragraphs when they are all lists and the list
    /// closest to the anchor is already a `list_type` one.
    pub fn toggle_list(&mut self, list_type: ListType) -> Result<(), EditorError> {
        self.require_update()?;
        let Some(selection) = self.current_selection()? else {
            return Ok(());
        };
        let blocks = self.intersected_blocks(&selection)?;
        if blocks.is_empty() {
            return Ok(());
        }
        let active = self.list_type_at(selection.anchor.key) == Some(list_type)
            && blocks.iter().all(|b| self.node(*b).is_some_and(Node::is_list));
        if active {
            for block in blocks {
                self.unwrap_list(block)?;
            }
        } else {
            self.wrap_in_list(&blocks, list_type)?;
        }
        Ok(())
    }

    /// Like [`Document::toggle_list`] but never unwraps.
    pub fn insert_list(&mut self, list_type: ListType) -> Result<(), EditorError> {
        self.require_update()?;
        let Some(selection) = self.current_selection()? else {
            return Ok(());
        };
        let blocks = self.intersected_blocks(&selection)?;
        self.wrap_in_list(&blocks, list_type)
    }

    pub fn remove_list(&mut self) -> Result<(), EditorError> {
        self.require_update()?;
        let Some(selection) = self.current_selection()? else {
            return Ok(());
        };
        for block in self.intersected_blocks(&selection)? {
            if self.node(block).is_some_and(Node::is_list) {
                self.unwrap_list(block)?;
            }
        }
        Ok(())
    }

    fn wrap_in_list(&mut self, blocks: &[NodeKey], list_type: ListType) -> Result<(), EditorError> {
        let mut current: Option<NodeKey> = None;
        for &block in blocks {
            let Some(kind) = self.element(block).map(|el| el.kind) else {
                continue;
            };
            match kind {
                ElementKind::List(_) => {
                    self.element_mut(block)?.kind = ElementKind::List(list_type);
                    current = Some(block);
                }
                ElementKind::Paragraph | ElementKind::Heading(_) => {
                    let list = match current {
                        Some(list) => list,
                        None => {
                            let index = self.index_in_parent(block).unwrap_or(0);
                            let list = self.alloc(
                                NodeKey::ROOT,
                                NodeData::Element(ElementNode {
                                    kind: ElementKind::List(list_type),
                                    format: ElementFormat::Unset,
                                    children: Vec::new(),
                                }),
                            );
                            self.insert_child(NodeKey::ROOT, index, list)?;
                            current = Some(list);
                            list
                        }
                    };
                    // The block keeps its key so selection points stay valid.
                    self.detach(block)?;
                    self.element_mut(block)?.kind = ElementKind::ListItem;
                    let len = self.children(list).len();
                    self.insert_child(list, len, block)?;
                }
                ElementKind::ListItem => {}
            }
        }
        debug!(list_type = list_type.as_str(), blocks = blocks.len(), "wrapped blocks in list");
        Ok(())
    }

    fn unwrap_list(&mut self, list: NodeKey) -> Result<(), EditorError> {
        let index = self
            .index_in_parent(list)
            .ok_or(EditorError::UnknownNode { key: list })?;
        let list_format = self.element(list).map(|el| el.format).unwrap_or_default();
        let paragraphs = self.flatten_list(list)?;

        for (offset, key) in paragraphs.iter().enumerate() {
            if list_format != ElementFormat::Unset
                && self.element(*key).map(|el| el.format) == Some(ElementFormat::Unset)
            {
                self.element_mut(*key)?.format = list_format;
            }
            self.insert_child(NodeKey::ROOT, index + offset, *key)?;
        }
        self.remove(list)?;

        let fallback = match paragraphs.first() {
            Some(first) => Point::new(*first, 0),
            None => Point::new(NodeKey::ROOT, index),
        };
        self.repair_selection(&fallback);
        debug!(%list, paragraphs = paragraphs.len(), "unwrapped list");
        Ok(())
    }

    /// Detaches every item of `list` (recursing into nested lists) and
    /// turns it into a paragraph. Items that only wrapped a nested list are
    /// dropped.
    fn flatten_list(&mut self, list: NodeKey) -> Result<Vec<NodeKey>, EditorError> {
        let mut out = Vec::new();
        for item in self.children(list).to_vec() {
            self.detach(item)?;
            let nested: Vec<NodeKey> = self
                .children(item)
                .iter()
                .copied()
                .filter(|c| self.node(*c).is_some_and(Node::is_list))
                .collect();
            let has_runs = self.children(item).len() > nested.len();
            for n in &nested {
                self.detach(*n)?;
            }
            if self.node(item).is_some_and(Node::is_list_item) {
                self.element_mut(item)?.kind = ElementKind::Paragraph;
            }
            if has_runs || nested.is_empty() {
                out.push(item);
            } else {
                self.remove(item)?;
            }
            for n in nested {
                out.extend(self.flatten_list(n)?);
                self.remove(n)?;
            }
        }
        Ok(out)
    }

    /// Types `text` at the caret, replacing a ranged selection first.
    pub fn insert_text(&mut self, text: &str) -> Result<(), EditorError> {
        self.require_update()?;
        let Some(mut selection) = self.current_selection()? else {
            return Ok(());
        };
        if !selection.is_collapsed() {
            self.delete_selection()?;
            selection = match self.current_selection()? {
                Some(selection) => selection,
                None => return Ok(()),
            };
        }
        if text.is_empty() {
            return Ok(());
        }

        let format = self.caret_format(&selection);
        let style = selection
            .style
            .clone()
            .or_else(|| self.text(selection.anchor.key).map(|t| t.style.clone()))
            .unwrap_or_default();
        let point = selection.anchor.clone();

        let (block, caret) = match self.text(point.key).cloned() {
            Some(run) if run.format == format && run.style == style => {
                self.text_mut(point.key)?.text.insert_str(point.offset, text);
                let block = self.parent(point.key);
                (block, Point::new(point.key, point.offset + text.len()))
            }
            Some(run) => {
                let parent = self
                    .parent(point.key)
                    .ok_or(EditorError::InvalidSelection { key: point.key })?;
                let index = self
                    .index_in_parent(point.key)
                    .ok_or(EditorError::InvalidSelection { key: point.key })?;
                let at = if point.offset == 0 {
                    index
                } else if point.offset >= run.text.len() {
                    index + 1
                } else {
                    self.split_text(point.key, point.offset)?;
                    index + 1
                };
                let key = self.alloc_text(
                    parent,
                    TextNode {
                        text: text.to_string(),
                        format,
                        style,
                    },
                );
                self.insert_child(parent, at, key)?;
                (Some(parent), Point::new(key, text.len()))
            }
            None => {
                let kind = self.element(point.key).map(|el| el.kind);
                if !kind.is_some_and(ElementKind::is_text_block) {
                    return Err(EditorError::InvalidNode(format!(
                        "cannot type into {}",
                        point.key
                    )));
                }
                let key = self.alloc_text(
                    point.key,
                    TextNode {
                        text: text.to_string(),
                        format,
                        style,
                    },
                );
                self.insert_child(point.key, point.offset, key)?;
                (Some(point.key), Point::new(key, text.len()))
            }
        };

        self.put_selection(Selection::caret(caret));
        if let Some(block) = block {
            self.normalize_runs(block)?;
        }
        Ok(())
    }

    /// Removes the selected content and collapses the selection to its
    /// start. When the selection spans blocks the end block is merged into
    /// the start block.
    pub fn delete_selection(&mut self) -> Result<(), EditorError> {
        self.require_update()?;
        let Some(selection) = self.current_selection()? else {
            return Ok(());
        };
        if selection.is_collapsed() {
            return Ok(());
        }
        let (start, end) = self.ordered_points(&selection);
        let start_block = self.point_block(&start);
        let end_block = self.point_block(&end);

        for slice in self.selected_text_slices(&selection)? {
            let text = self.text_mut(slice.key)?;
            text.text.replace_range(slice.range, "");
            if text.text.is_empty() && slice.key != start.key {
                self.remove(slice.key)?;
            }
        }

        if let (Some(first), Some(last)) = (start_block, end_block) {
            if first != last {
                self.merge_blocks(first, last)?;
            }
        }
        self.prune_empty_containers(start_block)?;
        if self.root().children().is_empty() {
            self.build(
                NodeKey::ROOT,
                0,
                NodeTemplate::element(ElementKind::Paragraph, Vec::new()),
            )?;
        }

        self.put_selection(Selection::caret(start));
        if let Some(block) = start_block.filter(|b| self.contains(*b)) {
            self.normalize_runs(block)?;
        }
        let fallback = self.end_point(NodeKey::ROOT);
        self.repair_selection(&fallback);
        Ok(())
    }

    fn point_block(&self, point: &Point) -> Option<NodeKey> {
        let node = self.node(point.key)?;
        if node.is_text() {
            return node.parent();
        }
        node.element_kind()
            .is_some_and(ElementKind::is_text_block)
            .then_some(point.key)
    }

    fn is_ancestor(&self, ancestor: NodeKey, key: NodeKey) -> bool {
        let mut current = self.parent(key);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent(parent);
        }
        false
    }

    fn merge_blocks(&mut self, first: NodeKey, last: NodeKey) -> Result<(), EditorError> {
        let blocks = self.text_blocks();
        let (Some(si), Some(ei)) = (
            blocks.iter().position(|b| *b == first),
            blocks.iter().position(|b| *b == last),
        ) else {
            return Ok(());
        };

        for &between in blocks.iter().take(ei).skip(si + 1) {
            if !self.contains(between) {
                continue;
            }
            if self.is_ancestor(between, last) || self.is_ancestor(between, first) {
                let runs: Vec<NodeKey> = self
                    .children(between)
                    .iter()
                    .copied()
                    .filter(|c| self.node(*c).is_some_and(Node::is_text))
                    .collect();
                for run in runs {
                    self.remove(run)?;
                }
            } else {
                self.remove(between)?;
            }
        }

        let first_is_item = self.node(first).is_some_and(Node::is_list_item);
        let mut after_top = self
            .nearest_block_ancestor(first)
            .and_then(|top| self.index_in_parent(top))
            .map(|ix| ix + 1)
            .unwrap_or(0);
        for child in self.children(last).to_vec() {
            self.detach(child)?;
            if self.node(child).is_some_and(Node::is_text) || first_is_item {
                let len = self.children(first).len();
                self.insert_child(first, len, child)?;
            } else {
                self.insert_child(NodeKey::ROOT, after_top, child)?;
                after_top += 1;
            }
        }
        self.remove(last)
    }

    /// Drops lists and list items left without children.
    fn prune_empty_containers(&mut self, keep: Option<NodeKey>) -> Result<(), EditorError> {
        fn prune(doc: &mut Document, key: NodeKey, keep: Option<NodeKey>) -> Result<bool, EditorError> {
            for child in doc.children(key).to_vec() {
                if doc.node(child).is_some_and(Node::is_element) && prune(doc, child, keep)? {
                    doc.remove(child)?;
                }
            }
            let node = match doc.node(key) {
                Some(node) => node,
                None => return Ok(false),
            };
            let container = node.is_list() || node.is_list_item();
            Ok(container && node.children().is_empty() && Some(key) != keep)
        }

        for top in self.root().children().to_vec() {
            if prune(self, top, keep)? {
                self.remove(top)?;
            }
        }
        Ok(())
    }

    /// Inserts `nodes` at the selection, replacing a ranged selection. In a
    /// freshly empty document the nodes replace its contents instead.
    pub fn insert_nodes(&mut self, mut nodes: Vec<NodeTemplate>) -> Result<(), EditorError> {
        self.require_update()?;
        if nodes.is_empty() {
            return Ok(());
        }
        let selection = self.current_selection()?;
        if self.is_empty() {
            return self.replace_contents(nodes);
        }

        let selection = match selection {
            Some(selection) => selection,
            None => Selection::caret(self.end_point(NodeKey::ROOT)),
        };
        self.put_selection(selection.clone());
        if !selection.is_collapsed() {
            self.delete_selection()?;
        }
        let caret = match self.current_selection()? {
            Some(selection) => selection.anchor,
            None => self.end_point(NodeKey::ROOT),
        };

        let split = nodes
            .iter()
            .position(|n| !n.is_inline())
            .unwrap_or(nodes.len());
        let blocks = NodeTemplate::normalize_blocks(nodes.split_off(split));
        let inline = merge_runs(nodes);
        if inline.is_empty() && blocks.is_empty() {
            return Ok(());
        }

        let (block, mut index) = self.resolve_insertion(&caret)?;
        let mut caret = caret;
        for run in inline {
            let key = self.build(block, index, run)?;
            caret = self.end_point(key);
            index += 1;
        }

        if !blocks.is_empty() {
            let top = self
                .nearest_block_ancestor(block)
                .ok_or(EditorError::InvalidSelection { key: block })?;
            let top_index = self
                .index_in_parent(top)
                .ok_or(EditorError::InvalidSelection { key: top })?;
            let mut at = top_index + 1;

            if top == block {
                let tail: Vec<NodeKey> = self.children(block).get(index..).unwrap_or(&[]).to_vec();
                if !tail.is_empty() {
                    let (kind, format) = self
                        .element(block)
                        .map(|el| (el.kind, el.format))
                        .unwrap_or((ElementKind::Paragraph, ElementFormat::Unset));
                    let rest = self.alloc(
                        NodeKey::ROOT,
                        NodeData::Element(ElementNode {
                            kind,
                            format,
                            children: Vec::new(),
                        }),
                    );
                    for (ix, child) in tail.iter().enumerate() {
                        self.detach(*child)?;
                        self.insert_child(rest, ix, *child)?;
                    }
                    self.insert_child(NodeKey::ROOT, at, rest)?;
                }
            }

            let mut last = None;
            for template in blocks {
                last = Some(self.build(NodeKey::ROOT, at, template)?);
                at += 1;
            }
            if let Some(last) = last {
                caret = self.end_point(last);
            }

            if top == block && self.children(block).is_empty() {
                self.remove(block)?;
            }
        }

        self.put_selection(Selection::caret(caret));
        if self.contains(block) {
            self.normalize_runs(block)?;
        }
        let fallback = self.end_point(NodeKey::ROOT);
        self.repair_selection(&fallback);
        debug!("inserted nodes at selection");
        Ok(())
    }

    fn replace_contents(&mut self, nodes: Vec<NodeTemplate>) -> Result<(), EditorError> {
        for child in self.root().children().to_vec() {
            self.remove(child)?;
        }
        let blocks = NodeTemplate::normalize_blocks(nodes);
        let mut last = None;
        for (ix, template) in blocks.into_iter().enumerate() {
            last = Some(self.build(NodeKey::ROOT, ix, template)?);
        }
        let last = match last {
            Some(last) => last,
            None => self.build(
                NodeKey::ROOT,
                0,
                NodeTemplate::element(ElementKind::Paragraph, Vec::new()),
            )?,
        };
        let caret = self.end_point(last);
        self.put_selection(Selection::caret(caret));
        debug!(blocks = self.root().children().len(), "replaced document contents");
        Ok(())
    }

    /// Block and child index where inline content lands for `point`,
    /// splitting the run under the caret if needed.
    fn resolve_insertion(&mut self, point: &Point) -> Result<(NodeKey, usize), EditorError> {
        if let Some(run) = self.text(point.key) {
            let len = run.text.len();
            let parent = self
                .parent(point.key)
                .ok_or(EditorError::InvalidSelection { key: point.key })?;
            let index = self
                .index_in_parent(point.key)
                .ok_or(EditorError::InvalidSelection { key: point.key })?;
            let at = if point.offset == 0 {
                index
            } else if point.offset >= len {
                index + 1
            } else {
                self.split_text(point.key, point.offset)?;
                index + 1
            };
            return Ok((parent, at));
        }

        let kind = self.element(point.key).map(|el| el.kind);
        if kind.is_some_and(ElementKind::is_text_block) {
            return Ok((point.key, point.offset));
        }

        // Caret on the root or on a list: open a fresh paragraph there.
        let at = if point.key.is_root() {
            point.offset
        } else {
            self.nearest_block_ancestor(point.key)
                .and_then(|top| self.index_in_parent(top))
                .map(|ix| ix + 1)
                .unwrap_or(self.root().children().len())
        };
        let paragraph = self.build(
            NodeKey::ROOT,
            at,
            NodeTemplate::element(ElementKind::Paragraph, Vec::new()),
        )?;
        Ok((paragraph, 0))
    }

    /// Caret position at the very end of a subtree.
    pub fn end_point(&self, key: NodeKey) -> Point {
        let mut current = key;
        loop {
            if let Some(text) = self.text(current) {
                return Point::new(current, text.text.len());
            }
            match self.children(current).last() {
                Some(last) => current = *last,
                None => return Point::new(current, 0),
            }
        }
    }

    pub(crate) fn put_selection(&mut self, selection: Selection) {
        let mut selection = selection;
        selection.is_backward = !self.is_forward(&selection);
        if self.selection.as_ref() != Some(&selection) {
            self.selection = Some(selection);
            self.mark_selection_dirty();
        }
    }

    /// Moves selection endpoints that no longer resolve onto `fallback`.
    pub(crate) fn repair_selection(&mut self, fallback: &Point) {
        let Some(mut selection) = self.selection.clone() else {
            return;
        };
        let mut changed = false;
        for point in [&mut selection.anchor, &mut selection.focus] {
            if self.path_of(point.key).is_none() {
                *point = fallback.clone();
                changed = true;
            }
        }
        if changed {
            self.put_selection(selection);
        }
    }
}
