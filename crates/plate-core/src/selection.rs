use std::cmp::Ordering;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::document::{Document, ElementFormat, ListType, NodeKey, TextFormat, TextStyle};
use crate::error::EditorError;

/// A position in the tree. On a text node `offset` is a byte offset into
/// its text; on an element it is a child index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
}

impl Point {
    pub fn new(key: NodeKey, offset: usize) -> Self {
        Self { key, offset }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Point,
    pub focus: Point,
    #[serde(default)]
    pub is_backward: bool,
    /// Format applied to text typed at a caret; `None` follows the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<TextFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<TextStyle>,
}

impl Selection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self {
            anchor,
            focus,
            is_backward: false,
            format: None,
            style: None,
        }
    }

    pub fn caret(point: Point) -> Self {
        Self::new(point.clone(), point)
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}

/// Fold of one property over many runs: nothing seen yet, one shared
/// value, or disagreement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Aggregate<T> {
    #[default]
    Empty,
    Uniform(T),
    Mixed,
}

impl<T: PartialEq> Aggregate<T> {
    pub fn push(self, value: T) -> Self {
        match self {
            Aggregate::Empty => Aggregate::Uniform(value),
            Aggregate::Uniform(current) if current == value => Aggregate::Uniform(current),
            Aggregate::Uniform(_) | Aggregate::Mixed => Aggregate::Mixed,
        }
    }

    pub fn uniform(self) -> Option<T> {
        match self {
            Aggregate::Uniform(value) => Some(value),
            Aggregate::Empty | Aggregate::Mixed => None,
        }
    }
}

impl<T: PartialEq> FromIterator<T> for Aggregate<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter().fold(Aggregate::Empty, Aggregate::push)
    }
}

/// The part of one text run covered by a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSlice {
    pub key: NodeKey,
    pub range: Range<usize>,
}

pub(crate) fn clamp_to_char_boundary(s: &str, mut ix: usize) -> usize {
    ix = ix.min(s.len());
    while ix > 0 && !s.is_char_boundary(ix) {
        ix -= 1;
    }
    ix
}

impl Document {
    /// Walks parent links up to the root and returns the element sitting
    /// directly below it. `None` for the root or a detached key.
    pub fn nearest_block_ancestor(&self, key: NodeKey) -> Option<NodeKey> {
        let mut current = key;
        loop {
            let node = self.node(current)?;
            let parent = node.parent()?;
            if parent.is_root() {
                return node.is_element().then_some(current);
            }
            current = parent;
        }
    }

    /// The closest `list` element at or above `key`.
    pub fn nearest_list_ancestor(&self, key: NodeKey) -> Option<NodeKey> {
        let mut current = Some(key);
        while let Some(key) = current {
            let node = self.node(key)?;
            if node.is_root() {
                return None;
            }
            if node.is_list() {
                return Some(key);
            }
            current = node.parent();
        }
        None
    }

    /// Type of the closest list around `key`.
    pub fn list_type_at(&self, key: NodeKey) -> Option<ListType> {
        self.nearest_list_ancestor(key)
            .and_then(|list| self.element(list))
            .and_then(|el| el.kind.list_type())
    }

    /// First explicit alignment at or above `key`, stopping at the root.
    pub fn computed_format(&self, key: NodeKey) -> ElementFormat {
        let mut current = Some(key);
        while let Some(key) = current {
            let Some(el) = self.element(key) else {
                break;
            };
            if el.format != ElementFormat::Unset {
                return el.format;
            }
            current = self.parent(key);
        }
        ElementFormat::Unset
    }

    fn position(&self, point: &Point) -> Option<Vec<usize>> {
        let mut path = self.path_of(point.key)?;
        path.push(point.offset);
        Some(path)
    }

    /// Document order of two points; `None` if either no longer resolves.
    pub fn compare_points(&self, a: &Point, b: &Point) -> Option<Ordering> {
        Some(self.position(a)?.cmp(&self.position(b)?))
    }

    pub fn is_forward(&self, selection: &Selection) -> bool {
        self.compare_points(&selection.anchor, &selection.focus) != Some(Ordering::Greater)
    }

    /// `(start, end)` in document order.
    pub fn ordered_points(&self, selection: &Selection) -> (Point, Point) {
        if self.is_forward(selection) {
            (selection.anchor.clone(), selection.focus.clone())
        } else {
            (selection.focus.clone(), selection.anchor.clone())
        }
    }

    pub(crate) fn validate_point(&self, point: &Point) -> Result<Point, EditorError> {
        let node = self
            .node(point.key)
            .ok_or(EditorError::InvalidSelection { key: point.key })?;
        if self.path_of(point.key).is_none() {
            return Err(EditorError::InvalidSelection { key: point.key });
        }
        let offset = match node.as_text() {
            Some(text) => clamp_to_char_boundary(&text.text, point.offset),
            None => point.offset.min(node.children().len()),
        };
        Ok(Point::new(point.key, offset))
    }

    pub(crate) fn validate_selection(&self, selection: &Selection) -> Result<Selection, EditorError> {
        let mut next = selection.clone();
        next.anchor = self.validate_point(&selection.anchor)?;
        next.focus = self.validate_point(&selection.focus)?;
        next.is_backward = !self.is_forward(&next);
        Ok(next)
    }

    pub(crate) fn current_selection(&self) -> Result<Option<Selection>, EditorError> {
        self.selection
            .as_ref()
            .map(|sel| self.validate_selection(sel))
            .transpose()
    }

    /// Replaces the selection after checking that both endpoints resolve.
    pub fn set_selection(&mut self, selection: Selection) -> Result<(), EditorError> {
        self.require_update()?;
        let next = self.validate_selection(&selection)?;
        if self.selection.as_ref() != Some(&next) {
            self.selection = Some(next);
            self.mark_selection_dirty();
        }
        Ok(())
    }

    pub fn clear_selection(&mut self) -> Result<(), EditorError> {
        self.require_update()?;
        if self.selection.take().is_some() {
            self.mark_selection_dirty();
        }
        Ok(())
    }

    /// Every text run overlapped by a non-collapsed selection, in document
    /// order, with the overlapped byte range. Zero-width touches at a run
    /// boundary do not count.
    pub fn selected_text_slices(&self, selection: &Selection) -> Result<Vec<TextSlice>, EditorError> {
        let selection = self.validate_selection(selection)?;
        if selection.is_collapsed() {
            return Ok(Vec::new());
        }
        let (start, end) = self.ordered_points(&selection);
        let (Some(start_pos), Some(end_pos)) = (self.position(&start), self.position(&end)) else {
            return Ok(Vec::new());
        };

        let mut slices = Vec::new();
        for key in self.text_nodes() {
            let (Some(text), Some(path)) = (self.text(key), self.path_of(key)) else {
                continue;
            };
            let len = text.text.len();
            let mut node_start = path.clone();
            node_start.push(0);
            let mut node_end = path;
            node_end.push(len);

            let local_start = if start_pos <= node_start {
                0
            } else if start_pos >= node_end {
                len
            } else {
                start.offset.min(len)
            };
            let local_end = if end_pos >= node_end {
                len
            } else if end_pos <= node_start {
                0
            } else {
                end.offset.min(len)
            };

            if local_start < local_end {
                slices.push(TextSlice {
                    key,
                    range: local_start..local_end,
                });
            }
        }
        Ok(slices)
    }

    fn top_level_index(&self, point: &Point) -> Option<usize> {
        let roots = self.root().children();
        if roots.is_empty() {
            return None;
        }
        if point.key.is_root() {
            return Some(point.offset.min(roots.len() - 1));
        }
        let block = self.nearest_block_ancestor(point.key)?;
        roots.iter().position(|k| *k == block)
    }

    /// Distinct top-level blocks touched by the selection, in order.
    pub fn intersected_blocks(&self, selection: &Selection) -> Result<Vec<NodeKey>, EditorError> {
        let selection = self.validate_selection(selection)?;
        let (start, end) = self.ordered_points(&selection);
        let (Some(first), Some(last)) = (self.top_level_index(&start), self.top_level_index(&end))
        else {
            return Ok(Vec::new());
        };
        Ok(self.root().children()[first..=last.max(first)].to_vec())
    }

    /// Format in effect at a caret: the pending format if one was toggled,
    /// otherwise the format of the run holding the caret.
    pub(crate) fn caret_format(&self, selection: &Selection) -> TextFormat {
        selection.format.unwrap_or_else(|| {
            self.text(selection.anchor.key)
                .map(|t| t.format)
                .unwrap_or_default()
        })
    }

    /// True iff a caret sits in a run with `format` set, or every run a
    /// ranged selection overlaps has it. Partial coverage is false.
    pub fn get_format_state(&self, selection: &Selection, format: TextFormat) -> bool {
        let Ok(selection) = self.validate_selection(selection) else {
            return false;
        };
        if selection.is_collapsed() {
            return self.caret_format(&selection).contains(format);
        }
        let Ok(slices) = self.selected_text_slices(&selection) else {
            return false;
        };
        slices
            .iter()
            .filter_map(|slice| self.text(slice.key))
            .map(|text| text.has_format(format))
            .collect::<Aggregate<bool>>()
            .uniform()
            .unwrap_or(false)
    }

    /// Style value shared by the whole selection, or `default` when runs
    /// disagree or none sets it.
    pub fn selection_style_value(&self, selection: &Selection, property: &str, default: &str) -> String {
        let Ok(selection) = self.validate_selection(selection) else {
            return default.to_string();
        };
        if selection.is_collapsed() {
            let pending = selection
                .style
                .as_ref()
                .and_then(|style| style.get(property).cloned());
            let value = pending.or_else(|| {
                self.text(selection.anchor.key)
                    .and_then(|t| t.style.get(property).cloned())
            });
            return value.unwrap_or_else(|| default.to_string());
        }
        let Ok(slices) = self.selected_text_slices(&selection) else {
            return default.to_string();
        };
        slices
            .iter()
            .filter_map(|slice| self.text(slice.key))
            .map(|text| text.style.get(property).cloned())
            .collect::<Aggregate<Option<String>>>()
            .uniform()
            .flatten()
            .unwrap_or_else(|| default.to_string())
    }
}
