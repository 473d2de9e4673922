use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::core::Editor;
use crate::dispatch::{
    CAN_REDO, CAN_UNDO, CommandError, CommandPriority, DOCUMENT_UPDATED, EDITABLE_CHANGED,
    FORMAT_ELEMENT, FORMAT_TEXT, INSERT_ORDERED_LIST, INSERT_UNORDERED_LIST, REDO, REMOVE_LIST,
    SELECTION_CHANGE, SET_BLOCK_TYPE, SET_FONT_SIZE, Subscriptions, UNDO,
};
use crate::document::{Document, ElementFormat, ElementKind, FONT_SIZE, ListType, TextFormat};
use crate::selection::Selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl Alignment {
    /// Unset and justify are drawn as left.
    pub fn from_element_format(format: ElementFormat) -> Self {
        match format {
            ElementFormat::Center => Alignment::Center,
            ElementFormat::Right => Alignment::Right,
            ElementFormat::Unset | ElementFormat::Left | ElementFormat::Justify => Alignment::Left,
        }
    }

    pub fn element_format(self) -> ElementFormat {
        match self {
            Alignment::Left => ElementFormat::Left,
            Alignment::Center => ElementFormat::Center,
            Alignment::Right => ElementFormat::Right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlockType {
    #[serde(rename = "bulleted-list")]
    BulletedList,
    #[serde(rename = "numbered-list")]
    NumberedList,
    #[serde(rename = "heading-1")]
    Heading1,
    #[serde(rename = "heading-2")]
    Heading2,
    #[serde(rename = "heading-3")]
    Heading3,
    #[serde(rename = "heading-4")]
    Heading4,
    #[serde(rename = "heading-5")]
    Heading5,
    #[default]
    #[serde(rename = "normal")]
    Normal,
}

impl BlockType {
    pub fn from_list_type(list_type: ListType) -> Self {
        match list_type {
            ListType::Bullet => BlockType::BulletedList,
            ListType::Number => BlockType::NumberedList,
        }
    }

    /// Unrecognized kinds classify as `Normal`.
    pub fn from_element_kind(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Heading(1) => BlockType::Heading1,
            ElementKind::Heading(2) => BlockType::Heading2,
            ElementKind::Heading(3) => BlockType::Heading3,
            ElementKind::Heading(4) => BlockType::Heading4,
            ElementKind::Heading(5) => BlockType::Heading5,
            ElementKind::List(list_type) => Self::from_list_type(list_type),
            _ => BlockType::Normal,
        }
    }

    pub fn heading_level(self) -> Option<u8> {
        match self {
            BlockType::Heading1 => Some(1),
            BlockType::Heading2 => Some(2),
            BlockType::Heading3 => Some(3),
            BlockType::Heading4 => Some(4),
            BlockType::Heading5 => Some(5),
            _ => None,
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, BlockType::BulletedList | BlockType::NumberedList)
    }
}

/// What the toolbar shows for the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolbarState {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub font_size: String,
    pub alignment: Alignment,
    pub block_type: BlockType,
}

impl ToolbarState {
    pub fn empty(default_font_size: &str) -> Self {
        Self {
            bold: false,
            italic: false,
            underline: false,
            strikethrough: false,
            font_size: default_font_size.to_string(),
            alignment: Alignment::Left,
            block_type: BlockType::Normal,
        }
    }
}

/// Derives toolbar state from the document and a selection. Never fails:
/// a missing, stale or root-anchored selection falls back to defaults.
pub fn derive_toolbar_state(
    doc: &Document,
    selection: Option<&Selection>,
    default_font_size: &str,
) -> ToolbarState {
    let mut state = ToolbarState::empty(default_font_size);
    let Some(selection) = selection else {
        return state;
    };
    let anchor = selection.anchor.key;
    let Some(anchor_node) = doc.node(anchor) else {
        trace!(%anchor, "toolbar derivation on a stale anchor");
        return state;
    };

    state.bold = doc.get_format_state(selection, TextFormat::BOLD);
    state.italic = doc.get_format_state(selection, TextFormat::ITALIC);
    state.underline = doc.get_format_state(selection, TextFormat::UNDERLINE);
    state.strikethrough = doc.get_format_state(selection, TextFormat::STRIKETHROUGH);
    state.font_size = doc.selection_style_value(selection, FONT_SIZE, default_font_size);

    if anchor_node.is_root() {
        return state;
    }

    let element = if anchor_node.is_element() {
        Some(anchor)
    } else {
        anchor_node.parent()
    };
    if let Some(element) = element {
        state.alignment = Alignment::from_element_format(doc.computed_format(element));
    }

    state.block_type = match doc.nearest_list_ancestor(anchor) {
        Some(list) => doc
            .element(list)
            .map(|el| BlockType::from_element_kind(el.kind))
            .unwrap_or_default(),
        None => doc
            .nearest_block_ancestor(anchor)
            .and_then(|block| doc.element(block))
            .map(|el| BlockType::from_element_kind(el.kind))
            .unwrap_or_default(),
    };
    state
}

/// A toolbar control press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolbarAction {
    Undo,
    Redo,
    Format(TextFormat),
    FontSize(String),
    Align(ElementFormat),
    BlockType(BlockType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolbarModel {
    pub state: ToolbarState,
    pub can_undo: bool,
    pub can_redo: bool,
    pub editable: bool,
    pub recompute_count: usize,
}

fn lock(model: &Mutex<ToolbarModel>) -> MutexGuard<'_, ToolbarModel> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

fn recompute(editor: &Editor, model: &Mutex<ToolbarModel>) {
    let default_font_size = editor.config().default_font_size.clone();
    let state = editor.read(|doc| derive_toolbar_state(doc, doc.selection(), &default_font_size));
    let mut model = lock(model);
    model.state = state;
    model.recompute_count += 1;
}

fn bool_payload(args: Option<&Value>) -> bool {
    args.and_then(Value::as_bool).unwrap_or(false)
}

/// Toolbar plugin: observes the editor at `Critical` priority without
/// consuming events and keeps the derived state current.
#[derive(Debug)]
pub struct Toolbar {
    model: Arc<Mutex<ToolbarModel>>,
    subscriptions: Option<Subscriptions>,
}

impl Toolbar {
    pub fn mount(editor: &mut Editor) -> Self {
        let model = Arc::new(Mutex::new(ToolbarModel {
            state: ToolbarState::empty(&editor.config().default_font_size),
            can_undo: editor.can_undo(),
            can_redo: editor.can_redo(),
            editable: editor.is_editable(),
            recompute_count: 0,
        }));
        recompute(editor, &model);

        let mut subscriptions = Subscriptions::new();
        for command in [SELECTION_CHANGE, DOCUMENT_UPDATED] {
            let model = model.clone();
            subscriptions.push(editor.register_command(
                command,
                CommandPriority::Critical,
                move |editor, _args| {
                    recompute(editor, &model);
                    Ok(false)
                },
            ));
        }

        let editable_model = model.clone();
        subscriptions.push(editor.register_command(
            EDITABLE_CHANGED,
            CommandPriority::Critical,
            move |_editor, args| {
                lock(&editable_model).editable = bool_payload(args);
                Ok(false)
            },
        ));
        let undo_model = model.clone();
        subscriptions.push(editor.register_command(
            CAN_UNDO,
            CommandPriority::Critical,
            move |_editor, args| {
                lock(&undo_model).can_undo = bool_payload(args);
                Ok(false)
            },
        ));
        let redo_model = model.clone();
        subscriptions.push(editor.register_command(
            CAN_REDO,
            CommandPriority::Critical,
            move |_editor, args| {
                lock(&redo_model).can_redo = bool_payload(args);
                Ok(false)
            },
        ));

        debug!(subscriptions = subscriptions.len(), "toolbar mounted");
        Self {
            model,
            subscriptions: Some(subscriptions),
        }
    }

    pub fn state(&self) -> ToolbarState {
        lock(&self.model).state.clone()
    }

    pub fn model(&self) -> ToolbarModel {
        lock(&self.model).clone()
    }

    pub fn undo_enabled(&self) -> bool {
        let model = lock(&self.model);
        model.can_undo && model.editable
    }

    pub fn redo_enabled(&self) -> bool {
        let model = lock(&self.model);
        model.can_redo && model.editable
    }

    pub fn recompute_count(&self) -> usize {
        lock(&self.model).recompute_count
    }

    pub fn is_mounted(&self) -> bool {
        self.subscriptions.is_some()
    }

    /// Dispatches the command behind a control. Disabled controls (read-only
    /// editor, unavailable undo/redo) do nothing and return `Ok(false)`.
    pub fn apply(&self, editor: &mut Editor, action: ToolbarAction) -> Result<bool, CommandError> {
        let model = self.model();
        if !self.is_mounted() || !model.editable {
            return Ok(false);
        }
        match action {
            ToolbarAction::Undo if model.can_undo => editor.dispatch(UNDO, None),
            ToolbarAction::Redo if model.can_redo => editor.dispatch(REDO, None),
            ToolbarAction::Undo | ToolbarAction::Redo => Ok(false),
            ToolbarAction::Format(format) => {
                let name = TextFormat::NAMED
                    .iter()
                    .find(|(_, bit)| *bit == format)
                    .map(|(name, _)| *name)
                    .ok_or_else(|| CommandError::new("Toolbar formats one mark at a time"))?;
                editor.dispatch(FORMAT_TEXT, Some(json!(name)))
            }
            ToolbarAction::FontSize(size) => editor.dispatch(SET_FONT_SIZE, Some(json!(size))),
            ToolbarAction::Align(format) => {
                let name = format.css_value().unwrap_or("left");
                editor.dispatch(FORMAT_ELEMENT, Some(json!(name)))
            }
            ToolbarAction::BlockType(block_type) => {
                let active = model.state.block_type;
                match block_type {
                    BlockType::BulletedList | BlockType::NumberedList if active == block_type => {
                        editor.dispatch(REMOVE_LIST, None)
                    }
                    BlockType::BulletedList => editor.dispatch(INSERT_UNORDERED_LIST, None),
                    BlockType::NumberedList => editor.dispatch(INSERT_ORDERED_LIST, None),
                    BlockType::Normal if active.is_list() => editor.dispatch(REMOVE_LIST, None),
                    BlockType::Normal => editor.dispatch(SET_BLOCK_TYPE, Some(json!("paragraph"))),
                    heading => {
                        let level = heading.heading_level().unwrap_or(1);
                        editor.dispatch(SET_BLOCK_TYPE, Some(json!(format!("h{level}"))))
                    }
                }
            }
        }
    }

    /// Releases every observer. Safe to call more than once; later calls
    /// release nothing and return 0.
    pub fn unmount(&mut self) -> usize {
        match self.subscriptions.take() {
            Some(subscriptions) => {
                let released = subscriptions.release();
                debug!(released, "toolbar unmounted");
                released
            }
            None => 0,
        }
    }
}
