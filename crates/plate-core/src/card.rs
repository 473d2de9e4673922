use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EditorConfig;
use crate::core::Editor;
use crate::dispatch::{CommandError, Subscriptions};
use crate::document::Document;
use crate::error::EditorError;
use crate::serialize::{Clock, HtmlBridge, SystemClock};
use crate::toolbar::{Toolbar, ToolbarAction};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardProps {
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub view_mode: bool,
}

/// Host surface around one editor: loads the initial HTML, wires toolbar,
/// history and export in editable mode, and renders read-only otherwise.
pub struct RichTextCard {
    editor: Editor,
    clock: Arc<dyn Clock>,
    toolbar: Option<Toolbar>,
    bridge: Option<HtmlBridge>,
    commands: Option<Subscriptions>,
    view_mode: bool,
    detached: bool,
}

impl RichTextCard {
    pub fn new(
        props: CardProps,
        config: EditorConfig,
        clock: Arc<dyn Clock>,
        on_change: impl FnMut(&str) -> anyhow::Result<()> + 'static,
    ) -> Self {
        let mut editor = Editor::new(config);

        // Loaded before anything observes the editor, so the initial content
        // is neither exported nor undoable.
        if !props.html.trim().is_empty() {
            if let Err(err) = editor.import_html(&props.html) {
                warn!(error = %err, "initial html could not be loaded");
            }
        }

        let mut card = Self {
            editor,
            clock: clock.clone(),
            toolbar: None,
            bridge: None,
            commands: None,
            view_mode: props.view_mode,
            detached: false,
        };

        if props.view_mode {
            card.editor.set_editable(false);
            debug!("card mounted in view mode");
            return card;
        }

        let mut commands = card.editor.mount_rich_text();
        commands.extend(card.editor.mount_history());
        card.commands = Some(commands);
        card.bridge = Some(HtmlBridge::attach(&mut card.editor, clock, on_change));
        card.toolbar = Some(Toolbar::mount(&mut card.editor));
        debug!("card mounted in edit mode");
        card
    }

    /// [`RichTextCard::new`] driven by wall-clock time.
    pub fn with_system_clock(
        props: CardProps,
        config: EditorConfig,
        on_change: impl FnMut(&str) -> anyhow::Result<()> + 'static,
    ) -> Self {
        Self::new(props, config, Arc::new(SystemClock), on_change)
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn doc(&self) -> &Document {
        self.editor.doc()
    }

    /// `None` in view mode and after detaching.
    pub fn toolbar(&self) -> Option<&Toolbar> {
        self.toolbar.as_ref()
    }

    pub fn bridge(&self) -> Option<&HtmlBridge> {
        self.bridge.as_ref()
    }

    pub fn is_view_mode(&self) -> bool {
        self.view_mode
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Runs a mutation as one transaction. Refused in view mode and after
    /// detaching.
    pub fn update<R>(
        &mut self,
        f: impl FnOnce(&mut Document) -> Result<R, EditorError>,
    ) -> Result<R, EditorError> {
        if self.view_mode || self.detached {
            return Err(EditorError::ReadOnly);
        }
        self.editor.update(f)
    }

    pub fn dispatch(&mut self, command: &str, payload: Option<Value>) -> Result<bool, CommandError> {
        self.editor.dispatch(command, payload)
    }

    pub fn apply(&mut self, action: ToolbarAction) -> Result<bool, CommandError> {
        match self.toolbar.as_ref() {
            Some(toolbar) => toolbar.apply(&mut self.editor, action),
            None => Ok(false),
        }
    }

    pub fn set_editable(&mut self, editable: bool) {
        if self.view_mode && editable {
            warn!("view-mode card cannot become editable");
            return;
        }
        self.editor.set_editable(editable);
    }

    /// Drives the debounced export with the card's clock. Returns true when
    /// the output callback ran.
    pub fn tick(&mut self) -> bool {
        let now = self.clock.now();
        match self.bridge.as_mut() {
            Some(bridge) => bridge.poll(&self.editor, now),
            None => false,
        }
    }

    /// Read-only rendering; same markup and classes as the export.
    pub fn render(&self) -> String {
        self.editor.export_html()
    }

    /// Cancels the pending export and releases every subscription. Later
    /// calls do nothing.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if let Some(mut bridge) = self.bridge.take() {
            bridge.detach();
        }
        if let Some(mut toolbar) = self.toolbar.take() {
            toolbar.unmount();
        }
        if let Some(commands) = self.commands.take() {
            commands.release();
        }
        debug!("card detached");
    }
}

impl Drop for RichTextCard {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for RichTextCard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RichTextCard")
            .field("editor", &self.editor)
            .field("view_mode", &self.view_mode)
            .field("detached", &self.detached)
            .finish()
    }
}
