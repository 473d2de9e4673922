use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::config::EditorConfig;
use crate::dispatch::{
    CAN_REDO, CAN_UNDO, CommandDispatcher, CommandError, CommandPriority, DOCUMENT_UPDATED,
    EDITABLE_CHANGED, SELECTION_CHANGE, Subscription, Subscriptions,
};
use crate::document::{Commit, Document, DocumentSnapshot};
use crate::error::EditorError;
use crate::history::{History, SnapshotHistory};
use crate::plugin::{register_history_commands, register_rich_text_commands};
use crate::selection::Selection;

/// Owns the document, the command bus and the optional history, and
/// turns committed transactions into notifications.
pub struct Editor {
    doc: Document,
    dispatcher: CommandDispatcher,
    history: Option<Box<dyn History>>,
    config: EditorConfig,
    editable: bool,
    can_undo: bool,
    can_redo: bool,
    revision: u64,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new(EditorConfig::default())
    }
}

impl Editor {
    pub fn new(config: EditorConfig) -> Self {
        Self {
            doc: Document::new(),
            dispatcher: CommandDispatcher::new(),
            history: None,
            config: config.with_defaults(),
            editable: true,
            can_undo: false,
            can_redo: false,
            revision: 0,
        }
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.doc.selection()
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Bumped once per transaction that changed content.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn can_undo(&self) -> bool {
        self.can_undo
    }

    pub fn can_redo(&self) -> bool {
        self.can_redo
    }

    /// Read-only view of the document. No mutation is reachable from `f`.
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.doc)
    }

    /// Runs `f` as one update transaction. On error every change made by
    /// `f` is rolled back and nobody is notified; on success listeners are
    /// notified once with the final state.
    pub fn update<R>(
        &mut self,
        f: impl FnOnce(&mut Document) -> Result<R, EditorError>,
    ) -> Result<R, EditorError> {
        self.doc.begin_update()?;
        let before = self.doc.snapshot();
        match f(&mut self.doc) {
            Ok(value) => {
                let commit = self.doc.end_update();
                self.after_commit(before, commit, true);
                Ok(value)
            }
            Err(err) => {
                if let Err(restore_err) = self.doc.restore_snapshot(before) {
                    warn!(%restore_err, "failed to roll back update");
                }
                self.doc.end_update();
                debug!(%err, "update rolled back");
                Err(err)
            }
        }
    }

    pub fn set_selection(&mut self, selection: Selection) -> Result<(), EditorError> {
        self.update(|doc| doc.set_selection(selection))
    }

    fn after_commit(&mut self, before: DocumentSnapshot, commit: Commit, record: bool) {
        // Mutations that wrote back identical values are not content changes.
        let content_changed = commit.content_changed && !self.doc.content_matches(&before);
        if content_changed {
            self.revision += 1;
            if record {
                if let Some(history) = self.history.as_mut() {
                    history.record(before);
                }
            }
        }
        self.sync_history_flags();

        let notification = if content_changed {
            Some(DOCUMENT_UPDATED)
        } else if commit.selection_changed {
            Some(SELECTION_CHANGE)
        } else {
            None
        };
        if let Some(command) = notification {
            debug!(command, revision = self.revision, "transaction committed");
            if let Err(err) = self.dispatch(command, None) {
                warn!(command, error = %err, "commit listener failed");
            }
        }
    }

    /// Runs the handlers for `command` from highest priority down and stops
    /// at the first that reports it handled the command. Unknown commands
    /// are a no-op returning `Ok(false)`.
    pub fn dispatch(&mut self, command: &str, payload: Option<Value>) -> Result<bool, CommandError> {
        let handlers = self.dispatcher.handlers_for(command);
        if handlers.is_empty() {
            trace!(command, "no handler registered");
            return Ok(false);
        }
        for (id, handler) in handlers {
            // A handler earlier in this pass may have unregistered this one.
            if !self.dispatcher.is_registered(id) {
                continue;
            }
            if handler(self, payload.as_ref())? {
                trace!(command, ?id, "command handled");
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn register_command(
        &self,
        command: &str,
        priority: CommandPriority,
        handler: impl Fn(&mut Editor, Option<&Value>) -> Result<bool, CommandError>
        + Send
        + Sync
        + 'static,
    ) -> Subscription {
        self.dispatcher.register(command, priority, handler)
    }

    pub fn set_editable(&mut self, editable: bool) {
        if self.editable == editable {
            return;
        }
        self.editable = editable;
        debug!(editable, "editable state changed");
        if let Err(err) = self.dispatch(EDITABLE_CHANGED, Some(json!(editable))) {
            warn!(error = %err, "editable listener failed");
        }
    }

    /// Registers the formatting, list and block commands at `Editor`
    /// priority.
    pub fn mount_rich_text(&mut self) -> Subscriptions {
        register_rich_text_commands(&self.dispatcher)
    }

    /// Installs a snapshot history sized by `max_undo` and registers the
    /// undo/redo commands.
    pub fn mount_history(&mut self) -> Subscriptions {
        let history = SnapshotHistory::new(self.config.max_undo);
        self.set_history(Box::new(history));
        register_history_commands(&self.dispatcher)
    }

    pub fn set_history(&mut self, history: Box<dyn History>) {
        self.history = Some(history);
        self.sync_history_flags();
    }

    pub fn undo(&mut self) -> Result<bool, EditorError> {
        let current = self.doc.snapshot();
        let target = match self.history.as_mut() {
            Some(history) => history.undo(current),
            None => return Ok(false),
        };
        match target {
            Some(snapshot) => self.apply_snapshot(snapshot).map(|()| true),
            None => Ok(false),
        }
    }

    pub fn redo(&mut self) -> Result<bool, EditorError> {
        let current = self.doc.snapshot();
        let target = match self.history.as_mut() {
            Some(history) => history.redo(current),
            None => return Ok(false),
        };
        match target {
            Some(snapshot) => self.apply_snapshot(snapshot).map(|()| true),
            None => Ok(false),
        }
    }

    /// Restores a snapshot as a committed transaction that history does not
    /// record.
    fn apply_snapshot(&mut self, snapshot: DocumentSnapshot) -> Result<(), EditorError> {
        self.doc.begin_update()?;
        let before = self.doc.snapshot();
        if let Err(err) = self.doc.restore_snapshot(snapshot) {
            self.doc.end_update();
            return Err(err);
        }
        let commit = self.doc.end_update();
        self.after_commit(before, commit, false);
        Ok(())
    }

    fn sync_history_flags(&mut self) {
        let (can_undo, can_redo) = self
            .history
            .as_ref()
            .map(|h| (h.can_undo(), h.can_redo()))
            .unwrap_or((false, false));

        if can_undo != self.can_undo {
            self.can_undo = can_undo;
            if let Err(err) = self.dispatch(CAN_UNDO, Some(json!(can_undo))) {
                warn!(error = %err, "can-undo listener failed");
            }
        }
        if can_redo != self.can_redo {
            self.can_redo = can_redo;
            if let Err(err) = self.dispatch(CAN_REDO, Some(json!(can_redo))) {
                warn!(error = %err, "can-redo listener failed");
            }
        }
    }
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("doc", &self.doc)
            .field("dispatcher", &self.dispatcher)
            .field("editable", &self.editable)
            .field("can_undo", &self.can_undo)
            .field("can_redo", &self.can_redo)
            .field("revision", &self.revision)
            .finish()
    }
}
