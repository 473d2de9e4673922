use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tracing::{debug, trace};

use crate::core::Editor;
use crate::error::EditorError;

pub const SELECTION_CHANGE: &str = "editor.selection_change";
pub const DOCUMENT_UPDATED: &str = "editor.document_updated";
pub const EDITABLE_CHANGED: &str = "editor.editable_changed";
pub const CAN_UNDO: &str = "history.can_undo";
pub const CAN_REDO: &str = "history.can_redo";
pub const UNDO: &str = "history.undo";
pub const REDO: &str = "history.redo";
pub const FORMAT_TEXT: &str = "marks.format_text";
pub const SET_FONT_SIZE: &str = "marks.set_font_size";
pub const FORMAT_ELEMENT: &str = "block.format_element";
pub const SET_BLOCK_TYPE: &str = "block.set_block_type";
pub const INSERT_UNORDERED_LIST: &str = "list.insert_unordered";
pub const INSERT_ORDERED_LIST: &str = "list.insert_ordered";
pub const REMOVE_LIST: &str = "list.remove";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<EditorError> for CommandError {
    fn from(err: EditorError) -> Self {
        Self::new(err.to_string())
    }
}

/// Handlers with a higher priority run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandPriority {
    Editor,
    Low,
    Normal,
    High,
    Critical,
}

/// Returns `Ok(true)` when the command was handled, which stops
/// propagation to lower-priority handlers.
pub type CommandHandler =
    Arc<dyn Fn(&mut Editor, Option<&Value>) -> Result<bool, CommandError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

struct Entry {
    id: RegistrationId,
    command: String,
    priority: CommandPriority,
    handler: CommandHandler,
}

#[derive(Default)]
struct HandlerTable {
    next_id: u64,
    entries: Vec<Entry>,
}

impl HandlerTable {
    fn remove(&mut self, id: RegistrationId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        before != self.entries.len()
    }
}

fn lock(table: &Mutex<HandlerTable>) -> MutexGuard<'_, HandlerTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Prioritized command bus. Registration hands back a [`Subscription`]
/// that unregisters the handler when released or dropped.
#[derive(Default)]
pub struct CommandDispatcher {
    table: Arc<Mutex<HandlerTable>>,
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = lock(&self.table);
        f.debug_struct("CommandDispatcher")
            .field("handlers", &table.entries.len())
            .finish()
    }
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        command: &str,
        priority: CommandPriority,
        handler: impl Fn(&mut Editor, Option<&Value>) -> Result<bool, CommandError>
        + Send
        + Sync
        + 'static,
    ) -> Subscription {
        let mut table = lock(&self.table);
        table.next_id += 1;
        let id = RegistrationId(table.next_id);
        table.entries.push(Entry {
            id,
            command: command.to_string(),
            priority,
            handler: Arc::new(handler),
        });
        trace!(command, ?priority, ?id, "registered command handler");
        Subscription {
            id,
            table: Some(Arc::downgrade(&self.table)),
        }
    }

    /// Removes a registration. Returns false if it was already gone.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        lock(&self.table).remove(id)
    }

    pub fn is_registered(&self, id: RegistrationId) -> bool {
        lock(&self.table).entries.iter().any(|entry| entry.id == id)
    }

    pub fn handler_count(&self, command: &str) -> usize {
        lock(&self.table)
            .entries
            .iter()
            .filter(|entry| entry.command == command)
            .count()
    }

    /// Handlers for `command`, highest priority first; equal priorities keep
    /// registration order.
    pub(crate) fn handlers_for(&self, command: &str) -> Vec<(RegistrationId, CommandHandler)> {
        let table = lock(&self.table);
        let mut handlers: Vec<(CommandPriority, RegistrationId, CommandHandler)> = table
            .entries
            .iter()
            .filter(|entry| entry.command == command)
            .map(|entry| (entry.priority, entry.id, entry.handler.clone()))
            .collect();
        handlers.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        handlers
            .into_iter()
            .map(|(_, id, handler)| (id, handler))
            .collect()
    }
}

/// Live registration of one handler. Released exactly once, either
/// explicitly or on drop.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    id: RegistrationId,
    table: Option<Weak<Mutex<HandlerTable>>>,
}

impl Subscription {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Unregisters the handler. Returns false when the dispatcher was
    /// already gone.
    pub fn release(mut self) -> bool {
        self.unregister()
    }

    fn unregister(&mut self) -> bool {
        let Some(table) = self.table.take().and_then(|weak| weak.upgrade()) else {
            return false;
        };
        let removed = lock(&table).remove(self.id);
        if removed {
            trace!(id = ?self.id, "released command handler");
        }
        removed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("live", &self.table.is_some())
            .finish()
    }
}

/// A group of subscriptions torn down together.
#[must_use = "dropping Subscriptions unregisters every handler in the group"]
#[derive(Debug, Default)]
pub struct Subscriptions {
    items: Vec<Subscription>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.items.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Releases every member. Returns how many were still registered.
    pub fn release(self) -> usize {
        let count = self
            .items
            .into_iter()
            .map(Subscription::release)
            .filter(|removed| *removed)
            .count();
        debug!(count, "released subscriptions");
        count
    }
}

impl Extend<Subscription> for Subscriptions {
    fn extend<T: IntoIterator<Item = Subscription>>(&mut self, iter: T) {
        self.items.extend(iter);
    }
}

impl IntoIterator for Subscriptions {
    type Item = Subscription;
    type IntoIter = std::vec::IntoIter<Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl FromIterator<Subscription> for Subscriptions {
    fn from_iter<T: IntoIterator<Item = Subscription>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}
