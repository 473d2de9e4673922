use serde_json::Value;
use tracing::debug;

use crate::dispatch::{
    CommandDispatcher, CommandError, CommandPriority, FORMAT_ELEMENT, FORMAT_TEXT,
    INSERT_ORDERED_LIST, INSERT_UNORDERED_LIST, REDO, REMOVE_LIST, SET_BLOCK_TYPE, SET_FONT_SIZE,
    Subscriptions, UNDO,
};
use crate::document::{ElementFormat, ElementKind, ListType, TextFormat};

/// Reads a string payload given either bare or as `{ key: "..." }`.
fn str_arg<'a>(args: Option<&'a Value>, key: &str) -> Result<&'a str, CommandError> {
    let value = args.ok_or_else(|| CommandError::new(format!("Missing args.{key}")))?;
    value
        .as_str()
        .or_else(|| value.get(key).and_then(Value::as_str))
        .ok_or_else(|| CommandError::new(format!("Expected a string for args.{key}")))
}

fn parse_block_type(name: &str) -> Option<ElementKind> {
    let name = name.trim().to_ascii_lowercase();
    match name.as_str() {
        "paragraph" | "normal" | "p" => Some(ElementKind::Paragraph),
        _ => {
            let level = name
                .strip_prefix("heading-")
                .or_else(|| name.strip_prefix('h'))?
                .parse::<u8>()
                .ok()?;
            (1..=ElementKind::MAX_HEADING_LEVEL)
                .contains(&level)
                .then(|| ElementKind::heading(level))
        }
    }
}

/// Registers the mutation commands at `Editor` priority. Every handler is
/// a no-op (not handled) while the editor is read-only.
pub fn register_rich_text_commands(dispatcher: &CommandDispatcher) -> Subscriptions {
    let mut subscriptions = Subscriptions::new();

    subscriptions.push(dispatcher.register(
        FORMAT_TEXT,
        CommandPriority::Editor,
        |editor, args| {
            if !editor.is_editable() {
                return Ok(false);
            }
            let name = str_arg(args, "format")?;
            let format = TextFormat::from_name(name)
                .ok_or_else(|| CommandError::new(format!("Unknown text format: {name}")))?;
            editor.update(|doc| doc.set_text_format(format))?;
            Ok(true)
        },
    ));

    subscriptions.push(dispatcher.register(
        FORMAT_ELEMENT,
        CommandPriority::Editor,
        |editor, args| {
            if !editor.is_editable() {
                return Ok(false);
            }
            let format = match args {
                Some(Value::Number(code)) => code
                    .as_u64()
                    .and_then(|code| u8::try_from(code).ok())
                    .and_then(ElementFormat::from_code),
                _ => ElementFormat::from_name(str_arg(args, "align")?),
            }
            .ok_or_else(|| CommandError::new("Unknown element format"))?;
            let written = editor.update(|doc| doc.set_element_format(format))?;
            debug!(?format, written, "formatted blocks");
            Ok(true)
        },
    ));

    subscriptions.push(dispatcher.register(
        SET_FONT_SIZE,
        CommandPriority::Editor,
        |editor, args| {
            if !editor.is_editable() {
                return Ok(false);
            }
            let requested = str_arg(args, "size")?;
            let size = editor.config().font_sizes.resolve(requested).to_string();
            editor.update(|doc| doc.set_font_size(&size))?;
            Ok(true)
        },
    ));

    subscriptions.push(dispatcher.register(
        SET_BLOCK_TYPE,
        CommandPriority::Editor,
        |editor, args| {
            if !editor.is_editable() {
                return Ok(false);
            }
            let name = str_arg(args, "type")?;
            let kind = parse_block_type(name)
                .ok_or_else(|| CommandError::new(format!("Unknown block type: {name}")))?;
            editor.update(|doc| doc.set_block_type(kind))?;
            Ok(true)
        },
    ));

    for (command, list_type) in [
        (INSERT_UNORDERED_LIST, ListType::Bullet),
        (INSERT_ORDERED_LIST, ListType::Number),
    ] {
        subscriptions.push(dispatcher.register(
            command,
            CommandPriority::Editor,
            move |editor, _args| {
                if !editor.is_editable() {
                    return Ok(false);
                }
                editor.update(|doc| doc.insert_list(list_type))?;
                Ok(true)
            },
        ));
    }

    subscriptions.push(dispatcher.register(
        REMOVE_LIST,
        CommandPriority::Editor,
        |editor, _args| {
            if !editor.is_editable() {
                return Ok(false);
            }
            editor.update(|doc| doc.remove_list())?;
            Ok(true)
        },
    ));

    subscriptions
}

pub fn register_history_commands(dispatcher: &CommandDispatcher) -> Subscriptions {
    let mut subscriptions = Subscriptions::new();
    subscriptions.push(dispatcher.register(UNDO, CommandPriority::Editor, |editor, _args| {
        if !editor.is_editable() {
            return Ok(false);
        }
        editor.undo()?;
        Ok(true)
    }));
    subscriptions.push(dispatcher.register(REDO, CommandPriority::Editor, |editor, _args| {
        if !editor.is_editable() {
            return Ok(false);
        }
        editor.redo()?;
        Ok(true)
    }));
    subscriptions
}
