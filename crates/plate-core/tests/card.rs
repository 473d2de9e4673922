use std::sync::{Arc, Mutex};

use plate_richtext_core::{
    BlockType, CAN_REDO, CAN_UNDO, CardProps, CommandPriority, EditorConfig, EditorError,
    FORMAT_TEXT, ManualClock, Point, RichTextCard, Selection, TextFormat, ToolbarAction, UNDO,
};
use serde_json::{Value, json};

const HTML: &str = "<h2>Notes</h2><ul><li>one</li><li>two</li></ul><p><b>bold</b> text</p>";

fn card(view_mode: bool) -> RichTextCard {
    RichTextCard::new(
        CardProps {
            html: HTML.to_string(),
            view_mode,
        },
        EditorConfig::default(),
        Arc::new(ManualClock::new()),
        |_html: &str| Ok(()),
    )
}

#[test]
fn props_deserialize_from_camel_case() {
    let props: CardProps =
        serde_json::from_value(json!({ "html": "<p>x</p>", "viewMode": true })).unwrap();
    assert!(props.view_mode);

    let defaults: CardProps = serde_json::from_value(json!({})).unwrap();
    assert_eq!(defaults, CardProps::default());
}

#[test]
fn view_mode_renders_read_only() {
    let mut view = card(true);
    let edit = card(false);

    assert!(view.is_view_mode());
    assert!(view.toolbar().is_none());
    assert!(view.bridge().is_none());
    assert!(!view.editor().is_editable());
    assert_eq!(view.render(), edit.render());
    assert!(view.render().contains(r#"<h2 class="editor-heading-h2">Notes</h2>"#));

    assert_eq!(view.dispatch(FORMAT_TEXT, Some(json!("bold"))), Ok(false));
    assert!(!view.apply(ToolbarAction::Undo).unwrap());
    assert_eq!(
        view.update(|doc| doc.insert_text("x")),
        Err(EditorError::ReadOnly)
    );

    view.set_editable(true);
    assert!(!view.editor().is_editable());
}

#[test]
fn edit_mode_mounts_toolbar_and_history() {
    let mut card = card(false);
    let toolbar = card.toolbar().expect("toolbar is mounted in edit mode");
    assert!(!toolbar.undo_enabled());
    assert!(!card.editor().can_undo());

    let key = card.doc().text_nodes()[0];
    card.update(|doc| doc.set_selection(Selection::caret(Point::new(key, 2))))
        .unwrap();
    assert_eq!(
        card.toolbar().map(|t| t.state().block_type),
        Some(BlockType::Heading2)
    );

    card.update(|doc| doc.insert_text("!")).unwrap();
    assert!(card.toolbar().is_some_and(|t| t.undo_enabled()));
}

#[test]
fn undo_and_redo_signal_availability() {
    let mut card = card(false);
    let signals: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut subscriptions = Vec::new();
    for command in [CAN_UNDO, CAN_REDO] {
        let signals = signals.clone();
        subscriptions.push(card.editor().register_command(
            command,
            CommandPriority::High,
            move |_editor, args| {
                signals
                    .lock()
                    .unwrap()
                    .push((command.to_string(), args.cloned().unwrap_or(Value::Null)));
                Ok(false)
            },
        ));
    }

    let key = card.doc().text_nodes()[3];
    card.update(|doc| {
        doc.set_selection(Selection::new(Point::new(key, 0), Point::new(key, 4)))?;
        doc.set_text_format(TextFormat::ITALIC)
    })
    .unwrap();
    assert_eq!(
        *signals.lock().unwrap(),
        vec![(CAN_UNDO.to_string(), json!(true))]
    );

    assert!(card.dispatch(UNDO, None).unwrap());
    assert_eq!(
        signals.lock().unwrap()[1..],
        [
            (CAN_UNDO.to_string(), json!(false)),
            (CAN_REDO.to_string(), json!(true)),
        ]
    );
    assert!(!card.render().contains("editor-text-italic"));

    assert!(card.apply(ToolbarAction::Redo).unwrap());
    assert!(card.render().contains("editor-text-italic"));
    assert!(card.toolbar().is_some_and(|t| t.undo_enabled() && !t.redo_enabled()));
}

#[test]
fn detach_releases_everything_once() {
    let mut card = card(false);
    assert!(card.editor().dispatcher().handler_count(FORMAT_TEXT) > 0);

    card.detach();
    card.detach();

    assert!(card.toolbar().is_none());
    assert_eq!(card.editor().dispatcher().handler_count(FORMAT_TEXT), 0);
    assert_eq!(card.dispatch(FORMAT_TEXT, Some(json!("bold"))), Ok(false));
}
