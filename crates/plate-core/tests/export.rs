use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use plate_richtext_core::{
    CardProps, Clock, Editor, EditorConfig, FORMAT_ELEMENT, HtmlBridge, ManualClock, Point,
    RichTextCard, Selection, TextFormat,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn card_with(html: &str, clock: &ManualClock) -> (RichTextCard, Rc<RefCell<Vec<String>>>) {
    let exports = Rc::new(RefCell::new(Vec::new()));
    let sink = exports.clone();
    let card = RichTextCard::new(
        CardProps {
            html: html.to_string(),
            view_mode: false,
        },
        EditorConfig::default(),
        Arc::new(clock.clone()),
        move |html: &str| {
            sink.borrow_mut().push(html.to_string());
            Ok(())
        },
    );
    (card, exports)
}

#[test]
fn burst_of_edits_exports_once_with_the_final_state() {
    let clock = ManualClock::new();
    let (mut card, exports) = card_with("<p>start</p>", &clock);

    for _ in 0..5 {
        card.update(|doc| doc.insert_text("a")).unwrap();
        clock.advance(Duration::from_millis(300));
        assert!(!card.tick());
    }
    assert!(exports.borrow().is_empty());

    clock.advance(Duration::from_millis(1000));
    assert!(card.tick());
    assert_eq!(
        *exports.borrow(),
        vec![r#"<p class="editor-paragraph">startaaaaa</p>"#.to_string()]
    );

    clock.advance(Duration::from_secs(5));
    assert!(!card.tick());
    assert_eq!(exports.borrow().len(), 1);
}

#[test]
fn initial_content_is_not_exported() {
    let clock = ManualClock::new();
    let (mut card, exports) = card_with("<p>start</p>", &clock);

    clock.advance(Duration::from_secs(2));
    assert!(!card.tick());
    assert!(exports.borrow().is_empty());
    assert!(card.bridge().is_some_and(|bridge| bridge.pending_deadline().is_none()));
}

#[test]
fn selection_changes_do_not_schedule_an_export() {
    let clock = ManualClock::new();
    let (mut card, exports) = card_with("<p>start</p>", &clock);
    let key = card.doc().text_nodes()[0];

    card.update(|doc| doc.set_selection(Selection::caret(Point::new(key, 1))))
        .unwrap();
    clock.advance(Duration::from_secs(2));

    assert!(!card.tick());
    assert!(exports.borrow().is_empty());
}

#[test]
fn detaching_cancels_the_pending_export() {
    let clock = ManualClock::new();
    let (mut card, exports) = card_with("<p>start</p>", &clock);

    card.update(|doc| doc.insert_text("!")).unwrap();
    card.detach();
    card.detach();
    clock.advance(Duration::from_secs(2));

    assert!(!card.tick());
    assert!(exports.borrow().is_empty());
    assert!(card.is_detached());
    assert!(card.update(|doc| doc.insert_text("?")).is_err());
}

#[test]
fn no_op_format_neither_exports_nor_records_history() {
    let clock = ManualClock::new();
    let (mut card, exports) = card_with(r#"<p style="text-align: center">x</p>"#, &clock);
    let key = card.doc().text_nodes()[0];
    card.update(|doc| doc.set_selection(Selection::caret(Point::new(key, 0))))
        .unwrap();
    let revision = card.editor().revision();

    assert!(card.dispatch(FORMAT_ELEMENT, Some(json!("center"))).unwrap());
    assert_eq!(card.editor().revision(), revision);
    assert!(!card.editor().can_undo());

    clock.advance(Duration::from_millis(1000));
    assert!(!card.tick());
    assert!(exports.borrow().is_empty());
}

#[test]
fn change_reverted_within_the_window_is_not_exported() {
    let clock = ManualClock::new();
    let (mut card, exports) = card_with("<p>start</p>", &clock);
    let key = card.doc().text_nodes()[0];

    card.update(|doc| {
        doc.set_selection(Selection::new(Point::new(key, 0), Point::new(key, 5)))?;
        doc.set_text_format(TextFormat::BOLD)
    })
    .unwrap();
    card.update(|doc| doc.set_text_format(TextFormat::BOLD))
        .unwrap();
    clock.advance(Duration::from_millis(1000));

    assert!(!card.tick());
    assert!(exports.borrow().is_empty());
    assert_eq!(card.bridge().map(|bridge| bridge.export_count()), Some(0));
}

#[test]
fn system_clock_card_waits_for_the_quiet_window() {
    let exports = Rc::new(RefCell::new(0usize));
    let sink = exports.clone();
    let mut card = RichTextCard::with_system_clock(
        CardProps {
            html: "<p>start</p>".to_string(),
            view_mode: false,
        },
        EditorConfig::default(),
        move |_html: &str| {
            *sink.borrow_mut() += 1;
            Ok(())
        },
    );

    card.update(|doc| doc.insert_text("!")).unwrap();
    assert!(card.bridge().is_some_and(|bridge| bridge.pending_deadline().is_some()));
    assert!(!card.tick());
    assert_eq!(*exports.borrow(), 0);
}

#[test]
fn unchanged_html_is_not_sent_again() {
    let clock = ManualClock::new();
    let (mut card, exports) = card_with("<p>start</p>", &clock);
    let key = card.doc().text_nodes()[0];

    card.update(|doc| doc.insert_text("!")).unwrap();
    clock.advance(Duration::from_millis(1000));
    assert!(card.tick());

    card.update(|doc| {
        doc.set_selection(Selection::new(Point::new(key, 0), Point::new(key, 6)))?;
        doc.set_text_format(TextFormat::BOLD)
    })
    .unwrap();
    card.update(|doc| doc.set_text_format(TextFormat::BOLD))
        .unwrap();
    clock.advance(Duration::from_millis(1000));

    assert!(!card.tick());
    assert_eq!(exports.borrow().len(), 1);
}

#[test]
fn failing_callback_does_not_block_the_editor() {
    init_tracing();
    let clock = ManualClock::new();
    let attempts = Rc::new(RefCell::new(0usize));
    let counter = attempts.clone();
    let mut editor = Editor::default();
    let mut bridge = HtmlBridge::attach(&mut editor, Arc::new(clock.clone()), move |_html: &str| {
        *counter.borrow_mut() += 1;
        anyhow::bail!("disk full")
    });

    editor.update(|doc| doc.insert_text("a")).unwrap();
    clock.advance(Duration::from_millis(1000));
    assert!(bridge.poll(&editor, clock.now()));
    assert_eq!(*attempts.borrow(), 1);

    // Not retried until the next change.
    clock.advance(Duration::from_millis(1000));
    assert!(!bridge.poll(&editor, clock.now()));

    editor.update(|doc| doc.insert_text("b")).unwrap();
    clock.advance(Duration::from_millis(1000));
    assert!(bridge.poll(&editor, clock.now()));
    assert_eq!(*attempts.borrow(), 2);
    assert_eq!(bridge.export_count(), 2);
    assert_eq!(editor.doc().text_content(), "ab");
}

#[test]
fn configured_quiet_window_is_honored() {
    let clock = ManualClock::new();
    let config = EditorConfig::from_json_str(r#"{ "export_debounce_ms": 250 }"#).unwrap();
    let mut editor = Editor::new(config);
    let exports = Rc::new(RefCell::new(0usize));
    let sink = exports.clone();
    let mut bridge = HtmlBridge::attach(&mut editor, Arc::new(clock.clone()), move |_html: &str| {
        *sink.borrow_mut() += 1;
        Ok(())
    });

    editor.update(|doc| doc.insert_text("a")).unwrap();
    clock.advance(Duration::from_millis(249));
    assert!(!bridge.poll(&editor, clock.now()));
    clock.advance(Duration::from_millis(1));
    assert!(bridge.poll(&editor, clock.now()));
    assert_eq!(*exports.borrow(), 1);

    bridge.detach();
    assert!(!bridge.is_attached());
    editor.update(|doc| doc.insert_text("b")).unwrap();
    clock.advance(Duration::from_secs(1));
    assert!(!bridge.poll(&editor, clock.now()));
}
