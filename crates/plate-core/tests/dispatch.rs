use std::sync::{Arc, Mutex};

use plate_richtext_core::{
    CommandDispatcher, CommandError, CommandPriority, DOCUMENT_UPDATED, Editor, FORMAT_TEXT,
    NodeTemplate, Point, SELECTION_CHANGE, Selection, Subscription, Subscriptions,
};
use serde_json::json;

fn recorder() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(
    editor: &Editor,
    log: &Arc<Mutex<Vec<String>>>,
    command: &str,
    priority: CommandPriority,
    name: &'static str,
    handled: bool,
) -> Subscription {
    let log = log.clone();
    editor.register_command(command, priority, move |_editor, _args| {
        log.lock().unwrap().push(name.to_string());
        Ok(handled)
    })
}

#[test]
fn handlers_run_by_priority_and_stop_when_handled() {
    let log = recorder();
    let mut editor = Editor::default();
    let _low = record(&editor, &log, "custom", CommandPriority::Low, "low", false);
    let _critical = record(&editor, &log, "custom", CommandPriority::Critical, "critical", false);
    let _first = record(&editor, &log, "custom", CommandPriority::Normal, "normal-1", true);
    let _second = record(&editor, &log, "custom", CommandPriority::Normal, "normal-2", true);

    assert!(editor.dispatch("custom", None).unwrap());
    assert_eq!(
        *log.lock().unwrap(),
        vec!["critical".to_string(), "normal-1".to_string()]
    );
}

#[test]
fn unhandled_command_visits_every_handler() {
    let log = recorder();
    let mut editor = Editor::default();
    let _a = record(&editor, &log, "custom", CommandPriority::Editor, "editor", false);
    let _b = record(&editor, &log, "custom", CommandPriority::High, "high", false);

    assert!(!editor.dispatch("custom", Some(json!({ "any": 1 }))).unwrap());
    assert_eq!(
        *log.lock().unwrap(),
        vec!["high".to_string(), "editor".to_string()]
    );
}

#[test]
fn unknown_command_is_a_no_op() {
    let mut editor = Editor::default();
    assert_eq!(editor.dispatch("nobody.listens", None), Ok(false));
}

#[test]
fn handler_errors_propagate() {
    let mut editor = Editor::default();
    let _sub = editor.register_command("broken", CommandPriority::Normal, |_editor, _args| {
        Err(CommandError::new("boom"))
    });

    let err = editor.dispatch("broken", None).unwrap_err();
    assert_eq!(err.message(), "boom");
}

#[test]
fn releasing_is_idempotent() {
    let dispatcher = CommandDispatcher::new();
    let sub = dispatcher.register("custom", CommandPriority::Normal, |_editor, _args| Ok(true));
    let id = sub.id();
    assert!(dispatcher.is_registered(id));

    assert!(sub.release());
    assert!(!dispatcher.is_registered(id));
    assert!(!dispatcher.unregister(id));
    assert_eq!(dispatcher.handler_count("custom"), 0);
}

#[test]
fn dropping_a_subscription_unregisters() {
    let dispatcher = CommandDispatcher::new();
    {
        let _sub = dispatcher.register("custom", CommandPriority::Normal, |_editor, _args| Ok(true));
        assert_eq!(dispatcher.handler_count("custom"), 1);
    }
    assert_eq!(dispatcher.handler_count("custom"), 0);
}

#[test]
fn subscription_outliving_dispatcher_releases_nothing() {
    let dispatcher = CommandDispatcher::new();
    let sub = dispatcher.register("custom", CommandPriority::Normal, |_editor, _args| Ok(true));
    drop(dispatcher);
    assert!(!sub.release());
}

#[test]
fn group_release_counts_live_members() {
    let dispatcher = CommandDispatcher::new();
    let mut group = Subscriptions::new();
    group.push(dispatcher.register("a", CommandPriority::Normal, |_editor, _args| Ok(true)));
    group.push(dispatcher.register("b", CommandPriority::Normal, |_editor, _args| Ok(true)));
    let early = dispatcher.register("c", CommandPriority::Normal, |_editor, _args| Ok(true));
    let id = early.id();
    group.push(early);
    assert!(dispatcher.unregister(id));

    assert_eq!(group.len(), 3);
    assert_eq!(group.release(), 2);
    assert_eq!(dispatcher.handler_count("a") + dispatcher.handler_count("b"), 0);
}

#[test]
fn handler_unregistered_mid_dispatch_is_skipped() {
    let log = recorder();
    let mut editor = Editor::default();
    let victim = record(&editor, &log, "custom", CommandPriority::Low, "victim", true);
    let victim_id = victim.id();
    let _killer = editor.register_command("custom", CommandPriority::High, move |editor, _args| {
        editor.dispatcher().unregister(victim_id);
        Ok(false)
    });

    assert!(!editor.dispatch("custom", None).unwrap());
    assert!(log.lock().unwrap().is_empty());
    drop(victim);
}

#[test]
fn one_notification_per_transaction() {
    let log = recorder();
    let mut editor = Editor::default();
    let _updated = record(&editor, &log, DOCUMENT_UPDATED, CommandPriority::Critical, "updated", false);
    let _selection = record(&editor, &log, SELECTION_CHANGE, CommandPriority::Critical, "selection", false);

    editor
        .update(|doc| {
            doc.insert_nodes(vec![NodeTemplate::paragraph("one")])?;
            doc.insert_nodes(vec![NodeTemplate::paragraph("two")])?;
            doc.insert_text("!")
        })
        .unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["updated".to_string()]);

    let key = editor.doc().text_nodes()[0];
    editor
        .set_selection(Selection::caret(Point::new(key, 0)))
        .unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["updated".to_string(), "selection".to_string()]
    );

    editor.update(|_doc| Ok(())).unwrap();
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn remounting_rich_text_does_not_duplicate_handlers() {
    let mut editor = Editor::default();
    let first = editor.mount_rich_text();
    assert_eq!(editor.dispatcher().handler_count(FORMAT_TEXT), 1);

    assert_eq!(first.release(), 7);
    let _second = editor.mount_rich_text();
    assert_eq!(editor.dispatcher().handler_count(FORMAT_TEXT), 1);
}
