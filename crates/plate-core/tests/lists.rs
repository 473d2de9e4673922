use plate_richtext_core::{
    Editor, ElementFormat, ElementKind, INSERT_ORDERED_LIST, INSERT_UNORDERED_LIST, ListType,
    NodeTemplate, Point, REMOVE_LIST, Selection,
};

fn kinds(editor: &Editor) -> Vec<ElementKind> {
    let doc = editor.doc();
    doc.root()
        .children()
        .iter()
        .filter_map(|key| doc.element(*key).map(|el| el.kind))
        .collect()
}

fn editor_with(blocks: Vec<NodeTemplate>) -> Editor {
    let mut editor = Editor::default();
    editor.update(|doc| doc.insert_nodes(blocks)).unwrap();
    editor
}

fn select_all_text(editor: &mut Editor) {
    let keys = editor.doc().text_nodes();
    let (first, last) = (keys[0], keys[keys.len() - 1]);
    let len = editor.doc().text(last).map(|t| t.text.len()).unwrap_or(0);
    editor
        .set_selection(Selection::new(Point::new(first, 0), Point::new(last, len)))
        .unwrap();
}

#[test]
fn toggle_list_twice_returns_to_paragraph() {
    let mut editor = editor_with(vec![NodeTemplate::paragraph("item")]);
    let key = editor.doc().text_nodes()[0];

    editor.update(|doc| doc.toggle_list(ListType::Number)).unwrap();
    assert_eq!(kinds(&editor), vec![ElementKind::List(ListType::Number)]);
    let item = editor.doc().parent(key).unwrap();
    assert_eq!(
        editor.doc().element(item).map(|el| el.kind),
        Some(ElementKind::ListItem)
    );

    editor.update(|doc| doc.toggle_list(ListType::Number)).unwrap();
    assert_eq!(kinds(&editor), vec![ElementKind::Paragraph]);
    assert_eq!(editor.doc().text_content(), "item");
    assert_eq!(editor.selection().unwrap().anchor.key, key);
}

#[test]
fn wrapping_groups_consecutive_blocks_into_one_list() {
    let mut editor = editor_with(vec![
        NodeTemplate::paragraph("one"),
        NodeTemplate::element(ElementKind::heading(2), vec![NodeTemplate::text("two")]),
        NodeTemplate::paragraph("three"),
    ]);
    select_all_text(&mut editor);

    editor.update(|doc| doc.toggle_list(ListType::Bullet)).unwrap();

    assert_eq!(kinds(&editor), vec![ElementKind::List(ListType::Bullet)]);
    let list = editor.doc().root().children()[0];
    assert_eq!(editor.doc().children(list).len(), 3);
    assert_eq!(editor.doc().text_content(), "one\ntwo\nthree");
}

#[test]
fn toggling_another_type_retypes_the_list() {
    let mut editor = editor_with(vec![NodeTemplate::paragraph("item")]);
    editor.update(|doc| doc.toggle_list(ListType::Bullet)).unwrap();
    editor.update(|doc| doc.toggle_list(ListType::Number)).unwrap();

    assert_eq!(kinds(&editor), vec![ElementKind::List(ListType::Number)]);
}

#[test]
fn insert_commands_never_unwrap() {
    let mut editor = editor_with(vec![NodeTemplate::paragraph("item")]);
    let _commands = editor.mount_rich_text();

    assert!(editor.dispatch(INSERT_ORDERED_LIST, None).unwrap());
    assert!(editor.dispatch(INSERT_ORDERED_LIST, None).unwrap());
    assert_eq!(kinds(&editor), vec![ElementKind::List(ListType::Number)]);

    assert!(editor.dispatch(INSERT_UNORDERED_LIST, None).unwrap());
    assert_eq!(kinds(&editor), vec![ElementKind::List(ListType::Bullet)]);

    assert!(editor.dispatch(REMOVE_LIST, None).unwrap());
    assert_eq!(kinds(&editor), vec![ElementKind::Paragraph]);
}

fn nested_lists() -> Editor {
    editor_with(vec![NodeTemplate::element(
        ElementKind::List(ListType::Bullet),
        vec![NodeTemplate::element(
            ElementKind::ListItem,
            vec![
                NodeTemplate::text("outer"),
                NodeTemplate::element(
                    ElementKind::List(ListType::Number),
                    vec![NodeTemplate::element(
                        ElementKind::ListItem,
                        vec![NodeTemplate::text("inner")],
                    )],
                ),
            ],
        )],
    )])
}

#[test]
fn toggle_uses_the_list_closest_to_the_caret() {
    let mut editor = nested_lists();
    let inner = editor.doc().text_nodes()[1];
    editor
        .set_selection(Selection::caret(Point::new(inner, 1)))
        .unwrap();

    editor.update(|doc| doc.toggle_list(ListType::Number)).unwrap();

    assert_eq!(
        kinds(&editor),
        vec![ElementKind::Paragraph, ElementKind::Paragraph]
    );
    assert_eq!(editor.doc().text_content(), "outer\ninner");
}

#[test]
fn toggle_from_the_outer_list_retypes_it() {
    let mut editor = nested_lists();
    let outer = editor.doc().text_nodes()[0];
    editor
        .set_selection(Selection::caret(Point::new(outer, 1)))
        .unwrap();

    editor.update(|doc| doc.toggle_list(ListType::Number)).unwrap();

    assert_eq!(kinds(&editor), vec![ElementKind::List(ListType::Number)]);
}

#[test]
fn removing_a_nested_list_flattens_every_level() {
    let mut editor = editor_with(vec![NodeTemplate::element(
        ElementKind::List(ListType::Bullet),
        vec![
            NodeTemplate::element(
                ElementKind::ListItem,
                vec![
                    NodeTemplate::text("outer"),
                    NodeTemplate::element(
                        ElementKind::List(ListType::Number),
                        vec![NodeTemplate::element(
                            ElementKind::ListItem,
                            vec![NodeTemplate::text("inner")],
                        )],
                    ),
                ],
            ),
            NodeTemplate::element(ElementKind::ListItem, vec![NodeTemplate::text("last")]),
        ],
    )]);
    let inner = editor.doc().text_nodes()[1];
    editor
        .set_selection(Selection::caret(Point::new(inner, 2)))
        .unwrap();

    editor.update(|doc| doc.remove_list()).unwrap();

    assert_eq!(
        kinds(&editor),
        vec![
            ElementKind::Paragraph,
            ElementKind::Paragraph,
            ElementKind::Paragraph
        ]
    );
    assert_eq!(editor.doc().text_content(), "outer\ninner\nlast");
    assert_eq!(editor.selection().unwrap().anchor, Point::new(inner, 2));
}

#[test]
fn unwrapped_items_inherit_list_alignment() {
    let mut editor = editor_with(vec![
        NodeTemplate::element(
            ElementKind::List(ListType::Bullet),
            vec![NodeTemplate::element(
                ElementKind::ListItem,
                vec![NodeTemplate::text("centered")],
            )],
        )
        .with_format(ElementFormat::Center),
    ]);

    editor.update(|doc| doc.remove_list()).unwrap();

    let block = editor.doc().root().children()[0];
    assert_eq!(
        editor.doc().element(block).map(|el| el.format),
        Some(ElementFormat::Center)
    );
}

#[test]
fn remove_list_outside_a_list_changes_nothing() {
    let mut editor = editor_with(vec![NodeTemplate::paragraph("plain")]);
    let revision = editor.revision();

    editor.update(|doc| doc.remove_list()).unwrap();

    assert_eq!(editor.revision(), revision);
    assert_eq!(kinds(&editor), vec![ElementKind::Paragraph]);
}

#[test]
fn block_type_skips_lists() {
    let mut editor = editor_with(vec![
        NodeTemplate::paragraph("para"),
        NodeTemplate::element(
            ElementKind::List(ListType::Bullet),
            vec![NodeTemplate::element(
                ElementKind::ListItem,
                vec![NodeTemplate::text("item")],
            )],
        ),
    ]);
    select_all_text(&mut editor);

    let written = editor
        .update(|doc| doc.set_block_type(ElementKind::heading(1)))
        .unwrap();

    assert_eq!(written, 1);
    assert_eq!(
        kinds(&editor),
        vec![ElementKind::Heading(1), ElementKind::List(ListType::Bullet)]
    );
    assert!(
        editor
            .update(|doc| doc.set_block_type(ElementKind::ListItem))
            .is_err()
    );
}
