use plate_richtext_core::{
    CodepointRange, Editor, EditorConfig, ElementFormat, ElementKind, ListType, NodeTemplate,
    TextFormat, TextStyle, import_templates,
};
use serde_json::json;

fn imported(html: &str) -> Editor {
    let mut editor = Editor::default();
    editor.import_html(html).unwrap();
    editor
}

fn sized(text: &str, format: TextFormat, size: &str) -> NodeTemplate {
    let mut style = TextStyle::new();
    style.insert("font-size".to_string(), size.to_string());
    NodeTemplate::Text {
        text: text.to_string(),
        format,
        style,
    }
}

#[test]
fn exports_bold_run_with_theme_classes() {
    let editor = imported("<p>Hello <b>world</b></p>");
    assert_eq!(
        editor.export_html(),
        r#"<p class="editor-paragraph">Hello <b><span class="editor-text-bold">world</span></b></p>"#
    );
}

#[test]
fn typed_whitespace_survives_a_round_trip() {
    let mut editor = Editor::default();
    editor.update(|doc| doc.insert_text("  a  b  ")).unwrap();
    let html = editor.export_html();
    assert_eq!(
        html,
        r#"<p class="editor-paragraph"><span style="white-space: pre-wrap;">  a  b  </span></p>"#
    );

    let reloaded = imported(&html);
    assert_eq!(reloaded.doc().text_content(), "  a  b  ");
    assert_eq!(reloaded.export_html(), html);

    // Markup without the style still collapses.
    assert_eq!(imported("<p>  a   b </p>").doc().text_content(), "a b");
}

#[test]
fn empty_document_exports_an_empty_paragraph() {
    let editor = Editor::default();
    assert_eq!(
        editor.export_html(),
        r#"<p class="editor-paragraph"><br></p>"#
    );
}

#[test]
fn export_import_export_is_stable() {
    let mut editor = Editor::default();
    editor
        .update(|doc| {
            doc.insert_nodes(vec![
                NodeTemplate::element(ElementKind::heading(2), vec![NodeTemplate::text("Title")]),
                NodeTemplate::element(
                    ElementKind::Paragraph,
                    vec![
                        NodeTemplate::formatted("bold italic", TextFormat::BOLD | TextFormat::ITALIC),
                        sized("big", TextFormat::BOLD, "18px"),
                        NodeTemplate::text(" plain & <escaped>"),
                        NodeTemplate::formatted(
                            " both",
                            TextFormat::UNDERLINE | TextFormat::STRIKETHROUGH,
                        ),
                    ],
                )
                .with_format(ElementFormat::Center),
                NodeTemplate::element(
                    ElementKind::List(ListType::Bullet),
                    vec![NodeTemplate::element(
                        ElementKind::ListItem,
                        vec![
                            NodeTemplate::text("one"),
                            NodeTemplate::element(
                                ElementKind::List(ListType::Number),
                                vec![NodeTemplate::element(
                                    ElementKind::ListItem,
                                    vec![NodeTemplate::text("two")],
                                )],
                            ),
                        ],
                    )],
                ),
                NodeTemplate::element(ElementKind::Paragraph, Vec::new()),
            ])
        })
        .unwrap();

    let first = editor.export_html();
    assert!(first.contains(r#"<h2 class="editor-heading-h2">Title</h2>"#));
    assert!(first.contains(r#"style="text-align: center;""#));
    assert!(first.contains(r#"<span class="editor-text-bold" style="font-size: 18px;">big</span>"#));
    assert!(first.contains(r#"class="editor-text-underlineStrikethrough""#));
    assert!(first.contains("&amp; &lt;escaped&gt;"));
    assert!(first.contains(r#"<li class="editor-listitem editor-nested-listitem">one<ol"#));
    assert!(first.ends_with(r#"<p class="editor-paragraph"><br></p>"#));

    let reloaded = imported(&first);
    assert_eq!(reloaded.export_html(), first);
    assert_eq!(reloaded.doc().text_content(), editor.doc().text_content());
}

#[test]
fn line_breaks_inside_a_block_survive() {
    let editor = imported("<p>one<br>two</p>");
    assert_eq!(editor.doc().text_content(), "one\ntwo");
    assert_eq!(
        editor.export_html(),
        r#"<p class="editor-paragraph">one<br>two</p>"#
    );
}

#[test]
fn malformed_markup_is_loaded_best_effort() {
    let editor = imported(
        "<p>ok</p><div><b>unclosed<p>next</p></span>&bogus; <script>alert(1)</script><img src=x>",
    );

    let text = editor.doc().text_content();
    assert!(text.contains("ok"));
    assert!(text.contains("unclosed"));
    assert!(text.contains("next"));
    assert!(text.contains("&bogus;"));
    assert!(!text.contains("alert"));
}

#[test]
fn unknown_inline_tags_keep_their_text() {
    let editor = imported(r#"<p><a href="/x">link</a> and <code>code</code></p>"#);
    assert_eq!(editor.doc().text_content(), "link and code");
}

#[test]
fn inline_styles_map_to_marks() {
    let templates = import_templates(
        r#"<p><span style="font-weight: 700; font-style: italic; text-decoration: underline line-through; font-size: 24px">x</span></p>"#,
    );
    let NodeTemplate::Element { children, .. } = &templates[0] else {
        panic!("expected a paragraph");
    };
    let NodeTemplate::Text { format, style, .. } = &children[0] else {
        panic!("expected a text run");
    };
    assert_eq!(
        *format,
        TextFormat::BOLD | TextFormat::ITALIC | TextFormat::UNDERLINE | TextFormat::STRIKETHROUGH
    );
    assert_eq!(style.get("font-size").map(String::as_str), Some("24px"));
}

#[test]
fn bare_list_items_are_wrapped_in_a_list() {
    let editor = imported("<li>a</li><li>b</li>");
    let doc = editor.doc();
    let roots = doc.root().children();
    assert_eq!(roots.len(), 1);
    assert_eq!(
        doc.element(roots[0]).map(|el| el.kind),
        Some(ElementKind::List(ListType::Bullet))
    );
    assert_eq!(doc.children(roots[0]).len(), 2);
}

#[test]
fn loose_text_becomes_a_paragraph() {
    let editor = imported("just text");
    assert_eq!(
        editor.export_html(),
        r#"<p class="editor-paragraph">just text</p>"#
    );
}

#[test]
fn configured_codepoints_are_stripped_on_export() {
    let config = EditorConfig::from_json_str(
        &json!({ "strip_codepoints": [{ "start": 0x1F600, "end": 0x1F64F }] }).to_string(),
    )
    .unwrap();
    assert_eq!(config.strip_codepoints, vec![CodepointRange::new(0x1F600, 0x1F64F)]);

    let mut editor = Editor::new(config);
    editor.import_html("<p>hi \u{1F600}!</p>").unwrap();
    assert_eq!(editor.doc().text_content(), "hi \u{1F600}!");
    assert_eq!(editor.export_html(), r#"<p class="editor-paragraph">hi !</p>"#);
}

#[test]
fn custom_theme_classes_are_used() {
    let config = EditorConfig::from_json_str(
        &json!({ "theme": { "paragraph": "para", "text_bold": "" } }).to_string(),
    )
    .unwrap();
    let mut editor = Editor::new(config);
    editor.import_html("<p><b>x</b></p>").unwrap();
    assert_eq!(editor.export_html(), r#"<p class="para"><b>x</b></p>"#);
}

#[test]
fn importing_nothing_leaves_the_document_untouched() {
    let mut editor = Editor::default();
    editor.import_html("   <script>x</script>  ").unwrap();
    assert_eq!(editor.revision(), 0);
}
