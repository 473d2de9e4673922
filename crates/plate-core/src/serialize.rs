use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::config::{CodepointRange, EditorConfig, HtmlTheme};
use crate::core::Editor;
use crate::dispatch::{CommandPriority, DOCUMENT_UPDATED, Subscription};
use crate::document::{
    Document, ElementFormat, ElementKind, FONT_SIZE, ListType, NodeData, NodeKey, NodeTemplate,
    TextFormat, TextNode, TextStyle,
};
use crate::error::EditorError;
use crate::html::{HtmlElement, HtmlNode, escape_attr, escape_text, is_void_element, parse_fragment};

/// Serializes the document to themed HTML.
pub fn render_html(doc: &Document, theme: &HtmlTheme) -> String {
    let mut out = String::new();
    for block in doc.root().children() {
        render_node(doc, *block, theme, &mut out);
    }
    out
}

/// [`render_html`] followed by codepoint stripping.
pub fn export_html(doc: &Document, config: &EditorConfig) -> String {
    strip_codepoints(&render_html(doc, &config.theme), &config.strip_codepoints)
}

pub fn strip_codepoints(html: &str, ranges: &[CodepointRange]) -> String {
    if ranges.is_empty() {
        return html.to_string();
    }
    html.chars()
        .filter(|ch| !ranges.iter().any(|range| range.contains(*ch)))
        .collect()
}

fn class_attr(classes: &[&str]) -> String {
    let classes: Vec<&str> = classes.iter().copied().filter(|c| !c.is_empty()).collect();
    if classes.is_empty() {
        String::new()
    } else {
        format!(r#" class="{}""#, escape_attr(&classes.join(" ")))
    }
}

fn align_attr(format: ElementFormat) -> String {
    match format.css_value() {
        Some(value) => format!(r#" style="text-align: {value};""#),
        None => String::new(),
    }
}

fn render_node(doc: &Document, key: NodeKey, theme: &HtmlTheme, out: &mut String) {
    let Some(node) = doc.node(key) else {
        return;
    };
    let el = match node.data() {
        NodeData::Text(text) => {
            render_run(text, theme, RunEdges::BOTH, out);
            return;
        }
        NodeData::Root { .. } => return,
        NodeData::Element(el) => el,
    };

    let (tag, classes): (String, Vec<&str>) = match el.kind {
        ElementKind::Paragraph => ("p".into(), vec![theme.paragraph.as_str()]),
        ElementKind::Heading(level) => (format!("h{level}"), vec![theme.heading(level)]),
        ElementKind::List(list_type) => {
            let tag = match list_type {
                ListType::Bullet => "ul",
                ListType::Number => "ol",
            };
            (tag.into(), vec![theme.list(list_type)])
        }
        ElementKind::ListItem => {
            let has_nested = el
                .children()
                .iter()
                .any(|child| doc.node(*child).is_some_and(|n| n.is_list()));
            let mut classes = vec![theme.list_item.as_str()];
            if has_nested {
                classes.push(theme.nested_list_item.as_str());
            }
            ("li".into(), classes)
        }
    };

    let _ = write!(out, "<{tag}{}{}>", class_attr(&classes), align_attr(el.format));
    if el.children().is_empty() && el.kind.is_text_block() {
        out.push_str("<br>");
    }
    let last = el.children().len().saturating_sub(1);
    for (index, child) in el.children().iter().enumerate() {
        match doc.node(*child).map(|node| node.data()) {
            Some(NodeData::Text(text)) => {
                let edges = RunEdges {
                    first: index == 0,
                    last: index == last,
                };
                render_run(text, theme, edges, out);
            }
            _ => render_node(doc, *child, theme, out),
        }
    }
    let _ = write!(out, "</{tag}>");
}

/// Where a run sits among its block's children.
#[derive(Debug, Clone, Copy)]
struct RunEdges {
    first: bool,
    last: bool,
}

impl RunEdges {
    const BOTH: RunEdges = RunEdges {
        first: true,
        last: true,
    };
}

/// True when import would collapse or trim some of the run's whitespace.
fn needs_pre_wrap(text: &str, edges: RunEdges) -> bool {
    text.contains("  ")
        || text.contains(['\t', '\r'])
        || (edges.first && text.starts_with(' '))
        || (edges.last && text.ends_with(' '))
}

fn render_run(text: &TextNode, theme: &HtmlTheme, edges: RunEdges, out: &mut String) {
    if text.text.is_empty() {
        return;
    }
    let wrappers: Vec<&str> = [
        (TextFormat::BOLD, "b"),
        (TextFormat::ITALIC, "i"),
        (TextFormat::UNDERLINE, "u"),
        (TextFormat::STRIKETHROUGH, "s"),
    ]
    .into_iter()
    .filter(|(bit, _)| text.format.contains(*bit))
    .map(|(_, tag)| tag)
    .collect();

    let classes = theme.text_classes(text.format);
    let mut declarations = Vec::new();
    if let Some(size) = text.font_size() {
        declarations.push(format!("{FONT_SIZE}: {};", escape_attr(size)));
    }
    if needs_pre_wrap(&text.text, edges) {
        declarations.push(format!("{WHITE_SPACE}: pre-wrap;"));
    }
    let style = if declarations.is_empty() {
        String::new()
    } else {
        format!(r#" style="{}""#, declarations.join(" "))
    };
    let span = !classes.is_empty() || !style.is_empty();

    for tag in &wrappers {
        let _ = write!(out, "<{tag}>");
    }
    if span {
        let _ = write!(out, "<span{}{style}>", class_attr(&classes));
    }
    let mut lines = text.text.split('\n');
    if let Some(first) = lines.next() {
        out.push_str(&escape_text(first));
    }
    for line in lines {
        out.push_str("<br>");
        out.push_str(&escape_text(line));
    }
    if span {
        out.push_str("</span>");
    }
    for tag in wrappers.iter().rev() {
        let _ = write!(out, "</{tag}>");
    }
}

const WHITE_SPACE: &str = "white-space";

#[derive(Debug, Clone, Default)]
struct Marks {
    format: TextFormat,
    style: TextStyle,
    preserve_whitespace: bool,
}

/// Whether the first and last text pushed into a block's children came
/// from whitespace-preserving markup.
#[derive(Debug, Default)]
struct TextEdges {
    first: Option<bool>,
    last: Option<bool>,
}

impl TextEdges {
    fn push(&mut self, preserved: bool) {
        self.first.get_or_insert(preserved);
        self.last = Some(preserved);
    }
}

const DROPPED_ELEMENTS: &[&str] = &[
    "head", "noscript", "object", "script", "style", "svg", "template", "title",
];

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

fn read_marks(el: &HtmlElement, marks: &Marks) -> Marks {
    let mut next = marks.clone();
    match el.name.as_str() {
        "b" | "strong" => next.format.insert(TextFormat::BOLD),
        "i" | "em" => next.format.insert(TextFormat::ITALIC),
        "u" => next.format.insert(TextFormat::UNDERLINE),
        "s" | "strike" | "del" => next.format.insert(TextFormat::STRIKETHROUGH),
        _ => {}
    }
    if let Some(weight) = el.style("font-weight") {
        let bold = match weight.as_str() {
            "bold" | "bolder" => true,
            other => other.parse::<u16>().is_ok_and(|w| w >= 600),
        };
        if bold {
            next.format.insert(TextFormat::BOLD);
        } else if weight == "normal" {
            next.format.remove(TextFormat::BOLD);
        }
    }
    if el.style("font-style").as_deref() == Some("italic") {
        next.format.insert(TextFormat::ITALIC);
    }
    if let Some(decoration) = el.style("text-decoration") {
        if decoration.contains("underline") {
            next.format.insert(TextFormat::UNDERLINE);
        }
        if decoration.contains("line-through") {
            next.format.insert(TextFormat::STRIKETHROUGH);
        }
    }
    if let Some(size) = el.style(FONT_SIZE) {
        next.style.insert(FONT_SIZE.to_string(), size);
    }
    if let Some(white_space) = el.style(WHITE_SPACE) {
        next.preserve_whitespace =
            matches!(white_space.as_str(), "pre" | "pre-wrap" | "break-spaces");
    }
    next
}

fn block_format(el: &HtmlElement) -> ElementFormat {
    el.style("text-align")
        .or_else(|| el.attr("align").map(str::to_ascii_lowercase))
        .and_then(|value| ElementFormat::from_name(&value))
        .unwrap_or_default()
}

/// Trims insignificant whitespace at the edges of a block. Preserved
/// text is left alone.
fn trim_block_edges(children: &mut [NodeTemplate], edges: &TextEdges) {
    if edges.first == Some(false) {
        if let Some(NodeTemplate::Text { text, .. }) = children.first_mut() {
            *text = text.trim_start_matches(' ').to_string();
        }
    }
    if edges.last == Some(false) {
        if let Some(NodeTemplate::Text { text, .. }) = children.last_mut() {
            *text = text.trim_end_matches(' ').to_string();
        }
    }
}

fn convert_children(
    nodes: &[HtmlNode],
    marks: &Marks,
    edges: &mut TextEdges,
    out: &mut Vec<NodeTemplate>,
) {
    for node in nodes {
        convert_node(node, marks, edges, out);
    }
}

fn convert_node(
    node: &HtmlNode,
    marks: &Marks,
    edges: &mut TextEdges,
    out: &mut Vec<NodeTemplate>,
) {
    let el = match node {
        HtmlNode::Text(text) => {
            let text = if marks.preserve_whitespace {
                text.clone()
            } else {
                collapse_whitespace(text)
            };
            if !text.is_empty() {
                edges.push(marks.preserve_whitespace);
                out.push(NodeTemplate::Text {
                    text,
                    format: marks.format,
                    style: marks.style.clone(),
                });
            }
            return;
        }
        HtmlNode::Element(el) => el,
    };

    let name = el.name.as_str();
    if name == "br" {
        edges.push(marks.preserve_whitespace);
        out.push(NodeTemplate::Text {
            text: "\n".to_string(),
            format: marks.format,
            style: marks.style.clone(),
        });
        return;
    }
    if DROPPED_ELEMENTS.contains(&name) || is_void_element(name) {
        trace!(tag = name, "dropped element without a node mapping");
        return;
    }

    let kind = match name {
        "p" | "div" | "h6" => Some(ElementKind::Paragraph),
        "h1" | "h2" | "h3" | "h4" | "h5" => name[1..].parse::<u8>().ok().map(ElementKind::heading),
        "ul" => Some(ElementKind::List(ListType::Bullet)),
        "ol" => Some(ElementKind::List(ListType::Number)),
        "li" => Some(ElementKind::ListItem),
        _ => None,
    };
    let inner = read_marks(el, marks);

    match kind {
        Some(kind) => {
            let mut children = Vec::new();
            let mut block_edges = TextEdges::default();
            convert_children(&el.children, &inner, &mut block_edges, &mut children);
            if kind.is_text_block() {
                trim_block_edges(&mut children, &block_edges);
            }
            out.push(NodeTemplate::Element {
                kind,
                format: block_format(el),
                children,
            });
        }
        None => convert_children(&el.children, &inner, edges, out),
    }
}

/// Maps parsed HTML onto node templates. Content without a node mapping is
/// dropped; whitespace between blocks is discarded.
pub fn import_templates(html: &str) -> Vec<NodeTemplate> {
    let dom = parse_fragment(html);
    let mut out = Vec::new();
    convert_children(&dom, &Marks::default(), &mut TextEdges::default(), &mut out);

    let blank = |node: &NodeTemplate| {
        matches!(node, NodeTemplate::Text { text, .. } if text.trim().is_empty())
    };
    let has_blocks = out.iter().any(|node| !node.is_inline());
    if has_blocks || out.iter().all(blank) {
        out.retain(|node| !blank(node));
    }
    out
}

impl Editor {
    /// Parses `html` and inserts the result at the selection, or replaces
    /// the contents of a freshly empty document.
    pub fn import_html(&mut self, html: &str) -> Result<(), EditorError> {
        let nodes = import_templates(html);
        if nodes.is_empty() {
            debug!("nothing to import");
            return Ok(());
        }
        self.update(|doc| doc.insert_nodes(nodes))
    }

    pub fn export_html(&self) -> String {
        self.read(|doc| export_html(doc, self.config()))
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Trailing-edge debounce keyed by document revision. Each schedule
/// restarts the quiet window; only the latest revision is reported.
#[derive(Debug, Clone)]
pub struct ExportScheduler {
    quiet_window: Duration,
    deadline: Option<Instant>,
    revision: u64,
    detached: bool,
}

impl ExportScheduler {
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            quiet_window,
            deadline: None,
            revision: 0,
            detached: false,
        }
    }

    pub fn schedule(&mut self, now: Instant, revision: u64) {
        if self.detached {
            return;
        }
        self.deadline = Some(now + self.quiet_window);
        self.revision = revision;
        trace!(revision, "export scheduled");
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The pending revision once its quiet window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<u64> {
        match self.deadline {
            Some(deadline) if deadline <= now && !self.detached => {
                self.deadline = None;
                Some(self.revision)
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Cancels and refuses any further scheduling.
    pub fn detach(&mut self) {
        self.cancel();
        self.detached = true;
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

fn lock(scheduler: &Mutex<ExportScheduler>) -> MutexGuard<'_, ExportScheduler> {
    scheduler.lock().unwrap_or_else(PoisonError::into_inner)
}

pub type ExportSink = Box<dyn FnMut(&str) -> anyhow::Result<()>>;

/// Connects document updates to a debounced HTML export callback.
pub struct HtmlBridge {
    scheduler: Arc<Mutex<ExportScheduler>>,
    sink: Option<ExportSink>,
    subscription: Option<Subscription>,
    last_exported: Option<String>,
    exports: usize,
}

impl std::fmt::Debug for HtmlBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtmlBridge")
            .field("scheduler", &*lock(&self.scheduler))
            .field("attached", &self.is_attached())
            .field("exports", &self.exports)
            .finish()
    }
}

impl HtmlBridge {
    pub fn attach(
        editor: &mut Editor,
        clock: Arc<dyn Clock>,
        sink: impl FnMut(&str) -> anyhow::Result<()> + 'static,
    ) -> Self {
        let scheduler = Arc::new(Mutex::new(ExportScheduler::new(
            editor.config().quiet_window(),
        )));
        let observer = scheduler.clone();
        let subscription = editor.register_command(
            DOCUMENT_UPDATED,
            CommandPriority::Critical,
            move |editor, _args| {
                lock(&observer).schedule(clock.now(), editor.revision());
                Ok(false)
            },
        );
        debug!(
            quiet_window_ms = editor.config().export_debounce_ms,
            "html bridge attached"
        );
        // The content present at attach time counts as already delivered.
        Self {
            scheduler,
            sink: Some(Box::new(sink)),
            subscription: Some(subscription),
            last_exported: Some(editor.export_html()),
            exports: 0,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    pub fn pending_deadline(&self) -> Option<Instant> {
        lock(&self.scheduler).deadline()
    }

    /// Number of times the callback has been invoked.
    pub fn export_count(&self) -> usize {
        self.exports
    }

    /// Exports if the quiet window has elapsed. Returns true when the
    /// callback ran. Unchanged HTML is not re-sent; a failing callback is
    /// logged and does not affect the editor.
    pub fn poll(&mut self, editor: &Editor, now: Instant) -> bool {
        let Some(revision) = lock(&self.scheduler).take_due(now) else {
            return false;
        };
        let Some(sink) = self.sink.as_mut() else {
            return false;
        };
        let html = editor.export_html();
        if self.last_exported.as_deref() == Some(html.as_str()) {
            trace!(revision, "export skipped, html unchanged");
            return false;
        }

        self.exports += 1;
        match sink(&html) {
            Ok(()) => {
                debug!(revision, bytes = html.len(), "exported html");
                self.last_exported = Some(html);
            }
            Err(err) => {
                error!(revision, error = %format!("{err:#}"), "html export callback failed");
            }
        }
        true
    }

    /// Cancels any pending export and stops observing the editor. Safe to
    /// call repeatedly.
    pub fn detach(&mut self) {
        lock(&self.scheduler).detach();
        if let Some(subscription) = self.subscription.take() {
            if !subscription.release() {
                warn!("html bridge subscription was already gone");
            }
        }
        if self.sink.take().is_some() {
            debug!("html bridge detached");
        }
    }
}

impl Drop for HtmlBridge {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_restarts_the_window_on_each_schedule() {
        let start = Instant::now();
        let window = Duration::from_millis(1000);
        let mut scheduler = ExportScheduler::new(window);

        scheduler.schedule(start, 1);
        scheduler.schedule(start + Duration::from_millis(600), 2);
        assert_eq!(scheduler.take_due(start + Duration::from_millis(1000)), None);
        assert_eq!(scheduler.take_due(start + Duration::from_millis(1600)), Some(2));
        assert_eq!(scheduler.take_due(start + Duration::from_millis(5000)), None);
    }

    #[test]
    fn detached_scheduler_never_fires() {
        let start = Instant::now();
        let mut scheduler = ExportScheduler::new(Duration::from_millis(10));
        scheduler.schedule(start, 1);
        scheduler.detach();
        scheduler.schedule(start, 2);
        assert_eq!(scheduler.take_due(start + Duration::from_secs(1)), None);
    }

    #[test]
    fn strips_configured_codepoints() {
        let ranges = [CodepointRange::new(0x1F600, 0x1F64F), CodepointRange::single(0x2764)];
        assert_eq!(strip_codepoints("<p>hi 😀 ❤</p>", &ranges), "<p>hi  </p>");
    }
}
