//! Iterative walk over the parsed DOM.
//!
//! The walker keeps two stacks: pending [`Step`]s, and open [`Frame`]s. Every
//! element that produces output pushes a frame with its own buffer; when the
//! element closes, its frame is rendered and folded into the parent frame (or
//! deposited into a structural ancestor such as a list, table row or macro).
//! Nesting depth is bounded by heap, not by the call stack.

use html5ever::Attribute;
use markup5ever_rcdom::{Handle, NodeData};

use super::ConvertOptions;
use super::confluence::{self, ATTACHMENT_MACROS, MacroParts, PARAGRAPH_TAG, Resource};
use super::text::{
    code_span, fence, push_block, push_inline, push_text, quote_lines, render_list,
    render_table, single_line, table_cell, wrap_delimited,
};

/// Rendered output of a closed frame.
pub(super) enum Output {
    Inline(String),
    Block(String),
    /// Appended verbatim (inside preformatted content).
    Raw(String),
    Nothing,
}

enum Step {
    Open(Handle),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Block,
    Inline,
    Heading(usize),
    Delimited(&'static str),
    Code,
    Preformatted,
    Anchor(Option<String>),
    List { ordered: bool, start: usize },
    ListItem,
    Quote,
    Table,
    TableRow,
    TableCell,
    Macro(String),
    MacroParameter(String),
    RichTextBody,
    PlainTextBody,
    Image(Option<String>),
    PageLink(Option<String>),
    LinkBody,
    TaskList,
    Task,
    TaskStatus,
    TaskBody,
}

impl Kind {
    /// Inline frames keep leading whitespace of their first text node.
    fn is_inline(&self) -> bool {
        matches!(
            self,
            Self::Inline
                | Self::Delimited(_)
                | Self::Code
                | Self::Anchor(_)
                | Self::Image(_)
                | Self::PageLink(_)
        )
    }

    /// Text read as a value rather than displayed as Markdown.
    fn is_literal(&self) -> bool {
        matches!(
            self,
            Self::Code | Self::MacroParameter(_) | Self::TaskStatus
        )
    }

    fn is_raw(&self) -> bool {
        matches!(self, Self::Preformatted | Self::PlainTextBody)
    }
}

struct Frame {
    kind: Kind,
    buf: String,
    items: Vec<String>,
    rows: Vec<Vec<String>>,
    cells: Vec<String>,
    params: Vec<(String, String)>,
    body: Option<String>,
    plain_body: Option<String>,
    resource: Option<Resource>,
    status: Option<String>,
}

impl Frame {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            buf: String::new(),
            items: Vec::new(),
            rows: Vec::new(),
            cells: Vec::new(),
            params: Vec::new(),
            body: None,
            plain_body: None,
            resource: None,
            status: None,
        }
    }

    /// Moves stray non-blank text into the item list, keeping document order.
    fn flush_stray_item(&mut self) {
        let stray = self.buf.trim();
        if !stray.is_empty() {
            self.items.push(stray.to_string());
        }
        self.buf.clear();
    }
}

pub(super) struct Walker<'a> {
    options: &'a ConvertOptions,
    root: Frame,
    frames: Vec<Frame>,
    raw_depth: usize,
}

impl<'a> Walker<'a> {
    pub(super) fn new(options: &'a ConvertOptions) -> Self {
        Self {
            options,
            root: Frame::new(Kind::Block),
            frames: Vec::new(),
            raw_depth: 0,
        }
    }

    /// Walks the tree under `root` and returns the accumulated Markdown.
    pub(super) fn walk(mut self, root: &Handle) -> String {
        let mut steps = vec![Step::Open(root.clone())];
        while let Some(step) = steps.pop() {
            match step {
                Step::Open(node) => self.open(&node, &mut steps),
                Step::Close => self.close(),
            }
        }
        while !self.frames.is_empty() {
            self.close();
        }
        self.root.buf
    }

    fn top(&mut self) -> &mut Frame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.root,
        }
    }

    fn nearest(&mut self, matches: impl Fn(&Kind) -> bool) -> Option<&mut Frame> {
        self.frames.iter_mut().rev().find(|frame| matches(&frame.kind))
    }

    fn open(&mut self, node: &Handle, steps: &mut Vec<Step>) {
        match &node.data {
            NodeData::Document => push_children(node, steps),
            NodeData::Text { contents } => {
                let text = contents.borrow();
                self.text(&text);
            }
            NodeData::Element { name, attrs, .. } => {
                let kind = {
                    let attrs = attrs.borrow();
                    self.classify(&name.local, &attrs)
                };
                if let Some(kind) = kind {
                    if kind.is_raw() {
                        self.raw_depth += 1;
                    }
                    self.frames.push(Frame::new(kind));
                    steps.push(Step::Close);
                    push_children(node, steps);
                }
            }
            NodeData::Doctype { .. }
            | NodeData::Comment { .. }
            | NodeData::ProcessingInstruction { .. } => {}
        }
    }

    fn text(&mut self, text: &str) {
        let raw = self.raw_depth > 0;
        let frame = self.top();
        if raw {
            frame.buf.push_str(text);
        } else {
            let block_start = !frame.kind.is_inline();
            let escape = !frame.kind.is_literal();
            push_text(&mut frame.buf, text, block_start, escape);
        }
    }

    /// Maps an element to the frame it opens; `None` drops the subtree.
    ///
    /// Void-like elements emit their output here and open a plain inline
    /// frame, since the HTML parser nests following siblings under unknown
    /// self-closed elements such as `<ri:page />`.
    fn classify(&mut self, tag: &str, attrs: &[Attribute]) -> Option<Kind> {
        let kind = match tag {
            "head" | "script" | "style" | "title" | "template" | "noscript" => return None,
            "ac:placeholder" | "ac:task-id" | "ac:inline-comment-marker-ref" => return None,

            "html" | "body" | "p" | PARAGRAPH_TAG | "div" | "section" | "article" | "header" | "footer"
            | "main" | "nav" | "aside" | "figure" | "dl" | "dt" | "dd" | "center" | "details"
            | "summary" | "ac:layout" | "ac:layout-section" | "ac:layout-cell" => Kind::Block,

            "h1" => Kind::Heading(1),
            "h2" => Kind::Heading(2),
            "h3" => Kind::Heading(3),
            "h4" => Kind::Heading(4),
            "h5" => Kind::Heading(5),
            "h6" => Kind::Heading(6),

            "b" | "strong" => Kind::Delimited("**"),
            "i" | "em" | "cite" => Kind::Delimited("_"),
            "s" | "del" | "strike" => Kind::Delimited("~~"),
            "code" | "tt" | "kbd" | "samp" if self.raw_depth == 0 => Kind::Code,
            "pre" => Kind::Preformatted,
            "a" => Kind::Anchor(attr(attrs, "href")),

            "ul" => Kind::List {
                ordered: false,
                start: 1,
            },
            "ol" => Kind::List {
                ordered: true,
                start: attr(attrs, "start")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(1),
            },
            "li" => Kind::ListItem,
            "blockquote" => Kind::Quote,

            "table" => Kind::Table,
            "tr" => Kind::TableRow,
            "td" | "th" => Kind::TableCell,

            "br" => {
                self.top().buf.push('\n');
                Kind::Inline
            }
            "hr" => {
                push_block(&mut self.top().buf, "---");
                Kind::Inline
            }
            "img" => {
                if let Some(src) = attr(attrs, "src") {
                    let alt = attr(attrs, "alt").unwrap_or_default();
                    push_inline(&mut self.top().buf, &format!("![{alt}]({src})"));
                }
                Kind::Inline
            }

            "ac:structured-macro" | "ac:macro" => Kind::Macro(
                attr(attrs, "ac:name")
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase(),
            ),
            "ac:parameter" => Kind::MacroParameter(attr(attrs, "ac:name").unwrap_or_default()),
            "ac:rich-text-body" => Kind::RichTextBody,
            "ac:plain-text-body" => Kind::PlainTextBody,
            "ac:image" => Kind::Image(attr(attrs, "ac:alt")),
            "ac:link" => Kind::PageLink(attr(attrs, "ac:anchor")),
            "ac:link-body" | "ac:plain-text-link-body" => Kind::LinkBody,
            "ac:task-list" => Kind::TaskList,
            "ac:task" => Kind::Task,
            "ac:task-status" => Kind::TaskStatus,
            "ac:task-body" => Kind::TaskBody,
            "ac:emoticon" => {
                let emoji = confluence::emoticon(
                    attr(attrs, "ac:emoji-fallback"),
                    attr(attrs, "ac:name"),
                );
                push_inline(&mut self.top().buf, &emoji);
                Kind::Inline
            }

            "ri:attachment" | "ri:url" | "ri:page" | "ri:blog-post" | "ri:user" => {
                if let Some(resource) = Resource::from_element(tag, |name| attr(attrs, name)) {
                    self.attach_resource(resource);
                }
                Kind::Inline
            }

            _ => Kind::Inline,
        };
        Some(kind)
    }

    /// Hands a `ri:` resource to the element that references it.
    fn attach_resource(&mut self, resource: Resource) {
        let owner = self.nearest(|kind| {
            matches!(
                kind,
                Kind::Image(_) | Kind::PageLink(_) | Kind::Macro(_)
            )
        });
        match owner {
            Some(frame) => {
                if frame.resource.is_none() {
                    frame.resource = Some(resource);
                }
            }
            None => {
                if let Resource::User(name) = resource {
                    push_inline(&mut self.top().buf, &format!("@{name}"));
                }
            }
        }
    }

    fn close(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if frame.kind.is_raw() {
            self.raw_depth = self.raw_depth.saturating_sub(1);
        }

        let output = self.render(frame);
        let raw = self.raw_depth > 0;
        let parent = self.top();
        match output {
            Output::Inline(text) if raw => parent.buf.push_str(&text),
            Output::Inline(text) => push_inline(&mut parent.buf, &text),
            Output::Block(text) => push_block(&mut parent.buf, &text),
            Output::Raw(text) => parent.buf.push_str(&text),
            Output::Nothing => {}
        }
    }

    fn render(&mut self, mut frame: Frame) -> Output {
        match frame.kind {
            Kind::Block => block(frame.buf.trim()),
            Kind::Inline if self.raw_depth > 0 => Output::Raw(frame.buf),
            Kind::Inline => Output::Inline(frame.buf),
            Kind::Heading(level) => {
                let text = single_line(&frame.buf);
                if text.is_empty() {
                    Output::Nothing
                } else {
                    Output::Block(format!("{} {text}", "#".repeat(level.min(3))))
                }
            }
            Kind::Delimited(delim) => Output::Inline(wrap_delimited(&frame.buf, delim)),
            Kind::Code => Output::Inline(code_span(&frame.buf)),
            Kind::Preformatted => {
                if frame.buf.trim().is_empty() {
                    Output::Nothing
                } else {
                    Output::Block(fence(&frame.buf, ""))
                }
            }
            Kind::Anchor(href) => self.anchor(&single_line(&frame.buf), href),
            Kind::List { ordered, start } => {
                frame.flush_stray_item();
                block(&render_list(&frame.items, ordered, start))
            }
            Kind::ListItem => {
                let item = frame.buf.trim().to_string();
                match self.nearest(|kind| matches!(kind, Kind::List { .. })) {
                    Some(list) => {
                        list.flush_stray_item();
                        list.items.push(item);
                        Output::Nothing
                    }
                    None => block(&item),
                }
            }
            Kind::Quote => block(&quote_lines(frame.buf.trim())),
            Kind::Table => block(&render_table(&frame.rows)),
            Kind::TableRow => match self.nearest(|kind| *kind == Kind::Table) {
                Some(table) => {
                    if !frame.cells.is_empty() {
                        table.rows.push(frame.cells);
                    }
                    Output::Nothing
                }
                None => Output::Inline(frame.cells.join(" ")),
            },
            Kind::TableCell => {
                let cell = table_cell(&frame.buf);
                match self.nearest(|kind| *kind == Kind::TableRow) {
                    Some(row) => {
                        row.cells.push(cell);
                        Output::Nothing
                    }
                    None => Output::Inline(cell),
                }
            }
            Kind::Macro(name) => {
                let stray = frame.buf.trim();
                let body = frame
                    .body
                    .or_else(|| (!stray.is_empty()).then(|| stray.to_string()));
                confluence::render_macro(
                    MacroParts {
                        name,
                        params: frame.params,
                        body,
                        plain_body: frame.plain_body,
                        resource: frame.resource,
                    },
                    self.options,
                )
            }
            Kind::MacroParameter(name) => {
                let value = frame.buf.trim().to_string();
                if let Some(owner) = self.nearest(|kind| matches!(kind, Kind::Macro(_))) {
                    owner.params.push((name, value));
                }
                Output::Nothing
            }
            Kind::RichTextBody => {
                let body = frame.buf.trim().to_string();
                match self.nearest(|kind| matches!(kind, Kind::Macro(_))) {
                    Some(owner) => {
                        owner.body = Some(body);
                        Output::Nothing
                    }
                    None => block(&body),
                }
            }
            Kind::PlainTextBody => {
                let body = frame.buf;
                match self.nearest(|kind| matches!(kind, Kind::Macro(_))) {
                    Some(owner) => {
                        owner.plain_body = Some(body);
                        Output::Nothing
                    }
                    None if body.trim().is_empty() => Output::Nothing,
                    None => Output::Block(fence(&body, "")),
                }
            }
            Kind::Image(alt) => match frame.resource {
                Some(resource) => {
                    Output::Inline(confluence::image(&resource, alt, self.options))
                }
                None => Output::Nothing,
            },
            Kind::PageLink(anchor) => Output::Inline(confluence::link(
                frame.resource,
                frame.body.filter(|b| !b.is_empty()),
                anchor,
                self.options,
            )),
            Kind::LinkBody => {
                let body = single_line(&frame.buf);
                match self.nearest(|kind| matches!(kind, Kind::PageLink(_))) {
                    Some(owner) => {
                        owner.body = Some(body);
                        Output::Nothing
                    }
                    None => Output::Inline(body),
                }
            }
            Kind::TaskList => {
                frame.flush_stray_item();
                block(&render_list(&frame.items, false, 1))
            }
            Kind::Task => {
                let done = frame.status.as_deref() == Some("complete");
                let body = frame.body.unwrap_or_else(|| frame.buf.trim().to_string());
                let item = format!("[{}] {body}", if done { "x" } else { " " });
                match self.nearest(|kind| *kind == Kind::TaskList) {
                    Some(list) => {
                        list.items.push(item.trim_end().to_string());
                        Output::Nothing
                    }
                    None => Output::Block(format!("- {item}")),
                }
            }
            Kind::TaskStatus => {
                let status = frame.buf.trim().to_ascii_lowercase();
                if let Some(task) = self.nearest(|kind| *kind == Kind::Task) {
                    task.status = Some(status);
                }
                Output::Nothing
            }
            Kind::TaskBody => {
                let body = frame.buf.trim().to_string();
                match self.nearest(|kind| *kind == Kind::Task) {
                    Some(task) => {
                        task.body = Some(body);
                        Output::Nothing
                    }
                    None => block(&body),
                }
            }
        }
    }

    fn anchor(&self, text: &str, href: Option<String>) -> Output {
        let href = href
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .map(|h| self.options.resolve_href(&h));
        match href {
            None => Output::Inline(text.to_string()),
            Some(href) if text.is_empty() => Output::Inline(href),
            Some(href) => Output::Inline(format!("[{text}]({href})")),
        }
    }
}

/// Attachments embedded by `ac:image` elements and attachment macros, in
/// document order without duplicates.
pub(super) fn embedded_attachments(root: &Handle) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut pending = vec![(root.clone(), false)];

    while let Some((node, embedded)) = pending.pop() {
        let NodeData::Element { name, attrs, .. } = &node.data else {
            push_children_with(&node, embedded, &mut pending);
            continue;
        };
        let attrs = attrs.borrow();
        let tag: &str = &name.local;
        let embedded = match tag {
            "ac:image" => true,
            "ac:link" => false,
            "ac:structured-macro" | "ac:macro" => attr(&attrs, "ac:name")
                .is_some_and(|name| ATTACHMENT_MACROS.contains(&name.trim().to_ascii_lowercase().as_str())),
            "ri:attachment" if embedded => {
                if let Some(Resource::Attachment(filename)) =
                    Resource::from_element(tag, |name| attr(&attrs, name))
                {
                    if !found.contains(&filename) {
                        found.push(filename);
                    }
                }
                embedded
            }
            _ => embedded,
        };
        push_children_with(&node, embedded, &mut pending);
    }
    found
}

fn push_children_with(node: &Handle, embedded: bool, pending: &mut Vec<(Handle, bool)>) {
    for child in node.children.borrow().iter().rev() {
        pending.push((child.clone(), embedded));
    }
}

fn block(content: &str) -> Output {
    if content.is_empty() {
        Output::Nothing
    } else {
        Output::Block(content.to_string())
    }
}

fn push_children(node: &Handle, steps: &mut Vec<Step>) {
    for child in node.children.borrow().iter().rev() {
        steps.push(Step::Open(child.clone()));
    }
}

fn attr(attrs: &[Attribute], name: &str) -> Option<String> {
    attrs
        .iter()
        .find(|a| &*a.name.local == name)
        .map(|a| a.value.to_string())
}
