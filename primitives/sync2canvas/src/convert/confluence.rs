//! Confluence storage-format elements: macros, `ri:` resources, links,
//! images and emoticons.

use std::borrow::Cow;

use super::ConvertOptions;
use super::text::{fence, quote_lines};
use super::tree::Output;

/// Macros rendered as a quoted callout with an optional bold title.
const CALLOUT_MACROS: &[&str] = &["info", "note", "tip", "warning", "panel", "expand"];

/// Macros that embed a single attachment.
pub(super) const ATTACHMENT_MACROS: &[&str] = &[
    "multimedia",
    "view-file",
    "viewpdf",
    "viewdoc",
    "viewxls",
    "viewppt",
];

/// Element name paragraphs are parsed under. An HTML parser closes an open
/// `<p>` at any block-level child, which would pull nested macros out of
/// their paragraph.
pub(super) const PARAGRAPH_TAG: &str = "wiki-p";

/// Target of an `ri:` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Resource {
    Attachment(String),
    Url(String),
    Page {
        title: String,
        space: Option<String>,
    },
    User(String),
}

impl Resource {
    /// Reads a resource from an `ri:` element's attributes.
    pub(super) fn from_element(tag: &str, attr: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let present = |name: &str| attr(name).filter(|v| !v.trim().is_empty());
        match tag {
            "ri:attachment" => present("ri:filename").map(Self::Attachment),
            "ri:url" => present("ri:value").map(Self::Url),
            "ri:page" | "ri:blog-post" => present("ri:content-title").map(|title| Self::Page {
                title,
                space: present("ri:space-key"),
            }),
            "ri:user" => present("ri:username")
                .or_else(|| present("ri:userkey"))
                .or_else(|| present("ri:account-id"))
                .map(Self::User),
            _ => None,
        }
    }
}

/// Everything collected from one macro element.
pub(super) struct MacroParts {
    pub(super) name: String,
    pub(super) params: Vec<(String, String)>,
    pub(super) body: Option<String>,
    pub(super) plain_body: Option<String>,
    pub(super) resource: Option<Resource>,
}

impl MacroParts {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    fn body(&self) -> Option<&str> {
        self.body.as_deref().filter(|b| !b.trim().is_empty())
    }

    fn plain_body(&self) -> Option<&str> {
        self.plain_body.as_deref().filter(|b| !b.trim().is_empty())
    }
}

/// Placeholder emitted for macros with no Markdown equivalent.
pub(super) fn placeholder(name: &str) -> String {
    let name = if name.is_empty() { "macro" } else { name };
    format!("_[unsupported macro: {name}]_")
}

pub(super) fn render_macro(parts: MacroParts, options: &ConvertOptions) -> Output {
    let name = parts.name.as_str();

    if CALLOUT_MACROS.contains(&name) {
        let mut callout = String::new();
        if let Some(title) = parts.param("title") {
            callout.push_str(&format!("**{title}**"));
        }
        if let Some(body) = parts.body() {
            if !callout.is_empty() {
                callout.push('\n');
            }
            callout.push_str(body);
        }
        return if callout.is_empty() {
            Output::Nothing
        } else {
            Output::Block(quote_lines(&callout))
        };
    }

    if ATTACHMENT_MACROS.contains(&name) {
        return match &parts.resource {
            Some(Resource::Attachment(filename)) => Output::Block(format!(
                "[{filename}]({})",
                options.attachment_url(filename)
            )),
            _ => Output::Inline(placeholder(name)),
        };
    }

    match name {
        "code" | "noformat" => match parts.plain_body().or_else(|| parts.body()) {
            Some(body) => Output::Block(fence(body, parts.param("language").unwrap_or(""))),
            None => Output::Nothing,
        },
        "jira" => match parts.param("key") {
            Some(key) => Output::Inline(format!("[{key}]({})", options.jira_issue_url(key))),
            None => Output::Inline(placeholder(name)),
        },
        "status" => match parts.param("title") {
            Some(title) => Output::Inline(format!("`{title}`")),
            None => Output::Nothing,
        },
        "anchor" => Output::Nothing,
        _ => {
            if let Some(body) = parts.body() {
                Output::Block(body.to_string())
            } else if let Some(body) = parts.plain_body() {
                Output::Block(fence(body, ""))
            } else {
                Output::Inline(placeholder(name))
            }
        }
    }
}

/// `ac:image`: an attachment or external image.
pub(super) fn image(resource: &Resource, alt: Option<String>, options: &ConvertOptions) -> String {
    match resource {
        Resource::Attachment(filename) => {
            let alt = alt.unwrap_or_else(|| filename.clone());
            format!("![{alt}]({})", options.attachment_url(filename))
        }
        Resource::Url(url) => format!("![{}]({url})", alt.unwrap_or_default()),
        Resource::Page { title, .. } => title.clone(),
        Resource::User(name) => format!("@{name}"),
    }
}

/// `ac:link`: a page, attachment, URL or user reference.
pub(super) fn link(
    resource: Option<Resource>,
    body: Option<String>,
    anchor: Option<String>,
    options: &ConvertOptions,
) -> String {
    let (text, href) = match resource {
        Some(Resource::Page { title, space }) => {
            let href = space.map(|space| options.page_url(&space, &title));
            (body.unwrap_or(title), href)
        }
        Some(Resource::Attachment(filename)) => {
            let href = options.attachment_url(&filename);
            (body.unwrap_or(filename), Some(href))
        }
        Some(Resource::Url(url)) => {
            let text = body.unwrap_or_else(|| url.clone());
            (text, Some(url))
        }
        Some(Resource::User(name)) => return body.unwrap_or_else(|| format!("@{name}")),
        None => (body.or(anchor).unwrap_or_default(), None),
    };

    match href {
        Some(href) if !text.is_empty() => format!("[{text}]({href})"),
        Some(href) => href,
        None => text,
    }
}

/// `ac:emoticon`: the fallback glyph, else `:name:`.
pub(super) fn emoticon(fallback: Option<String>, name: Option<String>) -> String {
    match (fallback.filter(|f| !f.is_empty()), name.filter(|n| !n.is_empty())) {
        (Some(glyph), _) => glyph,
        (None, Some(name)) => format!(":{name}:"),
        (None, None) => String::new(),
    }
}

/// Replaces every `<![CDATA[...]]>` section with its HTML-escaped content.
///
/// An HTML parser turns CDATA into a bogus comment, which would drop the body
/// of every code macro.
pub(super) fn unwrap_cdata(markup: &str) -> Cow<'_, str> {
    const OPEN: &str = "<![CDATA[";
    const CLOSE: &str = "]]>";

    if !markup.contains(OPEN) {
        return Cow::Borrowed(markup);
    }

    let mut out = String::with_capacity(markup.len());
    let mut rest = markup;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let (content, tail) = match after.find(CLOSE) {
            Some(end) => (&after[..end], &after[end + CLOSE.len()..]),
            None => (after, ""),
        };
        for ch in content.chars() {
            match ch {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                _ => out.push(ch),
            }
        }
        rest = tail;
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Renames `<p>` and `</p>` tags to [`PARAGRAPH_TAG`].
pub(super) fn rename_paragraphs(markup: &str) -> Cow<'_, str> {
    let bytes = markup.as_bytes();
    let mut out = String::new();
    let mut copied = 0;

    for (at, _) in markup.match_indices('<') {
        let name_at = if bytes.get(at + 1) == Some(&b'/') {
            at + 2
        } else {
            at + 1
        };
        let is_paragraph = bytes.get(name_at).is_some_and(|b| b.eq_ignore_ascii_case(&b'p'))
            && bytes
                .get(name_at + 1)
                .is_some_and(|b| matches!(b, b'>' | b'/') || b.is_ascii_whitespace());
        if is_paragraph {
            out.push_str(&markup[copied..name_at]);
            out.push_str(PARAGRAPH_TAG);
            copied = name_at + 1;
        }
    }

    if copied == 0 {
        return Cow::Borrowed(markup);
    }
    out.push_str(&markup[copied..]);
    Cow::Owned(out)
}
