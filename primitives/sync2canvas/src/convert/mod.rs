//! Markup Converter - Confluence Storage Format to Slack Canvas Markdown
//!
//! Parses the page markup with html5ever and walks the tree once, emitting
//! Markdown per element. Elements without a Markdown equivalent degrade to
//! their text, or to a `_[unsupported macro: NAME]_` placeholder for macros
//! that carry no text at all; conversion itself never fails.
//!
//! # Example
//!
//! ```
//! use sync2canvas::convert;
//!
//! let markdown = convert("<h1>Hi</h1><p>Hello <b>world</b></p>");
//! assert_eq!(markdown, "# Hi\n\nHello **world**");
//! ```

mod confluence;
mod text;
mod tree;

use std::collections::HashMap;

use html5ever::{ParseOpts, parse_document, tendril::TendrilSink};
use markup5ever_rcdom::RcDom;
use reqwest::Url;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::document::Document;

/// Errors raised while turning a page into publishable Markdown.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("page {page_id} converted to empty Markdown; nothing to publish")]
    Empty { page_id: String },
}

/// Links that conversion needs to resolve.
///
/// With no base URL, relative links stay relative and attachments are
/// referenced by file name only.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Confluence base URL for relative links, attachments and page links.
    pub base_url: Option<Url>,
    /// Page the attachments belong to.
    pub page_id: Option<String>,
    /// Jira instance for `jira` macros.
    pub jira_url: Option<Url>,
    /// Attachment file names already re-hosted, mapped to their permalink.
    pub hosted: HashMap<String, String>,
}

impl ConvertOptions {
    /// Resolves `/`-relative hrefs against the base URL.
    fn resolve_href(&self, href: &str) -> String {
        if href.starts_with('/') && !href.starts_with("//") {
            if let Some(joined) = self.base_url.as_ref().and_then(|b| b.join(href).ok()) {
                return joined.to_string();
            }
        }
        href.to_string()
    }

    /// The hosted permalink, else `{base}/download/attachments/{page_id}/{filename}`.
    fn attachment_url(&self, filename: &str) -> String {
        if let Some(permalink) = self.hosted.get(filename) {
            return permalink.clone();
        }
        match (&self.base_url, &self.page_id) {
            (Some(base), Some(page_id)) => {
                with_segments(base, &["download", "attachments", page_id, filename])
            }
            _ => filename.to_string(),
        }
    }

    /// `{base}/display/{space}/{title}`
    fn page_url(&self, space: &str, title: &str) -> String {
        match &self.base_url {
            Some(base) => with_segments(base, &["display", space, title]),
            None => title.to_string(),
        }
    }

    /// `{jira}/browse/{key}`
    fn jira_issue_url(&self, key: &str) -> String {
        match &self.jira_url {
            Some(jira) => with_segments(jira, &["browse", key]),
            None => key.to_string(),
        }
    }
}

/// Appends percent-encoded path segments to `base`.
fn with_segments(base: &Url, segments: &[&str]) -> String {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url.to_string()
}

/// A converted page, ready to publish and write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionResult {
    pub title: String,
    #[serde(rename = "markdown")]
    pub markdown_text: String,
    #[serde(rename = "author")]
    pub author_name: String,
}

/// Converts markup and builds [`ConversionResult`]s.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    options: ConvertOptions,
    attribute_author: bool,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            options,
            attribute_author: false,
        }
    }

    /// Prefix published Markdown with `_Original Author: NAME_`.
    pub fn with_author_attribution(mut self, enabled: bool) -> Self {
        self.attribute_author = enabled;
        self
    }

    /// Converter for the configured Confluence and Jira instances.
    pub fn from_config(config: &Config) -> Self {
        Self::new(ConvertOptions {
            base_url: Some(config.confluence.base_url.clone()),
            page_id: Some(config.page_id.clone()),
            jira_url: Some(config.jira_url.clone()),
            ..ConvertOptions::default()
        })
        .with_author_attribution(config.attribute_author)
    }

    /// Converts storage-format markup to Markdown.
    pub fn convert(&self, raw_markup: &str) -> String {
        let dom = parse(raw_markup);
        let markdown = tree::Walker::new(&self.options).walk(&dom.document);
        text::finish(&markdown)
    }

    /// File names of the attachments a page embeds as images or media, in
    /// document order. Attachments that are only linked are not listed.
    pub fn attachments(&self, raw_markup: &str) -> Vec<String> {
        tree::embedded_attachments(&parse(raw_markup).document)
    }

    /// Converts a fetched page.
    ///
    /// # Errors
    ///
    /// Returns `ConversionError::Empty` when the page yields no Markdown.
    pub fn render(&self, document: &Document) -> Result<ConversionResult, ConversionError> {
        self.render_hosted(document, &HashMap::new())
    }

    /// Like [`render`](Self::render), pointing the attachments in `hosted`
    /// at their permalink instead of the Confluence download URL.
    ///
    /// # Errors
    ///
    /// Returns `ConversionError::Empty` when the page yields no Markdown.
    pub fn render_hosted(
        &self,
        document: &Document,
        hosted: &HashMap<String, String>,
    ) -> Result<ConversionResult, ConversionError> {
        let converter = Self {
            options: ConvertOptions {
                page_id: Some(document.id.clone()),
                hosted: hosted.clone(),
                ..self.options.clone()
            },
            attribute_author: self.attribute_author,
        };

        let body = converter.convert(&document.raw_markup);
        debug!(
            page_id = %document.id,
            markup_bytes = document.raw_markup.len(),
            markdown_bytes = body.len(),
            "Converted page"
        );
        if body.is_empty() {
            return Err(ConversionError::Empty {
                page_id: document.id.clone(),
            });
        }

        let markdown_text = if self.attribute_author {
            format!("_Original Author: {}_\n\n{body}", document.author_name)
        } else {
            body
        };

        Ok(ConversionResult {
            title: document.title.clone(),
            markdown_text,
            author_name: document.author_name.clone(),
        })
    }
}

fn parse(raw_markup: &str) -> RcDom {
    let markup = confluence::unwrap_cdata(raw_markup);
    let markup = confluence::rename_paragraphs(&markup);
    parse_document(RcDom::default(), ParseOpts::default()).one(&*markup)
}

/// Converts markup with default options (links are left relative).
pub fn convert(raw_markup: &str) -> String {
    Converter::default().convert(raw_markup)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn wiki() -> Converter {
        Converter::new(ConvertOptions {
            base_url: Some(Url::parse("https://sync.example.com").unwrap()),
            page_id: Some("123".into()),
            jira_url: Some(Url::parse("https://jira.example.com").unwrap()),
            ..ConvertOptions::default()
        })
    }

    #[test]
    fn plain_paragraph_is_unchanged() {
        assert_eq!(convert("<p>Just some text.</p>"), "Just some text.");
    }

    #[test]
    fn heading_then_paragraph() {
        assert_eq!(convert("<h1>Hi</h1><p>World</p>"), "# Hi\n\nWorld");
        assert_eq!(convert("<h1>Hi</h1>\n  <p>World</p>\n"), "# Hi\n\nWorld");
    }

    #[test]
    fn deep_headings_clamp_to_three_levels() {
        assert_eq!(convert("<h2>Two</h2><h5>Five</h5>"), "## Two\n\n### Five");
    }

    #[test]
    fn bold_and_italic() {
        assert_eq!(convert("<b>text</b>"), "**text**");
        assert_eq!(convert("<i>text</i>"), "_text_");
        assert_eq!(
            convert("<p>a<strong> bold </strong>and <em>it</em>.</p>"),
            "a **bold** and _it_."
        );
    }

    #[test]
    fn strike_and_inline_code() {
        assert_eq!(
            convert("<p><s>old</s> <code>x = 1</code></p>"),
            "~~old~~ `x = 1`"
        );
    }

    #[test]
    fn ordered_list_is_numbered_from_one() {
        let md = convert("<ol><li>first</li><li>second</li><li>third</li></ol>");
        assert_eq!(md, "1. first\n2. second\n3. third");
        assert_eq!(md.lines().count(), 3);
    }

    #[test]
    fn ordered_list_honours_start() {
        assert_eq!(convert("<ol start=\"4\"><li>a</li><li>b</li></ol>"), "4. a\n5. b");
    }

    #[test]
    fn nested_lists_are_indented() {
        let md = convert("<ul><li>one<ul><li>inner</li></ul></li><li><p>two</p></li></ul>");
        assert_eq!(md, "- one\n  - inner\n- two");
    }

    #[test]
    fn blockquote_prefixes_every_line() {
        assert_eq!(
            convert("<blockquote><p>a</p><p>b</p></blockquote>"),
            "> a\n>\n> b"
        );
    }

    #[test]
    fn table_becomes_pipe_rows() {
        let md = convert(
            "<table><tbody><tr><th>Name</th><th>Role</th></tr>\
             <tr><td>Ann</td><td>a|b</td></tr></tbody></table>",
        );
        assert_eq!(md, "| Name | Role |\n| --- | --- |\n| Ann | a\\|b |");
    }

    #[test]
    fn preformatted_keeps_whitespace() {
        let md = convert("<pre>fn main() {\n    run();\n}</pre>");
        assert_eq!(md, "```\nfn main() {\n    run();\n}\n```");
    }

    #[test]
    fn links_resolve_relative_hrefs() {
        let md = wiki().convert(
            "<p><a href=\"/display/ENG/Home\">Home</a> <a href=\"https://x.io\"></a></p>",
        );
        assert_eq!(
            md,
            "[Home](https://sync.example.com/display/ENG/Home) https://x.io"
        );
    }

    #[test]
    fn line_breaks_and_rules() {
        assert_eq!(convert("<p>a<br/>b</p><hr/><p>c</p>"), "a\nb\n\n---\n\nc");
    }

    #[test]
    fn code_macro_with_cdata_becomes_fenced_block() {
        let md = convert(
            "<ac:structured-macro ac:name=\"code\">\
             <ac:parameter ac:name=\"language\">rust</ac:parameter>\
             <ac:plain-text-body><![CDATA[if a < b {\n    go();\n}]]></ac:plain-text-body>\
             </ac:structured-macro>",
        );
        assert_eq!(md, "```rust\nif a < b {\n    go();\n}\n```");
    }

    #[test]
    fn info_macro_becomes_titled_quote() {
        let md = convert(
            "<ac:structured-macro ac:name=\"info\">\
             <ac:parameter ac:name=\"title\">Heads up</ac:parameter>\
             <ac:rich-text-body><p>Deploys freeze on Friday.</p></ac:rich-text-body>\
             </ac:structured-macro>",
        );
        assert_eq!(md, "> **Heads up**\n> Deploys freeze on Friday.");
    }

    #[test]
    fn jira_macro_links_to_issue() {
        let md = wiki().convert(
            "<p>See <ac:structured-macro ac:name=\"jira\">\
             <ac:parameter ac:name=\"server\">JIRA</ac:parameter>\
             <ac:parameter ac:name=\"key\">OPS-42</ac:parameter>\
             </ac:structured-macro></p>",
        );
        assert_eq!(md, "See [OPS-42](https://jira.example.com/browse/OPS-42)");
    }

    #[test]
    fn unknown_macro_keeps_body_or_leaves_placeholder() {
        let md = convert(
            "<ac:structured-macro ac:name=\"toc\"><ac:parameter ac:name=\"maxLevel\">2</ac:parameter></ac:structured-macro>\
             <ac:structured-macro ac:name=\"section\"><ac:rich-text-body><p>kept</p></ac:rich-text-body></ac:structured-macro>",
        );
        assert_eq!(md, "_[unsupported macro: toc]_\n\nkept");
    }

    #[test]
    fn attachment_image_points_at_download_url() {
        let md = wiki().convert(
            "<p><ac:image ac:height=\"250\"><ri:attachment ri:filename=\"flow chart.png\" /></ac:image></p>",
        );
        assert_eq!(
            md,
            "![flow chart.png](https://sync.example.com/download/attachments/123/flow%20chart.png)"
        );
    }

    #[test]
    fn page_link_uses_link_body() {
        let md = wiki().convert(
            "<p><ac:link><ri:page ri:space-key=\"ENG\" ri:content-title=\"On Call\" />\
             <ac:plain-text-link-body><![CDATA[rotation]]></ac:plain-text-link-body></ac:link></p>",
        );
        assert_eq!(md, "[rotation](https://sync.example.com/display/ENG/On%20Call)");
    }

    #[test]
    fn user_mention_renders_name() {
        let md = convert("<p>Ping <ac:link><ri:user ri:username=\"alice\" /></ac:link></p>");
        assert_eq!(md, "Ping @alice");
    }

    #[test]
    fn task_list_becomes_checklist() {
        let md = convert(
            "<ac:task-list>\
             <ac:task><ac:task-id>1</ac:task-id><ac:task-status>complete</ac:task-status><ac:task-body>ship</ac:task-body></ac:task>\
             <ac:task><ac:task-id>2</ac:task-id><ac:task-status>incomplete</ac:task-status><ac:task-body>announce</ac:task-body></ac:task>\
             </ac:task-list>",
        );
        assert_eq!(md, "- [x] ship\n- [ ] announce");
    }

    #[test]
    fn unknown_elements_keep_their_text() {
        assert_eq!(convert("<p><custom-thing>inner <span>text</span></custom-thing></p>"), "inner text");
    }

    #[test]
    fn script_and_style_are_dropped() {
        assert_eq!(convert("<style>p{}</style><p>x</p><script>alert(1)</script>"), "x");
    }

    #[test]
    fn nbsp_becomes_space() {
        assert_eq!(convert("<p>a&nbsp;&nbsp;b</p>"), "a b");
    }

    #[test]
    fn deep_nesting_does_not_overflow() {
        let depth = 1000;
        let markup = format!("{}deep{}", "<div>".repeat(depth), "</div>".repeat(depth));
        assert_eq!(convert(&markup), "deep");

        let quotes = format!(
            "{}q{}",
            "<blockquote>".repeat(50),
            "</blockquote>".repeat(50)
        );
        let md = convert(&quotes);
        assert!(md.ends_with("> q"));
        assert!(md.starts_with("> > >"));
    }

    #[test]
    fn every_element_type_yields_the_heading() {
        let samples = [
            "<p>x</p>",
            "<b>x</b>",
            "<ul><li>x</li></ul>",
            "<table><tr><td>x</td></tr></table>",
            "<pre>x</pre>",
            "<blockquote>x</blockquote>",
            "<ac:structured-macro ac:name=\"chart\"></ac:structured-macro>",
        ];
        for sample in samples {
            let md = convert(&format!("<h1>Title</h1>{sample}"));
            assert!(md.starts_with("# Title"), "{sample}: {md}");
            assert!(md.len() > "# Title".len(), "{sample}: {md}");
        }
    }

    #[test]
    fn render_builds_result_from_document() {
        let document = Document {
            id: "123".into(),
            title: "Spec".into(),
            raw_markup: "<h1>Hi</h1><p>World</p>".into(),
            author_name: "alice".into(),
        };

        let result = wiki().render(&document).unwrap();
        assert_eq!(
            result,
            ConversionResult {
                title: "Spec".into(),
                markdown_text: "# Hi\n\nWorld".into(),
                author_name: "alice".into(),
            }
        );

        let attributed = wiki().with_author_attribution(true).render(&document).unwrap();
        assert_eq!(
            attributed.markdown_text,
            "_Original Author: alice_\n\n# Hi\n\nWorld"
        );
    }

    #[test]
    fn render_rejects_empty_pages() {
        let document = Document {
            id: "9".into(),
            title: "Blank".into(),
            raw_markup: "<p>  </p>".into(),
            author_name: "bob".into(),
        };
        let err = wiki().render(&document).unwrap_err();
        assert!(matches!(err, ConversionError::Empty { page_id } if page_id == "9"));
    }

    #[test]
    fn preformatted_keeps_blank_lines() {
        assert_eq!(convert("<pre>a\n\n\nb</pre>"), "```\na\n\n\nb\n```");
    }

    #[test]
    fn code_macro_keeps_blank_lines() {
        let md = convert(
            "<ac:structured-macro ac:name=\"code\">\
             <ac:parameter ac:name=\"language\">python</ac:parameter>\
             <ac:plain-text-body><![CDATA[import os\n\n\ndef main():\n    pass]]></ac:plain-text-body>\
             </ac:structured-macro>",
        );
        assert_eq!(md, "```python\nimport os\n\n\ndef main():\n    pass\n```");
    }

    #[test]
    fn code_in_list_item_keeps_blank_lines() {
        let md = convert("<ul><li>step<pre>x = 1\n\ny = 2</pre></li></ul>");
        assert_eq!(md, "- step\n  ```\n  x = 1\n\n  y = 2\n  ```");
    }

    #[test]
    fn code_body_containing_a_fence_is_kept_whole() {
        let md = convert(
            "<ac:structured-macro ac:name=\"code\">\
             <ac:plain-text-body><![CDATA[```\nx   \n```\n\n\nafter]]></ac:plain-text-body>\
             </ac:structured-macro><p>next</p>",
        );
        assert_eq!(md, "````\n```\nx   \n```\n\n\nafter\n````\n\nnext");
    }

    #[test]
    fn markdown_syntax_in_text_is_escaped() {
        assert_eq!(convert("<p># not a heading</p>"), "\\# not a heading");
        assert_eq!(convert("<p>1. foo</p>"), "1\\. foo");
        assert_eq!(convert("<p>- not a list</p>"), "\\- not a list");
        assert_eq!(convert("<p>> not a quote</p>"), "\\> not a quote");
        assert_eq!(convert("<p>use snake_case and 2*3</p>"), "use snake\\_case and 2\\*3");
    }

    #[test]
    fn code_and_macro_values_are_not_escaped() {
        assert_eq!(convert("<p><code>a_b * c</code></p>"), "`a_b * c`");
        let md = wiki().convert(
            "<p><ac:structured-macro ac:name=\"jira\">\
             <ac:parameter ac:name=\"key\">OPS_1</ac:parameter>\
             </ac:structured-macro></p>",
        );
        assert_eq!(md, "[OPS_1](https://jira.example.com/browse/OPS_1)");
    }

    #[test]
    fn callout_inside_paragraph_stays_quoted() {
        let md = convert(
            "<p>See <ac:structured-macro ac:name=\"info\">\
             <ac:rich-text-body><p>x</p></ac:rich-text-body>\
             </ac:structured-macro></p>",
        );
        assert_eq!(md, "See\n\n> x");
    }

    #[test]
    fn embedded_attachments_are_listed_once_in_order() {
        let markup = "<p><ac:image><ri:attachment ri:filename=\"b.png\" /></ac:image></p>\
             <p><ac:link><ri:attachment ri:filename=\"linked.pdf\" /></ac:link></p>\
             <ac:structured-macro ac:name=\"multimedia\">\
             <ac:parameter ac:name=\"name\"><ri:attachment ri:filename=\"demo.mp4\" /></ac:parameter>\
             </ac:structured-macro>\
             <p><ac:image><ri:attachment ri:filename=\"b.png\" /></ac:image>\
             <ac:image><ri:url ri:value=\"https://x.io/a.png\" /></ac:image></p>";

        assert_eq!(wiki().attachments(markup), vec!["b.png", "demo.mp4"]);
    }

    #[test]
    fn hosted_attachments_use_their_permalink() {
        let document = Document {
            id: "123".into(),
            title: "Spec".into(),
            raw_markup: "<p><ac:image><ri:attachment ri:filename=\"a.png\" /></ac:image>\
                         <ac:image><ri:attachment ri:filename=\"b.png\" /></ac:image></p>"
                .into(),
            author_name: "alice".into(),
        };
        let hosted = HashMap::from([(
            "a.png".to_string(),
            "https://files.slack.com/files-pri/T1-F1/a.png".to_string(),
        )]);

        let result = wiki().render_hosted(&document, &hosted).unwrap();
        assert_eq!(
            result.markdown_text,
            "![a.png](https://files.slack.com/files-pri/T1-F1/a.png)\
             ![b.png](https://sync.example.com/download/attachments/123/b.png)"
        );
    }
}
