//! String helpers shared by the tree walker and the macro renderers.

/// Collapses every whitespace run (NBSP included) to a single space.
pub(super) fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

/// Appends a text node to `buf`.
///
/// Leading whitespace is dropped at the start of a line, after a space, and
/// at the start of a block buffer. With `escape`, characters that Markdown
/// would read as syntax are backslash-escaped.
pub(super) fn push_text(buf: &mut String, text: &str, block_start: bool, escape: bool) {
    let text = collapse_whitespace(text);
    let line_start = (buf.is_empty() && block_start) || buf.ends_with('\n');
    let text = if line_start || buf.ends_with(' ') {
        text.trim_start()
    } else {
        text.as_str()
    };
    if !escape {
        buf.push_str(text);
        return;
    }
    if line_start {
        escape_line_start(buf, text);
    } else {
        escape_inline(buf, text);
    }
}

/// Escapes emphasis and code delimiters.
fn escape_inline(buf: &mut String, text: &str) {
    for ch in text.chars() {
        if matches!(ch, '*' | '_' | '`' | '\\') {
            buf.push('\\');
        }
        buf.push(ch);
    }
}

/// Escapes text that would open a heading, quote, list item or rule when it
/// starts a line.
fn escape_line_start(buf: &mut String, text: &str) {
    let mut chars = text.chars();
    let first = chars.next();
    let second = chars.next();
    let spaced = |c: Option<char>| c.is_none_or(|c| c == ' ');

    match first {
        Some('>') => buf.push('\\'),
        Some('#') if spaced(second) || second == Some('#') => buf.push('\\'),
        Some('-' | '+') if spaced(second) => buf.push('\\'),
        Some('=') if second.is_none_or(|c| c == '=') => buf.push('\\'),
        Some(c) if c.is_ascii_digit() => {
            let digits = text.len() - text.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            let rest = &text[digits..];
            let mut tail = rest.chars();
            if matches!(tail.next(), Some('.' | ')')) && spaced(tail.next()) {
                buf.push_str(&text[..digits]);
                buf.push('\\');
                escape_inline(buf, rest);
                return;
            }
        }
        _ => {}
    }
    escape_inline(buf, text);
}

/// Appends inline output, dropping leading spaces at the start of a line.
pub(super) fn push_inline(buf: &mut String, inline: &str) {
    let inline = if buf.is_empty() || buf.ends_with('\n') {
        inline.trim_start_matches(' ')
    } else {
        inline
    };
    buf.push_str(inline);
}

/// Appends a block separated from its neighbours by blank lines.
pub(super) fn push_block(buf: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    let kept = buf.trim_end_matches([' ', '\t']).len();
    buf.truncate(kept);
    if !buf.is_empty() {
        while !buf.ends_with("\n\n") {
            buf.push('\n');
        }
    }
    buf.push_str(block);
    buf.push_str("\n\n");
}

/// Wraps `content` in `delim`, keeping surrounding whitespace outside.
///
/// Whitespace-only content is returned unchanged.
pub(super) fn wrap_delimited(content: &str, delim: &str) -> String {
    let core = content.trim();
    if core.is_empty() {
        return content.to_string();
    }
    let lead = &content[..content.len() - content.trim_start().len()];
    let trail = &content[content.trim_end().len()..];
    format!("{lead}{delim}{core}{delim}{trail}")
}

/// Inline code span; widens the delimiter when the text holds backticks.
pub(super) fn code_span(content: &str) -> String {
    let core = content.trim();
    if core.is_empty() {
        String::new()
    } else if core.contains('`') {
        format!("`` {core} ``")
    } else {
        format!("`{core}`")
    }
}

/// Fenced code block with an optional language tag.
///
/// The fence is one backtick longer than any run inside the body.
pub(super) fn fence(body: &str, language: &str) -> String {
    let body = body.trim_matches('\n').trim_end();
    let longest = body
        .split(|c: char| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let marker = "`".repeat(longest.max(2) + 1);
    format!("{marker}{}\n{body}\n{marker}", language.trim())
}

/// Opening fence of a code block: the fence character and its length.
fn fence_opener(line: &str) -> Option<(char, usize)> {
    let line = line.trim_start();
    let ch = line.chars().next().filter(|c| matches!(c, '`' | '~'))?;
    let len = line.len() - line.trim_start_matches(ch).len();
    (len >= 3).then_some((ch, len))
}

/// A line made only of at least `len` fence characters closes the block.
fn closes_fence(line: &str, (ch, len): (char, usize)) -> bool {
    let line = line.trim();
    line.len() >= len && line.chars().all(|c| c == ch)
}

/// Joins all lines into one, as required inside headings and table cells.
pub(super) fn single_line(content: &str) -> String {
    collapse_whitespace(content.trim())
}

/// Prefixes every line with `> `; blank lines become a bare `>`.
pub(super) fn quote_lines(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders one list item: `marker` on the first line, the rest indented.
///
/// Blank lines outside code fences are dropped so nested blocks stay attached.
fn list_item(content: &str, marker: &str) -> String {
    let indent = " ".repeat(marker.len());
    let mut out = String::new();
    let mut open_fence = None;

    for line in content.lines() {
        match open_fence {
            Some(fence) => {
                if closes_fence(line, fence) {
                    open_fence = None;
                }
            }
            None if line.trim().is_empty() => continue,
            None => open_fence = fence_opener(line),
        }

        if out.is_empty() {
            out.push_str(marker);
        } else {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&indent);
            }
        }
        out.push_str(line);
    }

    if out.is_empty() {
        marker.trim_end().to_string()
    } else {
        out
    }
}

/// Renders list items as `- ` or `N. ` lines.
pub(super) fn render_list(items: &[String], ordered: bool, start: usize) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let marker = if ordered {
                format!("{}. ", start + i)
            } else {
                "- ".to_string()
            };
            list_item(item, &marker)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalises a table cell: one line, pipes escaped.
pub(super) fn table_cell(content: &str) -> String {
    single_line(content).replace('|', "\\|")
}

/// Renders pipe-delimited rows; the first row is the header.
pub(super) fn render_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    if columns == 0 {
        return String::new();
    }

    let line = |cells: &[String]| {
        let padded: Vec<&str> = (0..columns)
            .map(|i| cells.get(i).map_or("", String::as_str))
            .collect();
        format!("| {} |", padded.join(" | "))
    };

    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(line(&rows[0]));
    out.push(format!("|{}", " --- |".repeat(columns)));
    out.extend(rows[1..].iter().map(|row| line(row)));
    out.join("\n")
}

/// Final cleanup: trailing spaces outside code fences are removed, runs of
/// blank lines collapse to one, and the result is trimmed. Fenced blocks
/// pass through unchanged.
pub(super) fn finish(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut open_fence = None;
    let mut blank_run = false;

    for line in markdown.split('\n') {
        if let Some(fence) = open_fence {
            out.push('\n');
            out.push_str(line);
            if closes_fence(line, fence) {
                open_fence = None;
            }
            continue;
        }

        let line = line.trim_end();
        if line.is_empty() {
            blank_run = true;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        open_fence = fence_opener(line);
        blank_run = false;
    }

    out.trim().to_string()
}
