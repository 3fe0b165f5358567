//! Splits chat text into typed segments for display.
//!
//! Passes run in a fixed order over the unescaped source:
//! - fenced blocks: a triple backtick, an optional `[A-Za-z0-9_]+` tag and a
//!   newline, closed by the next triple backtick
//! - bare `http://` / `https://` URLs up to the next whitespace
//! - single-backtick spans with at least one character inside
//! - everything else is text, with each newline kept as a `LineBreak`
//!
//! Escaping happens only when a leaf segment is built, so nothing is escaped
//! twice. A fence without a closing delimiter is plain text, and nested fences
//! are not supported: the first closing delimiter ends the block.

pub const FENCE: &str = "```";
pub const DEFAULT_LANGUAGE: &str = "plaintext";
pub const RUNNABLE_LANGUAGE: &str = "python";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentSegment {
    /// Escaped prose.
    Text(String),
    /// Escaped contents of a single-backtick span.
    InlineCode(String),
    /// Raw code of a fenced block.
    FencedCode {
        language: String,
        code: String,
        runnable: bool,
    },
    Link(String),
    LineBreak,
}

/// Neutralizes `& < > " '` for HTML output.
pub fn escape(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#039;"),
            _ => result.push(c),
        }
    }
    result
}

pub fn render(raw: &str) -> Vec<ContentSegment> {
    let mut segments = Vec::new();
    for piece in split_fences(raw) {
        match piece {
            Piece::Prose(text) => render_prose(text, &mut segments),
            Piece::Fence { language, code } => {
                let language = language.unwrap_or(DEFAULT_LANGUAGE);
                segments.push(ContentSegment::FencedCode {
                    language: language.to_string(),
                    code: code.to_string(),
                    runnable: language == RUNNABLE_LANGUAGE,
                });
            }
        }
    }
    segments
}

/// Code of every runnable block, in order of appearance.
pub fn runnable_blocks(raw: &str) -> Vec<String> {
    split_fences(raw)
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Fence { language: Some(RUNNABLE_LANGUAGE), code } => Some(code.to_string()),
            _ => None,
        })
        .collect()
}

/// The message as plain text: fence delimiters and language tags removed,
/// everything else untouched.
pub fn copy_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for piece in split_fences(raw) {
        match piece {
            Piece::Prose(text) => out.push_str(text),
            Piece::Fence { code, .. } => out.push_str(code),
        }
    }
    out
}

pub fn to_html(segments: &[ContentSegment]) -> String {
    let mut html = String::new();
    for segment in segments {
        match segment {
            ContentSegment::Text(text) => html.push_str(text),
            ContentSegment::InlineCode(code) => {
                html.push_str("<code>");
                html.push_str(&code.replace('\n', "<br>"));
                html.push_str("</code>");
            }
            ContentSegment::Link(url) => {
                let url = escape(url);
                html.push_str(&format!("<a href=\"{}\" target=\"_blank\">{}</a>", url, url));
            }
            ContentSegment::LineBreak => html.push_str("<br>"),
            ContentSegment::FencedCode { language, code, runnable } => {
                html.push_str("<div class=\"code-block\"><div class=\"code-header\">");
                html.push_str(&format!("<div class=\"code-language\">{}</div>", escape(language)));
                html.push_str("<div class=\"code-actions\">");
                html.push_str("<button class=\"code-action-btn copy-code-btn\" title=\"Copy code\"></button>");
                if *runnable {
                    html.push_str("<button class=\"code-action-btn run-code-btn\" title=\"Run code\">Run</button>");
                }
                html.push_str("</div></div>");
                html.push_str(
                    &format!(
                        "<pre class=\"code-content\"><code class=\"language-{}\">{}</code></pre></div>",
                        escape(language),
                        escape(code)
                    )
                );
            }
        }
    }
    html
}

#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Prose(&'a str),
    Fence {
        language: Option<&'a str>,
        code: &'a str,
    },
}

fn split_fences(raw: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut prose_start = 0;
    let mut i = 0;

    while i < raw.len() {
        if raw[i..].starts_with(FENCE) {
            if let Some((language, code, end)) = match_fence(raw, i) {
                if prose_start < i {
                    pieces.push(Piece::Prose(&raw[prose_start..i]));
                }
                pieces.push(Piece::Fence { language, code });
                i = end;
                prose_start = end;
                continue;
            }
        }
        i += next_char_len(raw, i);
    }

    if prose_start < raw.len() {
        pieces.push(Piece::Prose(&raw[prose_start..]));
    }
    pieces
}

/// Tries a fence opening at byte `start`. Returns the tag, the code and the
/// byte offset just past the closing delimiter.
fn match_fence(raw: &str, start: usize) -> Option<(Option<&str>, &str, usize)> {
    let bytes = raw.as_bytes();
    let tag_start = start + FENCE.len();
    let mut j = tag_start;
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    let language = if j > tag_start { Some(&raw[tag_start..j]) } else { None };

    // Trailing blanks after the tag are tolerated.
    while j < bytes.len() && matches!(bytes[j], b' ' | b'\t' | b'\r') {
        j += 1;
    }
    if bytes.get(j) != Some(&b'\n') {
        return None;
    }

    let code_start = j + 1;
    let close = raw[code_start..].find(FENCE)?;
    let code_end = code_start + close;
    Some((language, &raw[code_start..code_end], code_end + FENCE.len()))
}

fn render_prose(text: &str, segments: &mut Vec<ContentSegment>) {
    for (is_link, piece) in split_links(text) {
        if is_link {
            segments.push(ContentSegment::Link(piece.to_string()));
        } else {
            render_inline(piece, segments);
        }
    }
}

fn split_links(text: &str) -> Vec<(bool, &str)> {
    let mut pieces = Vec::new();
    let mut plain_start = 0;
    let mut i = 0;

    while i < text.len() {
        if let Some(end) = match_url(text, i) {
            if plain_start < i {
                pieces.push((false, &text[plain_start..i]));
            }
            pieces.push((true, &text[i..end]));
            i = end;
            plain_start = end;
            continue;
        }
        i += next_char_len(text, i);
    }

    if plain_start < text.len() {
        pieces.push((false, &text[plain_start..]));
    }
    pieces
}

fn match_url(text: &str, start: usize) -> Option<usize> {
    let rest = &text[start..];
    let scheme = ["https://", "http://"].into_iter().find(|s| rest.starts_with(s))?;
    let body_start = start + scheme.len();
    let body_len = text[body_start..]
        .find(char::is_whitespace)
        .unwrap_or(text.len() - body_start);
    if body_len == 0 {
        None
    } else {
        Some(body_start + body_len)
    }
}

fn render_inline(text: &str, segments: &mut Vec<ContentSegment>) {
    let mut plain_start = 0;
    let mut i = 0;

    while i < text.len() {
        if text.as_bytes()[i] == b'`' {
            if let Some(close) = text[i + 1..].find('`') {
                if close > 0 {
                    render_text(&text[plain_start..i], segments);
                    let inner = &text[i + 1..i + 1 + close];
                    segments.push(ContentSegment::InlineCode(escape(inner)));
                    i += close + 2;
                    plain_start = i;
                    continue;
                }
            }
        }
        i += next_char_len(text, i);
    }

    render_text(&text[plain_start..], segments);
}

fn render_text(text: &str, segments: &mut Vec<ContentSegment>) {
    for (n, line) in text.split('\n').enumerate() {
        if n > 0 {
            segments.push(ContentSegment::LineBreak);
        }
        if !line.is_empty() {
            segments.push(ContentSegment::Text(escape(line)));
        }
    }
}

fn next_char_len(text: &str, i: usize) -> usize {
    text[i..].chars().next().map_or(1, char::len_utf8)
}
