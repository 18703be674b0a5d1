//! Argument quoting for the submit-file `arguments` line.
//!
//! Input is written the way it would be typed into a shell: double-quoted
//! spans group words and `\"` is a literal double quote. Output uses the
//! scheduler's quoted syntax: the whole value sits in one pair of double
//! quotes, grouped spans use single quotes with `''` for a literal single
//! quote, and `""` is a literal double quote anywhere.
//!
//! A bare `'` cannot appear in the output, since it would open a span. A
//! literal apostrophe outside a double-quoted span is therefore emitted as a
//! span of its own (`''''`), or folded into an adjacent span. Adjacent spans
//! are merged, as they must be: `'a''b'` reads as one span holding `a'b`.

/// One run of the argument, either plain or inside a single-quoted span.
struct Segment {
    quoted: bool,
    text: String,
}

/// Split shell-style input into plain and quoted runs.
fn segments(raw: &str) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::new();
    let mut in_span = false;
    let mut chars = raw.chars().peekable();

    // Append to the last segment when its kind matches, else start a new one.
    fn push(out: &mut Vec<Segment>, quoted: bool, c: Option<char>) {
        match out.last_mut() {
            Some(last) if last.quoted == quoted => {
                last.text.extend(c);
            }
            _ => out.push(Segment {
                quoted,
                text: c.into_iter().collect(),
            }),
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'"') => {
                chars.next();
                push(&mut out, in_span, Some('"'));
            }
            '"' => {
                in_span = !in_span;
                if in_span {
                    // keeps an empty `""` as an empty span
                    push(&mut out, true, None);
                }
            }
            '\'' => push(&mut out, true, Some('\'')),
            c => push(&mut out, in_span, Some(c)),
        }
    }
    out
}

/// Convert a shell-style argument string into scheduler quoted syntax.
pub fn escape_argument(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for segment in segments(raw) {
        let text = segment.text.replace('"', "\"\"");
        if segment.quoted {
            out.push('\'');
            out.push_str(&text.replace('\'', "''"));
            out.push('\'');
        } else {
            out.push_str(&text);
        }
    }
    out.push('"');
    out
}

/// Inverse of [`escape_argument`].
///
/// The outer double quotes are removed and `""` decodes to `\"`. A
/// single-quoted span holding only apostrophes decodes to bare apostrophes;
/// any other span decodes to a double-quoted span in which `''` becomes `'`.
///
/// Inputs that only differ in where a literal apostrophe sits relative to a
/// quoted span (`'"a"` and `"'a"`) mean the same argument and decode to one
/// form.
pub fn decode_argument(escaped: &str) -> String {
    let inner = escaped
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(escaped);

    let mut out = String::with_capacity(inner.len());
    let mut span: Option<String> = None;
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '"' && chars.peek() == Some(&'"') {
            chars.next();
            span.as_mut().unwrap_or(&mut out).push_str("\\\"");
        } else if c == '\'' {
            match span.take() {
                Some(mut text) if chars.peek() == Some(&'\'') => {
                    chars.next();
                    text.push('\'');
                    span = Some(text);
                }
                Some(text) => close_span(&mut out, &text),
                None => span = Some(String::new()),
            }
        } else {
            span.as_mut().unwrap_or(&mut out).push(c);
        }
    }
    if let Some(text) = span {
        close_span(&mut out, &text);
    }
    out
}

fn close_span(out: &mut String, text: &str) {
    if !text.is_empty() && text.chars().all(|c| c == '\'') {
        out.push_str(text);
    } else {
        out.push('"');
        out.push_str(text);
        out.push('"');
    }
}
