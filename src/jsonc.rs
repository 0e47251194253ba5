//! JSONC codec for proxy rule documents.
//!
//! A document has the shape:
//!
//! ```text
//! {
//!   "proxy": [
//!     ["^https://api.example.com/(.*)", "http://localhost:3000/\\1"],
//!     // ["^https://cdn.example.com/(.*)", "http://localhost:3001/\\1"],
//!   ]
//! }
//! ```
//!
//! A commented-out two-element entry inside the `proxy` array is a disabled
//! rule. Toggling a rule is line-oriented text surgery, so formatting and
//! unrelated comments survive.
//!
//! Rule ids are positional: every entry of the `proxy` array, live or
//! commented out, is numbered by where it sits in the text. Ids are stable
//! while toggling but are only unique within one decode.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};
use crate::types::ProxyRule;

/// Key of the rule array in the top-level object
pub const PROXY_KEY: &str = "proxy";

const INLINE_WHITESPACE: &[char] = &[' ', '\t'];

/// Leading line-comment marker plus the whitespace after it
static COMMENT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)//\s*").expect("COMMENT_MARKER: hardcoded regex is invalid")
});

/// Decode a JSONC document into rules.
///
/// Enabled rules come first in array order, then disabled rules in the order
/// their comment blocks appear. A document without an array-typed `proxy`
/// property yields an empty list.
pub fn text_to_rules(text: &str) -> Result<Vec<ProxyRule>> {
    // Masking and comma removal keep newlines, so error lines match `text`
    let cleaned = remove_trailing_commas(&strip_comments(text));
    let root: Value = serde_json::from_str(&cleaned).map_err(parse_error)?;

    let Some(entries) = root.get(PROXY_KEY).and_then(Value::as_array) else {
        warn!("rule document has no \"{}\" array", PROXY_KEY);
        return Ok(Vec::new());
    };

    let layout = scan_layout(text).unwrap_or_default();
    let code_ids: Vec<u64> = layout
        .slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| matches!(slot.kind, SlotKind::Code { .. }))
        .map(|(idx, _)| idx as u64)
        .collect();
    let array_count = entries.iter().filter(|e| e.is_array()).count();
    let positional = code_ids.len() == array_count;
    if !positional {
        debug!(
            code_slots = code_ids.len(),
            array_count, "layout does not line up with parsed entries, numbering sequentially"
        );
    }

    let mut rules = Vec::with_capacity(entries.len());
    let mut array_index = 0usize;
    for (position, entry) in entries.iter().enumerate() {
        let Some(items) = entry.as_array() else {
            warn!(position, "dropping proxy entry that is not an array");
            continue;
        };
        let id = if positional {
            code_ids[array_index]
        } else {
            position as u64
        };
        array_index += 1;

        match string_pair(items) {
            Some((pattern, target)) => rules.push(ProxyRule::new(id, pattern, target)),
            None => warn!(position, "dropping proxy entry that is not a [pattern, target] pair"),
        }
    }

    let mut next_sequential = entries.len() as u64;
    for (idx, slot) in layout.slots.iter().enumerate() {
        if let SlotKind::Commented { pattern, target } = &slot.kind {
            let id = if positional {
                idx as u64
            } else {
                let id = next_sequential;
                next_sequential += 1;
                id
            };
            rules.push(ProxyRule::new(id, pattern.as_str(), target.as_str()).with_enabled(false));
        }
    }

    Ok(rules)
}

fn parse_error(e: serde_json::Error) -> ProxyError {
    if e.line() == 0 {
        return ProxyError::Parse(format!("invalid rule document: {}", e));
    }
    ProxyError::ParseAtLine {
        line: e.line(),
        message: format!("invalid rule document: {}", e),
    }
}

/// Render rules as a canonical JSONC document, one entry per line.
pub fn rules_to_text(rules: &[ProxyRule]) -> String {
    let mut out = String::from("{\n  \"proxy\": [\n");
    for rule in rules {
        out.push_str(&format!("    {}\n", entry_line(rule)));
    }
    out.push_str("  ]\n}\n");
    out
}

/// Append rules at the end of the `proxy` array.
///
/// Everything already in the text, comments and formatting included, is
/// kept. New entries take the indentation of the last existing entry.
/// Returns `None` when the text has no closed `proxy` array.
pub fn append_rules(text: &str, rules: &[ProxyRule]) -> Option<String> {
    let masked = strip_comments(text);
    let array = find_proxy_array(&masked)?;
    let close = array.close?;
    if rules.is_empty() {
        return Some(text.to_string());
    }

    // End of the last live token before `]`; masked comments count as blank
    let last = masked[..close].trim_end().len();
    let needs_comma = !matches!(masked.as_bytes().get(last.wrapping_sub(1)), Some(b'[' | b','));

    let close_line = text[..close].rfind('\n').map_or(0, |p| p + 1);
    let close_indent = leading_whitespace(&text[close_line..]);
    let entry_indent = match array.entries.last() {
        Some(&(start, _)) => {
            let line = text[..start].rfind('\n').map_or(0, |p| p + 1);
            leading_whitespace(&text[line..]).to_string()
        }
        None => format!("{}  ", close_indent),
    };
    let block: String = rules
        .iter()
        .map(|rule| format!("{}{}\n", entry_indent, entry_line(rule)))
        .collect();

    let mut out = String::with_capacity(text.len() + block.len() + 2);
    out.push_str(&text[..last]);
    if needs_comma {
        out.push(',');
    }
    if close_line > last && masked[close_line..close].trim().is_empty() {
        out.push_str(&text[last..close_line]);
        out.push_str(&block);
        out.push_str(&text[close_line..]);
    } else {
        out.push_str(&text[last..close]);
        out.push('\n');
        out.push_str(&block);
        out.push_str(close_indent);
        out.push_str(&text[close..]);
    }
    Some(out)
}

/// One array entry with its trailing comma, commented out when disabled.
fn entry_line(rule: &ProxyRule) -> String {
    let entry = format!(
        "[{}, {}],",
        Value::String(rule.pattern.clone()),
        Value::String(rule.target.clone())
    );
    if rule.enabled {
        entry
    } else {
        format!("// {}", entry)
    }
}

/// Enable or disable the entry with the given id, returning the input
/// unchanged when the entry cannot be located.
pub fn set_rule_enabled(text: &str, rule_id: u64, enabled: bool) -> String {
    match try_set_rule_enabled(text, rule_id, enabled) {
        Ok(updated) => updated,
        Err(e) => {
            warn!(rule_id, error = %e, "leaving rule text unchanged");
            text.to_string()
        }
    }
}

/// Enable or disable the entry with the given id.
///
/// Disabling prefixes every non-blank line of the entry with `// ` after its
/// indentation; lines already commented are left alone. Enabling strips one
/// leading marker and the whitespace after it. An entry sharing a line with
/// other code is first moved onto lines of its own.
pub fn try_set_rule_enabled(text: &str, rule_id: u64, enabled: bool) -> Result<String> {
    let not_found = || ProxyError::RuleNotFound { rule_id };
    let layout = scan_layout(text).ok_or_else(not_found)?;
    let slot = usize::try_from(rule_id)
        .ok()
        .and_then(|idx| layout.slots.get(idx))
        .ok_or_else(not_found)?;

    let updated = match (&slot.kind, enabled) {
        (SlotKind::Code { .. }, true) | (SlotKind::Commented { .. }, false) => text.to_string(),
        (SlotKind::Code { start, end }, false) => comment_out_entry(text, *start, *end),
        (SlotKind::Commented { .. }, true) => {
            map_lines(text, slot.first_line, slot.last_line, uncomment_line)
        }
    };
    Ok(updated)
}

/// Blank out `//` and `/* */` comments that sit outside string literals.
///
/// Comment bytes become spaces and newlines are kept, so byte offsets and
/// line numbers of the result match the input.
pub fn strip_comments(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            out.push(b);
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match (b, bytes.get(i + 1)) {
            (b'"', _) => {
                in_string = true;
                out.push(b);
                i += 1;
            }
            (b'/', Some(b'/')) => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out.push(b' ');
                    i += 1;
                }
            }
            (b'/', Some(b'*')) => {
                out.extend_from_slice(b"  ");
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        out.extend_from_slice(b"  ");
                        i += 2;
                        break;
                    }
                    out.push(if bytes[i] == b'\n' { b'\n' } else { b' ' });
                    i += 1;
                }
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }

    // Only whole comment spans were replaced, so the bytes stay valid UTF-8
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Remove commas that directly precede `]` or `}` outside string literals.
pub fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let mut lookahead = chars.clone();
                let trailing = loop {
                    match lookahead.next() {
                        Some(ch) if ch.is_whitespace() => continue,
                        Some(']') | Some('}') => break true,
                        _ => break false,
                    }
                };
                if !trailing {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Check whether a line holds nothing but a `//` comment
pub fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with("//")
}

fn string_pair(items: &[Value]) -> Option<(String, String)> {
    match items {
        [Value::String(pattern), Value::String(target)] => {
            Some((pattern.trim().to_string(), target.trim().to_string()))
        }
        _ => None,
    }
}

/// One entry of the `proxy` array as it appears in the text
#[derive(Debug, Clone)]
struct Slot {
    first_line: usize,
    last_line: usize,
    /// Byte offset of the opening bracket, used for ordering
    start: usize,
    kind: SlotKind,
}

#[derive(Debug, Clone)]
enum SlotKind {
    /// Live array element spanning `start..end` bytes
    Code { start: usize, end: usize },
    /// Commented-out `[pattern, target]` pair
    Commented { pattern: String, target: String },
}

#[derive(Debug, Clone, Default)]
struct Layout {
    slots: Vec<Slot>,
}

/// Locate every live and commented-out entry of the `proxy` array.
fn scan_layout(text: &str) -> Option<Layout> {
    let masked = strip_comments(text);
    let array = find_proxy_array(&masked)?;
    let line_starts = line_starts(text);
    let lines: Vec<&str> = text.split('\n').collect();

    let mut slots: Vec<Slot> = array
        .entries
        .iter()
        .map(|&(start, end)| Slot {
            first_line: line_of(&line_starts, start),
            last_line: line_of(&line_starts, end.saturating_sub(1)),
            start,
            kind: SlotKind::Code { start, end },
        })
        .collect();

    let open_line = line_of(&line_starts, array.open);
    let close_line = array
        .close
        .map(|c| line_of(&line_starts, c))
        .unwrap_or(lines.len());
    let inside_code = |line_no: usize| {
        slots
            .iter()
            .any(|s| s.first_line <= line_no && line_no <= s.last_line)
    };

    let mut commented = Vec::new();
    let mut run = Vec::new();
    for line_no in (open_line + 1)..close_line {
        if is_comment_line(lines[line_no]) && !inside_code(line_no) {
            run.push(line_no);
        } else if !run.is_empty() {
            commented.extend(commented_slots(&lines, &line_starts, &run));
            run.clear();
        }
    }
    if !run.is_empty() {
        commented.extend(commented_slots(&lines, &line_starts, &run));
    }

    slots.extend(commented);
    slots.sort_by_key(|s| s.start);
    Some(Layout { slots })
}

struct ProxyArray {
    open: usize,
    close: Option<usize>,
    entries: Vec<(usize, usize)>,
}

/// Find the `"proxy": [` array of the top-level object in comment-free text.
fn find_proxy_array(masked: &str) -> Option<ProxyArray> {
    let bytes = masked.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let end = string_end(bytes, i)?;
                if depth == 1 && &masked[i + 1..end] == PROXY_KEY {
                    let colon = skip_whitespace(bytes, end + 1);
                    if bytes.get(colon) == Some(&b':') {
                        let open = skip_whitespace(bytes, colon + 1);
                        if bytes.get(open) == Some(&b'[') {
                            return Some(scan_array(bytes, open));
                        }
                    }
                }
                i = end + 1;
                continue;
            }
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Record the byte span of every array-typed element of the array at `open`.
fn scan_array(bytes: &[u8], open: usize) -> ProxyArray {
    let mut depth = 0usize;
    let mut entries = Vec::new();
    let mut entry_start = None;
    let mut i = open;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => match string_end(bytes, i) {
                Some(end) => {
                    i = end + 1;
                    continue;
                }
                None => break,
            },
            b @ (b'[' | b'{') => {
                if depth == 1 && b == b'[' {
                    entry_start = Some(i);
                }
                depth += 1;
            }
            b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    if let Some(start) = entry_start.take() {
                        entries.push((start, i + 1));
                    }
                }
                if depth == 0 {
                    return ProxyArray {
                        open,
                        close: Some(i),
                        entries,
                    };
                }
            }
            _ => {}
        }
        i += 1;
    }

    ProxyArray {
        open,
        close: None,
        entries,
    }
}

/// Parse bracketed pairs out of a run of consecutive comment-only lines.
fn commented_slots(lines: &[&str], line_starts: &[usize], run: &[usize]) -> Vec<Slot> {
    let mut slots = Vec::new();
    let mut buf = String::new();
    let mut depth = 0usize;
    let mut first = (0usize, 0usize);

    for &line_no in run {
        let raw = lines[line_no];
        let body_offset = COMMENT_MARKER.find(raw).map_or(0, |m| m.end());
        let body = strip_comments(&raw[body_offset..]);
        // A disabled entry opens its comment; brackets inside prose do not count
        let lead = body.len() - body.trim_start().len();
        let mut in_string = false;
        let mut escaped = false;

        for (col, ch) in body.char_indices() {
            if depth > 0 {
                buf.push(ch);
            }
            if in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_string = false;
                }
                continue;
            }
            match ch {
                '"' => in_string = true,
                '[' if depth == 0 && col != lead => {}
                '[' => {
                    if depth == 0 {
                        buf.clear();
                        buf.push('[');
                        first = (line_no, line_starts[line_no] + body_offset + col);
                    }
                    depth += 1;
                }
                ']' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        if let Some((pattern, target)) = parse_commented_pair(&buf) {
                            slots.push(Slot {
                                first_line: first.0,
                                last_line: line_no,
                                start: first.1,
                                kind: SlotKind::Commented { pattern, target },
                            });
                        }
                        buf.clear();
                    }
                }
                _ => {}
            }
        }
        if depth > 0 {
            buf.push('\n');
        }
    }
    slots
}

fn parse_commented_pair(fragment: &str) -> Option<(String, String)> {
    let items: Vec<Value> = serde_json::from_str(&remove_trailing_commas(fragment)).ok()?;
    string_pair(&items)
}

/// Comment out the entry spanning `start..end`, splitting it onto its own
/// lines first when other code shares them.
fn comment_out_entry(text: &str, start: usize, end: usize) -> String {
    let masked = strip_comments(text);
    let bytes = masked.as_bytes();

    let mut stop = end;
    let after = skip_inline_whitespace(bytes, end);
    if bytes.get(after) == Some(&b',') {
        stop = after + 1;
    }

    let line_start = text[..start].rfind('\n').map_or(0, |p| p + 1);
    let line_end = text[stop..].find('\n').map_or(text.len(), |p| stop + p);
    let indent = leading_whitespace(&text[line_start..]);
    let split_head = !masked[line_start..start].trim().is_empty();
    let split_tail = !masked[stop..line_end].trim().is_empty();

    let mut rebuilt = String::with_capacity(text.len() + 2 * indent.len() + 2);
    if split_head {
        rebuilt.push_str(text[..start].trim_end_matches(INLINE_WHITESPACE));
        rebuilt.push('\n');
        rebuilt.push_str(indent);
    } else {
        rebuilt.push_str(&text[..start]);
    }
    let first_line = rebuilt.matches('\n').count();
    rebuilt.push_str(&text[start..stop]);
    let last_line = rebuilt.matches('\n').count();
    if split_tail {
        rebuilt.push('\n');
        rebuilt.push_str(indent);
        rebuilt.push_str(text[stop..].trim_start_matches(INLINE_WHITESPACE));
    } else {
        rebuilt.push_str(&text[stop..]);
    }

    map_lines(&rebuilt, first_line, last_line, comment_line)
}

fn comment_line(line: &str) -> String {
    if line.trim().is_empty() || is_comment_line(line) {
        return line.to_string();
    }
    let indent = leading_whitespace(line);
    format!("{}// {}", indent, &line[indent.len()..])
}

fn uncomment_line(line: &str) -> String {
    if is_comment_line(line) {
        COMMENT_MARKER.replace(line, "$1").into_owned()
    } else {
        line.to_string()
    }
}

/// Apply `f` to lines `first..=last`, keeping every other line as is.
fn map_lines(text: &str, first: usize, last: usize, f: fn(&str) -> String) -> String {
    text.split('\n')
        .enumerate()
        .map(|(n, line)| {
            if (first..=last).contains(&n) {
                f(line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Index of the closing quote of the string starting at `open`
fn string_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut escaped = false;
    for (offset, &b) in bytes[open + 1..].iter().enumerate() {
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b'"' {
            return Some(open + 1 + offset);
        }
    }
    None
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn skip_inline_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    i
}

fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start_matches(INLINE_WHITESPACE);
    &line[..line.len() - trimmed.len()]
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

fn line_of(line_starts: &[usize], offset: usize) -> usize {
    line_starts.partition_point(|&s| s <= offset).saturating_sub(1)
}
