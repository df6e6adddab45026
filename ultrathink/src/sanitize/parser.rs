// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Tool-call block parser
//
// Turns one complete `<tool_call ...> ... </tool_call>` block into a tool
// name and a JSON argument object. The block body is read by a small
// scanner rather than regexes: attribute capture on the opening tag, then
// `<arg_key>`/`<arg_value>` pairs (including the fused `<arg_keyNAME>`
// variant), or a JSON object body.
//
// The parser is pure and never fails loudly: anything it cannot resolve
// to a named tool yields `None`, and the caller leaves the text alone.

use serde_json::{Map, Value};

use super::markers::{find_ascii_ci, find_close, find_open, TOOL_CALL_OPEN};
use super::types::ToolCallMatch;

/// Built-in tool identifiers of the coding agent host.
pub const BUILTIN_TOOLS: &[&str] = &[
    "bash",
    "read",
    "write",
    "edit",
    "multiedit",
    "patch",
    "glob",
    "grep",
    "list",
    "webfetch",
    "todowrite",
    "todoread",
    "task",
];

/// Argument names that may carry the tool name itself.
const NAME_ARGUMENTS: &[&str] = &["tool", "name", "toolName"];

/// Structural inference table. Order matters: the first matching rule
/// wins, so more specific shapes come first.
const INFERENCE_TABLE: &[(&str, fn(&Map<String, Value>) -> bool)] = &[
    ("edit", is_edit),
    ("multiedit", is_multiedit),
    ("write", is_write),
    ("patch", is_patch),
    ("bash", is_bash),
    ("webfetch", is_webfetch),
    ("todowrite", is_todowrite),
    ("task", is_task),
    ("grep", is_grep),
    ("read", is_read),
    ("glob", is_glob),
    ("list", is_list),
];

const MAX_TOOL_NAME_LEN: usize = 64;

/// Parse a complete tool-call block.
///
/// Name resolution order:
/// 1. `name`/`tool` attribute on the opening tag, or a bare identifier
///    right after it (`<tool_call>bash<arg_key>...`), or the `name` of a
///    JSON body.
/// 2. An argument named `tool`, `name` or `toolName` holding a plain
///    identifier (removed from the arguments).
/// 3. Inference from which argument names are present.
/// 4. A `tool` argument naming a built-in, possibly namespaced
///    (`functions.bash`).
///
/// Returns `None` when no name resolves or the block is incomplete.
pub fn parse_tool_call_block(block: &str) -> Option<ToolCallMatch> {
    let open = find_open(block, 0)?;
    let tag_end = open + block[open..].find('>')?;
    let attributes = &block[open + TOOL_CALL_OPEN.len()..tag_end];
    let (close_start, _) = find_close(block, tag_end + 1)?;
    let body = &block[tag_end + 1..close_start];

    let attribute_name = opening_tag_name(attributes);

    if let Some((json_name, arguments)) = parse_json_body(body) {
        return resolve(attribute_name.or(json_name), arguments);
    }

    let scanned = scan_arguments(body);
    resolve(attribute_name.or(scanned.leading_name), scanned.arguments)
}

fn resolve(explicit: Option<String>, mut arguments: Map<String, Value>) -> Option<ToolCallMatch> {
    if let Some(name) = explicit {
        return Some(ToolCallMatch::new(name, arguments));
    }

    for key in NAME_ARGUMENTS {
        let candidate = match arguments.get(*key) {
            Some(Value::String(s)) if is_identifier(s.trim()) => s.trim().to_string(),
            _ => continue,
        };
        arguments.remove(*key);
        return Some(ToolCallMatch::new(candidate, arguments));
    }

    if let Some(tool) = infer_tool(&arguments) {
        return Some(ToolCallMatch::new(tool, arguments));
    }

    let builtin = arguments
        .get("tool")
        .and_then(Value::as_str)
        .and_then(builtin_from);
    if let Some(tool) = builtin {
        arguments.remove("tool");
        return Some(ToolCallMatch::new(tool, arguments));
    }

    None
}

/// First tool in the inference table whose shape matches `arguments`.
pub fn infer_tool(arguments: &Map<String, Value>) -> Option<&'static str> {
    if arguments.is_empty() {
        return None;
    }
    INFERENCE_TABLE
        .iter()
        .find(|(_, matches)| matches(arguments))
        .map(|(tool, _)| *tool)
}

// ---------------------------------------------------------------------------
// Opening tag
// ---------------------------------------------------------------------------

fn opening_tag_name(raw: &str) -> Option<String> {
    let raw = raw.trim().trim_end_matches('/').trim();
    if raw.is_empty() {
        return None;
    }

    // `<tool_call=bash>` / `<tool_call:bash>`
    if let Some(rest) = raw.strip_prefix('=').or_else(|| raw.strip_prefix(':')) {
        let value = unquote(rest.trim());
        return (!value.is_empty()).then(|| value.to_string());
    }

    parse_attributes(raw)
        .into_iter()
        .find(|(key, value)| {
            (key.eq_ignore_ascii_case("name") || key.eq_ignore_ascii_case("tool"))
                && !value.trim().is_empty()
        })
        .map(|(_, value)| value.trim().to_string())
}

/// Parse `key="value" key='value' key=value` attribute lists.
fn parse_attributes(input: &str) -> Vec<(&str, &str)> {
    let bytes = input.as_bytes();
    let mut attributes = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'-') {
            i += 1;
        }
        let key = &input[key_start..i];
        if key.is_empty() {
            // Skip one whole character we don't understand.
            i += input[i..].chars().next().map_or(1, char::len_utf8);
            continue;
        }

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes.get(i) != Some(&b'=') {
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let value = match bytes.get(i) {
            Some(&quote @ (b'"' | b'\'')) => {
                let start = i + 1;
                let end = input[start..]
                    .find(quote as char)
                    .map_or(input.len(), |rel| start + rel);
                i = (end + 1).min(input.len());
                &input[start..end]
            }
            Some(_) => {
                let start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                &input[start..i]
            }
            None => "",
        };
        attributes.push((key, value));
    }

    attributes
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

// ---------------------------------------------------------------------------
// Body encodings
// ---------------------------------------------------------------------------

/// `{"name": "...", "arguments": {...}}` or a bare arguments object.
fn parse_json_body(body: &str) -> Option<(Option<String>, Map<String, Value>)> {
    let trimmed = body.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let Value::Object(mut object) = serde_json::from_str::<Value>(trimmed).ok()? else {
        return None;
    };

    let wrapped = object.contains_key("arguments") || object.contains_key("parameters");
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    match name {
        Some(name) if wrapped || object.len() == 1 => {
            let arguments = match object.remove("arguments").or_else(|| object.remove("parameters")) {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(map)) => map,
                Some(Value::String(encoded)) => match serde_json::from_str(&encoded) {
                    Ok(Value::Object(map)) => map,
                    _ => return None,
                },
                Some(_) => return None,
            };
            Some((Some(name), arguments))
        }
        _ => Some((None, object)),
    }
}

struct ScannedArguments {
    leading_name: Option<String>,
    arguments: Map<String, Value>,
}

/// Scan `<arg_key>K</arg_key><arg_value>V</arg_value>` pairs.
fn scan_arguments(body: &str) -> ScannedArguments {
    let mut arguments = Map::new();
    let mut pending_key: Option<String> = None;

    let first_tag = body.find('<').unwrap_or(body.len());
    let leading = body[..first_tag].trim();
    let leading_name = is_identifier(leading).then(|| leading.to_string());

    let mut cursor = first_tag;
    while let Some(rel) = body[cursor..].find('<') {
        let lt = cursor + rel;
        let Some(gt_rel) = body[lt..].find('>') else {
            break;
        };
        let gt = lt + gt_rel;
        let tag = body[lt + 1..gt].trim();
        cursor = gt + 1;

        if tag.eq_ignore_ascii_case("arg_key") {
            let Some((key, next)) = read_until_close(body, cursor, "</arg_key") else {
                break;
            };
            pending_key = Some(key.trim().to_string());
            cursor = next;
        } else if tag.eq_ignore_ascii_case("arg_value") {
            let (value, next) =
                read_until_close(body, cursor, "</arg_value").unwrap_or((&body[cursor..], body.len()));
            if let Some(key) = pending_key.take().filter(|k| !k.is_empty()) {
                arguments.insert(key, coerce_value(value));
            }
            cursor = next;
        } else if let Some(key) = fused_key(tag) {
            pending_key = Some(key);
            cursor = skip_stray_close(body, cursor, "</arg_key");
        }
    }

    ScannedArguments {
        leading_name,
        arguments,
    }
}

/// `<arg_keyfilePath>`, `<arg_key_filePath>`, `<arg_key=filePath>`.
fn fused_key(tag: &str) -> Option<String> {
    const PREFIX: &str = "arg_key";
    if tag.len() <= PREFIX.len() || !tag.as_bytes()[..PREFIX.len()].eq_ignore_ascii_case(PREFIX.as_bytes()) {
        return None;
    }
    // `<arg_keyfilePath</arg_key>` reaches here as `arg_keyfilePath</arg_key`.
    let fused = tag[PREFIX.len()..].split('<').next().unwrap_or("");
    let key = fused
        .trim_matches(|c: char| c == '_' || c == '=' || c == ':' || c == '"' || c == '\'' || c.is_whitespace());
    (!key.is_empty()).then(|| key.to_string())
}

/// Text from `from` up to the closing tag starting with `close_prefix`,
/// plus the offset just past that tag's `>`.
fn read_until_close<'a>(body: &'a str, from: usize, close_prefix: &str) -> Option<(&'a str, usize)> {
    let pos = find_ascii_ci(body, close_prefix, from)?;
    let next = body[pos..].find('>').map_or(body.len(), |rel| pos + rel + 1);
    Some((&body[from..pos], next))
}

fn skip_stray_close(body: &str, from: usize, close_prefix: &str) -> usize {
    let rest = &body[from..];
    let trimmed = rest.trim_start();
    let offset = from + (rest.len() - trimmed.len());
    if find_ascii_ci(body, close_prefix, offset) == Some(offset) {
        if let Some(rel) = body[offset..].find('>') {
            return offset + rel + 1;
        }
    }
    from
}

/// Trim, then try JSON; fall back to the trimmed string.
pub fn coerce_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

// ---------------------------------------------------------------------------
// Name helpers
// ---------------------------------------------------------------------------

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= MAX_TOOL_NAME_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// `functions.bash`, `default_api:Read`, `bash` -> built-in name.
fn builtin_from(value: &str) -> Option<&'static str> {
    let segment = value
        .trim()
        .rsplit(['.', ':', '/'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    BUILTIN_TOOLS.iter().copied().find(|b| *b == segment)
}

// ---------------------------------------------------------------------------
// Inference predicates
// ---------------------------------------------------------------------------

fn has_all(arguments: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().all(|k| arguments.contains_key(*k))
}

fn is_edit(a: &Map<String, Value>) -> bool {
    has_all(a, &["filePath", "oldString", "newString"])
}

fn is_multiedit(a: &Map<String, Value>) -> bool {
    a.contains_key("filePath") && a.get("edits").is_some_and(Value::is_array)
}

fn is_write(a: &Map<String, Value>) -> bool {
    has_all(a, &["filePath", "content"])
}

fn is_patch(a: &Map<String, Value>) -> bool {
    a.contains_key("patchText")
}

fn is_bash(a: &Map<String, Value>) -> bool {
    a.contains_key("command")
}

fn is_webfetch(a: &Map<String, Value>) -> bool {
    a.contains_key("url")
}

fn is_todowrite(a: &Map<String, Value>) -> bool {
    a.get("todos").is_some_and(Value::is_array)
}

fn is_task(a: &Map<String, Value>) -> bool {
    has_all(a, &["description", "prompt"])
}

fn is_grep(a: &Map<String, Value>) -> bool {
    match a.get("pattern") {
        Some(pattern) => {
            a.contains_key("include") || !pattern.as_str().is_some_and(looks_like_glob)
        }
        None => false,
    }
}

fn is_read(a: &Map<String, Value>) -> bool {
    a.contains_key("filePath")
}

fn is_glob(a: &Map<String, Value>) -> bool {
    a.contains_key("pattern")
}

fn is_list(a: &Map<String, Value>) -> bool {
    a.contains_key("path")
}

fn looks_like_glob(pattern: &str) -> bool {
    pattern.contains("**")
        || pattern.starts_with("*.")
        || pattern.contains("/*")
        || (pattern.contains('{') && pattern.contains(','))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(block: &str) -> ToolCallMatch {
        parse_tool_call_block(block).expect("block should parse")
    }

    #[test]
    fn key_value_pairs_infer_write() {
        let m = parse(
            r#"<tool_call><arg_key>filePath</arg_key><arg_value>"a.txt"</arg_value><arg_key>content</arg_key><arg_value>"hi"</arg_value></tool_call>"#,
        );
        assert_eq!(m.tool_name, "write");
        assert_eq!(m.arguments(), json!({"filePath": "a.txt", "content": "hi"}));
    }

    #[test]
    fn values_are_coerced_through_json() {
        let m = parse(
            "<tool_call name=\"custom\">\
             <arg_key>flag</arg_key><arg_value> true </arg_value>\
             <arg_key>count</arg_key><arg_value>3</arg_value>\
             <arg_key>nested</arg_key><arg_value>{\"a\":1}</arg_value>\
             <arg_key>prose</arg_key><arg_value>  just words </arg_value>\
             </tool_call>",
        );
        assert_eq!(
            m.arguments(),
            json!({"flag": true, "count": 3, "nested": {"a": 1}, "prose": "just words"})
        );
    }

    #[test]
    fn explicit_attribute_wins_over_inference() {
        let m = parse(r#"<tool_call name="runner"><arg_key>command</arg_key><arg_value>ls</arg_value></tool_call>"#);
        assert_eq!(m.tool_name, "runner");
        assert_eq!(m.arguments(), json!({"command": "ls"}));
    }

    #[test]
    fn tool_attribute_with_single_quotes() {
        let m = parse("<tool_call tool='read'><arg_key>filePath</arg_key><arg_value>x.rs</arg_value></tool_call>");
        assert_eq!(m.tool_name, "read");
    }

    #[test]
    fn markers_tolerate_case_and_whitespace() {
        let m = parse("<TOOL_CALL >\n<arg_key>command</arg_key>\n<arg_value>pwd</arg_value>\n</Tool_Call >");
        assert_eq!(m.tool_name, "bash");
        assert_eq!(m.arguments(), json!({"command": "pwd"}));
    }

    #[test]
    fn leading_bare_name_counts_as_explicit() {
        let m = parse("<tool_call>todowrite\n<arg_key>todos</arg_key><arg_value>[]</arg_value></tool_call>");
        assert_eq!(m.tool_name, "todowrite");
    }

    #[test]
    fn no_arguments_with_explicit_name() {
        let m = parse("<tool_call>todoread</tool_call>");
        assert_eq!(m.tool_name, "todoread");
        assert_eq!(m.arguments(), json!({}));
    }

    #[test]
    fn no_arguments_and_no_name_is_not_a_tool_call() {
        assert_eq!(parse_tool_call_block("<tool_call></tool_call>"), None);
    }

    #[test]
    fn name_argument_is_used_and_removed() {
        let m = parse(
            "<tool_call><arg_key>toolName</arg_key><arg_value>lookup</arg_value>\
             <arg_key>query</arg_key><arg_value>rust</arg_value></tool_call>",
        );
        assert_eq!(m.tool_name, "lookup");
        assert_eq!(m.arguments(), json!({"query": "rust"}));
    }

    #[test]
    fn namespaced_tool_argument_falls_back_to_builtin() {
        let m = parse(
            "<tool_call><arg_key>tool</arg_key><arg_value>functions.Read</arg_value>\
             <arg_key>offset</arg_key><arg_value>10</arg_value></tool_call>",
        );
        assert_eq!(m.tool_name, "read");
        assert_eq!(m.arguments(), json!({"offset": 10}));
    }

    #[test]
    fn fused_key_variants_are_recovered() {
        let m = parse(
            "<tool_call><arg_keyfilePath</arg_key><arg_value>a.rs</arg_value>\
             <arg_key_content><arg_value>fn main() {}</arg_value></tool_call>",
        );
        assert_eq!(m.tool_name, "write");
        assert_eq!(m.arguments(), json!({"filePath": "a.rs", "content": "fn main() {}"}));

        let m = parse(
            "<tool_call><arg_key=filePath></arg_key><arg_value>a.rs</arg_value>\
             <arg_key content><arg_value>body</arg_value></tool_call>",
        );
        assert_eq!(m.tool_name, "write");
        assert_eq!(m.arguments(), json!({"filePath": "a.rs", "content": "body"}));
    }

    #[test]
    fn json_body_with_name_and_arguments() {
        let m = parse(r#"<tool_call>{"name": "bash", "arguments": {"command": "ls -la"}}</tool_call>"#);
        assert_eq!(m.tool_name, "bash");
        assert_eq!(m.arguments(), json!({"command": "ls -la"}));
    }

    #[test]
    fn json_body_with_string_encoded_arguments() {
        let m = parse(r#"<tool_call>{"name": "grep", "arguments": "{\"pattern\":\"fn main\"}"}</tool_call>"#);
        assert_eq!(m.tool_name, "grep");
        assert_eq!(m.arguments(), json!({"pattern": "fn main"}));
    }

    #[test]
    fn bare_json_arguments_are_inferred() {
        let m = parse(r#"<tool_call>{"url": "https://example.com"}</tool_call>"#);
        assert_eq!(m.tool_name, "webfetch");
    }

    #[test]
    fn unrecognized_single_key_is_not_a_tool_call() {
        let block = "<tool_call><arg_key>mystery</arg_key><arg_value>42</arg_value></tool_call>";
        assert_eq!(parse_tool_call_block(block), None);
    }

    #[test]
    fn incomplete_block_is_not_a_tool_call() {
        assert_eq!(
            parse_tool_call_block("<tool_call><arg_key>command</arg_key><arg_value>ls"),
            None
        );
        assert_eq!(parse_tool_call_block("no markers here"), None);
    }

    #[test]
    fn inference_order_prefers_specific_shapes() {
        let edit = json!({"filePath": "a", "oldString": "x", "newString": "y"});
        let read = json!({"filePath": "a", "offset": 1});
        let grep = json!({"pattern": "fn main", "path": "src"});
        let grep_with_include = json!({"pattern": "**/*.rs", "include": "*.rs"});
        let glob = json!({"pattern": "src/**/*.rs"});
        let todos_not_list = json!({"todos": "write tests"});

        let infer = |v: serde_json::Value| infer_tool(v.as_object().unwrap());
        assert_eq!(infer(edit), Some("edit"));
        assert_eq!(infer(read), Some("read"));
        assert_eq!(infer(grep), Some("grep"));
        assert_eq!(infer(grep_with_include), Some("grep"));
        assert_eq!(infer(glob), Some("glob"));
        assert_eq!(infer(todos_not_list), None);
    }

    #[test]
    fn value_may_contain_angle_brackets() {
        let m = parse("<tool_call><arg_key>command</arg_key><arg_value>echo '<b>' > out.html</arg_value></tool_call>");
        assert_eq!(m.arguments(), json!({"command": "echo '<b>' > out.html"}));
    }

    #[test]
    fn coerce_value_keeps_prose() {
        assert_eq!(coerce_value(" hello world "), json!("hello world"));
        assert_eq!(coerce_value("\"quoted\""), json!("quoted"));
        assert_eq!(coerce_value("null"), json!(null));
        assert_eq!(coerce_value(""), json!(""));
    }
}
