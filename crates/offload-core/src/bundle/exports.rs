//! Static discovery of exported names and required modules.
//!
//! Text analysis only: the code is never executed. Results are best-effort
//! and the worker's runtime inspection of the export object is authoritative.

use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashSet;

/// `exports.name =` and `module.exports.name =`.
static MEMBER_ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:module\.)?exports\.([A-Za-z_$][\w$]*)\s*=(?:[^=]|$)").unwrap()
});

/// Opening brace of `module.exports = {`.
static OBJECT_ASSIGN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bmodule\.exports\s*=\s*\{").unwrap());

/// Opening brace of esbuild's interop helper call `__export(target, {`.
static ESBUILD_EXPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b__export\(\s*[A-Za-z_$][\w$]*\s*,\s*\{").unwrap());

/// ESM declarations: functions, generators, bindings and classes.
static ESM_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bexport\s+(?:(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)|(?:const|let|var)\s+([A-Za-z_$][\w$]*)|class\s+([A-Za-z_$][\w$]*))",
    )
    .unwrap()
});

/// ESM export lists `export { a, b as c }`.
static ESM_LIST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bexport\s*\{([^}]*)\}").unwrap());

/// Key at the start of an object literal member.
static OBJECT_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:async\s+)?\*?\s*["']?([A-Za-z_$][\w$]*)["']?\s*(?::|\(|$)"#).unwrap()
});

/// String-literal `require("name")` calls.
static REQUIRE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\brequire\(\s*["']([^"'\n]+)["']\s*\)"#).unwrap());

/// Top-level exported names of a bundled unit, unique, in order of first appearance.
pub fn scan_exports(code: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    for caps in MEMBER_ASSIGN.captures_iter(code) {
        if let Some(m) = caps.get(1) {
            found.push((m.start(), m.as_str().to_string()));
        }
    }

    for regex in [&*OBJECT_ASSIGN, &*ESBUILD_EXPORT] {
        for m in regex.find_iter(code) {
            // The match ends just past the opening brace
            let body_start = m.end();
            let Some(body) = object_body(&code[body_start..]) else {
                continue;
            };
            for (offset, member) in split_top_level(body) {
                if let Some(caps) = OBJECT_KEY.captures(member.trim_start()) {
                    found.push((body_start + offset, caps[1].to_string()));
                }
            }
        }
    }

    for caps in ESM_DECL.captures_iter(code) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
            found.push((m.start(), m.as_str().to_string()));
        }
    }

    for caps in ESM_LIST.captures_iter(code) {
        let Some(list) = caps.get(1) else { continue };
        let mut offset = list.start();
        for item in list.as_str().split(',') {
            let name = match item.split_whitespace().collect::<Vec<_>>().as_slice() {
                [name] => Some(*name),
                [_, "as", alias] => Some(*alias),
                _ => None,
            };
            if let Some(name) = name.filter(|n| is_identifier(n)) {
                found.push((offset, name.to_string()));
            }
            offset += item.len() + 1;
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    dedup(found.into_iter().map(|(_, name)| name))
}

/// Module names required through string-literal `require(...)` calls, unique, in order.
pub fn scan_requires(code: &str) -> Vec<String> {
    dedup(
        REQUIRE_CALL
            .captures_iter(code)
            .map(|caps| caps[1].to_string()),
    )
}

fn dedup(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = FxHashSet::default();
    names.filter(|name| seen.insert(name.clone())).collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Text between an already consumed `{` and its matching `}`.
///
/// Skips string literals and comments while tracking depth. Returns `None`
/// when the object is not closed.
fn object_body(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => i = skip_string(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b'{' | b'(' | b'[' => depth += 1,
            b'}' | b')' | b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..i]);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index of the closing quote of the string starting at `start`.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            c if c == quote => return i,
            _ => {}
        }
        i += 1;
    }
    i
}

/// Split an object body on commas at nesting depth zero, with each member's byte offset.
fn split_top_level(body: &str) -> Vec<(usize, &str)> {
    let bytes = body.as_bytes();
    let mut members = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => i = skip_string(bytes, i),
            b'{' | b'(' | b'[' => depth += 1,
            b'}' | b')' | b']' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                members.push((start, &body[start..i]));
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < body.len() {
        members.push((start, &body[start..]));
    }

    members
        .into_iter()
        .filter(|(_, member)| !member.trim().is_empty() && !member.trim_start().starts_with("..."))
        .map(|(offset, member)| (offset + (member.len() - member.trim_start().len()), member))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_assignments() {
        let code = "exports.add = function(a, b) { return a + b };\nmodule.exports.mul = (a, b) => a * b;\nif (exports.add == null) {}";
        assert_eq!(scan_exports(code), vec!["add", "mul"]);
    }

    #[test]
    fn test_object_literal_keys() {
        let code = r#"
function f() { return 1 }
module.exports = {
  f,
  g: () => ({ nested: 1, other: [1, 2] }),
  async h(x) { return { inner: x } },
  "quoted": 3,
  ...spread,
};
"#;
        assert_eq!(scan_exports(code), vec!["f", "g", "h", "quoted"]);
    }

    #[test]
    fn test_object_literal_ignores_commas_in_strings() {
        let code = "module.exports = { a: 'x, y: 1', b: `}`, c: 2 }";
        assert_eq!(scan_exports(code), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_esbuild_interop_helper() {
        let code = r#"
var src_exports = {};
__export(src_exports, {
  calculate: () => calculate,
  summarize: () => summarize
});
module.exports = __toCommonJS(src_exports);
"#;
        assert_eq!(scan_exports(code), vec!["calculate", "summarize"]);
    }

    #[test]
    fn test_esm_declarations_and_lists() {
        let code = r#"
export function one() {}
export async function two() {}
export const three = 3;
export class Four {}
function five() {}
function six() {}
export { five, six as seven, one };
"#;
        assert_eq!(
            scan_exports(code),
            vec!["one", "two", "three", "Four", "five", "seven"]
        );
    }

    #[test]
    fn test_no_exports() {
        assert!(scan_exports("console.log('side effect only')").is_empty());
    }

    #[test]
    fn test_scan_requires() {
        let code = r#"
const _ = require("lodash");
const stats = require('simple-statistics');
const again = require("lodash");
const dynamic = require(name);
"#;
        assert_eq!(scan_requires(code), vec!["lodash", "simple-statistics"]);
    }
}
