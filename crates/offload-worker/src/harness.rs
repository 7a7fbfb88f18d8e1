//! Script fragments passed to the engine, and decoding of what comes back.
//!
//! All caller-controlled text (source, names, arguments) is embedded as JSON
//! string literals, never spliced into script text directly.

use std::path::Path;

use offload_core::ErrorKind;
use offload_core::ipc::WireError;
use serde::Deserialize;

/// The runtime installed into every engine.
pub const BOOTSTRAP: &str = include_str!("bootstrap.js");

const RESERVED: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let", "new",
    "null", "package", "private", "protected", "public", "return", "static", "super", "switch",
    "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Whether `name` can be used as a plain JavaScript binding.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$');
    valid_start
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !RESERVED.contains(&name)
}

/// Parameter names for dependency bindings, one per dependency.
///
/// Names that are not identifiers (`nodejs-polars`, `@scope/pkg`) are
/// rewritten; collisions get a numeric suffix.
pub fn parameter_names(dependencies: &[String]) -> Vec<String> {
    let mut used: Vec<String> = Vec::with_capacity(dependencies.len());
    for dep in dependencies {
        let base = if is_identifier(dep) {
            dep.clone()
        } else {
            let mut sanitized: String = dep
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '$' { c } else { '_' })
                .collect();
            if !is_identifier(&sanitized) {
                sanitized.insert(0, '_');
            }
            sanitized
        };

        let mut name = base.clone();
        let mut n = 2;
        while used.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        used.push(name);
    }
    used
}

fn literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    // Serializing strings and string slices cannot fail
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Host facts exposed through the `process` shim, set before [`BOOTSTRAP`] runs.
pub fn host_prelude(cwd: &Path) -> String {
    format!(
        "globalThis.__offloadHost = {{ platform: {}, pid: {}, cwd: {} }};",
        literal(std::env::consts::OS),
        std::process::id(),
        literal(&cwd.display().to_string()),
    )
}

/// Call of the injected-function protocol.
pub fn injected_call(
    source: &str,
    target: &str,
    args_json: &str,
    params: &[String],
    dependencies: &[String],
    is_async: bool,
) -> String {
    format!(
        "globalThis.__offload.runInjected({}, {}, {}, {}, {}, {})",
        literal(source),
        literal(target),
        literal(args_json),
        literal(params),
        literal(dependencies),
        is_async,
    )
}

/// Call of the bundle protocol.
pub fn bundle_call(code: &str, target: &str, args_json: &str, filename: &str) -> String {
    format!(
        "globalThis.__offload.runBundle({}, {}, {}, {})",
        literal(code),
        literal(target),
        literal(args_json),
        literal(filename),
    )
}

/// Registration of a dependency module.
pub fn define_call(key: &str, source: &str, filename: &Path, requires: &[(String, String)]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = requires
        .iter()
        .map(|(spec, key)| (spec.clone(), serde_json::Value::String(key.clone())))
        .collect();
    format!(
        "globalThis.__offload.define({}, {}, {}, {})",
        literal(key),
        literal(source),
        literal(&filename.display().to_string()),
        literal(&map),
    )
}

/// Result envelope produced by the protocols.
#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    stack: Option<String>,
}

/// Decoded protocol outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// JSON text of the returned value.
    Value(String),
    Failed(WireError),
}

impl Outcome {
    /// Failure raised outside the protocol functions.
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed(WireError {
            kind,
            message: message.into(),
            trace: None,
        })
    }
}

/// Decode an envelope string.
pub fn decode(text: &str) -> Outcome {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Outcome::failed(
                ErrorKind::Internal,
                format!("Malformed result envelope: {}", e),
            );
        }
    };

    if envelope.ok {
        return Outcome::Value(envelope.value.unwrap_or_else(|| "null".to_string()));
    }

    let kind = match envelope.kind.as_deref() {
        Some("compile") => ErrorKind::Compile,
        Some("runtime") => ErrorKind::Runtime,
        Some("exportNotFound") => ErrorKind::ExportNotFound,
        Some("serialization") => ErrorKind::Serialization,
        _ => ErrorKind::Internal,
    };
    Outcome::Failed(WireError {
        kind,
        message: envelope.message.unwrap_or_default(),
        trace: envelope.stack,
    })
}
