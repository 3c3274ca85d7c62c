//! Static analysis applied to fetched app source before any of it executes.
//!
//! Checks run cheapest-first: byte/line/nesting bounds, then pattern checks
//! on a copy with comments and string contents blanked out, then structural
//! limits. The first violation rejects the candidate with its precise reason.

use std::sync::OnceLock;

use regex::Regex;

pub const MAX_SOURCE_BYTES: usize = 1024 * 1024;
pub const MAX_SOURCE_LINES: usize = 10_000;
pub const MAX_BRACKET_NESTING: usize = 1_000;
pub const MAX_BRACKET_IMBALANCE: i64 = 8;
pub const MAX_FUNCTION_PARAMS: usize = 20;
pub const MAX_BLOCK_NESTING: usize = 20;
pub const MAX_FUNCTION_COUNT: usize = 200;
const MAX_ESCAPE_SEQUENCES: usize = 40;

/// Builtins that compile or introspect code at runtime.
const DANGEROUS_METHODS: &[&str] = &[
    "eval",
    "load",
    "loadstring",
    "loadfile",
    "dofile",
    "setfenv",
    "getfenv",
    "setmetatable",
    "getmetatable",
    "collectgarbage",
    "newproxy",
];

/// Globals whose member access alone is disqualifying.
const FORBIDDEN_GLOBALS: &[&str] = &["os", "io", "package", "debug", "process"];

fn dangerous_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names = DANGEROUS_METHODS.join("|");
        Regex::new(&format!(r"\b({names})\s*\(")).unwrap()
    })
}

fn forbidden_global_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names = FORBIDDEN_GLOBALS.join("|");
        Regex::new(&format!(r"\b({names})\s*[.\[]")).unwrap()
    })
}

fn require_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\brequire\b\s*\(?\s*(["']([^"']*)["'])?"#).unwrap())
}

fn string_dump_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bstring\s*\.\s*dump\b").unwrap())
}

fn dynamic_function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bnew\s+Function\b").unwrap())
}

fn escape_sequence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\x[0-9a-fA-F]{2}|\\[0-9]{1,3}").unwrap())
}

fn function_params_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"function\s*[A-Za-z0-9_.:]*\s*\(([^)]*)\)").unwrap())
}

/// Reject unsafe source with the precise reason, or admit it.
pub fn analyze(source: &str, allowed_modules: &[String]) -> Result<(), String> {
    if source.len() > MAX_SOURCE_BYTES {
        return Err(format!(
            "source too large ({} bytes, limit {MAX_SOURCE_BYTES})",
            source.len()
        ));
    }
    let line_count = source.lines().count();
    if line_count > MAX_SOURCE_LINES {
        return Err(format!(
            "source too long ({line_count} lines, limit {MAX_SOURCE_LINES})"
        ));
    }

    check_brackets(source)?;

    if escape_sequence_re().find_iter(source).count() > MAX_ESCAPE_SEQUENCES {
        return Err("obfuscated escape sequences".to_string());
    }

    let stripped = strip_comments_and_strings(source);

    if let Some(caps) = dangerous_call_re().captures(&stripped) {
        return Err(format!("dangerous method: {}", &caps[1]));
    }
    if string_dump_re().is_match(&stripped) {
        return Err("dangerous method: string.dump".to_string());
    }
    if dynamic_function_re().is_match(&stripped) {
        return Err("dynamic function construction".to_string());
    }
    if let Some(caps) = forbidden_global_re().captures(&stripped) {
        return Err(format!("forbidden global: {}", &caps[1]));
    }

    check_requires(source, &stripped, allowed_modules)?;
    check_structure(&stripped)?;

    Ok(())
}

fn check_brackets(source: &str) -> Result<(), String> {
    let mut depth: i64 = 0;
    let mut max_depth: i64 = 0;
    for c in source.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
        if depth < -MAX_BRACKET_IMBALANCE {
            return Err("severe bracket imbalance".to_string());
        }
    }
    if depth.abs() > MAX_BRACKET_IMBALANCE {
        return Err("severe bracket imbalance".to_string());
    }
    if max_depth > MAX_BRACKET_NESTING as i64 {
        return Err(format!(
            "bracket nesting too deep ({max_depth}, limit {MAX_BRACKET_NESTING})"
        ));
    }
    Ok(())
}

/// Module names must be string literals drawn from the allow-list. The
/// original (unstripped) source supplies the literal; the stripped copy tells
/// us whether a `require` without one exists (a computed module name).
fn check_requires(source: &str, stripped: &str, allowed_modules: &[String]) -> Result<(), String> {
    for caps in require_re().captures_iter(source) {
        match caps.get(2) {
            Some(name) => {
                let name = name.as_str();
                if !allowed_modules.iter().any(|m| m == name) {
                    return Err(format!("forbidden module: {name}"));
                }
            }
            None => {
                // Literal was blanked in this copy of the text; consult the
                // stripped copy to distinguish from a truly dynamic name.
            }
        }
    }
    for caps in require_re().captures_iter(stripped) {
        if caps.get(1).is_none() {
            return Err("dynamic module name in require".to_string());
        }
    }
    Ok(())
}

fn check_structure(stripped: &str) -> Result<(), String> {
    let function_count = Regex::new(r"\bfunction\b")
        .unwrap()
        .find_iter(stripped)
        .count();
    if function_count > MAX_FUNCTION_COUNT {
        return Err(format!(
            "too many function declarations ({function_count}, limit {MAX_FUNCTION_COUNT})"
        ));
    }

    for caps in function_params_re().captures_iter(stripped) {
        let params = caps[1].trim();
        if params.is_empty() {
            continue;
        }
        let count = params.split(',').count();
        if count > MAX_FUNCTION_PARAMS {
            return Err(format!(
                "function with too many parameters ({count}, limit {MAX_FUNCTION_PARAMS})"
            ));
        }
    }

    let opener = Regex::new(r"\b(function|if|do|repeat)\b").unwrap();
    let closer = Regex::new(r"\b(end|until)\b").unwrap();
    let mut events: Vec<(usize, i32)> = opener
        .find_iter(stripped)
        .map(|m| (m.start(), 1))
        .chain(closer.find_iter(stripped).map(|m| (m.start(), -1)))
        .collect();
    events.sort_by_key(|(pos, _)| *pos);

    let mut depth = 0i32;
    let mut max_depth = 0i32;
    for (_, delta) in events {
        depth += delta;
        max_depth = max_depth.max(depth);
    }
    if max_depth > MAX_BLOCK_NESTING as i32 {
        return Err(format!(
            "block nesting too deep ({max_depth}, limit {MAX_BLOCK_NESTING})"
        ));
    }

    Ok(())
}

/// Blank out comment bodies and string contents, preserving structure and
/// length so pattern offsets still make sense.
fn strip_comments_and_strings(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let rest = &source[i..];

        if rest.starts_with("--[[") {
            // Long comment
            let close = rest.find("]]").map(|p| p + 2).unwrap_or(rest.len());
            blank_region(&mut out, &bytes[i..i + close]);
            i += close;
        } else if rest.starts_with("--") {
            let close = rest.find('\n').unwrap_or(rest.len());
            blank_region(&mut out, &bytes[i..i + close]);
            i += close;
        } else if rest.starts_with("[[") {
            // Long string: keep the delimiters, blank the body
            out.extend_from_slice(b"[[");
            let body = &rest[2..];
            let close = body.find("]]").unwrap_or(body.len());
            blank_region(&mut out, &body.as_bytes()[..close]);
            out.extend_from_slice(b"]]");
            i += 2 + close + 2.min(body.len().saturating_sub(close));
        } else if bytes[i] == b'"' || bytes[i] == b'\'' {
            let quote = bytes[i];
            out.push(quote);
            i += 1;
            while i < bytes.len() && bytes[i] != quote {
                if bytes[i] == b'\\' && i + 1 < bytes.len() {
                    out.extend_from_slice(b"  ");
                    i += 2;
                } else {
                    out.push(if bytes[i] == b'\n' { b'\n' } else { b' ' });
                    i += 1;
                }
            }
            if i < bytes.len() {
                out.push(quote);
                i += 1;
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn blank_region(out: &mut Vec<u8>, region: &[u8]) {
    for &b in region {
        out.push(if b == b'\n' { b'\n' } else { b' ' });
    }
}
