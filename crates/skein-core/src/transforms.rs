//! Built-in transforms.
//!
//! These are deliberately small: the engine cares about the pipeline contract
//! (chain composition, dependency discovery, failure attribution), not about
//! full-fidelity language tooling.
//!
//! - `script`: scans JS-style sources for import/require specifiers.
//! - `style`: wraps a stylesheet into a JS module that injects a `<style>`
//!   tag, reporting `@import` and `url()` references as dependencies.
//! - `json`: wraps a JSON document into a JS module.
//! - `define`: compile-time constant substitution.

use crate::loader::{Transform, TransformOutput};
use std::path::Path;

/// Import scanner for script modules. Content passes through unchanged;
/// discovered specifiers become graph edges.
pub struct ScriptTransform;

impl Transform for ScriptTransform {
    fn name(&self) -> &str {
        "script"
    }

    fn transform(
        &self,
        content: &[u8],
        _path: &Path,
        _options: &serde_json::Value,
    ) -> Result<TransformOutput, String> {
        let source = String::from_utf8_lossy(content);
        let dependencies = scan_imports(&source);
        Ok(TransformOutput {
            content: content.to_vec(),
            dependencies,
        })
    }
}

/// Stylesheet wrapper: emits JS that injects the CSS at runtime.
pub struct StyleTransform;

impl Transform for StyleTransform {
    fn name(&self) -> &str {
        "style"
    }

    fn transform(
        &self,
        content: &[u8],
        _path: &Path,
        _options: &serde_json::Value,
    ) -> Result<TransformOutput, String> {
        let css = String::from_utf8_lossy(content);
        let dependencies = scan_css_refs(&css);

        let literal =
            serde_json::to_string(css.as_ref()).map_err(|e| format!("unencodable CSS: {e}"))?;
        let js = format!(
            "(function() {{\n  var style = document.createElement('style');\n  style.textContent = {literal};\n  document.head.appendChild(style);\n}})();\nmodule.exports = {{}};\n"
        );

        Ok(TransformOutput {
            content: js.into_bytes(),
            dependencies,
        })
    }
}

/// JSON module wrapper.
pub struct JsonTransform;

impl Transform for JsonTransform {
    fn name(&self) -> &str {
        "json"
    }

    fn transform(
        &self,
        content: &[u8],
        path: &Path,
        _options: &serde_json::Value,
    ) -> Result<TransformOutput, String> {
        let value: serde_json::Value = serde_json::from_slice(content)
            .map_err(|e| format!("invalid JSON in {}: {e}", path.display()))?;
        let js = format!("module.exports = {value};\n");
        Ok(TransformOutput::content(js.into_bytes()))
    }
}

/// Compile-time constant substitution. Options are a flat object mapping
/// source tokens to replacement text:
///
/// ```json
/// { "transform": "define", "options": { "process.env.BASE_URL": "\"/\"" } }
/// ```
pub struct DefineTransform;

impl Transform for DefineTransform {
    fn name(&self) -> &str {
        "define"
    }

    fn transform(
        &self,
        content: &[u8],
        _path: &Path,
        options: &serde_json::Value,
    ) -> Result<TransformOutput, String> {
        let Some(map) = options.as_object() else {
            return Err("define options must be an object of token -> replacement".to_string());
        };

        let mut source = String::from_utf8_lossy(content).into_owned();
        for (token, replacement) in map {
            let replacement = match replacement {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            source = source.replace(token.as_str(), &replacement);
        }

        Ok(TransformOutput::content(source.into_bytes()))
    }
}

/// Lexically scan JS-ish source for import specifiers.
///
/// Recognizes `import ... from 'x'`, bare `import 'x'`, `export ... from 'x'`,
/// `require('x')` and dynamic `import('x')`; skips comments and unrelated
/// string literals. Not a parser, and does not need to be one here.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<String> {
    let bytes = source.as_bytes();
    let mut specs = Vec::new();
    let mut i = 0;
    // Set after `import`/`export`, cleared at `;` or once a specifier is read.
    let mut awaiting_from = false;
    let mut take_next_string = false;

    while i < bytes.len() {
        let c = bytes[i];

        // Comments.
        if c == b'/' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'/' => {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                    continue;
                }
                b'*' => {
                    i += 2;
                    while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                        i += 1;
                    }
                    i = (i + 2).min(bytes.len());
                    continue;
                }
                _ => {}
            }
        }

        // String literals.
        if c == b'"' || c == b'\'' || c == b'`' {
            let (literal, next) = read_string(bytes, i);
            if take_next_string {
                if let Some(spec) = literal {
                    specs.push(spec);
                }
                take_next_string = false;
                awaiting_from = false;
            }
            i = next;
            continue;
        }

        if c == b';' {
            awaiting_from = false;
            take_next_string = false;
            i += 1;
            continue;
        }

        // Identifier words.
        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            match &source[start..i] {
                "import" => {
                    let mut j = skip_ws(bytes, i);
                    if j < bytes.len() && bytes[j] == b'(' {
                        // Dynamic import.
                        j = skip_ws(bytes, j + 1);
                        if j < bytes.len() && (bytes[j] == b'"' || bytes[j] == b'\'') {
                            let (literal, next) = read_string(bytes, j);
                            if let Some(spec) = literal {
                                specs.push(spec);
                            }
                            i = next;
                        }
                    } else if j < bytes.len() && (bytes[j] == b'"' || bytes[j] == b'\'') {
                        // Bare import.
                        take_next_string = true;
                    } else {
                        awaiting_from = true;
                    }
                }
                "export" => {
                    awaiting_from = true;
                }
                "from" if awaiting_from => {
                    take_next_string = true;
                }
                "require" => {
                    let j = skip_ws(bytes, i);
                    if j < bytes.len() && bytes[j] == b'(' {
                        let k = skip_ws(bytes, j + 1);
                        if k < bytes.len() && (bytes[k] == b'"' || bytes[k] == b'\'') {
                            let (literal, next) = read_string(bytes, k);
                            if let Some(spec) = literal {
                                specs.push(spec);
                            }
                            i = next;
                        }
                    }
                }
                _ => {}
            }
            continue;
        }

        i += 1;
    }

    specs
}

/// Read a quoted literal starting at `start`. Returns the contents (None for
/// template literals or unterminated strings) and the index after the
/// closing quote.
fn read_string(bytes: &[u8], start: usize) -> (Option<String>, usize) {
    let quote = bytes[start];
    let mut i = start + 1;
    let mut out = Vec::new();
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\\' && i + 1 < bytes.len() {
            out.push(bytes[i + 1]);
            i += 2;
            continue;
        }
        if c == quote {
            if quote == b'`' {
                return (None, i + 1);
            }
            return (Some(String::from_utf8_lossy(&out).into_owned()), i + 1);
        }
        out.push(c);
        i += 1;
    }
    (None, bytes.len())
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Scan a stylesheet for `@import` and `url()` references. Fragment-only and
/// remote URLs are not dependencies.
#[must_use]
pub fn scan_css_refs(css: &str) -> Vec<String> {
    let mut refs = Vec::new();

    let mut rest = css;
    while let Some(pos) = rest.find("@import") {
        rest = &rest[pos + "@import".len()..];
        let trimmed = rest.trim_start();
        let trimmed = trimmed.strip_prefix("url(").unwrap_or(trimmed);
        if let Some(spec) = leading_quoted(trimmed) {
            push_css_ref(&mut refs, spec);
        }
    }

    let mut rest = css;
    while let Some(pos) = rest.find("url(") {
        rest = &rest[pos + "url(".len()..];
        let end = match rest.find(')') {
            Some(e) => e,
            None => break,
        };
        let inner = rest[..end].trim().trim_matches('"').trim_matches('\'');
        push_css_ref(&mut refs, inner);
        rest = &rest[end..];
    }

    refs
}

fn leading_quoted(s: &str) -> Option<&str> {
    let quote = s.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &s[1..];
    let end = inner.find(quote)?;
    Some(&inner[..end])
}

fn push_css_ref(refs: &mut Vec<String>, spec: &str) {
    if spec.is_empty()
        || spec.starts_with('#')
        || spec.starts_with("data:")
        || spec.starts_with("http://")
        || spec.starts_with("https://")
        || spec.starts_with("//")
    {
        return;
    }
    let spec = spec.to_string();
    if !refs.contains(&spec) {
        refs.push(spec);
    }
}
