//! Routing hints embedded in action signatures.
//!
//! An action declares hints as sentinel-prefixed default parameters, in the
//! spirit of an annotation:
//!
//! ```text
//! (ctx, $url = 'GET /users/:id', $method = 'get')
//! ```
//!
//! `$url` is the mapped path (optionally preceded by a method) and
//! `$method` the accepted request method.

use indexmap::IndexMap;

/// Hints found in a signature, keyed by lower-cased name without the sign.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hints {
    values: IndexMap<String, String>,
}

impl Hints {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.get("url").filter(|u| !u.is_empty())
    }

    pub fn method(&self) -> Option<&str> {
        self.get("method").filter(|m| !m.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Extract hints from an action's declared parameter list.
///
/// Only the text between the first `(` and the next `)` is inspected; a
/// signature without parentheses is read as a bare parameter list. Parameters
/// that do not start with `sign` or carry no default are ignored.
pub fn parse_hints(signature: &str, sign: &str) -> Hints {
    let params = match signature.find('(') {
        Some(open) => {
            let rest = &signature[open + 1..];
            &rest[..rest.find(')').unwrap_or(rest.len())]
        }
        None => signature,
    };

    let mut hints = Hints::default();
    if sign.is_empty() {
        return hints;
    }

    for param in params.split(',').map(str::trim) {
        let Some(declared) = param.strip_prefix(sign) else {
            continue;
        };
        let Some((name, value)) = declared.split_once('=') else {
            continue;
        };
        let name = name.trim().to_lowercase();
        let value = value.trim().replace(['\'', '"'], "");
        hints.values.insert(name, value);
    }

    hints
}
