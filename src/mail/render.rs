use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::models::Variables;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").unwrap());

/// Replace `{{ key }}` placeholders with values from `vars`.
///
/// Keys are trimmed but may contain inner spaces (`{{ first name }}`). Placeholders
/// whose key is absent from `vars` are left exactly as written.
pub fn render(template: &str, vars: &Variables) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            match key(caps).and_then(|key| vars.get(key)) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn key<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.get(1)
        .map(|m| m.as_str())
        .filter(|key| !key.is_empty())
}

/// Placeholder keys used in `template`, in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let Some(key) = key(&caps) else { continue };
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}
