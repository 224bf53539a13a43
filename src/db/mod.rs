pub mod audit;
pub mod mail_configs;
pub mod mail_history;
pub mod mail_templates;

/// `ILIKE` pattern matching `needle` anywhere, with backslash, `%` and `_` taken literally.
/// Queries using it must declare a backslash `ESCAPE`.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
