use wildmatch::WildMatch;

/// Pattern semantics shared by agent scopes, agent rules, and
/// purpose-bound rules: `*` alone (or the empty pattern) matches
/// everything, `*X*` means contains, `X*` starts-with, `*X` ends-with,
/// and anything else is an exact match. Case-insensitive throughout.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    WildMatch::new(&pattern).matches(&text.to_lowercase())
}
