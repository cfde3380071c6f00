/// Canonical identity for an article or feed URL.
///
/// Trims surrounding whitespace, drops a single trailing `/` and upgrades an
/// `http://` prefix (any case) to `https://`. The rest of the string is left
/// untouched, host case included.
pub fn normalize_link(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("http://") => {
            format!("https://{}", &trimmed[7..])
        }
        _ => trimmed.to_string(),
    }
}
