const SECRET_PLACEHOLDER: &str = "****";

/// Display form of a connection string with the password replaced by `****`.
///
/// For URL-shaped strings the authority runs up to the first `/`, `?` or `#` after the scheme, and
/// the secret is everything between the first `:` of the userinfo and the last `@` of the authority. Strings without a `://` scheme separator use the first `:<secret>@` run that
/// contains neither `:` nor `@`. When no credential segment is found the input is returned
/// unchanged. This is a display transform only; the raw string is still what gets sent to the
/// backend.
#[must_use]
pub fn mask_connection_string(raw: &str) -> String {
    let range = match raw.find("://") {
        Some(scheme_end) => url_secret_range(raw, scheme_end + 3),
        None => loose_secret_range(raw),
    };
    match range {
        Some((start, end)) => {
            let mut masked = String::with_capacity(raw.len());
            masked.push_str(&raw[..start]);
            masked.push_str(SECRET_PLACEHOLDER);
            masked.push_str(&raw[end..]);
            masked
        }
        None => raw.to_string(),
    }
}

fn url_secret_range(raw: &str, authority_start: usize) -> Option<(usize, usize)> {
    let rest = &raw[authority_start..];
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    let at = authority.rfind('@')?;
    let userinfo = &authority[..at];
    let colon = userinfo.find(':')?;
    if colon + 1 == at {
        return None;
    }
    Some((authority_start + colon + 1, authority_start + at))
}

fn loose_secret_range(raw: &str) -> Option<(usize, usize)> {
    for (colon, _) in raw.match_indices(':') {
        let secret_start = colon + 1;
        let rest = &raw[secret_start..];
        let Some(stop) = rest.find([':', '@']) else {
            return None;
        };
        if stop > 0 && rest[stop..].starts_with('@') {
            return Some((secret_start, secret_start + stop));
        }
    }
    None
}
