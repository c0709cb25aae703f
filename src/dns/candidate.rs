//! candidate name handling: normalization and zone computation

/// Schemes stripped from input lines, applied in this order
const SCHEME_PREFIXES: [&str; 2] = ["http://", "https://"];

/// Turn a raw input line into the domain name that gets queried
///
/// The line is lowercased, then `http://` and `https://` are stripped in that
/// order. Nothing else is touched: ports, paths or whitespace stay as they are.
pub fn normalize(line: &str) -> String {
    let mut domain = line.to_lowercase();
    for prefix in SCHEME_PREFIXES.iter() {
        if domain.starts_with(prefix) {
            domain = domain[prefix.len()..].to_string();
        }
    }

    domain
}

pub fn label_count(name: &str) -> usize {
    name.split('.').count()
}

/// The zone a wildcard probe for `name` is sent to
///
/// This is `name` with its leftmost label dropped. Names with fewer than three
/// labels have no zone worth probing, `example.com` would otherwise probe the
/// whole `com` zone.
pub fn parent_zone(name: &str) -> Option<&str> {
    if label_count(name) < 3 {
        return None;
    }

    name.find('.').map(|idx| &name[idx + 1..])
}
