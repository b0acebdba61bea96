//! Distinguished-name and filter string helpers.

/// Escape a value for use inside an LDAP search filter (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\5c"),
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\0' => out.push_str("\\00"),
            other => out.push(other),
        }
    }
    out
}

/// Value of the first RDN of `dn` when that RDN's attribute type is `attr`
/// (compared case-insensitively).
///
/// `"uid=carol,ou=People,dc=example,dc=com"` with `attr = "uid"` gives
/// `"carol"`. Empty, malformed, or differently-typed references give `""`.
pub fn first_rdn_value(dn: &str, attr: &str) -> String {
    let rdn = first_rdn(dn);
    let Some((kind, value)) = rdn.split_once('=') else {
        return String::new();
    };
    if !kind.trim().eq_ignore_ascii_case(attr) {
        return String::new();
    }
    unescape(value.trim())
}

/// Slice up to the first comma that is not backslash-escaped.
fn first_rdn(dn: &str) -> &str {
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' | ';' => return &dn[..i],
            _ => {}
        }
    }
    dn
}

/// Undo RFC 4514 escaping: `\,` style pairs and `\2c` style hex pairs.
fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok());
            match hex {
                Some(b) => {
                    out.push(b);
                    i += 3;
                }
                None => {
                    out.push(bytes[i + 1]);
                    i += 2;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
