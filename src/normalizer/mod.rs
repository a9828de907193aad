//! Strips target-path-dependent content from a response body before it is
//! compared against a base case. Soft-404 pages routinely echo the requested
//! path back ("/admin was not found on this server"), which would make every
//! probe body differ from the base-case body even when the page is the same
//! error page.

/// Removes every occurrence of `item` (and its percent-decoded form) from
/// `body`, then trims surrounding whitespace.
pub fn clean_response(body: &str, item: &str) -> String {
    let mut out = body.to_string();
    if !item.is_empty() {
        out = out.replace(item, "");
        let decoded = percent_decode(item);
        if decoded != item {
            out = out.replace(&decoded, "");
        }
    }
    out.trim().to_string()
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hex = &value[i + 1..i + 3];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}
