/// Join two URL path fragments with exactly one slash between them.
/// A trailing slash on `b` is preserved.
pub fn join_url_fragments(a: &str, b: &str) -> String {
    if b.is_empty() {
        return a.to_string();
    }

    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');

    match (a_slash, b_slash) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}
