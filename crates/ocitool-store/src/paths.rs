//! Lexical path handling for archive entry names.
//!
//! Names are cleaned without touching the filesystem: repeated separators and
//! `.` components are dropped and `..` consumes the preceding component.

/// Lexically normalise a slash-separated path. An empty result is `"."`.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_owned(),
        (false, false) => joined,
    }
}

/// True if a cleaned relative path climbs above its root.
pub fn escapes_root(cleaned: &str) -> bool {
    cleaned == ".." || cleaned.starts_with("../")
}
