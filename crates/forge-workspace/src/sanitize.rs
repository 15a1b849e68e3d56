use std::path::Path;

/// Replaces every run of characters outside `[A-Za-z0-9._-]` with a single
/// `_`. Never returns an empty string — an all-invalid input becomes `_`.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let mut out = String::with_capacity(filename.len());
    let mut prev_was_replaced = false;
    for ch in filename.chars() {
        // A '.' is only safe when it doesn't follow another '.' — otherwise
        // "../../etc/passwd" would sail through with its traversal markers
        // intact once the slashes are stripped out.
        let is_safe = ch.is_ascii_alphanumeric()
            || ch == '_'
            || ch == '-'
            || (ch == '.' && out.chars().last() != Some('.'));
        if is_safe {
            out.push(ch);
            prev_was_replaced = false;
        } else if !prev_was_replaced {
            out.push('_');
            prev_was_replaced = true;
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Finds a filename under `dir` that does not yet exist, starting from
/// `candidate` and appending `_1`, `_2`, ... before the extension until a
/// free name is found.
#[must_use]
pub fn dedupe_filename(dir: &Path, candidate: &str) -> String {
    if !dir.join(candidate).exists() {
        return candidate.to_string();
    }
    let (stem, ext) = split_ext(candidate);
    for n in 1u64.. {
        let next = if ext.is_empty() {
            format!("{stem}_{n}")
        } else {
            format!("{stem}_{n}.{ext}")
        };
        if !dir.join(&next).exists() {
            return next;
        }
    }
    unreachable!("u64 space exhausted")
}

fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        // A leading dot (dotfile) is not treated as an extension separator.
        Some(idx) if idx > 0 => (&name[..idx], &name[idx + 1..]),
        _ => (name, ""),
    }
}
