use sha2::{Digest, Sha256};

/// One named byte blob contributing to a [`requirement_hash`] computation.
pub struct HashedFile<'a> {
    /// Original (sanitized) filename.
    pub filename: &'a str,
    /// File content.
    pub content: &'a [u8],
}

/// Computes the idempotency dedup key component: SHA-256 over
/// `trim(requirement)` followed by, for each file sorted by filename,
/// `filename || hex(SHA-256(content))`.
///
/// Changing any byte of any input file, or adding/removing/renaming a file,
/// changes the result.
#[must_use]
pub fn requirement_hash(requirement: &str, files: &[HashedFile<'_>]) -> String {
    let mut sorted: Vec<&HashedFile<'_>> = files.iter().collect();
    sorted.sort_by(|a, b| a.filename.cmp(b.filename));

    let mut hasher = Sha256::new();
    hasher.update(requirement.trim().as_bytes());
    for file in sorted {
        hasher.update(file.filename.as_bytes());
        let content_digest = Sha256::digest(file.content);
        hasher.update(hex_encode(&content_digest));
    }
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String cannot fail");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_requirement_no_files_is_stable() {
        let h1 = requirement_hash("", &[]);
        let h2 = requirement_hash("", &[]);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn requirement_is_trimmed_before_hashing() {
        let h1 = requirement_hash("  hello  ", &[]);
        let h2 = requirement_hash("hello", &[]);
        assert_eq!(h1, h2);
    }

    #[test]
    fn file_order_is_canonicalized_by_filename() {
        let files_a = [
            HashedFile {
                filename: "b.txt",
                content: b"B",
            },
            HashedFile {
                filename: "a.txt",
                content: b"A",
            },
        ];
        let files_b = [
            HashedFile {
                filename: "a.txt",
                content: b"A",
            },
            HashedFile {
                filename: "b.txt",
                content: b"B",
            },
        ];
        assert_eq!(
            requirement_hash("req", &files_a),
            requirement_hash("req", &files_b)
        );
    }

    #[test]
    fn changing_any_file_byte_changes_the_hash() {
        let base = [HashedFile {
            filename: "a.txt",
            content: b"hello\n",
        }];
        let mutated = [HashedFile {
            filename: "a.txt",
            content: b"hellO\n",
        }];
        assert_ne!(
            requirement_hash("req", &base),
            requirement_hash("req", &mutated)
        );
    }

    #[test]
    fn changing_filename_changes_the_hash() {
        let a = [HashedFile {
            filename: "a.txt",
            content: b"same",
        }];
        let b = [HashedFile {
            filename: "z.txt",
            content: b"same",
        }];
        assert_ne!(requirement_hash("req", &a), requirement_hash("req", &b));
    }
}
