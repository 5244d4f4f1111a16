//! DOS-style `*`/`?` pattern matching, case-insensitive.
//!
//! `*` matches any run of characters (including none); `?` matches exactly
//! one. Matching is done byte-wise over ASCII-uppercased input, which is
//! sufficient for 8.3 names and good enough for long names in practice.

/// Returns `true` if `name` matches `pattern`.
///
/// Uses the standard two-pointer/backtracking glob algorithm: on a `*` we
/// remember the position and greedily consume, backtracking to it if a
/// later literal fails to match.
pub fn matches(pattern: &str, name: &str) -> bool {
    let p: Vec<u8> = pattern.bytes().map(|b| b.to_ascii_uppercase()).collect();
    let n: Vec<u8> = name.bytes().map(|b| b.to_ascii_uppercase()).collect();

    let (mut pi, mut ni) = (0usize, 0usize);
    let (mut star_idx, mut star_match) = (None::<usize>, 0usize);

    while ni < n.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star_idx = Some(pi);
            star_match = ni;
            pi += 1;
        } else if let Some(si) = star_idx {
            pi = si + 1;
            star_match += 1;
            ni = star_match;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }

    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact() {
        assert!(matches("hello.txt", "HELLO.TXT"));
        assert!(!matches("hello.txt", "hellx.txt"));
    }

    #[test]
    fn star() {
        assert!(matches("*.txt", "readme.txt"));
        assert!(matches("*", "anything.bin"));
        assert!(matches("f*.bin", "f000.bin"));
        assert!(!matches("f*.bin", "f000.dat"));
    }

    #[test]
    fn question() {
        assert!(matches("f???.bin", "f000.bin"));
        assert!(!matches("f???.bin", "f0000.bin"));
    }

    #[test]
    fn combined() {
        assert!(matches("*.*", "a.b"));
        assert!(matches("~??????1.dat", "~0000001.DAT"));
    }
}
