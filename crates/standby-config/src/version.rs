//! Config content versions
//!
//! A version is four dot-separated unsigned numbers, e.g. `1.0.0.3`.
//! Versions compare numerically part by part. Anything that does not parse
//! (including the empty string) sorts below every valid version, and all
//! invalid versions are equal to each other.

use std::cmp::Ordering;

const VERSION_PARTS: usize = 4;

/// Parse a four-part version
pub fn parse_version(value: &str) -> Option<[u32; VERSION_PARTS]> {
    let mut parts = [0u32; VERSION_PARTS];
    let mut count = 0;
    for piece in value.split('.') {
        if count == VERSION_PARTS || piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        parts[count] = piece.parse().ok()?;
        count += 1;
    }
    (count == VERSION_PARTS).then_some(parts)
}

/// Total order over version strings
pub fn compare_version(a: &str, b: &str) -> Ordering {
    parse_version(a).cmp(&parse_version(b))
}

/// The newer of two versions; `a` wins ties
pub fn newer_version<'a>(a: &'a str, b: &'a str) -> &'a str {
    match compare_version(a, b) {
        Ordering::Less => b,
        _ => a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("1.0.0.3"), Some([1, 0, 0, 3]));
        assert_eq!(parse_version("10.20.30.40"), Some([10, 20, 30, 40]));
        assert_eq!(parse_version(""), None);
        assert_eq!(parse_version("1.0"), None);
        assert_eq!(parse_version("1.0.0.0.0"), None);
        assert_eq!(parse_version("1.0.0.a"), None);
        assert_eq!(parse_version("1..0.0"), None);
        assert_eq!(parse_version("+1.0.0.0"), None);
    }

    #[test]
    fn test_compare_valid_versions() {
        assert_eq!(compare_version("1.0.0.1", "1.0.0.0"), Ordering::Greater);
        assert_eq!(compare_version("1.0.0.0", "1.0.0.1"), Ordering::Less);
        assert_eq!(compare_version("1.0.0.0", "1.0.0.0"), Ordering::Equal);
        // numeric, not lexical
        assert_eq!(compare_version("1.0.0.10", "1.0.0.9"), Ordering::Greater);
    }

    #[test]
    fn test_invalid_versions_sort_first() {
        assert_eq!(compare_version("", "1.0.0.0"), Ordering::Less);
        assert_eq!(compare_version("1.0.0.0", ""), Ordering::Greater);
        assert_eq!(compare_version("", ""), Ordering::Equal);
        assert_eq!(compare_version("1.0", "1.0.0.0"), Ordering::Less);
        assert_eq!(compare_version("1.0.0.a", "1.0.0.b"), Ordering::Equal);
    }

    #[test]
    fn test_order_is_antisymmetric() {
        let versions = ["", "1.0", "1.0.0.0", "1.0.0.1", "2.0.0.0", "x.y.z.w"];
        for a in versions {
            for b in versions {
                assert_eq!(compare_version(a, b), compare_version(b, a).reverse());
            }
        }
    }

    #[test]
    fn test_newer_version() {
        assert_eq!(newer_version("1.0.0.0", "1.0.0.1"), "1.0.0.1");
        assert_eq!(newer_version("1.0.0.2", "1.0.0.1"), "1.0.0.2");
        assert_eq!(newer_version("", "1.0.0.0"), "1.0.0.0");
    }
}
