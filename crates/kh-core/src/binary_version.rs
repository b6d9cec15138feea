//! Binary-version pattern language used to gate dispatch to compatible
//! agents: `"default"`, `"MAJOR.x"`, `"MAJOR.MINOR.x"`, `"MAJOR.MINOR.PATCH"`,
//! or `"MAJOR.MINOR.PATCH-suffix"`. `"default"` matches anything; otherwise
//! two patterns match when every level present in both agrees and a
//! trailing `x` (or an absent level) leaves that level unconstrained.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Parsed {
    major: Option<u32>,
    minor: Option<u32>,
    patch: Option<u32>,
    suffix: Option<String>,
}

fn parse(s: &str) -> Parsed {
    if s == "default" {
        return Parsed::default();
    }
    let (core, suffix) = match s.split_once('-') {
        Some((core, suffix)) => (core, Some(suffix.to_string())),
        None => (s, None),
    };
    let parts: Vec<&str> = core.split('.').collect();
    let level = |p: Option<&&str>| -> Option<u32> {
        match p {
            None | Some(&"x") => None,
            Some(v) => v.parse().ok(),
        }
    };
    Parsed {
        major: level(parts.first()),
        minor: level(parts.get(1)),
        patch: level(parts.get(2)),
        suffix,
    }
}

fn level_matches(a: Option<u32>, b: Option<u32>) -> bool {
    match (a, b) {
        (None, _) | (_, None) => true,
        (Some(x), Some(y)) => x == y,
    }
}

/// Whether a job's required `pattern` is satisfied by an agent's reported
/// `candidate` version, in either direction (both use the same grammar).
pub fn matches(pattern: &str, candidate: &str) -> bool {
    if pattern == "default" || candidate == "default" {
        return true;
    }
    let p = parse(pattern);
    let c = parse(candidate);
    level_matches(p.major, c.major)
        && level_matches(p.minor, c.minor)
        && level_matches(p.patch, c.patch)
        && match (&p.suffix, &c.suffix) {
            (None, _) | (_, None) => true,
            (Some(x), Some(y)) => x == y,
        }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_anything() {
        assert!(matches("default", "2.3.1"));
        assert!(matches("2.x", "default"));
    }

    #[test]
    fn exact_patch_requires_exact_match() {
        assert!(matches("2.3.1", "2.3.1"));
        assert!(!matches("2.3.1", "2.3.2"));
    }

    #[test]
    fn major_wildcard_matches_any_minor_patch() {
        assert!(matches("2.x", "2.9.4"));
        assert!(!matches("2.x", "3.0.0"));
    }

    #[test]
    fn minor_wildcard_pins_major_only() {
        assert!(matches("2.3.x", "2.3.9"));
        assert!(!matches("2.3.x", "2.4.0"));
    }

    #[test]
    fn suffix_must_match_when_both_present() {
        assert!(matches("2.3.1-rc1", "2.3.1-rc1"));
        assert!(!matches("2.3.1-rc1", "2.3.1-rc2"));
        assert!(matches("2.3.1", "2.3.1-rc1"));
    }
}
