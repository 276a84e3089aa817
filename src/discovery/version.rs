//! Kubernetes-style version priority.
//!
//! GA releases sort above beta, beta above alpha, and higher numbers first
//! within a tier; anything unparsable sorts last, lexically. Derived from
//! the ordering rules the kube discovery machinery applies
//! (kube-core/src/discovery.rs in the kube-rs workspace).

use std::cmp::Ordering;

/// A parsed version name such as `v1`, `v2beta1` or `v1alpha2`.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Parsed {
    Stable(u32),
    Beta(u32, u32),
    Alpha(u32, u32),
    Other(String),
}

fn parse(version: &str) -> Parsed {
    let rest = match version.strip_prefix('v') {
        Some(rest) => rest,
        None => return Parsed::Other(version.to_string()),
    };
    if let Some((major, minor)) = split_tier(rest, "beta") {
        return Parsed::Beta(major, minor);
    }
    if let Some((major, minor)) = split_tier(rest, "alpha") {
        return Parsed::Alpha(major, minor);
    }
    match rest.parse::<u32>() {
        Ok(major) => Parsed::Stable(major),
        Err(_) => Parsed::Other(version.to_string()),
    }
}

fn split_tier(rest: &str, tier: &str) -> Option<(u32, u32)> {
    let idx = rest.find(tier)?;
    let major = rest[..idx].parse::<u32>().ok()?;
    let minor = rest[idx + tier.len()..].parse::<u32>().ok()?;
    Some((major, minor))
}

fn rank(parsed: &Parsed) -> u8 {
    match parsed {
        Parsed::Stable(_) => 3,
        Parsed::Beta(_, _) => 2,
        Parsed::Alpha(_, _) => 1,
        Parsed::Other(_) => 0,
    }
}

/// Compares two version names by Kubernetes priority; `Greater` means `a`
/// is preferred over `b`.
pub fn compare_version_priority(a: &str, b: &str) -> Ordering {
    let (pa, pb) = (parse(a), parse(b));
    match rank(&pa).cmp(&rank(&pb)) {
        Ordering::Equal => match (pa, pb) {
            (Parsed::Stable(a), Parsed::Stable(b)) => a.cmp(&b),
            (Parsed::Beta(a1, a2), Parsed::Beta(b1, b2)) => a1.cmp(&b1).then(a2.cmp(&b2)),
            (Parsed::Alpha(a1, a2), Parsed::Alpha(b1, b2)) => a1.cmp(&b1).then(a2.cmp(&b2)),
            // unparsable names order lexically, reversed so that sort-desc
            // yields ascii order
            (Parsed::Other(a), Parsed::Other(b)) => b.cmp(&a),
            _ => Ordering::Equal,
        },
        other => other,
    }
}

/// Sorts version names in place, highest priority first.
pub fn sort_by_priority(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_version_priority(b, a));
}
