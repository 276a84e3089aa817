//! String format validators.
//!
//! The format names follow OpenAPI with the Kubernetes additions `quantity`
//! and `int-or-string`. Unrecognized formats are ignored, matching upstream
//! behavior.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveTime};
use regex::Regex;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use crate::common::validation::is_dns1123_subdomain;

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static UUID_RE: OnceLock<Regex> = OnceLock::new();
static URI_RE: OnceLock<Regex> = OnceLock::new();
static DURATION_RE: OnceLock<Regex> = OnceLock::new();
static QUANTITY_RE: OnceLock<Regex> = OnceLock::new();

/// Validates a string against a named format; returns human-readable
/// problems, empty when the value conforms (or the format is unknown).
pub fn validate_format(value: &str, format: &str) -> Vec<String> {
    let ok = match format {
        "date-time" => DateTime::parse_from_rfc3339(value).is_ok(),
        "date" => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        "time" => {
            NaiveTime::parse_from_str(value, "%H:%M:%S").is_ok()
                || NaiveTime::parse_from_str(value, "%H:%M:%S%.f").is_ok()
        }
        "duration" => is_duration(value),
        "email" => EMAIL_RE
            .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
            .is_match(value),
        "hostname" => is_dns1123_subdomain(value).is_empty(),
        "ipv4" => value.parse::<Ipv4Addr>().is_ok(),
        "ipv6" => value.parse::<Ipv6Addr>().is_ok(),
        "cidr" => is_cidr(value),
        "uri" => URI_RE
            .get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://?\S+$").unwrap())
            .is_match(value),
        "uri-reference" => !value.contains(char::is_whitespace),
        "uuid" => UUID_RE
            .get_or_init(|| {
                Regex::new(
                    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
                )
                .unwrap()
            })
            .is_match(value),
        "byte" => STANDARD.decode(value.as_bytes()).is_ok(),
        "quantity" => is_quantity(value),
        // int-or-string is enforced at the type level
        "int-or-string" => true,
        _ => true,
    };

    if ok {
        Vec::new()
    } else {
        vec![format!("must be a valid {} string", format)]
    }
}

/// Accepts Go-style durations: a signed sequence of decimal numbers with
/// time unit suffixes, e.g. "1h30m", "300ms".
fn is_duration(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    DURATION_RE
        .get_or_init(|| {
            Regex::new(r"^[+-]?(\d+(\.\d*)?(ns|us|µs|ms|s|m|h))+$").unwrap()
        })
        .is_match(value)
        || value == "0"
}

fn is_cidr(value: &str) -> bool {
    let Some((addr, prefix)) = value.split_once('/') else {
        return false;
    };
    let Ok(bits) = prefix.parse::<u8>() else {
        return false;
    };
    if addr.parse::<Ipv4Addr>().is_ok() {
        bits <= 32
    } else if addr.parse::<Ipv6Addr>().is_ok() {
        bits <= 128
    } else {
        false
    }
}

/// Accepts Kubernetes resource quantities: a decimal number with an optional
/// binary (Ki..Ei), decimal (k..E, m, u, n) or exponent suffix.
fn is_quantity(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    QUANTITY_RE
        .get_or_init(|| {
            Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)(([KMGTPE]i)|[numkMGTPE]|([eE][+-]?\d+))?$")
                .unwrap()
        })
        .is_match(value)
}
