//! Subdomain validation and generation.

use rand::Rng;

/// Labels the service refuses to hand out because they collide with
/// infrastructure hostnames.
pub const RESERVED: &[&str] = &[
    "www",
    "api",
    "admin",
    "dashboard",
    "app",
    "mail",
    "ftp",
    "localhost",
    "webmail",
    "smtp",
    "pop",
    "ns",
    "dns",
    "support",
    "help",
    "secure",
    "ssl",
    "vpn",
];

const MIN_LEN: usize = 3;
const MAX_LEN: usize = 63;
const GENERATED_LEN: usize = 8;

/// Returns `true` iff `s` is 3–63 characters, matches
/// `[a-z0-9]([a-z0-9-]*[a-z0-9])?` (case-insensitively), and is not a
/// reserved label. Format and reservation are checked before anything
/// touches authentication, per the registration ordering in §4.2/§4.6.
pub fn validate(s: &str) -> bool {
    if s.len() < MIN_LEN || s.len() > MAX_LEN {
        return false;
    }
    if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(s)) {
        return false;
    }
    matches_format(s)
}

fn matches_format(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    let is_label_char = |c: &char| c.is_ascii_alphanumeric() || *c == '-';
    if !chars.iter().all(is_label_char) {
        return false;
    }
    let first = chars[0];
    let last = *chars.last().unwrap();
    first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric()
}

/// Generates a fresh, random, lowercase hex label of fixed length, suitable
/// for a client that did not request a specific subdomain.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_LEN)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            std::char::from_digit(n as u32, 16).unwrap()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_forms() {
        for s in ["abc", "a-b-c", "a1b2c3", &"a".repeat(63)] {
            assert!(validate(s), "expected {s} to be valid");
        }
    }

    #[test]
    fn rejects_invalid_forms() {
        for s in ["ab", "-abc", "abc-", "WWW", &"a".repeat(64), "a_b"] {
            assert!(!validate(s), "expected {s} to be invalid");
        }
    }

    #[test]
    fn reserved_is_case_insensitive() {
        assert!(!validate("Api"));
        assert!(!validate("ADMIN"));
    }

    #[test]
    fn generate_produces_valid_hex_label() {
        for _ in 0..50 {
            let s = generate();
            assert_eq!(s.len(), GENERATED_LEN);
            assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            assert!(validate(&s));
        }
    }
}
