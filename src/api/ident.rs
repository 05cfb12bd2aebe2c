use rand::seq::SliceRandom;
use rand::Rng;

use crate::errors::{AppError, AppResult};
use crate::types::Domain;

const LOCAL_PART_MAX: usize = 12;
const SUFFIX_LEN: usize = 4;
const PASSWORD_LEN: usize = 16;

const FIRST_NAMES: &[&str] = &[
    "ada", "alan", "barbara", "claude", "dennis", "donald", "edsger", "frances", "grace", "john",
    "katherine", "ken", "leslie", "margaret", "niklaus", "radia",
];

const LAST_NAMES: &[&str] = &[
    "backus", "hamilton", "hopper", "johnson", "kernighan", "knuth", "lamport", "liskov",
    "lovelace", "mccarthy", "perlman", "ritchie", "shannon", "thompson", "turing", "wirth",
];

const PASSWORD_CHARS: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%";

const SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Picks one usable domain uniformly at random. Inactive domains are never
/// selected, regardless of what the caller passed in.
pub fn pick_domain(domains: &[Domain]) -> AppResult<String> {
    let active: Vec<&Domain> = domains.iter().filter(|d| d.is_active).collect();
    active
        .choose(&mut rand::thread_rng())
        .map(|d| d.domain.clone())
        .ok_or_else(|| AppError::Api("No active domains available".to_string()))
}

/// Synthesizes a human-looking address: a name-derived local part capped at
/// twelve characters plus a short random suffix for collision avoidance.
pub fn random_address(domain: &str) -> String {
    let mut rng = rand::thread_rng();
    let first = FIRST_NAMES.choose(&mut rng).copied().unwrap_or("mail");
    let last = LAST_NAMES.choose(&mut rng).copied().unwrap_or("drop");

    let mut local: String = format!("{first}{last}")
        .chars()
        .filter(|c| c.is_ascii_lowercase())
        .take(LOCAL_PART_MAX)
        .collect();
    for _ in 0..SUFFIX_LEN {
        let idx = rng.gen_range(0..SUFFIX_CHARS.len());
        local.push(SUFFIX_CHARS[idx] as char);
    }

    format!("{local}@{domain}")
}

pub fn random_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_CHARS.len());
            PASSWORD_CHARS[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn domain(name: &str, active: bool) -> Domain {
        Domain {
            id: name.to_string(),
            domain: name.to_string(),
            is_active: active,
            is_private: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn pick_domain_never_selects_inactive() {
        let domains = vec![domain("a.test", true), domain("b.test", false)];
        for _ in 0..50 {
            assert_eq!(pick_domain(&domains).unwrap(), "a.test");
        }
    }

    #[test]
    fn pick_domain_fails_when_none_active() {
        let domains = vec![domain("b.test", false)];
        assert!(pick_domain(&domains).is_err());
    }

    #[test]
    fn random_address_shape() {
        let address = random_address("a.test");
        let (local, rest) = address.split_once('@').expect("local@domain");
        assert_eq!(rest, "a.test");
        assert!(local.len() <= LOCAL_PART_MAX + SUFFIX_LEN);
        assert!(local.len() > SUFFIX_LEN);
        assert!(local
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn random_password_shape() {
        let password = random_password();
        assert_eq!(password.len(), PASSWORD_LEN);
        assert!(password
            .chars()
            .all(|c| PASSWORD_CHARS.contains(&(c as u8))));
    }
}
