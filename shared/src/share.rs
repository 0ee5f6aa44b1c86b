//! Share identifiers and share links.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of a share id.
pub const SHARE_ID_LEN: usize = 8;

/// Generate a random, case-sensitive alphanumeric share id.
pub fn generate_share_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHARE_ID_LEN)
        .map(char::from)
        .collect()
}

/// Whether `candidate` has the shape of a share id.
pub fn is_valid_share_id(candidate: &str) -> bool {
    candidate.len() == SHARE_ID_LEN && candidate.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Public link for a shared chart.
pub fn share_url(base_url: &str, share_id: &str) -> String {
    format!("{}/chart/{}", base_url.trim_end_matches('/'), share_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid() {
        for _ in 0..100 {
            let id = generate_share_id();
            assert!(is_valid_share_id(&id), "bad share id {}", id);
        }
    }

    #[test]
    fn test_invalid_ids() {
        assert!(!is_valid_share_id("short"));
        assert!(!is_valid_share_id("abcd-123"));
        assert!(!is_valid_share_id("abcdefghi"));
    }

    #[test]
    fn test_share_url() {
        assert_eq!(
            share_url("https://charts.example/", "Ab3dEf9H"),
            "https://charts.example/chart/Ab3dEf9H"
        );
    }
}
