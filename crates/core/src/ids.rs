//! ULID generation for entity primary keys.
//!
//! Every row the engine writes (actions, visits, fingerprints, held
//! beliefs) is keyed by a lexicographically sortable 26-character ULID so
//! primary-key order is also creation order.

use ulid::Ulid;

/// Generate a fresh ULID rendered in its canonical 26-character form.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Check that a string is a well-formed ULID. Slugs fail this check, which
/// is how belief events (slug-keyed) are told apart from id-keyed lookups.
pub fn is_ulid(value: &str) -> bool {
    value.len() == 26 && Ulid::from_string(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_is_26_chars() {
        let id = new_id();
        assert_eq!(id.len(), 26);
        assert!(is_ulid(&id));
    }

    #[test]
    fn test_ids_are_lexicographically_ordered() {
        let a = new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id();
        assert!(a < b);
    }

    #[test]
    fn test_slug_is_not_ulid() {
        assert!(!is_ulid("mood"));
        assert!(!is_ulid("a-slug-that-is-26-chars-xx"));
    }
}
