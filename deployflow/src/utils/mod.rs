//! Utility functions for identifiers, timestamps and name validation.

pub mod timestamps;
pub mod validation;

pub use timestamps::{iso_timestamp, now_utc, Timestamp};
pub use validation::{is_valid_artifact_name, is_valid_resource_name, validate_dag, CycleError};

use uuid::Uuid;

/// Generates a new UUID v4, used for pipeline execution ids.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_valid() {
        let id = generate_uuid();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}
