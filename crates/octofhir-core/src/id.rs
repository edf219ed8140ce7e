use crate::error::{EngineError, Result};

/// Generate a new server-assigned resource id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validate the FHIR id syntax: `[A-Za-z0-9.-]{1,64}`.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 {
        return Err(EngineError::InvalidId(id.to_string()));
    }
    if id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
    {
        Ok(())
    } else {
        Err(EngineError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_valid() {
        let id = generate_id();
        assert!(validate_id(&id).is_ok());
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn test_validate_id_accepts_fhir_charset() {
        assert!(validate_id("abc-123.XYZ").is_ok());
        assert!(validate_id("a").is_ok());
        assert!(validate_id(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_id_rejects_bad_ids() {
        assert!(validate_id("").is_err());
        assert!(validate_id(&"x".repeat(65)).is_err());
        assert!(validate_id("has space").is_err());
        assert!(validate_id("under_score").is_err());
        assert!(validate_id("slash/id").is_err());
    }
}
