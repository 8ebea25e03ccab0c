use crate::error::AppError;

pub fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

pub fn require_range(field: &str, value: i64, min: i64, max: i64) -> Result<(), AppError> {
    if value < min || value > max {
        return Err(AppError::Validation(format!(
            "{field} must be between {min} and {max} (got {value})"
        )));
    }
    Ok(())
}

/// Parse an RFC 3339 / ISO 8601 timestamp into epoch milliseconds.
pub fn parse_timestamp_ms(field: &str, value: &str) -> Result<i64, AppError> {
    chrono::DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| AppError::Validation(format!("{field} is not a valid date '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_ms() {
        assert_eq!(
            parse_timestamp_ms("completed_at", "2024-09-20T19:33:12.000Z").unwrap(),
            1_726_860_792_000
        );
        assert!(matches!(
            parse_timestamp_ms("completed_at", "yesterday"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_require_range() {
        assert!(require_range("upgrades", 3, 0, 3).is_ok());
        assert!(require_range("upgrades", 4, 0, 3).is_err());
    }
}
