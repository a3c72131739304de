//! Error types for the ride-sharing bot.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Storage faults. Surfaced to callers of write operations only; reads log
/// and degrade to an empty result.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Rejected user input. Each variant carries its own corrective message and
/// never advances a flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("❌ Invalid date format. Use DD.MM.YYYY (for example: 31.12.2024)")]
    DateFormat,

    #[error("❌ Invalid day of month. Please check the date.")]
    DayOutOfRange,

    #[error("❌ Invalid month. The month must be between 1 and 12.")]
    MonthOutOfRange,

    #[error("❌ Invalid year. Please check the date.")]
    YearOutOfRange,

    #[error("❌ Invalid time format. Use HH:MM (for example: 14:30)")]
    TimeFormat,

    #[error("❌ The number of seats must be a number from 1 to 10")]
    SeatsNotNumber,

    #[error("❌ The number of seats must be a number from 1 to 10")]
    SeatsOutOfRange,

    #[error(
        "❌ Invalid phone number format.\nSend the number as 89123456789 or use the 'Share phone number' button."
    )]
    PhoneFormat,

    #[error("❌ The location must not be empty.")]
    EmptyLocation,
}

/// Errors raised while handling a single session event. None of these are
/// fatal; every variant is rendered back to the user.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("{entity} #{id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Not allowed: {0}")]
    Unauthorized(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("{0}")]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_error_wraps_database_error() {
        let err: FlowError = DatabaseError::Query("disk I/O error".into()).into();
        assert!(matches!(err, FlowError::Persistence(_)));
        assert!(err.to_string().contains("disk I/O error"));
    }

    #[test]
    fn not_found_names_entity_and_id() {
        let err = FlowError::NotFound { entity: "Ride", id: 42 };
        assert_eq!(err.to_string(), "Ride #42 not found");
    }

    #[test]
    fn validation_messages_are_distinct_per_date_fault() {
        assert_ne!(
            ValidationError::DayOutOfRange.to_string(),
            ValidationError::MonthOutOfRange.to_string()
        );
        assert!(ValidationError::DateFormat.to_string().contains("DD.MM.YYYY"));
    }
}
