use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request payload for registering a new robot
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterRobotRequest {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Name must be between 1 and 255 characters"
    ))]
    #[validate(custom(function = "validate_robot_name"))]
    pub name: String,

    /// Defaults to now when omitted
    pub last_updated: Option<NaiveDateTime>,
}

impl RegisterRobotRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_updated: None,
        }
    }

    pub fn updated_at(mut self, ts: NaiveDateTime) -> Self {
        self.last_updated = Some(ts);
        self
    }
}

// Names end up in comma-separated battle files and `key=value` lines, and a
// trailing `*` is the simulator's development-robot marker.
fn validate_robot_name(name: &str) -> Result<(), validator::ValidationError> {
    const FORBIDDEN: &[char] = &[',', '=', '*'];

    if name.chars().any(|c| c.is_whitespace() || FORBIDDEN.contains(&c)) {
        Err(validator::ValidationError::new("invalid_robot_name"))
    } else {
        Ok(())
    }
}
