//! Roll requests issued by the narrator and the player's answers to them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error type for roll requests and submissions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RollError {
    #[error("Enter a number between 1 and {sides}")]
    OutOfRange { value: u32, sides: u32 },
    #[error("Roll request declares an invalid die size: {0}")]
    InvalidDie(u32),
}

/// Server-assigned identifier of a roll request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RollRequestId(pub String);

impl fmt::Display for RollRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A roll the player must make before the turn can continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRequest {
    pub id: RollRequestId,
    pub skill_label: String,
    die_sides: u32,
    pub difficulty_class: Option<i32>,
}

impl RollRequest {
    /// Create a roll request. Dice must have at least one side.
    pub fn new(
        id: impl Into<String>,
        skill_label: impl Into<String>,
        die_sides: u32,
        difficulty_class: Option<i32>,
    ) -> Result<Self, RollError> {
        if die_sides == 0 {
            return Err(RollError::InvalidDie(die_sides));
        }
        Ok(Self {
            id: RollRequestId(id.into()),
            skill_label: skill_label.into(),
            die_sides,
            difficulty_class,
        })
    }

    pub fn die_sides(&self) -> u32 {
        self.die_sides
    }

    /// Check a rolled value against the die before anything is sent.
    pub fn check(&self, value: u32) -> Result<(), RollError> {
        if (1..=self.die_sides).contains(&value) {
            Ok(())
        } else {
            Err(RollError::OutOfRange {
                value,
                sides: self.die_sides,
            })
        }
    }
}

impl fmt::Display for RollRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Roll a d{} for {}", self.die_sides, self.skill_label)?;
        if let Some(dc) = self.difficulty_class {
            write!(f, " (DC {dc})")?;
        }
        Ok(())
    }
}

impl TryFrom<narrator::ApiRollRequest> for RollRequest {
    type Error = RollError;

    fn try_from(api: narrator::ApiRollRequest) -> Result<Self, Self::Error> {
        Self::new(api.id, api.skill, api.sides, api.dc)
    }
}

/// The player's answer to a roll request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollSubmission {
    pub roll_request_id: RollRequestId,
    pub value: u32,
    pub modifier: i32,
}

/// The transcript line recorded for a submitted roll.
pub fn roll_summary(value: u32, modifier: i32) -> String {
    if modifier == 0 {
        format!("Roll {value}")
    } else {
        format!("Roll {value} + {modifier}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_bounds() {
        let request = RollRequest::new("r1", "Perception", 20, Some(10)).unwrap();
        assert!(request.check(1).is_ok());
        assert!(request.check(20).is_ok());
        assert_eq!(
            request.check(21),
            Err(RollError::OutOfRange {
                value: 21,
                sides: 20
            })
        );
        assert!(request.check(0).is_err());
    }

    #[test]
    fn test_zero_sided_die_rejected() {
        assert_eq!(
            RollRequest::new("r1", "Luck", 0, None),
            Err(RollError::InvalidDie(0))
        );
    }

    #[test]
    fn test_roll_summary() {
        assert_eq!(roll_summary(20, 3), "Roll 20 + 3");
        assert_eq!(roll_summary(20, 0), "Roll 20");
        assert_eq!(roll_summary(4, -1), "Roll 4 + -1");
    }

    #[test]
    fn test_display_prompt() {
        let with_dc = RollRequest::new("r1", "Stealth", 20, Some(12)).unwrap();
        assert_eq!(with_dc.to_string(), "Roll a d20 for Stealth (DC 12)");

        let without_dc = RollRequest::new("r2", "Luck", 6, None).unwrap();
        assert_eq!(without_dc.to_string(), "Roll a d6 for Luck");
    }

    #[test]
    fn test_from_api() {
        let api = narrator::ApiRollRequest {
            id: "abc".to_string(),
            skill: "Athletics".to_string(),
            sides: 20,
            dc: None,
        };
        let request = RollRequest::try_from(api).unwrap();
        assert_eq!(request.id.0, "abc");
        assert_eq!(request.die_sides(), 20);
        assert!(request.difficulty_class.is_none());
    }

    #[test]
    fn test_out_of_range_message() {
        let err = RollError::OutOfRange { value: 21, sides: 20 };
        assert_eq!(err.to_string(), "Enter a number between 1 and 20");
    }
}
