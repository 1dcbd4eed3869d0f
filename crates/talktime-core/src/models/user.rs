//! Identity and effect catalog models

use serde::{Deserialize, Serialize};

/// A subscriber as known to the identity directory
///
/// The username is the caller's phone number as presented by the switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}

/// Voice effect catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceType {
    pub id: i64,

    /// Display name (e.g. "Child")
    pub voice_name: String,

    /// Effect code handed to the transport, at most 10 characters
    pub code: String,
}

impl VoiceType {
    pub const MAX_CODE_LEN: usize = 10;

    pub fn has_valid_code(&self) -> bool {
        !self.code.is_empty() && self.code.len() <= Self::MAX_CODE_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_length() {
        let mut voice = VoiceType {
            id: 1,
            voice_name: "Male".to_string(),
            code: "901".to_string(),
        };
        assert!(voice.has_valid_code());

        voice.code = "12345678901".to_string();
        assert!(!voice.has_valid_code());
    }
}
