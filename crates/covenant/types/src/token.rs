//! Acknowledgement action reference
//!
//! The acknowledgement button posted into a space carries `agree_<space_id>`
//! so the action can be resolved even when pressed from a direct chat.

use crate::error::TypeError;
use crate::ids::SpaceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TOKEN_PREFIX: &str = "agree_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckToken {
    pub space_id: SpaceId,
}

impl AckToken {
    pub fn new(space_id: SpaceId) -> Self {
        Self { space_id }
    }

    /// Whether a raw action payload is meant for this gate at all
    pub fn is_candidate(raw: &str) -> bool {
        raw.starts_with(TOKEN_PREFIX)
    }
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", TOKEN_PREFIX, self.space_id)
    }
}

impl FromStr for AckToken {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .strip_prefix(TOKEN_PREFIX)
            .ok_or_else(|| TypeError::MalformedToken(s.to_string()))?;
        let id: i64 = id
            .parse()
            .map_err(|_| TypeError::MalformedToken(s.to_string()))?;
        Ok(Self::new(SpaceId::new(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_token_roundtrip() {
        let token = AckToken::new(SpaceId::new(-1001));
        assert_eq!(token.to_string(), "agree_-1001");
        assert_eq!("agree_-1001".parse::<AckToken>(), Ok(token));
    }

    #[test]
    fn test_malformed_tokens() {
        for raw in ["agree_", "agree_abc", "agree_1_2", "disagree_5", ""] {
            assert!(
                matches!(raw.parse::<AckToken>(), Err(TypeError::MalformedToken(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_candidate_prefix() {
        assert!(AckToken::is_candidate("agree_x"));
        assert!(!AckToken::is_candidate("vote_1"));
    }

    proptest! {
        #[test]
        fn parse_never_panics(raw in "\\PC*") {
            let _ = raw.parse::<AckToken>();
        }

        #[test]
        fn suffix_after_prefix_must_be_an_integer(suffix in "[a-z_]{1,8}") {
            let raw = format!("agree_{}", suffix);
            prop_assert!(AckToken::is_candidate(&raw));
            prop_assert!(raw.parse::<AckToken>().is_err());
        }
    }
}
