//! Identifier and value types shared across the governance crate

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Voting weight, a token balance
pub type Weight = u128;

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }
    };
}

snowflake!(
    /// Chat-platform user id
    UserId
);
snowflake!(
    /// Chat-platform channel id
    ChannelId
);
snowflake!(
    /// Chat-platform message id, identifies a proposal
    MessageId
);

impl UserId {
    /// Parse a raw id or a `<@id>` / `<@!id>` mention
    pub fn parse_mention(s: &str) -> Option<Self> {
        let s = s.trim();
        let inner = s
            .strip_prefix("<@")
            .and_then(|rest| rest.strip_suffix('>'))
            .map(|rest| rest.trim_start_matches('!'))
            .unwrap_or(s);
        inner.parse().ok()
    }
}

/// Wallet address: `0x` followed by 40 hex digits, stored lowercase
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Address must start with 0x")]
    MissingPrefix,
    #[error("Address must have 40 hex digits, got {0}")]
    BadLength(usize),
    #[error("Address contains non-hex characters")]
    NotHex,
}

impl Address {
    pub const HEX_LEN: usize = 40;

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digits without the `0x` prefix
    pub fn digits(&self) -> &str {
        &self.0[2..]
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AddressError::MissingPrefix)?;
        if digits.len() != Self::HEX_LEN {
            return Err(AddressError::BadLength(digits.len()));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::NotHex);
        }
        Ok(Address(format!("0x{}", digits.to_ascii_lowercase())))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One choice on a proposal, usually an emoji
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptionToken(String);

impl OptionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OptionToken {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for OptionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalized_to_lowercase() {
        let addr: Address = "0xABCDEF0123456789abcdef0123456789ABCDEF01".parse().unwrap();
        assert_eq!(addr.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(addr.digits().len(), 40);
    }

    #[test]
    fn test_address_rejects_malformed() {
        assert_eq!("abc".parse::<Address>(), Err(AddressError::MissingPrefix));
        assert_eq!("0xabc".parse::<Address>(), Err(AddressError::BadLength(3)));
        assert_eq!(
            "0xzzcdef0123456789abcdef0123456789abcdef01".parse::<Address>(),
            Err(AddressError::NotHex)
        );
    }

    #[test]
    fn test_user_mentions() {
        assert_eq!(UserId::parse_mention("123"), Some(UserId(123)));
        assert_eq!(UserId::parse_mention("<@456>"), Some(UserId(456)));
        assert_eq!(UserId::parse_mention("<@!789>"), Some(UserId(789)));
        assert_eq!(UserId::parse_mention("someone"), None);
    }
}
