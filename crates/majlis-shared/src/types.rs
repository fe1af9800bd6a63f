use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Account identity as resolved by the authentication provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserUid(pub String);

impl UserUid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("display id must be exactly 6 ASCII digits, got {0:?}")]
pub struct InvalidDisplayId(pub String);

/// Public 6-digit identifier shown in the UI and used to address other users.
///
/// Rooms reuse their host's display id, and seats store the occupant's display
/// id rather than the account uid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DisplayId(pub String);

impl DisplayId {
    pub fn parse(s: &str) -> Result<Self, InvalidDisplayId> {
        let s = s.trim();
        if s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidDisplayId(s.to_string()))
        }
    }

    /// Draw a random id in `100000..=999999`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(100_000..=999_999u32).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DisplayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminRole {
    Owner,
    SuperAdmin,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    #[default]
    Fair,
    Drain,
    Hook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    Diamonds,
    Coins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Frame,
    Bubble,
    Entry,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_id_parse() {
        assert_eq!(DisplayId::parse(" 123456 ").unwrap().as_str(), "123456");
        assert!(DisplayId::parse("12345").is_err());
        assert!(DisplayId::parse("12a456").is_err());
    }

    #[test]
    fn test_display_id_random_is_six_digits() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let id = DisplayId::random(&mut rng);
            assert!(DisplayId::parse(id.as_str()).is_ok());
        }
    }

    #[test]
    fn test_game_mode_wire_names() {
        assert_eq!(serde_json::to_string(&GameMode::Hook).unwrap(), "\"HOOK\"");
    }
}
