use std::fmt;

use serde::{Deserialize, Serialize};

/// Access a user group holds on a namespace.
///
/// Levels are ordered: `Full` implies `Modify` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionLevel {
    Read,
    Modify,
    Full,
}

impl PermissionLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Modify => "MODIFY",
            Self::Full => "FULL",
        }
    }

    /// Parses a permission name, case-insensitively.
    pub fn parse(s: &str) -> Option<PermissionLevel> {
        match s.to_ascii_uppercase().as_str() {
            "READ" => Some(Self::Read),
            "MODIFY" => Some(Self::Modify),
            "FULL" => Some(Self::Full),
            _ => None,
        }
    }

    /// Integer form stored in the catalog; preserves ordering so SQL `MAX` works.
    #[must_use]
    pub const fn rank(self) -> i64 {
        match self {
            Self::Read => 1,
            Self::Modify => 2,
            Self::Full => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Option<PermissionLevel> {
        match rank {
            1 => Some(Self::Read),
            2 => Some(Self::Modify),
            3 => Some(Self::Full),
            _ => None,
        }
    }

    /// Returns true if this level satisfies the required level.
    #[must_use]
    pub fn allows(self, required: PermissionLevel) -> bool {
        self >= required
    }

    /// Effective level across several grants: the maximum.
    pub fn max_of<I>(levels: I) -> Option<PermissionLevel>
    where
        I: IntoIterator<Item = PermissionLevel>,
    {
        levels.into_iter().max()
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(PermissionLevel::Full.allows(PermissionLevel::Modify));
        assert!(PermissionLevel::Modify.allows(PermissionLevel::Read));
        assert!(!PermissionLevel::Read.allows(PermissionLevel::Modify));
    }

    #[test]
    fn test_max_of_grants() {
        let levels = [PermissionLevel::Read, PermissionLevel::Full, PermissionLevel::Modify];
        assert_eq!(PermissionLevel::max_of(levels), Some(PermissionLevel::Full));
        assert_eq!(PermissionLevel::max_of([]), None);
    }

    #[test]
    fn test_parse_permission() {
        assert_eq!(PermissionLevel::parse("modify"), Some(PermissionLevel::Modify));
        assert_eq!(PermissionLevel::parse("admin"), None);
    }

    #[test]
    fn test_serde_uses_upper_case() {
        let json = serde_json::to_string(&PermissionLevel::Full).unwrap();
        assert_eq!(json, "\"FULL\"");
    }
}
