//! Mapping scraped participant ids onto the season's known teams and riders.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::entities::{EntityId, Rider, Team};
use crate::errors::ScrapeError;

/// Known renames and invitations for the 2023 season.
///
/// `None` marks teams that are deliberately ignored (national selections
/// invited to a single race, never part of the team listing).
pub const SEASON_2023_ALIASES: &[(&str, Option<&str>)] = &[
    ("team-dsm-2023", Some("team-dsm-firmenich-2023")),
    ("trek-segafredo-2023", Some("lidl-trek-2023")),
    ("team-corratec-2023", Some("team-corratec-selle-italia-2023")),
    ("unisa-australia-2023", None),
    ("switzerland-2023", None),
    ("poland-2023", None),
];

/// Built-in aliases for `season`. Only 2023 has any.
pub fn season_aliases(season: i32) -> &'static [(&'static str, Option<&'static str>)] {
    match season {
        2023 => SEASON_2023_ALIASES,
        _ => &[],
    }
}

/// Maps a scraped id to a canonical entity id.
///
/// `Ok(None)` drops the row (or participation) the id came from.
pub trait ParticipantResolver: Send + Sync {
    fn resolve(&self, raw_id: &str) -> Result<Option<EntityId>, ScrapeError>;
}

/// What a `StrictResolver` does with an id that is neither on the roster
/// nor aliased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownTeamPolicy {
    /// Abort with `ScrapeError::UnknownTeam`.
    #[default]
    Fail,
    /// Log a warning and drop the row.
    Drop,
}

impl FromStr for UnknownTeamPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(UnknownTeamPolicy::Fail),
            "drop" => Ok(UnknownTeamPolicy::Drop),
            other => Err(format!("unknown team policy '{}'", other)),
        }
    }
}

/// Team resolution: every id must be known.
#[derive(Debug, Clone, Default)]
pub struct StrictResolver {
    roster: HashSet<EntityId>,
    aliases: HashMap<String, Option<EntityId>>,
    policy: UnknownTeamPolicy,
}

impl StrictResolver {
    pub fn new(roster: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            roster: roster.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn from_teams(teams: &[Team]) -> Self {
        Self::new(teams.iter().map(|t| t.id.clone()))
    }

    /// Add id renames. A `None` target resolves the id to "ignored".
    pub fn with_aliases<K, V>(mut self, aliases: impl IntoIterator<Item = (K, Option<V>)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.aliases.extend(
            aliases
                .into_iter()
                .map(|(from, to)| (from.into(), to.map(Into::into))),
        );
        self
    }

    pub fn with_policy(mut self, policy: UnknownTeamPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }
}

impl ParticipantResolver for StrictResolver {
    fn resolve(&self, raw_id: &str) -> Result<Option<EntityId>, ScrapeError> {
        if self.roster.contains(raw_id) {
            return Ok(Some(raw_id.to_string()));
        }
        if let Some(target) = self.aliases.get(raw_id) {
            return Ok(target.clone());
        }
        match self.policy {
            UnknownTeamPolicy::Fail => Err(ScrapeError::UnknownTeam(raw_id.to_string())),
            UnknownTeamPolicy::Drop => {
                tracing::warn!("Resolver: dropping unknown team {}", raw_id);
                Ok(None)
            }
        }
    }
}

/// Rider resolution: unknown ids are dropped.
#[derive(Debug, Clone, Default)]
pub struct LenientResolver {
    known: HashSet<EntityId>,
}

impl LenientResolver {
    pub fn new(known: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            known: known.into_iter().collect(),
        }
    }

    pub fn from_riders(riders: &[Rider]) -> Self {
        Self::new(riders.iter().map(|r| r.id.clone()))
    }
}

impl ParticipantResolver for LenientResolver {
    fn resolve(&self, raw_id: &str) -> Result<Option<EntityId>, ScrapeError> {
        if self.known.contains(raw_id) {
            Ok(Some(raw_id.to_string()))
        } else {
            tracing::debug!("Resolver: unknown rider {}", raw_id);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teams() -> StrictResolver {
        StrictResolver::new(["team-a".to_string(), "team-b".to_string()])
    }

    #[test]
    fn test_strict_known() {
        assert_eq!(teams().resolve("team-a").unwrap(), Some("team-a".to_string()));
    }

    #[test]
    fn test_strict_unknown_fails() {
        let err = teams().resolve("team-c").unwrap_err();
        assert!(matches!(err, ScrapeError::UnknownTeam(id) if id == "team-c"));
    }

    #[test]
    fn test_strict_unknown_dropped_with_policy() {
        let resolver = teams().with_policy(UnknownTeamPolicy::Drop);
        assert_eq!(resolver.resolve("team-c").unwrap(), None);
    }

    #[test]
    fn test_strict_aliases() {
        let resolver = StrictResolver::new(["lidl-trek-2023".to_string()])
            .with_aliases(SEASON_2023_ALIASES.iter().copied());
        assert_eq!(
            resolver.resolve("trek-segafredo-2023").unwrap(),
            Some("lidl-trek-2023".to_string())
        );
        assert_eq!(resolver.resolve("switzerland-2023").unwrap(), None);
        assert!(resolver.resolve("team-x-2023").is_err());
    }

    #[test]
    fn test_aliases_are_per_season() {
        assert_eq!(season_aliases(2023).len(), SEASON_2023_ALIASES.len());
        assert!(season_aliases(2025).is_empty());

        let resolver = StrictResolver::new(["lidl-trek-2025".to_string()])
            .with_aliases(season_aliases(2025).iter().copied());
        assert!(resolver.resolve("trek-segafredo-2023").is_err());
    }

    #[test]
    fn test_lenient_unknown_dropped() {
        let riders = LenientResolver::new(["tadej-pogacar".to_string()]);
        assert_eq!(
            riders.resolve("tadej-pogacar").unwrap(),
            Some("tadej-pogacar".to_string())
        );
        assert_eq!(riders.resolve("someone-else").unwrap(), None);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("fail".parse::<UnknownTeamPolicy>(), Ok(UnknownTeamPolicy::Fail));
        assert_eq!(" DROP ".parse::<UnknownTeamPolicy>(), Ok(UnknownTeamPolicy::Drop));
        assert!("ignore".parse::<UnknownTeamPolicy>().is_err());
    }
}
