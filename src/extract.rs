//! Raw records and the extraction seam.
//!
//! Which page regions hold which fields is specific to one website's markup,
//! so it lives behind `RecordExtractor`. Implementations turn a parsed page
//! into the raw records below; everything after that (decoding, resolution,
//! validation, id derivation) is done by the normalizer and assembler.
//!
//! Optional fields are `Option`, never placeholder strings.

use std::sync::Arc;

use scraper::Html;

use crate::errors::ScrapeError;
use crate::services::fetcher::EmptyPagePredicate;

/// One row of a ranking table, exactly as scraped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResultRow {
    /// Rank text. Non-finishers carry markers such as `DNF`.
    pub position: String,
    /// Link to the participant page (`rider/…` or `team/…`).
    pub participant_ref: String,
    /// Time, gap, same-time marker (`,,`) or points. `None` when the cell is missing.
    pub result: Option<String>,
    pub display_name: String,
}

impl RawResultRow {
    pub fn new(position: &str, participant_ref: &str, result: Option<&str>, name: &str) -> Self {
        Self {
            position: position.to_string(),
            participant_ref: participant_ref.to_string(),
            result: result.map(|r| r.to_string()),
            display_name: name.to_string(),
        }
    }
}

/// Points awarded at one checkpoint (climb or intermediate sprint).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPlaceResult {
    /// Checkpoint heading, e.g. `KOM Sprint (2) Col du Tourmalet (2115 m) (45.3 km)`.
    pub title: String,
    pub rows: Vec<RawResultRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRosterEntry {
    pub rider_url: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTeam {
    pub url: String,
    pub name: String,
    /// Status code as shown on the site (`WT`, `PRT`, …).
    pub status: String,
    pub abbreviation: String,
    pub country: String,
    pub bike: Option<String>,
    pub jersey_url: Option<String>,
    pub website: Option<String>,
    pub year: i32,
    pub roster: Vec<RawRosterEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRider {
    pub url: String,
    /// `LASTNAME Firstname`. Falls back to the roster name when absent.
    pub full_name: Option<String>,
    pub country: String,
    pub website: Option<String>,
    /// e.g. `21 September 1998`.
    pub birth_date: Option<String>,
    pub birth_place: Option<String>,
    /// Kilograms, e.g. `66`.
    pub weight: Option<String>,
    /// Metres, e.g. `1.76`.
    pub height: Option<String>,
    pub photo: String,
    pub uci_ranking_position: Option<String>,
}

/// A stage as linked from a race page's stage table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStageLink {
    pub url: String,
    /// Parcours class (`p1`..`p5`) when the table shows it.
    pub parcours: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRace {
    pub url: String,
    pub name: String,
    pub country: String,
    pub website: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub start_list_url: Option<String>,
    /// Empty for single-day races.
    pub stages: Vec<RawStageLink>,
}

impl RawRace {
    /// A race whose end date is missing or equal to its start date has a
    /// single stage, published on its result page.
    pub fn is_single_day(&self) -> bool {
        self.end_date.is_none() || self.start_date == self.end_date
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRiderParticipation {
    pub rider_ref: String,
    pub number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTeamParticipation {
    pub team_ref: String,
    pub riders: Vec<RawRiderParticipation>,
}

/// All ranking tables found on a stage page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStageRankings {
    pub stage_time: Vec<RawResultRow>,
    pub stage_youth: Vec<RawResultRow>,
    pub stage_teams: Vec<RawResultRow>,
    pub stage_kom: Vec<RawPlaceResult>,
    pub stage_points: Vec<RawPlaceResult>,
    pub general_time: Vec<RawResultRow>,
    pub general_youth: Vec<RawResultRow>,
    pub general_teams: Vec<RawResultRow>,
    pub general_kom: Vec<RawResultRow>,
    pub general_points: Vec<RawResultRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStage {
    pub url: String,
    /// e.g. `05 July 2025` or `Saturday, 05 July 2025`.
    pub date: String,
    /// `HH:MM` in the event timezone.
    pub start_time: Option<String>,
    /// e.g. `184.9 km`.
    pub distance: Option<String>,
    pub parcours: Option<String>,
    /// Page title; time trials are marked `ITT` / `TTT`.
    pub title: String,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub rankings: RawStageRankings,
}

/// Markup-specific extraction collaborator.
///
/// Methods are synchronous: they only read an already-parsed page. URLs passed
/// in are the ones the orchestrator fetched, as site-relative paths.
pub trait RecordExtractor: Send + Sync {
    /// Page listing the season's teams.
    fn teams_index_path(&self, season: i32) -> String;

    /// Page listing the season's races.
    fn races_index_path(&self, season: i32) -> String;

    /// Predicate the fetcher uses to reject near-empty pages served with HTTP 200.
    fn empty_page_predicate(&self) -> Arc<dyn EmptyPagePredicate>;

    /// Result page holding the single stage of a one-day race.
    fn single_day_result_path(&self, race_url: &str) -> String {
        format!("{}/result", race_url.trim_end_matches('/'))
    }

    fn team_urls(&self, index: &Html) -> Vec<String>;

    fn team(&self, url: &str, page: &Html) -> Result<RawTeam, ScrapeError>;

    fn rider(&self, url: &str, page: &Html) -> Result<RawRider, ScrapeError>;

    fn race_urls(&self, index: &Html, season: i32) -> Vec<String>;

    fn race(&self, url: &str, page: &Html) -> Result<RawRace, ScrapeError>;

    fn start_list(&self, url: &str, page: &Html) -> Result<Vec<RawTeamParticipation>, ScrapeError>;

    /// `single_day` pages only carry the stage time ranking.
    fn stage(&self, url: &str, page: &Html, single_day: bool) -> Result<RawStage, ScrapeError>;
}
