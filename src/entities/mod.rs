//! Snapshot entities handed to export collaborators.
//!
//! Every record is built once by the assembler and never mutated afterwards.
//! Country fields are `CountryCode`, so an entity cannot exist with an
//! invalid code.

pub mod country;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

pub use country::CountryCode;

/// Canonical id of a team, rider, race or stage (e.g. `lidl-trek-2025`).
pub type EntityId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TeamStatus {
    WorldTeam,
    ProTeam,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: EntityId,
    pub name: String,
    pub status: TeamStatus,
    pub abbreviation: String,
    pub country: CountryCode,
    pub bike: String,
    pub jersey_image_url: String,
    pub website: Option<String>,
    pub year: i32,
    /// Roster order as listed on the team page.
    pub rider_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rider {
    pub id: EntityId,
    pub first_name: String,
    pub last_name: String,
    pub country: CountryCode,
    pub website: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub birth_place: Option<String>,
    pub weight_kg: Option<u32>,
    pub height_cm: Option<u32>,
    pub photo_url: String,
    pub uci_ranking_position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Race {
    pub id: EntityId,
    pub name: String,
    pub country: CountryCode,
    pub website: Option<String>,
    /// Ordered by start date.
    pub stages: Vec<Stage>,
    pub start_list: Vec<TeamParticipation>,
    /// Final general classification (last stage's general time ranking).
    pub result: Vec<ParticipantResultTime>,
}

impl Race {
    /// Start of the first stage, used to order races within a season.
    pub fn start_date_time(&self) -> Option<DateTime<Utc>> {
        self.stages.first().map(|s| s.start_date_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileType {
    Flat,
    HillsFlatFinish,
    HillsUphillFinish,
    MountainsFlatFinish,
    MountainsUphillFinish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageType {
    Regular,
    IndividualTimeTrial,
    TeamTimeTrial,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: EntityId,
    pub start_date_time: DateTime<Utc>,
    pub distance_km: f64,
    pub profile_type: Option<ProfileType>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub stage_type: StageType,
    pub stage_results: StageResults,
    pub general_results: GeneralResults,
}

/// Classifications of a single stage. KOM and points are reported per
/// checkpoint (climb or sprint).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageResults {
    pub time: Vec<ParticipantResultTime>,
    pub youth: Vec<ParticipantResultTime>,
    pub teams: Vec<ParticipantResultTime>,
    pub kom: Vec<PlaceResult>,
    pub points: Vec<PlaceResult>,
}

/// Standings after a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeneralResults {
    pub time: Vec<ParticipantResultTime>,
    pub youth: Vec<ParticipantResultTime>,
    pub teams: Vec<ParticipantResultTime>,
    pub kom: Vec<ParticipantResultPoints>,
    pub points: Vec<ParticipantResultPoints>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResultTime {
    pub position: u32,
    pub participant_id: EntityId,
    /// Cumulative time in seconds.
    pub time_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResultPoints {
    pub position: u32,
    pub participant_id: EntityId,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceResult {
    pub place: Place,
    pub points: Vec<ParticipantResultPoints>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub name: String,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamParticipation {
    pub team_id: EntityId,
    pub riders: Vec<RiderParticipation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderParticipation {
    pub rider_id: EntityId,
    pub number: Option<u32>,
}

/// The complete season dataset produced by one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub teams: Vec<Team>,
    pub riders: Vec<Rider>,
    pub races: Vec<Race>,
}
