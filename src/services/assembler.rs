//! Composition of raw records and decoded rankings into snapshot entities.
//!
//! Ids are derived from URL paths so they are stable across runs:
//! - team / rider: last path segment (`team/lidl-trek-2025` → `lidl-trek-2025`)
//! - race: last two segments (`race/tour-de-france/2025` → `tour-de-france-2025`)
//! - stage: last three segments (`…/2025/stage-4` → `tour-de-france-2025-stage-4`),
//!   or `<race id>-stage-1` for a single-day race.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use url::Url;

use crate::entities::{
    CountryCode, EntityId, GeneralResults, ParticipantResultTime, Place, PlaceResult,
    ProfileType, Race, Rider, RiderParticipation, Stage, StageResults, StageType, Team,
    TeamParticipation, TeamStatus,
};
use crate::errors::ScrapeError;
use crate::extract::{RawPlaceResult, RawRace, RawRider, RawStage, RawTeam, RawTeamParticipation};
use crate::helpers::{join_last_segments, last_path_segment, non_blank, parse_leading_number};
use crate::services::normalizer::{decode_points_ranking, decode_time_ranking};
use crate::services::resolver::{LenientResolver, ParticipantResolver, StrictResolver};

/// Time classifications shorter than this are incomplete (stage not yet
/// raced, results still being published) and are cleared.
const MIN_TIME_CLASSIFICATION_LEN: usize = 3;

const UCI_JERSEY_BASE: &str =
    "https://api.uci.ch/v1/ucibws/WebResources/ModulesData/Teams";

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

pub fn team_id(team_url: &str) -> EntityId {
    last_path_segment(team_url)
}

pub fn rider_id(rider_url: &str) -> EntityId {
    last_path_segment(rider_url)
}

pub fn race_id(race_url: &str) -> EntityId {
    join_last_segments(race_url, 2)
}

pub fn stage_id(stage_url: &str) -> EntityId {
    join_last_segments(stage_url, 3)
}

pub fn single_day_stage_id(race_id: &str) -> EntityId {
    format!("{}-stage-1", race_id)
}

// ---------------------------------------------------------------------------
// Field parsing
// ---------------------------------------------------------------------------

/// Parse a stage date such as `05 July 2025` or `Saturday, 05 July 2025`.
/// Anything after the year (a time, a timezone) is ignored.
pub fn parse_stage_date(text: &str) -> Result<NaiveDate, ScrapeError> {
    let cleaned = text.replace(',', " ");
    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .skip_while(|t| !t.starts_with(|c: char| c.is_ascii_digit()))
        .take(3)
        .collect();
    NaiveDate::parse_from_str(&tokens.join(" "), "%d %B %Y")
        .map_err(|_| ScrapeError::Validation(format!("unparseable stage date '{}'", text)))
}

/// Combine a stage date with an optional `HH:MM` start time given in the
/// event's timezone. Without a usable start time the stage starts at
/// midnight UTC of its date.
pub fn parse_start_date_time(
    date_text: &str,
    start_time: Option<&str>,
    event_offset: FixedOffset,
) -> Result<DateTime<Utc>, ScrapeError> {
    let date = parse_stage_date(date_text)?;

    let time = non_blank(start_time).and_then(|text| {
        let clock = text.split_whitespace().next().unwrap_or_default();
        match NaiveTime::parse_from_str(clock, "%H:%M") {
            Ok(time) => Some(time),
            Err(_) => {
                tracing::warn!("Assembler: ignoring unparseable start time '{}'", text);
                None
            }
        }
    });

    match time {
        Some(time) => event_offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| {
                ScrapeError::Validation(format!("ambiguous start time {} {}", date, time))
            }),
        None => Ok(date.and_time(NaiveTime::MIN).and_utc()),
    }
}

/// Leading number of a `"184.9 km"` string. Missing or unparseable
/// distances default to `0.0`.
pub fn parse_distance(text: Option<&str>, stage_url: &str) -> f64 {
    match text.and_then(parse_leading_number) {
        Some(km) => km,
        None => {
            tracing::warn!(
                "Assembler: no distance for {} ({:?}), using 0",
                stage_url,
                text
            );
            0.0
        }
    }
}

/// Map a parcours class (`p1`..`p5`, possibly among other class names).
pub fn profile_type(parcours: Option<&str>) -> Option<ProfileType> {
    parcours?.split_whitespace().find_map(|class| match class {
        "p1" => Some(ProfileType::Flat),
        "p2" => Some(ProfileType::HillsFlatFinish),
        "p3" => Some(ProfileType::HillsUphillFinish),
        "p4" => Some(ProfileType::MountainsFlatFinish),
        "p5" => Some(ProfileType::MountainsUphillFinish),
        _ => None,
    })
}

pub fn stage_type(title: &str) -> StageType {
    if title.contains("TTT") {
        StageType::TeamTimeTrial
    } else if title.contains("ITT") {
        StageType::IndividualTimeTrial
    } else {
        StageType::Regular
    }
}

/// Extract the checkpoint name and distance from a checkpoint heading.
///
/// - `Intermediate Sprint | Lannion (126.8 km)` → `Lannion`, 126.8
/// - `Col de Peyresourde (23.1 km)` → `Col de Peyresourde`, 23.1
/// - `KOM Sprint (1) Col du Tourmalet (2115 m) (45.3 km)` → `Col du Tourmalet (2115 m)`, 45.3
/// - `Finish` → `Finish`, stage distance
///
/// Headings without a trailing `(… km)` group take the stage distance.
pub fn parse_place_title(title: &str, stage_distance_km: f64) -> Place {
    let title = title.trim();

    let name = if let Some(bar) = title.find('|') {
        let rest = &title[bar + 1..];
        rest.rfind('(').map_or(rest, |open| &rest[..open])
    } else {
        match (title.find('('), title.rfind('(')) {
            (Some(first), Some(last)) if first == last => &title[..first],
            (Some(_), Some(last)) => {
                let after_label = title.find(')').map_or(0, |close| close + 1);
                if after_label < last {
                    &title[after_label..last]
                } else {
                    &title[..last]
                }
            }
            _ => "Finish",
        }
    };

    Place {
        name: name.trim().to_string(),
        distance_km: title_distance(title).unwrap_or(stage_distance_km),
    }
}

fn title_distance(title: &str) -> Option<f64> {
    let inner = title.strip_suffix(')')?;
    let group = inner[inner.rfind('(')? + 1..].trim();
    group.strip_suffix("km")?.trim().parse().ok()
}

/// Split the site's `LASTNAME Firstname` format, returning `(first, last)`
/// with the last name title-cased.
///
/// The first name starts one character after the space preceding the first
/// lowercase letter, but the last name always keeps at least its first word,
/// so `McNULTY Brandon` splits after `McNULTY`. Names without any lowercase
/// letter split at the last space.
pub fn split_full_name(full_name: &str) -> (String, String) {
    let name = full_name.trim();
    let chars: Vec<(usize, char)> = name.char_indices().collect();
    let first_space = chars.iter().position(|(_, c)| c.is_whitespace());

    let split = match chars.iter().position(|(_, c)| c.is_lowercase()) {
        Some(lowercase) => first_space.map(|space| space.max(lowercase.saturating_sub(2))),
        None => chars.iter().rposition(|(_, c)| c.is_whitespace()),
    };
    let Some(split) = split else {
        return if name.chars().any(char::is_lowercase) {
            (name.to_string(), String::new())
        } else {
            (String::new(), title_case(name))
        };
    };

    let (last, first) = name.split_at(chars[split].0);
    let last_name = last
        .split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ");
    (first.trim().to_string(), last_name)
}

fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Teams and riders
// ---------------------------------------------------------------------------

/// UCI-hosted jersey image for a team.
pub fn uci_jersey_url(status: TeamStatus, abbreviation: &str, year: i32) -> String {
    let category = match status {
        TeamStatus::WorldTeam => "WTT",
        TeamStatus::ProTeam => "PRT",
    };
    format!(
        "{}/{}/ROA/Jerseys/{}/ROA-{}_{}_{}.jpg",
        UCI_JERSEY_BASE, year, category, category, abbreviation, year
    )
}

/// Build a team. Teams outside the WorldTeam and ProTeam tiers are skipped
/// (`Ok(None)`).
pub fn build_team(raw: &RawTeam) -> Result<Option<Team>, ScrapeError> {
    let status = match raw.status.trim() {
        "WT" => TeamStatus::WorldTeam,
        "PRT" => TeamStatus::ProTeam,
        other => {
            tracing::debug!("Assembler: skipping team {} with status '{}'", raw.url, other);
            return Ok(None);
        }
    };

    let abbreviation = raw.abbreviation.trim().to_uppercase();
    let jersey_image_url = non_blank(raw.jersey_url.as_deref())
        .unwrap_or_else(|| uci_jersey_url(status, &abbreviation, raw.year));

    Ok(Some(Team {
        id: team_id(&raw.url),
        name: raw.name.trim().to_string(),
        status,
        country: CountryCode::parse(&raw.country)?,
        bike: non_blank(raw.bike.as_deref()).unwrap_or_default(),
        jersey_image_url,
        website: non_blank(raw.website.as_deref()),
        year: raw.year,
        rider_ids: raw
            .roster
            .iter()
            .map(|entry| rider_id(&entry.rider_url))
            .collect(),
        abbreviation,
    }))
}

/// Build a rider. `roster_name` is the name shown on the team page, used
/// when the rider page has none.
pub fn build_rider(
    raw: &RawRider,
    roster_name: Option<&str>,
    base_url: &Url,
) -> Result<Rider, ScrapeError> {
    let full_name = non_blank(raw.full_name.as_deref())
        .or_else(|| non_blank(roster_name))
        .ok_or_else(|| ScrapeError::extraction(&raw.url, "rider has no name"))?;
    let (first_name, last_name) = split_full_name(&full_name);

    let birth_date = non_blank(raw.birth_date.as_deref()).and_then(|text| {
        let date: Vec<&str> = text.split_whitespace().take(3).collect();
        NaiveDate::parse_from_str(&date.join(" "), "%d %B %Y").ok()
    });

    Ok(Rider {
        id: rider_id(&raw.url),
        first_name,
        last_name,
        country: CountryCode::parse(&raw.country)?,
        website: non_blank(raw.website.as_deref()),
        birth_date,
        birth_place: non_blank(raw.birth_place.as_deref()),
        weight_kg: raw
            .weight
            .as_deref()
            .and_then(parse_leading_number)
            .map(|kg| kg as u32),
        height_cm: raw
            .height
            .as_deref()
            .and_then(parse_leading_number)
            .map(|m| (m * 100.0).round() as u32),
        photo_url: base_url.join(raw.photo.trim())?.to_string(),
        uci_ranking_position: raw
            .uci_ranking_position
            .as_deref()
            .and_then(|p| p.trim().parse().ok()),
    })
}

// ---------------------------------------------------------------------------
// Races
// ---------------------------------------------------------------------------

/// Builds races against the season's resolved teams and riders.
pub struct RaceAssembler<'a> {
    teams: &'a StrictResolver,
    riders: &'a LenientResolver,
    event_offset: FixedOffset,
}

impl<'a> RaceAssembler<'a> {
    pub fn new(
        teams: &'a StrictResolver,
        riders: &'a LenientResolver,
        event_offset: FixedOffset,
    ) -> Self {
        Self {
            teams,
            riders,
            event_offset,
        }
    }

    /// Assemble a race from its page, its stage pages (in any order) and
    /// its start list.
    pub fn build_race(
        &self,
        raw: &RawRace,
        raw_stages: &[RawStage],
        start_list: &[RawTeamParticipation],
    ) -> Result<Race, ScrapeError> {
        let id = race_id(&raw.url);
        let single_day = raw.is_single_day();

        let mut stages = raw_stages
            .iter()
            .map(|stage| {
                let stage_id = if single_day {
                    single_day_stage_id(&id)
                } else {
                    stage_id(&stage.url)
                };
                self.build_stage(stage, stage_id, single_day)
            })
            .collect::<Result<Vec<_>, _>>()?;
        stages.sort_by_key(|s| s.start_date_time);

        let result = stages
            .last()
            .map(|s| s.general_results.time.clone())
            .unwrap_or_default();

        Ok(Race {
            country: CountryCode::parse(&raw.country)?,
            name: raw.name.trim().to_string(),
            website: non_blank(raw.website.as_deref()),
            start_list: self.build_start_list(start_list)?,
            stages,
            result,
            id,
        })
    }

    pub fn build_stage(
        &self,
        raw: &RawStage,
        id: EntityId,
        single_day: bool,
    ) -> Result<Stage, ScrapeError> {
        let start_date_time =
            parse_start_date_time(&raw.date, raw.start_time.as_deref(), self.event_offset)?;
        let distance_km = parse_distance(raw.distance.as_deref(), &raw.url);
        let stage_type = stage_type(&raw.title);
        let rankings = &raw.rankings;

        let stage_time_resolver: &dyn ParticipantResolver = match stage_type {
            StageType::TeamTimeTrial => self.teams,
            _ => self.riders,
        };
        let stage_time = complete_or_cleared(
            decode_time_ranking(&rankings.stage_time, stage_time_resolver)?,
            &id,
            "stage",
        );

        let stage_results = StageResults {
            youth: decode_time_ranking(&rankings.stage_youth, self.riders)?,
            teams: decode_time_ranking(&rankings.stage_teams, self.teams)?,
            kom: self.place_results(&rankings.stage_kom, distance_km)?,
            points: self.place_results(&rankings.stage_points, distance_km)?,
            time: stage_time,
        };

        // One-day races only publish the finish ranking, which is also the
        // final classification.
        let general_time = if single_day && rankings.general_time.is_empty() {
            stage_results.time.clone()
        } else {
            complete_or_cleared(
                decode_time_ranking(&rankings.general_time, self.riders)?,
                &id,
                "general",
            )
        };

        let general_results = GeneralResults {
            time: general_time,
            youth: decode_time_ranking(&rankings.general_youth, self.riders)?,
            teams: decode_time_ranking(&rankings.general_teams, self.teams)?,
            kom: decode_points_ranking(&rankings.general_kom, self.riders)?,
            points: decode_points_ranking(&rankings.general_points, self.riders)?,
        };

        Ok(Stage {
            id,
            start_date_time,
            distance_km,
            profile_type: profile_type(raw.parcours.as_deref()),
            departure: non_blank(raw.departure.as_deref()),
            arrival: non_blank(raw.arrival.as_deref()),
            stage_type,
            stage_results,
            general_results,
        })
    }

    /// Teams resolve strictly (ignored teams are skipped), riders leniently.
    pub fn build_start_list(
        &self,
        raw: &[RawTeamParticipation],
    ) -> Result<Vec<TeamParticipation>, ScrapeError> {
        let mut start_list = Vec::with_capacity(raw.len());
        for participation in raw {
            let Some(team_id) = self.teams.resolve(&last_path_segment(&participation.team_ref))?
            else {
                continue;
            };

            let mut riders = Vec::with_capacity(participation.riders.len());
            for rider in &participation.riders {
                if let Some(rider_id) = self.riders.resolve(&last_path_segment(&rider.rider_ref))? {
                    riders.push(RiderParticipation {
                        rider_id,
                        number: non_blank(rider.number.as_deref()).and_then(|n| n.parse().ok()),
                    });
                }
            }

            start_list.push(TeamParticipation { team_id, riders });
        }
        Ok(start_list)
    }

    fn place_results(
        &self,
        raw: &[RawPlaceResult],
        stage_distance_km: f64,
    ) -> Result<Vec<PlaceResult>, ScrapeError> {
        raw.iter()
            .map(|checkpoint| {
                Ok(PlaceResult {
                    place: parse_place_title(&checkpoint.title, stage_distance_km),
                    points: decode_points_ranking(&checkpoint.rows, self.riders)?,
                })
            })
            .collect()
    }
}

fn complete_or_cleared(
    ranking: Vec<ParticipantResultTime>,
    stage_id: &str,
    label: &str,
) -> Vec<ParticipantResultTime> {
    if !ranking.is_empty() && ranking.len() < MIN_TIME_CLASSIFICATION_LEN {
        tracing::debug!(
            "Assembler: clearing incomplete {} classification of {} ({} entries)",
            label,
            stage_id,
            ranking.len()
        );
        return Vec::new();
    }
    ranking
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

pub fn sort_teams(teams: &mut [Team]) {
    teams.sort_by(|a, b| a.name.cmp(&b.name));
}

pub fn sort_riders(riders: &mut [Rider]) {
    riders.sort_by_cached_key(|r| (r.last_name.to_lowercase(), r.first_name.to_lowercase()));
}

/// Races by first stage start; races without stages go last.
pub fn sort_races(races: &mut [Race]) {
    races.sort_by(|a, b| match (a.start_date_time(), b.start_date_time()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
