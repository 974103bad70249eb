//! Decoding of raw ranking tables into typed results.
//!
//! A time ranking lists the winner's absolute time followed by gaps to the
//! winner, with `,,` meaning "same time as the row above". Points rankings
//! list plain integers. Both are cut to the top `MAX_RANKING_ROWS` entries.
//!
//! Rows are checked in a fixed order: position, then result, then
//! participant resolution. Malformed rows are dropped and logged at debug;
//! only a strict resolver miss escapes as an error.

use crate::entities::{EntityId, ParticipantResultPoints, ParticipantResultTime};
use crate::errors::{RowRejection, ScrapeError};
use crate::extract::RawResultRow;
use crate::helpers::last_path_segment;
use crate::services::resolver::ParticipantResolver;

/// Rankings are cut to this many entries.
pub const MAX_RANKING_ROWS: usize = 10;

/// Time cell of a rider who finished in the same group as the rider above.
const SAME_TIME_MARKER: &str = ",,";

/// Parse `h:mm:ss` or `m:ss` into seconds. The site uses `:` and `.`
/// interchangeably as separators; a leading `+` on gaps is ignored.
pub fn parse_clock(text: &str) -> Option<u64> {
    let text = text.trim().trim_start_matches('+');
    let parts = text
        .split([':', '.'])
        .map(|p| p.trim().parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;

    let (hours, minutes, seconds) = match parts.as_slice() {
        [minutes, seconds] => (0, *minutes, *seconds),
        [hours, minutes, seconds] => (*hours, *minutes, *seconds),
        _ => return None,
    };
    hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}

/// Decode a time ranking, resolving participants through `resolver`.
pub fn decode_time_ranking(
    rows: &[RawResultRow],
    resolver: &dyn ParticipantResolver,
) -> Result<Vec<ParticipantResultTime>, ScrapeError> {
    // Tracked over every decoded row, resolved or not, so an unknown leader
    // never turns the next rider's gap into an absolute time.
    let mut reference: Option<u64> = None;
    let mut previous: Option<u64> = None;

    let decode = |row: &RawResultRow| -> Result<u64, RowRejection> {
        let text = result_text(row)?;
        let time = if text == SAME_TIME_MARKER {
            previous.ok_or(RowRejection::NoPreviousTime)?
        } else {
            let bad_time = || RowRejection::BadTime(text.to_string());
            let value = parse_clock(text).ok_or_else(bad_time)?;
            match reference {
                Some(first) => first.checked_add(value).ok_or_else(bad_time)?,
                None => value,
            }
        };
        if let Some(prev) = previous {
            if time < prev {
                return Err(RowRejection::TimeRegression {
                    time,
                    previous: prev,
                });
            }
        }
        if reference.is_none() {
            reference = Some(time);
        }
        previous = Some(time);
        Ok(time)
    };

    collect_ranking(rows, resolver, decode, |position, participant_id, time_seconds| {
        ParticipantResultTime {
            position,
            participant_id,
            time_seconds,
        }
    })
}

/// Decode a points ranking, resolving participants through `resolver`.
pub fn decode_points_ranking(
    rows: &[RawResultRow],
    resolver: &dyn ParticipantResolver,
) -> Result<Vec<ParticipantResultPoints>, ScrapeError> {
    let decode = |row: &RawResultRow| -> Result<u32, RowRejection> {
        let text = result_text(row)?;
        text.parse::<u32>()
            .map_err(|_| RowRejection::BadPoints(text.to_string()))
    };

    collect_ranking(rows, resolver, decode, |position, participant_id, points| {
        ParticipantResultPoints {
            position,
            participant_id,
            points,
        }
    })
}

/// Shared row loop: position → result → resolution, stopping at the
/// `MAX_RANKING_ROWS`-th survivor.
fn collect_ranking<V, T>(
    rows: &[RawResultRow],
    resolver: &dyn ParticipantResolver,
    mut decode: impl FnMut(&RawResultRow) -> Result<V, RowRejection>,
    build: impl Fn(u32, EntityId, V) -> T,
) -> Result<Vec<T>, ScrapeError> {
    let mut kept = Vec::with_capacity(MAX_RANKING_ROWS.min(rows.len()));
    let mut dropped = 0usize;

    for row in rows {
        if kept.len() == MAX_RANKING_ROWS {
            break;
        }

        let decoded = parse_position(&row.position).and_then(|p| decode(row).map(|v| (p, v)));
        let (position, value) = match decoded {
            Ok(decoded) => decoded,
            Err(rejection) => {
                log_rejection(row, &rejection);
                dropped += 1;
                continue;
            }
        };

        let raw_id = last_path_segment(&row.participant_ref);
        match resolver.resolve(&raw_id)? {
            Some(participant_id) => kept.push(build(position, participant_id, value)),
            None => {
                log_rejection(row, &RowRejection::UnresolvedParticipant(raw_id));
                dropped += 1;
            }
        }
    }

    if dropped > 0 {
        tracing::debug!(
            "Normalizer: kept {} rows, dropped {}",
            kept.len(),
            dropped
        );
    }
    Ok(kept)
}

fn parse_position(text: &str) -> Result<u32, RowRejection> {
    match text.trim().parse::<u32>() {
        Ok(position) if position > 0 => Ok(position),
        _ => Err(RowRejection::BadPosition(text.to_string())),
    }
}

fn result_text(row: &RawResultRow) -> Result<&str, RowRejection> {
    row.result
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(RowRejection::MissingResult)
}

fn log_rejection(row: &RawResultRow, rejection: &RowRejection) {
    tracing::debug!(
        "Normalizer: dropped row {} ({}): {}",
        row.position,
        row.participant_ref,
        rejection
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::resolver::{LenientResolver, StrictResolver};

    fn riders(ids: &[&str]) -> LenientResolver {
        LenientResolver::new(ids.iter().map(|id| id.to_string()))
    }

    fn row(position: &str, rider: &str, result: &str) -> RawResultRow {
        RawResultRow::new(position, &format!("rider/{}", rider), Some(result), rider)
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("1:02:03"), Some(3723));
        assert_eq!(parse_clock("0:05"), Some(5));
        assert_eq!(parse_clock("4.32"), Some(272));
        assert_eq!(parse_clock("+0:12"), Some(12));
        assert_eq!(parse_clock("5"), None);
        assert_eq!(parse_clock("1:2:3:4"), None);
        assert_eq!(parse_clock("DNF"), None);
        assert_eq!(parse_clock("999999999999999999:00"), None);
        assert_eq!(parse_clock("18446744073709551615:00:00"), None);
    }

    #[test]
    fn test_time_ranking_drops_overflowing_gap() {
        let rows = vec![
            row("1", "a", "1:00:00"),
            row("2", "b", "18446744073709551615:00"),
            row("3", "c", "0:05"),
        ];
        let decoded = decode_time_ranking(&rows, &riders(&["a", "b", "c"])).unwrap();
        let ids: Vec<&str> = decoded.iter().map(|r| r.participant_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(decoded[1].time_seconds, 3605);
    }

    #[test]
    fn test_time_ranking_gaps_and_same_time() {
        let rows = vec![row("1", "a", "1:02:03"), row("2", "b", ",,"), row("3", "c", "0:05")];
        let decoded = decode_time_ranking(&rows, &riders(&["a", "b", "c"])).unwrap();
        let times: Vec<u64> = decoded.iter().map(|r| r.time_seconds).collect();
        assert_eq!(times, vec![3723, 3723, 3728]);
        assert_eq!(decoded[1].participant_id, "b");
        assert_eq!(decoded[2].position, 3);
    }

    #[test]
    fn test_time_ranking_unknown_leader_keeps_reference() {
        let rows = vec![row("1", "ghost", "4:00:00"), row("2", "b", "0:10")];
        let decoded = decode_time_ranking(&rows, &riders(&["b"])).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].time_seconds, 14410);
    }

    #[test]
    fn test_time_ranking_drops_non_finishers() {
        let rows = vec![
            row("1", "a", "2:00:00"),
            row("DNF", "b", "0:00"),
            row("2", "c", "bad"),
            row("3", "d", "0:30"),
        ];
        let decoded = decode_time_ranking(&rows, &riders(&["a", "b", "c", "d"])).unwrap();
        let ids: Vec<&str> = decoded.iter().map(|r| r.participant_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
        assert_eq!(decoded[1].time_seconds, 7230);
    }

    #[test]
    fn test_time_ranking_leading_same_time_dropped() {
        let rows = vec![row("1", "a", ",,"), row("2", "b", "3:00:00")];
        let decoded = decode_time_ranking(&rows, &riders(&["a", "b"])).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].participant_id, "b");
        assert_eq!(decoded[0].time_seconds, 10800);
    }

    #[test]
    fn test_time_ranking_is_non_decreasing() {
        let rows = vec![
            row("1", "a", "1:00:00"),
            row("2", "b", "0:20"),
            row("3", "c", "0:10"),
            row("4", "d", "0:20"),
        ];
        let decoded = decode_time_ranking(&rows, &riders(&["a", "b", "c", "d"])).unwrap();
        let times: Vec<u64> = decoded.iter().map(|r| r.time_seconds).collect();
        assert_eq!(times, vec![3600, 3620, 3620]);
        assert!(decoded.windows(2).all(|w| w[0].time_seconds <= w[1].time_seconds));
    }

    #[test]
    fn test_points_ranking_drops_empty_results() {
        let rows = vec![
            row("1", "a", "50"),
            RawResultRow::new("2", "rider/b", None, "b"),
            row("3", "c", ""),
            row("4", "d", "20"),
            row("5", "e", "x"),
        ];
        let decoded =
            decode_points_ranking(&rows, &riders(&["a", "b", "c", "d", "e"])).unwrap();
        let points: Vec<(&str, u32)> = decoded
            .iter()
            .map(|r| (r.participant_id.as_str(), r.points))
            .collect();
        assert_eq!(points, vec![("a", 50), ("d", 20)]);
    }

    #[test]
    fn test_truncates_to_first_ten() {
        let ids: Vec<String> = (1..=15).map(|i| format!("rider-{}", i)).collect();
        let rows: Vec<RawResultRow> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| row(&(i + 1).to_string(), id, &(100 - i).to_string()))
            .collect();
        let resolver = LenientResolver::new(ids.clone());
        let decoded = decode_points_ranking(&rows, &resolver).unwrap();
        assert_eq!(decoded.len(), MAX_RANKING_ROWS);
        let kept: Vec<&str> = decoded.iter().map(|r| r.participant_id.as_str()).collect();
        let expected: Vec<&str> = ids[..10].iter().map(String::as_str).collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn test_truncation_stops_before_later_rows() {
        // The strict miss sits after the tenth survivor and is never examined.
        let mut rows: Vec<RawResultRow> = (1..=10)
            .map(|i| RawResultRow::new(&i.to_string(), "team/team-a", Some("10"), "A"))
            .collect();
        rows.push(RawResultRow::new("11", "team/team-c", Some("5"), "C"));
        let resolver = StrictResolver::new(["team-a".to_string()]);
        assert_eq!(decode_points_ranking(&rows, &resolver).unwrap().len(), 10);
    }

    #[test]
    fn test_lenient_drops_unknown_rider() {
        let rows = vec![row("1", "a", "30"), row("2", "unknown", "20"), row("3", "c", "10")];
        let decoded = decode_points_ranking(&rows, &riders(&["a", "c"])).unwrap();
        let ids: Vec<&str> = decoded.iter().map(|r| r.participant_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_strict_unknown_team_is_fatal() {
        let rows = vec![
            RawResultRow::new("1", "team/team-a", Some("4:10:00"), "A"),
            RawResultRow::new("2", "team/team-c", Some("0:10"), "C"),
        ];
        let resolver = StrictResolver::new(["team-a".to_string(), "team-b".to_string()]);
        let err = decode_time_ranking(&rows, &resolver).unwrap_err();
        assert!(matches!(err, ScrapeError::UnknownTeam(id) if id == "team-c"));
    }

    #[test]
    fn test_empty_ranking() {
        assert!(decode_time_ranking(&[], &riders(&[])).unwrap().is_empty());
    }
}
