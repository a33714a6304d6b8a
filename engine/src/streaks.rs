//! Streak derivation and session application.
//!
//! Streak counters are caches over the per-day stat map, never an
//! independent source of truth. Everything here derives them from the
//! map, or folds a completed session into a snapshot and refreshes them.

use crate::{
    error::Result, merge::SESSION_DEDUP_TOLERANCE_MS, snapshot::DayStat, DateKey, Error,
    SessionMode, SessionRecord, Streaks, Timestamp, UserSnapshot,
};
use chrono::{Days, NaiveDate};
use std::collections::BTreeMap;

/// Parse a `YYYY-MM-DD` date key.
pub fn parse_date_key(key: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").map_err(|_| Error::InvalidDateKey(key.to_string()))
}

/// Format a date as a `YYYY-MM-DD` key.
pub fn format_date_key(date: NaiveDate) -> DateKey {
    date.format("%Y-%m-%d").to_string()
}

/// Whether a day bucket counts toward a streak.
///
/// Focus activity only: classic/reverse sessions or focus minutes. A day
/// holding nothing but breaks does not extend a streak.
pub fn day_is_active(stat: &DayStat) -> bool {
    stat.classic > 0 || stat.reverse > 0 || stat.total_minutes > 0
}

/// Active dates in the map, ascending. Unparseable keys are skipped.
fn active_dates(stats: &BTreeMap<DateKey, DayStat>) -> Vec<NaiveDate> {
    stats
        .iter()
        .filter(|(_, stat)| day_is_active(stat))
        .filter_map(|(key, _)| parse_date_key(key).ok())
        .collect()
}

/// The longest run of consecutive active days anywhere in the map.
pub fn longest_streak(stats: &BTreeMap<DateKey, DayStat>) -> u32 {
    let dates = active_dates(stats);
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;

    for date in dates {
        run = match prev {
            Some(p) if p.checked_add_days(Days::new(1)) == Some(date) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(date);
    }

    longest
}

/// The run of consecutive active days ending at `anchor` (or the day
/// before it, so a streak survives until the current day is over).
pub fn current_streak(stats: &BTreeMap<DateKey, DayStat>, anchor: NaiveDate) -> u32 {
    let dates = active_dates(stats);

    let mut cursor = if dates.iter().any(|d| *d == anchor) {
        anchor
    } else if let Some(yesterday) = anchor.checked_sub_days(Days::new(1)) {
        if dates.iter().any(|d| *d == yesterday) {
            yesterday
        } else {
            return 0;
        }
    } else {
        return 0;
    };

    let mut streak = 0u32;
    while dates.iter().any(|d| *d == cursor) {
        streak += 1;
        match cursor.checked_sub_days(Days::new(1)) {
            Some(prev) => cursor = prev,
            None => break,
        }
    }

    streak
}

/// Refresh the cached streak counters from the day map, anchored at `today`.
pub fn recompute(streaks: &mut Streaks, today: NaiveDate) {
    streaks.current_streak = current_streak(&streaks.productivity_stats_by_day, today);
    streaks.longest_streak = longest_streak(&streaks.productivity_stats_by_day);
}

/// Refresh the cached streak counters without an external clock.
///
/// Used by the pure merge path: the current streak is anchored at the
/// latest active date in the map, which is stable regardless of which
/// device runs the merge. Callers with a real clock (the client, on
/// write) re-anchor at the actual local date afterwards.
pub fn recompute_from_latest(streaks: &mut Streaks) {
    let anchor = active_dates(&streaks.productivity_stats_by_day)
        .last()
        .copied();
    match anchor {
        Some(date) => recompute(streaks, date),
        None => {
            streaks.current_streak = 0;
            streaks.longest_streak = longest_streak(&streaks.productivity_stats_by_day);
        }
    }
}

/// Fold a completed session into a snapshot.
///
/// Appends to the session list, increments the day bucket for the
/// session's mode, grows `total_minutes` for focus modes, bumps the
/// bucket's `lastUpdate`, and refreshes the streak caches.
///
/// Returns `false` without touching anything when an equivalent session
/// is already present - this dedup guard is what makes offline-queue
/// replay idempotent across crashes and repeated drains.
pub fn apply_session(snapshot: &mut UserSnapshot, session: SessionRecord, today: NaiveDate) -> bool {
    if snapshot
        .sessions
        .iter()
        .any(|s| s.same_event(&session, SESSION_DEDUP_TOLERANCE_MS))
    {
        return false;
    }

    let stat = snapshot
        .streaks
        .productivity_stats_by_day
        .entry(session.date.clone())
        .or_default();

    match session.mode {
        SessionMode::Classic => {
            stat.classic += 1;
            stat.total_minutes += session.duration;
        }
        SessionMode::Reverse => {
            stat.reverse += 1;
            stat.total_minutes += session.duration;
        }
        SessionMode::Break => {
            stat.breaks += 1;
        }
    }
    stat.last_update = Some(match stat.last_update {
        Some(existing) => existing.max(session.timestamp),
        None => session.timestamp,
    });

    snapshot.sessions.push(session);
    snapshot
        .sessions
        .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.date.cmp(&b.date)));

    recompute(&mut snapshot.streaks, today);
    true
}

/// Timestamp helper: milliseconds since epoch for a date key at midnight.
/// Handy in tests and for synthesizing `lastUpdate` values.
pub fn date_key_to_midnight_ms(key: &str) -> Result<Timestamp> {
    let date = parse_date_key(key)?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::InvalidDateKey(key.to_string()))?;
    Ok(midnight.and_utc().timestamp_millis() as Timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(key: &str) -> NaiveDate {
        parse_date_key(key).unwrap()
    }

    fn active_stat() -> DayStat {
        DayStat {
            classic: 1,
            total_minutes: 25,
            ..Default::default()
        }
    }

    #[test]
    fn parse_and_format_roundtrip() {
        let d = date("2024-06-01");
        assert_eq!(format_date_key(d), "2024-06-01");
        assert!(parse_date_key("06/01/2024").is_err());
    }

    #[test]
    fn break_only_day_is_not_active() {
        let stat = DayStat {
            breaks: 4,
            ..Default::default()
        };
        assert!(!day_is_active(&stat));
        assert!(day_is_active(&active_stat()));
    }

    #[test]
    fn longest_streak_finds_separated_runs() {
        let mut stats = BTreeMap::new();
        for key in ["2024-05-01", "2024-05-02", "2024-05-03"] {
            stats.insert(key.to_string(), active_stat());
        }
        // Gap, then a longer run.
        for key in [
            "2024-05-10",
            "2024-05-11",
            "2024-05-12",
            "2024-05-13",
            "2024-05-14",
        ] {
            stats.insert(key.to_string(), active_stat());
        }

        assert_eq!(longest_streak(&stats), 5);
    }

    #[test]
    fn longest_streak_spans_month_boundary() {
        let mut stats = BTreeMap::new();
        for key in ["2024-05-30", "2024-05-31", "2024-06-01", "2024-06-02"] {
            stats.insert(key.to_string(), active_stat());
        }
        assert_eq!(longest_streak(&stats), 4);
    }

    #[test]
    fn current_streak_survives_until_today_is_over() {
        let mut stats = BTreeMap::new();
        stats.insert("2024-06-01".to_string(), active_stat());
        stats.insert("2024-06-02".to_string(), active_stat());

        // Today has no activity yet - yesterday's run still counts.
        assert_eq!(current_streak(&stats, date("2024-06-03")), 2);
        // Two days later the streak is broken.
        assert_eq!(current_streak(&stats, date("2024-06-04")), 0);
        // Activity today includes today.
        stats.insert("2024-06-03".to_string(), active_stat());
        assert_eq!(current_streak(&stats, date("2024-06-03")), 3);
    }

    #[test]
    fn unparseable_keys_are_skipped() {
        let mut stats = BTreeMap::new();
        stats.insert("not-a-date".to_string(), active_stat());
        stats.insert("2024-06-01".to_string(), active_stat());

        assert_eq!(longest_streak(&stats), 1);
    }

    #[test]
    fn apply_session_updates_bucket_and_caches() {
        let mut snapshot = UserSnapshot::default();
        let session = SessionRecord::new("2024-06-01", 25, SessionMode::Classic, 1000);

        assert!(apply_session(&mut snapshot, session, date("2024-06-01")));

        let stat = &snapshot.streaks.productivity_stats_by_day["2024-06-01"];
        assert_eq!(stat.classic, 1);
        assert_eq!(stat.total_minutes, 25);
        assert_eq!(stat.last_update, Some(1000));
        assert_eq!(snapshot.streaks.current_streak, 1);
        assert_eq!(snapshot.streaks.longest_streak, 1);
        assert_eq!(snapshot.sessions.len(), 1);
    }

    #[test]
    fn apply_break_session_counts_no_minutes() {
        let mut snapshot = UserSnapshot::default();
        let session = SessionRecord::new("2024-06-01", 5, SessionMode::Break, 1000);

        assert!(apply_session(&mut snapshot, session, date("2024-06-01")));

        let stat = &snapshot.streaks.productivity_stats_by_day["2024-06-01"];
        assert_eq!(stat.breaks, 1);
        assert_eq!(stat.total_minutes, 0);
        // A break alone starts no streak.
        assert_eq!(snapshot.streaks.current_streak, 0);
    }

    #[test]
    fn apply_session_is_idempotent() {
        let mut snapshot = UserSnapshot::default();
        let session = SessionRecord::new("2024-06-01", 25, SessionMode::Classic, 1000);

        assert!(apply_session(
            &mut snapshot,
            session.clone(),
            date("2024-06-01")
        ));
        // Same event replayed (30 seconds of timestamp drift).
        let replay = SessionRecord::new("2024-06-01", 25, SessionMode::Classic, 31_000);
        assert!(!apply_session(&mut snapshot, replay, date("2024-06-01")));

        let stat = &snapshot.streaks.productivity_stats_by_day["2024-06-01"];
        assert_eq!(stat.classic, 1);
        assert_eq!(stat.total_minutes, 25);
        assert_eq!(snapshot.sessions.len(), 1);
    }

    #[test]
    fn apply_session_keeps_sessions_sorted() {
        let mut snapshot = UserSnapshot::default();
        apply_session(
            &mut snapshot,
            SessionRecord::new("2024-06-01", 25, SessionMode::Classic, 500_000),
            date("2024-06-01"),
        );
        apply_session(
            &mut snapshot,
            SessionRecord::new("2024-06-01", 10, SessionMode::Reverse, 100_000),
            date("2024-06-01"),
        );

        assert_eq!(snapshot.sessions[0].timestamp, 100_000);
        assert_eq!(snapshot.sessions[1].timestamp, 500_000);
    }

    #[test]
    fn recompute_from_latest_anchors_at_latest_active_day() {
        let mut streaks = Streaks::default();
        streaks
            .productivity_stats_by_day
            .insert("2024-06-01".to_string(), active_stat());
        streaks
            .productivity_stats_by_day
            .insert("2024-06-02".to_string(), active_stat());
        // Stale caches.
        streaks.current_streak = 99;
        streaks.longest_streak = 0;

        recompute_from_latest(&mut streaks);
        assert_eq!(streaks.current_streak, 2);
        assert_eq!(streaks.longest_streak, 2);
    }
}
