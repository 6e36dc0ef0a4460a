use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use utoipa::ToSchema;

use crate::error::ApiError;

/// Actions an employee can take against their attendance session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClockAction {
    ClockIn,
    BreakIn,
    BreakOut,
    ClockOut,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttendanceSession {
    pub id: u64,
    pub employee_id: u64,
    pub clock_in_at: DateTime<Utc>,
    pub break_in_at: Option<DateTime<Utc>>,
    pub break_out_at: Option<DateTime<Utc>>,
    pub clock_out_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Working,
    OnBreak,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Already clocked in")]
    AlreadyClockedIn,
    #[error("Not clocked in")]
    NotClockedIn,
    #[error("Already on break")]
    AlreadyOnBreak,
    #[error("Break already taken for this session")]
    BreakAlreadyTaken,
    #[error("Not on break")]
    NotOnBreak,
    #[error("End your break before clocking out")]
    BreakInProgress,
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        ApiError::Conflict(e.to_string())
    }
}

pub const SESSION_COLUMNS: &str =
    "id, employee_id, clock_in_at, break_in_at, break_out_at, clock_out_at";

impl AttendanceSession {
    pub fn state(&self) -> SessionState {
        if self.clock_out_at.is_some() {
            SessionState::Closed
        } else if self.break_in_at.is_some() && self.break_out_at.is_none() {
            SessionState::OnBreak
        } else {
            SessionState::Working
        }
    }

    pub fn is_open(&self) -> bool {
        self.clock_out_at.is_none()
    }

    fn end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.clock_out_at.unwrap_or(now)
    }

    pub fn break_seconds(&self, now: DateTime<Utc>) -> i64 {
        match self.break_in_at {
            Some(start) => {
                let stop = self.break_out_at.unwrap_or_else(|| self.end(now));
                (stop - start).num_seconds().max(0)
            }
            None => 0,
        }
    }

    /// Time between clock-in and clock-out (or `now`) minus the break.
    pub fn worked_seconds(&self, now: DateTime<Utc>) -> i64 {
        let span = (self.end(now) - self.clock_in_at).num_seconds();
        (span - self.break_seconds(now)).max(0)
    }
}

/// Decides whether `action` is allowed given the employee's open session, if any.
pub fn check_transition(
    open: Option<&AttendanceSession>,
    action: ClockAction,
) -> Result<(), TransitionError> {
    let session = match (open, action) {
        (Some(_), ClockAction::ClockIn) => return Err(TransitionError::AlreadyClockedIn),
        (None, ClockAction::ClockIn) => return Ok(()),
        (None, _) => return Err(TransitionError::NotClockedIn),
        (Some(s), _) => s,
    };

    match (session.state(), action) {
        (SessionState::Closed, _) => Err(TransitionError::NotClockedIn),
        (SessionState::OnBreak, ClockAction::BreakIn) => Err(TransitionError::AlreadyOnBreak),
        (SessionState::OnBreak, ClockAction::BreakOut) => Ok(()),
        (SessionState::OnBreak, ClockAction::ClockOut) => Err(TransitionError::BreakInProgress),
        (SessionState::Working, ClockAction::BreakIn) if session.break_in_at.is_some() => {
            Err(TransitionError::BreakAlreadyTaken)
        }
        (SessionState::Working, ClockAction::BreakIn) => Ok(()),
        (SessionState::Working, ClockAction::BreakOut) => Err(TransitionError::NotOnBreak),
        (SessionState::Working, ClockAction::ClockOut) => Ok(()),
        (_, ClockAction::ClockIn) => Err(TransitionError::AlreadyClockedIn),
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "id": 7,
    "employee_id": 1,
    "state": "working",
    "clock_in_at": "2026-01-05T09:00:00Z",
    "break_in_at": null,
    "break_out_at": null,
    "clock_out_at": null,
    "worked_seconds": 3600,
    "break_seconds": 0
}))]
pub struct SessionView {
    pub id: u64,
    pub employee_id: u64,
    pub state: SessionState,
    #[schema(value_type = String, format = "date-time")]
    pub clock_in_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub break_in_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub break_out_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub clock_out_at: Option<DateTime<Utc>>,
    pub worked_seconds: i64,
    pub break_seconds: i64,
}

impl SessionView {
    pub fn at(session: AttendanceSession, now: DateTime<Utc>) -> Self {
        Self {
            state: session.state(),
            worked_seconds: session.worked_seconds(now),
            break_seconds: session.break_seconds(now),
            id: session.id,
            employee_id: session.employee_id,
            clock_in_at: session.clock_in_at,
            break_in_at: session.break_in_at,
            break_out_at: session.break_out_at,
            clock_out_at: session.clock_out_at,
        }
    }
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceEvent {
    pub id: u64,
    pub session_id: u64,
    pub employee_id: u64,
    #[schema(example = "clock_in")]
    pub kind: String,
    #[schema(value_type = String, format = "date-time")]
    pub occurred_at: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub network_type: Option<String>,
    pub photo_url: Option<String>,
}

/// A browser geolocation reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("latitude must be between -90 and 90")]
    Latitude,
    #[error("longitude must be between -180 and 180")]
    Longitude,
    #[error("accuracy must be a non-negative number of metres")]
    Accuracy,
}

impl From<GeoError> for ApiError {
    fn from(e: GeoError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64) -> Result<Self, GeoError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(GeoError::Latitude);
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(GeoError::Longitude);
        }
        if !accuracy_m.is_finite() || accuracy_m < 0.0 {
            return Err(GeoError::Accuracy);
        }
        Ok(Self {
            latitude,
            longitude,
            accuracy_m,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, h, m, 0).unwrap()
    }

    fn session(
        break_in: Option<DateTime<Utc>>,
        break_out: Option<DateTime<Utc>>,
        clock_out: Option<DateTime<Utc>>,
    ) -> AttendanceSession {
        AttendanceSession {
            id: 1,
            employee_id: 42,
            clock_in_at: at(9, 0),
            break_in_at: break_in,
            break_out_at: break_out,
            clock_out_at: clock_out,
        }
    }

    #[rstest]
    #[case(ClockAction::ClockIn, Ok(()))]
    #[case(ClockAction::BreakIn, Err(TransitionError::NotClockedIn))]
    #[case(ClockAction::BreakOut, Err(TransitionError::NotClockedIn))]
    #[case(ClockAction::ClockOut, Err(TransitionError::NotClockedIn))]
    fn without_open_session(#[case] action: ClockAction, #[case] expected: Result<(), TransitionError>) {
        assert_eq!(check_transition(None, action), expected);
    }

    #[rstest]
    #[case(ClockAction::ClockIn, Err(TransitionError::AlreadyClockedIn))]
    #[case(ClockAction::BreakIn, Ok(()))]
    #[case(ClockAction::BreakOut, Err(TransitionError::NotOnBreak))]
    #[case(ClockAction::ClockOut, Ok(()))]
    fn while_working(#[case] action: ClockAction, #[case] expected: Result<(), TransitionError>) {
        let s = session(None, None, None);
        assert_eq!(check_transition(Some(&s), action), expected);
    }

    #[rstest]
    #[case(ClockAction::ClockIn, Err(TransitionError::AlreadyClockedIn))]
    #[case(ClockAction::BreakIn, Err(TransitionError::AlreadyOnBreak))]
    #[case(ClockAction::BreakOut, Ok(()))]
    #[case(ClockAction::ClockOut, Err(TransitionError::BreakInProgress))]
    fn while_on_break(#[case] action: ClockAction, #[case] expected: Result<(), TransitionError>) {
        let s = session(Some(at(12, 0)), None, None);
        assert_eq!(s.state(), SessionState::OnBreak);
        assert_eq!(check_transition(Some(&s), action), expected);
    }

    #[test]
    fn second_break_is_refused() {
        let s = session(Some(at(12, 0)), Some(at(12, 30)), None);
        assert_eq!(s.state(), SessionState::Working);
        assert_eq!(
            check_transition(Some(&s), ClockAction::BreakIn),
            Err(TransitionError::BreakAlreadyTaken)
        );
        assert_eq!(check_transition(Some(&s), ClockAction::ClockOut), Ok(()));
    }

    #[test]
    fn closed_session_is_not_open() {
        let s = session(None, None, Some(at(17, 0)));
        assert!(!s.is_open());
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(
            check_transition(Some(&s), ClockAction::ClockOut),
            Err(TransitionError::NotClockedIn)
        );
    }

    #[test]
    fn worked_time_excludes_break() {
        let s = session(Some(at(12, 0)), Some(at(12, 45)), Some(at(17, 0)));
        assert_eq!(s.break_seconds(at(23, 0)), 45 * 60);
        assert_eq!(s.worked_seconds(at(23, 0)), 8 * 3600 - 45 * 60);
    }

    #[test]
    fn open_break_runs_until_now() {
        let s = session(Some(at(12, 0)), None, None);
        let now = at(12, 10);
        assert_eq!(s.break_seconds(now), 600);
        assert_eq!(s.worked_seconds(now), 3 * 3600);
    }

    #[test]
    fn durations_never_go_negative() {
        let s = session(None, None, None);
        let before_clock_in = at(9, 0) - Duration::minutes(5);
        assert_eq!(s.worked_seconds(before_clock_in), 0);
    }

    #[test]
    fn geo_point_bounds() {
        assert!(GeoPoint::new(23.81, 90.41, 12.5).is_ok());
        assert_eq!(GeoPoint::new(91.0, 0.0, 1.0), Err(GeoError::Latitude));
        assert_eq!(GeoPoint::new(0.0, -180.5, 1.0), Err(GeoError::Longitude));
        assert_eq!(GeoPoint::new(0.0, 0.0, -1.0), Err(GeoError::Accuracy));
        assert_eq!(GeoPoint::new(f64::NAN, 0.0, 1.0), Err(GeoError::Latitude));
    }

    #[test]
    fn action_names_match_stored_kind() {
        assert_eq!(ClockAction::BreakOut.as_ref(), "break_out");
        assert_eq!(ClockAction::ClockIn.to_string(), "clock_in");
    }
}
