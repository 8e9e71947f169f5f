use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// UTC trading sessions, eight hours each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingSession {
    /// 00:00-08:00 UTC
    Asia,
    /// 08:00-16:00 UTC
    London,
    /// 16:00-24:00 UTC
    Ny,
}

impl TradingSession {
    pub const LENGTH_HOURS: u32 = 8;

    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=7 => TradingSession::Asia,
            8..=15 => TradingSession::London,
            _ => TradingSession::Ny,
        }
    }

    pub fn start_hour(&self) -> u32 {
        match self {
            TradingSession::Asia => 0,
            TradingSession::London => 8,
            TradingSession::Ny => 16,
        }
    }

    /// Numeric encoding used in feature vectors
    pub fn code(&self) -> f64 {
        match self {
            TradingSession::Asia => 0.0,
            TradingSession::London => 1.0,
            TradingSession::Ny => 2.0,
        }
    }
}

/// A concrete session occurrence: the session plus its UTC date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub date: NaiveDate,
    pub session: TradingSession,
}

impl SessionKey {
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            date: dt.date_naive(),
            session: TradingSession::from_hour(dt.hour()),
        }
    }

    pub fn from_millis(ts_ms: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(ts_ms).map(Self::from_datetime)
    }

    pub fn weekday_index(&self) -> u32 {
        self.date.weekday().num_days_from_monday()
    }
}
