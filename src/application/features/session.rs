use crate::domain::features::{Feature, FeatureVector};
use crate::domain::market::session::TradingSession;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

/// CME bitcoin futures close on Friday, UTC hour
const CME_CLOSE_HOUR: u32 = 21;

/// Calendar and session features at `event_time` (epoch ms, UTC).
pub fn apply(event_time: i64, fv: &mut FeatureVector) {
    let Some(ts) = DateTime::<Utc>::from_timestamp_millis(event_time) else {
        return;
    };
    let hour = ts.hour();
    let minute = ts.minute();
    let weekday = ts.weekday();

    let session = TradingSession::from_hour(hour);
    let into = (hour - session.start_hour()) * 60 + minute;
    let length = TradingSession::LENGTH_HOURS * 60;

    fv.set(Feature::SessionCode, session.code());
    fv.set(Feature::MinutesIntoSession, f64::from(into));
    fv.set(Feature::MinutesUntilSessionClose, f64::from(length - into - 1));
    fv.set(Feature::HourOfDay, f64::from(hour));
    fv.set(Feature::DayOfWeek, f64::from(weekday.num_days_from_monday()));
    fv.set_flag(
        Feature::WeekendFlag,
        matches!(weekday, Weekday::Sat | Weekday::Sun),
    );

    let cme_minutes = if weekday == Weekday::Fri && hour < CME_CLOSE_HOUR {
        (CME_CLOSE_HOUR - hour) * 60 - minute
    } else {
        0
    };
    fv.set(Feature::CmeCloseProximity, f64::from(cme_minutes));
}
