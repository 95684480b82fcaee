use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::config::{SessionSettings, TimeWindow};
use crate::error::ConfigError;

/// Exchange trading hours evaluated in the exchange's own UTC offset
#[derive(Debug, Clone)]
pub struct SessionClock {
    offset: FixedOffset,
    entry_opens: NaiveTime,
    entry_closes: NaiveTime,
    square_off: NaiveTime,
    no_trade_windows: Vec<TimeWindow>,
}

impl SessionClock {
    pub fn new(settings: &SessionSettings) -> Result<Self, ConfigError> {
        let offset = FixedOffset::east_opt(settings.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::invalid("session.utc_offset_minutes", "offset out of range")
        })?;

        Ok(Self {
            offset,
            entry_opens: settings.start + Duration::minutes(settings.start_buffer_minutes),
            entry_closes: settings.end - Duration::minutes(settings.end_buffer_minutes),
            square_off: settings.end - Duration::minutes(settings.exit_buffer_minutes),
            no_trade_windows: settings.no_trade_windows.clone(),
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn local_time(&self, ts: DateTime<Utc>) -> NaiveTime {
        ts.with_timezone(&self.offset).time()
    }

    /// Calendar day of the timestamp on the exchange clock
    pub fn trading_day(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.offset).date_naive()
    }

    /// True inside [start + start_buffer, end - end_buffer], before
    /// square-off and outside every no-trade window
    pub fn entry_window_open(&self, ts: DateTime<Utc>) -> bool {
        let time = self.local_time(ts);
        if time < self.entry_opens || time > self.entry_closes || time >= self.square_off {
            return false;
        }
        !self.no_trade_windows.iter().any(|w| w.contains(time))
    }

    /// Open positions must be squared off from this point on: session end,
    /// less the optional exit buffer
    pub fn is_session_over(&self, ts: DateTime<Utc>) -> bool {
        self.local_time(ts) >= self.square_off
    }
}
