use chrono::NaiveDate;

/// Session Volume-Weighted Average Price
///
/// Cumulative price*volume over cumulative volume. Not a rolling window: the
/// sums start from zero whenever a tick belongs to a different trading day
/// than the one stored.
#[derive(Debug, Clone, Default)]
pub struct Vwap {
    cum_pv: f64,
    cum_volume: f64,
    day: Option<NaiveDate>,
}

impl Vwap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, price: f64, volume: f64, day: NaiveDate) -> Option<f64> {
        if self.day != Some(day) {
            if self.day.is_some() {
                tracing::debug!(%day, "VWAP session reset");
            }
            self.cum_pv = 0.0;
            self.cum_volume = 0.0;
            self.day = Some(day);
        }

        self.cum_pv += price * volume;
        self.cum_volume += volume;

        self.value()
    }

    /// None while no volume has traded in the current session
    pub fn value(&self) -> Option<f64> {
        if self.cum_volume > 0.0 {
            Some(self.cum_pv / self.cum_volume)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
