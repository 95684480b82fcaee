use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::execution::FeeModel;

const ENV_PREFIX: &str = "INTRADAYBOT";

/// Frozen engine configuration
///
/// Loaded once at startup and treated as read-only; changing any value
/// requires constructing a new engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub symbol: String,
    pub feed: FeedSettings,
    pub indicators: IndicatorSettings,
    pub signal: SignalSettings,
    pub risk: RiskSettings,
    pub session: SessionSettings,
    pub engine: LoopSettings,
    pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub rest_url: Option<String>,
    pub ws_url: Option<String>,
    pub api_token: Option<String>,
    pub poll_rate_per_sec: u32,
    pub request_timeout_secs: u64,
    pub connect_retries: u32,
    pub connect_retry_delay_ms: u64,
    pub heartbeat_secs: u64,
    pub reconnect_cooldown_secs: u64,
    pub max_reconnect_attempts: u32,
    pub poll_failure_limit: u32,
    pub buffer_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            rest_url: None,
            ws_url: None,
            api_token: None,
            poll_rate_per_sec: 2,
            request_timeout_secs: 10,
            connect_retries: 3,
            connect_retry_delay_ms: 2000,
            heartbeat_secs: 30,
            reconnect_cooldown_secs: 60,
            max_reconnect_attempts: 3,
            poll_failure_limit: 5,
            buffer_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub fast_ema_period: usize,
    pub slow_ema_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_enabled: bool,
    pub atr_period: usize,
    pub rsi_period: usize,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
    pub htf_ema_period: usize,
    pub htf_bucket_minutes: i64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            fast_ema_period: 9,
            slow_ema_period: 21,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_enabled: true,
            atr_period: 14,
            rsi_period: 14,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
            htf_ema_period: 20,
            htf_bucket_minutes: 15,
        }
    }
}

/// Entry/exit check toggles. Disabled checks pass vacuously.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub use_ema_crossover: bool,
    pub use_vwap: bool,
    pub use_macd: bool,
    pub use_htf_trend: bool,
    pub use_rsi: bool,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub use_bollinger: bool,
    pub required_green_ticks: u32,
    pub noise_filter_enabled: bool,
    pub noise_min_ticks: u32,
    /// Percent of the previous price, e.g. 0.01 means 0.01%
    pub noise_percent: f64,
    pub exit_on_reversal: bool,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            use_ema_crossover: true,
            use_vwap: true,
            use_macd: true,
            use_htf_trend: false,
            use_rsi: false,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            use_bollinger: false,
            required_green_ticks: 3,
            noise_filter_enabled: true,
            noise_min_ticks: 1,
            noise_percent: 0.01,
            exit_on_reversal: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub base_sl_points: f64,
    pub tp_points: Vec<f64>,
    /// Share of the original lot released at each target, in percent
    pub tp_percents: Vec<f64>,
    pub trailing_enabled: bool,
    pub trail_activation_points: f64,
    pub trail_distance_points: f64,
    pub lot_size: u64,
    pub tick_size: f64,
    pub max_daily_trades: u32,
    pub fees: FeeModel,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            base_sl_points: 5.0,
            tp_points: vec![10.0],
            tp_percents: vec![100.0],
            trailing_enabled: false,
            trail_activation_points: 8.0,
            trail_distance_points: 4.0,
            lot_size: 1,
            tick_size: 0.05,
            max_daily_trades: 5,
            fees: FeeModel::Zero,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        time >= self.start && time < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Exchange offset from UTC in minutes (IST = 330)
    pub utc_offset_minutes: i32,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub start_buffer_minutes: i64,
    pub end_buffer_minutes: i64,
    /// Square off this many minutes before `end` (0 = at session end)
    pub exit_buffer_minutes: i64,
    pub no_trade_windows: Vec<TimeWindow>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 330,
            start: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default(),
            start_buffer_minutes: 5,
            end_buffer_minutes: 15,
            exit_buffer_minutes: 0,
            no_trade_windows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub max_consecutive_failures: u32,
    pub idle_sleep_ms: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            idle_sleep_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub redis_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "NIFTY".to_string(),
            feed: FeedSettings::default(),
            indicators: IndicatorSettings::default(),
            signal: SignalSettings::default(),
            risk: RiskSettings::default(),
            session: SessionSettings::default(),
            engine: LoopSettings::default(),
            persistence: PersistenceSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML file plus environment overrides
    ///
    /// Environment keys use the `INTRADAYBOT__SECTION__KEY` form, e.g.
    /// `INTRADAYBOT__RISK__LOT_SIZE=50`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let cfg: EngineConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse configuration from TOML text (no environment overrides)
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::invalid("symbol", "must not be empty"));
        }
        self.validate_indicators()?;
        self.validate_signal()?;
        self.validate_risk()?;
        self.validate_session()?;

        if self.engine.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid(
                "engine.max_consecutive_failures",
                "must be at least 1",
            ));
        }
        if self.feed.connect_retries == 0 {
            return Err(ConfigError::invalid("feed.connect_retries", "must be at least 1"));
        }
        if self.feed.poll_rate_per_sec == 0 {
            return Err(ConfigError::invalid("feed.poll_rate_per_sec", "must be at least 1"));
        }
        if self.feed.buffer_capacity == 0 {
            return Err(ConfigError::invalid("feed.buffer_capacity", "must be at least 1"));
        }
        Ok(())
    }

    fn validate_indicators(&self) -> Result<(), ConfigError> {
        let ind = &self.indicators;
        let periods = [
            ("indicators.fast_ema_period", ind.fast_ema_period),
            ("indicators.slow_ema_period", ind.slow_ema_period),
            ("indicators.macd_fast", ind.macd_fast),
            ("indicators.macd_slow", ind.macd_slow),
            ("indicators.macd_signal", ind.macd_signal),
            ("indicators.atr_period", ind.atr_period),
            ("indicators.rsi_period", ind.rsi_period),
            ("indicators.bollinger_period", ind.bollinger_period),
            ("indicators.htf_ema_period", ind.htf_ema_period),
        ];
        for (field, period) in periods {
            if period == 0 {
                return Err(ConfigError::invalid(field, "period must be positive"));
            }
        }
        if ind.fast_ema_period >= ind.slow_ema_period {
            return Err(ConfigError::invalid(
                "indicators.fast_ema_period",
                "fast period must be shorter than slow period",
            ));
        }
        if ind.macd_fast >= ind.macd_slow {
            return Err(ConfigError::invalid(
                "indicators.macd_fast",
                "fast period must be shorter than slow period",
            ));
        }
        if ind.bollinger_std_dev <= 0.0 {
            return Err(ConfigError::invalid(
                "indicators.bollinger_std_dev",
                "must be positive",
            ));
        }
        if ind.htf_bucket_minutes <= 0 {
            return Err(ConfigError::invalid(
                "indicators.htf_bucket_minutes",
                "must be positive",
            ));
        }
        Ok(())
    }

    fn validate_signal(&self) -> Result<(), ConfigError> {
        let sig = &self.signal;
        if sig.rsi_oversold >= sig.rsi_overbought
            || sig.rsi_oversold < 0.0
            || sig.rsi_overbought > 100.0
        {
            return Err(ConfigError::invalid(
                "signal.rsi_oversold",
                "expected 0 <= oversold < overbought <= 100",
            ));
        }
        if sig.noise_percent < 0.0 {
            return Err(ConfigError::invalid("signal.noise_percent", "must not be negative"));
        }
        Ok(())
    }

    fn validate_risk(&self) -> Result<(), ConfigError> {
        let risk = &self.risk;
        if risk.base_sl_points <= 0.0 {
            return Err(ConfigError::invalid("risk.base_sl_points", "must be positive"));
        }
        if risk.lot_size == 0 {
            return Err(ConfigError::invalid("risk.lot_size", "must be positive"));
        }
        if risk.tick_size <= 0.0 {
            return Err(ConfigError::invalid("risk.tick_size", "must be positive"));
        }
        if risk.tp_points.len() != risk.tp_percents.len() {
            return Err(ConfigError::invalid(
                "risk.tp_percents",
                format!(
                    "{} targets but {} percentages",
                    risk.tp_points.len(),
                    risk.tp_percents.len()
                ),
            ));
        }
        if risk.tp_points.iter().any(|p| *p <= 0.0) {
            return Err(ConfigError::invalid("risk.tp_points", "targets must be positive"));
        }
        if risk.tp_points.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ConfigError::invalid(
                "risk.tp_points",
                "targets must be strictly ascending",
            ));
        }
        if risk.tp_percents.iter().any(|p| *p <= 0.0 || *p > 100.0) {
            return Err(ConfigError::invalid(
                "risk.tp_percents",
                "each percentage must be in (0, 100]",
            ));
        }
        let total: f64 = risk.tp_percents.iter().sum();
        if total > 100.0 + 1e-9 {
            return Err(ConfigError::invalid(
                "risk.tp_percents",
                format!("percentages sum to {:.2}, above 100", total),
            ));
        }
        if risk.trailing_enabled
            && (risk.trail_activation_points <= 0.0 || risk.trail_distance_points <= 0.0)
        {
            return Err(ConfigError::invalid(
                "risk.trail_distance_points",
                "trailing activation and distance must be positive",
            ));
        }
        risk.fees.validate()?;
        Ok(())
    }

    fn validate_session(&self) -> Result<(), ConfigError> {
        let session = &self.session;
        if session.start >= session.end {
            return Err(ConfigError::invalid("session.start", "must be before session.end"));
        }
        if session.start_buffer_minutes < 0
            || session.end_buffer_minutes < 0
            || session.exit_buffer_minutes < 0
        {
            return Err(ConfigError::invalid(
                "session.start_buffer_minutes",
                "buffers must not be negative",
            ));
        }
        let length = (session.end - session.start).num_minutes();
        if session.start_buffer_minutes + session.end_buffer_minutes >= length {
            return Err(ConfigError::invalid(
                "session.end_buffer_minutes",
                "buffers leave no entry window",
            ));
        }
        if session.exit_buffer_minutes >= length {
            return Err(ConfigError::invalid(
                "session.exit_buffer_minutes",
                "square-off must fall inside the session",
            ));
        }
        if session.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::invalid(
                "session.utc_offset_minutes",
                "offset must be within one day",
            ));
        }
        if session.no_trade_windows.iter().any(|w| w.start >= w.end) {
            return Err(ConfigError::invalid(
                "session.no_trade_windows",
                "window start must be before end",
            ));
        }
        Ok(())
    }
}
