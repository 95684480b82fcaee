use crate::config::SignalSettings;
use crate::indicators::IndicatorSnapshot;

/// Why an entry check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryBlock {
    EmaCrossover,
    Vwap,
    Macd,
    HtfTrend,
    Rsi,
    Bollinger,
}

impl EntryBlock {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryBlock::EmaCrossover => "fast EMA not above slow EMA",
            EntryBlock::Vwap => "price not above VWAP",
            EntryBlock::Macd => "MACD not bullish",
            EntryBlock::HtfTrend => "price not above higher-timeframe trend",
            EntryBlock::Rsi => "RSI outside entry band",
            EntryBlock::Bollinger => "price outside Bollinger bands",
        }
    }
}

/// AND over every enabled entry check
///
/// A disabled check passes. An enabled check whose reading is not yet
/// available fails.
pub fn check_entry(
    settings: &SignalSettings,
    indicators: &IndicatorSnapshot,
    price: f64,
) -> Result<(), EntryBlock> {
    if settings.use_ema_crossover {
        match (indicators.fast_ema, indicators.slow_ema) {
            (Some(fast), Some(slow)) if fast > slow => {}
            _ => return Err(EntryBlock::EmaCrossover),
        }
    }

    if settings.use_vwap {
        match indicators.vwap {
            Some(vwap) if price > vwap => {}
            _ => return Err(EntryBlock::Vwap),
        }
    }

    if settings.use_macd {
        match indicators.macd {
            Some(m) if m.line > m.signal && m.histogram > 0.0 => {}
            _ => return Err(EntryBlock::Macd),
        }
    }

    if settings.use_htf_trend {
        match indicators.trend_ema {
            Some(trend) if price > trend => {}
            _ => return Err(EntryBlock::HtfTrend),
        }
    }

    if settings.use_rsi {
        match indicators.rsi {
            Some(rsi) if rsi > settings.rsi_oversold && rsi < settings.rsi_overbought => {}
            _ => return Err(EntryBlock::Rsi),
        }
    }

    if settings.use_bollinger {
        match indicators.bollinger {
            Some(bands) if bands.contains(price) => {}
            _ => return Err(EntryBlock::Bollinger),
        }
    }

    Ok(())
}

/// Bearish reversal: fast EMA under slow EMA, confirmed by a negative MACD
/// histogram when MACD is available
pub fn is_reversal(indicators: &IndicatorSnapshot) -> bool {
    let crossed_down = matches!(
        (indicators.fast_ema, indicators.slow_ema),
        (Some(fast), Some(slow)) if fast < slow
    );
    let momentum_down = indicators.macd.map_or(true, |m| m.histogram < 0.0);
    crossed_down && momentum_down
}
