//! Technical indicators over a close-price series
//!
//! All functions take prices oldest first and return `None` when the series is
//! too short for the requested period.

use std::collections::VecDeque;

use super::types::{Candle, MarketData};

pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// EMA series seeded with the SMA of the first `period` values
fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(prices.len() - period + 1);
    out.push(seed);
    for price in &prices[period..] {
        let prev = out[out.len() - 1];
        out.push(price * k + prev * (1.0 - k));
    }
    out
}

pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().copied()
}

/// RSI with Wilder smoothing
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() <= period {
        return None;
    }
    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = deltas[..period].iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss =
        deltas[..period].iter().filter(|d| **d < 0.0).map(|d| -d).sum::<f64>() / period as f64;

    for d in &deltas[period..] {
        let (gain, loss) = if *d > 0.0 { (*d, 0.0) } else { (0.0, -d) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD(fast, slow, signal)
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast >= slow {
        return None;
    }
    let fast_series = ema_series(prices, fast);
    let slow_series = ema_series(prices, slow);
    if slow_series.is_empty() {
        return None;
    }
    // Align: slow series starts (slow - fast) values later than fast
    let offset = slow - fast;
    let line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[i + offset] - s)
        .collect();
    let signal_value = ema(&line, signal)?;
    let line_value = *line.last()?;
    Some(Macd {
        line: line_value,
        signal: signal_value,
        histogram: line_value - signal_value,
    })
}

/// Bollinger bands as (upper, middle, lower)
pub fn bollinger(prices: &[f64], period: usize, width: f64) -> Option<(f64, f64, f64)> {
    let mid = sma(prices, period)?;
    let window = &prices[prices.len() - period..];
    let variance = window.iter().map(|p| (p - mid).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();
    Some((mid + width * sd, mid, mid - width * sd))
}

/// Bounded close-price history for one token
#[derive(Debug, Clone)]
pub struct PriceHistory {
    prices: VecDeque<f64>,
    capacity: usize,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            prices: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        if self.prices.len() == self.capacity {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.prices.back().copied()
    }

    /// Market snapshot with every indicator the history can support
    pub fn market_data(&self, token_address: &str, chain_id: u64) -> MarketData {
        let prices: Vec<f64> = self.prices.iter().copied().collect();
        let current = prices.last().copied().unwrap_or(0.0);
        let mut data = MarketData::at_price(token_address, chain_id, current);

        data.rsi_14 = rsi(&prices, 14);
        data.sma_20 = sma(&prices, 20);
        data.sma_50 = sma(&prices, 50);
        data.ema_12 = ema(&prices, 12);
        data.ema_26 = ema(&prices, 26);
        if let Some(m) = macd(&prices, 12, 26, 9) {
            data.macd_line = Some(m.line);
            data.macd_signal = Some(m.signal);
            data.macd_histogram = Some(m.histogram);
        }
        if let Some((upper, _, lower)) = bollinger(&prices, 20, 2.0) {
            data.bollinger_upper = Some(upper);
            data.bollinger_lower = Some(lower);
        }
        data.ohlcv = prices
            .iter()
            .map(|p| Candle {
                open: *p,
                high: *p,
                low: *p,
                close: *p,
                volume: 0.0,
            })
            .collect();
        data
    }
}
