//! Pure computation module for the momentum gate's indicators.
//!
//! No I/O, no side effects. Takes daily closes and returns indicator
//! values. Unlike a charting library these return `None` on thin history
//! instead of a neutral default, so a short series can never look like a
//! calm market to the momentum gate.

/// Relative Strength Index (Wilder's smoothing).
///
/// Uses smoothing factor `1/period` (not the standard EMA `2/(period+1)`).
/// Returns `None` with fewer than `period + 1` closes, 100 when there were
/// no down moves and 50 on a perfectly flat series.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    if closes.iter().any(|c| !c.is_finite()) {
        return None;
    }

    let period_f = period as f64;
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    // Initial average gain/loss from first `period` changes.
    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / period_f;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / period_f;

    // Wilder's smoothing for remaining changes.
    for &c in &changes[period..] {
        avg_gain = (avg_gain * (period_f - 1.0) + c.max(0.0)) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + (-c).max(0.0)) / period_f;
    }

    if avg_gain == 0.0 && avg_loss == 0.0 {
        return Some(50.0);
    }
    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
}

/// Simple moving average of the last `period` closes.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}
