use crate::models::ChartPoint;
use ta::Next;
use ta::indicators::RelativeStrengthIndex;

pub const RSI_PERIOD: usize = 14;

/// RSI of the last sample, or `None` when the series is shorter than `period`.
pub fn calculate_rsi(points: &[ChartPoint], period: usize) -> Option<f64> {
    let mut rsi_indicator = RelativeStrengthIndex::new(period).ok()?;

    if points.len() < period {
        return None;
    }

    let mut last_rsi: Option<f64> = None;
    for point in points {
        last_rsi = Some(rsi_indicator.next(point.price));
    }
    last_rsi
}
