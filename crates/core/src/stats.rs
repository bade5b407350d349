//! Round statistics
//!
//! The aggregation run at reveal time. It is a pure function of the committed
//! card values, so two clients racing to reveal compute the same result.

use crate::models::{CardValue, RoundStatistics};

/// Compute max, min, median and mean. `None` when no cards were submitted.
pub fn compute_statistics(values: &[CardValue]) -> Option<RoundStatistics> {
    if values.is_empty() {
        return None;
    }

    let mut sorted: Vec<u8> = values.iter().map(|v| v.value()).collect();
    sorted.sort_unstable();

    let n = sorted.len();
    let median = if n % 2 == 1 {
        f64::from(sorted[n / 2])
    } else {
        (f64::from(sorted[n / 2 - 1]) + f64::from(sorted[n / 2])) / 2.0
    };
    let sum: u32 = sorted.iter().map(|v| u32::from(*v)).sum();

    Some(RoundStatistics {
        max: sorted[n - 1],
        min: sorted[0],
        median,
        avg: f64::from(sum) / n as f64,
    })
}

/// All submitted cards agree (more than one card, max == min)
pub fn is_unanimous(values: &[CardValue]) -> bool {
    values.len() > 1 && values.iter().all(|v| *v == values[0])
}
