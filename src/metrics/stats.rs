//! Distribution statistics for duration samples.

use serde::{Deserialize, Serialize};

/// Round to one decimal place for reporting.
#[must_use]
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Summary of a set of durations, in days.
///
/// [`TimeStats::from_values`] keeps full precision; call
/// [`TimeStats::rounded`] once when producing output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeStats {
    #[serde(rename = "average_days")]
    pub average: f64,
    #[serde(rename = "median_days")]
    pub median: f64,
    #[serde(rename = "p85_days")]
    pub p85: f64,
    #[serde(rename = "min_days")]
    pub min: f64,
    #[serde(rename = "max_days")]
    pub max: f64,
    #[serde(rename = "std_dev_days")]
    pub std_dev: f64,
    #[serde(rename = "sample_count")]
    pub count: usize,
}

impl TimeStats {
    /// Compute over `values`. An empty slice yields all zeros.
    ///
    /// Median averages the two middle values for an even count. The 85th
    /// percentile is the element at `floor(0.85 * n)`, clamped to `n - 1`.
    /// Standard deviation is the population form.
    #[must_use]
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();

        let mean = sorted.iter().sum::<f64>() / n as f64;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;

        let mid = n / 2;
        let median = if n % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };
        let p85_idx = ((n as f64 * 0.85).floor() as usize).min(n - 1);

        Self {
            average: mean,
            median,
            p85: sorted[p85_idx],
            min: sorted[0],
            max: sorted[n - 1],
            std_dev: variance.sqrt(),
            count: n,
        }
    }

    /// Copy with every scalar rounded to one decimal.
    #[must_use]
    pub fn rounded(&self) -> Self {
        Self {
            average: round1(self.average),
            median: round1(self.median),
            p85: round1(self.p85),
            min: round1(self.min),
            max: round1(self.max),
            std_dev: round1(self.std_dev),
            count: self.count,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Completed items per period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateStats {
    pub total: usize,
    pub per_day: f64,
    pub per_week: f64,
}

impl RateStats {
    #[must_use]
    pub fn over_days(total: usize, days: u32) -> Self {
        let per_day = total as f64 / f64::from(days.max(1));
        Self {
            total,
            per_day,
            per_week: per_day * 7.0,
        }
    }
}
