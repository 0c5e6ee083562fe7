use serde::Serialize;

/// Running summary of a series of samples (response times, loss percentages).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Series {
    pub count: u64,
    pub sum: f64,
    pub max: Option<f64>,
}

impl Series {
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn push_opt(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.push(v);
        }
    }

    /// Fold in a series summarised elsewhere.
    pub fn merge(&mut self, other: &Series) {
        if other.count == 0 {
            return;
        }
        self.count += other.count;
        self.sum += other.sum;
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl FromIterator<f64> for Series {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut series = Series::default();
        for v in iter {
            series.push(v);
        }
        series
    }
}

/// `part / whole * 100`, or `None` when there is nothing to divide by.
pub fn percentage(part: u64, whole: u64) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64 * 100.0)
}

/// Two decimal places, for values that end up in API payloads.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
