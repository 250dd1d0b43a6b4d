//! Trend classification over a metric window.

use granger_core::UtilizationSnapshot;

/// Direction of a metric over the observed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

/// The metrics a trend can be computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cpu,
    Memory,
    DiskIo,
    NetworkIo,
}

/// Extract one metric value from a snapshot.
pub fn metric_value(snapshot: &UtilizationSnapshot, metric: Metric) -> f64 {
    match metric {
        Metric::Cpu => snapshot.cpu_percent,
        Metric::Memory => snapshot.memory_mb as f64,
        Metric::DiskIo => snapshot.disk_io_mbps,
        Metric::NetworkIo => snapshot.network_mbps,
    }
}

/// Classify a value series by its least-squares slope.
///
/// The slope is compared against 1% of the window's mean magnitude (with
/// a floor of 1.0) so that tiny jitter on a large baseline reads as
/// Stable. Fewer than two samples is always Stable.
pub fn classify(values: &[f64]) -> Trend {
    if values.len() < 2 {
        return Trend::Stable;
    }

    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        cov += dx * (y - y_mean);
        var += dx * dx;
    }
    let slope = cov / var;

    let epsilon = 0.01 * y_mean.abs().max(1.0);
    if slope > epsilon {
        Trend::Rising
    } else if slope < -epsilon {
        Trend::Falling
    } else {
        Trend::Stable
    }
}
