use crate::types::{ExecutionOutcome, TestSummary};

/// Builds a run summary from raw outcomes. Outcome order does not matter.
pub fn aggregate(outcomes: &[ExecutionOutcome], wall_clock_ms: i64) -> TestSummary {
    let total = outcomes.len();
    let successes = outcomes
        .iter()
        .filter(|o| (200..300).contains(&o.status))
        .count();
    let failures = total - successes;
    let success_rate = if total == 0 {
        0.0
    } else {
        (successes as f64 * 100.0) / total as f64
    };

    let throughput = if wall_clock_ms > 0 {
        total as f64 / (wall_clock_ms as f64 / 1000.0)
    } else {
        0.0
    };

    let client: Vec<u64> = outcomes.iter().map(|o| o.client_latency_ms).collect();
    let server: Vec<u64> = outcomes.iter().filter_map(|o| o.server_processing_ms).collect();
    let queue: Vec<u64> = outcomes.iter().filter_map(|o| o.queue_wait_ms).collect();

    TestSummary {
        successes: successes as u32,
        failures: failures as u32,
        success_rate: round2(success_rate),
        duration_ms: wall_clock_ms.max(0) as u64,
        throughput_rps: round2(throughput),
        avg_response_time_ms: round2(average(&client)),
        p95_response_time_ms: round2(percentile(&client, 95.0)),
        avg_server_processing_ms: optional_average(&server),
        p95_server_processing_ms: optional_percentile(&server, 95.0),
        avg_queue_wait_ms: optional_average(&queue),
        p95_queue_wait_ms: optional_percentile(&queue, 95.0),
    }
}

pub fn average(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<u64>() as f64 / values.len() as f64
}

/// Nearest-rank percentile: the value at `ceil(p/100 * n) - 1` of the
/// ascending sort, clamped to the sample. No interpolation.
pub fn percentile(values: &[u64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let rank = (p / 100.0 * sorted.len() as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, sorted.len() as i64 - 1) as usize;
    sorted[index] as f64
}

/// Round half up to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0 + 0.5).floor() / 100.0
}

fn optional_average(values: &[u64]) -> Option<f64> {
    (!values.is_empty()).then(|| round2(average(values)))
}

fn optional_percentile(values: &[u64], p: f64) -> Option<f64> {
    (!values.is_empty()).then(|| round2(percentile(values, p)))
}
