use std::sync::LazyLock;

use prometheus::*;

use crate::router::Mode;
use crate::store::{Collection, IndexName};

static METRIC_PUT_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "picatalog_put_count",
        "count of rows written per collection",
        &["collection", "status"]
    )
    .unwrap()
});

static METRIC_QUERY_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "picatalog_query_duration",
        "duration of the per-query scan in seconds",
        &["index", "mode"]
    )
    .unwrap()
});

static METRIC_QUERY_ROWS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "picatalog_query_rows",
        "count of records returned by queries",
        &["index", "mode"]
    )
    .unwrap()
});

/// 记录一次行写入
pub fn inc_put(collection: Collection, ok: bool) {
    let status = if ok { "ok" } else { "failed" };
    METRIC_PUT_COUNT.with_label_values(&[collection.name(), status]).inc();
}

pub fn observe_query(index: IndexName, mode: &Mode, rows: usize, duration: f32) {
    let labels = [index.as_str(), mode.as_str()];
    METRIC_QUERY_DURATION.with_label_values(&labels).observe(duration as f64);
    METRIC_QUERY_ROWS.with_label_values(&labels).inc_by(rows as u64);
}

/// 以文本格式导出当前进程的所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&gather()).unwrap_or_default()
}
