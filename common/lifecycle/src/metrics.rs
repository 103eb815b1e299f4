pub(crate) const METRIC_UNIT_SPAWNED: &str = "lifecycle_unit_spawned_total";
pub(crate) const METRIC_UNIT_SHUTDOWN_RESULT: &str = "lifecycle_unit_shutdown_result_total";
pub(crate) const METRIC_SHUTDOWN_DURATION: &str = "lifecycle_shutdown_duration_seconds";
pub(crate) const METRIC_STARTUP: &str = "lifecycle_startup_total";

pub(crate) fn emit_unit_spawned(service_name: &str, unit: &str) {
    metrics::counter!(
        METRIC_UNIT_SPAWNED,
        "service_name" => service_name.to_string(),
        "unit" => unit.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_unit_shutdown_result(service_name: &str, unit: &str, result: &str) {
    metrics::counter!(
        METRIC_UNIT_SHUTDOWN_RESULT,
        "service_name" => service_name.to_string(),
        "unit" => unit.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_shutdown_duration(service_name: &str, clean: bool, duration_secs: f64) {
    metrics::histogram!(
        METRIC_SHUTDOWN_DURATION,
        "service_name" => service_name.to_string(),
        "clean" => clean.to_string()
    )
    .record(duration_secs);
}

pub(crate) fn emit_startup(service_name: &str, result: &str) {
    metrics::counter!(
        METRIC_STARTUP,
        "service_name" => service_name.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}
