//! Client-side counters
//!
//! - `api_client_refresh_total` (counter): label `outcome`
//!   (`success`, `failure`, `timeout`, `unavailable`, `superseded`)
//! - `api_client_refresh_joined_total` (counter): callers that attached to an
//!   in-flight refresh instead of starting one
//! - `api_client_requests_total` (counter): labels `method`, `status`
//!
//! Without an installed recorder these are no-ops.

/// Record the outcome of one refresh attempt against the backend.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("api_client_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a caller joining an in-flight refresh.
pub fn record_refresh_joined() {
    metrics::counter!("api_client_refresh_joined_total").increment(1);
}

/// Record a finished authenticated request. `status` is the final HTTP
/// status, or a short error label when there was none.
pub fn record_request(method: &str, status: &str) {
    metrics::counter!(
        "api_client_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    /// Isolated recorder so tests don't fight over the global one.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_refresh("success");
        record_refresh_joined();
        record_request("GET", "200");
    }

    #[test]
    fn refresh_outcomes_are_labelled() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_refresh("success");
        record_refresh("failure");
        record_refresh_joined();
        record_refresh_joined();

        let output = handle.render();
        assert!(output.contains("api_client_refresh_total"), "got: {output}");
        assert!(output.contains("outcome=\"success\""), "got: {output}");
        assert!(output.contains("outcome=\"failure\""), "got: {output}");
        assert!(
            output.contains("api_client_refresh_joined_total 2"),
            "got: {output}"
        );
    }

    #[test]
    fn requests_carry_method_and_status() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("GET", "200");
        record_request("POST", "network");

        let output = handle.render();
        assert!(output.contains("method=\"GET\""), "got: {output}");
        assert!(output.contains("status=\"200\""), "got: {output}");
        assert!(output.contains("method=\"POST\""), "got: {output}");
        assert!(output.contains("status=\"network\""), "got: {output}");
    }
}
