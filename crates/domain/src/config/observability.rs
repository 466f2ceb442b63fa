//! `[observability]`: server log level and optional span export.

use serde::{Deserialize, Serialize};

/// Logging for `thoughtline serve`.
///
/// Logs are always JSON on stdout. Setting `otlp_endpoint` also ships task
/// and tool spans to a collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Filter directive applied when `RUST_LOG` is unset.
    #[serde(default = "d_log_filter")]
    pub log_filter: String,

    /// OTLP/gRPC collector, e.g. `http://localhost:4317`. Blank means off.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Fraction of traces kept by the exporter.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: d_log_filter(),
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

impl ObservabilityConfig {
    /// The collector to export to, if span export is switched on.
    pub fn export_endpoint(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
    }

    /// `sample_rate` forced into `0.0..=1.0`; NaN keeps everything.
    pub fn sampler_ratio(&self) -> f64 {
        if self.sample_rate.is_nan() {
            return 1.0;
        }
        self.sample_rate.clamp(0.0, 1.0)
    }

    pub fn sample_rate_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.sample_rate)
    }
}

fn d_log_filter() -> String {
    "info,tl_gateway=debug".into()
}

fn d_service_name() -> String {
    "thoughtline".into()
}

fn d_sample_rate() -> f64 {
    1.0
}
