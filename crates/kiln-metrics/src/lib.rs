// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics for the kiln identity pool.
//!
//! Uses the metrics-rs facade with the Prometheus exporter. The recording
//! helpers in [`recording`] are no-ops until a recorder is installed, so
//! service crates call them unconditionally and only the `serve` binary
//! pays for collection. Collected series are rendered in Prometheus text
//! format via [`PrometheusExporter::render`], exposed through the
//! gateway's `/metrics` endpoint.

pub mod recording;

use kiln_core::error::{KilnError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub use recording::{
    record_allocation, record_allocation_latency, record_event, record_job_duration,
    record_rotation, record_warmup_steps, set_followup_backlog, set_pool_assigned,
    set_pool_available, set_pool_state,
};

/// Process-global Prometheus recorder.
///
/// Only one recorder can be installed per process; a second install
/// returns an error.
pub struct PrometheusExporter {
    handle: PrometheusHandle,
}

impl PrometheusExporter {
    /// Install the Prometheus recorder globally and register the kiln
    /// metric descriptions.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            KilnError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        recording::register_metrics();

        tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    /// Get a reference to the Prometheus handle for rendering.
    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
