// SPDX-FileCopyrightText: 2026 Kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric names and recording helpers.
//!
//! All kiln metric series are named here so the rest of the workspace
//! never spells a metric name inline. Helpers take plain strings and
//! numbers; callers pass enum values through `Display`.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Register descriptions for all kiln metrics.
///
/// Called once after the recorder is installed so the rendered output
/// carries HELP text.
pub fn register_metrics() {
    describe_counter!(
        "kiln_allocations_total",
        "Allocation requests by outcome (reused, allocated, exhausted)"
    );
    describe_counter!(
        "kiln_events_total",
        "Delivery events ingested, labelled by event type"
    );
    describe_counter!(
        "kiln_rotations_total",
        "Identities rotated out of service, labelled by trigger"
    );
    describe_counter!(
        "kiln_warmup_steps_total",
        "Warm-up schedule steps applied (advanced, completed)"
    );
    describe_gauge!(
        "kiln_pool_identities",
        "Identities in the pool by lifecycle state"
    );
    describe_gauge!(
        "kiln_pool_available",
        "Warm identities currently claimable"
    );
    describe_gauge!("kiln_pool_assigned", "Identities held by a campaign");
    describe_gauge!(
        "kiln_followups_pending",
        "Rotation follow-ups waiting for a worker"
    );
    describe_histogram!(
        "kiln_allocation_latency_seconds",
        "Time to satisfy an allocation request"
    );
    describe_histogram!(
        "kiln_maintenance_job_seconds",
        "Wall time of one maintenance job run, labelled by job"
    );
}

/// Record an allocation attempt and its outcome.
pub fn record_allocation(outcome: &str) {
    counter!("kiln_allocations_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record one ingested delivery event.
pub fn record_event(event: &str) {
    counter!("kiln_events_total", "event" => event.to_string()).increment(1);
}

/// Record an identity rotation and the trigger behind it.
pub fn record_rotation(reason: &str) {
    counter!("kiln_rotations_total", "reason" => reason.to_string()).increment(1);
}

/// Record the steps applied by one warm-up sweep.
pub fn record_warmup_steps(advanced: u64, completed: u64) {
    if advanced > 0 {
        counter!("kiln_warmup_steps_total", "kind" => "advanced").increment(advanced);
    }
    if completed > 0 {
        counter!("kiln_warmup_steps_total", "kind" => "completed").increment(completed);
    }
}

/// Set the identity count for one lifecycle state.
pub fn set_pool_state(state: &str, count: f64) {
    gauge!("kiln_pool_identities", "state" => state.to_string()).set(count);
}

/// Set the count of claimable warm identities.
pub fn set_pool_available(count: f64) {
    gauge!("kiln_pool_available").set(count);
}

/// Set the count of campaign-held identities.
pub fn set_pool_assigned(count: f64) {
    gauge!("kiln_pool_assigned").set(count);
}

/// Set the pending rotation follow-up backlog.
pub fn set_followup_backlog(count: f64) {
    gauge!("kiln_followups_pending").set(count);
}

/// Record how long one allocation request took.
pub fn record_allocation_latency(seconds: f64) {
    histogram!("kiln_allocation_latency_seconds").record(seconds);
}

/// Record the wall time of one maintenance job run.
pub fn record_job_duration(job: &'static str, seconds: f64) {
    histogram!("kiln_maintenance_job_seconds", "job" => job).record(seconds);
}
