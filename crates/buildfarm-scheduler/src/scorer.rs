//! Job scoring.
//!
//! A job's score is the sum of urgency, component, queue-age, dependency
//! and archive contributions. Higher scores dispatch first. Manually scored
//! jobs keep whatever score an operator gave them.

use buildfarm_core::{Archive, Build, Component, Job, Urgency};
use chrono::{DateTime, Utc};

/// Age bonuses, checked from the longest wait down. The first threshold the
/// wait reaches wins.
const AGE_BONUSES: [(i64, i64); 6] = [
    (14400, 100),
    (7200, 50),
    (3600, 20),
    (1800, 15),
    (900, 10),
    (300, 5),
];

pub fn urgency_weight(urgency: Urgency) -> i64 {
    match urgency {
        Urgency::Low => 5,
        Urgency::Medium => 10,
        Urgency::High => 15,
        Urgency::Emergency => 20,
    }
}

pub fn component_weight(component: Component) -> i64 {
    match component {
        Component::Main => 1000,
        Component::Restricted => 750,
        Component::Universe => 250,
        Component::Multiverse => 0,
    }
}

/// Bonus for having waited `waited_secs` in the queue.
pub fn age_bonus(waited_secs: i64) -> i64 {
    AGE_BONUSES
        .iter()
        .find(|(threshold, _)| waited_secs >= *threshold)
        .map(|(_, bonus)| *bonus)
        .unwrap_or(0)
}

/// Compute the score of `job` without touching it.
///
/// The result may be negative: many satisfied dependencies in a multiverse
/// upload outweigh the other terms.
pub fn compute_score(
    job: &Job,
    build: &Build,
    archive: &Archive,
    dependency_delta: i64,
    now: DateTime<Utc>,
) -> i64 {
    urgency_weight(build.urgency)
        + component_weight(build.component)
        + age_bonus(job.waited_secs(now))
        + dependency_delta
        + archive.relative_build_score
}

/// Rescore `job` in place and return its score. Manual jobs are left alone.
pub fn rescore(
    job: &mut Job,
    build: &Build,
    archive: &Archive,
    dependency_delta: i64,
    now: DateTime<Utc>,
) -> i64 {
    if !job.manual {
        job.score = compute_score(job, build, archive, dependency_delta, now);
    }
    job.score
}
