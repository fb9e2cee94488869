//! Builder pools, one per processor family.
//!
//! A pool is rebuilt from builder probes at the start of every cycle and
//! records which builders can take work. Builders are kept in name order so
//! that [`BuilderPool::first_available`] is deterministic.

use buildfarm_core::{Builder, BuilderId, JobId, ProcessorFamily};
use std::collections::BTreeMap;

/// What a builder is doing as far as this cycle is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    /// Occupied, running the job when known.
    Busy(Option<JobId>),
    Failed(String),
}

#[derive(Debug, Clone)]
struct Slot {
    builder: Builder,
    state: SlotState,
}

impl Slot {
    fn is_available(&self) -> bool {
        self.state == SlotState::Idle && self.builder.is_schedulable()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuilderPool {
    slots: Vec<Slot>,
}

impl BuilderPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a builder.
    pub fn insert(&mut self, builder: Builder, state: SlotState) {
        self.slots.retain(|s| s.builder.id != builder.id);
        let at = self
            .slots
            .partition_point(|s| s.builder.name < builder.name);
        self.slots.insert(at, Slot { builder, state });
    }

    /// Healthy idle builders, in name order.
    pub fn check_available(&self) -> Vec<&Builder> {
        self.available_all().collect()
    }

    fn available_all(&self) -> impl Iterator<Item = &Builder> {
        self.slots
            .iter()
            .filter(|s| s.is_available())
            .map(|s| &s.builder)
    }

    /// Healthy idle builders whose virtualization matches the job's.
    pub fn available(&self, virtualized: bool) -> impl Iterator<Item = &Builder> {
        self.available_all()
            .filter(move |b| b.virtualized == virtualized)
    }

    pub fn first_available(&self, virtualized: bool) -> Option<&Builder> {
        self.available(virtualized).next()
    }

    pub fn state(&self, id: BuilderId) -> Option<&SlotState> {
        self.slot(id).map(|s| &s.state)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: BuilderId) -> Option<&Slot> {
        self.slots.iter().find(|s| s.builder.id == id)
    }

    fn slot_mut(&mut self, id: BuilderId) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.builder.id == id)
    }
}

/// All pools, keyed by family.
#[derive(Debug, Clone, Default)]
pub struct BuilderPools {
    pools: BTreeMap<ProcessorFamily, BuilderPool>,
}

impl BuilderPools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the pool for `family`, creating an empty one if needed.
    pub fn add_family(&mut self, family: &ProcessorFamily) -> &mut BuilderPool {
        self.pools
            .entry(family.clone())
            .or_insert_with(BuilderPool::new)
    }

    /// Record a probed builder in its family's pool.
    pub fn insert(&mut self, builder: Builder, state: SlotState) {
        let family = builder.family.clone();
        self.add_family(&family).insert(builder, state);
    }

    pub fn families(&self) -> Vec<ProcessorFamily> {
        self.pools.keys().cloned().collect()
    }

    pub fn check_available(&self, family: &ProcessorFamily) -> Vec<&Builder> {
        self.pools
            .get(family)
            .map(|p| p.check_available())
            .unwrap_or_default()
    }

    pub fn first_available(&self, family: &ProcessorFamily, virtualized: bool) -> Option<&Builder> {
        self.pools.get(family)?.first_available(virtualized)
    }

    /// Snapshot of the builders that could take a job right now.
    pub fn available(&self, family: &ProcessorFamily, virtualized: bool) -> Vec<Builder> {
        self.pools
            .get(family)
            .map(|p| p.available(virtualized).cloned().collect())
            .unwrap_or_default()
    }

    /// Take a builder out of service for the rest of the cycle.
    pub fn mark_failed(&mut self, id: BuilderId, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.update(id, |slot| {
            slot.builder.ok = false;
            slot.builder.failure_note = Some(reason.clone());
            slot.state = SlotState::Failed(reason.clone());
        })
    }

    pub fn mark_busy(&mut self, id: BuilderId, job: Option<JobId>) -> bool {
        self.update(id, |slot| slot.state = SlotState::Busy(job))
    }

    /// Return a builder to the idle set.
    pub fn release(&mut self, id: BuilderId) -> bool {
        self.update(id, |slot| slot.state = SlotState::Idle)
    }

    pub fn state(&self, id: BuilderId) -> Option<&SlotState> {
        self.pools.values().find_map(|p| p.state(id))
    }

    fn update(&mut self, id: BuilderId, f: impl Fn(&mut Slot)) -> bool {
        match self.pools.values_mut().find_map(|p| p.slot_mut(id)) {
            Some(slot) => {
                f(slot);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn builder(id: u64, name: &str, family: &str, virtualized: bool) -> Builder {
        Builder {
            id: BuilderId(id),
            name: name.to_string(),
            url: Url::parse(&format!("http://{}:8221/", name)).unwrap(),
            family: family.into(),
            virtualized,
            vm_host: None,
            ok: true,
            failure_note: None,
            manual: false,
            speed_index: 0,
            failure_count: 0,
        }
    }

    fn pools() -> BuilderPools {
        let mut pools = BuilderPools::new();
        pools.insert(builder(3, "charlie", "x86", false), SlotState::Idle);
        pools.insert(builder(1, "alpha", "x86", false), SlotState::Idle);
        pools.insert(builder(2, "bravo", "x86", true), SlotState::Idle);
        pools.insert(builder(4, "delta", "arm64", false), SlotState::Busy(None));
        pools
    }

    #[test]
    fn test_first_available_is_deterministic() {
        let pools = pools();
        let x86 = ProcessorFamily::new("x86");
        assert_eq!(pools.first_available(&x86, false).unwrap().name, "alpha");
        assert_eq!(pools.first_available(&x86, false).unwrap().name, "alpha");
        assert_eq!(pools.first_available(&x86, true).unwrap().name, "bravo");
    }

    #[test]
    fn test_first_available_is_healthy_idle_and_matching() {
        let mut pools = pools();
        let x86 = ProcessorFamily::new("x86");
        pools.mark_failed(BuilderId(1), "connection refused");
        pools.mark_busy(BuilderId(3), Some(JobId(9)));

        assert!(pools.first_available(&x86, false).is_none());
        let b = pools.first_available(&x86, true).unwrap();
        assert!(b.ok && b.virtualized);
        assert_eq!(pools.state(BuilderId(3)), Some(&SlotState::Busy(Some(JobId(9)))));
    }

    #[test]
    fn test_release_returns_builder() {
        let mut pools = pools();
        let x86 = ProcessorFamily::new("x86");
        pools.mark_busy(BuilderId(1), None);
        assert_eq!(pools.first_available(&x86, false).unwrap().name, "charlie");
        pools.release(BuilderId(1));
        assert_eq!(pools.first_available(&x86, false).unwrap().name, "alpha");
    }

    #[test]
    fn test_unknown_family_and_builder() {
        let mut pools = pools();
        let sparc = ProcessorFamily::new("sparc");
        assert!(pools.first_available(&sparc, false).is_none());
        assert!(pools.check_available(&sparc).is_empty());
        assert!(!pools.mark_failed(BuilderId(99), "gone"));
    }

    #[test]
    fn test_busy_family_has_no_candidates() {
        let pools = pools();
        assert!(pools.check_available(&ProcessorFamily::new("arm64")).is_empty());
        assert_eq!(pools.families().len(), 2);
    }

    #[test]
    fn test_manual_builders_never_available() {
        let mut pools = BuilderPools::new();
        let mut b = builder(1, "alpha", "x86", false);
        b.manual = true;
        pools.insert(b, SlotState::Idle);
        assert!(pools.first_available(&ProcessorFamily::new("x86"), false).is_none());
    }

    #[test]
    fn test_reinsert_replaces_slot() {
        let mut pool = BuilderPool::new();
        pool.insert(builder(1, "alpha", "x86", false), SlotState::Busy(None));
        pool.insert(builder(1, "alpha", "x86", false), SlotState::Idle);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.check_available().len(), 1);
    }
}
