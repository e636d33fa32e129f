//! Heap accounting and the garbage-collector hook for the VM.
//!
//! The VM owns all values through Rust ownership, so nothing is ever
//! manually freed; what this module provides is the *accounting model* the
//! VM reports to hosts. Every value pushed or stored charges its
//! approximate size against a fixed budget. When usage crosses the
//! configurable soft threshold the VM runs a collection: it recomputes
//! usage from the values actually reachable from the operand stack, call
//! frames, and globals, which reconciles the counter with live data and
//! credits back everything Rust has already dropped.
//!
//! Reported counters always satisfy `used + free <= total`, and `gc_runs` /
//! `gc_time` only ever grow.

use std::time::Duration;

use crate::value::Value;

/// Default heap budget: 1 MiB.
pub const DEFAULT_MEMORY_SIZE: usize = 1 << 20;

/// Default soft GC threshold: a quarter of the default budget.
pub const DEFAULT_GC_THRESHOLD: usize = DEFAULT_MEMORY_SIZE / 4;

/// A point-in-time snapshot of the VM's memory counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_memory: usize,
    pub used_memory: usize,
    pub free_memory: usize,
    pub gc_runs: u64,
    pub gc_time: Duration,
}

/// The VM's memory bookkeeper.
#[derive(Debug, Clone)]
pub struct MemoryManager {
    total: usize,
    used: usize,
    threshold: usize,
    gc_runs: u64,
    gc_time: Duration,
}

impl MemoryManager {
    pub fn new(total: usize, threshold: usize) -> Self {
        Self {
            // The budget is never zero; a zero-size heap would make every
            // counter meaningless.
            total: total.max(1),
            used: 0,
            threshold,
            gc_runs: 0,
            gc_time: Duration::ZERO,
        }
    }

    /// Account for a newly materialized value.
    pub fn charge(&mut self, value: &Value) {
        self.used = self.used.saturating_add(value_size(value));
    }

    /// Whether usage has crossed the soft threshold and a collection
    /// should run.
    pub fn should_collect(&self) -> bool {
        self.used > self.threshold
    }

    /// Record a collection: `live_bytes` is the recomputed size of all
    /// values still reachable from the VM's roots.
    pub fn collect(&mut self, live_bytes: usize, elapsed: Duration) {
        self.used = live_bytes.min(self.total);
        self.gc_runs += 1;
        self.gc_time += elapsed;
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_memory: self.total,
            used_memory: self.used.min(self.total),
            free_memory: self.total.saturating_sub(self.used),
            gc_runs: self.gc_runs,
            gc_time: self.gc_time,
        }
    }

    /// Zero the usage counter (after a VM reset). Collection counters are
    /// cumulative and survive.
    pub fn reset_usage(&mut self) {
        self.used = 0;
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE, DEFAULT_GC_THRESHOLD)
    }
}

/// Approximate heap footprint of a value, in bytes.
///
/// Scalars are charged at the size of the tagged enum; strings add their
/// UTF-8 payload; function references add their name and parameter names.
pub fn value_size(value: &Value) -> usize {
    const BASE: usize = std::mem::size_of::<Value>();
    match value {
        Value::Number(_) | Value::Bool(_) | Value::Undefined => BASE,
        Value::Str(s) => BASE + s.len(),
        Value::Function(f) => {
            BASE + f.name.len() + f.params.iter().map(|p| p.len() + 24).sum::<usize>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_sane() {
        let memory = MemoryManager::default();
        let stats = memory.stats();
        assert!(stats.total_memory > 0);
        assert_eq!(stats.used_memory, 0);
        assert_eq!(stats.free_memory, stats.total_memory);
        assert_eq!(stats.gc_runs, 0);
    }

    #[test]
    fn charging_and_collecting_keeps_invariants() {
        let mut memory = MemoryManager::new(1024, 64);
        for _ in 0..10 {
            memory.charge(&Value::Str("x".repeat(20)));
        }
        assert!(memory.should_collect());

        memory.collect(100, Duration::from_micros(5));
        let stats = memory.stats();
        assert_eq!(stats.used_memory, 100);
        assert_eq!(stats.gc_runs, 1);
        assert!(stats.gc_time >= Duration::from_micros(5));
        assert!(stats.used_memory + stats.free_memory <= stats.total_memory);
    }

    #[test]
    fn usage_never_exceeds_total_in_stats() {
        let mut memory = MemoryManager::new(64, 16);
        memory.charge(&Value::Str("y".repeat(500)));
        let stats = memory.stats();
        assert!(stats.used_memory <= stats.total_memory);
        assert_eq!(stats.free_memory, 0);
    }

    #[test]
    fn strings_cost_more_than_numbers() {
        assert!(value_size(&Value::Str("hello".into())) > value_size(&Value::Number(1.0)));
    }
}
