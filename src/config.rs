//! Plain configuration data — no file/env loading, which spec.md §1 explicitly places outside
//! this core's scope. Generalizes
//! `examples/original_source/coop/cooperator_configuration.h` and
//! `coop/io/uring_configuration.h`, keeping their numeric defaults.

/// Per-spawn configuration (`examples/original_source/coop/spawn_configuration.h`).
#[derive(Clone)]
pub struct SpawnConfiguration {
    pub priority: u32,
    pub stack_size: usize,
    pub name: Option<Box<str>>,
}

impl Default for SpawnConfiguration {
    fn default() -> Self {
        Self { priority: 1, stack_size: crate::stack::MIN_STACK, name: None }
    }
}

/// io_uring ring sizing, mirroring `UringConfiguration`'s `entries`/`registered_slots`.
#[derive(Clone, Copy)]
pub struct RingConfig {
    pub entries: u32,
    pub registered_slots: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { entries: 64, registered_slots: 64 }
    }
}

/// Top-level cooperator configuration.
#[derive(Clone)]
pub struct CooperatorConfig {
    pub name: Box<str>,
    pub ring: RingConfig,
    pub ticker_resolution: u32,
    pub ticker_buckets: usize,
    pub default_stack_size: usize,
    pub submission_queue_depth: usize,
}

impl Default for CooperatorConfig {
    fn default() -> Self {
        Self {
            name: "cooperator".into(),
            ring: RingConfig::default(),
            ticker_resolution: 3,
            ticker_buckets: 32,
            default_stack_size: crate::stack::MIN_STACK,
            submission_queue_depth: 8,
        }
    }
}
