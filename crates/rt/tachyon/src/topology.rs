//! CPU topology description and container awareness.
//!
//! Topology discovery itself is an external collaborator: callers hand the
//! executor a [`Topology`] (a flat list of cache groups), or let
//! [`Topology::detect`] build the minimal single-group description from the
//! logical processor count. Container CPU quotas (cgroup v1/v2) clamp the
//! derived worker count.

use std::fmt;
use std::sync::Arc;

/// Classification of the cores in a cache group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuKind {
    /// Performance cores.
    Performance,
    /// First efficiency tier.
    Efficiency1,
    /// Second efficiency tier.
    Efficiency2,
    /// Unclassified; matches any filter.
    All,
}

impl CpuKind {
    /// Returns `true` if cores of this kind satisfy `filter`.
    pub fn matches(self, filter: CpuKind) -> bool {
        matches!(filter, CpuKind::All) || matches!(self, CpuKind::All) || self == filter
    }
}

/// One cache group: a set of cores that share a cache level.
#[derive(Debug, Clone)]
pub struct CacheGroup {
    /// What kind of cores this group holds.
    pub kind: CpuKind,
    /// SMT ways per core (1 = no SMT).
    pub smt_level: u8,
    /// Logical processor indices belonging to the group.
    pub cores: Vec<usize>,
}

/// A flattened description of the machine's cache-group tree.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Cache groups, outermost order preserved.
    pub groups: Vec<CacheGroup>,
    /// Container CPU quota in whole cores, if one applies.
    pub quota: Option<usize>,
}

impl Topology {
    /// A single group of `n` unclassified cores.
    pub fn single_group(n: usize) -> Self {
        Self {
            groups: vec![CacheGroup {
                kind: CpuKind::All,
                smt_level: 1,
                cores: (0..n.max(1)).collect(),
            }],
            quota: None,
        }
    }

    /// Minimal detection: one group containing every logical processor,
    /// plus the container quota if the environment defines one.
    pub fn detect() -> Self {
        let n = std::thread::available_parallelism().map_or(1, std::num::NonZero::get);
        let mut topo = Self::single_group(n);
        topo.quota = container_quota();
        topo
    }

    /// Total logical processors across all groups.
    pub fn total_cores(&self) -> usize {
        self.groups.iter().map(|g| g.cores.len()).sum()
    }

    /// Worker count derived from the topology: cores scaled by `occupancy`,
    /// clamped by the container quota, never zero.
    pub fn recommended_workers(&self, occupancy: f64) -> usize {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = (self.total_cores() as f64 * occupancy).ceil() as usize;
        let quota_capped = match self.quota {
            Some(q) => scaled.min(q.max(1)),
            None => scaled,
        };
        quota_capped.max(1)
    }

    /// Assigns `workers` worker slots to cache groups.
    ///
    /// `Dense` fills each group's cores before moving on; `Spread`
    /// round-robins across groups. Returns one group index per worker.
    pub(crate) fn assign_groups(&self, workers: usize, packing: PackingStrategy) -> Vec<usize> {
        let mut out = Vec::with_capacity(workers);
        match packing {
            PackingStrategy::Dense => {
                let mut seq: Vec<usize> = Vec::new();
                for (gi, g) in self.groups.iter().enumerate() {
                    seq.extend(std::iter::repeat_n(gi, g.cores.len().max(1)));
                }
                for w in 0..workers {
                    out.push(seq[w % seq.len()]);
                }
            }
            PackingStrategy::Spread => {
                let count = self.groups.len().max(1);
                for w in 0..workers {
                    out.push(w % count);
                }
            }
        }
        out
    }
}

/// How worker threads are distributed across cache groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackingStrategy {
    /// Fill each cache group before starting the next.
    #[default]
    Dense,
    /// Round-robin workers across cache groups.
    Spread,
}

/// How tightly worker threads are bound to the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinningLevel {
    /// No pinning; the pin callback is never invoked.
    #[default]
    Off,
    /// Pin each worker to its cache group.
    Group,
    /// Pin each worker to a single core.
    Core,
}

/// Identity handed to thread hooks and the pin callback.
#[derive(Debug, Clone, Copy)]
pub struct ThreadInfo {
    /// Worker index within the executor.
    pub index: usize,
    /// Cache group the worker was assigned to.
    pub group: usize,
    /// Kind of the assigned group's cores.
    pub kind: CpuKind,
    /// SMT level of the assigned group.
    pub smt_level: u8,
    /// Requested pinning tightness.
    pub pinning: PinningLevel,
}

impl fmt::Display for ThreadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {} (group {}, {:?})", self.index, self.group, self.kind)
    }
}

/// Callback binding the calling thread's affinity per the [`ThreadInfo`].
pub type PinFn = Arc<dyn Fn(&ThreadInfo) + Send + Sync>;

/// Worker thread lifecycle hook.
pub type ThreadHook = Arc<dyn Fn(&ThreadInfo) + Send + Sync>;

// ---------------------------------------------------------------------------
// Container quota
// ---------------------------------------------------------------------------

/// Reads the container CPU quota, preferring cgroup v2, then v1, then a
/// cpuset mask. Returns whole cores (rounded up).
fn container_quota() -> Option<usize> {
    if let Ok(s) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        if let Some(q) = parse_cpu_max(&s) {
            return Some(q);
        }
    }
    let quota = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us").ok();
    let period = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us").ok();
    if let (Some(q), Some(p)) = (quota, period) {
        if let Some(n) = parse_cfs(&q, &p) {
            return Some(n);
        }
    }
    for path in [
        "/sys/fs/cgroup/cpuset.cpus.effective",
        "/sys/fs/cgroup/cpuset/cpuset.cpus",
    ] {
        if let Ok(s) = std::fs::read_to_string(path) {
            if let Some(n) = parse_cpuset_count(&s) {
                return Some(n);
            }
        }
    }
    None
}

/// Parses a cgroup v2 `cpu.max` file: `"<quota> <period>"` or `"max <period>"`.
fn parse_cpu_max(s: &str) -> Option<usize> {
    let mut parts = s.split_whitespace();
    let quota = parts.next()?;
    let period: u64 = parts.next()?.parse().ok()?;
    if quota == "max" || period == 0 {
        return None;
    }
    let quota: u64 = quota.parse().ok()?;
    #[allow(clippy::cast_possible_truncation)]
    let cores = quota.div_ceil(period).max(1) as usize;
    Some(cores)
}

/// Parses cgroup v1 `cpu.cfs_quota_us` / `cpu.cfs_period_us` contents.
fn parse_cfs(quota: &str, period: &str) -> Option<usize> {
    let quota: i64 = quota.trim().parse().ok()?;
    let period: i64 = period.trim().parse().ok()?;
    if quota <= 0 || period <= 0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let cores = (quota as u64).div_ceil(period as u64).max(1) as usize;
    Some(cores)
}

/// Counts processors in a cpuset list: `"0-3,8,10-11"`.
fn parse_cpuset_count(s: &str) -> Option<usize> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let mut count = 0usize;
    for part in s.split(',') {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().ok()?;
                let hi: usize = hi.trim().parse().ok()?;
                if hi < lo {
                    return None;
                }
                count += hi - lo + 1;
            }
            None => {
                let _: usize = part.trim().parse().ok()?;
                count += 1;
            }
        }
    }
    Some(count)
}
