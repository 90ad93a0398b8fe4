//! Work-stealing topology matrices.
//!
//! The steal matrix is computed once at executor startup: row `w` is worker
//! `w`'s preferred order for probing other workers' queues. The wake matrix
//! is its inverse: row `w` ranks the workers a submitter at `w` should try
//! to wake first (those that would steal from `w` soonest).
//!
//! Invariants relied on by the scheduler and checked by the tests:
//! every row is a permutation of `0..width`, and `row[w][0] == w`.

/// Which order idle workers probe victims in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StealStrategy {
    /// All workers are equally close; rows are rotations so no two sources
    /// share a preference order.
    #[default]
    Lattice,
    /// Prefer victims in the same cache group, then widen outward.
    Hierarchy,
}

/// Precomputed steal and wake orders, both `width * width`, row-major.
pub(crate) struct StealMatrix {
    width: usize,
    steal: Box<[usize]>,
    wake: Box<[usize]>,
}

impl StealMatrix {
    /// Builds the matrices for workers whose cache-group assignment is
    /// `groups_of[w]`.
    pub(crate) fn build(groups_of: &[usize], strategy: StealStrategy) -> Self {
        let width = groups_of.len();
        let mut steal = Vec::with_capacity(width * width);
        for src in 0..width {
            match strategy {
                StealStrategy::Lattice => lattice_row(src, width, &mut steal),
                StealStrategy::Hierarchy => hierarchy_row(src, groups_of, &mut steal),
            }
        }
        let wake = transpose(&steal, width);
        Self {
            width,
            steal: steal.into_boxed_slice(),
            wake: wake.into_boxed_slice(),
        }
    }

    /// Matrix width (the worker count).
    pub(crate) fn width(&self) -> usize {
        self.width
    }

    /// Worker `w`'s victim probing order. `row[0] == w`.
    pub(crate) fn steal_row(&self, w: usize) -> &[usize] {
        &self.steal[w * self.width..(w + 1) * self.width]
    }

    /// Worker `w`'s wake fan-out order. `row[0] == w`.
    pub(crate) fn wake_row(&self, w: usize) -> &[usize] {
        &self.wake[w * self.width..(w + 1) * self.width]
    }
}

/// Ring rotation: `src, src+1, ..., wrap`. Distinct per source.
fn lattice_row(src: usize, width: usize, out: &mut Vec<usize>) {
    for i in 0..width {
        out.push((src + i) % width);
    }
}

/// Same group first (rotated within the group), then the remaining groups
/// in ring order starting after the source's group.
fn hierarchy_row(src: usize, groups_of: &[usize], out: &mut Vec<usize>) {
    let width = groups_of.len();
    let my_group = groups_of[src];
    let group_count = groups_of.iter().copied().max().unwrap_or(0) + 1;

    out.push(src);

    // Members of each group, in worker order.
    let members = |g: usize| groups_of.iter().enumerate().filter(move |(_, gg)| **gg == g);

    // Same-group peers, starting after src and wrapping.
    let peers: Vec<usize> = members(my_group).map(|(w, _)| w).collect();
    if let Some(pos) = peers.iter().position(|&w| w == src) {
        for i in 1..peers.len() {
            out.push(peers[(pos + i) % peers.len()]);
        }
    }

    // Remaining groups in ring order; rotate members by src for tie-breaking.
    for gi in 1..group_count {
        let g = (my_group + gi) % group_count;
        let ws: Vec<usize> = members(g).map(|(w, _)| w).collect();
        if ws.is_empty() {
            continue;
        }
        for i in 0..ws.len() {
            out.push(ws[(src + i) % ws.len()]);
        }
    }

    debug_assert_eq!(out.len() % width, 0);
}

/// Derives the wake matrix: row `i` starts with `i`, then ranks the other
/// workers by how early they would probe `i` when stealing.
fn transpose(steal: &[usize], width: usize) -> Vec<usize> {
    let mut wake = Vec::with_capacity(width * width);
    for i in 0..width {
        wake.push(i);
        let mut others: Vec<usize> = (0..width).filter(|&j| j != i).collect();
        others.sort_by_key(|&j| {
            steal[j * width..(j + 1) * width]
                .iter()
                .position(|&v| v == i)
                .unwrap_or(width)
        });
        wake.extend(others);
    }
    wake
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_is_permutation(row: &[usize], width: usize) {
        let mut seen = vec![false; width];
        for &v in row {
            assert!(v < width, "index out of range");
            assert!(!seen[v], "duplicate index {v} in row {row:?}");
            seen[v] = true;
        }
        assert!(seen.iter().all(|&s| s), "row {row:?} is not a permutation");
    }

    fn check_invariants(m: &StealMatrix) {
        let w = m.width();
        for i in 0..w {
            assert_eq!(m.steal_row(i)[0], i, "each worker probes itself first");
            assert_eq!(m.wake_row(i)[0], i);
            assert_is_permutation(m.steal_row(i), w);
            assert_is_permutation(m.wake_row(i), w);
        }
        // Column 0 is the identity and therefore a permutation.
        let col0: Vec<usize> = (0..w).map(|i| m.steal_row(i)[0]).collect();
        assert_eq!(col0, (0..w).collect::<Vec<_>>());
    }

    #[test]
    fn lattice_invariants_hold_for_all_widths() {
        for width in 1..=9 {
            let groups = vec![0; width];
            let m = StealMatrix::build(&groups, StealStrategy::Lattice);
            check_invariants(&m);
        }
    }

    #[test]
    fn hierarchy_invariants_hold_for_mixed_groups() {
        let layouts: &[&[usize]] = &[
            &[0],
            &[0, 0, 0, 0],
            &[0, 0, 1, 1],
            &[0, 1, 2, 0, 1, 2],
            &[0, 0, 0, 1, 2, 2, 1, 0],
        ];
        for groups in layouts {
            let m = StealMatrix::build(groups, StealStrategy::Hierarchy);
            check_invariants(&m);
        }
    }

    #[test]
    fn lattice_rows_are_distinct() {
        let groups = vec![0; 6];
        let m = StealMatrix::build(&groups, StealStrategy::Lattice);
        for i in 0..6 {
            for j in (i + 1)..6 {
                assert_ne!(
                    m.steal_row(i),
                    m.steal_row(j),
                    "two sources share a preference order"
                );
            }
        }
    }

    #[test]
    fn lattice_is_a_rotation() {
        let m = StealMatrix::build(&[0, 0, 0, 0], StealStrategy::Lattice);
        assert_eq!(m.steal_row(0), &[0, 1, 2, 3]);
        assert_eq!(m.steal_row(2), &[2, 3, 0, 1]);
    }

    #[test]
    fn hierarchy_prefers_same_group() {
        // Workers 0,1 in group 0; workers 2,3 in group 1.
        let m = StealMatrix::build(&[0, 0, 1, 1], StealStrategy::Hierarchy);
        // Worker 0 probes its group peer before the other group.
        assert_eq!(m.steal_row(0)[0], 0);
        assert_eq!(m.steal_row(0)[1], 1);
        assert_eq!(m.steal_row(3)[0], 3);
        assert_eq!(m.steal_row(3)[1], 2);
    }

    #[test]
    fn wake_matrix_ranks_eager_stealers_first() {
        let m = StealMatrix::build(&[0, 0, 0, 0], StealStrategy::Lattice);
        // Lattice row j probes (j+1) second, so the best worker to wake from
        // source i is (i-1): it would find i's work on its first probe.
        assert_eq!(m.wake_row(0)[1], 3);
        assert_eq!(m.wake_row(2)[1], 1);
    }

    #[test]
    fn single_worker_matrices() {
        let m = StealMatrix::build(&[0], StealStrategy::Lattice);
        assert_eq!(m.steal_row(0), &[0]);
        assert_eq!(m.wake_row(0), &[0]);
    }
}
