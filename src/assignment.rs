use crate::error::{TrackError, TrackResult};
use crate::my_types::*;

/// (row, column) pairs
pub type Assignment = Vec<(usize, usize)>;

/// Minimum-cost perfect matching over a square, non-negative cost matrix.
///
/// Implementations must be deterministic: the same matrix always yields the
/// same pairs.
pub trait AssignmentSolver: Send {
    fn solve(&self, cost: &Matrixd) -> TrackResult<Assignment>;
}

/// True when every row and every column of an `n` x `n` problem appears in
/// exactly one pair.
pub fn is_perfect_matching(assignment: &[(usize, usize)], n: usize) -> bool {
    if assignment.len() != n {
        return false;
    }
    let mut row_seen = vec![false; n];
    let mut col_seen = vec![false; n];
    for &(i, j) in assignment {
        if i >= n || j >= n || row_seen[i] || col_seen[j] {
            return false;
        }
        row_seen[i] = true;
        col_seen[j] = true;
    }
    true
}

/// Cells at `f64::MAX` or above mean "never pair these unless forced"
fn is_saturated(c: f64) -> bool {
    c >= f64::MAX
}

/// Kuhn-Munkres with row and column potentials, O(n^3).
///
/// Saturated cells are replaced by a finite penalty larger than the sum of
/// all other cells. The solver therefore maximizes the number of
/// unsaturated pairs first and minimizes their total cost second, and the
/// potentials never mix `f64::MAX` with small distances.
///
/// ref https://cp-algorithms.com/graph/hungarian-algorithm.html
#[derive(Clone, Copy, Debug, Default)]
pub struct HungarianSolver;

impl HungarianSolver {
    pub fn new() -> Self {
        HungarianSolver
    }
}

impl AssignmentSolver for HungarianSolver {
    fn solve(&self, cost: &Matrixd) -> TrackResult<Assignment> {
        let n = cost.nrows();
        if cost.ncols() != n {
            return Err(TrackError::Precondition(format!(
                "cost matrix must be square, got {} x {}",
                cost.nrows(),
                cost.ncols()
            )));
        }
        if let Some(c) = cost.iter().find(|c| c.is_nan() || **c < 0.) {
            return Err(TrackError::Precondition(format!(
                "cost matrix contains invalid cost {}",
                c
            )));
        }
        if n == 0 {
            return Ok(vec![]);
        }

        let unsaturated = || cost.iter().cloned().filter(|c| !is_saturated(*c));
        // costs too large to add up are rescaled to [0, 1], the optimal pairs stay the same
        let scale = match unsaturated().sum::<f64>() {
            sum if sum.is_finite() => 1.,
            _ => unsaturated().fold(0., f64::max),
        };
        let penalty = unsaturated().map(|c| c / scale).sum::<f64>() + 1.;
        let a = |i: usize, j: usize| {
            let c = cost[(i, j)];
            if is_saturated(c) {
                penalty
            } else {
                c / scale
            }
        };

        // 1-based, index 0 is the virtual start column
        let mut u = vec![0.; n + 1];
        let mut v = vec![0.; n + 1];
        let mut p = vec![0_usize; n + 1];
        let mut way = vec![0_usize; n + 1];

        for i in 1..=n {
            p[0] = i;
            let mut j0 = 0;
            let mut minv = vec![f64::INFINITY; n + 1];
            let mut used = vec![false; n + 1];
            loop {
                used[j0] = true;
                let i0 = p[j0];
                let mut delta = f64::INFINITY;
                let mut j1 = 0;
                for j in 1..=n {
                    if used[j] {
                        continue;
                    }
                    let cur = a(i0 - 1, j - 1) - u[i0] - v[j];
                    if cur < minv[j] {
                        minv[j] = cur;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
                for j in 0..=n {
                    if used[j] {
                        u[p[j]] += delta;
                        v[j] -= delta;
                    } else {
                        minv[j] -= delta;
                    }
                }
                j0 = j1;
                if p[j0] == 0 {
                    break;
                }
            }
            // flip the augmenting path
            loop {
                let j1 = way[j0];
                p[j0] = p[j1];
                j0 = j1;
                if j0 == 0 {
                    break;
                }
            }
        }

        let mut assignment: Assignment = (1..=n).map(|j| (p[j] - 1, j - 1)).collect();
        assignment.sort_unstable();
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra as na;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn total(cost: &Matrixd, assignment: &[(usize, usize)]) -> f64 {
        assignment.iter().map(|&(i, j)| cost[(i, j)]).sum()
    }

    fn brute_force(cost: &Matrixd) -> f64 {
        fn permute(cost: &Matrixd, row: usize, used: &mut Vec<bool>, acc: f64, best: &mut f64) {
            let n = cost.nrows();
            if row == n {
                *best = best.min(acc);
                return;
            }
            for j in 0..n {
                if !used[j] {
                    used[j] = true;
                    permute(cost, row + 1, used, acc + cost[(row, j)], best);
                    used[j] = false;
                }
            }
        }
        let mut best = f64::INFINITY;
        permute(cost, 0, &mut vec![false; cost.nrows()], 0., &mut best);
        best
    }

    #[test]
    fn test_small_problem() {
        let cost = na::dmatrix!(
            4., 1., 3.;
            2., 0., 5.;
            3., 2., 2.;
        );
        let assignment = HungarianSolver::new().solve(&cost).unwrap();
        assert_eq!(assignment, vec![(0, 1), (1, 0), (2, 2)]);
        assert_eq!(total(&cost, &assignment), 5.);
    }

    #[test]
    fn test_empty_problem() {
        let assignment = HungarianSolver::new().solve(&Matrixd::zeros(0, 0)).unwrap();
        assert!(assignment.is_empty());
        assert!(is_perfect_matching(&assignment, 0));
    }

    #[test]
    fn test_rejects_malformed_matrices() {
        let solver = HungarianSolver::new();
        assert!(matches!(
            solver.solve(&Matrixd::zeros(2, 3)),
            Err(TrackError::Precondition(_))
        ));
        assert!(matches!(
            solver.solve(&na::dmatrix!(1., -1.; 0., 0.)),
            Err(TrackError::Precondition(_))
        ));
        assert!(matches!(
            solver.solve(&na::dmatrix!(1., f64::NAN; 0., 0.)),
            Err(TrackError::Precondition(_))
        ));
    }

    #[test]
    fn test_saturated_cells_are_avoided_when_possible() {
        // pairing (0, 0) would force the saturated (1, 1) cell
        let cost = na::dmatrix!(
            0., 5.;
            5., f64::MAX;
        );
        let assignment = HungarianSolver::new().solve(&cost).unwrap();
        assert_eq!(assignment, vec![(0, 1), (1, 0)]);

        let padded = na::dmatrix!(
            3., f64::MAX, f64::MAX;
            f64::MAX, f64::MAX, f64::MAX;
            f64::MAX, f64::MAX, f64::MAX;
        );
        let assignment = HungarianSolver::new().solve(&padded).unwrap();
        assert!(is_perfect_matching(&assignment, 3));
        assert_eq!(assignment[0], (0, 0));
    }

    #[test]
    fn test_huge_costs_still_pair_real_cells() {
        // the unsaturated cells add up past f64::MAX
        let cost = na::dmatrix!(
            1e308, 1.5e308, f64::MAX;
            1.5e308, 1e308, f64::MAX;
            f64::MAX, f64::MAX, f64::MAX;
        );
        let assignment = HungarianSolver::new().solve(&cost).unwrap();
        assert_eq!(assignment, vec![(0, 0), (1, 1), (2, 2)]);

        let cost = na::dmatrix!(
            1e308, f64::MAX;
            1e308, f64::MAX;
        );
        let assignment = HungarianSolver::new().solve(&cost).unwrap();
        assert!(is_perfect_matching(&assignment, 2));
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let solver = HungarianSolver::new();
        for _ in 0..200 {
            let n = rng.gen_range(1..=6);
            let cost = Matrixd::from_fn(n, n, |_, _| rng.gen_range(0.0..100.0));
            let assignment = solver.solve(&cost).unwrap();
            assert!(is_perfect_matching(&assignment, n));
            assert!((total(&cost, &assignment) - brute_force(&cost)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_deterministic_ties() {
        let cost = Matrixd::repeat(4, 4, 1.);
        let solver = HungarianSolver::new();
        let first = solver.solve(&cost).unwrap();
        assert!(is_perfect_matching(&first, 4));
        for _ in 0..5 {
            assert_eq!(solver.solve(&cost).unwrap(), first);
        }
    }

    #[test]
    fn test_is_perfect_matching() {
        assert!(is_perfect_matching(&[(0, 1), (1, 0)], 2));
        assert!(!is_perfect_matching(&[(0, 1)], 2));
        assert!(!is_perfect_matching(&[(0, 1), (1, 1)], 2));
        assert!(!is_perfect_matching(&[(0, 0), (0, 1)], 2));
        assert!(!is_perfect_matching(&[(0, 0), (1, 2)], 2));
    }
}
