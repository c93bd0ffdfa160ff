use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::assignment::{is_perfect_matching, AssignmentSolver, HungarianSolver};
use crate::error::{TrackError, TrackResult};
use crate::mesh::Mesh;
use crate::my_types::*;
use crate::track::{TrackId, TrackingRegistry};

/// Cost of a pairing that must not happen while a real one is possible
pub const SENTINEL_COST: f64 = f64::MAX;

#[derive(Clone, Debug)]
pub struct ReconcileOptions {
    /// Remove tracks absent for more than this many consecutive frames.
    /// `None` keeps them forever.
    pub eviction_threshold: Option<usize>,
    /// Number of past centroids kept per track
    pub history_length: usize,
    /// Log per-frame counts at info level
    pub verbose: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            eviction_threshold: None,
            history_length: 32,
            verbose: false,
        }
    }
}

/// What one reconciliation did to the registry.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// The registry was empty and every detection was adopted as is
    pub bootstrap: bool,
    /// Side of the padded cost matrix, 0 when no matching ran
    pub matrix_size: usize,
    pub updated: Vec<TrackId>,
    pub absent: Vec<TrackId>,
    pub added: Vec<TrackId>,
    pub evicted: Vec<TrackId>,
}

/// Distances between old centroids (rows) and new centroids (columns),
/// padded to a square with [`SENTINEL_COST`]. Real pairs further apart than
/// `max_displacement`, or too far apart for an `f64`, are treated as padding too.
pub fn cost_matrix(old: &[Vector2d], new: &[Vector2d], max_displacement: f64) -> Matrixd {
    let n = usize::max(old.len(), new.len());
    let mut m = Matrixd::repeat(n, n, SENTINEL_COST);
    for (i, c0) in old.iter().enumerate() {
        for (j, c1) in new.iter().enumerate() {
            // hypot does not overflow where squaring would
            let d = (c0.x - c1.x).hypot(c0.y - c1.y);
            if d <= max_displacement {
                m[(i, j)] = d;
            }
        }
    }
    m
}

/// Row/column classification, computed before anything is mutated
#[derive(Debug, Default)]
struct Plan {
    updates: Vec<(usize, usize)>,
    absent: Vec<usize>,
    additions: Vec<usize>,
}

fn classify(assignment: &[(usize, usize)], cost: &Matrixd, n0: usize, n1: usize) -> Plan {
    let mut plan = Plan::default();
    for &(i0, i1) in assignment {
        if i0 >= n0 && i1 >= n1 {
            continue;
        } else if i0 >= n0 {
            plan.additions.push(i1);
        } else if i1 >= n1 {
            plan.absent.push(i0);
        } else if cost[(i0, i1)] >= SENTINEL_COST {
            // forced pairing of two real meshes too far apart
            plan.absent.push(i0);
            plan.additions.push(i1);
        } else {
            plan.updates.push((i0, i1));
        }
    }
    plan.updates.sort_unstable();
    plan.absent.sort_unstable();
    plan.additions.sort_unstable();
    plan
}

/// Matches freshly detected meshes against the tracked ones, frame after frame.
pub struct Reconciler {
    solver: Box<dyn AssignmentSolver>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self::with_solver(Box::new(HungarianSolver::new()), options)
    }

    pub fn with_solver(solver: Box<dyn AssignmentSolver>, options: ReconcileOptions) -> Self {
        Self { solver, options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Continue, suspend or start tracks from this frame's meshes.
    ///
    /// On error the registry is left exactly as it was.
    #[instrument(skip_all, fields(old = registry.len(), new = new_meshes.len()))]
    pub fn reconcile(
        &self,
        registry: &mut TrackingRegistry,
        mut new_meshes: Vec<Mesh>,
        max_displacement: f64,
    ) -> TrackResult<ReconcileReport> {
        if max_displacement.is_nan() || max_displacement < 0. {
            return Err(TrackError::Precondition(format!(
                "max displacement must be non-negative, got {}",
                max_displacement
            )));
        }
        let centroids = new_meshes
            .iter()
            .enumerate()
            .map(|(j, mesh)| match mesh.centroid() {
                Some(c) if c.iter().all(|v| v.is_finite()) => Ok(c),
                Some(_) => Err(TrackError::Precondition(format!(
                    "mesh {} has non-finite coordinates",
                    j
                ))),
                None => Err(TrackError::Precondition(format!("mesh {} is empty", j))),
            })
            .collect::<TrackResult<Vec<Vector2d>>>()?;

        let mut report = ReconcileReport::default();

        if registry.is_empty() {
            report.bootstrap = true;
            report.added = new_meshes
                .into_iter()
                .filter_map(|mesh| registry.insert(mesh))
                .collect();
            self.log_counts(&report);
            return Ok(report);
        }

        let n0 = registry.len();
        let n1 = new_meshes.len();
        let old_centroids: Vec<Vector2d> = registry.iter().map(|t| t.centroid()).collect();
        let cost = cost_matrix(&old_centroids, &centroids, max_displacement);
        report.matrix_size = cost.nrows();
        debug!("[M] {} x {}", cost.nrows(), cost.ncols());

        let assignment = self.solver.solve(&cost)?;
        if !is_perfect_matching(&assignment, cost.nrows()) {
            return Err(TrackError::SolverContract {
                size: cost.nrows(),
                pairs: assignment.len(),
            });
        }
        let plan = classify(&assignment, &cost, n0, n1);

        // nothing below can fail
        let history_length = self.options.history_length;
        for &(i0, i1) in plan.updates.iter() {
            let track = registry.track_mut(i0);
            track.update(std::mem::take(&mut new_meshes[i1]), centroids[i1], history_length);
            report.updated.push(track.id);
        }
        for &i0 in plan.absent.iter() {
            let track = registry.track_mut(i0);
            track.mark_absent();
            report.absent.push(track.id);
        }
        for i0 in 0..n0 {
            registry.track_mut(i0).age += 1;
        }
        for &i1 in plan.additions.iter() {
            if let Some(id) = registry.insert(std::mem::take(&mut new_meshes[i1])) {
                report.added.push(id);
            }
        }
        if let Some(threshold) = self.options.eviction_threshold {
            report.evicted = registry.evict_absent(threshold);
        }

        self.log_counts(&report);
        Ok(report)
    }

    fn log_counts(&self, report: &ReconcileReport) {
        debug!(
            updated = report.updated.len(),
            absent = report.absent.len(),
            added = report.added.len(),
            evicted = report.evicted.len(),
            "reconciled"
        );
        if self.options.verbose {
            info!("... {} mesh(es) updated", report.updated.len());
            info!("... {} mesh(es) absent", report.absent.len());
            info!("... {} new mesh(es)", report.added.len());
            if !report.evicted.is_empty() {
                info!("... {} mesh(es) evicted", report.evicted.len());
            }
        }
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcileOptions::default())
    }
}
