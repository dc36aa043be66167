// src/optimizer/exact.rs
//
// Depth-first branch-and-bound over canonical labelings. Pixels are taken in
// breadth-first graph order and a new region label is only ever the next
// unused one, so each partition is visited once.

use log::{debug, trace};

use super::objective::RegionSummary;
use super::session::SolverSession;
use super::{Problem, Solution};

const UNASSIGNED: usize = usize::MAX;
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

pub(crate) struct ExactOutcome {
    pub best: Option<Solution>,
    /// The whole tree was explored (or pruned) before the deadline.
    pub complete: bool,
}

struct Search<'p, 'a> {
    problem: &'p Problem<'a>,
    session: &'p SolverSession,
    order: Vec<usize>,
    labels: Vec<usize>,
    summaries: Vec<RegionSummary>,
    members: Vec<Vec<usize>>,
    best: Option<Solution>,
    best_cost: f64,
    aborted: bool,
}

pub(crate) fn solve(problem: &Problem<'_>, session: &SolverSession, incumbent: Option<Solution>) -> ExactOutcome {
    if session.expired() {
        debug!("Exact search skipped: budget spent before it started");
        return ExactOutcome { best: incumbent, complete: false };
    }
    let n = problem.graph.len();
    let order = problem.graph.bfs_order();
    let best_cost = incumbent.as_ref().map(|s| s.objective).unwrap_or(f64::INFINITY);
    let mut search = Search {
        problem,
        session,
        order,
        labels: vec![UNASSIGNED; n],
        summaries: Vec::with_capacity(problem.bounds.max_regions),
        members: Vec::with_capacity(problem.bounds.max_regions),
        best: incumbent,
        best_cost,
        aborted: false,
    };

    search.dfs(0, 0.0);
    debug!(
        "Exact search {} after {} nodes, best objective {:?}",
        if search.aborted { "stopped at deadline" } else { "completed" },
        session.nodes(),
        search.best.as_ref().map(|s| s.objective)
    );

    ExactOutcome {
        complete: !search.aborted,
        best: search.best,
    }
}

impl<'p, 'a> Search<'p, 'a> {
    fn opened(&self) -> usize {
        self.summaries.len()
    }

    // Partial costs at or above this cannot beat the incumbent by more than the gap
    fn cutoff(&self) -> f64 {
        if self.best_cost.is_finite() {
            self.best_cost * (1.0 - self.problem.gap_tolerance)
        } else {
            f64::INFINITY
        }
    }

    fn dfs(&mut self, depth: usize, partial: f64) {
        if self.aborted {
            return;
        }
        if self.session.count_node() % DEADLINE_CHECK_INTERVAL == 0 && self.session.expired() {
            self.aborted = true;
            return;
        }

        let n = self.order.len();
        if depth == n {
            self.complete_leaf();
            return;
        }

        let v = self.order[depth];
        let row = self.problem.features.row(v);
        let bounds = self.problem.bounds;

        // (delta, region); region == opened means a new region
        let mut options: Vec<(f64, usize)> = (0..self.opened())
            .filter(|&r| self.summaries[r].count < bounds.max_size)
            .map(|r| (self.problem.objective.add_delta(&self.summaries[r], row), r))
            .collect();
        if self.opened() < bounds.max_regions {
            let single = RegionSummary::empty(row.len()).with_added(row);
            options.push((self.problem.objective.region_cost(&single), self.opened()));
        }
        options.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let has_open_neighbor = self.problem.graph.neighbors(v).iter().any(|&u| self.labels[u] == UNASSIGNED);

        for (delta, r) in options {
            let next = partial + delta;
            if next >= self.cutoff() {
                // Options are sorted by delta, so the rest cannot do better
                break;
            }
            let is_new = r == self.opened();
            if !is_new && !has_open_neighbor && !self.touches_region(v, r) {
                // v could never be joined to the rest of r
                continue;
            }

            self.apply(v, r, is_new);
            if self.counts_reachable(n - depth - 1) && self.touched_regions_viable(v) {
                self.dfs(depth + 1, next);
            }
            self.undo(v, r, is_new);

            if self.aborted {
                return;
            }
        }
    }

    fn touches_region(&self, v: usize, r: usize) -> bool {
        self.problem.graph.neighbors(v).iter().any(|&u| self.labels[u] == r)
    }

    fn apply(&mut self, v: usize, r: usize, is_new: bool) {
        if is_new {
            self.summaries.push(RegionSummary::empty(self.problem.features.cols()));
            self.members.push(Vec::new());
        }
        self.labels[v] = r;
        self.summaries[r].add(self.problem.features.row(v));
        self.members[r].push(v);
    }

    fn undo(&mut self, v: usize, r: usize, is_new: bool) {
        self.labels[v] = UNASSIGNED;
        self.members[r].pop();
        if is_new {
            self.summaries.pop();
            self.members.pop();
        } else {
            self.summaries[r].remove(self.problem.features.row(v));
        }
    }

    // Enough unassigned pixels remain to fill minimum sizes and open missing regions
    fn counts_reachable(&self, remaining: usize) -> bool {
        let bounds = self.problem.bounds;
        let deficit: usize = self.summaries.iter()
            .map(|s| bounds.min_size.saturating_sub(s.count))
            .sum();
        let missing = bounds.min_regions.saturating_sub(self.opened());
        deficit + missing * bounds.min_size <= remaining
    }

    // A region none of whose members borders an unassigned pixel is final:
    // it must already be connected and large enough
    fn touched_regions_viable(&self, v: usize) -> bool {
        let mut touched: Vec<usize> = self.problem.graph.neighbors(v).iter()
            .map(|&u| self.labels[u])
            .filter(|&l| l != UNASSIGNED)
            .collect();
        touched.push(self.labels[v]);
        touched.sort_unstable();
        touched.dedup();

        touched.into_iter().all(|r| {
            let members = &self.members[r];
            let closed = members.iter().all(|&m| {
                self.problem.graph.neighbors(m).iter().all(|&u| self.labels[u] != UNASSIGNED)
            });
            !closed || (members.len() >= self.problem.bounds.min_size && self.problem.graph.is_connected_subset(members))
        })
    }

    fn complete_leaf(&mut self) {
        let bounds = self.problem.bounds;
        if self.opened() < bounds.min_regions {
            return;
        }
        if !self.members.iter().all(|m| bounds.size_ok(m.len())) {
            return;
        }
        if !self.members.iter().all(|m| self.problem.graph.is_connected_subset(m)) {
            return;
        }
        let cost = self.problem.objective.total(&self.summaries);
        if cost < self.best_cost {
            trace!("Exact search: new incumbent {:.6} with {} regions", cost, self.opened());
            self.best_cost = cost;
            self.best = Some(Solution {
                labels: self.labels.clone(),
                region_count: self.opened(),
                objective: cost,
            });
        }
    }
}
