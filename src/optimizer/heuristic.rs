// src/optimizer/heuristic.rs
//
// Seeded region growing, sequential peeling, detect-and-repair and boundary
// local search. Each (region count, restart) pair is an independent attempt.
// Attempts run in parallel rounds on the session pool and the best verified
// partition wins. Rounds continue until one fails to improve, the attempt cap
// is spent or the deadline passes.

use bit_vec::BitVec;
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

use crate::types::PixelId;
use super::feasibility::FeasibilityPlan;
use super::objective::RegionSummary;
use super::session::SolverSession;
use super::{Problem, Solution};

const UNASSIGNED: usize = usize::MAX;
// Spread of region counts tried when only a range is configured
const MAX_COUNTS_TRIED: usize = 8;
// Smallest objective drop accepted as an improving move
const IMPROVEMENT_EPS: f64 = 1e-10;

/// Warm-start material derived from candidate clusters.
pub(crate) struct Hints {
    /// Most central pixel of each candidate cluster.
    pub representatives: Vec<usize>,
    /// Candidate cluster label per pixel.
    pub labels: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HeuristicParams {
    pub restarts: usize,
    pub max_iterations: usize,
    pub repair_iterations: usize,
    pub seed: u64,
    /// Attempts allowed across all rounds.
    pub max_attempts: usize,
    /// Keep running rounds while nothing valid has been found. Without it a
    /// single round runs.
    pub persist: bool,
}

pub(crate) struct HeuristicOutcome {
    pub best: Option<Solution>,
    pub repair_rounds: u64,
    pub attempts: usize,
    pub rounds: usize,
    /// Seed pixels of the winning attempt, empty when it started from hints.
    pub seeds: Vec<usize>,
    /// Objective of the cheapest complete labeling that broke a size or
    /// contiguity constraint.
    pub best_invalid: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    // Seeds from representatives, then farthest-point
    Grow,
    // One region at a time with pocket lookahead
    Peel,
    // Candidate labels split into contiguous pieces and merged down
    Relaxed,
    // Shuffled representatives and a random first seed
    Shuffled,
    // Peeling with random tie-breaks and no objective ordering
    ShuffledPeel,
}

impl Start {
    fn for_restart(restart: usize, has_hints: bool) -> Self {
        match restart {
            0 => Start::Grow,
            1 => Start::Peel,
            2 if has_hints => Start::Relaxed,
            r if r % 2 == 0 => Start::Shuffled,
            _ => Start::ShuffledPeel,
        }
    }

    fn peels(self) -> bool {
        matches!(self, Start::Peel | Start::ShuffledPeel)
    }
}

struct Attempt {
    k: usize,
    restart: usize,
    start: Start,
}

struct AttemptResult {
    solution: Option<Solution>,
    repair_rounds: u64,
    seeds: Vec<usize>,
    invalid_objective: Option<f64>,
}

pub(crate) fn solve(
    problem: &Problem<'_>,
    plan: &FeasibilityPlan,
    session: &SolverSession,
    hints: Option<&Hints>,
    params: HeuristicParams,
) -> HeuristicOutcome {
    let restarts = params.restarts.max(1);
    let counts = counts_to_try(plan);
    let mut outcome = HeuristicOutcome {
        best: None,
        repair_rounds: 0,
        attempts: 0,
        rounds: 0,
        seeds: Vec::new(),
        best_invalid: None,
    };

    loop {
        let first = outcome.rounds * restarts;
        let attempts: Vec<Attempt> = counts.iter()
            .flat_map(|&k| {
                (first..first + restarts).map(move |restart| Attempt {
                    k,
                    restart,
                    start: Start::for_restart(restart, hints.is_some()),
                })
            })
            .take(params.max_attempts.saturating_sub(outcome.attempts))
            .collect();
        if attempts.is_empty() {
            break;
        }

        debug!(
            "Heuristic round {}: {} attempts over region counts {}..={}",
            outcome.rounds, attempts.len(), plan.min_total, plan.max_total
        );
        let results: Vec<AttemptResult> = session.install(|| {
            attempts
                .par_iter()
                .map(|attempt| run_attempt(problem, plan, session, hints, params, attempt))
                .collect()
        });
        outcome.rounds += 1;
        outcome.attempts += attempts.len();

        let mut improved = false;
        // Strict comparison keeps the earliest attempt on ties: earlier round,
        // lower k, then lower restart
        for result in results {
            outcome.repair_rounds += result.repair_rounds;
            if let Some(objective) = result.invalid_objective {
                if outcome.best_invalid.map_or(true, |b| objective < b) {
                    outcome.best_invalid = Some(objective);
                }
            }
            let Some(solution) = result.solution else { continue };
            let better = outcome.best.as_ref()
                .map_or(true, |current| solution.objective < current.objective - IMPROVEMENT_EPS);
            if better {
                outcome.best = Some(solution);
                outcome.seeds = result.seeds;
                improved = true;
            }
        }

        let done = !params.persist || (outcome.best.is_some() && !improved);
        if done || session.expired() {
            break;
        }
    }

    debug!(
        "Heuristic search: {} rounds, {} attempts, best {:?}",
        outcome.rounds, outcome.attempts, outcome.best.as_ref().map(|s| s.objective)
    );
    outcome
}

// All feasible totals when few, otherwise an even spread including both ends
fn counts_to_try(plan: &FeasibilityPlan) -> Vec<usize> {
    let (lo, hi) = (plan.min_total, plan.max_total);
    let span = hi - lo;
    if span < MAX_COUNTS_TRIED {
        return (lo..=hi).collect();
    }
    let mut counts: Vec<usize> = (0..MAX_COUNTS_TRIED)
        .map(|i| lo + i * span / (MAX_COUNTS_TRIED - 1))
        .collect();
    counts.dedup();
    counts
}

fn run_attempt(
    problem: &Problem<'_>,
    plan: &FeasibilityPlan,
    session: &SolverSession,
    hints: Option<&Hints>,
    params: HeuristicParams,
    attempt: &Attempt,
) -> AttemptResult {
    let mut result = AttemptResult {
        solution: None,
        repair_rounds: 0,
        seeds: Vec::new(),
        invalid_objective: None,
    };
    let Some(allocation) = plan.allocate(attempt.k) else {
        return result;
    };
    let mut rng = StdRng::seed_from_u64(
        params.seed
            .wrapping_add(attempt.restart as u64)
            .wrapping_add((attempt.k as u64) << 32),
    );

    let mut partition = Partition::new(problem, attempt.k);
    if attempt.start.peels() {
        let n = problem.graph.len();
        let mut rank: Vec<u64> = (0..n).map(|v| problem.graph.pixel_id(v).0).collect();
        if attempt.start == Start::ShuffledPeel {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut rng);
            for (i, &v) in order.iter().enumerate() {
                rank[v] = i as u64;
            }
        }
        result.seeds = partition.peel(&rank, attempt.start == Start::Peel);
    } else {
        let relaxed = attempt.start == Start::Relaxed
            && hints.map_or(false, |h| partition.relaxed_start(&h.labels, session));
        if !relaxed {
            partition.clear();
            result.seeds = choose_seeds(problem, plan, &allocation, hints, attempt.start != Start::Grow, &mut rng);
            partition.grow(&result.seeds);
        }
    }

    result.repair_rounds = partition.repair(params.repair_iterations, session);
    partition.local_search(params.max_iterations, session);
    let objective = partition.complete_objective();
    result.solution = partition.into_solution();
    if result.solution.is_none() {
        result.invalid_objective = objective;
    }

    trace!(
        "Attempt k={} restart={} ({:?}): {:?}",
        attempt.k, attempt.restart, attempt.start,
        result.solution.as_ref().map(|s| s.objective)
    );
    result
}

/// Seed vertices, `allocation[c]` of them inside component `c`, listed by
/// component. Representatives come first; the rest are feature-space
/// farthest points, ties broken by graph distance and then lowest pixel id.
fn choose_seeds(
    problem: &Problem<'_>,
    plan: &FeasibilityPlan,
    allocation: &[usize],
    hints: Option<&Hints>,
    shuffled: bool,
    rng: &mut StdRng,
) -> Vec<usize> {
    let graph = problem.graph;
    let features = problem.features;
    let n = graph.len();
    let mut component_of = vec![0; n];
    for (c, component) in plan.components.iter().enumerate() {
        for &v in component {
            component_of[v] = c;
        }
    }

    let mut seeds = Vec::with_capacity(allocation.iter().sum());
    let mut is_seed = BitVec::from_elem(n, false);
    // Hop counts never cross components, so one buffer serves them all
    let mut hops = vec![usize::MAX; n];
    for (c, component) in plan.components.iter().enumerate() {
        let want = allocation[c].min(component.len());
        let mut chosen: Vec<usize> = Vec::with_capacity(want);

        if let Some(h) = hints {
            let mut reps: Vec<usize> = h.representatives.iter().copied()
                .filter(|&v| v < n && component_of[v] == c)
                .collect();
            if shuffled {
                reps.shuffle(rng);
            }
            for v in reps {
                if chosen.len() == want {
                    break;
                }
                if !is_seed[v] {
                    is_seed.set(v, true);
                    chosen.push(v);
                }
            }
        }

        if chosen.is_empty() && want > 0 {
            let first = if shuffled {
                component[rng.gen_range(0..component.len())]
            } else {
                most_central(problem, component)
            };
            is_seed.set(first, true);
            chosen.push(first);
        }

        // Distances to the nearest chosen seed, in feature space and in hops
        let mut feature_gap: Vec<f64> = component.iter()
            .map(|&v| chosen.iter().map(|&s| features.distance_squared(v, s)).fold(f64::INFINITY, f64::min))
            .collect();
        for &s in &chosen {
            update_hops(problem, s, &mut hops);
        }

        while chosen.len() < want {
            let mut pick: Option<(usize, usize)> = None;
            for (i, &v) in component.iter().enumerate() {
                if is_seed[v] {
                    continue;
                }
                let better = match pick {
                    None => true,
                    Some((j, u)) => match feature_gap[i].total_cmp(&feature_gap[j]) {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        Ordering::Equal => (hops[v], Reverse(graph.pixel_id(v))) > (hops[u], Reverse(graph.pixel_id(u))),
                    },
                };
                if better {
                    pick = Some((i, v));
                }
            }
            let Some((_, v)) = pick else { break };
            is_seed.set(v, true);
            chosen.push(v);
            for (i, &u) in component.iter().enumerate() {
                feature_gap[i] = feature_gap[i].min(features.distance_squared(u, v));
            }
            update_hops(problem, v, &mut hops);
        }
        seeds.extend(chosen);
    }
    seeds
}

// Pixel nearest the component's feature mean, ties to the lowest pixel id
fn most_central(problem: &Problem<'_>, component: &[usize]) -> usize {
    let mean = problem.features.centroid(component);
    let mut best = component[0];
    let mut best_d = f64::INFINITY;
    for &v in component {
        let d = crate::types::squared_distance(problem.features.row(v), &mean);
        if d < best_d || (d == best_d && problem.graph.pixel_id(v) < problem.graph.pixel_id(best)) {
            best_d = d;
            best = v;
        }
    }
    best
}

// Lowers hop counts with a breadth-first sweep from a new seed
fn update_hops(problem: &Problem<'_>, seed: usize, hops: &mut [usize]) {
    let mut queue = std::collections::VecDeque::from([(seed, 0usize)]);
    hops[seed] = 0;
    while let Some((v, d)) = queue.pop_front() {
        for &u in problem.graph.neighbors(v) {
            if d + 1 < hops[u] {
                hops[u] = d + 1;
                queue.push_back((u, d + 1));
            }
        }
    }
}

/// Frontier entry for region growing; the heap is a min-heap on this order.
#[derive(Debug, Clone, Copy)]
struct Frontier {
    delta: f64,
    pixel: PixelId,
    vertex: usize,
    region: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.delta.total_cmp(&other.delta)
            .then(self.pixel.cmp(&other.pixel))
            .then(self.region.cmp(&other.region))
    }
}

/// A (possibly partial) labeling with incremental region summaries.
struct Partition<'p, 'a> {
    problem: &'p Problem<'a>,
    labels: Vec<usize>,
    summaries: Vec<RegionSummary>,
}

impl<'p, 'a> Partition<'p, 'a> {
    fn new(problem: &'p Problem<'a>, k: usize) -> Self {
        Self {
            problem,
            labels: vec![UNASSIGNED; problem.graph.len()],
            summaries: vec![RegionSummary::empty(problem.features.cols()); k],
        }
    }

    fn clear(&mut self) {
        self.labels.fill(UNASSIGNED);
        let dimension = self.problem.features.cols();
        for s in self.summaries.iter_mut() {
            *s = RegionSummary::empty(dimension);
        }
    }

    fn size(&self, r: usize) -> usize {
        self.summaries[r].count
    }

    fn row(&self, v: usize) -> &'p [f64] {
        self.problem.features.row(v)
    }

    fn assign(&mut self, v: usize, r: usize) {
        self.labels[v] = r;
        self.summaries[r].add(self.problem.features.row(v));
    }

    fn move_to(&mut self, v: usize, to: usize) {
        let from = self.labels[v];
        self.summaries[from].remove(self.problem.features.row(v));
        self.assign(v, to);
    }

    fn members(&self, r: usize) -> Vec<usize> {
        (0..self.labels.len()).filter(|&v| self.labels[v] == r).collect()
    }

    /// Distinct assigned regions around `v`, other than its own, ascending.
    fn adjacent_regions(&self, v: usize) -> Vec<usize> {
        let own = self.labels[v];
        let mut regions: Vec<usize> = self.problem.graph.neighbors(v).iter()
            .map(|&u| self.labels[u])
            .filter(|&l| l != UNASSIGNED && l != own)
            .collect();
        regions.sort_unstable();
        regions.dedup();
        regions
    }

    /// Whether `v`'s region stays non-empty and connected once `v` leaves.
    fn connected_without(&self, v: usize) -> bool {
        let r = self.labels[v];
        let remaining = self.size(r).saturating_sub(1);
        if remaining == 0 {
            return false;
        }
        let graph = self.problem.graph;
        let labels = &self.labels;
        match graph.neighbors(v).iter().copied().find(|&u| labels[u] == r) {
            Some(start) => graph.is_connected_where(start, remaining, |u| u != v && labels[u] == r),
            None => {
                let rest: Vec<usize> = self.members(r).into_iter().filter(|&u| u != v).collect();
                graph.is_connected_subset(&rest)
            }
        }
    }

    fn grow(&mut self, seeds: &[usize]) {
        let max_size = self.problem.bounds.max_size;
        let mut heap = BinaryHeap::new();
        for (r, &s) in seeds.iter().enumerate() {
            self.assign(s, r);
        }
        for (r, &s) in seeds.iter().enumerate() {
            self.push_frontier(&mut heap, s, r);
        }

        while let Some(Reverse(entry)) = heap.pop() {
            if self.labels[entry.vertex] != UNASSIGNED || self.size(entry.region) >= max_size {
                continue;
            }
            let delta = self.problem.objective.add_delta(&self.summaries[entry.region], self.row(entry.vertex));
            if delta > entry.delta + IMPROVEMENT_EPS {
                // The region changed since this entry was queued
                heap.push(Reverse(Frontier { delta, ..entry }));
                continue;
            }
            self.assign(entry.vertex, entry.region);
            self.push_frontier(&mut heap, entry.vertex, entry.region);
        }
    }

    fn push_frontier(&self, heap: &mut BinaryHeap<Reverse<Frontier>>, v: usize, r: usize) {
        for &u in self.problem.graph.neighbors(v) {
            if self.labels[u] == UNASSIGNED {
                heap.push(Reverse(Frontier {
                    delta: self.problem.objective.add_delta(&self.summaries[r], self.row(u)),
                    pixel: self.problem.graph.pixel_id(u),
                    vertex: u,
                    region: r,
                }));
            }
        }
    }

    /// Builds regions one at a time. Each starts at the unassigned pixel with
    /// the fewest unassigned neighbors and grows towards its share of what is
    /// left, refusing pixels that would strand pockets no count of regions
    /// can fill. Once no pixel passes that check the remaining regions grow
    /// unchecked and repair takes over. Returns the seed of every region.
    ///
    /// `rank` breaks ties; `by_objective` orders equally hemmed-in pixels by
    /// cost before rank.
    fn peel(&mut self, rank: &[u64], by_objective: bool) -> Vec<usize> {
        let bounds = self.problem.bounds;
        let k = self.summaries.len();
        self.clear();
        let mut seeds = Vec::with_capacity(k);
        let mut checked = true;

        for r in 0..k {
            let left = k - r - 1;
            let open = self.labels.iter().filter(|&&l| l == UNASSIGNED).count();
            let Some(seed) = (0..self.labels.len())
                .filter(|&v| self.labels[v] == UNASSIGNED)
                .min_by_key(|&v| (self.open_degree(v), rank[v]))
            else {
                break;
            };
            seeds.push(seed);
            self.assign(seed, r);
            let mut members = vec![seed];
            let target = if left == 0 {
                open
            } else {
                ((open as f64 / (left + 1) as f64).round() as usize).clamp(bounds.min_size, bounds.max_size)
            };

            loop {
                let size = self.size(r);
                if size >= bounds.min_size && size >= target && (!checked || self.pockets_fit(None, 0, left)) {
                    break;
                }
                if size >= bounds.max_size {
                    if checked && !self.pockets_fit(None, 0, left) {
                        checked = false;
                    }
                    break;
                }
                let candidates = self.peel_candidates(&members, rank, by_objective);
                let next = if checked {
                    candidates.into_iter().find(|&c| self.growth_ok(r, c, left))
                } else {
                    candidates.first().copied()
                };
                match next {
                    Some(c) => {
                        self.assign(c, r);
                        members.push(c);
                    }
                    None if checked && !(size >= bounds.min_size && self.pockets_fit(None, 0, left)) => {
                        trace!("Peel: region {} stuck at {} pixels, continuing unchecked", r, size);
                        checked = false;
                    }
                    None => break,
                }
            }
        }
        seeds
    }

    fn open_degree(&self, v: usize) -> usize {
        self.problem.graph.neighbors(v).iter().filter(|&&u| self.labels[u] == UNASSIGNED).count()
    }

    // Unassigned pixels bordering `members`, most hemmed-in first
    fn peel_candidates(&self, members: &[usize], rank: &[u64], by_objective: bool) -> Vec<usize> {
        let graph = self.problem.graph;
        let mut frontier: Vec<usize> = members.iter()
            .flat_map(|&m| graph.neighbors(m).iter().copied())
            .filter(|&u| self.labels[u] == UNASSIGNED)
            .collect();
        frontier.sort_unstable();
        frontier.dedup();

        let Some(&first) = members.first() else {
            return frontier;
        };
        let summary = &self.summaries[self.labels[first]];
        let mut keyed: Vec<(usize, f64, u64, usize)> = frontier.into_iter()
            .map(|u| {
                let delta = if by_objective {
                    self.problem.objective.add_delta(summary, self.row(u))
                } else {
                    0.0
                };
                (self.open_degree(u), delta, rank[u], u)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)).then(a.2.cmp(&b.2)));
        keyed.into_iter().map(|(_, _, _, u)| u).collect()
    }

    // Adding `c` to `r` leaves pockets that `left` more regions can fill,
    // allowing `r` to swallow whatever it still has room for
    fn growth_ok(&mut self, r: usize, c: usize, left: usize) -> bool {
        let slack = self.problem.bounds.max_size.saturating_sub(self.size(r) + 1);
        self.labels[c] = r;
        let fits = self.pockets_fit(Some(r), slack, left);
        self.labels[c] = UNASSIGNED;
        fits
    }

    /// Whether the unassigned pixels split into components that exactly
    /// `left` regions can cover within the size bounds. Components touching
    /// `growing` may first lose up to `slack` pixels to it.
    fn pockets_fit(&self, growing: Option<usize>, slack: usize, left: usize) -> bool {
        let graph = self.problem.graph;
        let bounds = self.problem.bounds;
        let labels = &self.labels;
        let mut seen = BitVec::from_elem(labels.len(), false);
        let (mut lo_total, mut hi_total) = (0, 0);

        for v in 0..labels.len() {
            if seen[v] || labels[v] != UNASSIGNED {
                continue;
            }
            let pocket = graph.flood(v, &mut seen, |u| labels[u] == UNASSIGNED);
            let size = pocket.len();
            let touches = growing.map_or(false, |r| {
                pocket.iter().any(|&m| graph.neighbors(m).iter().any(|&u| labels[u] == r))
            });
            let absorbable = if touches { slack.min(size) } else { 0 };
            let span = (0..=absorbable)
                .filter_map(|a| region_span(size - a, bounds.min_size, bounds.max_size))
                .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)));
            let Some((lo, hi)) = span else {
                return false;
            };
            lo_total += lo;
            hi_total += hi;
        }
        lo_total <= left && left <= hi_total
    }

    /// Splits candidate clusters into contiguous pieces, then merges the
    /// smallest piece into its cheapest neighbor until `k` pieces remain.
    /// Returns false when `k` cannot be reached this way.
    fn relaxed_start(&mut self, hint_labels: &[usize], session: &SolverSession) -> bool {
        let graph = self.problem.graph;
        let features = self.problem.features;
        let objective = self.problem.objective;
        let n = graph.len();
        let k = self.summaries.len();
        if hint_labels.len() != n {
            return false;
        }

        let mut piece = vec![UNASSIGNED; n];
        let mut pieces: Vec<Vec<usize>> = Vec::new();
        let mut seen = BitVec::from_elem(n, false);
        for v in 0..n {
            if seen[v] {
                continue;
            }
            let label = hint_labels[v];
            let members = graph.flood(v, &mut seen, |u| hint_labels[u] == label);
            for &m in &members {
                piece[m] = pieces.len();
            }
            pieces.push(members);
        }
        if pieces.len() < k {
            return false;
        }

        let mut summaries: Vec<RegionSummary> = pieces.iter()
            .map(|members| RegionSummary::from_members(members, features))
            .collect();
        let mut heap: BinaryHeap<Reverse<(usize, usize)>> = pieces.iter()
            .enumerate()
            .map(|(p, members)| Reverse((members.len(), p)))
            .collect();
        let mut alive = pieces.len();

        while alive > k {
            if session.expired() {
                return false;
            }
            let Some(Reverse((size, p))) = heap.pop() else {
                return false;
            };
            if pieces[p].len() != size {
                continue;
            }

            let mut neighbors: Vec<usize> = pieces[p].iter()
                .flat_map(|&m| graph.neighbors(m).iter().map(|&u| piece[u]))
                .filter(|&q| q != p)
                .collect();
            neighbors.sort_unstable();
            neighbors.dedup();

            let own_cost = objective.region_cost(&summaries[p]);
            let mut target: Option<(f64, usize)> = None;
            for q in neighbors {
                let mut merged = summaries[q].clone();
                merged.merge(&summaries[p]);
                let increase = objective.region_cost(&merged) - objective.region_cost(&summaries[q]) - own_cost;
                if target.map_or(true, |(best, _)| increase < best) {
                    target = Some((increase, q));
                }
            }
            // A piece filling a whole component stays as it is
            let Some((_, q)) = target else { continue };

            let moved = std::mem::take(&mut pieces[p]);
            for &m in &moved {
                piece[m] = q;
            }
            pieces[q].extend(moved);
            let absorbed = std::mem::replace(&mut summaries[p], RegionSummary::empty(features.cols()));
            summaries[q].merge(&absorbed);
            heap.push(Reverse((pieces[q].len(), q)));
            alive -= 1;
        }

        self.clear();
        let survivors = pieces.iter().filter(|members| !members.is_empty());
        for (r, members) in survivors.enumerate() {
            for &m in members {
                self.assign(m, r);
            }
        }
        true
    }

    /// Detect-and-repair rounds until sizes hold, capped by `cap` rounds and the
    /// session deadline. Returns the rounds spent.
    fn repair(&mut self, cap: usize, session: &SolverSession) -> u64 {
        let bounds = self.problem.bounds;
        let k = self.summaries.len();
        let mut rounds = 0;
        loop {
            self.absorb_unassigned();
            let oversized: Vec<usize> = (0..k).filter(|&r| self.size(r) > bounds.max_size).collect();
            let undersized: Vec<usize> = (0..k).filter(|&r| self.size(r) < bounds.min_size).collect();
            if oversized.is_empty() && undersized.is_empty() {
                break;
            }
            if rounds >= cap as u64 || session.expired() {
                break;
            }
            rounds += 1;
            session.count_iteration();

            for r in oversized {
                while self.size(r) > bounds.max_size {
                    if !self.shed(r) && !self.push_chain(r) {
                        break;
                    }
                }
            }
            for r in undersized {
                while self.size(r) < bounds.min_size {
                    let moved = if self.size(r) == 0 {
                        self.reseed(r)
                    } else {
                        self.pull(r) || self.pull_chain(r)
                    };
                    if !moved {
                        break;
                    }
                }
            }
        }
        rounds
    }

    // Unassigned pixels join an adjacent region: one with room first, then
    // the cheapest, then the lowest id
    fn absorb_unassigned(&mut self) {
        let max_size = self.problem.bounds.max_size;
        loop {
            let mut progress = false;
            for v in 0..self.labels.len() {
                if self.labels[v] != UNASSIGNED {
                    continue;
                }
                let row = self.row(v);
                let choice = self.adjacent_regions(v).into_iter().min_by(|&a, &b| {
                    let da = self.problem.objective.add_delta(&self.summaries[a], row);
                    let db = self.problem.objective.add_delta(&self.summaries[b], row);
                    (self.size(a) >= max_size).cmp(&(self.size(b) >= max_size))
                        .then(da.total_cmp(&db))
                        .then(a.cmp(&b))
                });
                if let Some(r) = choice {
                    self.assign(v, r);
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }
    }

    // Moves one boundary pixel out of oversized region `r`
    fn shed(&mut self, r: usize) -> bool {
        let max_size = self.problem.bounds.max_size;
        let objective = self.problem.objective;
        let mut best: Option<((bool, f64, PixelId), usize, usize)> = None;
        for v in self.members(r) {
            let row = self.row(v);
            let leave = objective.remove_delta(&self.summaries[r], row);
            for s in self.adjacent_regions(v) {
                let key = (
                    self.size(s) >= max_size,
                    leave + objective.add_delta(&self.summaries[s], row),
                    self.problem.graph.pixel_id(v),
                );
                if best.as_ref().map_or(true, |(b, _, _)| cmp_move_key(&key, b) == Ordering::Less)
                    && self.connected_without(v)
                {
                    best = Some((key, v, s));
                }
            }
        }
        match best {
            Some((_, v, s)) => {
                self.move_to(v, s);
                true
            }
            None => false,
        }
    }

    // Draws one pixel into undersized region `r` from a neighbor that can spare it
    fn pull(&mut self, r: usize) -> bool {
        let min_size = self.problem.bounds.min_size;
        let objective = self.problem.objective;
        let mut frontier: Vec<usize> = self.members(r).iter()
            .flat_map(|&m| self.problem.graph.neighbors(m).iter().copied())
            .filter(|&u| self.labels[u] != r && self.labels[u] != UNASSIGNED)
            .collect();
        frontier.sort_unstable();
        frontier.dedup();

        let mut best: Option<(f64, PixelId, usize)> = None;
        for v in frontier {
            let s = self.labels[v];
            if self.size(s) <= min_size {
                continue;
            }
            let row = self.row(v);
            let delta = objective.remove_delta(&self.summaries[s], row) + objective.add_delta(&self.summaries[r], row);
            let pixel = self.problem.graph.pixel_id(v);
            let better = best.map_or(true, |(d, p, _)| delta.total_cmp(&d).then(pixel.cmp(&p)) == Ordering::Less);
            if better && self.connected_without(v) {
                best = Some((delta, pixel, v));
            }
        }
        match best {
            Some((_, _, v)) => {
                self.move_to(v, r);
                true
            }
            None => false,
        }
    }

    /// Regions bordering each region, ascending.
    fn region_neighbors(&self) -> Vec<Vec<usize>> {
        let mut adjacent = vec![Vec::new(); self.summaries.len()];
        for v in 0..self.labels.len() {
            let r = self.labels[v];
            if r == UNASSIGNED {
                continue;
            }
            for &u in self.problem.graph.neighbors(v) {
                let s = self.labels[u];
                if s != UNASSIGNED && s != r {
                    adjacent[r].push(s);
                }
            }
        }
        for list in adjacent.iter_mut() {
            list.sort_unstable();
            list.dedup();
        }
        adjacent
    }

    /// Shortest run of touching regions from `from` to the nearest region
    /// accepted by `target`, both ends included.
    fn region_chain(&self, from: usize, target: impl Fn(usize) -> bool) -> Option<Vec<usize>> {
        let adjacent = self.region_neighbors();
        let mut parent = vec![UNASSIGNED; adjacent.len()];
        parent[from] = from;
        let mut queue = VecDeque::from([from]);
        while let Some(r) = queue.pop_front() {
            for &s in &adjacent[r] {
                if parent[s] != UNASSIGNED {
                    continue;
                }
                parent[s] = r;
                if target(s) {
                    let mut chain = vec![s];
                    let mut current = s;
                    while current != from {
                        current = parent[current];
                        chain.push(current);
                    }
                    chain.reverse();
                    return Some(chain);
                }
                queue.push_back(s);
            }
        }
        None
    }

    // Cheapest pixel of `donor` bordering `receiver` crosses over, if `donor`
    // stays connected without it
    fn hand_over(&mut self, donor: usize, receiver: usize) -> bool {
        let objective = self.problem.objective;
        let mut best: Option<(f64, PixelId, usize)> = None;
        for v in self.members(donor) {
            if !self.problem.graph.neighbors(v).iter().any(|&u| self.labels[u] == receiver) {
                continue;
            }
            let row = self.row(v);
            let delta = objective.remove_delta(&self.summaries[donor], row)
                + objective.add_delta(&self.summaries[receiver], row);
            let pixel = self.problem.graph.pixel_id(v);
            let better = best.map_or(true, |(d, p, _)| delta.total_cmp(&d).then(pixel.cmp(&p)) == Ordering::Less);
            if better && self.connected_without(v) {
                best = Some((delta, pixel, v));
            }
        }
        match best {
            Some((_, _, v)) => {
                self.move_to(v, receiver);
                true
            }
            None => false,
        }
    }

    // Undersized `r` gains a pixel through a chain of regions ending at one
    // that can spare it. Regions in between keep their size.
    fn pull_chain(&mut self, r: usize) -> bool {
        let min_size = self.problem.bounds.min_size;
        let sizes: Vec<usize> = self.summaries.iter().map(|s| s.count).collect();
        let Some(chain) = self.region_chain(r, |s| sizes[s] > min_size) else {
            return false;
        };
        for (i, pair) in chain.windows(2).enumerate() {
            if !self.hand_over(pair[1], pair[0]) {
                return i > 0;
            }
        }
        true
    }

    // Oversized `r` passes a pixel along a chain ending at a region with room
    fn push_chain(&mut self, r: usize) -> bool {
        let max_size = self.problem.bounds.max_size;
        let sizes: Vec<usize> = self.summaries.iter().map(|s| s.count).collect();
        let Some(chain) = self.region_chain(r, |s| sizes[s] < max_size) else {
            return false;
        };
        for (i, pair) in chain.windows(2).enumerate() {
            if !self.hand_over(pair[0], pair[1]) {
                return i > 0;
            }
        }
        true
    }

    // An empty region restarts from a pixel the largest region can spare
    fn reseed(&mut self, r: usize) -> bool {
        let Some(s) = (0..self.summaries.len())
            .filter(|&s| s != r)
            .max_by_key(|&s| (self.size(s), Reverse(s)))
        else {
            return false;
        };
        let spare = self.members(s).into_iter().find(|&v| self.connected_without(v));
        match spare {
            Some(v) => {
                self.move_to(v, r);
                true
            }
            None => false,
        }
    }

    /// First-improvement passes over boundary pixels until a pass finds no
    /// improving move, `max_passes` is reached or the deadline passes.
    fn local_search(&mut self, max_passes: usize, session: &SolverSession) {
        let bounds = self.problem.bounds;
        let objective = self.problem.objective;
        for _ in 0..max_passes {
            if session.expired() {
                break;
            }
            session.count_iteration();
            let mut improved = false;
            for v in 0..self.labels.len() {
                let r = self.labels[v];
                if r == UNASSIGNED || self.size(r) <= bounds.min_size {
                    continue;
                }
                let row = self.row(v);
                let leave = objective.remove_delta(&self.summaries[r], row);
                let mut best: Option<(f64, usize)> = None;
                for s in self.adjacent_regions(v) {
                    if self.size(s) >= bounds.max_size {
                        continue;
                    }
                    let delta = leave + objective.add_delta(&self.summaries[s], row);
                    if delta < -IMPROVEMENT_EPS && best.map_or(true, |(d, _)| delta < d) {
                        best = Some((delta, s));
                    }
                }
                if let Some((_, s)) = best {
                    if self.connected_without(v) {
                        self.move_to(v, s);
                        improved = true;
                    }
                }
            }
            if !improved {
                break;
            }
        }
    }

    /// Objective of the labeling once every pixel is assigned, valid or not.
    fn complete_objective(&self) -> Option<f64> {
        if self.labels.iter().any(|&l| l == UNASSIGNED) {
            return None;
        }
        Some(self.problem.objective.total(&self.summaries))
    }

    /// The labeling as a solution if it satisfies every hard constraint.
    fn into_solution(self) -> Option<Solution> {
        let bounds = self.problem.bounds;
        let k = self.summaries.len();
        if self.labels.iter().any(|&l| l == UNASSIGNED) {
            return None;
        }
        let mut members = vec![Vec::new(); k];
        for (v, &l) in self.labels.iter().enumerate() {
            members[l].push(v);
        }
        let valid = members.iter().all(|m| bounds.size_ok(m.len()) && self.problem.graph.is_connected_subset(m));
        if !valid {
            return None;
        }
        // Recomputed from scratch to drop incremental rounding drift
        let summaries: Vec<RegionSummary> = members.iter()
            .map(|m| RegionSummary::from_members(m, self.problem.features))
            .collect();
        Some(Solution {
            objective: self.problem.objective.total(&summaries),
            labels: self.labels,
            region_count: k,
        })
    }
}

// Fewest and most regions a component of `size` pixels can be cut into
fn region_span(size: usize, min_size: usize, max_size: usize) -> Option<(usize, usize)> {
    if size == 0 {
        return Some((0, 0));
    }
    let lo = (size + max_size - 1) / max_size;
    let hi = size / min_size;
    (lo <= hi).then_some((lo, hi))
}

fn cmp_move_key(a: &(bool, f64, PixelId), b: &(bool, f64, PixelId)) -> Ordering {
    a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)).then(a.2.cmp(&b.2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::graph::AdjacencyGraph;
    use crate::optimizer::feasibility::{check, Bounds};
    use crate::optimizer::objective::SumSquaredDeviation;
    use crate::types::FeatureMatrix;

    // rows x cols lattice, 4-neighbor
    fn lattice(cols: usize, rows: usize, value: impl Fn(usize, usize) -> f64) -> (AdjacencyGraph, FeatureMatrix) {
        let ids = (0..(cols * rows) as u64).map(PixelId).collect();
        let mut edges = Vec::new();
        let mut data = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                let v = r * cols + c;
                if c + 1 < cols {
                    edges.push((v, v + 1, 1.0));
                }
                if r + 1 < rows {
                    edges.push((v, v + cols, 1.0));
                }
                data.push(vec![value(c, r)]);
            }
        }
        (AdjacencyGraph::from_edges(ids, edges), FeatureMatrix::from_rows(&data))
    }

    fn params() -> HeuristicParams {
        HeuristicParams {
            restarts: 3,
            max_iterations: 50,
            repair_iterations: 32,
            seed: 7,
            max_attempts: 96,
            persist: true,
        }
    }

    fn noisy(seed: u64) -> impl Fn(usize, usize) -> f64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let values: Vec<f64> = (0..1024).map(|_| rng.gen_range(0.0..10.0)).collect();
        move |c, r| values[(r * 32 + c) % values.len()]
    }

    fn regions_of(solution: &Solution) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); solution.region_count];
        for (v, &l) in solution.labels.iter().enumerate() {
            members[l].push(v);
        }
        members
    }

    #[test]
    fn recovers_column_bands() {
        let (graph, features) = lattice(6, 4, |c, _| if c < 3 { 0.0 } else { 10.0 });
        let bounds = Bounds { min_regions: 2, max_regions: 2, min_size: 1, max_size: 24 };
        let problem = Problem {
            graph: &graph,
            features: &features,
            objective: &SumSquaredDeviation,
            bounds,
            gap_tolerance: 0.0,
        };
        let plan = check(&graph, &bounds).unwrap();
        let session = SolverSession::new(Duration::from_secs(10), 2).unwrap();
        let outcome = solve(&problem, &plan, &session, None, params());
        let best = outcome.best.unwrap();
        assert!(best.objective.abs() < 1e-9);
        for region in regions_of(&best) {
            assert_eq!(region.len(), 12);
        }
    }

    #[test]
    fn honors_size_bounds_and_contiguity() {
        let (graph, features) = lattice(5, 5, |c, r| ((c * 7 + r * 3) % 5) as f64);
        let bounds = Bounds { min_regions: 5, max_regions: 5, min_size: 3, max_size: 7 };
        let problem = Problem {
            graph: &graph,
            features: &features,
            objective: &SumSquaredDeviation,
            bounds,
            gap_tolerance: 0.0,
        };
        let plan = check(&graph, &bounds).unwrap();
        let session = SolverSession::new(Duration::from_secs(10), 2).unwrap();
        let best = solve(&problem, &plan, &session, None, params()).best.unwrap();
        let regions = regions_of(&best);
        assert_eq!(regions.len(), 5);
        for region in regions {
            assert!((3..=7).contains(&region.len()));
            assert!(graph.is_connected_subset(&region));
        }
    }

    #[test]
    fn relaxed_start_uses_candidate_labels() {
        let (graph, features) = lattice(4, 2, |c, _| c as f64);
        let bounds = Bounds { min_regions: 2, max_regions: 2, min_size: 1, max_size: 8 };
        let problem = Problem {
            graph: &graph,
            features: &features,
            objective: &SumSquaredDeviation,
            bounds,
            gap_tolerance: 0.0,
        };
        let session = SolverSession::new(Duration::from_secs(10), 1).unwrap();
        let mut partition = Partition::new(&problem, 2);
        // Four single-column candidate clusters merge down to two pieces
        let labels: Vec<usize> = (0..8).map(|v| v % 4).collect();
        assert!(partition.relaxed_start(&labels, &session));
        assert!(partition.labels.iter().all(|&l| l < 2));
        let solution = partition.into_solution().unwrap();
        assert_eq!(solution.region_count, 2);
    }

    #[test]
    fn same_seed_same_answer() {
        let (graph, features) = lattice(6, 6, |c, r| ((c * 31 + r * 17) % 11) as f64);
        let bounds = Bounds { min_regions: 4, max_regions: 4, min_size: 3, max_size: 15 };
        let problem = Problem {
            graph: &graph,
            features: &features,
            objective: &SumSquaredDeviation,
            bounds,
            gap_tolerance: 0.0,
        };
        let plan = check(&graph, &bounds).unwrap();
        let run = || {
            let session = SolverSession::new(Duration::from_secs(10), 3).unwrap();
            solve(&problem, &plan, &session, None, params()).best.unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.objective, second.objective);
    }

    #[test]
    fn exact_size_rows_on_noisy_grid() {
        let (graph, features) = lattice(12, 12, noisy(7));
        let bounds = Bounds { min_regions: 12, max_regions: 12, min_size: 12, max_size: 12 };
        let problem = Problem {
            graph: &graph,
            features: &features,
            objective: &SumSquaredDeviation,
            bounds,
            gap_tolerance: 0.0,
        };
        let plan = check(&graph, &bounds).unwrap();
        let session = SolverSession::new(Duration::from_secs(30), 2).unwrap();
        let outcome = solve(&problem, &plan, &session, None, params());
        let best = outcome.best.unwrap();
        let regions = regions_of(&best);
        assert_eq!(regions.len(), 12);
        for region in regions {
            assert_eq!(region.len(), 12);
            assert!(graph.is_connected_subset(&region));
        }
    }

    #[test]
    fn peeling_leaves_no_stranded_pocket() {
        // 10 cells per region on a 10x10 grid, no repair needed
        let (graph, features) = lattice(10, 10, |c, r| ((c * 13 + r * 7) % 10) as f64);
        let bounds = Bounds { min_regions: 10, max_regions: 10, min_size: 10, max_size: 10 };
        let problem = Problem {
            graph: &graph,
            features: &features,
            objective: &SumSquaredDeviation,
            bounds,
            gap_tolerance: 0.0,
        };
        let mut partition = Partition::new(&problem, 10);
        let rank: Vec<u64> = (0..100).collect();
        let seeds = partition.peel(&rank, false);
        assert_eq!(seeds.len(), 10);
        assert_eq!(seeds[0], 0);
        let solution = partition.into_solution().unwrap();
        for region in regions_of(&solution) {
            assert_eq!(region.len(), 10);
        }
    }

    #[test]
    fn chains_move_pixels_between_distant_regions() {
        let (graph, features) = lattice(6, 1, |c, _| c as f64);
        let problem = Problem {
            graph: &graph,
            features: &features,
            objective: &SumSquaredDeviation,
            bounds: Bounds { min_regions: 3, max_regions: 3, min_size: 2, max_size: 2 },
            gap_tolerance: 0.0,
        };

        let mut short = Partition::new(&problem, 3);
        for (v, &r) in [0, 1, 1, 2, 2, 2].iter().enumerate() {
            short.assign(v, r);
        }
        // The only neighbor of region 0 is already at the minimum
        assert!(!short.pull(0));
        assert!(short.pull_chain(0));
        assert_eq!(short.labels, vec![0, 0, 1, 1, 2, 2]);

        let mut long = Partition::new(&problem, 3);
        for (v, &r) in [0, 0, 0, 1, 1, 2].iter().enumerate() {
            long.assign(v, r);
        }
        assert!(long.push_chain(0));
        assert_eq!(long.labels, vec![0, 0, 1, 1, 2, 2]);
        assert!(long.into_solution().is_some());
    }

    #[test]
    fn failed_rounds_report_the_best_broken_labeling() {
        // A star cannot be cut into two connected pairs
        let ids = (0..4).map(PixelId).collect();
        let graph = AdjacencyGraph::from_edges(ids, vec![(0, 1, 1.0), (0, 2, 1.0), (0, 3, 1.0)]);
        let features = FeatureMatrix::from_rows(&[vec![0.0], vec![1.0], vec![2.0], vec![3.0]]);
        let bounds = Bounds { min_regions: 2, max_regions: 2, min_size: 2, max_size: 2 };
        let problem = Problem {
            graph: &graph,
            features: &features,
            objective: &SumSquaredDeviation,
            bounds,
            gap_tolerance: 0.0,
        };
        let plan = check(&graph, &bounds).unwrap();
        let session = SolverSession::new(Duration::from_secs(30), 2).unwrap();
        let outcome = solve(&problem, &plan, &session, None, HeuristicParams { max_attempts: 9, ..params() });
        assert!(outcome.best.is_none());
        assert_eq!(outcome.attempts, 9);
        assert_eq!(outcome.rounds, 3);
        assert!(outcome.best_invalid.is_some());
    }
}
