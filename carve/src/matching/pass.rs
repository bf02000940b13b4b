//! Detection pass internals.
//!
//! One [`DetectionPass`] consumes one event stream. It owns the per-lane
//! running-thread table, one machine chain per scoped thread (or a single
//! global chain for cross-thread scopes), and the synthetic root that
//! collects depth-0 executions. Nothing here survives the pass; the
//! engine builds a fresh pass per run, so a cancelled run leaves no state
//! behind.

use std::collections::{BTreeMap, HashMap};

use carve_common::{
    Event, LaneId, Tid, TimeRange, Timestamp, FIELD_COMM, FIELD_NEXT_COMM, FIELD_NEXT_TID,
    FIELD_PREV_COMM, FIELD_PREV_TID, FIELD_TID, SCHED_SWITCH,
};
use log::{debug, trace};

use crate::matching::execution::{Execution, ExecutionTree, END_OF_STREAM};
use crate::matching::scope::TidScope;
use crate::pattern::{DepthSpec, MatchingEvent, MatchingMode, PatternSpecification};

/// Counters kept by one detection pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassStats {
    pub events: u64,
    pub switch_events: u64,
    /// Switch events missing prev/next tid fields; skipped, not fatal.
    pub malformed_switches: u64,
    pub sealed: u64,
    /// Executions discarded by filters or a failed final count check.
    pub rejected: u64,
    /// Executions still open when the stream ended (non-all-in-one).
    pub discarded_open: u64,
    /// Events offered to a chain solely because a rule awaited a
    /// tid-binding predicate.
    pub broadcasts: u64,
}

/// Resolved thread scope configuration for a pass.
#[derive(Debug, Clone)]
pub(crate) enum ScopeSetup {
    /// One machine chain per listed thread.
    PerThread(Vec<Tid>),
    /// A single chain whose candidate sets grow from comm prefixes.
    Global { start_comm: Vec<String>, end_comm: Vec<String> },
}

/// A rule match with its owning thread resolved.
struct BoundaryMatch {
    tid: Tid,
    label: String,
}

/// An execution under construction, with its lane accounting anchors and
/// count-filter counters. Sealing converts it into a plain [`Execution`].
struct OpenExec {
    exec: Execution,
    on_lane: bool,
    last_change: Timestamp,
    filter_counts: Vec<u64>,
}

impl OpenExec {
    fn start(
        event: &Event,
        m: BoundaryMatch,
        depth_spec: &DepthSpec,
        run_table: &HashMap<Tid, bool>,
    ) -> Self {
        let on_lane = run_table.get(&m.tid).copied().unwrap_or(false);
        let mut open = Self {
            exec: Execution::open(event.timestamp, m.tid, m.label),
            on_lane,
            last_change: event.timestamp,
            filter_counts: vec![0; depth_spec.filters.len()],
        };
        // The opening event lies inside the span and is counted.
        open.count_event(depth_spec, event);
        open
    }

    fn count_event(&mut self, depth_spec: &DepthSpec, event: &Event) {
        for (filter, count) in depth_spec.filters.iter().zip(&mut self.filter_counts) {
            if filter.counts_event(event) {
                *count += 1;
            }
        }
    }

    fn counts_unsatisfiable(&self, depth_spec: &DepthSpec) -> bool {
        depth_spec
            .filters
            .iter()
            .zip(&self.filter_counts)
            .any(|(filter, count)| filter.count_unsatisfiable(*count))
    }

    fn final_counts_ok(&self, depth_spec: &DepthSpec) -> bool {
        depth_spec
            .filters
            .iter()
            .zip(&self.filter_counts)
            .all(|(filter, count)| filter.count_satisfied(*count))
    }

    /// Account the elapsed segment against running or preempted time.
    fn settle(&mut self, now: Timestamp) {
        let delta = now.since(self.last_change);
        if self.on_lane {
            self.exec.running_time = self.exec.running_time.saturating_add(delta);
        } else {
            self.exec.preempted_time = self.exec.preempted_time.saturating_add(delta);
        }
        self.last_change = now;
    }
}

/// Per-depth machine state. `child` handles depth + 1 and only advances
/// while this depth holds an open execution.
struct MatchingState {
    depth: usize,
    /// Next rule index awaited while open (Disjoint only).
    progress: usize,
    open: Option<OpenExec>,
    child: Option<Box<MatchingState>>,
}

impl MatchingState {
    fn new_chain(depth_count: usize) -> Self {
        let mut state =
            MatchingState { depth: depth_count - 1, progress: 0, open: None, child: None };
        for depth in (0..depth_count - 1).rev() {
            state =
                MatchingState { depth, progress: 0, open: None, child: Some(Box::new(state)) };
        }
        state
    }
}

struct StateChain {
    scope: TidScope,
    root: MatchingState,
}

impl StateChain {
    fn new(scope: TidScope, depth_count: usize) -> Self {
        Self { scope, root: MatchingState::new_chain(depth_count) }
    }
}

enum ChainSet {
    PerThread { configured: Vec<Tid>, chains: BTreeMap<Tid, StateChain> },
    Global(StateChain),
}

pub(crate) struct DetectionPass<'a> {
    spec: &'a PatternSpecification,
    chain_set: ChainSet,
    lane_table: HashMap<LaneId, Tid>,
    run_table: HashMap<Tid, bool>,
    root: Execution,
    range: TimeRange,
    last_timestamp: Option<Timestamp>,
    pub(crate) stats: PassStats,
}

impl<'a> DetectionPass<'a> {
    pub(crate) fn new(
        spec: &'a PatternSpecification,
        setup: &ScopeSetup,
        range: TimeRange,
    ) -> Self {
        let chain_set = match setup {
            ScopeSetup::PerThread(tids) => ChainSet::PerThread {
                configured: tids.clone(),
                chains: BTreeMap::new(),
            },
            ScopeSetup::Global { start_comm, end_comm } => ChainSet::Global(StateChain::new(
                TidScope::different_tids(start_comm.clone(), end_comm.clone()),
                spec.depths.len(),
            )),
        };
        Self {
            spec,
            chain_set,
            lane_table: HashMap::new(),
            run_table: HashMap::new(),
            root: Execution::open(range.begin, Tid(0), "trace"),
            range,
            last_timestamp: None,
            stats: PassStats::default(),
        }
    }

    pub(crate) fn process_event(&mut self, event: &Event) {
        self.stats.events += 1;
        self.last_timestamp = Some(event.timestamp);

        // Scheduler bookkeeping happens before matching, so the switch
        // event itself already belongs to the incoming thread.
        if event.name == SCHED_SWITCH {
            self.stats.switch_events += 1;
            match (event.tid_field(FIELD_PREV_TID), event.tid_field(FIELD_NEXT_TID)) {
                (Some(prev), Some(next)) => {
                    self.lane_table.insert(event.lane, next);
                    self.flip_run_state(prev, event.timestamp, false);
                    self.flip_run_state(next, event.timestamp, true);
                }
                _ => {
                    self.stats.malformed_switches += 1;
                    trace!("switch without prev/next tid at {}", event.timestamp.0);
                }
            }
        }

        self.observe_comms(event);
        self.apply_filters(event);
        self.offer(event);
    }

    /// Seal all-in-one executions at the stream end, discard everything
    /// else still open, and hand the tree over.
    pub(crate) fn finish(mut self) -> (ExecutionTree, PassStats) {
        let final_ts = self.last_timestamp.unwrap_or(self.range.begin);
        let spec = self.spec;
        match &mut self.chain_set {
            ChainSet::Global(chain) => {
                finalize_state(&mut chain.root, spec, final_ts, &mut self.root.children, &mut self.stats);
            }
            ChainSet::PerThread { chains, .. } => {
                for chain in chains.values_mut() {
                    finalize_state(&mut chain.root, spec, final_ts, &mut self.root.children, &mut self.stats);
                }
            }
        }
        self.root.seal(final_ts, Tid(0), END_OF_STREAM);
        debug!(
            "pass complete: {} events ({} switches), {} sealed, {} rejected, {} discarded open",
            self.stats.events,
            self.stats.switch_events,
            self.stats.sealed,
            self.stats.rejected,
            self.stats.discarded_open
        );
        (ExecutionTree { root: self.root }, self.stats)
    }

    /// Update run-state accounting for every open execution owned by `tid`.
    fn flip_run_state(&mut self, tid: Tid, now: Timestamp, running: bool) {
        let entry = self.run_table.entry(tid).or_insert(false);
        if *entry == running {
            return;
        }
        *entry = running;
        let mut settle = |open: &mut OpenExec| {
            if open.exec.start_tid == tid {
                open.settle(now);
                open.on_lane = running;
            }
        };
        match &mut self.chain_set {
            ChainSet::Global(chain) => for_each_open(&mut chain.root, &mut settle),
            ChainSet::PerThread { chains, .. } => {
                for chain in chains.values_mut() {
                    for_each_open(&mut chain.root, &mut settle);
                }
            }
        }
    }

    /// Grow a cross-thread scope from any (tid, comm) pairs on the event.
    fn observe_comms(&mut self, event: &Event) {
        let ChainSet::Global(chain) = &mut self.chain_set else {
            return;
        };
        const PAIRS: [(&str, &str); 3] = [
            (FIELD_PREV_TID, FIELD_PREV_COMM),
            (FIELD_NEXT_TID, FIELD_NEXT_COMM),
            (FIELD_TID, FIELD_COMM),
        ];
        for (tid_field, comm_field) in PAIRS {
            if let (Some(tid), Some(comm)) = (event.tid_field(tid_field), event.str_field(comm_field)) {
                chain.scope.observe_comm(tid, comm);
            }
        }
    }

    /// Count filters span the whole stream: every event inside an open
    /// execution's range advances its counters, whichever thread it came
    /// from. This mirrors how filter inference counts example ranges.
    fn apply_filters(&mut self, event: &Event) {
        let spec = self.spec;
        match &mut self.chain_set {
            ChainSet::Global(chain) => filter_state(&mut chain.root, spec, event, &mut self.stats),
            ChainSet::PerThread { chains, .. } => {
                for chain in chains.values_mut() {
                    filter_state(&mut chain.root, spec, event, &mut self.stats);
                }
            }
        }
    }

    fn offer(&mut self, event: &Event) {
        let spec = self.spec;
        let lane_tid = self.lane_table.get(&event.lane).copied();
        match &mut self.chain_set {
            ChainSet::Global(chain) => {
                let StateChain { scope, root: state } = chain;
                advance_state(
                    state,
                    spec,
                    scope,
                    event,
                    lane_tid,
                    &self.run_table,
                    &mut self.root.children,
                    &mut self.stats,
                );
            }
            ChainSet::PerThread { configured, chains } => {
                // Chains come to life lazily: on the first event routed to
                // their thread, or on a first-rule binding match naming them.
                if let Some(tid) = lane_tid {
                    if configured.contains(&tid) {
                        chains
                            .entry(tid)
                            .or_insert_with(|| StateChain::new(TidScope::SameTid(tid), spec.depths.len()));
                    }
                }
                let first_rule = &spec.depths[0].rules[0];
                if first_rule.has_tid_binding() && first_rule.plain_match(event) {
                    for field in first_rule.binding_fields() {
                        if let Some(tid) = event.tid_field(field) {
                            if configured.contains(&tid) {
                                chains.entry(tid).or_insert_with(|| {
                                    StateChain::new(TidScope::SameTid(tid), spec.depths.len())
                                });
                            }
                        }
                    }
                }

                for (tid, chain) in chains.iter_mut() {
                    let routed = lane_tid == Some(*tid);
                    let broadcast = !routed && awaits_binding(&chain.root, spec);
                    if !routed && !broadcast {
                        continue;
                    }
                    if broadcast {
                        self.stats.broadcasts += 1;
                    }
                    let StateChain { scope, root: state } = chain;
                    advance_state(
                        state,
                        spec,
                        scope,
                        event,
                        lane_tid,
                        &self.run_table,
                        &mut self.root.children,
                        &mut self.stats,
                    );
                }
            }
        }
    }
}

/// Name and value-predicate match plus owning-thread resolution. Boundary
/// validation against the scope is the caller's job; which of start/end
/// applies depends on the mode.
fn match_rule(
    rule: &MatchingEvent,
    event: &Event,
    scope: &TidScope,
    lane_tid: Option<Tid>,
) -> Option<BoundaryMatch> {
    if !rule.plain_match(event) {
        return None;
    }
    let tid = if rule.has_tid_binding() {
        scope.resolve_owner(resolve_binding(rule, event, scope)?)
    } else {
        lane_tid?
    };
    Some(BoundaryMatch { tid, label: event.name.clone() })
}

/// Try each scope candidate in ascending order, short-circuiting on the
/// first id all binding fields agree on.
fn resolve_binding(rule: &MatchingEvent, event: &Event, scope: &TidScope) -> Option<Tid> {
    'candidates: for candidate in scope.candidates() {
        for field in rule.binding_fields() {
            match event.int_field(field) {
                Some(value) if value == i64::from(candidate.0) => {}
                _ => continue 'candidates,
            }
        }
        return Some(candidate);
    }
    None
}

fn start_admitted(depth_spec: &DepthSpec, ts: Timestamp) -> bool {
    depth_spec.filters.iter().all(|f| f.admits_start(ts))
}

/// The opening boundary lies inside the span, so its fields face the
/// depth's value filters like any later occurrence.
fn violates_values(depth_spec: &DepthSpec, event: &Event) -> bool {
    depth_spec.filters.iter().any(|f| f.value_violation(event))
}

/// Whether this chain's currently awaited rule (at any active depth)
/// carries a tid-binding predicate, i.e. whether events must be broadcast
/// to it regardless of lane routing.
fn awaits_binding(state: &MatchingState, spec: &PatternSpecification) -> bool {
    let depth_spec = &spec.depths[state.depth];
    let awaited = match depth_spec.mode {
        MatchingMode::AllInOne => {
            if state.open.is_none() {
                Some(&depth_spec.rules[0])
            } else {
                None
            }
        }
        MatchingMode::Continuous => Some(&depth_spec.rules[0]),
        MatchingMode::Disjoint => {
            if state.open.is_none() {
                Some(&depth_spec.rules[0])
            } else {
                depth_spec.rules.get(state.progress)
            }
        }
    };
    if awaited.is_some_and(MatchingEvent::has_tid_binding) {
        return true;
    }
    if state.open.is_some() {
        if let Some(child) = &state.child {
            return awaits_binding(child, spec);
        }
    }
    false
}

fn reset_subtree(state: &mut MatchingState) {
    state.open = None;
    state.progress = 0;
    if let Some(child) = &mut state.child {
        reset_subtree(child);
    }
}

fn for_each_open(state: &mut MatchingState, f: &mut impl FnMut(&mut OpenExec)) {
    if let Some(open) = &mut state.open {
        f(open);
        if let Some(child) = &mut state.child {
            for_each_open(child, f);
        }
    }
}

/// Advance count filters; a violated filter rejects the open execution and
/// everything open beneath it.
fn filter_state(
    state: &mut MatchingState,
    spec: &PatternSpecification,
    event: &Event,
    stats: &mut PassStats,
) {
    let depth_spec = &spec.depths[state.depth];
    let mut reject = false;
    if let Some(open) = &mut state.open {
        open.count_event(depth_spec, event);
        reject = open.counts_unsatisfiable(depth_spec)
            || depth_spec.filters.iter().any(|f| f.value_violation(event));
    } else {
        return;
    }
    if reject {
        trace!(
            "depth {} execution rejected by filters at {}",
            state.depth,
            event.timestamp.0
        );
        reset_subtree(state);
        stats.rejected += 1;
        return;
    }
    if let Some(child) = &mut state.child {
        filter_state(child, spec, event, stats);
    }
}

#[allow(clippy::too_many_arguments)]
fn advance_state(
    state: &mut MatchingState,
    spec: &PatternSpecification,
    scope: &TidScope,
    event: &Event,
    lane_tid: Option<Tid>,
    run_table: &HashMap<Tid, bool>,
    parent_children: &mut Vec<Execution>,
    stats: &mut PassStats,
) {
    let depth_spec = &spec.depths[state.depth];
    match depth_spec.mode {
        MatchingMode::AllInOne => {
            // One open per machine; sealed only when the stream ends.
            if state.open.is_none() {
                if let Some(m) = match_rule(&depth_spec.rules[0], event, scope, lane_tid) {
                    if scope.validates_start(m.tid) && start_admitted(depth_spec, event.timestamp)
                    {
                        if violates_values(depth_spec, event) {
                            stats.rejected += 1;
                        } else {
                            trace!("depth {} opened on {} at {}", state.depth, event.name, event.timestamp.0);
                            state.open = Some(OpenExec::start(event, m, depth_spec, run_table));
                        }
                    }
                }
            }
        }
        MatchingMode::Continuous => {
            if let Some(m) = match_rule(&depth_spec.rules[0], event, scope, lane_tid) {
                if state.open.is_some() && scope.validates_end(m.tid) {
                    if let Some(mut open) = state.open.take() {
                        if let Some(child) = &mut state.child {
                            reset_subtree(child);
                        }
                        open.settle(event.timestamp);
                        if open.final_counts_ok(depth_spec) {
                            open.exec.seal(event.timestamp, m.tid, m.label.clone());
                            parent_children.push(open.exec);
                            stats.sealed += 1;
                        } else {
                            stats.rejected += 1;
                        }
                    }
                }
                // The boundary both seals and opens at the same timestamp.
                if state.open.is_none()
                    && scope.validates_start(m.tid)
                    && start_admitted(depth_spec, event.timestamp)
                {
                    if violates_values(depth_spec, event) {
                        stats.rejected += 1;
                    } else {
                        state.open = Some(OpenExec::start(event, m, depth_spec, run_table));
                    }
                }
            }
        }
        MatchingMode::Disjoint => {
            if state.open.is_none() {
                if let Some(m) = match_rule(&depth_spec.rules[0], event, scope, lane_tid) {
                    if scope.validates_start(m.tid) && start_admitted(depth_spec, event.timestamp)
                    {
                        if violates_values(depth_spec, event) {
                            stats.rejected += 1;
                        } else {
                            let mut open = OpenExec::start(event, m, depth_spec, run_table);
                            if depth_spec.rules.len() == 1 {
                                // A single-rule depth opens and seals on one event.
                                let tid = open.exec.start_tid;
                                if scope.validates_end(tid) && open.final_counts_ok(depth_spec) {
                                    let label = open.exec.start_label.clone();
                                    open.settle(event.timestamp);
                                    open.exec.seal(event.timestamp, tid, label);
                                    parent_children.push(open.exec);
                                    stats.sealed += 1;
                                } else {
                                    stats.rejected += 1;
                                }
                            } else {
                                state.open = Some(open);
                                state.progress = 1;
                            }
                        }
                    }
                }
            } else {
                debug_assert!(state.progress < depth_spec.rules.len());
                let rule = &depth_spec.rules[state.progress];
                if let Some(m) = match_rule(rule, event, scope, lane_tid) {
                    if state.progress + 1 == depth_spec.rules.len() {
                        if scope.validates_end(m.tid) {
                            if let Some(mut open) = state.open.take() {
                                if let Some(child) = &mut state.child {
                                    reset_subtree(child);
                                }
                                open.settle(event.timestamp);
                                if open.final_counts_ok(depth_spec) {
                                    open.exec.seal(event.timestamp, m.tid, m.label);
                                    parent_children.push(open.exec);
                                    stats.sealed += 1;
                                } else {
                                    stats.rejected += 1;
                                }
                            }
                            state.progress = 0;
                        }
                    } else {
                        state.progress += 1;
                    }
                }
            }
        }
    }

    // Depth d + 1 sees the event only while depth d is open. A depth that
    // opened on this very event lets its child see it as well.
    if let Some(open) = &mut state.open {
        if let Some(child) = &mut state.child {
            advance_state(
                child,
                spec,
                scope,
                event,
                lane_tid,
                run_table,
                &mut open.exec.children,
                stats,
            );
        }
    }
}

/// End of stream: all-in-one levels seal (children first, so nested
/// all-in-one executions land inside their parent), everything else open
/// is discarded.
fn finalize_state(
    state: &mut MatchingState,
    spec: &PatternSpecification,
    final_ts: Timestamp,
    parent_children: &mut Vec<Execution>,
    stats: &mut PassStats,
) {
    let depth_spec = &spec.depths[state.depth];
    if let Some(mut open) = state.open.take() {
        if depth_spec.mode == MatchingMode::AllInOne {
            if let Some(child) = &mut state.child {
                finalize_state(child, spec, final_ts, &mut open.exec.children, stats);
            }
            open.settle(final_ts);
            if open.final_counts_ok(depth_spec) {
                let tid = open.exec.start_tid;
                open.exec.seal(final_ts, tid, END_OF_STREAM);
                parent_children.push(open.exec);
                stats.sealed += 1;
            } else {
                stats.rejected += 1;
            }
        } else {
            stats.discarded_open += 1;
            if let Some(child) = &mut state.child {
                reset_subtree(child);
            }
        }
    }
    state.progress = 0;
}
