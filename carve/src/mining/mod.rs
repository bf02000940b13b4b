//! # Episode Mining
//!
//! Discovers frequently repeating event-name sequences (episodes) in one
//! thread's history, without a pattern being given up front. The search
//! grows a prefix tree of episodes depth-first:
//!
//! 1. Intern event names into symbol codes and record each code's
//!    positions in the capped stream.
//! 2. Derive the support threshold: the caller's floor, optionally raised
//!    so only roughly the top-K most frequent symbols stay admissible,
//!    optionally lowered so every requested start symbol stays admissible.
//! 3. Grow episodes symbol by symbol. A child's occurrence list merges
//!    each parent window `[b, e]` with the first child position strictly
//!    after `e`, then keeps a maximal set of non-overlapping windows
//!    greedily. Support is the number of kept windows.
//! 4. A branch stops when support falls to the threshold, when the
//!    episode would reuse a symbol, or when the wall-clock budget runs
//!    out. Leaves of the tree are reported.
//!
//! Support is monotone along a branch (a longer episode never has more
//! occurrences), so pruning at the threshold is exact, not heuristic.
//! When the budget expires the deepest active episode is still reported
//! unless [`MinerConfig::require_maximal`] says to drop such leaves.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use carve_common::{
    Event, LaneId, Tid, TimeRange, FIELD_NEXT_TID, FIELD_PREV_TID, FIELD_TID, SCHED_SWITCH,
};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::domain::Outcome;
use crate::source::EventSource;

// ============================================================================
// Configuration and Output
// ============================================================================

#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Hard cap on mined events; the stream is cut off beyond it.
    pub max_events: usize,
    /// Minimum support: episodes must occur strictly more often.
    pub support_floor: usize,
    /// Keep only symbols among roughly the K most frequent, ties dropped.
    pub top_k: Option<usize>,
    /// Restrict episode roots to these names and keep them admissible.
    pub start_symbols: Vec<String>,
    /// Wall-clock budget for the tree search.
    pub budget: Duration,
    /// Drop leaves that exist only because the budget expired.
    pub require_maximal: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            support_floor: 2,
            top_k: None,
            start_symbols: Vec::new(),
            budget: Duration::from_secs(5),
            require_maximal: false,
        }
    }
}

/// Event-name interner. Codes are dense and assigned in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct SymbolDictionary {
    names: Vec<String>,
    codes: HashMap<String, u32>,
}

impl SymbolDictionary {
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&code) = self.codes.get(name) {
            return code;
        }
        let code = self.names.len() as u32;
        self.names.push(name.to_string());
        self.codes.insert(name.to_string(), code);
        code
    }

    pub fn code(&self, name: &str) -> Option<u32> {
        self.codes.get(name).copied()
    }

    pub fn name(&self, code: u32) -> Option<&str> {
        self.names.get(code as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A mined episode: an ordered symbol sequence and its support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub symbols: Vec<u32>,
    pub support: usize,
}

impl Episode {
    /// Symbol names in episode order. Unknown codes render as "?".
    pub fn decode<'a>(&self, dictionary: &'a SymbolDictionary) -> Vec<&'a str> {
        self.symbols.iter().map(|&code| dictionary.name(code).unwrap_or("?")).collect()
    }
}

#[derive(Debug)]
pub struct MiningResult {
    /// Leaf episodes, most supported first, then lexicographic.
    pub episodes: Vec<Episode>,
    pub dictionary: SymbolDictionary,
    /// Events actually mined after filtering and capping.
    pub event_count: usize,
    /// True when the budget cut the search short; reported leaves may
    /// then be non-maximal.
    pub budget_exhausted: bool,
}

// ============================================================================
// Miner
// ============================================================================

pub struct EpisodeMiner {
    config: MinerConfig,
}

impl EpisodeMiner {
    pub fn new(config: MinerConfig) -> Self {
        Self { config }
    }

    /// Mine a pre-filtered event sequence.
    pub fn mine(
        &self,
        events: impl IntoIterator<Item = Event>,
        token: &CancellationToken,
    ) -> Outcome<MiningResult> {
        let deadline = Instant::now() + self.config.budget;

        let mut dictionary = SymbolDictionary::default();
        let mut codes = Vec::new();
        for event in events.into_iter().take(self.config.max_events) {
            if token.is_cancelled() {
                return Outcome::Cancelled;
            }
            codes.push(dictionary.intern(&event.name));
        }

        let mut positions: Vec<Vec<usize>> = vec![Vec::new(); dictionary.len()];
        for (index, &code) in codes.iter().enumerate() {
            positions[code as usize].push(index);
        }

        let threshold = self.derive_threshold(&dictionary, &positions);
        let roots = self.roots(&dictionary, &positions, threshold);
        debug!(
            "mining {} events, {} symbols, threshold {}, {} roots",
            codes.len(),
            dictionary.len(),
            threshold,
            roots.len()
        );

        let mut search = Search {
            positions: &positions,
            threshold,
            deadline,
            token,
            require_maximal: self.config.require_maximal,
            episodes: Vec::new(),
            budget_exhausted: false,
            cancelled: false,
        };
        let mut used = vec![false; dictionary.len()];
        let mut episode = Vec::new();
        for root in roots {
            let intervals: Vec<(usize, usize)> =
                positions[root as usize].iter().map(|&p| (p, p)).collect();
            episode.push(root);
            used[root as usize] = true;
            search.grow(&mut episode, &intervals, &mut used);
            episode.pop();
            used[root as usize] = false;
            if search.cancelled || search.budget_exhausted {
                break;
            }
        }
        if search.cancelled {
            return Outcome::Cancelled;
        }

        let mut episodes = search.episodes;
        episodes.sort_by(|a, b| {
            b.support.cmp(&a.support).then_with(|| a.symbols.cmp(&b.symbols))
        });
        Outcome::Complete(MiningResult {
            episodes,
            dictionary,
            event_count: codes.len(),
            budget_exhausted: search.budget_exhausted,
        })
    }

    /// Mine one thread's history out of a full trace. An event belongs to
    /// the thread running on its lane (switches count for both sides) or
    /// to the thread its own tid field names.
    pub fn mine_thread(
        &self,
        source: &dyn EventSource,
        range: TimeRange,
        tid: Tid,
        token: &CancellationToken,
    ) -> Outcome<MiningResult> {
        let mut lane_table: HashMap<LaneId, Tid> = HashMap::new();
        let mut kept = Vec::new();
        for event in source.iter_range(range) {
            if token.is_cancelled() {
                return Outcome::Cancelled;
            }
            let mut involved = event.tid_field(FIELD_TID) == Some(tid);
            if event.name == SCHED_SWITCH {
                let prev = event.tid_field(FIELD_PREV_TID);
                let next = event.tid_field(FIELD_NEXT_TID);
                if let Some(next) = next {
                    lane_table.insert(event.lane, next);
                }
                involved = involved || prev == Some(tid) || next == Some(tid);
            } else {
                involved = involved || lane_table.get(&event.lane) == Some(&tid);
            }
            if involved {
                kept.push(event);
                if kept.len() == self.config.max_events {
                    break;
                }
            }
        }
        self.mine(kept, token)
    }

    fn derive_threshold(&self, dictionary: &SymbolDictionary, positions: &[Vec<usize>]) -> usize {
        let mut threshold = self.config.support_floor;
        if let Some(k) = self.config.top_k {
            let mut counts: Vec<usize> = positions.iter().map(Vec::len).collect();
            counts.sort_unstable_by(|a, b| b.cmp(a));
            if counts.len() > k {
                threshold = threshold.max(counts[k]);
            }
        }
        for name in &self.config.start_symbols {
            match dictionary.code(name) {
                Some(code) => {
                    let count = positions[code as usize].len();
                    threshold = threshold.min(count.saturating_sub(1));
                }
                None => warn!("start symbol {name:?} never occurs; ignored"),
            }
        }
        threshold
    }

    fn roots(
        &self,
        dictionary: &SymbolDictionary,
        positions: &[Vec<usize>],
        threshold: usize,
    ) -> Vec<u32> {
        let admissible = |code: &u32| positions[*code as usize].len() > threshold;
        if self.config.start_symbols.is_empty() {
            return (0..dictionary.len() as u32).filter(admissible).collect();
        }
        let mut roots: Vec<u32> = self
            .config
            .start_symbols
            .iter()
            .filter_map(|name| dictionary.code(name))
            .filter(admissible)
            .collect();
        roots.sort_unstable();
        roots.dedup();
        roots
    }
}

// ============================================================================
// Occurrence-List Search
// ============================================================================

/// Merge parent occurrence windows with a symbol's positions: each window
/// `[b, e]` extends to the first position strictly after `e`, and the
/// non-overlapping set is kept greedily (windows arrive sorted by end).
fn merge_extend(parent: &[(usize, usize)], positions: &[usize]) -> Vec<(usize, usize)> {
    let mut merged = Vec::new();
    let mut last_end: Option<usize> = None;
    for &(begin, end) in parent {
        let idx = positions.partition_point(|&p| p <= end);
        let Some(&next) = positions.get(idx) else { continue };
        if last_end.is_none_or(|le| begin > le) {
            merged.push((begin, next));
            last_end = Some(next);
        }
    }
    merged
}

struct Search<'a> {
    positions: &'a [Vec<usize>],
    threshold: usize,
    deadline: Instant,
    token: &'a CancellationToken,
    require_maximal: bool,
    episodes: Vec<Episode>,
    budget_exhausted: bool,
    cancelled: bool,
}

impl Search<'_> {
    fn grow(&mut self, episode: &mut Vec<u32>, intervals: &[(usize, usize)], used: &mut [bool]) {
        if self.token.is_cancelled() {
            self.cancelled = true;
            return;
        }
        if Instant::now() >= self.deadline {
            self.budget_exhausted = true;
            if !self.require_maximal {
                self.report(episode, intervals.len());
            }
            return;
        }

        let mut extended = false;
        for code in 0..self.positions.len() as u32 {
            if used[code as usize] {
                continue;
            }
            let merged = merge_extend(intervals, &self.positions[code as usize]);
            if merged.len() <= self.threshold {
                continue;
            }
            extended = true;
            episode.push(code);
            used[code as usize] = true;
            self.grow(episode, &merged, used);
            episode.pop();
            used[code as usize] = false;
            if self.cancelled || self.budget_exhausted {
                return;
            }
        }
        if !extended {
            self.report(episode, intervals.len());
        }
    }

    fn report(&mut self, episode: &[u32], support: usize) {
        self.episodes.push(Episode { symbols: episode.to_vec(), support });
    }
}
