//! Runtime thread scopes.
//!
//! A [`TidScope`] answers three questions for one machine chain: which
//! thread may open an execution, which may seal it, and which ids a
//! tid-binding predicate may bind to. `SameTid` answers all three with a
//! single fixed id. `DifferentTids` starts with empty candidate sets and
//! grows them as threads whose comm matches a configured prefix show up
//! in the stream. Growth is monotone for the whole pass; ids are never
//! removed.

use std::collections::BTreeSet;

use carve_common::Tid;
use log::trace;

#[derive(Debug, Clone)]
pub enum TidScope {
    /// Boundaries confined to one thread.
    SameTid(Tid),
    /// Start and end boundaries may land on different threads.
    DifferentTids {
        start_tids: BTreeSet<Tid>,
        end_tids: BTreeSet<Tid>,
        start_comm: Vec<String>,
        end_comm: Vec<String>,
    },
}

impl TidScope {
    pub fn different_tids(start_comm: Vec<String>, end_comm: Vec<String>) -> Self {
        TidScope::DifferentTids {
            start_tids: BTreeSet::new(),
            end_tids: BTreeSet::new(),
            start_comm,
            end_comm,
        }
    }

    pub fn validates_start(&self, tid: Tid) -> bool {
        match self {
            TidScope::SameTid(own) => *own == tid,
            TidScope::DifferentTids { start_tids, .. } => start_tids.contains(&tid),
        }
    }

    pub fn validates_end(&self, tid: Tid) -> bool {
        match self {
            TidScope::SameTid(own) => *own == tid,
            TidScope::DifferentTids { end_tids, .. } => end_tids.contains(&tid),
        }
    }

    /// Candidate ids for tid-binding predicates, ascending.
    pub fn candidates(&self) -> Vec<Tid> {
        match self {
            TidScope::SameTid(own) => vec![*own],
            TidScope::DifferentTids { start_tids, end_tids, .. } => {
                start_tids.union(end_tids).copied().collect()
            }
        }
    }

    /// Owner of an execution whose boundary bound `tid`. A same-tid scope
    /// owns everything it matches; a cross-thread scope attributes the
    /// boundary to the bound thread itself.
    pub fn resolve_owner(&self, tid: Tid) -> Tid {
        match self {
            TidScope::SameTid(own) => *own,
            TidScope::DifferentTids { .. } => tid,
        }
    }

    /// Grow the candidate sets from an observed `(tid, comm)` pair.
    pub fn observe_comm(&mut self, tid: Tid, comm: &str) {
        let TidScope::DifferentTids { start_tids, end_tids, start_comm, end_comm } = self else {
            return;
        };
        if start_comm.iter().any(|prefix| comm.starts_with(prefix.as_str()))
            && start_tids.insert(tid)
        {
            trace!("scope grew: {tid} ({comm}) now a start candidate");
        }
        if end_comm.iter().any(|prefix| comm.starts_with(prefix.as_str())) && end_tids.insert(tid)
        {
            trace!("scope grew: {tid} ({comm}) now an end candidate");
        }
    }
}
