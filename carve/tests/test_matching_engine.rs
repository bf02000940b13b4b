use carve::filters::Filter;
use carve::matching::{DetectionResult, MatchingEngine, END_OF_STREAM};
use carve::pattern::{
    DepthSpec, FieldPredicate, MatchingEvent, MatchingMode, PatternSpecification, ScopeSpec,
};
use carve::source::RecordedTrace;
use carve::worker::CancellationToken;
use carve_common::{
    Event, LaneId, Tid, TimeRange, Timestamp, FIELD_COMM, FIELD_NEXT_TID, FIELD_PREV_TID,
    FIELD_TID, SCHED_SWITCH, SCHED_WAKEUP,
};

fn ev(ts: u64, name: &str) -> Event {
    Event::new(Timestamp(ts), LaneId(0), name)
}

fn switch(ts: u64, prev: u32, next: u32) -> Event {
    ev(ts, SCHED_SWITCH)
        .with_field(FIELD_PREV_TID, i64::from(prev))
        .with_field(FIELD_NEXT_TID, i64::from(next))
}

fn rule(names: &[&str]) -> MatchingEvent {
    MatchingEvent { names: names.iter().map(ToString::to_string).collect(), predicates: vec![] }
}

fn binding_rule(names: &[&str], field: &str) -> MatchingEvent {
    MatchingEvent {
        names: names.iter().map(ToString::to_string).collect(),
        predicates: vec![FieldPredicate::TidBinding { field: field.to_string() }],
    }
}

fn same_tid_spec(
    mode: MatchingMode,
    rules: Vec<MatchingEvent>,
    filters: Vec<Filter>,
    tids: &str,
) -> PatternSpecification {
    PatternSpecification {
        depths: vec![DepthSpec { mode, rules, filters }],
        thread_scope: ScopeSpec::SameTid { tids: tids.to_string() },
    }
}

fn detect(spec: PatternSpecification, events: Vec<Event>) -> DetectionResult {
    let engine = MatchingEngine::new(spec, None).expect("engine setup");
    let trace = RecordedTrace::from_events(events);
    engine
        .detect(&trace, TimeRange::unbounded(), &CancellationToken::new())
        .into_complete()
        .expect("pass should run to completion")
}

#[test]
fn test_whole_thread_span_seals_at_stream_end() {
    let result = detect(
        PatternSpecification::whole_thread(Tid(7)),
        vec![switch(12, 1, 7), ev(30, "io_submit"), switch(50, 7, 1)],
    );

    assert_eq!(result.tree.sealed_count(), 1);
    let exec = &result.tree.top_level()[0];
    // The first event attributable to thread 7 opens the span.
    assert_eq!(exec.start_time, Timestamp(12));
    assert_eq!(exec.end_time, Some(Timestamp(50)));
    assert_eq!(exec.end_label, END_OF_STREAM);
    assert_eq!(exec.start_tid, Tid(7));
    assert_eq!(exec.running_time.0, 38, "on-lane from 12 until switched out at 50");
    assert_eq!(exec.preempted_time.0, 0);
    assert_eq!(result.stats.switch_events, 2);
}

#[test]
fn test_wakeup_open_accounts_preemption_before_dispatch() {
    // The wakeup arrives while the lane still runs another thread, so the
    // execution opens via the tid binding and starts preempted.
    let spec = same_tid_spec(
        MatchingMode::AllInOne,
        vec![binding_rule(&[SCHED_WAKEUP], FIELD_TID)],
        vec![],
        "7",
    );
    let result = detect(
        spec,
        vec![
            ev(10, SCHED_WAKEUP).with_field(FIELD_TID, 7i64),
            switch(12, 1, 7),
            ev(30, "io_submit"),
            switch(50, 7, 1),
        ],
    );

    assert_eq!(result.tree.sealed_count(), 1);
    let exec = &result.tree.top_level()[0];
    assert_eq!(exec.start_time, Timestamp(10));
    assert_eq!(exec.start_label, SCHED_WAKEUP);
    assert_eq!(exec.end_label, END_OF_STREAM);
    assert_eq!(exec.preempted_time.0, 2, "woken at 10, dispatched at 12");
    assert_eq!(exec.running_time.0, 38, "on-lane from 12 until switched out at 50");
    assert!(result.stats.broadcasts >= 1, "the wakeup reaches the chain by broadcast");
}

#[test]
fn test_wake_to_switch_out_sequence() {
    // Wakeup opens the execution, the switch-out of the same thread seals
    // it even though the lane belongs to the next thread by then.
    let spec = same_tid_spec(
        MatchingMode::Disjoint,
        vec![
            binding_rule(&[SCHED_WAKEUP], FIELD_TID),
            binding_rule(&[SCHED_SWITCH], FIELD_PREV_TID),
        ],
        vec![],
        "7",
    );
    let result = detect(
        spec,
        vec![
            ev(10, SCHED_WAKEUP).with_field(FIELD_TID, 7i64),
            switch(12, 1, 7),
            switch(50, 7, 2),
        ],
    );

    assert_eq!(result.tree.sealed_count(), 1);
    let exec = &result.tree.top_level()[0];
    assert_eq!(exec.range(), Some(TimeRange::new(Timestamp(10), Timestamp(50))));
    assert_eq!(exec.start_tid, Tid(7));
    assert_eq!(exec.end_tid, Tid(7));
    assert_eq!(exec.start_label, SCHED_WAKEUP);
    assert_eq!(exec.end_label, SCHED_SWITCH);
    assert_eq!(exec.preempted_time.0, 2);
    assert_eq!(exec.running_time.0, 38);
}

#[test]
fn test_continuous_tiles_the_stream() {
    // Every switch-in of thread 5 both seals the previous tile and opens
    // the next one at the same timestamp.
    let spec = same_tid_spec(MatchingMode::Continuous, vec![rule(&[SCHED_SWITCH])], vec![], "5");
    let result =
        detect(spec, vec![switch(0, 1, 5), switch(100, 2, 5), switch(250, 3, 5)]);

    let tiles = result.tree.top_level();
    assert_eq!(tiles.len(), 2);
    assert_eq!(tiles[0].range(), Some(TimeRange::new(Timestamp(0), Timestamp(100))));
    assert_eq!(tiles[1].range(), Some(TimeRange::new(Timestamp(100), Timestamp(250))));
    // Tiles share the boundary timestamp but nothing else.
    assert_eq!(tiles[0].end_time, Some(tiles[1].start_time));
    assert_eq!(tiles[0].running_time.0, 100);
    assert_eq!(tiles[1].running_time.0, 150);
    assert_eq!(result.stats.sealed, 2);
    assert_eq!(result.stats.discarded_open, 1, "the tile opened at 250 never seals");
}

#[test]
fn test_disjoint_rules_match_strictly_in_order() {
    let spec = same_tid_spec(
        MatchingMode::Disjoint,
        vec![rule(&["req_start"]), rule(&["req_mid"]), rule(&["req_end"])],
        vec![],
        "7",
    );
    let result = detect(
        spec,
        vec![
            switch(1, 0, 7),
            ev(10, "req_start"),
            ev(20, "req_mid"),
            ev(30, "req_end"),
            ev(40, "req_start"),
            // Out-of-order end while the machine awaits req_mid: ignored.
            ev(50, "req_end"),
            ev(60, "req_mid"),
            // A second start does not restart the open execution.
            ev(80, "req_start"),
            ev(90, "req_mid"),
            ev(100, "req_end"),
        ],
    );

    let execs = result.tree.top_level();
    assert_eq!(execs.len(), 2);
    assert_eq!(execs[0].range(), Some(TimeRange::new(Timestamp(10), Timestamp(30))));
    assert_eq!(execs[1].range(), Some(TimeRange::new(Timestamp(40), Timestamp(100))));
    assert!(execs.iter().all(|e| e.end_label == "req_end"));
}

#[test]
fn test_disjoint_single_rule_opens_and_seals_on_one_event() {
    let spec = same_tid_spec(MatchingMode::Disjoint, vec![rule(&["tick"])], vec![], "7");
    let result = detect(spec, vec![switch(1, 0, 7), ev(10, "tick"), ev(20, "tick")]);

    let execs = result.tree.top_level();
    assert_eq!(execs.len(), 2);
    for exec in execs {
        assert_eq!(exec.start_time, exec.end_time.unwrap());
        assert_eq!(exec.start_label, "tick");
        assert_eq!(exec.end_label, "tick");
    }
}

#[test]
fn test_nested_depth_stays_inside_parent() {
    let spec = PatternSpecification {
        depths: vec![
            DepthSpec {
                mode: MatchingMode::Disjoint,
                rules: vec![rule(&["s0"]), rule(&["e0"])],
                filters: vec![],
            },
            DepthSpec {
                mode: MatchingMode::Disjoint,
                rules: vec![rule(&["ia"]), rule(&["ib"])],
                filters: vec![],
            },
        ],
        thread_scope: ScopeSpec::SameTid { tids: "7".to_string() },
    };
    let result = detect(
        spec,
        vec![
            switch(1, 0, 7),
            ev(10, "s0"),
            ev(20, "ia"),
            ev(30, "ib"),
            // Opens a child that the parent's seal at 50 discards.
            ev(40, "ia"),
            ev(50, "e0"),
            // Outside any open parent: the inner depth must not match.
            ev(60, "ia"),
            ev(70, "ib"),
            ev(80, "s0"),
            ev(85, "ib"),
            ev(90, "e0"),
        ],
    );

    let tops = result.tree.top_level();
    assert_eq!(tops.len(), 2);
    assert_eq!(tops[0].range(), Some(TimeRange::new(Timestamp(10), Timestamp(50))));
    assert_eq!(tops[0].children.len(), 1);
    let child = &tops[0].children[0];
    assert_eq!(child.range(), Some(TimeRange::new(Timestamp(20), Timestamp(30))));
    assert!(
        tops[0].start_time <= child.start_time && child.end_time <= tops[0].end_time,
        "child span must be contained in its parent"
    );
    assert_eq!(tops[1].range(), Some(TimeRange::new(Timestamp(80), Timestamp(90))));
    assert!(tops[1].children.is_empty());
    assert_eq!(result.tree.sealed_count(), 3);
}

#[test]
fn test_count_filter_rejects_and_all_in_one_reopens() {
    let spec = same_tid_spec(
        MatchingMode::AllInOne,
        vec![rule(&["begin"])],
        vec![Filter::count_less_than(vec!["noise".to_string()], 2)],
        "7",
    );
    let result = detect(
        spec,
        vec![
            switch(1, 0, 7),
            ev(10, "begin"),
            ev(20, "noise"),
            // Second occurrence makes the less-than filter unsatisfiable.
            ev(30, "noise"),
            ev(40, "begin"),
        ],
    );

    assert_eq!(result.stats.rejected, 1);
    assert_eq!(result.tree.sealed_count(), 1);
    let exec = &result.tree.top_level()[0];
    assert_eq!(exec.start_time, Timestamp(40), "a fresh execution opens after rejection");
    assert_eq!(exec.end_label, END_OF_STREAM);
}

#[test]
fn test_value_filter_rejects_immediately() {
    let spec = same_tid_spec(
        MatchingMode::AllInOne,
        vec![rule(&["begin"])],
        vec![Filter::value_less_than(vec!["payload".to_string()], "len", 100)],
        "7",
    );
    let result = detect(
        spec,
        vec![switch(1, 0, 7), ev(10, "begin"), ev(20, "payload").with_field("len", 150i64)],
    );

    assert_eq!(result.tree.sealed_count(), 0);
    assert_eq!(result.stats.rejected, 1);
}

#[test]
fn test_value_filter_checks_the_opening_event() {
    let spec = || {
        same_tid_spec(
            MatchingMode::Disjoint,
            vec![rule(&["begin"]), rule(&["end"])],
            vec![Filter::value_less_than(vec!["begin".to_string()], "len", 100)],
            "7",
        )
    };

    // The opener itself carries the violating field: nothing opens.
    let violating = detect(
        spec(),
        vec![switch(1, 0, 7), ev(10, "begin").with_field("len", 500i64), ev(20, "end")],
    );
    assert_eq!(violating.tree.sealed_count(), 0);
    assert_eq!(violating.stats.rejected, 1);

    // A later opener with an admissible field still seals.
    let clean = detect(
        spec(),
        vec![
            switch(1, 0, 7),
            ev(10, "begin").with_field("len", 500i64),
            ev(30, "begin").with_field("len", 50i64),
            ev(40, "end"),
        ],
    );
    assert_eq!(clean.tree.sealed_count(), 1);
    assert_eq!(
        clean.tree.top_level()[0].range(),
        Some(TimeRange::new(Timestamp(30), Timestamp(40)))
    );
}

#[test]
fn test_continuous_boundary_with_violating_field_starts_no_tile() {
    let spec = same_tid_spec(
        MatchingMode::Continuous,
        vec![rule(&["tick"])],
        vec![Filter::value_less_than(vec!["tick".to_string()], "len", 100)],
        "5",
    );
    let result = detect(
        spec,
        vec![
            switch(1, 0, 5),
            ev(10, "tick").with_field("len", 50i64),
            // Breaks the tile open at 10 and cannot start its own tile.
            ev(20, "tick").with_field("len", 500i64),
            ev(30, "tick").with_field("len", 50i64),
            ev(40, "tick").with_field("len", 50i64),
        ],
    );

    assert_eq!(result.stats.rejected, 2);
    assert_eq!(result.tree.sealed_count(), 1);
    assert_eq!(
        result.tree.top_level()[0].range(),
        Some(TimeRange::new(Timestamp(30), Timestamp(40)))
    );
    assert_eq!(result.stats.discarded_open, 1, "the tile opened at 40 never seals");
}

#[test]
fn test_more_than_filter_is_verified_at_seal() {
    let spec = || {
        same_tid_spec(
            MatchingMode::Disjoint,
            vec![rule(&["s"]), rule(&["e"])],
            vec![Filter::count_more_than(vec!["io".to_string()], 1)],
            "7",
        )
    };

    // One io occurrence is not strictly more than 1: rejected at seal.
    let short =
        detect(spec(), vec![switch(1, 0, 7), ev(10, "s"), ev(20, "io"), ev(30, "e")]);
    assert_eq!(short.tree.sealed_count(), 0);
    assert_eq!(short.stats.rejected, 1);

    let enough = detect(
        spec(),
        vec![switch(1, 0, 7), ev(10, "s"), ev(20, "io"), ev(25, "io"), ev(30, "e")],
    );
    assert_eq!(enough.tree.sealed_count(), 1);
    assert_eq!(
        enough.tree.top_level()[0].range(),
        Some(TimeRange::new(Timestamp(10), Timestamp(30)))
    );
}

#[test]
fn test_cross_thread_scope_binds_start_and_end_separately() {
    let spec = PatternSpecification {
        depths: vec![DepthSpec {
            mode: MatchingMode::Disjoint,
            rules: vec![
                binding_rule(&["req_start"], FIELD_TID),
                binding_rule(&["req_end"], FIELD_TID),
            ],
            filters: vec![],
        }],
        thread_scope: ScopeSpec::DifferentTids {
            start_comm: vec!["irq".to_string()],
            end_comm: vec!["worker".to_string()],
        },
    };
    let result = detect(
        spec,
        vec![
            // Comm observations grow the candidate sets.
            ev(5, "thread_name").with_field(FIELD_TID, 3i64).with_field(FIELD_COMM, "irq/9"),
            ev(6, "thread_name").with_field(FIELD_TID, 8i64).with_field(FIELD_COMM, "worker/1"),
            // An end-side thread cannot open the execution.
            ev(8, "req_start").with_field(FIELD_TID, 8i64),
            ev(10, "req_start").with_field(FIELD_TID, 3i64),
            ev(20, "req_end").with_field(FIELD_TID, 8i64),
        ],
    );

    assert_eq!(result.tree.sealed_count(), 1);
    let exec = &result.tree.top_level()[0];
    assert_eq!(exec.start_tid, Tid(3));
    assert_eq!(exec.end_tid, Tid(8));
    assert_eq!(exec.range(), Some(TimeRange::new(Timestamp(10), Timestamp(20))));
}

#[test]
fn test_unknown_lane_owner_matches_nothing_without_binding() {
    // No switch ever names the lane's thread, so wildcard rules have no
    // thread to attribute events to.
    let result = detect(
        PatternSpecification::whole_thread(Tid(7)),
        vec![ev(10, "a"), ev(20, "b")],
    );
    assert_eq!(result.tree.sealed_count(), 0);
    assert_eq!(result.stats.discarded_open, 0);
    assert_eq!(result.stats.events, 2);
}

#[test]
fn test_range_bounds_restrict_the_pass() {
    let engine =
        MatchingEngine::new(PatternSpecification::whole_thread(Tid(7)), None).unwrap();
    let trace = RecordedTrace::from_events(vec![
        ev(5, "x"),
        switch(20, 1, 7),
        ev(30, "x"),
        switch(40, 7, 1),
        ev(50, "x"),
    ]);

    let result = engine
        .detect(
            &trace,
            TimeRange::new(Timestamp(15), Timestamp(45)),
            &CancellationToken::new(),
        )
        .into_complete()
        .unwrap();

    assert_eq!(result.stats.events, 3);
    assert_eq!(result.tree.sealed_count(), 1);
    assert_eq!(
        result.tree.top_level()[0].range(),
        Some(TimeRange::new(Timestamp(20), Timestamp(40)))
    );
}

#[test]
fn test_detection_is_deterministic() {
    let spec = PatternSpecification {
        depths: vec![
            DepthSpec {
                mode: MatchingMode::Disjoint,
                rules: vec![rule(&["s0"]), rule(&["e0"])],
                filters: vec![],
            },
            DepthSpec {
                mode: MatchingMode::Continuous,
                rules: vec![rule(&["tick"])],
                filters: vec![],
            },
        ],
        thread_scope: ScopeSpec::SameTid { tids: "7,9".to_string() },
    };
    let events = vec![
        switch(1, 0, 7),
        ev(10, "s0"),
        ev(20, "tick"),
        ev(30, "tick"),
        ev(40, "tick"),
        ev(50, "e0"),
    ];

    let engine = MatchingEngine::new(spec, None).unwrap();
    let trace = RecordedTrace::from_events(events);
    let token = CancellationToken::new();
    let first = engine.detect(&trace, TimeRange::unbounded(), &token).into_complete().unwrap();
    let second = engine.detect(&trace, TimeRange::unbounded(), &token).into_complete().unwrap();

    assert_eq!(first.tree, second.tree);
    assert_eq!(first.tree.sealed_count(), 3, "one span and two inner tiles");
}

#[test]
fn test_cancelled_token_aborts_the_pass() {
    let engine =
        MatchingEngine::new(PatternSpecification::whole_thread(Tid(7)), None).unwrap();
    let trace = RecordedTrace::from_events(vec![switch(1, 0, 7), ev(10, "x")]);
    let token = CancellationToken::new();
    token.cancel();

    assert!(engine.detect(&trace, TimeRange::unbounded(), &token).is_cancelled());
}
