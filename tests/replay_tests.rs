use dtf_core::{Action, Event, LogLevel, OrchestrationContext, run_turn, run_turn_with};

mod common;
use common::started_history;

// One action per scheduling call, sequence numbers shared across task kinds.
#[test]
fn scheduling_calls_share_one_sequence() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let a = ctx.schedule_activity("A", "1");
        let t = ctx.schedule_timer(500);
        let w = ctx.schedule_wait("Go");
        let s = ctx.schedule_sub_orchestration("Child", "c");
        (a.sequence(), t.sequence(), w.sequence(), s.sequence(), s.child_instance().map(str::to_string))
    };

    let (hist, actions, _logs, out) = run_turn_with(started_history("Flow", ""), "order-7", 0, orchestrator);
    let (a, t, w, s, child) = out.expect("returns without awaiting");
    assert_eq!((a, t, w, s), (1, 2, 3, 4));
    assert_eq!(child.as_deref(), Some("order-7::sub::4"));
    assert_eq!(actions.len(), 4);
    assert!(matches!(&actions[0], Action::CallActivity { id: 1, name, input } if name == "A" && input == "1"));
    assert!(matches!(actions[1], Action::CreateTimer { id: 2, fire_at_ms: 500 }));
    assert!(matches!(&actions[2], Action::WaitExternal { id: 3, name } if name == "Go"));
    assert!(matches!(&actions[3], Action::StartSubOrchestration { id: 4, instance, .. } if instance == "order-7::sub::4"));
    // scheduling events are recorded with the commands
    assert_eq!(hist.len(), 6);
    assert!(matches!(hist[2], Event::ActivityScheduled { id: 1, .. }));
    assert!(matches!(hist[5], Event::SubOrchestrationScheduled { id: 4, .. }));
}

#[test]
fn pending_task_suspends_turn() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let _ = ctx.schedule_activity("A", "1").into_activity().await;
        ctx.trace_info("never reached");
        "done".to_string()
    };

    let (hist, actions, logs, out) = run_turn(started_history("Flow", ""), orchestrator);
    assert!(out.is_none(), "must not complete in first turn");
    assert_eq!(actions.len(), 1, "exactly one action expected");
    assert!(logs.is_empty());
    assert!(matches!(hist.last(), Some(Event::ActivityScheduled { .. })));
}

// Out-of-order completion in history still resolves the right future by id.
#[test]
fn correlation_out_of_order_completion() {
    let history = vec![
        Event::ActivityScheduled {
            id: 1,
            name: "A".into(),
            input: "1".into(),
        },
        Event::TimerFired { id: 42, fire_at_ms: 0 },
        Event::ActivityCompleted {
            id: 1,
            result: "ok".into(),
        },
    ];

    let orchestrator = |ctx: OrchestrationContext| async move { ctx.schedule_activity("A", "1").into_activity().await };

    let (_hist, actions, _logs, out) = run_turn(history, orchestrator);
    assert!(actions.is_empty(), "should resolve from existing completion");
    assert_eq!(out.unwrap(), Ok("ok".to_string()));
}

#[test]
fn resumed_turn_does_not_reissue_completed_calls() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let a = ctx.schedule_activity("A", "x").into_activity().await?;
        let b = ctx.schedule_activity("B", a.clone()).into_activity().await?;
        Ok::<_, String>(format!("{a}+{b}"))
    };

    let (mut hist, actions, _, out) = run_turn(started_history("Flow", ""), orchestrator);
    assert!(out.is_none());
    assert_eq!(actions.len(), 1);

    hist.push(Event::OrchestratorStarted { timestamp_ms: 10 });
    hist.push(Event::ActivityCompleted {
        id: 1,
        result: "ra".into(),
    });
    let (mut hist, actions, _, out) = run_turn(hist, orchestrator);
    assert!(out.is_none());
    assert_eq!(actions.len(), 1, "only B is new");
    assert!(matches!(&actions[0], Action::CallActivity { id: 2, name, input } if name == "B" && input == "ra"));

    hist.push(Event::OrchestratorStarted { timestamp_ms: 20 });
    hist.push(Event::ActivityCompleted {
        id: 2,
        result: "rb".into(),
    });
    let (_, actions, _, out) = run_turn(hist, orchestrator);
    assert!(actions.is_empty());
    assert_eq!(out, Some(Ok("ra+rb".to_string())));
}

#[test]
fn failed_activity_surfaces_as_error() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        match ctx.schedule_activity("Charge", "10").into_activity().await {
            Ok(v) => format!("charged {v}"),
            Err(e) => format!("refused: {e}"),
        }
    };
    let mut hist = started_history("Flow", "");
    hist.push(Event::ActivityScheduled {
        id: 1,
        name: "Charge".into(),
        input: "10".into(),
    });
    hist.push(Event::OrchestratorStarted { timestamp_ms: 5 });
    hist.push(Event::ActivityFailed {
        id: 1,
        error: "card declined".into(),
    });
    let (_, _, _, out) = run_turn(hist, orchestrator);
    assert_eq!(out.as_deref(), Some("refused: card declined"));
}

// The same history replayed twice yields the same history, commands, logs, and output.
#[test]
fn replay_is_deterministic() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let id = ctx.new_guid();
        let t0 = ctx.current_time_ms();
        ctx.trace_info(format!("start {id}"));
        let a = ctx.schedule_activity("A", id.clone()).into_activity().await.unwrap_or_default();
        let t1 = ctx.current_time_ms();
        let second = ctx.new_guid();
        ctx.trace_info(format!("after {a}"));
        let _ = ctx.schedule_timer(1_000).into_timer().await;
        format!("{id}|{second}|{t0}|{t1}")
    };

    let mut hist = started_history("Flow", "");
    hist[1] = Event::OrchestratorStarted { timestamp_ms: 100 };
    let (mut hist, _, _, _) = run_turn(hist, orchestrator);
    hist.push(Event::OrchestratorStarted { timestamp_ms: 250 });
    hist.push(Event::ActivityCompleted {
        id: 1,
        result: "a".into(),
    });

    let first = run_turn(hist.clone(), orchestrator);
    let second = run_turn(hist, orchestrator);
    assert_eq!(first, second);
    let (_, actions, logs, out) = first;
    assert!(out.is_none());
    assert_eq!(actions, vec![Action::CreateTimer { id: 2, fire_at_ms: 1_250 }]);
    assert_eq!(logs, vec![(LogLevel::Info, "after a".to_string())]);
}

#[test]
fn virtual_time_and_replay_flag_follow_the_history_cursor() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let before = (ctx.is_replaying(), ctx.current_time_ms());
        let _ = ctx.schedule_activity("A", "").into_activity().await;
        let after = (ctx.is_replaying(), ctx.current_time_ms());
        (before, after)
    };
    let mut hist = started_history("Flow", "");
    hist.push(Event::ActivityScheduled {
        id: 1,
        name: "A".into(),
        input: "".into(),
    });
    hist.push(Event::OrchestratorStarted { timestamp_ms: 5_000 });
    hist.push(Event::ActivityCompleted {
        id: 1,
        result: "".into(),
    });
    let (_, _, _, out) = run_turn(hist, orchestrator);
    assert_eq!(out, Some(((true, 0), (false, 5_000))));
}

#[test]
fn guids_are_stable_per_instance() {
    let orchestrator = |ctx: OrchestrationContext| async move { (ctx.new_guid(), ctx.new_guid()) };
    let (_, _, _, a) = run_turn_with(started_history("Flow", ""), "inst-1", 0, orchestrator);
    let (_, _, _, b) = run_turn_with(started_history("Flow", ""), "inst-1", 3, orchestrator);
    let (_, _, _, c) = run_turn_with(started_history("Flow", ""), "inst-2", 0, orchestrator);
    let (a1, a2) = a.unwrap();
    assert_ne!(a1, a2);
    assert_eq!((a1.clone(), a2), b.unwrap());
    assert_ne!(a1, c.unwrap().0);
    assert!(uuid_like(&a1));
}

fn uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4
}

#[test]
fn context_exposes_started_event_metadata() {
    let history = vec![
        Event::OrchestrationStarted {
            name: "Billing".into(),
            version: Some("V2".into()),
            input: r#"{"amount":5}"#.into(),
            parent_instance: None,
            parent_id: None,
        },
        Event::OrchestratorStarted { timestamp_ms: 0 },
    ];
    let orchestrator = |ctx: OrchestrationContext| async move {
        #[derive(serde::Deserialize)]
        struct Req {
            amount: u32,
        }
        let req: Req = ctx.get_input_typed().expect("typed input");
        (
            ctx.orchestration_name(),
            ctx.orchestration_version(),
            req.amount,
            ctx.instance_id(),
            ctx.turn_index(),
        )
    };
    let (_, _, _, out) = run_turn_with(history, "bill-1", 4, orchestrator);
    assert_eq!(
        out,
        Some((Some("Billing".into()), Some("V2".into()), 5, "bill-1".to_string(), 4))
    );
}

// A new instance takes the patched branch and records a marker.
#[test]
fn is_patched_records_marker_at_live_frontier() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let patched = ctx.is_patched("use-new-api");
        let name = if patched { "NewApi" } else { "OldApi" };
        let r = ctx.schedule_activity(name, "").into_activity().await;
        (patched, r)
    };
    let (hist, actions, _, out) = run_turn(started_history("Flow", ""), orchestrator);
    assert!(out.is_none());
    assert!(matches!(&actions[0], Action::CallActivity { name, .. } if name == "NewApi"));
    assert!(hist.iter().any(|e| matches!(e, Event::PatchApplied { name } if name == "use-new-api")));

    let mut hist = hist;
    hist.push(Event::OrchestratorStarted { timestamp_ms: 1 });
    hist.push(Event::ActivityCompleted {
        id: 1,
        result: "ok".into(),
    });
    for _ in 0..100 {
        let (after, actions, _, out) = run_turn(hist.clone(), orchestrator);
        assert_eq!(out, Some((true, Ok("ok".to_string()))));
        assert!(actions.is_empty());
        assert_eq!(after, hist, "replay appends nothing");
    }
}

// An instance that passed the patch point under old code keeps the old branch.
#[test]
fn is_patched_is_false_for_instances_started_before_the_patch() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let patched = ctx.is_patched("use-new-api");
        let name = if patched { "NewApi" } else { "OldApi" };
        let r = ctx.schedule_activity(name, "").into_activity().await;
        let again = ctx.is_patched("use-new-api");
        (patched, again, r)
    };
    let mut hist = started_history("Flow", "");
    hist.push(Event::ActivityScheduled {
        id: 1,
        name: "OldApi".into(),
        input: "".into(),
    });
    hist.push(Event::OrchestratorStarted { timestamp_ms: 1 });
    hist.push(Event::ActivityCompleted {
        id: 1,
        result: "legacy".into(),
    });
    for _ in 0..100 {
        let (after, actions, _, out) = run_turn(hist.clone(), orchestrator);
        assert_eq!(out, Some((false, false, Ok("legacy".to_string()))));
        assert!(actions.is_empty());
        assert!(!after.iter().any(|e| matches!(e, Event::PatchApplied { .. })));
    }
}

#[test]
fn replayed_log_statements_are_suppressed() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        ctx.trace_info("first");
        let _ = ctx.schedule_activity("A", "").into_activity().await;
        ctx.trace_warn("second");
        ctx.trace_debug("third");
    };
    let (mut hist, _, logs, _) = run_turn(started_history("Flow", ""), orchestrator);
    assert_eq!(logs, vec![(LogLevel::Info, "first".to_string())]);

    hist.push(Event::OrchestratorStarted { timestamp_ms: 1 });
    hist.push(Event::ActivityCompleted {
        id: 1,
        result: "".into(),
    });
    let (_, _, logs, out) = run_turn(hist, orchestrator);
    assert!(out.is_some());
    assert_eq!(
        logs,
        vec![
            (LogLevel::Warn, "second".to_string()),
            (LogLevel::Debug, "third".to_string())
        ]
    );
}

#[test]
fn suspension_cannot_be_swallowed_by_user_code() {
    // The pending await is not an error value: nothing after it runs, and a
    // surrounding `match` never sees it.
    let orchestrator = |ctx: OrchestrationContext| async move {
        let r = ctx.schedule_activity("A", "").into_activity().await;
        match r {
            Ok(_) | Err(_) => {
                ctx.schedule_activity("AfterwardsOnly", "").into_activity().await.ok();
            }
        }
    };
    let (_, actions, _, out) = run_turn(started_history("Flow", ""), orchestrator);
    assert!(out.is_none());
    assert_eq!(actions.len(), 1);
}

#[test]
fn executor_drives_to_completion() {
    let orchestrator = |ctx: OrchestrationContext| async move {
        let a = ctx.schedule_activity("Upper", "abc").into_activity().await.unwrap_or_default();
        ctx.schedule_timer(10).into_timer().await;
        let b = ctx.schedule_activity("Upper", "def").into_activity().await.unwrap_or_default();
        format!("{a}{b}")
    };
    let (hist, out) = dtf_core::Executor::drive_to_completion(
        started_history("Flow", ""),
        orchestrator,
        |actions, history| {
            history.extend(common::complete_activities(&actions, |_, input| Ok(input.to_uppercase())));
            history.extend(common::fire_timers(&actions));
        },
    );
    assert_eq!(out, "ABCDEF");
    assert_eq!(
        hist.iter().filter(|e| matches!(e, Event::ActivityCompleted { .. })).count(),
        2
    );
}

#[test]
fn log_levels_parse_and_display() {
    assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
    assert_eq!("ERROR".parse::<LogLevel>(), Ok(LogLevel::Error));
    assert!("loud".parse::<LogLevel>().is_err());
    assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
}
