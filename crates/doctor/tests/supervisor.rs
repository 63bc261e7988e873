//! End-to-end supervisor scenarios against a scripted fleet.

mod common;

use std::time::Duration;

use common::{restarting, running_healthy, settings, supervisor, FakeFleet};
use doctor::{
    resolve_fleet, ContainerHealth, ContainerStatus, ControlPlane, FaultKind, Inspection,
    KnowledgeBase, Outcome, Patient, PatientOutcome, RemediationAction, RemediationDispatcher,
};

#[tokio::test(start_paused = true)]
async fn test_healthy_fleet_succeeds_in_one_round() {
    let fleet = FakeFleet::new()
        .with("kaven-postgres", Some(running_healthy()), "", None)
        .with(
            "kaven-redis",
            Some(Inspection::new(
                ContainerStatus::Running,
                ContainerHealth::NotApplicable,
            )),
            "",
            None,
        );

    let summary = supervisor(&fleet, &["kaven-postgres", "kaven-redis"], settings(10))
        .run()
        .await;

    assert_eq!(summary.outcome, Outcome::Healthy { rounds: 1 });
    assert_eq!(summary.outcome.exit_code(), 0);
    assert_eq!(summary.rounds.len(), 1);
    assert!(fleet.remediation_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_port_conflict_is_recreated_and_recovers() {
    let fleet = FakeFleet::new()
        .with(
            "kaven-postgres",
            Some(restarting()),
            "FATAL:  could not bind IPv4 address \"0.0.0.0\": Address already in use",
            Some(running_healthy()),
        )
        .with("kaven-redis", Some(running_healthy()), "", None);

    let summary = supervisor(&fleet, &["kaven-postgres", "kaven-redis"], settings(10))
        .run()
        .await;

    assert_eq!(summary.outcome, Outcome::Healthy { rounds: 2 });
    assert_eq!(fleet.remediation_calls(), vec!["rm kaven-postgres", "up"]);

    let first = &summary.rounds[0];
    let remediation = first.remediations().next().unwrap();
    assert_eq!(remediation.rule.as_deref(), Some("port-conflict"));
    assert_eq!(remediation.action, RemediationAction::Recreate);
    match &first.reports[0].outcome {
        PatientOutcome::Remediated { fault, .. } => {
            assert_eq!(*fault, FaultKind::TransientContainerFault);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(summary.rounds[1].fully_healthy());
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_fault_restarts_every_round_then_fails() {
    let fleet = FakeFleet::new().with(
        "kaven-redis",
        Some(restarting()),
        "something nobody has seen before",
        None,
    );

    let summary = supervisor(&fleet, &["kaven-redis"], settings(4)).run().await;

    assert_eq!(summary.outcome, Outcome::Exhausted { rounds: 4 });
    assert_eq!(summary.outcome.exit_code(), 1);
    assert_eq!(summary.rounds.len(), 4);
    assert_eq!(fleet.calls_matching("restart kaven-redis"), 4);
    for round in &summary.rounds {
        let remediation = round.remediations().next().unwrap();
        assert!(remediation.rule.is_none());
        assert_eq!(remediation.action, RemediationAction::GenericRestart);
    }
}

#[tokio::test(start_paused = true)]
async fn test_missing_container_does_not_abort_round() {
    let fleet = FakeFleet::new().with("kaven-redis", Some(running_healthy()), "", None);

    let summary = supervisor(&fleet, &["kaven-postgres", "kaven-redis"], settings(3))
        .run()
        .await;

    assert_eq!(summary.outcome, Outcome::Exhausted { rounds: 3 });
    for round in &summary.rounds {
        assert_eq!(round.reports.len(), 2);
        assert_eq!(round.reports[0].status, ContainerStatus::Missing);
        assert_eq!(round.reports[0].health, ContainerHealth::Unknown);
        assert!(matches!(
            round.reports[0].outcome,
            PatientOutcome::Degraded {
                fault: FaultKind::ControlPlaneUnavailable
            }
        ));
        assert!(matches!(round.reports[1].outcome, PatientOutcome::Healthy));
    }
    // Missing containers are never remediated
    assert!(fleet.remediation_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_mid_sleep_stops_remediation() {
    let fleet = FakeFleet::new().with("kaven-redis", Some(restarting()), "???", None);
    let mut doctor = supervisor(&fleet, &["kaven-redis"], settings(10));

    // Round 1: restart at t=0, settle until t=5, round delay until t=10
    let summary = doctor
        .run_until(tokio::time::sleep(Duration::from_secs(7)))
        .await;

    assert_eq!(
        summary.outcome,
        Outcome::Interrupted {
            completed_rounds: 1
        }
    );
    assert_eq!(summary.outcome.exit_code(), 130);
    assert_eq!(fleet.calls_matching("restart"), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fleet.calls_matching("restart"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_during_settle_skips_rest_of_round() {
    let fleet = FakeFleet::new()
        .with("kaven-postgres", Some(restarting()), "???", None)
        .with("kaven-redis", Some(restarting()), "???", None);
    let mut doctor = supervisor(&fleet, &["kaven-postgres", "kaven-redis"], settings(10));

    let summary = doctor
        .run_until(tokio::time::sleep(Duration::from_secs(2)))
        .await;

    assert_eq!(
        summary.outcome,
        Outcome::Interrupted {
            completed_rounds: 0
        }
    );
    assert_eq!(fleet.remediation_calls(), vec!["restart kaven-postgres"]);
    assert_eq!(fleet.calls_matching("inspect kaven-redis"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_healthy_patient_is_never_dispatched() {
    let fleet = FakeFleet::new()
        .with("kaven-postgres", Some(running_healthy()), "", None)
        .with(
            "kaven-redis",
            Some(Inspection::new(ContainerStatus::Exited, ContainerHealth::NotApplicable)),
            "Connection refused",
            None,
        );

    let summary = supervisor(&fleet, &["kaven-postgres", "kaven-redis"], settings(5))
        .run()
        .await;

    assert_eq!(summary.outcome, Outcome::Exhausted { rounds: 5 });
    let calls = fleet.remediation_calls();
    assert_eq!(calls.len(), 5);
    assert!(calls.iter().all(|c| c == "restart kaven-redis"));
    for round in &summary.rounds {
        assert_eq!(round.remediations().count(), 1);
        assert_eq!(
            round.remediations().next().unwrap().rule.as_deref(),
            Some("connection")
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_patient_healthy_earlier_is_remediated_when_it_crashes_later() {
    let unhealthy = Inspection::new(ContainerStatus::Running, ContainerHealth::Unhealthy);
    let fleet = FakeFleet::new()
        .with("kaven-postgres", Some(unhealthy), "", None)
        .then("kaven-postgres", &[unhealthy, running_healthy()])
        .with(
            "kaven-redis",
            Some(running_healthy()),
            "Connection refused",
            Some(running_healthy()),
        )
        .then("kaven-redis", &[running_healthy(), restarting()]);

    let summary = supervisor(&fleet, &["kaven-postgres", "kaven-redis"], settings(5))
        .run()
        .await;

    assert_eq!(summary.outcome, Outcome::Healthy { rounds: 3 });
    assert!(matches!(
        summary.rounds[0].reports[1].outcome,
        PatientOutcome::Healthy
    ));
    assert!(matches!(
        summary.rounds[1].reports[1].outcome,
        PatientOutcome::Remediated {
            fault: FaultKind::TransientContainerFault,
            ..
        }
    ));
    assert_eq!(fleet.remediation_calls(), vec!["restart kaven-redis"]);
}

#[tokio::test(start_paused = true)]
async fn test_running_but_unhealthy_is_only_reported() {
    let fleet = FakeFleet::new().with(
        "kaven-postgres",
        Some(Inspection::new(ContainerStatus::Running, ContainerHealth::Unhealthy)),
        "address already in use",
        None,
    );

    let summary = supervisor(&fleet, &["kaven-postgres"], settings(2)).run().await;

    assert_eq!(summary.outcome, Outcome::Exhausted { rounds: 2 });
    assert!(fleet.remediation_calls().is_empty());
    assert_eq!(fleet.calls_matching("logs"), 0);
    assert!(matches!(
        summary.rounds[0].reports[0].outcome,
        PatientOutcome::Degraded {
            fault: FaultKind::NonInstableDegradation
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_loop_runs_exactly_max_attempts() {
    for max in [1, 2, 7] {
        let fleet = FakeFleet::new().with("kaven-redis", Some(restarting()), "", None);
        let summary = supervisor(&fleet, &["kaven-redis"], settings(max)).run().await;
        assert_eq!(summary.outcome, Outcome::Exhausted { rounds: max });
        assert_eq!(summary.rounds.len(), max as usize);
        assert_eq!(fleet.calls_matching("inspect"), max as usize);
    }
}

#[tokio::test(start_paused = true)]
async fn test_round_timing_uses_settle_and_round_delays() {
    let fleet = FakeFleet::new().with("kaven-redis", Some(restarting()), "", None);
    let started = tokio::time::Instant::now();

    supervisor(&fleet, &["kaven-redis"], settings(3)).run().await;

    // 3 settles, 2 inter-round delays; no delay after the final round
    assert_eq!(started.elapsed(), Duration::from_secs(3 * 5 + 2 * 5));
}

#[tokio::test(start_paused = true)]
async fn test_stop_round_on_remediation() {
    let fleet = FakeFleet::new()
        .with("kaven-postgres", Some(restarting()), "", Some(running_healthy()))
        .with("kaven-redis", Some(restarting()), "", Some(running_healthy()));
    let mut config = settings(5);
    config.stop_round_on_remediation = true;

    let summary = supervisor(&fleet, &["kaven-postgres", "kaven-redis"], config)
        .run()
        .await;

    // One remediation per round, so the fleet needs three rounds
    assert_eq!(summary.outcome, Outcome::Healthy { rounds: 3 });
    assert_eq!(summary.rounds[0].reports.len(), 1);
    assert_eq!(summary.rounds[1].reports.len(), 2);
    assert_eq!(
        fleet.remediation_calls(),
        vec!["restart kaven-postgres", "restart kaven-redis"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_check_all_patients_by_default() {
    let fleet = FakeFleet::new()
        .with("kaven-postgres", Some(restarting()), "", Some(running_healthy()))
        .with("kaven-redis", Some(restarting()), "", Some(running_healthy()));

    let summary = supervisor(&fleet, &["kaven-postgres", "kaven-redis"], settings(5))
        .run()
        .await;

    assert_eq!(summary.outcome, Outcome::Healthy { rounds: 2 });
    assert_eq!(summary.rounds[0].remediations().count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_crash_recovery_waits_without_touching_container() {
    let fleet = FakeFleet::new().with(
        "kaven-postgres",
        Some(restarting()),
        "LOG:  database system was not properly shut down; automatic recovery in progress",
        None,
    );

    let summary = supervisor(&fleet, &["kaven-postgres"], settings(2)).run().await;

    assert_eq!(summary.outcome, Outcome::Exhausted { rounds: 2 });
    assert!(fleet.remediation_calls().is_empty());
    let remediation = summary.rounds[0].remediations().next().unwrap();
    assert_eq!(remediation.rule.as_deref(), Some("crash-recovery"));
}

#[tokio::test(start_paused = true)]
async fn test_recreate_is_idempotent_on_healthy_container() {
    let fleet = FakeFleet::new().with(
        "kaven-postgres",
        Some(running_healthy()),
        "",
        Some(running_healthy()),
    );
    let dispatcher = RemediationDispatcher::new(fleet.clone(), Duration::from_secs(10));
    let kb = KnowledgeBase::builtin().unwrap();
    let rule = kb.diagnose("address already in use");
    let patient = Patient::new("kaven-postgres");

    let first = dispatcher.remediate(&patient, rule).await;
    let second = dispatcher.remediate(&patient, rule).await;

    assert!(first.succeeded());
    assert!(second.succeeded());
    let inspection = fleet.inspect("kaven-postgres").await.unwrap();
    assert!(inspection.is_healthy());
}

#[tokio::test]
async fn test_resolve_fleet_precedence() {
    let fleet = FakeFleet::new()
        .with("kaven-api", Some(running_healthy()), "", None)
        .with("other-db", Some(running_healthy()), "", None);

    let configured = vec!["api".to_string(), "api".to_string()];
    let registry = resolve_fleet(&configured, "kaven-", fleet.as_ref()).await;
    assert_eq!(registry.names(), vec!["api"]);
    assert_eq!(fleet.calls_matching("discover"), 0);

    let registry = resolve_fleet(&[], "kaven-", fleet.as_ref()).await;
    assert_eq!(registry.names(), vec!["kaven-api"]);

    let registry = resolve_fleet(&[], "nothing-matches", fleet.as_ref()).await;
    assert_eq!(registry.names(), vec!["kaven-postgres", "kaven-redis"]);
}
