//! Parameterised ingestion tests for `polisync-events`.
//!
//! Spool cases get an isolated `TempDir` — no shared state.

use chrono::{DateTime, Duration, Utc};
use rstest::rstest;
use tempfile::TempDir;

use polisync_core::types::{EventId, EventSeverity, Namespace, PolicyName, TemplateName};
use polisync_events::{
    collect_for_policy_at, order_events, qualify, read_spool_at, remove_event_at,
    template_reference, write_event_at, PolicyEvent, TemplateEvent,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn event(id: &str, reason: &str, message: &str, timestamp: DateTime<Utc>) -> PolicyEvent {
    PolicyEvent {
        id: EventId::from(id),
        severity: EventSeverity::Normal,
        reason: reason.to_string(),
        message: message.to_string(),
        policy: PolicyName::from("audit-pods"),
        namespace: Namespace::from("managed"),
        timestamp,
    }
}

fn tuple(id: &str, timestamp: DateTime<Utc>) -> TemplateEvent {
    TemplateEvent {
        policy: PolicyName::from("audit-pods"),
        template: TemplateName::from("configurationpolicy"),
        severity: EventSeverity::Normal,
        message: "Compliant; No violation detected".to_string(),
        timestamp,
        event_id: EventId::from(id),
    }
}

// ---------------------------------------------------------------------------
// Reason pattern
// ---------------------------------------------------------------------------

#[rstest]
#[case("policy: managed/audit-pods-configurationpolicy", Some("configurationpolicy"))]
#[case("policy: managed/audit-pods-cert-policy", Some("cert-policy"))]
#[case("policy: other/audit-pods-configurationpolicy", None)]
#[case("policy: managed/other-policy-configurationpolicy", None)]
#[case("policy: managed/audit-pods", None)]
#[case("policy: managed/audit-pods-", None)]
#[case("restarted container", None)]
#[case("policy:managed/audit-pods-configurationpolicy", Some("configurationpolicy"))]
fn reason_pattern_extraction(#[case] reason: &str, #[case] expected: Option<&str>) {
    let found = template_reference(
        reason,
        &Namespace::from("managed"),
        &PolicyName::from("audit-pods"),
    );
    assert_eq!(found, expected.map(TemplateName::from));
}

#[test]
fn qualify_extracts_full_tuple() {
    let now = Utc::now();
    let record = event(
        "audit-pods.1",
        "policy: managed/audit-pods-configurationpolicy",
        "NonCompliant; there is violation",
        now,
    );
    let tuple = qualify(&record, &Namespace::from("managed")).expect("qualifies");
    assert_eq!(tuple.policy, PolicyName::from("audit-pods"));
    assert_eq!(tuple.template, TemplateName::from("configurationpolicy"));
    assert_eq!(tuple.message, "NonCompliant; there is violation");
    assert_eq!(tuple.timestamp, now);
    assert_eq!(tuple.event_id, EventId::from("audit-pods.1"));
}

#[test]
fn qualify_rejects_other_namespace() {
    let record = event(
        "audit-pods.1",
        "policy: managed/audit-pods-configurationpolicy",
        "Compliant; ok",
        Utc::now(),
    );
    assert!(qualify(&record, &Namespace::from("elsewhere")).is_none());
}

#[test]
fn qualify_ignores_unrelated_reason_without_error() {
    let record = event("audit-pods.1", "FailedScheduling", "0/3 nodes", Utc::now());
    assert!(qualify(&record, &Namespace::from("managed")).is_none());
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[test]
fn order_events_sorts_by_timestamp_then_id() {
    let base = Utc::now();
    let mut events = vec![
        tuple("b", base + Duration::seconds(2)),
        tuple("z", base),
        tuple("a", base + Duration::seconds(2)),
        tuple("m", base + Duration::seconds(1)),
    ];
    order_events(&mut events);
    let ids: Vec<&str> = events.iter().map(|e| e.event_id.0.as_str()).collect();
    assert_eq!(ids, vec!["z", "m", "a", "b"]);
}

// ---------------------------------------------------------------------------
// Spool
// ---------------------------------------------------------------------------

#[test]
fn spool_roundtrip_and_ack() {
    let home = TempDir::new().expect("home");
    let record = event(
        "audit-pods.1",
        "policy: managed/audit-pods-configurationpolicy",
        "Compliant; No violation detected",
        Utc::now(),
    );

    let path = write_event_at(home.path(), &record).expect("write");
    assert!(path.exists());

    let spooled = read_spool_at(home.path(), &Namespace::from("managed")).expect("read");
    assert_eq!(spooled.len(), 1);
    assert_eq!(spooled[0].event, record);

    remove_event_at(&spooled[0].path).expect("ack");
    assert!(!path.exists());
    // Acknowledging again is a no-op.
    remove_event_at(&path).expect("double ack");
}

#[test]
fn read_spool_missing_dir_is_empty() {
    let home = TempDir::new().expect("home");
    let spooled = read_spool_at(home.path(), &Namespace::from("managed")).expect("read");
    assert!(spooled.is_empty());
}

#[test]
fn malformed_spool_file_is_skipped_not_fatal() {
    let home = TempDir::new().expect("home");
    let good = event(
        "audit-pods.1",
        "policy: managed/audit-pods-configurationpolicy",
        "Compliant; ok",
        Utc::now(),
    );
    write_event_at(home.path(), &good).expect("write");

    let dir = polisync_events::spool_dir_at(home.path(), &Namespace::from("managed"));
    std::fs::write(dir.join("00000000000000000000-junk.yaml"), "{broken: [")
        .expect("write junk");

    let spooled = read_spool_at(home.path(), &Namespace::from("managed")).expect("read");
    assert_eq!(spooled.len(), 1, "malformed record must be skipped");
    assert_eq!(spooled[0].event.id, EventId::from("audit-pods.1"));
}

#[test]
fn collect_for_policy_filters_and_sorts() {
    let home = TempDir::new().expect("home");
    let base = Utc::now();

    // Out-of-order writes for the target policy.
    let second = event(
        "audit-pods.2",
        "policy: managed/audit-pods-configurationpolicy",
        "NonCompliant; there is violation",
        base + Duration::seconds(5),
    );
    let first = event(
        "audit-pods.1",
        "policy: managed/audit-pods-configurationpolicy",
        "Compliant; No violation detected",
        base,
    );
    // A record for a different policy in the same namespace.
    let mut other = event(
        "other.1",
        "policy: managed/other-policy-configurationpolicy",
        "Compliant; ok",
        base,
    );
    other.policy = PolicyName::from("other-policy");
    // A non-qualifying record.
    let noise = event("noise.1", "Scheduled", "assigned pod", base);

    for record in [&second, &first, &other, &noise] {
        write_event_at(home.path(), record).expect("write");
    }

    let collected = collect_for_policy_at(
        home.path(),
        &Namespace::from("managed"),
        &PolicyName::from("audit-pods"),
    )
    .expect("collect");

    let ids: Vec<&str> = collected.iter().map(|(_, e)| e.event_id.0.as_str()).collect();
    assert_eq!(
        ids,
        vec!["audit-pods.1", "audit-pods.2"],
        "ascending timestamp order, other policies and noise excluded"
    );
    assert!(collected.iter().all(|(path, _)| path.exists()));
}
