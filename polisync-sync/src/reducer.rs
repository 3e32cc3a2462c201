//! History reduction — fold qualifying events into a policy's status.
//!
//! Per template the history is an ordered (newest-first) bounded log:
//! applying an entry deduplicates by event identity, prepends, then evicts
//! the oldest entries — smallest `(timestamp, event id)` — until the log fits
//! the capacity again. Replaying an already-applied event changes nothing.

use polisync_core::compliance::{self, parse_compliance};
use polisync_core::types::{
    ComplianceDetail, ComplianceState, HistoryEntry, Policy, PolicyStatus, TemplateMeta,
    TemplateSpec,
};
use polisync_events::TemplateEvent;

/// Kind recorded for a template the policy spec does not declare.
pub const FALLBACK_TEMPLATE_KIND: &str = "PolicyTemplate";

/// Counts from one batch application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOutcome {
    /// Entries newly recorded.
    pub applied: usize,
    /// Redelivered events skipped by identity dedup.
    pub replayed: usize,
    /// Events dropped because their message did not parse.
    pub dropped: usize,
}

/// Record one entry on a detail.
///
/// Returns `false` (and changes nothing) when an entry with the same event
/// identity is already present. Otherwise prepends, restores the capacity
/// bound, and sets the detail's compliance state to `state`.
pub fn apply_entry(
    detail: &mut ComplianceDetail,
    entry: HistoryEntry,
    state: ComplianceState,
    capacity: usize,
) -> bool {
    if detail
        .history
        .iter()
        .any(|existing| existing.event_id == entry.event_id)
    {
        return false;
    }

    detail.history.insert(0, entry);
    evict_oldest(detail, capacity);
    detail.compliance_state = state;
    true
}

/// Restore the capacity invariant on a loaded detail.
///
/// Exceeding capacity cannot happen through [`apply_entry`]; finding it means
/// the stored document was tampered with or a bug slipped through. Logged
/// loudly, then truncated back to the invariant. Returns the number of
/// entries evicted.
pub fn enforce_capacity(detail: &mut ComplianceDetail, capacity: usize) -> usize {
    if detail.history.len() <= capacity {
        return 0;
    }
    let excess = detail.history.len() - capacity;
    tracing::error!(
        "history for template '{}' holds {} entries, capacity is {}; truncating",
        detail.template_meta.name,
        detail.history.len(),
        capacity,
    );
    evict_oldest(detail, capacity);
    excess
}

/// Apply a batch of qualifying events (ascending delivery order) to a policy.
///
/// Creates the `ComplianceDetail` on first event for a template — `kind`
/// resolved from the policy's declared templates, falling back to
/// [`FALLBACK_TEMPLATE_KIND`] — and recomputes the aggregate state after the
/// batch. Unparseable messages are logged and dropped, never fatal.
pub fn apply_events(
    policy: &mut Policy,
    events: &[TemplateEvent],
    capacity: usize,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();
    let declared = policy.templates.clone();
    let policy_name = policy.name.clone();
    let status = policy.status.get_or_insert_with(PolicyStatus::default);

    for detail in &mut status.details {
        enforce_capacity(detail, capacity);
    }

    for event in events {
        let state = match parse_compliance(&event.message) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(
                    "dropping event '{}' for policy '{}': {err}",
                    event.event_id,
                    policy_name,
                );
                outcome.dropped += 1;
                continue;
            }
        };

        let detail = find_or_create_detail(status, &declared, event);
        let entry = HistoryEntry {
            event_id: event.event_id.clone(),
            message: event.message.clone(),
            timestamp: event.timestamp,
        };
        if apply_entry(detail, entry, state, capacity) {
            outcome.applied += 1;
        } else {
            outcome.replayed += 1;
        }
    }

    status.compliant = compliance::aggregate(&status.details);
    outcome
}

fn find_or_create_detail<'a>(
    status: &'a mut PolicyStatus,
    declared: &[TemplateSpec],
    event: &TemplateEvent,
) -> &'a mut ComplianceDetail {
    let position = status
        .details
        .iter()
        .position(|d| d.template_meta.name == event.template);
    let index = match position {
        Some(index) => index,
        None => {
            let kind = declared
                .iter()
                .find(|t| t.name == event.template)
                .map(|t| t.kind.clone())
                .unwrap_or_else(|| FALLBACK_TEMPLATE_KIND.to_string());
            status.details.push(ComplianceDetail {
                template_meta: TemplateMeta {
                    kind,
                    name: event.template.clone(),
                },
                compliance_state: ComplianceState::Pending,
                history: vec![],
            });
            status.details.len() - 1
        }
    };
    &mut status.details[index]
}

fn evict_oldest(detail: &mut ComplianceDetail, capacity: usize) {
    while detail.history.len() > capacity {
        let Some(oldest) = detail
            .history
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.event_id.cmp(&b.event_id))
            })
            .map(|(index, _)| index)
        else {
            break;
        };
        detail.history.remove(oldest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use polisync_core::types::{
        EventId, EventSeverity, Namespace, PolicyName, TemplateName,
    };

    fn entry(id: &str, message: &str, timestamp: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            event_id: EventId::from(id),
            message: message.to_string(),
            timestamp,
        }
    }

    fn empty_detail() -> ComplianceDetail {
        ComplianceDetail {
            template_meta: TemplateMeta {
                kind: "ConfigurationPolicy".to_string(),
                name: TemplateName::from("configurationpolicy"),
            },
            compliance_state: ComplianceState::Pending,
            history: vec![],
        }
    }

    fn template_event(id: &str, message: &str, timestamp: DateTime<Utc>) -> TemplateEvent {
        TemplateEvent {
            policy: PolicyName::from("audit-pods"),
            template: TemplateName::from("configurationpolicy"),
            severity: EventSeverity::Normal,
            message: message.to_string(),
            timestamp,
            event_id: EventId::from(id),
        }
    }

    fn bare_policy() -> Policy {
        let now = Utc::now();
        Policy {
            name: PolicyName::from("audit-pods"),
            namespace: Namespace::from("managed"),
            resource_version: 1,
            templates: vec![TemplateSpec {
                kind: "ConfigurationPolicy".to_string(),
                name: TemplateName::from("configurationpolicy"),
            }],
            status: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn apply_entry_prepends_and_sets_state() {
        let mut detail = empty_detail();
        let now = Utc::now();

        assert!(apply_entry(
            &mut detail,
            entry("e1", "Compliant; ok", now),
            ComplianceState::Compliant,
            10,
        ));
        assert!(apply_entry(
            &mut detail,
            entry("e2", "NonCompliant; violation", now + Duration::seconds(1)),
            ComplianceState::NonCompliant,
            10,
        ));

        assert_eq!(detail.history.len(), 2);
        assert_eq!(detail.history[0].event_id, EventId::from("e2"));
        assert_eq!(detail.compliance_state, ComplianceState::NonCompliant);
    }

    #[test]
    fn apply_entry_deduplicates_by_event_identity() {
        let mut detail = empty_detail();
        let now = Utc::now();

        assert!(apply_entry(
            &mut detail,
            entry("e1", "Compliant; ok", now),
            ComplianceState::Compliant,
            10,
        ));
        // Redelivery of the same event: no duplicate, no state change.
        assert!(!apply_entry(
            &mut detail,
            entry("e1", "NonCompliant; replayed with different body", now),
            ComplianceState::NonCompliant,
            10,
        ));

        assert_eq!(detail.history.len(), 1);
        assert_eq!(detail.compliance_state, ComplianceState::Compliant);
    }

    #[test]
    fn history_is_bounded_with_oldest_evicted() {
        let mut detail = empty_detail();
        let base = Utc::now();

        for i in 0..15 {
            apply_entry(
                &mut detail,
                entry(
                    &format!("e{i:02}"),
                    "Compliant; ok",
                    base + Duration::seconds(i),
                ),
                ComplianceState::Compliant,
                10,
            );
        }

        assert_eq!(detail.history.len(), 10);
        // Newest first; the five oldest were evicted.
        assert_eq!(detail.history[0].event_id, EventId::from("e14"));
        assert_eq!(detail.history[9].event_id, EventId::from("e05"));
    }

    #[test]
    fn eviction_ties_break_by_event_identity_ascending() {
        let mut detail = empty_detail();
        let now = Utc::now();

        // Three entries sharing a timestamp at capacity 2: "a" is evicted.
        apply_entry(
            &mut detail,
            entry("b", "Compliant; ok", now),
            ComplianceState::Compliant,
            2,
        );
        apply_entry(
            &mut detail,
            entry("a", "Compliant; ok", now),
            ComplianceState::Compliant,
            2,
        );
        apply_entry(
            &mut detail,
            entry("c", "Compliant; ok", now),
            ComplianceState::Compliant,
            2,
        );

        let ids: Vec<&str> = detail.history.iter().map(|e| e.event_id.0.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn enforce_capacity_truncates_and_reports_excess() {
        let mut detail = empty_detail();
        let base = Utc::now();
        // Build an over-capacity history directly, as external tampering would.
        for i in 0..13 {
            detail.history.insert(
                0,
                entry(
                    &format!("e{i:02}"),
                    "Compliant; ok",
                    base + Duration::seconds(i),
                ),
            );
        }

        let evicted = enforce_capacity(&mut detail, 10);
        assert_eq!(evicted, 3);
        assert_eq!(detail.history.len(), 10);
        assert_eq!(detail.history[0].event_id, EventId::from("e12"));

        assert_eq!(enforce_capacity(&mut detail, 10), 0);
    }

    #[test]
    fn apply_events_creates_detail_and_aggregates() {
        let mut policy = bare_policy();
        let now = Utc::now();

        let outcome = apply_events(
            &mut policy,
            &[template_event("e1", "Compliant; No violation detected", now)],
            10,
        );

        assert_eq!(outcome, ApplyOutcome { applied: 1, replayed: 0, dropped: 0 });
        let status = policy.status.as_ref().expect("status created");
        assert_eq!(status.compliant, ComplianceState::Compliant);
        assert_eq!(status.details.len(), 1);
        assert_eq!(status.details[0].template_meta.kind, "ConfigurationPolicy");
        assert_eq!(
            status.details[0].template_meta.name,
            TemplateName::from("configurationpolicy")
        );
        assert_eq!(status.details[0].history.len(), 1);
    }

    #[test]
    fn apply_events_drops_unparseable_and_continues() {
        let mut policy = bare_policy();
        let base = Utc::now();

        let outcome = apply_events(
            &mut policy,
            &[
                template_event("e1", "garbled message", base),
                template_event("e2", "NonCompliant; there is violation", base + Duration::seconds(1)),
            ],
            10,
        );

        assert_eq!(outcome, ApplyOutcome { applied: 1, replayed: 0, dropped: 1 });
        let status = policy.status.as_ref().expect("status");
        assert_eq!(status.compliant, ComplianceState::NonCompliant);
        assert_eq!(status.details[0].history.len(), 1);
    }

    #[test]
    fn apply_events_is_idempotent_under_redelivery() {
        let mut policy = bare_policy();
        let now = Utc::now();
        let batch = vec![template_event("e1", "Compliant; ok", now)];

        apply_events(&mut policy, &batch, 10);
        let snapshot = policy.status.clone();

        let outcome = apply_events(&mut policy, &batch, 10);
        assert_eq!(outcome, ApplyOutcome { applied: 0, replayed: 1, dropped: 0 });
        assert_eq!(policy.status, snapshot);
    }

    #[test]
    fn undeclared_template_gets_fallback_kind() {
        let mut policy = bare_policy();
        policy.templates.clear();
        let outcome = apply_events(
            &mut policy,
            &[template_event("e1", "Compliant; ok", Utc::now())],
            10,
        );
        assert_eq!(outcome.applied, 1);
        let status = policy.status.as_ref().expect("status");
        assert_eq!(status.details[0].template_meta.kind, FALLBACK_TEMPLATE_KIND);
    }

    // Twelve alternating events, then an asserting event, then a violation:
    // the capped-history flow end to end.
    #[test]
    fn capped_history_keeps_newest_and_flips_state() {
        let mut policy = bare_policy();
        let base = Utc::now();

        let mut batch = Vec::new();
        for i in 1..12 {
            let message = if i % 2 == 0 {
                format!("Compliant; No violation detected {i}")
            } else {
                format!("NonCompliant; there is violation {i}")
            };
            batch.push(template_event(
                &format!("e{i:02}"),
                &message,
                base + Duration::seconds(i),
            ));
        }
        batch.push(template_event(
            "e12",
            "Compliant; No violation assert",
            base + Duration::seconds(12),
        ));
        apply_events(&mut policy, &batch, 10);

        {
            let status = policy.status.as_ref().expect("status");
            assert_eq!(status.compliant, ComplianceState::Compliant);
            assert_eq!(status.details.len(), 1);
            let history = &status.details[0].history;
            assert_eq!(history.len(), 10);
            assert_eq!(history[0].message, "Compliant; No violation assert");
        }

        apply_events(
            &mut policy,
            &[template_event(
                "e13",
                "NonCompliant; Violation assert",
                base + Duration::seconds(13),
            )],
            10,
        );

        let status = policy.status.as_ref().expect("status");
        assert_eq!(status.compliant, ComplianceState::NonCompliant);
        let history = &status.details[0].history;
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].message, "NonCompliant; Violation assert");
    }

    #[test]
    fn details_for_multiple_templates_aggregate_worst_state() {
        let mut policy = bare_policy();
        let base = Utc::now();

        let mut cert = template_event("c1", "NonCompliant; cert expired", base);
        cert.template = TemplateName::from("certificatepolicy");

        apply_events(
            &mut policy,
            &[
                template_event("e1", "Compliant; ok", base),
                cert,
            ],
            10,
        );

        let status = policy.status.as_ref().expect("status");
        assert_eq!(status.details.len(), 2);
        assert_eq!(status.compliant, ComplianceState::NonCompliant);
    }
}
