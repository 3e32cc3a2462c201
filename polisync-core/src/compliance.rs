//! Compliance message parsing and status aggregation.
//!
//! Evaluators report compliance in the event message itself: the token before
//! the first `;` names the state (`"Compliant; No violation detected"`).
//! Parsing is case-sensitive; an unrecognized token is a non-fatal error the
//! caller logs and drops.

use thiserror::Error;

use crate::types::{ComplianceDetail, ComplianceState};

/// Default bound on the number of history entries kept per template.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// A compliance message that could not be mapped to a state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComplianceParseError {
    #[error("empty compliance message")]
    Empty,

    #[error("unrecognized compliance token '{token}'")]
    UnknownToken { token: String },
}

/// Parse the leading token of an event message into a compliance state.
///
/// The message is split on the first `;`; the left-hand token (surrounding
/// whitespace trimmed) must be exactly `Compliant` or `NonCompliant`.
pub fn parse_compliance(message: &str) -> Result<ComplianceState, ComplianceParseError> {
    let token = message.split(';').next().unwrap_or("").trim();
    match token {
        "" => Err(ComplianceParseError::Empty),
        "Compliant" => Ok(ComplianceState::Compliant),
        "NonCompliant" => Ok(ComplianceState::NonCompliant),
        other => Err(ComplianceParseError::UnknownToken {
            token: other.to_string(),
        }),
    }
}

fn priority(state: ComplianceState) -> u8 {
    match state {
        ComplianceState::Compliant => 0,
        ComplianceState::Pending => 1,
        ComplianceState::NonCompliant => 2,
    }
}

/// Derive the overall policy state from its per-template details.
///
/// Order-independent maximum-priority reduction:
/// NonCompliant > Pending > Compliant. An empty detail set is `Pending` — no
/// compliance fact has been recorded yet.
pub fn aggregate(details: &[ComplianceDetail]) -> ComplianceState {
    details
        .iter()
        .map(|d| d.compliance_state)
        .max_by_key(|s| priority(*s))
        .unwrap_or(ComplianceState::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TemplateMeta, TemplateName};
    use rstest::rstest;

    fn detail(state: ComplianceState) -> ComplianceDetail {
        ComplianceDetail {
            template_meta: TemplateMeta {
                kind: "ConfigurationPolicy".to_string(),
                name: TemplateName::from("t"),
            },
            compliance_state: state,
            history: vec![],
        }
    }

    #[rstest]
    #[case("Compliant; No violation detected", ComplianceState::Compliant)]
    #[case("NonCompliant; there is violation", ComplianceState::NonCompliant)]
    #[case("Compliant", ComplianceState::Compliant)]
    #[case("  Compliant ; trailing", ComplianceState::Compliant)]
    fn parses_known_tokens(#[case] message: &str, #[case] expected: ComplianceState) {
        assert_eq!(parse_compliance(message).expect("parse"), expected);
    }

    #[rstest]
    #[case("compliant; lowercase is not a state")]
    #[case("Unknown; nothing to see")]
    #[case("CompliantExtra; prefix must match exactly")]
    fn rejects_unknown_tokens(#[case] message: &str) {
        match parse_compliance(message) {
            Err(ComplianceParseError::UnknownToken { token }) => {
                assert!(!token.is_empty());
            }
            other => panic!("expected UnknownToken, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_message() {
        assert_eq!(parse_compliance(""), Err(ComplianceParseError::Empty));
        assert_eq!(parse_compliance("  ; rest"), Err(ComplianceParseError::Empty));
    }

    #[test]
    fn aggregate_empty_is_pending() {
        assert_eq!(aggregate(&[]), ComplianceState::Pending);
    }

    #[test]
    fn aggregate_any_noncompliant_wins() {
        let details = vec![
            detail(ComplianceState::Compliant),
            detail(ComplianceState::NonCompliant),
            detail(ComplianceState::Pending),
        ];
        assert_eq!(aggregate(&details), ComplianceState::NonCompliant);
    }

    #[test]
    fn aggregate_all_compliant_is_compliant() {
        let details = vec![
            detail(ComplianceState::Compliant),
            detail(ComplianceState::Compliant),
        ];
        assert_eq!(aggregate(&details), ComplianceState::Compliant);
    }

    #[test]
    fn aggregate_pending_blocks_compliance() {
        let details = vec![
            detail(ComplianceState::Compliant),
            detail(ComplianceState::Pending),
        ];
        assert_eq!(aggregate(&details), ComplianceState::Pending);
    }

    #[test]
    fn aggregate_is_order_independent() {
        let states = [
            ComplianceState::Compliant,
            ComplianceState::NonCompliant,
            ComplianceState::Pending,
        ];
        // All 6 permutations of the three states must agree.
        let permutations: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for perm in permutations {
            let details: Vec<_> = perm.iter().map(|&i| detail(states[i])).collect();
            assert_eq!(aggregate(&details), ComplianceState::NonCompliant);
        }
    }
}
