//! Score-based health state machine
//!
//! Any successful probe resets the score to the maximum; a probe where no
//! transport mode works costs one point. A candidate is evicted when its score
//! reaches zero, so it takes `max_score` consecutive failed sweeps to drop it.

use crate::models::{AnonymityTier, ProxyCandidate, UNMEASURED_LATENCY};

use super::probe::ProbeResult;

/// What should happen to a pooled candidate after a probe
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Persist(ProxyCandidate),
    Evict,
}

/// Apply a probe result to a pooled candidate
pub fn transition(prior: &ProxyCandidate, result: &ProbeResult, max_score: i32) -> Outcome {
    let mut updated = prior.clone();

    if result.is_alive() {
        updated.transport = result.transport;
        updated.anonymity = result.anonymity;
        updated.latency = result.latency;
        updated.score = max_score;
        return Outcome::Persist(updated);
    }

    updated.transport = result.transport;
    updated.anonymity = AnonymityTier::Unknown;
    updated.latency = UNMEASURED_LATENCY;
    updated.score = (prior.score - 1).max(0);

    if updated.score == 0 {
        Outcome::Evict
    } else {
        Outcome::Persist(updated)
    }
}

/// Decide whether a newly discovered candidate enters the pool.
///
/// Only a live result yields a candidate; dead discoveries are dropped.
pub fn admit(
    discovered: ProxyCandidate,
    result: &ProbeResult,
    max_score: i32,
) -> Option<ProxyCandidate> {
    if !result.is_alive() {
        return None;
    }

    Some(ProxyCandidate {
        transport: result.transport,
        anonymity: result.anonymity,
        latency: result.latency,
        score: max_score,
        ..discovered
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransportCapability;

    const MAX_SCORE: i32 = 50;

    fn pooled(score: i32) -> ProxyCandidate {
        ProxyCandidate {
            transport: TransportCapability::Both,
            anonymity: AnonymityTier::Elite,
            latency: 0.25,
            score,
            disabled_destinations: vec!["example.com".to_string()],
            ..ProxyCandidate::discovered("1.2.3.4", 8080, Some("NL".to_string()))
        }
    }

    fn alive(transport: TransportCapability) -> ProbeResult {
        ProbeResult {
            transport,
            anonymity: AnonymityTier::Anonymous,
            latency: 0.73,
        }
    }

    #[test]
    fn test_success_resets_score_and_copies_fields() {
        for prior_score in [1, 17, MAX_SCORE] {
            let outcome = transition(
                &pooled(prior_score),
                &alive(TransportCapability::SecureOnly),
                MAX_SCORE,
            );
            let Outcome::Persist(updated) = outcome else {
                panic!("live candidate must persist");
            };
            assert_eq!(updated.score, MAX_SCORE);
            assert_eq!(updated.transport, TransportCapability::SecureOnly);
            assert_eq!(updated.anonymity, AnonymityTier::Anonymous);
            assert_eq!(updated.latency, 0.73);
            assert_eq!(updated.region.as_deref(), Some("NL"));
            assert_eq!(updated.disabled_destinations, vec!["example.com".to_string()]);
        }
    }

    #[test]
    fn test_failure_decrements_and_clears_health_fields() {
        let outcome = transition(&pooled(10), &ProbeResult::dead(), MAX_SCORE);
        let Outcome::Persist(updated) = outcome else {
            panic!("score 9 must persist");
        };
        assert_eq!(updated.score, 9);
        assert_eq!(updated.transport, TransportCapability::None);
        assert_eq!(updated.anonymity, AnonymityTier::Unknown);
        assert_eq!(updated.latency, UNMEASURED_LATENCY);
    }

    #[test]
    fn test_failure_at_score_one_evicts() {
        assert_eq!(
            transition(&pooled(1), &ProbeResult::dead(), MAX_SCORE),
            Outcome::Evict
        );
    }

    #[test]
    fn test_consecutive_failures_evict_after_max_score() {
        let mut candidate = pooled(MAX_SCORE);
        for sweep in 1..MAX_SCORE {
            match transition(&candidate, &ProbeResult::dead(), MAX_SCORE) {
                Outcome::Persist(next) => {
                    assert_eq!(next.score, MAX_SCORE - sweep);
                    candidate = next;
                }
                Outcome::Evict => panic!("evicted early at sweep {}", sweep),
            }
        }
        assert_eq!(candidate.score, 1);
        assert_eq!(
            transition(&candidate, &ProbeResult::dead(), MAX_SCORE),
            Outcome::Evict
        );
    }

    #[test]
    fn test_admit_only_live_candidates() {
        let discovered = ProxyCandidate::discovered("5.6.7.8", 3128, Some("US".to_string()));

        assert!(admit(discovered.clone(), &ProbeResult::dead(), MAX_SCORE).is_none());

        let admitted = admit(discovered, &alive(TransportCapability::PlainOnly), MAX_SCORE).unwrap();
        assert_eq!(admitted.score, MAX_SCORE);
        assert_eq!(admitted.transport, TransportCapability::PlainOnly);
        assert_eq!(admitted.region.as_deref(), Some("US"));
        assert_eq!(admitted.port, 3128);
    }
}
