use chrono::Utc;
use tracing::{debug, warn};

use helpline_core::domain::user::User;
use helpline_core::policy::{EscalationDecision, EscalationReason, EscalationRules};
use helpline_core::quality::QualityHeuristic;
use helpline_db::Repositories;

const STUCK_LOOKBACK: u32 = 3;

/// Applies the escalation rules in precedence order against live storage.
/// Storage failures degrade the affected check to "not triggered".
pub struct EscalationEvaluator {
    repos: Repositories,
    rules: EscalationRules,
    quality: QualityHeuristic,
}

impl EscalationEvaluator {
    pub fn new(repos: Repositories, rules: EscalationRules, quality: QualityHeuristic) -> Self {
        Self { repos, rules, quality }
    }

    pub fn rules(&self) -> &EscalationRules {
        &self.rules
    }

    pub fn is_low_quality(&self, text: &str) -> bool {
        self.quality.is_low_quality(text)
    }

    /// Explicit requests for a person, checked before any FAQ or AI work.
    pub fn explicit_request(&self, message: &str) -> EscalationDecision {
        match self.rules.trigger_phrase(message) {
            Some(phrase) => EscalationDecision::Escalate(EscalationReason::TriggerPhrase(
                phrase.to_string(),
            )),
            None => EscalationDecision::Continue,
        }
    }

    pub async fn evaluate(
        &self,
        user: &User,
        message: &str,
        ai_response: Option<&str>,
        correlation_id: &str,
    ) -> EscalationDecision {
        let decision = self.decide(user, message, ai_response, correlation_id).await;
        if let EscalationDecision::Escalate(reason) = &decision {
            debug!(
                event_name = "escalation.policy.triggered",
                correlation_id,
                user_id = user.id.0,
                reason = reason.code(),
                "escalation policy fired"
            );
        }
        decision
    }

    async fn decide(
        &self,
        user: &User,
        message: &str,
        ai_response: Option<&str>,
        correlation_id: &str,
    ) -> EscalationDecision {
        if let EscalationDecision::Escalate(reason) = self.explicit_request(message) {
            return EscalationDecision::Escalate(reason);
        }

        if let Some(response) = ai_response {
            if self.quality.is_low_quality(response) {
                if let Some(count) = self.record_failure(user, correlation_id).await {
                    if self.rules.failures_exhausted(count) {
                        return EscalationDecision::Escalate(
                            EscalationReason::ConsecutiveFailures(count),
                        );
                    }
                }
            }
        }

        match self.repos.messages.recent_inbound(user.id, STUCK_LOOKBACK).await {
            Ok(recent) => {
                let bodies: Vec<String> = recent.into_iter().map(|message| message.body).collect();
                if self.rules.is_stuck(&bodies) {
                    return EscalationDecision::Escalate(EscalationReason::Repetition);
                }
            }
            Err(error) => degraded("repetition", correlation_id, &error),
        }

        match self.repos.messages.count(user.id).await {
            Ok(count) if self.rules.is_long_conversation(count) => {
                return EscalationDecision::Escalate(EscalationReason::LongConversation(count));
            }
            Ok(_) => {}
            Err(error) => degraded("long_conversation", correlation_id, &error),
        }

        if let Some(indicator) = self.rules.frustration_indicator(message) {
            return EscalationDecision::Escalate(EscalationReason::Frustration(
                indicator.to_string(),
            ));
        }

        EscalationDecision::Continue
    }

    /// Bumps and persists the consecutive-failure counter. `None` when the
    /// counter could not be read.
    async fn record_failure(&self, user: &User, correlation_id: &str) -> Option<u32> {
        let current = match self.repos.states.failure_count(user.id).await {
            Ok(count) => count,
            Err(error) => {
                degraded("consecutive_failures", correlation_id, &error);
                return None;
            }
        };
        let updated = current.saturating_add(1);
        if let Err(error) = self.repos.states.set_failure_count(user.id, updated, Utc::now()).await
        {
            warn!(
                event_name = "escalation.policy.counter_not_saved",
                correlation_id,
                user_id = user.id.0,
                error = %error,
                "could not persist failure counter"
            );
        }
        Some(updated)
    }
}

fn degraded(check: &str, correlation_id: &str, error: &dyn std::fmt::Display) {
    warn!(
        event_name = "escalation.policy.check_degraded",
        correlation_id,
        check,
        error = %error,
        "escalation check skipped after storage failure"
    );
}
