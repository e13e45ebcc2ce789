//! Turn classification.
//!
//! Routing runs in three tiers. A pinned thread stays with its handler
//! unless the turn clearly belongs to another specialist. Otherwise trigger
//! vocabulary decides, and only when no vocabulary matches does the
//! reasoning model get asked. Model output is validated against the closed
//! handler set so a malformed answer can never route anywhere unexpected.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use relay_common::{ConversationContext, HandlerDefinition, HandlerId};
use relay_llm::{ChatMessage, CompletionRequest, Completion, ReasoningClient};

use crate::registry::HandlerRegistry;

/// Where a turn goes and why.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub handler: HandlerId,
    pub confidence: f32,
    pub reason: String,
}

const PINNED_CONFIDENCE: f32 = 0.9;
const KEYWORD_CONFIDENCE: f32 = 0.8;
const DEFAULT_CONFIDENCE: f32 = 0.3;

/// Budget for one routing call to the reasoning model. Routing is a small
/// request; an endpoint that sits on it must not stall the turn.
const ROUTING_TIMEOUT: Duration = Duration::from_secs(10);

/// Phrases that mark a turn as a continuation of work in progress. A
/// pinned thread never switches on one of these, even if the wording
/// happens to brush another handler's vocabulary.
const CONTINUATION_MARKERS: &[&str] = &[
    "yes",
    "no",
    "ok",
    "okay",
    "go ahead",
    "proceed",
    "continue",
    "try again",
    "retry",
    "here is",
    "here are",
    "use this",
    "credential",
    "password",
    "token",
    "api key",
    "thanks",
    "thank you",
];

const ROUTING_SYSTEM_PROMPT: &str = r#"You are a request router for an operations assistant.

Decide which specialist handler should take the user's request.

IMPORTANT: Respond ONLY with a JSON object, no other text:

{
  "handler": "ansible|openshift|terraform|general",
  "confidence": 0.0-1.0,
  "reason": "brief explanation"
}

Handler definitions:
- "ansible": host automation, playbooks, inventories, configuration management
- "openshift": container platforms, pods, deployments, cluster operations
- "terraform": infrastructure as code, provisioning, plan and apply workflows
- "general": everything else, greetings, questions with no operational tooling

Examples:

User: "Run the site playbook against staging"
{"handler":"ansible","confidence":0.95,"reason":"Playbook execution request"}

User: "Why is the checkout pod crash looping?"
{"handler":"openshift","confidence":0.9,"reason":"Pod diagnostics on the cluster"}

User: "What does idempotent mean?"
{"handler":"general","confidence":0.95,"reason":"Definition question, no tooling needed"}"#;

/// Routes turns to handlers.
pub struct Classifier {
    registry: Arc<HandlerRegistry>,
    reasoning: Option<Arc<dyn ReasoningClient>>,
}

impl Classifier {
    pub fn new(registry: Arc<HandlerRegistry>, reasoning: Option<Arc<dyn ReasoningClient>>) -> Self {
        Self { registry, reasoning }
    }

    /// Decide the handler for this turn and update the thread pin.
    pub async fn route(&self, text: &str, context: &mut ConversationContext) -> RouteDecision {
        let decision = self.decide(text, context).await;

        // Any decision differing from the pin replaces it; routing back to
        // the default handler leaves the thread unpinned rather than
        // snapping back to a stale specialist on the next turn.
        if decision.handler != self.registry.default_handler() {
            context.pinned_handler = Some(decision.handler);
        } else if context.pinned_handler.take().is_some() {
            debug!(thread = %context.thread_id, "pin cleared by default routing");
        }

        info!(
            thread = %context.thread_id,
            handler = %decision.handler,
            confidence = decision.confidence,
            reason = %decision.reason,
            "turn routed"
        );
        decision
    }

    async fn decide(&self, text: &str, context: &ConversationContext) -> RouteDecision {
        let lower = text.to_lowercase();

        if let Some(pinned) = context.pinned_handler {
            if !self.should_switch(pinned, &lower) {
                return RouteDecision {
                    handler: pinned,
                    confidence: PINNED_CONFIDENCE,
                    reason: "thread pinned to handler".to_string(),
                };
            }
            debug!(thread = %context.thread_id, from = %pinned, "pin released by switch signal");
        }

        if let Some(decision) = self.keyword_route(&lower) {
            return decision;
        }

        if let Some(ref reasoning) = self.reasoning {
            match self.model_route(reasoning.as_ref(), text, context).await {
                Ok(decision) => return decision,
                Err(reason) => {
                    warn!(error = %reason, "model routing failed, using default handler");
                }
            }
        }

        RouteDecision {
            handler: self.registry.default_handler(),
            confidence: DEFAULT_CONFIDENCE,
            reason: "no routing signal, default handler".to_string(),
        }
    }

    /// A pinned thread switches only when the turn scores for some other
    /// handler, scores nothing for the pinned one, and does not read as a
    /// continuation of the work in progress.
    fn should_switch(&self, pinned: HandlerId, lower: &str) -> bool {
        if is_continuation(lower) {
            return false;
        }
        let pinned_score = self
            .registry
            .get(pinned)
            .map(|d| trigger_score(d, lower))
            .unwrap_or(0);
        if pinned_score > 0 {
            return false;
        }
        self.registry
            .definitions()
            .any(|d| d.id != pinned && trigger_score(d, lower) > 0)
    }

    fn keyword_route(&self, lower: &str) -> Option<RouteDecision> {
        let (best, score) = self
            .registry
            .definitions()
            .map(|d| (d.id, trigger_score(d, lower)))
            .max_by_key(|(_, score)| *score)?;

        if score == 0 {
            return None;
        }

        Some(RouteDecision {
            handler: best,
            confidence: KEYWORD_CONFIDENCE,
            reason: format!("matched {score} trigger(s)"),
        })
    }

    async fn model_route(
        &self,
        reasoning: &dyn ReasoningClient,
        text: &str,
        context: &ConversationContext,
    ) -> Result<RouteDecision, String> {
        // A short recent-conversation window helps the model with turns
        // whose wording alone is ambiguous.
        let mut prompt = String::new();
        let recent: Vec<_> = context
            .history()
            .iter()
            .rev()
            .skip(1)
            .take(3)
            .collect();
        if !recent.is_empty() {
            prompt.push_str("Recent conversation:\n");
            for msg in recent.iter().rev() {
                let preview: String = msg.content.chars().take(120).collect();
                prompt.push_str(&format!("- {:?}: {preview}\n", msg.role));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("Route this request:\n\n{text}"));

        let request = CompletionRequest {
            system_prompt: Some(ROUTING_SYSTEM_PROMPT.to_string()),
            messages: vec![ChatMessage::user(prompt)],
            tools: Vec::new(),
            temperature: Some(0.3),
            max_tokens: Some(256),
        };

        let completion = tokio::time::timeout(ROUTING_TIMEOUT, reasoning.complete(request))
            .await
            .map_err(|_| "routing model timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let raw = match completion {
            Completion::Final(text) => text,
            Completion::ToolCalls(_) => {
                return Err("router returned tool calls instead of JSON".to_string());
            }
        };

        let json_str = extract_json_object(&raw).ok_or_else(|| {
            format!(
                "no JSON in routing response: {}",
                raw.chars().take(200).collect::<String>()
            )
        })?;

        let parsed: serde_json::Value =
            serde_json::from_str(json_str).map_err(|e| format!("invalid JSON: {e}"))?;

        // Whitelist validation: anything unparseable falls back to general.
        let handler = parsed
            .get("handler")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<HandlerId>().ok())
            .unwrap_or_else(|| {
                warn!("invalid handler in routing response, using default");
                self.registry.default_handler()
            });

        let confidence = parsed
            .get("confidence")
            .and_then(|v| v.as_f64())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(0.5) as f32;

        let reason = parsed
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("no reason provided")
            .to_string();

        Ok(RouteDecision {
            handler,
            confidence,
            reason,
        })
    }
}

fn trigger_score(definition: &HandlerDefinition, lower: &str) -> usize {
    definition
        .triggers
        .iter()
        .filter(|trigger| contains_term(lower, trigger.as_str()))
        .count()
}

fn is_continuation(lower: &str) -> bool {
    let word_count = lower.split_whitespace().count();
    if word_count <= 3 {
        return true;
    }
    CONTINUATION_MARKERS
        .iter()
        .any(|marker| contains_term(lower, marker))
}

/// Whole-word occurrence of `term` in the already-lowercased `text`. The
/// match must sit on word boundaries so "ok" cannot fire inside "look" or
/// "plan" inside "planning"; a trailing plural "s" is absorbed.
fn contains_term(text: &str, term: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = text[from..].find(term) {
        let at = from + pos;
        let mut end = at + term.len();
        if text[end..].starts_with('s') {
            end += 1;
        }
        let boundary_before = text[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let boundary_after = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if boundary_before && boundary_after {
            return true;
        }
        from = at + term.len();
    }
    false
}

/// Extract a JSON object from a string that may contain other text.
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0;
    let mut end = start;

    for (i, c) in s[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if depth == 0 && end > start {
        Some(&s[start..end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_handlers;

    fn classifier() -> Classifier {
        Classifier::new(Arc::new(HandlerRegistry::new(builtin_handlers())), None)
    }

    #[tokio::test]
    async fn keywords_route_to_specialist() {
        let classifier = classifier();
        let mut ctx = ConversationContext::new("t1", "u1");

        let decision = classifier
            .route("run the deploy playbook on staging", &mut ctx)
            .await;
        assert_eq!(decision.handler, HandlerId::Ansible);
        assert_eq!(ctx.pinned_handler, Some(HandlerId::Ansible));
    }

    #[tokio::test]
    async fn no_signal_defaults_to_general_without_pinning() {
        let classifier = classifier();
        let mut ctx = ConversationContext::new("t1", "u1");

        let decision = classifier.route("what time zone is the office in", &mut ctx).await;
        assert_eq!(decision.handler, HandlerId::General);
        assert_eq!(ctx.pinned_handler, None);
    }

    #[tokio::test]
    async fn pinned_thread_absorbs_follow_ups() {
        let classifier = classifier();
        let mut ctx = ConversationContext::new("t1", "u1");
        ctx.pinned_handler = Some(HandlerId::Terraform);

        let decision = classifier
            .route("here are the credentials you asked for", &mut ctx)
            .await;
        assert_eq!(decision.handler, HandlerId::Terraform);
        assert_eq!(ctx.pinned_handler, Some(HandlerId::Terraform));
    }

    #[tokio::test]
    async fn pinned_thread_switches_on_clear_other_domain() {
        let classifier = classifier();
        let mut ctx = ConversationContext::new("t1", "u1");
        ctx.pinned_handler = Some(HandlerId::Terraform);

        let decision = classifier
            .route(
                "unrelated question: why is the checkout pod crash looping in the cluster",
                &mut ctx,
            )
            .await;
        assert_eq!(decision.handler, HandlerId::Openshift);
        assert_eq!(ctx.pinned_handler, Some(HandlerId::Openshift));
    }

    #[tokio::test]
    async fn switch_signal_survives_markers_embedded_in_words() {
        // "look" must not read as an "ok" continuation; the turn names
        // another specialist's domain and the pin has to move.
        let classifier = classifier();
        let mut ctx = ConversationContext::new("t1", "u1");
        ctx.pinned_handler = Some(HandlerId::Terraform);

        let decision = classifier
            .route("look into the failing openshift pods instead", &mut ctx)
            .await;
        assert_eq!(decision.handler, HandlerId::Openshift);
        assert_eq!(ctx.pinned_handler, Some(HandlerId::Openshift));
    }

    #[tokio::test]
    async fn triggers_do_not_fire_inside_longer_words() {
        let classifier = classifier();
        let mut ctx = ConversationContext::new("t1", "u1");

        // "applying" must not hit the terraform "apply" trigger.
        let decision = classifier
            .route("the team is applying for more budget approval", &mut ctx)
            .await;
        assert_eq!(decision.handler, HandlerId::General);
        assert_eq!(ctx.pinned_handler, None);
    }

    #[tokio::test]
    async fn default_route_clears_a_stale_pin() {
        // Deployments may give the default handler its own vocabulary; a
        // keyword route back to it must drop the old specialist pin.
        let mut definitions = builtin_handlers();
        if let Some(general) = definitions.iter_mut().find(|d| d.id == HandlerId::General) {
            general.triggers = vec!["weather".to_string()];
        }
        let classifier = Classifier::new(Arc::new(HandlerRegistry::new(definitions)), None);

        let mut ctx = ConversationContext::new("t1", "u1");
        ctx.pinned_handler = Some(HandlerId::Terraform);

        let decision = classifier
            .route("what will the weather be like at the summit", &mut ctx)
            .await;
        assert_eq!(decision.handler, HandlerId::General);
        assert_eq!(ctx.pinned_handler, None);
    }

    #[tokio::test]
    async fn credentials_follow_up_stays_on_pinned_handler() {
        let classifier = classifier();
        let mut ctx = ConversationContext::new("t1", "u1");
        ctx.pinned_handler = Some(HandlerId::Terraform);

        let decision = classifier
            .route("all credentials are already configured", &mut ctx)
            .await;
        assert_eq!(decision.handler, HandlerId::Terraform);
        assert!(decision.confidence >= 0.8);
    }

    #[tokio::test]
    async fn short_confirmation_never_unpins() {
        let classifier = classifier();
        let mut ctx = ConversationContext::new("t1", "u1");
        ctx.pinned_handler = Some(HandlerId::Ansible);

        let decision = classifier.route("yes", &mut ctx).await;
        assert_eq!(decision.handler, HandlerId::Ansible);
    }

    #[test]
    fn term_matching_respects_word_boundaries() {
        assert!(contains_term("restart the pods now", "pod"));
        assert!(contains_term("thanks, go ahead", "go ahead"));
        assert!(!contains_term("look at the docker logs", "ok"));
        assert!(!contains_term("nothing is broken", "no"));
        assert!(!contains_term("we are applying the fix", "apply"));
    }

    #[test]
    fn json_extraction_handles_surrounding_text() {
        let input = r#"Decision: {"handler":"ansible","confidence":0.9} done"#;
        assert_eq!(
            extract_json_object(input),
            Some(r#"{"handler":"ansible","confidence":0.9}"#)
        );
        assert_eq!(extract_json_object("no json"), None);
        assert_eq!(extract_json_object(r#"{"partial":"#), None);
    }
}
