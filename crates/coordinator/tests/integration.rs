//! End-to-end turns through the coordinator with scripted reasoning and
//! fake providers behind a real aggregator.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use relay_common::{HandlerId, Result};
use relay_coordinator::{Coordinator, HandlerRegistry, LoopLimits, TurnRequest, TurnStatus};
use relay_coordinator::config::builtin_handlers;
use relay_llm::{Completion, CompletionRequest, ProposedCall, ReasoningClient};
use relay_mcp::{CapabilityAggregator, Provider, ProviderClient, ToolListing};

/// Reasoning client that plays back a fixed script of completions.
struct ScriptedReasoning {
    script: Mutex<VecDeque<Completion>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedReasoning {
    fn new(script: Vec<Completion>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    async fn seen_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoning {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        self.requests.lock().await.push(request);
        Ok(self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(Completion::Final("out of script".to_string())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Reasoning client that accepts the request and never answers.
struct HangingReasoning;

#[async_trait]
impl ReasoningClient for HangingReasoning {
    async fn complete(&self, _request: CompletionRequest) -> Result<Completion> {
        std::future::pending().await
    }

    fn model_name(&self) -> &str {
        "hanging"
    }
}

struct FakeProvider {
    id: String,
    tools: Vec<&'static str>,
    fail: bool,
    delay: Duration,
}

#[async_trait]
impl ProviderClient for FakeProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn list_capabilities(&self) -> Result<Vec<ToolListing>> {
        if self.fail {
            return Err(relay_common::RelayError::Provider(format!(
                "{}: connection refused",
                self.id
            )));
        }
        Ok(self
            .tools
            .iter()
            .map(|name| ToolListing {
                name: (*name).to_string(),
                description: format!("{name} tool"),
                input_schema: json!({"type": "object", "properties": {}}),
            })
            .collect())
    }

    async fn invoke(&self, tool_name: &str, arguments: serde_json::Value) -> Result<serde_json::Value> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({
            "provider": self.id,
            "tool": tool_name,
            "echo": arguments,
        }))
    }
}

fn provider(id: &str, tools: Vec<&'static str>) -> Arc<Provider> {
    provider_with(id, tools, false, Duration::ZERO)
}

fn provider_with(
    id: &str,
    tools: Vec<&'static str>,
    fail: bool,
    delay: Duration,
) -> Arc<Provider> {
    Arc::new(Provider::new(
        id,
        Arc::new(FakeProvider {
            id: id.to_string(),
            tools,
            fail,
            delay,
        }),
    ))
}

fn coordinator(
    providers: Vec<Arc<Provider>>,
    reasoning: Arc<dyn ReasoningClient>,
    limits: LoopLimits,
) -> Coordinator {
    let aggregator = Arc::new(CapabilityAggregator::new(
        providers,
        Duration::from_secs(5),
        Duration::from_secs(5),
    ));
    Coordinator::new(
        Arc::new(HandlerRegistry::new(builtin_handlers())),
        reasoning,
        aggregator,
        limits,
    )
}

fn call(id: &str, name: &str, args: serde_json::Value) -> ProposedCall {
    ProposedCall {
        call_id: id.to_string(),
        qualified_name: name.to_string(),
        arguments: args,
    }
}

#[tokio::test]
async fn tool_using_turn_completes_with_ordered_invocations() {
    let reasoning = ScriptedReasoning::new(vec![
        Completion::ToolCalls(vec![
            call("c1", "ansible::list_hosts", json!({"group": "web"})),
            call("c2", "ansible::run_playbook", json!({"playbook": "site.yml"})),
        ]),
        Completion::Final("Playbook finished on all web hosts.".to_string()),
    ]);

    let coord = coordinator(
        vec![provider_with(
            "ansible",
            vec!["list_hosts", "run_playbook"],
            false,
            Duration::from_millis(20),
        )],
        reasoning.clone(),
        LoopLimits::default(),
    );
    coord.refresh_capabilities().await;

    let response = coord
        .process_turn(TurnRequest {
            thread_id: "t1".into(),
            user_id: "ops".into(),
            message: "run the site playbook on the web inventory".into(),
            handler: None,
        })
        .await
        .unwrap();

    assert_eq!(response.handler, HandlerId::Ansible);
    assert_eq!(response.status, TurnStatus::Completed);
    assert_eq!(response.reply, "Playbook finished on all web hosts.");

    // Results come back in proposal order even though both calls ran
    // concurrently.
    let names: Vec<_> = response
        .invocations
        .iter()
        .map(|i| i.qualified_name.as_str())
        .collect();
    assert_eq!(names, vec!["ansible::list_hosts", "ansible::run_playbook"]);

    // The second reasoning request carried both tool results.
    let requests = reasoning.seen_requests().await;
    assert_eq!(requests.len(), 2);
    let tool_msgs = requests[1]
        .messages
        .iter()
        .filter(|m| m.tool_call_id.is_some())
        .count();
    assert_eq!(tool_msgs, 2);
}

#[tokio::test]
async fn pinned_thread_keeps_handler_across_ambiguous_follow_up() {
    let reasoning = ScriptedReasoning::new(vec![
        Completion::Final("I need cloud credentials to plan that.".to_string()),
        Completion::Final("Thanks, planning now.".to_string()),
    ]);

    let coord = coordinator(
        vec![provider("terraform", vec!["plan", "apply"])],
        reasoning,
        LoopLimits::default(),
    );
    coord.refresh_capabilities().await;

    let first = coord
        .process_turn(TurnRequest {
            thread_id: "t1".into(),
            user_id: "ops".into(),
            message: "terraform plan for the staging vpc".into(),
            handler: None,
        })
        .await
        .unwrap();
    assert_eq!(first.handler, HandlerId::Terraform);

    // The follow-up mentions no terraform vocabulary at all but must stay
    // on the pinned handler.
    let second = coord
        .process_turn(TurnRequest {
            thread_id: "t1".into(),
            user_id: "ops".into(),
            message: "here are the credentials you asked for".into(),
            handler: None,
        })
        .await
        .unwrap();
    assert_eq!(second.handler, HandlerId::Terraform);
}

#[tokio::test]
async fn explicit_handler_override_skips_classification() {
    let reasoning = ScriptedReasoning::new(vec![Completion::Final("Hello.".to_string())]);
    let coord = coordinator(vec![], reasoning, LoopLimits::default());

    let response = coord
        .process_turn(TurnRequest {
            thread_id: "t1".into(),
            user_id: "ops".into(),
            message: "run the playbook".into(),
            handler: Some(HandlerId::General),
        })
        .await
        .unwrap();

    assert_eq!(response.handler, HandlerId::General);
}

#[tokio::test]
async fn iteration_bound_cuts_off_a_runaway_turn() {
    // Every completion asks for another tool call; the loop must cut off.
    let script: Vec<Completion> = (0..20)
        .map(|i| {
            Completion::ToolCalls(vec![call(
                &format!("c{i}"),
                "ansible::list_hosts",
                json!({}),
            )])
        })
        .collect();
    let reasoning = ScriptedReasoning::new(script);

    let coord = coordinator(
        vec![provider("ansible", vec!["list_hosts"])],
        reasoning,
        LoopLimits {
            max_iterations: 3,
            deadline_ms: 60_000,
        },
    );
    coord.refresh_capabilities().await;

    let response = coord
        .process_turn(TurnRequest {
            thread_id: "t1".into(),
            user_id: "ops".into(),
            message: "keep checking the ansible inventory".into(),
            handler: None,
        })
        .await
        .unwrap();

    match response.status {
        TurnStatus::DidNotFinish { reason } => assert!(reason.contains("iteration")),
        other => panic!("expected cutoff, got {other:?}"),
    }
    assert!(!response.reply.is_empty());
    assert_eq!(response.invocations.len(), 3);
}

#[tokio::test]
async fn deadline_cuts_off_a_hung_reasoning_call() {
    // The endpoint accepts the request and never responds; the turn must
    // still end within its wall-clock budget.
    let coord = coordinator(
        vec![],
        Arc::new(HangingReasoning),
        LoopLimits {
            max_iterations: 10,
            deadline_ms: 100,
        },
    );

    let turn = coord.process_turn(TurnRequest {
        thread_id: "t1".into(),
        user_id: "ops".into(),
        message: "hello".into(),
        handler: Some(HandlerId::General),
    });

    let response = tokio::time::timeout(Duration::from_secs(2), turn)
        .await
        .expect("turn must not outlive its deadline")
        .unwrap();

    match response.status {
        TurnStatus::DidNotFinish { reason } => assert!(reason.contains("deadline")),
        other => panic!("expected deadline cutoff, got {other:?}"),
    }
    assert!(!response.reply.is_empty());
    assert!(response.invocations.is_empty());
}

#[tokio::test]
async fn cancellation_discards_the_in_flight_batch() {
    let reasoning = ScriptedReasoning::new(vec![
        Completion::ToolCalls(vec![call("c1", "ansible::list_hosts", json!({}))]),
        Completion::Final("never reached".to_string()),
    ]);

    // The tool takes 200ms; the cancel lands at 50ms, mid-batch.
    let coord = coordinator(
        vec![provider_with(
            "ansible",
            vec!["list_hosts"],
            false,
            Duration::from_millis(200),
        )],
        reasoning.clone(),
        LoopLimits::default(),
    );
    coord.refresh_capabilities().await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let response = coord
        .process_turn_with_cancel(
            TurnRequest {
                thread_id: "t1".into(),
                user_id: "ops".into(),
                message: "list the ansible hosts".into(),
                handler: None,
            },
            cancel,
        )
        .await
        .unwrap();

    match response.status {
        TurnStatus::DidNotFinish { reason } => assert!(reason.contains("cancelled")),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert!(response.invocations.is_empty());

    // The cancelled batch never reached the thread history: no further
    // reasoning round saw its results.
    assert_eq!(reasoning.seen_requests().await.len(), 1);
}

#[tokio::test]
async fn unknown_capability_is_surfaced_and_turn_recovers() {
    let reasoning = ScriptedReasoning::new(vec![
        Completion::ToolCalls(vec![call("c1", "ansible::reboot_everything", json!({}))]),
        Completion::Final("That tool does not exist; nothing was run.".to_string()),
    ]);

    let coord = coordinator(
        vec![provider("ansible", vec!["list_hosts"])],
        reasoning.clone(),
        LoopLimits::default(),
    );
    coord.refresh_capabilities().await;

    let response = coord
        .process_turn(TurnRequest {
            thread_id: "t1".into(),
            user_id: "ops".into(),
            message: "reboot everything with ansible".into(),
            handler: None,
        })
        .await
        .unwrap();

    // The turn completes normally; the bogus call came back as a failure
    // result the model could react to.
    assert_eq!(response.status, TurnStatus::Completed);
    assert_eq!(response.invocations.len(), 1);
    assert!(response.invocations[0].result.is_failure());

    let requests = reasoning.seen_requests().await;
    let fed_back = requests[1]
        .messages
        .iter()
        .any(|m| m.tool_call_id.is_some() && m.content.contains("not available"));
    assert!(fed_back);
}

#[tokio::test]
async fn dead_provider_leaves_the_rest_usable() {
    let reasoning = ScriptedReasoning::new(vec![
        Completion::ToolCalls(vec![call("c1", "openshift::get_pods", json!({}))]),
        Completion::Final("Pods listed.".to_string()),
    ]);

    let coord = coordinator(
        vec![
            provider_with("ansible", vec![], true, Duration::ZERO),
            provider("openshift", vec!["get_pods"]),
        ],
        reasoning,
        LoopLimits::default(),
    );

    let report = coord.refresh_capabilities().await;
    assert_eq!(report.total_capabilities, 1);
    let dead = report
        .providers
        .iter()
        .find(|o| o.provider_id == "ansible")
        .unwrap();
    assert!(dead.error.is_some());

    let response = coord
        .process_turn(TurnRequest {
            thread_id: "t1".into(),
            user_id: "ops".into(),
            message: "list the pods in the payments namespace".into(),
            handler: None,
        })
        .await
        .unwrap();

    assert_eq!(response.handler, HandlerId::Openshift);
    assert_eq!(response.status, TurnStatus::Completed);
}

#[tokio::test]
async fn handler_only_sees_its_bound_capabilities() {
    let reasoning = ScriptedReasoning::new(vec![Completion::Final("Done.".to_string())]);

    let coord = coordinator(
        vec![
            provider("ansible", vec!["run_playbook"]),
            provider("terraform", vec!["plan"]),
        ],
        reasoning.clone(),
        LoopLimits::default(),
    );
    coord.refresh_capabilities().await;

    coord
        .process_turn(TurnRequest {
            thread_id: "t1".into(),
            user_id: "ops".into(),
            message: "run the site playbook".into(),
            handler: None,
        })
        .await
        .unwrap();

    let requests = reasoning.seen_requests().await;
    let advertised: Vec<_> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(advertised, vec!["ansible::run_playbook"]);
}
