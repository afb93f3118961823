//! Runs every workflow pattern against a scripted provider, no API key needed.
//!
//! ```sh
//! RUST_LOG=debug cargo run -p agentflow-core --example offline_workflows
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use agentflow_core::llm::scripted::{ScriptedProvider, ScriptedReply};
use agentflow_core::prelude::*;
use serde_json::json;

fn responder(req: &LLMRequest) -> ScriptedReply {
    let prompt = req.last_user_message().unwrap_or_default();
    match req.response_schema.as_ref().map(|s| s.name.as_str()) {
        Some("route_selection") => ScriptedReply::json(json!({
            "reason": "The request asks for a story",
            "assistant_id": "story_teller"
        })),
        Some("decomposition") => ScriptedReply::json(json!({
            "analysis": "A formal and a conversational take cover both audiences",
            "subtasks": [
                {"reasoning": "buyers compare specs", "type": "Formal", "description": "Materials and capacity"},
                {"reasoning": "social reach", "type": "Conversational", "description": "Friendly tone"}
            ]
        })),
        _ => ScriptedReply::text(format!("(model reply to: {})", prompt.lines().next().unwrap_or(""))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let provider = Arc::new(ScriptedProvider::with_responder(responder));
    let completion = StructuredCompletion::new(provider.clone());
    let sink = InMemoryTraceSink::new();

    let answer = traced(
        &sink,
        "prompt_chain",
        json!({ "query": "2+2?" }),
        PromptChain::builder(completion.clone())
            .build()
            .run("2+2?", &["show your work", "give final answer only"]),
    )
    .await?;
    println!("chain: {}", answer);

    let assistants = AssistantRegistry::new([
        Assistant::new("trip_planner", "Suited for trip planning", "You plan trips"),
        Assistant::new("story_teller", "Suited for story telling", "You tell stories"),
    ])?;
    let story = traced(
        &sink,
        "routing",
        json!({ "task": "Tell me a story about a cat." }),
        Router::builder(completion.clone())
            .build()
            .route("Tell me a story about a cat.", &assistants),
    )
    .await?;
    println!("route: {}", story);

    let outputs = traced(
        &sink,
        "orchestrator_worker",
        json!({ "task": "water bottle copy" }),
        Orchestrator::builder(completion.clone())
            .build()
            .run("Write a product description for an eco-friendly water bottle"),
    )
    .await?;
    println!("orchestrate: {:?}", outputs);

    // Evaluator rejects the first draft and passes the second
    let evaluations = AtomicUsize::new(0);
    let optimizer_provider = Arc::new(ScriptedProvider::with_responder(move |req| {
        match req.response_schema.as_ref().map(|s| s.name.as_str()) {
            Some("generation") => ScriptedReply::json(json!({
                "thoughts": "Keep a second stack of minimums",
                "code": "struct MinStack { items: Vec<i64>, mins: Vec<i64> }"
            })),
            _ => {
                let verdict = if evaluations.fetch_add(1, Ordering::SeqCst) == 0 {
                    "NEEDS_IMPROVEMENT"
                } else {
                    "PASS"
                };
                ScriptedReply::json(json!({ "feedback": "Handle pop on empty", "verdict": verdict }))
            }
        }
    }));
    let outcome = EvaluatorOptimizer::with_completion(StructuredCompletion::new(optimizer_provider))
        .build()
        .run("Implement a Stack with push, pop and getMin in O(1)")
        .await?;
    println!(
        "optimize: {:?} after {} round(s)",
        outcome.termination,
        outcome.rounds()
    );

    println!("\n{}", sink.to_summary());
    println!("model calls: {}", provider.call_count());
    Ok(())
}
