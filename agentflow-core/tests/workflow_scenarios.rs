//! End-to-end workflow scenarios against a scripted provider
//!
//! Each test drives a public workflow entry point the way an application
//! would, with the model replaced by `ScriptedProvider`.

use agentflow_core::llm::scripted::{ScriptedProvider, ScriptedReply};
use agentflow_core::llm::tools::arithmetic_tools;
use agentflow_core::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn completion(provider: &Arc<ScriptedProvider>) -> StructuredCompletion {
    StructuredCompletion::new(provider.clone())
}

fn math_and_story() -> AssistantRegistry {
    assert_ok!(AssistantRegistry::new([
        Assistant::new("math", "Solves arithmetic problems", "You are a mathematician."),
        Assistant::new("story", "Tells stories", "You are a storyteller."),
    ]))
}

#[tokio::test]
async fn chain_transcript_grows_by_two_per_step() {
    let provider = Arc::new(ScriptedProvider::with_responder(|req| {
        ScriptedReply::text(format!("reply to {}", req.messages.len()))
    }));
    let chain = PromptChain::builder(completion(&provider)).build();

    for steps in 0..4usize {
        let prompts: Vec<String> = (0..steps).map(|i| format!("step {}", i)).collect();
        let run = assert_ok!(chain.execute("2+2?", &prompts).await);
        assert_eq!(run.transcript.len(), 2 + 2 * steps);
        if steps > 0 {
            assert_eq!(run.transcript.last().unwrap().role, MessageRole::Assistant);
        }
    }
}

#[tokio::test]
async fn chain_scenario_two_plus_two() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedReply::text("2 plus 2: start at 2, count up two more, reach 4."),
        ScriptedReply::text("4"),
    ]));

    let run = assert_ok!(
        PromptChain::builder(completion(&provider))
            .build()
            .execute("2+2?", &["show your work", "give final answer only"])
            .await
    );

    assert_eq!(run.transcript.len(), 6);
    assert_eq!(run.transcript.last().unwrap().role, MessageRole::Assistant);
    assert_eq!(run.output, "4");
}

#[tokio::test]
async fn router_dispatches_story_to_story_assistant() {
    let provider = Arc::new(ScriptedProvider::with_responder(|req| {
        if req.response_schema.is_some() {
            return ScriptedReply::json(json!({
                "reason": "The user asks for a story",
                "assistant_id": "story"
            }));
        }
        match req.messages.first().map(|m| m.content.as_str()) {
            Some("You are a storyteller.") => ScriptedReply::text("Once upon a time..."),
            _ => ScriptedReply::text("42"),
        }
    }));

    let router = Router::builder(completion(&provider)).build();
    let outcome = assert_ok!(router.route_with_trace("tell me a story", &math_and_story()).await);

    assert_eq!(outcome.selection.assistant_id, "story");
    assert_eq!(outcome.output, "Once upon a time...");
    // One classification and one dispatch, each with a fresh transcript
    assert_eq!(provider.call_count(), 2);
    assert_eq!(provider.requests()[1].messages.len(), 2);
}

#[tokio::test]
async fn router_never_dispatches_unregistered_assistant() {
    let provider = Arc::new(ScriptedProvider::with_responder(|_| {
        ScriptedReply::json(json!({ "reason": "poetry", "assistant_id": "poet" }))
    }));

    let err = assert_err!(
        Router::builder(completion(&provider).with_schema_retries(1))
            .build()
            .route("write a poem", &math_and_story())
            .await
    );

    assert!(err.is_route_not_found());
    match err.root() {
        WorkflowError::RouteNotFound {
            assistant_id,
            available,
        } => {
            assert_eq!(assistant_id, "poet");
            assert_eq!(available, &vec!["math".to_string(), "story".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Two classification attempts, no dispatch
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn parallelizer_keeps_input_order() {
    let provider = Arc::new(
        ScriptedProvider::with_responder(|req| {
            ScriptedReply::text(format!("summary of {}", req.last_user_message().unwrap_or_default()))
        })
        .with_latency(|req| {
            let n: u64 = req
                .last_user_message()
                .and_then(|m| m.trim_start_matches("chunk ").parse().ok())
                .unwrap_or(0);
            Duration::from_millis(500 - n * 100)
        }),
    );
    let completion = completion(&provider);

    let items: Vec<String> = (0..5).map(|i| format!("chunk {}", i)).collect();
    let results = assert_ok!(
        Parallelizer::new()
            .run(items, |item| {
                let completion = completion.clone();
                async move {
                    let mut transcript = Transcript::new();
                    transcript.human(item);
                    completion.text(&transcript).await
                }
            })
            .await
    );

    let expected: Vec<String> = (0..5).map(|i| format!("summary of chunk {}", i)).collect();
    assert_eq!(results, expected);
}

#[tokio::test]
async fn orchestrator_runs_one_worker_per_subtask() {
    let provider = Arc::new(ScriptedProvider::with_responder(|req| {
        if req.response_schema.is_some() {
            ScriptedReply::json(json!({
                "analysis": "Two useful angles",
                "subtasks": [
                    {"reasoning": "precision", "type": "Formal", "description": "Specs"},
                    {"reasoning": "warmth", "type": "Conversational", "description": "Chatty"}
                ]
            }))
        } else {
            let prompt = req.last_user_message().unwrap_or_default();
            let style = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Style: "))
                .unwrap_or("?");
            ScriptedReply::text(format!("{} description", style))
        }
    }));

    let run = assert_ok!(
        Orchestrator::builder(completion(&provider))
            .max_concurrency(Some(1))
            .build()
            .execute("Write a product description for an eco-friendly water bottle")
            .await
    );

    assert_eq!(run.decomposition.analysis, "Two useful angles");
    assert_eq!(
        run.outputs,
        vec!["Formal description", "Conversational description"]
    );
}

#[tokio::test]
async fn evaluator_always_fail_caps_after_three_rounds() {
    let provider = Arc::new(ScriptedProvider::with_responder({
        let counter = std::sync::atomic::AtomicUsize::new(0);
        move |req| {
            let is_generation = req
                .response_schema
                .as_ref()
                .is_some_and(|s| s.name == "generation");
            if is_generation {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                ScriptedReply::json(json!({"thoughts": "try again", "code": format!("attempt {}", n)}))
            } else {
                ScriptedReply::json(json!({"feedback": "Use a second stack for minimums", "verdict": "FAIL"}))
            }
        }
    }));

    let outcome = assert_ok!(
        EvaluatorOptimizer::with_completion(completion(&provider))
            .max_iterations(3)
            .build()
            .run("Implement a Stack with push, pop and getMin, all O(1)")
            .await
    );

    assert_eq!(outcome.termination, Termination::Capped);
    assert_eq!(outcome.rounds(), 3);
    assert_eq!(outcome.artifact.code, "attempt 3");
    assert!(outcome.history.iter().all(|r| r.evaluation.verdict == Verdict::Fail));
    assert_eq!(provider.call_count(), 6);
}

#[tokio::test]
async fn structured_recipe_validates_nested_fields() {
    let recipe = Schema::new("recipe")
        .field(Field::string("reasoning"))
        .field(Field::string("name"))
        .field(Field::array(
            "ingredients",
            FieldType::Object(
                Schema::new("ingredient")
                    .field(Field::string("name"))
                    .field(Field::string("amount")),
            ),
        ))
        .field(Field::array("instructions", FieldType::String));

    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedReply::json(json!({
            "reasoning": "classic",
            "name": "Pancakes",
            "ingredients": [{"name": "flour", "amount": 2}],
            "instructions": ["mix"]
        })),
        ScriptedReply::text(
            "```json\n{\"reasoning\": \"classic\", \"name\": \"Pancakes\", \
             \"ingredients\": [{\"name\": \"flour\", \"amount\": \"2 cups\"}], \
             \"instructions\": [\"mix\", \"fry\"]}\n```",
        ),
    ]));

    let mut transcript = Transcript::with_system("You are a chef.");
    transcript.human("Give me a pancake recipe");

    let output = assert_ok!(
        completion(&provider)
            .complete_with_usage(&transcript, Some(&recipe))
            .await
    );
    assert_eq!(output.attempts, 2);

    let result = output.completion.into_structured().unwrap();
    assert_eq!(result.get_str("name"), Some("Pancakes"));
    assert_eq!(result.get_array("instructions").map(Vec::len), Some(2));
}

#[tokio::test]
async fn tool_calling_round_trip() {
    let provider = Arc::new(ScriptedProvider::with_responder(|req| {
        let has_results = req.messages.iter().any(|m| m.role == MessageRole::Tool);
        if has_results {
            let results: Vec<&str> = req
                .messages
                .iter()
                .filter(|m| m.role == MessageRole::Tool)
                .map(|m| m.content.as_str())
                .collect();
            ScriptedReply::text(format!("Results: {}", results.join(", ")))
        } else {
            ScriptedReply::tool_calls(vec![
                ToolCall::new("c1", "multiply", json!({"a": 3, "b": 12})),
                ToolCall::new("c2", "add", json!({"a": 11, "b": 49})),
            ])
        }
    }));

    let tools = assert_ok!(arithmetic_tools());
    let session = ToolCallingSession::new(provider.clone(), Arc::new(tools));
    let mut transcript = Transcript::new();
    transcript.human("What is 3 * 12? Also, what is 11 + 49?");

    let answer = assert_ok!(session.run(&mut transcript).await);
    assert_eq!(answer, "Results: 36.0, 60.0");
    // human, assistant tool calls, two tool results, final answer
    assert_eq!(transcript.len(), 5);
    assert!(provider.requests()[0].tools.len() == 2);
}

#[tokio::test]
async fn traced_entry_point_is_transparent() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedReply::text("4")]));
    let chain = PromptChain::builder(completion(&provider)).build();
    let sink = InMemoryTraceSink::new();

    let answer = assert_ok!(
        traced(
            &sink,
            "prompt_chain",
            json!({"query": "2+2?"}),
            chain.run("2+2?", &["answer"]),
        )
        .await
    );

    assert_eq!(answer, "4");
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].output, json!("4"));
}
