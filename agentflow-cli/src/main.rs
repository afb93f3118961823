//! Agentflow CLI - run workflow patterns against a configured model

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use agentflow_core::llm::tools::arithmetic_tools;
use agentflow_core::prelude::*;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

const CHAIN_SYSTEM_PROMPT: &str = "You are a helpful assistant that can solve math problems.";

const CHAIN_STEPS: [&str; 3] = [
    "Given the math problem, ONLY extract any relevant numerical information and how it can be used.",
    "Given the numerical information extracted, ONLY express the steps you would take to solve the problem.",
    "Given the steps, express the final answer to the problem.",
];

const CHEF_PROMPT: &str = "You are a friendly professional chef. You are teaching a class on how to make a tasty meal.";

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(about = "Run LLM workflow patterns from the command line", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, layered over ./agentflow.toml and under AGENTFLOW_* variables
    #[arg(short, long, global = true, env = "AGENTFLOW_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Override the configured model
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt chain over one conversation
    Chain {
        /// Initial query
        query: String,
        /// Step prompt, repeatable (defaults to a three-step math chain)
        #[arg(short, long = "step")]
        steps: Vec<String>,
        /// System message seeding the conversation
        #[arg(long, default_value = CHAIN_SYSTEM_PROMPT)]
        system: String,
    },
    /// Route a task to the best-suited assistant
    Route {
        task: String,
    },
    /// Summarize a file or URL with map-reduce
    Summarize {
        /// File path or http(s) URL
        source: String,
    },
    /// Decompose a task and run a worker per subtask
    Orchestrate {
        task: String,
    },
    /// Generate code and refine it until the evaluator passes it
    Optimize {
        task: String,
        /// Round cap (defaults to workflow.max_iterations)
        #[arg(long)]
        max_iterations: Option<usize>,
    },
    /// Ask for a recipe as schema-validated JSON
    Structured {
        #[arg(default_value = "I want to make omurice for my kids. They like ethnic food.")]
        request: String,
    },
    /// Answer an arithmetic question with tool calls
    Tools {
        #[arg(default_value = "What is 3 * 12? Also, what is 11 + 49?")]
        question: String,
    },
    /// Version information
    Version,
}

/// Loaded configuration and the completion every workflow shares
struct Runtime {
    config: AgentflowConfig,
    completion: StructuredCompletion,
}

impl Runtime {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => AgentflowConfig::load_with_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => AgentflowConfig::load().context("loading configuration")?,
        };
        if let Some(model) = &cli.model {
            config.llm.model = model.clone();
        }

        let provider =
            LLMProviderFactory::from_config(&config).context("creating model provider")?;
        tracing::debug!(provider = ?provider.model_info(), "Provider ready");

        let completion = StructuredCompletion::new(provider)
            .with_schema_retries(config.workflow.schema_retries)
            .with_temperature(config.llm.temperature);

        Ok(Self { config, completion })
    }
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl Display) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text);
    }
    Ok(())
}

fn default_assistants() -> Result<AssistantRegistry> {
    Ok(AssistantRegistry::new([
        Assistant::new(
            "code_generation",
            "Suited for code generation",
            "You are a helpful assistant that generates code for a website",
        ),
        Assistant::new(
            "trip_planner",
            "Suited for trip planning",
            "You are a helpful assistant that plans trips",
        ),
        Assistant::new(
            "story_teller",
            "Suited for story telling",
            "You are a helpful assistant that tells stories",
        ),
    ])?)
}

fn recipe_schema() -> Schema {
    let ingredient = Schema::new("ingredient")
        .field(Field::string("name").describe("name of the ingredient"))
        .field(Field::string("amount").describe("amount of the ingredient"));

    Schema::new("recipe")
        .describe("recipe for a tasteful meal")
        .field(Field::string("reasoning").describe(
            "Think carefully about the user's request. Write down your thoughts in a few sentences.",
        ))
        .field(Field::string("description").describe("description of the meal"))
        .field(Field::array("ingredients", FieldType::Object(ingredient)))
        .field(
            Field::array("instructions", FieldType::String)
                .describe("instructions to make the meal"),
        )
        .field(Field::string("name").describe("name of the meal"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    if let Commands::Version = cli.command {
        println!("agentflow {}", env!("CARGO_PKG_VERSION"));
        println!("agentflow-core {}", agentflow_core::VERSION);
        return Ok(());
    }

    let runtime = Runtime::new(&cli)?;
    let completion = runtime.completion.clone();
    let sink = LogTraceSink;

    match &cli.command {
        Commands::Chain {
            query,
            steps,
            system,
        } => {
            let steps: Vec<String> = if steps.is_empty() {
                CHAIN_STEPS.iter().map(|s| s.to_string()).collect()
            } else {
                steps.clone()
            };
            let chain = PromptChain::builder(completion)
                .system_prompt(system.clone())
                .build();

            let answer = traced(
                &sink,
                "prompt_chain",
                json!({ "query": query, "steps": steps }),
                chain.run(query, &steps),
            )
            .await?;
            emit(cli.json, &json!({ "answer": answer }), &answer)?;
        }

        Commands::Route { task } => {
            let assistants = default_assistants()?;
            let router = Router::builder(completion).build();

            let outcome = traced(&sink, "routing", json!({ "task": task }), async {
                router
                    .route_with_trace(task, &assistants)
                    .await
                    .map(|o| (o.selection, o.output))
            })
            .await?;
            let (selection, output) = outcome;
            emit(
                cli.json,
                &json!({ "assistant_id": selection.assistant_id, "reason": selection.reason, "output": output }),
                format!("[{}] {}", selection.assistant_id, output),
            )?;
        }

        Commands::Summarize { source } => {
            let loader = loader_for(source)?;
            let summarizer = Summarizer::builder(completion)
                .config(&runtime.config.workflow)
                .build()?;

            let summary = traced(
                &sink,
                "parallelization",
                json!({ "source": source }),
                summarizer.summarize_source(loader.as_ref(), source),
            )
            .await?;
            emit(cli.json, &json!({ "summary": summary }), &summary)?;
        }

        Commands::Orchestrate { task } => {
            let orchestrator = Orchestrator::builder(completion)
                .max_concurrency(runtime.config.workflow.max_concurrency)
                .build();

            let run = traced(
                &sink,
                "orchestrator_worker",
                json!({ "task": task }),
                orchestrator.execute(task),
            )
            .await?;

            let text = run
                .decomposition
                .subtasks
                .iter()
                .zip(&run.outputs)
                .map(|(subtask, output)| format!("## {}\n\n{}", subtask.task_type, output))
                .collect::<Vec<_>>()
                .join("\n\n");
            emit(cli.json, &run, format!("{}\n\n{}", run.decomposition.analysis, text))?;
        }

        Commands::Optimize {
            task,
            max_iterations,
        } => {
            let optimizer = EvaluatorOptimizer::with_completion(completion)
                .max_iterations(max_iterations.unwrap_or(runtime.config.workflow.max_iterations))
                .build();

            let outcome = traced(
                &sink,
                "evaluator_optimizer",
                json!({ "task": task }),
                optimizer.run(task),
            )
            .await?;

            let status = match outcome.termination {
                Termination::Passed => "passed",
                Termination::Capped => "iteration cap reached",
            };
            emit(
                cli.json,
                &outcome,
                format!(
                    "{} after {} round(s)\n\n{}",
                    status,
                    outcome.rounds(),
                    outcome.artifact.code
                ),
            )?;
        }

        Commands::Structured { request } => {
            let transcript = Transcript::single_turn(CHEF_PROMPT, request.as_str());
            let schema = recipe_schema();

            let recipe = traced(
                &sink,
                "structured_output",
                json!({ "request": request }),
                completion.structured(&transcript, &schema),
            )
            .await?;
            let pretty = serde_json::to_string_pretty(&recipe)?;
            emit(cli.json, &recipe, pretty)?;
        }

        Commands::Tools { question } => {
            let tools = arithmetic_tools().context("registering tools")?;
            let session = ToolCallingSession::new(completion.provider().clone(), Arc::new(tools));
            let mut transcript = Transcript::new();
            transcript.human(question.as_str());

            let answer = traced(
                &sink,
                "tool_calling",
                json!({ "question": question }),
                session.run(&mut transcript),
            )
            .await?;
            emit(
                cli.json,
                &json!({ "answer": answer, "messages": transcript }),
                &answer,
            )?;
        }

        Commands::Version => {}
    }

    Ok(())
}
