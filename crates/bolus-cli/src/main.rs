//! bolus - conversational insulin dosing advisor

mod config;
mod nightscout;

use anyhow::Context as _;
use bolus_agent::{
    ConversationState, DialogueMode, FileCheckpointStore, HealthData, NutritionSource,
    NutritionTable, Orchestrator, OrchestratorConfig, OrchestratorEvent, ProviderReasoner,
    StaticHealthData, TurnOutcome,
};
use bolus_ai::providers::google::GoogleProvider;
use bolus_ai::{Model, StreamOptions};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// bolus - conversational insulin dosing advisor
#[derive(Parser, Debug)]
#[command(name = "bolus")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gemini model to use (default: gemini-2.5-flash)
    #[arg(short, long)]
    model: Option<String>,

    /// Run in non-interactive mode with a single message
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Continue an existing conversation thread
    #[arg(long)]
    thread: Option<String>,

    /// List stored conversation threads
    #[arg(long)]
    threads: bool,

    /// Read glucose and treatment history from a JSON snapshot instead of Nightscout
    #[arg(long)]
    health_file: Option<String>,

    /// JSON array of foods for nutrition lookups
    #[arg(long)]
    nutrition_file: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("bolus=debug,bolus_agent=debug,bolus_ai=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let store = Arc::new(FileCheckpointStore::new(cfg.checkpoint_dir()));

    if args.threads {
        let threads = store.list_threads().await?;
        if threads.is_empty() {
            println!("No saved threads in {}", store.dir().display());
        }
        for id in threads {
            println!("{}", id);
        }
        return Ok(());
    }

    let Some(api_key) = cfg.api_key() else {
        eprintln!("Error: No API key found for Gemini");
        eprintln!();
        eprintln!("Set your API key with: export GOOGLE_API_KEY=your-key");
        eprintln!("Or add it to config file: bolus --init-config");
        std::process::exit(1);
    };

    let model = Model::gemini(args.model.as_deref().unwrap_or(cfg.model()));
    let options = StreamOptions {
        max_tokens: None,
        temperature: Some(cfg.temperature()),
    };
    let reasoner = Arc::new(ProviderReasoner::new(
        Arc::new(GoogleProvider::new(api_key)),
        model,
        options,
    ));

    let nutrition = load_nutrition(args.nutrition_file.as_deref().or(cfg.nutrition_file.as_deref()))?;
    let health = load_health(args.health_file.as_deref(), &cfg)?;

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            profile: cfg.profile.clone(),
            max_tool_rounds: cfg.max_tool_rounds(),
        },
        reasoner.clone(),
        nutrition,
        health,
        store,
    );

    let resuming = args.thread.is_some();
    let thread_id = args
        .thread
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if resuming {
        let state = orchestrator.thread_state(&thread_id).await?;
        if let Some(summary) = describe_thread(&state) {
            eprintln!("{}", summary);
        }
    }

    let mut receiver = orchestrator.subscribe();
    let verbose = args.verbose;
    let printer = tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            print_event(&event, verbose);
        }
    });

    let result = if let Some(command) = args.command {
        run_turn(&orchestrator, &thread_id, &command).await
    } else {
        run_interactive(&orchestrator, &thread_id).await
    };

    let usage = reasoner.total_usage();
    tracing::debug!(input = usage.input, output = usage.output, "token usage");
    printer.abort();
    result
}

fn load_nutrition(path: Option<&str>) -> anyhow::Result<Arc<dyn NutritionSource>> {
    let Some(path) = path else {
        tracing::warn!("no nutrition file configured, lookups will find nothing");
        return Ok(Arc::new(NutritionTable::default()));
    };
    let content = std::fs::read_to_string(expand_home(path))
        .with_context(|| format!("reading nutrition file {}", path))?;
    let table = NutritionTable::from_json(&content)
        .with_context(|| format!("parsing nutrition file {}", path))?;
    tracing::debug!(foods = table.len(), "nutrition table loaded");
    Ok(Arc::new(table))
}

fn load_health(
    snapshot: Option<&str>,
    cfg: &config::Config,
) -> anyhow::Result<Arc<dyn HealthData>> {
    if let Some(path) = snapshot {
        let content = std::fs::read_to_string(expand_home(path))
            .with_context(|| format!("reading health file {}", path))?;
        let data: StaticHealthData = serde_json::from_str(&content)
            .with_context(|| format!("parsing health file {}", path))?;
        return Ok(Arc::new(data));
    }
    match &cfg.nightscout {
        Some(ns) => Ok(Arc::new(nightscout::NightscoutClient::new(ns))),
        None => anyhow::bail!(
            "no health data source: add a [nightscout] section to {} or pass --health-file",
            config::Config::config_path().display()
        ),
    }
}

fn expand_home(path: &str) -> std::path::PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => Path::new(path).to_path_buf(),
    }
}

fn print_event(event: &OrchestratorEvent, verbose: bool) {
    match event {
        OrchestratorEvent::ToolExecutionStart { arguments, .. } => {
            if let Some(query) = arguments.get("query").and_then(|q| q.as_str()) {
                eprintln!("[Looking up {}...]", query);
            }
        }
        OrchestratorEvent::ToolExecutionEnd {
            tool_name,
            result,
            is_error: true,
            ..
        } => {
            eprintln!("[{} failed: {}]", tool_name, result);
        }
        OrchestratorEvent::StageEntered { stage, .. } if verbose => {
            eprintln!("[{:?}]", stage);
        }
        OrchestratorEvent::CycleReset { .. } if verbose => {
            eprintln!("[cycle complete]");
        }
        _ => {}
    }
}

fn render(outcome: &TurnOutcome) -> &str {
    match outcome {
        TurnOutcome::Unclassified => {
            "I couldn't tell what you need. Are you about to eat, correcting a high reading, or asking a question?"
        }
        TurnOutcome::AwaitingInput { question: None } => {
            "Could you tell me a bit more so I can continue?"
        }
        other => other.assistant_text().unwrap_or_default(),
    }
}

/// One line about where a resumed thread left off, or `None` for a fresh one.
fn describe_thread(state: &ConversationState) -> Option<String> {
    if state.history().is_empty() {
        return None;
    }
    let topic = match state.dialogue_mode() {
        DialogueMode::Unset => "nothing in progress",
        DialogueMode::Meal => "meal dose in progress",
        DialogueMode::Correction => "correction dose in progress",
        DialogueMode::Query => "question in progress",
    };
    Some(format!(
        "[resuming thread: {} messages, {}]",
        state.history().len(),
        topic
    ))
}

/// What to tell the person when a turn fails.
fn error_notice(error: &bolus_agent::Error) -> String {
    match error {
        bolus_agent::Error::Ai(e) if e.is_retryable() => {
            format!("The model is busy right now, send your message again shortly. ({})", e)
        }
        e if e.is_service_error() => format!("Service unavailable, please try again: {}", e),
        e => format!("Error: {}", e),
    }
}

async fn run_turn(orchestrator: &Orchestrator, thread_id: &str, text: &str) -> anyhow::Result<()> {
    match orchestrator.submit_message(thread_id, text).await {
        Ok(outcome) => {
            println!("{}", render(&outcome));
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(error_notice(&e))),
    }
}

async fn run_interactive(orchestrator: &Orchestrator, thread_id: &str) -> anyhow::Result<()> {
    use std::io::{self, Write};

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("bolus thread: {}", thread_id);
        eprintln!("Type 'exit' to quit.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        match orchestrator.submit_message(thread_id, input).await {
            Ok(outcome) => println!("{}\n", render(&outcome)),
            Err(e) => eprintln!("{}\n", error_notice(&e)),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_unclassified_reprompts() {
        assert!(render(&TurnOutcome::Unclassified).contains("about to eat"));
    }

    #[test]
    fn test_render_passes_reply_through() {
        let outcome = TurnOutcome::Completed {
            reply: "Take **4.0 units**.".into(),
            dose: None,
        };
        assert_eq!(render(&outcome), "Take **4.0 units**.");
    }

    #[test]
    fn test_error_notice_flags_retryable_model_errors() {
        let busy =
            bolus_agent::Error::Ai(bolus_ai::Error::api("RESOURCE_EXHAUSTED", "Quota exceeded"));
        assert!(error_notice(&busy).contains("send your message again"));

        let bad_key = bolus_agent::Error::Ai(bolus_ai::Error::InvalidApiKey);
        assert!(error_notice(&bad_key).starts_with("Service unavailable"));

        assert!(error_notice(&bolus_agent::Error::GlucoseUnavailable).starts_with("Error:"));
    }

    #[test]
    fn test_describe_fresh_thread() {
        assert_eq!(describe_thread(&ConversationState::default()), None);
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/etc/foods.json"), Path::new("/etc/foods.json"));
    }
}
