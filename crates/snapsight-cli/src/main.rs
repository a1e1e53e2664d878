use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use snapsight_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use snapsight_contracts::events::{new_session_id, EventWriter};
use snapsight_contracts::intake::{format_size, MAX_IMAGE_BYTES};
use snapsight_contracts::models::{ModelSelector, VISION};
use snapsight_contracts::session::Notice;
use snapsight_engine::{default_gateway_registry, Controller, GatewayConfig, Outcome};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "snapsight",
    version,
    about = "Upload images, get an analysis from a vision model, ask follow-ups"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session.
    Chat(ChatArgs),
    /// Analyze once, optionally ask follow-ups, print the transcript.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Provider {
    Openai,
    Dryrun,
}

impl Provider {
    fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Dryrun => "dryrun",
        }
    }
}

#[derive(Debug, Parser)]
struct SessionArgs {
    /// Image to upload (repeatable). All images given here form one batch.
    /// `-` reads one image from stdin (analyze only).
    #[arg(long = "image", value_name = "PATH")]
    images: Vec<PathBuf>,
    #[arg(long)]
    query: Option<String>,
    /// Vision model id. Defaults to SNAPSIGHT_MODEL, then gpt-4o.
    #[arg(long)]
    model: Option<String>,
    #[arg(long, value_enum, default_value_t = Provider::Openai)]
    provider: Provider,
    /// Append session events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Follow-up question asked after the analysis (repeatable, in order).
    #[arg(long = "ask", value_name = "QUESTION")]
    asks: Vec<String>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("snapsight error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("SNAPSIGHT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Analyze(args) => run_analyze(args),
    }
}

const STDIN_IMAGE: &str = "-";

fn wants_stdin_image(args: &SessionArgs) -> bool {
    args.images.iter().any(|path| path.as_os_str() == STDIN_IMAGE)
}

fn build_controller(args: &SessionArgs, buffers: Vec<(String, Vec<u8>)>) -> Result<Controller> {
    let mut config = GatewayConfig::from_env();
    let requested = args.model.clone().unwrap_or_else(|| config.model.clone());
    let selection = ModelSelector::new(None)
        .select(Some(&requested), VISION)
        .map_err(anyhow::Error::msg)?;
    if let Some(reason) = selection.fallback_reason.as_deref() {
        eprintln!("{reason} Using {}.", selection.model.name);
    }
    config.model = selection.model.name;

    if args.provider == Provider::Openai && !config.has_api_key() {
        eprintln!("OPENAI_API_KEY is not set; analysis requests will fail until it is.");
    }
    let registry =
        default_gateway_registry(&config).context("failed to initialize the HTTP client")?;
    let gateway = registry
        .into_gateway(args.provider.as_str())
        .with_context(|| format!("unknown provider '{}'", args.provider.as_str()))?;

    let session_id = new_session_id();
    let events = match &args.events {
        Some(path) => EventWriter::new(path, &session_id),
        None => EventWriter::disabled(&session_id),
    };
    info!(
        session_id = %session_id,
        provider = args.provider.as_str(),
        model = %config.model,
        api_base = %config.api_base,
        "session started"
    );

    let mut controller = Controller::new(gateway, config.model, events);
    if let Some(query) = args.query.as_deref() {
        controller.set_query(query);
    }
    let paths: Vec<&PathBuf> = args
        .images
        .iter()
        .filter(|path| path.as_os_str() != STDIN_IMAGE)
        .collect();
    if !paths.is_empty() || !buffers.is_empty() {
        let outcome = controller.add_batch(&paths, buffers);
        report_intake(&controller, &outcome);
    }
    Ok(controller)
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let mut buffers = Vec::new();
    if wants_stdin_image(&args.session) {
        let mut bytes = Vec::new();
        io::stdin()
            .read_to_end(&mut bytes)
            .context("failed reading image from stdin")?;
        buffers.push(("stdin".to_string(), bytes));
    }
    let mut controller = build_controller(&args.session, buffers)?;

    let report = analyze_session(&mut controller, &args.asks);
    for notice in &report.notices {
        print_notice(notice);
    }
    if let Some(transcript) = report.transcript.as_deref() {
        println!("{transcript}");
    }
    Ok(report.code)
}

/// Result of a one-shot run: exit code, refusals in order, and the transcript
/// when the first analysis succeeded.
#[derive(Debug, Default)]
struct AnalyzeReport {
    code: i32,
    notices: Vec<Notice>,
    transcript: Option<String>,
}

fn analyze_session(controller: &mut Controller, asks: &[String]) -> AnalyzeReport {
    let mut report = AnalyzeReport::default();
    if let Err(notice) = controller.submit_generate() {
        report.notices.push(notice);
        report.code = 1;
        return report;
    }

    for question in asks {
        controller.set_follow_up(question.as_str());
        if let Err(notice) = controller.submit_follow_up() {
            report.notices.push(notice);
            report.code = 1;
        }
    }
    report.transcript = controller.state().transcript().map(str::to_string);
    report
}

fn run_chat(args: ChatArgs) -> Result<()> {
    if wants_stdin_image(&args.session) {
        bail!("--image - is only supported by analyze; chat reads commands from stdin");
    }
    let mut controller = build_controller(&args.session, Vec::new())?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "snapsight chat started ({} / {}). Type /help for commands.",
        controller.gateway_name(),
        controller.model()
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);

        match intent.action.as_str() {
            "noop" => continue,
            "quit" => break,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join("  "));
                println!(
                    "Plain text analyzes with that text as the query, or asks a follow-up once a result exists."
                );
                println!(
                    "Accepted: JPEG, PNG, GIF, WebP up to {} each.",
                    format_size(MAX_IMAGE_BYTES)
                );
            }
            "add_images" => {
                let paths = intent.arg_list("paths");
                if paths.is_empty() {
                    println!("/add requires at least one path");
                    continue;
                }
                let outcome = controller.add_paths(&paths);
                report_intake(&controller, &outcome);
            }
            "set_query" => {
                let query = intent.arg_str("query").to_string();
                if query.is_empty() {
                    println!("Query cleared; the default instruction will be used.");
                } else {
                    println!("Query set.");
                }
                controller.set_query(query);
            }
            "generate" => {
                announce(&controller);
                print_reply(controller.submit_generate().map(str::to_string));
            }
            "ask" => {
                controller.set_follow_up(intent.arg_str("question"));
                print_reply(follow_up(&mut controller));
            }
            "text" => {
                let prompt = intent.prompt.as_deref().unwrap_or_default();
                if text_route(&controller) == TextRoute::Generate {
                    announce(&controller);
                }
                print_reply(submit_text(&mut controller, prompt));
            }
            "list_images" => list_images(&controller),
            "show" => match controller.state().transcript() {
                Some(transcript) => println!("{transcript}"),
                None => println!("No analysis yet."),
            },
            "set_model" => {
                let requested = intent.arg_str("model");
                if requested.is_empty() {
                    println!("Model: {}", controller.model());
                    continue;
                }
                match ModelSelector::new(None).select(Some(requested), VISION) {
                    Ok(selection) => {
                        if let Some(reason) = selection.fallback_reason.as_deref() {
                            println!("{reason}");
                        }
                        controller.set_model(selection.model.name.clone());
                        println!("Model set to {}", selection.model.name);
                    }
                    Err(err) => println!("{err}"),
                }
            }
            "status" => print_status(&controller),
            "unknown" => {
                println!(
                    "Unknown command: /{}. Type /help for commands.",
                    intent.arg_str("command")
                );
            }
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextRoute {
    Generate,
    FollowUp,
}

/// Plain text is the query until a result exists, then a follow-up.
fn text_route(controller: &Controller) -> TextRoute {
    if controller.state().transcript().is_none() {
        TextRoute::Generate
    } else {
        TextRoute::FollowUp
    }
}

/// Submits plain chat text. Returns what to print: the whole transcript
/// after a generate, only the new answer after a follow-up.
fn submit_text(controller: &mut Controller, prompt: &str) -> Result<String, Notice> {
    match text_route(controller) {
        TextRoute::Generate => {
            controller.set_query(prompt);
            controller.submit_generate().map(str::to_string)
        }
        TextRoute::FollowUp => {
            controller.set_follow_up(prompt);
            follow_up(controller)
        }
    }
}

fn follow_up(controller: &mut Controller) -> Result<String, Notice> {
    controller.submit_follow_up()?;
    Ok(controller
        .last_analysis()
        .map(|analysis| analysis.text.clone())
        .unwrap_or_default())
}

fn announce(controller: &Controller) {
    println!("Analyzing {} image(s)...", controller.state().images().len());
}

fn print_reply(reply: Result<String, Notice>) {
    match reply {
        Ok(text) => println!("\n{text}\n"),
        Err(notice) => print_notice(&notice),
    }
}

fn report_intake(controller: &Controller, outcome: &Outcome) {
    for notice in &outcome.notices {
        print_notice(notice);
    }
    if outcome.added == 0 {
        return;
    }
    let images = controller.state().images();
    println!(
        "Added {} image(s); {} in session.",
        outcome.added,
        images.len()
    );
    for image in &images[images.len() - outcome.added..] {
        println!("  + {}", image.preview().summary());
    }
}

fn list_images(controller: &Controller) {
    let images = controller.state().images();
    if images.is_empty() {
        println!("No images yet. Use /add PATH...");
        return;
    }
    for (idx, image) in images.iter().enumerate() {
        println!("  {}. {}", idx + 1, image.preview().summary());
    }
}

fn print_status(controller: &Controller) {
    let state = controller.state();
    println!("Gateway: {}", controller.gateway_name());
    println!("Model: {}", controller.model());
    println!("Images: {}", state.images().len());
    println!("Phase: {}", state.phase().as_str());
    if state.query().trim().is_empty() {
        println!("Query: (default instruction)");
    } else {
        println!("Query: {}", state.query());
    }
    match state.transcript() {
        Some(text) => println!("Transcript: {} chars", text.chars().count()),
        None => println!("Transcript: none"),
    }
    if let Some(analysis) = controller.last_analysis() {
        println!(
            "Last call: {} (input tokens {}, output tokens {})",
            analysis.model,
            token_text(analysis.input_tokens),
            token_text(analysis.output_tokens)
        );
    }
    if let Some(path) = controller.events().path() {
        println!("Events: {}", path.display());
    }
}

fn token_text(value: Option<u64>) -> String {
    value
        .map(|tokens| tokens.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

fn print_notice(notice: &Notice) {
    eprintln!("[{}] {notice}", notice.kind.as_str());
}
