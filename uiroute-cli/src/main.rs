//! uiroute CLI
//!
//! Offline tooling for automation packages.
//!
//! Usage:
//!   uiroute validate chat.json extra.json       # Load and report skipped entries
//!   uiroute functions chat.json                 # List callable functions
//!   uiroute route chat.json --from Home --to Chat
//!   uiroute route chat.json --from unknown --to Chat
//!   uiroute plan chat.json --function send_message \
//!       --app com.example.chat --screen .MainActivity --param contact=Alice

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;
use uiroute::pathfinder::{find_route, RESET_STATE};
use uiroute::{
    AutomationError, EngineSettings, LoadReport, Params, Router, Selector, UiActionExecutor,
    UiElement, UiSnapshot, UiStateQuery,
};

#[derive(Parser)]
#[command(name = "uiroute")]
#[command(about = "Plan and inspect UI automation routes")]
#[command(
    long_about = "uiroute loads automation packages (screens, transitions and functions) and answers routing questions offline, without a device."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
struct PackageArgs {
    /// Automation package files, merged in the given order
    #[clap(required = true)]
    configs: Vec<PathBuf>,

    /// Exit with an error if any entry was skipped
    #[clap(long, env = "UIROUTE_STRICT")]
    strict: bool,
}

#[derive(Parser, Debug)]
struct RouteArgs {
    #[clap(flatten)]
    packages: PackageArgs,

    /// Start node, or "unknown" to route from the reset state
    #[clap(long)]
    from: String,

    /// Target node
    #[clap(long)]
    to: String,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    #[clap(flatten)]
    packages: PackageArgs,

    /// Function to plan
    #[clap(long)]
    function: String,

    /// App id the simulated device reports
    #[clap(long)]
    app: String,

    /// Screen (activity) id the simulated device reports
    #[clap(long)]
    screen: String,

    /// Element on the simulated screen, e.g. "id:chat_list" or "text:Chats"
    #[clap(long = "element")]
    elements: Vec<String>,

    /// Parameter as key=value; values that parse as JSON are used as JSON
    #[clap(long = "param", value_parser = parse_param)]
    params: Vec<(String, serde_json::Value)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load packages and print the load report
    Validate(PackageArgs),
    /// List the functions defined by the packages
    Functions(PackageArgs),
    /// Compute the route between two nodes
    Route(RouteArgs),
    /// Plan a function against a simulated screen (dry run)
    Plan(PlanArgs),
}

fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

/// Device that always shows one screen and refuses to act.
struct StaticScreen {
    snapshot: UiSnapshot,
}

#[async_trait::async_trait]
impl UiStateQuery for StaticScreen {
    async fn get_current_state(&self) -> Result<UiSnapshot, AutomationError> {
        Ok(self.snapshot.clone())
    }
}

#[async_trait::async_trait]
impl UiActionExecutor for StaticScreen {
    async fn click(&self, selector: &Selector) -> Result<(), AutomationError> {
        Err(dry_run(format!("click {selector}")))
    }

    async fn input(&self, selector: &Selector, _text: &str) -> Result<(), AutomationError> {
        Err(dry_run(format!("input {selector}")))
    }

    async fn swipe(
        &self,
        _from: (i32, i32),
        _to: (i32, i32),
        _duration: Duration,
    ) -> Result<(), AutomationError> {
        Err(dry_run("swipe".to_string()))
    }

    async fn press_key(&self, code: i32) -> Result<(), AutomationError> {
        Err(dry_run(format!("key {code}")))
    }

    async fn launch_app(&self, app_id: &str) -> Result<(), AutomationError> {
        Err(dry_run(format!("launch {app_id}")))
    }

    async fn kill_app(&self, app_id: &str) -> Result<(), AutomationError> {
        Err(dry_run(format!("kill {app_id}")))
    }
}

fn dry_run(action: String) -> AutomationError {
    AutomationError::ActionFailed(format!("{action} not available in a dry run"))
}

fn init_logging() -> Result<()> {
    let log_level = std::env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::WARN,
        })
        .unwrap_or(Level::WARN);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Loads every package into `router`, merging after the first.
fn load_packages(router: &Router, args: &PackageArgs) -> Result<Vec<LoadReport>> {
    let mut reports = Vec::new();
    for (i, path) in args.configs.iter().enumerate() {
        let report = router
            .load_config_file(path, i > 0)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        debug!(path = %path.display(), clean = report.is_clean(), "Loaded package");
        reports.push(report);
    }
    if args.strict {
        let skipped: usize = reports.iter().map(|r| r.skipped.len()).sum();
        if skipped > 0 {
            print_json(&reports)?;
            bail!("{skipped} entries were skipped");
        }
    }
    Ok(reports)
}

fn offline_router(snapshot: UiSnapshot) -> Router {
    let device = Arc::new(StaticScreen { snapshot });
    Router::with_settings(device.clone(), device, EngineSettings::from_env())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RouteOutput {
    from: String,
    to: String,
    hops: Vec<String>,
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Validate(args) => {
            let router = offline_router(UiSnapshot::default());
            let reports = load_packages(&router, &args)?;
            print_json(&reports)
        }
        Commands::Functions(args) => {
            let router = offline_router(UiSnapshot::default());
            load_packages(&router, &args)?;
            print_json(&router.get_available_functions())
        }
        Commands::Route(args) => {
            let router = offline_router(UiSnapshot::default());
            load_packages(&router, &args.packages)?;
            let start = (!args.from.eq_ignore_ascii_case("unknown")).then_some(args.from.as_str());
            let route = find_route(&router.graph(), start, &args.to)?;
            print_json(&RouteOutput {
                from: start.unwrap_or(RESET_STATE).to_string(),
                to: args.to,
                hops: route.iter().map(ToString::to_string).collect(),
            })
        }
        Commands::Plan(args) => {
            let elements = args
                .elements
                .iter()
                .map(|raw| element_from_selector(raw))
                .collect::<Result<Vec<_>>>()?;
            let snapshot = UiSnapshot::new(args.app, args.screen).with_elements(elements);
            let router = offline_router(snapshot);
            load_packages(&router, &args.packages)?;

            let params: Params = args.params.into_iter().collect();
            let plan = router.try_plan_function(&args.function, params.clone()).await?;
            let missing: Vec<&String> = plan
                .required_parameter_keys()
                .iter()
                .filter(|k| !params.contains_key(*k))
                .collect();
            if !missing.is_empty() {
                eprintln!("warning: missing parameters {missing:?}");
            }
            print_json(&plan.summary())
        }
    }
}

/// Builds a fake element that a plain selector would match.
fn element_from_selector(raw: &str) -> Result<UiElement> {
    let selector: Selector = raw.parse()?;
    Ok(match selector {
        Selector::ResourceId { id } => UiElement::with_id(id),
        Selector::Text { text } => UiElement::with_text(text),
        Selector::ContentDesc { desc } => UiElement::default().desc(desc),
        Selector::ClassName { name } => UiElement::default().class(name),
        Selector::Compound { .. } => bail!("--element takes a single selector, got {raw:?}"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    run(cli).await
}
