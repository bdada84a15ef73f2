use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use step_replay::config::{self, Config};
use step_replay::driver::{Browser, PlaywrightConfig, PlaywrightFactory};
use step_replay::provider::ChatPlanner;
use step_replay::scheduler::Scheduler;
use step_replay::session::Session;
use step_replay::store::CaseStore;
use step_replay::{RunContext, TestCase, shutdown};

/// Step Replay - natural-language browser tests with cached action replay
#[derive(Parser, Debug)]
#[command(
    name = "step-replay",
    about = "Run natural-language browser test cases, replaying cached actions where possible",
    after_help = "ENVIRONMENT VARIABLES:\n\
        STEP_REPLAY_STORE_DIR          Case document directory\n\
        STEP_REPLAY_CONCURRENCY        Cases per batch\n\
        STEP_REPLAY_SETTLE_TIMEOUT_MS  Post-step settle wait\n\
        STEP_REPLAY_PLANNER_ENDPOINT   Chat completions URL\n\
        STEP_REPLAY_PLANNER_MODEL      Planner model name\n\
        STEP_REPLAY_PLANNER_API_KEY    Planner API key (falls back to OPENAI_API_KEY)\n\
        STEP_REPLAY_SESSION_DIR        Base directory for trace sessions\n\
        RUST_LOG                       Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run stored cases and merge the results back into the store
    Run {
        /// Case document directory
        #[arg(long, env = "STEP_REPLAY_STORE_DIR", default_value = config::DEFAULT_STORE_DIR)]
        store: PathBuf,

        /// Only run these case ids (default: all)
        #[arg(long = "id")]
        ids: Vec<String>,

        /// Cases per batch
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Record API request shapes; runs one case at a time
        #[arg(long)]
        record_api: bool,

        /// Do not record trace artifacts
        #[arg(long)]
        no_trace: bool,

        /// Browser engine: chromium, firefox or webkit
        #[arg(long, default_value = "chromium")]
        browser: String,

        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },

    /// Print a stored case document
    Show {
        #[arg(long, env = "STEP_REPLAY_STORE_DIR", default_value = config::DEFAULT_STORE_DIR)]
        store: PathBuf,

        #[arg(long)]
        id: String,
    },

    /// Write a new case document
    Init {
        #[arg(long, env = "STEP_REPLAY_STORE_DIR", default_value = config::DEFAULT_STORE_DIR)]
        store: PathBuf,

        #[arg(long)]
        id: String,

        /// Page the case starts on
        #[arg(long)]
        url: String,

        /// Natural-language step, repeatable and run in order
        #[arg(long = "step")]
        steps: Vec<String>,

        /// Expected outcome, verified after the steps
        #[arg(long)]
        expect: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match run(Args::parse()).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether every case passed
async fn run(args: Args) -> Result<bool, Box<dyn Error>> {
    match args.command {
        Commands::Run {
            store,
            ids,
            concurrency,
            record_api,
            no_trace,
            browser,
            headed,
        } => {
            let mut settings: Config = config::get().clone();
            if let Some(n) = concurrency {
                settings.run.concurrency = n.max(1);
            }
            if no_trace {
                settings.run.trace = false;
            }

            let store = Arc::new(CaseStore::open(&store)?);
            let cases: Vec<TestCase> = store
                .load_all()?
                .into_iter()
                .map(|doc| doc.case)
                .filter(|case| ids.is_empty() || ids.contains(&case.id))
                .collect();
            if cases.is_empty() {
                tracing::warn!("no cases to run in {}", store.dir().display());
                return Ok(true);
            }

            let browser = Browser::from_name(&browser)
                .ok_or_else(|| format!("unknown browser '{}'", browser))?;
            let factory = Arc::new(PlaywrightFactory::new(PlaywrightConfig {
                browser,
                headless: !headed,
                ..Default::default()
            }));
            let planner = Arc::new(ChatPlanner::new(settings.planner.clone())?);

            let (trigger, signal) = shutdown::channel();
            shutdown::install_ctrl_c(trigger);

            let mut ctx = RunContext::new(planner, &settings).with_shutdown(signal);
            let session = if settings.run.trace {
                let session = Arc::new(Session::under(&settings.paths.session_dir, "run").keep(true));
                session.init()?;
                ctx = ctx.with_session(Arc::clone(&session));
                Some(session)
            } else {
                None
            };

            let report = Scheduler::new(factory, store, ctx)
                .record_api(record_api)
                .run(&cases)
                .await;

            for outcome in &report.outcomes {
                let result = &outcome.result;
                println!(
                    "{:<6} {} ({} step(s), {}ms)",
                    if result.passed() { "PASS" } else { "FAIL" },
                    result.id,
                    result.steps.len(),
                    result.duration_ms
                );
                if let Some(error) = &result.error {
                    println!("       {}", error);
                }
            }
            for id in &report.skipped {
                println!("{:<6} {}", "SKIP", id);
            }
            println!("\n{} passed, {} failed", report.passed(), report.failed());
            if let Some(session) = session {
                println!("Traces: {}", session.dir.join("traces").display());
            }
            Ok(report.all_passed())
        }

        Commands::Show { store, id } => {
            let store = CaseStore::open(&store)?;
            let doc = store
                .load(&id)?
                .ok_or_else(|| format!("case {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(true)
        }

        Commands::Init {
            store,
            id,
            url,
            steps,
            expect,
        } => {
            let store = CaseStore::open(&store)?;
            let path = store.path_for(&id);
            let mut case = TestCase::new(id, url);
            case.steps = steps;
            case.expected_result = expect;
            store.create(case)?;
            println!("Created {}", path.display());
            Ok(true)
        }
    }
}
