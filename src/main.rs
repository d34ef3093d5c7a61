use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowdeck_core::config::AppConfig;
use flowdeck_core::types::{
    now_millis, ElementPatch, ElementType, LogEntry, LogLevel, Variant, WorkflowEvent,
};
use flowdeck_engine::interchange::export_file_name;
use flowdeck_engine::{StepOutcome, Workbench};
use flowdeck_storage::SqliteBlobStore;

#[derive(Parser)]
#[command(name = "flowdeck", version, about = "Workflow simulation engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowdeck.toml")]
    config: PathBuf,

    /// Override the configured variant (generic or agent)
    #[arg(long)]
    variant: Option<Variant>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file end-to-end
    Run {
        /// Workflow JSON file
        file: PathBuf,
        /// The file is an {agents, links} document
        #[arg(long)]
        agent_doc: bool,
        /// Print the final state as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Start an interactive editing session
    Repl {
        /// Workflow JSON file to open
        file: Option<PathBuf>,
        #[arg(long)]
        agent_doc: bool,
    },
    /// Convert a workflow file between formats
    Export {
        file: PathBuf,
        #[arg(long, value_enum, default_value = "elements")]
        format: ExportFormat,
        /// The input is an {agents, links} document
        #[arg(long)]
        agent_doc: bool,
        /// Output path (defaults to workflow-<millis>.json)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Store a workflow file in the local database
    Save {
        file: PathBuf,
        #[arg(long)]
        agent_doc: bool,
    },
    /// Print (or write) the workflow saved in the local database
    Load {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    /// Canonical element array
    Elements,
    /// {agents, links} document
    Agents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("flowdeck=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "flowdeck", &mut io::stdout());
        return Ok(());
    }

    let mut config = load_config(&cli.config)?;
    if let Some(variant) = cli.variant {
        config.workbench.variant = variant;
    }

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Run {
            file,
            agent_doc,
            json,
        }) => {
            let workbench = Workbench::from_config(&config);
            open_file(&workbench, &file, agent_doc)?;
            run_to_end(&workbench, json).await?;
        }
        Some(Commands::Repl { file, agent_doc }) => {
            let workbench = Workbench::from_config(&config);
            if let Some(file) = file {
                open_file(&workbench, &file, agent_doc)?;
            }
            run_repl(&workbench, &config).await?;
        }
        Some(Commands::Export {
            file,
            format,
            agent_doc,
            out,
        }) => {
            let workbench = Workbench::from_config(&config);
            open_file(&workbench, &file, agent_doc)?;
            let out = out.unwrap_or_else(|| PathBuf::from(export_file_name(now_millis())));
            match format {
                ExportFormat::Elements => workbench.export_to(&out)?,
                ExportFormat::Agents => workbench.export_agent_document_to(&out)?,
            }
            println!("Exported {} elements to {}", workbench.elements().len(), out.display());
        }
        Some(Commands::Save { file, agent_doc }) => {
            let workbench = Workbench::from_config(&config);
            open_file(&workbench, &file, agent_doc)?;
            let store = SqliteBlobStore::open(&config.storage.db_path())?;
            workbench.save_to(&store, &config.storage.key).await?;
            println!(
                "Saved {} elements under '{}'",
                workbench.elements().len(),
                config.storage.key
            );
        }
        Some(Commands::Load { out }) => {
            let workbench = Workbench::from_config(&config);
            let store = SqliteBlobStore::open(&config.storage.db_path())?;
            let count = workbench.load_from(&store, &config.storage.key).await?;
            let json = flowdeck_engine::interchange::to_json(&workbench.elements())?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Wrote {} elements to {}", count, path.display());
                }
                None => println!("{}", json),
            }
        }
        // Handled before config loading
        Some(Commands::Completions { .. }) => {}
        None => {
            let workbench = Workbench::from_config(&config);
            run_repl(&workbench, &config).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    match AppConfig::home_config_path() {
        Some(home) if home.exists() => {
            info!(path = %home.display(), "Loading config from home directory");
            Ok(AppConfig::load(&home)?)
        }
        _ => Ok(AppConfig::default()),
    }
}

fn open_file(workbench: &Workbench, path: &Path, agent_doc: bool) -> anyhow::Result<usize> {
    let json = std::fs::read_to_string(path)?;
    let count = if agent_doc {
        workbench.import_agent_document(&json)?
    } else {
        workbench.import_json(&json)?
    };
    info!(path = %path.display(), elements = count, "Workflow opened");
    Ok(count)
}

/// Auto-run the workflow, streaming log lines as they are appended.
async fn run_to_end(workbench: &Workbench, json: bool) -> anyhow::Result<()> {
    let mut rx = workbench.subscribe();
    let printer = {
        let workbench = workbench.clone();
        tokio::spawn(async move {
            let mut stopping = false;
            while let Ok(event) = rx.recv().await {
                match event {
                    WorkflowEvent::LogAppended { entry_id } => {
                        if let Some(entry) = workbench.log_entry(entry_id) {
                            eprintln!("{}", format_log(&entry));
                        }
                        // The stop transition appends exactly one entry
                        if stopping {
                            break;
                        }
                    }
                    WorkflowEvent::RunStopped { .. } => stopping = true,
                    _ => {}
                }
            }
        })
    };

    let report = workbench.auto_run().await;
    if report.run_id.is_none() {
        printer.abort();
        anyhow::bail!("Nothing to run: the workflow has no elements");
    }
    if printer.await.is_err() {
        warn!("Log printer task failed");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&workbench.snapshot())?);
    } else {
        println!(
            "Run {}: {}/{} steps",
            if report.completed { "completed" } else { "stopped" },
            report.steps_executed,
            report.total_steps
        );
        let exec = workbench.execution();
        for record in exec.context.memory() {
            println!("  [{}] {}: {}", record.kind, record.agent, record.result);
        }
    }
    Ok(())
}

fn format_log(entry: &LogEntry) -> String {
    let tag = match entry.level {
        LogLevel::Info => "info",
        LogLevel::Success => " ok ",
        LogLevel::Warning => "warn",
        LogLevel::Error => "ERR ",
    };
    let time = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(entry.timestamp)
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_default();
    match &entry.trace {
        Some(trace) => format!(
            "{} [{}] {} -> {}",
            time,
            tag,
            entry.message,
            truncate(&trace.output, 120)
        ),
        None => format!("{} [{}] {}", time, tag, entry.message),
    }
}

const REPL_HELP: &str = "\
Commands:
  add <type>                 add an element (action|condition|loop|api|llm|tool|memory)
  rm <id>                    remove an element
  mv <id> <x> <y>            move an element
  label <id> <text...>       rename an element
  set <id> <key> <value...>  set one config key
  link <source> <target>     connect two nodes (agent variant)
  select [<id>]              select an element, or clear the selection
  list                       list elements and edges
  start | step | run         start a run, execute one step, or auto-run in the background
  pause | resume | stop      control the active run
  reset                      zero the execution state and clear logs
  status | logs | context    inspect execution
  export [<file>]            write the workflow as JSON
  import <file>              replace the workflow from JSON
  save | load                persist to / restore from the local database
  clear                      remove everything
  quit";

async fn run_repl(workbench: &Workbench, config: &AppConfig) -> anyhow::Result<()> {
    println!("Flowdeck v{} ({} variant)", env!("CARGO_PKG_VERSION"), workbench.variant());
    println!("Type help for commands, quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some((&command, args)) = parts.split_first() else {
            continue;
        };

        match (command, args) {
            ("quit" | "exit" | "q", _) => break,
            ("help" | "?", _) => println!("{}", REPL_HELP),
            ("add", [kind]) => match kind.parse::<ElementType>() {
                Ok(kind) => println!("{}", workbench.add_new(kind)),
                Err(e) => println!("{}", e),
            },
            ("rm", [id]) => report(workbench.remove(id), id),
            ("mv", [id, x, y]) => match (x.parse::<f64>(), y.parse::<f64>()) {
                (Ok(x), Ok(y)) => report(workbench.move_element(id, x, y), id),
                _ => println!("Coordinates must be numbers"),
            },
            ("label", [id, text @ ..]) if !text.is_empty() => {
                report(workbench.update(id, ElementPatch::default().label(text.join(" "))), id)
            }
            ("set", [id, key, value @ ..]) if !value.is_empty() => {
                match workbench.find(id) {
                    Some(element) => {
                        let mut cfg = element.config;
                        cfg.insert(key.to_string(), serde_json::Value::String(value.join(" ")));
                        report(workbench.update(id, ElementPatch::default().config(cfg)), id);
                    }
                    None => println!("No element {}", id),
                }
            }
            ("link", [source, target]) => {
                if workbench.variant() != Variant::Agent {
                    println!("Links are only available in the agent variant");
                } else if !workbench.connect(source, target) {
                    println!("Nothing linked (missing node or duplicate link)");
                }
            }
            ("select", []) => {
                workbench.select(None);
            }
            ("select", [id]) => report(workbench.select(Some(id)), id),
            ("list", _) => print_workflow(workbench),
            ("start", _) => {
                if !workbench.start() {
                    println!("Cannot start: already running or no elements");
                }
            }
            ("step", _) => print_outcome(workbench.step().await),
            ("run", _) => {
                let runner = workbench.clone();
                tokio::spawn(async move {
                    let report = runner.auto_run().await;
                    println!(
                        "\nRun finished: {}/{} steps{}",
                        report.steps_executed,
                        report.total_steps,
                        if report.completed { "" } else { " (stopped)" }
                    );
                });
            }
            ("pause", _) => {
                if !workbench.pause() {
                    println!("Nothing to pause");
                }
            }
            ("resume", _) => {
                if !workbench.resume() {
                    println!("Nothing to resume");
                }
            }
            ("stop", _) => {
                if workbench.stop().is_none() {
                    println!("No active run");
                }
            }
            ("reset", _) => workbench.reset(),
            ("status", _) => {
                let exec = workbench.execution();
                println!(
                    "{:?}: step {}/{} ({:.0}%), current: {}",
                    exec.phase(),
                    exec.current_step,
                    exec.total_steps,
                    exec.progress() * 100.0,
                    exec.current_element_id.as_deref().unwrap_or("-")
                );
            }
            ("logs", _) => {
                for entry in workbench.logs() {
                    println!("{}", format_log(&entry));
                }
            }
            ("context", _) => {
                let exec = workbench.execution();
                println!("{}", serde_json::to_string_pretty(&exec.context)?);
            }
            ("export", rest) => {
                let path = rest
                    .first()
                    .map(|p| PathBuf::from(*p))
                    .unwrap_or_else(|| PathBuf::from(export_file_name(now_millis())));
                match workbench.export_to(&path) {
                    Ok(()) => println!("Wrote {}", path.display()),
                    Err(e) => println!("Export failed: {}", e),
                }
            }
            ("import", [file]) => {
                if let Err(e) = open_file(workbench, Path::new(file), false) {
                    println!("Import failed: {}", e);
                }
            }
            ("save", _) => {
                let saved = match SqliteBlobStore::open(&config.storage.db_path()) {
                    Ok(store) => workbench.save_to(&store, &config.storage.key).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = saved {
                    println!("Save failed: {}", e);
                }
            }
            ("load", _) => {
                let loaded = match SqliteBlobStore::open(&config.storage.db_path()) {
                    Ok(store) => workbench.load_from(&store, &config.storage.key).await,
                    Err(e) => Err(e),
                };
                match loaded {
                    Ok(count) => println!("Loaded {} elements", count),
                    Err(e) => println!("Load failed: {}", e),
                }
            }
            ("clear", _) => workbench.clear(),
            _ => println!("Unknown command. Type help for a list."),
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn report(changed: bool, id: &str) {
    if !changed {
        println!("No change for {}", id);
    }
}

fn print_workflow(workbench: &Workbench) {
    let state = workbench.snapshot();
    if state.elements.is_empty() {
        println!("(empty)");
    }
    for el in &state.elements {
        let marker = if state.selected_id.as_deref() == Some(el.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<24} {:<10} {:<20} ({:.0}, {:.0})",
            marker,
            el.id,
            el.kind.as_str(),
            el.label,
            el.x,
            el.y
        );
    }
    for edge in &state.edges {
        println!("  {} -> {}", edge.source, edge.target);
    }
}

fn print_outcome(outcome: StepOutcome) {
    match outcome {
        StepOutcome::Executed {
            element_id,
            step,
            result,
        } => println!("{} {}: {}", step, element_id, truncate(&result.summary(), 200)),
        StepOutcome::Failed {
            element_id, error, ..
        } => println!("{} failed: {}", element_id, error),
        StepOutcome::Skipped { element_id, .. } => println!("{} skipped", element_id),
        StepOutcome::Discarded { element_id } => println!("{} discarded", element_id),
        StepOutcome::NotRunning => println!("No active run; use start"),
        StepOutcome::Exhausted => println!("All steps completed"),
        StepOutcome::Busy => println!("A step is already running"),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}
