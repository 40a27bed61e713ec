//! canopy - drive the tree engine from the command line
//!
//! Loads a tree from a JSON fixture or an HTTP backend, runs one engine
//! operation and prints the visible tree.

mod render;

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use canopy_lib::PollScheduler;
use canopy_lib::PollState;
use canopy_lib::Tree;
use canopy_lib::adapter::RecordingAdapter;
use canopy_lib::config::PollConfig;
use canopy_lib::config::TreeConfig;
use canopy_lib::error::FetchError;
use canopy_lib::fetch::HttpConfig;
use canopy_lib::fetch::HttpFetcher;
use canopy_lib::fetch::MemoryFetcher;
use canopy_lib::fetch::SnapshotFetcher;
use canopy_lib::model::NodeData;
use canopy_lib::model::NodeId;
use clap::Parser;
use clap::Subcommand;
use log::info;
use simplelog::ColorChoice;
use simplelog::Config;
use simplelog::LevelFilter;
use simplelog::TermLogger;
use simplelog::TerminalMode;
use simplelog::WriteLogger;

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Reconcile and page through remote trees")]
struct Cli {
    /// JSON fixture holding the whole hierarchy
    #[arg(long, conflicts_with = "url", required_unless_present = "url")]
    fixture: Option<PathBuf>,

    /// Base URL of a tree API
    #[arg(long)]
    url: Option<String>,

    /// Children per page
    #[arg(long, default_value_t = 10)]
    page_size: usize,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the first page of top-level nodes
    Roots,

    /// Expand nodes in order, then print
    Expand {
        /// Node ids in `kind:key` form, e.g. `archive:a`
        #[arg(required = true, value_parser = parse_id)]
        ids: Vec<NodeId>,
    },

    /// Build the ancestor path of a node, select it and print
    Reveal {
        #[arg(value_parser = parse_id)]
        id: NodeId,
    },

    /// Activate the "see more" sentinel of a node repeatedly
    Page {
        /// Owner of the pages; `root` for the top level
        #[arg(value_parser = parse_id)]
        owner: NodeId,

        /// Number of activations
        #[arg(long, default_value_t = 1)]
        times: usize,
    },

    /// Poll until all visible work is finished
    Watch {
        /// Nodes to expand before polling
        #[arg(long, value_parser = parse_id)]
        expand: Vec<NodeId>,

        /// Seconds between refreshes while work is in progress
        #[arg(long, default_value_t = 5)]
        active_secs: u64,

        /// Seconds before the confirmatory refresh
        #[arg(long, default_value_t = 15)]
        idle_secs: u64,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Tree(#[from] canopy_lib::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Logger: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("Node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("Either --fixture or --url is required")]
    NoSource,
}

fn parse_id(s: &str) -> Result<NodeId, String> {
    NodeId::parse(s).ok_or_else(|| format!("`{}` is not a node id (expected kind:key)", s))
}

fn init_logging(verbose: u8, log_file: Option<&PathBuf>) -> Result<(), CliError> {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    match log_file {
        Some(path) => WriteLogger::init(level, Config::default(), File::create(path)?)?,
        None => TermLogger::init(
            level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        )?,
    }
    Ok(())
}

fn fetcher(cli: &Cli) -> Result<Arc<dyn SnapshotFetcher>, CliError> {
    match (&cli.fixture, &cli.url) {
        (Some(path), _) => {
            let json = std::fs::read_to_string(path)?;
            let backend = MemoryFetcher::from_json(&json)?;
            info!("loaded {} nodes from {}", backend.len(), path.display());
            Ok(Arc::new(backend))
        }
        (None, Some(url)) => Ok(Arc::new(HttpFetcher::new(HttpConfig::new(url.clone()))?)),
        (None, None) => Err(CliError::NoSource),
    }
}

/// Finds the snapshot of `id` by listing its parent's children.
async fn lookup(
    fetcher: &dyn SnapshotFetcher,
    id: &NodeId,
    page_size: usize,
) -> Result<NodeData, CliError> {
    let owner = match fetcher.fetch_parent(id).await? {
        Some(parent) => parent.id,
        None => NodeId::Root,
    };
    let mut page = 1;
    loop {
        let fetched = fetcher.fetch_children(&owner, page, page_size).await?;
        let more = fetched.has_more(page, page_size);
        if let Some(found) = fetched.into_items().into_iter().find(|n| n.id == *id) {
            return Ok(found);
        }
        if !more {
            return Err(CliError::UnknownNode(id.clone()));
        }
        page += 1;
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let fetcher = fetcher(&cli)?;
    let adapter = Arc::new(RecordingAdapter::new());
    let config = TreeConfig::default().with_page_size(cli.page_size);
    let tree = Tree::with_config(fetcher.clone(), adapter.clone(), config);

    match cli.command {
        Command::Roots => {
            tree.load_roots().await?;
        }
        Command::Expand { ids } => {
            tree.load_roots().await?;
            for id in &ids {
                tree.expand(id).await?;
            }
        }
        Command::Reveal { id } => {
            let start = lookup(fetcher.as_ref(), &id, cli.page_size).await?;
            let path = tree.reveal(start).await?;
            let path: Vec<String> = path.iter().map(ToString::to_string).collect();
            println!("{}\n", path.join(" > "));
        }
        Command::Page { owner, times } => {
            tree.load_roots().await?;
            if owner != NodeId::Root {
                tree.expand(&owner).await?;
            }
            for _ in 0..times {
                let appended = tree.activate(&NodeId::see_more(&owner)).await?;
                info!("appended {} node(s) under {}", appended, owner);
                if appended == 0 {
                    break;
                }
            }
        }
        Command::Watch {
            expand,
            active_secs,
            idle_secs,
        } => {
            tree.load_roots().await?;
            for id in &expand {
                tree.expand(id).await?;
            }
            let config = PollConfig::default()
                .with_active_interval(Duration::from_secs(active_secs))
                .with_idle_interval(Duration::from_secs(idle_secs));
            return watch(tree, adapter, config).await;
        }
    }

    print!("{}", render::render(&tree, &adapter));
    Ok(())
}

async fn watch(
    tree: Tree,
    adapter: Arc<RecordingAdapter>,
    config: PollConfig,
) -> Result<(), CliError> {
    let mut scheduler = PollScheduler::new(config);
    let mut state = scheduler.start(tree.clone());

    loop {
        let current = *state.borrow_and_update();
        println!("== {:?}", current);
        print!("{}", render::render(&tree, &adapter));
        if current == PollState::Stopped {
            return Ok(());
        }

        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                scheduler.cancel();
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_ref()) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
