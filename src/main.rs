//! xindex CLI - build and query the on-disk dependency index

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use xindex::config::{load_config, Settings};
use xindex::ui::{self, Icons};
use xindex::{Coordinator, IndexLayout, IndexReader, MarkerStore, PlatformModule, ProjectGraph, RunRegistry, TemplateResolver};

#[derive(Parser)]
#[command(name = "xindex")]
#[command(version)]
#[command(about = "Dependency-graph indexer for multi-project builds")]
#[command(long_about = r#"
xindex turns a project graph into a durable on-disk index:
  • one directory per project platform:module, with symmetric in/out links
  • one directory per published group:name:version coordinate
  • liveness levels propagated from modules that have sources

Example usage:
  xindex index --model build.toml
  xindex entries --model build.toml --project :app --module api
  xindex resolve --index-dir build/xindex net.demo app 1.0
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a project graph
    Index {
        /// Project graph description (.toml or .json)
        #[arg(short, long)]
        model: PathBuf,

        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Index directory (defaults to <root>/build/xindex)
        #[arg(short, long)]
        index_dir: Option<PathBuf>,

        /// Barrier timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Worker pool size
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show the coordinate entries of one project platform:module
    Entries {
        /// Project graph the index was built from
        #[arg(short, long)]
        model: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        index_dir: Option<PathBuf>,

        /// Project path; the root project when omitted
        #[arg(short, long)]
        project: Option<String>,

        #[arg(long, default_value = "main")]
        platform: String,

        #[arg(long, default_value = "main")]
        module: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Look up a published group:name:version coordinate
    Resolve {
        #[arg(short, long)]
        index_dir: PathBuf,

        group: String,
        name: String,
        version: String,

        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Print the content digest of an index
    Fingerprint {
        #[arg(short, long)]
        index_dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Index {
            model,
            config,
            index_dir,
            timeout_ms,
            workers,
        } => {
            let graph = Arc::new(load_graph(&model)?);
            let mut settings = settings_for(config.as_deref(), &graph.root_dir, index_dir)?;
            if let Some(millis) = timeout_ms {
                settings.timeout = Duration::from_millis(millis);
            }
            if let Some(workers) = workers.filter(|w| *w > 0) {
                settings.workers = workers;
            }

            ui::header(&format!("Indexing {}", graph.build_name));
            ui::status(Icons::FOLDER, "Model", &model.display().to_string());
            ui::status(Icons::DATABASE, "Index", &settings.index_dir.display().to_string());

            let coordinator = Coordinator::new(settings, Arc::new(RunRegistry::new()))?;
            let spinner = ui::Spinner::new(&format!("Populating {} projects", graph.projects.len()));
            let started = Instant::now();
            let outcome = coordinator.index(graph).wait();
            spinner.finish_and_clear();

            let index = match outcome {
                Ok(index) => index,
                Err(err) => {
                    ui::error(&format!("Indexing failed after {}", ui::human_duration(started.elapsed())));
                    return Err(err).context("index run did not succeed");
                }
            };

            ui::section(" Summary ");
            let rows = [
                ("Modules", index.populated.modules.to_string()),
                ("Edges", index.populated.edges.to_string()),
                ("External coordinates", index.populated.externals.to_string()),
                ("Seeds", index.propagation.seeds.to_string()),
                ("Promoted to reachable", index.propagation.promoted.to_string()),
                ("Multiplatform projects", index.propagation.multiplatform_projects.to_string()),
            ];
            println!("{}", ui::stats_table(&rows));
            ui::status(Icons::CLOCK, "Elapsed", &ui::human_duration(started.elapsed()));
            ui::success("Index complete");
        }

        Commands::Entries {
            model,
            config,
            index_dir,
            project,
            platform,
            module,
            format,
        } => {
            let graph = Arc::new(load_graph(&model)?);
            let settings = settings_for(config.as_deref(), &graph.root_dir, index_dir)?;
            let resolver = Arc::new(TemplateResolver::from_properties(&settings.properties));
            let reader = IndexReader::new(
                IndexLayout::new(&settings.index_dir),
                Arc::new(MarkerStore::new()),
                resolver,
                graph,
            );

            let variant = PlatformModule::new(platform, module);
            let entries = reader.get_entries(project.as_deref(), &variant)?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(entries.as_ref())?),
                Format::Text => {
                    let who = project.as_deref().unwrap_or(":");
                    ui::status(Icons::PACKAGE, &format!("{}@{}", who, variant), &entries.coordinate);
                    ui::status(Icons::CHECK, "Liveness", &format!("{:?} ({})", entries.live, entries.live));
                    if entries.has_entries() {
                        println!("{}", ui::entries_table(&entries));
                    } else {
                        ui::warn("No entries recorded");
                    }
                }
            }
        }

        Commands::Resolve {
            index_dir,
            group,
            name,
            version,
            format,
        } => {
            let reader = standalone_reader(&index_dir);
            let Some(entries) = reader.resolve(&group, &name, &version)? else {
                ui::error(&format!("{}:{}:{} is not in the index", group, name, version));
                std::process::exit(1);
            };
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(entries.as_ref())?),
                Format::Text => {
                    ui::status(Icons::LINK, "Coordinate", &entries.coordinate);
                    ui::status(Icons::CHECK, "Liveness", &format!("{:?} ({})", entries.live, entries.live));
                    let table = ui::entries_table(&entries);
                    if !table.is_empty() {
                        println!("{}", table);
                    }
                }
            }
        }

        Commands::Fingerprint { index_dir } => {
            let reader = standalone_reader(&index_dir);
            println!("{}", reader.fingerprint()?);
        }
    }

    Ok(())
}

fn load_graph(model: &Path) -> anyhow::Result<ProjectGraph> {
    ProjectGraph::load(model).with_context(|| format!("failed to load project graph {}", model.display()))
}

fn settings_for(config: Option<&Path>, root_dir: &Path, index_dir: Option<PathBuf>) -> anyhow::Result<Settings> {
    let config = load_config(config)?;
    let mut settings = Settings::resolve(&config, root_dir)?;
    if let Some(dir) = index_dir {
        settings.index_dir = dir;
    }
    Ok(settings)
}

/// Reader for queries that need no publish patterns.
fn standalone_reader(index_dir: &Path) -> IndexReader {
    IndexReader::new(
        IndexLayout::new(index_dir),
        Arc::new(MarkerStore::new()),
        Arc::new(TemplateResolver::new()),
        Arc::new(ProjectGraph::new("xindex", "", "", index_dir)),
    )
}
