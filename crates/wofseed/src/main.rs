use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wofseed_core::checkpoint::{load_checkpoint, reset_checkpoint, save_checkpoint};
use wofseed_core::config::{SeedConfig, load_config};
use wofseed_core::hierarchy::{BuildReport, WalkEvent};
use wofseed_core::pipeline::{SourceReport, build_from_batch, seed_batch};
use wofseed_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout,
    normalize_for_display, resolve_paths,
};
use wofseed_core::seed::{LocalSink, PlanSink, SeedReport, SeedSink, seed_hierarchy};
use wofseed_core::source::{
    FetchOptions, GithubClient, GithubClientConfig, RepoTarget, SourceBatch, directory_label,
    fetch_repo_batch, list_admin_repos, scan_directory,
};

#[derive(Debug, Parser)]
#[command(
    name = "wofseed",
    version,
    about = "Rebuild Who's On First place hierarchies as seeded folder trees"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the .wofseed/ layout and a default config")]
    Init(InitArgs),
    #[command(about = "Print the folder and leaf events a seed run would produce")]
    Tree(SourceArgs),
    #[command(about = "Print normalization and hierarchy counters per source")]
    Stats(SourceArgs),
    #[command(about = "Materialize hierarchies as folders with placeholder leaf documents")]
    Seed(SeedArgs),
    #[command(about = "List admin repositories of the configured GitHub org")]
    Repos,
    Checkpoint(CheckpointArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct SourceArgs {
    #[arg(long = "dir", value_name = "PATH", help = "Local directory of WOF records")]
    dirs: Vec<PathBuf>,
    #[arg(long = "repo", value_name = "NAME", help = "Admin repository name")]
    repos: Vec<String>,
    #[arg(long, value_name = "N", help = "Read at most N record files per source")]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct SeedArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, help = "Seed every admin repository of the configured org")]
    all_repos: bool,
    #[arg(long, help = "Report what would be written without touching disk")]
    dry_run: bool,
    #[arg(long, help = "Skip sources already recorded in the checkpoint")]
    resume: bool,
    #[arg(long, value_name = "PATH", help = "Output directory (overrides config)")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CheckpointArgs {
    #[command(subcommand)]
    command: CheckpointSubcommand,
}

#[derive(Debug, Subcommand)]
enum CheckpointSubcommand {
    Show,
    Reset,
}

#[derive(Debug, Clone)]
enum SourceRef {
    Directory(PathBuf),
    Repo(String),
}

impl SourceRef {
    fn key(&self, project_root: &Path) -> String {
        match self {
            Self::Directory(path) => directory_label(path, project_root),
            Self::Repo(name) => name.clone(),
        }
    }
}

struct Session {
    paths: ResolvedPaths,
    config: SeedConfig,
    github: Option<GithubClient>,
}

impl Session {
    fn github(&mut self) -> Result<&mut GithubClient> {
        if self.github.is_none() {
            self.github = Some(GithubClient::new(GithubClientConfig::from_config(
                &self.config,
            ))?);
        }
        match self.github.as_mut() {
            Some(client) => Ok(client),
            None => bail!("GitHub client unavailable"),
        }
    }

    fn load(&mut self, source: &SourceRef, options: &FetchOptions) -> Result<SourceBatch> {
        match source {
            SourceRef::Directory(path) => {
                let mut batch = scan_directory(path, options)?;
                batch.label = source.key(&self.paths.project_root);
                Ok(batch)
            }
            SourceRef::Repo(name) => {
                let target = RepoTarget {
                    org: self.config.github_org(),
                    repo: name.clone(),
                    branch: self.config.github_branch(),
                };
                fetch_repo_batch(self.github()?, &target, options)
            }
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Tree(args)) => run_tree(&runtime, args),
        Some(Commands::Stats(args)) => run_stats(&runtime, args),
        Some(Commands::Seed(args)) => run_seed(&runtime, args),
        Some(Commands::Repos) => run_repos(&runtime),
        Some(Commands::Checkpoint(CheckpointArgs { command })) => match command {
            CheckpointSubcommand::Show => run_checkpoint_show(&runtime),
            CheckpointSubcommand::Reset => run_checkpoint_reset(&runtime),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wofseed=info,wofseed_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized wofseed runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_tree(runtime: &RuntimeOptions, args: SourceArgs) -> Result<()> {
    let mut session = open_session(runtime)?;
    let sources = collect_sources(&session.paths, &args, &[]);
    if sources.is_empty() {
        bail!("tree requires at least one --dir or --repo source");
    }
    let options = FetchOptions { limit: args.limit };
    let hierarchy_config = session.config.hierarchy_config();

    for source in &sources {
        let batch = session.load(source, &options)?;
        let (hierarchy, report) = build_from_batch(&batch, &hierarchy_config)?;
        println!("source: {}", report.label);
        println!("roots: {}", hierarchy.roots().len());
        for event in hierarchy.walk() {
            match event {
                WalkEvent::Folder { path, node } => {
                    println!("folder {path} [{} {}]", node.placetype, node.id);
                }
                WalkEvent::Leaf { path, .. } => println!("leaf   {path}"),
            }
        }
    }
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_stats(runtime: &RuntimeOptions, args: SourceArgs) -> Result<()> {
    let mut session = open_session(runtime)?;
    let sources = collect_sources(&session.paths, &args, &[]);
    if sources.is_empty() {
        bail!("stats requires at least one --dir or --repo source");
    }
    let options = FetchOptions { limit: args.limit };
    let hierarchy_config = session.config.hierarchy_config();

    for source in &sources {
        let batch = session.load(source, &options)?;
        let (hierarchy, report) = build_from_batch(&batch, &hierarchy_config)?;
        let mut plan = PlanSink::new(session.config.leaf_files().len());
        let seeded = seed_hierarchy(&hierarchy, &mut plan)?;
        print_source_report(&SourceReport {
            seed: Some(seeded),
            ..report
        });
        for skipped in &batch.skipped {
            println!("skipped: {} ({})", skipped.path, skipped.reason);
        }
    }
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_seed(runtime: &RuntimeOptions, args: SeedArgs) -> Result<()> {
    let mut session = open_session(runtime)?;
    let discovered = if args.all_repos {
        let org = session.config.github_org();
        let prefix = session.config.repo_prefix();
        list_admin_repos(session.github()?, &org, &prefix)?
    } else {
        Vec::new()
    };
    let sources = collect_sources(&session.paths, &args.source, &discovered);
    if sources.is_empty() {
        bail!("seed requires --dir, --repo, or --all-repos");
    }

    let output_dir = match &args.output {
        Some(path) => session.paths.project_path(path),
        None => session.config.output_dir(&session.paths),
    };
    let options = FetchOptions {
        limit: args.source.limit,
    };
    let hierarchy_config = session.config.hierarchy_config();
    let leaf_files = session.config.leaf_files();
    let mut checkpoint = load_checkpoint(&session.paths.checkpoint_path)?;

    println!("seed");
    println!("output_dir: {}", normalize_for_display(&output_dir));
    println!("dry_run: {}", args.dry_run);
    println!("sources: {}", sources.len());

    let mut errors = Vec::new();
    for source in &sources {
        let key = source.key(&session.paths.project_root);
        if args.resume && checkpoint.is_complete(&key) {
            println!("source.{key}: skipped (checkpoint)");
            continue;
        }
        let batch = match session.load(source, &options) {
            Ok(batch) => batch,
            Err(err) => {
                error!(source = %key, "failed to load source: {err:#}");
                errors.push(format!("{key}: {err:#}"));
                continue;
            }
        };

        let mut local;
        let mut plan;
        let sink: &mut dyn SeedSink = if args.dry_run {
            plan = PlanSink::new(leaf_files.len());
            &mut plan
        } else {
            local = LocalSink::new(&output_dir, leaf_files.clone());
            &mut local
        };

        match seed_batch(&batch, &hierarchy_config, sink, checkpoint.clone()) {
            Ok((report, updated)) => {
                print_source_report(&report);
                if !args.dry_run {
                    save_checkpoint(&session.paths.checkpoint_path, &updated)?;
                    checkpoint = updated;
                }
                info!(source = %key, "source complete");
            }
            Err(err) => {
                error!(source = %key, "failed to seed source: {err:#}");
                errors.push(format!("{key}: {err:#}"));
            }
        }
    }

    print_diagnostics(runtime, &session.paths);
    if !errors.is_empty() {
        bail!(
            "{} of {} sources failed:\n  - {}",
            errors.len(),
            sources.len(),
            errors.join("\n  - ")
        );
    }
    Ok(())
}

fn run_repos(runtime: &RuntimeOptions) -> Result<()> {
    let mut session = open_session(runtime)?;
    let org = session.config.github_org();
    let prefix = session.config.repo_prefix();
    let repos = list_admin_repos(session.github()?, &org, &prefix)?;

    println!("org: {org}");
    println!("repos.count: {}", repos.len());
    for repo in repos {
        println!("repos.name: {repo}");
    }
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_checkpoint_show(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let checkpoint = load_checkpoint(&paths.checkpoint_path)?;
    println!(
        "checkpoint_path: {}",
        normalize_for_display(&paths.checkpoint_path)
    );
    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_checkpoint_reset(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let removed = reset_checkpoint(&paths.checkpoint_path)?;
    println!(
        "checkpoint_path: {}",
        normalize_for_display(&paths.checkpoint_path)
    );
    println!("removed: {}", format_flag(removed));
    Ok(())
}

fn collect_sources(
    paths: &ResolvedPaths,
    args: &SourceArgs,
    discovered: &[String],
) -> Vec<SourceRef> {
    let mut sources = args
        .dirs
        .iter()
        .map(|dir| SourceRef::Directory(paths.project_path(dir)))
        .collect::<Vec<_>>();
    for repo in args.repos.iter().chain(discovered) {
        if !sources
            .iter()
            .any(|source| matches!(source, SourceRef::Repo(name) if name == repo))
        {
            sources.push(SourceRef::Repo(repo.clone()));
        }
    }
    sources
}

fn print_source_report(report: &SourceReport) {
    let prefix = format!("source.{}", report.label);
    println!("{prefix}.documents: {}", report.documents);
    println!("{prefix}.skipped_files: {}", report.skipped_files);
    println!("{prefix}.records: {}", report.records);
    print_build_report(&prefix, &report.build);
    if let Some(seed) = &report.seed {
        print_seed_report(&prefix, seed);
    }
}

fn print_build_report(prefix: &str, build: &BuildReport) {
    println!("{prefix}.nodes: {}", build.nodes);
    println!("{prefix}.roots: {}", build.roots);
    println!("{prefix}.linked: {}", build.linked);
    println!("{prefix}.duplicates: {}", build.duplicates);
    println!("{prefix}.filtered_placetypes: {}", build.filtered_placetypes);
    println!("{prefix}.missing_parents: {}", build.missing_parents);
    println!(
        "{prefix}.disallowed_transitions: {}",
        build.disallowed_transitions
    );
    println!("{prefix}.detached: {}", build.detached);
}

fn print_seed_report(prefix: &str, seed: &SeedReport) {
    println!("{prefix}.folders: {}", seed.folders);
    println!("{prefix}.leaves: {}", seed.leaves);
    println!("{prefix}.files_written: {}", seed.files_written);
    println!("{prefix}.files_existing: {}", seed.files_existing);
}

fn open_session(runtime: &RuntimeOptions) -> Result<Session> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok(Session {
        paths,
        config,
        github: None,
    })
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
