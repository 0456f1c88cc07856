use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use sluice_client::{default_downloaders, default_extractors};
use sluice_core::config::{expand_path, parse_option};
use sluice_core::filter::{Expression, FilterExpr};
use sluice_core::input::{InputUrl, parse_input};
use sluice_core::job::{PredicateOptions, ScopeOptions, describe_error};
use sluice_core::output::{self, SharedWriter};
use sluice_core::predicate::{optimize_range, parse_range};
use sluice_core::{AppError, Config, DataJob, DownloadJob, JobEnv, KeywordJob, TestJob, UrlJob};
use sluice_db::{DatabaseConfig, SqliteArchives};

#[derive(Parser)]
#[command(
    name = "sluice",
    version,
    about = "Download files and metadata from URLs through pluggable extractors"
)]
struct Cli {
    /// URLs to process
    urls: Vec<String>,

    /// Read URLs from FILE ('-' for stdin)
    #[arg(short = 'i', long = "input-file", value_name = "FILE")]
    input_files: Vec<PathBuf>,

    /// Target location for file downloads
    #[arg(short = 'd', long, value_name = "PATH")]
    base_directory: Option<String>,

    /// Additional configuration file
    #[arg(short, long, value_name = "FILE", env = "SLUICE_CONFIG")]
    config: Option<PathBuf>,

    /// Do not read the default configuration files
    #[arg(long)]
    ignore_config: bool,

    /// Additional '<key>=<value>' option values
    #[arg(short = 'o', long = "option", value_name = "OPT")]
    options: Vec<String>,

    /// Print URLs instead of downloading; repeat to resolve nested sources
    #[arg(short = 'g', long = "get-urls", action = ArgAction::Count)]
    get_urls: u8,

    /// Print a list of available keywords and example values
    #[arg(short = 'K', long)]
    list_keywords: bool,

    /// Print JSON information
    #[arg(short = 'j', long)]
    dump_json: bool,

    /// Print a hash summary of URLs, metadata and archive ids as JSON
    #[arg(long)]
    fixture: bool,

    /// Include downloaded file content in the --fixture summary
    #[arg(long, requires = "fixture")]
    content: bool,

    /// Index range(s) of files to download, e.g. '5', '8-20' or '1-3,10-'
    #[arg(long, value_name = "RANGE")]
    range: Option<String>,

    /// Like --range, but applies to nested sources
    #[arg(long, value_name = "RANGE")]
    chapter_range: Option<String>,

    /// Only download files whose metadata matches EXPR
    #[arg(long, value_name = "EXPR")]
    filter: Option<String>,

    /// Like --filter, but applies to nested sources
    #[arg(long, value_name = "EXPR")]
    chapter_filter: Option<String>,

    /// Record downloaded files in FILE and skip the ones already in it
    #[arg(long, value_name = "FILE")]
    download_archive: Option<String>,

    /// Write URLs no extractor could handle to FILE ('-' for stdout)
    #[arg(long, value_name = "FILE")]
    write_unsupported: Option<String>,

    /// Print a list of available extractors
    #[arg(long)]
    list_extractors: bool,

    /// Print debugging information
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Activate quiet mode
    #[arg(short, long)]
    quiet: bool,
}

/// Which job runs for each URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Download,
    Urls(u32),
    Keywords,
    Data,
    Fixture { content: bool },
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.fixture {
            Mode::Fixture {
                content: self.content,
            }
        } else if self.dump_json {
            Mode::Data
        } else if self.list_keywords {
            Mode::Keywords
        } else if self.get_urls > 0 {
            Mode::Urls(u32::from(self.get_urls))
        } else {
            Mode::Download
        }
    }

    fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("sluice={}", cli.log_level()).parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nKeyboardInterrupt");
            Ok(ExitCode::from(130))
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let extractors = default_extractors().context("Failed to set up extractors")?;

    if cli.list_extractors {
        for factory in extractors.factories() {
            println!("{}", factory.name());
            if !factory.description().is_empty() {
                println!("{}", factory.description());
            }
            println!();
        }
        return Ok(ExitCode::SUCCESS);
    }

    let inputs = collect_inputs(&cli)?;
    if inputs.is_empty() {
        Cli::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "no URLs given; pass URLs or use --input-file",
            )
            .exit();
    }

    let mut config = load_config(&cli)?;
    let predicates = build_predicates(&cli)?;
    let unsupported = open_unsupported(&config)?;

    let mut env = JobEnv::new(extractors)
        .with_downloaders(default_downloaders())
        .with_archives(SqliteArchives::new(DatabaseConfig::from_env()?))
        .with_output(output::select(&config, output::stdout_writer()))
        .with_predicates(predicates)
        .with_unsupported(unsupported);

    let mode = cli.mode();
    let progress = inputs.len() > 1
        && config
            .get(&["output", "progress"])
            .and_then(Value::as_bool)
            .unwrap_or(true);
    let total = inputs.len();
    let mut failed = false;

    for (index, input) in inputs.into_iter().enumerate() {
        if !input.global.is_empty() {
            let updated = config.with_overrides(&input.global);
            env = refresh_env(env, &config, &updated)?;
            config = updated;
        }
        if progress {
            eprintln!("[{}/{}] {}", index + 1, total, input.url);
        }

        let job_env = env.clone().with_config(config.with_overrides(&input.local));
        if let Err(e) = run_url(mode, &input.url, job_env).await {
            tracing::error!(url = %input.url, "{}", describe_error(&input.url, &e));
            if let AppError::NoExtractor(url) = &e {
                env.write_unsupported(url);
            }
            failed = true;
        }
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Build and run the job `mode` selects for one URL.
async fn run_url(mode: Mode, url: &str, env: JobEnv) -> Result<(), AppError> {
    match mode {
        Mode::Download => DownloadJob::new(url, None, env)?.run().await,
        Mode::Urls(max_depth) => UrlJob::new(url, None, env, max_depth)?.run().await,
        Mode::Keywords => KeywordJob::new(url, None, env)?.run().await,
        Mode::Data => DataJob::new(url, None, env, std::io::stdout())?.run().await?,
        Mode::Fixture { content } => {
            let stdout = env.stdout.clone();
            let mut job = TestJob::new(url, None, env, content)?;
            job.run().await?;
            let summary = serde_json::to_string_pretty(&job.fixture())?;
            output::write_line(&stdout, &summary)?;
        }
    }
    Ok(())
}

/// Positional URLs first, then the contents of every input file in order.
fn collect_inputs(cli: &Cli) -> Result<Vec<InputUrl>> {
    let mut inputs: Vec<InputUrl> = cli.urls.iter().map(InputUrl::new).collect();
    for path in &cli.input_files {
        let text = read_input_file(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        inputs.extend(parse_input(&text));
    }
    Ok(inputs)
}

fn read_input_file(path: &Path) -> std::io::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        std::fs::read_to_string(path)
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|dir| !dir.is_empty()) {
        paths.push(PathBuf::from(dir).join("sluice").join("config.json"));
    }
    let home = expand_path("~/.config/sluice/config.json");
    if !paths.contains(&home) {
        paths.push(home);
    }
    paths
}

/// Default files, then `--config`, then command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.ignore_config {
        Config::new()
    } else {
        Config::load(&default_config_paths(), false)?
    };

    if let Some(path) = &cli.config {
        let extra = Config::load(std::slice::from_ref(path), true)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;
        config.merge(extra.into_value());
    }

    apply_cli_options(&mut config, cli)?;
    Ok(config)
}

fn apply_cli_options(config: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(dir) = &cli.base_directory {
        config.set(&["extractor", "base-directory"], Value::String(dir.clone()));
    }
    if let Some(path) = &cli.download_archive {
        config.set(&["extractor", "archive"], Value::String(path.clone()));
    }
    if let Some(path) = &cli.write_unsupported {
        config.set(&["output", "unsupportedfile"], Value::String(path.clone()));
    }
    if cli.quiet {
        config.set(&["output", "mode"], Value::String("null".into()));
    }

    let overrides = cli
        .options
        .iter()
        .map(|option| parse_option(option))
        .collect::<Result<Vec<_>, _>>()?;
    *config = config.with_overrides(&overrides);
    Ok(())
}

fn build_predicates(cli: &Cli) -> Result<PredicateOptions> {
    Ok(PredicateOptions {
        image: scope_options("range", cli.range.as_deref(), cli.filter.as_deref())?,
        chapter: scope_options(
            "chapter-range",
            cli.chapter_range.as_deref(),
            cli.chapter_filter.as_deref(),
        )?,
    })
}

/// An unusable range is ignored with a warning; an unusable filter aborts.
fn scope_options(option: &str, range: Option<&str>, filter: Option<&str>) -> Result<ScopeOptions> {
    let range = range.and_then(|spec| match parse_range(spec).map(optimize_range) {
        Some(ranges) if !ranges.is_empty() => Some(ranges),
        _ => {
            tracing::warn!(option, value = spec, "Ignoring invalid range");
            None
        }
    });

    let filter = match filter {
        Some(source) => {
            let expr = Expression::parse(source)
                .with_context(|| format!("Invalid filter expression: {source}"))?;
            Some(Arc::new(expr) as Arc<dyn FilterExpr>)
        }
        None => None,
    };

    Ok(ScopeOptions { filter, range })
}

/// Reselect the output and reopen the unsupported-URL file after global
/// options changed the config.
fn refresh_env(env: JobEnv, previous: &Config, config: &Config) -> Result<JobEnv> {
    let output = output::select(config, env.stdout.clone());
    let mut env = env.with_output(output);
    let key = ["output", "unsupportedfile"];
    if previous.get(&key) != config.get(&key) {
        env = env.with_unsupported(open_unsupported(config)?);
    }
    Ok(env)
}

fn open_unsupported(config: &Config) -> Result<Option<SharedWriter>> {
    let Some(path) = config
        .get(&["output", "unsupportedfile"])
        .and_then(Value::as_str)
    else {
        return Ok(None);
    };
    if path == "-" {
        return Ok(Some(output::stdout_writer()));
    }
    let path = expand_path(path);
    let file = File::create(&path)
        .with_context(|| format!("Failed to open unsupported URL file: {}", path.display()))?;
    Ok(Some(output::shared(file)))
}
