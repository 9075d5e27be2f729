use crate::bench::TestResult;
use crate::client::HttpClient;
use crate::config::Config;
use crate::runners::Registry;
use anyhow::Context;
use clap::Parser;
use clap::ValueHint::FilePath;
use log::debug;
use std::fs::read_to_string;
use std::io::{self, Read, Write};

#[derive(Parser, Debug)]
#[command(version, about = "Benchmark a registry that implements the distribution API")]
struct BenchCli {
    #[arg(default_value = "-")]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the benchmark's JSON config file, or - for standard input")]
    config: String,

    #[arg(short = 'l', long)]
    #[arg(help = "List all registered test types and exit")]
    list: bool,
}

#[derive(Parser, Debug)]
#[command(version, about = "Summarize the results of a distribution-bench run")]
struct StatsCli {
    #[arg(default_value = "-")]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the JSON results file, or - for standard input")]
    results: String,
}

/// Reads a whole file, or standard input if `path` is `-`.
fn read_input(path: &str, what: &str) -> anyhow::Result<String> {
    if path == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .with_context(|| format!("failed to read {} from standard input", what))?;
        return Ok(text);
    }
    read_to_string(path).with_context(|| format!("failed to open {} file {:?}", what, path))
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    let text = read_input(path, "config")?;
    Config::from_json(&text).context("failed to load config")
}

fn load_results(path: &str) -> anyhow::Result<Vec<TestResult>> {
    let text = read_input(path, "results")?;
    serde_json::from_str(&text).context("failed to unmarshal results")
}

fn list_cli(registry: &Registry, out: &mut impl Write) -> io::Result<()> {
    for t in registry.types() {
        writeln!(out, "Registered test type: {}", t)?;
    }
    Ok(())
}

fn init_logger(debug: bool) {
    let filter = match debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().default_filter_or(filter);
    // a logger may already be installed by an embedding program
    let _ = env_logger::Builder::from_env(env).try_init();
}

fn bench_cli(cli: &BenchCli, registry: &Registry) -> anyhow::Result<()> {
    let config = load_config(&cli.config)?;
    init_logger(config.debug);
    debug!("Starting distribution-bench with args: {:?}", cli);

    let client = HttpClient::new(&config.registry, config.debug)
        .context("creating registry client")?;
    debug!("Using namespace {}", client.namespace());

    let results = crate::bench::run(&config, &client, registry).context("running tests failed")?;

    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, &results).context("encoding results")?;
    writeln!(stdout)?;
    Ok(())
}

/// The benchmark command line interface, with a custom registry.
///
/// This function is public so that a different crate can add its own operation types: build a
/// [`Registry`] (usually starting from [`Registry::with_builtins`]), register the extra
/// constructors, and call this function from `main`. The resulting binary has the same usage as
/// `distribution-bench`.
pub fn bench_cmdline_with(registry: Registry) -> anyhow::Result<()> {
    let cli = BenchCli::parse();
    if cli.list {
        return Ok(list_cli(&registry, &mut io::stdout().lock())?);
    }
    bench_cli(&cli, &registry)
}

/// The default benchmark command line interface.
///
/// ## Usage
///
/// ```bash
/// distribution-bench [CONFIG]
/// ```
///
/// Where `CONFIG` is the path to the JSON configuration file, see [`mod@crate::config`] for its
/// format. When it is `-` or missing, the configuration is read from standard input. Results are
/// written to standard output as JSON, see [`mod@crate::bench`]. Logs go to standard error and
/// are controlled by `RUST_LOG`; `debug` in the configuration raises the default level to debug.
///
/// To list the available test types:
///
/// ```bash
/// distribution-bench --list
/// ```
pub fn bench_cmdline() -> anyhow::Result<()> {
    bench_cmdline_with(Registry::with_builtins())
}

/// The command line interface of `bench-stats`.
///
/// ## Usage
///
/// ```bash
/// bench-stats [RESULTS]
/// ```
///
/// Where `RESULTS` is a results file written by `distribution-bench`, or `-` for standard input.
/// A summary of every test is printed to standard output, see [`mod@crate::stats`].
pub fn stats_cmdline() -> anyhow::Result<()> {
    env_logger::init();
    let cli = StatsCli::parse();
    debug!("Starting bench-stats with args: {:?}", cli);
    let results = load_results(&cli.results)?;
    crate::stats::write_results(&mut io::stdout().lock(), &results)?;
    Ok(())
}
