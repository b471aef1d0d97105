use clap::{CommandFactory, Parser};
use colored::*;
use log::debug;
use std::process;

use scopewatch_core::{
    build_poller, run_poll_cycle, ConsoleSink, Credentials, CycleError, DiffOutcome, JsonSnapshotStore, Platform,
    PollConfig, SinkRef, SnapshotStore, StoreError,
};

#[derive(Parser, Debug)]
#[command(
    name = "scopewatch",
    version,
    about = "Bug bounty scope poller and change detector",
    override_usage = "scopewatch <platforms>...  <options>",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Print every HackerOne target:   scopewatch hackerone --username me --token T
  Stream as programs arrive:      scopewatch h1 intigriti --stream
  Bounty wildcards only:          scopewatch h1 --bounty-only --category wildcard -o tc
  Watch for changes:              scopewatch h1 it --diff --store ~/.scopewatch
  Offline demo platform:          scopewatch test --stream
  From a config file:             scopewatch --config scopewatch.json
  Dry-run test:                   scopewatch h1 --dry-run"
)]
pub struct Args {
    #[arg(help = "Platforms to poll (hackerone/h1, bugcrowd/bc, intigriti/it, yeswehack/ywh, immunefi, test)")]
    pub platforms: Vec<Platform>,

    #[arg(short = 'c', long, help = "Concurrent program fetches per platform [default: 3]")]
    pub concurrency: Option<usize>,

    #[arg(long, help = "Abort the platform's poll on the first failed program")]
    pub fail_fast: bool,

    #[arg(long, help = "Print each program as soon as it is fetched")]
    pub stream: bool,

    #[arg(long, help = "Compare against the stored snapshot and print changes only")]
    pub diff: bool,

    #[arg(long, help = "Snapshot directory used by --diff [default: .scopewatch]")]
    pub store: Option<String>,

    #[arg(long, help = "Only private programs")]
    pub private_only: bool,

    #[arg(long, help = "Only programs and targets that pay bounties")]
    pub bounty_only: bool,

    #[arg(long, help = "Comma separated category filter (e.g. \"wildcard,url\")")]
    pub category: Option<String>,

    #[arg(long, help = "Include out-of-scope targets")]
    pub oos: bool,

    #[arg(long, help = "File with extra program handles (one per line)")]
    pub known_handles: Option<String>,

    #[arg(short = 'o', long = "output", help = "Output fields: t(arget) d(escription) c(ategory) u(rl) b(ounty) [default: tu]")]
    pub output_fields: Option<String>,

    #[arg(short = 'd', long, help = "Output field delimiter [default: \" \"]")]
    pub delimiter: Option<String>,

    #[arg(long, help = "Skip programs without any in-scope target")]
    pub skip_empty: bool,

    #[arg(long, help = "JSON config file; flags override its values")]
    pub config: Option<String>,

    #[arg(long, help = "API token (or SCOPEWATCH_H1_TOKEN / SCOPEWATCH_INTIGRITI_TOKEN)")]
    pub token: Option<String>,

    #[arg(long, help = "API username (or SCOPEWATCH_H1_USERNAME)")]
    pub username: Option<String>,

    #[arg(long, help = "Minimum milliseconds between two requests to one platform")]
    pub rate_limit_ms: Option<u64>,

    #[arg(long, help = "Show what would be polled without sending requests")]
    pub dry_run: bool,

    #[arg(short = 'v', long, help = "Verbose progress and debug logging")]
    pub verbose: bool,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    init_logging(args.verbose);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format!("[!] {:#}", e).red());
            process::exit(1);
        }
    };
    debug!("merged config: {:?}", config);

    if config.platforms.is_empty() {
        eprintln!("{}", "[!] No platforms specified. Name at least one or use --config <file>.".red());
        let mut cmd = Args::command();
        cmd.print_help().ok();
        process::exit(1);
    }

    if args.dry_run {
        for platform in &config.platforms {
            println!("[DRY RUN] Would poll platform: {}", platform);
        }
        return;
    }

    let format = match config.output_format() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("{}", format!("[!] {}", e).red());
            process::exit(1);
        }
    };
    let sink = ConsoleSink::new_ref(format, args.verbose);

    print_banner();
    print_poll_config(&config);

    let store = config.diff.then(|| JsonSnapshotStore::new(&config.store_dir));
    let _lock = match store.as_ref().map(JsonSnapshotStore::lock).transpose() {
        Ok(lock) => lock,
        Err(StoreError::Locked(path)) => {
            eprintln!(
                "{}",
                format!("[!] Another scopewatch process holds {}", path.display()).red()
            );
            process::exit(1);
        }
        Err(e) => {
            eprintln!("{}", format!("[!] {}", e).red());
            process::exit(1);
        }
    };

    let mut ok = true;
    for platform in &config.platforms {
        ok &= run_platform(*platform, &args, &config, store.as_ref(), &sink).await;
    }

    if !ok {
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

/// Merges the optional config file with command line flags.
fn build_config(args: &Args) -> anyhow::Result<PollConfig> {
    let mut config = match &args.config {
        Some(path) => PollConfig::load(path)?,
        None => PollConfig::default(),
    };

    if !args.platforms.is_empty() {
        config.platforms = args.platforms.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(ref store) = args.store {
        config.store_dir = store.clone();
    }
    if let Some(ref category) = args.category {
        config.categories = category.clone();
    }
    if let Some(ref path) = args.known_handles {
        config.known_handles_file = path.clone();
    }
    if let Some(ref fields) = args.output_fields {
        config.output_fields = fields.clone();
    }
    if let Some(ref delimiter) = args.delimiter {
        config.delimiter = delimiter.clone();
    }
    if args.rate_limit_ms.is_some() {
        config.rate_limit_ms = args.rate_limit_ms;
    }

    config.fail_fast |= args.fail_fast;
    config.streaming |= args.stream;
    config.diff |= args.diff;
    config.private_only |= args.private_only;
    config.bounty_only |= args.bounty_only;
    config.include_out_of_scope |= args.oos;
    config.skip_empty |= args.skip_empty;

    // fail early on a bad filter instead of once per platform
    config.poll_options()?;
    Ok(config)
}

fn credentials_for(platform: Platform, args: &Args) -> Credentials {
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    match platform {
        Platform::HackerOne => Credentials {
            username: args.username.clone().or_else(|| env("SCOPEWATCH_H1_USERNAME")),
            token: args.token.clone().or_else(|| env("SCOPEWATCH_H1_TOKEN")),
        },
        Platform::Intigriti => Credentials {
            username: None,
            token: args.token.clone().or_else(|| env("SCOPEWATCH_INTIGRITI_TOKEN")),
        },
        _ => Credentials {
            username: args.username.clone(),
            token: args.token.clone(),
        },
    }
}

/// Runs one platform's cycle and prints its results. Returns false on failure.
async fn run_platform(
    platform: Platform,
    args: &Args,
    config: &PollConfig,
    store: Option<&JsonSnapshotStore>,
    sink: &SinkRef,
) -> bool {
    sink.on_log("phase", &format!("\n[*] Polling {}...", platform));

    let poller = match build_poller(platform, config) {
        Ok(poller) => poller,
        Err(e) => {
            sink.on_log("error", &format!("[!] {}: {:#}", platform, e));
            return false;
        }
    };

    let store = store.map(|s| s as &dyn SnapshotStore);
    let report = match run_poll_cycle(poller, &credentials_for(platform, args), config, store, sink).await {
        Ok(report) => report,
        Err(CycleError::Poll(e)) if e.is_fatal() => {
            sink.on_log("error", &format!("[!] {}: {} (giving up on this platform)", platform, e));
            return false;
        }
        Err(e) => {
            sink.on_log("error", &format!("[!] {}: {}", platform, e));
            return false;
        }
    };

    debug!(
        "{}: {} program(s), {} failure(s), persisted {}",
        platform,
        report.outcome.programs.len(),
        report.outcome.failures.len(),
        report.persisted
    );

    if !config.streaming && !config.diff {
        for program in &report.outcome.programs {
            sink.on_program(program);
        }
    }

    if let Some(DiffOutcome::Changes(ref events)) = report.diff {
        if events.is_empty() {
            sink.on_log("info", &format!("[+] {}: no scope changes", platform));
        }
    }

    report.outcome.is_complete() && report.diff.as_ref().map_or(true, DiffOutcome::should_persist)
}

/// Prints the scopewatch banner to stderr so stdout stays machine readable.
fn print_banner() {
    let banner = r#"
   ___  ___ ___  _ __   _____      ____ _| |_ ___| |__
  / __|/ __/ _ \| '_ \ / _ \ \ /\ / / _` | __/ __| '_ \
  \__ \ (_| (_) | |_) |  __/\ V  V / (_| | || (__| | | |
  |___/\___\___/| .__/ \___| \_/\_/ \__,_|\__\___|_| |_|
                |_|"#;
    eprintln!("{}", banner.bright_cyan().bold());
    eprintln!("{}", "──────────────────────────────────────────────────".dimmed());
}

fn print_poll_config(config: &PollConfig) {
    let names: Vec<&str> = config.platforms.iter().map(Platform::as_str).collect();
    let mode = if config.fail_fast { "fail-fast" } else { "best-effort" };

    eprintln!("{}", format!("[+] Platforms:   {}", names.join(", ")).green().bold());
    eprintln!("{}", format!("[+] Concurrency: {}", config.concurrency).blue());
    eprintln!("{}", format!("[+] Mode:        {}", mode).magenta().bold());
    if let Some(ms) = config.rate_limit_ms {
        eprintln!("{}", format!("[+] Rate Limit:  {} ms between requests", ms).blue());
    }
    if config.diff {
        eprintln!("{}", format!("[+] Store:       {}", config.store_dir).yellow());
    }
    if !config.categories.is_empty() {
        eprintln!("{}", format!("[+] Categories:  {}", config.categories).yellow());
    }
    if config.private_only || config.bounty_only {
        let mut filters = Vec::new();
        if config.private_only {
            filters.push("private");
        }
        if config.bounty_only {
            filters.push("bounty");
        }
        eprintln!("{}", format!("[+] Only:        {}", filters.join(", ")).yellow());
    }
    eprintln!("{}", "──────────────────────────────────────────────────".dimmed());
}
