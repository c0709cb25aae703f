use std::env;
use std::io::{self, BufRead};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use getopts::{Matches, Options};
use tracing_subscriber::EnvFilter;

use dnsprobe::dns::client::Transport;
use dnsprobe::dns::context::{ProbeContext, DEFAULT_CONCURRENCY, DEFAULT_SERVER, DEFAULT_TIMEOUT_MS};
use dnsprobe::dns::dispatch::StdoutSink;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!(
        "Usage: {} [options] < candidates.txt\n\nResolves one candidate name per line from stdin.",
        program
    );
    eprint!("{}", opts.usage(&brief));
}

/// Log records go to stderr so stdout carries nothing but results
fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }
}

fn build_options() -> Options {
    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "c",
        "procs",
        &format!("Number of concurrent workers (default {})", DEFAULT_CONCURRENCY),
        "N",
    );
    opts.optopt(
        "t",
        "timeout",
        &format!("Per query timeout in milliseconds (default {})", DEFAULT_TIMEOUT_MS),
        "MS",
    );
    opts.optopt(
        "s",
        "server",
        &format!("Upstream DNS server, port defaults to 53 (default {})", DEFAULT_SERVER),
        "HOST[:PORT]",
    );
    opts.optflag("", "tcp", "Query the upstream over TCP instead of UDP");
    opts.optflag(
        "",
        "skip-cname",
        "Treat any response containing a CNAME as unresolved",
    );
    opts.optflag(
        "",
        "check-wildcard",
        "Treat names only answered by their zone's wildcard as unresolved",
    );
    opts.optflag("u", "unresolved", "Show only unresolved names");
    opts.optflag("v", "verbose", "Log answers and a summary to stderr");
    opts
}

fn parse_number<T: std::str::FromStr>(matches: &Matches, name: &str) -> Result<Option<T>, String> {
    match matches.opt_str(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("invalid value for --{}: {}", name, value)),
        None => Ok(None),
    }
}

fn context_from_matches(matches: &Matches) -> Result<ProbeContext, String> {
    let mut context = ProbeContext::new();

    if let Some(concurrency) = parse_number::<usize>(matches, "procs")? {
        context.concurrency = concurrency;
    }

    if let Some(timeout) = parse_number::<u64>(matches, "timeout")? {
        context.timeout = Duration::from_millis(timeout);
    }

    if let Some(server) = matches.opt_str("server") {
        context.server = server;
    }

    if matches.opt_present("tcp") {
        context.transport = Transport::Tcp;
    }

    context.skip_cname = matches.opt_present("skip-cname");
    context.check_wildcard = matches.opt_present("check-wildcard");
    context.show_unresolved = matches.opt_present("unresolved");
    context.verbose = matches.opt_present("verbose");

    Ok(context)
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args
        .first()
        .cloned()
        .unwrap_or_else(|| "dnsprobe".to_string());

    let opts = build_options();
    let matches = match opts.parse(args.get(1..).unwrap_or(&[])) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&program, &opts);
            process::exit(1);
        }
    };

    if matches.opt_present("h") {
        print_usage(&program, &opts);
        return;
    }

    let context = match context_from_matches(&matches) {
        Ok(context) => context,
        Err(msg) => {
            eprintln!("{}", msg);
            print_usage(&program, &opts);
            process::exit(1);
        }
    };

    init_logging(context.verbose);

    let dispatcher = match context.build_dispatcher() {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            eprintln!("{}", e);
            print_usage(&program, &opts);
            process::exit(1);
        }
    };

    let stdin = io::stdin();
    let input = stdin.lock().lines();

    let summary = match dispatcher.run(input, Arc::new(StdoutSink)) {
        Ok(summary) => summary,
        Err(e) => {
            log::error!("failed to start workers: {}", e);
            process::exit(1);
        }
    };

    if context.verbose {
        match serde_json::to_string(&summary) {
            Ok(json) => log::info!("summary: {}", json),
            Err(e) => log::warn!("failed to serialize summary: {}", e),
        }
    }
}
