use std::ffi::OsString;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

use wirecheck::suite::{Outcome, Report, RunObserver, Runner, TestResult};
use wirecheck::Config;

#[derive(Default, Debug)]
struct Args {
    config: Config,
    filter: Option<String>,
}

pub trait IntoStringResult {
    fn into_string_result(self) -> eyre::Result<String>;
}

impl IntoStringResult for OsString {
    fn into_string_result(self) -> eyre::Result<String> {
        self.into_string()
            .map_err(|_| eyre::eyre!("OsString contained invalid UTF-8"))
    }
}

fn parse_args() -> eyre::Result<Args> {
    let mut args = Args {
        config: Config {
            timeout: Duration::from_millis(2000),
            ..Default::default()
        },
        filter: None,
    };
    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next().unwrap() {
        match arg {
            lexopt::Arg::Long("host") | lexopt::Arg::Short('h') => {
                args.config.host = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("port") | lexopt::Arg::Short('p') => {
                args.config.port = parser
                    .value()?
                    .into_string_result()?
                    .parse()
                    .map_err(|e| eyre::eyre!("Failed to parse port: {}", e))?;
            }
            lexopt::Arg::Long("path") => {
                args.config.path = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("method") | lexopt::Arg::Short('m') => {
                args.config.method = parser.value()?.into_string_result()?;
            }
            lexopt::Arg::Long("scheme") => {
                args.config.scheme = Some(parser.value()?.into_string_result()?);
            }
            lexopt::Arg::Long("tls") => {
                args.config.tls = true;
            }
            lexopt::Arg::Long("insecure") | lexopt::Arg::Short('k') => {
                args.config.insecure = true;
            }
            lexopt::Arg::Long("timeout") | lexopt::Arg::Short('o') => {
                let millis: u64 = parser
                    .value()?
                    .into_string_result()?
                    .parse()
                    .map_err(|e| eyre::eyre!("Failed to parse timeout: {}", e))?;
                args.config.timeout = Duration::from_millis(millis);
            }
            lexopt::Arg::Long("max-header-list-size") => {
                args.config.max_header_list_size = Some(
                    parser
                        .value()?
                        .into_string_result()?
                        .parse()
                        .map_err(|e| eyre::eyre!("Failed to parse size: {}", e))?,
                );
            }
            lexopt::Arg::Long("strict") | lexopt::Arg::Short('S') => {
                args.config.strict = true;
            }
            lexopt::Arg::Long("dry-run") => {
                args.config.dry_run = true;
            }
            lexopt::Arg::Long("filter") | lexopt::Arg::Short('f') => {
                args.filter = Some(parser.value()?.into_string_result()?);
            }
            lexopt::Arg::Long("help") => {
                print_usage();
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected().into()),
        }
    }
    Ok(args)
}

fn print_usage() {
    eprintln!(
        "Usage: wirecheck [OPTIONS]

Options:
    -h, --host <HOST>               Target host (default: localhost)
    -p, --port <PORT>               Target port (default: 80)
        --path <PATH>               Path requests go to (default: /)
    -m, --method <METHOD>           Request method (default: GET)
        --scheme <SCHEME>           :scheme pseudo-header override
        --tls                       Connect over TLS (ALPN must select h2)
    -k, --insecure                  Skip TLS certificate verification
    -o, --timeout <MS>              Per-event timeout in milliseconds (default: 2000)
        --max-header-list-size <N>  SETTINGS_MAX_HEADER_LIST_SIZE to advertise
    -S, --strict                    Require the exact error code, not just a close
        --dry-run                   List test cases without running them
    -f, --filter <FILTER>           Only run cases whose path or description matches

Examples:
    wirecheck -p 8080
    wirecheck --tls -k -p 8443 -f http2/6.7
"
    );
}

/// Prints the test tree as the run progresses, h2spec-style.
struct ConsoleObserver {
    dry_run: bool,
}

impl RunObserver for ConsoleObserver {
    fn group_started(&mut self, depth: usize, section: &str, title: &str) {
        let indent = "  ".repeat(depth);
        if depth == 0 {
            println!("{title}");
        } else {
            println!("{indent}{section}. {title}");
        }
    }

    fn case_finished(&mut self, depth: usize, result: &TestResult) {
        let indent = "  ".repeat(depth + 1);
        if self.dry_run {
            println!("{indent}· {}", result.desc);
            return;
        }
        let marker = match result.outcome {
            Outcome::Pass => "\u{2714}",
            Outcome::Fail => "\u{2716}",
            Outcome::Skip => "\u{2212}",
            Outcome::Error => "\u{26a0}",
        };
        println!("{indent}{marker} {}", result.desc);
    }
}

fn print_failures(report: &Report) {
    if report.ok() {
        return;
    }
    println!("\nFailures:\n");
    for failure in report.failures() {
        println!("\u{2716} {}: {}", failure.path, failure.desc);
        println!("    -> {}", failure.requirement);
        let mut first = true;
        for line in &failure.expected {
            if first {
                println!("    Expected: {line}");
                first = false;
            } else {
                println!("              {line}");
            }
        }
        if let Some(actual) = &failure.actual {
            println!("      Actual: {actual}");
        }
        println!("          at {}", failure.origin);
    }
}

fn print_summary(report: &Report, elapsed: Duration) {
    println!("\nFinished in {:.4} seconds", elapsed.as_secs_f64());
    println!(
        "{} tests, {} passed, {} skipped, {} failed, {} errored",
        report.total(),
        report.passed,
        report.skipped,
        report.failed,
        report.errored
    );
}

async fn async_main(args: Args) -> eyre::Result<Report> {
    let config = Arc::new(args.config);
    if !config.dry_run {
        eprintln!(
            "Running conformance tests against {}:{} (timeout {:?})",
            config.host, config.port, config.timeout
        );
    }

    let catalog = wirecheck::catalog();
    let runner = Runner::new(config.clone()).with_filter(args.filter);
    let mut observer = ConsoleObserver {
        dry_run: config.dry_run,
    };
    Ok(runner.run(&catalog, &mut observer).await)
}

fn main() -> eyre::Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Failed to parse arguments: {}", e);
            print_usage();
            std::process::exit(2);
        }
    };
    setup_tracing_and_error_reporting();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    let start = Instant::now();
    let dry_run = args.config.dry_run;
    let report = runtime.block_on(local.run_until(async_main(args)))?;

    if report.total() == 0 {
        println!("No matched tests found.");
        return Ok(());
    }

    if !dry_run {
        print_failures(&report);
        print_summary(&report, start.elapsed());
    }

    if !report.ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn setup_tracing_and_error_reporting() {
    color_eyre::install().unwrap();

    let targets = if let Ok(rust_log) = std::env::var("RUST_LOG") {
        rust_log.parse::<Targets>().unwrap()
    } else {
        Targets::new()
            .with_default(Level::WARN)
            .with_target("wirecheck", Level::INFO)
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_file(false)
        .with_line_number(false)
        .without_time()
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(targets)
        .with(fmt_layer)
        .init();
}
