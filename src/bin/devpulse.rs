use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use devpulse::collect::schedule;
use devpulse::config::{split_list, username_filter};
use devpulse::window::parse_timestamp;

#[derive(Parser)]
#[command(name = "devpulse", about = "Developer productivity metrics from GitHub")]
struct Cli {
    /// Database path (default: METRICS_DATABASE_PATH or ~/.devpulse/productivity_metrics.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl devpulse::CollectProgress for StderrProgress {
    fn on_user_start(&self, username: &str, index: usize, total: usize) {
        eprintln!("[{}/{}] Collecting {}...", index + 1, total, username);
    }

    fn on_user_complete(&self, metrics: &devpulse::Metrics) {
        eprintln!(
            "  Done: {} commits, {} merged PRs",
            metrics.counters.commits, metrics.counters.merged_prs
        );
    }

    fn on_user_failed(&self, _username: &str, error: &devpulse::Error) {
        eprintln!("  Skipped: {error}");
    }

    fn on_batch_stored(&self, count: usize) {
        eprintln!("Stored {count} snapshot(s)");
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Bind address (default: METRICS_LISTEN_ADDR or 127.0.0.1:5000)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Collect weekly snapshots on the configured schedule
    Schedule {
        /// Repository (default: TARGET_REPOSITORY)
        #[arg(long)]
        repository: Option<String>,
        /// Comma-separated usernames (default: USERNAMES)
        #[arg(long)]
        usernames: Option<String>,
        /// Weekly trigger in UTC, e.g. "mon 07:00" (default: COLLECT_SCHEDULE)
        #[arg(long)]
        at: Option<String>,
    },
    /// Collect one round of snapshots now
    Collect {
        /// Repository (default: TARGET_REPOSITORY)
        #[arg(long)]
        repository: Option<String>,
        /// Comma-separated usernames (default: USERNAMES)
        #[arg(long)]
        usernames: Option<String>,
        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show metrics for one developer
    Metrics {
        /// GitHub username
        username: String,
        /// Repository, `name` or `owner/name` (default: TARGET_REPOSITORY)
        #[arg(long)]
        repository: Option<String>,
        /// Access token (default: PERSONAL_GITHUB_TOKEN)
        #[arg(long)]
        token: Option<String>,
        /// Window start; computes on demand instead of using the cache
        #[arg(long)]
        since: Option<String>,
        /// Window end; computes on demand instead of using the cache
        #[arg(long)]
        until: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored weekly snapshots
    History {
        /// Repository (default: TARGET_REPOSITORY)
        #[arg(long)]
        repository: Option<String>,
        /// Comma-separated usernames to include (default: all)
        #[arg(long)]
        usernames: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the PDF productivity report
    Report {
        /// Repository (default: TARGET_REPOSITORY)
        #[arg(long)]
        repository: Option<String>,
        /// Comma-separated usernames to include (default: all)
        #[arg(long)]
        usernames: Option<String>,
        /// Output file
        #[arg(short, long, default_value = "report.pdf")]
        output: PathBuf,
    },
    /// Show database status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = devpulse::Config::from_env()?;
    let db_path = match cli.db.clone() {
        Some(path) => path,
        None => config.database_path()?,
    };
    let db = devpulse::Database::open_at(&db_path).await?;
    let sources = devpulse::GitHubFactory::new(config.api_url.clone())
        .with_fallback_token(config.token.clone());
    let dw = devpulse::DevPulse::new(db, Arc::new(sources));

    match cli.command {
        Commands::Serve { listen } => {
            let addr = match listen {
                Some(addr) => addr.parse::<std::net::SocketAddr>()?,
                None => config.listen_addr,
            };
            devpulse::api::serve(Arc::new(dw), addr).await?;
        }
        Commands::Schedule {
            repository,
            usernames,
            at,
        } => {
            let repository = repository_or_config(repository, &config)?;
            let usernames = usernames_or_config(usernames, &config)?;
            let at = match at {
                Some(s) => s.parse::<devpulse::WeeklySchedule>()?,
                None => config.schedule,
            };
            let token = config.token.clone();
            schedule::run_forever(at, |_| {
                dw.collect(&usernames, &repository, token.as_deref(), &devpulse::LogProgress)
            })
            .await;
        }
        Commands::Collect {
            repository,
            usernames,
            json,
        } => {
            let repository = repository_or_config(repository, &config)?;
            let usernames = usernames_or_config(usernames, &config)?;
            let report = dw
                .collect(&usernames, &repository, config.token.as_deref(), &StderrProgress)
                .await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Run {}: {}/{} users, {} snapshot(s) stored",
                    report.status.as_str(),
                    report.users_succeeded,
                    report.users_total,
                    report.records_stored
                );
                if let Some(error) = &report.error {
                    println!("  {error}");
                }
            }
        }
        Commands::Metrics {
            username,
            repository,
            token,
            since,
            until,
            json,
        } => {
            let repository = repository_or_config(repository, &config)?;
            let token = token.as_deref();
            let metrics = if since.is_some() || until.is_some() {
                let start = since.as_deref().map(parse_timestamp).transpose()?;
                let end = until.as_deref().map(parse_timestamp).transpose()?;
                dw.generate(&username, &repository, token, start, end).await?
            } else {
                dw.metrics(&username, &repository, token).await?
            };
            if json {
                let body = devpulse::DeveloperMetrics {
                    developer: username,
                    metrics,
                };
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print_metrics(&metrics);
            }
        }
        Commands::History {
            repository,
            usernames,
            json,
        } => {
            let repository = repository_or_config(repository, &config)?;
            let usernames = username_filter(usernames.as_deref());
            let rows = dw.history(&repository, usernames.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No snapshots for {repository}");
            } else {
                println!(
                    "{:<20} {:<12} {:>8} {:>8} {:>8} {:>10} {:>10}",
                    "USER", "DATE", "COMMITS", "CLOSED", "MERGED", "CYCLE(d)", "REVIEW(m)"
                );
                for m in &rows {
                    println!(
                        "{:<20} {:<12} {:>8} {:>8} {:>8} {:>10.1} {:>10.1}",
                        m.username,
                        m.last_modified.format("%Y-%m-%d"),
                        m.counters.commits,
                        m.counters.closed_issues,
                        m.counters.merged_prs,
                        m.durations.issue_cycle_time_days,
                        m.durations.code_review_time_minutes
                    );
                }
            }
        }
        Commands::Report {
            repository,
            usernames,
            output,
        } => {
            let repository = repository_or_config(repository, &config)?;
            let usernames = username_filter(usernames.as_deref());
            let pdf = dw.report(&repository, usernames.as_deref()).await?;
            std::fs::write(&output, &pdf)?;
            println!("Wrote {} ({} bytes)", output.display(), pdf.len());
        }
        Commands::Status => {
            print_status(&dw, &db_path).await?;
        }
    }

    Ok(())
}

fn repository_or_config(arg: Option<String>, config: &devpulse::Config) -> anyhow::Result<String> {
    match arg {
        Some(repository) => Ok(repository),
        None => Ok(config.require_repository()?.to_string()),
    }
}

fn usernames_or_config(arg: Option<String>, config: &devpulse::Config) -> anyhow::Result<Vec<String>> {
    let usernames = match arg {
        Some(raw) => split_list(&raw),
        None => config.usernames.clone(),
    };
    if usernames.is_empty() {
        anyhow::bail!("No usernames given. Pass --usernames or set USERNAMES.");
    }
    Ok(usernames)
}

fn print_metrics(m: &devpulse::Metrics) {
    println!("Metrics: {} on {}", m.username, m.repository);
    println!(
        "  Window:       {} .. {}",
        m.window.start.format("%Y-%m-%d %H:%M"),
        m.window.end.format("%Y-%m-%d %H:%M")
    );
    println!("  Commits:      {}", m.counters.commits);
    println!("  Lines:        {}", m.counters.lines_of_code);
    println!(
        "  Issues:       {} closed, {} open",
        m.counters.closed_issues, m.counters.open_issues
    );
    println!(
        "  Pull reqs:    {} merged, {} open",
        m.counters.merged_prs, m.counters.open_prs
    );
    println!("  Cycle time:   {:.1} days", m.durations.issue_cycle_time_days);
    println!("  Review time:  {:.1} minutes", m.durations.code_review_time_minutes);
    println!("  Computed at:  {}", m.last_modified.to_rfc3339());
}

async fn print_status(dw: &devpulse::DevPulse, db_path: &std::path::Path) -> anyhow::Result<()> {
    let status = dw.status().await?;
    println!("Metrics Store Status ({})", db_path.display());
    for (table, count) in &status.tables {
        println!("  {table:<20} {count}");
    }
    match &status.last_run {
        Some(run) => println!(
            "  Last run:  #{} {} for {} at {} ({}/{} users, {} stored)",
            run.id,
            run.status,
            run.repository,
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.users_succeeded,
            run.users_total,
            run.records_stored
        ),
        None => println!("  Last run:  never"),
    }
    Ok(())
}
