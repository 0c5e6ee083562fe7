use std::path::PathBuf;

use anyhow::Result;
use branchwatch::analysis::health::HealthSnapshot;
use branchwatch::analysis::{HealthScope, PerformanceQuery, PerformanceReport, ReportPeriod};
use branchwatch::config::{BranchwatchConfig, LoggingConfig};
use branchwatch::monitor::{EntityKind, NewAtm, NewBranch};
use branchwatch::Engine;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "branchwatch",
    about = "Network health monitoring and incident detection for bank branches and ATMs",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $BRANCHWATCH_CONFIG, then /etc/branchwatch/branchwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + monitoring scheduler)
    Serve {
        /// Bind address, overrides `api.bind`
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one monitoring cycle now and print its summary
    Cycle {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show the current fleet health snapshot
    Health {
        /// Limit to the ATMs of one branch
        #[arg(long)]
        branch: Option<i64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show uptime and latency over a period
    Performance {
        /// Report period: 1h, 6h, 24h, 7d or 30d
        #[arg(long, default_value = "24h")]
        period: ReportPeriod,

        /// Restrict to one entity type (branch or atm)
        #[arg(long)]
        entity_type: Option<EntityKind>,

        /// Restrict to one entity id (requires --entity-type)
        #[arg(long, requires = "entity_type")]
        entity_id: Option<i64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List network incidents
    Incidents {
        /// Include resolved incidents
        #[arg(long)]
        all: bool,

        /// Maximum number of incidents to show
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Manage monitored branches and ATMs
    Site {
        #[command(subcommand)]
        action: SiteAction,
    },

    /// Ticketing setup
    Ticketing {
        #[command(subcommand)]
        action: TicketingAction,
    },
}

#[derive(Subcommand)]
enum SiteAction {
    /// Register a branch
    AddBranch {
        #[arg(long)]
        name: String,

        /// Unique branch code
        #[arg(long)]
        code: String,

        /// Primary link address
        #[arg(long)]
        primary: Option<String>,

        /// Backup link address
        #[arg(long)]
        backup: Option<String>,
    },

    /// Register an ATM
    AddAtm {
        #[arg(long)]
        name: String,

        /// Unique ATM code
        #[arg(long)]
        code: String,

        /// Parent branch id
        #[arg(long)]
        branch_id: Option<i64>,

        /// ATM address
        #[arg(long)]
        address: Option<String>,
    },

    /// List all registered sites
    List,

    /// Enable or disable monitoring for a site
    SetMonitoring {
        /// branch or atm
        #[arg(long)]
        entity_type: EntityKind,

        #[arg(long)]
        id: i64,

        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Subcommand)]
enum TicketingAction {
    /// Create the network service definition and system user if missing
    Bootstrap,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = BranchwatchConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, "Starting branchwatch daemon");
            branchwatch::serve(config).await?;
        }
        Commands::Cycle { json } => {
            let engine = Engine::build(&config)?;
            let report = engine.scheduler.run_cycle().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\n=== Monitoring Cycle ===");
                println!("Sites:       {} branches, {} ATMs", report.branches, report.atms);
                println!("Targets:     {}", report.targets);
                println!("Written:     {}", report.pings_written);
                println!("Failed:      {} probes, {} writes", report.probes_failed, report.write_failures);
                println!("Incidents:   {} opened, {} resolved", report.incidents_opened, report.incidents_resolved);
                println!("Tickets:     {}", report.tickets_created);
                println!("Duration:    {} ms", report.duration_ms);
                for err in &report.selection_errors {
                    println!("Selection error: {}", err);
                }
                println!();
            }
        }
        Commands::Health { branch, json } => {
            let engine = Engine::build(&config)?;
            let scope = branch.map_or(HealthScope::Global, HealthScope::Branch);
            let snapshot = engine.aggregator.snapshot(scope).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_health(&snapshot);
            }
        }
        Commands::Performance {
            period,
            entity_type,
            entity_id,
            json,
        } => {
            let engine = Engine::build(&config)?;
            let report = engine
                .aggregator
                .performance_report(PerformanceQuery {
                    period,
                    kind: entity_type,
                    entity_id,
                })
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_performance(&report);
            }
        }
        Commands::Incidents { all, limit } => {
            let engine = Engine::build(&config)?;
            let incidents = engine.incidents.list_recent(limit, !all)?;
            if incidents.is_empty() {
                println!("No incidents found.");
            } else {
                println!(
                    "{:<6} | {:<10} | {:<8} | {:<22} | {:<8} | {:<11} | Ticket",
                    "Id", "Entity", "Role", "Type", "Severity", "Status"
                );
                println!("{:-<6}-|-{:-<10}-|-{:-<8}-|-{:-<22}-|-{:-<8}-|-{:-<11}-|-{:-<6}", "", "", "", "", "", "", "");
                for i in incidents {
                    println!(
                        "{:<6} | {:<10} | {:<8} | {:<22} | {:<8} | {:<11} | {}",
                        i.id,
                        i.entity.to_string(),
                        i.address_role.as_str(),
                        i.incident_type.as_str(),
                        i.severity.as_str(),
                        i.status.as_str(),
                        i.ticket_id.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
                    );
                }
            }
        }
        Commands::Site { action } => {
            let engine = Engine::build(&config)?;
            match action {
                SiteAction::AddBranch {
                    name,
                    code,
                    primary,
                    backup,
                } => {
                    let id = engine.sites.add_branch(&NewBranch {
                        name,
                        code: code.clone(),
                        primary_address: primary,
                        backup_address: backup,
                    })?;
                    println!("Branch '{}' registered with id {}.", code, id);
                }
                SiteAction::AddAtm {
                    name,
                    code,
                    branch_id,
                    address,
                } => {
                    let id = engine.sites.add_atm(&NewAtm {
                        name,
                        code: code.clone(),
                        branch_id,
                        address,
                    })?;
                    println!("ATM '{}' registered with id {}.", code, id);
                }
                SiteAction::List => {
                    let sites = engine.sites.list_all()?;
                    if sites.is_empty() {
                        println!("No sites registered.");
                    } else {
                        println!(
                            "{:<6} | {:<4} | {:<10} | {:<24} | {:<16} | {:<16} | Monitored",
                            "Kind", "Id", "Code", "Name", "Primary", "Backup"
                        );
                        println!("{:-<6}-|-{:-<4}-|-{:-<10}-|-{:-<24}-|-{:-<16}-|-{:-<16}-|-{:-<9}", "", "", "", "", "", "", "");
                        for s in sites {
                            println!(
                                "{:<6} | {:<4} | {:<10} | {:<24} | {:<16} | {:<16} | {}",
                                s.kind.as_str(),
                                s.id,
                                s.code,
                                s.name,
                                s.primary_address.as_deref().unwrap_or("-"),
                                s.backup_address.as_deref().unwrap_or("-"),
                                s.is_active && s.monitoring_enabled
                            );
                        }
                    }
                }
                SiteAction::SetMonitoring {
                    entity_type,
                    id,
                    enabled,
                } => {
                    engine.sites.set_monitoring(entity_type, id, enabled)?;
                    println!("Monitoring for {} {} set to {}.", entity_type, id, enabled);
                }
            }
        }
        Commands::Ticketing { action } => match action {
            TicketingAction::Bootstrap => {
                let engine = Engine::build(&config)?;
                engine.ticketing.bootstrap()?;
                println!(
                    "Ticketing ready: service '{}', requester '{}'.",
                    config.escalation.service_code, config.escalation.system_user
                );
            }
        },
    }

    Ok(())
}

fn print_health(s: &HealthSnapshot) {
    let d = &s.distribution;
    println!("\n=== Network Health ===");
    println!("Overall:     {:?} (score {})", s.overall_status, s.health_score);
    println!("Sites:       {} ({:.1}% online)", s.total_entities, s.online_pct);
    println!(
        "Status:      {} online, {} slow, {} offline, {} error, {} stale, {} unknown",
        d.online, d.slow, d.offline, d.error, d.stale, d.unknown
    );
    match s.performance.avg_response_time_ms {
        Some(avg) => println!(
            "Latency:     avg {:.1} ms, max {:.1} ms over {}h",
            avg,
            s.performance.max_response_time_ms.unwrap_or(avg),
            s.performance.lookback_hours
        ),
        None => println!("Latency:     no samples in the last {}h", s.performance.lookback_hours),
    }
    println!(
        "Incidents:   {} active ({} critical, {} high, {} medium), {} resolved recently",
        s.incidents.active,
        s.incidents.critical,
        s.incidents.high,
        s.incidents.medium,
        s.incidents.resolved_in_window
    );
    if !s.problems.is_empty() {
        println!("\nProblems:");
        for p in &s.problems {
            println!(" - {:?} {} ({}) {}", p.status, p.name, p.code, p.entity);
        }
    }
    println!();
}

fn print_performance(r: &PerformanceReport) {
    println!("\n=== Performance ({}) ===", r.period);
    println!("Window:      {} -> {}", r.from.to_rfc3339(), r.to.to_rfc3339());
    println!(
        "Sites:       {} ({} healthy, {} degraded, {} unhealthy)",
        r.summary.entities, r.summary.healthy, r.summary.degraded, r.summary.unhealthy
    );
    if let Some(uptime) = r.summary.uptime_pct {
        println!("Uptime:      {:.2}% over {} checks", uptime, r.summary.total_checks);
    }
    if !r.entities.is_empty() {
        println!();
        println!("{:<32} | {:>8} | {:>9} | {:>8} | Class", "Site", "Checks", "Uptime %", "Avg ms");
        println!("{:-<32}-|-{:->8}-|-{:->9}-|-{:->8}-|-{:-<9}", "", "", "", "", "");
        for e in &r.entities {
            println!(
                "{:<32} | {:>8} | {:>9.2} | {:>8} | {:?}",
                e.label.clone().unwrap_or_else(|| e.entity.to_string()),
                e.total_checks,
                e.uptime_pct,
                e.avg_response_time_ms
                    .map(|v| format!("{:.1}", v))
                    .unwrap_or_else(|| "-".to_string()),
                e.classification
            );
        }
    }
    println!();
}
