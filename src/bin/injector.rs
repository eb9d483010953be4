//! injector CLI: submit and approve requests from the command line.

use clap::{Parser, Subcommand};
use request_injector::config::Config;
use request_injector::inject::Services;
use request_injector::locker::Locker;
use request_injector::notify::{Communicator, LogMailer, Mailer, SendmailMailer};
use request_injector::remote::SshExecutor;
use request_injector::scripts::CommandBuilder;
use request_injector::service::InjectionService;
use request_injector::store::{PgStore, Repo};
use request_injector::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "injector", about = "Request injection and approval")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inject a request or its chains
    Inject {
        #[command(subcommand)]
        target: InjectTarget,
    },
    /// Approve the workflows of a batch
    Approve {
        /// Batch id
        batch_id: String,
        /// Workflow names
        #[arg(required = true)]
        workflows: Vec<String>,
    },
    /// Send accumulated notifications
    Flush {
        /// Only send entries with more than this many messages
        #[arg(long, default_value_t = 0)]
        min: usize,
    },
}

#[derive(Subcommand)]
enum InjectTarget {
    /// Inject one request
    Request {
        /// Request prepids
        #[arg(required = true)]
        prepids: Vec<String>,
    },
    /// Inject the flagged chains of a request, or one chain by id
    Chain {
        /// Request or chained request prepids
        #[arg(required = true)]
        prepids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "injector".to_string(),
        default_level: config.log_level.clone(),
    })?;

    let service = build_service(&config).await?;
    let flush_min = match &cli.command {
        Command::Flush { min } => *min,
        _ => 0,
    };

    match cli.command {
        Command::Inject { target } => cmd_inject(&service, target).await?,
        Command::Approve {
            batch_id,
            workflows,
        } => cmd_approve(&service, batch_id, workflows).await?,
        Command::Flush { .. } => {}
    }

    let report = service.flush_notifications(flush_min).await;
    println!(
        "Notifications: {} sent, {} failed, {} kept",
        report.sent, report.failed, report.kept
    );

    service.shutdown().await;
    Ok(())
}

async fn build_service(config: &Config) -> anyhow::Result<InjectionService> {
    let store = PgStore::connect(config.database_url.expose_secret()).await?;
    store.migrate().await?;

    let mailer: Arc<dyn Mailer> = match &config.sendmail_path {
        Some(path) => Arc::new(SendmailMailer::new(path)),
        None => Arc::new(LogMailer),
    };
    let locker = Arc::new(Locker::new());
    let communicator = Arc::new(Communicator::new(
        mailer,
        Arc::clone(&locker),
        config.notify.clone(),
    ));

    let services = Services::new(
        Repo::new(Arc::new(store)),
        Arc::new(SshExecutor::new(&config.executor_host)),
        communicator,
        locker,
        CommandBuilder::new(config.commands.clone()),
    );
    Ok(InjectionService::new(
        services,
        config.submission_workers,
        config.queue_policy,
    ))
}

async fn cmd_inject(service: &InjectionService, target: InjectTarget) -> anyhow::Result<()> {
    let mut handles = Vec::new();
    match target {
        InjectTarget::Request { prepids } => {
            for prepid in &prepids {
                handles.push(service.enqueue_request(prepid).await?);
            }
        }
        InjectTarget::Chain { prepids } => {
            for prepid in &prepids {
                handles.push(service.enqueue_chain(prepid).await?);
            }
        }
    }

    service.wait_completion().await;

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.outcome().await?.report());
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

async fn cmd_approve(
    service: &InjectionService,
    batch_id: String,
    workflows: Vec<String>,
) -> anyhow::Result<()> {
    let handle = service.approve_batch(&batch_id, workflows).await?;
    service.wait_completion().await;
    let outcome = handle.outcome().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
