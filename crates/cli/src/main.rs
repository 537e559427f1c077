//! Command-line client for the phx ingest API.

mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use output::{print_event, print_job, print_job_table};
use phx_client::{
    FileSource, HttpApi, IngestApi, JobLauncher, JobPoller, PollEvent, UploadOptions,
    UploadOrchestrator,
};
use phx_core::{ClientConfig, IngestJob, IngestJobId, JobStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "phxctl")]
#[command(about = "Upload files to the phx ingest API and track ingest jobs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server API URL (overrides client config)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Client config file path
    #[arg(long, env = "PHX_CONFIG", global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file and launch an ingest job for it
    Upload {
        /// File to upload
        file: PathBuf,
        /// Name to register the file under (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        /// Chunk size in bytes (overrides client config)
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Concurrent chunk uploads (overrides client config)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Skip local SHA-256 verification
        #[arg(long, default_value_t = false)]
        no_verify: bool,
        /// Wait for the ingest job to finish
        #[arg(long, default_value_t = false)]
        wait: bool,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Inspect ingest jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[derive(Subcommand)]
enum JobsCommands {
    /// List ingest jobs, newest first
    List {
        /// Keep refreshing until interrupted
        #[arg(long, default_value_t = false)]
        watch: bool,
    },
    /// Show one ingest job
    Show {
        /// Job ID
        job_id: String,
    },
    /// Poll a job until it completes or fails
    Watch {
        /// Job ID
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Upload {
            file,
            name,
            chunk_size,
            concurrency,
            no_verify,
            wait,
            api,
        } => {
            let mut config = resolve_config(&api)?;
            if let Some(chunk_size) = chunk_size {
                config.chunk_size = chunk_size;
            }
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if no_verify {
                config.verify_checksum = false;
            }
            handle_upload_command(&file, name, wait, &config).await
        }
        Commands::Jobs { command, api } => {
            let config = resolve_config(&api)?;
            handle_jobs_command(command, &config).await
        }
    }
}

fn resolve_config(api: &ApiArgs) -> Result<ClientConfig> {
    let path = client_config_path(api.config.as_deref())?;
    let mut config = load_client_config(&path)?;
    if let Some(server) = &api.server {
        config.server_url = server.clone();
    }
    tracing::debug!(path = %path.display(), server = %config.server_url, "Loaded client config");
    Ok(config)
}

fn connect(config: &ClientConfig) -> Result<Arc<dyn IngestApi>> {
    let api = HttpApi::from_config(config)
        .with_context(|| format!("invalid server URL: {}", config.server_url))?;
    Ok(Arc::new(api))
}

async fn handle_upload_command(
    file: &Path,
    name: Option<String>,
    wait: bool,
    config: &ClientConfig,
) -> Result<()> {
    let options = UploadOptions::from_config(config).context("invalid upload settings")?;
    let source = FileSource::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let name = match name {
        Some(name) => name,
        None => source
            .file_name()
            .map(str::to_string)
            .context("cannot derive an upload name from the path; pass --name")?,
    };

    let api = connect(config)?;
    let orchestrator = UploadOrchestrator::new(Arc::clone(&api), options);
    let report = orchestrator
        .run(&source, &name, &print_event)
        .await
        .with_context(|| format!("upload of {} failed", file.display()))?;

    if report.retries > 0 {
        println!(
            "Uploaded {} chunks ({} retried attempts)",
            report.chunks, report.retries
        );
    }

    if wait {
        let job = wait_for_job(api, config, report.job.id).await?;
        print_job(&job);
        ensure_succeeded(&job)?;
    }

    Ok(())
}

async fn handle_jobs_command(command: JobsCommands, config: &ClientConfig) -> Result<()> {
    let api = connect(config)?;

    match command {
        JobsCommands::List { watch: false } => {
            let jobs = JobLauncher::new(api.as_ref())
                .list()
                .await
                .context("failed to list ingest jobs")?;
            print_job_table(&jobs);
        }
        JobsCommands::List { watch: true } => {
            let poller = JobPoller::new(api, config.poll_interval());
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let handle = poller.start_all(tx);
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = rx.recv() => match event {
                        Some(PollEvent::Listed(jobs)) => {
                            println!();
                            print_job_table(&jobs);
                        }
                        Some(PollEvent::Error(err)) => eprintln!("Refresh failed: {err}"),
                        Some(PollEvent::Updated(_)) => {}
                        None => break,
                    },
                }
            }
            handle.stop().await;
        }
        JobsCommands::Show { job_id } => {
            let job_id = parse_job_id(&job_id)?;
            let job = JobLauncher::new(api.as_ref())
                .poll(job_id)
                .await
                .with_context(|| format!("failed to fetch ingest job {job_id}"))?;
            print_job(&job);
        }
        JobsCommands::Watch { job_id } => {
            let job_id = parse_job_id(&job_id)?;
            let job = wait_for_job(api, config, job_id).await?;
            print_job(&job);
            ensure_succeeded(&job)?;
        }
    }

    Ok(())
}

fn parse_job_id(raw: &str) -> Result<IngestJobId> {
    IngestJobId::parse(raw).with_context(|| format!("invalid job ID: {raw}"))
}

async fn wait_for_job(
    api: Arc<dyn IngestApi>,
    config: &ClientConfig,
    job_id: IngestJobId,
) -> Result<IngestJob> {
    let poller = JobPoller::new(api, config.poll_interval());
    let mut last_status: Option<JobStatus> = None;
    let wait = poller.wait_for_terminal(job_id, |job| {
        if last_status.as_ref() != Some(&job.status) {
            println!("Job {}: {}", job.id, job.status);
            last_status = Some(job.status.clone());
        }
    });

    tokio::select! {
        result = wait => result.with_context(|| format!("failed to poll ingest job {job_id}")),
        _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted while waiting for job {job_id}"),
    }
}

fn ensure_succeeded(job: &IngestJob) -> Result<()> {
    match &job.status {
        JobStatus::Completed => Ok(()),
        JobStatus::Failed => anyhow::bail!(
            "ingest job {} failed: {}",
            job.id,
            job.error_text.as_deref().unwrap_or("no error reported")
        ),
        other => anyhow::bail!("ingest job {} ended in unexpected status {other}", job.id),
    }
}

fn client_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = std::env::var_os("PHX_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set PHX_CONFIG"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("phx").join("client.toml"))
}

fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("PHX_").split("__"));

    let config: ClientConfig = figment
        .extract()
        .context("failed to load client configuration")?;
    config.validate().context("invalid client configuration")?;
    Ok(config)
}
