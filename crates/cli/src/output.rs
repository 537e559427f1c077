//! Human-readable rendering of upload events and ingest jobs.

use phx_client::UploadEvent;
use phx_core::{IngestJob, JobStats};

/// Number of entries shown per statistics list.
const TOP_N: usize = 5;

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    const TB: u64 = 1024 * GB;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Print one upload event as a plain line.
pub fn print_event(event: &UploadEvent) {
    match event {
        UploadEvent::Started {
            filename,
            size,
            chunks,
        } => println!(
            "Uploading {filename} ({}, {chunks} chunk{})",
            format_bytes(*size),
            if *chunks == 1 { "" } else { "s" }
        ),
        UploadEvent::SessionCreated { session } => println!("Session: {}", session.id),
        UploadEvent::Progress { completed, total } => {
            let percent = if *total == 0 {
                100
            } else {
                completed * 100 / total
            };
            println!("  [{completed}/{total}] {percent}%");
        }
        UploadEvent::ChunkRetry {
            index,
            attempt,
            error,
        } => eprintln!("  chunk {index} attempt {attempt} failed, retrying: {error}"),
        UploadEvent::Finalized { source_file } => {
            println!("Finalized: {} (sha256 {})", source_file.id, source_file.sha256)
        }
        UploadEvent::Completed { job } => println!("Ingest job queued: {}", job.id),
        UploadEvent::Failed { stage, reason } => eprintln!("Failed at {stage}: {reason}"),
        UploadEvent::State(_) => {}
    }
}

pub fn print_job(job: &IngestJob) {
    println!("Ingest Job");
    println!("  ID: {}", job.id);
    println!("  Source file: {}", job.source_file_id);
    println!("  Status: {}", job.status);
    println!("  Created: {}", job.created_at);
    println!("  Updated: {}", job.updated_at);
    if let Some(error) = &job.error_text {
        println!("  Error: {error}");
    }
    if let Some(stats) = &job.stats {
        print_stats(stats);
    }
}

fn print_stats(stats: &JobStats) {
    println!("  Stats:");
    println!("    Events: {}", stats.total_events());
    println!("    Unknown records: {}", stats.total_unknown());
    print_counts("Event types", &stats.event_type_counts);
    print_counts("Parsers", &stats.parser_counts);
    print_counts("Unknown signatures", &stats.unknown_signatures);
    print_counts("Timestamp quality", &stats.ts_quality_counts);
}

fn print_counts(title: &str, counts: &[(String, u64)]) {
    if counts.is_empty() {
        return;
    }
    println!("    {title}:");
    for (key, count) in counts.iter().take(TOP_N) {
        println!("      {key}: {count}");
    }
    if counts.len() > TOP_N {
        println!("      ... {} more", counts.len() - TOP_N);
    }
}

pub fn print_job_table(jobs: &[IngestJob]) {
    if jobs.is_empty() {
        println!("No ingest jobs found.");
        return;
    }
    println!("{:<38} {:<10} {:<20} Source file", "ID", "Status", "Updated");
    println!("{}", "-".repeat(108));
    for job in jobs {
        println!(
            "{:<38} {:<10} {:<20} {}",
            job.id, job.status, job.updated_at, job.source_file_id
        );
    }
}
