//! Summarize a profiling trace.
//!
//! This binary ingests a trace file and prints what the engine made of it.
//!
//! Supported input formats:
//! - Chrome trace event arrays (`.json`)
//! - JS self-profiling traces with `resources`, `frames`, `stacks` and `samples`
//!
//! # Usage
//!
//! ```bash
//! trace_summary trace.json
//! trace_summary trace.json --events --limit 50
//! trace_summary self-profile.json --json
//! ```

use clap::Parser;
use env_logger::Env;
use log::debug;
use profile_ingest::chrome::{
    ProcessId, ThreadId, TraceError, TraceEvent, build_profile_group, merge_thread_timelines,
    parse_chrome_trace_events, split_events_by_process_and_thread,
};
use profile_ingest::frame::{Frame, ResourcePolicy, WebTrace};
use profile_ingest::profile::ProfileGroup;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "trace_summary")]
#[command(about = "Summarize a Chrome trace or JS self-profiling trace")]
#[command(version)]
struct Args {
    /// Input trace file
    input: PathBuf,

    /// Print events merged across threads in timestamp order
    #[arg(long)]
    events: bool,

    /// Maximum number of events or frames to print
    #[arg(long, default_value = "20")]
    limit: usize,

    /// Emit the summary as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Resolve out-of-range resource ids to an empty resource instead of failing
    /// (release builds already do this by default)
    #[arg(long)]
    lenient_resources: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct ThreadSummary {
    pid: ProcessId,
    tid: ThreadId,
    events: usize,
    start: f64,
    end: f64,
}

#[derive(Serialize)]
struct ChromeSummary<'a> {
    group: ProfileGroup,
    threads: Vec<ThreadSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    timeline: Vec<&'a TraceEvent>,
}

#[derive(Serialize)]
struct WebSummary<'a> {
    resources: usize,
    frames: Vec<&'a Frame>,
    samples: usize,
    idle_samples: usize,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let input_file = File::open(&args.input).map_err(|e| {
        format!(
            "Failed to open input file '{}': {}",
            args.input.display(),
            e
        )
    })?;
    let mut reader = BufReader::new(input_file);
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;

    let value: serde_json::Value = serde_json::from_str(&contents)?;

    match parse_chrome_trace_events(&value) {
        Ok(events) => {
            eprintln!("Detected: Chrome trace (array format)");
            summarize_chrome(&args, &events)
        }
        Err(TraceError::UnsupportedTraceFormat(reason))
            if value.get("frames").is_some() && value.get("traceEvents").is_none() =>
        {
            debug!("Not a Chrome trace ({}), trying JS self-profiling format", reason);
            eprintln!("Detected: JS self-profiling trace");
            let trace = WebTrace::deserialize(&value)?;
            summarize_web(&args, &trace)
        }
        Err(e) => Err(e.into()),
    }
}

fn summarize_chrome(args: &Args, events: &[TraceEvent]) -> Result<(), Box<dyn std::error::Error>> {
    let by_thread = split_events_by_process_and_thread(events);
    let group = build_profile_group(&by_thread);

    let mut threads = Vec::new();
    for (&pid, thread_events) in &by_thread {
        for (&tid, events) in thread_events {
            let start = events.iter().map(|e| e.ts).fold(f64::INFINITY, f64::min);
            let end = events
                .iter()
                .map(|e| e.ts + e.dur.unwrap_or(0.0))
                .fold(f64::NEG_INFINITY, f64::max);
            threads.push(ThreadSummary {
                pid,
                tid,
                events: events.len(),
                start,
                end,
            });
        }
    }

    let timeline = if args.events {
        let mut merged = merge_thread_timelines(&by_thread)?;
        merged.truncate(args.limit);
        merged
    } else {
        Vec::new()
    };

    let summary = ChromeSummary {
        group,
        threads,
        timeline,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Profile group: {}", summary.group.name);
    println!("  Events: {}", events.len());
    println!("  Processes: {}", by_thread.len());
    println!("  Threads: {}", summary.threads.len());
    for thread in &summary.threads {
        println!(
            "    pid {} tid {}: {} events, {:.3}..{:.3}",
            thread.pid, thread.tid, thread.events, thread.start, thread.end
        );
    }
    if !summary.timeline.is_empty() {
        println!("  Timeline:");
        for event in &summary.timeline {
            println!(
                "    {:>14.3} [{}] {} {}",
                event.ts, event.ph, event.cat, event.name
            );
        }
    }

    Ok(())
}

fn summarize_web(args: &Args, trace: &WebTrace) -> Result<(), Box<dyn std::error::Error>> {
    let policy = if args.lenient_resources {
        ResourcePolicy::Degrade
    } else {
        ResourcePolicy::default()
    };
    let index = trace.frame_index(policy)?;

    // Validate every sampled stack against the stack table up front.
    let mut idle_samples = 0;
    for sample in &trace.samples {
        match sample.stack_id {
            Some(stack_id) => {
                trace.resolve_stack(stack_id)?;
            }
            None => idle_samples += 1,
        }
    }

    let summary = WebSummary {
        resources: trace.resources.len(),
        frames: index.iter().take(args.limit).collect(),
        samples: trace.samples.len(),
        idle_samples,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("JS self-profiling trace");
    println!("  Resources: {}", summary.resources);
    println!("  Frames: {}", index.len());
    println!("  Samples: {} ({} idle)", summary.samples, summary.idle_samples);
    for frame in &summary.frames {
        let location = match (frame.line, frame.column) {
            (Some(line), Some(column)) => format!(":{}:{}", line, column),
            (Some(line), None) => format!(":{}", line),
            _ => String::new(),
        };
        println!(
            "    [{}] {} {}{}",
            frame.key,
            frame.name,
            frame.resource.as_deref().unwrap_or("(unknown)"),
            location
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
