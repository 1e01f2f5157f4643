use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser};
use clap_complete::{Shell, generate};
use flexi_logger::Logger;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tsdig::{
    DataRequest, EngineOptions, MemoryArchive, NANOS_PER_SEC, QueryEngine, StaticTableView,
    SupportedType, TimeInterval, Value,
};

#[derive(Parser)]
#[command(name = "tsdig")]
#[command(author, version, about, long_about = None)]
struct TsDigOptions {
    #[command(flatten)]
    query: QueryOptions,
    #[command(flatten)]
    engine: EngineArgs,
    #[command(flatten)]
    service: ServiceOptions,
}

#[derive(Args)]
struct QueryOptions {
    /// Sources to recover (repeatable)
    #[arg(short('s'), long("source"), value_name = "NAME", default_values_t = [String::from("ramp"), String::from("counter")])]
    sources: Vec<String>,
    /// Window length, ending now
    #[arg(short('l'), long, value_parser = humantime::parse_duration, default_value = "60s")]
    last: Duration,
    /// Grid period of the synthetic archive
    #[arg(short('p'), long, value_parser = humantime::parse_duration, default_value = "1s")]
    period: Duration,
    /// Request identifier passed through to the aggregate
    #[arg(long, default_value = "tsdig-demo")]
    request_id: String,
    /// Abort the request after this long
    #[arg(long, value_parser = humantime::parse_duration)]
    deadline: Option<Duration>,
}

#[derive(Args)]
struct EngineArgs {
    #[arg(long, default_value_t = 4)]
    max_streams: usize,
    /// Disable request decomposition
    #[arg(long, default_value_t = false)]
    no_multi_stream: bool,
    /// Domain size (sources x seconds) below which requests are not split
    #[arg(long, default_value_t = 0)]
    trigger_domain: i64,
    /// Sources per sub-request in the preferred split
    #[arg(long, default_value_t = 25)]
    max_sources: usize,
    /// Time span per sub-request in the preferred split
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    max_duration: Duration,
    /// Correlate only after all streams completed
    #[arg(long, default_value_t = false)]
    post_stream: bool,
    /// Fail the request on time-domain collisions
    #[arg(long, default_value_t = false)]
    no_collisions: bool,
    /// Verify blocks and the final aggregate
    #[arg(long, default_value_t = false)]
    check: bool,
}

#[derive(Args)]
struct ServiceOptions {
    #[arg(long, value_enum)]
    completion: Option<Shell>,
}

fn engine_options(args: &EngineArgs) -> EngineOptions {
    return EngineOptions {
        multi_stream: !args.no_multi_stream,
        max_streams: args.max_streams.max(1),
        trigger_domain: args.trigger_domain.max(0),
        max_sources: args.max_sources.max(1),
        max_duration: args.max_duration,
        correlate_mid_stream: !args.post_stream,
        allow_domain_collisions: !args.no_collisions,
        error_checking: args.check,
        ..EngineOptions::default()
    };
}

/// Synthetic archive: even-indexed sources report a float64 sine, odd ones
/// an int64 second counter.
fn demo_archive(sources: &[String], period: Duration) -> MemoryArchive {
    let mut archive = MemoryArchive::new(period);
    for (index, name) in sources.iter().enumerate() {
        if index % 2 == 0 {
            archive = archive.with_source(name.clone(), SupportedType::Float64, |ts| {
                Value::Float64((ts as f64 / NANOS_PER_SEC as f64).sin())
            });
        } else {
            archive = archive.with_source(name.clone(), SupportedType::Int64, |ts| {
                Value::Int64(ts / NANOS_PER_SEC)
            });
        }
    }
    return archive;
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = TsDigOptions::parse();

    // Generate autocompletion
    if let Some(shell) = options.service.completion {
        let mut cmd = TsDigOptions::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut io::stdout());
        return Ok(());
    }

    // Override with RUST_LOG
    let _logger = Logger::try_with_env_or_str("info")?.start()?;

    let end = chrono::Utc::now()
        .timestamp_nanos_opt()
        .context("current time does not fit into nanoseconds")?;
    let begin = end - options.query.last.as_nanos() as i64;
    let range = TimeInterval::new(begin, end).context("empty query window")?;

    let archive = Arc::new(demo_archive(&options.query.sources, options.query.period));
    let engine = QueryEngine::with_options(archive, engine_options(&options.engine));
    let request = DataRequest::new(
        options.query.request_id.clone(),
        options.query.sources.clone(),
        range,
    );

    log::info!(
        "Recovering {} source(s) over {}",
        request.sources.len(),
        request.range
    );
    let aggregate = engine
        .process_request_with_deadline(&request, options.query.deadline)
        .await?;

    print!("{}", StaticTableView::new(&aggregate));
    log::info!(
        "{} block(s), {} sample(s), {} message(s) processed over {} sub-request(s)",
        aggregate.blocks().len(),
        aggregate.sample_count(),
        engine.processed_message_count(),
        engine.decomposed_requests().len()
    );
    return Ok(());
}
