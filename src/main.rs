// src/main.rs
//
// s3surge - distributed load generator and analyzer for S3-compatible
// object storage.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use s3surge::aggregate::{aggregate, format_bps, Aggregated, AnalysisOpts, OpAggregate};
use s3surge::bench::{self, Common, LogLn, RunPlan};
use s3surge::client::SharedClient;
use s3surge::codec;
use s3surge::compare::{compare, merge_logs};
use s3surge::config::{parse_size, BenchOpts, ClientConfig};
use s3surge::coordinator::{self, Connections};
use s3surge::follower::{run_follower, ClientFactory};
use s3surge::generator::{PayloadSource, SizeSpec};
use s3surge::live::LiveStats;
use s3surge::monitor::{Monitor, MonitorStage};
use s3surge::protocol::{BenchmarkPayload, ServerRequest, DEFAULT_PORT, EXCLUDED_FLAGS};
use s3surge::record::{OpType, Operations};
use s3surge::s3::S3Client;
use s3surge::{autoterm, rand_ascii};

#[derive(Parser)]
#[command(name = "s3surge", version, about = "S3 load generator and analyzer")]
struct Cli {
    /// Increase verbosity (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Storage endpoint(s), comma separated host:port
    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    access_key: Option<String>,

    #[arg(long, global = true)]
    secret_key: Option<String>,

    /// Use TLS towards the storage endpoints
    #[arg(long, global = true)]
    tls: bool,

    #[arg(long, global = true)]
    region: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args, Clone)]
struct BenchArgs {
    /// Benchmark duration, e.g. "2m34s"
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Concurrent workers
    #[arg(long, default_value_t = 20)]
    concurrent: usize,

    /// Objects to prepopulate
    #[arg(long, default_value_t = 2500)]
    objects: usize,

    /// Object size, e.g. "10MiB"
    #[arg(long = "obj.size", default_value = "10MiB")]
    obj_size: String,

    /// Randomize object sizes up to obj.size
    #[arg(long = "obj.randsize")]
    obj_randsize: bool,

    #[arg(long, default_value = "s3surge-benchmark")]
    bucket: String,

    /// Key prefix benchmark artifacts live under
    #[arg(long, default_value = "s3surge")]
    prefix: String,

    /// Do not clear the bucket before or after the run
    #[arg(long)]
    noclear: bool,

    /// Keep benchmark data after the run
    #[arg(long = "keep-data")]
    keep_data: bool,

    /// Terminate early once throughput is stable
    #[arg(long)]
    autoterm: bool,

    /// Minimum stable duration before auto termination
    #[arg(long = "autoterm.dur", default_value = "10s", value_parser = humantime::parse_duration)]
    autoterm_dur: Duration,

    /// Stability tolerance in percent
    #[arg(long = "autoterm.pct", default_value_t = 7.5)]
    autoterm_pct: f64,

    /// Absolute start time "hh:mm" (24h, local)
    #[arg(long)]
    syncstart: Option<String>,

    /// Output file stem for benchmark data
    #[arg(long)]
    benchdata: Option<String>,

    /// Run the benchmark on these followers, comma separated host:port
    #[arg(long)]
    followers: Option<String>,

    /// Bind a read-only live-status endpoint on this address
    #[arg(long)]
    serve: Option<SocketAddr>,

    /// Seed for the mixed-operation schedule
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Args, Clone)]
struct DistribArgs {
    /// GET share of the mixed workload
    #[arg(long = "get-distrib", default_value_t = 45.0)]
    get_distrib: f64,

    /// STAT share of the mixed workload
    #[arg(long = "stat-distrib", default_value_t = 30.0)]
    stat_distrib: f64,

    /// PUT share of the mixed workload
    #[arg(long = "put-distrib", default_value_t = 15.0)]
    put_distrib: f64,

    /// DELETE share; must not exceed the PUT share
    #[arg(long = "delete-distrib", default_value_t = 10.0)]
    delete_distrib: f64,
}

#[derive(Args, Clone)]
struct AnalyzeArgs {
    /// Split analysis into windows of this duration, e.g. "1s", "1m"
    #[arg(long = "analyze.dur", value_parser = humantime::parse_duration)]
    dur: Option<Duration>,

    /// Additional warm-up to skip from the start of the active range
    #[arg(long = "analyze.skip", default_value = "0s", value_parser = humantime::parse_duration)]
    skip: Duration,

    /// Only analyze this operation type (GET/PUT/...)
    #[arg(long = "analyze.op")]
    op: Option<String>,

    /// Only analyze operations against this endpoint
    #[arg(long = "analyze.host")]
    host: Option<String>,

    /// Maximum operations to load; 0 means unlimited
    #[arg(long = "analyze.limit", default_value_t = 0)]
    limit: usize,

    /// Operations to skip before loading
    #[arg(long = "analyze.offset", default_value_t = 0)]
    offset: usize,

    /// Write the aggregated report as JSON to this file ("-" for stdout)
    #[arg(long = "analyze.out")]
    out: Option<String>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Benchmark GET operations
    Get {
        #[command(flatten)]
        bench: BenchArgs,
        /// Ranged reads with random offset and length
        #[arg(long)]
        range: bool,
    },
    /// Benchmark PUT operations
    Put {
        #[command(flatten)]
        bench: BenchArgs,
    },
    /// Benchmark batched DELETE operations
    Delete {
        #[command(flatten)]
        bench: BenchArgs,
        /// Objects per delete request
        #[arg(long, default_value_t = 100)]
        batch: usize,
    },
    /// Benchmark STAT (metadata) operations
    Stat {
        #[command(flatten)]
        bench: BenchArgs,
    },
    /// Benchmark LIST operations
    List {
        #[command(flatten)]
        bench: BenchArgs,
    },
    /// Benchmark SELECT queries
    Select {
        #[command(flatten)]
        bench: BenchArgs,
        /// SELECT expression to run
        #[arg(long = "select.query", default_value = s3surge::bench::select::DEFAULT_EXPRESSION)]
        query: String,
    },
    /// Benchmark a weighted mix of operations
    Mixed {
        #[command(flatten)]
        bench: BenchArgs,
        #[command(flatten)]
        distrib: DistribArgs,
    },
    /// Benchmark a mix of operations against object versions
    Versioned {
        #[command(flatten)]
        bench: BenchArgs,
        #[command(flatten)]
        distrib: DistribArgs,
    },
    /// Analyze existing benchmark data
    Analyze {
        /// Benchmark data file (.csv.zst); "-" reads stdin
        file: String,
        #[command(flatten)]
        analyze: AnalyzeArgs,
    },
    /// Compare two benchmark runs
    Cmp {
        before: PathBuf,
        after: PathBuf,
        #[command(flatten)]
        analyze: AnalyzeArgs,
    },
    /// Merge several benchmark data files into one
    Merge {
        files: Vec<PathBuf>,
        /// Output file stem
        #[arg(long)]
        benchdata: Option<String>,
    },
    /// Run in follower mode, accepting benchmarks from a coordinator
    Client {
        /// Listen address
        listen: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut ccfg = ClientConfig::from_env();
    if let Some(host) = &cli.host {
        ccfg.hosts = host
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(key) = &cli.access_key {
        ccfg.access_key = key.clone();
    }
    if let Some(key) = &cli.secret_key {
        ccfg.secret_key = key.clone();
    }
    if cli.tls {
        ccfg.tls = true;
    }
    if let Some(region) = &cli.region {
        ccfg.region = region.clone();
    }

    match cli.cmd {
        Cmd::Get { bench, range } => {
            let mut opts = bench_opts("get", &bench)?;
            opts.range = range;
            run_benchmark(opts, bench, ccfg).await
        }
        Cmd::Put { bench } => run_benchmark(bench_opts("put", &bench)?, bench, ccfg).await,
        Cmd::Delete { bench, batch } => {
            let mut opts = bench_opts("delete", &bench)?;
            opts.batch = batch;
            run_benchmark(opts, bench, ccfg).await
        }
        Cmd::Stat { bench } => run_benchmark(bench_opts("stat", &bench)?, bench, ccfg).await,
        Cmd::List { bench } => run_benchmark(bench_opts("list", &bench)?, bench, ccfg).await,
        Cmd::Select { bench, query } => {
            let mut opts = bench_opts("select", &bench)?;
            opts.query = query;
            run_benchmark(opts, bench, ccfg).await
        }
        Cmd::Mixed { bench, distrib } => {
            let mut opts = bench_opts("mixed", &bench)?;
            apply_distrib(&mut opts, &distrib);
            run_benchmark(opts, bench, ccfg).await
        }
        Cmd::Versioned { bench, distrib } => {
            let mut opts = bench_opts("versioned", &bench)?;
            apply_distrib(&mut opts, &distrib);
            run_benchmark(opts, bench, ccfg).await
        }
        Cmd::Analyze { file, analyze } => cmd_analyze(&file, &analyze),
        Cmd::Cmp {
            before,
            after,
            analyze,
        } => cmd_cmp(&before, &after, &analyze),
        Cmd::Merge { files, benchdata } => cmd_merge(&files, benchdata.as_deref()),
        Cmd::Client { listen } => cmd_client(listen.as_deref(), ccfg).await,
    }
}

fn bench_opts(command: &str, args: &BenchArgs) -> Result<BenchOpts> {
    let mut opts = BenchOpts::new(command);
    opts.duration = args.duration;
    opts.concurrency = args.concurrent;
    opts.objects = args.objects;
    opts.obj_size = parse_size(&args.obj_size)?;
    opts.rand_size = args.obj_randsize;
    opts.bucket = args.bucket.clone();
    opts.prefix = args.prefix.clone();
    opts.noclear = args.noclear;
    opts.keep_data = args.keep_data;
    opts.autoterm = args.autoterm;
    opts.autoterm_dur = args.autoterm_dur;
    opts.autoterm_pct = args.autoterm_pct;
    opts.seed = args.seed;
    Ok(opts)
}

fn apply_distrib(opts: &mut BenchOpts, d: &DistribArgs) {
    opts.get_weight = d.get_distrib;
    opts.stat_weight = d.stat_distrib;
    opts.put_weight = d.put_distrib;
    opts.delete_weight = d.delete_distrib;
}

fn stdout_loggers() -> (LogLn, LogLn) {
    let info_ln: LogLn = Arc::new(|msg| println!("{msg}"));
    let error_ln: LogLn = Arc::new(|msg| eprintln!("{msg}"));
    (info_ln, error_ln)
}

fn output_stem(opts: &BenchOpts, benchdata: Option<&str>, client_id: &str) -> String {
    match benchdata {
        Some(stem) => stem.to_string(),
        None => format!(
            "s3surge-{}-{}-{}",
            opts.command,
            Local::now().format("%Y-%m-%d[%H%M%S]"),
            client_id
        ),
    }
}

fn write_benchdata(ops: &Operations, stem: &str) -> Result<()> {
    let path = format!("{stem}.csv.zst");
    let file = std::fs::File::create(&path)
        .with_context(|| format!("cannot write benchmark data to {path:?}"))?;
    let argv: Vec<String> = std::env::args().collect();
    codec::write_csv_zst(ops, file, &s3surge::config::redact_command_line(&argv))?;
    println!("Benchmark data written to {path:?}");
    Ok(())
}

async fn run_benchmark(opts: BenchOpts, args: BenchArgs, ccfg: ClientConfig) -> Result<()> {
    let distributed = args.followers.is_some();
    opts.validate(distributed)?;
    if distributed {
        run_coordinated(opts, args).await
    } else {
        run_local(opts, args, ccfg).await
    }
}

/// Single-host benchmark lifecycle: prepare, gate, run, save, analyze,
/// cleanup.
async fn run_local(opts: BenchOpts, args: BenchArgs, ccfg: ClientConfig) -> Result<()> {
    ccfg.validate()?;
    let clients: Vec<SharedClient> = S3Client::connect_all(&ccfg)
        .await
        .map_err(|e| anyhow::anyhow!("client setup: {e}"))?
        .into_iter()
        .map(|c| Arc::new(c) as SharedClient)
        .collect();

    let live = Arc::new(LiveStats::new());
    let monitor = Monitor::new();
    if let Some(addr) = args.serve {
        monitor.set_live(Arc::clone(&live));
        monitor.serve(addr);
    }

    let (_, error_ln) = stdout_loggers();
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(16);
    let common = Common {
        pool: bench::ClientPool::new(clients),
        concurrency: opts.concurrency,
        bucket: opts.bucket.clone(),
        region: ccfg.region.clone(),
        prefix: opts.prefix.clone(),
        payload: Arc::new(PayloadSource::new(SizeSpec::new(opts.obj_size, opts.rand_size))),
        clear: !opts.noclear,
        prepare_progress: Some(progress_tx),
        live: Arc::clone(&live),
        error_ln,
    };
    let mut benchmark = bench::build(&opts, common)?;

    println!("Preparing server.");
    let pb = ProgressBar::new(10_000);
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}% {msg}",
    )?);
    pb.set_message("preparing");
    let monitor2 = monitor.clone();
    let pb2 = pb.clone();
    let progress_task = tokio::spawn(async move {
        while let Some(fraction) = progress_rx.recv().await {
            pb2.set_position((fraction * 10_000.0) as u64);
            monitor2.set_progress(fraction);
        }
    });
    benchmark.prepare().await.context("preparation failed")?;
    pb.finish_and_clear();
    progress_task.abort();

    let start_at = match &args.syncstart {
        Some(at) => parse_sync_start(at)?,
        None => Utc::now() + chrono::Duration::seconds(3),
    };
    let until_start = (start_at - Utc::now()).to_std().unwrap_or_default();
    info!(
        "starting benchmark in {}...",
        humantime::format_duration(Duration::from_secs(until_start.as_secs()))
    );
    monitor.set_stage(MonitorStage::Running);

    let run_pb = ProgressBar::new(opts.duration.as_secs());
    run_pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len}s {msg}",
    )?);
    run_pb.set_message(format!("running with {} workers", opts.concurrency));
    let ticker = {
        let run_pb = run_pb.clone();
        let duration = opts.duration;
        let delay = (start_at - Utc::now()).to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let started = std::time::Instant::now();
            while started.elapsed() < duration {
                run_pb.set_position(started.elapsed().as_secs());
                tokio::time::sleep(Duration::from_millis(125)).await;
            }
        })
    };

    let plan = RunPlan {
        start_at,
        duration: opts.duration,
        autoterm: opts.autoterm.then_some(autoterm::AutoTermConfig {
            dur: opts.autoterm_dur,
            pct: opts.autoterm_pct / 100.0,
        }),
    };
    let outcome = bench::execute(benchmark.as_mut(), plan, None).await?;
    ticker.abort();
    run_pb.finish_and_clear();

    let mut ops = outcome.ops;
    let client_id = rand_ascii(4);
    ops.sort_by_start_time();
    ops.set_client_id(&client_id);
    if outcome.auto_terminated {
        println!("Benchmark auto-terminated: throughput stable.");
    }

    println!("Saving benchmark data...");
    let stem = output_stem(&opts, args.benchdata.as_deref(), &client_id);
    write_benchdata(&ops, &stem)?;
    monitor.operations_ready(ops.clone());
    print_analysis(&aggregate(&ops, &AnalysisOpts::default()), outcome.auto_terminated);

    if !opts.keep_data && !opts.noclear {
        println!("Cleaning up...");
        benchmark.cleanup().await;
    }
    Ok(())
}

/// Drive the benchmark on remote followers instead of locally.
async fn run_coordinated(opts: BenchOpts, args: BenchArgs) -> Result<()> {
    let hosts: Vec<String> = args
        .followers
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect();
    if hosts.is_empty() {
        bail!("no follower hosts given");
    }

    let (info_ln, error_ln) = stdout_loggers();
    let mut conns = Connections::new(hosts, info_ln, error_ln);
    let mut flags = opts.to_flag_map();
    flags.retain(|k, _| !EXCLUDED_FLAGS.contains(&k.as_str()));
    let payload = BenchmarkPayload {
        command: opts.command.clone(),
        args: Vec::new(),
        flags,
    };
    let mut ops = coordinator::run_remote(&mut conns, ServerRequest::benchmark(payload)).await?;
    ops.sort_by_start_time();

    let stem = output_stem(&opts, args.benchdata.as_deref(), "remote");
    write_benchdata(&ops, &stem)?;
    print_analysis(&aggregate(&ops, &AnalysisOpts::default()), false);
    Ok(())
}

async fn cmd_client(listen: Option<&str>, ccfg: ClientConfig) -> Result<()> {
    let addr = match listen {
        Some(addr) if addr.contains(':') => addr.to_string(),
        Some(addr) => format!("{addr}:{DEFAULT_PORT}"),
        None => format!("0.0.0.0:{DEFAULT_PORT}"),
    };
    let addr: SocketAddr = addr.parse().context("bad listen address")?;
    let factory: ClientFactory = Arc::new(move || {
        let ccfg = ccfg.clone();
        Box::pin(async move {
            ccfg.validate()?;
            let clients = S3Client::connect_all(&ccfg)
                .await
                .map_err(|e| anyhow::anyhow!("client setup: {e}"))?;
            Ok(clients
                .into_iter()
                .map(|c| Arc::new(c) as SharedClient)
                .collect())
        })
    });
    run_follower(addr, factory).await
}

fn read_benchdata(path: &str, offset: usize, limit: usize) -> Result<Operations> {
    let progress = |n: usize| println!("{n} operations loaded...");
    if path == "-" {
        return codec::read_csv_zst(std::io::stdin().lock(), offset, limit, progress)
            .context("cannot parse input");
    }
    let file =
        std::fs::File::open(path).with_context(|| format!("cannot open input file {path:?}"))?;
    codec::read_csv_zst(file, offset, limit, progress)
        .with_context(|| format!("cannot parse {path:?}"))
}

fn cmd_analyze(file: &str, args: &AnalyzeArgs) -> Result<()> {
    let mut ops = read_benchdata(file, args.offset, args.limit)?;
    let mut prefiltered = false;
    if let Some(want) = &args.op {
        let t = OpType::parse(want)
            .with_context(|| format!("unknown operation type {want:?}"))?;
        ops = ops.filter_by_op(t);
        prefiltered = true;
    }
    if let Some(host) = &args.host {
        ops = ops.filter_by_endpoint(host);
        prefiltered = true;
    }
    let agg = aggregate(
        &ops,
        &AnalysisOpts {
            prefiltered,
            segment_dur: args.dur,
            skip: args.skip,
        },
    );
    if let Some(out) = &args.out {
        let json = serde_json::to_string_pretty(&agg)?;
        if out == "-" {
            println!("{json}");
        } else {
            std::fs::write(out, json)
                .with_context(|| format!("cannot write aggregated data to {out:?}"))?;
            println!("Aggregated data saved to {out:?}");
        }
    }
    print_analysis(&agg, false);
    Ok(())
}

fn cmd_cmp(before: &PathBuf, after: &PathBuf, args: &AnalyzeArgs) -> Result<()> {
    let before_ops = read_benchdata(&before.display().to_string(), args.offset, args.limit)?;
    let after_ops = read_benchdata(&after.display().to_string(), args.offset, args.limit)?;
    let comparisons = compare(&before_ops, &after_ops, args.dur)?;
    for c in comparisons {
        println!("-------------------");
        println!("Operation: {}", c.op_type);
        if c.operations.before != c.operations.after {
            println!("Operations: {} -> {}", c.operations.before, c.operations.after);
        }
        if c.threads.before != c.threads.after {
            println!("Concurrency: {} -> {}", c.threads.before, c.threads.after);
        }
        if c.hosts.before != c.hosts.after {
            println!("Endpoints: {} -> {}", c.hosts.before, c.hosts.after);
        }
        println!("* Average: {}", c.average_bps);
        if let Some(ttfb) = c.ttfb_mean_ms {
            println!("* First byte: {ttfb}");
        }
        if let Some(fastest) = c.fastest_bps {
            println!("* Fastest: {fastest}");
        }
        if let Some(median) = c.median_bps {
            println!("* Median: {median}");
        }
        if let Some(slowest) = c.slowest_bps {
            println!("* Slowest: {slowest}");
        }
    }
    Ok(())
}

fn cmd_merge(files: &[PathBuf], benchdata: Option<&str>) -> Result<()> {
    if files.len() < 2 {
        bail!("merge needs two or more benchmark data files");
    }
    let mut logs = Vec::with_capacity(files.len());
    for file in files {
        logs.push(read_benchdata(&file.display().to_string(), 0, 0)?);
    }
    let (merged, warnings) = merge_logs(logs);
    if merged.is_empty() {
        bail!("benchmark files contain no data");
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    let stem = benchdata.map(str::to_string).unwrap_or_else(|| {
        format!("s3surge-merge-{}", Local::now().format("%Y-%m-%d[%H%M%S]"))
    });
    write_benchdata(&merged, &stem)?;
    Ok(())
}

/// "hh:mm" local time today; must be in the future.
fn parse_sync_start(s: &str) -> Result<DateTime<Utc>> {
    let t = NaiveTime::parse_from_str(s, "%H:%M")
        .with_context(|| format!("cannot parse time {s:?}, expected hh:mm"))?;
    let local = Local::now()
        .date_naive()
        .and_time(t)
        .and_local_timezone(Local)
        .single()
        .context("ambiguous local time")?;
    let at = local.with_timezone(&Utc);
    if at < Utc::now() {
        bail!("syncstart already passed: {s}");
    }
    Ok(at)
}

fn print_analysis(agg: &Aggregated, auto_terminated: bool) {
    if agg.mixed {
        println!("Mixed operations.");
        if let Some(stats) = &agg.mixed_server_stats {
            println!(
                "Total: {} operations, {:.2} obj/s",
                stats.operations, stats.ops_per_sec
            );
        }
    }
    for op in &agg.operations {
        print_operation(agg, op);
    }
    if auto_terminated {
        println!("\nAutoTerminated: true");
    }
}

fn print_operation(agg: &Aggregated, op: &OpAggregate) {
    println!();
    let duration = (op.end_time - op.start_time)
        .to_std()
        .unwrap_or_default()
        .as_secs();
    if agg.mixed {
        let share = agg
            .mixed_server_stats
            .as_ref()
            .and_then(|s| s.shares.get(&op.op_type))
            .copied()
            .unwrap_or(0.0);
        println!(
            "Operation: {}, {}%, Concurrency: {}, Duration: {}s.",
            op.op_type,
            (share + 0.5) as u64,
            op.concurrency,
            duration
        );
    } else {
        println!(
            "Operation: {}, Concurrency: {}, Duration: {}s.",
            op.op_type, op.concurrency, duration
        );
    }
    if op.skipped {
        println!("Skipping {}: too few samples for reliable statistics.", op.op_type);
        return;
    }
    if op.errors > 0 {
        println!("Errors: {}", op.errors);
        for err in &op.first_errors {
            println!("  {err}");
        }
    }
    println!(
        " * Throughput: {}, {:.2} obj/s ({} operations)",
        format_bps(op.throughput.average_bps),
        op.throughput.average_ops,
        op.n
    );
    if let Some(seg) = &op.segmented {
        println!(
            "Throughput by {}s window:",
            seg.segment_secs
        );
        println!(
            " * Fastest: {}, {:.2} obj/s ({})",
            format_bps(seg.fastest.bps),
            seg.fastest.ops_per_sec,
            seg.fastest.start.format("%H:%M:%S")
        );
        println!(
            " * Median:  {}, {:.2} obj/s ({})",
            format_bps(seg.median.bps),
            seg.median.ops_per_sec,
            seg.median.start.format("%H:%M:%S")
        );
        println!(
            " * Slowest: {}, {:.2} obj/s ({})",
            format_bps(seg.slowest.bps),
            seg.slowest.ops_per_sec,
            seg.slowest.start.format("%H:%M:%S")
        );
    }
    if op.by_host.len() > 1 {
        println!("Throughput by host:");
        for (host, tp) in &op.by_host {
            println!(" * {host}: {}", format_bps(tp.average_bps));
        }
    }
    if let Some(single) = &op.single_sized {
        let s = &single.stats;
        println!(
            "Requests considered: {}. Latency: avg {:.1}ms, median {:.1}ms, 90th {:.1}ms, 99th {:.1}ms, fastest {:.1}ms, slowest {:.1}ms",
            s.requests, s.average_ms, s.median_ms, s.p90_ms, s.p99_ms, s.fastest_ms, s.slowest_ms
        );
        if let Some(ttfb) = &single.ttfb {
            println!(
                "TTFB: avg {:.1}ms, median {:.1}ms, 90th {:.1}ms, 99th {:.1}ms",
                ttfb.average_ms, ttfb.median_ms, ttfb.p90_ms, ttfb.p99_ms
            );
        }
        if let Some(fa) = &single.first_access {
            println!(
                "First access: avg {:.1}ms, median {:.1}ms, 99th {:.1}ms ({} requests)",
                fa.average_ms, fa.median_ms, fa.p99_ms, fa.requests
            );
        }
    }
    if let Some(multi) = &op.multi_sized {
        println!(
            "Requests considered: {}. Average object size: {} bytes.",
            multi.requests, multi.avg_obj_size
        );
        for bucket in &multi.by_size {
            println!(
                " * {}..{} bytes: {} requests, avg {:.1}ms, median throughput {}",
                bucket.min_size,
                bucket.max_size,
                bucket.requests,
                bucket.avg_duration_ms,
                format_bps(bucket.bps_median)
            );
        }
    }
}
