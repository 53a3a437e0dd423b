//! refuzz: reflection-guided fuzzing of Python interpreters.

mod output;
mod telemetry;

use anyhow::{Context, Result};
use clap::Parser;
use refuzz_core::{FuzzerConfig, RuntimeConfig, WorkerId};
use refuzz_engine::{
    Corpus, Environment, Events, FuzzerContext, InMemoryCorpus, ReflectionEngine, Statistics,
    TypeNoveltyEvaluator,
};
use refuzz_ir::{Program, ProgramBuilder};
use refuzz_runtime::ProcessExecutor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing::{error, info, instrument, warn};

#[derive(Parser, Debug)]
#[command(name = "refuzz", version, about = "Reflection-guided fuzzer for Python interpreters")]
struct Args {
    /// Interpreter to fuzz
    #[arg(long, env = "REFUZZ_INTERPRETER")]
    interpreter: Option<PathBuf>,

    /// Directory of JSON seed programs
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Where crashes and interesting programs are written
    #[arg(long, default_value = "refuzz-out")]
    output: PathBuf,

    /// Number of parallel workers
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Iterations per worker; runs until interrupted when absent
    #[arg(long)]
    iterations: Option<u64>,

    /// Base random seed
    #[arg(long)]
    seed: Option<u64>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-execution timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    /// The configuration file, if any, with command-line overrides applied
    fn fuzzer_config(&self) -> Result<FuzzerConfig> {
        let mut config = match &self.config {
            Some(path) => FuzzerConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => FuzzerConfig::default(),
        };
        if let Some(interpreter) = &self.interpreter {
            config.runtime.interpreter = interpreter.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        config.telemetry.json_logs |= self.json_logs;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.fuzzer_config()?;

    telemetry::init_telemetry(config.telemetry.otel_endpoint.as_deref(), config.telemetry.json_logs)?;
    info!(
        interpreter = %config.runtime.interpreter.display(),
        workers = args.workers,
        seed = config.seed,
        "Starting refuzz"
    );

    let environment = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || bootstrap(&config)).await??
    };
    let environment = Arc::new(environment);

    let corpus = Arc::new(InMemoryCorpus::new());
    if let Some(dir) = &args.corpus {
        corpus.load_dir(dir)?;
    }
    if corpus.is_empty() {
        warn!("no seeds loaded, starting from a trivial program");
        corpus.add(trivial_seed());
    }

    let mut events = Events::new();
    events.subscribe(Arc::new(output::OutputWriter::create(&args.output)?));
    let statistics = Arc::new(Statistics::new());
    let evaluator = Arc::new(TypeNoveltyEvaluator::new());
    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(args.workers);
    for i in 0..args.workers {
        let worker = Worker {
            id: WorkerId(i),
            config: config.clone(),
            environment: environment.clone(),
            corpus: corpus.clone(),
            evaluator: evaluator.clone(),
            events: events.clone(),
            statistics: statistics.clone(),
            stop: stop.clone(),
            iterations: args.iterations,
        };
        handles.push(tokio::task::spawn_blocking(move || worker.run()));
    }

    let reporter = {
        let statistics = statistics.clone();
        let corpus = corpus.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(30));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let totals = statistics.totals();
                info!(
                    event = "progress",
                    corpus = corpus.len(),
                    samples = totals.total_samples(),
                    crashing = totals.crashing,
                    success_rate = totals.success_rate()
                );
                statistics.log_summary();
            }
        })
    };

    let workers = futures::future::join_all(handles);
    tokio::pin!(workers);
    tokio::select! {
        results = &mut workers => report_workers(results),
        _ = shutdown_signal() => {
            info!("Shutting down workers");
            stop.store(true, Ordering::SeqCst);
            let timeout = tokio::time::sleep(Duration::from_secs(30));
            tokio::pin!(timeout);
            tokio::select! {
                results = &mut workers => report_workers(results),
                _ = &mut timeout => warn!("Shutdown timeout reached"),
            }
        }
    }
    reporter.abort();

    statistics.log_summary();
    info!(corpus = corpus.len(), "refuzz finished");
    telemetry::shutdown_telemetry();
    Ok(())
}

/// Ask the interpreter for its builtins; failure ends the run
fn bootstrap(config: &FuzzerConfig) -> Result<Environment> {
    let mut executor = ProcessExecutor::new(config.runtime.clone(), config.bootstrap_timeout())
        .context("creating executor for bootstrap")?;
    Environment::bootstrap(&mut executor, config.bootstrap_timeout()).context("environment bootstrap failed")
}

/// `len("refuzz")` followed by an integer
fn trivial_seed() -> Program {
    let mut b = ProgramBuilder::new();
    let s = b.load_string("refuzz");
    let f = b.load_builtin("len");
    b.call_function(f, &[s]);
    b.load_int(1);
    b.finalize()
}

struct Worker {
    id: WorkerId,
    config: FuzzerConfig,
    environment: Arc<Environment>,
    corpus: Arc<InMemoryCorpus>,
    evaluator: Arc<TypeNoveltyEvaluator>,
    events: Events,
    statistics: Arc<Statistics>,
    stop: Arc<AtomicBool>,
    iterations: Option<u64>,
}

impl Worker {
    #[instrument(skip(self), fields(worker = %self.id))]
    fn run(self) -> Result<u64> {
        let runtime = worker_runtime(&self.config.runtime, self.id);
        let executor = ProcessExecutor::new(runtime, self.config.timeout())
            .with_context(|| format!("creating executor for {}", self.id))?;
        let seed = self.config.seed.wrapping_add(self.id.0 as u64);
        let ctx = FuzzerContext::new(self.config.clone(), self.environment, Box::new(executor), seed);
        let mut engine = ReflectionEngine::new(ctx, self.corpus, self.evaluator)
            .with_events(self.events)
            .with_statistics(self.statistics);
        info!(seed, "worker started");

        let mut completed = 0;
        while !self.stop.load(Ordering::SeqCst) && self.iterations.map_or(true, |n| completed < n) {
            engine.fuzz_one();
            completed += 1;
        }
        info!(iterations = completed, "worker stopped");
        Ok(completed)
    }
}

/// Runtime settings for one worker. A configured work directory is split
/// per worker so concurrent runs never share scripts or captured output.
fn worker_runtime(runtime: &RuntimeConfig, id: WorkerId) -> RuntimeConfig {
    let mut runtime = runtime.clone();
    if let Some(dir) = &runtime.work_dir {
        runtime.work_dir = Some(dir.join(id.to_string()));
    }
    runtime
}

fn report_workers(results: Vec<std::result::Result<Result<u64>, tokio::task::JoinError>>) {
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(Ok(iterations)) => info!(worker = %WorkerId(i), iterations, "worker finished"),
            Ok(Err(e)) => error!(worker = %WorkerId(i), error = %e, "worker failed"),
            Err(e) => error!(worker = %WorkerId(i), error = %e, "worker panicked"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
