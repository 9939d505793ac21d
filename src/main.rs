use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use rustpool::config::Config;
use rustpool::{ConnectionPool, RustPoolError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[cfg(feature = "fast-allocator")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "rustpool")]
#[command(about = "TCP connection pool exerciser", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Target address to pool connections against ("host:port")
    #[arg(long)]
    target: Option<String>,

    /// Bind an in-process echo listener and use it as the target
    #[arg(long, conflicts_with = "target")]
    spawn_echo: bool,

    /// Total number of checkout/echo/release cycles
    #[arg(long, default_value = "1000")]
    requests: u64,

    /// Concurrent workers
    #[arg(long, default_value = "8")]
    concurrency: usize,

    /// Serve the status API on this address for the duration of the run
    #[arg(long, value_name = "ADDR")]
    status_bind: Option<String>,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Default)]
struct LoadTotals {
    new_dials: AtomicU64,
    reused: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle config generation
    if let Some(config_path) = args.generate_config {
        Config::create_example(&config_path)?;
        println!("Example configuration written to {:?}", config_path);
        return Ok(());
    }

    // Load configuration
    let config = match &args.config {
        Some(path) => {
            Config::from_file(path).with_context(|| format!("loading {:?}", path))?
        }
        None => Config::default(),
    };

    // Initialize logging
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, &config.logging.format)?;

    info!("rustpool v{} starting", env!("CARGO_PKG_VERSION"));

    let pool = Arc::new(ConnectionPool::new(config.pool.to_options()));

    let target = if args.spawn_echo {
        let addr = spawn_echo_listener().await?;
        info!("In-process echo listener on {}", addr);
        addr.to_string()
    } else {
        args.target
            .clone()
            .ok_or_else(|| anyhow::anyhow!("either --target or --spawn-echo is required"))?
    };

    let status_bind = args.status_bind.clone().or_else(|| {
        config
            .status_api
            .enabled
            .then(|| config.status_api.bind_address.clone())
    });
    if let Some(bind) = status_bind {
        rustpool::api::start_status_server(&bind, pool.clone()).await?;
    }

    run_load(pool, &target, args.requests, args.concurrency).await
}

fn init_logging(level: &str, format: &str) -> rustpool::Result<()> {
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| RustPoolError::Config(format!("Invalid log level: {}", e)))?;

    match format {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init(),
    }

    Ok(())
}

async fn spawn_echo_listener() -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(echo_client(stream, peer));
                }
                Err(err) => {
                    warn!("echo listener accept error: {}", err);
                }
            }
        }
    });

    Ok(addr)
}

async fn echo_client(mut stream: TcpStream, peer: SocketAddr) {
    let mut buf = vec![0u8; 8192];

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!("echo read error from {}: {}", peer, err);
                break;
            }
        }
    }
}

async fn run_load(
    pool: Arc<ConnectionPool>,
    target: &str,
    requests: u64,
    concurrency: usize,
) -> anyhow::Result<()> {
    let concurrency = concurrency.max(1);
    let per_worker = requests / concurrency as u64;
    let totals = Arc::new(LoadTotals::default());

    info!(
        "Running {} cycles against {} across {} workers",
        per_worker * concurrency as u64,
        target,
        concurrency
    );

    let started = Instant::now();
    let mut workers = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let pool = pool.clone();
        let totals = totals.clone();
        let target = target.to_string();
        workers.push(tokio::spawn(async move {
            for _ in 0..per_worker {
                run_cycle(&pool, &target, &totals).await;
            }
        }));
    }

    for worker in join_all(workers).await {
        worker?;
    }
    let elapsed = started.elapsed();

    info!(
        "Done in {:?}: {} new dials, {} reuses, {} retries, {} failures",
        elapsed,
        totals.new_dials.load(Ordering::Relaxed),
        totals.reused.load(Ordering::Relaxed),
        totals.retries.load(Ordering::Relaxed),
        totals.failures.load(Ordering::Relaxed),
    );

    for (address, status) in pool.status().await {
        let free = status
            .free_conns
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string());
        info!(
            "{}: pooled={} open={} free={}",
            address, status.pooled_conns, status.open_conns, free
        );
    }

    Ok(())
}

async fn run_cycle(pool: &ConnectionPool, target: &str, totals: &LoadTotals) {
    let acquired = match pool.acquire(target).await {
        Ok(acquired) => acquired,
        Err(err) => {
            totals.failures.fetch_add(1, Ordering::Relaxed);
            error!("acquire failed: {}", err);
            return;
        }
    };

    totals
        .retries
        .fetch_add(u64::from(acquired.retries), Ordering::Relaxed);
    if acquired.newly_dialed {
        totals.new_dials.fetch_add(1, Ordering::Relaxed);
    } else {
        totals.reused.fetch_add(1, Ordering::Relaxed);
    }

    let mut conn = acquired.conn;
    let mut reply = [0u8; 4];
    let ok = conn.write_all(b"ping").await.is_ok() && conn.read_exact(&mut reply).await.is_ok();

    if !ok {
        // A broken connection is dropped (closed), not parked for the next
        // caller.
        totals.failures.fetch_add(1, Ordering::Relaxed);
        warn!("echo round-trip against {} failed", target);
        return;
    }

    if let Err(err) = pool.release(conn).await {
        warn!("release failed: {}", err);
    }
}
