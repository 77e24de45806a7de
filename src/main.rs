//! rwdev host - menjalankan device table seperti host yang me-route syscall
//!
//! Semua file dibuka dulu (open me-reset cursor), lalu writer & reader
//! thread mengalirkan pola byte deterministik lewat setiap device.
//! Di akhir, jumlah & checksum bytes yang dibaca harus sama dengan yang ditulis.
//!
//! Usage:
//!   cargo run --release -- --num-devices 4 --buffer-capacity 4000 --bytes 1048576

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use rwdev::device::SliceWriter;
use rwdev::{Config, DeviceTable, Error, OpenFile, OpenMode, Signal};

#[derive(Parser, Debug)]
#[command(name = "rwdev")]
#[command(about = "Stream bytes through blocking circular-buffer devices")]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Bytes to push through each device
    #[arg(long, default_value_t = 1 << 20)]
    bytes: u64,

    /// Bytes per read/write call
    #[arg(long, default_value_t = 512)]
    chunk: usize,

    /// Writer threads per device
    #[arg(long, default_value_t = 1)]
    writers: usize,

    /// Reader threads per device
    #[arg(long, default_value_t = 1)]
    readers: usize,

    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_sigint(_: libc::c_int) {
    SIGINT_RECEIVED.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_sigint_handler() {
    // SAFETY: handler hanya menyentuh atomic static (async-signal-safe)
    unsafe {
        libc::signal(
            libc::SIGINT,
            on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
}

#[cfg(not(unix))]
fn install_sigint_handler() {}

/// Statistik transfer per device
#[derive(Default)]
struct TransferStats {
    written: AtomicU64,
    written_sum: AtomicU64,
    read: AtomicU64,
    read_sum: AtomicU64,
}

fn pattern_byte(seed: u64, index: u64) -> u8 {
    (seed.wrapping_add(index).wrapping_mul(31) % 251) as u8
}

fn byte_sum(data: &[u8]) -> u64 {
    data.iter().map(|&b| b as u64).sum()
}

fn writer_loop(
    file: OpenFile,
    seed: u64,
    total: u64,
    chunk: usize,
    stats: Arc<TransferStats>,
) -> rwdev::Result<()> {
    let mut buf = vec![0u8; chunk];
    let mut produced = 0u64;

    'outer: while produced < total {
        let len = (total - produced).min(chunk as u64) as usize;
        for (i, byte) in buf[..len].iter_mut().enumerate() {
            *byte = pattern_byte(seed, produced + i as u64);
        }

        // Partial write adalah kontrak normal: ulangi sampai chunk habis
        let mut offset = 0;
        while offset < len {
            match file.write_bytes(&buf[offset..len], false) {
                Ok(n) => {
                    stats.written.fetch_add(n as u64, Ordering::Relaxed);
                    stats
                        .written_sum
                        .fetch_add(byte_sum(&buf[offset..offset + n]), Ordering::Relaxed);
                    offset += n;
                }
                Err(Error::Interrupted) => break 'outer,
                Err(e) => return Err(e),
            }
        }
        produced += len as u64;
    }

    debug!(minor = file.minor(), produced, "writer finished");
    file.release();
    Ok(())
}

fn reader_loop(
    file: OpenFile,
    expected: u64,
    chunk: usize,
    stats: Arc<TransferStats>,
    peers: Arc<Vec<Signal>>,
) -> rwdev::Result<()> {
    let mut buf = vec![0u8; chunk];

    while stats.read.load(Ordering::Relaxed) < expected {
        let mut out = SliceWriter::new(&mut buf);
        match file.read(&mut out, false) {
            Ok(n) => {
                stats.read_sum.fetch_add(byte_sum(&buf[..n]), Ordering::Relaxed);
                let before = stats.read.fetch_add(n as u64, Ordering::Relaxed);
                if before + n as u64 >= expected {
                    // Stream habis: reader lain yang masih blocked dibangunkan
                    peers.iter().for_each(Signal::raise);
                }
            }
            Err(Error::Interrupted) => break,
            Err(e) => return Err(e),
        }
    }

    debug!(minor = file.minor(), "reader finished");
    file.release();
    Ok(())
}

struct DeviceRun {
    minor: u32,
    stats: Arc<TransferStats>,
    expected: u64,
}

fn split(total: u64, parts: usize) -> impl Iterator<Item = u64> {
    let parts = parts as u64;
    (0..parts).map(move |i| total / parts + u64::from(i < total % parts))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.chunk == 0 || cli.writers == 0 || cli.readers == 0 {
        return Err("--chunk, --writers and --readers must be at least 1".into());
    }

    let table = DeviceTable::init(&cli.config)?;

    println!("🚀 rwdev - Circular Buffer Devices");
    println!("==================================\n");
    println!(
        "  Devices:  {} (major {}, minors {}..{})",
        table.len(),
        table.major(),
        table.minor_base(),
        table.minor_base() as usize + table.len()
    );
    println!("  Capacity: {} bytes", cli.config.buffer_capacity);
    println!(
        "  Workers:  {} writer(s), {} reader(s) per device\n",
        cli.writers, cli.readers
    );

    // === PHASE 1: Open semua file sebelum ada transfer ===
    let mut runs = Vec::new();
    let mut pending = Vec::new();
    for device in table.iter() {
        let minor = device.minor();
        let writers = (0..cli.writers)
            .map(|_| table.open(minor, OpenMode::WriteOnly))
            .collect::<rwdev::Result<Vec<_>>>()?;
        let readers = (0..cli.readers)
            .map(|_| table.open(minor, OpenMode::ReadOnly))
            .collect::<rwdev::Result<Vec<_>>>()?;
        runs.push(DeviceRun {
            minor,
            stats: Arc::new(TransferStats::default()),
            expected: cli.bytes,
        });
        pending.push((writers, readers));
    }

    // === PHASE 2: Spawn workers ===
    let start = Instant::now();
    let mut all_signals = Vec::new();
    let mut handles: Vec<JoinHandle<rwdev::Result<()>>> = Vec::new();

    for (run, (writers, readers)) in runs.iter().zip(pending) {
        let peers: Arc<Vec<Signal>> =
            Arc::new(readers.iter().map(|f| f.signal().clone()).collect());
        all_signals.extend(writers.iter().map(|f| f.signal().clone()));
        all_signals.extend(peers.iter().cloned());

        let quotas = split(cli.bytes, cli.writers);
        for ((i, file), quota) in writers.into_iter().enumerate().zip(quotas) {
            let stats = Arc::clone(&run.stats);
            let seed = ((run.minor as u64) << 32) | i as u64;
            let chunk = cli.chunk;
            handles.push(thread::spawn(move || {
                writer_loop(file, seed, quota, chunk, stats)
            }));
        }
        for file in readers {
            let stats = Arc::clone(&run.stats);
            let peers = Arc::clone(&peers);
            let (expected, chunk) = (run.expected, cli.chunk);
            handles.push(thread::spawn(move || {
                reader_loop(file, expected, chunk, stats, peers)
            }));
        }
    }

    // === PHASE 3: Tunggu, teruskan SIGINT ke semua caller yang blocked ===
    let mut interrupted = false;
    while !handles.iter().all(JoinHandle::is_finished) {
        if !interrupted && SIGINT_RECEIVED.load(Ordering::SeqCst) {
            warn!("SIGINT received, interrupting blocked callers");
            all_signals.iter().for_each(Signal::raise);
            interrupted = true;
        }
        thread::sleep(Duration::from_millis(10));
    }

    let mut failures = 0;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                eprintln!("⚠️ worker error: {}", e);
                failures += 1;
            }
            Err(_) => {
                eprintln!("⚠️ worker panicked");
                failures += 1;
            }
        }
    }
    let elapsed = start.elapsed();

    // === PHASE 4: Report ===
    println!("📊 Transfer Report ({:.3}s)", elapsed.as_secs_f64());
    println!("-----------------------------");
    let mut total_read = 0u64;
    let mut mismatched = 0;
    for run in &runs {
        let written = run.stats.written.load(Ordering::Relaxed);
        let read = run.stats.read.load(Ordering::Relaxed);
        let ok = written == read
            && run.stats.written_sum.load(Ordering::Relaxed)
                == run.stats.read_sum.load(Ordering::Relaxed);
        total_read += read;
        if !ok {
            mismatched += 1;
        }
        println!(
            "  [{}] written: {:>10}  read: {:>10}  {}",
            table.device_number(run.minor)?,
            written,
            read,
            if ok { "✅" } else { "❌" }
        );
    }
    println!(
        "\n  Throughput: {:.2} MB/sec",
        total_read as f64 / elapsed.as_secs_f64() / 1_000_000.0
    );

    let leaked = table.teardown();
    info!(leaked, "shutdown complete");

    if interrupted {
        println!("\n⚠️  Interrupted before completion");
        return Ok(());
    }
    if failures > 0 || mismatched > 0 {
        return Err(format!(
            "{} worker failure(s), {} device mismatch(es)",
            failures, mismatched
        )
        .into());
    }

    println!("\n✅ All devices conserved their byte streams");
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    install_sigint_handler();

    if let Err(e) = run(cli) {
        eprintln!("❌ rwdev error: {}", e);
        std::process::exit(1);
    }
}
