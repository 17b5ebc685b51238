#![allow(dead_code)]

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use pybridge::infrastructure::{init_logging, LogConfig};
use pybridge::{ArrayInterop, Bridge, BridgeConfig, Record};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;

/// Reloads and module switches touch shared interpreter state.
static SERIAL: Mutex<()> = parking_lot::const_mutex(());

/// Keeps the non-blocking writer alive for the whole test binary.
static LOG_GUARD: OnceCell<Option<WorkerGuard>> = OnceCell::new();

pub const FIXTURE: &str = "bridge_fixture";

pub fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

/// Test binaries share one interpreter, so shutdown must never finalize it.
pub fn fixture_config() -> BridgeConfig {
    BridgeConfig::for_module(FIXTURE)
        .with_search_path(fixture_dir())
        .with_array_interop(ArrayInterop::Memoryview)
        .with_finalize_on_shutdown(false)
}

pub fn serial() -> MutexGuard<'static, ()> {
    LOG_GUARD.get_or_init(|| init_logging(LogConfig::new().with_level(Level::WARN)));
    SERIAL.lock()
}

pub fn bridge() -> (MutexGuard<'static, ()>, Bridge) {
    let guard = serial();
    let bridge = Bridge::with_config(&fixture_config()).expect("fixture module loads");
    // Start each test with a clean error indicator.
    let _ = bridge.report();
    (guard, bridge)
}

/// Mirrors the `if8sdh2i` struct format with its implicit padding spelled out.
#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub a: i32,
    pub b: f32,
    pub c: [u8; 8],
    pub d: f64,
    pub e: i16,
    pub pad: i16,
    pub f: [i32; 2],
}

unsafe impl Record for Sample {}

pub const SAMPLE_FORMAT: &str = "if8sdh2i";

pub fn sample() -> Sample {
    Sample {
        a: 1,
        b: 2.2,
        c: *b"aaaaaaaa",
        d: 3.45,
        e: 6,
        pad: 0,
        f: [0, 1],
    }
}
