//! Process-wide debug logging switch.
//!
//! Off by default. While off, debug messages are never formatted.

use std::fmt;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing_subscriber::EnvFilter;

pub type DebugSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Where debug messages go.
#[derive(Clone, Default)]
pub enum Debugging {
    #[default]
    Off,
    /// Forward to `tracing::debug!` under the `isobroker` target.
    Tracing,
    Custom(DebugSink),
}

impl From<bool> for Debugging {
    fn from(enable: bool) -> Self {
        if enable { Self::Tracing } else { Self::Off }
    }
}

impl fmt::Debug for Debugging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "Off"),
            Self::Tracing => write!(f, "Tracing"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

static ENABLED: AtomicBool = AtomicBool::new(false);
static SINK: RwLock<Option<DebugSink>> = RwLock::new(None);

/// Turns broker debug logging on or off, or routes it to a custom sink.
pub fn enable_debugging(debugging: impl Into<Debugging>) {
    let (enabled, sink) = match debugging.into() {
        Debugging::Off => (false, None),
        Debugging::Tracing => (true, None),
        Debugging::Custom(sink) => (true, Some(sink)),
    };
    *SINK.write().unwrap_or_else(PoisonError::into_inner) = sink;
    ENABLED.store(enabled, Ordering::Release);
}

pub fn enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Writes one debug message. Prefer `debug_log!`, which skips formatting
/// while debugging is off.
pub fn emit(args: fmt::Arguments<'_>) {
    if !enabled() {
        return;
    }
    let sink = SINK.read().unwrap_or_else(PoisonError::into_inner).clone();
    match sink {
        Some(sink) => sink(&args.to_string()),
        None => tracing::debug!(target: "isobroker", "{}", args),
    }
}

macro_rules! debug_log {
    ($($arg:tt)*) => {
        if $crate::debug::enabled() {
            $crate::debug::emit(format_args!($($arg)*));
        }
    };
}

pub(crate) use debug_log;

/// Installs a fmt subscriber filtered by `RUST_LOG`, for tests and demos.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("isobroker=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
