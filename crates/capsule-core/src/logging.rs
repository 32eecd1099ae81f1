//! Structured logging shared by every component.
//!
//! Every log event in the platform is emitted in the context of a
//! [`Scope`] — the component kind (`"cas"`, `"capsule"`, `"node"`, ...)
//! and the id of the thing it concerns — so operators can filter logs
//! per capsule, per node, or per service without grepping free text.
//! Libraries only call these macros; only the `daemon` and `surge`
//! binaries install a subscriber (see [`install_subscriber`]).

#[doc(hidden)]
pub use tracing::{event, Level};

/// Identifies what a log event is about.
#[derive(Clone, Debug)]
pub struct Scope {
    pub kind: &'static str,
    pub id: String,
}

impl Scope {
    pub fn new(kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Emit a structured log event tagged with a [`Scope`].
#[macro_export]
macro_rules! log {
    ($level:expr, $scope:expr, $($arg:tt)+) => {{
        let scope: &$crate::logging::Scope = $scope;
        $crate::logging::event!(
            $level,
            scope.kind = scope.kind,
            scope.id = scope.id.as_str(),
            $($arg)+
        );
    }};
}

#[macro_export]
macro_rules! log_error {
    ($scope:expr, $($arg:tt)+) => {
        $crate::log!($crate::logging::Level::ERROR, $scope, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($scope:expr, $($arg:tt)+) => {
        $crate::log!($crate::logging::Level::WARN, $scope, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_info {
    ($scope:expr, $($arg:tt)+) => {
        $crate::log!($crate::logging::Level::INFO, $scope, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($scope:expr, $($arg:tt)+) => {
        $crate::log!($crate::logging::Level::DEBUG, $scope, $($arg)+)
    };
}

/// Install a global `tracing` subscriber reading its filter from
/// `CAPSULE_LOG` (falling back to `info`). Binaries call this once at
/// startup; library crates never call it.
pub fn install_subscriber() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("CAPSULE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
