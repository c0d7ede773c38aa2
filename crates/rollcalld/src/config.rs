use std::path::PathBuf;
use std::time::Duration;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    System,
    Session,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Face extractor program.
    pub extractor_program: String,
    /// Extra arguments passed to the extractor program.
    pub extractor_args: Vec<String>,
    /// Timeout in seconds for one extractor run.
    pub extractor_timeout_secs: u64,
    /// Bus to serve on (default: system).
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("rollcall.db"));

        // ROLLCALL_EXTRACTOR is a command line: program followed by arguments.
        let command = var("ROLLCALL_EXTRACTOR").unwrap_or_default();
        let mut words = command.split_whitespace().map(str::to_string);
        let extractor_program = words
            .next()
            .unwrap_or_else(|| "rollcall-extract".to_string());
        let extractor_args = words.collect();

        let bus = match var("ROLLCALL_BUS").as_deref() {
            Some("session") => BusKind::Session,
            _ => BusKind::System,
        };

        Self {
            db_path,
            extractor_program,
            extractor_args,
            extractor_timeout_secs: var("ROLLCALL_EXTRACTOR_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(10),
            bus,
        }
    }

    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor_timeout_secs)
    }
}
