use std::env;

/// Runtime configuration, resolved once at startup and passed by reference.
#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: String,
    /// Base URL of the automation gateway that performs the platform calls.
    pub gateway_url: String,
    /// File the vault appends a generated encryption key to when the
    /// environment does not provide one.
    pub env_file: String,
    pub engine: EngineSettings,
}

/// Knobs for the dispatcher and scheduler.
#[derive(Clone)]
pub struct EngineSettings {
    /// Seconds between evaluation ticks for a scheduled campaign.
    pub tick_seconds: u64,
    /// Number of most recent attempts considered by the auto-pause check.
    pub failure_window: u64,
    /// Failed fraction of the window at which a campaign is auto-paused.
    pub failure_threshold: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            tick_seconds: 2,
            failure_window: 20,
            failure_threshold: 0.5,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let gateway_url = env::var("OUTFLOW_GATEWAY_URL")
            .map_err(|_| "OUTFLOW_GATEWAY_URL must be set".to_string())?;

        let listen_addr =
            env::var("OUTFLOW_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());

        let env_file = env::var("OUTFLOW_ENV_FILE").unwrap_or_else(|_| ".env.local".to_string());

        let tick_seconds = parse_var("OUTFLOW_TICK_SECONDS", 2)?;
        let failure_window = parse_var("OUTFLOW_FAILURE_WINDOW", 20)?;
        let failure_threshold = parse_var("OUTFLOW_FAILURE_THRESHOLD", 0.5)?;

        Ok(AppConfig {
            database_url,
            listen_addr,
            gateway_url,
            env_file,
            engine: EngineSettings {
                tick_seconds,
                failure_window,
                failure_threshold,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{name} is not a valid value: {raw}")),
        Err(_) => Ok(default),
    }
}
