//! Command-line configuration for the timing daemon.

use clap::Parser;
use timing_client::SyncTuning;

/// Serve named timing objects over WebSocket, broadcasting `change` and answering `sync`.
#[derive(Parser, Debug)]
#[command(author, name = "timing-serverd", version, about, long_about = None)]
pub struct Cli {
    /// Fixed offset (milliseconds) applied to this server's reference clock relative to local
    /// wall clock time, advertised in every `sync` response's `delta` field.
    #[arg(default_value_t = 0)]
    pub delta: i64,

    /// Address to bind the WebSocket listener to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Port to bind the WebSocket listener to.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Emit structured log messages. Default to human readable.
    #[arg(short, long)]
    pub json_output: bool,

    /// Recommended client batch interval (milliseconds) between steady-state sync rounds. The
    /// wire protocol has no channel to push this to clients; it is logged at startup so an
    /// operator can mirror it in client configuration.
    #[arg(long)]
    pub sync_batch_interval_ms: Option<u64>,

    /// Recommended number of samples a client gathers during its initialization burst.
    #[arg(long)]
    pub sync_init_count: Option<usize>,

    /// Recommended number of retry attempts a client makes per steady-state batch.
    #[arg(long)]
    pub sync_max_attempts: Option<u32>,
}

impl Cli {
    /// The [`SyncTuning`] this server recommends to clients, built from whichever `--sync-*`
    /// flags were supplied (unset ones fall back to [`SyncTuning::default`]).
    pub fn recommended_sync_tuning(&self) -> SyncTuning {
        let mut tuning = SyncTuning::default();
        if let Some(n) = self.sync_init_count {
            tuning.n_init = n;
        }
        if let Some(ms) = self.sync_batch_interval_ms {
            tuning.batch_interval_ms = ms;
        }
        if let Some(n) = self.sync_max_attempts {
            tuning.max_attempts = n;
        }
        tuning
    }
}
