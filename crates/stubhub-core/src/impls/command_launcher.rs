//! CommandLauncher - 外部コマンドによるアプリケーション起動
//!
//! Runs `program args...` with `{locator}` substituted, watches the process
//! in a background task and resolves the launch ticket when it ends.
//!
//! # 学習ポイント
//! - tokio::process with piped output read by separate tasks
//! - select! over exit, cancellation and timeout
//! - bounded tail buffer for diagnostics

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::LaunchConfig;
use crate::domain::{LaunchError, LaunchId};
use crate::ports::{
    IdGenerator, LaunchOutcome, LaunchStatus, LaunchTicket, ProcessLauncher, SystemClock,
    UlidGenerator,
};

/// How long output readers may lag behind process exit.
const OUTPUT_GRACE: Duration = Duration::from_millis(200);

type OutputTail = Arc<Mutex<VecDeque<String>>>;

pub struct CommandLauncher {
    config: LaunchConfig,
    ids: Arc<dyn IdGenerator>,
    running: Arc<Mutex<HashMap<LaunchId, oneshot::Sender<()>>>>,
}

impl CommandLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self::with_id_generator(config, Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(config: LaunchConfig, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            config,
            ids,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Launches whose process is still being watched.
    pub fn running(&self) -> usize {
        self.running.lock().len()
    }

    fn spawn(&self, locator: &str) -> Result<Child, LaunchError> {
        let program = self.config.program.trim();
        if program.is_empty() {
            return Err(LaunchError::EmptyCommand);
        }
        let args = self.config.command_args(locator);
        debug!(program, ?args, "spawning launcher process");

        Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.to_string(),
                locator: locator.to_string(),
                source,
            })
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn launch(&self, locator: &str) -> Result<LaunchTicket, LaunchError> {
        let mut child = self.spawn(locator)?;
        let id = self.ids.generate_launch_id();

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        self.running.lock().insert(id, cancel_tx);

        let limit = self.config.output_buffer_lines;
        let tail: OutputTail = Arc::new(Mutex::new(VecDeque::with_capacity(limit)));
        let readers = [
            child.stdout.take().map(|out| tokio::spawn(collect(out, tail.clone(), limit))),
            child.stderr.take().map(|err| tokio::spawn(collect(err, tail.clone(), limit))),
        ];

        let timeout = self.config.timeout();
        let running = self.running.clone();
        let locator = locator.to_string();
        tokio::spawn(async move {
            let (status, exit_code) = watch(&mut child, cancel_rx, timeout).await;
            match status {
                LaunchStatus::TimedOut => warn!(%id, %locator, "launch timed out, process killed"),
                _ => debug!(%id, %locator, ?status, ?exit_code, "launch process ended"),
            }

            for reader in readers.into_iter().flatten() {
                let abort = reader.abort_handle();
                if tokio::time::timeout(OUTPUT_GRACE, reader).await.is_err() {
                    abort.abort();
                }
            }

            running.lock().remove(&id);
            let output = tail.lock().drain(..).collect();
            let _ = done_tx.send(LaunchOutcome {
                status,
                exit_code,
                output,
            });
        });

        Ok(LaunchTicket {
            id,
            completion: done_rx,
        })
    }

    async fn cancel(&self, id: LaunchId) {
        let cancel = self.running.lock().remove(&id);
        match cancel {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => debug!(%id, "cancel ignored: launch not running"),
        }
    }
}

async fn watch(
    child: &mut Child,
    cancel: oneshot::Receiver<()>,
    timeout: Option<Duration>,
) -> (LaunchStatus, Option<i32>) {
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => (LaunchStatus::Succeeded, status.code()),
            Ok(status) => (LaunchStatus::Failed, status.code()),
            Err(err) => {
                warn!(error = %err, "waiting for launch process failed");
                (LaunchStatus::Failed, None)
            }
        },
        _ = cancel => {
            let _ = child.kill().await;
            (LaunchStatus::Cancelled, None)
        }
        () = deadline => {
            let _ = child.kill().await;
            (LaunchStatus::TimedOut, None)
        }
    }
}

async fn collect(reader: impl AsyncRead + Unpin, tail: OutputTail, limit: usize) {
    if limit == 0 {
        return;
    }
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut tail = tail.lock();
        if tail.len() == limit {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}
