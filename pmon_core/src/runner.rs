//! Single-consumer runner thread.
//!
//! The thread owns the `AggregatorContext`; snapshots, reconnects and
//! shutdown arrive over a channel, ticks come from a crossbeam ticker. The
//! context is therefore never touched concurrently.
//!
//! Each `RunnerHandle` owns exactly one thread, shut down and joined on drop.

use crate::config::RunnerCfg;
use crate::context::AggregatorContext;
use crate::error::MonitorError;
use crate::snapshot::Snapshot;
use crate::util::effective_tick_ms;
use crossbeam_channel as xch;
use std::time::Duration;

#[derive(Debug)]
pub enum Command {
    Snapshot(Snapshot),
    /// Force a time-only pass now.
    Tick,
    /// The device connection was re-established: reload persisted state.
    Reconnect,
    Shutdown,
}

pub struct RunnerHandle {
    tx: xch::Sender<Command>,
    join_handle: Option<std::thread::JoinHandle<AggregatorContext>>,
}

/// Move `ctx` onto a dedicated thread and return its command handle.
pub fn spawn(mut ctx: AggregatorContext, cfg: RunnerCfg) -> RunnerHandle {
    let (tx, rx) = xch::unbounded::<Command>();
    let ticker = xch::tick(Duration::from_millis(effective_tick_ms(cfg.tick_ms)));

    let join_handle = std::thread::spawn(move || {
        loop {
            xch::select! {
                recv(rx) -> msg => match msg {
                    Ok(Command::Snapshot(snap)) => {
                        ctx.apply_snapshot(&snap);
                    }
                    Ok(Command::Tick) => {
                        ctx.apply_tick();
                    }
                    Ok(Command::Reconnect) => {
                        tracing::info!("reconnect: reloading persisted state");
                        ctx.restore();
                    }
                    Ok(Command::Shutdown) => {
                        tracing::debug!("runner received shutdown");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!("runner handle dropped, exiting thread");
                        break;
                    }
                },
                recv(ticker) -> _ => {
                    ctx.apply_tick();
                }
            }
        }
        ctx.flush();
        tracing::trace!("runner thread exiting cleanly");
        ctx
    });

    RunnerHandle {
        tx,
        join_handle: Some(join_handle),
    }
}

impl RunnerHandle {
    pub fn send(&self, cmd: Command) -> Result<(), MonitorError> {
        self.tx.send(cmd).map_err(|_| MonitorError::Disconnected)
    }

    pub fn snapshot(&self, snap: Snapshot) -> Result<(), MonitorError> {
        self.send(Command::Snapshot(snap))
    }

    pub fn reconnect(&self) -> Result<(), MonitorError> {
        self.send(Command::Reconnect)
    }

    /// Stop the thread after it drains queued commands; returns the flushed context.
    pub fn shutdown(mut self) -> Result<AggregatorContext, MonitorError> {
        // a dead thread surfaces through join below
        let _ = self.tx.send(Command::Shutdown);
        let handle = self.join_handle.take().ok_or(MonitorError::Disconnected)?;
        handle.join().map_err(|_| {
            MonitorError::State("runner thread panicked".to_string())
        })
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.tx.send(Command::Shutdown);
            match handle.join() {
                Ok(_) => tracing::trace!("runner thread joined successfully"),
                Err(e) => tracing::warn!(?e, "runner thread panicked during shutdown"),
            }
        }
    }
}
