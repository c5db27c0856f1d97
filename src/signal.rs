use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative stop request shared between the signal handler and the
/// workload loops. Loops poll it at phase boundaries only.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Requests a stop on SIGUSR2 or Ctrl-C.
pub fn install_stop_handlers(stop: &StopSignal) {
    let on_interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, will stop after the current phase…");
            on_interrupt.request_stop();
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let on_usr2 = stop.clone();
        match signal(SignalKind::user_defined2()) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    if stream.recv().await.is_some() {
                        tracing::info!("Received SIGUSR2, will stop after the current phase…");
                        on_usr2.request_stop();
                    }
                });
            }
            Err(err) => tracing::warn!("Cannot listen for SIGUSR2: {}", err),
        }
    }
}
