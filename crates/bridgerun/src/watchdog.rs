//! # Watchdog
//!
//! Bounds the lifetime of the link to the lifetime of the script's main logic.
//! The watchdog polls a [`Liveness`] handle; once the matching [`LivenessToken`]
//! is dropped (the thread holding it returned or unwound) it sends the single
//! `exit!` request, and the service loop ends when the host acknowledges it.

use std::sync::Arc;
use std::sync::Weak;

use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;

use crate::link::LinkState;
use crate::link::Shared;

/// Held by the main line of execution for as long as it runs.
pub struct LivenessToken {
    _alive: Arc<()>,
}

/// Observes a [`LivenessToken`] without keeping it alive.
#[derive(Clone)]
pub struct Liveness {
    token: Weak<()>,
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        self.token.strong_count() > 0
    }
}

/// Creates a connected token and liveness handle.
pub fn liveness() -> (LivenessToken, Liveness) {
    let alive = Arc::new(());
    let liveness = Liveness {
        token: Arc::downgrade(&alive),
    };
    (LivenessToken { _alive: alive }, liveness)
}

pub(crate) async fn run(shared: Arc<Shared>, liveness: Liveness) {
    let poll = shared.config().watchdog_poll();
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!("watchdog polling every {:?}", poll);

    loop {
        ticker.tick().await;
        if shared.state() != LinkState::Running {
            debug!("watchdog stopping, link is {:?}", shared.state());
            return;
        }
        if !liveness.is_alive() {
            info!("script main thread finished");
            shared.request_exit();
            return;
        }
    }
}
