//! The background activity that reconnects on disconnection (with backoff and escalating
//! notification) and keeps an idle connection alive with periodic pings.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::event::Notifier;
use crate::session::Session;

const TICK: Duration = Duration::from_secs(5);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const NOTIFY_EVERY: u32 = 5;

/// A cooperative stop flag, polled once per second within the 5 s tick.
#[derive(Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        ShutdownHandle(Arc::new(AtomicBool::new(false)))
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn should_stop(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run the watchdog loop until `shutdown` is signalled. Intended to be spawned as its own task,
/// in the style of a long-lived polling service.
pub async fn run(session: Session, notifier: Option<Arc<dyn Notifier>>, ping_interval: Duration, shutdown: ShutdownHandle) {
    let mut retries: u32 = 1;

    loop {
        if wait_tick(&shutdown).await {
            return;
        }

        if !session.is_connected().await {
            retries = reconnect_loop(&session, notifier.as_deref(), retries, &shutdown).await;
            if shutdown.should_stop() {
                return;
            }
            continue;
        }

        if session.seconds_since_last_recv().await > ping_interval {
            if session.send_keepalive().await.is_err() {
                retries = reconnect_loop(&session, notifier.as_deref(), retries, &shutdown).await;
            }
        }
    }
}

/// Wait out the 5 s tick, polling the shutdown flag once per second. Returns `true` if shutdown
/// was observed.
async fn wait_tick(shutdown: &ShutdownHandle) -> bool {
    let mut waited = Duration::ZERO;
    while waited < TICK {
        if shutdown.should_stop() {
            return true;
        }
        let step = std::cmp::min(Duration::from_secs(1), TICK - waited);
        tokio::time::sleep(step).await;
        waited += step;
    }
    shutdown.should_stop()
}

/// Repeatedly call `reconnect`, backing off 5 s between attempts and escalating a notification
/// every fifth consecutive failure, until it succeeds or shutdown is signalled. Returns the
/// retry counter to resume from (reset to 1 on success).
async fn reconnect_loop(
    session: &Session,
    notifier: Option<&dyn Notifier>,
    mut retries: u32,
    shutdown: &ShutdownHandle,
) -> u32 {
    loop {
        match session.reconnect().await {
            Ok(()) => {
                if let Some(notifier) = notifier {
                    notifier.send_communication_alert_clear().await;
                }
                return 1;
            }
            Err(err) => {
                tracing::warn!(error = %err, retries, "reconnect failed");
                if retries % NOTIFY_EVERY == 0 {
                    if let Some(notifier) = notifier {
                        notifier.send_communication_alert(retries).await;
                    }
                }
                retries += 1;

                let mut waited = Duration::ZERO;
                while waited < RECONNECT_BACKOFF {
                    if shutdown.should_stop() {
                        return retries;
                    }
                    let step = std::cmp::min(Duration::from_secs(1), RECONNECT_BACKOFF - waited);
                    tokio::time::sleep(step).await;
                    waited += step;
                }
            }
        }
    }
}
