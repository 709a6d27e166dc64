//! The debounced "new content available" flag.

use feedsync_common::util::PositiveDuration;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep_until},
};
use tracing::debug;

#[derive(Debug)]
enum Signal {
    Notify,
    Dismiss(oneshot::Sender<bool>),
}

/// Shows itself `debounce` after the first peer event of a burst and hides
/// again after `auto_hide` unless more events keep arriving.
#[derive(Clone, Debug)]
pub struct NewContentIndicator {
    signals: mpsc::UnboundedSender<Signal>,
    visible: watch::Receiver<bool>,
}

impl NewContentIndicator {
    #[must_use]
    pub fn spawn(debounce: PositiveDuration, auto_hide: PositiveDuration) -> Self {
        let (signals, receiver) = mpsc::unbounded_channel();
        let (visible_sender, visible) = watch::channel(false);

        tokio::spawn(run(receiver, visible_sender, debounce, auto_hide));

        Self { signals, visible }
    }

    pub fn notify(&self) {
        // The actor only stops once every handle is gone.
        let _ = self.signals.send(Signal::Notify);
    }

    /// Hides the indicator and cancels a pending show. Returns whether it was visible.
    pub async fn dismiss(&self) -> bool {
        let (reply, response) = oneshot::channel();
        if self.signals.send(Signal::Dismiss(reply)).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.visible.clone()
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut signals: mpsc::UnboundedReceiver<Signal>,
    visible: watch::Sender<bool>,
    debounce: PositiveDuration,
    auto_hide: PositiveDuration,
) {
    let mut show_at: Option<Instant> = None;
    let mut hide_at: Option<Instant> = None;

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                None => break,
                Some(Signal::Notify) => {
                    if *visible.borrow() {
                        hide_at = Some(Instant::now() + auto_hide.get());
                    } else if show_at.is_none() {
                        show_at = Some(Instant::now() + debounce.get());
                    }
                }
                Some(Signal::Dismiss(reply)) => {
                    show_at = None;
                    hide_at = None;
                    let was_visible = visible.send_replace(false);
                    let _ = reply.send(was_visible);
                }
            },
            () = deadline(show_at) => {
                show_at = None;
                hide_at = Some(Instant::now() + auto_hide.get());
                visible.send_replace(true);
                debug!("Showing new content indicator");
            }
            () = deadline(hide_at) => {
                hide_at = None;
                visible.send_replace(false);
                debug!("New content indicator hid itself");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::realtime::indicator::NewContentIndicator;
    use feedsync_common::util::PositiveDuration;
    use std::time::Duration;
    use tokio::time::advance;

    fn indicator() -> NewContentIndicator {
        NewContentIndicator::spawn(
            PositiveDuration::new_unchecked(Duration::from_millis(1_500)),
            PositiveDuration::new_unchecked(Duration::from_secs(8)),
        )
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shows_after_debounce_and_hides_itself() {
        let indicator = indicator();

        indicator.notify();
        settle().await;
        advance(Duration::from_millis(1_000)).await;
        indicator.notify();
        settle().await;
        assert!(!indicator.is_visible());

        advance(Duration::from_millis(600)).await;
        settle().await;
        assert!(indicator.is_visible());

        advance(Duration::from_secs(8)).await;
        settle().await;
        assert!(!indicator.is_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_cancels_pending_show() {
        let indicator = indicator();

        indicator.notify();
        settle().await;
        assert!(!indicator.dismiss().await);

        advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(!indicator.is_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_reports_visible_indicator() {
        let indicator = indicator();
        let mut visible = indicator.subscribe();

        indicator.notify();
        visible.wait_for(|visible| *visible).await.unwrap();

        assert!(indicator.dismiss().await);
        assert!(!indicator.is_visible());
    }
}
