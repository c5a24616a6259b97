use crate::auction::backend::{FavoriteStore, FavoriteUpdate};
use crate::auction::events::{SessionEvent, SessionEvents};
use crate::auction::types::{FavoriteDelivery, FavoriteState};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct FavoriteInner {
    state: FavoriteState,
    confirmed: bool,
    /// Set once the stored value is known, from the initial lookup or a successful write.
    known: bool,
    generation: u64,
}

/// Optimistic favorite flag. Toggles inside the debounce window collapse into one store call.
pub struct FavoriteToggle {
    inner: Arc<Mutex<FavoriteInner>>,
    intents: watch::Sender<u64>,
    events: SessionEvents,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

struct FavoriteWorker {
    inner: Arc<Mutex<FavoriteInner>>,
    store: Arc<dyn FavoriteStore>,
    debounce: Duration,
    events: SessionEvents,
    intents: watch::Receiver<u64>,
    cancel: CancellationToken,
}

impl FavoriteToggle {
    pub fn spawn(
        auction_id: String,
        user_id: String,
        is_favorite: bool,
        store: Arc<dyn FavoriteStore>,
        debounce: Duration,
        events: SessionEvents,
        cancel: CancellationToken,
    ) -> Self {
        let inner = Arc::new(Mutex::new(FavoriteInner {
            state: FavoriteState {
                auction_id,
                user_id,
                is_favorite,
                delivery_state: FavoriteDelivery::Confirmed,
            },
            confirmed: is_favorite,
            known: false,
            generation: 0,
        }));
        let (intents, receiver) = watch::channel(0);

        let worker = FavoriteWorker {
            inner: inner.clone(),
            store,
            debounce,
            events: events.clone(),
            intents: receiver,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            inner,
            intents,
            events,
            worker: Mutex::new(Some(handle)),
            cancel,
        }
    }

    pub fn state(&self) -> FavoriteState {
        self.inner.lock().state.clone()
    }

    /// Records the stored value read after open. Ignored once a write has confirmed a newer one.
    pub fn seed(&self, is_favorite: bool) {
        let state = {
            let mut inner = self.inner.lock();
            if inner.known {
                return;
            }
            inner.known = true;
            inner.confirmed = is_favorite;
            if inner.generation != 0 || inner.state.is_favorite == is_favorite {
                return;
            }
            inner.state.is_favorite = is_favorite;
            inner.state.clone()
        };
        self.events.emit(SessionEvent::FavoriteUpdate(state));
    }

    pub fn toggle(&self) -> FavoriteState {
        let (generation, state) = {
            let mut inner = self.inner.lock();
            inner.state.is_favorite = !inner.state.is_favorite;
            inner.state.delivery_state = FavoriteDelivery::Pending;
            inner.generation += 1;
            (inner.generation, inner.state.clone())
        };
        self.events.emit(SessionEvent::FavoriteUpdate(state.clone()));
        self.intents.send_replace(generation);
        state
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for FavoriteToggle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl FavoriteWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                changed = self.intents.changed() => if changed.is_err() { return },
            }

            // Every further toggle restarts the quiet window.
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.debounce) => break,
                    changed = self.intents.changed() => if changed.is_err() { return },
                }
            }

            let generation = *self.intents.borrow_and_update();
            let Some(update) = self.settle_or_prepare() else {
                continue;
            };

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.store.set_favorite(&update) => result,
            };

            let mut emitted = Vec::new();
            {
                let mut inner = self.inner.lock();
                match result {
                    Ok(()) => {
                        inner.confirmed = update.is_favorite;
                        inner.known = true;
                        if inner.generation == generation {
                            inner.state.delivery_state = FavoriteDelivery::Confirmed;
                            emitted.push(SessionEvent::FavoriteUpdate(inner.state.clone()));
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            auction_id = %update.auction_id,
                            %error,
                            "favorite change failed; reverting"
                        );
                        if inner.generation == generation {
                            inner.state.delivery_state = FavoriteDelivery::Reverting;
                            emitted.push(SessionEvent::FavoriteUpdate(inner.state.clone()));
                            inner.state.is_favorite = inner.confirmed;
                            inner.state.delivery_state = FavoriteDelivery::Confirmed;
                            emitted.push(SessionEvent::FavoriteUpdate(inner.state.clone()));
                            emitted.push(SessionEvent::FavoriteReverted {
                                auction_id: update.auction_id.clone(),
                                reason: error.to_string(),
                            });
                        }
                    }
                }
            }
            for event in emitted {
                self.events.emit(event);
            }
        }
    }

    /// Returns the store call to make, or settles locally when the intent matches what is stored.
    fn settle_or_prepare(&self) -> Option<FavoriteUpdate> {
        let state = {
            let mut inner = self.inner.lock();
            if inner.state.is_favorite != inner.confirmed {
                return Some(FavoriteUpdate {
                    user_id: inner.state.user_id.clone(),
                    auction_id: inner.state.auction_id.clone(),
                    is_favorite: inner.state.is_favorite,
                });
            }
            inner.state.delivery_state = FavoriteDelivery::Confirmed;
            inner.state.clone()
        };
        self.events.emit(SessionEvent::FavoriteUpdate(state));
        None
    }
}
