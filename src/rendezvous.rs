use log::*;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

/// Delivered to a transport when a siphon finishes transferring cargo to it.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub from_siphon: String,
    pub good: String,
    pub units: i64,
}

#[derive(Debug)]
enum Message {
    TransportAvailable {
        transport: String,
        cargo_units: i64,
        notify: mpsc::Sender<TransferEvent>,
    },
    SiphonRequest {
        siphon: String,
        assign: oneshot::Sender<String>,
    },
    TransferComplete {
        siphon: String,
        transport: String,
        good: String,
        units: i64,
    },
    Terminate,
}

/// Pairs siphon ships that are full of gas with transports waiting at the
/// gas giant. Single consumer loop over one command channel; same-type
/// events are FIFO, no ordering is assumed across types.
///
/// Matching: an arriving transport takes the oldest waiting siphon; an
/// arriving siphon request takes the available transport with the highest
/// tracked cargo, so one transport fills completely before a fresher one
/// is touched.
pub struct GasRendezvous {
    tx: mpsc::Sender<Message>,
    inner: Arc<Mutex<Inner>>,
    transfers_completed: Arc<AtomicU64>,
}

struct Inner {
    rx: mpsc::Receiver<Message>,
    available_transports: VecDeque<String>,
    waiting_siphons: VecDeque<(String, oneshot::Sender<String>)>,
    transport_cargo: BTreeMap<String, i64>,
    transport_notify: BTreeMap<String, mpsc::Sender<TransferEvent>>,
    transfers_completed: Arc<AtomicU64>,
}

impl Default for GasRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl GasRendezvous {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Message>(1);
        let transfers_completed = Arc::new(AtomicU64::new(0));
        let inner = Inner {
            rx,
            available_transports: VecDeque::new(),
            waiting_siphons: VecDeque::new(),
            transport_cargo: BTreeMap::new(),
            transport_notify: BTreeMap::new(),
            transfers_completed: transfers_completed.clone(),
        };
        Self {
            tx,
            inner: Arc::new(Mutex::new(inner)),
            transfers_completed,
        }
    }

    pub fn transfers_completed(&self) -> u64 {
        self.transfers_completed.load(Ordering::Relaxed)
    }

    /// Transport announces it is idle at the gas giant with `cargo_units`
    /// aboard. Returns the stream of transfer events for this stint; the
    /// transport waits on it until cargo arrives.
    pub async fn announce_transport(
        &self,
        transport: &str,
        cargo_units: i64,
    ) -> mpsc::Receiver<TransferEvent> {
        let (notify, rx) = mpsc::channel::<TransferEvent>(8);
        // on a shut-down rendezvous the sender is dropped and the returned
        // stream reads as closed, which workers treat as cancellation
        let _ = self
            .tx
            .send(Message::TransportAvailable {
                transport: transport.to_string(),
                cargo_units,
                notify,
            })
            .await;
        rx
    }

    /// Siphon announces "cargo full, need a transport". Blocks until the
    /// coordinator pairs it with one and returns the transport's symbol,
    /// or None when the rendezvous shut down first.
    pub async fn request_transport(&self, siphon: &str) -> Option<String> {
        let (assign, rx) = oneshot::channel::<String>();
        self.tx
            .send(Message::SiphonRequest {
                siphon: siphon.to_string(),
                assign,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Either side reports the cargo transfer finished.
    pub async fn transfer_complete(&self, siphon: &str, transport: &str, good: &str, units: i64) {
        let _ = self
            .tx
            .send(Message::TransferComplete {
                siphon: siphon.to_string(),
                transport: transport.to_string(),
                good: good.to_string(),
                units,
            })
            .await;
    }

    pub async fn terminate(&self) {
        let _ = self.tx.send(Message::Terminate).await;
    }

    /// The coordinator loop. Runs until Terminate or channel closure.
    pub async fn run(&self) {
        let mut inner = self.inner.lock().await;
        inner.run().await;
    }
}

impl Inner {
    async fn run(&mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                Message::TransportAvailable {
                    transport,
                    cargo_units,
                    notify,
                } => {
                    debug!(
                        "rendezvous: transport {} available ({} units aboard)",
                        transport, cargo_units
                    );
                    self.transport_cargo.insert(transport.clone(), cargo_units);
                    self.transport_notify.insert(transport.clone(), notify);
                    if let Some((siphon, assign)) = self.waiting_siphons.pop_front() {
                        debug!("rendezvous: pairing waiting siphon {} -> {}", siphon, transport);
                        if assign.send(transport).is_err() {
                            warn!("rendezvous: siphon {} gone before assignment", siphon);
                        }
                    } else {
                        self.available_transports.push_back(transport);
                    }
                }
                Message::SiphonRequest { siphon, assign } => {
                    debug!("rendezvous: siphon {} requests transport", siphon);
                    // fill the fullest transport first
                    let best = self
                        .available_transports
                        .iter()
                        .enumerate()
                        .max_by_key(|(_, t)| self.transport_cargo.get(*t).copied().unwrap_or(0))
                        .map(|(i, _)| i);
                    match best {
                        Some(index) => {
                            let transport = self.available_transports.remove(index).unwrap();
                            debug!("rendezvous: pairing {} -> {}", siphon, transport);
                            if assign.send(transport).is_err() {
                                warn!("rendezvous: siphon {} gone before assignment", siphon);
                            }
                        }
                        None => {
                            self.waiting_siphons.push_back((siphon, assign));
                        }
                    }
                }
                Message::TransferComplete {
                    siphon,
                    transport,
                    good,
                    units,
                } => {
                    self.transfers_completed.fetch_add(1, Ordering::Relaxed);
                    if let Some(cargo) = self.transport_cargo.get_mut(&transport) {
                        *cargo += units;
                    }
                    debug!(
                        "rendezvous: transfer complete {} -> {} ({} {})",
                        siphon, transport, units, good
                    );
                    if let Some(notify) = self.transport_notify.get(&transport) {
                        let event = TransferEvent {
                            from_siphon: siphon,
                            good,
                            units,
                        };
                        if notify.try_send(event).is_err() {
                            debug!(
                                "rendezvous: transport {} not listening for transfer event",
                                transport
                            );
                        }
                    }
                }
                Message::Terminate => break,
            }
        }
        // wake anyone still parked on an assignment channel
        for (siphon, _assign) in self.waiting_siphons.drain(..) {
            debug!("rendezvous: dropping waiting siphon {}", siphon);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_fullest_transport_is_assigned_first() {
        let rendezvous = Arc::new(GasRendezvous::new());
        let run_handle = {
            let rendezvous = rendezvous.clone();
            tokio::spawn(async move { rendezvous.run().await })
        };

        let _t1_rx = rendezvous.announce_transport("TRANSPORT-1", 0).await;
        let mut t2_rx = rendezvous.announce_transport("TRANSPORT-2", 30).await;

        let assigned = rendezvous.request_transport("SIPHON-1").await.unwrap();
        assert_eq!(assigned, "TRANSPORT-2");

        rendezvous
            .transfer_complete("SIPHON-1", "TRANSPORT-2", "LIQUID_HYDROGEN", 10)
            .await;
        let event = t2_rx.recv().await.unwrap();
        assert_eq!(event.from_siphon, "SIPHON-1");
        assert_eq!(event.units, 10);
        assert_eq!(rendezvous.transfers_completed(), 1);

        rendezvous.terminate().await;
        run_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_waiting_siphon_paired_on_arrival() {
        let rendezvous = Arc::new(GasRendezvous::new());
        let run_handle = {
            let rendezvous = rendezvous.clone();
            tokio::spawn(async move { rendezvous.run().await })
        };

        let request = {
            let rendezvous = rendezvous.clone();
            tokio::spawn(async move { rendezvous.request_transport("SIPHON-1").await.unwrap() })
        };
        // give the request time to queue before any transport shows up
        tokio::task::yield_now().await;

        let _rx = rendezvous.announce_transport("TRANSPORT-1", 0).await;
        let assigned = request.await.unwrap();
        assert_eq!(assigned, "TRANSPORT-1");

        rendezvous.terminate().await;
        run_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_every_request_is_eventually_paired() {
        // one transport cycling, three siphons requesting repeatedly:
        // no request may starve
        let rendezvous = Arc::new(GasRendezvous::new());
        let run_handle = {
            let rendezvous = rendezvous.clone();
            tokio::spawn(async move { rendezvous.run().await })
        };

        let transport = {
            let rendezvous = rendezvous.clone();
            tokio::spawn(async move {
                // announce, wait for the siphon's transfer, repeat
                for round in 0..9 {
                    let mut rx = rendezvous.announce_transport("TRANSPORT-1", round * 10).await;
                    rx.recv().await.unwrap();
                }
            })
        };

        let mut siphons = vec![];
        for i in 0..3 {
            let rendezvous = rendezvous.clone();
            siphons.push(tokio::spawn(async move {
                let name = format!("SIPHON-{}", i);
                for _ in 0..3 {
                    let transport = rendezvous.request_transport(&name).await.unwrap();
                    rendezvous
                        .transfer_complete(&name, &transport, "LIQUID_NITROGEN", 10)
                        .await;
                }
            }));
        }
        for siphon in siphons {
            siphon.await.unwrap();
        }
        transport.await.unwrap();
        assert_eq!(rendezvous.transfers_completed(), 9);

        rendezvous.terminate().await;
        run_handle.await.unwrap();
    }
}
