//! Listener that reads BaseStation lines from a TCP endpoint.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use feedhub_core::config::ReceiverConfig;
use feedhub_core::events::EventHub;
use feedhub_core::listener::{Listener, ListenerFactory};
use feedhub_core::message::{FeedMessage, ListenerEvent};
use feedhub_core::types::{ConnectionStatus, FeedError, Result};

use crate::sbs::parse_line;

/// Delay between connection attempts while auto-reconnect is on.
pub const RECONNECT_DELAY_SECONDS: u64 = 5;

struct Shared {
    receiver_id: i32,
    config: RwLock<ReceiverConfig>,
    status: Mutex<ConnectionStatus>,
    events: EventHub<ListenerEvent>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        {
            let mut current = self.status.lock();
            if *current == status {
                return;
            }
            *current = status;
        }
        debug!(receiver_id = self.receiver_id, status = status.as_str(), "listener status changed");
        self.events.publish(&ListenerEvent::ConnectionStateChanged(status));
    }

    fn raise(&self, error: FeedError) {
        self.events.publish(&ListenerEvent::ExceptionCaught(Arc::new(error)));
    }

    fn handle_line(&self, line: &str) {
        match parse_line(line, self.receiver_id) {
            Some(message) => {
                let feed_message = FeedMessage {
                    is_satcom_feed: self.config.read().is_satcom_feed,
                    ..FeedMessage::new(message)
                };
                self.events.publish(&ListenerEvent::Message(feed_message));
            }
            None => trace!(receiver_id = self.receiver_id, line, "ignored line"),
        }
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        let (address, auto_reconnect) = {
            let config = shared.config.read();
            (config.address.clone(), config.auto_reconnect)
        };
        shared.set_status(ConnectionStatus::Connecting);
        match TcpStream::connect(&address).await {
            Ok(stream) => {
                info!(receiver_id = shared.receiver_id, %address, "connected");
                shared.set_status(ConnectionStatus::Connected);
                let mut lines = BufReader::new(stream).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => shared.handle_line(&line),
                        Ok(None) => {
                            info!(receiver_id = shared.receiver_id, %address, "connection closed by source");
                            break;
                        }
                        Err(e) => {
                            warn!(receiver_id = shared.receiver_id, %address, error = %e, "read failed");
                            shared.raise(FeedError::Io(e));
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(receiver_id = shared.receiver_id, %address, error = %e, "connect failed");
            }
        }

        if !auto_reconnect {
            shared.set_status(ConnectionStatus::Disconnected);
            break;
        }
        shared.set_status(ConnectionStatus::Reconnecting);
        sleep(Duration::from_secs(RECONNECT_DELAY_SECONDS)).await;
    }
}

pub struct TcpSbsListener {
    shared: Arc<Shared>,
    runtime: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpSbsListener {
    pub fn new(config: &ReceiverConfig, runtime: Handle) -> Self {
        TcpSbsListener {
            shared: Arc::new(Shared {
                receiver_id: config.unique_id,
                config: RwLock::new(config.clone()),
                status: Mutex::new(ConnectionStatus::Disconnected),
                events: EventHub::new(),
            }),
            runtime,
            task: Mutex::new(None),
        }
    }
}

impl Listener for TcpSbsListener {
    fn receiver_id(&self) -> i32 {
        self.shared.receiver_id
    }

    fn name(&self) -> String {
        self.shared.config.read().name.clone()
    }

    fn is_satcom_feed(&self) -> bool {
        self.shared.config.read().is_satcom_feed
    }

    fn connection_status(&self) -> ConnectionStatus {
        *self.shared.status.lock()
    }

    fn connect(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        *task = Some(self.runtime.spawn(run(self.shared.clone())));
    }

    fn disconnect(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.shared.set_status(ConnectionStatus::Disconnected);
    }

    fn apply_configuration(&self, receiver: &ReceiverConfig) {
        *self.shared.config.write() = receiver.clone();
    }

    fn events(&self) -> &EventHub<ListenerEvent> {
        &self.shared.events
    }
}

impl Drop for TcpSbsListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Builds a [`TcpSbsListener`] per receiver, spawning on the given runtime.
pub struct TcpListenerFactory {
    runtime: Handle,
}

impl TcpListenerFactory {
    pub fn new(runtime: Handle) -> Self {
        TcpListenerFactory { runtime }
    }
}

impl ListenerFactory for TcpListenerFactory {
    fn create_listener(&self, receiver: &ReceiverConfig) -> Result<Arc<dyn Listener>> {
        if receiver.address.trim().is_empty() {
            return Err(FeedError::Config(format!(
                "receiver {} has no address",
                receiver.unique_id
            )));
        }
        Ok(Arc::new(TcpSbsListener::new(receiver, self.runtime.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reads_lines_and_reports_status() {
        let server = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = server.accept().await.unwrap();
            socket
                .write_all(b"MSG,3,1,1,4840D6,1,,,,,,38000,,,52.25,3.92,,,,,,0\r\nnot a record\r\n")
                .await
                .unwrap();
            sleep(Duration::from_millis(500)).await;
        });

        let config = ReceiverConfig {
            unique_id: 4,
            name: "Local".into(),
            address,
            auto_reconnect: false,
            ..Default::default()
        };
        let factory = TcpListenerFactory::new(Handle::current());
        let listener = factory.create_listener(&config).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener.events().subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        listener.connect();

        let mut message = None;
        let mut saw_connected = false;
        while message.is_none() {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            match event {
                ListenerEvent::ConnectionStateChanged(ConnectionStatus::Connected) => saw_connected = true,
                ListenerEvent::Message(m) => message = Some(m),
                _ => {}
            }
        }
        let message = message.unwrap();
        assert!(saw_connected);
        assert_eq!(message.message.icao24, "4840D6");
        assert_eq!(message.message.receiver_id, 4);
        assert_eq!(message.message.altitude, Some(38000));

        listener.disconnect();
        assert_eq!(listener.connection_status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_factory_rejects_empty_address() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let factory = TcpListenerFactory::new(runtime.handle().clone());
        let config = ReceiverConfig {
            unique_id: 1,
            address: " ".into(),
            ..Default::default()
        };
        assert!(factory.create_listener(&config).is_err());
    }
}
