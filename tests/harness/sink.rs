//! Event sink that keeps everything it is given.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use wsbridge::{EventSink, RelayEvent};

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(SocketAddr, RelayEvent)>>,
}

impl EventSink for RecordingSink {
    fn record(&self, client: SocketAddr, event: RelayEvent) {
        self.events.lock().unwrap().push((client, event));
    }
}

impl RecordingSink {
    pub fn events(&self) -> Vec<RelayEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn terminal(&self) -> Vec<RelayEvent> {
        self.events()
            .into_iter()
            .filter(RelayEvent::is_terminal)
            .collect()
    }

    /// Wait until `count` Connections have ended; returns their terminal
    /// events.
    pub async fn wait_terminal(&self, count: usize) -> Vec<RelayEvent> {
        let poll = async {
            loop {
                let terminal = self.terminal();
                if terminal.len() >= count {
                    return terminal;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(super::WAIT, poll)
            .await
            .expect("connections did not end within the wait")
    }
}
