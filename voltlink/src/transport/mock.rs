/*!
Scripted transport for engine tests.
*/

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use voltlink_shared::Frame;

use super::{LinkError, NotificationRx, NotificationTx, Transport};

type Responder = Box<dyn FnMut(&Frame) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct Shared {
    written: Vec<Frame>,
    inbound: Option<NotificationTx>,
    connected: bool,
    disconnects: usize,
}

/// Test-side view of a [`MockTransport`]
#[derive(Clone, Default)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockHandle {
    /// Frames written so far, decoded
    pub fn written(&self) -> Vec<Frame> {
        self.shared.lock().unwrap().written.clone()
    }

    /// Deliver a raw notification buffer
    pub fn inject(&self, data: Vec<u8>) {
        if let Some(tx) = self.shared.lock().unwrap().inbound.as_ref() {
            let _ = tx.send(data);
        }
    }

    /// Simulate the peer dropping off
    pub fn drop_link(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.connected = false;
        shared.inbound = None;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().unwrap().connected
    }

    /// Times the engine released the link
    pub fn disconnects(&self) -> usize {
        self.shared.lock().unwrap().disconnects
    }
}

/// Records every write and optionally answers with scripted notifications
pub struct MockTransport {
    handle: MockHandle,
    responder: Option<Responder>,
    connect_error: Option<LinkError>,
    connect_delay: Option<Duration>,
    subscribe_error: Option<LinkError>,
    write_error: Option<LinkError>,
}

impl MockTransport {
    pub fn new() -> (Self, MockHandle) {
        let handle = MockHandle::default();
        let transport = Self {
            handle: handle.clone(),
            responder: None,
            connect_error: None,
            connect_delay: None,
            subscribe_error: None,
            write_error: None,
        };
        (transport, handle)
    }

    /// Answer each written frame with the returned notification buffers
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&Frame) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn failing_connect(mut self, err: LinkError) -> Self {
        self.connect_error = Some(err);
        self
    }

    /// Take this long to establish the link
    pub fn slow_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn failing_subscribe(mut self, err: LinkError) -> Self {
        self.subscribe_error = Some(err);
        self
    }

    pub fn failing_write(mut self, err: LinkError) -> Self {
        self.write_error = Some(err);
        self
    }
}

impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), LinkError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.connect_error.clone() {
            return Err(err);
        }
        self.handle.shared.lock().unwrap().connected = true;
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<NotificationRx, LinkError> {
        if let Some(err) = self.subscribe_error.clone() {
            return Err(err);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.handle.shared.lock().unwrap().inbound = Some(tx);
        Ok(rx)
    }

    async fn write(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        if let Some(err) = self.write_error.clone() {
            return Err(err);
        }
        let frame = Frame::parse_verified(frame).map_err(LinkError::write)?;
        let replies = match self.responder.as_mut() {
            Some(responder) => responder(&frame),
            None => Vec::new(),
        };

        let mut shared = self.handle.shared.lock().unwrap();
        shared.written.push(frame);
        if let Some(tx) = shared.inbound.as_ref() {
            for reply in replies {
                let _ = tx.send(reply);
            }
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    async fn disconnect(&mut self) {
        self.handle.drop_link();
        self.handle.shared.lock().unwrap().disconnects += 1;
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
