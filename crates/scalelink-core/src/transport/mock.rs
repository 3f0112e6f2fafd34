//! Scripted transport for tests and harnesses
//!
//! Each [`MockTransport`] replays a queue of [`MockEvent`]s. Once the queue is
//! empty, reads wait out their timeout and report `Timeout`, like an idle
//! device. A [`MockHandle`] keeps access to the queue after the transport has
//! been handed to the engine.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Connector, Transport};
use crate::config::SerialConfig;
use crate::error::{ConnectionError, TransportError};

/// One scripted read outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Bytes arrive
    Data(Vec<u8>),
    /// The read times out immediately
    Timeout,
    /// The read fails with an I/O error of this kind
    Error(io::ErrorKind),
}

impl MockEvent {
    pub fn data(bytes: impl AsRef<[u8]>) -> Self {
        Self::Data(bytes.as_ref().to_vec())
    }
}

#[derive(Debug, Default)]
struct MockState {
    events: VecDeque<MockEvent>,
    written: Vec<u8>,
    closed: bool,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared view of a mock transport's script and output
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Queue another read outcome
    pub fn push(&self, event: MockEvent) {
        lock(&self.state).events.push_back(event);
    }

    /// Events not yet consumed
    pub fn pending(&self) -> usize {
        lock(&self.state).events.len()
    }

    /// Everything written to the transport so far
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

/// Transport that replays scripted events
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    name: String,
}

impl MockTransport {
    pub fn new(events: impl IntoIterator<Item = MockEvent>) -> Self {
        let state = MockState {
            events: events.into_iter().collect(),
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            name: "mock".to_string(),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Transport for MockTransport {
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let next = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.events.pop_front()
        };

        match next {
            Some(MockEvent::Data(bytes)) => Ok(bytes),
            Some(MockEvent::Timeout) => Err(TransportError::Timeout),
            Some(MockEvent::Error(kind)) => Err(TransportError::Io(io::Error::from(kind))),
            None => {
                std::thread::sleep(timeout);
                Err(TransportError::Timeout)
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.state).closed = true;
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Hands out prepared mock transports in order, then fails like a missing port
#[derive(Debug, Default)]
pub struct MockConnector {
    transports: VecDeque<MockTransport>,
    opens: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(transports: impl IntoIterator<Item = MockTransport>) -> Self {
        Self {
            transports: transports.into_iter().collect(),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of open attempts, readable after the connector is moved
    pub fn open_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

impl Connector for MockConnector {
    fn open(&mut self, config: &SerialConfig) -> Result<Box<dyn Transport>, ConnectionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.transports.pop_front() {
            Some(mut transport) => {
                transport.name = format!("mock:{}", config.port);
                Ok(Box::new(transport))
            }
            None => Err(ConnectionError::PortNotFound(config.port.clone())),
        }
    }
}
