//! The single thread that owns all scanner state.

use crate::connection::{
    ConnectionManager, DeviceEvent, DeviceNotice, OPEN_TIMEOUT, OpenAck,
};
use crate::dispatcher::{ScanCallback, ScanDispatcher};
use crate::error::{DeviceFault, Error, Result};
use crate::reassembler::LineReassembler;
use log::{debug, error, trace, warn};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Instant;

/// Requests from [`Scanner`](super::Scanner) handles.
pub(crate) enum Command {
    Open {
        path: String,
        reply: Sender<Result<()>>,
    },
    Close {
        reply: Option<Sender<()>>,
    },
    Send {
        text: String,
        reply: Sender<Result<()>>,
    },
    Register(ScanCallback),
    Unregister,
}

pub(crate) enum Message {
    Command(Command),
    Device(DeviceNotice),
    Shutdown,
}

struct PendingOpen {
    generation: u64,
    path: String,
    deadline: Instant,
    reply: Sender<Result<()>>,
}

pub(crate) struct EventLoop {
    connection: ConnectionManager,
    reassembler: LineReassembler,
    dispatcher: ScanDispatcher,
    pending: Option<PendingOpen>,
}

impl EventLoop {
    pub(crate) fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            reassembler: LineReassembler::new(),
            dispatcher: ScanDispatcher::new(),
            pending: None,
        }
    }

    pub(crate) fn run(mut self, rx: Receiver<Message>) {
        debug!("Scanner event loop started");

        loop {
            let received = match self.next_deadline() {
                Some(deadline) => {
                    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(message) => Some(message),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                },
                None => match rx.recv() {
                    Ok(message) => Some(message),
                    Err(_) => break,
                },
            };

            // Expired timers fire before the message that woke us
            self.fire_timers(Instant::now());

            match received {
                Some(Message::Command(command)) => self.handle_command(command),
                Some(Message::Device(notice)) => self.handle_device(notice),
                Some(Message::Shutdown) => break,
                None => {},
            }
        }

        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(Error::Shutdown));
        }
        self.connection.close();
        debug!("Scanner event loop stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.pending.as_ref().map(|p| p.deadline),
            self.reassembler.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn fire_timers(&mut self, now: Instant) {
        if self.pending.as_ref().is_some_and(|p| now >= p.deadline) {
            if let Some(pending) = self.pending.take() {
                let error = self
                    .connection
                    .open_timed_out(pending.generation)
                    .unwrap_or(Error::ConnectTimeout {
                        path: pending.path,
                        timeout: OPEN_TIMEOUT,
                    });
                let _ = pending.reply.send(Err(error));
            }
        }

        if let Some(scan) = self.reassembler.poll_quiescence(now) {
            self.dispatcher.dispatch(&scan);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open { path, reply } => {
                self.abandon_pending("superseded by a newer connection attempt");
                self.reassembler.reset();
                let generation = self.connection.begin_open(&path);
                self.pending = Some(PendingOpen {
                    generation,
                    path,
                    deadline: Instant::now() + OPEN_TIMEOUT,
                    reply,
                });
            },
            Command::Close { reply } => {
                debug!("Closing scanner connection (state: {})", self.connection.state());
                self.abandon_pending("closed before the device opened");
                self.connection.close();
                self.reassembler.reset();
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            },
            Command::Send { text, reply } => {
                let _ = reply.send(self.connection.send(&text));
            },
            Command::Register(callback) => {
                self.dispatcher.register_boxed(callback);
            },
            Command::Unregister => {
                self.dispatcher.unregister();
            },
        }
    }

    fn abandon_pending(&mut self, reason: &str) {
        if let Some(pending) = self.pending.take() {
            debug!("Open of {} {reason}", pending.path);
            let _ = pending.reply.send(Err(Error::ConnectError {
                path: pending.path,
                reason: reason.to_string(),
                fault: DeviceFault::Other,
            }));
        }
    }

    fn take_pending(&mut self, generation: u64) -> Option<PendingOpen> {
        self.pending.take_if(|p| p.generation == generation)
    }

    fn handle_device(&mut self, notice: DeviceNotice) {
        let DeviceNotice { generation, event } = notice;

        match event {
            DeviceEvent::Opened(port) => match self.connection.acknowledge_open(generation, port) {
                OpenAck::Adopted => {
                    self.reassembler.reset();
                    match self.take_pending(generation) {
                        Some(pending) => {
                            let _ = pending.reply.send(Ok(()));
                        },
                        None => warn!(
                            "Scanner opened after the {}ms connection timeout",
                            OPEN_TIMEOUT.as_millis()
                        ),
                    }
                },
                OpenAck::Stale => {},
                OpenAck::Failed(error) => match self.take_pending(generation) {
                    Some(pending) => {
                        let _ = pending.reply.send(Err(error));
                    },
                    None => error!("{error}"),
                },
            },
            DeviceEvent::OpenFailed { error, fatal } => {
                if self.connection.open_failed(generation, &error, fatal) && fatal {
                    if let Some(pending) = self.take_pending(generation) {
                        let fault = error.fault();
                        let _ = pending.reply.send(Err(Error::ConnectError {
                            path: pending.path,
                            reason: error.to_string(),
                            fault,
                        }));
                    }
                }
            },
            DeviceEvent::Data(bytes) => {
                if !self.connection.accepts_data(generation) {
                    trace!(
                        "Ignoring {} byte(s) from superseded attempt #{generation}",
                        bytes.len()
                    );
                    return;
                }
                for scan in self.reassembler.push(&bytes, Instant::now()) {
                    self.dispatcher.dispatch(&scan);
                }
            },
            DeviceEvent::Failed(error) => self.connection.device_failed(generation, &error),
        }
    }
}
