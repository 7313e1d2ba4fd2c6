//! The ingestion loop: poll the producer, decode, decimate, persist, repeat.
//!
//! Transport health is tracked with [`LinkState`]. A run of consecutive timeouts
//! drains the retry budget one socket at a time; when it hits zero the whole
//! transport is rebuilt and the session forgets the last timestamp it saw, so the
//! next request starts from scratch.

use std::{path::PathBuf, time::Duration};

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    decimate::decimate,
    error::{Error, Result},
    packet::decode,
    persist::{DatasetWriter, Outcome, Writer},
    transport::{request_bytes, Transport},
};

/// How long an interrupted request waits for the shutdown message to show up
const SIGNAL_GRACE: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Ready to send, with `remaining` timeouts left before a reset
    Connected { remaining: u8 },
    AwaitingReply { remaining: u8 },
    /// The last request went unanswered, the socket needs replacing
    TimedOut { remaining: u8 },
    /// Out of retries, the context needs replacing
    Resetting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Sent,
    /// A reply arrived, whatever its contents
    Replied,
    /// A reply arrived but was malformed
    Malformed,
    Timeout,
    /// A signal cut the wait short, the request is abandoned
    Interrupted,
    /// A fresh socket (or context) is in place
    Reconnected,
}

impl LinkState {
    /// Apply `event`, `None` if it can't happen in this state
    pub fn next(self, event: Event, budget: u8) -> Option<LinkState> {
        use LinkState::*;
        Some(match (self, event) {
            (Connected { remaining }, Event::Sent) => AwaitingReply { remaining },
            (AwaitingReply { .. }, Event::Replied) => Connected { remaining: budget },
            (AwaitingReply { remaining }, Event::Malformed) => Connected { remaining },
            (AwaitingReply { remaining }, Event::Interrupted) => Connected { remaining },
            (AwaitingReply { remaining }, Event::Timeout) => match remaining.saturating_sub(1) {
                0 => Resetting,
                remaining => TimedOut { remaining },
            },
            (TimedOut { remaining }, Event::Reconnected) => Connected { remaining },
            (Resetting, Event::Reconnected) => Connected { remaining: budget },
            (Connected { .. }, _)
            | (AwaitingReply { .. }, Event::Sent | Event::Reconnected)
            | (TimedOut { .. }, _)
            | (Resetting, _) => return None,
        })
    }
}

/// What one trip around the loop achieved
#[derive(Clone, Debug, PartialEq)]
pub enum Cycle {
    Saved(PathBuf),
    /// The file for this packet was already on disk
    AlreadySaved(PathBuf),
    /// Same timestamp as the last packet, nothing written
    Duplicate,
    /// Reply was unusable and has been discarded
    Dropped,
    TimedOut { remaining: u8 },
    Reset,
    /// A signal arrived mid-request, nothing was received
    Interrupted,
}

pub struct Client<T, D> {
    transport: T,
    writer: Writer<D>,
    target_sps: u32,
    target_dx: f64,
    budget: u8,
    state: LinkState,
    last_seen: f64,
}

impl<T: Transport, D: DatasetWriter> Client<T, D> {
    pub fn new(transport: T, writer: Writer<D>, cfg: &Config) -> Self {
        let budget = cfg.producer.retries.max(1);
        Self {
            transport,
            writer,
            target_sps: cfg.output.target_sps,
            target_dx: cfg.output.target_dx,
            budget,
            state: LinkState::Connected { remaining: budget },
            last_seen: 0.0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Timestamp of the newest packet handled so far, 0 after a reset
    pub fn last_seen(&self) -> f64 {
        self.last_seen
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn advance(&mut self, event: Event) -> Result<LinkState> {
        self.state = self.state.next(event, self.budget).ok_or_else(|| {
            Error::Unexpected(format!("{event:?} is not valid while {:?}", self.state))
        })?;
        Ok(self.state)
    }

    /// Run a single request/reply cycle. Only fatal errors are returned.
    pub fn step(&mut self) -> Result<Cycle> {
        self.advance(Event::Sent)?;
        let parts = match self.transport.request(&request_bytes(self.last_seen)) {
            Ok(parts) => parts,
            Err(Error::TransportTimeout { timeout }) => return self.recover(timeout),
            Err(Error::Interrupted { context }) => {
                info!(context, "Request interrupted by a signal");
                // A REQ socket that never got its reply can't send again
                self.transport.reconnect()?;
                self.advance(Event::Interrupted)?;
                return Ok(Cycle::Interrupted);
            }
            Err(e) => return Err(e),
        };

        // Decoding only fails on a malformed header or attribute block
        let packet = match decode(&parts) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Error unpacking data, skipped: {}", e);
                self.advance(Event::Malformed)?;
                return Ok(Cycle::Dropped);
            }
        };
        self.advance(Event::Replied)?;

        if !packet.decoded {
            return Ok(Cycle::Dropped);
        }
        if packet.timestamp == self.last_seen {
            debug!(timestamp = packet.timestamp, "Duplicate packet");
            return Ok(Cycle::Duplicate);
        }

        let decimated = decimate(&packet, self.target_sps, self.target_dx);
        let outcome = match self.writer.persist(&packet, &decimated) {
            Ok(outcome) => outcome,
            Err(e) if e.is_recoverable() => {
                warn!(timestamp = packet.timestamp, "Cannot save packet: {}", e);
                return Ok(Cycle::Dropped);
            }
            Err(e) => {
                error!(timestamp = packet.timestamp, "Cannot save packet: {}", e);
                return Err(e);
            }
        };
        self.last_seen = packet.timestamp;
        Ok(match outcome {
            Outcome::Saved(path) => Cycle::Saved(path),
            Outcome::AlreadyExists(path) => Cycle::AlreadySaved(path),
        })
    }

    fn recover(&mut self, timeout: Duration) -> Result<Cycle> {
        match self.advance(Event::Timeout)? {
            LinkState::TimedOut { remaining } => {
                warn!(?timeout, remaining, "No reply from producer, reconnecting");
                self.transport.reconnect()?;
                self.advance(Event::Reconnected)?;
                Ok(Cycle::TimedOut { remaining })
            }
            LinkState::Resetting => {
                warn!(
                    retries = self.budget,
                    "Producer unresponsive, resetting transport and session"
                );
                self.last_seen = 0.0;
                self.transport.reset()?;
                self.advance(Event::Reconnected)?;
                Ok(Cycle::Reset)
            }
            state => Err(Error::Unexpected(format!(
                "timeout left the link in {state:?}"
            ))),
        }
    }

    /// Loop until a fatal error or a message on `shutdown`. The transport is closed on the way out.
    pub fn run(&mut self, shutdown: &Receiver<()>) -> Result<()> {
        info!(
            target_sps = self.target_sps,
            target_dx = self.target_dx,
            base = %self.writer.base().display(),
            "Starting ingestion"
        );
        let result = loop {
            // Checked between cycles so a write is never cut short
            if shutdown.try_recv().is_ok() {
                info!("Shutdown requested");
                break Ok(());
            }
            match self.step() {
                // The signal handler runs on its own thread and may lag the interrupted wait
                Ok(Cycle::Interrupted) if shutdown.recv_timeout(SIGNAL_GRACE).is_ok() => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                Ok(cycle) => debug!(?cycle, "Cycle complete"),
                Err(e) => {
                    error!(last_seen = self.last_seen, "Ingestion stopped: {}", e);
                    break Err(e);
                }
            }
        };
        self.transport.close();
        result
    }
}
