//! Polling ingestion client for Distributed Acoustic Sensing data.
//!
//! The producer is asked for anything newer than the last packet we stored, the
//! reply is decoded into a [`Packet`], decimated to the configured resolution and
//! written out as one dataset file per packet.

pub mod client;
pub mod config;
pub mod decimate;
pub mod error;
pub mod matrix;
pub mod monitoring;
pub mod packet;
pub mod persist;
pub mod transport;

pub use client::{Client, Cycle, LinkState};
pub use config::Config;
pub use decimate::{decimate, Decimated};
pub use error::{Error, Result};
pub use matrix::Matrix;
pub use packet::{decode, encode, Packet};
pub use persist::{DatasetWriter, Outcome, RawWriter, Writer};
pub use transport::{Transport, ZmqTransport};
