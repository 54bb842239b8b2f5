//! A pure Rust implementation of the Milter protocol, the binary protocol
//! Sendmail and Postfix use to talk to third-party mail filters.
//!
//! This crate covers the wire protocol and the per-connection dispatch
//! loop: framing and parsing [`Message`] values off an async transport,
//! and routing them to a user-supplied [`Handler`]. Accepting connections
//! on a listening socket, process supervision, and the `libmilter` C ABI
//! are out of scope; bring your own transport (TCP, Unix socket, or
//! anything implementing `futures::io::{AsyncRead, AsyncWrite}`) and
//! executor.

#![warn(
    anonymous_parameters,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_qualifications
)]

mod bits;
mod codec;
mod command;
mod engine;
mod error;
mod message;
mod wire;

pub use bits::{Actions, ProtocolOpts};
pub use codec::Decoder;
pub use command::{AddressFamily, CommandTag};
pub use engine::{
    ready_reply, Connection, Factory, Handler, PeerOptions, Reply, ReplyHandle,
};
pub use error::MilterError;
pub use message::Message;
