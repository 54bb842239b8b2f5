//! The connection-scoped protocol engine: binds a [`Decoder`] and the
//! [`Message`] encoder to a duplex transport, dispatches decoded commands
//! to a caller-supplied [`Handler`], and writes replies back in request
//! order even when handlers resolve out of order.
//!
//! Grounded on the teacher's `client/reactor.rs`: a per-connection event
//! loop racing transport readiness against in-flight work, and an
//! unbounded channel (`ReactorHandle::outgoing`/`write_commands`) for
//! values produced asynchronously by other code. Unlike the teacher, which
//! owns a `mio` socket and runs on a dedicated OS thread, the engine here
//! is transport-generic (`futures::io::{AsyncRead, AsyncWrite}`) and
//! `async`, since the listening socket and its executor are explicitly out
//! of scope (see the crate's module docs).

use std::sync::atomic::{AtomicU64, Ordering};

use futures::channel::mpsc;
use futures::future::{self, BoxFuture};
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures::stream::{FuturesOrdered, StreamExt};
use futures::FutureExt;

use crate::bits::{Actions, ProtocolOpts};
use crate::codec::Decoder;
use crate::command::AddressFamily;
use crate::error::MilterError;
use crate::message::Message;

/// The uniform shape of a handler's reply: a future that resolves to
/// either a [`Message`] to write back, or nothing (used by `on_macro` and
/// by handlers that decline to reply). Immediate replies are represented
/// as an already-resolved future, per the "expose only the async form"
/// option in the crate's design notes.
pub type Reply = BoxFuture<'static, Result<Option<Message>, MilterError>>;

/// Wraps an immediate value as a [`Reply`].
pub fn ready_reply(msg: Option<Message>) -> Reply {
    future::ready(Ok(msg)).boxed()
}

const READ_BUF_SIZE: usize = 64 * 1024;

/// Process-wide filter configuration and the connection-id allocator.
///
/// Shared across connections behind an `Arc`; the Command Catalog and this
/// struct's fields are read-only after construction except for the id
/// counter, which is safe to increment concurrently.
#[derive(Debug)]
pub struct Factory {
    next_id: AtomicU64,
    /// Milter protocol version this filter advertises. Fixed at 6, per the
    /// distilled specification.
    pub version: u32,
    /// `SMFIF_*` actions this filter may perform.
    pub actions: Actions,
    /// `SMFIP_*` protocol steps this filter allows the MTA to elide.
    pub protocols: ProtocolOpts,
}

impl Factory {
    /// Creates a factory advertising the given actions and protocol
    /// options, starting its connection-id counter at 1.
    pub fn new(actions: Actions, protocols: ProtocolOpts) -> Self {
        Factory {
            next_id: AtomicU64::new(1),
            version: 6,
            actions,
            protocols,
        }
    }

    /// Allocates the next monotonic connection id. Wraps on overflow,
    /// which `AtomicU64::fetch_add` does implicitly; at 64 bits this is
    /// not reachable in practice.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// A handle for sending filter-initiated actions — messages that aren't a
/// reply to any particular inbound command — to the connection's write
/// side. Bypasses the ordered reply queue entirely, mirroring
/// `ReactorHandle::write_command`'s unbounded channel in the teacher.
#[derive(Clone, Debug)]
pub struct ReplyHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl ReplyHandle {
    /// `SMFIR_ADDHEADER` — append a header field.
    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.send(Message::AddHeader {
            name: name.into(),
            value: value.into(),
        });
    }

    /// `SMFIR_CHGHEADER` — replace a header field at `index`.
    pub fn chg_header(&self, index: u32, name: impl Into<String>, value: impl Into<String>) {
        self.send(Message::ChgHeader {
            index,
            name: name.into(),
            value: value.into(),
        });
    }

    /// `SMFIR_ADDRCPT` — add a recipient.
    pub fn add_rcpt(&self, rcpt: impl Into<String>) {
        self.send(Message::AddRcpt { rcpt: rcpt.into() });
    }

    /// `SMFIR_DELRCPT` — remove a recipient.
    pub fn del_rcpt(&self, rcpt: impl Into<String>) {
        self.send(Message::DelRcpt { rcpt: rcpt.into() });
    }

    /// `SMFIR_QUARANTINE` — quarantine the message.
    pub fn quarantine(&self, reason: impl Into<String>) {
        self.send(Message::Quarantine {
            reason: reason.into(),
        });
    }

    fn send(&self, msg: Message) {
        // An unbounded sender only fails if the connection loop has
        // already exited; there's nothing useful to do but drop the
        // action.
        if self.tx.unbounded_send(msg).is_err() {
            log::warn!("dropped filter-initiated action: connection already closed");
        }
    }
}

/// Per-connection callbacks for inbound milter commands.
///
/// Every method defaults to an immediate `SMFIR_CONTINUE` reply (`on_macro`
/// defaults to no reply at all), so implementers override only the
/// commands they care about — the trait-default equivalent of the
/// source's base `MilterProtocol` class full of `return CONTINUE` methods.
pub trait Handler: Send {
    /// Called once a connection is established, before any bytes are
    /// dispatched.
    fn on_connection_established(&mut self, _id: u64) {}

    /// Called once the transport has closed.
    fn on_connection_lost(&mut self, _id: u64) {}

    /// `SMFIC_CONNECT` — a new SMTP connection was accepted by the MTA.
    fn on_connect(
        &mut self,
        hostname: String,
        family: AddressFamily,
        port: u16,
        address: String,
    ) -> Reply {
        let _ = (hostname, family, port, address);
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_HELO` — the SMTP client's HELO/EHLO argument.
    fn on_helo(&mut self, helo: String) -> Reply {
        let _ = helo;
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_OPTNEG` — option negotiation. The default implementation
    /// computes the reply the specification requires (intersect the
    /// factory's advertised masks with the peer's) and should only be
    /// overridden by callers who understand the protocol well enough to
    /// reproduce that guarantee themselves.
    fn on_optneg(&mut self, factory: &Factory, version: u32, actions: u32, protocol: u32) -> Reply {
        let _ = version;
        let negotiated_actions = factory.actions.bits() & actions;
        let negotiated_protocol = factory.protocols.bits() & protocol;
        ready_reply(Some(Message::Optneg {
            version: factory.version,
            actions: negotiated_actions,
            protocol: negotiated_protocol,
        }))
    }

    /// `SMFIC_HEADER` — one message header field.
    fn on_header(&mut self, name: String, value: String) -> Reply {
        let _ = (name, value);
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_EOH` — end of the header fields.
    fn on_eoh(&mut self) -> Reply {
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_BODY` — a chunk of the message body.
    fn on_body(&mut self, buf: Vec<u8>) -> Reply {
        let _ = buf;
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_BODYEOB` — end of the message body. `reply` can be used to
    /// issue filter-initiated actions (`add_header`, `add_rcpt`, ...)
    /// before this method's own return value is written back.
    fn on_eom(&mut self, reply: ReplyHandle) -> Reply {
        let _ = reply;
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_MAIL` — the `MAIL FROM` command and its ESMTP parameters.
    fn on_mail(&mut self, args: Vec<String>) -> Reply {
        let _ = args;
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_RCPT` — one `RCPT TO` command and its ESMTP parameters.
    fn on_rcpt(&mut self, args: Vec<String>) -> Reply {
        let _ = args;
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_MACRO` — macro name/value pairs for an upcoming command. No
    /// reply is ever expected for a macro frame.
    fn on_macro(&mut self, cmdcode: u8, nameval: Vec<String>) -> Reply {
        let _ = (cmdcode, nameval);
        ready_reply(None)
    }

    /// `SMFIC_ABORT` — the current message transaction is being abandoned.
    fn on_abort(&mut self) -> Reply {
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_DATA` — the `DATA` command was issued.
    fn on_data(&mut self) -> Reply {
        ready_reply(Some(Message::Continue))
    }

    /// Called for a frame that decoded successfully but has no handler
    /// mapping — either the literal `SMFIC_UNKNOWN` command (`data` is
    /// empty, since that command's payload is empty) or, in a
    /// misbehaving deployment, any `SMFIR_*` message arriving inbound
    /// (`data` is that message's re-encoded payload).
    fn on_unknown(&mut self, data: Vec<u8>) -> Reply {
        let _ = data;
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_QUIT` — the connection is closing.
    fn on_quit(&mut self) -> Reply {
        ready_reply(Some(Message::Continue))
    }

    /// `SMFIC_QUIT_NC` — the connection is closing, but another will
    /// follow on the same socket.
    fn on_quit_new_connection(&mut self) -> Reply {
        ready_reply(Some(Message::Continue))
    }
}

/// Negotiated peer capabilities, recorded once an `SMFIC_OPTNEG` frame has
/// been seen on this connection.
#[derive(Debug, Clone, Copy)]
pub struct PeerOptions {
    /// Milter protocol version the peer (MTA) advertised.
    pub version: u32,
    /// `SMFIF_*` actions the peer allows.
    pub actions: Actions,
    /// `SMFIP_*` protocol options the peer advertised.
    pub protocol: ProtocolOpts,
}

/// A single milter connection: owns the decoder, the negotiated-option
/// state, and the user's [`Handler`], and drives the read/dispatch/write
/// loop over a duplex transport.
pub struct Connection<H: Handler> {
    id: u64,
    factory: std::sync::Arc<Factory>,
    handler: H,
    decoder: Decoder,
    peer_options: Option<PeerOptions>,
    pending: FuturesOrdered<Reply>,
    reply_handle: ReplyHandle,
    action_rx: mpsc::UnboundedReceiver<Message>,
}

impl<H: Handler> Connection<H> {
    /// Creates a new connection, allocating its id from `factory`.
    pub fn new(factory: std::sync::Arc<Factory>, handler: H) -> Self {
        let (tx, rx) = mpsc::unbounded();
        Connection {
            id: factory.next_id(),
            factory,
            handler,
            decoder: Decoder::new(),
            peer_options: None,
            pending: FuturesOrdered::new(),
            reply_handle: ReplyHandle { tx },
            action_rx: rx,
        }
    }

    /// This connection's monotonic id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The peer's negotiated options, if an `SMFIC_OPTNEG` frame has been
    /// processed yet.
    pub fn peer_options(&self) -> Option<PeerOptions> {
        self.peer_options
    }

    /// Runs the connection to completion: feeds inbound bytes to the
    /// decoder, dispatches decoded frames to the handler, and writes
    /// replies back in request order, regardless of the order in which
    /// handler futures resolve. Returns once the transport reaches EOF, or
    /// on the first unrecoverable codec/I/O error (per the crate's error
    /// handling policy, neither the decoder nor the encoder is retried
    /// after a failure — the caller is expected to drop the transport).
    pub async fn run<T>(mut self, mut transport: T) -> Result<(), MilterError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        self.handler.on_connection_established(self.id);

        let mut read_buf = vec![0u8; READ_BUF_SIZE];
        let mut write_buf = Vec::new();

        let result = loop {
            if !write_buf.is_empty() {
                if let Err(err) = transport.write_all(&write_buf).await {
                    break Err(err.into());
                }
                write_buf.clear();
            }

            let read_fut = transport.read(&mut read_buf).fuse();
            let action_fut = self.action_rx.next().fuse();
            let pending_fut = next_pending_or_forever(&mut self.pending).fuse();

            futures::pin_mut!(read_fut, action_fut, pending_fut);

            futures::select! {
                res = read_fut => {
                    let n = match res {
                        Ok(n) => n,
                        Err(err) => break Err(err.into()),
                    };

                    if n == 0 {
                        break Ok(());
                    }

                    self.decoder.feed(&read_buf[..n]);
                    let frames = match self.decoder.drain() {
                        Ok(frames) => frames,
                        Err(err) => break Err(err),
                    };

                    for msg in frames {
                        let reply = self.dispatch(msg);
                        self.pending.push_back(reply);
                    }
                }
                action = action_fut => {
                    if let Some(action) = action {
                        log::debug!("connection {}: outbound {:?}", self.id, action.command());
                        if let Err(err) = action.encode_into(&mut write_buf) {
                            break Err(err);
                        }
                    }
                }
                resolved = pending_fut => {
                    if let Err(err) = apply_resolved(self.id, resolved, &mut write_buf) {
                        break Err(err);
                    }
                }
            }
        };

        self.handler.on_connection_lost(self.id);
        result
    }

    fn dispatch(&mut self, msg: Message) -> Reply {
        log::debug!("connection {}: inbound {:?}", self.id, msg.command());

        match msg {
            Message::Connect {
                hostname,
                family,
                port,
                address,
            } => self.handler.on_connect(hostname, family, port, address),
            Message::Helo { helo } => self.handler.on_helo(helo),
            Message::Optneg {
                version,
                actions,
                protocol,
            } => {
                self.peer_options = Some(PeerOptions {
                    version,
                    actions: Actions::from_bits_truncate(actions),
                    protocol: ProtocolOpts::from_bits_truncate(protocol),
                });
                self.handler.on_optneg(&self.factory, version, actions, protocol)
            }
            Message::Header { name, value } => self.handler.on_header(name, value),
            Message::Eoh => self.handler.on_eoh(),
            Message::Body(buf) => self.handler.on_body(buf),
            Message::Bodyeob => self.handler.on_eom(self.reply_handle.clone()),
            Message::Mail { args } => self.handler.on_mail(args),
            Message::Rcpt { args } => self.handler.on_rcpt(args),
            Message::Macro { cmdcode, nameval } => self.handler.on_macro(cmdcode, nameval),
            Message::Abort => self.handler.on_abort(),
            Message::Data => self.handler.on_data(),
            Message::Quit => self.handler.on_quit(),
            Message::QuitNc => self.handler.on_quit_new_connection(),
            Message::Unknown => self.handler.on_unknown(Vec::new()),
            other => {
                let mut payload = Vec::new();
                if let Err(err) = other.encode_payload(&mut payload) {
                    log::warn!("failed to re-encode unexpected inbound message: {err}");
                }
                self.handler.on_unknown(payload)
            }
        }
    }
}

/// Appends one resolved reply's bytes to `write_buf`, if it has any.
///
/// An encode failure is connection-fatal (the wire would otherwise
/// desynchronize) and is propagated to the caller. A handler-returned
/// error, by contrast, is logged and otherwise ignored: nothing is
/// written back for that command, but the connection carries on to the
/// next one.
fn apply_resolved(
    id: u64,
    resolved: Option<Result<Option<Message>, MilterError>>,
    write_buf: &mut Vec<u8>,
) -> Result<(), MilterError> {
    match resolved {
        Some(Ok(Some(msg))) => {
            log::debug!("connection {id}: outbound {:?}", msg.command());
            msg.encode_into(write_buf)
        }
        Some(Ok(None)) => Ok(()),
        Some(Err(err)) => {
            log::error!("handler returned an error: {err}");
            Ok(())
        }
        None => Ok(()),
    }
}

async fn next_pending_or_forever(
    pending: &mut FuturesOrdered<Reply>,
) -> Option<Result<Option<Message>, MilterError>> {
    if pending.is_empty() {
        future::pending().await
    } else {
        pending.next().await
    }
}
