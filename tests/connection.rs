//! Exercises the connection engine over a real async duplex transport,
//! proving the ordering invariant from the specification: replies are
//! written in inbound command order even when an earlier command's
//! handler resolves after a later one's.

use std::sync::Arc;

use anyhow::Context;
use futures::channel::oneshot;
use futures::FutureExt;
use milter::{
    ready_reply, Actions, Connection, Decoder, Factory, Handler, Message, ProtocolOpts, Reply,
};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::compat::TokioAsyncReadCompatExt;

struct GatedHandler {
    // HELO's reply stays pending until RCPT's handler releases the gate,
    // so RCPT's future is ready well before HELO's.
    gate: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
}

impl Handler for GatedHandler {
    fn on_helo(&mut self, _helo: String) -> Reply {
        let gate = self.gate.take().expect("on_helo called once");
        async move {
            gate.await.ok();
            Ok(Some(Message::Continue))
        }
        .boxed()
    }

    fn on_rcpt(&mut self, _args: Vec<String>) -> Reply {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
        ready_reply(Some(Message::Continue))
    }
}

#[test_log::test(tokio::test)]
async fn reply_order_matches_request_order_despite_out_of_order_resolution() -> anyhow::Result<()>
{
    let (release, gate) = oneshot::channel();
    let handler = GatedHandler {
        gate: Some(gate),
        release: Some(release),
    };

    let factory = Arc::new(Factory::new(Actions::empty(), ProtocolOpts::empty()));
    let connection = Connection::new(factory, handler);

    let (mut client, server) = tokio::io::duplex(8192);
    let server = server.compat();

    let run_handle = tokio::spawn(connection.run(server));

    let mut inbound = Vec::new();
    Message::Helo {
        helo: "example.com".to_string(),
    }
    .encode_into(&mut inbound)
    .context("encoding HELO")?;
    Message::Rcpt {
        args: vec!["<bob@example.com>".to_string()],
    }
    .encode_into(&mut inbound)
    .context("encoding RCPT")?;
    client
        .write_all(&inbound)
        .await
        .context("writing inbound commands")?;

    let expected_reply_bytes = {
        let mut buf = Vec::new();
        Message::Continue.encode_into(&mut buf)?;
        Message::Continue.encode_into(&mut buf)?;
        buf
    };

    let mut received = vec![0u8; expected_reply_bytes.len()];
    client
        .read_exact(&mut received)
        .await
        .context("reading replies back")?;
    assert_eq!(received, expected_reply_bytes);

    drop(client);
    run_handle.await.context("connection task panicked")??;
    Ok(())
}

struct EchoActionsHandler;

impl Handler for EchoActionsHandler {
    fn on_eom(&mut self, reply: milter::ReplyHandle) -> Reply {
        reply.add_header("X-Filtered", "yes");
        ready_reply(Some(Message::Accept))
    }
}

#[test_log::test(tokio::test)]
async fn filter_initiated_action_is_written_ahead_of_its_command_reply() -> anyhow::Result<()> {
    let factory = Arc::new(Factory::new(Actions::ADDHDRS, ProtocolOpts::empty()));
    let connection = Connection::new(factory, EchoActionsHandler);

    let (mut client, server) = tokio::io::duplex(8192);
    let server = server.compat();
    let run_handle = tokio::spawn(connection.run(server));

    let mut inbound = Vec::new();
    Message::Bodyeob
        .encode_into(&mut inbound)
        .context("encoding BODYEOB")?;
    client
        .write_all(&inbound)
        .await
        .context("writing BODYEOB")?;

    // The action and the EOM reply may be written in either relative
    // order (nothing in the specification constrains it), so decode
    // whatever comes back and check the set of frames, not byte-exact
    // ordering.
    let mut decoder = Decoder::new();
    let mut frames = Vec::new();
    let mut buf = [0u8; 256];
    while frames.len() < 2 {
        let n = client
            .read(&mut buf)
            .await
            .context("reading back action + reply")?;
        assert!(n > 0, "connection closed before both frames arrived");
        decoder.feed(&buf[..n]);
        frames.extend(decoder.drain().context("decoding action + reply")?);
    }

    assert_eq!(frames.len(), 2);
    assert!(frames.contains(&Message::AddHeader {
        name: "X-Filtered".to_string(),
        value: "yes".to_string(),
    }));
    assert!(frames.contains(&Message::Accept));

    drop(client);
    run_handle.await.context("connection task panicked")??;
    Ok(())
}
