//! The incremental frame decoder, grounded on the teacher's
//! `Reactor::recv` loop (`client/reactor.rs`): buffer whatever bytes
//! arrive, and pull out as many complete frames as are currently
//! available, leaving any trailing partial frame untouched for the next
//! `feed`.

use byteorder::{NetworkEndian, ReadBytesExt};

use crate::command::CommandTag;
use crate::error::MilterError;
use crate::message::Message;

const LENGTH_PREFIX_SIZE: usize = 4;

/// A stateful, single-reader milter frame decoder.
///
/// Not `Sync`: a `Decoder` belongs to exactly one connection and must only
/// be driven from that connection's task, matching the per-connection
/// ownership of the teacher's `Reactor` read buffer.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Decoder::default()
    }

    /// Appends `bytes` to the internal buffer. A zero-length slice is a
    /// no-op.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns every complete frame currently buffered, in order, removing
    /// them from the buffer. Frames that complete on a later `feed` are
    /// returned by a later `drain` call.
    ///
    /// On a decode error the buffer is left exactly as it was before the
    /// failing frame: the stream is desynchronized and the connection
    /// should be torn down (see the crate's error handling policy) rather
    /// than retried.
    pub fn drain(&mut self) -> Result<Vec<Message>, MilterError> {
        let mut out = Vec::new();

        loop {
            if self.buf.len() < LENGTH_PREFIX_SIZE {
                break;
            }

            let length = (&self.buf[..LENGTH_PREFIX_SIZE])
                .read_u32::<NetworkEndian>()
                .expect("length check above guarantees 4 bytes are present") as usize;

            if length == 0 {
                return Err(MilterError::Codec(
                    "illegal zero-length milter frame".to_string(),
                ));
            }

            let frame_len = LENGTH_PREFIX_SIZE + length;
            if self.buf.len() < frame_len {
                log::trace!(
                    "partial milter frame ({}/{} bytes buffered)",
                    self.buf.len(),
                    frame_len
                );
                break;
            }

            let tag_byte = self.buf[LENGTH_PREFIX_SIZE];
            let tag = CommandTag::from_tag(tag_byte).ok_or_else(|| {
                MilterError::Codec(format!("unknown milter command tag {tag_byte:#04x}"))
            })?;

            let payload = &self.buf[LENGTH_PREFIX_SIZE + 1..frame_len];
            let msg = Message::decode_payload(tag, payload)?;
            log::trace!("decoded {:?} ({} byte frame)", tag, frame_len);

            out.push(msg);
            self.buf.drain(..frame_len);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::AddressFamily;
    use pretty_assertions::assert_eq;

    fn seed_messages() -> Vec<Message> {
        vec![
            Message::Abort,
            Message::Body(b"mybody".to_vec()),
            Message::Connect {
                hostname: "example.com".to_string(),
                family: AddressFamily::Inet,
                port: 1234,
                address: "127.0.0.1".to_string(),
            },
            Message::Header {
                name: "to".to_string(),
                value: "me".to_string(),
            },
            Message::ChgHeader {
                index: 1,
                name: "to".to_string(),
                value: "test@example.com".to_string(),
            },
            Message::Optneg {
                version: 1,
                actions: 2,
                protocol: 3,
            },
        ]
    }

    #[test]
    fn feed_drain_round_trips_one_shot() {
        let mut encoded = Vec::new();
        for m in seed_messages() {
            m.encode_into(&mut encoded).unwrap();
        }

        let mut dec = Decoder::new();
        dec.feed(&encoded);
        let decoded = dec.drain().unwrap();
        assert_eq!(decoded, seed_messages());
    }

    #[test]
    fn decoding_is_independent_of_chunk_boundaries() {
        let mut encoded = Vec::new();
        for m in seed_messages() {
            m.encode_into(&mut encoded).unwrap();
        }

        let mut dec = Decoder::new();
        let mut decoded = Vec::new();
        for chunk in encoded.chunks(1) {
            dec.feed(chunk);
            decoded.extend(dec.drain().unwrap());
        }

        assert_eq!(decoded, seed_messages());
    }

    #[test]
    fn odd_boundary_split_of_all_seed_scenarios() {
        let mut encoded = Vec::new();
        for m in seed_messages() {
            m.encode_into(&mut encoded).unwrap();
        }

        let mut dec = Decoder::new();
        let mut decoded = Vec::new();
        let mut i = 0;
        let mut step = 1;
        while i < encoded.len() {
            let end = (i + step).min(encoded.len());
            dec.feed(&encoded[i..end]);
            decoded.extend(dec.drain().unwrap());
            i = end;
            step += 2; // split at every odd byte boundary
        }

        assert_eq!(decoded, seed_messages());
    }

    #[test]
    fn empty_feed_is_a_no_op() {
        let mut dec = Decoder::new();
        dec.feed(&[]);
        assert_eq!(dec.drain().unwrap(), vec![]);
    }

    #[test]
    fn zero_length_frame_is_a_codec_error() {
        let mut dec = Decoder::new();
        dec.feed(&[0, 0, 0, 0]);
        assert!(dec.drain().is_err());
    }

    #[test]
    fn unknown_tag_is_a_codec_error() {
        let mut dec = Decoder::new();
        // length=1, tag=0xff (never a valid command byte)
        dec.feed(&[0, 0, 0, 1, 0xff]);
        assert!(dec.drain().is_err());
    }

    #[test]
    fn incomplete_frame_is_not_consumed() {
        let full = Message::Helo {
            helo: "x".to_string(),
        }
        .encode()
        .unwrap();

        let mut dec = Decoder::new();
        dec.feed(&full[..full.len() - 1]);
        assert_eq!(dec.drain().unwrap(), vec![]);
        dec.feed(&full[full.len() - 1..]);
        assert_eq!(
            dec.drain().unwrap(),
            vec![Message::Helo {
                helo: "x".to_string()
            }]
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let m = Message::Optneg {
            version: 6,
            actions: 0,
            protocol: 0,
        };
        assert_eq!(m.encode().unwrap(), m.encode().unwrap());
    }
}
