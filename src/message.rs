//! [`Message`]: the tagged-variant replacement for the source's
//! `(cmd, data)` pair with an untyped attribute mapping (see REDESIGN
//! FLAGS in the specification). Each variant carries its command's fields
//! directly, grounded on the teacher's `protocol::command::Command` enum
//! and its `read_tag_prefixed`/`write_tag_prefixed` pair.

use crate::command::{AddressFamily, CommandTag};
use crate::error::MilterError;
use crate::wire::{self, PayloadReader};

/// One frame's worth of milter protocol data: the command it names, paired
/// with that command's typed payload.
///
/// Two messages are equal iff they're the same variant with equal fields
/// (`#[derive(PartialEq)]`); field order is irrelevant since struct-variant
/// fields are compared by name, not position.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Message {
    /// `SMFIC_ABORT` — the current message transaction is being abandoned.
    Abort,
    /// `SMFIC_BODY` — a chunk of the message body.
    Body(Vec<u8>),
    /// `SMFIC_CONNECT` — a new SMTP connection was accepted.
    Connect {
        /// Hostname reported by the client, or its address if unresolved.
        hostname: String,
        /// Address family of the peer.
        family: AddressFamily,
        /// TCP port, or 0 for non-TCP families.
        port: u16,
        /// String representation of the peer's address.
        address: String,
    },
    /// `SMFIC_MACRO` — macro name/value pairs for an upcoming command.
    Macro {
        /// The command code the macros apply to.
        cmdcode: u8,
        /// Flattened `[name, value, name, value, ...]` pairs.
        nameval: Vec<String>,
    },
    /// `SMFIC_BODYEOB` — end of the message body.
    Bodyeob,
    /// `SMFIC_HELO` — the SMTP client's HELO/EHLO argument.
    Helo {
        /// The HELO/EHLO argument as sent.
        helo: String,
    },
    /// `SMFIC_QUIT_NC` — the connection is closing, but another will follow
    /// on the same socket.
    QuitNc,
    /// `SMFIC_HEADER` — one message header field.
    Header {
        /// Header field name.
        name: String,
        /// Header field value.
        value: String,
    },
    /// `SMFIC_MAIL` — the `MAIL FROM` command and its ESMTP parameters.
    Mail {
        /// `args[0]` is the sender address; the rest are ESMTP parameters.
        args: Vec<String>,
    },
    /// `SMFIC_EOH` — end of the header fields.
    Eoh,
    /// `SMFIC_OPTNEG` — option negotiation, in either direction.
    Optneg {
        /// Milter protocol version.
        version: u32,
        /// `SMFIF_*` action bitmask.
        actions: u32,
        /// `SMFIP_*` protocol bitmask.
        protocol: u32,
    },
    /// `SMFIC_RCPT` — one `RCPT TO` command and its ESMTP parameters.
    Rcpt {
        /// `args[0]` is the recipient address; the rest are ESMTP parameters.
        args: Vec<String>,
    },
    /// `SMFIC_DATA` — the `DATA` command was issued.
    Data,
    /// `SMFIC_QUIT` — the connection is closing.
    Quit,
    /// `SMFIC_UNKNOWN` — an SMTP command the MTA didn't recognize.
    Unknown,
    /// `SMFIR_ADDRCPT` — add a recipient.
    AddRcpt {
        /// The recipient address to add.
        rcpt: String,
    },
    /// `SMFIR_DELRCPT` — remove a recipient.
    DelRcpt {
        /// The recipient address to remove.
        rcpt: String,
    },
    /// `SMFIR_ADDRCPT_PAR` — add a recipient with ESMTP parameters.
    AddRcptPar {
        /// The recipient address to add.
        rcpt: String,
        /// ESMTP parameters for the added recipient.
        esmtp_arg: String,
    },
    /// `SMFIR_ACCEPT` — accept the message without further filtering.
    Accept,
    /// `SMFIR_REPLBODY` — replace the message body with this chunk.
    ReplBody(Vec<u8>),
    /// `SMFIR_CONTINUE` — proceed to the next step.
    Continue,
    /// `SMFIR_DISCARD` — silently discard the message.
    Discard,
    /// `SMFIR_CHGFROM` — change the envelope sender.
    ChgFrom {
        /// The new envelope sender address.
        from: String,
        /// ESMTP parameters for the new sender.
        esmtp_arg: String,
    },
    /// `SMFIR_CONN_FAIL` — fail the connection.
    ConnFail,
    /// `SMFIR_ADDHEADER` — append a header field.
    AddHeader {
        /// Header field name.
        name: String,
        /// Header field value.
        value: String,
    },
    /// `SMFIR_CHGHEADER` — replace a header field at a given index.
    ChgHeader {
        /// 1-based occurrence index among headers with this name.
        index: u32,
        /// Header field name.
        name: String,
        /// New header field value.
        value: String,
    },
    /// `SMFIR_PROGRESS` — ask the MTA to extend its timeout.
    Progress,
    /// `SMFIR_QUARANTINE` — quarantine the message with a reason.
    Quarantine {
        /// Human-readable quarantine reason.
        reason: String,
    },
    /// `SMFIR_REJECT` — reject the message.
    Reject,
    /// `SMFIR_SKIP` — skip further callbacks of this kind for this message.
    Skip,
    /// `SMFIR_TEMPFAIL` — temporarily fail the message.
    Tempfail,
    /// `SMFIR_REPLYCODE` — reply with an explicit SMTP code and text.
    ReplyCode {
        /// 3-digit SMTP reply code, e.g. `b"550"`.
        smtpcode: [u8; 3],
        /// Reply text following the code.
        text: String,
    },
    /// `SMFIR_SHUTDOWN` — shut down the filter connection.
    Shutdown,
}

impl Message {
    /// The command this message's variant corresponds to.
    pub fn command(&self) -> CommandTag {
        match self {
            Message::Abort => CommandTag::Abort,
            Message::Body(_) => CommandTag::Body,
            Message::Connect { .. } => CommandTag::Connect,
            Message::Macro { .. } => CommandTag::Macro,
            Message::Bodyeob => CommandTag::Bodyeob,
            Message::Helo { .. } => CommandTag::Helo,
            Message::QuitNc => CommandTag::QuitNc,
            Message::Header { .. } => CommandTag::Header,
            Message::Mail { .. } => CommandTag::Mail,
            Message::Eoh => CommandTag::Eoh,
            Message::Optneg { .. } => CommandTag::Optneg,
            Message::Rcpt { .. } => CommandTag::Rcpt,
            Message::Data => CommandTag::Data,
            Message::Quit => CommandTag::Quit,
            Message::Unknown => CommandTag::Unknown,
            Message::AddRcpt { .. } => CommandTag::AddRcpt,
            Message::DelRcpt { .. } => CommandTag::DelRcpt,
            Message::AddRcptPar { .. } => CommandTag::AddRcptPar,
            Message::Accept => CommandTag::Accept,
            Message::ReplBody(_) => CommandTag::ReplBody,
            Message::Continue => CommandTag::Continue,
            Message::Discard => CommandTag::Discard,
            Message::ChgFrom { .. } => CommandTag::ChgFrom,
            Message::ConnFail => CommandTag::ConnFail,
            Message::AddHeader { .. } => CommandTag::AddHeader,
            Message::ChgHeader { .. } => CommandTag::ChgHeader,
            Message::Progress => CommandTag::Progress,
            Message::Quarantine { .. } => CommandTag::Quarantine,
            Message::Reject => CommandTag::Reject,
            Message::Skip => CommandTag::Skip,
            Message::Tempfail => CommandTag::Tempfail,
            Message::ReplyCode { .. } => CommandTag::ReplyCode,
            Message::Shutdown => CommandTag::Shutdown,
        }
    }

    /// Encodes this message as a complete, length-prefixed milter frame.
    pub fn encode(&self) -> Result<Vec<u8>, MilterError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encodes this message into `buf`, appending the 4-byte length prefix,
    /// the 1-byte command tag, and the payload, in that order. Avoids the
    /// extra allocation of [`Message::encode`] when writing many messages
    /// into a shared output buffer (mirrors the teacher's
    /// `encode_command_message`).
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), MilterError> {
        let length_pos = buf.len();
        wire::write_u32(buf, 0); // placeholder, patched below
        wire::write_char(buf, self.command().to_tag());

        let payload_start = buf.len();
        self.encode_payload(buf)?;

        let payload_len = buf.len() - payload_start;
        let length = (payload_len + 1) as u32;
        buf[length_pos..length_pos + 4].copy_from_slice(&length.to_be_bytes());

        Ok(())
    }

    /// Encodes just this message's payload (no length prefix, no tag).
    /// `pub(crate)` so the connection engine can re-encode an
    /// unexpectedly-received message for `Handler::on_unknown`.
    pub(crate) fn encode_payload(&self, buf: &mut Vec<u8>) -> Result<(), MilterError> {
        match self {
            Message::Abort
            | Message::Bodyeob
            | Message::QuitNc
            | Message::Eoh
            | Message::Data
            | Message::Quit
            | Message::Unknown
            | Message::Shutdown
            | Message::Accept
            | Message::Continue
            | Message::Discard
            | Message::ConnFail
            | Message::Progress
            | Message::Reject
            | Message::Skip
            | Message::Tempfail => {}

            Message::Body(b) | Message::ReplBody(b) => wire::write_buf(buf, b),

            Message::Connect {
                hostname,
                family,
                port,
                address,
            } => {
                wire::write_str(buf, hostname);
                wire::write_char(buf, family.to_tag());
                wire::write_u16(buf, *port);
                wire::write_str(buf, address);
            }

            Message::Macro { cmdcode, nameval } => {
                wire::write_char(buf, *cmdcode);
                for item in nameval {
                    wire::write_str(buf, item);
                }
            }

            Message::Helo { helo } => wire::write_str(buf, helo),

            Message::Header { name, value }
            | Message::AddHeader { name, value } => {
                wire::write_str(buf, name);
                wire::write_str(buf, value);
            }

            Message::Mail { args } | Message::Rcpt { args } => {
                wire::write_strs(buf, args)?;
            }

            Message::Optneg {
                version,
                actions,
                protocol,
            } => {
                wire::write_u32(buf, *version);
                wire::write_u32(buf, *actions);
                wire::write_u32(buf, *protocol);
            }

            Message::AddRcpt { rcpt } | Message::DelRcpt { rcpt } => {
                wire::write_str(buf, rcpt);
            }

            Message::AddRcptPar { rcpt, esmtp_arg } => {
                wire::write_str(buf, rcpt);
                wire::write_str(buf, esmtp_arg);
            }

            Message::ChgFrom { from, esmtp_arg } => {
                wire::write_str(buf, from);
                wire::write_str(buf, esmtp_arg);
            }

            Message::ChgHeader { index, name, value } => {
                wire::write_u32(buf, *index);
                wire::write_str(buf, name);
                wire::write_str(buf, value);
            }

            Message::Quarantine { reason } => wire::write_str(buf, reason),

            Message::ReplyCode { smtpcode, text } => {
                wire::write_3chars(buf, smtpcode)?;
                wire::write_char(buf, b' ');
                wire::write_str(buf, text);
            }
        }

        Ok(())
    }

    /// Decodes a single already-framed payload (the bytes following the
    /// tag byte) into a [`Message`], given the command it was tagged with.
    pub(crate) fn decode_payload(tag: CommandTag, payload: &[u8]) -> Result<Message, MilterError> {
        let mut r = PayloadReader::new(payload);

        let msg = match tag {
            CommandTag::Abort => Message::Abort,
            CommandTag::Body => Message::Body(r.read_buf_rest()),
            CommandTag::Connect => {
                let hostname = r.read_str()?;
                let family = AddressFamily::from_tag(r.read_char()?);
                let port = r.read_u16()?;
                let address = r.read_str()?;
                Message::Connect {
                    hostname,
                    family,
                    port,
                    address,
                }
            }
            CommandTag::Macro => {
                let cmdcode = r.read_char()?;
                let mut nameval = Vec::new();
                while r.has_data_left() {
                    nameval.push(r.read_str()?);
                }
                Message::Macro { cmdcode, nameval }
            }
            CommandTag::Bodyeob => Message::Bodyeob,
            CommandTag::Helo => Message::Helo { helo: r.read_str()? },
            CommandTag::QuitNc => Message::QuitNc,
            CommandTag::Header => {
                let name = r.read_str()?;
                let value = r.read_str()?;
                if r.has_data_left() {
                    return Err(MilterError::Codec(
                        "trailing bytes after SMFIC_HEADER fields".to_string(),
                    ));
                }
                Message::Header { name, value }
            }
            CommandTag::Mail => Message::Mail {
                args: r.read_strs_rest()?,
            },
            CommandTag::Eoh => Message::Eoh,
            CommandTag::Optneg => {
                let version = r.read_u32()?;
                let actions = r.read_u32()?;
                let protocol = r.read_u32()?;
                Message::Optneg {
                    version,
                    actions,
                    protocol,
                }
            }
            CommandTag::Rcpt => Message::Rcpt {
                args: r.read_strs_rest()?,
            },
            CommandTag::Data => Message::Data,
            CommandTag::Quit => Message::Quit,
            CommandTag::Unknown => Message::Unknown,
            CommandTag::AddRcpt => Message::AddRcpt { rcpt: r.read_str()? },
            CommandTag::DelRcpt => Message::DelRcpt { rcpt: r.read_str()? },
            CommandTag::AddRcptPar => {
                let rcpt = r.read_str()?;
                let esmtp_arg = r.read_str()?;
                if r.has_data_left() {
                    return Err(MilterError::Codec(
                        "trailing bytes after SMFIR_ADDRCPT_PAR fields".to_string(),
                    ));
                }
                Message::AddRcptPar { rcpt, esmtp_arg }
            }
            CommandTag::Accept => Message::Accept,
            CommandTag::ReplBody => Message::ReplBody(r.read_buf_rest()),
            CommandTag::Continue => Message::Continue,
            CommandTag::Discard => Message::Discard,
            CommandTag::ChgFrom => {
                let from = r.read_str()?;
                let esmtp_arg = r.read_str()?;
                if r.has_data_left() {
                    return Err(MilterError::Codec(
                        "trailing bytes after SMFIR_CHGFROM fields".to_string(),
                    ));
                }
                Message::ChgFrom { from, esmtp_arg }
            }
            CommandTag::ConnFail => Message::ConnFail,
            CommandTag::AddHeader => {
                let name = r.read_str()?;
                let value = r.read_str()?;
                if r.has_data_left() {
                    return Err(MilterError::Codec(
                        "trailing bytes after SMFIR_ADDHEADER fields".to_string(),
                    ));
                }
                Message::AddHeader { name, value }
            }
            CommandTag::ChgHeader => {
                let index = r.read_u32()?;
                let name = r.read_str()?;
                let value = r.read_str()?;
                if r.has_data_left() {
                    return Err(MilterError::Codec(
                        "trailing bytes after SMFIR_CHGHEADER fields".to_string(),
                    ));
                }
                Message::ChgHeader { index, name, value }
            }
            CommandTag::Progress => Message::Progress,
            CommandTag::Quarantine => {
                let reason = r.read_str()?;
                if r.has_data_left() {
                    return Err(MilterError::Codec(
                        "trailing bytes after SMFIR_QUARANTINE fields".to_string(),
                    ));
                }
                Message::Quarantine { reason }
            }
            CommandTag::Reject => Message::Reject,
            CommandTag::Skip => Message::Skip,
            CommandTag::Tempfail => Message::Tempfail,
            CommandTag::ReplyCode => {
                let smtpcode = r.read_3chars()?;
                let _space = r.read_char()?;
                let text = r.read_str()?;
                if r.has_data_left() {
                    return Err(MilterError::Codec(
                        "trailing bytes after SMFIR_REPLYCODE fields".to_string(),
                    ));
                }
                Message::ReplyCode { smtpcode, text }
            }
            CommandTag::Shutdown => Message::Shutdown,
        };

        Ok(msg)
    }
}

/// A round-trip assertion helper shared across this crate's unit tests,
/// mirroring the teacher's `protocol::serde::test_util::test_serde`.
#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Encodes `m`, decodes the result back, and asserts the two are
    /// equal. Panics (via the inner assertion) on any mismatch.
    pub(crate) fn test_roundtrip(m: &Message) {
        let bytes = m.encode().unwrap();
        let tag = CommandTag::from_tag(bytes[4]).unwrap();
        let decoded = Message::decode_payload(tag, &bytes[5..]).unwrap();
        assert_eq!(&decoded, m);
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::test_roundtrip as roundtrip;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn abort_seed_scenario() {
        let m = Message::Abort;
        assert_eq!(m.encode().unwrap(), hex(b"00 00 00 01 41"));
        roundtrip(&m);
    }

    #[test]
    fn body_seed_scenario() {
        let m = Message::Body(b"mybody".to_vec());
        assert_eq!(
            m.encode().unwrap(),
            hex(b"00 00 00 07 42 6D 79 62 6F 64 79")
        );
        roundtrip(&m);
    }

    #[test]
    fn connect_seed_scenario() {
        let m = Message::Connect {
            hostname: "example.com".to_string(),
            family: AddressFamily::Inet,
            port: 1234,
            address: "127.0.0.1".to_string(),
        };
        assert_eq!(
            m.encode().unwrap(),
            hex(b"00 00 00 1A 43 65 78 61 6D 70 6C 65 2E 63 6F 6D 00 34 04 D2 31 32 37 2E 30 2E 30 2E 31 00")
        );
        roundtrip(&m);
    }

    #[test]
    fn header_seed_scenario() {
        let m = Message::Header {
            name: "to".to_string(),
            value: "me".to_string(),
        };
        assert_eq!(
            m.encode().unwrap(),
            hex(b"00 00 00 07 4C 74 6F 00 6D 65 00")
        );
        roundtrip(&m);
    }

    #[test]
    fn chgheader_seed_scenario() {
        let m = Message::ChgHeader {
            index: 1,
            name: "to".to_string(),
            value: "test@example.com".to_string(),
        };
        assert_eq!(
            m.encode().unwrap(),
            hex(b"00 00 00 19 6D 00 00 00 01 74 6F 00 74 65 73 74 40 65 78 61 6D 70 6C 65 2E 63 6F 6D 00")
        );
        roundtrip(&m);
    }

    #[test]
    fn optneg_seed_scenario() {
        let m = Message::Optneg {
            version: 1,
            actions: 2,
            protocol: 3,
        };
        assert_eq!(
            m.encode().unwrap(),
            hex(b"00 00 00 0D 4F 00 00 00 01 00 00 00 02 00 00 00 03")
        );
        roundtrip(&m);
    }

    #[test]
    fn equality_is_order_independent_over_fields() {
        let a = Message::Header {
            name: "to".to_string(),
            value: "me".to_string(),
        };
        let b = Message::Header {
            name: "to".to_string(),
            value: "me".to_string(),
        };
        assert_eq!(a, b);
        assert_ne!(Message::Abort, Message::Quit);
    }

    #[test]
    fn mail_rejects_empty_args() {
        let m = Message::Mail { args: vec![] };
        assert!(m.encode().is_err());
    }

    #[test]
    fn replycode_rejects_wrong_length_code() {
        let mut buf = Vec::new();
        assert!(wire::write_3chars(&mut buf, b"55").is_err());
    }

    /// Parses a string of whitespace-separated hex bytes into a `Vec<u8>`,
    /// used only to keep the seed scenarios in the spec's literal form.
    fn hex(s: &[u8]) -> Vec<u8> {
        std::str::from_utf8(s)
            .unwrap()
            .split_whitespace()
            .map(|b| u8::from_str_radix(b, 16).unwrap())
            .collect()
    }
}
