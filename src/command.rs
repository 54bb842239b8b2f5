//! The milter command catalog: a closed enumeration of wire commands and
//! the small `AddressFamily` value enumeration used by `SMFIC_CONNECT`.
//!
//! Unlike the teacher's `CommandTag` (a `u8`-cast enum, since PulseAudio's
//! tags are contiguous small integers), milter's wire tags are scattered
//! ASCII bytes (`'A'`, `'+'`, `'2'`, ...), so lookup is a `match` table
//! rather than a numeric cast.

use crate::error::MilterError;

/// One of the 32 commands in the milter protocol, partitioned into
/// `SMFIC_*` (MTA to filter) and `SMFIR_*` (filter to MTA) names.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CommandTag {
    Abort,
    Body,
    Connect,
    Macro,
    Bodyeob,
    Helo,
    QuitNc,
    Header,
    Mail,
    Eoh,
    Optneg,
    Rcpt,
    Data,
    Quit,
    Unknown,
    AddRcpt,
    DelRcpt,
    AddRcptPar,
    Accept,
    ReplBody,
    Continue,
    Discard,
    ChgFrom,
    ConnFail,
    AddHeader,
    ChgHeader,
    Progress,
    Quarantine,
    Reject,
    Skip,
    Tempfail,
    ReplyCode,
    Shutdown,
}

/// `(symbolic name, wire tag, variant)` for every command, in catalog order.
const CATALOG: &[(&str, u8, CommandTag)] = &[
    ("SMFIC_ABORT", b'A', CommandTag::Abort),
    ("SMFIC_BODY", b'B', CommandTag::Body),
    ("SMFIC_CONNECT", b'C', CommandTag::Connect),
    ("SMFIC_MACRO", b'D', CommandTag::Macro),
    ("SMFIC_BODYEOB", b'E', CommandTag::Bodyeob),
    ("SMFIC_HELO", b'H', CommandTag::Helo),
    ("SMFIC_QUIT_NC", b'K', CommandTag::QuitNc),
    ("SMFIC_HEADER", b'L', CommandTag::Header),
    ("SMFIC_MAIL", b'M', CommandTag::Mail),
    ("SMFIC_EOH", b'N', CommandTag::Eoh),
    ("SMFIC_OPTNEG", b'O', CommandTag::Optneg),
    ("SMFIC_RCPT", b'R', CommandTag::Rcpt),
    ("SMFIC_DATA", b'T', CommandTag::Data),
    ("SMFIC_QUIT", b'Q', CommandTag::Quit),
    ("SMFIC_UNKNOWN", b'U', CommandTag::Unknown),
    ("SMFIR_ADDRCPT", b'+', CommandTag::AddRcpt),
    ("SMFIR_DELRCPT", b'-', CommandTag::DelRcpt),
    ("SMFIR_ADDRCPT_PAR", b'2', CommandTag::AddRcptPar),
    ("SMFIR_SHUTDOWN", b'4', CommandTag::Shutdown),
    ("SMFIR_ACCEPT", b'a', CommandTag::Accept),
    ("SMFIR_REPLBODY", b'b', CommandTag::ReplBody),
    ("SMFIR_CONTINUE", b'c', CommandTag::Continue),
    ("SMFIR_DISCARD", b'd', CommandTag::Discard),
    ("SMFIR_CHGFROM", b'e', CommandTag::ChgFrom),
    ("SMFIR_CONN_FAIL", b'f', CommandTag::ConnFail),
    ("SMFIR_ADDHEADER", b'h', CommandTag::AddHeader),
    ("SMFIR_CHGHEADER", b'm', CommandTag::ChgHeader),
    ("SMFIR_PROGRESS", b'p', CommandTag::Progress),
    ("SMFIR_QUARANTINE", b'q', CommandTag::Quarantine),
    ("SMFIR_REJECT", b'r', CommandTag::Reject),
    ("SMFIR_SKIP", b's', CommandTag::Skip),
    ("SMFIR_TEMPFAIL", b't', CommandTag::Tempfail),
    ("SMFIR_REPLYCODE", b'y', CommandTag::ReplyCode),
];

impl CommandTag {
    /// Returns the symbolic wire name, e.g. `"SMFIC_HEADER"`.
    pub fn name(self) -> &'static str {
        CATALOG
            .iter()
            .find(|(_, _, tag)| *tag == self)
            .map(|(name, _, _)| *name)
            .expect("every CommandTag variant is listed in CATALOG")
    }

    /// The one-byte wire tag for this command.
    pub fn to_tag(self) -> u8 {
        CATALOG
            .iter()
            .find(|(_, _, tag)| *tag == self)
            .map(|(_, byte, _)| *byte)
            .expect("every CommandTag variant is listed in CATALOG")
    }

    /// Maps a wire tag byte to its command, or `None` if the byte doesn't
    /// correspond to any currently-defined command.
    pub fn from_tag(byte: u8) -> Option<CommandTag> {
        CATALOG
            .iter()
            .find(|(_, tag_byte, _)| *tag_byte == byte)
            .map(|(_, _, tag)| *tag)
    }

    /// Whether `name` is a symbolic command name in the catalog.
    pub fn is_valid(name: &str) -> bool {
        CATALOG.iter().any(|(n, _, _)| *n == name)
    }

    /// Looks a command up by its symbolic name (e.g. `"SMFIC_ABORT"`).
    ///
    /// This is the dynamic-construction counterpart to `Message::new` in
    /// the distilled specification: it exists so that building a message
    /// from an externally supplied command name fails with
    /// [`MilterError::InvalidCommand`] exactly as the source does, without
    /// requiring the typed [`crate::Message`] variants (which cannot be
    /// misnamed by construction) to carry a runtime name check too.
    pub fn from_name(name: &str) -> Result<CommandTag, MilterError> {
        CATALOG
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, _, tag)| *tag)
            .ok_or_else(|| MilterError::InvalidCommand(name.to_string()))
    }
}

/// The `SMFIA_*` address family carried by `SMFIC_CONNECT`.
///
/// Lookups never fail; an unrecognized name or tag yields
/// [`AddressFamily::Unknown`], matching the behavior of the Python
/// `ProtocolFamily.lookupByName`/`lookupByValue` overrides in the source.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum AddressFamily {
    /// `SMFIA_UNKNOWN` ('U'), also the fallback for any unrecognized value.
    #[default]
    Unknown,
    /// `SMFIA_UNIX` ('L'), a UNIX domain socket.
    Unix,
    /// `SMFIA_INET` ('4'), an IPv4 socket.
    Inet,
    /// `SMFIA_INET6` ('6'), an IPv6 socket.
    Inet6,
}

impl AddressFamily {
    /// The one-byte wire tag for this address family.
    pub fn to_tag(self) -> u8 {
        match self {
            AddressFamily::Unknown => b'U',
            AddressFamily::Unix => b'L',
            AddressFamily::Inet => b'4',
            AddressFamily::Inet6 => b'6',
        }
    }

    /// Maps a wire tag byte to an address family, defaulting to `Unknown`.
    pub fn from_tag(byte: u8) -> AddressFamily {
        match byte {
            b'L' => AddressFamily::Unix,
            b'4' => AddressFamily::Inet,
            b'6' => AddressFamily::Inet6,
            _ => AddressFamily::Unknown,
        }
    }

    /// Maps a symbolic name (`"SMFIA_INET"`, ...) to an address family,
    /// defaulting to `Unknown`.
    pub fn from_name(name: &str) -> AddressFamily {
        match name {
            "SMFIA_UNIX" => AddressFamily::Unix,
            "SMFIA_INET" => AddressFamily::Inet,
            "SMFIA_INET6" => AddressFamily::Inet6,
            _ => AddressFamily::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn catalog_round_trips_every_tag() {
        for (name, byte, tag) in CATALOG {
            assert_eq!(CommandTag::from_tag(*byte), Some(*tag));
            assert_eq!(tag.to_tag(), *byte);
            assert_eq!(tag.name(), *name);
            assert!(CommandTag::is_valid(name));
        }
    }

    #[test]
    fn from_name_rejects_unknown_commands() {
        assert!(matches!(
            CommandTag::from_name("NONEXISTANT"),
            Err(MilterError::InvalidCommand(_))
        ));
        assert!(!CommandTag::is_valid("NONEXISTANT"));
    }

    #[test]
    fn from_tag_rejects_unmapped_bytes() {
        assert_eq!(CommandTag::from_tag(0x00), None);
    }

    #[test]
    fn address_family_never_fails() {
        assert_eq!(
            AddressFamily::from_name("anything-unknown"),
            AddressFamily::Unknown
        );
        assert_eq!(AddressFamily::from_tag(0x01), AddressFamily::Unknown);
        assert_eq!(AddressFamily::from_tag(b'4'), AddressFamily::Inet);
        assert_eq!(AddressFamily::from_name("SMFIA_INET6"), AddressFamily::Inet6);
    }
}
