//! The `SMFIF_*`/`SMFIP_*` bitfields negotiated in `SMFIC_OPTNEG`.
//!
//! Modeled as [`bitflags`] structs rather than bare `u32` constants,
//! following the teacher's `protocol::DescriptorFlags` pattern, so call
//! sites get typed `contains`/`&`/`|` instead of raw bitwise arithmetic on
//! unlabeled integers.

use bitflags::bitflags;

bitflags! {
    /// `SMFIF_*` — actions the filter may perform, as advertised during
    /// option negotiation.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Actions: u32 {
        /// `SMFIF_ADDHDRS` — the filter may add headers.
        const ADDHDRS = 0x01;
        /// `SMFIF_CHGBODY` — the filter may replace the message body.
        const CHGBODY = 0x02;
        /// `SMFIF_ADDRCPT` — the filter may add recipients.
        const ADDRCPT = 0x04;
        /// `SMFIF_DELRCPT` — the filter may remove recipients.
        const DELRCPT = 0x08;
        /// `SMFIF_CHGHDRS` — the filter may change/delete headers.
        const CHGHDRS = 0x10;
        /// `SMFIF_QUARANTINE` — the filter may quarantine the message.
        const QUARANTINE = 0x20;
    }
}

bitflags! {
    /// `SMFIP_*` — protocol steps the MTA may elide for this filter.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct ProtocolOpts: u32 {
        /// `SMFIP_NOCONNECT` — skip the connection information callback.
        const NOCONNECT = 0x0000_0001;
        /// `SMFIP_NOHELO` — skip the HELO callback.
        const NOHELO = 0x0000_0002;
        /// `SMFIP_NOMAIL` — skip the MAIL FROM callback.
        const NOMAIL = 0x0000_0004;
        /// `SMFIP_NORCPT` — skip the RCPT TO callback.
        const NORCPT = 0x0000_0008;
        /// `SMFIP_NOBODY` — skip the body callback.
        const NOBODY = 0x0000_0010;
        /// `SMFIP_NOHDRS` — skip the header callback.
        const NOHDRS = 0x0000_0020;
        /// `SMFIP_NOEOH` — skip the end-of-headers callback.
        const NOEOH = 0x0000_0040;
        /// `SMFIP_NOHREPL` (also known as `SMFIP_NR_HDR`) — don't expect a
        /// reply to header callbacks.
        const NOHREPL = 0x0000_0080;
        /// `SMFIP_NOUNKNOWN` — skip the unknown-command callback.
        const NOUNKNOWN = 0x0000_0100;
        /// `SMFIP_NODATA` — skip the DATA callback.
        const NODATA = 0x0000_0200;
        /// `SMFIP_SKIP` — filter may return SMFIR_SKIP.
        const SKIP = 0x0000_0400;
        /// `SMFIP_RCPT_REJ` — MTA will forward rejected RCPTs too.
        const RCPT_REJ = 0x0000_0800;
        /// `SMFIP_NR_CONN` — don't expect a reply to the connect callback.
        const NR_CONN = 0x0000_1000;
        /// `SMFIP_NR_HELO` — don't expect a reply to the HELO callback.
        const NR_HELO = 0x0000_2000;
        /// `SMFIP_NR_MAIL` — don't expect a reply to the MAIL callback.
        const NR_MAIL = 0x0000_4000;
        /// `SMFIP_NR_RCPT` — don't expect a reply to the RCPT callback.
        const NR_RCPT = 0x0000_8000;
        /// `SMFIP_NR_DATA` — don't expect a reply to the DATA callback.
        const NR_DATA = 0x0001_0000;
        /// `SMFIP_NR_UNKN` — don't expect a reply to the unknown callback.
        const NR_UNKN = 0x0002_0000;
        /// `SMFIP_NR_EOH` — don't expect a reply to the end-of-headers callback.
        const NR_EOH = 0x0004_0000;
        /// `SMFIP_NR_BODY` — don't expect a reply to the body callback.
        const NR_BODY = 0x0008_0000;
        /// `SMFIP_HDR_LEADSPC` — preserve leading whitespace in header values.
        const HDR_LEADSPC = 0x0010_0000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optneg_intersection_is_a_subset_of_both_sides() {
        let ours = Actions::ADDHDRS | Actions::CHGHDRS | Actions::QUARANTINE;
        let peer = Actions::ADDHDRS | Actions::ADDRCPT;
        let negotiated = ours & peer;

        assert!(ours.contains(negotiated));
        assert!(peer.contains(negotiated));
        assert_eq!(negotiated, Actions::ADDHDRS);
    }
}
