//! Shared wire definitions between udpgrm userspace tools and the kernel side
//!
//! Everything here must be:
//! - `#[repr(C)]` for stable memory layout
//! - `no_std` compatible so the BPF side can use the same definitions
//! - Bit-exact with the socket option payloads udpgrm accepts

#![cfg_attr(not(feature = "userspace"), no_std)]

/// Socket option ids at the `IPPROTO_UDP` level
pub mod sockopt {
    pub const UDP_GRM_WORKING_GEN: i32 = 200;
    pub const UDP_GRM_SOCKET_GEN: i32 = 201;
    pub const UDP_GRM_DISSECTOR: i32 = 202;
    pub const UDP_GRM_FLOW_ASSURE: i32 = 203;
    pub const UDP_GRM_SOCKET_APP: i32 = 204;
}

/// Flag bits carried in the upper half of the dissector tag word
pub mod flags {
    pub const VERBOSE: u32 = 0x8000;
    pub const READY: u32 = 0x10000;
    pub const FAILED: u32 = 0x20000;

    pub const MASK: u32 = VERBOSE | READY | FAILED;
}

/// Returned in `socket_idx` while the daemon has not assigned a slot yet
pub const SOCKET_IDX_UNASSIGNED: u32 = 0xffff_ffff;

/// Size of the NUL-padded tubular label field
pub const LABEL_LEN: usize = 100;

/// Size of the trailing table shared by the CBPF and bespoke dissectors
pub const TABLE_LEN: usize = 512;

/// Tag, flow timeout, max apps, digest, label
pub const DISSECTOR_HEADER_LEN: usize = 16 + LABEL_LEN;

/// Header plus table length word plus table
pub const DISSECTOR_FULL_LEN: usize = DISSECTOR_HEADER_LEN + 4 + TABLE_LEN;

pub const MAX_CBPF_INSNS: usize = TABLE_LEN / core::mem::size_of::<SockFilter>();

/// Hostname bytes in one bespoke table entry
pub const HOSTNAME_LEN: usize = 62;

pub const HOSTNAME_ENTRY_LEN: usize = 2 + HOSTNAME_LEN;

pub const MAX_HOSTNAMES: usize = TABLE_LEN / HOSTNAME_ENTRY_LEN;

/// Dissector variant tag (low bits of the first record word)
///
/// Tag 2 is reserved and never sent.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DissectorType {
    Flow = 0,
    Cbpf = 1,
    Bespoke = 3,
    Noop = 4,
}

impl DissectorType {
    /// Split a raw tag word into its type and flag bits
    pub const fn from_raw(word: u32) -> Option<(Self, u32)> {
        let flags = word & flags::MASK;
        let kind = match word & !flags::MASK {
            0 => Self::Flow,
            1 => Self::Cbpf,
            3 => Self::Bespoke,
            4 => Self::Noop,
            _ => return None,
        };
        Some((kind, flags))
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Flow => "flow",
            Self::Cbpf => "cbpf",
            Self::Bespoke => "bespoke",
            Self::Noop => "noop",
        }
    }

    /// Whether the record carries the table length word and table
    pub const fn has_table(&self) -> bool {
        matches!(self, Self::Cbpf | Self::Bespoke)
    }

    pub const fn record_len(&self) -> usize {
        if self.has_table() {
            DISSECTOR_FULL_LEN
        } else {
            DISSECTOR_HEADER_LEN
        }
    }
}

/// One classic BPF instruction, same layout as `struct sock_filter`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

/// Payload of a `UDP_GRM_SOCKET_GEN` get
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct SocketGen {
    pub socket_gen: u32,
    pub socket_idx: u32,
}

#[cfg(feature = "userspace")]
const _: () = {
    assert!(
        core::mem::size_of::<SockFilter>() == 8,
        "SockFilter must be exactly 8 bytes"
    );
    assert!(
        core::mem::size_of::<SocketGen>() == 8,
        "SocketGen must be exactly 8 bytes"
    );
    assert!(DISSECTOR_FULL_LEN == 632, "dissector record must be 632 bytes");
    assert!(MAX_CBPF_INSNS == 64);
    assert!(MAX_HOSTNAMES == 8);
};
