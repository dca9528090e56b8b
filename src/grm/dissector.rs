//! Dissector configuration records
//!
//! udpgrm keeps one dissector per reuseport group. The record is written
//! once, through the first socket of the group, with `UDP_GRM_DISSECTOR`.
//! Layout (native endian):
//!
//! ```text
//!   0  u32  type | flags
//!   4  u32  flow timeout (flow only)
//!   8  u32  max apps (cbpf, bespoke)
//!  12  u32  digest (bespoke)
//!  16  [u8; 100] label
//! 116  u32  table entries     (cbpf, bespoke)
//! 120  [u8; 512] table        (cbpf, bespoke)
//! ```

use super::retry::{is_eagain, RetryPolicy};
use super::{GrmOption, GrmSocket};
use crate::{ActivateError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use tracing::{debug, info};
use udpgrm_common::{
    flags, DissectorType, SockFilter, DISSECTOR_FULL_LEN, HOSTNAME_LEN, LABEL_LEN, MAX_CBPF_INSNS,
    MAX_HOSTNAMES, TABLE_LEN,
};

/// Default flow entry timeout for the flow dissector, in seconds
pub const DEFAULT_FLOW_TIMEOUT: u32 = 124;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostnameRoute {
    pub app: u8,
    pub hostname: String,
}

impl std::str::FromStr for HostnameRoute {
    type Err = ActivateError;

    /// Parses `hostname:app`; a missing app number means app 0
    fn from_str(s: &str) -> Result<Self> {
        let (hostname, app) = match s.rsplit_once(':') {
            Some((h, a)) => {
                let app = a.parse::<u8>().map_err(|_| {
                    ActivateError::ConfigError(format!("invalid app number in {:?}", s))
                })?;
                (h, app)
            }
            None => (s, 0),
        };
        if hostname.is_empty() {
            return Err(ActivateError::ConfigError(format!("empty hostname in {:?}", s)));
        }
        Ok(HostnameRoute {
            app,
            hostname: hostname.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DissectorConfig {
    Flow {
        flow_timeout: u32,
        label: String,
        verbose: bool,
    },
    Cbpf {
        apps_max: u32,
        label: String,
        program: Vec<SockFilter>,
        verbose: bool,
    },
    Bespoke {
        apps_max: u32,
        digest: u32,
        label: String,
        hostnames: Vec<HostnameRoute>,
        verbose: bool,
    },
    Noop {
        label: String,
        verbose: bool,
    },
}

/// Everything the command line can say about dissection. Several fields may
/// be set at once; [`DissectorSelection::build`] picks one variant.
#[derive(Debug, Clone, Default)]
pub struct DissectorSelection {
    pub program: Vec<SockFilter>,
    pub digest: u32,
    pub hostnames: Vec<HostnameRoute>,
    pub noop: bool,
    pub label: String,
    pub flow_timeout: u32,
    pub apps_max: u32,
    pub verbose: bool,
}

impl DissectorSelection {
    /// True when the caller asked for any dissector at all
    pub fn is_requested(&self) -> bool {
        !self.program.is_empty()
            || self.digest != 0
            || !self.label.is_empty()
            || !self.hostnames.is_empty()
            || self.noop
    }

    /// Pick the variant by precedence: cbpf, bespoke, noop, flow
    pub fn build(&self) -> Result<Option<DissectorConfig>> {
        if !self.is_requested() {
            return Ok(None);
        }

        let config = if !self.program.is_empty() {
            DissectorConfig::Cbpf {
                apps_max: self.apps_max,
                label: self.label.clone(),
                program: self.program.clone(),
                verbose: self.verbose,
            }
        } else if self.digest != 0 {
            DissectorConfig::Bespoke {
                apps_max: self.apps_max,
                digest: self.digest,
                label: self.label.clone(),
                hostnames: self.hostnames.clone(),
                verbose: self.verbose,
            }
        } else if self.noop {
            DissectorConfig::Noop {
                label: self.label.clone(),
                verbose: self.verbose,
            }
        } else if !self.label.is_empty() {
            DissectorConfig::Flow {
                flow_timeout: self.flow_timeout,
                label: self.label.clone(),
                verbose: self.verbose,
            }
        } else {
            return Err(ActivateError::ConfigError(
                "hostname routes (--sni) need a digest (--digest)".to_string(),
            ));
        };

        config.validate()?;
        Ok(Some(config))
    }
}

impl DissectorConfig {
    pub fn kind(&self) -> DissectorType {
        match self {
            DissectorConfig::Flow { .. } => DissectorType::Flow,
            DissectorConfig::Cbpf { .. } => DissectorType::Cbpf,
            DissectorConfig::Bespoke { .. } => DissectorType::Bespoke,
            DissectorConfig::Noop { .. } => DissectorType::Noop,
        }
    }

    fn verbose(&self) -> bool {
        match self {
            DissectorConfig::Flow { verbose, .. }
            | DissectorConfig::Cbpf { verbose, .. }
            | DissectorConfig::Bespoke { verbose, .. }
            | DissectorConfig::Noop { verbose, .. } => *verbose,
        }
    }

    fn label(&self) -> &str {
        match self {
            DissectorConfig::Flow { label, .. }
            | DissectorConfig::Cbpf { label, .. }
            | DissectorConfig::Bespoke { label, .. }
            | DissectorConfig::Noop { label, .. } => label,
        }
    }

    /// Check the variable parts fit into the fixed record
    pub fn validate(&self) -> Result<()> {
        if self.label().len() > LABEL_LEN {
            return Err(ActivateError::ConfigError(format!(
                "label is {} bytes, at most {} allowed",
                self.label().len(),
                LABEL_LEN
            )));
        }
        match self {
            DissectorConfig::Cbpf { program, .. } if program.len() > MAX_CBPF_INSNS => {
                Err(ActivateError::ConfigError(format!(
                    "cBPF program has {} instructions, at most {} allowed",
                    program.len(),
                    MAX_CBPF_INSNS
                )))
            }
            DissectorConfig::Bespoke { hostnames, .. } => {
                if hostnames.len() > MAX_HOSTNAMES {
                    return Err(ActivateError::ConfigError(format!(
                        "{} hostnames given, at most {} allowed",
                        hostnames.len(),
                        MAX_HOSTNAMES
                    )));
                }
                if let Some(h) = hostnames.iter().find(|h| h.hostname.len() > HOSTNAME_LEN) {
                    return Err(ActivateError::ConfigError(format!(
                        "hostname {:?} is longer than {} bytes",
                        h.hostname, HOSTNAME_LEN
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Encode into the record udpgrm expects
    pub fn encode(&self) -> Result<Bytes> {
        self.validate()?;

        let mut buf = BytesMut::with_capacity(DISSECTOR_FULL_LEN);
        let mut tag = self.kind() as u32;
        if self.verbose() {
            tag |= flags::VERBOSE;
        }
        buf.put_u32_ne(tag);

        match self {
            DissectorConfig::Flow { flow_timeout, .. } => {
                buf.put_u32_ne(*flow_timeout);
                buf.put_u32_ne(0);
                buf.put_u32_ne(0);
            }
            DissectorConfig::Cbpf { apps_max, .. } => {
                buf.put_u32_ne(0);
                buf.put_u32_ne(*apps_max);
                buf.put_u32_ne(0);
            }
            DissectorConfig::Bespoke {
                apps_max, digest, ..
            } => {
                buf.put_u32_ne(0);
                buf.put_u32_ne(*apps_max);
                buf.put_u32_ne(*digest);
            }
            DissectorConfig::Noop { .. } => {
                buf.put_u32_ne(0);
                buf.put_u32_ne(0);
                buf.put_u32_ne(0);
            }
        }
        put_padded(&mut buf, self.label().as_bytes(), LABEL_LEN);

        match self {
            DissectorConfig::Cbpf { program, .. } => {
                buf.put_u32_ne(program.len() as u32);
                let start = buf.len();
                for insn in program {
                    buf.put_u16_ne(insn.code);
                    buf.put_u8(insn.jt);
                    buf.put_u8(insn.jf);
                    buf.put_u32_ne(insn.k);
                }
                let used = buf.len() - start;
                buf.put_bytes(0, TABLE_LEN - used);
            }
            DissectorConfig::Bespoke { hostnames, .. } => {
                buf.put_u32_ne(hostnames.len() as u32);
                let start = buf.len();
                for route in hostnames {
                    buf.put_u8(route.app);
                    buf.put_u8(0);
                    put_padded(&mut buf, route.hostname.as_bytes(), HOSTNAME_LEN);
                }
                let used = buf.len() - start;
                buf.put_bytes(0, TABLE_LEN - used);
            }
            _ => {}
        }

        debug_assert_eq!(buf.len(), self.kind().record_len());
        Ok(buf.freeze())
    }

    /// Install on the group. Only the first socket carries the dissector,
    /// udpgrm ties it to the listening address, not to a descriptor.
    pub fn install<S: GrmSocket>(
        &self,
        first: &S,
        addr: SocketAddr,
        policy: &RetryPolicy,
    ) -> Result<()> {
        let record = self.encode()?;
        debug!(
            "Installing {} dissector on {} ({} bytes)",
            self.kind().as_str(),
            addr,
            record.len()
        );

        policy
            .retry(is_eagain, || first.set_grm_option(GrmOption::Dissector, &record))
            .map_err(|e| {
                if e.raw_os_error() == Some(libc::EPERM) {
                    ActivateError::DissectorConflict { addr, source: e }
                } else {
                    ActivateError::kernel("setsockopt(UDP_GRM_DISSECTOR)", e)
                }
            })?;

        info!("Installed {} dissector on {}", self.kind().as_str(), addr);
        Ok(())
    }
}

fn put_padded(buf: &mut BytesMut, data: &[u8], width: usize) {
    let n = data.len().min(width);
    buf.put_slice(&data[..n]);
    buf.put_bytes(0, width - n);
}

#[cfg(test)]
mod tests {
    use super::*;
    use udpgrm_common::DISSECTOR_HEADER_LEN;

    fn word(b: &[u8], off: usize) -> u32 {
        u32::from_ne_bytes(b[off..off + 4].try_into().unwrap())
    }

    #[test]
    fn test_precedence_cbpf_wins() {
        let sel = DissectorSelection {
            program: vec![SockFilter {
                code: 6,
                jt: 0,
                jf: 0,
                k: 0,
            }],
            digest: 7,
            noop: true,
            label: "x".to_string(),
            ..Default::default()
        };
        assert_eq!(sel.build().unwrap().unwrap().kind(), DissectorType::Cbpf);
    }

    #[test]
    fn test_precedence_digest_over_noop() {
        let sel = DissectorSelection {
            digest: 7,
            noop: true,
            label: "x".to_string(),
            ..Default::default()
        };
        assert_eq!(sel.build().unwrap().unwrap().kind(), DissectorType::Bespoke);
    }

    #[test]
    fn test_precedence_noop_over_flow() {
        let sel = DissectorSelection {
            noop: true,
            label: "x".to_string(),
            ..Default::default()
        };
        assert_eq!(sel.build().unwrap().unwrap().kind(), DissectorType::Noop);
    }

    #[test]
    fn test_label_alone_is_flow() {
        let sel = DissectorSelection {
            label: "tubular".to_string(),
            flow_timeout: DEFAULT_FLOW_TIMEOUT,
            ..Default::default()
        };
        let cfg = sel.build().unwrap().unwrap();
        assert_eq!(
            cfg,
            DissectorConfig::Flow {
                flow_timeout: 124,
                label: "tubular".to_string(),
                verbose: false
            }
        );
    }

    #[test]
    fn test_nothing_requested() {
        assert!(DissectorSelection::default().build().unwrap().is_none());
    }

    #[test]
    fn test_hostnames_without_digest() {
        let sel = DissectorSelection {
            hostnames: vec!["a.example:1".parse().unwrap()],
            ..Default::default()
        };
        assert!(matches!(sel.build(), Err(ActivateError::ConfigError(_))));
    }

    #[test]
    fn test_noop_layout() {
        let rec = DissectorConfig::Noop {
            label: "abc".to_string(),
            verbose: true,
        }
        .encode()
        .unwrap();
        assert_eq!(rec.len(), DISSECTOR_HEADER_LEN);
        assert_eq!(word(&rec, 0), 4 | flags::VERBOSE);
        assert_eq!(&rec[16..19], b"abc");
        assert!(rec[19..116].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_bespoke_layout() {
        let rec = DissectorConfig::Bespoke {
            apps_max: 4,
            digest: 0x10,
            label: "tub".to_string(),
            hostnames: vec!["www.example.com:2".parse().unwrap()],
            verbose: false,
        }
        .encode()
        .unwrap();
        assert_eq!(rec.len(), DISSECTOR_FULL_LEN);
        assert_eq!(word(&rec, 0), 3);
        assert_eq!(word(&rec, 8), 4);
        assert_eq!(word(&rec, 12), 0x10);
        assert_eq!(&rec[16..19], b"tub");
        assert!(rec[19..116].iter().all(|b| *b == 0));
        assert_eq!(word(&rec, 116), 1);
        assert_eq!(rec[120], 2);
        assert_eq!(rec[121], 0);
        assert_eq!(&rec[122..137], b"www.example.com");
    }

    #[test]
    fn test_digest_keeps_label() {
        let sel = DissectorSelection {
            digest: 3,
            label: "tub".to_string(),
            ..Default::default()
        };
        let rec = sel.build().unwrap().unwrap().encode().unwrap();
        assert_eq!(word(&rec, 0), DissectorType::Bespoke as u32);
        assert_eq!(&rec[16..19], b"tub");
    }

    #[test]
    fn test_too_many_instructions() {
        let cfg = DissectorConfig::Cbpf {
            apps_max: 0,
            label: String::new(),
            program: vec![SockFilter::default(); MAX_CBPF_INSNS + 1],
            verbose: false,
        };
        assert!(matches!(cfg.encode(), Err(ActivateError::ConfigError(_))));
    }

    #[test]
    fn test_label_too_long() {
        let cfg = DissectorConfig::Noop {
            label: "x".repeat(LABEL_LEN + 1),
            verbose: false,
        };
        assert!(cfg.encode().is_err());
    }

    #[test]
    fn test_hostname_route_parse() {
        let r: HostnameRoute = "quic.example:3".parse().unwrap();
        assert_eq!(r.app, 3);
        assert_eq!(r.hostname, "quic.example");
        let r: HostnameRoute = "bare.example".parse().unwrap();
        assert_eq!(r.app, 0);
        assert!("x:300".parse::<HostnameRoute>().is_err());
    }
}
