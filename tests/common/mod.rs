//! In-process stand-in for the udpgrm daemon
//!
//! Sockets share one `Kernel` (one reuseport group). It understands the same
//! option calls as udpgrm and records each of them.

#![allow(dead_code)]

use std::cell::RefCell;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use udpgrm_activate::fdstore::FdStore;
use udpgrm_activate::grm::dissector::{DissectorConfig, HostnameRoute};
use udpgrm_activate::grm::{GrmOption, GrmSocket};
use udpgrm_activate::Result;
use udpgrm_common::{
    flags, DissectorType, SockFilter, DISSECTOR_HEADER_LEN, HOSTNAME_ENTRY_LEN, HOSTNAME_LEN,
    LABEL_LEN, SOCKET_IDX_UNASSIGNED,
};

#[derive(Debug, Default)]
pub struct KernelState {
    pub loaded: bool,
    pub working_gen: u32,
    /// Raw record of the installed dissector
    pub dissector: Option<Vec<u8>>,
    /// (socket id, option) for every set call, in order
    pub sets: Vec<(usize, GrmOption)>,
    pub socket_gen: Vec<(u32, u32)>,
    pub socket_app: Vec<Option<u32>>,
    pub next_idx: u32,
    /// Polls of SOCKET_GEN before a slot is handed out; None never assigns
    pub assign_after: Option<u32>,
    pub polls: Vec<u32>,
    /// EAGAIN answers left before sets go through
    pub busy: u32,
}

#[derive(Clone)]
pub struct Kernel(pub Rc<RefCell<KernelState>>);

impl Kernel {
    pub fn new(working_gen: u32) -> Self {
        Kernel(Rc::new(RefCell::new(KernelState {
            loaded: true,
            working_gen,
            assign_after: Some(1),
            ..Default::default()
        })))
    }

    pub fn unloaded() -> Self {
        Kernel(Rc::new(RefCell::new(KernelState::default())))
    }

    pub fn sockets(&self, n: usize) -> Vec<FakeSocket> {
        let mut st = self.0.borrow_mut();
        (0..n)
            .map(|_| {
                st.socket_gen.push((0, SOCKET_IDX_UNASSIGNED));
                st.socket_app.push(None);
                st.polls.push(0);
                FakeSocket {
                    id: st.socket_gen.len() - 1,
                    kernel: self.clone(),
                }
            })
            .collect()
    }

    pub fn state(&self) -> std::cell::Ref<'_, KernelState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> std::cell::RefMut<'_, KernelState> {
        self.0.borrow_mut()
    }

    pub fn sets_of(&self, option: GrmOption) -> Vec<usize> {
        self.state()
            .sets
            .iter()
            .filter(|(_, o)| *o == option)
            .map(|(id, _)| *id)
            .collect()
    }
}

pub struct FakeSocket {
    pub id: usize,
    kernel: Kernel,
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn word(b: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes(b[off..off + 4].try_into().unwrap())
}

impl GrmSocket for FakeSocket {
    fn set_grm_option(&self, option: GrmOption, value: &[u8]) -> io::Result<()> {
        let mut st = self.kernel.0.borrow_mut();
        st.sets.push((self.id, option));
        if !st.loaded {
            return Err(errno(libc::ENOPROTOOPT));
        }
        if st.busy > 0 {
            st.busy -= 1;
            return Err(errno(libc::EAGAIN));
        }
        match option {
            GrmOption::Dissector => {
                decode_dissector(value).map_err(|_| errno(libc::EINVAL))?;
                match &st.dissector {
                    Some(existing) if existing.as_slice() != value => Err(errno(libc::EPERM)),
                    _ => {
                        st.dissector = Some(value.to_vec());
                        Ok(())
                    }
                }
            }
            GrmOption::SocketApp => {
                let app = word(value, 0);
                let apps_max = st
                    .dissector
                    .as_ref()
                    .map(|d| word(d, 8))
                    .unwrap_or(0);
                if apps_max != 0 && app >= apps_max {
                    return Err(errno(libc::EOVERFLOW));
                }
                st.socket_app[self.id] = Some(app);
                Ok(())
            }
            GrmOption::SocketGen => {
                let gen = word(value, 0);
                let idx = st.socket_gen[self.id].1;
                st.socket_gen[self.id] = (gen, idx);
                Ok(())
            }
            GrmOption::WorkingGen => {
                st.working_gen = word(value, 0);
                Ok(())
            }
            GrmOption::FlowAssure => Err(errno(libc::EINVAL)),
        }
    }

    fn get_grm_option(&self, option: GrmOption, buf: &mut [u8]) -> io::Result<usize> {
        let mut st = self.kernel.0.borrow_mut();
        if !st.loaded {
            return Err(errno(libc::ENOPROTOOPT));
        }
        match option {
            GrmOption::WorkingGen => {
                buf[..4].copy_from_slice(&st.working_gen.to_ne_bytes());
                Ok(4)
            }
            GrmOption::SocketGen => {
                st.polls[self.id] += 1;
                let (gen, idx) = st.socket_gen[self.id];
                let due = st
                    .assign_after
                    .map(|n| st.polls[self.id] >= n)
                    .unwrap_or(false);
                if idx == SOCKET_IDX_UNASSIGNED && gen != 0 && due {
                    let new_idx = st.next_idx;
                    st.next_idx += 1;
                    st.socket_gen[self.id] = (gen, new_idx);
                }
                let (gen, idx) = st.socket_gen[self.id];
                buf[..4].copy_from_slice(&gen.to_ne_bytes());
                buf[4..8].copy_from_slice(&idx.to_ne_bytes());
                Ok(8)
            }
            _ => Err(errno(libc::EINVAL)),
        }
    }
}

/// Parse a dissector record the way udpgrm reads it. Returns the config and
/// its flag bits.
pub fn decode_dissector(rec: &[u8]) -> std::result::Result<(DissectorConfig, u32), String> {
    if rec.len() < DISSECTOR_HEADER_LEN {
        return Err(format!("record too short: {}", rec.len()));
    }
    let (kind, fl) = DissectorType::from_raw(word(rec, 0)).ok_or("bad tag")?;
    if rec.len() != kind.record_len() {
        return Err(format!("bad length {} for {:?}", rec.len(), kind));
    }
    let verbose = fl & flags::VERBOSE != 0;
    let label_field = &rec[16..16 + LABEL_LEN];
    let label_end = label_field.iter().position(|b| *b == 0).unwrap_or(LABEL_LEN);
    if label_field[label_end..].iter().any(|b| *b != 0) {
        return Err("label not zero padded".to_string());
    }
    let label = String::from_utf8(label_field[..label_end].to_vec()).map_err(|e| e.to_string())?;

    let config = match kind {
        DissectorType::Flow => DissectorConfig::Flow {
            flow_timeout: word(rec, 4),
            label,
            verbose,
        },
        DissectorType::Noop => DissectorConfig::Noop { label, verbose },
        DissectorType::Cbpf => {
            let n = word(rec, 116) as usize;
            let table = &rec[120..];
            let program = (0..n)
                .map(|i| {
                    let e = &table[i * 8..i * 8 + 8];
                    SockFilter {
                        code: u16::from_ne_bytes([e[0], e[1]]),
                        jt: e[2],
                        jf: e[3],
                        k: u32::from_ne_bytes([e[4], e[5], e[6], e[7]]),
                    }
                })
                .collect();
            if table[n * 8..].iter().any(|b| *b != 0) {
                return Err("table not zero padded".to_string());
            }
            DissectorConfig::Cbpf {
                apps_max: word(rec, 8),
                label,
                program,
                verbose,
            }
        }
        DissectorType::Bespoke => {
            let n = word(rec, 116) as usize;
            let table = &rec[120..];
            let mut hostnames = Vec::with_capacity(n);
            for i in 0..n {
                let e = &table[i * HOSTNAME_ENTRY_LEN..(i + 1) * HOSTNAME_ENTRY_LEN];
                let host = &e[2..2 + HOSTNAME_LEN];
                let end = host.iter().position(|b| *b == 0).unwrap_or(HOSTNAME_LEN);
                hostnames.push(HostnameRoute {
                    app: e[0],
                    hostname: String::from_utf8(host[..end].to_vec()).map_err(|e| e.to_string())?,
                });
            }
            DissectorConfig::Bespoke {
                apps_max: word(rec, 8),
                digest: word(rec, 12),
                label,
                hostnames,
                verbose,
            }
        }
    };
    Ok((config, fl))
}

/// Descriptor store that only remembers what it was told
#[derive(Default)]
pub struct RecordingStore {
    pub events: RefCell<Vec<(String, String, Vec<RawFd>)>>,
}

impl FdStore for RecordingStore {
    fn remove(&self, name: &str) -> Result<()> {
        self.events
            .borrow_mut()
            .push(("remove".to_string(), name.to_string(), Vec::new()));
        Ok(())
    }

    fn store(&self, name: &str, fds: &[RawFd]) -> Result<()> {
        self.events
            .borrow_mut()
            .push(("store".to_string(), name.to_string(), fds.to_vec()));
        Ok(())
    }
}
