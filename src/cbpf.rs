//! Loader for classic BPF programs in `bpf_asm -c` format
//!
//! Only lines starting with `{` are instructions, e.g.
//! `{ 0x28,  0,  0, 0x0000000c },`. Everything else is ignored.

use crate::{ActivateError, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;
use udpgrm_common::SockFilter;

fn line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\w*\{\s+([x0-9a-f]+),\s+(\d+),\s+(\d+),\s+([x0-9a-f]+)\s+\},\w*$")
            .expect("static regex")
    })
}

pub fn load_program(path: &Path) -> Result<Vec<SockFilter>> {
    let text = fs::read_to_string(path)?;
    let program = parse_program(&text)?;
    debug!(
        "Loaded {} cBPF instructions from {}",
        program.len(),
        path.display()
    );
    Ok(program)
}

pub fn parse_program(text: &str) -> Result<Vec<SockFilter>> {
    let mut program = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if !line.starts_with('{') {
            continue;
        }
        let bad = || ActivateError::ConfigFormat {
            line: i + 1,
            content: line.to_string(),
        };

        let caps = line_re().captures(line.trim()).ok_or_else(bad)?;
        let code = parse_int(&caps[1]).and_then(|v| u16::try_from(v).ok());
        let jt = parse_int(&caps[2]).and_then(|v| u8::try_from(v).ok());
        let jf = parse_int(&caps[3]).and_then(|v| u8::try_from(v).ok());
        let k = parse_int(&caps[4]).and_then(|v| u32::try_from(v).ok());

        match (code, jt, jf, k) {
            (Some(code), Some(jt), Some(jf), Some(k)) => {
                program.push(SockFilter { code, jt, jf, k })
            }
            _ => return Err(bad()),
        }
    }
    Ok(program)
}

/// Integer with automatic radix: `0x` hex, otherwise decimal.
///
/// A decimal with leading zeros is only accepted when every digit is zero,
/// since `010` could as well mean octal.
pub fn parse_int(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None if s.len() > 1 && s.starts_with('0') => {
            s.bytes().all(|b| b == b'0').then_some(0)
        }
        None => s.parse().ok(),
    }
}
