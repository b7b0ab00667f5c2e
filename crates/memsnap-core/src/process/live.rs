//! Live Linux transport: `/proc/<pid>/mem` reads, `SIGSTOP`/`SIGCONT`
//! pausing, SHA-1 fingerprint of the executable.

use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use sha1::{Digest, Sha1};
use tracing::{debug, info};

use super::GatedProcess;
use crate::collab::{FingerprintProvider, MemorySource, PauseGate};
use crate::error::{Error, Result};

/// How long `pause` waits for the kernel to report the stop.
const STOP_POLL_ATTEMPTS: usize = 200;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub type LiveProcess = GatedProcess<SignalGate, ExeFingerprint, ProcMemory>;

/// Attach to a running process by pid.
pub fn attach(pid: u32) -> Result<LiveProcess> {
    let memory = ProcMemory::open(pid)?;
    info!("Attached to process {}", pid);
    Ok(GatedProcess::new(
        SignalGate { pid },
        ExeFingerprint { pid },
        memory,
    ))
}

/// Find the first process whose `comm` equals `name`.
pub fn find_by_name(name: &str) -> Result<Option<u32>> {
    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        if let Ok(comm) = fs::read_to_string(entry.path().join("comm"))
            && comm.trim_end() == name
        {
            return Ok(Some(pid));
        }
    }
    Ok(None)
}

/// Reads through `/proc/<pid>/mem`.
#[derive(Debug)]
pub struct ProcMemory {
    file: File,
}

impl ProcMemory {
    pub fn open(pid: u32) -> Result<Self> {
        let file = File::open(format!("/proc/{}/mem", pid))?;
        Ok(Self { file })
    }
}

impl MemorySource for ProcMemory {
    fn read_at(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buf, address)
            .map_err(|e| Error::transport(address, buf.len(), e.to_string()))
    }
}

/// Stops and continues the process with job-control signals.
#[derive(Debug, Clone, Copy)]
pub struct SignalGate {
    pid: u32,
}

impl SignalGate {
    fn signal(&self, sig: libc::c_int) -> Result<()> {
        let pid = libc::pid_t::try_from(self.pid)
            .map_err(|_| Error::Unsupported(format!("pid {} out of range", self.pid)))?;
        // SAFETY: kill has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, sig) };
        if rc != 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        // Third field of /proc/<pid>/stat, after the parenthesised comm.
        fs::read_to_string(format!("/proc/{}/stat", self.pid))
            .ok()
            .and_then(|stat| {
                let rest = &stat[stat.rfind(')')? + 1..];
                rest.split_whitespace().next().map(|s| s == "T" || s == "t")
            })
            .unwrap_or(false)
    }
}

impl PauseGate for SignalGate {
    fn pause(&self) -> Result<()> {
        self.signal(libc::SIGSTOP)?;
        for _ in 0..STOP_POLL_ATTEMPTS {
            if self.is_stopped() {
                debug!("Process {} stopped", self.pid);
                return Ok(());
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
        self.signal(libc::SIGCONT)?;
        Err(Error::Unsupported(format!(
            "process {} did not stop",
            self.pid
        )))
    }

    fn resume(&self) -> Result<()> {
        self.signal(libc::SIGCONT)
    }
}

/// SHA-1 of the executable image; base offset from the first mapping of it.
#[derive(Debug, Clone, Copy)]
pub struct ExeFingerprint {
    pid: u32,
}

impl ExeFingerprint {
    fn exe_path(&self) -> Result<PathBuf> {
        Ok(fs::read_link(format!("/proc/{}/exe", self.pid))?)
    }
}

impl FingerprintProvider for ExeFingerprint {
    fn fingerprint(&self) -> Result<Vec<u8>> {
        let mut file = File::open(format!("/proc/{}/exe", self.pid))?;
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; 1 << 16];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().to_vec())
    }

    fn base_offset(&self) -> Result<u64> {
        let exe = self.exe_path()?;
        let maps = fs::read_to_string(format!("/proc/{}/maps", self.pid))?;
        parse_image_base(&maps, &exe.to_string_lossy()).ok_or_else(|| {
            Error::Unsupported(format!("no mapping of {} in process {}", exe.display(), self.pid))
        })
    }
}

/// Load address of `image` in a `/proc/<pid>/maps` listing: the start of
/// its first mapping minus that mapping's file offset.
fn parse_image_base(maps: &str, image: &str) -> Option<u64> {
    maps.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let range = fields.next()?;
        let _perms = fields.next()?;
        let offset = fields.next()?;
        let _dev = fields.next()?;
        let _inode = fields.next()?;
        let path = fields.collect::<Vec<_>>().join(" ");
        if path != image {
            return None;
        }
        let start = u64::from_str_radix(range.split('-').next()?, 16).ok()?;
        let offset = u64::from_str_radix(offset, 16).ok()?;
        Some(start.wrapping_sub(offset))
    })
}
