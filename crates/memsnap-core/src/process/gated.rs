use std::sync::OnceLock;

use super::{PauseCounter, Process};
use crate::collab::{FingerprintProvider, MemorySource, PauseGate};
use crate::error::Result;
use crate::layout::Identity;

/// A process assembled from collaborator contracts: a pause gate (often a
/// helper plugin over RPC), a fingerprint provider and a raw memory source.
pub struct GatedProcess<G, F, M> {
    gate: G,
    fingerprint: F,
    memory: M,
    pauses: PauseCounter,
    identity: OnceLock<Identity>,
}

impl<G, F, M> GatedProcess<G, F, M>
where
    G: PauseGate,
    F: FingerprintProvider,
    M: MemorySource,
{
    pub fn new(gate: G, fingerprint: F, memory: M) -> Self {
        Self {
            gate,
            fingerprint,
            memory,
            pauses: PauseCounter::new(),
            identity: OnceLock::new(),
        }
    }

    pub fn pause_depth(&self) -> usize {
        self.pauses.depth()
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }
}

impl<G, F, M> Process for GatedProcess<G, F, M>
where
    G: PauseGate,
    F: FingerprintProvider,
    M: MemorySource,
{
    fn identity(&self) -> Result<Identity> {
        if let Some(identity) = self.identity.get() {
            return Ok(identity.clone());
        }
        let identity = Identity::new(self.fingerprint.fingerprint()?);
        Ok(self.identity.get_or_init(|| identity).clone())
    }

    fn base_offset(&self) -> Result<u64> {
        self.fingerprint.base_offset()
    }

    fn pause(&self) -> Result<()> {
        self.pauses.enter(|| self.gate.pause())
    }

    fn resume(&self) -> Result<()> {
        self.pauses.leave(|| self.gate.resume())
    }

    fn read(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        self.memory.read_at(address, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::StaticFingerprint;
    use crate::error::Error;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGate {
        calls: Mutex<Vec<&'static str>>,
    }

    impl PauseGate for RecordingGate {
        fn pause(&self) -> Result<()> {
            self.calls.lock().unwrap().push("pause");
            Ok(())
        }

        fn resume(&self) -> Result<()> {
            self.calls.lock().unwrap().push("resume");
            Ok(())
        }
    }

    struct Pattern;

    impl MemorySource for Pattern {
        fn read_at(&self, address: u64, buf: &mut [u8]) -> Result<()> {
            if address == 0 {
                return Err(Error::transport(address, buf.len(), "null"));
            }
            for (i, b) in buf.iter_mut().enumerate() {
                *b = (address as usize + i) as u8;
            }
            Ok(())
        }
    }

    #[test]
    fn test_nested_pauses_reach_gate_once() {
        let process = GatedProcess::new(
            RecordingGate::default(),
            StaticFingerprint::default(),
            Pattern,
        );
        process.pause().unwrap();
        process.pause().unwrap();
        process.resume().unwrap();
        process.resume().unwrap();
        assert_eq!(
            *process.gate.calls.lock().unwrap(),
            vec!["pause", "resume"]
        );
        assert!(process.resume().is_err());
    }

    #[test]
    fn test_identity_and_reads_delegate() {
        let process = GatedProcess::new(
            RecordingGate::default(),
            StaticFingerprint {
                identity: vec![1, 2, 3],
                base_offset: 0x10,
            },
            Pattern,
        );
        assert_eq!(process.identity().unwrap().as_bytes(), &[1, 2, 3]);
        assert_eq!(process.base_offset().unwrap(), 0x10);
        assert_eq!(process.read_bytes(0x20, 3).unwrap(), vec![0x20, 0x21, 0x22]);
        assert!(process.read_bytes(0, 1).is_err());
    }
}
