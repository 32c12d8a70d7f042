//! A receive, inspect, re-inject loop over one diversion handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::checksum::ChecksumFlags;
use crate::diversion::Diversion;
use crate::error::{DivertError, Result};

/// Largest packet the loop receives.
pub const MAX_PACKET_LEN: usize = 0xffff;

/// Cooperative cancellation for [`run`]. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// What the loop does with a packet after the handler saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Re-inject the (possibly modified) packet.
    Forward,
    Drop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub receive_errors: u64,
    pub send_errors: u64,
}

/// Runs until `stop` is set or the handle is closed, then closes the handle.
///
/// Each packet goes to `handler`, which may rewrite it in place. Forwarded
/// outbound packets get their checksums recomputed before they are sent
/// back. Receive and send failures are logged and counted, and the loop
/// carries on, except when the handle cannot receive at all.
///
/// The stop signal is checked between packets, so a loop blocked in a
/// receive only notices it once the next packet arrives or the handle is
/// closed from another thread.
pub fn run<F>(diversion: &Diversion, stop: &StopSignal, mut handler: F) -> Result<CaptureStats>
where
    F: FnMut(&mut [u8], &mut Address) -> Verdict,
{
    let mut stats = CaptureStats::default();
    let mut buffer = vec![0u8; MAX_PACKET_LEN];

    let outcome = loop {
        if stop.is_stopped() {
            debug!("capture on \"{}\" stopped", diversion.filter());
            break Ok(());
        }

        let (length, mut address) = match diversion.receive(&mut buffer) {
            Ok(received) => received,
            Err(DivertError::HandleClosed) => break Ok(()),
            Err(e) => {
                warn!("receive failed: {}", e);
                stats.receive_errors += 1;
                if matches!(e, DivertError::InvalidOperation(_)) {
                    break Err(e);
                }
                continue;
            }
        };
        stats.received += 1;

        let packet = &mut buffer[..length];
        if handler(packet, &mut address) == Verdict::Drop {
            stats.dropped += 1;
            continue;
        }

        diversion.calculate_checksums(packet, &address, ChecksumFlags::empty());
        match diversion.send(packet, &address) {
            Ok(_) => stats.forwarded += 1,
            Err(DivertError::HandleClosed) => break Ok(()),
            Err(e) => {
                warn!("re-injecting {} byte packet failed: {}", length, e);
                stats.send_errors += 1;
            }
        }
    };

    if let Err(e) = diversion.close() {
        warn!("closing capture handle failed: {}", e);
    }
    debug!("capture finished: {:?}", stats);
    outcome.map(|()| stats)
}
