use std::net::{Ipv4Addr, TcpListener};

use rand::Rng;
use tracing::{debug, warn};

use crate::core::PipelineError;

/// A port held by a bound listener until it is handed to the container
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    listener: TcpListener,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the listener and hand over the port number
    pub fn release(self) -> u16 {
        drop(self.listener);
        self.port
    }
}

/// Pick a random port in `range` and keep it bound.
///
/// Collisions with other workers are retried up to `attempts` times. An
/// empty range fails without trying.
pub fn reserve_port(range: (u16, u16), attempts: u32) -> Result<PortReservation, PipelineError> {
    let (start, end) = range;
    if start > end {
        warn!(start, end, "Port range is empty");
        return Err(PipelineError::NoFreePort { attempts: 0 });
    }
    let mut rng = rand::thread_rng();

    for attempt in 1..=attempts {
        let port = rng.gen_range(start..=end);
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(listener) => {
                debug!(port, attempt, "Reserved port");
                return Ok(PortReservation { port, listener });
            }
            Err(e) => debug!(port, attempt, "Port unavailable: {}", e),
        }
    }

    Err(PipelineError::NoFreePort { attempts })
}
