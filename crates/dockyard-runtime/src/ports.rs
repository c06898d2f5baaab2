use crate::RuntimeError;
use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Mutex;

const MAX_ATTEMPTS: usize = 64;

/// Hands out host ports that are free on the loopback interface and not yet
/// given to another unit of this process. Shared across parallel suites.
#[derive(Debug, Default)]
pub struct PortAllocator {
    reserved: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> Result<u16, RuntimeError> {
        let mut reserved = self.reserved.lock().map_err(|e| RuntimeError::Unavailable {
            name: "port allocator".to_owned(),
            reason: format!("mutex poisoned: {e}"),
        })?;
        for _ in 0..MAX_ATTEMPTS {
            // The listener is dropped at the end of the iteration, freeing the
            // port for the container while the reservation keeps it ours.
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
            let port = listener.local_addr()?.port();
            if reserved.insert(port) {
                return Ok(port);
            }
        }
        Err(RuntimeError::PortExhausted(MAX_ATTEMPTS))
    }

    pub fn release(&self, port: u16) {
        if let Ok(mut reserved) = self.reserved.lock() {
            reserved.remove(&port);
        }
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().map_or(0, |r| r.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_allocations_are_distinct() {
        let allocator = Arc::new(PortAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    (0..4)
                        .map(|_| allocator.allocate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for h in handles {
            for port in h.join().unwrap() {
                assert!(all.insert(port), "port {port} handed out twice");
            }
        }
        assert_eq!(all.len(), 32);
        assert_eq!(allocator.reserved_count(), 32);
    }

    #[test]
    fn release_forgets_reservation() {
        let allocator = PortAllocator::new();
        let port = allocator.allocate().unwrap();
        assert_ne!(port, 0);
        allocator.release(port);
        assert_eq!(allocator.reserved_count(), 0);
    }
}
