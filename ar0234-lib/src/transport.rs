//! Ar0234 transport file
//!
//! Single request/response exchanges with the companion chip over I2C.
//! The device signals "busy" by refusing the bus entirely, so readiness is
//! detected by probing with an empty write until one is acknowledged

use super::protocol::ProtocolError;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared cancellation flag.
///
/// Checked before every bus transaction and between readiness probes, never
/// while a transaction is in flight.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation so the device can be used again
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ProtocolError> {
        if self.is_cancelled() {
            return Err(ProtocolError::Cancelled);
        }
        Ok(())
    }
}

/// I2C channel bound to one target address
pub struct Transport<I2C> {
    i2c: I2C,
    address: u8,
    retries: usize,
    retry_delay: Duration,
    cancel: CancelToken,
}

impl<I2C: I2c> Transport<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Transport {
            i2c,
            address,
            retries: super::definitions::DEFAULT_RETRIES,
            retry_delay: super::definitions::DEFAULT_RETRY_DELAY,
            cancel: CancelToken::new(),
        }
    }

    /// Override the retry budget and the pause between attempts
    #[must_use]
    pub fn with_retries(mut self, retries: usize, retry_delay: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Give the bus back, e.g. to inspect a simulated device
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Write-only transfer
    pub fn send(&mut self, request: &[u8]) -> Result<(), ProtocolError> {
        let address = self.address;
        self.retry(|i2c| i2c.write(address, request))
    }

    /// Write-then-read transfer with a repeated start
    pub fn send_receive(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        let address = self.address;
        let mut response = vec![0u8; response_len];
        self.retry(|i2c| i2c.write_read(address, request, &mut response))?;
        Ok(response)
    }

    /// Read-only transfer, used to collect results of asynchronous commands
    pub fn receive(&mut self, response_len: usize) -> Result<Vec<u8>, ProtocolError> {
        let address = self.address;
        let mut response = vec![0u8; response_len];
        self.retry(|i2c| i2c.read(address, &mut response))?;
        Ok(response)
    }

    /// One empty write, not retried
    pub fn probe(&mut self) -> Result<(), ProtocolError> {
        self.cancel.check()?;
        self.i2c
            .write(self.address, &[])
            .map_err(|err| ProtocolError::Transport {
                kind: err.kind(),
                attempts: 1,
            })
    }

    /// Probe every `interval` until the device acknowledges or `timeout` worth
    /// of intervals has been waited.
    ///
    /// The budget counts the waits, not wall-clock time, so a busy device is
    /// probed at least `timeout / interval` times.
    pub fn poll_ready(&mut self, interval: Duration, timeout: Duration) -> Result<(), ProtocolError> {
        let interval = interval.max(Duration::from_millis(1));
        let mut waited = Duration::ZERO;
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            match self.probe() {
                Ok(()) => {
                    trace!("Device ready after {} probes", attempts);
                    return Ok(());
                }
                Err(ProtocolError::Cancelled) => return Err(ProtocolError::Cancelled),
                Err(_) => {}
            }

            if waited >= timeout {
                trace!("Device still busy after {} probes", attempts);
                return Err(ProtocolError::Timeout(timeout));
            }

            let step = interval.min(timeout - waited);
            std::thread::sleep(step);
            waited += step;
        }
    }

    fn retry<F>(&mut self, mut exchange: F) -> Result<(), ProtocolError>
    where
        F: FnMut(&mut I2C) -> Result<(), I2C::Error>,
    {
        let mut last_kind = ErrorKind::Other;

        for attempt in 0..self.retries {
            self.cancel.check()?;

            if attempt > 0 {
                std::thread::sleep(self.retry_delay);
            }

            match exchange(&mut self.i2c) {
                Ok(()) => return Ok(()),
                Err(err) => last_kind = err.kind(),
            }
        }

        Err(ProtocolError::Transport {
            kind: last_kind,
            attempts: self.retries,
        })
    }
}
