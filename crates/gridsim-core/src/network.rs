//! Network delay model interface.
//!
//! Transmission is an awaitable that may reject with a fault; the status
//! it carries becomes the request's terminal status. The default model is
//! zero-delay and always succeeds — latency/loss models plug in behind the
//! same trait.

use std::future::Future;
use std::pin::Pin;

use gridsim_kernel::Kernel;

use crate::error::SimResult;
use crate::request::Message;

/// Awaitable transmission outcome.
pub type TransmitFuture = Pin<Box<dyn Future<Output = SimResult<()>>>>;

/// Simulated transport between two named components.
pub trait Network {
    fn transmit(&self, message: &Message, sender: &str, receiver: &str) -> TransmitFuture;
}

/// The default network: no delay, no loss. Still suspends once so that
/// delivery never reorders ahead of already-scheduled same-time work.
pub struct ZeroDelayNetwork {
    kernel: Kernel,
}

impl ZeroDelayNetwork {
    pub fn new(kernel: &Kernel) -> Self {
        ZeroDelayNetwork {
            kernel: kernel.clone(),
        }
    }
}

impl Network for ZeroDelayNetwork {
    fn transmit(&self, _message: &Message, _sender: &str, _receiver: &str) -> TransmitFuture {
        let sleep = self.kernel.sleep(std::time::Duration::ZERO);
        Box::pin(async move {
            sleep.await;
            Ok(())
        })
    }
}
