use std::future::Future;

use tokio::runtime::Handle;

/// Runs SDK futures from the synchronous collaborator traits.
///
/// Inside a multi-threaded runtime worker (the Lambda handler) the current
/// thread is handed over with `block_in_place`; from plain threads (CLI main,
/// rayon workers) the stored handle drives the future.
#[derive(Clone, Debug)]
pub struct BlockingBridge {
    handle: Handle,
}

impl BlockingBridge {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn run<F: Future>(&self, future: F) -> F::Output {
        match Handle::try_current() {
            Ok(current) => tokio::task::block_in_place(|| current.block_on(future)),
            Err(_) => self.handle.block_on(future),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drives_futures_from_plain_threads() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("runtime");
        let bridge = BlockingBridge::new(runtime.handle().clone());

        let from_worker = std::thread::spawn(move || bridge.run(async { 21 * 2 }))
            .join()
            .expect("thread");

        assert_eq!(from_worker, 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drives_futures_inside_runtime_workers() {
        let bridge = BlockingBridge::current().expect("inside runtime");

        assert_eq!(bridge.run(async { "ok" }), "ok");
    }
}
