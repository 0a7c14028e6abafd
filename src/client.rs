//! Request execution surface.
//!
//! [`HttpClient`] owns one in-flight transaction at a time: run it inline
//! with [`execute`](HttpClient::execute) or dispatch it with
//! [`execute_with_callback`](HttpClient::execute_with_callback), and abort
//! it from any task with [`cancel`](HttpClient::cancel). Ordinary network
//! failures never surface as errors here; a failed transaction is an absent
//! response, distinct from a valid response carrying an error status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::watch;
use tracing::debug;

use crate::http::{HttpRequest, HttpResponse, HttpTransaction};

#[derive(Default)]
pub struct HttpClient {
    cancel_tx: StdMutex<Option<watch::Sender<bool>>>,
    executing: Arc<AtomicBool>,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `request` on the caller's task.
    ///
    /// Returns `None` for transport failures (DNS, connect, TLS, cancelled,
    /// malformed response); a reachable server answering with 4xx/5xx still
    /// yields `Some`.
    pub async fn execute(&self, request: HttpRequest) -> Option<HttpResponse> {
        let transaction = self.begin(request);
        let result = transaction.execute().await;
        self.executing.store(false, Ordering::Release);

        match result {
            Ok(response) => Some(response),
            Err(error) => {
                debug!(%error, "unable to execute request");
                None
            }
        }
    }

    /// Execute `request` on a background task and hand the outcome to
    /// `callback` when it completes.
    pub fn execute_with_callback(
        &self,
        request: HttpRequest,
        callback: impl FnOnce(Option<HttpResponse>) + Send + 'static,
    ) {
        let transaction = self.begin(request);
        let executing = Arc::clone(&self.executing);

        tokio::spawn(async move {
            let result = transaction.execute().await;
            executing.store(false, Ordering::Release);

            match result {
                Ok(response) => callback(Some(response)),
                Err(error) => {
                    debug!(%error, "unable to execute request");
                    callback(None);
                }
            }
        });
    }

    /// Abort the in-flight transaction, if any. The blocked caller (or the
    /// background task) unblocks promptly and observes a failed outcome.
    pub fn cancel(&self) {
        let slot = self.cancel_tx.lock().expect("cancel slot poisoned");
        if let Some(cancel_tx) = slot.as_ref() {
            let _ = cancel_tx.send(true);
        }
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    fn begin(&self, request: HttpRequest) -> HttpTransaction {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        *self.cancel_tx.lock().expect("cancel slot poisoned") = Some(cancel_tx);
        self.executing.store(true, Ordering::Release);
        HttpTransaction::new(request, cancel_rx)
    }
}
