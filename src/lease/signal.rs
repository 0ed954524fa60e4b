use tokio_util::sync::CancellationToken;

/// Stops a renewal loop. Clones observe the same signal; closing is idempotent.
#[derive(Debug, Clone, Default)]
pub struct RenewalSignal {
    token: CancellationToken,
}

impl RenewalSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has been closed
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}
