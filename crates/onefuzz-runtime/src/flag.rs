use tokio::sync::watch;

/// A one-shot cooperative shutdown signal shared by every control loop in a
/// worker process.
///
/// Backed by a [`watch`] channel so that `wait` is cancel-safe inside
/// `select!` and a `raise` is observed even if it lands between a check and
/// the subsequent await.
#[derive(Clone)]
pub struct ShutdownFlag {
    tx: watch::Sender<bool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Re-arm the flag so a worker handle can be reused across `run` calls.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once the flag is raised.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Raises the flag when dropped, so one loop exiting (cleanly or by error)
/// takes its siblings down with it rather than leaving the worker half-alive.
pub struct ShutdownGuard<'a>(&'a ShutdownFlag);

impl<'a> ShutdownGuard<'a> {
    pub fn new(flag: &'a ShutdownFlag) -> Self {
        Self(flag)
    }
}

impl Drop for ShutdownGuard<'_> {
    fn drop(&mut self) {
        if !self.0.is_raised() {
            tracing::warn!("worker control loop exited without raising the shutdown flag");
        }

        self.0.raise();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_resolves_immediately_once_raised() {
        let flag = ShutdownFlag::new();
        flag.raise();
        flag.wait().await;
    }

    #[tokio::test]
    async fn raise_wakes_a_pending_waiter() {
        let flag = ShutdownFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.wait().await })
        };
        flag.raise();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn guard_raises_on_drop() {
        let flag = ShutdownFlag::new();
        {
            let _guard = ShutdownGuard::new(&flag);
        }
        assert!(flag.is_raised());
    }
}
