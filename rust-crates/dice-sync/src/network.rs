use crate::config::CHAIN_SWITCH_SETTLE;
use std::{
    fmt,
    future::Future,
    time::Duration,
};

/// Asks the connected wallet to move to another chain.
pub trait ChainSwitcher {
    fn switch_chain(
        &self,
        chain_id: u64,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkStatus {
    Disconnected,
    Correct,
    /// A switch request is outstanding.
    Switching,
    /// The wallet refused or failed to switch; stays until the chain changes.
    WrongNetwork,
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NetworkStatus::Disconnected => "disconnected",
            NetworkStatus::Correct => "correct network",
            NetworkStatus::Switching => "switching network",
            NetworkStatus::WrongNetwork => "wrong network",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwitchRequest {
    pub from: u64,
    pub to: u64,
}

/// Issues one switch request per transition into a mismatched chain.
#[derive(Debug)]
pub struct NetworkGuard {
    required_chain_id: u64,
    mismatched: bool,
    status: NetworkStatus,
    warning: Option<String>,
    switch_settle: Duration,
}

impl NetworkGuard {
    pub fn new(required_chain_id: u64) -> Self {
        Self {
            required_chain_id,
            mismatched: false,
            status: NetworkStatus::Disconnected,
            warning: None,
            switch_settle: CHAIN_SWITCH_SETTLE,
        }
    }

    pub fn with_switch_settle(mut self, settle: Duration) -> Self {
        self.switch_settle = settle;
        self
    }

    pub fn required_chain_id(&self) -> u64 {
        self.required_chain_id
    }

    pub fn status(&self) -> NetworkStatus {
        self.status
    }

    /// Persistent "wrong network" message, set when a switch fails.
    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    /// Feeds the latest session state. Returns a request only when the session has just
    /// moved from "matching or disconnected" into "connected on the wrong chain".
    pub fn observe(
        &mut self,
        is_connected: bool,
        active_chain_id: Option<u64>,
    ) -> Option<SwitchRequest> {
        let active = match (is_connected, active_chain_id) {
            (true, Some(active)) => active,
            _ => {
                self.mismatched = false;
                self.warning = None;
                self.status = NetworkStatus::Disconnected;
                return None;
            }
        };

        if active == self.required_chain_id {
            self.mismatched = false;
            self.warning = None;
            self.status = NetworkStatus::Correct;
            return None;
        }

        if self.mismatched {
            return None;
        }
        self.mismatched = true;
        self.status = NetworkStatus::Switching;
        tracing::info!(
            from = active,
            to = self.required_chain_id,
            "connected to the wrong chain; requesting a switch"
        );
        Some(SwitchRequest {
            from: active,
            to: self.required_chain_id,
        })
    }

    pub fn switch_failed(&mut self, error: &anyhow::Error) {
        tracing::warn!(%error, "chain switch rejected");
        self.status = NetworkStatus::WrongNetwork;
        self.warning = Some(format!(
            "Wrong network: please switch your wallet to chain {} ({error})",
            self.required_chain_id
        ));
    }

    /// Observes the session and, when required, sends the switch request through
    /// `switcher`. A failed switch is recorded, not retried.
    pub async fn enforce<S: ChainSwitcher>(
        &mut self,
        switcher: &S,
        is_connected: bool,
        active_chain_id: Option<u64>,
    ) -> NetworkStatus {
        if let Some(request) = self.observe(is_connected, active_chain_id) {
            match switcher.switch_chain(request.to).await {
                Ok(()) => {
                    tracing::info!(chain_id = request.to, "chain switch accepted");
                    // wallets report the new chain a moment after acknowledging
                    tokio::time::sleep(self.switch_settle).await;
                }
                Err(error) => self.switch_failed(&error),
            }
        }
        self.status
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use std::sync::{
        Arc,
        Mutex,
    };

    const SEPOLIA: u64 = 11_155_111;
    const MAINNET: u64 = 1;
    const POLYGON: u64 = 137;

    #[derive(Clone, Default)]
    struct RecordingSwitcher {
        requests: Arc<Mutex<Vec<u64>>>,
        reject: bool,
    }

    impl ChainSwitcher for RecordingSwitcher {
        async fn switch_chain(&self, chain_id: u64) -> anyhow::Result<()> {
            self.requests.lock().unwrap().push(chain_id);
            if self.reject {
                Err(anyhow::anyhow!("user rejected the request"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn observe__requests_switch_once_per_divergence() {
        // given
        let mut guard = NetworkGuard::new(SEPOLIA);

        // when
        let first = guard.observe(true, Some(MAINNET));
        let repeated = guard.observe(true, Some(MAINNET));
        let other_wrong_chain = guard.observe(true, Some(POLYGON));

        // then
        assert_eq!(
            first,
            Some(SwitchRequest {
                from: MAINNET,
                to: SEPOLIA
            })
        );
        assert_eq!(repeated, None);
        assert_eq!(other_wrong_chain, None);
    }

    #[test]
    fn observe__reissues_after_returning_to_the_required_chain() {
        // given
        let mut guard = NetworkGuard::new(SEPOLIA);
        assert!(guard.observe(true, Some(MAINNET)).is_some());

        // when
        assert!(guard.observe(true, Some(SEPOLIA)).is_none());
        let again = guard.observe(true, Some(MAINNET));

        // then
        assert!(again.is_some());
    }

    #[test]
    fn observe__is_a_no_op_on_the_correct_chain_or_when_disconnected() {
        let mut guard = NetworkGuard::new(SEPOLIA);
        assert!(guard.observe(true, Some(SEPOLIA)).is_none());
        assert!(guard.observe(true, Some(SEPOLIA)).is_none());
        assert_eq!(guard.status(), NetworkStatus::Correct);
        assert!(guard.observe(false, Some(MAINNET)).is_none());
        assert_eq!(guard.status(), NetworkStatus::Disconnected);
        assert!(guard.observe(true, None).is_none());
    }

    #[tokio::test]
    async fn enforce__surfaces_rejection_as_persistent_warning_without_retry() {
        // given
        let switcher = RecordingSwitcher {
            reject: true,
            ..RecordingSwitcher::default()
        };
        let mut guard = NetworkGuard::new(SEPOLIA);

        // when
        let status = guard.enforce(&switcher, true, Some(MAINNET)).await;
        let status_again = guard.enforce(&switcher, true, Some(MAINNET)).await;

        // then
        assert_eq!(status, NetworkStatus::WrongNetwork);
        assert_eq!(status_again, NetworkStatus::WrongNetwork);
        assert_eq!(*switcher.requests.lock().unwrap(), vec![SEPOLIA]);
        assert!(guard.warning().unwrap().contains("Wrong network"));
    }

    #[tokio::test]
    async fn observe__disconnect_clears_wrong_network_warning() {
        // given
        let switcher = RecordingSwitcher {
            reject: true,
            ..RecordingSwitcher::default()
        };
        let mut guard = NetworkGuard::new(SEPOLIA);
        guard.enforce(&switcher, true, Some(MAINNET)).await;
        assert!(guard.warning().is_some());

        // when
        guard.observe(false, None);

        // then
        assert_eq!(guard.status(), NetworkStatus::Disconnected);
        assert!(guard.warning().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn enforce__waits_for_settle_after_accepted_switch() {
        // given
        let switcher = RecordingSwitcher::default();
        let mut guard = NetworkGuard::new(SEPOLIA);
        let started = tokio::time::Instant::now();

        // when
        let status = guard.enforce(&switcher, true, Some(MAINNET)).await;

        // then
        assert_eq!(status, NetworkStatus::Switching);
        assert!(started.elapsed() >= CHAIN_SWITCH_SETTLE);
        assert_eq!(
            guard.enforce(&switcher, true, Some(SEPOLIA)).await,
            NetworkStatus::Correct
        );
    }

    #[tokio::test]
    async fn enforce__clears_warning_once_chain_matches() {
        // given
        let switcher = RecordingSwitcher {
            reject: true,
            ..RecordingSwitcher::default()
        };
        let mut guard = NetworkGuard::new(SEPOLIA);
        guard.enforce(&switcher, true, Some(MAINNET)).await;

        // when
        let status = guard.enforce(&switcher, true, Some(SEPOLIA)).await;

        // then
        assert_eq!(status, NetworkStatus::Correct);
        assert!(guard.warning().is_none());
    }
}
