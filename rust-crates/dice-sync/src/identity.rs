use alloy::primitives::Address;
use std::future::Future;

/// The embedded-wallet authentication service.
pub trait AuthProvider {
    fn ready(&self) -> bool;
    fn authenticated(&self) -> bool;
    fn embedded_address(&self) -> Option<Address>;
    fn login(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send;
    fn connect_or_create_wallet(&mut self)
    -> impl Future<Output = anyhow::Result<Address>> + Send;
    fn logout(&mut self);
}

/// The directly connected signing session.
pub trait SessionProvider {
    fn address(&self) -> Option<Address>;
    fn is_connected(&self) -> bool;
    fn chain_id(&self) -> Option<u64>;
}

/// The two independently sourced identities plus the auth provider's flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Session {
    /// Wallet managed by the authentication provider.
    pub embedded_address: Option<Address>,
    /// Address of the directly connected signing session.
    pub direct_address: Option<Address>,
    pub is_authenticated: bool,
    pub is_ready: bool,
}

/// The direct session wins because it is what will actually sign.
pub fn resolve_effective_address(
    embedded: Option<Address>,
    direct: Option<Address>,
) -> Option<Address> {
    direct.or(embedded)
}

impl Session {
    /// Samples both identity sources.
    pub fn observe<A: AuthProvider, S: SessionProvider>(auth: &A, direct: Option<&S>) -> Self {
        Self {
            embedded_address: auth.embedded_address(),
            direct_address: direct
                .filter(|session| session.is_connected())
                .and_then(|session| session.address()),
            is_authenticated: auth.authenticated(),
            is_ready: auth.ready(),
        }
    }

    pub fn effective_address(&self) -> Option<Address> {
        resolve_effective_address(self.embedded_address, self.direct_address)
    }

    pub fn can_transact(&self) -> bool {
        self.is_ready && self.is_authenticated
    }

    /// Gate for the polled reads.
    pub fn reads_enabled(&self) -> bool {
        self.can_transact() && self.effective_address().is_some()
    }
}

/// Tracks the session and reports changes of the effective address.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    session: Session,
}

impl IdentityResolver {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn effective_address(&self) -> Option<Address> {
        self.session.effective_address()
    }

    /// Replaces the session and returns the new effective address if it changed.
    pub fn update(&mut self, session: Session) -> Option<Option<Address>> {
        let before = self.session.effective_address();
        self.session = session;
        let after = self.session.effective_address();
        if before != after {
            tracing::info!(?before, ?after, "effective address changed");
            Some(after)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionAction {
    ConnectDirect,
    DisconnectDirect,
}

/// Keeps the direct session in step with the auth provider: connect once an
/// authenticated embedded wallet exists, disconnect after logout.
pub fn reconcile_direct_session(
    session: &Session,
    direct_connected: bool,
) -> Option<SessionAction> {
    if session.is_ready
        && session.is_authenticated
        && session.embedded_address.is_some()
        && !direct_connected
    {
        Some(SessionAction::ConnectDirect)
    } else if session.is_ready && !session.is_authenticated && direct_connected {
        Some(SessionAction::DisconnectDirect)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use alloy::primitives::address;

    const EMBEDDED: Address = address!("0x00000000000000000000000000000000000000aa");
    const DIRECT: Address = address!("0x00000000000000000000000000000000000000bb");

    fn authenticated() -> Session {
        Session {
            is_authenticated: true,
            is_ready: true,
            ..Session::default()
        }
    }

    struct FakeAuth {
        embedded: Option<Address>,
        authenticated: bool,
    }

    impl AuthProvider for FakeAuth {
        fn ready(&self) -> bool {
            true
        }
        fn authenticated(&self) -> bool {
            self.authenticated
        }
        fn embedded_address(&self) -> Option<Address> {
            self.embedded
        }
        async fn login(&mut self) -> anyhow::Result<()> {
            self.authenticated = true;
            Ok(())
        }
        async fn connect_or_create_wallet(&mut self) -> anyhow::Result<Address> {
            Ok(*self.embedded.get_or_insert(EMBEDDED))
        }
        fn logout(&mut self) {
            self.authenticated = false;
        }
    }

    struct FakeDirect {
        connected: bool,
    }

    impl SessionProvider for FakeDirect {
        fn address(&self) -> Option<Address> {
            Some(DIRECT)
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn chain_id(&self) -> Option<u64> {
            Some(1)
        }
    }

    #[test]
    fn observe__ignores_disconnected_direct_session() {
        // given
        let auth = FakeAuth {
            embedded: Some(EMBEDDED),
            authenticated: true,
        };

        // when
        let disconnected = Session::observe(&auth, Some(&FakeDirect { connected: false }));
        let connected = Session::observe(&auth, Some(&FakeDirect { connected: true }));
        let absent = Session::observe::<_, FakeDirect>(&auth, None);

        // then
        assert_eq!(disconnected.effective_address(), Some(EMBEDDED));
        assert_eq!(connected.effective_address(), Some(DIRECT));
        assert_eq!(absent.direct_address, None);
        assert!(connected.reads_enabled());
    }

    #[tokio::test]
    async fn observe__follows_login_and_logout() {
        let mut auth = FakeAuth {
            embedded: None,
            authenticated: false,
        };
        assert!(!Session::observe::<_, FakeDirect>(&auth, None).can_transact());

        auth.login().await.unwrap();
        auth.connect_or_create_wallet().await.unwrap();
        let session = Session::observe::<_, FakeDirect>(&auth, None);
        assert!(session.reads_enabled());

        auth.logout();
        assert!(!Session::observe::<_, FakeDirect>(&auth, None).reads_enabled());
    }

    #[test]
    fn resolve_effective_address__prefers_direct_session() {
        assert_eq!(
            resolve_effective_address(Some(EMBEDDED), Some(DIRECT)),
            Some(DIRECT)
        );
        assert_eq!(resolve_effective_address(Some(EMBEDDED), None), Some(EMBEDDED));
        assert_eq!(resolve_effective_address(None, Some(DIRECT)), Some(DIRECT));
        assert_eq!(resolve_effective_address(None, None), None);
    }

    #[test]
    fn reads_enabled__requires_address_auth_and_ready() {
        // given
        let mut session = authenticated();

        // then
        assert!(!session.reads_enabled());
        session.embedded_address = Some(EMBEDDED);
        assert!(session.reads_enabled());
        session.is_ready = false;
        assert!(!session.reads_enabled());
    }

    #[test]
    fn update__reports_only_effective_address_changes() {
        // given
        let mut resolver = IdentityResolver::default();
        let mut session = authenticated();
        session.embedded_address = Some(EMBEDDED);

        // when / then
        assert_eq!(resolver.update(session), Some(Some(EMBEDDED)));
        assert_eq!(resolver.update(session), None);
        session.direct_address = Some(DIRECT);
        assert_eq!(resolver.update(session), Some(Some(DIRECT)));
        session.embedded_address = None;
        assert_eq!(resolver.update(session), None);
        assert_eq!(resolver.update(Session::default()), Some(None));
    }

    #[test]
    fn reconcile_direct_session__connects_authenticated_embedded_wallet() {
        // given
        let mut session = authenticated();
        session.embedded_address = Some(EMBEDDED);

        // then
        assert_eq!(
            reconcile_direct_session(&session, false),
            Some(SessionAction::ConnectDirect)
        );
        assert_eq!(reconcile_direct_session(&session, true), None);
    }

    #[test]
    fn reconcile_direct_session__disconnects_after_logout() {
        // given
        let session = Session {
            is_ready: true,
            ..Session::default()
        };

        // then
        assert_eq!(
            reconcile_direct_session(&session, true),
            Some(SessionAction::DisconnectDirect)
        );
        assert_eq!(reconcile_direct_session(&session, false), None);
    }

    #[test]
    fn reconcile_direct_session__waits_for_provider_readiness() {
        let session = Session {
            embedded_address: Some(EMBEDDED),
            is_authenticated: true,
            ..Session::default()
        };
        assert_eq!(reconcile_direct_session(&session, false), None);
        assert_eq!(reconcile_direct_session(&session, true), None);
    }
}
