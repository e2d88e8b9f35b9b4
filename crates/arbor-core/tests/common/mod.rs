//! Shared fixtures for group integration tests.
//!
//! Every test runs against a seeded provider so key material and failures
//! are reproducible from the seed alone.

#![allow(dead_code)]

use arbor_core::{
    BasicAuthenticationService, ClientConfig, ClientState, CommitOptions, CommitOutput, Context,
    KeyPackageBundle, MlsError, ProcessedMessage, SigningIdentity,
};
use arbor_crypto::{CipherSuite, RustCryptoProvider, env::test_utils::SeededEnv};
use arbor_proto::{Add, Credential, ExtensionList, MlsMessage, Proposal};

/// Provider, authentication service and config shared by every member of a
/// test.
pub struct World {
    pub crypto: RustCryptoProvider<SeededEnv>,
    pub auth: BasicAuthenticationService,
    pub config: ClientConfig,
}

impl World {
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, ClientConfig::default())
    }

    pub fn with_config(seed: u64, config: ClientConfig) -> Self {
        init_tracing();
        let crypto = RustCryptoProvider::with_env(CipherSuite::Curve25519Aes128, SeededEnv::new(seed))
            .expect("suite is supported");
        Self { crypto, auth: BasicAuthenticationService::new(), config }
    }

    pub fn ctx(&self) -> Context<'_> {
        Context::new(&self.crypto, &self.auth, &self.config)
    }

    pub fn identity(&self, name: &str) -> SigningIdentity {
        SigningIdentity::generate(&self.crypto, Credential::basic(name.as_bytes().to_vec()))
            .expect("signature key generation should succeed")
    }

    pub fn bundle(&self, name: &str) -> KeyPackageBundle {
        self.bundle_for(self.identity(name))
    }

    pub fn bundle_for(&self, identity: SigningIdentity) -> KeyPackageBundle {
        KeyPackageBundle::generate(&self.ctx(), identity).expect("key package generation should succeed")
    }

    pub fn create_group(&self, group_id: &[u8], name: &str) -> ClientState {
        ClientState::create_group(
            &self.ctx(),
            group_id.to_vec(),
            self.identity(name),
            ExtensionList::new(),
        )
        .expect("group creation should succeed")
    }

    /// `committer` adds `bundles` in one commit; every joiner enters through
    /// the Welcome.
    pub fn add_members(
        &self,
        committer: &ClientState,
        bundles: &[KeyPackageBundle],
    ) -> (ClientState, Vec<ClientState>, MlsMessage) {
        let proposals = bundles
            .iter()
            .map(|bundle| Proposal::Add(Add { key_package: bundle.key_package.clone() }))
            .collect();
        let (committer, output) = self
            .commit(committer, CommitOptions { proposals, ..CommitOptions::default() })
            .expect("add commit should succeed");
        let welcome = output.welcome.expect("adding members produces a Welcome");
        let joiners = bundles
            .iter()
            .map(|bundle| {
                ClientState::join_group(&self.ctx(), &welcome, bundle, None)
                    .expect("joining from the Welcome should succeed")
            })
            .collect();
        (committer, joiners, output.commit)
    }

    pub fn commit(
        &self,
        state: &ClientState,
        options: CommitOptions,
    ) -> Result<(ClientState, CommitOutput), MlsError> {
        state.create_commit(&self.ctx(), options)
    }

    /// Deliver `message` to `state`, returning the successor state.
    pub fn deliver(&self, state: &ClientState, message: &MlsMessage) -> (ClientState, ProcessedMessage) {
        state.process_message(&self.ctx(), message).expect("message should be accepted")
    }

    /// Deliver a commit to every state in `members`.
    pub fn deliver_all(&self, members: &mut [ClientState], message: &MlsMessage) {
        for member in members.iter_mut() {
            let (next, processed) = self.deliver(member, message);
            assert!(matches!(processed, ProcessedMessage::Commit(_)), "expected a commit");
            *member = next;
        }
    }

    pub fn send(&self, state: &ClientState, data: &[u8]) -> (ClientState, MlsMessage) {
        state
            .create_application_message(&self.ctx(), data, b"")
            .expect("application message should be created")
    }
}

/// Route `tracing` output through the test harness. `RUST_LOG` selects the
/// level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Panic unless every state is in the same epoch with the same
/// authenticator.
pub fn assert_agree(states: &[&ClientState]) {
    let Some((first, rest)) = states.split_first() else { return };
    for state in rest {
        assert_eq!(state.epoch(), first.epoch(), "members disagree on the epoch");
        assert_eq!(
            state.epoch_authenticator(),
            first.epoch_authenticator(),
            "members disagree on the epoch authenticator"
        );
        assert_eq!(state.tree(), first.tree(), "members disagree on the tree");
    }
}

/// Application payload carried by `processed`.
pub fn application_data(processed: &ProcessedMessage) -> &[u8] {
    match processed {
        ProcessedMessage::Application { data, .. } => data,
        other => panic!("expected an application message, got {other:?}"),
    }
}
