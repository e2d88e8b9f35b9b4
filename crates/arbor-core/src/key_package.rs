//! Signing identities, key package generation and validation.

use arbor_crypto::{
    CipherSuiteProvider, HpkeSecretKey, SignaturePublicKey, SignatureSecretKey, labeled,
};
use arbor_proto::{
    Capabilities, Credential, CredentialType, ExtensionList, KeyPackage, KeyPackageRef, LeafNode,
    LeafNodeSource, Lifetime, ProtocolVersion, codec,
};
use tls_codec::VLBytes;

use crate::{
    error::{MlsError, ValidationError, VerificationError},
    group::Context,
    tree::{LeafCheck, RatchetTree, validate_leaf},
};

const KEY_PACKAGE_LABEL: &str = "KeyPackageTBS";
const LEAF_NODE_LABEL: &str = "LeafNodeTBS";
const KEY_PACKAGE_REF_LABEL: &str = "MLS 1.0 KeyPackage Reference";

/// A credential with the signature key pair it is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    /// Identity presented to the authentication service
    pub credential: Credential,
    /// Public half of `signer`
    pub signature_key: SignaturePublicKey,
    signer: SignatureSecretKey,
}

impl SigningIdentity {
    /// Bind `credential` to an existing signing key.
    pub fn new(
        crypto: &dyn CipherSuiteProvider,
        credential: Credential,
        signer: SignatureSecretKey,
    ) -> Result<Self, MlsError> {
        let signature_key = crypto.signature_public_key(&signer)?;
        Ok(Self { credential, signature_key, signer })
    }

    /// Bind `credential` to a fresh signing key.
    pub fn generate(
        crypto: &dyn CipherSuiteProvider,
        credential: Credential,
    ) -> Result<Self, MlsError> {
        let (signer, signature_key) = crypto.signature_key_generate()?;
        Ok(Self { credential, signature_key, signer })
    }

    /// Private signing key.
    pub fn signer(&self) -> &SignatureSecretKey {
        &self.signer
    }
}

/// Capabilities advertising the provider's suite, MLS 1.0 and the basic
/// credential plus the identity's own credential type.
pub fn default_capabilities(
    crypto: &dyn CipherSuiteProvider,
    credential: &Credential,
) -> Capabilities {
    let mut credentials = vec![CredentialType::BASIC];
    if credential.credential_type() != CredentialType::BASIC {
        credentials.push(credential.credential_type());
    }
    Capabilities {
        versions: vec![ProtocolVersion::MLS_10],
        cipher_suites: vec![crypto.cipher_suite().id()],
        extensions: Vec::new(),
        proposals: Vec::new(),
        credentials,
    }
}

/// Sign a leaf node in place. `group` binds update and commit leaves to a
/// group id and leaf index.
pub(crate) fn sign_leaf(
    crypto: &dyn CipherSuiteProvider,
    leaf: &mut LeafNode,
    signer: &SignatureSecretKey,
    group: Option<(&[u8], u32)>,
) -> Result<(), MlsError> {
    let tbs = leaf.to_be_signed(group)?;
    leaf.signature = VLBytes::new(labeled::sign_with_label(crypto, signer, LEAF_NODE_LABEL, &tbs)?);
    Ok(())
}

/// Optional contents of a generated key package.
#[derive(Debug, Clone, Default)]
pub struct KeyPackageOptions {
    /// Capabilities to advertise; defaults to [`default_capabilities`]
    pub capabilities: Option<Capabilities>,
    /// Extensions of the leaf node
    pub leaf_extensions: ExtensionList,
    /// Extensions of the key package itself
    pub extensions: ExtensionList,
}

/// A key package with the private keys needed to join from it.
#[derive(Debug, Clone)]
pub struct KeyPackageBundle {
    /// The public key package
    pub key_package: KeyPackage,
    /// Private half of `init_key`
    pub init_secret: HpkeSecretKey,
    /// Private half of the leaf encryption key
    pub encryption_secret: HpkeSecretKey,
    /// Identity that signed the package
    pub identity: SigningIdentity,
}

impl KeyPackageBundle {
    /// Fresh key package with default capabilities and no extensions.
    pub fn generate(ctx: &Context<'_>, identity: SigningIdentity) -> Result<Self, MlsError> {
        Self::generate_with(ctx, identity, KeyPackageOptions::default())
    }

    /// Fresh key package with the given options.
    pub fn generate_with(
        ctx: &Context<'_>,
        identity: SigningIdentity,
        options: KeyPackageOptions,
    ) -> Result<Self, MlsError> {
        let crypto = ctx.crypto;
        let init = crypto.kem_generate()?;
        let encryption = crypto.kem_generate()?;
        let now = crypto.unix_time();

        let mut leaf_node = LeafNode {
            encryption_key: encryption.public,
            signature_key: identity.signature_key.clone(),
            credential: identity.credential.clone(),
            capabilities: options
                .capabilities
                .unwrap_or_else(|| default_capabilities(crypto, &identity.credential)),
            leaf_node_source: LeafNodeSource::KeyPackage(Lifetime {
                not_before: now,
                not_after: now.saturating_add(ctx.config.key_package_lifetime_secs),
            }),
            extensions: options.leaf_extensions,
            signature: VLBytes::new(Vec::new()),
        };
        sign_leaf(crypto, &mut leaf_node, identity.signer(), None)?;

        let mut key_package = KeyPackage {
            version: ProtocolVersion::MLS_10,
            cipher_suite: crypto.cipher_suite(),
            init_key: init.public,
            leaf_node,
            extensions: options.extensions,
            signature: VLBytes::new(Vec::new()),
        };
        let tbs = key_package.to_be_signed()?;
        key_package.signature = VLBytes::new(labeled::sign_with_label(
            crypto,
            identity.signer(),
            KEY_PACKAGE_LABEL,
            &tbs,
        )?);

        Ok(Self {
            key_package,
            init_secret: init.secret,
            encryption_secret: encryption.secret,
            identity,
        })
    }

    /// Reference of the public key package.
    pub fn reference(&self, crypto: &dyn CipherSuiteProvider) -> Result<KeyPackageRef, MlsError> {
        key_package_ref(crypto, &self.key_package)
    }
}

/// `RefHash("MLS 1.0 KeyPackage Reference", KeyPackage)`.
pub fn key_package_ref(
    crypto: &dyn CipherSuiteProvider,
    key_package: &KeyPackage,
) -> Result<KeyPackageRef, MlsError> {
    let encoded = codec::encode(key_package)?;
    Ok(KeyPackageRef(labeled::ref_hash(crypto, KEY_PACKAGE_REF_LABEL, &encoded)?))
}

/// Validate a key package for addition to a group with `extensions` and
/// `tree`.
pub(crate) fn validate_key_package(
    ctx: &Context<'_>,
    key_package: &KeyPackage,
    tree: &RatchetTree,
    extensions: &ExtensionList,
) -> Result<(), MlsError> {
    if key_package.version != ProtocolVersion::MLS_10 {
        return Err(ValidationError::KeyPackageVersion(key_package.version.0).into());
    }
    if key_package.cipher_suite != ctx.crypto.cipher_suite() {
        return Err(ValidationError::KeyPackageCipherSuite(key_package.cipher_suite.id()).into());
    }

    let leaf = &key_package.leaf_node;
    labeled::verify_with_label(
        ctx.crypto,
        &leaf.signature_key,
        KEY_PACKAGE_LABEL,
        &key_package.to_be_signed()?,
        key_package.signature.as_slice(),
    )
    .map_err(|_| VerificationError::Signature)?;

    if key_package.init_key == leaf.encryption_key {
        return Err(ValidationError::InitKeyReuse.into());
    }
    if key_package.extensions.has_duplicates() {
        return Err(ValidationError::DuplicateExtension.into());
    }

    validate_leaf(ctx, tree, leaf, &LeafCheck::key_package(extensions))
}

#[cfg(test)]
mod tests {
    use arbor_crypto::{CipherSuite, HpkePublicKey, RustCryptoProvider, env::test_utils::SeededEnv};

    use super::*;
    use crate::{auth::BasicAuthenticationService, config::ClientConfig};

    fn setup() -> (RustCryptoProvider<SeededEnv>, BasicAuthenticationService, ClientConfig) {
        let crypto =
            RustCryptoProvider::with_env(CipherSuite::Curve25519Aes128, SeededEnv::new(3)).unwrap();
        (crypto, BasicAuthenticationService::new(), ClientConfig::default())
    }

    fn bundle(ctx: &Context<'_>, name: &str) -> KeyPackageBundle {
        let identity =
            SigningIdentity::generate(ctx.crypto, Credential::basic(name.as_bytes().to_vec()))
                .unwrap();
        KeyPackageBundle::generate(ctx, identity).unwrap()
    }

    fn existing_tree(ctx: &Context<'_>) -> RatchetTree {
        RatchetTree::new(bundle(ctx, "alice").key_package.leaf_node)
    }

    #[test]
    fn generated_key_package_validates() {
        let (crypto, auth, config) = setup();
        let ctx = Context::new(&crypto, &auth, &config);
        let tree = existing_tree(&ctx);
        let bob = bundle(&ctx, "bob");
        validate_key_package(&ctx, &bob.key_package, &tree, &ExtensionList::new()).unwrap();
        assert_eq!(bob.reference(&crypto).unwrap().0.len(), 32);
    }

    #[test]
    fn tampered_key_package_fails_signature() {
        let (crypto, auth, config) = setup();
        let ctx = Context::new(&crypto, &auth, &config);
        let tree = existing_tree(&ctx);
        let mut bob = bundle(&ctx, "bob");
        bob.key_package.init_key = HpkePublicKey::new(vec![4; 32]);
        assert!(matches!(
            validate_key_package(&ctx, &bob.key_package, &tree, &ExtensionList::new()),
            Err(MlsError::Verification(VerificationError::Signature))
        ));
    }

    #[test]
    fn expired_key_package_is_rejected() {
        let (crypto, auth, config) = setup();
        let ctx = Context::new(&crypto, &auth, &config);
        let bob = bundle(&ctx, "bob");

        let later = RustCryptoProvider::with_env(
            CipherSuite::Curve25519Aes128,
            SeededEnv::new(4).at_time(SeededEnv::DEFAULT_TIME + 365 * 24 * 3600),
        )
        .unwrap();
        let later_ctx = Context::new(&later, &auth, &config);
        let tree = existing_tree(&later_ctx);
        assert!(matches!(
            validate_key_package(&later_ctx, &bob.key_package, &tree, &ExtensionList::new()),
            Err(MlsError::Validation(ValidationError::LifetimeExpired))
        ));
    }

    #[test]
    fn key_package_for_other_suite_is_rejected() {
        let (crypto, auth, config) = setup();
        let ctx = Context::new(&crypto, &auth, &config);
        let tree = existing_tree(&ctx);

        let chacha = RustCryptoProvider::new(CipherSuite::Curve25519ChaCha).unwrap();
        let chacha_ctx = Context::new(&chacha, &auth, &config);
        let bob = bundle(&chacha_ctx, "bob");
        assert!(matches!(
            validate_key_package(&ctx, &bob.key_package, &tree, &ExtensionList::new()),
            Err(MlsError::Validation(ValidationError::KeyPackageCipherSuite(0x0003)))
        ));
    }

    #[test]
    fn member_signature_key_cannot_be_added_again() {
        let (crypto, auth, config) = setup();
        let ctx = Context::new(&crypto, &auth, &config);
        let alice = bundle(&ctx, "alice");
        let tree = RatchetTree::new(alice.key_package.leaf_node.clone());

        let again = KeyPackageBundle::generate(&ctx, alice.identity.clone()).unwrap();
        assert!(matches!(
            validate_key_package(&ctx, &again.key_package, &tree, &ExtensionList::new()),
            Err(MlsError::Validation(ValidationError::DuplicateSignatureKey))
        ));
    }
}
