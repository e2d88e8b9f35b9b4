//! Crypto provider backed by the RustCrypto crates and `hpke`.
//!
//! Supports the two X25519/Ed25519/SHA-256 suites: `0x0001` (AES-128-GCM) and
//! `0x0003` (ChaCha20-Poly1305). Constructing a provider for any other suite
//! fails with [`CryptoError::UnsupportedCipherSuite`].

use std::fmt;

use aes_gcm::{
    Aes128Gcm,
    aead::{Aead, KeyInit, Nonce, Payload},
};
use chacha20poly1305::ChaCha20Poly1305;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use hpke::{
    Deserializable, Kem as _, OpModeR, OpModeS, Serializable,
    aead::{Aead as HpkeAead, AesGcm128, ChaCha20Poly1305 as HpkeChaCha20Poly1305},
    kdf::HkdfSha256,
    kem::X25519HkdfSha256,
};
use sha2::{Digest, Sha256};
use tls_codec::VLBytes;
use zeroize::Zeroize;

use crate::{
    cipher_suite::{AeadAlgorithm, CipherSuite},
    env::{Environment, EnvironmentRng, SystemEnv},
    error::CryptoError,
    provider::{
        AeadProvider, CipherSuiteProvider, HashProvider, HpkeExport, HpkeKeyPair, HpkeProvider,
        KdfProvider, RandomProvider, SignatureProvider,
    },
    secret::{
        HpkeCiphertext, HpkePublicKey, HpkeSecretKey, Secret, SignaturePublicKey,
        SignatureSecretKey,
    },
};

type HmacSha256 = Hmac<Sha256>;
type Kem = X25519HkdfSha256;

/// Ed25519 seed and public key length.
const ED25519_KEY_LEN: usize = 32;

/// Provider for one supported cipher suite, drawing randomness from `E`.
#[derive(Clone)]
pub struct RustCryptoProvider<E: Environment = SystemEnv> {
    suite: CipherSuite,
    env: E,
}

impl RustCryptoProvider<SystemEnv> {
    /// Provider using OS randomness and the system clock.
    pub fn new(suite: CipherSuite) -> Result<Self, CryptoError> {
        Self::with_env(suite, SystemEnv::new())
    }
}

impl<E: Environment> RustCryptoProvider<E> {
    /// Suites this provider implements.
    pub const SUPPORTED: [CipherSuite; 2] =
        [CipherSuite::Curve25519Aes128, CipherSuite::Curve25519ChaCha];

    /// Provider drawing randomness and time from `env`.
    pub fn with_env(suite: CipherSuite, env: E) -> Result<Self, CryptoError> {
        if !Self::SUPPORTED.contains(&suite) {
            return Err(CryptoError::UnsupportedCipherSuite(suite.id()));
        }
        Ok(Self { suite, env })
    }

    /// Environment backing this provider.
    pub fn env(&self) -> &E {
        &self.env
    }

    fn unsupported(&self) -> CryptoError {
        CryptoError::UnsupportedCipherSuite(self.suite.id())
    }
}

impl<E: Environment> fmt::Debug for RustCryptoProvider<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustCryptoProvider").field("suite", &self.suite).finish_non_exhaustive()
    }
}

impl<E: Environment> HashProvider for RustCryptoProvider<E> {
    fn hash(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(Sha256::digest(data).to_vec())
    }

    fn mac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut mac = hmac_for(key)?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify_mac(&self, key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
        let mut mac = hmac_for(key)?;
        mac.update(data);
        mac.verify_slice(tag).map_err(|_| CryptoError::InvalidMac)
    }
}

fn hmac_for(key: &[u8]) -> Result<HmacSha256, CryptoError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|err| CryptoError::InvalidKey { kind: "MAC", reason: err.to_string() })
}

impl<E: Environment> KdfProvider for RustCryptoProvider<E> {
    fn kdf_extract(&self, salt: &[u8], ikm: &[u8]) -> Result<Secret, CryptoError> {
        let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
        Ok(Secret::new(prk.to_vec()))
    }

    fn kdf_expand(&self, prk: &[u8], info: &[u8], len: usize) -> Result<Secret, CryptoError> {
        let hkdf = Hkdf::<Sha256>::from_prk(prk)
            .map_err(|err| CryptoError::InvalidKey { kind: "PRK", reason: err.to_string() })?;
        let mut okm = vec![0u8; len];
        hkdf.expand(info, &mut okm)
            .map_err(|_| CryptoError::KdfOutputLength { requested: len })?;
        Ok(Secret::new(okm))
    }

    fn kdf_extract_size(&self) -> usize {
        self.suite.hash().digest_size()
    }
}

impl<E: Environment> AeadProvider for RustCryptoProvider<E> {
    fn aead_seal(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.check_nonce(nonce)?;
        match self.suite.aead() {
            AeadAlgorithm::Aes128Gcm => seal_with::<Aes128Gcm>(key, nonce, aad, plaintext),
            AeadAlgorithm::ChaCha20Poly1305 => {
                seal_with::<ChaCha20Poly1305>(key, nonce, aad, plaintext)
            },
            AeadAlgorithm::Aes256Gcm => Err(self.unsupported()),
        }
    }

    fn aead_open(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.check_nonce(nonce)?;
        match self.suite.aead() {
            AeadAlgorithm::Aes128Gcm => open_with::<Aes128Gcm>(key, nonce, aad, ciphertext),
            AeadAlgorithm::ChaCha20Poly1305 => {
                open_with::<ChaCha20Poly1305>(key, nonce, aad, ciphertext)
            },
            AeadAlgorithm::Aes256Gcm => Err(self.unsupported()),
        }
    }

    fn aead_key_size(&self) -> usize {
        self.suite.aead().key_size()
    }

    fn aead_nonce_size(&self) -> usize {
        self.suite.aead().nonce_size()
    }
}

impl<E: Environment> RustCryptoProvider<E> {
    fn check_nonce(&self, nonce: &[u8]) -> Result<(), CryptoError> {
        let expected = self.aead_nonce_size();
        if nonce.len() != expected {
            return Err(CryptoError::AeadInput(format!(
                "nonce length {} (expected {expected})",
                nonce.len()
            )));
        }
        Ok(())
    }
}

fn seal_with<C: Aead + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = C::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey { kind: "AEAD", reason: format!("{} bytes", key.len()) })?;
    cipher
        .encrypt(Nonce::<C>::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadInput("seal failed".to_string()))
}

fn open_with<C: Aead + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = C::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey { kind: "AEAD", reason: format!("{} bytes", key.len()) })?;
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AeadOpenFailed)
}

fn hpke_error(err: hpke::HpkeError) -> CryptoError {
    match err {
        hpke::HpkeError::OpenError => CryptoError::AeadOpenFailed,
        other => CryptoError::Hpke(format!("{other:?}")),
    }
}

fn kem_public(key: &HpkePublicKey) -> Result<<Kem as hpke::Kem>::PublicKey, CryptoError> {
    <Kem as hpke::Kem>::PublicKey::from_bytes(key.as_bytes())
        .map_err(|err| CryptoError::InvalidKey { kind: "HPKE public", reason: format!("{err:?}") })
}

fn kem_private(key: &HpkeSecretKey) -> Result<<Kem as hpke::Kem>::PrivateKey, CryptoError> {
    <Kem as hpke::Kem>::PrivateKey::from_bytes(key.as_bytes())
        .map_err(|err| CryptoError::InvalidKey { kind: "HPKE private", reason: format!("{err:?}") })
}

fn kem_encapped(bytes: &[u8]) -> Result<<Kem as hpke::Kem>::EncappedKey, CryptoError> {
    <Kem as hpke::Kem>::EncappedKey::from_bytes(bytes)
        .map_err(|err| CryptoError::InvalidKey { kind: "KEM output", reason: format!("{err:?}") })
}

fn key_pair(
    secret: &<Kem as hpke::Kem>::PrivateKey,
    public: &<Kem as hpke::Kem>::PublicKey,
) -> HpkeKeyPair {
    HpkeKeyPair {
        secret: HpkeSecretKey::new(secret.to_bytes().to_vec()),
        public: HpkePublicKey::new(public.to_bytes().to_vec()),
    }
}

fn hpke_seal_with<A: HpkeAead, E: Environment>(
    env: &E,
    public_key: &HpkePublicKey,
    info: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<HpkeCiphertext, CryptoError> {
    let public_key = kem_public(public_key)?;
    let (encapped, ciphertext) = hpke::single_shot_seal::<A, HkdfSha256, Kem, _>(
        &OpModeS::Base,
        &public_key,
        info,
        plaintext,
        aad,
        &mut EnvironmentRng(env),
    )
    .map_err(hpke_error)?;

    Ok(HpkeCiphertext {
        kem_output: VLBytes::new(encapped.to_bytes().to_vec()),
        ciphertext: VLBytes::new(ciphertext),
    })
}

fn hpke_open_with<A: HpkeAead>(
    secret_key: &HpkeSecretKey,
    ciphertext: &HpkeCiphertext,
    info: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let secret_key = kem_private(secret_key)?;
    let encapped = kem_encapped(ciphertext.kem_output.as_slice())?;
    hpke::single_shot_open::<A, HkdfSha256, Kem>(
        &OpModeR::Base,
        &secret_key,
        &encapped,
        info,
        ciphertext.ciphertext.as_slice(),
        aad,
    )
    .map_err(hpke_error)
}

fn hpke_export_sender_with<A: HpkeAead, E: Environment>(
    env: &E,
    public_key: &HpkePublicKey,
    info: &[u8],
    exporter_context: &[u8],
    len: usize,
) -> Result<HpkeExport, CryptoError> {
    let public_key = kem_public(public_key)?;
    let (encapped, context) = hpke::setup_sender::<A, HkdfSha256, Kem, _>(
        &OpModeS::Base,
        &public_key,
        info,
        &mut EnvironmentRng(env),
    )
    .map_err(hpke_error)?;

    let mut out = vec![0u8; len];
    context.export(exporter_context, &mut out).map_err(hpke_error)?;
    Ok(HpkeExport { kem_output: encapped.to_bytes().to_vec(), secret: Secret::new(out) })
}

fn hpke_export_receiver_with<A: HpkeAead>(
    secret_key: &HpkeSecretKey,
    kem_output: &[u8],
    info: &[u8],
    exporter_context: &[u8],
    len: usize,
) -> Result<Secret, CryptoError> {
    let secret_key = kem_private(secret_key)?;
    let encapped = kem_encapped(kem_output)?;
    let context =
        hpke::setup_receiver::<A, HkdfSha256, Kem>(&OpModeR::Base, &secret_key, &encapped, info)
            .map_err(hpke_error)?;

    let mut out = vec![0u8; len];
    context.export(exporter_context, &mut out).map_err(hpke_error)?;
    Ok(Secret::new(out))
}

impl<E: Environment> HpkeProvider for RustCryptoProvider<E> {
    fn hpke_seal(
        &self,
        public_key: &HpkePublicKey,
        info: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<HpkeCiphertext, CryptoError> {
        match self.suite.aead() {
            AeadAlgorithm::Aes128Gcm => {
                hpke_seal_with::<AesGcm128, E>(&self.env, public_key, info, aad, plaintext)
            },
            AeadAlgorithm::ChaCha20Poly1305 => hpke_seal_with::<HpkeChaCha20Poly1305, E>(
                &self.env, public_key, info, aad, plaintext,
            ),
            AeadAlgorithm::Aes256Gcm => Err(self.unsupported()),
        }
    }

    fn hpke_open(
        &self,
        secret_key: &HpkeSecretKey,
        ciphertext: &HpkeCiphertext,
        info: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        match self.suite.aead() {
            AeadAlgorithm::Aes128Gcm => {
                hpke_open_with::<AesGcm128>(secret_key, ciphertext, info, aad)
            },
            AeadAlgorithm::ChaCha20Poly1305 => {
                hpke_open_with::<HpkeChaCha20Poly1305>(secret_key, ciphertext, info, aad)
            },
            AeadAlgorithm::Aes256Gcm => Err(self.unsupported()),
        }
    }

    fn kem_generate(&self) -> Result<HpkeKeyPair, CryptoError> {
        let (secret, public) = Kem::gen_keypair(&mut EnvironmentRng(&self.env));
        Ok(key_pair(&secret, &public))
    }

    fn kem_derive(&self, ikm: &[u8]) -> Result<HpkeKeyPair, CryptoError> {
        let (secret, public) = Kem::derive_keypair(ikm);
        Ok(key_pair(&secret, &public))
    }

    fn kem_public_key(&self, secret_key: &HpkeSecretKey) -> Result<HpkePublicKey, CryptoError> {
        let secret = kem_private(secret_key)?;
        Ok(HpkePublicKey::new(Kem::sk_to_pk(&secret).to_bytes().to_vec()))
    }

    fn hpke_export_sender(
        &self,
        public_key: &HpkePublicKey,
        info: &[u8],
        exporter_context: &[u8],
        len: usize,
    ) -> Result<HpkeExport, CryptoError> {
        match self.suite.aead() {
            AeadAlgorithm::Aes128Gcm => hpke_export_sender_with::<AesGcm128, E>(
                &self.env,
                public_key,
                info,
                exporter_context,
                len,
            ),
            AeadAlgorithm::ChaCha20Poly1305 => hpke_export_sender_with::<HpkeChaCha20Poly1305, E>(
                &self.env,
                public_key,
                info,
                exporter_context,
                len,
            ),
            AeadAlgorithm::Aes256Gcm => Err(self.unsupported()),
        }
    }

    fn hpke_export_receiver(
        &self,
        secret_key: &HpkeSecretKey,
        kem_output: &[u8],
        info: &[u8],
        exporter_context: &[u8],
        len: usize,
    ) -> Result<Secret, CryptoError> {
        match self.suite.aead() {
            AeadAlgorithm::Aes128Gcm => hpke_export_receiver_with::<AesGcm128>(
                secret_key,
                kem_output,
                info,
                exporter_context,
                len,
            ),
            AeadAlgorithm::ChaCha20Poly1305 => hpke_export_receiver_with::<HpkeChaCha20Poly1305>(
                secret_key,
                kem_output,
                info,
                exporter_context,
                len,
            ),
            AeadAlgorithm::Aes256Gcm => Err(self.unsupported()),
        }
    }
}

fn signing_key(secret_key: &SignatureSecretKey) -> Result<SigningKey, CryptoError> {
    let mut seed: [u8; ED25519_KEY_LEN] = secret_key.as_bytes().try_into().map_err(|_| {
        CryptoError::InvalidKey {
            kind: "signature private",
            reason: format!("{} bytes", secret_key.as_bytes().len()),
        }
    })?;
    let key = SigningKey::from_bytes(&seed);
    seed.zeroize();
    Ok(key)
}

impl<E: Environment> SignatureProvider for RustCryptoProvider<E> {
    fn signature_key_generate(
        &self,
    ) -> Result<(SignatureSecretKey, SignaturePublicKey), CryptoError> {
        let mut seed = [0u8; ED25519_KEY_LEN];
        self.env.random_bytes(&mut seed);
        let key = SigningKey::from_bytes(&seed);
        seed.zeroize();

        let public = SignaturePublicKey::new(key.verifying_key().to_bytes().to_vec());
        Ok((SignatureSecretKey::new(key.to_bytes().to_vec()), public))
    }

    fn signature_public_key(
        &self,
        secret_key: &SignatureSecretKey,
    ) -> Result<SignaturePublicKey, CryptoError> {
        let key = signing_key(secret_key)?;
        Ok(SignaturePublicKey::new(key.verifying_key().to_bytes().to_vec()))
    }

    fn sign(&self, secret_key: &SignatureSecretKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = signing_key(secret_key)?;
        Ok(key.sign(data).to_bytes().to_vec())
    }

    fn verify(
        &self,
        public_key: &SignaturePublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let bytes: [u8; ED25519_KEY_LEN] = public_key.as_bytes().try_into().map_err(|_| {
            CryptoError::InvalidKey {
                kind: "signature public",
                reason: format!("{} bytes", public_key.as_bytes().len()),
            }
        })?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|err| CryptoError::InvalidKey {
            kind: "signature public",
            reason: err.to_string(),
        })?;
        let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
        key.verify_strict(data, &signature).map_err(|_| CryptoError::InvalidSignature)
    }
}

impl<E: Environment> RandomProvider for RustCryptoProvider<E> {
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.env.random_bytes(buffer);
    }

    fn unix_time(&self) -> u64 {
        self.env.unix_time()
    }
}

impl<E: Environment> CipherSuiteProvider for RustCryptoProvider<E> {
    fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }
}
