//! Labeled MLS operations (RFC 9420 section 5).
//!
//! Every KDF, signature, HPKE and reference-hash use in MLS is domain
//! separated by a label prefixed with `"MLS 1.0 "`. These helpers build the
//! labeled structures and hand them to the provider.

use tls_codec::{Serialize, VLByteSlice};

use crate::{
    error::CryptoError,
    provider::{HashProvider, HpkeProvider, KdfProvider, SignatureProvider},
    secret::{
        HpkeCiphertext, HpkePublicKey, HpkeSecretKey, Secret, SignaturePublicKey,
        SignatureSecretKey,
    },
};

/// Protocol label prefix.
pub const LABEL_PREFIX: &[u8] = b"MLS 1.0 ";

fn full_label(label: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(LABEL_PREFIX.len() + label.len());
    out.extend_from_slice(LABEL_PREFIX);
    out.extend_from_slice(label.as_bytes());
    out
}

/// `struct { uint16 length; opaque label<V>; opaque context<V>; } KDFLabel`
fn kdf_label(length: u16, label: &[u8], context: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(2 + label.len() + context.len() + 8);
    length.tls_serialize(&mut out)?;
    VLByteSlice(label).tls_serialize(&mut out)?;
    VLByteSlice(context).tls_serialize(&mut out)?;
    Ok(out)
}

/// Two consecutive variable-length vectors. Shared layout of `SignContent`,
/// `EncryptContext` and `RefHashInput`.
fn labeled_pair(label: &[u8], value: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::with_capacity(label.len() + value.len() + 8);
    VLByteSlice(label).tls_serialize(&mut out)?;
    VLByteSlice(value).tls_serialize(&mut out)?;
    Ok(out)
}

fn labeled_content(label: &str, content: &[u8]) -> Result<Vec<u8>, CryptoError> {
    labeled_pair(&full_label(label), content)
}

/// `ExpandWithLabel(secret, label, context, length)`.
pub fn expand_with_label<P: KdfProvider + ?Sized>(
    provider: &P,
    secret: &Secret,
    label: &str,
    context: &[u8],
    length: usize,
) -> Result<Secret, CryptoError> {
    let encoded_length =
        u16::try_from(length).map_err(|_| CryptoError::KdfOutputLength { requested: length })?;
    let info = kdf_label(encoded_length, &full_label(label), context)?;
    provider.kdf_expand(secret.as_bytes(), &info, length)
}

/// `DeriveSecret(secret, label)`: expand to `Nh` bytes with empty context.
pub fn derive_secret<P: KdfProvider + ?Sized>(
    provider: &P,
    secret: &Secret,
    label: &str,
) -> Result<Secret, CryptoError> {
    expand_with_label(provider, secret, label, &[], provider.kdf_extract_size())
}

/// `DeriveTreeSecret(secret, label, generation, length)`.
pub fn derive_tree_secret<P: KdfProvider + ?Sized>(
    provider: &P,
    secret: &Secret,
    label: &str,
    generation: u32,
    length: usize,
) -> Result<Secret, CryptoError> {
    expand_with_label(provider, secret, label, &generation.to_be_bytes(), length)
}

/// `SignWithLabel(key, label, content)`.
pub fn sign_with_label<P: SignatureProvider + ?Sized>(
    provider: &P,
    secret_key: &SignatureSecretKey,
    label: &str,
    content: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    provider.sign(secret_key, &labeled_content(label, content)?)
}

/// `VerifyWithLabel(key, label, content, signature)`.
pub fn verify_with_label<P: SignatureProvider + ?Sized>(
    provider: &P,
    public_key: &SignaturePublicKey,
    label: &str,
    content: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    provider.verify(public_key, &labeled_content(label, content)?, signature)
}

/// `EncryptWithLabel(key, label, context, plaintext)`.
pub fn encrypt_with_label<P: HpkeProvider + ?Sized>(
    provider: &P,
    public_key: &HpkePublicKey,
    label: &str,
    context: &[u8],
    plaintext: &[u8],
) -> Result<HpkeCiphertext, CryptoError> {
    provider.hpke_seal(public_key, &labeled_content(label, context)?, &[], plaintext)
}

/// `DecryptWithLabel(key, label, context, ciphertext)`.
pub fn decrypt_with_label<P: HpkeProvider + ?Sized>(
    provider: &P,
    secret_key: &HpkeSecretKey,
    label: &str,
    context: &[u8],
    ciphertext: &HpkeCiphertext,
) -> Result<Vec<u8>, CryptoError> {
    provider.hpke_open(secret_key, ciphertext, &labeled_content(label, context)?, &[])
}

/// `RefHash(label, value)`.
///
/// Unlike the other labeled operations the label is passed in full (for
/// example `"MLS 1.0 KeyPackage Reference"`).
pub fn ref_hash<P: HashProvider + ?Sized>(
    provider: &P,
    label: &str,
    value: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    provider.hash(&labeled_pair(label.as_bytes(), value)?)
}
