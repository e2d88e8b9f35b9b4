//! Shared codec helpers for the MLS presentation language.
//!
//! `tls_codec` derives cover plain structs. Tagged unions whose body depends
//! on an earlier field (`select`) and types with an open `Custom` variant are
//! encoded by hand with the helpers here.

use std::io::{Read, Write};

use tls_codec::{Deserialize, Serialize, Size, VLByteSlice, VLBytes};

/// Length of the variable-length vector header for a body of `len` bytes.
///
/// MLS uses the 2-bit size-class prefix of RFC 9000: 1 byte up to 63, 2 bytes
/// up to 16383, 4 bytes up to 2^30 - 1.
pub fn vl_header_len(len: usize) -> usize {
    if len <= 0x3f {
        1
    } else if len <= 0x3fff {
        2
    } else {
        4
    }
}

/// Serialized length of `bytes` as an `opaque<V>`.
pub fn vl_len(bytes: &[u8]) -> usize {
    vl_header_len(bytes.len()) + bytes.len()
}

/// Write `bytes` as an `opaque<V>`.
pub fn write_vl<W: Write>(bytes: &[u8], writer: &mut W) -> Result<usize, tls_codec::Error> {
    VLByteSlice(bytes).tls_serialize(writer)
}

/// Read an `opaque<V>`.
pub fn read_vl<R: Read>(bytes: &mut R) -> Result<Vec<u8>, tls_codec::Error> {
    VLBytes::tls_deserialize(bytes).map(|value| value.as_slice().to_vec())
}

/// Serialize `value` into a fresh buffer.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, tls_codec::Error> {
    value.tls_serialize_detached()
}

/// Decode `T` from `bytes`, rejecting trailing data.
pub fn decode<T: Deserialize>(bytes: &[u8]) -> Result<T, tls_codec::Error> {
    T::tls_deserialize_exact(bytes)
}

/// Serialized length of an inner value written as `opaque<V>` (extension and
/// custom payload bodies).
pub fn nested_len<T: Size>(value: &T) -> usize {
    let len = value.tls_serialized_len();
    vl_header_len(len) + len
}

/// Write an inner value as `opaque<V>`.
pub fn write_nested<T: Serialize, W: Write>(
    value: &T,
    writer: &mut W,
) -> Result<usize, tls_codec::Error> {
    let body = value.tls_serialize_detached()?;
    write_vl(&body, writer)
}

/// Implements the codec traits for a `u16` newtype.
macro_rules! u16_newtype_codec {
    ($name:ident) => {
        impl tls_codec::Size for $name {
            fn tls_serialized_len(&self) -> usize {
                2
            }
        }

        impl tls_codec::Serialize for $name {
            fn tls_serialize<W: std::io::Write>(
                &self,
                writer: &mut W,
            ) -> Result<usize, tls_codec::Error> {
                tls_codec::Serialize::tls_serialize(&self.0, writer)
            }
        }

        impl tls_codec::Deserialize for $name {
            fn tls_deserialize<R: std::io::Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
                <u16 as tls_codec::Deserialize>::tls_deserialize(bytes).map(Self)
            }
        }
    };
}

/// Implements the codec traits for a `Vec<u8>` newtype encoded as `opaque<V>`.
macro_rules! opaque_newtype_codec {
    ($name:ident) => {
        impl tls_codec::Size for $name {
            fn tls_serialized_len(&self) -> usize {
                $crate::codec::vl_len(&self.0)
            }
        }

        impl tls_codec::Serialize for $name {
            fn tls_serialize<W: std::io::Write>(
                &self,
                writer: &mut W,
            ) -> Result<usize, tls_codec::Error> {
                $crate::codec::write_vl(&self.0, writer)
            }
        }

        impl tls_codec::Deserialize for $name {
            fn tls_deserialize<R: std::io::Read>(bytes: &mut R) -> Result<Self, tls_codec::Error> {
                $crate::codec::read_vl(bytes).map(Self)
            }
        }
    };
}

pub(crate) use opaque_newtype_codec;
pub(crate) use u16_newtype_codec;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_length_matches_size_classes() {
        assert_eq!(vl_header_len(0), 1);
        assert_eq!(vl_header_len(63), 1);
        assert_eq!(vl_header_len(64), 2);
        assert_eq!(vl_header_len(16383), 2);
        assert_eq!(vl_header_len(16384), 4);
    }

    #[test]
    fn computed_length_matches_written_length() {
        for len in [0usize, 1, 63, 64, 300, 16383, 16384] {
            let body = vec![0xABu8; len];
            let mut out = Vec::new();
            let written = write_vl(&body, &mut out).unwrap();
            assert_eq!(written, out.len());
            assert_eq!(vl_len(&body), out.len(), "length {len}");
        }
    }

    #[test]
    fn read_rejects_truncated_body() {
        let mut bytes: &[u8] = &[5, 1, 2];
        assert!(read_vl(&mut bytes).is_err());
    }
}
