//! Property-Based Tests for the Codec and Filename Derivation
//!
//! Uses proptest to verify the on-disk record format and the path
//! derivation across a wide range of inputs.
//!
//! # Test Properties
//!
//! 1. **Roundtrip Correctness**: decode(encode(asset)) = asset
//! 2. **Length Accounting**: encode produces exactly encoded_len bytes
//! 3. **Rejection Safety**: arbitrary byte soup never panics the decoder
//! 4. **Path Determinism**: same ID, same path; names never contain
//!    invalid characters

#![cfg(test)]

use proptest::prelude::*;

use bytes::Bytes;
use uuid::Uuid;

use super::codec::{decode, encode, encoded_len, CodecLimits};
use super::filename::path_of;
use crate::asset::Asset;

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for arbitrary assets within default codec limits.
fn asset_strategy() -> impl Strategy<Value = Asset> {
    (
        "[a-zA-Z0-9_-]{1,64}",
        any::<[u8; 16]>(),
        ".{0,32}",
        ".{0,64}",
        any::<i8>(),
        any::<u32>(),
        prop::collection::vec(any::<u8>(), 0..2048),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(id, uuid, name, description, kind, flags, data, local, temporary)| Asset {
                id,
                uuid: Uuid::from_bytes(uuid),
                name,
                description,
                kind,
                flags,
                data: Bytes::from(data),
                local,
                temporary,
            },
        )
}

/// Strategy for IDs including hostile path characters.
fn hostile_id_strategy() -> impl Strategy<Value = String> {
    ".{1,80}"
}

proptest! {
    #[test]
    fn prop_codec_round_trip(asset in asset_strategy()) {
        let bytes = encode(&asset);
        prop_assert_eq!(bytes.len(), encoded_len(&asset));

        let decoded = decode(&bytes, &CodecLimits::default()).unwrap();
        prop_assert_eq!(decoded, asset);
    }

    #[test]
    fn prop_decoder_never_panics(soup in prop::collection::vec(any::<u8>(), 0..512)) {
        // Any outcome is fine as long as it is a Result, not a panic.
        let _ = decode(&soup, &CodecLimits::default());
    }

    #[test]
    fn prop_truncation_always_rejected(asset in asset_strategy(), cut in 0usize..64) {
        let bytes = encode(&asset);
        if cut < bytes.len() {
            let err = decode(&bytes[..bytes.len() - cut - 1], &CodecLimits::default());
            prop_assert!(err.is_err());
        }
    }

    #[test]
    fn prop_path_is_deterministic_and_clean(
        id in hostile_id_strategy(),
        tiers in 1u32..=3,
        tier_len in 1u32..=4,
    ) {
        let root = std::path::Path::new("root");
        let first = path_of(root, &id, tiers, tier_len);
        let second = path_of(root, &id, tiers, tier_len);
        prop_assert_eq!(&first, &second);

        if let Some(path) = first {
            // root + one directory per tier + filename
            prop_assert_eq!(path.components().count(), 2 + tiers as usize);
            let name = path.file_name().unwrap().to_string_lossy();
            prop_assert!(name.len() >= (tiers * tier_len) as usize);
            for c in ['/', '\\', ':', '*', '?', '"', '<', '>', '|'] {
                prop_assert!(!name.contains(c));
            }
        } else {
            prop_assert!(id.trim().is_empty());
        }
    }
}
