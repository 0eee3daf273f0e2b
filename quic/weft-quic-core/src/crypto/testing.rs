// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Null ciphers for exercising the transport without real cryptography.
//!
//! The "AEAD" appends a constant tag and XORs nothing; the header
//! "cipher" produces an all-zero mask. Packets protected this way are
//! bit-identical before and after, which keeps transport tests legible.

use crate::crypto::{CryptoError, HeaderKey, Key, LevelKeys};

pub const TAG_LEN: usize = 16;
const TAG: [u8; TAG_LEN] = [0xaa; TAG_LEN];

#[derive(Clone, Copy, Debug, Default)]
pub struct NullKey {
    /// When set, `open` rejects everything; models a cipher for a
    /// phase we no longer accept
    pub reject: bool,
}

impl Key for NullKey {
    fn open(
        &self,
        _packet_number: u64,
        _header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, CryptoError> {
        if self.reject {
            return Err(CryptoError::DECRYPT_ERROR);
        }
        payload
            .len()
            .checked_sub(TAG_LEN)
            .ok_or(CryptoError::DECRYPT_ERROR)
    }

    fn seal(
        &self,
        _packet_number: u64,
        _header: &[u8],
        payload: &mut [u8],
        payload_len: usize,
    ) -> Result<(), CryptoError> {
        payload[payload_len..payload_len + TAG_LEN].copy_from_slice(&TAG);
        Ok(())
    }

    fn tag_len(&self) -> usize {
        TAG_LEN
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullHeaderKey;

impl HeaderKey for NullHeaderKey {
    fn header_protection_mask(&self, _ciphertext_sample: &[u8]) -> [u8; 5] {
        [0; 5]
    }
}

pub fn null_level_keys() -> LevelKeys {
    LevelKeys {
        key: Box::new(NullKey::default()),
        header_key: Box::new(NullHeaderKey),
    }
}
