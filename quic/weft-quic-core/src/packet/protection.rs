// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Header protection application and removal.

use crate::{
    crypto::{CryptoError, HeaderKey},
    packet::LONG_HEADER_BIT,
};

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# The output of this algorithm is a 5-byte mask that is applied to the
//# protected header fields using exclusive OR.  The least significant
//# bits of the first byte of the packet are masked by the least
//# significant bits of the first mask byte

/// Bits of the first byte masked for long headers
const LONG_FIRST_BYTE_MASK: u8 = 0x0f;
/// Bits of the first byte masked for short headers
const SHORT_FIRST_BYTE_MASK: u8 = 0x1f;

/// How far past the packet-number offset the ciphertext sample begins.
///
/// The sample is taken as if the packet number were its maximum
/// length, so protection can be removed before the length is known.
pub const SAMPLE_OFFSET_FROM_PN: usize = 4;

#[inline]
fn first_byte_mask(first_byte: u8) -> u8 {
    if first_byte & LONG_HEADER_BIT != 0 {
        LONG_FIRST_BYTE_MASK
    } else {
        SHORT_FIRST_BYTE_MASK
    }
}

fn sample<'a>(packet: &'a [u8], pn_offset: usize, key: &dyn HeaderKey) -> Result<&'a [u8], CryptoError> {
    let start = pn_offset + SAMPLE_OFFSET_FROM_PN;
    let end = start + key.sample_len();
    packet
        .get(start..end)
        .ok_or(CryptoError::DECRYPT_ERROR.with_reason("packet too short to sample"))
}

/// Removes header protection in place, returning the packet-number
/// length encoded in the now-cleartext first byte
pub fn remove(
    key: &dyn HeaderKey,
    packet: &mut [u8],
    pn_offset: usize,
) -> Result<usize, CryptoError> {
    let mask = key.header_protection_mask(sample(packet, pn_offset, key)?);

    packet[0] ^= mask[0] & first_byte_mask(packet[0]);
    let pn_len = (packet[0] & crate::packet::number::PACKET_NUMBER_LEN_MASK) as usize + 1;

    for (index, mask_byte) in mask[1..=pn_len].iter().enumerate() {
        packet[pn_offset + index] ^= mask_byte;
    }

    Ok(pn_len)
}

/// Applies header protection in place over an already-encrypted packet
pub fn apply(
    key: &dyn HeaderKey,
    packet: &mut [u8],
    pn_offset: usize,
    pn_len: usize,
) -> Result<(), CryptoError> {
    let mask = key.header_protection_mask(sample(packet, pn_offset, key)?);

    packet[0] ^= mask[0] & first_byte_mask(packet[0]);
    for (index, mask_byte) in mask[1..=pn_len].iter().enumerate() {
        packet[pn_offset + index] ^= mask_byte;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HeaderKey;

    struct XorKey;

    impl HeaderKey for XorKey {
        fn header_protection_mask(&self, sample: &[u8]) -> [u8; 5] {
            // mask derived from the sample, so apply/remove must use
            // the same sample bytes
            [sample[0], 0x5a, 0x5a, 0x5a, 0x5a]
        }
    }

    #[test]
    fn apply_remove_round_trip() {
        // short header, pn at offset 9, pn_len 2
        let mut packet = [0u8; 64];
        packet[0] = 0x40 | 0b01;
        for (index, byte) in packet.iter_mut().enumerate().skip(1) {
            *byte = index as u8;
        }
        let original = packet;

        apply(&XorKey, &mut packet, 9, 2).unwrap();
        assert_ne!(packet[9], original[9]);

        let pn_len = remove(&XorKey, &mut packet, 9).unwrap();
        assert_eq!(pn_len, 2);
        assert_eq!(packet, original);
    }

    #[test]
    fn too_short_to_sample() {
        let mut packet = [0x40u8; 8];
        assert!(remove(&XorKey, &mut packet, 1).is_err());
    }
}
