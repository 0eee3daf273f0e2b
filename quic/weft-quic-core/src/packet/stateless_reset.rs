// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stateless reset recognition.
//!
//! A stateless reset is indistinguishable from a short-header packet
//! until decryption fails; the receiver then compares the trailing
//! token bytes against the reset tokens its peer has advertised.

use subtle::ConstantTimeEq;

pub const TOKEN_LEN: usize = 16;

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.3
//# Stateless Reset {
//#   Fixed Bits (2) = 01,
//#   Unpredictable Bits (38..),
//#   Stateless Reset Token (128),
//# }

/// The smallest datagram that can be a stateless reset
pub const MIN_LEN: usize = 21;

/// Extracts the candidate reset token from an undecryptable datagram
#[inline]
pub fn candidate_token(datagram: &[u8]) -> Option<&[u8; TOKEN_LEN]> {
    if datagram.len() < MIN_LEN {
        return None;
    }
    datagram[datagram.len() - TOKEN_LEN..].try_into().ok()
}

/// Compares a candidate against a known token without leaking timing
#[inline]
pub fn token_matches(candidate: &[u8; TOKEN_LEN], known: &[u8; TOKEN_LEN]) -> bool {
    candidate.ct_eq(known).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_datagrams_are_not_resets() {
        assert!(candidate_token(&[0u8; MIN_LEN - 1]).is_none());
        assert!(candidate_token(&[0u8; MIN_LEN]).is_some());
    }

    #[test]
    fn token_extraction() {
        let mut datagram = vec![0x41u8; 30];
        let token = [9u8; TOKEN_LEN];
        datagram[30 - TOKEN_LEN..].copy_from_slice(&token);
        let candidate = candidate_token(&datagram).unwrap();
        assert!(token_matches(candidate, &token));
        assert!(!token_matches(candidate, &[8u8; TOKEN_LEN]));
    }
}
