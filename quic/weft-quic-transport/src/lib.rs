// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The weft QUIC connection state machine.
//!
//! A `connection::Connection` is a pure state machine behind a
//! datagram-in/datagram-out interface: the embedding event loop feeds
//! it received datagrams, polls it for datagrams to send, and fires
//! its timers. It never blocks and owns no sockets.

pub mod connection;
pub mod path;
pub mod recovery;
pub mod space;
pub mod stream;
pub mod transmission;

pub use connection::Connection;
