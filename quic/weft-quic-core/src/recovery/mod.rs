// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod congestion_controller;
pub mod rtt_estimator;

pub use congestion_controller::{CongestionController, Pacer};
pub use rtt_estimator::RttEstimator;
