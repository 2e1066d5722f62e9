// Copyright 2026 The Chat Relay Project
// SPDX-License-Identifier: Apache-2.0

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod relay;
pub mod settings;
pub mod sse;
pub mod upstream;
