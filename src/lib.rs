// Copyright 2026 Vigil Contributors
// SPDX-License-Identifier: Apache-2.0

//! Vigil library — watch dynamic web pages and act when they change.
//!
//! This library crate exposes the core modules for integration testing.

pub mod agent;
pub mod browser;
pub mod cli;
pub mod config;
pub mod dump;
pub mod executor;
pub mod notify;
pub mod pipeline;
pub mod snapshot;
