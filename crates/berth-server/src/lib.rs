// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP management server for berth.
//!
//! Exposes the [`berth_core`] fleet manager over a JSON API: list, create,
//! start, stop, restart, deploy, and switch apps on a single host.

#![deny(missing_docs)]

pub mod api;
pub mod config;
