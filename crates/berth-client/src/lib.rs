// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client SDK for the berth management server.
//!
//! [`BerthClient`] wraps the server's JSON API: listing, creating, starting,
//! stopping, configuring, deploying, and switching apps. The `berthctl`
//! binary is a thin command-line front end over it.

#![deny(missing_docs)]

pub mod client;
pub mod error;
pub mod types;

pub use client::{BerthClient, DEFAULT_SERVER};
pub use error::{ClientError, Result};
pub use types::{AppConfig, AppStatus, DeployResult, InstanceStatus};
