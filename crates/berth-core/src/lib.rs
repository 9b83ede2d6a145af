// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! # berth-core
//!
//! Core library of berth, a single-host application fleet manager. It keeps
//! every managed app in a versioned directory layout, supervises one OS
//! process per app, and turns uploaded gzipped tarballs into new runnable
//! versions.
//!
//! ## On-disk layout
//!
//! ```text
//! <apps root>/
//!     web/
//!         config.json        env vars and operator metadata
//!         1/  2/  3/         immutable version directories
//!             manifest.json  how to run, build, and migrate this version
//!         current -> 3       symlink selecting the active version
//!         app.log            process stdout, survives switches
//!         app.error.log      process stderr, survives switches
//!     api/
//!         ...
//! ```
//!
//! ## Components
//!
//! | Module                 | Responsibility                                   |
//! |------------------------|--------------------------------------------------|
//! | [`manager`]            | Registry of apps, fleet-wide start/stop fan-out  |
//! | [`app`]                | Versioned storage, config, switch, deploy        |
//! | [`instance`]           | One OS process: spawn, observe, signal, reap     |
//! | [`manifest`]           | Per-version `manifest.json`                      |
//! | [`pipeline`]           | Streaming gunzip + untar with stage attribution  |
//! | [`error`]              | Error enum with stable error codes               |
//!
//! ## Instance lifecycle
//!
//! ```text
//!            start()                     stop()
//! Idle ----> Starting ----> Running ----> Stopping ----> Stopped
//!                              |
//!                              | exit observed, non-zero
//!                              v
//!                           Crashed
//! ```
//!
//! Crashes are observed and reported through status, never auto-restarted.

#![deny(missing_docs)]

pub mod app;
pub mod error;
pub mod instance;
pub mod manager;
pub mod manifest;
pub mod pipeline;

pub use app::{App, AppConfig, AppStatus};
pub use error::{Error, Result};
pub use instance::{AppInstance, InstanceSpec, InstanceState, InstanceStatus};
pub use manager::AppManager;
pub use manifest::Manifest;
pub use pipeline::PipelineStage;
