// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command implementations for the `dbt` binary.

#![deny(unsafe_code)]

pub mod commands;
pub mod format;
