// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Terminal helpers shared by the commands

pub mod colors;
pub mod spinner;

pub use colors::*;
pub use spinner::*;
