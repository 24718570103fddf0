// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! Inventory generation
//!
//! Folds the configuration document into a host/group graph and serializes
//! it into the inventory formats Ansible consumes.

mod document;
mod emitter;
mod model;

pub use document::InventoryDocument;
pub use emitter::{InventoryEmitter, InventoryFormat, TokenKind};
pub use model::{Group, Host, Inventory, InventoryBuilder, ALL_GROUP};

#[cfg(test)]
pub(crate) use model::tests as fixtures;
