// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypted identity credentials for the hoprelay message relay.
//!
//! Secrets are sealed with AES-256-GCM under a random master key; the master
//! key is wrapped by an Argon2id key derived from the operator passphrase.
//! [`CredentialVault`] pairs those secrets with identity metadata and hands
//! out opaque [`hoprelay_core::CredentialHandle`]s.

pub mod credentials;
pub mod crypto;
pub mod import;
pub mod kdf;
pub mod prompt;
pub mod startup;
pub mod vault;

pub use credentials::CredentialVault;
pub use import::{ImportReport, import_config_secrets};
pub use prompt::{VAULT_KEY_ENV_VAR, get_vault_passphrase};
pub use startup::{open_credentials, unlock_or_create};
pub use vault::{Vault, mask_secret};
