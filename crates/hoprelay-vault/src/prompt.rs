// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vault passphrase from `HOPRELAY_VAULT_KEY` or an interactive prompt.

use std::io::IsTerminal;

use hoprelay_core::RelayError;
use secrecy::SecretString;

/// Environment variable checked before prompting.
pub const VAULT_KEY_ENV_VAR: &str = "HOPRELAY_VAULT_KEY";

/// Passphrase for unlocking an existing vault.
///
/// The environment variable wins so that services can start unattended.
/// Otherwise the operator is prompted, provided stdin is a terminal.
pub fn get_vault_passphrase() -> Result<SecretString, RelayError> {
    if let Some(key) = from_env() {
        return Ok(key);
    }
    require_terminal()?;
    read_nonempty("Vault passphrase: ").map(SecretString::from)
}

/// Passphrase for a new vault, typed twice when prompting.
pub fn get_vault_passphrase_with_confirm() -> Result<SecretString, RelayError> {
    if let Some(key) = from_env() {
        return Ok(key);
    }
    require_terminal()?;
    let first = read_nonempty("New vault passphrase: ")?;
    let second = read_nonempty("Confirm vault passphrase: ")?;
    if first != second {
        return Err(RelayError::Vault("passphrases do not match".to_string()));
    }
    Ok(SecretString::from(first))
}

fn from_env() -> Option<SecretString> {
    std::env::var(VAULT_KEY_ENV_VAR)
        .ok()
        .filter(|key| !key.is_empty())
        .map(SecretString::from)
}

fn require_terminal() -> Result<(), RelayError> {
    if std::io::stdin().is_terminal() {
        return Ok(());
    }
    Err(RelayError::Vault(format!(
        "no vault passphrase available: set {VAULT_KEY_ENV_VAR} or run interactively"
    )))
}

fn read_nonempty(label: &str) -> Result<String, RelayError> {
    eprint!("{label}");
    let value = rpassword::read_password()
        .map_err(|e| RelayError::Vault(format!("failed to read passphrase: {e}")))?;
    if value.is_empty() {
        return Err(RelayError::Vault("empty passphrase not allowed".to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use serial_test::serial;

    use super::*;

    fn with_env<T>(value: &str, f: impl FnOnce() -> T) -> T {
        // SAFETY: env mutation is confined to #[serial] tests.
        unsafe { std::env::set_var(VAULT_KEY_ENV_VAR, value) };
        let out = f();
        unsafe { std::env::remove_var(VAULT_KEY_ENV_VAR) };
        out
    }

    #[test]
    #[serial]
    fn env_var_supplies_passphrase() {
        let key = with_env("from-env", get_vault_passphrase).unwrap();
        assert_eq!(key.expose_secret(), "from-env");
    }

    #[test]
    #[serial]
    fn env_var_skips_confirmation() {
        let key = with_env("from-env", get_vault_passphrase_with_confirm).unwrap();
        assert_eq!(key.expose_secret(), "from-env");
    }

    #[test]
    #[serial]
    fn empty_env_var_without_terminal_fails() {
        if std::io::stdin().is_terminal() {
            return;
        }
        let err = with_env("", get_vault_passphrase).unwrap_err();
        assert!(err.to_string().contains(VAULT_KEY_ENV_VAR));
    }
}
