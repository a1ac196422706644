use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "studycache";

/// Keychain storage for record store API keys, one entry per store URL.
pub struct CredentialStore;

impl CredentialStore {
    /// Store the API key for a record store in the OS keychain
    pub fn store(store_url: &str, api_key: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, store_url)
            .context("Failed to create keyring entry")?;
        entry
            .set_password(api_key)
            .context("Failed to store API key in keychain")?;
        Ok(())
    }

    /// Retrieve the API key for a record store from the OS keychain
    pub fn get_key(store_url: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, store_url)
            .context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve API key from keychain")
    }

    /// Delete the stored API key for a record store
    pub fn delete(store_url: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, store_url)
            .context("Failed to create keyring entry")?;
        entry
            .delete_credential()
            .context("Failed to delete API key from keychain")?;
        Ok(())
    }
}
