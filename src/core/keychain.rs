//! OS keychain access for provider API keys and GitHub tokens.

use keyring::Entry;

const SERVICE_NAME: &str = "repo-pilot";

/// Keychain account holding the GitHub token for a configured repository.
#[must_use]
pub fn github_account(repository: &str) -> String {
    format!("github:{repository}")
}

/// Keychain account holding a model provider's API key.
#[must_use]
pub fn provider_account(provider: &str) -> String {
    format!("provider:{provider}")
}

pub fn store_secret(account: &str, secret: &str) -> anyhow::Result<()> {
    let entry = Entry::new(SERVICE_NAME, account)?;
    entry.set_password(secret)?;
    Ok(())
}

pub fn get_secret(account: &str) -> Option<String> {
    let entry = Entry::new(SERVICE_NAME, account).ok()?;
    entry.get_password().ok().filter(|s| !s.is_empty())
}

pub fn delete_secret(account: &str) -> anyhow::Result<()> {
    let entry = Entry::new(SERVICE_NAME, account)?;
    entry.delete_credential()?;
    Ok(())
}
