use dialoguer::{Password, Select, theme::ColorfulTheme};

use crate::config::{AgentConfig, Config, DEFAULT_TOKEN_ACCOUNT, RepositoryConfig};
use crate::core::keychain;

use super::{LoginArgs, LogoutArgs};

/// What a login stores.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Credential {
    Github(String),
    Provider(String),
}

impl Credential {
    fn account(&self) -> String {
        match self {
            Self::Github(key) => keychain::github_account(key),
            Self::Provider(name) => keychain::provider_account(name),
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Github(key) if key == DEFAULT_TOKEN_ACCOUNT => "the default GitHub token".to_string(),
            Self::Github(key) => format!("the GitHub token for '{key}'"),
            Self::Provider(name) => format!("the API key for provider '{name}'"),
        }
    }
}

fn known_provider(name: &str) -> anyhow::Result<()> {
    let defaults = AgentConfig::default();
    if defaults.providers.contains_key(name) {
        return Ok(());
    }

    let mut names: Vec<&str> = defaults.providers.keys().map(String::as_str).collect();
    names.sort_unstable();
    anyhow::bail!(
        "Unknown provider '{name}'. Available providers: {}",
        names.join(", ")
    )
}

/// Parse `owner/repo`.
fn parse_repository(value: &str) -> anyhow::Result<RepositoryConfig> {
    match value.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok(RepositoryConfig {
                owner: owner.to_string(),
                repo: repo.to_string(),
                token_env: None,
            })
        }
        _ => anyhow::bail!("Expected a repository as owner/repo, got '{value}'"),
    }
}

pub fn auth_login(args: LoginArgs) -> anyhow::Result<()> {
    let credential = match (args.github, args.provider) {
        (Some(key), _) => Credential::Github(key),
        (None, Some(provider)) => {
            known_provider(&provider)?;
            Credential::Provider(provider)
        }
        (None, None) => prompt_credential()?,
    };

    let repository = args.repository.as_deref().map(parse_repository).transpose()?;

    let secret = match args.secret {
        Some(secret) => secret,
        None => prompt_secret(&credential.label())?,
    };
    if secret.trim().is_empty() {
        anyhow::bail!("Secret cannot be empty");
    }

    keychain::store_secret(&credential.account(), secret.trim())?;
    println!("Stored {} in the system keychain", credential.label());

    if let (Credential::Github(key), Some(repository)) = (&credential, repository) {
        Config::save_repository(key, &repository)?;
        println!(
            "Registered repository '{key}' as {}/{}",
            repository.owner, repository.repo
        );
    }

    Ok(())
}

pub fn auth_logout(args: LogoutArgs) -> anyhow::Result<()> {
    let credential = match (args.github, args.provider) {
        (Some(key), _) => Credential::Github(key),
        (None, Some(provider)) => Credential::Provider(provider),
        (None, None) => anyhow::bail!("Specify --github <key> or --provider <name>"),
    };

    keychain::delete_secret(&credential.account())?;
    println!("Removed {} from the system keychain", credential.label());
    Ok(())
}

fn prompt_credential() -> anyhow::Result<Credential> {
    let mut providers: Vec<String> = AgentConfig::default().providers.into_keys().collect();
    providers.sort_unstable();

    let mut items = vec!["GitHub (default token)".to_string()];
    items.extend(providers.iter().map(|p| format!("Model provider: {p}")));

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("What would you like to store?")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => Credential::Github(DEFAULT_TOKEN_ACCOUNT.to_string()),
        n => Credential::Provider(providers[n - 1].clone()),
    })
}

fn prompt_secret(label: &str) -> anyhow::Result<String> {
    let secret = Password::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Enter {label}"))
        .interact()?;

    Ok(secret)
}
