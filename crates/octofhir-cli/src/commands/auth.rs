use anyhow::{Context, Result};
use colored::Colorize;

use crate::auth::{self, ClientCredentialsProvider, StoredCredentials, token_preview};
use crate::cli::LoginArgs;
use crate::output::{print_error, print_success};

pub async fn login(endpoint: &str, args: &LoginArgs, profile: &str) -> Result<()> {
    let creds = match (&args.token, &args.token_url) {
        (Some(token), _) => StoredCredentials::Bearer {
            endpoint: endpoint.to_string(),
            access_token: token.clone(),
        },
        (None, Some(token_url)) => {
            let client_id = args.client_id.as_deref().context("--client-id is required")?;
            let client_secret = args
                .client_secret
                .as_deref()
                .context("--client-secret is required")?;
            println!("Requesting token with client credentials...");
            let provider = ClientCredentialsProvider::new(
                token_url.clone(),
                client_id.to_string(),
                client_secret.to_string(),
            );
            let token = provider.request_token().await?;
            StoredCredentials::ClientCredentials {
                endpoint: endpoint.to_string(),
                token_url: token_url.clone(),
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                access_token: Some(token.access_token),
            }
        }
        (None, None) => anyhow::bail!("Provide --token, or --token-url with --client-id and --client-secret"),
    };

    auth::save_credentials(profile, &creds)?;
    print_success(&format!("Saved credentials for {}", endpoint.cyan()));
    Ok(())
}

pub fn logout(profile: &str) -> Result<()> {
    if auth::remove_credentials(profile)? {
        print_success("Logged out (credentials removed)");
    } else {
        println!("No credentials found for profile \"{profile}\"");
    }
    Ok(())
}

pub fn whoami(profile: &str) -> Result<()> {
    match auth::load_credentials(profile)? {
        Some(creds) => {
            println!("{}: {}", "Profile".cyan(), profile);
            println!("{}: {}", "Endpoint".cyan(), creds.endpoint().cyan());
            match &creds {
                StoredCredentials::Bearer { access_token, .. } => {
                    println!("{}: Bearer (token: {})", "Auth".cyan(), token_preview(access_token));
                }
                StoredCredentials::ClientCredentials {
                    client_id,
                    token_url,
                    ..
                } => {
                    println!(
                        "{}: Client credentials (client: {}, token endpoint: {})",
                        "Auth".cyan(),
                        client_id,
                        token_url
                    );
                }
            }
        }
        None => {
            print_error(&format!("Not logged in (profile: \"{profile}\")"));
        }
    }
    Ok(())
}
