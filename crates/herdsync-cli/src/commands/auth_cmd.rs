use crate::auth::{auth_client, clear_stored_session, load_stored_session};
use crate::cli::AuthCommands;
use crate::commands::common::ResolvedProfile;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, resolved: &ResolvedProfile) -> Result<(), CliError> {
    let profile_name = &resolved.name;
    match command {
        AuthCommands::Login { email, password } => {
            let backend = resolved.profile.backend_config()?;
            let session = auth_client(profile_name, &backend)?
                .sign_in(&email, &password)
                .await?;
            let email_label = session.user.email.as_deref().unwrap_or("(no email)");
            println!("Signed in profile '{profile_name}' as {email_label}");
            Ok(())
        }
        AuthCommands::Status => {
            let session = match resolved.profile.backend_config() {
                Ok(backend) => auth_client(profile_name, &backend)?.restore_session().await?,
                Err(_) => load_stored_session(profile_name)?,
            };

            if let Some(session) = session {
                let email_label = session.user.email.as_deref().unwrap_or("(no email)");
                println!(
                    "Profile '{}' is signed in as {} (expires_at={})",
                    profile_name, email_label, session.expires_at
                );
            } else {
                println!("Profile '{profile_name}' is not signed in.");
            }
            Ok(())
        }
        AuthCommands::Logout => {
            if let Ok(backend) = resolved.profile.backend_config() {
                if let Err(error) = auth_client(profile_name, &backend)?.sign_out().await {
                    tracing::warn!("Remote sign-out failed, clearing local session: {error}");
                }
            }
            clear_stored_session(profile_name)?;
            println!("Signed out profile '{profile_name}'");
            Ok(())
        }
    }
}
