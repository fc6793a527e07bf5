use chrono::DateTime;

use crate::app::App;
use crate::cli::AuthCommands;
use crate::error::CliError;

pub async fn run_auth(app: &App, command: AuthCommands) -> Result<(), CliError> {
    match command {
        AuthCommands::Login { email, password } => {
            let user = app
                .auth_client()?
                .sign_in(&app.auth, &email, &password)
                .await?;
            let label = user.email.as_deref().unwrap_or(&user.id);
            println!("Signed in as {label}");
            Ok(())
        }
        AuthCommands::Status => {
            let Some(session) = app.auth.session() else {
                println!("Not signed in.");
                return Ok(());
            };
            let email = session.user.email.as_deref().unwrap_or("(no email)");
            let expires = DateTime::from_timestamp(session.expires_at, 0)
                .map_or_else(|| session.expires_at.to_string(), |at| at.to_rfc3339());
            println!(
                "Signed in as {email} (user {}, session expires {expires})",
                session.user.id
            );
            let pending = app.db.pending_count().await?;
            if pending > 0 {
                println!("{pending} local changes waiting to sync");
            }
            Ok(())
        }
        AuthCommands::Logout => {
            if !app.auth.is_signed_in() {
                println!("Not signed in.");
                return Ok(());
            }
            app.auth_client()?.sign_out(&app.auth).await?;
            println!("Signed out");
            Ok(())
        }
    }
}
