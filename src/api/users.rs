//! Current-user profile endpoints (`/users`)

use anyhow::{bail, Context, Result};

use super::ApiRequest;
use crate::auth::Session;
use crate::models::{UpdateUserRequest, User};

const USERS_PATH: &str = "/users";

pub async fn update_user_data(session: &Session, update: &UpdateUserRequest) -> super::error::Result<User> {
    session
        .send_json(ApiRequest::patch(USERS_PATH), update)
        .await
}

pub async fn delete_user_data(session: &Session) -> super::error::Result<()> {
    session.call(ApiRequest::delete(USERS_PATH)).await.map(|_| ())
}

fn print_user(user: &User) {
    println!();
    println!("Name:     {}", user.name);
    println!("Email:    {}", user.email);
    println!(
        "Verified: {}",
        if user.email_verified { "yes" } else { "no" }
    );
    println!("ID:       {}", user.id);
    if let Some(ref created) = user.created_at {
        println!("Created:  {}", created);
    }
}

/// Show the signed-in user.
pub async fn whoami(session: &Session) -> Result<()> {
    let user = session
        .current_user()
        .await
        .context("Failed to fetch profile")?;
    print_user(&user);
    Ok(())
}

pub async fn update_profile(
    session: &Session,
    name: Option<String>,
    email: Option<String>,
) -> Result<()> {
    if name.is_none() && email.is_none() {
        bail!("Nothing to update (pass --name and/or --email)");
    }
    let user = update_user_data(session, &UpdateUserRequest { name, email })
        .await
        .context("Failed to update profile")?;
    println!("Profile updated.");
    print_user(&user);
    Ok(())
}

/// Delete the account, then drop the local session.
pub async fn delete_account(session: &Session, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete the account without --yes");
    }
    delete_user_data(session)
        .await
        .context("Failed to delete account")?;
    session.sign_out().await;
    println!("Account deleted.");
    Ok(())
}
