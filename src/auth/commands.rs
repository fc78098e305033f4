//! Account commands for the CLI

use anyhow::{Context, Result};

use super::session::{Session, SessionState};
use crate::models::{ResendOtpRequest, SignInRequest, SignUpRequest, VerifyEmailRequest};

fn read_password(password: Option<String>, prompt: &str) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => rpassword::prompt_password(prompt).context("Failed to read password"),
    }
}

/// Create an account. The backend emails a verification code.
pub async fn signup(
    session: &Session,
    name: &str,
    email: &str,
    password: Option<String>,
) -> Result<()> {
    let password = read_password(password, "Choose a password: ")?;
    session
        .sign_up(&SignUpRequest {
            name: name.to_string(),
            email: email.to_string(),
            password,
        })
        .await
        .context("Sign-up failed")?;

    println!("Account created. A verification code was sent to {}.", email);
    println!("Run: eventify verify --email {} <code>", email);
    Ok(())
}

pub async fn verify(session: &Session, email: &str, otp: &str) -> Result<()> {
    session
        .verify_email(&VerifyEmailRequest {
            email: email.to_string(),
            otp: otp.to_string(),
        })
        .await
        .context("Email verification failed")?;
    println!("Email verified. You can now log in.");
    Ok(())
}

pub async fn resend_otp(session: &Session, email: &str) -> Result<()> {
    session
        .resend_otp(&ResendOtpRequest {
            email: email.to_string(),
        })
        .await
        .context("Failed to resend verification code")?;
    println!("Verification code sent to {}.", email);
    Ok(())
}

/// Sign in, unless a session can be restored and `force` is not set.
pub async fn login(
    session: &Session,
    email: &str,
    password: Option<String>,
    force: bool,
) -> Result<()> {
    if !force && session.initialize().await {
        match session.profile() {
            Some(user) => println!(
                "Already logged in as {} <{}>. Use --force to sign in again.",
                user.name, user.email
            ),
            None => println!("Already logged in. Use --force to sign in again."),
        }
        return Ok(());
    }

    let password = read_password(password, "Password: ")?;
    tracing::info!("Signing in as {}...", email);
    let user = session
        .sign_in(&SignInRequest {
            email: email.to_string(),
            password,
        })
        .await
        .context("Login failed")?;

    println!("Login successful. Signed in as {} <{}>.", user.name, user.email);
    Ok(())
}

pub async fn logout(session: &Session) -> Result<()> {
    session.sign_out().await;
    println!("Logged out.");
    Ok(())
}

/// Show whether a session exists and when its credential expires.
pub async fn status(session: &Session) -> Result<()> {
    if session.is_manually_signed_out() {
        println!("Session:     signed out");
        return Ok(());
    }

    session.initialize().await;
    match session.state() {
        SessionState::Authenticated => {
            println!("Session:     active");
            match session.profile() {
                Some(user) => {
                    println!("User:        {} <{}>", user.name, user.email);
                    if !user.email_verified {
                        println!("  email not verified");
                    }
                }
                None => println!("User:        unknown (profile unavailable)"),
            }
            if let Some(exp) = session.credential().and_then(|c| c.expires_at()) {
                println!("Access:      expires_at {}", exp.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        _ => println!("Session:     none (run 'eventify login')"),
    }
    Ok(())
}
