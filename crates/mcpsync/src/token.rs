//! `mcpsync token`

use anyhow::{Context, Result, bail};
use clap::Args;
use mcpsync_auth::{AuthValidator, Role, TokenClaims};
use mcpsync_settings::SyncSettings;

/// Options for `token`.
#[derive(Args, Debug)]
pub struct TokenArgs {
    /// Subject id (`sub` claim).
    #[arg(long)]
    pub sub: String,

    /// Display name.
    #[arg(long)]
    pub name: Option<String>,

    /// Email address.
    #[arg(long)]
    pub email: Option<String>,

    /// Role: student, instructor or admin.
    #[arg(long, default_value = "student")]
    pub role: String,

    /// Lifetime in seconds, 0 for no expiry.
    #[arg(long, default_value_t = 3600)]
    pub ttl_secs: i64,
}

impl TokenArgs {
    fn claims(&self) -> TokenClaims {
        let mut claims = TokenClaims::new(&self.sub).with_role(Role::from_claim(&self.role));
        if let Some(name) = &self.name {
            claims = claims.with_name(name);
        }
        if let Some(email) = &self.email {
            claims = claims.with_email(email);
        }
        if self.ttl_secs > 0 {
            claims = claims.expires_in(chrono::Duration::seconds(self.ttl_secs));
        }
        claims
    }
}

/// Sign a token. Refuses to use an ephemeral secret, whose tokens no server
/// would accept.
pub fn sign(settings: &SyncSettings, args: &TokenArgs) -> Result<String> {
    if settings.auth.jwt_secret.is_none() {
        bail!("no JWT secret configured; set auth.jwtSecret or MCPSYNC_JWT_SECRET");
    }
    let validator =
        AuthValidator::from_settings(&settings.auth).context("failed to configure signing")?;
    validator
        .sign(&args.claims())
        .context("failed to sign token")
}

/// Print a signed token to stdout.
pub fn run(settings: &SyncSettings, args: &TokenArgs) -> Result<()> {
    let token = sign(settings, args)?;
    println!("{token}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_secret() -> SyncSettings {
        let mut settings = SyncSettings::default();
        settings.auth.jwt_secret = Some("cli-test-secret".into());
        settings
    }

    fn args(sub: &str) -> TokenArgs {
        TokenArgs {
            sub: sub.into(),
            name: Some("Ada".into()),
            email: None,
            role: "admin".into(),
            ttl_secs: 60,
        }
    }

    #[test]
    fn signed_token_validates() {
        let settings = settings_with_secret();
        let token = sign(&settings, &args("u1")).unwrap();
        let identity = AuthValidator::from_settings(&settings.auth)
            .unwrap()
            .validate(&token)
            .unwrap();
        assert_eq!(identity.subject_id, "u1");
        assert_eq!(identity.display_name, "Ada");
        assert_eq!(identity.role, Role::Admin);
        assert!(identity.expires_at.is_some());
    }

    #[test]
    fn zero_ttl_means_no_expiry() {
        let mut a = args("u1");
        a.ttl_secs = 0;
        assert!(a.claims().exp.is_none());
    }

    #[test]
    fn refuses_without_secret() {
        let mut settings = SyncSettings::default();
        settings.auth.allow_ephemeral_secret = true;
        assert!(sign(&settings, &args("u1")).is_err());
    }
}
