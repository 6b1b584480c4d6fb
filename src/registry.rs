//! Image registry credential providers.
//!
//! Providers are consulted in order: the first whose `check_options`
//! accepts the registry domain supplies the credential. A provider that
//! accepted the domain but failed to produce a credential aborts the
//! chain; falling through to another provider would hide a real
//! configuration problem.

use tracing::debug;

use crate::error::{Error, Result};
use crate::options::CancelToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// `domain -> credential` pairs supplied by configuration.
    pub credentials: Vec<(String, Credential)>,
}

pub trait CredentialProvider: Send + Sync {
    /// Accept or reject this registry domain.
    fn check_options(&self, domain: &str, opts: &RegistryOptions) -> Result<()>;
    fn get_credential(&self, ctx: &CancelToken) -> Result<Credential>;
}

/// Resolve a credential for `domain`, or anonymous access when no
/// provider claims it.
pub fn get_token(
    ctx: &CancelToken,
    domain: &str,
    opts: &RegistryOptions,
    providers: &[Box<dyn CredentialProvider>],
) -> Credential {
    for provider in providers {
        if provider.check_options(domain, opts).is_err() {
            continue;
        }
        match provider.get_credential(ctx) {
            Ok(credential) => return credential,
            Err(e) => {
                debug!(domain = %domain, error = %e, "credential fetch failed");
                break;
            }
        }
    }
    Credential::default()
}

/// Provider backed by statically configured credentials.
pub struct StaticProvider {
    domain: String,
    credential: Credential,
}

impl StaticProvider {
    pub fn for_domain(domain: &str, opts: &RegistryOptions) -> Option<Self> {
        opts.credentials
            .iter()
            .find(|(d, _)| d == domain)
            .map(|(d, c)| Self {
                domain: d.clone(),
                credential: c.clone(),
            })
    }
}

impl CredentialProvider for StaticProvider {
    fn check_options(&self, domain: &str, _opts: &RegistryOptions) -> Result<()> {
        if domain == self.domain {
            Ok(())
        } else {
            Err(Error::Image(format!("domain mismatch: {domain}")))
        }
    }

    fn get_credential(&self, _ctx: &CancelToken) -> Result<Credential> {
        Ok(self.credential.clone())
    }
}

/// Provider reading `SCANMOOR_REGISTRY_USER` / `SCANMOOR_REGISTRY_PASSWORD`.
pub struct EnvProvider;

impl CredentialProvider for EnvProvider {
    fn check_options(&self, _domain: &str, _opts: &RegistryOptions) -> Result<()> {
        if std::env::var("SCANMOOR_REGISTRY_USER").is_ok() {
            Ok(())
        } else {
            Err(Error::Image("no registry credentials in environment".into()))
        }
    }

    fn get_credential(&self, _ctx: &CancelToken) -> Result<Credential> {
        let username = std::env::var("SCANMOOR_REGISTRY_USER")
            .map_err(|_| Error::Image("SCANMOOR_REGISTRY_USER unset".into()))?;
        let password = std::env::var("SCANMOOR_REGISTRY_PASSWORD")
            .map_err(|_| Error::Image("SCANMOOR_REGISTRY_PASSWORD unset".into()))?;
        Ok(Credential { username, password })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rejecting;
    impl CredentialProvider for Rejecting {
        fn check_options(&self, _: &str, _: &RegistryOptions) -> Result<()> {
            Err(Error::Image("nope".into()))
        }
        fn get_credential(&self, _: &CancelToken) -> Result<Credential> {
            panic!("must not be called");
        }
    }

    struct Failing;
    impl CredentialProvider for Failing {
        fn check_options(&self, _: &str, _: &RegistryOptions) -> Result<()> {
            Ok(())
        }
        fn get_credential(&self, _: &CancelToken) -> Result<Credential> {
            Err(Error::Image("fetch failed".into()))
        }
    }

    fn opts_with(domain: &str) -> RegistryOptions {
        RegistryOptions {
            credentials: vec![(
                domain.to_string(),
                Credential {
                    username: "user".into(),
                    password: "pass".into(),
                },
            )],
        }
    }

    #[test]
    fn first_accepting_provider_wins() {
        let opts = opts_with("registry.example.com");
        let providers: Vec<Box<dyn CredentialProvider>> = vec![
            Box::new(Rejecting),
            Box::new(StaticProvider::for_domain("registry.example.com", &opts).unwrap()),
        ];
        let cred = get_token(&CancelToken::new(), "registry.example.com", &opts, &providers);
        assert_eq!(cred.username, "user");
    }

    #[test]
    fn fetch_failure_aborts_the_chain() {
        let opts = opts_with("registry.example.com");
        let providers: Vec<Box<dyn CredentialProvider>> = vec![
            Box::new(Failing),
            Box::new(StaticProvider::for_domain("registry.example.com", &opts).unwrap()),
        ];
        // The static provider would have succeeded, but the chain stops.
        let cred = get_token(&CancelToken::new(), "registry.example.com", &opts, &providers);
        assert_eq!(cred, Credential::default());
    }

    #[test]
    fn no_provider_means_anonymous() {
        let providers: Vec<Box<dyn CredentialProvider>> = vec![Box::new(Rejecting)];
        let cred = get_token(
            &CancelToken::new(),
            "ghcr.io",
            &RegistryOptions::default(),
            &providers,
        );
        assert_eq!(cred, Credential::default());
    }
}
