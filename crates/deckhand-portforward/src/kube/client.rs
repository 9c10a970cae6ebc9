use std::env;
use std::path::PathBuf;

use kube::Client;
use kube::config::{
    Config,
    KubeConfigOptions,
    Kubeconfig,
};
use secrecy::SecretString;
use tracing::{
    debug,
    warn,
};

use crate::error::{
    Error,
    Result,
};

/// Resolves kubeconfig contexts into typed API clients.
///
/// The resolver is stateless apart from the configured search paths: every
/// call re-reads the kubeconfig and builds a fresh client, so a
/// caller-supplied bearer token never leaks between sessions.
#[derive(Clone, Debug)]
pub struct KubeconfigStore {
    paths: Vec<PathBuf>,
}

impl KubeconfigStore {
    /// `kubeconfig` is a colon-separated path list; `None` falls back to
    /// `$KUBECONFIG` and then `~/.kube/config`.
    pub fn new(kubeconfig: Option<String>) -> Self {
        let paths = match kubeconfig {
            Some(paths) if !paths.is_empty() => paths.split(':').map(PathBuf::from).collect(),
            _ => default_kubeconfig_paths(),
        };
        Self { paths }
    }

    /// Builds a client for the named context, forcing `token` as the bearer
    /// credential when one is supplied.
    pub async fn client_for_context(&self, context: &str, token: Option<&str>) -> Result<Client> {
        let kubeconfig = self.merged_kubeconfig()?;

        let mut config = Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| Error::Config(format!("failed to resolve context '{context}': {e}")))?;

        if let Some(token) = token.filter(|token| !token.is_empty()) {
            debug!(context, "overriding kubeconfig credentials with bearer token");
            config.auth_info.token = Some(SecretString::from(token.to_string()));
            config.auth_info.token_file = None;
            config.auth_info.exec = None;
            config.auth_info.auth_provider = None;
        }

        Client::try_from(config)
            .map_err(|e| Error::Config(format!("failed to build client for context '{context}': {e}")))
    }

    fn merged_kubeconfig(&self) -> Result<Kubeconfig> {
        let mut merged = Kubeconfig::default();
        let mut errors = Vec::new();

        for path in &self.paths {
            match Kubeconfig::read_from(path) {
                Ok(kubeconfig) => match merged.clone().merge(kubeconfig) {
                    Ok(next) => merged = next,
                    Err(e) => errors.push(format!("{}: {e}", path.display())),
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable kubeconfig");
                    errors.push(format!("{}: {e}", path.display()));
                }
            }
        }

        if merged.contexts.is_empty() {
            return Err(Error::Config(format!(
                "no usable kubeconfig found in {} path(s): {}",
                self.paths.len(),
                errors.join("; ")
            )));
        }
        Ok(merged)
    }
}

fn default_kubeconfig_paths() -> Vec<PathBuf> {
    if let Ok(paths) = env::var("KUBECONFIG")
        && !paths.is_empty()
    {
        return paths.split(':').map(PathBuf::from).collect();
    }

    match dirs::home_dir() {
        Some(home) => vec![home.join(".kube").join("config")],
        None => Vec::new(),
    }
}
