use dashmap::DashMap;

use crate::error::{
    Error,
    Result,
};
use crate::models::Session;

/// In-process registry of session records, keyed by
/// `<scoped cluster>/<session id>`.
///
/// Writes are last-writer-wins per key; status only ever moves toward
/// `Stopped`, so concurrent terminal writes converge.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    fn key(scoped_cluster: &str, id: &str) -> String {
        format!("{scoped_cluster}/{id}")
    }

    /// Upserts the record for `session`.
    pub fn store(&self, scoped_cluster: &str, session: &Session) {
        self.sessions
            .insert(Self::key(scoped_cluster, &session.id), session.clone());
    }

    pub fn get(&self, scoped_cluster: &str, id: &str) -> Result<Session> {
        self.sessions
            .get(&Self::key(scoped_cluster, id))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// All sessions belonging to one scoped cluster, in no particular
    /// order.
    pub fn list(&self, scoped_cluster: &str) -> Vec<Session> {
        let prefix = format!("{scoped_cluster}/");
        self.sessions
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn delete(&self, scoped_cluster: &str, id: &str) {
        self.sessions.remove(&Self::key(scoped_cluster, id));
    }

    /// Every session across all scopes; used by the shutdown sweep.
    pub fn all(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        SessionStatus,
        StopHandle,
        scoped_cluster,
    };

    fn session(id: &str, cluster: &str) -> Session {
        Session {
            id: id.to_string(),
            pod: "web-0".to_string(),
            namespace: "demo".to_string(),
            service: String::new(),
            service_namespace: String::new(),
            cluster: cluster.to_string(),
            port: "41337".to_string(),
            target_port: "80".to_string(),
            status: SessionStatus::Running,
            error: String::new(),
            stop: StopHandle::new(),
        }
    }

    #[test]
    fn test_store_get_delete() {
        let registry = SessionRegistry::new();
        let s = session("s1", "minikube");

        registry.store("minikube", &s);
        let found = registry.get("minikube", "s1").unwrap();
        assert_eq!(found.id, "s1");
        assert_eq!(found.status, SessionStatus::Running);

        registry.delete("minikube", "s1");
        assert!(matches!(
            registry.get("minikube", "s1"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_store_is_an_upsert() {
        let registry = SessionRegistry::new();
        let mut s = session("s1", "minikube");

        registry.store("minikube", &s);
        s.mark_stopped("pod went away");
        registry.store("minikube", &s);

        let found = registry.get("minikube", "s1").unwrap();
        assert_eq!(found.status, SessionStatus::Stopped);
        assert_eq!(found.error, "pod went away");
        assert_eq!(registry.list("minikube").len(), 1);
    }

    #[test]
    fn test_list_is_scoped_by_prefix() {
        let registry = SessionRegistry::new();
        registry.store("minikube", &session("s1", "minikube"));
        registry.store("minikube", &session("s2", "minikube"));
        registry.store("kind", &session("s3", "kind"));

        let minikube = registry.list("minikube");
        assert_eq!(minikube.len(), 2);
        assert_eq!(registry.list("kind").len(), 1);
        assert!(registry.list("absent").is_empty());
    }

    #[test]
    fn test_user_scopes_are_isolated() {
        let registry = SessionRegistry::new();
        let scoped_alice = scoped_cluster("minikube", Some("alice"));
        let unscoped = scoped_cluster("minikube", None);

        registry.store(&scoped_alice, &session("s1", "minikube"));

        assert_eq!(registry.list(&scoped_alice).len(), 1);
        assert!(registry.list(&unscoped).is_empty());
        assert!(registry.get(&unscoped, "s1").is_err());

        registry.store(&unscoped, &session("s2", "minikube"));
        assert_eq!(registry.list(&scoped_alice).len(), 1);
        assert_eq!(registry.list(&unscoped).len(), 1);
    }

    #[test]
    fn test_all_spans_every_scope() {
        let registry = SessionRegistry::new();
        registry.store("minikube", &session("s1", "minikube"));
        registry.store("minikubealice", &session("s2", "minikube"));

        assert_eq!(registry.all().len(), 2);
    }
}
