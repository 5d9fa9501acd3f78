use std::path::Path;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{MAX_EMAIL_LEN, MAX_NAME_LEN};
use crate::model::Role;

/// A known identity with its role and display attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Ulid,
    pub role: Role,
    pub name: String,
    pub email: String,
}

/// Resolves identity ids. The booking core reads from it and never writes.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn lookup(&self, id: Ulid) -> Option<Identity>;

    /// Every provider identity, ordered by name.
    async fn providers(&self) -> Vec<Identity>;

    async fn role_of(&self, id: Ulid) -> Option<Role> {
        self.lookup(id).await.map(|i| i.role)
    }
}

#[derive(Debug)]
pub enum DirectoryError {
    DuplicateEmail(String),
    DuplicateId(Ulid),
    Invalid(&'static str),
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::DuplicateEmail(email) => write!(f, "email already registered: {email}"),
            DirectoryError::DuplicateId(id) => write!(f, "identity already exists: {id}"),
            DirectoryError::Invalid(msg) => write!(f, "invalid identity: {msg}"),
            DirectoryError::Io(e) => write!(f, "directory file: {e}"),
            DirectoryError::Parse(e) => write!(f, "directory file is not valid JSON: {e}"),
        }
    }
}

impl std::error::Error for DirectoryError {}

impl From<std::io::Error> for DirectoryError {
    fn from(e: std::io::Error) -> Self {
        DirectoryError::Io(e)
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(e: serde_json::Error) -> Self {
        DirectoryError::Parse(e)
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Directory held in memory, optionally seeded from a JSON file.
#[derive(Default)]
pub struct InMemoryDirectory {
    identities: DashMap<Ulid, Identity>,
    /// Normalized email → id. Emails are unique.
    emails: DashMap<String, Ulid>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of identities.
    pub fn load_json(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)?;
        let seeded: Vec<Identity> = serde_json::from_str(&raw)?;
        let dir = Self::new();
        for identity in seeded {
            dir.insert(identity)?;
        }
        tracing::info!("loaded {} identities from {}", dir.len(), path.display());
        Ok(dir)
    }

    /// Create a new identity with a fresh id.
    pub fn register(&self, name: &str, email: &str, role: Role) -> Result<Identity, DirectoryError> {
        let identity = Identity {
            id: Ulid::new(),
            role,
            name: name.trim().to_string(),
            email: email.trim().to_string(),
        };
        self.insert(identity.clone())?;
        Ok(identity)
    }

    /// Add an identity that already has an id.
    pub fn insert(&self, identity: Identity) -> Result<(), DirectoryError> {
        if identity.name.trim().is_empty() {
            return Err(DirectoryError::Invalid("name must not be blank"));
        }
        if identity.name.len() > MAX_NAME_LEN {
            return Err(DirectoryError::Invalid("name too long"));
        }
        if !identity.email.contains('@') || identity.email.len() > MAX_EMAIL_LEN {
            return Err(DirectoryError::Invalid("malformed email"));
        }
        // Id entry before email entry, always in that order.
        let Entry::Vacant(id_slot) = self.identities.entry(identity.id) else {
            return Err(DirectoryError::DuplicateId(identity.id));
        };
        let Entry::Vacant(email_slot) = self.emails.entry(email_key(&identity.email)) else {
            return Err(DirectoryError::DuplicateEmail(identity.email));
        };
        email_slot.insert(identity.id);
        id_slot.insert(identity);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn lookup(&self, id: Ulid) -> Option<Identity> {
        self.identities.get(&id).map(|e| e.value().clone())
    }

    async fn providers(&self) -> Vec<Identity> {
        let mut providers: Vec<Identity> = self
            .identities
            .iter()
            .filter(|e| e.value().role == Role::Provider)
            .map(|e| e.value().clone())
            .collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_lookup() {
        let dir = InMemoryDirectory::new();
        let ana = dir.register("Ana", "ana@example.com", Role::Client).unwrap();
        assert_eq!(dir.lookup(ana.id).await, Some(ana.clone()));
        assert_eq!(dir.role_of(ana.id).await, Some(Role::Client));
        assert_eq!(dir.role_of(Ulid::new()).await, None);
    }

    #[test]
    fn duplicate_email_is_rejected_case_insensitively() {
        let dir = InMemoryDirectory::new();
        dir.register("Ana", "ana@example.com", Role::Client).unwrap();
        let again = dir.register("Ana B", " ANA@example.com", Role::Provider);
        assert!(matches!(again, Err(DirectoryError::DuplicateEmail(_))));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn malformed_identities_are_rejected() {
        let dir = InMemoryDirectory::new();
        assert!(matches!(
            dir.register(" ", "a@b.c", Role::Client),
            Err(DirectoryError::Invalid(_))
        ));
        assert!(matches!(
            dir.register("Ana", "not-an-email", Role::Client),
            Err(DirectoryError::Invalid(_))
        ));
        assert!(dir.is_empty());
    }

    fn identity(id: Ulid, n: usize) -> Identity {
        Identity {
            id,
            role: Role::Client,
            name: format!("Client {n}"),
            email: format!("client{n}@example.com"),
        }
    }

    #[test]
    fn racing_inserts_of_one_id_have_one_winner() {
        let dir = InMemoryDirectory::new();
        let id = Ulid::new();
        let won: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|n| {
                    let dir = &dir;
                    s.spawn(move || dir.insert(identity(id, n)).is_ok())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
        });
        assert_eq!(won, 1);
        assert_eq!(dir.len(), 1);
        // Losers leave no email behind.
        assert_eq!(dir.emails.len(), 1);
    }

    #[test]
    fn duplicate_id_keeps_its_email_free() {
        let dir = InMemoryDirectory::new();
        let taken = dir.register("Ana", "ana@example.com", Role::Client).unwrap();
        let clash = dir.insert(identity(taken.id, 7));
        assert!(matches!(clash, Err(DirectoryError::DuplicateId(_))));
        dir.register("Client 7", "client7@example.com", Role::Client).unwrap();
        assert_eq!(dir.len(), 2);
    }

    #[tokio::test]
    async fn providers_sorted_by_name() {
        let dir = InMemoryDirectory::new();
        dir.register("Zed", "zed@example.com", Role::Provider).unwrap();
        dir.register("Ana", "ana@example.com", Role::Client).unwrap();
        dir.register("Bia", "bia@example.com", Role::Provider).unwrap();
        let names: Vec<_> = dir.providers().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Bia", "Zed"]);
    }

    #[tokio::test]
    async fn load_json_seed() {
        let dir_path = std::env::temp_dir().join("slotkeeper_test_directory");
        std::fs::create_dir_all(&dir_path).unwrap();
        let path = dir_path.join("seed.json");
        let provider = Ulid::new();
        std::fs::write(
            &path,
            format!(
                r#"[{{"id":"{provider}","role":"provider","name":"Bia","email":"bia@example.com"}}]"#
            ),
        )
        .unwrap();

        let dir = InMemoryDirectory::load_json(&path).unwrap();
        assert_eq!(dir.role_of(provider).await, Some(Role::Provider));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(InMemoryDirectory::load_json(&path), Err(DirectoryError::Parse(_))));
        let _ = std::fs::remove_file(&path);
    }
}
