//! Emergency contact storage
//!
//! Contacts are phone numbers in international format. They are stored in
//! JSON at `~/.tripguard/contacts.json` and read once when a trip starts.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Contact storage errors
#[derive(Debug, thiserror::Error)]
pub enum ContactsError {
    #[error("Failed to access contacts file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse contacts file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid phone number '{0}': use +<country code><number>")]
    InvalidNumber(String),

    #[error("Contact {0} already exists")]
    Duplicate(String),

    #[error("Contact {0} not found")]
    NotFound(String),
}

/// Source of emergency contacts for a trip
pub trait ContactStore: Send + Sync {
    fn contacts(&self) -> Result<Vec<String>, ContactsError>;
}

/// Fixed in-memory contact list
#[derive(Debug, Clone, Default)]
pub struct StaticContacts(pub Vec<String>);

impl StaticContacts {
    pub fn new<I, S>(contacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(contacts.into_iter().map(Into::into).collect())
    }
}

impl ContactStore for StaticContacts {
    fn contacts(&self) -> Result<Vec<String>, ContactsError> {
        Ok(self.0.clone())
    }
}

/// International phone number: `+` then 10 to 15 digits
static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+\d{10,15}$").unwrap());

/// Whether `contact` is a phone number in `+<10-15 digits>` form
pub fn is_valid_contact(contact: &str) -> bool {
    PHONE_PATTERN.is_match(contact)
}

/// On-disk layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct ContactBook {
    contacts: Vec<String>,
}

/// Contact list persisted as JSON
#[derive(Debug)]
pub struct JsonContactStore {
    path: PathBuf,
    book: RwLock<ContactBook>,
}

impl JsonContactStore {
    /// Open the store at `path`; a missing file is an empty list
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ContactsError> {
        let path = path.into();
        let book = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            ContactBook::default()
        };

        tracing::debug!(
            "Loaded {} contact(s) from {:?}",
            book.contacts.len(),
            path
        );
        Ok(Self {
            path,
            book: RwLock::new(book),
        })
    }

    /// Open the store at the default location
    pub fn open_default() -> Result<Self, ContactsError> {
        Self::open(Self::default_path())
    }

    /// Default contacts file path (~/.tripguard/contacts.json)
    pub fn default_path() -> PathBuf {
        crate::config::get_config_dir().join("contacts.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Vec<String> {
        self.book.read().contacts.clone()
    }

    /// Validate and append a contact
    pub fn add(&self, contact: &str) -> Result<(), ContactsError> {
        let contact = contact.trim();
        if !is_valid_contact(contact) {
            return Err(ContactsError::InvalidNumber(contact.to_string()));
        }

        let mut book = self.book.write();
        if book.contacts.iter().any(|c| c == contact) {
            return Err(ContactsError::Duplicate(contact.to_string()));
        }

        book.contacts.push(contact.to_string());
        self.save(&book)?;

        tracing::info!("Added contact, total contacts: {}", book.contacts.len());
        Ok(())
    }

    /// Remove a contact
    pub fn remove(&self, contact: &str) -> Result<(), ContactsError> {
        let contact = contact.trim();
        let mut book = self.book.write();

        let index = book
            .contacts
            .iter()
            .position(|c| c == contact)
            .ok_or_else(|| ContactsError::NotFound(contact.to_string()))?;

        book.contacts.remove(index);
        self.save(&book)?;

        tracing::info!("Removed contact, remaining: {}", book.contacts.len());
        Ok(())
    }

    fn save(&self, book: &ContactBook) -> Result<(), ContactsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(book)?;
        fs::write(&self.path, content)?;

        tracing::debug!("Contacts saved to {:?}", self.path);
        Ok(())
    }
}

impl ContactStore for JsonContactStore {
    fn contacts(&self) -> Result<Vec<String>, ContactsError> {
        Ok(self.list())
    }
}
