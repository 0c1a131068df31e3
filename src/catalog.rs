//! Document records and access grants.
//!
//! The catalog is the persistence collaborator of the conversion pipeline.
//! The orchestrator only ever needs a row-atomic read-modify-write
//! ([`Catalog::update`]); the viewer needs reads, the grant relation and a
//! log of successful views.
//!
//! Two implementations ship with the crate:
//!
//! * [`MemoryCatalog`] — process-local, for embedding and tests.
//! * [`JsonFileCatalog`] — a single JSON file under the media root,
//!   atomically replaced on every write. Used by the `flipbook` CLI.

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

// ── Identifiers ──────────────────────────────────────────────────────────

/// Stable identifier of a document.
///
/// Ids become directory and file names, so only `[A-Za-z0-9_-]` is
/// accepted, 1–64 characters. Numeric ids are the usual case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Result<Self, CatalogError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= 64
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid {
            Ok(Self(id))
        } else {
            Err(CatalogError::InvalidId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for DocumentId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl TryFrom<String> for DocumentId {
    type Error = CatalogError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

impl std::str::FromStr for DocumentId {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Records ──────────────────────────────────────────────────────────────

/// Where a document is in its conversion lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    #[default]
    NotConverted,
    Converting,
    /// Terminal. `total_pages` page images exist.
    Converted,
    /// Retryable: nothing written by the failed job is trusted.
    Failed,
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotConverted => "not converted",
            Self::Converting => "converting",
            Self::Converted => "converted",
            Self::Failed => "failed",
        })
    }
}

/// A flipbook: the uploaded PDF plus its catalog metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    #[serde(default)]
    pub event: Option<String>,
    pub source_pdf: PathBuf,
    /// Media-relative thumbnail reference, uploaded or derived.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// 0 until a conversion completes.
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default = "default_true")]
    pub is_published: bool,
    #[serde(default)]
    pub status: ConversionStatus,
    #[serde(default)]
    pub last_error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Document {
    pub fn new(id: DocumentId, title: impl Into<String>, source_pdf: impl Into<PathBuf>) -> Self {
        Self {
            id,
            title: title.into(),
            event: None,
            source_pdf: source_pdf.into(),
            thumbnail: None,
            total_pages: 0,
            is_published: true,
            status: ConversionStatus::NotConverted,
            last_error: None,
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// An operator-supplied thumbnail; conversion never replaces it.
    pub fn with_thumbnail(mut self, reference: impl Into<String>) -> Self {
        self.thumbnail = Some(reference.into());
        self
    }

    pub fn unpublished(mut self) -> Self {
        self.is_published = false;
        self
    }

    /// Whether the orchestrator should do any work for this record.
    pub fn needs_conversion(&self) -> bool {
        self.total_pages == 0 && self.status != ConversionStatus::Converted
    }
}

/// One successful, access-checked look at a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookView {
    pub document: DocumentId,
    pub user: String,
    #[serde(default)]
    pub ip: Option<String>,
    /// Seconds since the Unix epoch.
    pub viewed_at: u64,
}

impl BookView {
    pub fn now(document: DocumentId, user: impl Into<String>, ip: Option<String>) -> Self {
        let viewed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            document,
            user: user.into(),
            ip,
            viewed_at,
        }
    }
}

// ── Trait ────────────────────────────────────────────────────────────────

/// Storage for documents and access grants.
///
/// `update` must apply its closure atomically for one row: readers see the
/// record before or after, never in between.
pub trait Catalog: Send + Sync {
    fn get(&self, id: &DocumentId) -> Result<Option<Document>, CatalogError>;

    /// Add a new record; fails if the id is taken.
    fn insert(&self, doc: Document) -> Result<(), CatalogError>;

    /// Read-modify-write one record and return the new value.
    fn update(
        &self,
        id: &DocumentId,
        change: &mut dyn FnMut(&mut Document),
    ) -> Result<Document, CatalogError>;

    /// All records, ordered by id.
    fn list(&self) -> Result<Vec<Document>, CatalogError>;

    fn grant(&self, user: &str, id: &DocumentId) -> Result<(), CatalogError>;

    fn revoke(&self, user: &str, id: &DocumentId) -> Result<(), CatalogError>;

    fn has_access(&self, user: &str, id: &DocumentId) -> Result<bool, CatalogError>;

    /// Append to the view log.
    fn record_view(&self, view: BookView) -> Result<(), CatalogError>;

    /// Views of one document, oldest first.
    fn views(&self, id: &DocumentId) -> Result<Vec<BookView>, CatalogError>;
}

// ── In-memory ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CatalogState {
    #[serde(default)]
    documents: BTreeMap<DocumentId, Document>,
    #[serde(default)]
    grants: BTreeSet<(String, DocumentId)>,
    #[serde(default)]
    views: Vec<BookView>,
}

impl CatalogState {
    fn insert(&mut self, doc: Document) -> Result<(), CatalogError> {
        if self.documents.contains_key(&doc.id) {
            return Err(CatalogError::AlreadyExists(doc.id));
        }
        self.documents.insert(doc.id.clone(), doc);
        Ok(())
    }

    fn update(
        &mut self,
        id: &DocumentId,
        change: &mut dyn FnMut(&mut Document),
    ) -> Result<Document, CatalogError> {
        let doc = self
            .documents
            .get_mut(id)
            .ok_or_else(|| CatalogError::NotFound(id.clone()))?;
        let mut next = doc.clone();
        change(&mut next);
        next.id = id.clone();
        *doc = next.clone();
        Ok(next)
    }

    fn grant(&mut self, user: &str, id: &DocumentId) -> Result<(), CatalogError> {
        if !self.documents.contains_key(id) {
            return Err(CatalogError::NotFound(id.clone()));
        }
        self.grants.insert((user.to_string(), id.clone()));
        Ok(())
    }

    fn revoke(&mut self, user: &str, id: &DocumentId) {
        self.grants.remove(&(user.to_string(), id.clone()));
    }

    fn has_access(&self, user: &str, id: &DocumentId) -> bool {
        self.grants.contains(&(user.to_string(), id.clone()))
    }

    fn record_view(&mut self, view: BookView) -> Result<(), CatalogError> {
        if !self.documents.contains_key(&view.document) {
            return Err(CatalogError::NotFound(view.document));
        }
        self.views.push(view);
        Ok(())
    }

    fn views(&self, id: &DocumentId) -> Vec<BookView> {
        self.views
            .iter()
            .filter(|v| &v.document == id)
            .cloned()
            .collect()
    }
}

/// Process-local catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Catalog for MemoryCatalog {
    fn get(&self, id: &DocumentId) -> Result<Option<Document>, CatalogError> {
        Ok(self.lock().documents.get(id).cloned())
    }

    fn insert(&self, doc: Document) -> Result<(), CatalogError> {
        self.lock().insert(doc)
    }

    fn update(
        &self,
        id: &DocumentId,
        change: &mut dyn FnMut(&mut Document),
    ) -> Result<Document, CatalogError> {
        self.lock().update(id, change)
    }

    fn list(&self) -> Result<Vec<Document>, CatalogError> {
        Ok(self.lock().documents.values().cloned().collect())
    }

    fn grant(&self, user: &str, id: &DocumentId) -> Result<(), CatalogError> {
        self.lock().grant(user, id)
    }

    fn revoke(&self, user: &str, id: &DocumentId) -> Result<(), CatalogError> {
        self.lock().revoke(user, id);
        Ok(())
    }

    fn has_access(&self, user: &str, id: &DocumentId) -> Result<bool, CatalogError> {
        Ok(self.lock().has_access(user, id))
    }

    fn record_view(&self, view: BookView) -> Result<(), CatalogError> {
        self.lock().record_view(view)
    }

    fn views(&self, id: &DocumentId) -> Result<Vec<BookView>, CatalogError> {
        Ok(self.lock().views(id))
    }
}

// ── JSON file ────────────────────────────────────────────────────────────

/// Catalog persisted as one JSON file.
///
/// The file is read once on open and rewritten (temp file + rename) after
/// every mutation while the state lock is held, so concurrent writers in
/// one process serialise and a crash never leaves a truncated file.
#[derive(Debug)]
pub struct JsonFileCatalog {
    path: PathBuf,
    state: Mutex<CatalogState>,
}

impl JsonFileCatalog {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| CatalogError::Corrupt {
                path: path.clone(),
                detail: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CatalogState::default(),
            Err(source) => return Err(CatalogError::Io { path, source }),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to a copy of the state and persist; memory is only updated
    /// once the file write succeeded.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut CatalogState) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(out)
    }

    fn persist(&self, state: &CatalogState) -> Result<(), CatalogError> {
        let io_err = |source: std::io::Error| CatalogError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(state).map_err(|e| CatalogError::Corrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl Catalog for JsonFileCatalog {
    fn get(&self, id: &DocumentId) -> Result<Option<Document>, CatalogError> {
        Ok(self.lock().documents.get(id).cloned())
    }

    fn insert(&self, doc: Document) -> Result<(), CatalogError> {
        self.mutate(|s| s.insert(doc))
    }

    fn update(
        &self,
        id: &DocumentId,
        change: &mut dyn FnMut(&mut Document),
    ) -> Result<Document, CatalogError> {
        self.mutate(|s| s.update(id, change))
    }

    fn list(&self) -> Result<Vec<Document>, CatalogError> {
        Ok(self.lock().documents.values().cloned().collect())
    }

    fn grant(&self, user: &str, id: &DocumentId) -> Result<(), CatalogError> {
        self.mutate(|s| s.grant(user, id))
    }

    fn revoke(&self, user: &str, id: &DocumentId) -> Result<(), CatalogError> {
        self.mutate(|s| {
            s.revoke(user, id);
            Ok(())
        })
    }

    fn has_access(&self, user: &str, id: &DocumentId) -> Result<bool, CatalogError> {
        Ok(self.lock().has_access(user, id))
    }

    fn record_view(&self, view: BookView) -> Result<(), CatalogError> {
        self.mutate(|s| s.record_view(view))
    }

    fn views(&self, id: &DocumentId) -> Result<Vec<BookView>, CatalogError> {
        Ok(self.lock().views(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DocumentId {
        DocumentId::new(s).unwrap()
    }

    #[test]
    fn document_id_rejects_path_tricks() {
        for bad in ["", "../etc", "a/b", "a b", "x".repeat(65).as_str()] {
            assert!(DocumentId::new(bad).is_err(), "accepted {bad:?}");
        }
        assert_eq!(DocumentId::from(42u64).as_str(), "42");
        assert!("book-7_a".parse::<DocumentId>().is_ok());
    }

    #[test]
    fn document_id_deserialisation_validates() {
        let ok: DocumentId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(ok, id("42"));
        assert!(serde_json::from_str::<DocumentId>("\"../x\"").is_err());
    }

    #[test]
    fn new_document_needs_conversion() {
        let doc = Document::new(id("1"), "Brochure", "pdfs/a.pdf");
        assert_eq!(doc.status, ConversionStatus::NotConverted);
        assert!(doc.needs_conversion());
        assert!(doc.is_published);
    }

    #[test]
    fn memory_update_is_row_scoped() {
        let cat = MemoryCatalog::new();
        cat.insert(Document::new(id("1"), "A", "a.pdf")).unwrap();
        cat.insert(Document::new(id("2"), "B", "b.pdf")).unwrap();

        let updated = cat
            .update(&id("1"), &mut |d| {
                d.total_pages = 5;
                d.status = ConversionStatus::Converted;
            })
            .unwrap();
        assert_eq!(updated.total_pages, 5);
        assert_eq!(cat.get(&id("2")).unwrap().unwrap().total_pages, 0);
    }

    #[test]
    fn duplicate_insert_fails() {
        let cat = MemoryCatalog::new();
        cat.insert(Document::new(id("1"), "A", "a.pdf")).unwrap();
        let err = cat.insert(Document::new(id("1"), "A", "a.pdf")).unwrap_err();
        assert!(matches!(err, CatalogError::AlreadyExists(_)));
    }

    #[test]
    fn grants_are_membership() {
        let cat = MemoryCatalog::new();
        cat.insert(Document::new(id("1"), "A", "a.pdf")).unwrap();
        assert!(!cat.has_access("alice", &id("1")).unwrap());
        cat.grant("alice", &id("1")).unwrap();
        assert!(cat.has_access("alice", &id("1")).unwrap());
        assert!(!cat.has_access("bob", &id("1")).unwrap());
        cat.revoke("alice", &id("1")).unwrap();
        assert!(!cat.has_access("alice", &id("1")).unwrap());
    }

    #[test]
    fn grant_on_unknown_document_fails() {
        let cat = MemoryCatalog::new();
        assert!(matches!(
            cat.grant("alice", &id("404")),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn json_catalog_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("catalog.json");
        {
            let cat = JsonFileCatalog::open(&path).unwrap();
            cat.insert(Document::new(id("42"), "Annual", "pdfs/annual.pdf").with_event("Expo"))
                .unwrap();
            cat.grant("alice", &id("42")).unwrap();
            cat.update(&id("42"), &mut |d| d.status = ConversionStatus::Failed)
                .unwrap();
            cat.record_view(BookView::now(id("42"), "alice", Some("10.0.0.7".into())))
                .unwrap();
        }
        let cat = JsonFileCatalog::open(&path).unwrap();
        let doc = cat.get(&id("42")).unwrap().unwrap();
        assert_eq!(doc.event.as_deref(), Some("Expo"));
        assert_eq!(doc.status, ConversionStatus::Failed);
        assert!(cat.has_access("alice", &id("42")).unwrap());
        let views = cat.views(&id("42")).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].ip.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn views_are_logged_per_document() {
        let cat = MemoryCatalog::new();
        cat.insert(Document::new(id("1"), "A", "a.pdf")).unwrap();
        cat.insert(Document::new(id("2"), "B", "b.pdf")).unwrap();
        cat.record_view(BookView::now(id("1"), "alice", None)).unwrap();
        cat.record_view(BookView::now(id("1"), "bob", None)).unwrap();
        cat.record_view(BookView::now(id("2"), "alice", None)).unwrap();

        let users: Vec<_> = cat
            .views(&id("1"))
            .unwrap()
            .into_iter()
            .map(|v| v.user)
            .collect();
        assert_eq!(users, vec!["alice", "bob"]);
        assert!(cat.views(&id("1")).unwrap()[0].viewed_at > 0);
        assert!(matches!(
            cat.record_view(BookView::now(id("404"), "alice", None)),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn json_catalog_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("catalog.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            JsonFileCatalog::open(&path),
            Err(CatalogError::Corrupt { .. })
        ));
    }

    #[test]
    fn status_serialises_snake_case() {
        let json = serde_json::to_string(&ConversionStatus::NotConverted).unwrap();
        assert_eq!(json, "\"not_converted\"");
    }
}
