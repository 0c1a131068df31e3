//! Access-gated viewer payload.
//!
//! The flipbook page receives an ordered list of page URLs plus a little
//! metadata. Checks run in a fixed order: the grant first, so a user without
//! access learns nothing about whether a document exists or what state it is
//! in. Every payload handed out is logged as a [`BookView`].

use crate::catalog::{BookView, Catalog, ConversionStatus, DocumentId};
use crate::error::ViewError;
use crate::pipeline::urls::UrlResolver;
use serde::Serialize;
use tracing::{debug, warn};

/// What the viewer needs to render one flipbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerPayload {
    pub id: DocumentId,
    pub title: String,
    pub event: Option<String>,
    pub total_pages: u32,
    /// `total_pages` URLs, page 1 first.
    pub pages: Vec<String>,
    pub thumbnail: Option<String>,
}

/// Build the payload for `user`, or say why they cannot see the document.
///
/// `ip` is the client address, recorded with the view when known. A view
/// that cannot be logged is reported with `warn!` and still served.
pub fn viewer_payload(
    catalog: &dyn Catalog,
    resolver: &UrlResolver,
    user: &str,
    ip: Option<&str>,
    id: &DocumentId,
) -> Result<ViewerPayload, ViewError> {
    if !catalog.has_access(user, id)? {
        debug!("User {} denied access to document {}", user, id);
        return Err(ViewError::NoAccess);
    }

    let doc = catalog
        .get(id)?
        .ok_or_else(|| ViewError::NotFound(id.clone()))?;

    if !doc.is_published {
        return Err(ViewError::NotPublished(id.clone()));
    }

    if doc.total_pages == 0 {
        return Err(match doc.status {
            ConversionStatus::Failed => ViewError::ConversionFailed {
                id: id.clone(),
                reason: doc
                    .last_error
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
            _ => ViewError::NotYetConverted(id.clone()),
        });
    }

    let view = BookView::now(id.clone(), user, ip.map(str::to_string));
    if let Err(e) = catalog.record_view(view) {
        warn!("Could not record view of document {} by {}: {}", id, user, e);
    }

    Ok(ViewerPayload {
        pages: resolver.pages(id, doc.total_pages),
        thumbnail: doc.thumbnail.as_deref().map(|t| resolver.media(t)),
        id: doc.id,
        title: doc.title,
        event: doc.event,
        total_pages: doc.total_pages,
    })
}
