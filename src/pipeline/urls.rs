//! Page URL resolution for the viewer.
//!
//! Pure string building: no filesystem access and no existence checks. A
//! document with `total_pages > 0` is trusted to have every page on disk.

use crate::catalog::DocumentId;

/// Public URLs of a document's page images, in page order.
///
/// Returns exactly `total_pages` entries of the form
/// `<media_url>/books/<id>/page_<n>.jpg`, or an empty list for 0.
pub fn resolve_pages(media_url: &str, doc_id: &DocumentId, total_pages: u32) -> Vec<String> {
    UrlResolver::new(media_url).pages(doc_id, total_pages)
}

/// Resolves media-relative paths against a public base URL.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    base: String,
    books_dir: String,
}

impl UrlResolver {
    /// `media_url` may or may not end with `/`.
    pub fn new(media_url: &str) -> Self {
        Self {
            base: media_url.trim_end_matches('/').to_string(),
            books_dir: "books".to_string(),
        }
    }

    pub fn with_books_dir(mut self, dir: impl Into<String>) -> Self {
        self.books_dir = dir.into();
        self
    }

    pub fn pages(&self, doc_id: &DocumentId, total_pages: u32) -> Vec<String> {
        (1..=total_pages)
            .map(|n| format!("{}/{}/{}/page_{}.jpg", self.base, self.books_dir, doc_id, n))
            .collect()
    }

    /// URL for a media-relative reference such as `thumbnails/42_thumb.jpg`.
    pub fn media(&self, reference: &str) -> String {
        format!("{}/{}", self.base, reference.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id42() -> DocumentId {
        DocumentId::from(42u64)
    }

    #[test]
    fn zero_pages_is_empty() {
        assert!(resolve_pages("/media/", &id42(), 0).is_empty());
    }

    #[test]
    fn three_pages_in_order() {
        assert_eq!(
            resolve_pages("/media/", &id42(), 3),
            vec![
                "/media/books/42/page_1.jpg",
                "/media/books/42/page_2.jpg",
                "/media/books/42/page_3.jpg",
            ]
        );
    }

    #[test]
    fn base_without_trailing_slash() {
        let urls = resolve_pages("https://cdn.example.com/media", &id42(), 1);
        assert_eq!(urls, vec!["https://cdn.example.com/media/books/42/page_1.jpg"]);
    }

    #[test]
    fn media_reference() {
        let r = UrlResolver::new("/media/");
        assert_eq!(r.media("thumbnails/42_thumb.jpg"), "/media/thumbnails/42_thumb.jpg");
        assert_eq!(r.media("/thumbnails/x.jpg"), "/media/thumbnails/x.jpg");
    }

    #[test]
    fn custom_books_dir() {
        let r = UrlResolver::new("/m").with_books_dir("flipbooks");
        assert_eq!(r.pages(&id42(), 1), vec!["/m/flipbooks/42/page_1.jpg"]);
    }
}
