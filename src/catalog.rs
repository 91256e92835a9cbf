//! In-memory catalog collaborator backed by a JSON album list.

use std::path::Path;

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::providers::AlbumQuery;
use crate::viewport::CatalogSource;

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    albums: Vec<AlbumQuery>,
}

impl InMemoryCatalog {
    pub fn new(albums: Vec<AlbumQuery>) -> Self {
        Self { albums }
    }

    pub fn albums(&self) -> &[AlbumQuery] {
        &self.albums
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalog {
    async fn albums_by_artist(&self, artist: &str) -> Result<Vec<AlbumQuery>, CatalogError> {
        let wanted = artist.trim().to_lowercase();
        Ok(self
            .albums
            .iter()
            .filter(|album| album.artist.trim().to_lowercase() == wanted)
            .cloned()
            .collect())
    }
}

/// Reads a JSON array of `{artist, album, releaseGroupId?}` rows.
pub fn load_albums(path: &Path) -> Result<Vec<AlbumQuery>, CatalogError> {
    let content = std::fs::read_to_string(path)
        .map_err(|error| CatalogError(format!("failed to read {}: {}", path.display(), error)))?;
    serde_json::from_str(&content)
        .map_err(|error| CatalogError(format!("failed to parse {}: {}", path.display(), error)))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{load_albums, InMemoryCatalog};
    use crate::providers::AlbumQuery;
    use crate::viewport::CatalogSource;

    #[tokio::test]
    async fn test_albums_by_artist_ignores_case() {
        let catalog = InMemoryCatalog::new(vec![
            AlbumQuery::new("Low", "Things We Lost in the Fire"),
            AlbumQuery::new("Slowdive", "Souvlaki"),
            AlbumQuery::new("low ", "Double Negative"),
        ]);
        let albums = catalog
            .albums_by_artist("LOW")
            .await
            .expect("lookup succeeds");
        let titles: Vec<&str> = albums.iter().map(|album| album.album.as_str()).collect();
        assert_eq!(titles, vec!["Things We Lost in the Fire", "Double Negative"]);
    }

    #[test]
    fn test_load_albums_reads_json_rows() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[{{"artist":"Low","album":"C'mon","releaseGroupId":"rg-1"}}]"#
        )
        .expect("write rows");

        let albums = load_albums(file.path()).expect("rows load");
        assert_eq!(
            albums,
            vec![AlbumQuery::new("Low", "C'mon").with_release_group("rg-1")]
        );
    }

    #[test]
    fn test_load_albums_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "not json").expect("write rows");
        let error = load_albums(file.path()).expect_err("parse fails");
        assert!(error.0.contains("failed to parse"));
    }
}
