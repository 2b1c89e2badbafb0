// crates/downloader/src/source.rs
//! Turning a fetched document into a job
//!
//! Sources are pure transforms over bytes. They may fetch through a
//! [`Fetcher`] but never touch the coordinator's queue or flag.

use crate::error::{DownloadError, DownloadResult};
use crate::fetcher::Fetcher;
use crate::job::{FetchJob, SubResource};
use panelview_network::Locator;

/// Site-specific document extraction
pub trait Source {
    fn name(&self) -> &str;

    /// Ordered sub-resources referenced by `document`, fetched from `base`
    fn subresources(&self, document: &[u8], base: &Locator) -> DownloadResult<Vec<SubResource>>;

    /// Document locators matching `term`
    fn search(&self, term: &str) -> DownloadResult<Vec<String>>;
}

/// Plain-text manifest: one path per line, relative to the manifest's
/// directory unless it is a full locator
///
/// Blank lines and lines starting with `#` are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestSource;

impl ManifestSource {
    pub fn new() -> Self {
        Self
    }
}

impl Source for ManifestSource {
    fn name(&self) -> &str {
        "manifest"
    }

    fn subresources(&self, document: &[u8], base: &Locator) -> DownloadResult<Vec<SubResource>> {
        let text = std::str::from_utf8(document)
            .map_err(|e| DownloadError::Source(format!("Manifest is not UTF-8: {}", e)))?;

        let mut subresources = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let locator = if line.contains("://") {
                Locator::parse(line).map_err(DownloadError::Locator)?
            } else {
                base.join(line)
            };
            let name = locator.file_name().to_string();
            if name.is_empty() {
                return Err(DownloadError::Source(format!(
                    "Manifest entry has no file name: {}",
                    line
                )));
            }
            subresources.push(SubResource::new(name, locator));
        }

        if subresources.is_empty() {
            return Err(DownloadError::Source("Manifest lists no files".to_string()));
        }
        Ok(subresources)
    }

    fn search(&self, _term: &str) -> DownloadResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Fetches `document` and builds a job from the sub-resources it lists
pub fn resolve_job(
    source: &dyn Source,
    fetcher: &mut dyn Fetcher,
    title: &str,
    document: &Locator,
) -> DownloadResult<FetchJob> {
    log::debug!("Resolving {} through {}", document, source.name());
    let bytes = fetcher.fetch(document, &mut |_| true)?;
    let subresources = source.subresources(&bytes, document)?;
    log::info!("{}: {} sub-resources", title, subresources.len());
    Ok(FetchJob::new(title, subresources))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Locator {
        Locator::parse("ftp://example.org/comics/vol1/index.txt").unwrap()
    }

    #[test]
    fn test_manifest_lines() {
        let manifest = b"# volume 1\np01.jpg\n\n  p02.jpg  \nftp://mirror.org/extra/p03.jpg\n";
        let subs = ManifestSource::new().subresources(manifest, &base()).unwrap();

        let names: Vec<&str> = subs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["p01.jpg", "p02.jpg", "p03.jpg"]);
        assert_eq!(subs[0].locator.path, "/comics/vol1/p01.jpg");
        assert_eq!(subs[2].locator.host, "mirror.org");
    }

    #[test]
    fn test_crlf_manifest() {
        let subs = ManifestSource::new()
            .subresources(b"a.png\r\nb.png\r\n", &base())
            .unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[1].name, "b.png");
    }

    #[test]
    fn test_empty_manifest_rejected() {
        let err = ManifestSource::new()
            .subresources(b"# nothing\n\n", &base())
            .unwrap_err();
        assert!(matches!(err, DownloadError::Source(_)));
    }

    #[test]
    fn test_binary_manifest_rejected() {
        let err = ManifestSource::new()
            .subresources(&[0xff, 0xfe, 0x00], &base())
            .unwrap_err();
        assert!(matches!(err, DownloadError::Source(_)));
    }

    struct StaticFetcher(&'static [u8]);

    impl Fetcher for StaticFetcher {
        fn fetch(
            &mut self,
            _locator: &Locator,
            _keep_going: &mut dyn FnMut(usize) -> bool,
        ) -> DownloadResult<Vec<u8>> {
            Ok(self.0.to_vec())
        }
    }

    #[test]
    fn test_resolve_job() {
        let mut fetcher = StaticFetcher(b"p01.jpg\np02.jpg\n");
        let job = resolve_job(&ManifestSource, &mut fetcher, "Vol 1", &base()).unwrap();
        assert_eq!(job.title, "Vol 1");
        assert_eq!(job.len(), 2);
    }
}
