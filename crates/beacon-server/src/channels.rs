//! Channel cache.
//!
//! The cache is a small XML document listing the feeds a user subscribed to
//! and the directory each one downloads into:
//!
//! ```xml
//! <channels>
//!   <channel url="http://example.com/feed.rss">
//!     <directory>/media/podcasts/example</directory>
//!   </channel>
//! </channels>
//! ```
//!
//! A missing or malformed cache never fails start-up; it loads as empty.

use std::io::Write;
use std::path::{Path, PathBuf};

use beacon_core::BeaconError;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// One subscribed feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(rename = "@url")]
    pub url: String,
    pub directory: String,
}

impl Channel {
    pub fn new(url: impl Into<String>, directory: impl AsRef<Path>) -> Self {
        Self {
            url: url.into(),
            directory: directory.as_ref().to_string_lossy().into_owned(),
        }
    }

    /// Download directory.
    pub fn directory(&self) -> &Path {
        Path::new(&self.directory)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "channels")]
struct ChannelsDocument {
    #[serde(rename = "channel", default)]
    channels: Vec<Channel>,
}

/// Feed subscriptions backed by an XML file.
#[derive(Debug, Clone)]
pub struct ChannelCache {
    path: PathBuf,
    channels: Vec<Channel>,
}

impl ChannelCache {
    /// Create an empty cache that saves to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            channels: Vec::new(),
        }
    }

    /// Load the cache at `path`.
    ///
    /// A missing file yields an empty cache. An unreadable or malformed file
    /// is logged and also yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let mut cache = Self::new(path);
        let text = match std::fs::read_to_string(&cache.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %cache.path.display(), "no channel cache");
                return cache;
            }
            Err(e) => {
                error!(path = %cache.path.display(), error = %e, "cannot read channel cache");
                return cache;
            }
        };

        match quick_xml::de::from_str::<ChannelsDocument>(&text) {
            Ok(document) => {
                debug!(path = %cache.path.display(), count = document.channels.len(), "channel cache loaded");
                cache.channels = document.channels;
            }
            Err(e) => {
                error!(path = %cache.path.display(), error = %e, "malformed channel cache ignored");
            }
        }
        cache
    }

    /// File the cache saves to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribed channels in subscription order.
    pub fn list(&self) -> &[Channel] {
        &self.channels
    }

    /// Look up a channel by url.
    pub fn get(&self, url: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.url == url)
    }

    /// Subscribe to a channel. Returns `false` if the url is already known.
    pub fn add(&mut self, channel: Channel) -> bool {
        if self.get(&channel.url).is_some() {
            return false;
        }
        info!(url = %channel.url, "channel added");
        self.channels.push(channel);
        true
    }

    /// Unsubscribe from a channel. Returns `false` if the url is unknown.
    pub fn remove(&mut self, url: &str) -> bool {
        let before = self.channels.len();
        self.channels.retain(|c| c.url != url);
        let removed = self.channels.len() != before;
        if removed {
            info!(url, "channel removed");
        }
        removed
    }

    /// Write the cache atomically.
    pub fn save(&self) -> Result<(), BeaconError> {
        let document = ChannelsDocument {
            channels: self.channels.clone(),
        };
        let xml = quick_xml::se::to_string(&document).map_err(|e| BeaconError::Other {
            message: format!("cannot encode channel cache: {e}"),
        })?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| BeaconError::io(dir, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| BeaconError::io(dir, e))?;
        tmp.write_all(xml.as_bytes())
            .map_err(|e| BeaconError::io(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| BeaconError::io(&self.path, e.error))?;
        debug!(path = %self.path.display(), count = self.channels.len(), "channel cache saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    const CACHE: &str = r#"<channels>
  <channel url="http://example.com/a.rss">
    <directory>/media/podcasts/a</directory>
  </channel>
  <channel url="http://example.com/b.rss">
    <directory>/media/podcasts/b</directory>
  </channel>
</channels>"#;

    #[test]
    fn test_load_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("channels.xml");
        std::fs::write(&path, CACHE).unwrap();

        let cache = ChannelCache::load(&path);
        assert_eq!(cache.list().len(), 2);
        assert_eq!(
            cache.get("http://example.com/b.rss").unwrap().directory(),
            Path::new("/media/podcasts/b")
        );
    }

    #[test]
    #[traced_test]
    fn test_truncated_cache_is_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("channels.xml");
        std::fs::write(&path, &CACHE[..80]).unwrap();

        let cache = ChannelCache::load(&path);
        assert!(cache.list().is_empty());
        assert!(logs_contain("malformed channel cache ignored"));
    }

    #[test]
    fn test_missing_cache_is_empty() {
        let cache = ChannelCache::load("/nonexistent/channels.xml");
        assert!(cache.list().is_empty());
    }

    #[test]
    fn test_add_remove_save() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("beacon").join("channels.xml");

        let mut cache = ChannelCache::new(&path);
        assert!(cache.add(Channel::new("http://a", "/tmp/a")));
        assert!(!cache.add(Channel::new("http://a", "/tmp/other")));
        assert!(cache.add(Channel::new("http://b", "/tmp/b")));
        assert!(cache.remove("http://a"));
        assert!(!cache.remove("http://a"));
        cache.save().unwrap();

        let reloaded = ChannelCache::load(&path);
        assert_eq!(reloaded.list(), [Channel::new("http://b", "/tmp/b")]);
    }
}
