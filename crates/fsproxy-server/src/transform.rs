//! Views the `fsproxy` binary can mount.
//!
//! Each view is a set of hooks layered over whatever the proxy already has
//! installed, so they stack: hiding dotfiles on an upper-cased view works the
//! same as on a plain one.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fsproxy_kernel::{
    CancellationToken, DirEntry, FileNode, FsError, FsResult, Node, NodeAttr, Proxy,
};
use serde::{Deserialize, Serialize};

/// Content transform applied to every file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Transform {
    /// Serve files unchanged.
    #[default]
    None,
    /// Upper-case the text of every file.
    Uppercase,
}

/// Install the requested views on a proxy that has not been shared yet.
pub fn install(proxy: Proxy, transform: Transform, hide: bool) -> Proxy {
    let proxy = match transform {
        Transform::None => proxy,
        Transform::Uppercase => uppercase(proxy),
    };
    if hide { hide_dotfiles(proxy) } else { proxy }
}

/// File node serving the upper-cased content of the file it wraps.
///
/// UTF-8 content is upper-cased with full Unicode case mapping, which can
/// change its length; anything else only has its ASCII letters changed.
pub struct UppercaseFile {
    inner: Arc<dyn FileNode>,
}

impl UppercaseFile {
    pub fn new(inner: Arc<dyn FileNode>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FileNode for UppercaseFile {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn attributes(&self) -> &NodeAttr {
        self.inner.attributes()
    }

    async fn read_all(&self, cancel: &CancellationToken) -> FsResult<Vec<u8>> {
        let data = self.inner.read_all(cancel).await?;
        Ok(to_uppercase(data))
    }
}

/// Wrap every file the current Lookup hook returns in an [`UppercaseFile`].
pub fn uppercase(proxy: Proxy) -> Proxy {
    let lookup = Arc::clone(&proxy.hooks().lookup);
    proxy.with_lookup(move |proxy, path, cancel| {
        let lookup = Arc::clone(&lookup);
        async move {
            match lookup(proxy, path, cancel).await? {
                Node::File(file) => Ok(Node::File(Arc::new(UppercaseFile::new(file)))),
                node => Ok(node),
            }
        }
    })
}

/// Drop dot-entries from listings and refuse to resolve them.
pub fn hide_dotfiles(proxy: Proxy) -> Proxy {
    let list = Arc::clone(&proxy.hooks().list);
    let lookup = Arc::clone(&proxy.hooks().lookup);

    proxy
        .with_list(move |proxy, path| {
            let list = Arc::clone(&list);
            async move {
                let entries = list(proxy, path).await?;
                Ok(entries
                    .into_iter()
                    .filter(|e| !is_hidden(&e.name))
                    .collect::<Vec<DirEntry>>())
            }
        })
        .with_lookup(move |proxy, path, cancel| {
            let lookup = Arc::clone(&lookup);
            async move {
                let hidden = path
                    .file_name()
                    .is_some_and(|name| is_hidden(&name.to_string_lossy()));
                if hidden {
                    return Err(FsError::not_found(path.display().to_string()));
                }
                lookup(proxy, path, cancel).await
            }
        })
}

fn to_uppercase(data: Vec<u8>) -> Vec<u8> {
    match String::from_utf8(data) {
        Ok(text) => text.to_uppercase().into_bytes(),
        Err(e) => e.into_bytes().to_ascii_uppercase(),
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello, world").unwrap();
        std::fs::write(dir.path().join(".secret"), "shh").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "nested").unwrap();
        dir
    }

    async fn names(proxy: &Arc<Proxy>) -> Vec<String> {
        let root = proxy.root();
        let entries = root
            .as_directory()
            .unwrap()
            .list_entries(&CancellationToken::new())
            .await
            .unwrap();
        let mut names: Vec<_> = entries.into_iter().map(|e| e.name).collect();
        names.sort();
        names
    }

    async fn read(proxy: &Arc<Proxy>, name: &str) -> FsResult<Vec<u8>> {
        let cancel = CancellationToken::new();
        let root = proxy.root();
        let node = root.as_directory().unwrap().resolve_child(name, &cancel).await?;
        node.as_file().unwrap().read_all(&cancel).await
    }

    #[tokio::test]
    async fn test_uppercase_view() {
        let dir = setup();
        let proxy = install(Proxy::new("/mnt/view", dir.path()), Transform::Uppercase, false).shared();

        assert_eq!(read(&proxy, "a.txt").await.unwrap(), b"HELLO, WORLD");
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"hello, world");

        // Directories are not wrapped
        let root = proxy.root();
        let sub = root
            .as_directory()
            .unwrap()
            .resolve_child("sub", &CancellationToken::new())
            .await
            .unwrap();
        assert!(sub.is_dir());
    }

    #[test]
    fn test_to_uppercase_unicode() {
        assert_eq!(to_uppercase("héllo wörld".as_bytes().to_vec()), "HÉLLO WÖRLD".as_bytes());
        assert_eq!(to_uppercase("straße".as_bytes().to_vec()), b"STRASSE");
        // Not UTF-8: ASCII letters only, other bytes untouched
        assert_eq!(to_uppercase(vec![b'a', 0xff, b'z']), vec![b'A', 0xff, b'Z']);
    }

    #[tokio::test]
    async fn test_uppercase_view_non_ascii() {
        let dir = setup();
        std::fs::write(dir.path().join("greek.txt"), "αβγ").unwrap();
        let proxy = install(Proxy::new("/mnt/view", dir.path()), Transform::Uppercase, false).shared();

        assert_eq!(read(&proxy, "greek.txt").await.unwrap(), "ΑΒΓ".as_bytes());
    }

    #[tokio::test]
    async fn test_uppercase_keeps_attributes() {
        let dir = setup();
        let proxy = install(Proxy::new("/mnt/view", dir.path()), Transform::Uppercase, false).shared();

        let root = proxy.root();
        let node = root
            .as_directory()
            .unwrap()
            .resolve_child("a.txt", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(node.attributes().size, 12);
        assert_eq!(node.path(), dir.path().join("a.txt").as_path());
        assert_eq!(
            Some(node.attributes().ino),
            proxy.registry().get(&dir.path().join("a.txt"))
        );
    }

    #[tokio::test]
    async fn test_plain_view_passes_through() {
        let dir = setup();
        let proxy = install(Proxy::new("/mnt/view", dir.path()), Transform::None, false).shared();

        assert_eq!(names(&proxy).await, vec![".secret", "a.txt", "sub"]);
        assert_eq!(read(&proxy, "a.txt").await.unwrap(), b"hello, world");
    }

    #[tokio::test]
    async fn test_hidden_dotfiles() {
        let dir = setup();
        let proxy = install(Proxy::new("/mnt/view", dir.path()), Transform::None, true).shared();

        assert_eq!(names(&proxy).await, vec!["a.txt", "sub"]);
        assert!(matches!(read(&proxy, ".secret").await, Err(FsError::NotFound(_))));
        assert_eq!(read(&proxy, "a.txt").await.unwrap(), b"hello, world");
    }

    #[tokio::test]
    async fn test_views_stack() {
        let dir = setup();
        let proxy = install(Proxy::new("/mnt/view", dir.path()), Transform::Uppercase, true).shared();

        assert_eq!(names(&proxy).await, vec!["a.txt", "sub"]);
        assert_eq!(read(&proxy, "a.txt").await.unwrap(), b"HELLO, WORLD");
        assert!(read(&proxy, ".secret").await.is_err());
    }
}
