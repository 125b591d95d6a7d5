use std::collections::HashMap;
use std::path::Path;

use md5::Context as Md5Context;
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 4096;

/// Hex MD5 of a file's contents. The empty value marks an unreadable file
/// and never compares equal to a recorded fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn unreadable() -> Self {
        Self(String::new())
    }

    pub fn is_unreadable(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub async fn fingerprint(path: &Path) -> Fingerprint {
    match digest_file(path).await {
        Ok(hex) => Fingerprint(hex),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot fingerprint file");
            Fingerprint::unreadable()
        }
    }
}

async fn digest_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut ctx = Md5Context::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        ctx.consume(&buf[..read]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

/// Last-synced fingerprint per file name. Lives only as long as its engine;
/// an entry exists only for names uploaded successfully with that fingerprint.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    synced: HashMap<String, Fingerprint>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unchanged(&self, name: &str, current: &Fingerprint) -> bool {
        if current.is_unreadable() {
            return false;
        }
        self.synced.get(name) == Some(current)
    }

    pub fn record_synced(&mut self, name: &str, fingerprint: Fingerprint) {
        if fingerprint.is_unreadable() {
            self.synced.remove(name);
            return;
        }
        self.synced.insert(name.to_string(), fingerprint);
    }

    pub fn is_empty(&self) -> bool {
        self.synced.is_empty()
    }
}
