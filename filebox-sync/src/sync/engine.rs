use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use filebox_core::{FileboxClient, RemoteFile};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use super::detector::{ChangeDetector, fingerprint};
use super::local::scan_eligible;
use super::paths::local_path_for;
use super::remote::{RemoteDirectory, RemoteListing};
use super::report::SyncResult;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown sync mode: {0}")]
    UnknownMode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    UploadOnly,
    DownloadOnly,
    Bidirectional,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::UploadOnly => "upload_only",
            SyncMode::DownloadOnly => "download_only",
            SyncMode::Bidirectional => "bidirectional",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "upload_only" | "upload-only" => Ok(SyncMode::UploadOnly),
            "download_only" | "download-only" => Ok(SyncMode::DownloadOnly),
            "bidirectional" => Ok(SyncMode::Bidirectional),
            _ => Err(EngineError::UnknownMode(value.to_string())),
        }
    }
}

/// Reconciles one local folder against the remote store. Passes run
/// sequentially, one transfer at a time; the fingerprint memory lives as long
/// as the engine.
pub struct SyncEngine {
    remote: RemoteDirectory,
    detector: ChangeDetector,
    local_folder: PathBuf,
}

impl SyncEngine {
    pub fn new(client: FileboxClient, local_folder: PathBuf) -> Self {
        Self {
            remote: RemoteDirectory::new(client),
            detector: ChangeDetector::new(),
            local_folder,
        }
    }

    pub async fn sync_once(&mut self, mode: SyncMode) -> SyncResult {
        let result = match mode {
            SyncMode::UploadOnly => self.upload_only().await,
            SyncMode::DownloadOnly => self.download_only().await,
            SyncMode::Bidirectional => self.bidirectional().await,
        };
        tracing::info!(
            %mode,
            uploaded = result.uploaded,
            downloaded = result.downloaded,
            skipped = result.skipped,
            errors = result.errors,
            "sync pass finished"
        );
        result
    }

    pub async fn upload_only(&mut self) -> SyncResult {
        let mut result = SyncResult::default();
        if !tokio::fs::try_exists(&self.local_folder).await.unwrap_or(false) {
            tracing::info!(folder = %self.local_folder.display(), "local folder does not exist, nothing to upload");
            return result;
        }

        // Probe only: uploads are gated by local fingerprints, never by the
        // remote listing.
        let remote = self.listing_or_empty().await;
        tracing::debug!(remote_files = remote.len(), "remote listing fetched");

        let files = match scan_eligible(&self.local_folder).await {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(folder = %self.local_folder.display(), error = %err, "cannot read local folder");
                result.record_error(&self.local_folder.display().to_string());
                return result;
            }
        };

        for file in files {
            let current = fingerprint(&file.path).await;
            if self.detector.is_unchanged(&file.name, &current) {
                tracing::debug!(name = %file.name, "unchanged since last upload");
                result.record_skipped();
                continue;
            }
            match self.remote.upload_one(&file.path).await {
                Ok(()) => {
                    self.detector.record_synced(&file.name, current);
                    result.record_uploaded(&file.name);
                }
                Err(err) if err.is_auth_failure() => {
                    tracing::error!(name = %file.name, error = %err, "upload rejected, credentials not accepted");
                    result.record_error(&file.name);
                }
                Err(err) => {
                    tracing::warn!(name = %file.name, error = %err, "upload failed");
                    result.record_error(&file.name);
                }
            }
        }
        result
    }

    pub async fn download_only(&mut self) -> SyncResult {
        let mut result = SyncResult::default();
        if let Err(err) = tokio::fs::create_dir_all(&self.local_folder).await {
            tracing::warn!(folder = %self.local_folder.display(), error = %err, "cannot create local folder");
            result.record_error(&self.local_folder.display().to_string());
            return result;
        }

        let remote = self.listing_or_empty().await;
        for (name, descriptor) in &remote {
            let target = match local_path_for(&self.local_folder, name) {
                Ok(target) => target,
                Err(err) => {
                    tracing::warn!(%name, error = %err, "refusing remote file name");
                    result.record_error(name);
                    continue;
                }
            };

            if local_is_fresh(&target, descriptor).await {
                tracing::debug!(%name, "local copy is at least as fresh as remote");
                result.record_skipped();
                continue;
            }

            match self.remote.download_one(descriptor, &target).await {
                Ok(()) => result.record_downloaded(name),
                Err(err) if err.is_auth_failure() => {
                    tracing::error!(%name, error = %err, "download rejected, credentials not accepted");
                    result.record_error(name);
                }
                Err(err) => {
                    tracing::warn!(%name, error = %err, "download failed");
                    result.record_error(name);
                }
            }
        }
        result
    }

    /// Download pass then upload pass, counters and messages summed in that
    /// order. Freshly downloaded files are re-uploaded by a new engine.
    pub async fn bidirectional(&mut self) -> SyncResult {
        let mut result = self.download_only().await;
        let upload = self.upload_only().await;
        result.merge(upload);
        result
    }

    /// A failed listing degrades to an empty one: download passes become
    /// no-ops and upload passes never consult it anyway.
    async fn listing_or_empty(&self) -> RemoteListing {
        match self.remote.list_remote().await {
            Ok(listing) => listing,
            Err(err) if err.is_auth_failure() => {
                tracing::error!(error = %err, "remote listing rejected, credentials not accepted");
                RemoteListing::new()
            }
            Err(err) => {
                tracing::warn!(error = %err, "remote listing failed, treating as empty");
                RemoteListing::new()
            }
        }
    }
}

/// True when a local file exists at `target` and its mtime is at or after the
/// remote `updated_at`. Every uncertainty answers false so the file is fetched.
async fn local_is_fresh(target: &Path, descriptor: &RemoteFile) -> bool {
    let Ok(meta) = tokio::fs::metadata(target).await else {
        return false;
    };
    let Ok(local_modified) = meta.modified() else {
        return false;
    };
    let Some(updated_at) = descriptor.updated_at.as_deref() else {
        return false;
    };
    match parse_remote_timestamp(updated_at) {
        Ok(remote_modified) => is_at_least_as_fresh(local_modified, remote_modified),
        Err(err) => {
            tracing::debug!(name = %descriptor.name, %updated_at, error = %err, "unparseable remote timestamp");
            false
        }
    }
}

fn is_at_least_as_fresh(local: SystemTime, remote: OffsetDateTime) -> bool {
    OffsetDateTime::from(local) >= remote
}

/// RFC 3339 (`Z` or explicit offset) or a naive ISO-8601 timestamp, which the
/// server emits in UTC.
pub fn parse_remote_timestamp(value: &str) -> Result<OffsetDateTime, time::error::Parse> {
    match OffsetDateTime::parse(value, &Rfc3339) {
        Ok(parsed) => Ok(parsed),
        Err(rfc_err) => {
            let naive = format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
            );
            PrimitiveDateTime::parse(value, naive)
                .map(PrimitiveDateTime::assume_utc)
                .map_err(|_| rfc_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use time::macros::datetime;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_engine(server: &MockServer, folder: &Path) -> SyncEngine {
        let client = FileboxClient::new(&server.uri(), "test-token").unwrap();
        SyncEngine::new(client, folder.to_path_buf())
    }

    async fn mount_listing(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_upload_ok(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 1, "name": "uploaded", "extension": ".py"
            })))
            .mount(server)
            .await;
    }

    fn set_mtime(path: &Path, when: SystemTime) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(when).unwrap();
    }

    #[test]
    fn parses_mode_strings() {
        assert_eq!("upload_only".parse::<SyncMode>().unwrap(), SyncMode::UploadOnly);
        assert_eq!("download-only".parse::<SyncMode>().unwrap(), SyncMode::DownloadOnly);
        assert_eq!("Bidirectional".parse::<SyncMode>().unwrap(), SyncMode::Bidirectional);
        assert!(matches!(
            "mirror".parse::<SyncMode>(),
            Err(EngineError::UnknownMode(mode)) if mode == "mirror"
        ));
    }

    #[test]
    fn parses_utc_offset_and_naive_timestamps() {
        assert_eq!(
            parse_remote_timestamp("2024-01-01T00:00:00Z").unwrap(),
            datetime!(2024-01-01 0:00 UTC)
        );
        assert_eq!(
            parse_remote_timestamp("2024-01-01T02:00:00+02:00").unwrap(),
            datetime!(2024-01-01 0:00 UTC)
        );
        assert_eq!(
            parse_remote_timestamp("2024-01-01T00:00:00.250000").unwrap(),
            datetime!(2024-01-01 0:00:00.25 UTC)
        );
        assert!(parse_remote_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn upload_only_on_missing_folder_returns_zero_result() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let mut engine = make_engine(&server, &dir.path().join("absent"));

        assert_eq!(engine.upload_only().await, SyncResult::default());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_only_first_pass_uploads_everything_then_skips() {
        let server = MockServer::start().await;
        mount_listing(&server, serde_json::json!([])).await;
        mount_upload_ok(&server).await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), b"print(1)").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"jpeg").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut engine = make_engine(&server, dir.path());
        let first = engine.upload_only().await;
        assert_eq!(first.uploaded, 2);
        assert_eq!(first.skipped, 0);
        assert_eq!(first.errors, 0);
        assert_eq!(
            first.files,
            vec!["✅ Uploaded: a.py".to_string(), "✅ Uploaded: b.jpg".to_string()]
        );

        let second = engine.upload_only().await;
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.skipped, 2);
        assert!(second.files.is_empty());
    }

    #[tokio::test]
    async fn upload_only_uploads_new_and_skips_known_file() {
        let server = MockServer::start().await;
        mount_listing(&server, serde_json::json!([])).await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(body_string_contains("filename=\"a.py\""))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 1, "name": "a.py", "extension": ".py"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), b"new").unwrap();
        let known = dir.path().join("b.jpg");
        std::fs::write(&known, b"already synced").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut engine = make_engine(&server, dir.path());
        let fp = fingerprint(&known).await;
        engine.detector.record_synced("b.jpg", fp);

        let result = engine.upload_only().await;
        assert_eq!(result.uploaded, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.errors, 0);
        assert_eq!(result.files, vec!["✅ Uploaded: a.py".to_string()]);
    }

    #[tokio::test]
    async fn upload_only_counts_failures_and_does_not_record_them() {
        let server = MockServer::start().await;
        mount_listing(&server, serde_json::json!([])).await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "msg": "Token has expired"
            })))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), b"a").unwrap();
        std::fs::write(dir.path().join("b.py"), b"b").unwrap();

        let mut engine = make_engine(&server, dir.path());
        let result = engine.upload_only().await;
        assert_eq!(result.uploaded + result.errors, 2);
        assert_eq!(result.errors, 2);
        assert_eq!(result.skipped, 0);
        assert!(result.files.iter().all(|line| line.starts_with("❌")));
        assert!(engine.detector.is_empty());

        // Nothing was recorded, so the next pass tries again.
        let retry = engine.upload_only().await;
        assert_eq!(retry.errors, 2);
    }

    #[tokio::test]
    async fn upload_only_uploads_even_when_remote_has_same_name() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            serde_json::json!([
                {"id": 9, "name": "a.py", "extension": ".py", "updated_at": "2999-01-01T00:00:00Z"}
            ]),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 10, "name": "a.py", "extension": ".py"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), b"local edit").unwrap();

        let mut engine = make_engine(&server, dir.path());
        assert_eq!(engine.upload_only().await.uploaded, 1);
    }

    #[tokio::test]
    async fn upload_only_proceeds_when_listing_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        mount_upload_ok(&server).await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), b"a").unwrap();

        let mut engine = make_engine(&server, dir.path());
        let result = engine.upload_only().await;
        assert_eq!(result.uploaded, 1);
        assert_eq!(result.errors, 0);
    }

    #[tokio::test]
    async fn upload_only_reuploads_after_content_change() {
        let server = MockServer::start().await;
        mount_listing(&server, serde_json::json!([])).await;
        mount_upload_ok(&server).await;

        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, b"v1").unwrap();

        let mut engine = make_engine(&server, dir.path());
        assert_eq!(engine.upload_only().await.uploaded, 1);
        std::fs::write(&file, b"v2").unwrap();
        let result = engine.upload_only().await;
        assert_eq!(result.uploaded, 1);
        assert_eq!(result.skipped, 0);
    }

    #[tokio::test]
    async fn download_only_fetches_missing_file_into_new_folder() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            serde_json::json!([
                {"id": 1, "name": "x.py", "extension": ".py", "updated_at": "2024-01-01T00:00:00Z"}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/files/1/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"print('x')".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let folder = dir.path().join("created/on/demand");
        let mut engine = make_engine(&server, &folder);
        let result = engine.download_only().await;

        assert_eq!(result.downloaded, 1);
        assert_eq!(result.errors, 0);
        assert_eq!(result.files, vec!["✅ Downloaded: x.py".to_string()]);
        assert_eq!(std::fs::read(folder.join("x.py")).unwrap(), b"print('x')");
    }

    #[tokio::test]
    async fn download_only_skips_local_file_at_or_after_remote_timestamp() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            serde_json::json!([
                {"id": 1, "name": "same.py", "extension": ".py", "updated_at": "2024-01-01T00:00:00Z"},
                {"id": 2, "name": "newer.py", "extension": ".py", "updated_at": "2024-01-01T00:00:00Z"}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/files/1/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote".to_vec()))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/2/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let remote_time: SystemTime = datetime!(2024-01-01 0:00 UTC).into();
        let same = dir.path().join("same.py");
        std::fs::write(&same, b"local").unwrap();
        set_mtime(&same, remote_time);
        let newer = dir.path().join("newer.py");
        std::fs::write(&newer, b"local").unwrap();
        set_mtime(&newer, remote_time + Duration::from_secs(3600));

        let mut engine = make_engine(&server, dir.path());
        let result = engine.download_only().await;
        assert_eq!(result.skipped, 2);
        assert_eq!(result.downloaded, 0);
        assert_eq!(std::fs::read(&same).unwrap(), b"local");
    }

    #[tokio::test]
    async fn download_only_replaces_older_local_file_and_fails_open_on_bad_timestamp() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            serde_json::json!([
                {"id": 1, "name": "old.py", "extension": ".py", "updated_at": "2024-06-01T00:00:00Z"},
                {"id": 2, "name": "odd.py", "extension": ".py", "updated_at": "not a time"}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/files/1/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote-1".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/2/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote-2".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let old = dir.path().join("old.py");
        std::fs::write(&old, b"local").unwrap();
        set_mtime(&old, datetime!(2024-01-01 0:00 UTC).into());
        std::fs::write(dir.path().join("odd.py"), b"local").unwrap();

        let mut engine = make_engine(&server, dir.path());
        let result = engine.download_only().await;
        assert_eq!(result.downloaded, 2);
        assert_eq!(result.skipped, 0);
        assert_eq!(std::fs::read(&old).unwrap(), b"remote-1");
        assert_eq!(std::fs::read(dir.path().join("odd.py")).unwrap(), b"remote-2");
    }

    #[tokio::test]
    async fn download_only_counts_each_failure_and_continues() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            serde_json::json!([
                {"id": 1, "name": "a.py", "extension": ".py"},
                {"id": 2, "name": "b.py", "extension": ".py"},
                {"id": 3, "name": "../escape.py", "extension": ".py"}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/files/1/download"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/2/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"b".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let mut engine = make_engine(&server, dir.path());
        let result = engine.download_only().await;
        assert_eq!(result.downloaded + result.errors, 3);
        assert_eq!(result.downloaded, 1);
        assert_eq!(result.errors, 2);
        assert!(!dir.path().join("a.py").exists());
        assert!(!dir.path().parent().unwrap().join("escape.py").exists());
    }

    #[tokio::test]
    async fn download_only_with_failed_listing_is_a_no_op() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let mut engine = make_engine(&server, dir.path());
        assert_eq!(engine.download_only().await, SyncResult::default());
    }

    #[tokio::test]
    async fn bidirectional_downloads_then_reuploads_on_fresh_engine() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            serde_json::json!([
                {"id": 1, "name": "x.py", "extension": ".py", "updated_at": "2024-01-01T00:00:00Z"}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/files/1/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .mount(&server)
            .await;
        mount_upload_ok(&server).await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("local.jpg"), b"jpeg").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut engine = make_engine(&server, dir.path());
        let result = engine.bidirectional().await;
        assert_eq!(result.downloaded, 1);
        assert_eq!(result.uploaded, 2);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.errors, 0);
        assert_eq!(
            result.files,
            vec![
                "✅ Downloaded: x.py".to_string(),
                "✅ Uploaded: local.jpg".to_string(),
                "✅ Uploaded: x.py".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn bidirectional_equals_download_then_upload_in_sequence() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            serde_json::json!([
                {"id": 1, "name": "x.py", "extension": ".py", "updated_at": "2024-01-01T00:00:00Z"}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/files/1/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .mount(&server)
            .await;
        mount_upload_ok(&server).await;

        let combined_dir = tempdir().unwrap();
        std::fs::write(combined_dir.path().join("a.py"), b"a").unwrap();
        let mut combined = make_engine(&server, combined_dir.path());
        let together = combined.bidirectional().await;

        let split_dir = tempdir().unwrap();
        std::fs::write(split_dir.path().join("a.py"), b"a").unwrap();
        let mut split = make_engine(&server, split_dir.path());
        let mut sequential = split.download_only().await;
        sequential.merge(split.upload_only().await);

        assert_eq!(together, sequential);
    }

    #[tokio::test]
    async fn sync_once_dispatches_by_mode() {
        let server = MockServer::start().await;
        mount_listing(&server, serde_json::json!([])).await;
        mount_upload_ok(&server).await;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), b"a").unwrap();

        let mut engine = make_engine(&server, dir.path());
        let down = engine.sync_once(SyncMode::DownloadOnly).await;
        assert_eq!(down, SyncResult::default());
        let up = engine.sync_once(SyncMode::UploadOnly).await;
        assert_eq!(up.uploaded, 1);
    }
}
