use std::sync::mpsc::Sender;

use chrono::Utc;
use heater_bridge_common::{MaintenanceEvent, OtaError};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const OTA_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Default)]
pub struct OtaRuntimeState {
    in_progress: bool,
    bytes_written: u64,
    total_bytes: Option<u64>,
    progress_pct: Option<u8>,
    last_error: Option<String>,
    last_sha256: Option<String>,
    last_source: Option<String>,
    last_completed_epoch: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OtaStatusResponse {
    pub supported: bool,
    #[serde(rename = "inProgress")]
    pub in_progress: bool,
    #[serde(rename = "bytesWritten")]
    pub bytes_written: u64,
    #[serde(rename = "totalBytes")]
    pub total_bytes: Option<u64>,
    #[serde(rename = "progressPct")]
    pub progress_pct: Option<u8>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
    #[serde(rename = "lastSha256")]
    pub last_sha256: Option<String>,
    #[serde(rename = "lastSource")]
    pub last_source: Option<String>,
    #[serde(rename = "lastCompletedEpoch")]
    pub last_completed_epoch: Option<i64>,
}

#[cfg(feature = "esp32")]
#[derive(Debug, Serialize)]
pub struct OtaApplyResponse {
    pub accepted: bool,
    #[serde(rename = "inProgress")]
    pub in_progress: bool,
}

impl OtaRuntimeState {
    /// Claims the updater. Fails if another update is still running.
    pub fn start(
        &mut self,
        source: String,
        total_bytes: Option<u64>,
    ) -> Result<(), &'static str> {
        if self.in_progress {
            return Err("OTA update already in progress");
        }

        *self = Self {
            in_progress: true,
            total_bytes,
            last_source: Some(source),
            last_completed_epoch: self.last_completed_epoch,
            ..Self::default()
        };
        Ok(())
    }

    #[cfg(feature = "esp32")]
    pub fn set_total(&mut self, total_bytes: Option<u64>) {
        self.total_bytes = total_bytes;
    }

    /// Records progress and returns the new percentage when it changed.
    pub fn record_written(&mut self, bytes_written: u64) -> Option<u8> {
        self.bytes_written = bytes_written;
        let total = self.total_bytes.filter(|total| *total > 0)?;
        let pct = (bytes_written.saturating_mul(100) / total).min(100) as u8;
        if self.progress_pct == Some(pct) {
            return None;
        }
        self.progress_pct = Some(pct);
        Some(pct)
    }

    pub fn finish(&mut self, bytes_written: u64, digest_hex: String) {
        self.in_progress = false;
        self.bytes_written = bytes_written;
        self.progress_pct = Some(100);
        self.last_error = None;
        self.last_sha256 = Some(digest_hex);
        self.last_completed_epoch = Some(Utc::now().timestamp());
    }

    pub fn fail(&mut self, message: String) {
        self.in_progress = false;
        self.last_error = Some(message);
        self.last_completed_epoch = Some(Utc::now().timestamp());
    }

    pub fn status(&self) -> OtaStatusResponse {
        OtaStatusResponse {
            supported: true,
            in_progress: self.in_progress,
            bytes_written: self.bytes_written,
            total_bytes: self.total_bytes,
            progress_pct: self.progress_pct,
            last_error: self.last_error.clone(),
            last_sha256: self.last_sha256.clone(),
            last_source: self.last_source.clone(),
            last_completed_epoch: self.last_completed_epoch,
        }
    }
}

/// An update failure tagged with the stage it happened in.
#[derive(Debug)]
pub struct OtaFailure {
    pub stage: OtaError,
    pub source: anyhow::Error,
}

impl OtaFailure {
    pub fn new(stage: OtaError, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    pub fn at<E: core::fmt::Debug>(
        stage: OtaError,
        what: &'static str,
    ) -> impl FnOnce(E) -> Self {
        move |err| Self::new(stage, anyhow::anyhow!("{what}: {err:?}"))
    }
}

impl core::fmt::Display for OtaFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#} (ota error {})", self.source, self.stage.code())
    }
}

/// An empty configured password disables the check.
pub fn password_matches(expected: &str, supplied: Option<&str>) -> bool {
    expected.is_empty() || supplied.unwrap_or_default() == expected
}

pub fn normalize_sha256(raw: &str) -> Result<String, &'static str> {
    let value = raw.trim();
    if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("sha256 must be 64 hex characters");
    }
    Ok(value.to_ascii_lowercase())
}

#[cfg(any(feature = "esp32", test))]
pub fn validate_source_url(url: &str) -> Result<(), &'static str> {
    let url = url.trim();
    if url.is_empty() {
        return Err("url cannot be empty");
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err("url must start with http:// or https://");
    }
    Ok(())
}

/// Streaming SHA-256 over an incoming image.
#[derive(Default)]
pub struct ImageDigest {
    hasher: Sha256,
    len: u64,
}

impl ImageDigest {
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len = self.len.saturating_add(chunk.len() as u64);
    }

    pub fn bytes(&self) -> u64 {
        self.len
    }

    /// Finishes the digest and compares it against `expected` if given.
    pub fn verify(self, expected: Option<&str>) -> Result<String, OtaFailure> {
        if self.len == 0 {
            return Err(OtaFailure::new(
                OtaError::Receive,
                anyhow::anyhow!("OTA image is empty"),
            ));
        }

        let digest_hex = hex(&self.hasher.finalize());
        if let Some(expected) = expected {
            if digest_hex != expected {
                return Err(OtaFailure::new(
                    OtaError::End,
                    anyhow::anyhow!("sha256 mismatch (expected {expected}, got {digest_hex})"),
                ));
            }
        }
        Ok(digest_hex)
    }
}

fn hex(bytes: &[u8]) -> String {
    use core::fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// Maintenance event sender that never fails: a dropped receiver just means
/// nobody is listening anymore.
#[derive(Clone)]
pub struct EventSink(pub Sender<MaintenanceEvent>);

impl EventSink {
    pub fn emit(&self, event: MaintenanceEvent) {
        let _ = self.0.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn password_check() {
        assert!(password_matches("", None));
        assert!(password_matches("", Some("anything")));
        assert!(password_matches("hunter2", Some("hunter2")));
        assert!(!password_matches("hunter2", Some("hunter3")));
        assert!(!password_matches("hunter2", None));
    }

    #[test]
    fn sha256_is_normalized() {
        let upper = ABC_SHA256.to_ascii_uppercase();
        assert_eq!(normalize_sha256(&format!(" {upper} ")).unwrap(), ABC_SHA256);
        assert!(normalize_sha256("abc").is_err());
        assert!(normalize_sha256(&"z".repeat(64)).is_err());
    }

    #[test]
    fn source_url_must_be_http() {
        assert!(validate_source_url("http://10.0.0.2/fw.bin").is_ok());
        assert!(validate_source_url("https://example.org/fw.bin").is_ok());
        assert!(validate_source_url("ftp://example.org/fw.bin").is_err());
        assert!(validate_source_url("  ").is_err());
    }

    #[test]
    fn digest_verifies_chunked_input() {
        let mut digest = ImageDigest::default();
        digest.update(b"a");
        digest.update(b"bc");
        assert_eq!(digest.bytes(), 3);
        assert_eq!(digest.verify(Some(ABC_SHA256)).unwrap(), ABC_SHA256);
    }

    #[test]
    fn digest_mismatch_and_empty_image_fail_in_their_stage() {
        let mut digest = ImageDigest::default();
        digest.update(b"abd");
        assert_eq!(digest.verify(Some(ABC_SHA256)).unwrap_err().stage, OtaError::End);

        let empty = ImageDigest::default().verify(None).unwrap_err();
        assert_eq!(empty.stage, OtaError::Receive);
    }

    #[test]
    fn progress_reports_only_changes() {
        let mut state = OtaRuntimeState::default();
        state.start("upload".into(), Some(1000)).unwrap();
        assert!(state.start("upload".into(), None).is_err());

        assert_eq!(state.record_written(100), Some(10));
        assert_eq!(state.record_written(105), None);
        assert_eq!(state.record_written(1000), Some(100));

        state.finish(1000, ABC_SHA256.into());
        let status = state.status();
        assert!(!status.in_progress);
        assert_eq!(status.last_sha256.as_deref(), Some(ABC_SHA256));
        assert!(status.last_completed_epoch.is_some());

        assert!(state.start("again".into(), None).is_ok());
        assert_eq!(state.status().last_sha256, None);
    }

    #[test]
    fn unknown_total_reports_no_percentage() {
        let mut state = OtaRuntimeState::default();
        state.start("url".into(), None).unwrap();
        assert_eq!(state.record_written(4096), None);
        assert_eq!(state.status().bytes_written, 4096);
    }
}
