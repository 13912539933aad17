// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only intake session store.
//!
//! A session records what the operator said, what they uploaded, what the
//! extraction provider returned, and which overrides they claimed — enough
//! to audit any run years later. Mutations always write a fresh canonical
//! file by atomic replace; the extraction result is write-once and attempts
//! to overwrite it fail with `INTAKE_IMMUTABLE_VIOLATION`.
//!
//! Writes for one session are serialised through an in-process per-session
//! mutex registry. Cross-process callers are expected to route a session's
//! traffic through one process.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use irp_config::RawStorageLevel;
use irp_core::sha256_hex;
use irp_error::{ErrorCode, PipelineError, PipelineResult};
use irp_policy::OverrideInput;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Conventional session file name inside a job directory's `inputs/`.
pub const SESSION_FILE_NAME: &str = "intake_session.json";

// ---------------------------------------------------------------------------
// Session types
// ---------------------------------------------------------------------------

/// One chat message collected during intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeMessage {
    /// Who spoke (`operator`, `assistant`, ...).
    pub role: String,
    /// Message text.
    pub text: String,
    /// When the message was recorded.
    pub at: DateTime<Utc>,
}

/// One uploaded file, already stored under `photos/raw/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Filename as declared by the uploader.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Where the bytes landed, relative to the job directory.
    pub stored_path: String,
    /// When the upload was recorded.
    pub at: DateTime<Utc>,
}

/// Identity of the extraction provider and the models involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Provider name (e.g. a vendor identifier).
    pub provider: String,
    /// Model the caller asked for.
    pub requested_model: String,
    /// Model the provider reports having served, when it differs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_model: Option<String>,
    /// Provider-side request identifier, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Call parameters sent to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallParameters {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Output token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Prompt audit: template identity and user variables are kept apart so the
/// user content can be redacted without losing the template identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptAudit {
    /// Prompt template identifier.
    pub template_id: String,
    /// Prompt template version.
    pub template_version: String,
    /// User-supplied variables substituted into the template.
    pub variables: BTreeMap<String, String>,
    /// The fully rendered prompt (redactable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<String>,
    /// SHA-256 of the rendered prompt.
    pub prompt_sha256: String,
}

/// Raw-response audit, shaped by the configured [`RawStorageLevel`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseAudit {
    /// The raw response text, possibly truncated, at `full` level only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Whether `raw` was truncated to the configured cap.
    pub truncated: bool,
    /// SHA-256 of the complete (pre-truncation) response, absent at `none`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_sha256: Option<String>,
}

/// The immutable extraction result of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    /// Provider and model identity.
    pub provider: ProviderIdentity,
    /// Call parameters.
    pub parameters: CallParameters,
    /// Prompt audit.
    pub prompt: PromptAudit,
    /// Response audit.
    pub response: ResponseAudit,
    /// Extracted raw field values, keyed as the provider returned them.
    pub fields: BTreeMap<String, String>,
    /// When the extraction was recorded.
    pub at: DateTime<Utc>,
}

/// What an extraction adapter hands the store before audit shaping.
#[derive(Debug, Clone)]
pub struct ExtractionDraft {
    /// Provider and model identity.
    pub provider: ProviderIdentity,
    /// Call parameters.
    pub parameters: CallParameters,
    /// Prompt template identifier.
    pub template_id: String,
    /// Prompt template version.
    pub template_version: String,
    /// User-supplied variables.
    pub variables: BTreeMap<String, String>,
    /// The fully rendered prompt.
    pub rendered_prompt: String,
    /// The provider's raw response, when one was captured.
    pub raw_response: Option<String>,
    /// Extracted raw field values.
    pub fields: BTreeMap<String, String>,
}

/// The full session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeSession {
    /// Session identifier.
    pub session_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Chat transcript, append-only.
    pub messages: Vec<IntakeMessage>,
    /// Uploads, append-only.
    pub uploads: Vec<UploadRecord>,
    /// Extraction result, write-once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionRecord>,
    /// Operator-claimed overrides keyed by field or slot.
    #[serde(default)]
    pub overrides: BTreeMap<String, OverrideInput>,
}

impl IntakeSession {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            messages: Vec::new(),
            uploads: Vec::new(),
            extraction: None,
            overrides: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter seam
// ---------------------------------------------------------------------------

/// Adapter interface to the field-extraction provider.
///
/// The host decides whether implementations block or delegate to a worker;
/// the pipeline only ever calls this before taking the job-directory lock.
pub trait FieldExtractor {
    /// Run extraction over the session's transcript and uploads.
    ///
    /// # Errors
    ///
    /// Provider transport and parse failures surface as `anyhow` errors.
    fn extract(
        &self,
        messages: &[IntakeMessage],
        uploads: &[UploadRecord],
    ) -> anyhow::Result<ExtractionDraft>;
}

/// Canned extractor for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct MockFieldExtractor {
    /// Field values to return.
    pub fields: BTreeMap<String, String>,
}

impl FieldExtractor for MockFieldExtractor {
    fn extract(
        &self,
        _messages: &[IntakeMessage],
        _uploads: &[UploadRecord],
    ) -> anyhow::Result<ExtractionDraft> {
        Ok(ExtractionDraft {
            provider: ProviderIdentity {
                provider: "mock".into(),
                requested_model: "mock-extractor".into(),
                served_model: Some("mock-extractor".into()),
                request_id: None,
            },
            parameters: CallParameters::default(),
            template_id: "mock-template".into(),
            template_version: "0".into(),
            variables: BTreeMap::new(),
            rendered_prompt: String::new(),
            raw_response: Some(serde_json::to_string(&self.fields)?),
            fields: self.fields.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// File-backed session store for one job directory's `inputs/`.
pub struct SessionStore {
    inputs_dir: PathBuf,
    raw_level: RawStorageLevel,
    max_raw_bytes: usize,
    registry: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    /// Create a store rooted at `inputs_dir`.
    pub fn new(inputs_dir: impl Into<PathBuf>, raw_level: RawStorageLevel, max_raw_bytes: usize) -> Self {
        Self {
            inputs_dir: inputs_dir.into(),
            raw_level,
            max_raw_bytes,
            registry: Mutex::new(BTreeMap::new()),
        }
    }

    /// Path of the session file.
    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.inputs_dir.join(SESSION_FILE_NAME)
    }

    /// Load the session, creating an empty one on first touch.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] on unreadable or corrupt session files.
    pub fn open_or_create(&self, session_id: &str) -> PipelineResult<IntakeSession> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(IntakeSession::new(session_id));
        }
        self.load()
    }

    /// Load the session from disk.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] on unreadable or corrupt session files.
    pub fn load(&self) -> PipelineResult<IntakeSession> {
        let path = self.session_path();
        let bytes = std::fs::read(&path)
            .map_err(|e| PipelineError::io(format!("read {}", path.display()), &e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::new(ErrorCode::Io, format!("corrupt session at {}: {e}", path.display()))
        })
    }

    /// Append a chat message.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] on filesystem failures.
    pub fn append_message(
        &self,
        session_id: &str,
        role: &str,
        text: &str,
    ) -> PipelineResult<IntakeSession> {
        self.mutate(session_id, |session| {
            session.messages.push(IntakeMessage {
                role: role.to_string(),
                text: text.to_string(),
                at: Utc::now(),
            });
            Ok(())
        })
    }

    /// Record an upload that has landed under `photos/raw/`.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] on filesystem failures.
    pub fn record_upload(
        &self,
        session_id: &str,
        name: &str,
        size: u64,
        stored_path: &Path,
    ) -> PipelineResult<IntakeSession> {
        self.mutate(session_id, |session| {
            session.uploads.push(UploadRecord {
                name: name.to_string(),
                size,
                stored_path: stored_path.display().to_string(),
                at: Utc::now(),
            });
            Ok(())
        })
    }

    /// Record the extraction result. Write-once.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::IntakeImmutableViolation`] when an extraction result
    /// already exists; [`ErrorCode::Io`] on filesystem failures.
    pub fn record_extraction(
        &self,
        session_id: &str,
        draft: ExtractionDraft,
    ) -> PipelineResult<IntakeSession> {
        let record = self.shape_record(draft);
        self.mutate(session_id, move |session| {
            if session.extraction.is_some() {
                return Err(PipelineError::new(
                    ErrorCode::IntakeImmutableViolation,
                    "session already carries an extraction result",
                )
                .with_context("session_id", session.session_id.clone()));
            }
            session.extraction = Some(record);
            Ok(())
        })
    }

    /// Record or replace an operator override claim.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] on filesystem failures.
    pub fn set_override(
        &self,
        session_id: &str,
        key: &str,
        input: OverrideInput,
    ) -> PipelineResult<IntakeSession> {
        self.mutate(session_id, |session| {
            session.overrides.insert(key.to_string(), input);
            Ok(())
        })
    }

    /// Shape a draft into an audit record per the configured raw level.
    fn shape_record(&self, draft: ExtractionDraft) -> ExtractionRecord {
        let response = match (self.raw_level, draft.raw_response) {
            (RawStorageLevel::None, _) | (_, None) => ResponseAudit::default(),
            (RawStorageLevel::Minimal, Some(raw)) => ResponseAudit {
                raw: None,
                truncated: false,
                response_sha256: Some(sha256_hex(raw.as_bytes())),
            },
            (RawStorageLevel::Full, Some(raw)) => {
                // Hash covers the complete response; the stored text may be cut.
                let hash = sha256_hex(raw.as_bytes());
                let (stored, truncated) = truncate_utf8(&raw, self.max_raw_bytes);
                ResponseAudit {
                    raw: Some(stored),
                    truncated,
                    response_sha256: Some(hash),
                }
            }
        };

        ExtractionRecord {
            provider: draft.provider,
            parameters: draft.parameters,
            prompt: PromptAudit {
                template_id: draft.template_id,
                template_version: draft.template_version,
                variables: draft.variables,
                prompt_sha256: sha256_hex(draft.rendered_prompt.as_bytes()),
                rendered: Some(draft.rendered_prompt),
            },
            response,
            fields: draft.fields,
            at: Utc::now(),
        }
    }

    fn mutate(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut IntakeSession) -> PipelineResult<()>,
    ) -> PipelineResult<IntakeSession> {
        let guard = self.session_lock(session_id);
        let _held = guard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut session = self.open_or_create(session_id)?;
        f(&mut session)?;
        self.write_atomic(&session)?;
        debug!(target: "irp.intake", session_id, "session updated");
        Ok(session)
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        registry
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn write_atomic(&self, session: &IntakeSession) -> PipelineResult<()> {
        std::fs::create_dir_all(&self.inputs_dir)
            .map_err(|e| PipelineError::io(format!("create {}", self.inputs_dir.display()), &e))?;
        let json = serde_json::to_vec_pretty(session)
            .map_err(|e| PipelineError::new(ErrorCode::Internal, format!("serialize session: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.inputs_dir)
            .map_err(|e| PipelineError::io("create session temp file", &e))?;
        tmp.write_all(&json)
            .map_err(|e| PipelineError::io("write session temp file", &e))?;
        tmp.persist(self.session_path())
            .map_err(|e| PipelineError::io("replace session file", &e.error))?;
        Ok(())
    }
}

/// Cut a string to at most `max_bytes` on a char boundary.
fn truncate_utf8(s: &str, max_bytes: usize) -> (String, bool) {
    if s.len() <= max_bytes {
        return (s.to_string(), false);
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    (s[..cut].to_string(), true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
