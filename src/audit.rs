/// Audit logging for rule store mutations
///
/// Every successful or failed change to the policy list, the NAT list, the address
/// sets or the whole configuration (import) is recorded as one JSON line.
use crate::api::{ApiRequest, ApiResponse, Method};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Create,
    Replace,
    Delete,
    Import,
    IpsetPut,
    IpsetDelete,
}

impl EventType {
    /// The event a request would produce, or `None` for reads.
    pub fn for_request(request: &ApiRequest) -> Option<Self> {
        let resource = request
            .route()
            .split('/')
            .find(|segment| !segment.is_empty())?;

        match (request.method, resource) {
            (Method::Post, "policies" | "nat") => Some(EventType::Create),
            (Method::Put, "policies" | "nat") => Some(EventType::Replace),
            (Method::Delete, "policies" | "nat") => Some(EventType::Delete),
            (Method::Post, "import") => Some(EventType::Import),
            (Method::Put, "ipsets") => Some(EventType::IpsetPut),
            (Method::Delete, "ipsets") => Some(EventType::IpsetDelete),
            _ => None,
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }

    /// Event describing a dispatched mutation, or `None` if the request was a read.
    pub fn for_exchange(request: &ApiRequest, response: &ApiResponse) -> Option<Self> {
        let event_type = EventType::for_request(request)?;
        let error = if response.is_success() {
            None
        } else {
            response
                .body
                .as_ref()
                .and_then(|body| body.get("message"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        let created_id = response
            .body
            .as_ref()
            .and_then(|body| body.get("id"))
            .and_then(serde_json::Value::as_u64);

        Some(Self::new(
            event_type,
            response.is_success(),
            serde_json::json!({
                "method": request.method.as_ref(),
                "path": request.route(),
                "before": request.query.get("before"),
                "status": response.status,
                "id": created_id,
                "version": response.version,
            }),
            error,
        ))
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates a new audit log instance in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Audit log writing to an explicit file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    /// Returns the path to the audit log file
    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Records a dispatched mutation. Reads are ignored; write failures are logged and
/// otherwise swallowed so auditing never fails the operation itself.
pub async fn log_exchange(audit: &AuditLog, request: &ApiRequest, response: &ApiResponse) {
    let Some(event) = AuditEvent::for_exchange(request, response) else {
        return;
    };

    if let Err(e) = audit.log(event).await {
        tracing::warn!("Failed to write audit log: {}", e);
    }
}
