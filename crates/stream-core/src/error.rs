//! Error taxonomy for the stream configuration layer.
//!
//! Lower layers return typed errors (`ProbeError`, `StoreError`).  Everything
//! that reaches an admin or a player is folded into a `RadioError`, which
//! carries a fixed severity, HTTP status, localized user message and a list
//! of recovery actions per `RadioErrorKind`.  `RadioErrorHandler` is the only
//! place that builds them.

use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::probe::ProbeError;
use crate::store::StoreError;

// ── Kinds ─────────────────────────────────────────────────────────────────────

/// Closed set of error kinds.  Wire names are SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RadioErrorKind {
    // network
    NetworkTimeout,
    NetworkConnectionFailed,
    NetworkUnreachable,
    // validation
    InvalidUrl,
    InvalidProtocol,
    InvalidHostname,
    UrlTooLong,
    UnsupportedFormat,
    // stream
    StreamConnectionTimeout,
    StreamConnectionRefused,
    StreamInvalidResponse,
    StreamUnsupportedContentType,
    StreamServerError,
    StreamNotFound,
    StreamNoFallbackAvailable,
    FailoverFailed,
    HealthCheckFailed,
    // database
    DatabaseConnectionError,
    DatabaseQueryFailed,
    DatabaseConstraintViolation,
    DatabaseTransactionFailed,
    DatabaseNotFound,
    // form
    FormValidationError,
    RequiredFieldMissing,
    InvalidFormat,
    // auth
    InsufficientPermissions,
    SessionExpired,
    InvalidUser,
    // misc
    RateLimitExceeded,
    ConfigurationError,
    UnknownError,
    InternalServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl RadioErrorKind {
    /// Wire name, e.g. `NETWORK_CONNECTION_FAILED`.
    pub fn as_str(&self) -> &'static str {
        use RadioErrorKind::*;
        match self {
            NetworkTimeout => "NETWORK_TIMEOUT",
            NetworkConnectionFailed => "NETWORK_CONNECTION_FAILED",
            NetworkUnreachable => "NETWORK_UNREACHABLE",
            InvalidUrl => "INVALID_URL",
            InvalidProtocol => "INVALID_PROTOCOL",
            InvalidHostname => "INVALID_HOSTNAME",
            UrlTooLong => "URL_TOO_LONG",
            UnsupportedFormat => "UNSUPPORTED_FORMAT",
            StreamConnectionTimeout => "STREAM_CONNECTION_TIMEOUT",
            StreamConnectionRefused => "STREAM_CONNECTION_REFUSED",
            StreamInvalidResponse => "STREAM_INVALID_RESPONSE",
            StreamUnsupportedContentType => "STREAM_UNSUPPORTED_CONTENT_TYPE",
            StreamServerError => "STREAM_SERVER_ERROR",
            StreamNotFound => "STREAM_NOT_FOUND",
            StreamNoFallbackAvailable => "STREAM_NO_FALLBACK_AVAILABLE",
            FailoverFailed => "FAILOVER_FAILED",
            HealthCheckFailed => "HEALTH_CHECK_FAILED",
            DatabaseConnectionError => "DATABASE_CONNECTION_ERROR",
            DatabaseQueryFailed => "DATABASE_QUERY_FAILED",
            DatabaseConstraintViolation => "DATABASE_CONSTRAINT_VIOLATION",
            DatabaseTransactionFailed => "DATABASE_TRANSACTION_FAILED",
            DatabaseNotFound => "DATABASE_NOT_FOUND",
            FormValidationError => "FORM_VALIDATION_ERROR",
            RequiredFieldMissing => "REQUIRED_FIELD_MISSING",
            InvalidFormat => "INVALID_FORMAT",
            InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            SessionExpired => "SESSION_EXPIRED",
            InvalidUser => "INVALID_USER",
            RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ConfigurationError => "CONFIGURATION_ERROR",
            UnknownError => "UNKNOWN_ERROR",
            InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Localized (Turkish) message shown to admins and listeners.
    pub fn user_message(&self) -> &'static str {
        use RadioErrorKind::*;
        match self {
            NetworkTimeout => "Bağlantı zaman aşımına uğradı. Lütfen tekrar deneyin.",
            NetworkConnectionFailed => "Sunucuya bağlanılamadı. İnternet bağlantınızı kontrol edin.",
            NetworkUnreachable => "Sunucuya şu anda ulaşılamıyor.",
            InvalidUrl => "Geçersiz URL formatı.",
            InvalidProtocol => "Yalnızca HTTP ve HTTPS protokolleri desteklenir.",
            InvalidHostname => "Geçersiz sunucu adı.",
            UrlTooLong => "URL çok uzun (en fazla 2048 karakter).",
            UnsupportedFormat => "Bu yayın formatı desteklenmiyor.",
            StreamConnectionTimeout => "Yayın sunucusu zamanında yanıt vermedi.",
            StreamConnectionRefused => "Yayın sunucusu bağlantıyı reddetti.",
            StreamInvalidResponse => "Yayın sunucusundan geçersiz yanıt alındı.",
            StreamUnsupportedContentType => "Yayının içerik türü desteklenmiyor.",
            StreamServerError => "Yayın sunucusunda bir hata oluştu.",
            StreamNotFound => "Yayın adresi bulunamadı.",
            StreamNoFallbackAvailable => "Çalışan bir yedek yayın adresi bulunamadı.",
            FailoverFailed => "Yedek yayına geçiş başarısız oldu.",
            HealthCheckFailed => "Yayın sağlık kontrolü tamamlanamadı.",
            DatabaseConnectionError => "Veritabanına bağlanılamadı.",
            DatabaseQueryFailed => "Veritabanı işlemi başarısız oldu.",
            DatabaseConstraintViolation => "Bu kayıt mevcut bir kayıtla çakışıyor.",
            DatabaseTransactionFailed => "Değişiklikler kaydedilemedi, işlem geri alındı.",
            DatabaseNotFound => "Kayıt bulunamadı.",
            FormValidationError => "Form bilgileri geçersiz.",
            RequiredFieldMissing => "Zorunlu alanlar doldurulmalıdır.",
            InvalidFormat => "Girilen değerin formatı geçersiz.",
            InsufficientPermissions => "Bu işlem için yetkiniz bulunmuyor.",
            SessionExpired => "Oturumunuzun süresi doldu. Lütfen tekrar giriş yapın.",
            InvalidUser => "Geçersiz kullanıcı.",
            RateLimitExceeded => "Çok fazla istek gönderildi. Lütfen biraz bekleyin.",
            ConfigurationError => "Yapılandırma hatası.",
            UnknownError => "Beklenmeyen bir hata oluştu.",
            InternalServerError => "Sunucu hatası oluştu. Lütfen daha sonra tekrar deneyin.",
        }
    }

    pub fn severity(&self) -> Severity {
        use RadioErrorKind::*;
        match self {
            InvalidUrl | InvalidProtocol | InvalidHostname | UrlTooLong | UnsupportedFormat => {
                Severity::Low
            }
            FormValidationError | RequiredFieldMissing | InvalidFormat => Severity::Low,
            SessionExpired | DatabaseNotFound => Severity::Low,

            NetworkTimeout
            | StreamConnectionTimeout
            | StreamInvalidResponse
            | StreamUnsupportedContentType
            | StreamNotFound
            | DatabaseConstraintViolation
            | InsufficientPermissions
            | InvalidUser
            | RateLimitExceeded
            | UnknownError => Severity::Medium,

            NetworkConnectionFailed
            | NetworkUnreachable
            | StreamConnectionRefused
            | StreamServerError
            | HealthCheckFailed
            | DatabaseQueryFailed
            | DatabaseTransactionFailed
            | ConfigurationError => Severity::High,

            StreamNoFallbackAvailable
            | FailoverFailed
            | DatabaseConnectionError
            | InternalServerError => Severity::Critical,
        }
    }

    pub fn http_status(&self) -> u16 {
        use RadioErrorKind::*;
        match self {
            NetworkTimeout | StreamConnectionTimeout => 504,
            NetworkConnectionFailed
            | StreamConnectionRefused
            | StreamInvalidResponse
            | StreamServerError => 502,
            NetworkUnreachable
            | StreamNoFallbackAvailable
            | FailoverFailed
            | DatabaseConnectionError => 503,
            InvalidUrl | InvalidProtocol | InvalidHostname | UrlTooLong | UnsupportedFormat => 400,
            RequiredFieldMissing | InvalidFormat => 400,
            FormValidationError => 422,
            StreamUnsupportedContentType => 415,
            StreamNotFound | DatabaseNotFound => 404,
            DatabaseConstraintViolation => 409,
            InsufficientPermissions => 403,
            SessionExpired | InvalidUser => 401,
            RateLimitExceeded => 429,
            HealthCheckFailed
            | DatabaseQueryFailed
            | DatabaseTransactionFailed
            | ConfigurationError
            | UnknownError
            | InternalServerError => 500,
        }
    }

    pub fn recovery_actions(&self) -> &'static [&'static str] {
        use RadioErrorKind::*;
        match self {
            NetworkTimeout | StreamConnectionTimeout => &[
                "Birkaç saniye sonra tekrar deneyin",
                "Yayın sunucusunun yanıt süresini kontrol edin",
            ],
            NetworkConnectionFailed | NetworkUnreachable => &[
                "İnternet bağlantınızı kontrol edin",
                "Sunucu adresinin doğru olduğundan emin olun",
                "Bir süre sonra tekrar deneyin",
            ],
            InvalidUrl | InvalidHostname => &[
                "URL'yi kontrol edin (ör. https://yayin.ornek.com/stream)",
                "Boşluk veya geçersiz karakter olmadığından emin olun",
            ],
            InvalidProtocol => &["URL'nin http:// veya https:// ile başladığından emin olun"],
            UrlTooLong => &["Daha kısa bir yayın adresi kullanın"],
            UnsupportedFormat | StreamUnsupportedContentType => &[
                "MP3, AAC, OGG veya HLS formatında bir yayın adresi kullanın",
                "Yayın sağlayıcınızdan doğrudan ses akışı adresini isteyin",
            ],
            StreamConnectionRefused | StreamServerError | StreamInvalidResponse => &[
                "Yayın sunucusunun çalıştığından emin olun",
                "Yedek yayın adresini etkinleştirin",
            ],
            StreamNotFound => &["Yayın adresinin güncel olduğundan emin olun"],
            StreamNoFallbackAvailable | FailoverFailed => &[
                "Yedek yayın adreslerini kontrol edin",
                "Yayın sağlayıcınızla iletişime geçin",
                "Yönetim panelinden yeni bir yayın adresi tanımlayın",
            ],
            HealthCheckFailed => &["Sağlık kontrolünü manuel olarak yeniden başlatın"],
            DatabaseConnectionError => &[
                "Veritabanı bağlantısını kontrol edin",
                "Birkaç dakika sonra tekrar deneyin",
            ],
            DatabaseQueryFailed | DatabaseTransactionFailed => &[
                "İşlemi tekrar deneyin",
                "Sorun devam ederse sistem yöneticisine başvurun",
            ],
            DatabaseConstraintViolation => &["Girilen değerlerin benzersiz olduğundan emin olun"],
            DatabaseNotFound => &["Sayfayı yenileyip tekrar deneyin"],
            FormValidationError | InvalidFormat => &["Form alanlarını kontrol edip tekrar gönderin"],
            RequiredFieldMissing => &["Tüm zorunlu alanları doldurun"],
            InsufficientPermissions => &["Yetkili bir yönetici hesabıyla giriş yapın"],
            SessionExpired | InvalidUser => &["Tekrar giriş yapın"],
            RateLimitExceeded => &["Bir dakika bekleyip tekrar deneyin"],
            ConfigurationError => &["Yapılandırma dosyasını kontrol edin"],
            UnknownError | InternalServerError => &[
                "Sayfayı yenileyip tekrar deneyin",
                "Sorun devam ederse sistem yöneticisine başvurun",
            ],
        }
    }

    pub fn is_retryable(&self) -> bool {
        use RadioErrorKind::*;
        matches!(
            self,
            NetworkTimeout
                | NetworkConnectionFailed
                | NetworkUnreachable
                | StreamConnectionTimeout
                | StreamConnectionRefused
                | StreamServerError
                | StreamNoFallbackAvailable
                | FailoverFailed
                | HealthCheckFailed
                | DatabaseConnectionError
                | DatabaseTransactionFailed
                | RateLimitExceeded
                | InternalServerError
        )
    }
}

impl fmt::Display for RadioErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Category-specific details attached to an error for logging.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ErrorMetadata {
    #[default]
    None,
    Stream {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },
    Database {
        table: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Form {
        field: String,
    },
    Auth {
        #[serde(skip_serializing_if = "Option::is_none")]
        required_role: Option<String>,
    },
    RateLimit {
        retry_after_secs: u64,
    },
}

/// Caller-supplied parts of the error context.
#[derive(Debug, Clone, Default)]
pub struct ContextDetails {
    pub admin_user_id: Option<String>,
    pub admin_user_email: Option<String>,
    pub metadata: ErrorMetadata,
}

impl ContextDetails {
    pub fn with_metadata(metadata: ErrorMetadata) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn admin(user_id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            admin_user_id: Some(user_id.into()),
            admin_user_email: email,
            metadata: ErrorMetadata::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_user_email: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    #[serde(default)]
    pub metadata: ErrorMetadata,
}

// ── RadioError ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioError {
    #[serde(rename = "type")]
    pub kind: RadioErrorKind,
    pub severity: Severity,
    pub user_message: String,
    pub technical_message: String,
    pub context: ErrorContext,
    pub http_status_code: u16,
    pub recovery_actions: Vec<String>,
    pub is_retryable: bool,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} during {}: {}",
            self.kind, self.context.operation, self.technical_message
        )
    }
}

impl StdError for RadioError {}

/// JSON envelope returned to API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "type")]
    pub kind: RadioErrorKind,
    pub message: String,
    pub code: u16,
    pub details: ApiErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorDetails {
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub recovery_actions: Vec<String>,
    pub is_retryable: bool,
}

/// What a UI shows for an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDisplay {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub actions: Vec<String>,
    pub can_retry: bool,
}

/// An error coming from a library we do not control, described only by its
/// name, message and (optional) vendor code.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueError {
    pub name: String,
    pub message: String,
    pub code: Option<String>,
}

impl OpaqueError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {} ({})", self.name, self.message, code),
            None => write!(f, "{}: {}", self.name, self.message),
        }
    }
}

impl StdError for OpaqueError {}

// ── Handler ───────────────────────────────────────────────────────────────────

/// Builds, classifies and renders `RadioError`s.  Stateless.
pub struct RadioErrorHandler;

impl RadioErrorHandler {
    /// Build an error of a known kind.  Severity, status, message and
    /// recovery actions depend on `kind` alone.
    pub fn create_error(
        kind: RadioErrorKind,
        operation: &str,
        original: Option<&(dyn StdError + 'static)>,
        details: ContextDetails,
    ) -> RadioError {
        let technical_message = match original {
            Some(e) => e.to_string(),
            None => format!("{} during {}", kind, operation),
        };

        let err = RadioError {
            kind,
            severity: kind.severity(),
            user_message: kind.user_message().to_string(),
            technical_message,
            context: ErrorContext {
                admin_user_id: details.admin_user_id,
                admin_user_email: details.admin_user_email,
                timestamp: Utc::now(),
                operation: operation.to_string(),
                metadata: details.metadata,
            },
            http_status_code: kind.http_status(),
            recovery_actions: kind
                .recovery_actions()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            is_retryable: kind.is_retryable(),
        };

        log_error(&err);
        err
    }

    /// Best-effort classification of an arbitrary error.  Typed errors from
    /// this crate (and reqwest / io / serde_json) anywhere in the source
    /// chain win; message sniffing is the last resort.
    pub fn analyze_error(
        error: &(dyn StdError + 'static),
        operation: &str,
        details: ContextDetails,
    ) -> RadioError {
        if let Some(existing) = find_in_chain::<RadioError>(error) {
            return existing.clone();
        }
        let kind = classify_typed(error).unwrap_or_else(|| classify_opaque(error));
        Self::create_error(kind, operation, Some(error), details)
    }

    /// Failure while validating a stream URL (admin form or selector pass).
    pub fn handle_stream_validation_error(
        error: &(dyn StdError + 'static),
        url: &str,
        details: ContextDetails,
    ) -> RadioError {
        let status_code = find_in_chain::<ProbeError>(error).and_then(ProbeError::status_code);
        let kind = match find_in_chain::<ProbeError>(error) {
            Some(ProbeError::Timeout(_)) => RadioErrorKind::StreamConnectionTimeout,
            Some(p) => p.kind(),
            None => {
                let msg = chain_text(error);
                if contains_any(&msg, &["timeout", "timed out"]) {
                    RadioErrorKind::StreamConnectionTimeout
                } else if contains_any(&msg, &["refused", "econnrefused"]) {
                    RadioErrorKind::StreamConnectionRefused
                } else if contains_any(&msg, &["content-type", "content type"]) {
                    RadioErrorKind::StreamUnsupportedContentType
                } else if contains_any(&msg, &["404", "not found"]) {
                    RadioErrorKind::StreamNotFound
                } else if contains_any(&msg, &["invalid url"]) {
                    RadioErrorKind::InvalidUrl
                } else if contains_any(&msg, &["500", "502", "503", "server error"]) {
                    RadioErrorKind::StreamServerError
                } else {
                    RadioErrorKind::StreamInvalidResponse
                }
            }
        };
        let details = ContextDetails {
            metadata: ErrorMetadata::Stream {
                url: url.to_string(),
                status_code,
            },
            ..details
        };
        Self::create_error(kind, "stream_validation", Some(error), details)
    }

    /// Failure while holding or opening a live stream connection.
    pub fn handle_stream_connection_error(
        error: &(dyn StdError + 'static),
        url: &str,
        details: ContextDetails,
    ) -> RadioError {
        let kind = match find_in_chain::<ProbeError>(error) {
            Some(ProbeError::Timeout(_)) => RadioErrorKind::StreamConnectionTimeout,
            Some(ProbeError::ConnectionRefused(_)) => RadioErrorKind::StreamConnectionRefused,
            Some(p) => p.kind(),
            None => {
                let msg = chain_text(error);
                if contains_any(&msg, &["timeout", "timed out"]) {
                    RadioErrorKind::StreamConnectionTimeout
                } else if contains_any(&msg, &["refused", "econnrefused"]) {
                    RadioErrorKind::StreamConnectionRefused
                } else if contains_any(&msg, &["enotfound", "dns", "unreachable"]) {
                    RadioErrorKind::NetworkUnreachable
                } else {
                    RadioErrorKind::NetworkConnectionFailed
                }
            }
        };
        let status_code = find_in_chain::<ProbeError>(error).and_then(ProbeError::status_code);
        let details = ContextDetails {
            metadata: ErrorMetadata::Stream {
                url: url.to_string(),
                status_code,
            },
            ..details
        };
        Self::create_error(kind, "stream_connection", Some(error), details)
    }

    pub fn handle_database_error(
        error: &(dyn StdError + 'static),
        operation: &str,
        table: &str,
    ) -> RadioError {
        let (kind, code) = match find_in_chain::<StoreError>(error) {
            Some(store_err) => (store_err.kind(), None),
            None => {
                let opaque = find_in_chain::<OpaqueError>(error);
                let code = opaque.and_then(|o| o.code.clone());
                let msg = format!("{} {}", chain_text(error), code.clone().unwrap_or_default())
                    .to_lowercase();
                let kind = if contains_any(
                    &msg,
                    &["econnrefused", "protocol_connection_lost", "er_access_denied_error", "connection"],
                ) {
                    RadioErrorKind::DatabaseConnectionError
                } else if contains_any(&msg, &["er_dup_entry", "duplicate", "constraint"]) {
                    RadioErrorKind::DatabaseConstraintViolation
                } else if contains_any(&msg, &["transaction", "rollback", "deadlock"]) {
                    RadioErrorKind::DatabaseTransactionFailed
                } else {
                    RadioErrorKind::DatabaseQueryFailed
                };
                (kind, code)
            }
        };
        Self::create_error(
            kind,
            operation,
            Some(error),
            ContextDetails::with_metadata(ErrorMetadata::Database {
                table: table.to_string(),
                code,
            }),
        )
    }

    pub fn handle_form_validation_error(field: &str, message: &str) -> RadioError {
        let lower = message.to_lowercase();
        let kind = if contains_any(&lower, &["required", "zorunlu", "missing"]) {
            RadioErrorKind::RequiredFieldMissing
        } else if contains_any(&lower, &["format", "invalid", "geçersiz"]) {
            RadioErrorKind::InvalidFormat
        } else {
            RadioErrorKind::FormValidationError
        };
        let original = OpaqueError::new("ValidationError", format!("{}: {}", field, message));
        Self::create_error(
            kind,
            "form_validation",
            Some(&original),
            ContextDetails::with_metadata(ErrorMetadata::Form {
                field: field.to_string(),
            }),
        )
    }

    pub fn handle_auth_error(reason: &str, details: ContextDetails) -> RadioError {
        let lower = reason.to_lowercase();
        let kind = if contains_any(&lower, &["expired", "session"]) {
            RadioErrorKind::SessionExpired
        } else if contains_any(&lower, &["invalid user", "user not found", "unknown user"]) {
            RadioErrorKind::InvalidUser
        } else {
            RadioErrorKind::InsufficientPermissions
        };
        let original = OpaqueError::new("AuthError", reason);
        let details = match details.metadata {
            ErrorMetadata::None => ContextDetails {
                metadata: ErrorMetadata::Auth {
                    required_role: Some("admin".to_string()),
                },
                ..details
            },
            _ => details,
        };
        Self::create_error(kind, "authorization", Some(&original), details)
    }

    pub fn to_api_response(error: &RadioError) -> ApiErrorResponse {
        ApiErrorResponse {
            success: false,
            error: ApiErrorBody {
                kind: error.kind,
                message: error.user_message.clone(),
                code: error.http_status_code,
                details: ApiErrorDetails {
                    severity: error.severity,
                    timestamp: error.context.timestamp,
                    operation: error.context.operation.clone(),
                    recovery_actions: error.recovery_actions.clone(),
                    is_retryable: error.is_retryable,
                },
            },
        }
    }

    pub fn to_user_display(error: &RadioError) -> UserDisplay {
        let title = match error.severity {
            Severity::Low => "Bilgi",
            Severity::Medium => "Uyarı",
            Severity::High => "Hata",
            Severity::Critical => "Kritik Hata",
        };
        UserDisplay {
            title: title.to_string(),
            message: error.user_message.clone(),
            severity: error.severity,
            actions: error.recovery_actions.clone(),
            can_retry: error.is_retryable,
        }
    }
}

fn log_error(err: &RadioError) {
    match err.severity {
        Severity::Critical | Severity::High => error!(
            kind = %err.kind,
            operation = %err.context.operation,
            "{}",
            err.technical_message
        ),
        Severity::Medium => warn!(
            kind = %err.kind,
            operation = %err.context.operation,
            "{}",
            err.technical_message
        ),
        Severity::Low => info!(
            kind = %err.kind,
            operation = %err.context.operation,
            "{}",
            err.technical_message
        ),
    }
}

fn find_in_chain<'a, T: StdError + 'static>(error: &'a (dyn StdError + 'static)) -> Option<&'a T> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<T>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

fn chain_text(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut current = error.source();
    while let Some(e) = current {
        text.push_str(": ");
        text.push_str(&e.to_string());
        current = e.source();
    }
    text.to_lowercase()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn classify_typed(error: &(dyn StdError + 'static)) -> Option<RadioErrorKind> {
    if let Some(p) = find_in_chain::<ProbeError>(error) {
        return Some(p.kind());
    }
    if let Some(s) = find_in_chain::<StoreError>(error) {
        return Some(s.kind());
    }
    if let Some(r) = find_in_chain::<reqwest::Error>(error) {
        let kind = if r.is_timeout() {
            RadioErrorKind::NetworkTimeout
        } else if r.is_connect() {
            RadioErrorKind::NetworkConnectionFailed
        } else if r.is_builder() {
            RadioErrorKind::InvalidUrl
        } else if r.is_status() {
            RadioErrorKind::StreamServerError
        } else if r.is_decode() {
            RadioErrorKind::StreamInvalidResponse
        } else {
            RadioErrorKind::NetworkConnectionFailed
        };
        return Some(kind);
    }
    if find_in_chain::<serde_json::Error>(error).is_some() {
        return Some(RadioErrorKind::InvalidFormat);
    }
    if let Some(io) = find_in_chain::<std::io::Error>(error) {
        use std::io::ErrorKind;
        return match io.kind() {
            ErrorKind::TimedOut => Some(RadioErrorKind::NetworkTimeout),
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected => Some(RadioErrorKind::NetworkConnectionFailed),
            ErrorKind::AlreadyExists => Some(RadioErrorKind::DatabaseConstraintViolation),
            ErrorKind::PermissionDenied => Some(RadioErrorKind::InsufficientPermissions),
            _ => None,
        };
    }
    None
}

/// Substring sniffing for errors from libraries that only expose text.
fn classify_opaque(error: &(dyn StdError + 'static)) -> RadioErrorKind {
    let opaque = find_in_chain::<OpaqueError>(error);
    let name = opaque.map(|o| o.name.as_str()).unwrap_or("");
    let code = opaque.and_then(|o| o.code.as_deref()).unwrap_or("");
    let message = chain_text(error);

    if name == "AbortError" || name == "TimeoutError" || contains_any(&message, &["timeout", "timed out"]) {
        RadioErrorKind::NetworkTimeout
    } else if name == "TypeError" && message.contains("fetch") {
        RadioErrorKind::NetworkConnectionFailed
    } else if matches!(code, "ECONNREFUSED" | "ER_ACCESS_DENIED_ERROR" | "PROTOCOL_CONNECTION_LOST") {
        RadioErrorKind::DatabaseConnectionError
    } else if code == "ER_DUP_ENTRY" {
        RadioErrorKind::DatabaseConstraintViolation
    } else if message.contains("invalid url") {
        RadioErrorKind::InvalidUrl
    } else if message.contains("protocol") {
        RadioErrorKind::InvalidProtocol
    } else if message.contains("unauthorized") {
        RadioErrorKind::InsufficientPermissions
    } else if message.contains("rate limit") {
        RadioErrorKind::RateLimitExceeded
    } else {
        RadioErrorKind::UnknownError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_error_depends_on_kind_only() {
        let a = RadioErrorHandler::create_error(
            RadioErrorKind::StreamServerError,
            "probe",
            None,
            ContextDetails::default(),
        );
        let original = OpaqueError::new("Error", "something entirely unrelated");
        let b = RadioErrorHandler::create_error(
            RadioErrorKind::StreamServerError,
            "other_operation",
            Some(&original),
            ContextDetails::admin("42", None),
        );
        assert_eq!(a.severity, b.severity);
        assert_eq!(a.http_status_code, 502);
        assert_eq!(a.http_status_code, b.http_status_code);
        assert_eq!(a.user_message, b.user_message);
        assert_eq!(a.recovery_actions, b.recovery_actions);
        assert!(a.is_retryable);
        assert_eq!(b.context.admin_user_id.as_deref(), Some("42"));
        assert!(b.technical_message.contains("unrelated"));
    }

    #[test]
    fn fetch_type_error_is_connection_failure() {
        let err = OpaqueError::new("TypeError", "fetch failed");
        let classified = RadioErrorHandler::analyze_error(&err, "load", ContextDetails::default());
        assert_eq!(classified.kind, RadioErrorKind::NetworkConnectionFailed);
    }

    #[test]
    fn opaque_codes_and_messages() {
        let cases = [
            (OpaqueError::new("Error", "connect").with_code("ECONNREFUSED"), RadioErrorKind::DatabaseConnectionError),
            (OpaqueError::new("Error", "dup").with_code("ER_DUP_ENTRY"), RadioErrorKind::DatabaseConstraintViolation),
            (OpaqueError::new("TypeError", "Invalid URL: foo"), RadioErrorKind::InvalidUrl),
            (OpaqueError::new("Error", "Unsupported protocol ftp:"), RadioErrorKind::InvalidProtocol),
            (OpaqueError::new("Error", "401 Unauthorized"), RadioErrorKind::InsufficientPermissions),
            (OpaqueError::new("Error", "rate limit hit"), RadioErrorKind::RateLimitExceeded),
            (OpaqueError::new("AbortError", "aborted"), RadioErrorKind::NetworkTimeout),
            (OpaqueError::new("Error", "weird"), RadioErrorKind::UnknownError),
        ];
        for (err, expected) in cases {
            let got = RadioErrorHandler::analyze_error(&err, "op", ContextDetails::default());
            assert_eq!(got.kind, expected, "{}", err);
        }
    }

    #[test]
    fn typed_errors_skip_sniffing() {
        let err = ProbeError::Timeout(10_000);
        let got = RadioErrorHandler::analyze_error(&err, "probe", ContextDetails::default());
        assert_eq!(got.kind, RadioErrorKind::NetworkTimeout);

        // Message mentions "rate limit"; the type decides.
        let err = StoreError::Constraint("rate limit".into());
        let got = RadioErrorHandler::analyze_error(&err, "save", ContextDetails::default());
        assert_eq!(got.kind, RadioErrorKind::DatabaseConstraintViolation);

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let got = RadioErrorHandler::analyze_error(&io, "read", ContextDetails::default());
        assert_eq!(got.kind, RadioErrorKind::NetworkTimeout);
    }

    #[test]
    fn stream_helpers_attach_metadata() {
        let err = ProbeError::Status(404);
        let got = RadioErrorHandler::handle_stream_validation_error(
            &err,
            "https://a.example/stream",
            ContextDetails::default(),
        );
        assert_eq!(got.kind, RadioErrorKind::StreamNotFound);
        assert_eq!(
            got.context.metadata,
            ErrorMetadata::Stream {
                url: "https://a.example/stream".into(),
                status_code: Some(404)
            }
        );

        let err = OpaqueError::new("Error", "getaddrinfo ENOTFOUND radio.example");
        let got = RadioErrorHandler::handle_stream_connection_error(
            &err,
            "https://radio.example",
            ContextDetails::default(),
        );
        assert_eq!(got.kind, RadioErrorKind::NetworkUnreachable);
    }

    #[test]
    fn database_form_and_auth_helpers() {
        let err = OpaqueError::new("Error", "Duplicate entry 'x'").with_code("ER_DUP_ENTRY");
        let got = RadioErrorHandler::handle_database_error(&err, "save_settings", "settings");
        assert_eq!(got.kind, RadioErrorKind::DatabaseConstraintViolation);
        assert_eq!(got.http_status_code, 409);

        let got = RadioErrorHandler::handle_form_validation_error("stream_url", "is required");
        assert_eq!(got.kind, RadioErrorKind::RequiredFieldMissing);
        let got = RadioErrorHandler::handle_form_validation_error("stream_url", "bad format");
        assert_eq!(got.kind, RadioErrorKind::InvalidFormat);

        let got = RadioErrorHandler::handle_auth_error("session expired", ContextDetails::default());
        assert_eq!(got.kind, RadioErrorKind::SessionExpired);
        assert_eq!(got.http_status_code, 401);
        let got = RadioErrorHandler::handle_auth_error("not an admin", ContextDetails::default());
        assert_eq!(got.kind, RadioErrorKind::InsufficientPermissions);
    }

    #[test]
    fn api_response_shape() {
        let err = RadioErrorHandler::create_error(
            RadioErrorKind::InvalidProtocol,
            "update_stream_settings",
            None,
            ContextDetails::default(),
        );
        let json = serde_json::to_value(RadioErrorHandler::to_api_response(&err)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["type"], "INVALID_PROTOCOL");
        assert_eq!(json["error"]["code"], 400);
        assert_eq!(json["error"]["details"]["severity"], "low");
        assert_eq!(json["error"]["details"]["operation"], "update_stream_settings");
        assert_eq!(json["error"]["details"]["isRetryable"], false);
        assert!(json["error"]["details"]["recoveryActions"].is_array());

        let display = RadioErrorHandler::to_user_display(&err);
        assert_eq!(display.title, "Bilgi");
        assert!(!display.can_retry);
    }
}
