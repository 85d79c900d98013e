use kube::core::ErrorResponse;

/// Taxonomy of failures the sync engine can observe (spec §7). Kind-level
/// recoverability is decided by callers inspecting the variant, not by the
/// error type itself.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kubernetes API error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("document store error: {source}")]
    Store {
        #[from]
        source: mongodb::error::Error,
    },

    #[error("sync state store error: {source}")]
    SyncState {
        #[from]
        source: tokio_postgres::Error,
    },

    #[error("sync state pool error: {source}")]
    SyncStatePool {
        #[from]
        source: deadpool_postgres::PoolError,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid resource descriptor: {0}")]
    Registry(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status the Kubernetes API server attached, if this error came
    /// from a request/response round trip.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ErrorResponse { code, .. }),
            } => Some(*code as u16),
            _ => None,
        }
    }

    /// Authentication/authorization failures are fatal per spec §7 item 2:
    /// never retried, kind is marked failed, other kinds continue.
    pub fn is_auth_fatal(&self) -> bool {
        matches!(self.http_status(), Some(401) | Some(403))
    }

    /// HTTP 410 Gone from a watch signals an expired resourceVersion cursor
    /// (spec §4.5, §7 item 4).
    pub fn is_cursor_expired(&self) -> bool {
        matches!(self.http_status(), Some(410))
    }

    /// Transient network conditions the backoff policy should retry (spec
    /// §7 item 3): broken pipe, connection reset, timeouts, DNS hiccups.
    pub fn is_transient(&self) -> bool {
        if self.is_auth_fatal() {
            return false;
        }
        match self {
            Error::Kube { source } => kube_error_is_transient(source),
            Error::Store { source } => is_store_timeout(source),
            Error::SyncState { .. } | Error::SyncStatePool { .. } => true,
            Error::Timeout(_) => true,
            _ => false,
        }
    }
}

fn kube_error_is_transient(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => resp.code >= 500,
        // Everything else (transport, TLS, service stack, line-codec
        // overruns) is a connectivity problem worth a retry.
        _ => true,
    }
}

fn is_store_timeout(err: &mongodb::error::Error) -> bool {
    use mongodb::error::ErrorKind;
    matches!(&*err.kind, ErrorKind::Io(_) | ErrorKind::ServerSelection { .. })
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn kube_api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(ErrorResponse {
                status: "Failure".into(),
                message: "boom".into(),
                reason: "".into(),
                code,
            }),
        }
    }

    #[test]
    fn unauthorized_and_forbidden_are_auth_fatal() {
        assert!(kube_api_error(401).is_auth_fatal());
        assert!(kube_api_error(403).is_auth_fatal());
        assert!(!kube_api_error(500).is_auth_fatal());
    }

    #[test]
    fn gone_is_cursor_expired() {
        assert!(kube_api_error(410).is_cursor_expired());
        assert!(!kube_api_error(500).is_cursor_expired());
    }

    #[test]
    fn server_errors_are_transient_auth_errors_are_not() {
        assert!(kube_api_error(500).is_transient());
        assert!(kube_api_error(503).is_transient());
        assert!(!kube_api_error(401).is_transient());
        assert!(!kube_api_error(400).is_transient());
    }

    #[test]
    fn request_timeout_is_transient() {
        assert!(Error::Timeout("list pods".into()).is_transient());
    }
}
