use thiserror::Error;

/// Server and client error numbers that callers branch on.
pub mod codes {
    pub const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
    pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
    pub const ER_BAD_DB_ERROR: u16 = 1049;
    pub const ER_TABLEACCESS_DENIED_ERROR: u16 = 1142;
    pub const ER_NO_SUCH_TABLE: u16 = 1146;
    pub const ER_SPECIFIC_ACCESS_DENIED_ERROR: u16 = 1227;
    pub const ER_QUERY_INTERRUPTED: u16 = 1317;

    pub const CR_CONNECTION_ERROR: u16 = 2002;
    pub const CR_CONN_HOST_ERROR: u16 = 2003;
    pub const CR_SERVER_GONE_ERROR: u16 = 2006;
    pub const CR_SERVER_LOST: u16 = 2013;
}

/// Errors returned by a [`crate::Session`].
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("MySQL Error {code} ({sqlstate}): {message}")]
    Server {
        code: u16,
        sqlstate: String,
        message: String,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Cannot convert column {column}: {message}")]
    Conversion { column: usize, message: String },

    #[error("The session is not open")]
    Closed,
}

impl SessionError {
    /// Server error with the generic `HY000` SQLSTATE.
    pub fn server(code: u16, message: impl Into<String>) -> Self {
        SessionError::Server {
            code,
            sqlstate: "HY000".to_string(),
            message: message.into(),
        }
    }

    /// MySQL error number, if the error came from the server.
    pub fn code(&self) -> Option<u16> {
        match self {
            SessionError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the connection itself is gone, as opposed to a failed statement.
    pub fn is_connection_error(&self) -> bool {
        match self {
            SessionError::Connection(_) | SessionError::Closed => true,
            SessionError::Server { code, .. } => matches!(
                *code,
                codes::CR_CONNECTION_ERROR
                    | codes::CR_CONN_HOST_ERROR
                    | codes::CR_SERVER_GONE_ERROR
                    | codes::CR_SERVER_LOST
            ),
            SessionError::Conversion { .. } => false,
        }
    }

    /// Privilege failures that make callers pick a weaker strategy.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self.code(),
            Some(
                codes::ER_SPECIFIC_ACCESS_DENIED_ERROR
                    | codes::ER_DBACCESS_DENIED_ERROR
                    | codes::ER_ACCESS_DENIED_ERROR
            )
        )
    }
}

impl From<mysql_async::Error> for SessionError {
    fn from(err: mysql_async::Error) -> Self {
        match err {
            mysql_async::Error::Server(e) => SessionError::Server {
                code: e.code,
                sqlstate: e.state,
                message: e.message,
            },
            other => SessionError::Connection(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_codes() {
        assert!(SessionError::server(1227, "denied").is_access_denied());
        assert!(SessionError::server(1044, "denied").is_access_denied());
        assert!(SessionError::server(1045, "denied").is_access_denied());
        assert!(!SessionError::server(1146, "no table").is_access_denied());
        assert!(!SessionError::Closed.is_access_denied());
    }

    #[test]
    fn test_connection_errors() {
        assert!(SessionError::Closed.is_connection_error());
        assert!(SessionError::server(codes::CR_SERVER_LOST, "lost").is_connection_error());
        assert!(!SessionError::server(codes::ER_NO_SUCH_TABLE, "x").is_connection_error());
    }

    #[test]
    fn test_display_includes_code() {
        let err = SessionError::server(1146, "Table 'a.b' doesn't exist");
        assert_eq!(
            err.to_string(),
            "MySQL Error 1146 (HY000): Table 'a.b' doesn't exist"
        );
    }
}
