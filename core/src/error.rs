use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArguments,
    UnknownTool,
    UpstreamFailure,
    InternalError,
}

impl ErrorKind {
    /// True when the caller, not the service, is at fault.
    pub fn is_caller_fault(self) -> bool {
        matches!(self, Self::InvalidArguments | Self::UnknownTool)
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{message}")]
    InvalidArguments { field: String, message: String },

    #[error("未知的工具: {id}")]
    UnknownTool { id: String },

    #[error("{summary}")]
    UpstreamFailure {
        summary: String,
        detail: Option<String>,
    },

    #[error("{summary}")]
    InternalError {
        summary: String,
        detail: Option<String>,
    },

    #[error("tool `{id}` is already registered")]
    DuplicateTool { id: String },
}

pub type ToolOutcome<T> = Result<T, ToolError>;

impl ToolError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing(field: &str) -> Self {
        Self::invalid(field, format!("缺少参数 {field}"))
    }

    pub fn upstream(summary: impl Into<String>) -> Self {
        Self::UpstreamFailure {
            summary: summary.into(),
            detail: None,
        }
    }

    pub fn upstream_with(summary: impl Into<String>, detail: impl ToString) -> Self {
        Self::UpstreamFailure {
            summary: summary.into(),
            detail: Some(detail.to_string()),
        }
    }

    pub fn internal(summary: impl Into<String>, detail: impl ToString) -> Self {
        Self::InternalError {
            summary: summary.into(),
            detail: Some(detail.to_string()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::UnknownTool { .. } => ErrorKind::UnknownTool,
            Self::UpstreamFailure { .. } => ErrorKind::UpstreamFailure,
            Self::InternalError { .. } | Self::DuplicateTool { .. } => ErrorKind::InternalError,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::UpstreamFailure { detail, .. } | Self::InternalError { detail, .. } => {
                detail.as_deref()
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        Self::internal("文件操作失败", err)
    }
}
