use crate::runtime::exception::ExceptionState;
use std::fmt;

/// Everything that can go wrong at the native/Python boundary.
///
/// Setup-time variants (`Initialization`, `ModuleNotFound`, `SymbolTable`)
/// are fatal for the host; the rest concern a single call or decode and
/// leave the bridge usable.
#[derive(Debug, Clone)]
pub enum BridgeError {
    Initialization { reason: String },
    ModuleNotFound { module: String, cause: Option<ExceptionState> },
    SymbolTable { module: String },
    SymbolNotFound { symbol: String, module: String },
    UnsupportedElementType { found: String },
    UnsupportedAlignment { alignment: u32 },
    NotAList { found: String },
    ShapeMismatch { expected: String, found: String },
    Runtime(ExceptionState),
    Config { reason: String },
}

impl BridgeError {
    pub fn initialization(reason: impl Into<String>) -> Self {
        Self::Initialization { reason: reason.into() }
    }

    pub fn unsupported_element(found: impl Into<String>) -> Self {
        Self::UnsupportedElementType { found: found.into() }
    }

    pub fn shape_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn not_a_list(found: impl Into<String>) -> Self {
        Self::NotAList { found: found.into() }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config { reason: reason.into() }
    }

    /// Setup errors: the host should abort startup instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Initialization { .. } | Self::ModuleNotFound { .. } | Self::SymbolTable { .. }
        )
    }

    /// The Python exception behind this error, if there is one.
    pub fn exception(&self) -> Option<&ExceptionState> {
        match self {
            Self::Runtime(state) => Some(state),
            Self::ModuleNotFound { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialization { reason } => {
                write!(f, "Python runtime initialization failed: {}", reason)
            }
            Self::ModuleNotFound { module, cause } => {
                write!(f, "Can not import module: {}", module)?;
                if let Some(cause) = cause {
                    write!(f, " ({}: {})", cause.type_name, cause.message)?;
                }
                Ok(())
            }
            Self::SymbolTable { module } => {
                write!(f, "Module {} exposes no symbol dictionary", module)
            }
            Self::SymbolNotFound { symbol, module } => {
                write!(f, "Symbol '{}' not found in module {}", symbol, module)
            }
            Self::UnsupportedElementType { found } => {
                write!(f, "Unsupported element type: {}", found)
            }
            Self::UnsupportedAlignment { alignment } => {
                write!(f, "Alignment is only supported for 4/8 bytes, got {}", alignment)
            }
            Self::NotAList { found } => {
                write!(f, "Expected a list, found {}", found)
            }
            Self::ShapeMismatch { expected, found } => {
                write!(f, "Shape mismatch: expected {}, found {}", expected, found)
            }
            Self::Runtime(state) => write!(f, "{}", state),
            Self::Config { reason } => write!(f, "Configuration error: {}", reason),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<ExceptionState> for BridgeError {
    fn from(state: ExceptionState) -> Self {
        Self::Runtime(state)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BridgeError::initialization("no interpreter").is_fatal());
        assert!(BridgeError::SymbolTable { module: "m".into() }.is_fatal());
        assert!(!BridgeError::UnsupportedAlignment { alignment: 2 }.is_fatal());
        assert!(!BridgeError::not_a_list("int").is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = BridgeError::UnsupportedAlignment { alignment: 1 };
        assert_eq!(err.to_string(), "Alignment is only supported for 4/8 bytes, got 1");

        let err = BridgeError::SymbolNotFound {
            symbol: "load_image".into(),
            module: "demo".into(),
        };
        assert!(err.to_string().contains("load_image"));

        let err = BridgeError::ModuleNotFound {
            module: "missing".into(),
            cause: Some(ExceptionState::new("ModuleNotFoundError", "No module named 'missing'")),
        };
        assert_eq!(
            err.to_string(),
            "Can not import module: missing (ModuleNotFoundError: No module named 'missing')"
        );
    }

    #[test]
    fn test_runtime_error_exposes_exception() {
        let state = ExceptionState::new("ValueError", "bad value");
        let err = BridgeError::from(state.clone());
        assert_eq!(err.exception(), Some(&state));
        assert!(BridgeError::config("x").exception().is_none());
    }
}
