use cellpotts_concepts::*;
use core::fmt::Display;

macro_rules! impl_error_variant {
    ($name: ident, $($err_var: ident),+) => {
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        $name::$err_var(message) => write!(f, "{}", message),
                    )+
                }
            }
        }
    }
}

macro_rules! impl_from_error {
    ($name: ident, $(($err_var: ident, $err_type: ty)),+) => {
        $(
            impl From<$err_type> for $name {
                fn from(err: $err_type) -> Self {
                    $name::$err_var(err)
                }
            }
        )+
    }
}

/// Covers all errors that can occur while building or running a [System](crate::System).
///
/// The errors are listed from very likely to be a user error to almost certainly an
/// internal error.
#[derive(Debug)]
pub enum SystemError {
    // Very likely to be user errors
    /// See [ConfigError]
    ConfigError(ConfigError),
    /// See [ParseError]
    ParseError(ParseError),
    /// Model description could not be read
    DeserializationError(String),
    /// See [IntegrationError]
    IntegrationError(IntegrationError),
    /// See [CalcError]
    CalcError(CalcError),
    /// See [RngError]
    RngError(RngError),

    // Highly unlikely to be user errors
    /// See [IndexError]
    IndexError(IndexError),
    /// Reading or writing a file failed
    IoError(std::io::Error),
}

impl_from_error! {SystemError,
    (ConfigError, ConfigError),
    (ParseError, ParseError),
    (IntegrationError, IntegrationError),
    (CalcError, CalcError),
    (RngError, RngError),
    (IndexError, IndexError),
    (IoError, std::io::Error)
}

impl_error_variant! {SystemError,
    ConfigError,
    ParseError,
    DeserializationError,
    IntegrationError,
    CalcError,
    RngError,
    IndexError,
    IoError
}

impl std::error::Error for SystemError {}

impl From<serde_json::Error> for SystemError {
    fn from(err: serde_json::Error) -> Self {
        SystemError::DeserializationError(format!("{err}"))
    }
}

impl From<ron::error::SpannedError> for SystemError {
    fn from(err: ron::error::SpannedError) -> Self {
        SystemError::DeserializationError(format!("{err}"))
    }
}

impl From<ron::Error> for SystemError {
    fn from(err: ron::Error) -> Self {
        SystemError::DeserializationError(format!("{err}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn conversion_keeps_message() {
        let err: SystemError = ConfigError("cycle".into()).into();
        assert!(matches!(err, SystemError::ConfigError(_)));
        assert_eq!(format!("{err}"), "cycle");
    }

    #[test]
    fn json_errors_are_deserialization_errors() {
        let err: SystemError = serde_json::from_str::<f64>("{").unwrap_err().into();
        assert!(matches!(err, SystemError::DeserializationError(_)));
    }
}
