use core::fmt::Display;
use std::error::Error;

macro_rules! define_errors {
    ($(($err_name: ident, $err_descr: expr)),+) => {
        $(
            #[doc = $err_descr]
            #[derive(Debug,Clone,PartialEq)]
            pub struct $err_name(
                #[doc = "Error message associated with "]
                #[doc = stringify!($err_name)]
                #[doc = " error type."]
                pub String,
            );

            impl Display for $err_name {
                fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl Error for $err_name {}
        )+
    }
}

define_errors!(
    (SetupError, "Occurs while constructing a lattice, layer or simulation context"),
    (CalcError, "General Calculation Error"),
    (
        IndexError,
        "Can occur internally when information is not present at expected place"
    ),
    (BoundaryError, "Can occur when a node lies outside of a non-periodic lattice"),
    (
        RngError,
        "Can occur when generating distributions or drawing samples from them."
    ),
    (
        ParseError,
        "Emitted when an expression or a serialized node list cannot be parsed"
    ),
    (
        ConfigError,
        "Model configuration which can never be evaluated consistently"
    ),
    (
        IntegrationError,
        "Numerical integration of a system could not proceed"
    )
);

impl From<CalcError> for SetupError {
    fn from(value: CalcError) -> Self {
        SetupError(format!("{}", value))
    }
}

impl From<BoundaryError> for SetupError {
    fn from(value: BoundaryError) -> Self {
        SetupError(format!("{}", value))
    }
}

impl From<ParseError> for ConfigError {
    fn from(value: ParseError) -> Self {
        ConfigError(format!("{}", value))
    }
}

impl From<IndexError> for ConfigError {
    fn from(value: IndexError) -> Self {
        ConfigError(format!("{}", value))
    }
}

/// For internal use: formats an error message for violated internal invariants.
#[macro_export]
macro_rules! format_error_message(
    (@function) => {
        {
            fn f() {}
            let name = std::any::type_name_of_val(&f);
            name.strip_suffix("::f").unwrap_or(name)
        }
    };
    ($bug_title:expr, $error_msg:expr) => {
        {
            format!("Internal Error in function {} (file {} line {}): +++ {} +++ \
                Please file a bug-report titled \"{}\" and attach the message above.",
                $crate::format_error_message!(@function),
                file!(),
                line!(),
                $error_msg,
                $bug_title,
            )
        }
    };
);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_display_is_message() {
        let err = ConfigError("loop in initializers".to_owned());
        assert_eq!(format!("{err}"), "loop in initializers");
    }

    #[test]
    fn parse_error_converts_to_config_error() {
        let err: ConfigError = ParseError("unexpected token".into()).into();
        assert_eq!(err.0, "unexpected token");
    }

    #[test]
    fn internal_message_contains_title_and_body() {
        let message = crate::format_error_message!("short title", "long descr");
        assert!(message.contains("short title"));
        assert!(message.contains("long descr"));
        assert!(message.contains("internal_message_contains_title_and_body"));
    }
}
