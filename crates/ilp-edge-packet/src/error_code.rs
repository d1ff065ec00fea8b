use std::fmt;
use std::str::FromStr;

/// The three classes of ILP error code defined in RFC-0027.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// `F` — the packet was malformed or the request was invalid; retrying
    /// the exact same packet will not help.
    Final,
    /// `T` — a transient condition; the same request might succeed later.
    Temporary,
    /// `R` — the error is relative to the sender's or connector's clock.
    Relative,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorClass::Final => "Final",
            ErrorClass::Temporary => "Temporary",
            ErrorClass::Relative => "Relative",
        };
        write!(f, "{}", s)
    }
}

macro_rules! error_codes {
    ($($variant:ident => ($code:literal, $class:ident)),* $(,)?) => {
        /// ILP error codes per RFC-0027.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $($variant,)*
            /// A code this implementation does not recognize, preserved verbatim.
            Other([u8; 3]),
        }

        impl ErrorCode {
            pub fn code(&self) -> &str {
                match self {
                    $(ErrorCode::$variant => $code,)*
                    ErrorCode::Other(bytes) => {
                        // SAFETY-free: only ASCII codes are constructed via from_str/from_bytes
                        std::str::from_utf8(bytes).unwrap_or("???")
                    }
                }
            }

            pub fn class(&self) -> ErrorClass {
                match self {
                    $(ErrorCode::$variant => ErrorClass::$class,)*
                    ErrorCode::Other(bytes) => match bytes[0] {
                        b'T' => ErrorClass::Temporary,
                        b'R' => ErrorClass::Relative,
                        _ => ErrorClass::Final,
                    },
                }
            }
        }

        impl FromStr for ErrorCode {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($code => Ok(ErrorCode::$variant),)*
                    other if other.len() == 3 => {
                        let mut bytes = [0u8; 3];
                        bytes.copy_from_slice(other.as_bytes());
                        Ok(ErrorCode::Other(bytes))
                    }
                    _ => Err(()),
                }
            }
        }
    };
}

error_codes! {
    F00_BAD_REQUEST => ("F00", Final),
    F01_INVALID_PACKET => ("F01", Final),
    F02_UNREACHABLE => ("F02", Final),
    F03_INVALID_AMOUNT => ("F03", Final),
    F04_INSUFFICIENT_DESTINATION_AMOUNT => ("F04", Final),
    F05_WRONG_CONDITION => ("F05", Final),
    F06_UNEXPECTED_PAYMENT => ("F06", Final),
    F07_CANNOT_RECEIVE => ("F07", Final),
    F08_AMOUNT_TOO_LARGE => ("F08", Final),
    F99_APPLICATION_ERROR => ("F99", Final),
    T00_INTERNAL_ERROR => ("T00", Temporary),
    T01_PEER_UNREACHABLE => ("T01", Temporary),
    T02_PEER_BUSY => ("T02", Temporary),
    T03_CONNECTOR_BUSY => ("T03", Temporary),
    T04_INSUFFICIENT_LIQUIDITY => ("T04", Temporary),
    T05_RATE_LIMITED => ("T05", Temporary),
    T99_APPLICATION_ERROR => ("T99", Temporary),
    R00_TRANSFER_TIMED_OUT => ("R00", Relative),
    R01_INSUFFICIENT_SOURCE_AMOUNT => ("R01", Relative),
    R02_INSUFFICIENT_TIMEOUT => ("R02", Relative),
    R99_APPLICATION_ERROR => ("R99", Relative),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Reason codes the business-logic handler may use to reject an inbound
/// payment, mapped to ILP error codes per spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InsufficientFunds,
    Expired,
    InvalidRequest,
    InvalidAmount,
    UnexpectedPayment,
    ApplicationError,
    InternalError,
    Timeout,
    Unknown,
}

impl RejectReason {
    pub fn to_error_code(self) -> ErrorCode {
        match self {
            RejectReason::InsufficientFunds => ErrorCode::T04_INSUFFICIENT_LIQUIDITY,
            RejectReason::Expired => ErrorCode::R00_TRANSFER_TIMED_OUT,
            RejectReason::InvalidRequest => ErrorCode::F00_BAD_REQUEST,
            RejectReason::InvalidAmount => ErrorCode::F03_INVALID_AMOUNT,
            RejectReason::UnexpectedPayment => ErrorCode::F06_UNEXPECTED_PAYMENT,
            RejectReason::ApplicationError => ErrorCode::F99_APPLICATION_ERROR,
            RejectReason::InternalError => ErrorCode::T00_INTERNAL_ERROR,
            RejectReason::Timeout => ErrorCode::T00_INTERNAL_ERROR,
            RejectReason::Unknown => ErrorCode::F99_APPLICATION_ERROR,
        }
    }
}

impl FromStr for RejectReason {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "insufficient_funds" => RejectReason::InsufficientFunds,
            "expired" => RejectReason::Expired,
            "invalid_request" => RejectReason::InvalidRequest,
            "invalid_amount" => RejectReason::InvalidAmount,
            "unexpected_payment" => RejectReason::UnexpectedPayment,
            "application_error" => RejectReason::ApplicationError,
            "internal_error" => RejectReason::InternalError,
            "timeout" => RejectReason::Timeout,
            _ => RejectReason::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_codes() {
        assert_eq!(ErrorCode::F08_AMOUNT_TOO_LARGE.class(), ErrorClass::Final);
        assert_eq!(ErrorCode::T04_INSUFFICIENT_LIQUIDITY.class(), ErrorClass::Temporary);
        assert_eq!(ErrorCode::R00_TRANSFER_TIMED_OUT.class(), ErrorClass::Relative);
    }

    #[test]
    fn maps_unknown_reason_to_f99() {
        let reason: RejectReason = "something_else".parse().unwrap();
        assert_eq!(reason, RejectReason::Unknown);
        assert_eq!(reason.to_error_code(), ErrorCode::F99_APPLICATION_ERROR);
    }

    #[test]
    fn maps_all_documented_reasons() {
        assert_eq!(
            "insufficient_funds".parse::<RejectReason>().unwrap().to_error_code(),
            ErrorCode::T04_INSUFFICIENT_LIQUIDITY
        );
        assert_eq!(
            "expired".parse::<RejectReason>().unwrap().to_error_code(),
            ErrorCode::R00_TRANSFER_TIMED_OUT
        );
        assert_eq!(
            "invalid_request".parse::<RejectReason>().unwrap().to_error_code(),
            ErrorCode::F00_BAD_REQUEST
        );
        assert_eq!(
            "invalid_amount".parse::<RejectReason>().unwrap().to_error_code(),
            ErrorCode::F03_INVALID_AMOUNT
        );
        assert_eq!(
            "unexpected_payment".parse::<RejectReason>().unwrap().to_error_code(),
            ErrorCode::F06_UNEXPECTED_PAYMENT
        );
        assert_eq!(
            "timeout".parse::<RejectReason>().unwrap().to_error_code(),
            ErrorCode::T00_INTERNAL_ERROR
        );
    }

    #[test]
    fn roundtrips_via_display_and_from_str() {
        let code = ErrorCode::from_str("F02").unwrap();
        assert_eq!(code.to_string(), "F02");
    }
}
