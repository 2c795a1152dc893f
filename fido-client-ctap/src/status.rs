//! CTAP2 status codes
//!
//! The first byte of every CTAP2 response is one of these codes:
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#error-responses>
//!
//! Codes the client does not know map to [`StatusCode::Other`].

use core::fmt;

macro_rules! status_codes {
    ($($name:ident = $value:literal => $message:literal,)*) => {
        /// CTAP2 status code
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum StatusCode {
            $($name = $value,)*
        }

        impl StatusCode {
            /// Create status code from byte value
            pub fn from_u8(value: u8) -> Self {
                match value {
                    $($value => Self::$name,)*
                    _ => Self::Other,
                }
            }

            fn message(self) -> &'static str {
                match self {
                    $(Self::$name => $message,)*
                }
            }
        }
    };
}

status_codes! {
    Success = 0x00 => "Success",
    InvalidCommand = 0x01 => "Invalid command",
    InvalidParameter = 0x02 => "Invalid parameter",
    InvalidLength = 0x03 => "Invalid length",
    InvalidSeq = 0x04 => "Invalid sequence",
    Timeout = 0x05 => "Timeout",
    ChannelBusy = 0x06 => "Channel busy",
    LockRequired = 0x0A => "Lock required",
    InvalidChannel = 0x0B => "Invalid channel",
    CborUnexpectedType = 0x11 => "CBOR unexpected type",
    InvalidCbor = 0x12 => "Invalid CBOR",
    MissingParameter = 0x14 => "Missing parameter",
    LimitExceeded = 0x15 => "Limit exceeded",
    UnsupportedExtension = 0x16 => "Unsupported extension",
    CredentialExcluded = 0x19 => "Credential excluded",
    Processing = 0x21 => "Processing",
    InvalidCredential = 0x22 => "Invalid credential",
    UserActionPending = 0x23 => "User action pending",
    OperationPending = 0x24 => "Operation pending",
    NoOperations = 0x25 => "No operations",
    UnsupportedAlgorithm = 0x26 => "Unsupported algorithm",
    OperationDenied = 0x27 => "Operation denied",
    KeyStoreFull = 0x28 => "Key store full",
    NoOperationPending = 0x2A => "No operation pending",
    UnsupportedOption = 0x2B => "Unsupported option",
    InvalidOption = 0x2C => "Invalid option",
    KeepaliveCancel = 0x2D => "Keepalive cancel",
    NoCredentials = 0x2E => "No credentials",
    UserActionTimeout = 0x2F => "User action timeout",
    NotAllowed = 0x30 => "Not allowed",
    PinInvalid = 0x31 => "PIN invalid",
    PinBlocked = 0x32 => "PIN blocked",
    PinAuthInvalid = 0x33 => "PIN auth invalid",
    PinAuthBlocked = 0x34 => "PIN auth blocked",
    PinNotSet = 0x35 => "PIN not set",
    PinRequired = 0x36 => "PIN required",
    PinPolicyViolation = 0x37 => "PIN policy violation",
    RequestTooLarge = 0x39 => "Request too large",
    ActionTimeout = 0x3A => "Action timeout",
    UpRequired = 0x3B => "UP required",
    UvBlocked = 0x3C => "UV blocked",
    IntegrityFailure = 0x3D => "Integrity failure",
    InvalidSubcommand = 0x3E => "Invalid subcommand",
    UvInvalid = 0x3F => "UV invalid",
    UnauthorizedPermission = 0x40 => "Unauthorized permission",
    Other = 0x7F => "Other error",
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.message(), self.to_u8())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StatusCode {}

impl StatusCode {
    /// Convert status code to byte value
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a success status
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Codes that mean the user or authenticator refused the operation
    pub fn is_denial(self) -> bool {
        matches!(
            self,
            Self::CredentialExcluded
                | Self::OperationDenied
                | Self::NoCredentials
                | Self::NotAllowed
                | Self::InvalidCredential
        )
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> u8 {
        status.to_u8()
    }
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl From<fido_client_crypto::CryptoError> for StatusCode {
    fn from(err: fido_client_crypto::CryptoError) -> Self {
        use fido_client_crypto::CryptoError;

        match err {
            CryptoError::InvalidPublicKey
            | CryptoError::InvalidPrivateKey
            | CryptoError::InvalidSignature
            | CryptoError::InvalidLength { .. } => Self::InvalidParameter,
            _ => Self::Other,
        }
    }
}

/// Result type for codec operations
pub type Result<T> = core::result::Result<T, StatusCode>;
