// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{error, fmt, io, net, result};

/// A result of a function that may return a `RadioError`.
pub type Result<T> = result::Result<T, RadioError>;

// Macro to create an error enum with From converters for each input error class
macro_rules! define_errcodes {
    [ $typename:ident => $( $name:ident $(: $class:ty)? ),+ ] => {
        #[derive(Debug)]
        pub enum $typename {
            $(
                $name $( ($class) )?,
            )+
        }

        impl fmt::Display for $typename {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match self {
                    $(
                        $typename::$name(err) => write!(f, "{}", err),
                    )+
                }
            }
        }

        $( $(
            impl From<$class> for $typename {
                fn from(e: $class) -> Self {
                    $typename::$name(e)
                }
            } )?
        )+
    };
}

define_errcodes![
    RadioError =>
    Io: io::Error,
    AddrParse: net::AddrParseError,
    Protocol: String
];

impl error::Error for RadioError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            RadioError::Io(e) => Some(e),
            RadioError::AddrParse(e) => Some(e),
            RadioError::Protocol(_) => None,
        }
    }
}

impl RadioError {
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        RadioError::Protocol(msg.into())
    }
}
