use base64::{
    engine::{
        general_purpose::STANDARD as b64, Engine,
    },
    DecodeError,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt};
use thiserror::Error as ThisError;

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefError {
    #[error("Empty {ref_type} id")]
    Empty { ref_type: &'static str },
    #[error("Does not match as {ref_type}: {input}")]
    BadFormat {
        ref_type: &'static str,
        input: String,
    },
    #[error("Failed to decode base64: {0}")]
    DecodeError(#[from] DecodeError),
}

/// Wire form of an identifier. Backends disagree on whether ids are strings
/// or integers, both land here before validation.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> String {
        match raw {
            RawId::Text(text) => text,
            RawId::Signed(number) => number.to_string(),
            RawId::Unsigned(number) => number.to_string(),
        }
    }
}

macro_rules! opaque_id {
    ($name:ident, $ref_type:literal) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
        #[serde(try_from = "RawId", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn from_string(string: String) -> Result<Self, RefError> {
                if string.trim().is_empty() {
                    Err(RefError::Empty {
                        ref_type: $ref_type,
                    })
                } else {
                    Ok(Self(string))
                }
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl TryFrom<String> for $name {
            type Error = RefError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                $name::from_string(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = RefError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                $name::from_string(value.to_string())
            }
        }

        impl TryFrom<RawId> for $name {
            type Error = RefError;

            fn try_from(value: RawId) -> Result<Self, Self::Error> {
                $name::from_string(value.into())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }

        impl From<&$name> for String {
            fn from(value: &$name) -> String {
                value.0.clone()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.0.as_str())
            }
        }
    };
}

opaque_id!(PostId, "Post");
opaque_id!(CommentId, "Comment");
opaque_id!(ActorId, "Actor");

const PROVISIONAL_PREFIX: &str = "~pending-";

impl CommentId {
    // Local-only id for a comment the remote has not acknowledged yet
    pub fn provisional(seq: u64) -> Self {
        Self(format!("{}{}", PROVISIONAL_PREFIX, seq))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }
}

/// The single image attached to a post or comment: either a plain URL handed
/// back by the upload service, or a content-addressed blob ref.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageRef {
    Url(String),
    Blob(Vec<u8>),
}

impl ImageRef {
    // From string that starts with http(s):// or &
    pub fn from_string(string: String) -> Result<Self, RefError> {
        let trimmed = string.trim();
        if Self::url_regex().is_match(trimmed) {
            Ok(ImageRef::Url(trimmed.to_string()))
        } else if Self::blob_regex().is_match(trimmed) {
            Ok(ImageRef::Blob(Self::parse_blob_data(trimmed)?))
        } else {
            Err(RefError::BadFormat {
                ref_type: "Image",
                input: string,
            })
        }
    }

    pub fn url_regex() -> &'static Regex {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^https?://[^\s]+$").unwrap();
        }
        &RE
    }

    pub fn blob_regex() -> &'static Regex {
        lazy_static! {
            static ref RE: Regex = canonical_base64("&", ".sha256", 32);
        }
        &RE
    }

    pub fn is_match(string: &str) -> bool {
        Self::url_regex().is_match(string) || Self::blob_regex().is_match(string)
    }

    pub fn blob_hash(&self) -> Option<&[u8]> {
        match self {
            ImageRef::Url(_) => None,
            ImageRef::Blob(hash) => Some(hash.as_slice()),
        }
    }

    fn parse_blob_data(key: &str) -> Result<Vec<u8>, RefError> {
        let base64_data = &key[1..key.len() - 7];
        Ok(b64.decode(base64_data)?)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = RefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ImageRef::from_string(value)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Url(url) => f.write_str(url),
            ImageRef::Blob(hash) => write!(f, "&{}.sha256", b64.encode(hash)),
        }
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> String {
        value.to_string()
    }
}

// https://github.com/dominictarr/is-canonical-base64/blob/master/index.js
fn canonical_base64(prefix: &str, suffix: &str, length: u32) -> Regex {
    let char = "[a-zA-Z0-9/+]";
    let trail2 = "[AQgw]==";
    let trail4 = "[AEIMQUYcgkosw048]=";

    let pad = length % 3;
    let trail = if pad == 0 {
        ""
    } else if pad == 1 {
        trail2
    } else {
        trail4
    };

    let re = format!(
        "^{}{}{{{}}}{}{}$",
        regex::escape(prefix),
        char,
        (length * 8) / 6,
        trail,
        regex::escape(suffix)
    );

    Regex::new(&re).unwrap()
}
