use serde::{Deserialize, Deserializer};
use std::{
    convert::Infallible,
    fmt::{Debug, Formatter},
    str::FromStr,
};

/// Bearer token sent with every API request.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ApiToken(String);

impl ApiToken {
    #[must_use]
    pub fn new(token: String) -> Self {
        Self(token)
    }

    #[must_use]
    pub fn as_token_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ApiToken {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_owned()))
    }
}

impl Debug for ApiToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiToken").field(&"[redacted]").finish()
    }
}

impl<'de> Deserialize<'de> for ApiToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        Ok(Self(inner.trim().to_owned()))
    }
}
