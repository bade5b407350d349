//! Join link generation and parsing
//!
//! Link format: <base>/join?code=<CODE>
//!
//! The older `<base>/room/<CODE>` form is still accepted when parsing.

use std::str::FromStr;

use pointroom_core::RoomCode;

use crate::error::{Error, Result};

/// Shareable link that resolves to a room code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinLink {
    /// Scheme and host, without a trailing slash
    pub base: String,
    pub code: RoomCode,
}

impl JoinLink {
    pub fn new(base: &str, code: RoomCode) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            code,
        }
    }

    /// Format as URL string
    pub fn to_url(&self) -> String {
        format!("{}/join?code={}", self.base, self.code)
    }

    /// Parse from URL string
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some((base, query)) = s.split_once("/join?") {
            let raw = query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "code")
                .map(|(_, value)| value)
                .ok_or_else(|| Error::Protocol("Invalid join link: missing code".into()))?;
            return Self::build(base, raw);
        }

        if let Some((base, rest)) = s.split_once("/room/") {
            let raw = rest.split(['/', '?', '#']).next().unwrap_or_default();
            return Self::build(base, raw);
        }

        Err(Error::Protocol(format!(
            "Invalid join link: unrecognized path in '{}'",
            s
        )))
    }

    fn build(base: &str, raw_code: &str) -> Result<Self> {
        if raw_code.is_empty() {
            return Err(Error::Protocol("Invalid join link: empty code".into()));
        }
        let code = RoomCode::parse(raw_code)?;
        Ok(Self::new(base, code))
    }
}

impl std::fmt::Display for JoinLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

impl FromStr for JoinLink {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
