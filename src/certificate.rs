//! PKCS#12 inspection through `openssl`.
//!
//! The certificate is converted to X.509 text and scraped line by line for
//! `SHA1 Fingerprint=`, `subject=`, `notBefore=` and `notAfter=`. The private
//! key's friendly name is read with the key output filtered through `grep` so
//! key material never reaches the log.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex_lite::Regex;
use thiserror::Error;
use tracing::debug;

use crate::tool::{Invocation, ToolError, ToolRunner};

/// Certificate errors
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("could not read P12 certificate {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: ToolError,
    },

    #[error("private key name not found in P12 certificate {0}")]
    PrivateKeyNameNotFound(PathBuf),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Identity details read from a P12 certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct P12Properties {
    /// SHA-1 fingerprint, upper-case hex without separators
    pub fingerprint: Option<String>,
    /// Subject common name
    pub common_name: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl P12Properties {
    /// Whether the certificate is past its validity window at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after.map(|end| end < now).unwrap_or(false)
    }

    /// Parse `openssl x509 -noout -fingerprint -subject -dates` output.
    pub fn parse<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut props = P12Properties::default();

        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = split_into_key_value(line) else {
                continue;
            };

            if key.trim().eq_ignore_ascii_case("sha1 fingerprint") {
                props.fingerprint = Some(value.replace(':', "").trim().to_string());
            } else if key == "subject" {
                props.common_name = subject_common_name(value);
            } else if key == "notBefore" {
                props.not_before = parse_openssl_date(value);
            } else if key == "notAfter" {
                props.not_after = parse_openssl_date(value);
            }
        }

        props
    }
}

/// Split a line at its first `=`.
///
/// A line without `=` yields an empty key and the whole line as the value.
/// Only a line that *starts* with `=` is rejected. This mirrors the long
/// standing behavior of the task and is kept as-is.
pub fn split_into_key_value(line: &str) -> Option<(&str, &str)> {
    match line.find('=') {
        Some(0) => None,
        Some(i) => Some((&line[..i], &line[i + 1..])),
        None => Some(("", line)),
    }
}

static SLASH_CN: OnceLock<Option<Regex>> = OnceLock::new();
static COMMA_CN: OnceLock<Option<Regex>> = OnceLock::new();
static FRIENDLY_NAME: OnceLock<Option<Regex>> = OnceLock::new();

/// Compile `pattern` once into `cell`.
pub(crate) fn cached_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Extract the `CN` component of an X.509 subject.
///
/// Handles both the slash form (`/C=US/CN=Name/OU=X`) and the
/// comma form (`C = US, CN = Name, OU = X`).
pub fn subject_common_name(subject: &str) -> Option<String> {
    let slash = cached_regex(&SLASH_CN, r"/CN=(.*?)(?:/[A-Za-z]+=|$)")?;
    if let Some(caps) = slash.captures(subject) {
        return caps.get(1).map(|m| m.as_str().trim().to_string());
    }

    let comma = cached_regex(
        &COMMA_CN,
        r"(?:^|,)\s*CN\s*=\s*(.*?)\s*(?:,\s*[A-Za-z]+\s*=|$)",
    )?;
    comma
        .captures(subject.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Parse an openssl validity date such as `Nov 13 03:37:42 2018 GMT`.
pub fn parse_openssl_date(value: &str) -> Option<DateTime<Utc>> {
    let normalized: Vec<&str> = value
        .split_whitespace()
        .filter(|t| *t != "GMT" && *t != "UTC")
        .collect();
    let normalized = normalized.join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Extract the value of a `friendlyName:` line.
pub fn parse_friendly_name<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let re = cached_regex(&FRIENDLY_NAME, r"friendlyName: (.*)")?;
    lines
        .into_iter()
        .filter_map(|line| re.captures(line.trim()))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .find(|name| !name.is_empty())
}

/// Random password for throwaway keychains and key exports.
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

/// Client for the certificate toolkit.
#[derive(Debug, Clone)]
pub struct OpenSsl<R> {
    runner: R,
}

impl<R: ToolRunner> OpenSsl<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Read fingerprint, common name and validity window of a P12.
    pub fn p12_properties(
        &self,
        p12: &Path,
        password: Option<&str>,
    ) -> Result<P12Properties, CertificateError> {
        let password = password.unwrap_or("");
        let export = Invocation::new("openssl")
            .args(["pkcs12", "-in"])
            .path_arg(p12)
            .args(["-nokeys", "-passin"])
            .secret_arg(format!("pass:{}", password))
            .quiet();
        let inspect = Invocation::new("openssl")
            .args(["x509", "-noout", "-fingerprint", "-subject", "-dates"])
            .quiet();

        let out = self
            .runner
            .pipe(&export, &inspect, None)
            .map_err(|source| CertificateError::Unreadable {
                path: p12.to_path_buf(),
                source,
            })?;

        let props = P12Properties::parse(out.stdout.iter().map(String::as_str));
        debug!("P12 fingerprint: {:?}", props.fingerprint);
        debug!("P12 common name (CN): {:?}", props.common_name);
        debug!("NotBefore: {:?}", props.not_before);
        debug!("NotAfter: {:?}", props.not_after);
        Ok(props)
    }

    /// Read the friendly name of the P12's private key.
    pub fn private_key_name(
        &self,
        p12: &Path,
        password: Option<&str>,
    ) -> Result<String, CertificateError> {
        let password = password.unwrap_or("");
        let key_password = if password.is_empty() {
            generate_password()
        } else {
            password.to_string()
        };

        let export = Invocation::new("openssl")
            .args(["pkcs12", "-in"])
            .path_arg(p12)
            .args(["-nocerts", "-passin"])
            .secret_arg(format!("pass:{}", password))
            .arg("-passout")
            .secret_arg(format!("pass:{}", key_password))
            .quiet();
        let filter = Invocation::new("grep").arg("friendlyName").quiet();

        let out = match self.runner.pipe(&export, &filter, None) {
            Ok(out) => out,
            // grep exits 1 when nothing matched
            Err(ToolError::Failed { ref program, code: 1, .. }) if program == "grep" => {
                return Err(CertificateError::PrivateKeyNameNotFound(p12.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let name = parse_friendly_name(out.stdout.iter().map(String::as_str))
            .ok_or_else(|| CertificateError::PrivateKeyNameNotFound(p12.to_path_buf()))?;
        debug!("P12 private key name = {}", name);
        Ok(name)
    }
}
