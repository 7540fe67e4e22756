//! P12 certificate installation

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{KeychainError, PartitionListOutcome, Security, TEMP_KEYCHAIN_NAME};
use crate::certificate::{OpenSsl, P12Properties};
use crate::tool::ToolRunner;
use crate::warnings::Warnings;

/// Which keychain receives the certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeychainLocation {
    /// Per-job keychain in the temp directory, always recreated
    Temp,
    /// The user's default keychain, reused
    Default,
    /// A keychain at the given path, reused when it exists
    Custom(PathBuf),
}

/// Everything needed to install one P12 certificate.
#[derive(Debug, Clone)]
pub struct CertificateInstall<'a> {
    pub p12: &'a Path,
    pub p12_password: Option<&'a str>,
    pub location: KeychainLocation,
    pub keychain_password: &'a str,
    pub temp_dir: &'a Path,
}

/// Outcome of a certificate installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledCertificate {
    /// Keychain the certificate now lives in
    pub keychain: PathBuf,
    /// Whether the keychain was created by this installation
    pub created: bool,
    /// Whether teardown should delete the keychain
    pub delete_after: bool,
    pub properties: P12Properties,
}

/// Install a P12 certificate into a keychain and put that keychain on the
/// search list.
///
/// Reused keychains additionally get the private key's partition list set,
/// and lose the imported certificate again if the keychain cannot be put on
/// the search list.
pub fn install_certificate<R: ToolRunner>(
    runner: &R,
    request: &CertificateInstall<'_>,
    now: DateTime<Utc>,
    warnings: &mut Warnings,
) -> Result<InstalledCertificate, KeychainError> {
    let openssl = OpenSsl::new(runner);
    let security = Security::new(runner);

    let properties = match openssl.p12_properties(request.p12, request.p12_password) {
        Ok(props) => props,
        Err(e) => {
            if request.p12_password.unwrap_or("").is_empty() {
                warnings.push("No P12 password was supplied; the certificate may require one.");
            }
            return Err(e.into());
        }
    };
    info!(
        "Installing certificate {} ({})",
        properties.common_name.as_deref().unwrap_or("<unknown>"),
        properties.fingerprint.as_deref().unwrap_or("<no fingerprint>")
    );
    if properties.is_expired_at(now) {
        let expired_on = properties
            .not_after
            .map(|d| d.to_rfc2822())
            .unwrap_or_default();
        warnings.push(format!(
            "The certificate {} expired on {}.",
            properties.common_name.as_deref().unwrap_or("<unknown>"),
            expired_on
        ));
    }

    let (keychain, reuse) = match &request.location {
        KeychainLocation::Temp => (request.temp_dir.join(TEMP_KEYCHAIN_NAME), false),
        KeychainLocation::Default => (security.default_keychain()?, true),
        KeychainLocation::Custom(path) => (path.clone(), true),
    };
    let setup = !(reuse && keychain.exists());
    debug!("keychain {} (create = {})", keychain.display(), setup);

    if setup {
        security.delete_keychain(&keychain)?;
        security.create_keychain(&keychain, request.keychain_password)?;
        security.set_keychain_settings(&keychain)?;
    }

    security.unlock(&keychain, request.keychain_password)?;
    security.import_p12(&keychain, request.p12, request.p12_password)?;

    if !setup {
        let key_name = openssl.private_key_name(request.p12, request.p12_password)?;
        let outcome =
            security.set_key_partition_list(&keychain, request.keychain_password, &key_name)?;
        if outcome == PartitionListOutcome::Unsupported {
            warnings.push(
                "The installed 'security' tool does not support set-key-partition-list; \
                 skipping the private key partition list.",
            );
        }
    }

    if let Err(e) = security.ensure_in_search_list(&keychain) {
        if !setup {
            if let Some(ref fingerprint) = properties.fingerprint {
                if let Err(cleanup) = security.delete_certificate(&keychain, fingerprint) {
                    warnings.push(format!(
                        "Failed to remove certificate {} from {}: {}",
                        fingerprint,
                        keychain.display(),
                        cleanup
                    ));
                }
            }
        }
        return Err(e);
    }

    Ok(InstalledCertificate {
        keychain,
        created: setup,
        delete_after: request.location == KeychainLocation::Temp,
        properties,
    })
}
