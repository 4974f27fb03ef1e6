//! Cached device settings over a record store

use heapless::String;
use relay_hal::{FormFields, RecordStorage};

use crate::config::{DeviceConfig, CONFIG_RECORD_MAX};
use crate::error::{ConfigIssue, PersistenceError};
use crate::tls::Fingerprint;

/// Device settings with write-through persistence.
///
/// Every update encodes the full record and stores it; the cached copy only
/// changes once storage reported success.
pub struct Settings<S> {
    storage: S,
    config: DeviceConfig,
    /// Why the stored record was not used at load time
    load_issue: Option<ConfigIssue>,
}

impl<S: RecordStorage> Settings<S> {
    /// Load the stored record, falling back to defaults when it is missing or
    /// unusable. Never fails; see [`issue`](Self::issue).
    pub async fn load(mut storage: S) -> Self {
        let mut buf = [0u8; CONFIG_RECORD_MAX];
        let loaded = match storage.read(&mut buf).await {
            Ok(Some(len)) => DeviceConfig::decode(&buf[..len]),
            Ok(None) => Err(ConfigIssue::Missing),
            Err(_) => {
                warn!("Settings read failed");
                Err(ConfigIssue::Corrupt)
            }
        };

        match loaded {
            Ok(config) => {
                info!("Settings loaded");
                Self {
                    storage,
                    config,
                    load_issue: None,
                }
            }
            Err(issue) => {
                warn!("Using default settings: {}", issue);
                Self {
                    storage,
                    config: DeviceConfig::default(),
                    load_issue: Some(issue),
                }
            }
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Why these settings cannot drive normal operation, if they cannot
    pub fn issue(&self) -> Option<ConfigIssue> {
        self.load_issue.or_else(|| self.config.validate().err())
    }

    pub fn pin(&self) -> Option<Fingerprint> {
        self.config.fingerprint
    }

    pub async fn set_provisioning(&mut self, enabled: bool) -> Result<(), PersistenceError> {
        let mut next = self.config.clone();
        next.provisioning = enabled;
        self.commit(next).await
    }

    /// Store the first captured fingerprint.
    ///
    /// An existing pin is never replaced; storing the same value again is a
    /// no-op.
    pub async fn store_pin(&mut self, fp: Fingerprint) -> Result<(), PersistenceError> {
        match self.config.fingerprint {
            Some(existing) if existing.matches(&fp) => Ok(()),
            Some(_) => Err(PersistenceError::PinAlreadySet),
            None => {
                let mut next = self.config.clone();
                next.fingerprint = Some(fp);
                self.commit(next).await
            }
        }
    }

    /// Forget the pin so the next bring-up captures a fresh one
    pub async fn clear_pin(&mut self) -> Result<(), PersistenceError> {
        let mut next = self.config.clone();
        next.fingerprint = None;
        self.commit(next).await
    }

    /// Apply a provisioning portal submission and leave provisioning.
    ///
    /// Absent fields read as empty, as the portal always posts the full form.
    /// An empty `fingerprint` clears the pin.
    pub async fn apply_submission<F: FormFields>(
        &mut self,
        form: &F,
    ) -> Result<(), PersistenceError> {
        let mut next = self.config.clone();
        next.ssid = form_text(form, "ssid")?;
        next.password = form_text(form, "pass")?;
        next.collector = form_text(form, "host")?;
        next.token = form_text(form, "token")?;
        if let Some(id) = form.field("id") {
            next.id = checked_text(id)?;
        }
        next.fingerprint = match form.field("fingerprint").map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(Fingerprint::parse(text).map_err(|_| {
                warn!("Submitted fingerprint does not parse");
                PersistenceError::InvalidField
            })?),
        };
        next.provisioning = false;
        self.commit(next).await
    }

    /// Replace everything with factory defaults
    pub async fn reset(&mut self) -> Result<(), PersistenceError> {
        self.commit(DeviceConfig::default()).await
    }

    async fn commit(&mut self, next: DeviceConfig) -> Result<(), PersistenceError> {
        let mut buf = [0u8; CONFIG_RECORD_MAX];
        let len = next.encode(&mut buf)?;
        self.storage.write(&buf[..len]).await.map_err(|_| {
            error!("Settings write failed");
            PersistenceError::Storage
        })?;
        debug!("Settings stored ({} bytes)", len);
        self.config = next;
        self.load_issue = None;
        Ok(())
    }
}

fn form_text<F: FormFields, const N: usize>(
    form: &F,
    name: &str,
) -> Result<String<N>, PersistenceError> {
    checked_text(form.field(name).unwrap_or(""))
}

/// Copy a submitted value, refusing characters the record encoding would
/// have to escape.
fn checked_text<const N: usize>(value: &str) -> Result<String<N>, PersistenceError> {
    if value.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return Err(PersistenceError::InvalidField);
    }
    let mut text = String::new();
    text.push_str(value)
        .map_err(|_| PersistenceError::InvalidField)?;
    Ok(text)
}
