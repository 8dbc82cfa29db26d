//! Application state snapshots and their sealed, checksummed form.
//!
//! The engine treats ledger data as opaque JSON. The only structural rule it
//! enforces is that a payload carries at least one of `transactions`,
//! `accounts` or `settings`; anything else is rejected before it can reach
//! the caller's state.

use crate::{checksum, error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Full in-memory ledger data at a point in time.
///
/// Passed by value per call and never retained by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

impl ApplicationState {
    /// Create a state with all three sections present.
    pub fn new(transactions: Value, accounts: Value, settings: Value) -> Self {
        Self {
            transactions: Some(transactions),
            accounts: Some(accounts),
            settings: Some(settings),
        }
    }

    /// Builder: set the transactions section.
    pub fn with_transactions(mut self, transactions: Value) -> Self {
        self.transactions = Some(transactions);
        self
    }

    /// Builder: set the accounts section.
    pub fn with_accounts(mut self, accounts: Value) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Builder: set the settings section.
    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }

    /// True when none of the known sections is present.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_none() && self.accounts.is_none() && self.settings.is_none()
    }

    /// Reject payloads that carry no known section.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidPayload(
                "payload has none of transactions, accounts, settings".into(),
            ));
        }
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    /// Parse and validate a JSON payload.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| Error::InvalidPayload(e.to_string()))?;
        if !value.is_object() {
            return Err(Error::InvalidPayload("payload is not a JSON object".into()));
        }
        let state: Self =
            serde_json::from_value(value).map_err(|e| Error::InvalidPayload(e.to_string()))?;
        state.validate()?;
        Ok(state)
    }
}

/// A serialized state with its checksum and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBlob {
    pub json: String,
    pub checksum: String,
    pub size_bytes: u64,
}

impl StateBlob {
    /// Serialize and fingerprint a state.
    pub fn seal(state: &ApplicationState) -> Result<Self> {
        let json = state.to_json()?;
        let checksum = checksum::checksum(json.as_bytes());
        let size_bytes = json.len() as u64;
        Ok(Self {
            json,
            checksum,
            size_bytes,
        })
    }

    /// Verify `json` against `expected` and parse it.
    ///
    /// Nothing is returned unless both the checksum and the payload check out.
    pub fn open(json: &str, expected: &str) -> Result<ApplicationState> {
        if !checksum::verify(json.as_bytes(), expected) {
            return Err(Error::ChecksumMismatch {
                expected: expected.to_string(),
                actual: checksum::checksum(json.as_bytes()),
            });
        }
        ApplicationState::from_json(json)
    }
}
