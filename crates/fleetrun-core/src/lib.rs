pub mod filter;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use filter::{compile, CompiledFilter, EvalError, FilterError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid instance: {0}")]
    InvalidInstance(String),
    #[error("Invalid state value: {0}")]
    InvalidState(i32),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Instance labels, keyed by label name.
pub type Labels = BTreeMap<String, String>;

/// Cloud backend an instance was discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTag {
    Aws,
    Gcp,
}

impl ProviderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTag::Aws => "aws",
            ProviderTag::Gcp => "gcp",
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of an instance's addresses a dispatch should dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    #[default]
    Public,
    Private,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressKind::Public => "public",
            AddressKind::Private => "private",
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-normalized description of one managed compute node.
///
/// Built fresh on every discovery call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    name: String,
    private_address: String,
    public_address: String,
    labels: Labels,
    provider: ProviderTag,
}

impl Instance {
    pub fn new(
        name: impl Into<String>,
        private_address: impl Into<String>,
        public_address: impl Into<String>,
        labels: Labels,
        provider: ProviderTag,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::InvalidInstance(
                "instance name cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            name,
            private_address: private_address.into(),
            public_address: public_address.into(),
            labels,
            provider,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn private_address(&self) -> &str {
        &self.private_address
    }

    pub fn public_address(&self) -> &str {
        &self.public_address
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn provider(&self) -> ProviderTag {
        self.provider
    }

    /// Address of the requested kind, or `None` if the provider did not expose one.
    pub fn address(&self, kind: AddressKind) -> Option<&str> {
        let address = match kind {
            AddressKind::Private => self.private_address.as_str(),
            AddressKind::Public => self.public_address.as_str(),
        };
        (!address.is_empty()).then_some(address)
    }

    /// An instance can be dispatched to when at least one address is known.
    pub fn is_reachable(&self) -> bool {
        !self.private_address.is_empty() || !self.public_address.is_empty()
    }
}

/// Outcome tag carried by every operation response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    /// Not determinable, or not applicable (pure reads).
    #[default]
    Unknown,
    /// The operation caused an observable transition.
    Changed,
    /// The target already was in the desired state.
    Unchanged,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Unknown => "UNKNOWN",
            State::Changed => "CHANGED",
            State::Unchanged => "UNCHANGED",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
