use std::{collections::HashMap, fmt, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A source of secret key material, such as a key broker service.
#[async_trait]
pub trait KeyBroker: Send + Sync {
    /// Retrieves the key stored under `key`.
    async fn get_key(&self, key: &SecretKey) -> anyhow::Result<Vec<u8>>;
}

/// The name of a secret held by the key broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SecretKey {
    /// The public key the worker node presents to the guest.
    WorkloadPublicKey,

    /// The private key the guest uses to authenticate itself to the worker node.
    PairPrivateKey,

    /// Any other resource, by its broker path.
    Custom(String),
}

/// A set of named secrets retrieved lazily from a [`KeyBroker`].
///
/// Only the keys that have not been retrieved yet are requested on each [`fetch`](Self::fetch).
pub struct Secrets {
    broker: Arc<dyn KeyBroker>,
    wanted: Vec<SecretKey>,
    fetched: Mutex<HashMap<SecretKey, Vec<u8>>>,
}

/// Retrieved key material.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KeyMaterial {
    keys: HashMap<SecretKey, Vec<u8>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SecretKey {
    /// Returns the resource path of the key in the broker.
    pub fn resource_path(&self) -> &str {
        match self {
            Self::WorkloadPublicKey => "default/sshclient/publicKey",
            Self::PairPrivateKey => "default/podvm/privateKey",
            Self::Custom(path) => path,
        }
    }
}

impl Secrets {
    /// Creates an empty set backed by `broker`.
    pub fn new(broker: Arc<dyn KeyBroker>) -> Self {
        Self {
            broker,
            wanted: Vec::new(),
            fetched: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a key to be retrieved.
    pub fn add_key(&mut self, key: SecretKey) -> &mut Self {
        if !self.wanted.contains(&key) {
            self.wanted.push(key);
        }
        self
    }

    /// Returns the registered keys.
    pub fn keys(&self) -> &[SecretKey] {
        &self.wanted
    }

    /// Retrieves every registered key not retrieved yet and returns the whole set.
    pub async fn fetch(&self) -> anyhow::Result<KeyMaterial> {
        let mut fetched = self.fetched.lock().await;
        for key in &self.wanted {
            if fetched.contains_key(key) {
                continue;
            }

            tracing::debug!(key = %key, "retrieving key from key broker");
            let value = self
                .broker
                .get_key(key)
                .await
                .with_context(|| format!("failed to retrieve key {key}"))?;
            fetched.insert(key.clone(), value);
        }

        Ok(KeyMaterial {
            keys: fetched.clone(),
        })
    }
}

impl KeyMaterial {
    /// Returns the value of `key`, if retrieved.
    pub fn get(&self, key: &SecretKey) -> Option<&[u8]> {
        self.keys.get(key).map(Vec::as_slice)
    }

    /// Returns whether `key` has been retrieved.
    pub fn contains(&self, key: &SecretKey) -> bool {
        self.keys.contains_key(key)
    }

    /// Returns the number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns whether there are no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_path())
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("wanted", &self.wanted)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.keys.keys().map(|key| (key, "<redacted>")))
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
