//! Identity registry
//!
//! Bidirectional, unique mapping between chat users and wallet addresses.
//! Each registration is two store entries keyed by the raw identifiers:
//! `"<userId>" -> "<address>"` and `"<address>" -> "<userId>"`. Both are
//! written and deleted through a [`WriteBatch`] so a failure on the second
//! key rolls back the first.

use crate::types::{Address, UserId};
use dao_kv_store::{BatchError, KeyValueStore, StoreError, WriteBatch};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Either side of a registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identifier {
    User(UserId),
    Address(Address),
}

impl Identifier {
    fn key(&self) -> String {
        match self {
            Identifier::User(user) => user.to_string(),
            Identifier::Address(address) => address.to_string(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("User already registered address {address}")]
    AlreadyRegistered { address: String },
    #[error("Address {address} is registered to another user")]
    AddressClaimed { address: String },
    #[error("Registration pair left half-written: {0}")]
    PartialWrite(BatchError),
    #[error("Registration write failed and was rolled back: {0}")]
    WriteFailed(BatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<BatchError> for RegistryError {
    fn from(err: BatchError) -> Self {
        if err.is_partial() {
            RegistryError::PartialWrite(err)
        } else {
            RegistryError::WriteFailed(err)
        }
    }
}

/// Result of an unregister call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unregistered {
    /// Both entries were deleted; `paired` is the other side
    Removed { paired: String },
    /// Nothing was registered under the identifier
    NotFound,
}

#[derive(Clone)]
pub struct IdentityRegistry {
    store: Arc<dyn KeyValueStore>,
    /// Held from the uniqueness checks through the commit of a pair
    writes: Arc<Mutex<()>>,
}

impl IdentityRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Claim `address` for `user`.
    ///
    /// Fails without touching the store if the user already has an address
    /// or if the address belongs to someone else.
    pub async fn register(&self, user: UserId, address: &Address) -> Result<(), RegistryError> {
        let user_key = user.to_string();
        let address_key = address.to_string();
        let _guard = self.writes.lock().await;

        if let Some(existing) = self.store.get_string(&user_key).await? {
            return Err(RegistryError::AlreadyRegistered { address: existing });
        }
        if let Some(owner) = self.store.get_string(&address_key).await? {
            debug!(user_id = %user, owner = %owner, address = %address, "Address already claimed");
            return Err(RegistryError::AddressClaimed {
                address: address_key,
            });
        }

        let result = WriteBatch::new(self.store.as_ref())
            .set(user_key.clone(), Value::String(address_key.clone()))
            .set(address_key.clone(), Value::String(user_key))
            .commit()
            .await;

        match result {
            Ok(()) => {
                info!(user_id = %user, address = %address, "Address registered");
                Ok(())
            }
            Err(e) => {
                if e.is_partial() {
                    error!(
                        user_id = %user,
                        address = %address,
                        error = %e,
                        "Registration partially written"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Remove the registration containing `identifier`.
    ///
    /// An unknown identifier is not an error: it returns
    /// [`Unregistered::NotFound`] and leaves the store unchanged.
    pub async fn unregister(&self, identifier: &Identifier) -> Result<Unregistered, RegistryError> {
        let key = identifier.key();
        let _guard = self.writes.lock().await;
        let Some(paired) = self.store.get_string(&key).await? else {
            debug!(identifier = %identifier, "Unregister of unknown identifier ignored");
            return Ok(Unregistered::NotFound);
        };

        let result = WriteBatch::new(self.store.as_ref())
            .delete(key.clone())
            .delete(paired.clone())
            .commit()
            .await;

        match result {
            Ok(()) => {
                info!(identifier = %identifier, paired = %paired, "Registration removed");
                Ok(Unregistered::Removed { paired })
            }
            Err(e) => {
                if e.is_partial() {
                    error!(
                        identifier = %identifier,
                        paired = %paired,
                        error = %e,
                        "Unregistration partially applied"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// The other side of a registration, if any
    pub async fn lookup(&self, identifier: &Identifier) -> Result<Option<String>, RegistryError> {
        Ok(self.store.get_string(&identifier.key()).await?)
    }

    /// Registered address of `user`
    pub async fn address_of(&self, user: UserId) -> Result<Option<Address>, RegistryError> {
        let Some(raw) = self.lookup(&Identifier::User(user)).await? else {
            return Ok(None);
        };
        match raw.parse() {
            Ok(address) => Ok(Some(address)),
            Err(e) => Err(RegistryError::Store(StoreError::Corrupt {
                key: user.to_string(),
                reason: e.to_string(),
            })),
        }
    }

    /// Owner of `address`
    pub async fn user_of(&self, address: &Address) -> Result<Option<UserId>, RegistryError> {
        let Some(raw) = self.lookup(&Identifier::Address(address.clone())).await? else {
            return Ok(None);
        };
        match raw.parse() {
            Ok(user) => Ok(Some(user)),
            Err(e) => Err(RegistryError::Store(StoreError::Corrupt {
                key: address.to_string(),
                reason: e.to_string(),
            })),
        }
    }
}
