use crate::models::TokenPair;
use keyring::Entry;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Keychain entry names the two tokens are stored under
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("Token store lock poisoned")]
    Poisoned,
}

/// Holder of the session's token pair.
///
/// Injected wherever tokens are read so tests can swap in [`MemoryTokenStore`].
/// Only the dispatcher's session operations (login, refresh, logout) write to it.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Result<Option<TokenPair>, TokenStoreError>;

    /// Replace both tokens; visible to the next `get`
    fn set(&self, pair: &TokenPair) -> Result<(), TokenStoreError>;

    fn clear(&self) -> Result<(), TokenStoreError>;

    /// True iff an access token is present. Nothing is validated locally.
    fn is_authenticated(&self) -> bool {
        matches!(self.get(), Ok(Some(pair)) if !pair.access.is_empty())
    }
}

/// In-memory store; nothing survives the process
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    pair: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            pair: RwLock::new(Some(pair)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<TokenPair>, TokenStoreError> {
        let pair = self.pair.read().map_err(|_| TokenStoreError::Poisoned)?;
        Ok(pair.clone())
    }

    fn set(&self, pair: &TokenPair) -> Result<(), TokenStoreError> {
        let mut slot = self.pair.write().map_err(|_| TokenStoreError::Poisoned)?;
        *slot = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        let mut slot = self.pair.write().map_err(|_| TokenStoreError::Poisoned)?;
        *slot = None;
        Ok(())
    }
}

/// Durable store in the system keychain, one entry per token.
/// The keychain is read lazily on first access and cached afterwards;
/// writes go through to the keychain before the cache is updated.
pub struct KeyringTokenStore {
    access: Entry,
    refresh: Entry,
    // None = not loaded yet
    cache: RwLock<Option<Option<TokenPair>>>,
}

impl std::fmt::Debug for KeyringTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringTokenStore")
            .field("entries", &[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
            .finish()
    }
}

impl KeyringTokenStore {
    pub fn new(service: &str) -> Result<Self, TokenStoreError> {
        Ok(Self {
            access: Entry::new(service, ACCESS_TOKEN_KEY)?,
            refresh: Entry::new(service, REFRESH_TOKEN_KEY)?,
            cache: RwLock::new(None),
        })
    }

    fn read_entry(entry: &Entry) -> Result<Option<String>, TokenStoreError> {
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(TokenStoreError::Keyring(e)),
        }
    }

    fn delete_entry(entry: &Entry) -> Result<(), TokenStoreError> {
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(TokenStoreError::Keyring(e)),
        }
    }

    fn load_from_keychain(&self) -> Result<Option<TokenPair>, TokenStoreError> {
        debug!("KeyringTokenStore: loading tokens from keychain");
        let Some(access) = Self::read_entry(&self.access)? else {
            debug!("KeyringTokenStore: no access token stored");
            return Ok(None);
        };
        let refresh = Self::read_entry(&self.refresh)?.unwrap_or_default();
        Ok(Some(TokenPair { access, refresh }))
    }
}

impl TokenStore for KeyringTokenStore {
    fn get(&self) -> Result<Option<TokenPair>, TokenStoreError> {
        if let Some(cached) = self
            .cache
            .read()
            .map_err(|_| TokenStoreError::Poisoned)?
            .as_ref()
        {
            return Ok(cached.clone());
        }

        let loaded = self.load_from_keychain()?;
        let mut cache = self.cache.write().map_err(|_| TokenStoreError::Poisoned)?;
        // A concurrent set/clear may have filled the cache meanwhile; it wins
        Ok(cache.get_or_insert(loaded).clone())
    }

    fn set(&self, pair: &TokenPair) -> Result<(), TokenStoreError> {
        self.access.set_password(&pair.access)?;
        let refresh_written = if pair.has_refresh() {
            self.refresh.set_password(&pair.refresh).map_err(TokenStoreError::from)
        } else {
            Self::delete_entry(&self.refresh)
        };

        if let Err(e) = refresh_written {
            // Never leave the new access token next to a stale refresh token
            warn!("KeyringTokenStore: refresh token write failed, removing both entries: {}", e);
            *self.cache.write().map_err(|_| TokenStoreError::Poisoned)? = Some(None);
            let _ = Self::delete_entry(&self.access);
            let _ = Self::delete_entry(&self.refresh);
            return Err(e);
        }

        *self.cache.write().map_err(|_| TokenStoreError::Poisoned)? = Some(Some(pair.clone()));
        info!("KeyringTokenStore: stored token pair");
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        // Drop the cached pair first so a failing keychain can't keep the session alive
        *self.cache.write().map_err(|_| TokenStoreError::Poisoned)? = Some(None);
        Self::delete_entry(&self.access)?;
        Self::delete_entry(&self.refresh)?;
        info!("KeyringTokenStore: cleared token pair");
        Ok(())
    }
}
