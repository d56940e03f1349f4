//! Shared, persisted credential database.
//!
//! [`CredentialStore`] is the only writer of the database file. Both the
//! synchronizer and the administrative commands go through it, so an
//! enrollment can never race a reconciliation pass into an inconsistent
//! view. Stores in different processes serialize on a lock file next to
//! the database.
//!
//! Every mutation follows the same sequence:
//!
//! 1. take the write lock, then the file lock
//! 2. re-read the file, so changes made by other processes are kept
//! 3. apply the change to that copy
//! 4. save the copy atomically
//! 5. swap the copy in and release the file lock
//!
//! A failed save therefore leaves both memory and disk at the previous
//! state.

use std::fmt;
use std::path::{Path, PathBuf};

use keykeeper_core::{Coin, Identity};
use rand_core::OsRng;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::database::Database;
use crate::envelope::KdfParams;
use crate::error::{StorageError, StorageResult};
use crate::lock::FileLock;
use crate::provision::CoinProvisioner;

/// Credential database bound to its file and password.
pub struct CredentialStore {
    path: PathBuf,
    password: Zeroizing<String>,
    params: KdfParams,
    database: RwLock<Database>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("encrypted", &!self.password.is_empty())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Load (or create in memory) the database at `path`.
    ///
    /// An empty password means the file is stored in plain JSON. A new
    /// database is not written until the first mutation or [`save`](Self::save).
    pub async fn open(path: impl Into<PathBuf>, password: impl Into<String>) -> StorageResult<Self> {
        Self::open_with_params(path, password, KdfParams::default()).await
    }

    /// Like [`open`](Self::open), with explicit key derivation parameters
    /// for subsequent saves.
    pub async fn open_with_params(
        path: impl Into<PathBuf>,
        password: impl Into<String>,
        params: KdfParams,
    ) -> StorageResult<Self> {
        let path = path.into();
        let password = Zeroizing::new(password.into());
        let database = load_blocking(path.clone(), password.clone()).await?;

        info!(
            path = %path.display(),
            coins = database.len(),
            identity = %database.identity().address,
            "Credential database loaded"
        );

        Ok(Self {
            path,
            password,
            params,
            database: RwLock::new(database),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point-in-time copy of the database.
    pub async fn snapshot(&self) -> Database {
        self.database.read().await.clone()
    }

    /// Borrow the database under a read lock.
    pub async fn read(&self) -> RwLockReadGuard<'_, Database> {
        self.database.read().await
    }

    /// Generate a coin for `name` and persist it.
    pub async fn add_coin(&self, name: &str) -> StorageResult<Coin> {
        let coin = self.mutate(|db| db.generate_coin(name)).await?;
        info!(name, address = %coin.address, "Coin added");
        Ok(coin)
    }

    /// Generate a coin, program it onto a token, then persist it.
    ///
    /// Nothing is stored if provisioning fails. Both locks are held for the
    /// whole enrollment so the name cannot be claimed concurrently, not even
    /// by another process.
    pub async fn enroll<P: CoinProvisioner>(
        &self,
        name: &str,
        provisioner: &P,
    ) -> StorageResult<Coin> {
        let mut guard = self.database.write().await;
        let (lock, mut next) = self.lock_and_load(&guard).await?;
        let coin = next.new_coin(name, &mut OsRng)?;

        debug!(name, address = %coin.address, "Provisioning coin");
        provisioner.provision(name, &coin).await?;

        next.insert_coin(name, coin.clone())?;
        *guard = self.persist(next).await?;
        drop(lock);

        info!(name, address = %coin.address, "Coin enrolled");
        Ok(coin)
    }

    /// Remove the coin registered under `name` and persist.
    ///
    /// Returns `None` without touching the file when the name is unknown.
    pub async fn remove_coin(&self, name: &str) -> StorageResult<Option<Coin>> {
        let mut guard = self.database.write().await;
        let (lock, mut next) = self.lock_and_load(&guard).await?;
        if !next.names().contains_key(name) {
            debug!(name, "No coin to remove");
            *guard = next;
            return Ok(None);
        }

        let removed = next.remove_coin(name);
        *guard = self.persist(next).await?;
        drop(lock);

        if let Some(coin) = &removed {
            info!(name, address = %coin.address, "Coin removed");
        }
        Ok(removed)
    }

    /// Replace the central identity and persist.
    ///
    /// Every coin bonded to the old identity must be re-provisioned
    /// afterwards; the firmware is reset on the next configuration sync.
    pub async fn regenerate_identity(&self) -> StorageResult<Identity> {
        let identity = self
            .mutate(|db| Ok(db.generate_identity().clone()))
            .await?;
        info!(address = %identity.address, "Identity regenerated");
        Ok(identity)
    }

    /// Write the in-memory database to disk, replacing the file.
    pub async fn save(&self) -> StorageResult<()> {
        let guard = self.database.write().await;
        let lock = self.lock().await?;
        self.persist(guard.clone()).await?;
        drop(lock);
        Ok(())
    }

    /// Re-read the file, discarding the in-memory state.
    ///
    /// While the file does not exist yet the in-memory database is kept.
    pub async fn reload(&self) -> StorageResult<()> {
        let mut guard = self.database.write().await;
        let path = self.path.clone();
        let password = self.password.clone();
        let loaded = tokio::task::spawn_blocking(move || Database::load_existing(&path, &password))
            .await
            .map_err(|err| StorageError::Internal(format!("load task failed: {err}")))??;

        if let Some(database) = loaded {
            *guard = database;
        }
        debug!(path = %self.path.display(), coins = guard.len(), "Credential database reloaded");
        Ok(())
    }

    async fn mutate<T, F>(&self, change: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Database) -> StorageResult<T>,
    {
        let mut guard = self.database.write().await;
        let (lock, mut next) = self.lock_and_load(&guard).await?;
        let output = change(&mut next)?;
        *guard = self.persist(next).await?;
        drop(lock);
        Ok(output)
    }

    async fn lock(&self) -> StorageResult<FileLock> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || FileLock::acquire(&path))
            .await
            .map_err(|err| StorageError::Internal(format!("lock task failed: {err}")))?
    }

    /// Take the file lock and read the latest saved database.
    ///
    /// `current` stands in for a file that does not exist yet.
    async fn lock_and_load(&self, current: &Database) -> StorageResult<(FileLock, Database)> {
        let path = self.path.clone();
        let password = self.password.clone();

        let (lock, loaded) = tokio::task::spawn_blocking(
            move || -> StorageResult<(FileLock, Option<Database>)> {
                let lock = FileLock::acquire(&path)?;
                let loaded = Database::load_existing(&path, &password)?;
                Ok((lock, loaded))
            },
        )
        .await
        .map_err(|err| StorageError::Internal(format!("load task failed: {err}")))??;

        Ok((lock, loaded.unwrap_or_else(|| current.clone())))
    }

    /// Save `database` off the async runtime and hand it back on success.
    async fn persist(&self, database: Database) -> StorageResult<Database> {
        let path = self.path.clone();
        let password = self.password.clone();
        let params = self.params;

        tokio::task::spawn_blocking(move || -> StorageResult<Database> {
            database.save_with_params(&path, &password, &params)?;
            Ok(database)
        })
        .await
        .map_err(|err| StorageError::Internal(format!("save task failed: {err}")))?
    }
}

async fn load_blocking(path: PathBuf, password: Zeroizing<String>) -> StorageResult<Database> {
    tokio::task::spawn_blocking(move || Database::load(&path, &password))
        .await
        .map_err(|err| StorageError::Internal(format!("load task failed: {err}")))?
}
