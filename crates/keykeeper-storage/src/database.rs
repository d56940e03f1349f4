//! In-memory credential database.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::Path;

use keykeeper_core::{BleAddress, Coin, Identity};
use rand_core::{OsRng, RngCore};
use tempfile::NamedTempFile;

use crate::document::DatabaseDocument;
use crate::envelope::KdfParams;
use crate::error::{StorageError, StorageResult};

/// The central's identity plus every enrolled coin.
///
/// The coin and name maps always describe the same set of coins: every
/// name points at exactly one coin and every coin has exactly one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    identity: Identity,
    coins: BTreeMap<BleAddress, Coin>,
    names: BTreeMap<String, BleAddress>,
}

impl Database {
    /// Fresh database with a random identity and no coins.
    pub fn new() -> Self {
        Self::with_identity(Identity::generate(&mut OsRng))
    }

    /// Empty database around an existing identity.
    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity,
            coins: BTreeMap::new(),
            names: BTreeMap::new(),
        }
    }

    /// Load the database at `path`.
    ///
    /// A missing file yields a fresh database. A file that exists but
    /// cannot be decrypted or validated is an error; it is never replaced
    /// by an empty database.
    pub fn load(path: impl AsRef<Path>, password: &str) -> StorageResult<Self> {
        Ok(Self::load_existing(path.as_ref(), password)?.unwrap_or_default())
    }

    /// Like [`load`](Self::load), but `None` when the file does not exist.
    pub(crate) fn load_existing(path: &Path, password: &str) -> StorageResult<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(Some(DatabaseDocument::decode(&bytes, password)?.into()))
    }

    /// Persist to `path` with default key derivation parameters.
    pub fn save(&self, path: impl AsRef<Path>, password: &str) -> StorageResult<()> {
        self.save_with_params(path, password, &KdfParams::default())
    }

    /// Persist to `path`.
    ///
    /// The file is written to a temporary sibling, synced, then renamed
    /// over the target, so readers see either the old or the new database.
    pub fn save_with_params(
        &self,
        path: impl AsRef<Path>,
        password: &str,
        params: &KdfParams,
    ) -> StorageResult<()> {
        let path = path.as_ref();
        let bytes = DatabaseDocument::from(self).encode(password, params)?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|err| StorageError::Io(err.error))?;
        Ok(())
    }

    /// Replace the identity with a freshly generated one.
    pub fn generate_identity(&mut self) -> &Identity {
        self.generate_identity_with_rng(&mut OsRng)
    }

    pub fn generate_identity_with_rng<R: RngCore + ?Sized>(&mut self, rng: &mut R) -> &Identity {
        self.identity = Identity::generate(rng);
        &self.identity
    }

    /// Generate and register a new coin under `name`.
    ///
    /// # Errors
    /// `DuplicateName` if the name is taken, `InvalidName` if it is blank.
    /// The database is unchanged on error.
    pub fn generate_coin(&mut self, name: &str) -> StorageResult<Coin> {
        self.generate_coin_with_rng(name, &mut OsRng)
    }

    pub fn generate_coin_with_rng<R: RngCore + ?Sized>(
        &mut self,
        name: &str,
        rng: &mut R,
    ) -> StorageResult<Coin> {
        let coin = self.new_coin(name, rng)?;
        self.insert_coin(name, coin.clone())?;
        Ok(coin)
    }

    /// Generate a coin for `name` without registering it.
    pub(crate) fn new_coin<R: RngCore + ?Sized>(
        &self,
        name: &str,
        rng: &mut R,
    ) -> StorageResult<Coin> {
        self.check_name(name)?;
        let address = loop {
            let candidate = BleAddress::random_static(rng);
            if !self.coins.contains_key(&candidate) {
                break candidate;
            }
        };
        Ok(Coin::generate(address, rng))
    }

    /// Register an existing coin under `name`.
    pub fn insert_coin(&mut self, name: &str, coin: Coin) -> StorageResult<()> {
        self.check_name(name)?;
        if self.coins.contains_key(&coin.address) {
            return Err(StorageError::DuplicateAddress(coin.address.to_string()));
        }
        self.names.insert(name.to_string(), coin.address);
        self.coins.insert(coin.address, coin);
        Ok(())
    }

    /// Remove the coin registered under `name`.
    ///
    /// Returns `None` when no such name exists.
    pub fn remove_coin(&mut self, name: &str) -> Option<Coin> {
        let address = self.names.remove(name)?;
        self.coins.remove(&address)
    }

    fn check_name(&self, name: &str) -> StorageResult<()> {
        if name.trim().is_empty() {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        if self.names.contains_key(name) {
            return Err(StorageError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Coins keyed by address, in address order.
    pub fn coins(&self) -> &BTreeMap<BleAddress, Coin> {
        &self.coins
    }

    pub fn coin(&self, address: &BleAddress) -> Option<&Coin> {
        self.coins.get(address)
    }

    /// Coin addresses keyed by name.
    pub fn names(&self) -> &BTreeMap<String, BleAddress> {
        &self.names
    }

    /// Name a coin is registered under.
    pub fn name_of(&self, address: &BleAddress) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, a)| *a == address)
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DatabaseDocument> for Database {
    fn from(document: DatabaseDocument) -> Self {
        let (address, irk) = document.identity;
        let coins = document
            .coins
            .into_iter()
            .map(|(address, (irk, ltk, space_key))| {
                (
                    address,
                    Coin {
                        address,
                        irk,
                        ltk,
                        space_key,
                    },
                )
            })
            .collect();

        Self {
            identity: Identity { address, irk },
            coins,
            names: document.names,
        }
    }
}

impl From<&Database> for DatabaseDocument {
    fn from(db: &Database) -> Self {
        Self {
            identity: (db.identity.address, db.identity.irk.clone()),
            coins: db
                .coins
                .iter()
                .map(|(address, coin)| {
                    (
                        *address,
                        (coin.irk.clone(), coin.ltk.clone(), coin.space_key.clone()),
                    )
                })
                .collect(),
            names: db.names.clone(),
        }
    }
}
