//! Durable store using RocksDB
//!
//! # Column Families
//!
//! - `movements` - Movement records (key: movement id)
//! - `by_account` - Account index (key: account || 0x00 || movement id)
//! - `by_customer` - Customer index (key: customer || 0x00 || movement id)
//! - `references` - Reference uniqueness (key: reference, value: movement id)
//! - `sagas` - Transfer sagas (key: transfer id)
//!
//! A movement and its index entries are always written in one `WriteBatch`.

use crate::{
    config::StorageConfig,
    error::{StoreError, StoreResult},
    saga::TransferSaga,
    store::{MovementStore, SagaStore},
    types::{AccountId, CustomerId, Movement},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_MOVEMENTS: &str = "movements";
const CF_BY_ACCOUNT: &str = "by_account";
const CF_BY_CUSTOMER: &str = "by_customer";
const CF_REFERENCES: &str = "references";
const CF_SAGAS: &str = "sagas";

/// Movement and saga store backed by RocksDB
pub struct RocksStore {
    db: Arc<DB>,

    /// Serializes check-then-write sequences (duplicate id/reference)
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &StorageConfig) -> StoreResult<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_MOVEMENTS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_BY_ACCOUNT, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_BY_CUSTOMER, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_REFERENCES, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_SAGAS, Self::cf_options_records()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB movement store");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Point lookups on references benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("Column family {} not found", name)))
    }

    fn index_key(owner: &str, id: Uuid) -> Vec<u8> {
        let mut key = Self::index_prefix(owner);
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn index_prefix(owner: &str) -> Vec<u8> {
        let mut key = owner.as_bytes().to_vec();
        key.push(0);
        key
    }

    fn get_movement(&self, id: Uuid) -> StoreResult<Option<Movement>> {
        let cf = self.cf_handle(CF_MOVEMENTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn reference_owner(&self, reference: &str) -> StoreResult<Option<Uuid>> {
        let cf = self.cf_handle(CF_REFERENCES)?;
        match self.db.get_cf(cf, reference.as_bytes())? {
            Some(value) => {
                let bytes: [u8; 16] = value.as_slice().try_into().map_err(|_| {
                    StoreError::Serialization(format!("Bad reference entry for {}", reference))
                })?;
                Ok(Some(Uuid::from_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Movement ids under an index prefix
    fn scan_index(&self, cf_name: &str, owner: &str) -> StoreResult<Vec<Uuid>> {
        let cf = self.cf_handle(cf_name)?;
        let prefix = Self::index_prefix(owner);

        let mut ids = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let bytes: [u8; 16] = (&key[prefix.len()..]).try_into().map_err(|_| {
                StoreError::Serialization(format!("Bad index key under {}", owner))
            })?;
            ids.push(Uuid::from_bytes(bytes));
        }
        Ok(ids)
    }

    fn load_all(&self, ids: Vec<Uuid>) -> StoreResult<Vec<Movement>> {
        let mut movements = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(movement) = self.get_movement(id)? {
                movements.push(movement);
            }
        }
        Ok(movements)
    }

    fn put_entries(&self, batch: &mut WriteBatch, movement: &Movement) -> StoreResult<()> {
        batch.put_cf(
            self.cf_handle(CF_MOVEMENTS)?,
            movement.id.as_bytes(),
            bincode::serialize(movement)?,
        );
        batch.put_cf(
            self.cf_handle(CF_BY_ACCOUNT)?,
            Self::index_key(movement.account.as_str(), movement.id),
            b"",
        );
        batch.put_cf(
            self.cf_handle(CF_BY_CUSTOMER)?,
            Self::index_key(movement.customer.as_str(), movement.id),
            b"",
        );
        batch.put_cf(
            self.cf_handle(CF_REFERENCES)?,
            movement.reference.as_bytes(),
            movement.id.as_bytes(),
        );
        Ok(())
    }

    fn delete_entries(&self, batch: &mut WriteBatch, movement: &Movement) -> StoreResult<()> {
        batch.delete_cf(self.cf_handle(CF_MOVEMENTS)?, movement.id.as_bytes());
        batch.delete_cf(
            self.cf_handle(CF_BY_ACCOUNT)?,
            Self::index_key(movement.account.as_str(), movement.id),
        );
        batch.delete_cf(
            self.cf_handle(CF_BY_CUSTOMER)?,
            Self::index_key(movement.customer.as_str(), movement.id),
        );
        batch.delete_cf(self.cf_handle(CF_REFERENCES)?, movement.reference.as_bytes());
        Ok(())
    }
}

#[async_trait]
impl MovementStore for RocksStore {
    async fn append(&self, movement: Movement) -> StoreResult<Movement> {
        let _guard = self.write_lock.lock();

        if self.get_movement(movement.id)?.is_some() {
            return Err(StoreError::DuplicateId(movement.id));
        }
        if self.reference_owner(&movement.reference)?.is_some() {
            return Err(StoreError::DuplicateReference(movement.reference));
        }

        let mut batch = WriteBatch::default();
        self.put_entries(&mut batch, &movement)?;
        self.db.write(batch)?;

        tracing::debug!(
            movement_id = %movement.id,
            account = %movement.account,
            amount = %movement.amount,
            "Movement appended"
        );

        Ok(movement)
    }

    async fn find_all(&self) -> StoreResult<Vec<Movement>> {
        let cf = self.cf_handle(CF_MOVEMENTS)?;
        let mut movements = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            movements.push(bincode::deserialize(&value)?);
        }
        Ok(movements)
    }

    async fn find_by_account(&self, account: &AccountId) -> StoreResult<Vec<Movement>> {
        let ids = self.scan_index(CF_BY_ACCOUNT, account.as_str())?;
        self.load_all(ids)
    }

    async fn find_by_customer(&self, customer: &CustomerId) -> StoreResult<Vec<Movement>> {
        let ids = self.scan_index(CF_BY_CUSTOMER, customer.as_str())?;
        self.load_all(ids)
    }

    async fn find_by_customer_and_account(
        &self,
        customer: &CustomerId,
        account: &AccountId,
    ) -> StoreResult<Vec<Movement>> {
        let ids = self.scan_index(CF_BY_ACCOUNT, account.as_str())?;
        Ok(self
            .load_all(ids)?
            .into_iter()
            .filter(|m| &m.customer == customer)
            .collect())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Movement>> {
        self.get_movement(id)
    }

    async fn update(&self, id: Uuid, mut movement: Movement) -> StoreResult<Movement> {
        movement.id = id;
        let _guard = self.write_lock.lock();

        let existing = self
            .get_movement(id)?
            .ok_or(StoreError::MovementNotFound(id))?;
        if let Some(owner) = self.reference_owner(&movement.reference)? {
            if owner != id {
                return Err(StoreError::DuplicateReference(movement.reference));
            }
        }

        let mut batch = WriteBatch::default();
        self.delete_entries(&mut batch, &existing)?;
        self.put_entries(&mut batch, &movement)?;
        self.db.write(batch)?;

        Ok(movement)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let _guard = self.write_lock.lock();

        let existing = self
            .get_movement(id)?
            .ok_or(StoreError::MovementNotFound(id))?;

        let mut batch = WriteBatch::default();
        self.delete_entries(&mut batch, &existing)?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl SagaStore for RocksStore {
    async fn put_saga(&self, saga: &TransferSaga) -> StoreResult<()> {
        let cf = self.cf_handle(CF_SAGAS)?;
        self.db
            .put_cf(cf, saga.transfer_id.as_bytes(), bincode::serialize(saga)?)?;
        Ok(())
    }

    async fn get_saga(&self, transfer_id: Uuid) -> StoreResult<Option<TransferSaga>> {
        let cf = self.cf_handle(CF_SAGAS)?;
        match self.db.get_cf(cf, transfer_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    async fn find_open_sagas(&self) -> StoreResult<Vec<TransferSaga>> {
        let cf = self.cf_handle(CF_SAGAS)?;
        let mut open = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let saga: TransferSaga = bincode::deserialize(&value)?;
            if saga.state.is_open() {
                open.push(saga);
            }
        }
        Ok(open)
    }
}
