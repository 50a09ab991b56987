use crate::common::Result;
use lmdb_zero as lmdb;
use lmdb_zero::traits::LmdbResultExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::create_dir_all;
use std::path::Path;
use std::sync::Arc;

const MAP_SIZE: usize = 1 << 30;

/// Thin wrapper over an unnamed LMDB database. All multi-key mutations go
/// through `transact`, which commits or aborts as one write transaction.
pub struct Store {
	env: Arc<lmdb::Environment>,
	db: Arc<lmdb::Database<'static>>,
}

impl Store {
	pub fn new(path: &Path) -> Result<Store> {
		create_dir_all(path)?;
		let env = unsafe {
			let mut builder = lmdb::EnvBuilder::new()?;
			builder.set_mapsize(MAP_SIZE)?;
			Arc::new(builder.open(
				path.to_str().unwrap(),
				lmdb::open::Flags::empty(),
				0o600,
			)?)
		};
		let db = Arc::new(lmdb::Database::open(
			env.clone(),
			None,
			&lmdb::DatabaseOptions::defaults(),
		)?);
		Ok(Store { env, db })
	}

	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		let txn = lmdb::ReadTransaction::new(self.env.clone())?;
		let access = txn.access();
		let value: Option<&[u8]> = access.get(&self.db, key).to_opt()?;
		Ok(value.map(|v| v.to_vec()))
	}

	pub fn get_ser<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
		match self.get(key)? {
			Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
			None => Ok(None),
		}
	}

	pub fn transact<T, F>(&self, f: F) -> Result<T>
	where
		F: FnOnce(&mut Batch) -> Result<T>,
	{
		let txn = lmdb::WriteTransaction::new(self.env.clone())?;
		let result = {
			let mut batch = Batch {
				access: txn.access(),
				db: &self.db,
			};
			f(&mut batch)?
		};
		txn.commit()?;
		Ok(result)
	}
}

/// Accessor scoped to one write transaction. Dropping it without commit
/// aborts every change made through it.
pub struct Batch<'a> {
	access: lmdb::WriteAccessor<'a>,
	db: &'a lmdb::Database<'static>,
}

impl<'a> Batch<'a> {
	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		let value: Option<&[u8]> = self.access.get(self.db, key).to_opt()?;
		Ok(value.map(|v| v.to_vec()))
	}

	pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
		self.access
			.put(self.db, key, value, lmdb::put::Flags::empty())?;
		Ok(())
	}

	pub fn put_ser<T: Serialize>(&mut self, key: &[u8], value: &T) -> Result<()> {
		self.put(key, &serde_json::to_vec(value)?)
	}

	/// Returns false when the key already exists, leaving it untouched.
	pub fn put_if_absent(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
		match self.access.put(self.db, key, value, lmdb::put::NOOVERWRITE) {
			Ok(()) => Ok(true),
			Err(lmdb::Error::Code(code)) if code == lmdb::error::KEYEXIST => Ok(false),
			Err(e) => Err(e.into()),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::path::PathBuf;
	use uuid::Uuid;

	fn temp_store() -> (Store, PathBuf) {
		let path = std::env::temp_dir().join(format!("ledger713-test-{}", Uuid::new_v4()));
		(Store::new(&path).unwrap(), path)
	}

	#[test]
	fn put_get_round_trip() {
		let (store, path) = temp_store();
		store
			.transact(|batch| batch.put(b"k", b"v"))
			.unwrap();
		assert_eq!(store.get(b"k").unwrap().unwrap(), b"v".to_vec());
		assert!(store.get(b"missing").unwrap().is_none());
		let _ = std::fs::remove_dir_all(path);
	}

	#[test]
	fn put_if_absent_keeps_first_value() {
		let (store, path) = temp_store();
		let (first, second) = store
			.transact(|batch| {
				let first = batch.put_if_absent(b"k", b"one")?;
				let second = batch.put_if_absent(b"k", b"two")?;
				Ok((first, second))
			})
			.unwrap();
		assert!(first);
		assert!(!second);
		assert_eq!(store.get(b"k").unwrap().unwrap(), b"one".to_vec());
		let _ = std::fs::remove_dir_all(path);
	}

	#[test]
	fn failed_transaction_aborts_all_writes() {
		let (store, path) = temp_store();
		let result: Result<()> = store.transact(|batch| {
			batch.put(b"k", b"v")?;
			Err(crate::common::ErrorKind::CorruptedRow)?;
			Ok(())
		});
		assert!(result.is_err());
		assert!(store.get(b"k").unwrap().is_none());
		let _ = std::fs::remove_dir_all(path);
	}
}
