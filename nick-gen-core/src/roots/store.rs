use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use super::persistence::RootPersistence;
use super::source::RootSource;
use crate::error::{PersistenceError, Result};
use crate::model::word_root::{RootMap, count_roots};

type Slot = Arc<Mutex<Option<Arc<RootMap>>>>;

/// Cached access to the word roots of every style.
///
/// # Lookup order
/// 1. In-memory cache
/// 2. `RootPersistence`
/// 3. `RootSource`, whose result is persisted then cached
///
/// Each style has its own lock: a read, an invalidation or a generation of
/// one style never observes a half-updated entry and never blocks the
/// other styles.
pub struct RootStore {
	persistence: Box<dyn RootPersistence>,
	source: Box<dyn RootSource>,
	slots: Mutex<HashMap<String, Slot>>,
}

impl RootStore {
	pub fn new(persistence: Box<dyn RootPersistence>, source: Box<dyn RootSource>) -> Self {
		Self { persistence, source, slots: Mutex::new(HashMap::new()) }
	}

	/// The slot of a style, created on first use.
	///
	/// The map lock is only held for the lookup.
	fn slot(&self, style_name: &str) -> std::result::Result<Slot, PersistenceError> {
		let mut slots = self.slots.lock().map_err(|_| PersistenceError::Poisoned(style_name.to_owned()))?;
		Ok(slots.entry(style_name.to_owned()).or_default().clone())
	}

	fn lock<'a>(
		slot: &'a Slot,
		style_name: &str,
	) -> std::result::Result<MutexGuard<'a, Option<Arc<RootMap>>>, PersistenceError> {
		slot.lock().map_err(|_| PersistenceError::Poisoned(style_name.to_owned()))
	}

	/// Returns the roots of a style, loading or generating them on first use.
	///
	/// # Errors
	/// Persistence failures, or a failure of the root source.
	pub fn get_roots(&self, style_name: &str) -> Result<Arc<RootMap>> {
		let slot = self.slot(style_name)?;
		let mut cached = Self::lock(&slot, style_name)?;

		if let Some(roots) = cached.as_ref() {
			debug!("[{style_name}] word roots served from cache");
			return Ok(Arc::clone(roots));
		}

		let roots = match self.persistence.load(style_name)? {
			Some(roots) => {
				info!("[{style_name}] word roots loaded, {} roots", count_roots(&roots));
				roots
			}
			None => {
				info!("[{style_name}] no stored word roots, generating");
				self.generate_and_save(style_name)?
			}
		};

		let roots = Arc::new(roots);
		*cached = Some(Arc::clone(&roots));
		Ok(roots)
	}

	/// Discards cached and persisted roots of a style, then generates new ones.
	///
	/// The style lock is held for the whole sequence, so no reader can see
	/// the old roots once this call has started.
	pub fn regenerate_roots(&self, style_name: &str) -> Result<Arc<RootMap>> {
		let slot = self.slot(style_name)?;
		let mut cached = Self::lock(&slot, style_name)?;

		*cached = None;
		self.persistence.remove(style_name)?;
		info!("[{style_name}] word roots invalidated, regenerating");

		let roots = Arc::new(self.generate_and_save(style_name)?);
		*cached = Some(Arc::clone(&roots));
		Ok(roots)
	}

	/// Drops the cached roots of one style, or of every style with `None`.
	///
	/// Persisted roots are kept: the next read reloads them.
	pub fn clear_cache(&self, style_name: Option<&str>) -> Result<()> {
		match style_name {
			Some(style_name) => {
				let slot = self.slot(style_name)?;
				*Self::lock(&slot, style_name)? = None;
				info!("[{style_name}] word root cache cleared");
			}
			None => {
				let slots: Vec<(String, Slot)> = {
					let slots = self.slots.lock().map_err(|_| PersistenceError::Poisoned("*".to_owned()))?;
					slots.iter().map(|(name, slot)| (name.clone(), slot.clone())).collect()
				};
				for (name, slot) in &slots {
					*Self::lock(slot, name)? = None;
				}
				info!("all word root caches cleared");
			}
		}
		Ok(())
	}

	/// Styles with persisted roots.
	pub fn stored_styles(&self) -> Result<Vec<String>> {
		Ok(self.persistence.stored_styles()?)
	}

	fn generate_and_save(&self, style_name: &str) -> Result<RootMap> {
		let roots = self.source.generate(style_name)?;
		self.persistence.save(style_name, &roots)?;
		info!("[{style_name}] {} word roots generated", count_roots(&roots));
		Ok(roots)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::thread;

	use super::*;
	use crate::model::word_root::WordRoot;

	#[derive(Default)]
	struct MemoryPersistence {
		files: Mutex<HashMap<String, RootMap>>,
		loads: AtomicUsize,
	}

	impl RootPersistence for Arc<MemoryPersistence> {
		fn load(&self, style_name: &str) -> std::result::Result<Option<RootMap>, PersistenceError> {
			self.loads.fetch_add(1, Ordering::SeqCst);
			Ok(self.files.lock().unwrap().get(style_name).cloned())
		}

		fn save(&self, style_name: &str, roots: &RootMap) -> std::result::Result<(), PersistenceError> {
			self.files.lock().unwrap().insert(style_name.to_owned(), roots.clone());
			Ok(())
		}

		fn remove(&self, style_name: &str) -> std::result::Result<(), PersistenceError> {
			self.files.lock().unwrap().remove(style_name);
			Ok(())
		}

		fn stored_styles(&self) -> std::result::Result<Vec<String>, PersistenceError> {
			let mut styles: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
			styles.sort();
			Ok(styles)
		}
	}

	/// Generates `{"A": ["v<n>"]}` where `n` counts the calls.
	#[derive(Default)]
	struct CountingSource {
		calls: AtomicUsize,
	}

	impl RootSource for Arc<CountingSource> {
		fn generate(&self, _style_name: &str) -> Result<RootMap> {
			let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
			let mut roots = RootMap::new();
			roots.insert("A".into(), vec![WordRoot::new(format!("v{n}"))]);
			Ok(roots)
		}
	}

	fn store() -> (RootStore, Arc<MemoryPersistence>, Arc<CountingSource>) {
		let persistence = Arc::new(MemoryPersistence::default());
		let source = Arc::new(CountingSource::default());
		let store = RootStore::new(Box::new(persistence.clone()), Box::new(source.clone()));
		(store, persistence, source)
	}

	fn first_word(roots: &RootMap) -> &str {
		&roots["A"][0].word
	}

	#[test]
	fn first_read_generates_and_persists() {
		let (store, persistence, source) = store();
		let roots = store.get_roots("古风").unwrap();

		assert_eq!(first_word(&roots), "v1");
		assert_eq!(source.calls.load(Ordering::SeqCst), 1);
		assert!(persistence.files.lock().unwrap().contains_key("古风"));
		assert_eq!(store.stored_styles().unwrap(), vec!["古风".to_string()]);
	}

	#[test]
	fn cached_roots_skip_persistence() {
		let (store, persistence, source) = store();
		store.get_roots("古风").unwrap();
		store.get_roots("古风").unwrap();

		assert_eq!(persistence.loads.load(Ordering::SeqCst), 1);
		assert_eq!(source.calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn persisted_roots_are_not_regenerated() {
		let (store, persistence, source) = store();
		let mut roots = RootMap::new();
		roots.insert("A".into(), vec![WordRoot::new("云")]);
		persistence.files.lock().unwrap().insert("古风".into(), roots);

		assert_eq!(first_word(&store.get_roots("古风").unwrap()), "云");
		assert_eq!(source.calls.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn regeneration_replaces_cache_and_backing_data() {
		let (store, persistence, _source) = store();
		assert_eq!(first_word(&store.get_roots("古风").unwrap()), "v1");

		assert_eq!(first_word(&store.regenerate_roots("古风").unwrap()), "v2");
		assert_eq!(first_word(&store.get_roots("古风").unwrap()), "v2");
		assert_eq!(first_word(&persistence.files.lock().unwrap()["古风"]), "v2");
	}

	#[test]
	fn clearing_cache_reloads_from_persistence() {
		let (store, persistence, source) = store();
		store.get_roots("古风").unwrap();
		store.get_roots("二次元").unwrap();

		store.clear_cache(Some("古风")).unwrap();
		store.get_roots("古风").unwrap();
		store.get_roots("二次元").unwrap();
		assert_eq!(persistence.loads.load(Ordering::SeqCst), 3);

		store.clear_cache(None).unwrap();
		store.get_roots("古风").unwrap();
		store.get_roots("二次元").unwrap();
		assert_eq!(persistence.loads.load(Ordering::SeqCst), 5);
		assert_eq!(source.calls.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn concurrent_readers_generate_once() {
		let (store, _persistence, source) = store();

		thread::scope(|scope| {
			for _ in 0..8 {
				scope.spawn(|| {
					assert_eq!(first_word(&store.get_roots("古风").unwrap()), "v1");
				});
			}
		});
		assert_eq!(source.calls.load(Ordering::SeqCst), 1);
	}
}
