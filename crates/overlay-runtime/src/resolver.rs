//! `name -> address` lookups for lazily bound entry points.
use crate::error::ResolveError;
use dashmap::DashMap;
use libloading::{Library, Symbol};
use overlay_utils::NativeAddress;
use std::{collections::HashMap, path::Path};

/// Maps symbol names to stable addresses in the target process.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<NativeAddress, ResolveError>;

    fn resolve_many(&self, names: &[&str]) -> Result<Vec<NativeAddress>, ResolveError> {
        names.iter().map(|name| self.resolve(name)).collect()
    }
}

/// A fixed table of symbols, e.g. exported offline from debug metadata.
/// Entries may be stored relative to a module base.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    base: NativeAddress,
    symbols: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table whose entries are offsets from `base`.
    pub fn relative_to(base: NativeAddress) -> Self {
        Self {
            base,
            symbols: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: usize) -> &mut Self {
        self.symbols.insert(name.into(), value);
        self
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, usize)> for SymbolTable {
    fn from_iter<I: IntoIterator<Item = (S, usize)>>(iter: I) -> Self {
        Self {
            base: NativeAddress::NULL,
            symbols: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, name: &str) -> Result<NativeAddress, ResolveError> {
        self.symbols
            .get(name)
            .map(|value| NativeAddress(self.base.as_usize().wrapping_add(*value)))
            .ok_or_else(|| ResolveError::SymbolNotFound(name.to_string()))
    }
}

/// Resolves exports of dynamically loaded libraries, first match wins.
pub struct LibraryResolver {
    libraries: Vec<(String, Library)>,
}

impl LibraryResolver {
    pub fn new() -> Self {
        Self { libraries: vec![] }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, ResolveError> {
        let mut resolver = Self::new();
        resolver.load(path)?;
        Ok(resolver)
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<&mut Self, ResolveError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        interop_trace!("LOAD", "loading library {}", name);
        // SAFETY: loading runs the library's initialisers; the native side is trusted.
        let library = unsafe { Library::new(path) }.map_err(|e| ResolveError::LoadError {
            library: name.clone(),
            message: e.to_string(),
        })?;
        self.libraries.push((name, library));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }
}

impl Default for LibraryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolResolver for LibraryResolver {
    fn resolve(&self, name: &str) -> Result<NativeAddress, ResolveError> {
        for (library, lib) in &self.libraries {
            // SAFETY: the symbol is only converted to an address, never called here.
            let symbol: Result<Symbol<unsafe extern "C" fn()>, _> = unsafe { lib.get(name.as_bytes()) };
            if let Ok(symbol) = symbol {
                let address = NativeAddress(*symbol as usize);
                interop_trace!("RESOLVE", "{} found in {} at {}", name, library, address);
                return Ok(address);
            }
        }
        Err(ResolveError::SymbolNotFound(name.to_string()))
    }
}

/// Memoizes another resolver for the lifetime of the process.
pub struct CachedResolver {
    inner: Box<dyn SymbolResolver>,
    cache: DashMap<String, NativeAddress>,
}

impl CachedResolver {
    pub fn new(inner: impl SymbolResolver + 'static) -> Self {
        Self::boxed(Box::new(inner))
    }

    pub fn boxed(inner: Box<dyn SymbolResolver>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Resolves `name`, reporting whether the answer came from the cache.
    pub fn resolve_cached(&self, name: &str) -> Result<(NativeAddress, bool), ResolveError> {
        if let Some(address) = self.cache.get(name) {
            return Ok((*address, true));
        }
        let address = self.inner.resolve(name)?;
        if address.is_null() {
            return Err(ResolveError::NullAddress(name.to_string()));
        }
        self.cache.insert(name.to_string(), address);
        Ok((address, false))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl SymbolResolver for CachedResolver {
    fn resolve(&self, name: &str) -> Result<NativeAddress, ResolveError> {
        self.resolve_cached(name).map(|(address, _)| address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        table: SymbolTable,
        calls: AtomicUsize,
    }

    impl SymbolResolver for Counting {
        fn resolve(&self, name: &str) -> Result<NativeAddress, ResolveError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.table.resolve(name)
        }
    }

    #[test]
    fn test_relative_table() {
        let mut table = SymbolTable::relative_to(NativeAddress(0x1400_0000));
        table.insert("Player::Tick", 0x1234);
        assert_eq!(table.resolve("Player::Tick"), Ok(NativeAddress(0x1400_1234)));
        assert_eq!(
            table.resolve("Missing"),
            Err(ResolveError::SymbolNotFound("Missing".into()))
        );
    }

    #[test]
    fn test_resolve_many_preserves_order() {
        let table: SymbolTable = [("a", 1usize), ("b", 2), ("c", 3)].into_iter().collect();
        assert_eq!(
            table.resolve_many(&["c", "a"]),
            Ok(vec![NativeAddress(3), NativeAddress(1)])
        );
        assert!(table.resolve_many(&["a", "zz"]).is_err());
    }

    #[test]
    fn test_cached_resolver_hits_inner_once() {
        let counting = Counting {
            table: [("f", 0x10usize)].into_iter().collect(),
            calls: AtomicUsize::new(0),
        };
        let cached = CachedResolver::new(counting);
        assert_eq!(cached.resolve_cached("f"), Ok((NativeAddress(0x10), false)));
        assert_eq!(cached.resolve_cached("f"), Ok((NativeAddress(0x10), true)));
        assert_eq!(cached.len(), 1);
        assert!(cached.resolve("g").is_err());
        assert_eq!(cached.len(), 1);
    }

    #[test]
    fn test_null_symbol_is_an_error() {
        let cached = CachedResolver::new([("zero", 0usize)].into_iter().collect::<SymbolTable>());
        assert_eq!(
            cached.resolve("zero"),
            Err(ResolveError::NullAddress("zero".into()))
        );
    }

    #[test]
    fn test_missing_library() {
        assert!(matches!(
            LibraryResolver::open("/nonexistent/libnothing.so"),
            Err(ResolveError::LoadError { .. })
        ));
    }
}
