use crate::boxes::FourCC;
use crate::boxes_file::{FtypEncoding, MdatEncoding};
use crate::boxes_moof::moof_tree;
use crate::boxes_moov::moov_tree;
use crate::encoding::EncodingNode;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Top-level box encodings, keyed by FourCC.
///
/// Each entry is the root of an encoding tree: the encodings registered as its
/// children are only consulted for boxes nested inside it. Registries are cheap
/// to clone and the encodings they hold may be shared between parsers.
#[derive(Clone, Default)]
pub struct Registry {
    roots: HashMap<FourCC, Arc<EncodingNode>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a top-level encoding (and its subtree).
    ///
    /// Fails with [`Error::DuplicateRegistration`] if the type is already
    /// registered.
    pub fn register_box(&mut self, node: impl Into<EncodingNode>) -> Result<()> {
        let node = node.into();
        let typ = node.box_type();
        if self.roots.contains_key(&typ) {
            return Err(Error::DuplicateRegistration(typ));
        }
        self.roots.insert(typ, Arc::new(node));
        Ok(())
    }

    /// Return the registry with the given encoding added.
    pub fn with_box(mut self, node: impl Into<EncodingNode>) -> Result<Self> {
        self.register_box(node)?;
        Ok(self)
    }

    pub fn is_box_registered(&self, typ: FourCC) -> bool {
        self.roots.contains_key(&typ)
    }

    pub fn get(&self, typ: FourCC) -> Option<&Arc<EncodingNode>> {
        self.roots.get(&typ)
    }

    pub fn types(&self) -> impl Iterator<Item = FourCC> + '_ {
        self.roots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.types().collect();
        types.sort();
        f.debug_struct("Registry").field("roots", &types).finish()
    }
}

// ---------- Default registry ----------

/// `ftyp`, `moov` (down to the AVC sample entries), `moof` and `mdat`.
pub fn default_registry() -> Result<Registry> {
    Registry::new()
        .with_box(FtypEncoding)?
        .with_box(moov_tree()?)?
        .with_box(moof_tree()?)?
        .with_box(MdatEncoding)
}
