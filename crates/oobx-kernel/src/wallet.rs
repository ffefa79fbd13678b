//! In-process Ed25519 wallet.

use crate::collaborators::{PublicDid, Wallet};
use async_trait::async_trait;
use dashmap::DashMap;
use ed25519_dalek::SigningKey;
use oobx_types::error::{OobError, OobResult};
use rand::rngs::OsRng;
use std::sync::RwLock;
use tracing::info;

/// Holds signing keys in memory, keyed by base58 verkey.
#[derive(Default)]
pub struct LocalWallet {
    keys: DashMap<String, SigningKey>,
    public: RwLock<Option<PublicDid>>,
}

impl LocalWallet {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate(&self) -> String {
        let signing = SigningKey::generate(&mut OsRng);
        let verkey = bs58::encode(signing.verifying_key().as_bytes()).into_string();
        self.keys.insert(verkey.clone(), signing);
        verkey
    }

    /// Create a key pair and make it the public DID.
    ///
    /// The DID is the base58 of the first 16 bytes of the verkey.
    pub fn create_public_did(&self) -> OobResult<PublicDid> {
        let verkey = self.generate();
        let raw = bs58::decode(&verkey)
            .into_vec()
            .map_err(|e| OobError::KeyManagement(e.to_string()))?;
        let did = bs58::encode(&raw[..16]).into_string();
        let public = PublicDid { did, verkey };
        let mut slot = self
            .public
            .write()
            .map_err(|e| OobError::Internal(e.to_string()))?;
        *slot = Some(public.clone());
        info!(did = %public.did, "Created public DID");
        Ok(public)
    }

    /// Whether `verkey` belongs to this wallet.
    pub fn has_key(&self, verkey: &str) -> bool {
        self.keys.contains_key(verkey)
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    async fn create_signing_key(&self) -> OobResult<String> {
        Ok(self.generate())
    }

    async fn public_did(&self) -> OobResult<Option<PublicDid>> {
        let slot = self
            .public
            .read()
            .map_err(|e| OobError::Internal(e.to_string()))?;
        Ok(slot.clone())
    }
}
