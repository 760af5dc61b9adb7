use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use blockchain::{LedgerGateway, SolanaClient};
use serde::{Deserialize, Serialize};
use shared::config::KeyStoreConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cipher::{SlotCipher, NONCE_LEN};
use crate::error::{KeyStoreError, Result};

const SLOT_EXTENSION: &str = "dat";
const SLOT_VERSION: u8 = 1;

/// The key pair behind one disposable receiving address.
///
/// Owned by a single session. Once disposed the secret is gone and the
/// key can no longer sign.
pub struct DisposableKey {
    address: Pubkey,
    keypair: Option<Keypair>,
}

impl DisposableKey {
    fn new(keypair: Keypair) -> Self {
        Self {
            address: keypair.pubkey(),
            keypair: Some(keypair),
        }
    }

    pub fn address(&self) -> Pubkey {
        self.address
    }

    /// The signing key, `None` after disposal.
    pub fn keypair(&self) -> Option<&Keypair> {
        self.keypair.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.keypair.is_none()
    }

    // ed25519 secret keys zeroize themselves on drop
    fn wipe(&mut self) {
        self.keypair = None;
    }
}

impl fmt::Debug for DisposableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableKey")
            .field("address", &self.address)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Storage for disposable keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Generate a fresh key pair. Never touches the ledger.
    fn create(&self) -> DisposableKey;

    /// Where the slot for `address` lives.
    fn slot_path(&self, address: &Pubkey) -> PathBuf;

    /// Write the key to its slot and return the slot location.
    async fn persist(&self, key: &DisposableKey) -> Result<PathBuf>;

    async fn load(&self, location: &Path) -> Result<DisposableKey>;

    async fn load_address(&self, address: &Pubkey) -> Result<DisposableKey> {
        self.load(&self.slot_path(address)).await
    }

    /// Remove the slot and wipe the key. Refuses while the address still
    /// holds lamports. Disposing an already-disposed key is a no-op.
    async fn dispose(&self, key: &mut DisposableKey) -> Result<()>;

    /// Addresses with a persisted slot.
    async fn list(&self) -> Result<Vec<Pubkey>>;

    /// Time since the slot for `address` was last written.
    async fn slot_age(&self, address: &Pubkey) -> Result<Duration>;
}

#[derive(Serialize, Deserialize)]
struct SlotFile {
    version: u8,
    public_key: String,
    /// base58 secret, or base58 ciphertext when `nonce` is present
    secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
}

/// Key slots as files under one directory, `<dir>/<address>.dat`.
pub struct FileKeyStore {
    dir: PathBuf,
    cipher: Option<SlotCipher>,
    gateway: Arc<dyn LedgerGateway>,
}

impl FileKeyStore {
    /// Open (creating if needed) the slot directory.
    pub async fn open(config: &KeyStoreConfig, gateway: Arc<dyn LedgerGateway>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.dir).await?;

        let cipher = config
            .encryption_key
            .as_deref()
            .map(|material| SlotCipher::new(material.as_bytes()));
        if cipher.is_none() {
            warn!("Key store encryption disabled, slots in {} hold plain secrets", config.dir.display());
        }
        info!("Key store ready at {}", config.dir.display());

        Ok(Self {
            dir: config.dir.clone(),
            cipher,
            gateway,
        })
    }

    fn encode(&self, keypair: &Keypair) -> Result<SlotFile> {
        let secret = Zeroizing::new(keypair.to_bytes());
        let (secret, nonce) = match &self.cipher {
            Some(cipher) => {
                let (sealed, nonce) = cipher.seal(secret.as_slice())?;
                (bs58::encode(sealed).into_string(), Some(hex::encode(nonce)))
            }
            None => (bs58::encode(secret.as_slice()).into_string(), None),
        };

        Ok(SlotFile {
            version: SLOT_VERSION,
            public_key: keypair.pubkey().to_string(),
            secret,
            nonce,
        })
    }

    fn decode(&self, slot: &SlotFile) -> Result<Keypair> {
        let stored = Zeroizing::new(
            bs58::decode(&slot.secret)
                .into_vec()
                .map_err(|e| KeyStoreError::InvalidKey(format!("secret is not base58: {}", e)))?,
        );

        let secret = match (&slot.nonce, &self.cipher) {
            (Some(nonce), Some(cipher)) => {
                let nonce: [u8; NONCE_LEN] = hex::decode(nonce)
                    .ok()
                    .and_then(|n| n.try_into().ok())
                    .ok_or_else(|| KeyStoreError::InvalidKey("malformed nonce".to_string()))?;
                cipher.open(&stored, &nonce)?
            }
            (Some(_), None) => {
                return Err(KeyStoreError::Encryption(
                    "slot is encrypted but no encryption key is configured".to_string(),
                ))
            }
            (None, _) => stored,
        };

        Keypair::from_bytes(&secret)
            .map_err(|e| KeyStoreError::InvalidKey(format!("secret does not parse: {}", e)))
    }

    async fn write_slot(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension(format!("{}.tmp", SLOT_EXTENSION));

        {
            let mut options = tokio::fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            options.mode(0o600);

            let mut file = options.open(&tmp).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
        }

        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    fn create(&self) -> DisposableKey {
        let key = DisposableKey::new(Keypair::new());
        debug!("Generated disposable key {}", key.address());
        key
    }

    fn slot_path(&self, address: &Pubkey) -> PathBuf {
        self.dir.join(format!("{}.{}", address, SLOT_EXTENSION))
    }

    async fn persist(&self, key: &DisposableKey) -> Result<PathBuf> {
        let keypair = key
            .keypair()
            .ok_or_else(|| KeyStoreError::InvalidKey(format!("{} is already disposed", key.address())))?;

        let path = self.slot_path(&key.address());
        let contents = Zeroizing::new(serde_json::to_vec(&self.encode(keypair)?)?);
        self.write_slot(&path, &contents).await?;

        debug!("Persisted key slot {}", path.display());
        Ok(path)
    }

    async fn load(&self, location: &Path) -> Result<DisposableKey> {
        let raw = Zeroizing::new(tokio::fs::read(location).await?);
        let slot: SlotFile = serde_json::from_slice(&raw)
            .map_err(|e| KeyStoreError::InvalidKey(format!("{}: {}", location.display(), e)))?;

        if slot.version != SLOT_VERSION {
            return Err(KeyStoreError::InvalidKey(format!(
                "unsupported slot version {}",
                slot.version
            )));
        }

        let expected = SolanaClient::validate_address(&slot.public_key)
            .map_err(|e| KeyStoreError::InvalidKey(format!("bad public key: {}", e)))?;
        let keypair = self.decode(&slot)?;
        if keypair.pubkey() != expected {
            return Err(KeyStoreError::InvalidKey(format!(
                "secret in {} belongs to {}",
                location.display(),
                keypair.pubkey()
            )));
        }

        Ok(DisposableKey::new(keypair))
    }

    async fn dispose(&self, key: &mut DisposableKey) -> Result<()> {
        let address = key.address();
        // A wiped key already had its slot removed
        if key.is_disposed() {
            debug!("Key {} already disposed", address);
            return Ok(());
        }

        let lamports = self.gateway.balance_of(&address).await?;
        if lamports > 0 {
            return Err(KeyStoreError::NonZeroBalance {
                address: address.to_string(),
                lamports,
            });
        }

        match tokio::fs::remove_file(self.slot_path(&address)).await {
            Ok(()) => info!("Disposed key {}", address),
            Err(e) if e.kind() == ErrorKind::NotFound => debug!("Key slot for {} already removed", address),
            Err(e) => return Err(e.into()),
        }

        key.wipe();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Pubkey>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut addresses = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SLOT_EXTENSION) {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Pubkey::from_str(s).ok());
            match parsed {
                Some(address) => addresses.push(address),
                None => warn!("Ignoring unexpected file in key store: {}", path.display()),
            }
        }

        Ok(addresses)
    }

    async fn slot_age(&self, address: &Pubkey) -> Result<Duration> {
        let modified = tokio::fs::metadata(self.slot_path(address)).await?.modified()?;
        // clock skew reads as a fresh slot
        Ok(SystemTime::now().duration_since(modified).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockchain::mock::MockLedger;
    use tempfile::TempDir;

    async fn store(encryption_key: Option<&str>) -> (FileKeyStore, Arc<MockLedger>, TempDir) {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(MockLedger::new());
        let config = KeyStoreConfig {
            dir: dir.path().join("wal"),
            encryption_key: encryption_key.map(str::to_string),
        };
        let store = FileKeyStore::open(&config, ledger.clone()).await.unwrap();
        (store, ledger, dir)
    }

    #[tokio::test]
    async fn test_create_yields_unique_addresses() {
        let (store, _, _dir) = store(None).await;
        let a = store.create();
        let b = store.create();
        assert_ne!(a.address(), b.address());
        assert!(!a.is_disposed());
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let (store, _, _dir) = store(None).await;
        let key = store.create();

        let path = store.persist(&key).await.unwrap();
        assert_eq!(path, store.slot_path(&key.address()));
        assert!(path.to_string_lossy().ends_with(&format!("{}.dat", key.address())));

        let loaded = store.load(&path).await.unwrap();
        assert_eq!(loaded.address(), key.address());
        assert_eq!(
            loaded.keypair().unwrap().to_bytes(),
            key.keypair().unwrap().to_bytes()
        );
    }

    #[tokio::test]
    async fn test_encrypted_slot_hides_secret() {
        let (store, _, _dir) = store(Some("operator key")).await;
        let key = store.create();
        let path = store.persist(&key).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let plain = bs58::encode(key.keypair().unwrap().to_bytes()).into_string();
        assert!(!contents.contains(&plain));
        assert!(contents.contains("nonce"));

        let loaded = store.load_address(&key.address()).await.unwrap();
        assert_eq!(loaded.address(), key.address());
    }

    #[tokio::test]
    async fn test_encrypted_slot_needs_key() {
        let (sealed, _, dir) = store(Some("operator key")).await;
        let key = sealed.create();
        let path = sealed.persist(&key).await.unwrap();

        let config = KeyStoreConfig {
            dir: dir.path().join("wal"),
            encryption_key: None,
        };
        let plain = FileKeyStore::open(&config, Arc::new(MockLedger::new())).await.unwrap();
        assert!(matches!(plain.load(&path).await, Err(KeyStoreError::Encryption(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slot_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (store, _, _dir) = store(None).await;
        let key = store.create();
        let path = store.persist(&key).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_load_rejects_garbage() {
        let (store, _, _dir) = store(None).await;
        let path = store.slot_path(&Pubkey::new_unique());
        std::fs::write(&path, b"not json").unwrap();

        assert!(matches!(store.load(&path).await, Err(KeyStoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_mismatched_public_key() {
        let (store, _, _dir) = store(None).await;
        let key = store.create();
        let slot = SlotFile {
            version: SLOT_VERSION,
            public_key: Pubkey::new_unique().to_string(),
            secret: bs58::encode(key.keypair().unwrap().to_bytes()).into_string(),
            nonce: None,
        };
        let path = store.slot_path(&key.address());
        std::fs::write(&path, serde_json::to_vec(&slot).unwrap()).unwrap();

        assert!(matches!(store.load(&path).await, Err(KeyStoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_public_key() {
        let (store, _, _dir) = store(None).await;
        let key = store.create();
        let slot = SlotFile {
            version: SLOT_VERSION,
            public_key: "not-base58-0OIl".to_string(),
            secret: bs58::encode(key.keypair().unwrap().to_bytes()).into_string(),
            nonce: None,
        };
        let path = store.slot_path(&key.address());
        std::fs::write(&path, serde_json::to_vec(&slot).unwrap()).unwrap();

        assert!(matches!(store.load(&path).await, Err(KeyStoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_load_missing_slot_is_io_error() {
        let (store, _, _dir) = store(None).await;
        let result = store.load_address(&Pubkey::new_unique()).await;
        assert!(matches!(result, Err(KeyStoreError::Io(_))));
    }

    #[tokio::test]
    async fn test_dispose_refuses_funded_address() {
        let (store, ledger, _dir) = store(None).await;
        let mut key = store.create();
        let path = store.persist(&key).await.unwrap();
        ledger.set_balance(&key.address(), 1);

        let err = store.dispose(&mut key).await.unwrap_err();
        assert!(matches!(err, KeyStoreError::NonZeroBalance { lamports: 1, .. }));
        assert!(path.exists());
        assert!(!key.is_disposed());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let (store, _, _dir) = store(None).await;
        let mut key = store.create();
        let path = store.persist(&key).await.unwrap();

        store.dispose(&mut key).await.unwrap();
        assert!(!path.exists());
        assert!(key.is_disposed());
        assert!(key.keypair().is_none());

        store.dispose(&mut key).await.unwrap();
        assert!(matches!(store.persist(&key).await, Err(KeyStoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_second_dispose_skips_the_ledger() {
        let (store, ledger, _dir) = store(None).await;
        let mut key = store.create();
        store.persist(&key).await.unwrap();
        store.dispose(&mut key).await.unwrap();

        ledger.set_balance(&key.address(), 10);
        store.dispose(&mut key).await.unwrap();

        ledger.fail_balance(Some("rpc down"));
        store.dispose(&mut key).await.unwrap();
        assert!(key.is_disposed());
    }

    #[tokio::test]
    async fn test_list_enumerates_slots() {
        let (store, _, dir) = store(None).await;
        let a = store.create();
        let b = store.create();
        store.persist(&a).await.unwrap();
        store.persist(&b).await.unwrap();
        std::fs::write(dir.path().join("wal").join("notes.txt"), b"x").unwrap();

        let mut listed = store.list().await.unwrap();
        listed.sort();
        let mut expected = vec![a.address(), b.address()];
        expected.sort();
        assert_eq!(listed, expected);
    }

    #[tokio::test]
    async fn test_slot_age_of_fresh_and_missing_slots() {
        let (store, _, _dir) = store(None).await;
        let key = store.create();
        assert!(matches!(store.slot_age(&key.address()).await, Err(KeyStoreError::Io(_))));

        store.persist(&key).await.unwrap();
        let age = store.slot_age(&key.address()).await.unwrap();
        assert!(age < Duration::from_secs(60));
    }

    #[test]
    fn test_debug_never_prints_secret() {
        let key = DisposableKey::new(Keypair::new());
        let rendered = format!("{:?}", key);
        assert!(rendered.contains(&key.address().to_string()));
        assert!(!rendered.contains(&bs58::encode(key.keypair().unwrap().to_bytes()).into_string()));
    }
}
