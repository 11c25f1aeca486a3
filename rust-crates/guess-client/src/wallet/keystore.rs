use crate::{
    Address,
    Error,
    Result,
    wallet::{
        SignerSlot,
        WalletProvider,
    },
};
use eth_keystore::decrypt_key;
use ethers::signers::{
    LocalWallet,
    Signer,
};
use std::path::{
    Path,
    PathBuf,
};

#[derive(Clone, Debug)]
pub struct KeystoreDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl KeystoreDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("keystore")
            .to_owned();
        Self::new(name, path.to_path_buf())
    }
}

pub fn resolve_keystore_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    PathBuf::from(expanded.into_owned())
}

/// An encrypted Web3 secret-storage keystore. Connecting means decrypting it;
/// the key then lives in the shared [`SignerSlot`] until `lock`.
#[derive(Clone, Debug)]
pub struct KeystoreWallet {
    descriptor: KeystoreDescriptor,
    slot: SignerSlot,
}

impl KeystoreWallet {
    pub fn open(raw_path: &str, slot: SignerSlot) -> Result<Self> {
        let path = resolve_keystore_path(raw_path);
        if !path.is_file() {
            return Err(Error::ProviderUnavailable(format!(
                "Keystore '{}' not found",
                path.display()
            )));
        }
        Ok(Self {
            descriptor: KeystoreDescriptor::from_path(&path),
            slot,
        })
    }

    pub fn descriptor(&self) -> &KeystoreDescriptor {
        &self.descriptor
    }
}

impl WalletProvider for KeystoreWallet {
    async fn request_accounts(&self, passphrase: String) -> Result<Vec<Address>> {
        if passphrase.is_empty() {
            return Err(Error::UserRejected(format!(
                "No passphrase given for keystore '{}'",
                self.descriptor.name
            )));
        }
        let name = self.descriptor.name.clone();
        let path = self.descriptor.path.clone();
        // scrypt, runs on the blocking pool
        let secret =
            tokio::task::spawn_blocking(move || decrypt_key(&path, passphrase.as_bytes()))
                .await
                .map_err(|e| Error::UserRejected(format!("Keystore unlock aborted: {e}")))?
                .map_err(|_| {
                    Error::UserRejected(format!("Invalid passphrase for keystore '{name}'"))
                })?;

        let wallet = LocalWallet::from_bytes(&secret).map_err(|_| {
            Error::UserRejected(format!(
                "Keystore '{}' contained unsupported key material",
                self.descriptor.name
            ))
        })?;
        let address = wallet.address();
        self.slot.install(wallet);
        tracing::info!(keystore = %self.descriptor.name, ?address, "keystore unlocked");
        Ok(vec![address])
    }

    fn accounts(&self) -> Vec<Address> {
        self.slot.address().into_iter().collect()
    }

    fn lock(&self) {
        self.slot.clear();
    }
}
