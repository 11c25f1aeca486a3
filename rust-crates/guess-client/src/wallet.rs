use crate::{
    Address,
    Error,
    Result,
};
use ethers::signers::{
    LocalWallet,
    Signer,
};
use std::sync::{
    Arc,
    RwLock,
};

pub mod keystore;

/// Account access, as a browser wallet extension would grant it.
pub trait WalletProvider: Send + Sync + 'static {
    /// Asks the wallet to authorize access. A refusal (wrong or empty
    /// passphrase) is [`crate::Error::UserRejected`].
    fn request_accounts(
        &self,
        passphrase: String,
    ) -> impl Future<Output = Result<Vec<Address>>> + Send;

    /// Accounts currently authorized; empty while locked.
    fn accounts(&self) -> Vec<Address>;

    /// Forgets any unlocked key.
    fn lock(&self);
}

/// No keystore configured: every connection attempt is refused.
impl<W: WalletProvider> WalletProvider for Option<W> {
    async fn request_accounts(&self, passphrase: String) -> Result<Vec<Address>> {
        match self {
            Some(wallet) => wallet.request_accounts(passphrase).await,
            None => Err(Error::ProviderUnavailable(
                "no keystore configured; restart with --keystore <path>".to_string(),
            )),
        }
    }

    fn accounts(&self) -> Vec<Address> {
        self.as_ref().map(W::accounts).unwrap_or_default()
    }

    fn lock(&self) {
        if let Some(wallet) = self {
            wallet.lock();
        }
    }
}

/// The unlocked signing key, shared between the wallet that unlocks it and
/// the chain client that signs with it.
#[derive(Clone, Debug, Default)]
pub struct SignerSlot {
    inner: Arc<RwLock<Option<LocalWallet>>>,
}

impl SignerSlot {
    pub fn install(&self, wallet: LocalWallet) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(wallet);
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn address(&self) -> Option<Address> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(Signer::address)
    }

    /// The unlocked key, if it belongs to `address`.
    pub fn signer_for(&self, address: Address) -> Option<LocalWallet> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|wallet| wallet.address() == address)
            .cloned()
    }
}
