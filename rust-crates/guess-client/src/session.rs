//! Wallet session: who is connected, and whether that account owns the
//! contract. Only `{accounts, connected}` is ever written to disk.

use crate::{
    Address,
    Error,
    Result,
    chain::ChainClient,
    config::parse_address,
    wallet::WalletProvider,
};
use ethers::utils::to_checksum;
use session_store::{
    SessionFile,
    StoredSession,
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Session {
    pub connected: bool,
    pub connecting: bool,
    pub accounts: Vec<Address>,
}

impl Session {
    /// The account every transaction is sent from.
    pub fn primary_account(&self) -> Option<Address> {
        if self.connected {
            self.accounts.first().copied()
        } else {
            None
        }
    }
}

pub trait SessionPersistence: Send + Sync + 'static {
    fn load(&self) -> Result<Option<StoredSession>>;

    fn save(&self, stored: &StoredSession) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

impl SessionPersistence for SessionFile {
    fn load(&self) -> Result<Option<StoredSession>> {
        Ok(SessionFile::load(self)?)
    }

    fn save(&self, stored: &StoredSession) -> Result<()> {
        Ok(SessionFile::save(self, stored)?)
    }

    fn clear(&self) -> Result<()> {
        Ok(SessionFile::clear(self)?)
    }
}

/// What a successful wallet unlock yields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Authorization {
    pub accounts: Vec<Address>,
    pub owner: Address,
}

/// Requests account access and looks up the contract owner. Runs outside the
/// coordinator; the outcome is handed to [`SessionStore::finish_connect`].
pub async fn authorize<W, C>(
    wallet: &W,
    chain: &C,
    passphrase: String,
) -> Result<Authorization>
where
    W: WalletProvider,
    C: ChainClient,
{
    let accounts = wallet.request_accounts(passphrase).await?;
    if accounts.is_empty() {
        return Err(Error::UserRejected(
            "wallet returned no accounts".to_string(),
        ));
    }
    let owner = chain.owner().await?;
    Ok(Authorization { accounts, owner })
}

pub struct SessionStore<P> {
    persistence: P,
    session: Session,
    is_contract_owner: bool,
}

impl<P: SessionPersistence> SessionStore<P> {
    pub fn new(persistence: P) -> Self {
        Self {
            persistence,
            session: Session::default(),
            is_contract_owner: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_contract_owner(&self) -> bool {
        self.is_contract_owner
    }

    /// Restores a persisted connected session without prompting the wallet.
    /// Returns the account whose ownership still has to be checked.
    pub fn restore(&mut self) -> Result<Option<Address>> {
        let Some(stored) = self.persistence.load()? else {
            return Ok(None);
        };
        if !stored.connected || stored.accounts.is_empty() {
            return Ok(None);
        }
        let accounts = stored
            .accounts
            .iter()
            .map(|raw| parse_address(raw))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| Error::Persistence(format!("stored session is corrupt: {e}")))?;

        self.session = Session {
            connected: true,
            connecting: false,
            accounts,
        };
        self.is_contract_owner = false;
        tracing::info!(accounts = self.session.accounts.len(), "session restored");
        Ok(self.session.primary_account())
    }

    /// Marks a connection attempt. `false` if one is already running.
    pub fn begin_connect(&mut self) -> bool {
        if self.session.connecting {
            return false;
        }
        self.session.connecting = true;
        true
    }

    /// Settles a connection attempt. `connecting` is cleared whatever the
    /// outcome; a failed attempt leaves the session disconnected.
    pub fn finish_connect(&mut self, outcome: Result<Authorization>) -> Result<()> {
        self.session.connecting = false;
        let authorization = match outcome {
            Ok(authorization) => authorization,
            Err(err) => {
                self.session.connected = false;
                self.session.accounts.clear();
                self.is_contract_owner = false;
                return Err(err);
            }
        };

        self.session.connected = true;
        self.session.accounts = authorization.accounts;
        self.apply_owner(authorization.owner);
        self.persistence.save(&StoredSession {
            accounts: self
                .session
                .accounts
                .iter()
                .map(|account| to_checksum(account, None))
                .collect(),
            connected: true,
        })
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.session = Session::default();
        self.is_contract_owner = false;
        self.persistence.clear()
    }

    pub fn apply_owner(&mut self, owner: Address) {
        self.is_contract_owner = self.session.primary_account() == Some(owner);
    }
}
