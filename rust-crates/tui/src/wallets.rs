use color_eyre::eyre::{
    Result,
    WrapErr,
};
use guess_client::{
    U256,
    wallet::{
        SignerSlot,
        keystore::KeystoreWallet,
    },
};
use rand::Rng;
use rpassword::prompt_password;

/// Opens the keystore passed with `--keystore`. Without one the game can be
/// watched but not played.
pub fn open_keystore(
    raw_path: Option<&str>,
    slot: &SignerSlot,
) -> Result<Option<KeystoreWallet>> {
    raw_path
        .map(|raw| {
            KeystoreWallet::open(raw, slot.clone())
                .wrap_err_with(|| format!("Failed to open keystore '{raw}'"))
        })
        .transpose()
}

pub fn prompt_passphrase(wallet: &KeystoreWallet) -> Result<String> {
    let prompt = format!(
        "Enter passphrase for keystore '{}': ",
        wallet.descriptor().name
    );
    prompt_password(prompt).wrap_err("Failed to read keystore passphrase")
}

pub fn random_salt() -> U256 {
    U256::from(rand::rng().random::<u128>())
}
