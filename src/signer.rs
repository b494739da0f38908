use crate::{
    Error,
    Result,
    wallet::WalletProvider,
};
use alloy_primitives::{
    Address,
    Bytes,
};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use eth_keystore::decrypt_key;
use rpassword::prompt_password;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};
use tracing::debug;

/// Produces EIP-191 personal signatures over authorization hashes.
pub trait MessageSigner {
    fn sign_message(
        &self,
        account: Address,
        message: &[u8],
    ) -> impl Future<Output = Result<Bytes>>;
}

/// Delegates signing to the connected wallet, which prompts the user.
#[derive(Clone, Debug)]
pub struct WalletSigner<W> {
    wallet: W,
}

impl<W> WalletSigner<W> {
    pub fn new(wallet: W) -> Self {
        Self { wallet }
    }
}

impl<W: WalletProvider> MessageSigner for WalletSigner<W> {
    async fn sign_message(&self, account: Address, message: &[u8]) -> Result<Bytes> {
        self.wallet.sign_message(account, message).await
    }
}

/// Signs with a key held in process, ignoring which account is connected.
#[derive(Clone, Debug)]
pub struct LocalKeySigner {
    signer: PrivateKeySigner,
}

impl LocalKeySigner {
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        let signer = PrivateKeySigner::from_slice(secret)
            .map_err(|e| Error::Keystore(format!("invalid private key: {e}")))?;
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

impl MessageSigner for LocalKeySigner {
    async fn sign_message(&self, account: Address, message: &[u8]) -> Result<Bytes> {
        debug!(signer = %self.address(), %account, "signing with local key");
        let signature = self
            .signer
            .sign_message_sync(message)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}

/// Either signer, chosen from configuration at startup.
#[derive(Clone, Debug)]
pub enum AuthorizationSigner<W> {
    Wallet(WalletSigner<W>),
    Local(LocalKeySigner),
}

impl<W: WalletProvider> MessageSigner for AuthorizationSigner<W> {
    async fn sign_message(&self, account: Address, message: &[u8]) -> Result<Bytes> {
        match self {
            AuthorizationSigner::Wallet(signer) => signer.sign_message(account, message).await,
            AuthorizationSigner::Local(signer) => signer.sign_message(account, message).await,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
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
}

pub fn default_keystore_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::Keystore("HOME environment variable not set".to_string()))?;
    Ok(PathBuf::from(home).join(".foundry").join("keystores"))
}

pub fn resolve_keystore_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_keystore_dir(),
    }
}

/// Keystores are the regular files in `dir`, named by their file stem.
pub fn list_keystores(dir: &Path) -> Result<Vec<KeystoreDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut keystores = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            return Err(Error::Keystore(format!("invalid keystore filename {path:?}")));
        };
        if name.starts_with('.') {
            continue;
        }
        keystores.push(KeystoreDescriptor::new(name.to_owned(), path.clone()));
    }
    keystores.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(keystores)
}

pub fn find_keystore(dir: &Path, name: &str) -> Result<KeystoreDescriptor> {
    list_keystores(dir)?
        .into_iter()
        .find(|k| k.name == name)
        .ok_or_else(|| {
            Error::Keystore(format!(
                "keystore '{name}' not found in {}",
                dir.to_string_lossy()
            ))
        })
}

pub fn unlock_keystore(descriptor: &KeystoreDescriptor) -> Result<LocalKeySigner> {
    let prompt = format!("Enter password for keystore '{}': ", descriptor.name);
    let password = prompt_password(prompt)?;
    unlock_keystore_with_password(descriptor, &password)
}

pub fn unlock_keystore_with_password(
    descriptor: &KeystoreDescriptor,
    password: &str,
) -> Result<LocalKeySigner> {
    let secret = decrypt_key(&descriptor.path, password.as_bytes()).map_err(|_| {
        Error::Keystore(format!("invalid password for keystore '{}'", descriptor.name))
    })?;
    LocalKeySigner::from_secret(&secret)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use alloy_primitives::{
        B256,
        address,
    };

    fn unique_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "arcade-session-{label}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn key_one() -> LocalKeySigner {
        let mut secret = [0u8; 32];
        secret[31] = 1;
        LocalKeySigner::from_secret(&secret).unwrap()
    }

    #[test]
    fn from_secret__derives_known_address() {
        assert_eq!(
            key_one().address(),
            address!("7E5F4552091A69125d5DfCb7b8C2659029395Bdf")
        );
    }

    #[test]
    fn from_secret__zero_key__rejected() {
        let result = LocalKeySigner::from_secret(&[0u8; 32]);
        assert!(matches!(result, Err(Error::Keystore(_))));
    }

    #[tokio::test]
    async fn sign_message__same_hash__same_signature() {
        // given
        let signer = key_one();
        let hash = B256::repeat_byte(0x42);

        // when
        let first = signer.sign_message(Address::ZERO, hash.as_slice()).await.unwrap();
        let second = signer.sign_message(Address::ZERO, hash.as_slice()).await.unwrap();

        // then
        assert_eq!(first.len(), 65);
        assert_eq!(first, second);
    }

    #[test]
    fn list_keystores__sorted_by_name_skipping_directories() {
        // given
        let dir = unique_dir("list");
        fs::write(dir.join("zed"), "{}").unwrap();
        fs::write(dir.join("alice.json"), "{}").unwrap();
        fs::create_dir_all(dir.join("nested")).unwrap();

        // when
        let keystores = list_keystores(&dir).unwrap();

        // then
        let names: Vec<_> = keystores.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "zed"]);
        assert!(find_keystore(&dir, "zed").is_ok());
        assert!(matches!(find_keystore(&dir, "bob"), Err(Error::Keystore(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn list_keystores__missing_dir__empty() {
        let dir = std::env::temp_dir().join("arcade-session-does-not-exist");
        assert!(list_keystores(&dir).unwrap().is_empty());
    }

    #[test]
    fn unlock_keystore_with_password__garbage_file__rejected() {
        let dir = unique_dir("garbage");
        let path = dir.join("broken");
        fs::write(&path, "not a keystore").unwrap();
        let result = unlock_keystore_with_password(&KeystoreDescriptor::new("broken", path), "pw");
        assert!(matches!(result, Err(Error::Keystore(_))));
        fs::remove_dir_all(&dir).unwrap();
    }
}
