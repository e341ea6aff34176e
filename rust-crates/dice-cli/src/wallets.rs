use alloy::{
    primitives::{
        Address,
        B256,
    },
    signers::local::PrivateKeySigner,
};
use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
};
use dice_sync::identity::AuthProvider;
use eth_keystore::decrypt_key;
use rpassword::prompt_password;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};
use tracing::info;

const WALLET_EXTENSION: &str = "wallet";

#[derive(Clone, Debug)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".dice").join("wallets"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

fn wallet_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{WALLET_EXTENSION}"))
}

pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).context("Failed to read wallet directory")? {
        let entry = entry.context("Failed to read wallet entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some(WALLET_EXTENSION) {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| anyhow!("Invalid wallet filename {:?}", path))?
            .to_owned();
        wallets.push(WalletDescriptor::new(name, path));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    list_wallets(dir)?
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| anyhow!("Wallet '{name}' not found in {}", dir.to_string_lossy()))
}

/// Where wallet passwords come from.
pub trait PasswordPrompt: Send + Sync {
    fn password(&self, prompt: &str) -> Result<String>;
}

pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn password(&self, prompt: &str) -> Result<String> {
        prompt_password(prompt).context("Failed to read wallet password")
    }
}

fn signer_from_secret(name: &str, secret: &[u8]) -> Result<PrivateKeySigner> {
    let unsupported = || anyhow!("Wallet '{name}' contained unsupported key material");
    let key = B256::try_from(secret).map_err(|_| unsupported())?;
    PrivateKeySigner::from_bytes(&key).map_err(|_| unsupported())
}

pub fn unlock_wallet(
    descriptor: &WalletDescriptor,
    prompt: &impl PasswordPrompt,
) -> Result<PrivateKeySigner> {
    let password =
        prompt.password(&format!("Enter password for wallet '{}': ", descriptor.name))?;
    let secret = decrypt_key(&descriptor.path, password.as_bytes())
        .map_err(|_| anyhow!("Invalid password for wallet '{}'", descriptor.name))?;
    signer_from_secret(&descriptor.name, &secret)
}

/// Writes a fresh encrypted keystore named `name` into `dir`.
pub fn create_wallet(
    dir: &Path,
    name: &str,
    prompt: &impl PasswordPrompt,
) -> Result<(WalletDescriptor, PrivateKeySigner)> {
    let path = wallet_path(dir, name);
    if path.exists() {
        bail!("Wallet '{name}' already exists at {}", path.display());
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create wallet directory {}", dir.display()))?;
    let password = prompt.password(&format!("Choose a password for new wallet '{name}': "))?;
    let repeated = prompt.password("Repeat the password: ")?;
    if password != repeated {
        bail!("Passwords for wallet '{name}' did not match");
    }
    let file_name = format!("{name}.{WALLET_EXTENSION}");
    let (secret, _) = eth_keystore::new(
        dir,
        &mut rand::thread_rng(),
        password.as_bytes(),
        Some(&file_name),
    )
    .map_err(|err| anyhow!("Failed to create wallet '{name}': {err}"))?;
    let signer = signer_from_secret(name, &secret)?;
    Ok((WalletDescriptor::new(name, path), signer))
}

/// Embedded-wallet authentication backed by one named keystore file. Logging in
/// unlocks it; connecting creates it first when it does not exist yet.
pub struct KeystoreAuth<P = TerminalPrompt> {
    dir: PathBuf,
    name: String,
    prompt: P,
    signer: Option<PrivateKeySigner>,
}

impl KeystoreAuth {
    pub fn new(dir: PathBuf, name: impl Into<String>) -> Self {
        Self::with_prompt(dir, name, TerminalPrompt)
    }
}

impl<P: PasswordPrompt> KeystoreAuth<P> {
    pub fn with_prompt(dir: PathBuf, name: impl Into<String>, prompt: P) -> Self {
        Self {
            dir,
            name: name.into(),
            prompt,
            signer: None,
        }
    }

    pub fn signer(&self) -> Option<&PrivateKeySigner> {
        self.signer.as_ref()
    }

    fn unlocked(&mut self, signer: PrivateKeySigner) -> Address {
        let address = signer.address();
        info!(wallet = %self.name, %address, "wallet unlocked");
        self.signer = Some(signer);
        address
    }
}

impl<P: PasswordPrompt> AuthProvider for KeystoreAuth<P> {
    // keystore files need no warm-up
    fn ready(&self) -> bool {
        true
    }

    fn authenticated(&self) -> bool {
        self.signer.is_some()
    }

    fn embedded_address(&self) -> Option<Address> {
        self.signer.as_ref().map(PrivateKeySigner::address)
    }

    async fn login(&mut self) -> Result<()> {
        let descriptor = find_wallet(&self.dir, &self.name)?;
        let signer = unlock_wallet(&descriptor, &self.prompt)?;
        self.unlocked(signer);
        Ok(())
    }

    async fn connect_or_create_wallet(&mut self) -> Result<Address> {
        if let Some(signer) = &self.signer {
            return Ok(signer.address());
        }
        let signer = if wallet_path(&self.dir, &self.name).is_file() {
            let descriptor = find_wallet(&self.dir, &self.name)?;
            unlock_wallet(&descriptor, &self.prompt)?
        } else {
            info!(wallet = %self.name, dir = %self.dir.display(), "creating wallet");
            create_wallet(&self.dir, &self.name, &self.prompt)?.1
        };
        Ok(self.unlocked(signer))
    }

    fn logout(&mut self) {
        self.signer = None;
    }
}
